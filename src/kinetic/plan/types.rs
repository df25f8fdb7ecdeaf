//! Raw plan document types
//!
//! These mirror the submitted plan as loosely as possible; all tightening
//! happens in the compiler.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A submitted plan document
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RawPlan {
    /// Steps in submission order
    #[serde(default)]
    pub plan: Vec<RawPlanNode>,
}

/// One step of a submitted plan
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RawPlanNode {
    /// Stable identifier, unique within the plan
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// Node type: "manage" or "execute"
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub suggested_agent_role: Option<String>,
    /// Dependencies - nodes that must finish before this runs
    #[serde(default)]
    pub deps: ListField,
    #[serde(default)]
    pub acceptance: ListField,
    #[serde(default)]
    pub risks: ListField,
    #[serde(default)]
    pub assumptions: ListField,
    #[serde(default)]
    pub notes: ListField,
    /// Opaque model configuration, passed through untouched
    #[serde(default)]
    pub llm: Option<serde_json::Map<String, Value>>,
}

/// A field that may arrive absent, as `false`, as a single scalar or as a list
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(untagged)]
pub enum ListField {
    #[default]
    None,
    /// `false` (and, leniently, `true`) carry no entries
    Flag(bool),
    Number(serde_json::Number),
    Single(String),
    /// Elements may be strings, numbers or booleans
    Multiple(Vec<Value>),
}

impl ListField {
    /// Convert to an ordered list of trimmed, non-empty strings
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            ListField::None | ListField::Flag(_) => vec![],
            ListField::Number(n) => vec![n.to_string()],
            ListField::Single(s) => clean(std::iter::once(s.clone())),
            ListField::Multiple(items) => clean(items.iter().filter_map(scalar_text)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_vec().is_empty()
    }
}

/// Text of a scalar list element; nulls carry nothing, nested values keep their JSON form
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

fn clean(items: impl Iterator<Item = String>) -> Vec<String> {
    items
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
