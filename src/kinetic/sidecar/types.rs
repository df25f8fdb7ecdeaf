// SPDX-License-Identifier: MIT

//! Canonical sidecar record types

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The only schema version written by this crate
pub const SIDECAR_VERSION: &str = "1.0";

/// Maximum characters kept per prompt string
pub const MAX_PROMPT_CHARS: usize = 800;

/// Warning attached when the nominal and actually-used models disagree
pub const MODEL_MISMATCH_WARNING: &str = "model/model_used mismatch (normalized)";

/// Canonical record of one LLM interaction
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, JsonSchema)]
pub struct Sidecar {
    pub version: String,
    pub provider: Provider,
    pub model: String,
    pub model_used: String,
    pub latency_ms: u64,
    pub usage: Usage,
    pub cost_estimate: f64,
    pub prompts: Prompts,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<Uuid>,
}

/// Token counters
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Prompt texts, each either a string or a message structure with truncated
/// string leaves
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
pub struct Prompts {
    pub system: serde_json::Value,
    pub user: serde_json::Value,
    #[serde(rename = "final", default, skip_serializing_if = "Option::is_none")]
    pub final_prompt: Option<serde_json::Value>,
}

/// LLM providers a sidecar may name
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Ollama,
    #[serde(rename = "azure_openai")]
    AzureOpenAi,
    #[default]
    Other,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Ollama => "ollama",
            Provider::AzureOpenAi => "azure_openai",
            Provider::Other => "other",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "anthropic" => Ok(Provider::Anthropic),
            "ollama" => Ok(Provider::Ollama),
            "azure_openai" => Ok(Provider::AzureOpenAi),
            "other" => Ok(Provider::Other),
            other => Err(format!("unknown provider '{}'", other)),
        }
    }
}
