//! Plan loader - reads plan documents from JSON or YAML files

use super::types::RawPlan;
use crate::adk::error::{PlanError, Result, RunError};
use std::fs;
use std::path::Path;

/// Loads raw plan documents from disk
pub struct PlanLoader;

impl PlanLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load a plan, choosing the parser from the file extension (YAML for
    /// `.yaml`/`.yml`, JSON otherwise)
    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<RawPlan> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let is_yaml = path
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml");

        log::debug!("Loading plan from {}", path.display());
        if is_yaml {
            Self::parse_yaml(&content)
        } else {
            Self::parse_json(&content)
        }
    }

    /// Parse a plan from a JSON string
    pub fn parse_json(content: &str) -> Result<RawPlan> {
        serde_json::from_str(content).map_err(|e| malformed(e.to_string()))
    }

    /// Parse a plan from a YAML string
    pub fn parse_yaml(content: &str) -> Result<RawPlan> {
        serde_yaml::from_str(content).map_err(|e| malformed(e.to_string()))
    }
}

impl Default for PlanLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn malformed(message: String) -> RunError {
    PlanError::Malformed(message).into()
}
