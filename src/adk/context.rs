// SPDX-License-Identifier: MIT

//! Explicit request/run/node context threaded through core calls

use std::fmt;
use uuid::Uuid;

/// Identifiers describing who a core call is made on behalf of.
///
/// Passed by reference into each operation and rendered into log lines, so no
/// ambient per-thread state is needed to correlate records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallContext {
    pub request_id: String,
    pub run_id: Option<Uuid>,
    pub node_id: Option<Uuid>,
}

impl CallContext {
    /// Create a context with a freshly generated request id
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            run_id: None,
            node_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_run(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_node(mut self, node_id: Uuid) -> Self {
        self.node_id = Some(node_id);
        self
    }
}

impl fmt::Display for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req={}", self.request_id)?;
        if let Some(run_id) = &self.run_id {
            write!(f, " run={}", run_id)?;
        }
        if let Some(node_id) = &self.node_id {
            write!(f, " node={}", node_id)?;
        }
        Ok(())
    }
}
