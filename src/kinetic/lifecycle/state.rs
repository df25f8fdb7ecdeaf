// SPDX-License-Identifier: MIT

//! Node lifecycle states and control actions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::adk::error::RunError;

/// Lifecycle status of one node instance
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Waiting for the engine to (re)dispatch it
    #[default]
    Queued,
    Running,
    Paused,
    Skipped,
    Completed,
    Failed,
}

impl NodeStatus {
    /// Skipped, completed and failed nodes do not move again except through `override`
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeStatus::Skipped | NodeStatus::Completed | NodeStatus::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Queued => "queued",
            NodeStatus::Running => "running",
            NodeStatus::Paused => "paused",
            NodeStatus::Skipped => "skipped",
            NodeStatus::Completed => "completed",
            NodeStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// External control actions
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Pause,
    Resume,
    Skip,
    Override,
}

impl ControlAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlAction::Pause => "pause",
            ControlAction::Resume => "resume",
            ControlAction::Skip => "skip",
            ControlAction::Override => "override",
        }
    }

    /// Status reached when the action is accepted
    pub fn target(&self) -> NodeStatus {
        match self {
            ControlAction::Pause => NodeStatus::Paused,
            ControlAction::Resume => NodeStatus::Running,
            ControlAction::Skip => NodeStatus::Skipped,
            ControlAction::Override => NodeStatus::Queued,
        }
    }

    /// Whether the action may be applied to a node currently in `status`
    pub fn allowed_from(&self, status: NodeStatus) -> bool {
        match self {
            ControlAction::Pause => status == NodeStatus::Running,
            ControlAction::Resume => status == NodeStatus::Paused,
            ControlAction::Skip => !status.is_terminal(),
            ControlAction::Override => true,
        }
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlAction {
    type Err = RunError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pause" => Ok(ControlAction::Pause),
            "resume" => Ok(ControlAction::Resume),
            "skip" => Ok(ControlAction::Skip),
            "override" => Ok(ControlAction::Override),
            other => Err(RunError::validation(format!(
                "unknown action '{}' (expected pause, resume, skip or override)",
                other
            ))),
        }
    }
}

/// Result of an accepted control action
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ActionOutcome {
    pub status_after: NodeStatus,
    /// Set when the action wrote a fresh sidecar for the node
    pub sidecar_updated: bool,
}

/// Mutable per-node execution state
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NodeRuntimeState {
    /// Storage identifier of this node instance
    pub instance_id: Uuid,
    pub status: NodeStatus,
    pub assigned_agent: Option<String>,
    pub last_action: Option<(ControlAction, ActionOutcome)>,
}

impl NodeRuntimeState {
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            status: NodeStatus::Queued,
            assigned_agent: None,
            last_action: None,
        }
    }
}

impl Default for NodeRuntimeState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [NodeStatus; 6] = [
        NodeStatus::Queued,
        NodeStatus::Running,
        NodeStatus::Paused,
        NodeStatus::Skipped,
        NodeStatus::Completed,
        NodeStatus::Failed,
    ];

    #[test]
    fn test_pause_only_from_running() {
        for status in ALL {
            assert_eq!(
                ControlAction::Pause.allowed_from(status),
                status == NodeStatus::Running,
                "pause from {status}"
            );
        }
    }

    #[test]
    fn test_resume_only_from_paused() {
        for status in ALL {
            assert_eq!(
                ControlAction::Resume.allowed_from(status),
                status == NodeStatus::Paused,
                "resume from {status}"
            );
        }
    }

    #[test]
    fn test_skip_from_non_terminal() {
        assert!(ControlAction::Skip.allowed_from(NodeStatus::Queued));
        assert!(ControlAction::Skip.allowed_from(NodeStatus::Running));
        assert!(ControlAction::Skip.allowed_from(NodeStatus::Paused));
        assert!(!ControlAction::Skip.allowed_from(NodeStatus::Skipped));
        assert!(!ControlAction::Skip.allowed_from(NodeStatus::Completed));
        assert!(!ControlAction::Skip.allowed_from(NodeStatus::Failed));
    }

    #[test]
    fn test_override_from_anywhere() {
        for status in ALL {
            assert!(ControlAction::Override.allowed_from(status));
        }
        assert_eq!(ControlAction::Override.target(), NodeStatus::Queued);
    }

    #[test]
    fn test_parse_actions() {
        assert_eq!("pause".parse::<ControlAction>().unwrap(), ControlAction::Pause);
        assert_eq!("resume".parse::<ControlAction>().unwrap(), ControlAction::Resume);
        for name in ["restart", "PAUSE", " resume ", "Skip", ""] {
            let err = name.parse::<ControlAction>().unwrap_err();
            assert!(matches!(err, RunError::Validation(_)), "{:?}", name);
        }
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(NodeStatus::Completed).unwrap(),
            "completed"
        );
    }

    #[test]
    fn test_new_state_is_queued() {
        let state = NodeRuntimeState::new();
        assert_eq!(state.status, NodeStatus::Queued);
        assert_eq!(state.instance_id.get_version_num(), 4);
        assert!(state.assigned_agent.is_none());
    }
}
