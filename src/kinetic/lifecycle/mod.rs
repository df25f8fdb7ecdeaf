// SPDX-License-Identifier: MIT

//! Node lifecycle control
//!
//! This module provides:
//! - `NodeStatus` / `ControlAction` - the per-node state machine vocabulary
//! - `NodeLifecycleManager` - applies external control actions to a run's nodes

mod manager;
mod state;

pub use manager::NodeLifecycleManager;
pub use state::{ActionOutcome, ControlAction, NodeRuntimeState, NodeStatus};
