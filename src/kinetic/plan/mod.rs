// SPDX-License-Identifier: MIT

//! Plan compilation
//!
//! This module turns a submitted plan into a validated execution graph
//! that schedulers walk in dependency order.

pub mod compiler;
pub mod graph;
pub mod loader;
pub mod types;

pub use compiler::{compile, compile_value};
pub use graph::{ExecutionGraph, NodeKind, PlanNode};
pub use loader::PlanLoader;
pub use types::{ListField, RawPlan, RawPlanNode};
