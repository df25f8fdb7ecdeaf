// SPDX-License-Identifier: MIT

//! kinetic-runs: plan compilation, node lifecycle control and LLM sidecar
//! auditing for multi-step agent runs.

pub mod adk;
pub mod kinetic;
