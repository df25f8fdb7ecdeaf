// SPDX-License-Identifier: MIT

//! LLM call sidecars
//!
//! This module provides:
//! - `Sidecar` - the canonical, versioned record of one LLM call
//! - `normalize` - raw provider metadata to a `Sidecar`, never failing
//! - `SidecarStore` - durable, run-scoped persistence
//! - `validator` - offline batch checks over persisted sidecars

pub mod normalizer;
pub mod store;
pub mod types;
pub mod validator;

pub use normalizer::{normalize, normalize_at, parse_uuid_v4};
pub use store::{FsSidecarStore, SidecarKey, SidecarStore};
pub use types::{Prompts, Provider, Sidecar, Usage, MAX_PROMPT_CHARS, SIDECAR_VERSION};
pub use validator::{scan, validate_document, FileStatus, ScanFilter, ScanSummary, ValidateOptions};
