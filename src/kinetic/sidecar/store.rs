// SPDX-License-Identifier: MIT

//! Durable sidecar storage
//!
//! Layout under the store root:
//! - `runs/<run_id>/nodes/<node_key>/sidecar.json`
//! - `runs/<run_id>/recruitment/<request_id>.json`

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

use super::types::Sidecar;
use crate::adk::error::Result;

/// Directory used when a sidecar is written outside any run
const UNSCOPED_RUN: &str = "unscoped";

/// Where a sidecar belongs in the run-scoped tree
#[derive(Debug, Clone, PartialEq)]
pub enum SidecarKey {
    /// The latest sidecar of one node in a run
    Node { run_id: Uuid, node_key: String },
    /// One recruitment request
    Recruitment {
        run_id: Option<Uuid>,
        request_id: String,
    },
}

impl SidecarKey {
    /// Path of this key relative to the store root
    pub fn relative_path(&self) -> PathBuf {
        match self {
            SidecarKey::Node { run_id, node_key } => PathBuf::from("runs")
                .join(run_id.to_string())
                .join("nodes")
                .join(sanitize_segment(node_key))
                .join("sidecar.json"),
            SidecarKey::Recruitment { run_id, request_id } => {
                let run = run_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| UNSCOPED_RUN.to_string());
                PathBuf::from("runs")
                    .join(run)
                    .join("recruitment")
                    .join(format!("{}.json", sanitize_segment(request_id)))
            }
        }
    }
}

/// Persistence for normalized sidecars
#[async_trait]
pub trait SidecarStore: Send + Sync {
    /// Durably write `sidecar` under `key`, returning where it landed
    async fn write(&self, key: &SidecarKey, sidecar: &Sidecar) -> Result<PathBuf>;
}

/// Filesystem-backed store rooted at a directory
#[derive(Debug, Clone)]
pub struct FsSidecarStore {
    root: PathBuf,
}

impl FsSidecarStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &SidecarKey) -> PathBuf {
        self.root.join(key.relative_path())
    }
}

#[async_trait]
impl SidecarStore for FsSidecarStore {
    async fn write(&self, key: &SidecarKey, sidecar: &Sidecar) -> Result<PathBuf> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write beside the target then rename so readers never observe a partial file
        let body = serde_json::to_vec_pretty(sidecar)?;
        let tmp = path.with_extension(format!("json.{}.tmp", Uuid::new_v4().simple()));
        fs::write(&tmp, &body).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        log::debug!("Wrote sidecar to {}", path.display());
        Ok(path)
    }
}

/// Escape a key into one path segment.
///
/// Bytes outside `[A-Za-z0-9._-]` become `%XX`, so distinct keys always map to
/// distinct segments and none can leave its directory. The empty key and the
/// dot names get reserved spellings.
fn sanitize_segment(segment: &str) -> String {
    match segment {
        "" => return "%".to_string(),
        "." => return "%2E".to_string(),
        ".." => return "%2E%2E".to_string(),
        _ => {}
    }

    let mut escaped = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-') {
            escaped.push(char::from(byte));
        } else {
            escaped.push_str(&format!("%{:02X}", byte));
        }
    }
    escaped
}
