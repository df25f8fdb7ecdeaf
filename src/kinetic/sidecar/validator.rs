// SPDX-License-Identifier: MIT

//! Batch validation of persisted sidecars
//!
//! A single pass over a directory tree. Per-file problems are collected into
//! [`FileReport`]s and never abort the scan.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;
use walkdir::WalkDir;

use super::normalizer::parse_uuid_v4;
use super::types::{Sidecar, MAX_PROMPT_CHARS, SIDECAR_VERSION};

/// Top-level fields tolerated without a warning even though they are not part
/// of the canonical record
const TOLERATED_FIELDS: &[&str] = &["markdown"];

const DEPRECATED_RAW: &str = "deprecated field 'raw' present";
const MODEL_MISMATCH: &str = "model/model_used mismatch";

struct SchemaFields {
    known: BTreeSet<String>,
    required: BTreeSet<String>,
}

static SIDECAR_FIELDS: Lazy<SchemaFields> = Lazy::new(|| {
    let root = schemars::schema_for!(Sidecar);
    let object = root.schema.object.unwrap_or_default();
    SchemaFields {
        known: object.properties.keys().cloned().collect(),
        required: object.required.iter().cloned().collect(),
    }
});

/// JSON Schema of the canonical sidecar
pub fn sidecar_schema() -> Value {
    serde_json::to_value(schemars::schema_for!(Sidecar)).unwrap_or(Value::Null)
}

/// Narrows which files a scan looks at
#[derive(Debug, Clone, PartialEq)]
pub enum ScanFilter {
    /// Only files whose path mentions this run id
    Run(Uuid),
    /// Only sidecars that started at or after this instant
    Since(DateTime<Utc>),
}

impl FromStr for ScanFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(run_id) = Uuid::parse_str(s) {
            return Ok(ScanFilter::Run(run_id));
        }
        DateTime::parse_from_rfc3339(s)
            .map(|ts| ScanFilter::Since(ts.with_timezone(&Utc)))
            .map_err(|_| format!("'{}' is neither a run UUID nor an RFC 3339 timestamp", s))
    }
}

/// Scan settings
#[derive(Debug, Clone, Default)]
pub struct ValidateOptions {
    /// Treat deprecated fields and model mismatches as errors
    pub strict: bool,
    /// Validate files without a `version` field instead of skipping them
    pub include_all: bool,
    pub filter: Option<ScanFilter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Ok,
    Ko,
    Skip,
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileStatus::Ok => f.write_str("OK"),
            FileStatus::Ko => f.write_str("KO"),
            FileStatus::Skip => f.write_str("SKIP"),
        }
    }
}

/// Outcome for one scanned file
#[derive(Debug, Clone)]
pub struct FileReport {
    pub path: PathBuf,
    pub status: FileStatus,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl FileReport {
    fn skipped(path: PathBuf, reason: impl Into<String>) -> Self {
        Self {
            path,
            status: FileStatus::Skip,
            errors: vec![],
            warnings: vec![reason.into()],
        }
    }

    fn checked(path: PathBuf, errors: Vec<String>, warnings: Vec<String>) -> Self {
        let status = if errors.is_empty() {
            FileStatus::Ok
        } else {
            FileStatus::Ko
        };
        Self {
            path,
            status,
            errors,
            warnings,
        }
    }
}

/// Everything a scan found
#[derive(Debug, Clone, Default)]
pub struct ScanSummary {
    pub reports: Vec<FileReport>,
}

impl ScanSummary {
    pub fn count(&self, status: FileStatus) -> usize {
        self.reports.iter().filter(|r| r.status == status).count()
    }

    pub fn has_failures(&self) -> bool {
        self.count(FileStatus::Ko) > 0
    }

    /// Per-file lines followed by the `OK=.. KO=.. SKIP=..` totals line
    pub fn write_report<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for report in &self.reports {
            writeln!(out, "{:<4} {}", report.status, report.path.display())?;
            for error in &report.errors {
                writeln!(out, "     error: {}", error)?;
            }
            for warning in &report.warnings {
                writeln!(out, "     warning: {}", warning)?;
            }
        }
        writeln!(
            out,
            "OK={} KO={} SKIP={}",
            self.count(FileStatus::Ok),
            self.count(FileStatus::Ko),
            self.count(FileStatus::Skip)
        )
    }
}

/// Validate every sidecar file under `root`
pub fn scan(root: &Path, options: &ValidateOptions) -> ScanSummary {
    let mut summary = ScanSummary::default();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                log::warn!("Cannot read {}: {}", path.display(), e);
                summary
                    .reports
                    .push(FileReport::checked(path, vec![e.to_string()], vec![]));
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_candidate(entry.path()) {
            continue;
        }
        summary.reports.push(check_file(entry.path(), options));
    }

    log::info!(
        "Scanned {} sidecar files under {}",
        summary.reports.len(),
        root.display()
    );
    summary
}

fn is_candidate(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
}

fn check_file(path: &Path, options: &ValidateOptions) -> FileReport {
    let path_buf = path.to_path_buf();

    if let Some(ScanFilter::Run(run_id)) = &options.filter {
        if !path.to_string_lossy().contains(&run_id.to_string()) {
            return FileReport::skipped(path_buf, "outside target run");
        }
    }

    let doc: Value = match std::fs::read(path)
        .map_err(|e| e.to_string())
        .and_then(|bytes| serde_json::from_slice(&bytes).map_err(|e| e.to_string()))
    {
        Ok(doc) => doc,
        Err(e) => return FileReport::checked(path_buf, vec![format!("invalid JSON: {}", e)], vec![]),
    };

    if doc.get("version").is_none() && !options.include_all {
        return FileReport::skipped(path_buf, "no version field");
    }

    if let Some(ScanFilter::Since(since)) = &options.filter {
        let started = doc
            .get("started_at")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok());
        if let Some(started) = started {
            if started.with_timezone(&Utc) < *since {
                return FileReport::skipped(path_buf, "older than --since");
            }
        }
    }

    let (errors, warnings) = validate_document(&doc, options.strict);
    FileReport::checked(path_buf, errors, warnings)
}

/// Check one document against the sidecar schema, returning `(errors, warnings)`
pub fn validate_document(doc: &Value, strict: bool) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let Some(obj) = doc.as_object() else {
        errors.push("document is not a JSON object".to_string());
        return (errors, warnings);
    };

    let fields = &*SIDECAR_FIELDS;
    let missing: Vec<&String> = fields
        .required
        .iter()
        .filter(|f| !obj.contains_key(f.as_str()))
        .collect();
    for field in &missing {
        errors.push(format!("missing required field '{}'", field));
    }

    for key in obj.keys() {
        if fields.known.contains(key) || TOLERATED_FIELDS.contains(&key.as_str()) {
            continue;
        }
        if key == "raw" {
            if strict {
                errors.push(DEPRECATED_RAW.to_string());
            } else {
                warnings.push(DEPRECATED_RAW.to_string());
            }
        } else {
            warnings.push(format!("unknown field '{}'", key));
        }
    }

    if !missing.is_empty() {
        return (errors, warnings);
    }

    let sidecar: Sidecar = match serde_json::from_value(doc.clone()) {
        Ok(sidecar) => sidecar,
        Err(e) => {
            errors.push(format!("schema violation: {}", e));
            return (errors, warnings);
        }
    };

    if sidecar.version != SIDECAR_VERSION {
        errors.push(format!(
            "unsupported version '{}' (expected {})",
            sidecar.version, SIDECAR_VERSION
        ));
    }
    if sidecar.cost_estimate < 0.0 || !sidecar.cost_estimate.is_finite() {
        errors.push("cost_estimate must be a non-negative number".to_string());
    }
    if sidecar.ended_at < sidecar.started_at {
        errors.push("ended_at precedes started_at".to_string());
    }
    for (name, id) in [("run_id", sidecar.run_id), ("node_id", sidecar.node_id)] {
        if let Some(id) = id {
            if parse_uuid_v4(&id.to_string()).is_none() {
                errors.push(format!("{} is not a version-4 UUID", name));
            }
        }
    }

    let prompts = [
        ("system", Some(&sidecar.prompts.system)),
        ("user", Some(&sidecar.prompts.user)),
        ("final", sidecar.prompts.final_prompt.as_ref()),
    ];
    for (name, prompt) in prompts {
        if let Some(prompt) = prompt {
            overlong_leaves(prompt, &format!("prompts.{}", name), &mut errors);
        }
    }

    if sidecar.model != sidecar.model_used {
        let message = format!(
            "{} ('{}' vs '{}')",
            MODEL_MISMATCH, sidecar.model, sidecar.model_used
        );
        if strict {
            errors.push(message);
        } else {
            warnings.push(message);
        }
    }

    (errors, warnings)
}

/// Report every string leaf under `value` longer than the prompt bound
fn overlong_leaves(value: &Value, path: &str, errors: &mut Vec<String>) {
    match value {
        Value::String(text) => {
            let len = text.chars().count();
            if len > MAX_PROMPT_CHARS {
                errors.push(format!(
                    "{} exceeds {} characters ({})",
                    path, MAX_PROMPT_CHARS, len
                ));
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                overlong_leaves(item, &format!("{}[{}]", path, i), errors);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                overlong_leaves(item, &format!("{}.{}", path, key), errors);
            }
        }
        _ => {}
    }
}
