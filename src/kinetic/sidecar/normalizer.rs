// SPDX-License-Identifier: MIT

//! Sidecar normalization - raw provider metadata to canonical records
//!
//! Normalization is total: malformed input is replaced by safe defaults and
//! the substitution is recorded in `warnings`. It never fails and performs no
//! I/O.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::types::{
    Prompts, Provider, Sidecar, Usage, MAX_PROMPT_CHARS, MODEL_MISMATCH_WARNING, SIDECAR_VERSION,
};

pub const USAGE_TOTAL_WARNING: &str = "usage total mismatch (normalized)";

const UNKNOWN_MODEL: &str = "unknown";

/// Normalize raw call metadata into a [`Sidecar`].
///
/// `run_id` and `node_id` take precedence over ids embedded in `raw`; either is
/// kept only if it is a version-4 UUID.
pub fn normalize(raw: &Value, run_id: Option<&str>, node_id: Option<&str>) -> Sidecar {
    normalize_at(raw, run_id, node_id, Utc::now())
}

/// Same as [`normalize`] with an explicit "now" for defaulted timestamps
pub fn normalize_at(
    raw: &Value,
    run_id: Option<&str>,
    node_id: Option<&str>,
    now: DateTime<Utc>,
) -> Sidecar {
    let empty = Map::new();
    let obj = raw.as_object().unwrap_or(&empty);
    let mut warnings = Warnings::from_existing(obj.get("warnings"));

    if !raw.is_object() && !raw.is_null() {
        warnings.push("sidecar input was not an object (defaulted)");
    }

    let provider = match obj.get("provider").and_then(Value::as_str) {
        None => Provider::Other,
        Some(name) => name.parse().unwrap_or_else(|_| {
            warnings.push(format!("unknown provider '{}' (normalized to other)", name));
            Provider::Other
        }),
    };

    let (model, model_used) = resolve_model(obj, &mut warnings);
    let latency_ms = normalize_latency(obj.get("latency_ms"), &mut warnings);
    let usage = normalize_usage(obj.get("usage"), &mut warnings);
    let cost_estimate = obj
        .get("cost_estimate")
        .or_else(|| obj.get("cost"))
        .and_then(as_number)
        .filter(|c| *c >= 0.0)
        .unwrap_or(0.0);

    let prompts = Prompts {
        system: prompt_field(obj, "system").unwrap_or_else(|| Value::String(String::new())),
        user: prompt_field(obj, "user").unwrap_or_else(|| Value::String(String::new())),
        final_prompt: prompt_field(obj, "final"),
    };

    let started_at = match timestamp_field(obj, "started_at", "started") {
        Timestamp::Absent => now,
        Timestamp::Parsed(ts) => ts,
        Timestamp::Invalid => {
            warnings.push("started_at unparsable (defaulted to now)");
            now
        }
    };
    let mut ended_at = match timestamp_field(obj, "ended_at", "ended") {
        Timestamp::Absent => started_at,
        Timestamp::Parsed(ts) => ts,
        Timestamp::Invalid => {
            warnings.push("ended_at unparsable (defaulted to now)");
            now
        }
    };
    if ended_at < started_at {
        warnings.push("ended_at before started_at (normalized)");
        ended_at = started_at;
    }

    Sidecar {
        version: SIDECAR_VERSION.to_string(),
        provider,
        model,
        model_used,
        latency_ms,
        usage,
        cost_estimate,
        prompts,
        started_at,
        ended_at,
        warnings: warnings.into_vec(),
        run_id: resolve_uuid(run_id, obj.get("run_id")),
        node_id: resolve_uuid(node_id, obj.get("node_id")),
    }
}

/// Parse a string as a version-4 UUID
pub fn parse_uuid_v4(s: &str) -> Option<Uuid> {
    Uuid::parse_str(s.trim())
        .ok()
        .filter(|id| id.get_version_num() == 4)
}

/// Truncate every string leaf of a prompt structure to `max` characters
pub fn truncate_leaves(value: &Value, max: usize) -> Value {
    match value {
        Value::String(s) if s.chars().count() > max => Value::String(s.chars().take(max).collect()),
        Value::Array(items) => Value::Array(items.iter().map(|v| truncate_leaves(v, max)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), truncate_leaves(v, max)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Ordered, de-duplicated warning list
struct Warnings(Vec<String>);

impl Warnings {
    fn from_existing(value: Option<&Value>) -> Self {
        let mut warnings = Self(Vec::new());
        match value {
            Some(Value::String(s)) => warnings.push(s.clone()),
            Some(Value::Array(items)) => {
                for item in items.iter().filter_map(Value::as_str) {
                    warnings.push(item);
                }
            }
            _ => {}
        }
        warnings
    }

    fn push(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        if !self.0.contains(&warning) {
            self.0.push(warning);
        }
    }

    fn into_vec(self) -> Vec<String> {
        self.0
    }
}

fn resolve_model(obj: &Map<String, Value>, warnings: &mut Warnings) -> (String, String) {
    let text = |key: &str| {
        obj.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let resolved = match (text("model"), text("model_used")) {
        (Some(nominal), Some(used)) => {
            if nominal != used {
                warnings.push(MODEL_MISMATCH_WARNING);
            }
            used
        }
        (Some(only), None) | (None, Some(only)) => only,
        (None, None) => UNKNOWN_MODEL.to_string(),
    };
    (resolved.clone(), resolved)
}

fn normalize_latency(value: Option<&Value>, warnings: &mut Warnings) -> u64 {
    let Some(value) = value else { return 0 };
    match as_number(value) {
        Some(ms) if ms >= 0.0 => ms.trunc() as u64,
        Some(_) => {
            warnings.push("latency_ms negative (clamped to 0)");
            0
        }
        None => {
            warnings.push("latency_ms not numeric (defaulted to 0)");
            0
        }
    }
}

fn normalize_usage(value: Option<&Value>, warnings: &mut Warnings) -> Usage {
    let Some(usage) = value.and_then(Value::as_object) else {
        return Usage::default();
    };
    let counter = |primary: &str, alias: &str| {
        usage
            .get(primary)
            .or_else(|| usage.get(alias))
            .and_then(as_number)
            .filter(|n| *n >= 0.0)
            .map(|n| n.trunc() as u64)
    };

    let prompt_tokens = counter("prompt_tokens", "input_tokens").unwrap_or(0);
    let completion_tokens = counter("completion_tokens", "output_tokens").unwrap_or(0);
    let total_tokens = prompt_tokens.saturating_add(completion_tokens);

    if let Some(reported) = counter("total_tokens", "total_tokens") {
        if reported != total_tokens {
            warnings.push(USAGE_TOTAL_WARNING);
        }
    }

    Usage {
        prompt_tokens,
        completion_tokens,
        total_tokens,
    }
}

fn prompt_field(obj: &Map<String, Value>, name: &str) -> Option<Value> {
    obj.get("prompts")
        .and_then(|p| p.get(name))
        .or_else(|| obj.get(&format!("{}_prompt", name)))
        .filter(|v| !v.is_null())
        .map(|v| truncate_leaves(v, MAX_PROMPT_CHARS))
}

enum Timestamp {
    Absent,
    Parsed(DateTime<Utc>),
    Invalid,
}

fn timestamp_field(obj: &Map<String, Value>, key: &str, alias: &str) -> Timestamp {
    match obj.get(key).or_else(|| obj.get(alias)) {
        None | Some(Value::Null) => Timestamp::Absent,
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s.trim())
            .map(|ts| Timestamp::Parsed(ts.with_timezone(&Utc)))
            .unwrap_or(Timestamp::Invalid),
        Some(_) => Timestamp::Invalid,
    }
}

fn resolve_uuid(supplied: Option<&str>, embedded: Option<&Value>) -> Option<Uuid> {
    supplied
        .and_then(parse_uuid_v4)
        .or_else(|| embedded.and_then(Value::as_str).and_then(parse_uuid_v4))
}

/// Numbers and numeric strings; NaN and infinities are rejected
fn as_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    n.filter(|n| n.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn norm(raw: Value) -> Sidecar {
        normalize_at(&raw, None, None, fixed_now())
    }

    #[test]
    fn test_version_forced() {
        let sidecar = norm(json!({"version": "0.3"}));
        assert_eq!(sidecar.version, "1.0");
    }

    #[test]
    fn test_unknown_provider_becomes_other() {
        let sidecar = norm(json!({"provider": "gemini"}));
        assert_eq!(sidecar.provider, Provider::Other);
        assert!(sidecar.warnings.iter().any(|w| w.contains("gemini")));

        let sidecar = norm(json!({}));
        assert_eq!(sidecar.provider, Provider::Other);
        assert!(sidecar.warnings.is_empty());

        let sidecar = norm(json!({"provider": "anthropic"}));
        assert_eq!(sidecar.provider, Provider::Anthropic);
    }

    #[test]
    fn test_model_mismatch_prefers_model_used() {
        let sidecar = norm(json!({"model": "a", "model_used": "b"}));
        assert_eq!(sidecar.model, "b");
        assert_eq!(sidecar.model_used, "b");
        assert!(sidecar
            .warnings
            .iter()
            .any(|w| w.contains("model/model_used mismatch")));
    }

    #[test]
    fn test_single_model_fills_both() {
        let sidecar = norm(json!({"model": "gpt-4o"}));
        assert_eq!(sidecar.model, "gpt-4o");
        assert_eq!(sidecar.model_used, "gpt-4o");
        assert!(sidecar.warnings.is_empty());
    }

    #[test]
    fn test_latency_coercion() {
        assert_eq!(norm(json!({"latency_ms": -5})).latency_ms, 0);
        assert_eq!(norm(json!({"latency_ms": "1200"})).latency_ms, 1200);
        assert_eq!(norm(json!({"latency_ms": 12.9})).latency_ms, 12);
        assert_eq!(norm(json!({"latency_ms": "fast"})).latency_ms, 0);
        assert_eq!(norm(json!({"latency_ms": null})).latency_ms, 0);
    }

    #[test]
    fn test_usage_coercion() {
        let sidecar = norm(json!({"usage": {
            "prompt_tokens": "10",
            "completion_tokens": -3,
            "total_tokens": 10
        }}));
        assert_eq!(sidecar.usage.prompt_tokens, 10);
        assert_eq!(sidecar.usage.completion_tokens, 0);
        assert_eq!(sidecar.usage.total_tokens, 10);
        assert!(sidecar.warnings.is_empty());
    }

    #[test]
    fn test_usage_aliases_and_total_mismatch() {
        let sidecar = norm(json!({"usage": {
            "input_tokens": 7,
            "output_tokens": 5,
            "total_tokens": 99
        }}));
        assert_eq!(sidecar.usage.prompt_tokens, 7);
        assert_eq!(sidecar.usage.completion_tokens, 5);
        assert_eq!(sidecar.usage.total_tokens, 12);
        assert!(sidecar
            .warnings
            .contains(&USAGE_TOTAL_WARNING.to_string()));
    }

    #[test]
    fn test_cost_coercion() {
        assert_eq!(norm(json!({"cost_estimate": 0.25})).cost_estimate, 0.25);
        assert_eq!(norm(json!({"cost_estimate": -1.0})).cost_estimate, 0.0);
        assert_eq!(norm(json!({"cost_estimate": "NaN"})).cost_estimate, 0.0);
        assert_eq!(norm(json!({"cost": "0.5"})).cost_estimate, 0.5);
    }

    #[test]
    fn test_prompt_truncation_reaches_nested_leaves() {
        let long = "x".repeat(2000);
        let sidecar = norm(json!({"prompts": {
            "system": long,
            "user": [{"role": "user", "content": long, "tokens": 2000}],
            "final": {"messages": [{"content": long}]}
        }}));

        assert_eq!(sidecar.prompts.system.as_str().unwrap().len(), MAX_PROMPT_CHARS);
        assert_eq!(
            sidecar.prompts.user[0]["content"].as_str().unwrap().len(),
            MAX_PROMPT_CHARS
        );
        assert_eq!(sidecar.prompts.user[0]["role"], "user");
        assert_eq!(sidecar.prompts.user[0]["tokens"], 2000);
        let final_prompt = sidecar.prompts.final_prompt.unwrap();
        assert_eq!(
            final_prompt["messages"][0]["content"].as_str().unwrap().chars().count(),
            MAX_PROMPT_CHARS
        );
    }

    #[test]
    fn test_truncation_counts_characters_not_bytes() {
        let text = "é".repeat(900);
        let truncated = truncate_leaves(&Value::String(text), MAX_PROMPT_CHARS);
        assert_eq!(truncated.as_str().unwrap().chars().count(), MAX_PROMPT_CHARS);
    }

    #[test]
    fn test_missing_prompts_default_to_empty() {
        let sidecar = norm(json!({}));
        assert_eq!(sidecar.prompts.system, "");
        assert_eq!(sidecar.prompts.user, "");
        assert!(sidecar.prompts.final_prompt.is_none());
    }

    #[test]
    fn test_timestamps_default() {
        let sidecar = norm(json!({}));
        assert_eq!(sidecar.started_at, fixed_now());
        assert_eq!(sidecar.ended_at, fixed_now());

        let sidecar = norm(json!({"started_at": "2024-04-01T10:00:00+02:00"}));
        assert_eq!(
            sidecar.started_at,
            Utc.with_ymd_and_hms(2024, 4, 1, 8, 0, 0).unwrap()
        );
        assert_eq!(sidecar.ended_at, sidecar.started_at);
    }

    #[test]
    fn test_unparsable_timestamps_fall_back_to_now() {
        let sidecar = norm(json!({"started_at": "yesterday", "ended_at": 42}));
        assert_eq!(sidecar.started_at, fixed_now());
        assert_eq!(sidecar.ended_at, fixed_now());
        assert_eq!(sidecar.warnings.len(), 2);
    }

    #[test]
    fn test_end_before_start_is_clamped() {
        let sidecar = norm(json!({
            "started_at": "2024-04-01T10:00:00Z",
            "ended_at": "2024-04-01T09:00:00Z"
        }));
        assert_eq!(sidecar.ended_at, sidecar.started_at);
        assert!(sidecar.warnings.iter().any(|w| w.contains("before")));
    }

    #[test]
    fn test_ids_kept_only_when_uuid_v4() {
        let v4 = Uuid::new_v4().to_string();
        let nil = Uuid::nil().to_string();

        let sidecar = normalize_at(&json!({}), Some(&v4), Some("node-7"), fixed_now());
        assert_eq!(sidecar.run_id.unwrap().to_string(), v4);
        assert!(sidecar.node_id.is_none());

        let sidecar = normalize_at(&json!({"run_id": v4, "node_id": nil}), None, None, fixed_now());
        assert_eq!(sidecar.run_id.unwrap().to_string(), v4);
        assert!(sidecar.node_id.is_none());
    }

    #[test]
    fn test_supplied_id_overrides_embedded() {
        let embedded = Uuid::new_v4().to_string();
        let supplied = Uuid::new_v4().to_string();
        let sidecar = normalize_at(&json!({"run_id": embedded}), Some(&supplied), None, fixed_now());
        assert_eq!(sidecar.run_id.unwrap().to_string(), supplied);

        // An invalid override falls back to the embedded value
        let sidecar = normalize_at(&json!({"run_id": embedded}), Some("nope"), None, fixed_now());
        assert_eq!(sidecar.run_id.unwrap().to_string(), embedded);
    }

    #[test]
    fn test_non_object_input_degrades() {
        let sidecar = norm(json!(["not", "a", "sidecar"]));
        assert_eq!(sidecar.version, "1.0");
        assert_eq!(sidecar.model, "unknown");
        assert_eq!(sidecar.warnings.len(), 1);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let raw = json!({
            "provider": "openai",
            "model": "gpt-4o",
            "model_used": "gpt-4o-mini",
            "latency_ms": -20,
            "usage": {"prompt_tokens": 5, "completion_tokens": 6, "total_tokens": 1},
            "cost_estimate": 0.002,
            "prompts": {"system": "x".repeat(900), "user": [{"content": "hi"}]},
            "started_at": "2024-04-01T10:00:00.123Z",
            "run_id": Uuid::new_v4().to_string(),
            "warnings": ["upstream note"]
        });

        let once = norm(raw);
        let twice = norm(serde_json::to_value(&once).unwrap());
        let thrice = norm(serde_json::to_value(&twice).unwrap());
        assert_eq!(once, twice);
        assert_eq!(twice, thrice);
        assert_eq!(once.warnings[0], "upstream note");
    }
}
