//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ParleySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `PARLEY_*` environment variable overrides (highest priority)
//! 4. Validate

use std::path::{Path, PathBuf};

use parley_core::{OverflowPolicy, ShutdownPolicy};
use parley_logging::LogFormat;
use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::ParleySettings;

/// Resolve the default settings file (`~/.parley/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".parley").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ParleySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields the defaults. A file with invalid JSON, or values
/// that fail validation, is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ParleySettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Defaults deep-merged with the file at `path`, without env overrides.
pub fn read_settings_file(path: &Path) -> Result<ParleySettings> {
    let defaults = serde_json::to_value(ParleySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning and leave the file/default
/// value in place.
pub fn apply_env_overrides(settings: &mut ParleySettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary lookup. Split out from
/// [`apply_env_overrides`] so tests do not touch the process environment.
pub fn apply_overrides(settings: &mut ParleySettings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read("PARLEY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = parsed(&read, "PARLEY_PORT", |v| parse_u16_range(v, 0, 65535)) {
        settings.server.port = v;
    }
    if let Some(v) = read("PARLEY_STATIC_DIR") {
        settings.server.static_dir = Some(v);
    }

    // ── Hub ─────────────────────────────────────────────────────────
    if let Some(v) = parsed(&read, "PARLEY_MAX_CONNECTIONS", |v| {
        parse_usize_range(v, 1, 1_000_000)
    }) {
        settings.hub.max_connections = v;
    }
    if let Some(v) = parsed(&read, "PARLEY_QUEUE_CAPACITY", |v| {
        parse_usize_range(v, 1, 1_000_000)
    }) {
        settings.hub.inbound_queue_capacity = v;
    }
    if let Some(v) = parsed(&read, "PARLEY_OVERFLOW_POLICY", parse_overflow_policy) {
        settings.hub.overflow_policy = v;
    }
    if let Some(v) = parsed(&read, "PARLEY_ECHO_TO_SENDER", parse_bool) {
        settings.hub.echo_to_sender = v;
    }
    if let Some(v) = parsed(&read, "PARLEY_WRITE_TIMEOUT_MS", |v| {
        parse_u64_range(v, 1, 600_000)
    }) {
        settings.hub.write_timeout_ms = v;
    }
    if let Some(v) = parsed(&read, "PARLEY_SHUTDOWN_POLICY", parse_shutdown_policy) {
        settings.hub.shutdown_policy = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read("PARLEY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = parsed(&read, "PARLEY_LOG_FORMAT", |v| v.parse::<LogFormat>().ok()) {
        settings.logging.format = v;
    }
}

fn parsed<T>(
    read: &impl Fn(&str) -> Option<String>,
    name: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let val = read(name)?;
    let result = parse(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid env var, ignoring");
    }
    result
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse `backpressure` / `drop_newest` (dashes accepted).
pub fn parse_overflow_policy(val: &str) -> Option<OverflowPolicy> {
    match val.to_lowercase().replace('-', "_").as_str() {
        "backpressure" => Some(OverflowPolicy::Backpressure),
        "drop_newest" | "drop" => Some(OverflowPolicy::DropNewest),
        _ => None,
    }
}

/// Parse `drain` / `discard`.
pub fn parse_shutdown_policy(val: &str) -> Option<ShutdownPolicy> {
    match val.to_lowercase().as_str() {
        "drain" => Some(ShutdownPolicy::Drain),
        "discard" => Some(ShutdownPolicy::Discard),
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({
            "server": {"port": 3000, "host": "0.0.0.0"}
        });
        let source = serde_json::json!({
            "server": {"port": 9090}
        });
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4, 5]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["items"], serde_json::json!([4, 5]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_new_keys_added() {
        let target = serde_json::json!({"a": 1});
        let source = serde_json::json!({"b": 2});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_primitive_replace() {
        let merged = deep_merge(serde_json::json!("hello"), serde_json::json!("world"));
        assert_eq!(merged, "world");
    }

    // ── file loading ────────────────────────────────────────────────

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = read_settings_file(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings.server.port, 3000);
        assert_eq!(settings.hub.max_connections, 1024);
    }

    #[test]
    fn partial_file_merges_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server":{"port":8088},"hub":{"echoToSender":true,"overflowPolicy":"drop_newest"}}"#,
        )
        .unwrap();

        let settings = read_settings_file(&path).unwrap();
        assert_eq!(settings.server.port, 8088);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert!(settings.hub.echo_to_sender);
        assert_eq!(settings.hub.overflow_policy, OverflowPolicy::DropNewest);
        assert_eq!(settings.hub.inbound_queue_capacity, 1024);
    }

    #[test]
    fn invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            read_settings_file(&path),
            Err(SettingsError::Json(_))
        ));
    }

    #[test]
    fn invalid_values_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"hub":{"outboundQueueCapacity":0}}"#).unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    // ── overrides ───────────────────────────────────────────────────

    #[test]
    fn overrides_apply() {
        let mut settings = ParleySettings::default();
        let lookup = lookup_from(&[
            ("PARLEY_HOST", "127.0.0.1"),
            ("PARLEY_PORT", "4000"),
            ("PARLEY_STATIC_DIR", "./static"),
            ("PARLEY_MAX_CONNECTIONS", "10"),
            ("PARLEY_QUEUE_CAPACITY", "64"),
            ("PARLEY_OVERFLOW_POLICY", "drop-newest"),
            ("PARLEY_ECHO_TO_SENDER", "yes"),
            ("PARLEY_WRITE_TIMEOUT_MS", "250"),
            ("PARLEY_SHUTDOWN_POLICY", "discard"),
            ("PARLEY_LOG_LEVEL", "debug"),
            ("PARLEY_LOG_FORMAT", "json"),
        ]);
        apply_overrides(&mut settings, lookup);

        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 4000);
        assert_eq!(settings.server.static_dir.as_deref(), Some("./static"));
        assert_eq!(settings.hub.max_connections, 10);
        assert_eq!(settings.hub.inbound_queue_capacity, 64);
        assert_eq!(settings.hub.overflow_policy, OverflowPolicy::DropNewest);
        assert!(settings.hub.echo_to_sender);
        assert_eq!(settings.hub.write_timeout_ms, 250);
        assert_eq!(settings.hub.shutdown_policy, ShutdownPolicy::Discard);
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(settings.logging.format, LogFormat::Json);
    }

    #[test]
    fn invalid_overrides_are_ignored() {
        let mut settings = ParleySettings::default();
        let lookup = lookup_from(&[
            ("PARLEY_PORT", "not-a-port"),
            ("PARLEY_MAX_CONNECTIONS", "0"),
            ("PARLEY_ECHO_TO_SENDER", "maybe"),
            ("PARLEY_OVERFLOW_POLICY", "explode"),
            ("PARLEY_HOST", ""),
        ]);
        apply_overrides(&mut settings, lookup);

        assert_eq!(settings.server.port, 3000);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.hub.max_connections, 1024);
        assert!(!settings.hub.echo_to_sender);
        assert_eq!(settings.hub.overflow_policy, OverflowPolicy::Backpressure);
    }

    // ── parse helpers ───────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for val in &["true", "1", "yes", "on", "TRUE", "On"] {
            assert_eq!(parse_bool(val), Some(true), "failed for {val}");
        }
        for val in &["false", "0", "no", "off", "FALSE", "Off"] {
            assert_eq!(parse_bool(val), Some(false), "failed for {val}");
        }
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_bool(""), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("8080", 1, 65535), Some(8080));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("70000", 1, 65535), None);
        assert_eq!(parse_u64_range("500", 1, 1000), Some(500));
        assert_eq!(parse_u64_range("-1", 1, 1000), None);
        assert_eq!(parse_usize_range("5", 1, 10), Some(5));
        assert_eq!(parse_usize_range("11", 1, 10), None);
    }

    #[test]
    fn parse_policies() {
        assert_eq!(
            parse_overflow_policy("Backpressure"),
            Some(OverflowPolicy::Backpressure)
        );
        assert_eq!(
            parse_overflow_policy("drop_newest"),
            Some(OverflowPolicy::DropNewest)
        );
        assert_eq!(parse_overflow_policy("lifo"), None);
        assert_eq!(parse_shutdown_policy("DRAIN"), Some(ShutdownPolicy::Drain));
        assert_eq!(parse_shutdown_policy("discard"), Some(ShutdownPolicy::Discard));
        assert_eq!(parse_shutdown_policy("later"), None);
    }
}
