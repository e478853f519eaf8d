//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ApexSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `APEX_*` environment variable overrides
//!
//! Callers apply any command-line overrides afterwards and then run
//! [`validate`].

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::ApexSettings;

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

/// Resolve the default settings file (`~/.apex/settings.json`).
pub fn settings_path() -> PathBuf {
    home_dir().join(".apex").join("settings.json")
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => home_dir().join(rest),
        None => PathBuf::from(path),
    }
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ApexSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields the defaults. Invalid JSON, or a value of the wrong
/// shape (such as an unknown drain mode), is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ApexSettings> {
    let defaults = serde_json::to_value(ApexSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: ApexSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// Objects merge per key, arrays and primitives are replaced by `source`,
/// and nulls in `source` leave `target` untouched.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `APEX_*` environment variable overrides.
///
/// Invalid values are ignored with a warning.
pub fn apply_env_overrides(settings: &mut ApexSettings) {
    if let Some(v) = read_env_string("APEX_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("APEX_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_usize("APEX_MAX_CONNECTIONS", 1, 1_000_000) {
        settings.server.max_connections = v;
    }
    if let Some(v) = read_env_usize("APEX_QUEUE_CAPACITY", 1, 1_000_000) {
        settings.server.queue_capacity = v;
    }
    if let Some(v) = read_env_string("APEX_DB_PATH") {
        settings.storage.db_path = v;
    }
    if let Some(v) = read_env_string("APEX_STORAGE_BACKEND") {
        match serde_json::from_value(Value::String(v.to_lowercase())) {
            Ok(backend) => settings.storage.backend = backend,
            Err(_) => tracing::warn!(key = "APEX_STORAGE_BACKEND", value = %v, "unknown backend, ignoring"),
        }
    }
    if let Some(v) = read_env_u64("APEX_CACHE_TTL_SECS", 1, 86_400) {
        settings.cache.ttl_secs = v;
    }
    if let Some(v) = read_env_string("APEX_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("APEX_LOG_JSON") {
        settings.logging.json = v;
    }
}

/// Check cross-field and range constraints.
pub fn validate(settings: &ApexSettings) -> Result<()> {
    let server = &settings.server;
    let checks = [
        (server.queue_capacity == 0, "server.queue_capacity must be > 0"),
        (server.max_connections == 0, "server.max_connections must be > 0"),
        (server.heartbeat_interval_secs == 0, "server.heartbeat_interval_secs must be > 0"),
        (
            server.heartbeat_timeout_secs <= server.heartbeat_interval_secs,
            "server.heartbeat_timeout_secs must exceed heartbeat_interval_secs",
        ),
        (settings.ingest.channels.is_empty(), "ingest.channels must not be empty"),
        (settings.ingest.bus_capacity == 0, "ingest.bus_capacity must be > 0"),
        (
            settings.ingest.persist_queue_capacity == 0,
            "ingest.persist_queue_capacity must be > 0",
        ),
        (settings.storage.pool_size == 0, "storage.pool_size must be > 0"),
    ];
    match checks.iter().find(|(failed, _)| *failed) {
        Some((_, msg)) => Err(SettingsError::InvalidValue((*msg).to_string())),
        None => Ok(()),
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

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

// ── Env var readers ─────────────────────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_parsed<T>(name: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
    let val = std::env::var(name).ok()?;
    let result = parse(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid env var, ignoring");
    }
    result
}

fn read_env_bool(name: &str) -> Option<bool> {
    read_env_parsed(name, parse_bool)
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    read_env_parsed(name, |v| parse_u16_range(v, min, max))
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    read_env_parsed(name, |v| parse_u64_range(v, min, max))
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    read_env_parsed(name, |v| parse_usize_range(v, min, max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DrainMode, StorageBackend};
    use assert_matches::assert_matches;
    use serde_json::json;

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = json!({"server": {"port": 8000, "host": "0.0.0.0"}});
        let source = json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
    }

    #[test]
    fn merge_array_replace() {
        let target = json!({"channels": ["sensors/#", "alerts/#"]});
        let source = json!({"channels": ["sensors/plant-1/#"]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["channels"], json!(["sensors/plant-1/#"]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(json!({"a": 1, "b": 2}), json!({"a": null}));
        assert_eq!(merged, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn merge_new_keys_added() {
        let merged = deep_merge(json!({"a": 1}), json!({"b": {"c": true}}));
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"]["c"], true);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let merged = deep_merge(json!({"a": {"nested": true}}), json!({"a": 42}));
        assert_eq!(merged["a"], 42);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_settings_from_path(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.server.queue_capacity, 256);
        assert_eq!(settings.ingest.persist_queue_capacity, 4096);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"queue_capacity": 32, "drain": {"mode": "immediate"}},
                "cache": {"max_entries": 50}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.server.queue_capacity, 32);
        assert_eq!(settings.server.drain.mode, DrainMode::Immediate);
        assert_eq!(settings.server.drain.deadline_ms, 500);
        assert_eq!(settings.cache.max_entries, 50);
        assert_eq!(settings.cache.ttl_secs, 10);
        assert_eq!(settings.server.heartbeat_interval_secs, 30);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();
        assert_matches!(load_settings_from_path(&path), Err(SettingsError::Json(_)));
    }

    #[test]
    fn load_unknown_backend_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"storage": {"backend": "postgres"}}"#).unwrap();
        assert_matches!(load_settings_from_path(&path), Err(SettingsError::Json(_)));
    }

    #[test]
    fn load_memory_backend() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"storage": {"backend": "memory"}}"#).unwrap();
        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.storage.backend, StorageBackend::Memory);
    }

    // ── validate ────────────────────────────────────────────────────

    #[test]
    fn defaults_validate() {
        validate(&ApexSettings::default()).unwrap();
    }

    #[test]
    fn zero_queue_capacity_rejected() {
        let mut s = ApexSettings::default();
        s.server.queue_capacity = 0;
        let err = validate(&s).unwrap_err();
        assert!(err.to_string().contains("queue_capacity"));
    }

    #[test]
    fn empty_channels_rejected() {
        let mut s = ApexSettings::default();
        s.ingest.channels.clear();
        assert_matches!(validate(&s), Err(SettingsError::InvalidValue(m)) if m.contains("channels"));
    }

    #[test]
    fn heartbeat_timeout_must_exceed_interval() {
        let mut s = ApexSettings::default();
        s.server.heartbeat_timeout_secs = s.server.heartbeat_interval_secs;
        assert!(validate(&s).is_err());
    }

    #[test]
    fn zero_max_connections_rejected() {
        let mut s = ApexSettings::default();
        s.server.max_connections = 0;
        assert!(validate(&s).is_err());
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for v in ["true", "1", "YES", "On"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["false", "0", "no", "OFF"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("8000", 1, 65535), Some(8000));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("70000", 1, 65535), None);
        assert_eq!(parse_u64_range("30", 1, 86_400), Some(30));
        assert_eq!(parse_u64_range("-1", 1, 86_400), None);
        assert_eq!(parse_usize_range("256", 1, 1_000_000), Some(256));
        assert_eq!(parse_usize_range("abc", 1, 10), None);
    }

    #[test]
    fn expand_home_only_touches_tilde_prefix() {
        assert_eq!(expand_home("/var/lib/apex.db"), PathBuf::from("/var/lib/apex.db"));
        assert!(expand_home("~/.apex/apex.db").ends_with(".apex/apex.db"));
        assert!(!expand_home("~/.apex/apex.db").starts_with("~"));
    }
}
