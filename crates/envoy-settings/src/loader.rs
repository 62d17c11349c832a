//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`EnvoySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate the result

use std::path::{Path, PathBuf};

use envoy_core::Country;
use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::EnvoySettings;

/// Resolve the settings file: `$ENVOY_SETTINGS`, else `~/.envoy/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(explicit) = read_env_string("ENVOY_SETTINGS") {
        return PathBuf::from(explicit);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".envoy").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<EnvoySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<EnvoySettings> {
    let mut settings = read_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn read_file_layer(path: &Path) -> Result<EnvoySettings> {
    let defaults = serde_json::to_value(EnvoySettings::default())?;

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
/// Invalid values are logged and ignored (fall back to file/default).
pub fn apply_env_overrides(settings: &mut EnvoySettings) {
    if let Some(v) = read_env_country("ENVOY_AI_COUNTRY") {
        settings.ai_country = v;
    }
    if let Some(v) = read_env_string("ENVOY_CONTROL_CHANNEL_ID") {
        settings.control_channel_id = v;
    }
    if let Some(v) = read_env_string("ENVOY_DB_PATH") {
        settings.db_path = PathBuf::from(v);
    }

    // ── Threads ─────────────────────────────────────────────────────
    if let Some(v) = read_env_usize("ENVOY_RAW_TURNS_TO_KEEP", 1, 1000) {
        settings.threads.raw_turns_to_keep = v;
    }
    if let Some(v) = read_env_usize("ENVOY_MAX_CHARS_PER_MSG", 1, 100_000) {
        settings.threads.max_chars_per_msg = v;
    }
    if let Some(v) = read_env_f64("ENVOY_COOLDOWN_SECONDS", 0.0, 86_400.0) {
        settings.cooldown.window_secs = v;
    }
    if let Some(v) = read_env_usize("ENVOY_OUTREACH_DEFAULT", 0, settings.outreach.max_budget) {
        settings.outreach.default_budget = v;
    }

    // ── Completion ──────────────────────────────────────────────────
    if let Some(v) = read_env_string("ENVOY_MODEL") {
        settings.completion.model = v;
    }
    if let Some(v) = read_env_string("ENVOY_SERVICE_TIER") {
        settings.completion.service_tier = v;
    }
    if let Some(v) = read_env_u64("ENVOY_COMPLETION_TIMEOUT_SECS", 1, 3600) {
        settings.completion.timeout_secs = v;
    }

    if let Some(v) = read_env_string("ENVOY_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a finite `f64` within a range.
pub fn parse_f64_range(val: &str, min: f64, max: f64) -> Option<f64> {
    let n: f64 = val.trim().parse().ok()?;
    (n.is_finite() && n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_country(name: &str) -> Option<Country> {
    let val = std::env::var(name).ok()?;
    match val.parse() {
        Ok(country) => Some(country),
        Err(e) => {
            tracing::warn!(key = name, value = %val, error = %e, "invalid country env var, ignoring");
            None
        }
    }
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

fn read_env_f64(name: &str, min: f64, max: f64) -> Option<f64> {
    let val = std::env::var(name).ok()?;
    let result = parse_f64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid f64 env var, ignoring");
    }
    result
}
