//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`MilkySettings::default()`]
//! 2. If `$MILKY_HOME/settings.json` exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::MilkySettings;

/// Resolve the settings directory (`$MILKY_HOME`, else `~/.milky`).
pub fn settings_dir() -> PathBuf {
    if let Some(home) = std::env::var("MILKY_HOME").ok().filter(|v| !v.is_empty()) {
        return PathBuf::from(home);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".milky")
}

/// Resolve the path to the settings file.
pub fn settings_path() -> PathBuf {
    settings_dir().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<MilkySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<MilkySettings> {
    load_with_lookup(path, |name| std::env::var(name).ok())
}

/// Same as [`load_settings_from_path`] with an injectable env source.
pub fn load_with_lookup(
    path: &Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<MilkySettings> {
    let defaults = serde_json::to_value(MilkySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: MilkySettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, &lookup);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
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

/// Apply process environment overrides.
pub fn apply_env_overrides(settings: &mut MilkySettings) {
    apply_overrides(settings, &|name: &str| std::env::var(name).ok());
}

/// Apply overrides from `lookup`. Invalid values are logged and ignored.
pub fn apply_overrides(settings: &mut MilkySettings, lookup: &dyn Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Inference ───────────────────────────────────────────────────
    if let Some(v) = env.string("AI_MODEL_NAME") {
        settings.inference.model = v;
    }
    if let Some(v) = env.string("MILKY_BACKEND_URL") {
        settings.inference.base_url = v;
    }
    if let Some(v) = env.u64("MILKY_MAX_ATTEMPTS", 1, 50) {
        settings.inference.max_attempts = v as u32;
    }
    if let Some(v) = env.u64("MILKY_FAILURE_THRESHOLD", 1, 1000) {
        settings.inference.failure_threshold = v as u32;
    }

    // ── Persona / operator ──────────────────────────────────────────
    if let Some(v) = env.string("BOT_PERSONA") {
        settings.persona.base_prompt = v;
    }
    if let Some(v) = env.u64("BOT_OWNER_ID", 1, u64::MAX) {
        settings.operator.owner_id = Some(v);
    }

    // ── Sync ────────────────────────────────────────────────────────
    if let Some(v) = env.string("HF_DATA_REPO_ID") {
        settings.sync.repo_id = Some(v);
    }
    if let Some(v) = env.string("MILKY_DATA_FILE") {
        settings.sync.filename = v;
    }
    if let Some(v) = env.string("MILKY_LOCAL_DATA_DIR") {
        settings.sync.local_dir = Some(v);
    }

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("MILKY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u64("MILKY_PORT", 1, 65535) {
        settings.server.port = v as u16;
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

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl EnvReader<'_> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.trim().is_empty())
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.string(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid integer env var, ignoring");
        }
        result
    }
}
