//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`
//! so a settings file may name only the fields it overrides.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MilkySettings {
    pub inference: InferenceSettings,
    pub memory: MemorySettings,
    pub persona: PersonaSettings,
    pub compositor: CompositorSettings,
    pub checkin: CheckinSettings,
    pub sync: SyncSettings,
    pub server: ServerSettings,
    pub operator: OperatorSettings,
    pub logging: LoggingSettings,
}

impl MilkySettings {
    /// Reject combinations the runtime cannot honor.
    pub fn validate(&self) -> Result<()> {
        let inf = &self.inference;
        if inf.max_attempts == 0 {
            return Err(SettingsError::InvalidValue("inference.maxAttempts must be >= 1".into()));
        }
        if inf.failure_threshold == 0 {
            return Err(SettingsError::InvalidValue(
                "inference.failureThreshold must be >= 1".into(),
            ));
        }
        if inf.backoff_min_ms > inf.backoff_max_ms {
            return Err(SettingsError::InvalidValue(format!(
                "inference.backoffMinMs ({}) exceeds backoffMaxMs ({})",
                inf.backoff_min_ms, inf.backoff_max_ms
            )));
        }
        let mem = &self.memory;
        if mem.retain_tail == 0 || mem.retain_tail >= mem.max_history {
            return Err(SettingsError::InvalidValue(format!(
                "memory.retainTail ({}) must be in 1..maxHistory ({})",
                mem.retain_tail, mem.max_history
            )));
        }
        Ok(())
    }
}

/// Inference backend and resilience knobs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InferenceSettings {
    pub model: String,
    pub embedding_model: String,
    pub vision_model: String,
    pub base_url: String,
    pub max_attempts: u32,
    pub failure_threshold: u32,
    pub backoff_min_ms: u64,
    pub backoff_max_ms: u64,
    /// Seconds before a tripped breaker admits a probe call. 0 keeps it latched.
    pub circuit_cooldown_secs: u64,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash".to_string(),
            embedding_model: "text-embedding-004".to_string(),
            vision_model: "gemini-2.5-flash".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            max_attempts: 5,
            failure_threshold: 5,
            backoff_min_ms: 1500,
            backoff_max_ms: 3000,
            circuit_cooldown_secs: 0,
            temperature: 0.8,
            max_tokens: 2048,
            request_timeout_secs: 180,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemorySettings {
    pub max_history: usize,
    pub retain_tail: usize,
    pub global_log_cap: usize,
    pub digest_size: usize,
    pub summary_temperature: f32,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            max_history: 30,
            retain_tail: 10,
            global_log_cap: 50,
            digest_size: 10,
            summary_temperature: 0.3,
        }
    }
}

/// Static persona text. The active persona catalog lives in the state store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersonaSettings {
    pub base_prompt: String,
    pub fallback_apology: String,
    pub owner_note: String,
    pub guest_note: String,
    pub short_reply_delimiter: String,
}

impl Default for PersonaSettings {
    fn default() -> Self {
        Self {
            base_prompt: "You are Milky, a playful and affectionate chat companion. \
                          Stay in character and answer in the language you are spoken to."
                .to_string(),
            fallback_apology: "Ugh... Milky's head hurts, my core had a hiccup. \
                               Please try again in a moment!"
                .to_string(),
            owner_note: "(Note: you are talking to your owner. Answer with absolute loyalty and affection.)"
                .to_string(),
            guest_note: "(Note: you are talking to a regular user. Answer politely, calmly and helpfully.)"
                .to_string(),
            short_reply_delimiter: "[SPLIT]".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompositorSettings {
    pub emoji_guide_cap: usize,
}

impl Default for CompositorSettings {
    fn default() -> Self {
        Self { emoji_guide_cap: 200 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CheckinSettings {
    pub base_points: u64,
    pub streak_bonus: u64,
}

impl Default for CheckinSettings {
    fn default() -> Self {
        Self {
            base_points: 10,
            streak_bonus: 5,
        }
    }
}

/// Remote durable store. With neither `repo_id` nor `local_dir` set the
/// state lives in memory only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSettings {
    pub repo_id: Option<String>,
    pub filename: String,
    pub endpoint: String,
    pub local_dir: Option<String>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            repo_id: None,
            filename: "bot_data.json".to_string(),
            endpoint: "https://huggingface.co".to_string(),
            local_dir: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Delay the collaborator should leave between short-reply segments.
    pub segment_pacing_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            segment_pacing_ms: 800,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperatorSettings {
    pub owner_id: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}
