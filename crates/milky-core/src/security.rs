use secrecy::{ExposeSecret, SecretString};

/// Wraps an API key with secrecy protection (zeroized on drop, redacted in Debug).
#[derive(Clone)]
pub struct ApiKey(pub SecretString);

impl ApiKey {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(SecretString::from(raw.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}

/// Split a comma separated credential list, dropping blanks.
pub fn parse_key_list(raw: &str) -> Vec<ApiKey> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ApiKey::new)
        .collect()
}

/// Environment variable names carrying secrets.
pub mod env_vars {
    pub const GEMINI_API_KEYS: &str = "GEMINI_API_KEYS";
    pub const HF_TOKEN: &str = "HF_TOKEN";
    pub const OPERATOR_WEBHOOK_URL: &str = "OPERATOR_WEBHOOK_URL";
}
