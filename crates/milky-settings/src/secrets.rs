//! Credentials read from the environment only, never from the settings file.

use milky_core::security::{env_vars, parse_key_list};
use milky_core::ApiKey;
use secrecy::SecretString;

#[derive(Clone, Debug, Default)]
pub struct Secrets {
    /// Inference credentials in rotation order.
    pub api_keys: Vec<ApiKey>,
    pub hf_token: Option<SecretString>,
    pub webhook_url: Option<SecretString>,
}

impl Secrets {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        Self {
            api_keys: non_empty(env_vars::GEMINI_API_KEYS)
                .map(|raw| parse_key_list(&raw))
                .unwrap_or_default(),
            hf_token: non_empty(env_vars::HF_TOKEN).map(|v| SecretString::from(v.trim().to_string())),
            webhook_url: non_empty(env_vars::OPERATOR_WEBHOOK_URL)
                .map(|v| SecretString::from(v.trim().to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn reads_comma_separated_keys() {
        let secrets = Secrets::from_lookup(|name| match name {
            "GEMINI_API_KEYS" => Some("k1, k2,,k3".into()),
            "HF_TOKEN" => Some("hf_abc".into()),
            _ => None,
        });
        assert_eq!(secrets.api_keys.len(), 3);
        assert_eq!(secrets.api_keys[1].expose(), "k2");
        assert_eq!(secrets.hf_token.unwrap().expose_secret(), "hf_abc");
        assert!(secrets.webhook_url.is_none());
    }

    #[test]
    fn missing_everything_is_empty() {
        let secrets = Secrets::from_lookup(|_| None);
        assert!(secrets.api_keys.is_empty());
        assert!(secrets.hf_token.is_none());
    }

    #[test]
    fn debug_does_not_leak() {
        let secrets = Secrets::from_lookup(|name| match name {
            "GEMINI_API_KEYS" => Some("AIza-secret".into()),
            "OPERATOR_WEBHOOK_URL" => Some("https://hooks/secret-path".into()),
            _ => None,
        });
        let debug = format!("{secrets:?}");
        assert!(!debug.contains("AIza-secret"));
        assert!(!debug.contains("secret-path"));
    }
}
