use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Gamified per-user state. Created lazily, reset but never deleted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserRecord {
    pub points: u64,
    pub last_checkin_date: Option<NaiveDate>,
    pub consecutive_days: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotMode {
    #[default]
    Normal,
    Dev,
}

impl std::fmt::Display for BotMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => f.write_str("normal"),
            Self::Dev => f.write_str("dev"),
        }
    }
}

impl std::str::FromStr for BotMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(Self::Normal),
            "dev" => Ok(Self::Dev),
            other => Err(format!("unknown bot mode: {other}")),
        }
    }
}

/// Process-wide switches read by the compositor on every turn.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    pub bot_mode: BotMode,
    pub short_reply_mode: bool,
    pub heat_mode: bool,
    /// Free-text length constraint appended to the user turn, e.g. "about 50 words".
    pub word_count_request: Option<String>,
    /// Name of the active persona. `None` means base prompt only.
    pub active_persona: Option<String>,
}

/// One custom emoji known to the bot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmojiDescriptor {
    pub id: u64,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub animated: bool,
    pub guild_id: u64,
    #[serde(default)]
    pub description: Option<String>,
}

impl EmojiDescriptor {
    /// Literal text the chat platform renders as this emoji.
    pub fn insertion_form(&self) -> String {
        if self.animated {
            format!("<a:{}:{}>", self.name, self.id)
        } else {
            format!("<:{}:{}>", self.name, self.id)
        }
    }
}

/// One entry of the rolling global interaction log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalMemoryEntry {
    pub timestamp: DateTime<Utc>,
    pub user_id: u64,
    pub user_name: String,
    pub message: String,
    pub bot_reply: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_record_defaults_to_zero() {
        let record: UserRecord = serde_json::from_str("{}").unwrap();
        assert_eq!(record, UserRecord::default());
        assert_eq!(record.points, 0);
        assert!(record.last_checkin_date.is_none());
    }

    #[test]
    fn flags_tolerate_missing_fields() {
        let flags: FeatureFlags = serde_json::from_str(r#"{"heat_mode":true}"#).unwrap();
        assert!(flags.heat_mode);
        assert_eq!(flags.bot_mode, BotMode::Normal);
        assert!(flags.active_persona.is_none());
    }

    #[test]
    fn bot_mode_parse() {
        assert_eq!("DEV".parse::<BotMode>().unwrap(), BotMode::Dev);
        assert_eq!(" normal ".parse::<BotMode>().unwrap(), BotMode::Normal);
        assert!("turbo".parse::<BotMode>().is_err());
    }

    #[test]
    fn emoji_insertion_form() {
        let mut emoji = EmojiDescriptor {
            id: 99,
            name: "wave".into(),
            url: "https://cdn/99.png".into(),
            animated: false,
            guild_id: 1,
            description: None,
        };
        assert_eq!(emoji.insertion_form(), "<:wave:99>");
        emoji.animated = true;
        assert_eq!(emoji.insertion_form(), "<a:wave:99>");
    }
}
