use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Who authored a conversation entry.
///
/// `System` is reserved for synthetic summary entries produced by memory
/// compaction; backends fold it into the system instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One immutable entry of a conversation history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn summary(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn is_summary(&self) -> bool {
        self.role == Role::System
    }
}

/// Channel part of a conversation key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelRef {
    Channel(u64),
    Dm,
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Channel(id) => write!(f, "{id}"),
            Self::Dm => f.write_str("dm"),
        }
    }
}

/// Identity of one conversation: `(scope, channel_id | "dm", user_id)`.
///
/// Rendered as `scope/channel/user` when used as a persisted map key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConversationKey {
    pub scope: String,
    pub channel: ChannelRef,
    pub user_id: u64,
}

impl ConversationKey {
    /// Key for a mention inside a guild channel.
    pub fn guild(guild_id: u64, channel_id: u64, user_id: u64) -> Self {
        Self {
            scope: guild_id.to_string(),
            channel: ChannelRef::Channel(channel_id),
            user_id,
        }
    }

    /// Key for a direct-message conversation.
    pub fn dm(user_id: u64) -> Self {
        Self {
            scope: "dm".into(),
            channel: ChannelRef::Dm,
            user_id,
        }
    }

    pub fn is_dm(&self) -> bool {
        self.channel == ChannelRef::Dm
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.scope, self.channel, self.user_id)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid conversation key: {0}")]
pub struct ParseKeyError(pub String);

impl FromStr for ConversationKey {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '/');
        let (Some(scope), Some(channel), Some(user)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(ParseKeyError(s.to_string()));
        };
        if scope.is_empty() {
            return Err(ParseKeyError(s.to_string()));
        }
        let channel = match channel {
            "dm" => ChannelRef::Dm,
            other => ChannelRef::Channel(other.parse().map_err(|_| ParseKeyError(s.to_string()))?),
        };
        let user_id = user.parse().map_err(|_| ParseKeyError(s.to_string()))?;
        Ok(Self {
            scope: scope.to_string(),
            channel,
            user_id,
        })
    }
}

impl TryFrom<String> for ConversationKey {
    type Error = ParseKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ConversationKey> for String {
    fn from(key: ConversationKey) -> Self {
        key.to_string()
    }
}
