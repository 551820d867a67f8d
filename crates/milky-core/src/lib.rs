pub mod conversation;
pub mod errors;
pub mod notify;
pub mod records;
pub mod security;

pub use conversation::{ChannelRef, ConversationKey, ConversationTurn, Role};
pub use errors::GatewayError;
pub use notify::{LogNotifier, OperatorNotifier, RecordingNotifier};
pub use records::{BotMode, EmojiDescriptor, FeatureFlags, GlobalMemoryEntry, UserRecord};
pub use security::{parse_key_list, ApiKey};
