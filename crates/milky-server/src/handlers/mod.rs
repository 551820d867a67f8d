pub mod admin;
pub mod conversation;
pub mod emoji;
pub mod users;

use std::str::FromStr;

use milky_core::ConversationKey;

use crate::error::ApiError;

pub(crate) fn parse_key(raw: &str) -> Result<ConversationKey, ApiError> {
    ConversationKey::from_str(raw.trim_start_matches('/')).map_err(|e| ApiError::BadRequest(e.to_string()))
}
