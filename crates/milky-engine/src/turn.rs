//! One chat turn: access check → history → compose → infer → post-process
//! → append → global log → persist.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use milky_core::{ConversationKey, ConversationTurn, GlobalMemoryEntry};
use milky_llm::InferOutcome;

use crate::companion::Companion;
use crate::error::EngineError;
use crate::postprocess::{expand_shortcodes, mask_filtered_words, segment_reply, strip_mentions};

/// Raw message handed over by the command layer.
#[derive(Clone, Debug, Deserialize)]
pub struct TurnRequest {
    pub user_id: u64,
    #[serde(default)]
    pub user_name: String,
    /// Absent for direct messages.
    #[serde(default)]
    pub guild_id: Option<u64>,
    #[serde(default)]
    pub channel_id: Option<u64>,
    /// Bot's own id, used to strip mentions of it.
    #[serde(default)]
    pub bot_id: Option<u64>,
    pub text: String,
}

impl TurnRequest {
    pub fn key(&self) -> Result<ConversationKey, EngineError> {
        match (self.guild_id, self.channel_id) {
            (None, _) => Ok(ConversationKey::dm(self.user_id)),
            (Some(guild), Some(channel)) => Ok(ConversationKey::guild(guild, channel, self.user_id)),
            (Some(_), None) => Err(EngineError::InvalidInput(
                "guild messages need a channel_id".into(),
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    Unauthorized,
    Empty,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnOutcome {
    Reply {
        text: String,
        segments: Vec<String>,
        pacing_ms: u64,
    },
    /// Inference failed; `text` is the persona apology.
    Fallback { text: String },
    Ignored { reason: IgnoreReason },
}

impl Companion {
    pub async fn handle_turn(&self, request: TurnRequest) -> Result<TurnOutcome, EngineError> {
        let key = request.key()?;

        if !self.can_chat(request.user_id) {
            debug!(user_id = request.user_id, "turn ignored, user not authorized");
            return Ok(TurnOutcome::Ignored {
                reason: IgnoreReason::Unauthorized,
            });
        }

        let text = strip_mentions(&request.text, request.bot_id);
        if text.is_empty() {
            return Ok(TurnOutcome::Ignored {
                reason: IgnoreReason::Empty,
            });
        }

        let held = self.memory.lock(&key).await;

        let flags = self.store.flags();
        let history = self.memory.get_history(&key);

        let mut instruction = self.compositor.compose_instruction();
        instruction.push_str("\n\n");
        instruction.push_str(if self.is_owner(request.user_id) {
            &self.config.persona.owner_note
        } else {
            &self.config.persona.guest_note
        });

        let mut turns = history;
        turns.push(ConversationTurn::user(with_length_request(
            &text,
            flags.word_count_request.as_deref(),
        )));

        let raw = match self.client.infer(&turns, self.config.temperature, &instruction).await {
            InferOutcome::Reply(raw) => raw,
            InferOutcome::Failed => {
                info!(key = %key, "turn fell back to apology");
                return Ok(TurnOutcome::Fallback {
                    text: self.config.persona.fallback_apology.clone(),
                });
            }
        };

        let reply = self.finish_reply(&raw);
        let (segments, pacing_ms) = if flags.short_reply_mode {
            let segments = segment_reply(&reply, &self.config.persona.short_reply_delimiter);
            (segments, self.config.segment_pacing_ms)
        } else {
            (vec![reply.clone()], 0)
        };
        let stored = segments.join("\n");

        // An empty assistant turn would be rejected by the backend on every
        // later call for this key.
        if stored.trim().is_empty() {
            warn!(key = %key, "reply had no content after post-processing");
            return Ok(TurnOutcome::Fallback {
                text: self.config.persona.fallback_apology.clone(),
            });
        }

        self.memory
            .append_locked(
                &held,
                vec![ConversationTurn::user(text.clone()), ConversationTurn::assistant(stored.clone())],
            )
            .await;
        drop(held);
        self.store.push_global(
            GlobalMemoryEntry {
                timestamp: Utc::now(),
                user_id: request.user_id,
                user_name: request.user_name,
                message: text,
                bot_reply: stored.clone(),
            },
            self.config.memory.global_log_cap,
        );
        self.sync.persist();

        Ok(TurnOutcome::Reply {
            text: stored,
            segments,
            pacing_ms,
        })
    }

    /// Mask filtered words, then expand emoji shortcodes.
    fn finish_reply(&self, raw: &str) -> String {
        let masked = mask_filtered_words(raw, &self.store.filtered_words());
        expand_shortcodes(&masked, |name| self.store.emoji_by_name(name))
    }
}

fn with_length_request(text: &str, request: Option<&str>) -> String {
    match request.map(str::trim).filter(|r| !r.is_empty()) {
        Some(r) => format!("{text}\n\n(Reply length requirement: {r}.)"),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::companion::tests::{fixture, settle};
    use milky_core::{EmojiDescriptor, Role};
    use milky_llm::mock::{MockBackend, MockResponse};

    fn dm(user_id: u64, text: &str) -> TurnRequest {
        TurnRequest {
            user_id,
            user_name: format!("user{user_id}"),
            guild_id: None,
            channel_id: None,
            bot_id: Some(42),
            text: text.into(),
        }
    }

    #[tokio::test]
    async fn owner_dm_round_trip() {
        let fx = fixture(MockBackend::new(vec![MockResponse::text("hello master")]));
        let outcome = fx.companion.handle_turn(dm(1, "<@42> hi there")).await.unwrap();
        assert_eq!(
            outcome,
            TurnOutcome::Reply {
                text: "hello master".into(),
                segments: vec!["hello master".into()],
                pacing_ms: 0,
            }
        );

        let history = fx.companion.get_history(&ConversationKey::dm(1));
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "hi there");
        assert_eq!(history[1].role, Role::Assistant);

        let request = &fx.backend.requests()[0];
        assert!(request.system_instruction.ends_with(&fx.companion.config().persona.owner_note));
        assert_eq!(fx.companion.store().recent_global(5).len(), 1);

        settle(&fx.remote, 1).await;
        assert_eq!(fx.remote.commits().len(), 1);
    }

    #[tokio::test]
    async fn unauthorized_and_empty_are_ignored() {
        let fx = fixture(MockBackend::new(vec![]));
        let outcome = fx.companion.handle_turn(dm(2, "hi")).await.unwrap();
        assert_eq!(outcome, TurnOutcome::Ignored { reason: IgnoreReason::Unauthorized });

        let outcome = fx.companion.handle_turn(dm(1, "<@!42>   ")).await.unwrap();
        assert_eq!(outcome, TurnOutcome::Ignored { reason: IgnoreReason::Empty });
        assert_eq!(fx.backend.call_count(), 0);
    }

    #[tokio::test]
    async fn guest_gets_guest_note() {
        let fx = fixture(MockBackend::new(vec![MockResponse::text("hi guest")]));
        fx.companion.authorize_user(3);
        let request = TurnRequest {
            guild_id: Some(100),
            channel_id: Some(200),
            ..dm(3, "hello")
        };
        fx.companion.handle_turn(request).await.unwrap();
        let sent = &fx.backend.requests()[0];
        assert!(sent.system_instruction.ends_with(&fx.companion.config().persona.guest_note));
        assert_eq!(fx.companion.get_history(&ConversationKey::guild(100, 200, 3)).len(), 2);
    }

    #[tokio::test]
    async fn failure_returns_apology_without_touching_history() {
        let fx = fixture(MockBackend::new(vec![]).with_fallback(MockResponse::server_error()));
        let outcome = fx.companion.handle_turn(dm(1, "hi")).await.unwrap();
        assert_eq!(
            outcome,
            TurnOutcome::Fallback {
                text: fx.companion.config().persona.fallback_apology.clone()
            }
        );
        assert!(fx.companion.get_history(&ConversationKey::dm(1)).is_empty());
        assert_eq!(fx.notifier.count(), 1);
    }

    #[tokio::test]
    async fn word_count_goes_to_user_turn_only() {
        let fx = fixture(MockBackend::new(vec![MockResponse::text("ok")]));
        fx.companion.set_word_count_request(Some("about 20 words".into()));
        fx.companion.handle_turn(dm(1, "tell me a story")).await.unwrap();

        let sent = &fx.backend.requests()[0];
        let last = sent.turns.last().unwrap();
        assert!(last.content.contains("about 20 words"));
        assert!(!sent.system_instruction.contains("about 20 words"));
        assert_eq!(fx.companion.get_history(&ConversationKey::dm(1))[0].content, "tell me a story");
    }

    #[tokio::test]
    async fn short_reply_mode_segments() {
        let fx = fixture(MockBackend::new(vec![MockResponse::text("hi[SPLIT] how are you [SPLIT]")]));
        fx.companion.set_short_reply_mode(true);
        match fx.companion.handle_turn(dm(1, "yo")).await.unwrap() {
            TurnOutcome::Reply { segments, pacing_ms, text } => {
                assert_eq!(segments, vec!["hi", "how are you"]);
                assert_eq!(pacing_ms, 800);
                assert_eq!(text, "hi\nhow are you");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn delimiter_only_reply_falls_back_without_storing() {
        let fx = fixture(MockBackend::new(vec![MockResponse::text("[SPLIT] [SPLIT]")]));
        fx.companion.set_short_reply_mode(true);
        let outcome = fx.companion.handle_turn(dm(1, "yo")).await.unwrap();
        assert_eq!(
            outcome,
            TurnOutcome::Fallback {
                text: fx.companion.config().persona.fallback_apology.clone()
            }
        );
        assert!(fx.companion.get_history(&ConversationKey::dm(1)).is_empty());
        assert!(fx.companion.store().recent_global(5).is_empty());
    }

    #[tokio::test]
    async fn reply_is_masked_and_emoji_expanded() {
        let fx = fixture(MockBackend::new(vec![MockResponse::text("Darn it :Wave:")]));
        fx.companion.add_filtered_words("darn");
        fx.companion.refresh_emojis(vec![EmojiDescriptor {
            id: 9,
            name: "wave".into(),
            url: String::new(),
            animated: false,
            guild_id: 1,
            description: None,
        }]);
        match fx.companion.handle_turn(dm(1, "yo")).await.unwrap() {
            TurnOutcome::Reply { text, .. } => assert_eq!(text, "**** it <:wave:9>"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn guild_without_channel_is_invalid() {
        let fx = fixture(MockBackend::new(vec![]));
        let request = TurnRequest {
            guild_id: Some(1),
            ..dm(1, "hi")
        };
        assert!(matches!(
            fx.companion.handle_turn(request).await,
            Err(EngineError::InvalidInput(_))
        ));
    }
}
