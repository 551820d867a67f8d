//! The collaborator boundary: every operation the command layer calls.
//!
//! Mutating operations write through to the remote store with a
//! fire-and-forget [`SyncAdapter::persist`].

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use milky_core::{BotMode, ConversationKey, ConversationTurn, EmojiDescriptor, FeatureFlags, UserRecord};
use milky_llm::InferenceClient;
use milky_settings::{MemorySettings, MilkySettings, PersonaSettings};
use milky_store::{
    CheckinOutcome, CheckinRules, LastCheckin, PointsAction, StateStore, SyncAdapter, SyncError,
};

use crate::compositor::PromptCompositor;
use crate::emoji::{EmojiDescriber, JobTicket};
use crate::error::EngineError;
use crate::memory::MemoryManager;

const PERSONA_PREVIEW_CHARS: usize = 80;

/// Persona names that mean "base prompt only".
const RESET_PERSONA_NAMES: &[&str] = &["default", "env"];

#[derive(Clone, Debug)]
pub struct CompanionConfig {
    pub owner_id: Option<u64>,
    pub persona: PersonaSettings,
    pub memory: MemorySettings,
    pub emoji_guide_cap: usize,
    pub checkin: CheckinRules,
    pub temperature: f32,
    pub segment_pacing_ms: u64,
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self::from(&MilkySettings::default())
    }
}

impl From<&MilkySettings> for CompanionConfig {
    fn from(s: &MilkySettings) -> Self {
        Self {
            owner_id: s.operator.owner_id,
            persona: s.persona.clone(),
            memory: s.memory.clone(),
            emoji_guide_cap: s.compositor.emoji_guide_cap,
            checkin: CheckinRules::from(&s.checkin),
            temperature: s.inference.temperature,
            segment_pacing_ms: s.server.segment_pacing_ms,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PersonaSummary {
    pub name: String,
    pub preview: String,
    pub active: bool,
}

/// Partial flag update. `word_count_request: Some(None)` clears it.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct FlagsPatch {
    pub bot_mode: Option<BotMode>,
    pub short_reply_mode: Option<bool>,
    pub heat_mode: Option<bool>,
    #[serde(deserialize_with = "double_option")]
    pub word_count_request: Option<Option<String>>,
}

fn double_option<'de, D>(de: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(de).map(Some)
}

pub struct Companion {
    pub(crate) config: CompanionConfig,
    pub(crate) store: Arc<StateStore>,
    pub(crate) sync: Arc<SyncAdapter>,
    pub(crate) client: Arc<InferenceClient>,
    pub(crate) compositor: PromptCompositor,
    pub(crate) memory: MemoryManager,
    pub(crate) emoji: EmojiDescriber,
}

impl Companion {
    pub fn new(
        config: CompanionConfig,
        client: Arc<InferenceClient>,
        sync: Arc<SyncAdapter>,
    ) -> Result<Self, EngineError> {
        let store = sync.store().clone();
        let compositor = PromptCompositor::new(
            store.clone(),
            config.persona.clone(),
            config.emoji_guide_cap,
            config.memory.digest_size,
        );
        let memory = MemoryManager::new(store.clone(), client.clone(), config.memory.clone());
        let emoji = EmojiDescriber::new(client.clone(), store.clone(), sync.clone())?;
        Ok(Self {
            config,
            store,
            sync,
            client,
            compositor,
            memory,
            emoji,
        })
    }

    /// Replace the emoji job runner (tests shorten its pause).
    pub fn with_emoji_describer(mut self, emoji: EmojiDescriber) -> Self {
        self.emoji = emoji;
        self
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn client(&self) -> &Arc<InferenceClient> {
        &self.client
    }

    pub fn sync(&self) -> &Arc<SyncAdapter> {
        &self.sync
    }

    pub fn config(&self) -> &CompanionConfig {
        &self.config
    }

    pub fn compose_instruction(&self) -> String {
        self.compositor.compose_instruction()
    }

    fn persist(&self) {
        self.sync.persist();
    }

    /// Await a full save.
    pub async fn save(&self) -> Result<(), SyncError> {
        self.sync.save().await
    }

    // ── Conversation ───────────────────────────────────────────────────

    pub fn get_history(&self, key: &ConversationKey) -> Vec<ConversationTurn> {
        self.memory.get_history(key)
    }

    pub async fn append_turn(
        &self,
        key: &ConversationKey,
        user_turn: ConversationTurn,
        assistant_turn: ConversationTurn,
    ) -> usize {
        let len = self.memory.append_turn(key, user_turn, assistant_turn).await;
        self.persist();
        len
    }

    pub async fn clear_history(&self, key: &ConversationKey) -> bool {
        let cleared = self.memory.clear_history(key).await;
        if cleared {
            self.persist();
        }
        cleared
    }

    // ── Access control ─────────────────────────────────────────────────

    pub fn is_owner(&self, user_id: u64) -> bool {
        self.config.owner_id == Some(user_id)
    }

    pub fn can_chat(&self, user_id: u64) -> bool {
        self.is_owner(user_id) || self.store.is_authorized(user_id)
    }

    pub fn authorize_user(&self, user_id: u64) -> bool {
        let added = self.store.authorize_user(user_id);
        if added {
            self.persist();
        }
        added
    }

    pub fn revoke_user(&self, user_id: u64) -> bool {
        let removed = self.store.revoke_user(user_id);
        if removed {
            self.persist();
        }
        removed
    }

    pub fn authorized_users(&self) -> Vec<u64> {
        self.store.authorized_users()
    }

    // ── Flags ──────────────────────────────────────────────────────────

    pub fn flags(&self) -> FeatureFlags {
        self.store.flags()
    }

    pub fn set_bot_mode(&self, mode: BotMode) -> FeatureFlags {
        self.apply_flags(FlagsPatch {
            bot_mode: Some(mode),
            ..FlagsPatch::default()
        })
    }

    pub fn set_short_reply_mode(&self, on: bool) -> FeatureFlags {
        self.apply_flags(FlagsPatch {
            short_reply_mode: Some(on),
            ..FlagsPatch::default()
        })
    }

    pub fn set_heat_mode(&self, on: bool) -> FeatureFlags {
        self.apply_flags(FlagsPatch {
            heat_mode: Some(on),
            ..FlagsPatch::default()
        })
    }

    pub fn set_word_count_request(&self, request: Option<String>) -> FeatureFlags {
        self.apply_flags(FlagsPatch {
            word_count_request: Some(request),
            ..FlagsPatch::default()
        })
    }

    pub fn apply_flags(&self, patch: FlagsPatch) -> FeatureFlags {
        let flags = self.store.update_flags(|f| {
            if let Some(mode) = patch.bot_mode {
                f.bot_mode = mode;
            }
            if let Some(on) = patch.short_reply_mode {
                f.short_reply_mode = on;
            }
            if let Some(on) = patch.heat_mode {
                f.heat_mode = on;
            }
            if let Some(request) = patch.word_count_request {
                f.word_count_request = request.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
            }
        });
        self.persist();
        flags
    }

    // ── Personas ───────────────────────────────────────────────────────

    pub fn personas(&self) -> Vec<PersonaSummary> {
        let active = self.store.flags().active_persona;
        self.store
            .personas()
            .into_iter()
            .map(|(name, body)| PersonaSummary {
                active: active.as_deref() == Some(name.as_str()),
                preview: preview(&body),
                name,
            })
            .collect()
    }

    /// Returns true when the persona is new.
    pub fn upsert_persona(&self, name: &str, body: &str) -> Result<bool, EngineError> {
        let name = name.trim();
        if name.is_empty() || body.trim().is_empty() {
            return Err(EngineError::InvalidInput("persona name and body are required".into()));
        }
        if RESET_PERSONA_NAMES.iter().any(|r| r.eq_ignore_ascii_case(name)) {
            return Err(EngineError::InvalidInput(format!("'{name}' is a reserved persona name")));
        }
        let created = self.store.upsert_persona(name, body.trim());
        self.persist();
        Ok(created)
    }

    pub fn delete_persona(&self, name: &str) -> Result<(), EngineError> {
        if !self.store.delete_persona(name.trim()) {
            return Err(EngineError::UnknownPersona(name.to_string()));
        }
        self.persist();
        Ok(())
    }

    /// Activate `name`; `default` or `env` clears the active persona.
    /// Returns the persona now active.
    pub fn activate_persona(&self, name: &str) -> Result<Option<String>, EngineError> {
        let name = name.trim();
        let target = if RESET_PERSONA_NAMES.iter().any(|r| r.eq_ignore_ascii_case(name)) {
            None
        } else if self.store.persona(name).is_some() {
            Some(name.to_string())
        } else {
            return Err(EngineError::UnknownPersona(name.to_string()));
        };
        let flags = self.store.update_flags(|f| f.active_persona = target);
        self.persist();
        Ok(flags.active_persona)
    }

    // ── Users ──────────────────────────────────────────────────────────

    pub fn checkin(&self, user_id: u64) -> CheckinOutcome {
        self.checkin_on(user_id, Utc::now().date_naive())
    }

    pub fn checkin_on(&self, user_id: u64, today: NaiveDate) -> CheckinOutcome {
        let outcome = self.store.checkin(user_id, today, &self.config.checkin);
        if matches!(outcome, CheckinOutcome::CheckedIn { .. }) {
            self.persist();
        }
        outcome
    }

    pub fn user(&self, user_id: u64) -> Option<UserRecord> {
        self.store.user(user_id)
    }

    pub fn adjust_points(&self, user_id: u64, action: PointsAction, amount: u64) -> (u64, u64) {
        let change = self.store.adjust_points(user_id, action, amount);
        self.persist();
        change
    }

    pub fn edit_checkin(
        &self,
        user_id: u64,
        points: Option<u64>,
        consecutive_days: Option<u32>,
        last_checkin: LastCheckin,
    ) -> UserRecord {
        let record = self.store.edit_checkin(user_id, points, consecutive_days, last_checkin);
        self.persist();
        record
    }

    pub fn reset_user(&self, user_id: u64) -> UserRecord {
        let record = self.store.reset_user(user_id);
        self.persist();
        record
    }

    pub fn leaderboard(&self, limit: usize) -> Vec<(u64, u64)> {
        self.store.leaderboard(limit)
    }

    // ── Filtered words ─────────────────────────────────────────────────

    /// Add a comma-separated list. Returns the words not already present.
    pub fn add_filtered_words(&self, raw: &str) -> Vec<String> {
        let words: Vec<String> = raw.split(',').map(str::to_string).collect();
        let added = self.store.add_filtered_words(&words);
        if !added.is_empty() {
            self.persist();
        }
        added
    }

    pub fn remove_filtered_word(&self, word: &str) -> bool {
        let removed = self.store.remove_filtered_word(word);
        if removed {
            self.persist();
        }
        removed
    }

    pub fn clear_filtered_words(&self) -> usize {
        let n = self.store.clear_filtered_words();
        if n > 0 {
            self.persist();
        }
        n
    }

    pub fn filtered_words(&self) -> Vec<String> {
        self.store.filtered_words()
    }

    // ── Emoji ──────────────────────────────────────────────────────────

    pub fn refresh_emojis(&self, emojis: Vec<EmojiDescriptor>) -> usize {
        let n = self.store.refresh_emojis(emojis);
        self.persist();
        n
    }

    pub fn describe_emoji(&self, id: u64, description: &str) -> Result<(), EngineError> {
        if description.trim().is_empty() {
            return Err(EngineError::InvalidInput("description is empty".into()));
        }
        self.store
            .set_emoji_description(id, description)
            .map_err(|_| EngineError::UnknownEmoji(id))?;
        self.persist();
        Ok(())
    }

    pub fn emojis(&self) -> Vec<EmojiDescriptor> {
        self.store.emojis()
    }

    pub fn describe_guild_emojis(&self, guild_id: u64) -> JobTicket {
        self.emoji.start(guild_id)
    }
}

fn preview(body: &str) -> String {
    let flat = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PERSONA_PREVIEW_CHARS {
        return flat;
    }
    let mut cut: String = flat.chars().take(PERSONA_PREVIEW_CHARS).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use milky_core::{ApiKey, RecordingNotifier};
    use milky_llm::mock::MockBackend;
    use milky_llm::InferenceConfig;
    use milky_store::MemoryRemote;
    use std::time::Duration;

    pub(crate) struct Fixture {
        pub companion: Companion,
        pub backend: Arc<MockBackend>,
        pub remote: Arc<MemoryRemote>,
        pub notifier: Arc<RecordingNotifier>,
    }

    pub(crate) fn fixture_with(backend: MockBackend, config: CompanionConfig) -> Fixture {
        let backend = Arc::new(backend);
        let remote = Arc::new(MemoryRemote::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let client = Arc::new(InferenceClient::new(
            backend.clone(),
            vec![ApiKey::new("k1"), ApiKey::new("k2")],
            InferenceConfig {
                max_attempts: 3,
                failure_threshold: 5,
                backoff_min: Duration::ZERO,
                backoff_max: Duration::ZERO,
                circuit_cooldown: None,
                max_tokens: 2048,
            },
            notifier.clone(),
        ));
        let store = Arc::new(StateStore::new());
        let sync = Arc::new(SyncAdapter::new(store, Some(remote.clone()), notifier.clone()));
        Fixture {
            companion: Companion::new(config, client, sync).unwrap(),
            backend,
            remote,
            notifier,
        }
    }

    pub(crate) fn fixture(backend: MockBackend) -> Fixture {
        fixture_with(
            backend,
            CompanionConfig {
                owner_id: Some(1),
                ..CompanionConfig::default()
            },
        )
    }

    /// Wait for fire-and-forget saves to land.
    pub(crate) async fn settle(remote: &MemoryRemote, commits: usize) {
        for _ in 0..100 {
            if remote.commits().len() >= commits {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn access_control() {
        let fx = fixture(MockBackend::new(vec![]));
        let c = &fx.companion;
        assert!(c.can_chat(1));
        assert!(!c.can_chat(2));
        assert!(c.authorize_user(2));
        assert!(!c.authorize_user(2));
        assert!(c.can_chat(2));
        assert_eq!(c.authorized_users(), vec![2]);
        assert!(c.revoke_user(2));
        assert!(!c.can_chat(2));
        settle(&fx.remote, 2).await;
        assert!(fx.remote.commits().len() >= 2);
    }

    #[tokio::test]
    async fn persona_lifecycle() {
        let fx = fixture(MockBackend::new(vec![]));
        let c = &fx.companion;
        assert!(c.upsert_persona("cat", "meow meow").unwrap());
        assert!(!c.upsert_persona("cat", "purr").unwrap());
        assert!(matches!(c.upsert_persona(" ", "x"), Err(EngineError::InvalidInput(_))));
        assert!(matches!(c.upsert_persona("default", "x"), Err(EngineError::InvalidInput(_))));

        assert_eq!(c.activate_persona("cat").unwrap().as_deref(), Some("cat"));
        assert!(c.compose_instruction().contains("purr"));
        assert!(c.personas()[0].active);

        assert!(matches!(c.activate_persona("dog"), Err(EngineError::UnknownPersona(_))));
        assert_eq!(c.activate_persona("DEFAULT").unwrap(), None);
        assert!(!c.compose_instruction().contains("purr"));

        c.activate_persona("cat").unwrap();
        c.delete_persona("cat").unwrap();
        assert!(c.flags().active_persona.is_none());
        assert!(matches!(c.delete_persona("cat"), Err(EngineError::UnknownPersona(_))));
    }

    #[tokio::test]
    async fn persona_preview_is_short() {
        let fx = fixture(MockBackend::new(vec![]));
        fx.companion.upsert_persona("long", &"word ".repeat(100)).unwrap();
        let summary = &fx.companion.personas()[0];
        assert_eq!(summary.preview.chars().count(), PERSONA_PREVIEW_CHARS + 1);
    }

    #[tokio::test]
    async fn flags_patch() {
        let fx = fixture(MockBackend::new(vec![]));
        let c = &fx.companion;
        c.set_bot_mode(BotMode::Dev);
        c.set_word_count_request(Some(" about 50 words ".into()));
        let flags = c.apply_flags(FlagsPatch {
            heat_mode: Some(true),
            ..FlagsPatch::default()
        });
        assert_eq!(flags.bot_mode, BotMode::Dev);
        assert!(flags.heat_mode);
        assert_eq!(flags.word_count_request.as_deref(), Some("about 50 words"));
        assert!(c.set_word_count_request(None).word_count_request.is_none());
    }

    #[test]
    fn flags_patch_json_distinguishes_clear_from_absent() {
        let absent: FlagsPatch = serde_json::from_str(r#"{"heat_mode": true}"#).unwrap();
        assert!(absent.word_count_request.is_none());
        let cleared: FlagsPatch = serde_json::from_str(r#"{"word_count_request": null}"#).unwrap();
        assert_eq!(cleared.word_count_request, Some(None));
        let mode: FlagsPatch = serde_json::from_str(r#"{"bot_mode": "dev"}"#).unwrap();
        assert_eq!(mode.bot_mode, Some(BotMode::Dev));
    }

    #[tokio::test]
    async fn checkin_writes_through_once() {
        let fx = fixture(MockBackend::new(vec![]));
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert!(matches!(fx.companion.checkin_on(7, day), CheckinOutcome::CheckedIn { earned: 10, .. }));
        settle(&fx.remote, 1).await;
        assert!(matches!(fx.companion.checkin_on(7, day), CheckinOutcome::AlreadyCheckedIn { .. }));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fx.remote.commits().len(), 1);
    }

    #[tokio::test]
    async fn filtered_words_round_trip() {
        let fx = fixture(MockBackend::new(vec![]));
        let c = &fx.companion;
        assert_eq!(c.add_filtered_words("Foo, bar,, foo"), vec!["foo", "bar"]);
        assert_eq!(c.filtered_words(), vec!["bar", "foo"]);
        assert!(c.remove_filtered_word("FOO"));
        assert_eq!(c.clear_filtered_words(), 1);
    }

    #[tokio::test]
    async fn describe_unknown_emoji_fails() {
        let fx = fixture(MockBackend::new(vec![]));
        assert!(matches!(fx.companion.describe_emoji(5, "x"), Err(EngineError::UnknownEmoji(5))));
    }
}
