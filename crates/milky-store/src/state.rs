use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use milky_core::{
    ConversationKey, ConversationTurn, EmojiDescriptor, FeatureFlags, GlobalMemoryEntry,
    UserRecord,
};

use crate::error::StoreError;

/// The whole durable document. Every field defaults so partial or older
/// documents still load.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    pub user_data: BTreeMap<u64, UserRecord>,
    pub conversation_history: BTreeMap<ConversationKey, Vec<ConversationTurn>>,
    #[serde(alias = "private_chat_users")]
    pub authorized_users: BTreeSet<u64>,
    pub personas: BTreeMap<String, String>,
    pub flags: FeatureFlags,
    pub global_memory: Vec<GlobalMemoryEntry>,
    pub emojis: BTreeMap<u64, EmojiDescriptor>,
    pub filtered_words: BTreeSet<String>,
}

/// Process-wide mutable state behind one lock.
///
/// The lock is synchronous and must never be held across an `.await`; all
/// accessors take and release it within the call. Every mutation bumps a
/// volatile revision counter that is not persisted.
#[derive(Debug, Default)]
pub struct StateStore {
    inner: RwLock<PersistedState>,
    revision: AtomicU64,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: PersistedState) -> Self {
        Self {
            inner: RwLock::new(state),
            revision: AtomicU64::new(0),
        }
    }

    /// Run `f` against a shared view.
    pub fn read<R>(&self, f: impl FnOnce(&PersistedState) -> R) -> R {
        f(&self.inner.read())
    }

    /// Run `f` against an exclusive view and bump the revision.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut PersistedState) -> R) -> R {
        let mut guard = self.inner.write();
        let out = f(&mut guard);
        self.revision.fetch_add(1, Ordering::AcqRel);
        out
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> PersistedState {
        self.inner.read().clone()
    }

    /// Swap in a whole document (used by sync load).
    pub fn replace(&self, state: PersistedState) {
        self.mutate(|s| *s = state);
    }

    // ── Conversation history ───────────────────────────────────────────

    /// History for `key`, empty when none exists.
    pub fn history(&self, key: &ConversationKey) -> Vec<ConversationTurn> {
        self.read(|s| s.conversation_history.get(key).cloned().unwrap_or_default())
    }

    pub fn set_history(&self, key: &ConversationKey, turns: Vec<ConversationTurn>) {
        self.mutate(|s| {
            s.conversation_history.insert(key.clone(), turns);
        });
    }

    pub fn clear_history(&self, key: &ConversationKey) -> bool {
        self.mutate(|s| s.conversation_history.remove(key).is_some())
    }

    pub fn conversation_keys(&self) -> Vec<ConversationKey> {
        self.read(|s| s.conversation_history.keys().cloned().collect())
    }

    // ── Global interaction log ─────────────────────────────────────────

    /// Append and FIFO-trim to `cap`.
    pub fn push_global(&self, entry: GlobalMemoryEntry, cap: usize) {
        self.mutate(|s| {
            s.global_memory.push(entry);
            if s.global_memory.len() > cap {
                let excess = s.global_memory.len() - cap;
                s.global_memory.drain(..excess);
            }
        });
    }

    /// Most recent `k` entries, oldest first.
    pub fn recent_global(&self, k: usize) -> Vec<GlobalMemoryEntry> {
        self.read(|s| {
            let start = s.global_memory.len().saturating_sub(k);
            s.global_memory[start..].to_vec()
        })
    }

    // ── Access control ─────────────────────────────────────────────────

    pub fn authorize_user(&self, user_id: u64) -> bool {
        self.mutate(|s| s.authorized_users.insert(user_id))
    }

    pub fn revoke_user(&self, user_id: u64) -> bool {
        self.mutate(|s| s.authorized_users.remove(&user_id))
    }

    pub fn is_authorized(&self, user_id: u64) -> bool {
        self.read(|s| s.authorized_users.contains(&user_id))
    }

    pub fn authorized_users(&self) -> Vec<u64> {
        self.read(|s| s.authorized_users.iter().copied().collect())
    }

    // ── Flags and personas ─────────────────────────────────────────────

    pub fn flags(&self) -> FeatureFlags {
        self.read(|s| s.flags.clone())
    }

    pub fn update_flags(&self, f: impl FnOnce(&mut FeatureFlags)) -> FeatureFlags {
        self.mutate(|s| {
            f(&mut s.flags);
            s.flags.clone()
        })
    }

    pub fn persona(&self, name: &str) -> Option<String> {
        self.read(|s| s.personas.get(name).cloned())
    }

    pub fn personas(&self) -> Vec<(String, String)> {
        self.read(|s| {
            s.personas
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
    }

    /// Insert or overwrite. Returns true when the name is new.
    pub fn upsert_persona(&self, name: &str, body: &str) -> bool {
        self.mutate(|s| s.personas.insert(name.to_string(), body.to_string()).is_none())
    }

    /// Delete a persona. Deleting the active one clears `active_persona`.
    pub fn delete_persona(&self, name: &str) -> bool {
        self.mutate(|s| {
            let removed = s.personas.remove(name).is_some();
            if removed && s.flags.active_persona.as_deref() == Some(name) {
                s.flags.active_persona = None;
            }
            removed
        })
    }

    // ── Emoji catalog ──────────────────────────────────────────────────

    /// Replace the catalog wholesale, carrying descriptions over by id.
    /// Returns the new catalog size.
    pub fn refresh_emojis(&self, fresh: Vec<EmojiDescriptor>) -> usize {
        self.mutate(|s| {
            let mut next = BTreeMap::new();
            for mut emoji in fresh {
                if emoji.description.is_none() {
                    emoji.description = s.emojis.get(&emoji.id).and_then(|e| e.description.clone());
                }
                next.insert(emoji.id, emoji);
            }
            s.emojis = next;
            s.emojis.len()
        })
    }

    pub fn set_emoji_description(&self, id: u64, description: &str) -> Result<(), StoreError> {
        self.mutate(|s| match s.emojis.get_mut(&id) {
            Some(emoji) => {
                emoji.description = Some(description.trim().to_string());
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("emoji {id}"))),
        })
    }

    pub fn emojis(&self) -> Vec<EmojiDescriptor> {
        self.read(|s| s.emojis.values().cloned().collect())
    }

    pub fn emoji(&self, id: u64) -> Option<EmojiDescriptor> {
        self.read(|s| s.emojis.get(&id).cloned())
    }

    /// Case-insensitive lookup by name. Lowest id wins on duplicates.
    pub fn emoji_by_name(&self, name: &str) -> Option<EmojiDescriptor> {
        self.read(|s| {
            s.emojis
                .values()
                .find(|e| e.name.eq_ignore_ascii_case(name))
                .cloned()
        })
    }

    pub fn undescribed_emojis(&self, guild_id: u64) -> Vec<EmojiDescriptor> {
        self.read(|s| {
            s.emojis
                .values()
                .filter(|e| e.guild_id == guild_id && e.description.is_none())
                .cloned()
                .collect()
        })
    }

    // ── Filtered words ─────────────────────────────────────────────────

    /// Add words (trimmed, lowercased). Returns the ones not already present.
    pub fn add_filtered_words(&self, words: &[String]) -> Vec<String> {
        self.mutate(|s| {
            words
                .iter()
                .map(|w| w.trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .filter(|w| s.filtered_words.insert(w.clone()))
                .collect()
        })
    }

    pub fn remove_filtered_word(&self, word: &str) -> bool {
        self.mutate(|s| s.filtered_words.remove(&word.trim().to_lowercase()))
    }

    pub fn clear_filtered_words(&self) -> usize {
        self.mutate(|s| {
            let n = s.filtered_words.len();
            s.filtered_words.clear();
            n
        })
    }

    pub fn filtered_words(&self) -> Vec<String> {
        self.read(|s| s.filtered_words.iter().cloned().collect())
    }

    // ── Users ──────────────────────────────────────────────────────────

    pub fn user(&self, user_id: u64) -> Option<UserRecord> {
        self.read(|s| s.user_data.get(&user_id).cloned())
    }

    /// Users sorted by points descending, then id ascending.
    pub fn leaderboard(&self, limit: usize) -> Vec<(u64, u64)> {
        let mut rows: Vec<(u64, u64)> =
            self.read(|s| s.user_data.iter().map(|(id, r)| (*id, r.points)).collect());
        rows.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        rows.truncate(limit);
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn emoji(id: u64, name: &str, guild: u64, description: Option<&str>) -> EmojiDescriptor {
        EmojiDescriptor {
            id,
            name: name.into(),
            url: format!("https://cdn/{id}.png"),
            animated: false,
            guild_id: guild,
            description: description.map(str::to_string),
        }
    }

    fn entry(n: u64) -> GlobalMemoryEntry {
        GlobalMemoryEntry {
            timestamp: Utc::now(),
            user_id: n,
            user_name: format!("user{n}"),
            message: format!("msg {n}"),
            bot_reply: format!("reply {n}"),
        }
    }

    #[test]
    fn missing_history_is_empty() {
        let store = StateStore::new();
        assert!(store.history(&ConversationKey::dm(1)).is_empty());
    }

    #[test]
    fn mutations_bump_revision() {
        let store = StateStore::new();
        let r0 = store.revision();
        store.authorize_user(5);
        assert!(store.revision() > r0);
        let r1 = store.revision();
        let _ = store.flags();
        assert_eq!(store.revision(), r1);
    }

    #[test]
    fn global_log_fifo_trim() {
        let store = StateStore::new();
        for n in 0..60 {
            store.push_global(entry(n), 50);
        }
        let all = store.recent_global(100);
        assert_eq!(all.len(), 50);
        assert_eq!(all[0].user_id, 10);
        let recent = store.recent_global(3);
        assert_eq!(recent.iter().map(|e| e.user_id).collect::<Vec<_>>(), vec![57, 58, 59]);
    }

    #[test]
    fn refresh_preserves_descriptions_by_id() {
        let store = StateStore::new();
        store.refresh_emojis(vec![emoji(1, "wave", 9, None), emoji(2, "cry", 9, None)]);
        store.set_emoji_description(1, "waving hello").unwrap();

        let n = store.refresh_emojis(vec![emoji(1, "wave_v2", 9, None), emoji(3, "new", 9, None)]);
        assert_eq!(n, 2);
        let kept = store.emoji(1).unwrap();
        assert_eq!(kept.name, "wave_v2");
        assert_eq!(kept.description.as_deref(), Some("waving hello"));
        assert!(store.emoji(2).is_none());
        assert_eq!(store.undescribed_emojis(9).len(), 1);
    }

    #[test]
    fn describe_unknown_emoji_fails() {
        let store = StateStore::new();
        assert!(matches!(
            store.set_emoji_description(42, "x"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn emoji_lookup_case_insensitive() {
        let store = StateStore::new();
        store.refresh_emojis(vec![emoji(7, "PartyCat", 1, None)]);
        assert_eq!(store.emoji_by_name("partycat").unwrap().id, 7);
        assert!(store.emoji_by_name("dog").is_none());
    }

    #[test]
    fn deleting_active_persona_clears_flag() {
        let store = StateStore::new();
        assert!(store.upsert_persona("maid", "You are a maid."));
        assert!(!store.upsert_persona("maid", "You are a tidy maid."));
        store.update_flags(|f| f.active_persona = Some("maid".into()));
        assert!(store.delete_persona("maid"));
        assert!(store.flags().active_persona.is_none());
        assert!(!store.delete_persona("maid"));
    }

    #[test]
    fn filtered_words_normalized() {
        let store = StateStore::new();
        let added = store.add_filtered_words(&["Bad".into(), " worse ".into(), "bad".into(), "".into()]);
        assert_eq!(added, vec!["bad", "worse"]);
        assert!(store.remove_filtered_word("BAD"));
        assert_eq!(store.filtered_words(), vec!["worse"]);
        assert_eq!(store.clear_filtered_words(), 1);
    }

    #[test]
    fn leaderboard_order() {
        let store = StateStore::new();
        store.mutate(|s| {
            for (id, points) in [(3, 50), (1, 50), (2, 80), (4, 5)] {
                s.user_data.insert(id, UserRecord { points, ..Default::default() });
            }
        });
        assert_eq!(store.leaderboard(3), vec![(2, 80), (1, 50), (3, 50)]);
    }

    #[test]
    fn document_round_trips_with_legacy_alias() {
        let json = serde_json::json!({
            "user_data": {"42": {"points": 10, "last_checkin_date": "2024-05-01", "consecutive_days": 1}},
            "private_chat_users": [7, 8],
            "conversation_history": {"dm/dm/42": [{"role": "user", "content": "hi"}]},
            "unknown_field": true
        });
        let state: PersistedState = serde_json::from_value(json).unwrap();
        assert_eq!(state.user_data[&42].points, 10);
        assert!(state.authorized_users.contains(&7));
        assert_eq!(state.conversation_history[&ConversationKey::dm(42)].len(), 1);

        let encoded = serde_json::to_string(&state).unwrap();
        let back: PersistedState = serde_json::from_str(&encoded).unwrap();
        assert_eq!(back, state);
    }
}
