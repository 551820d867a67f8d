//! Bounded per-key conversation memory with summarizing compaction.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use milky_core::{ConversationKey, ConversationTurn, Role};
use milky_llm::{InferOutcome, InferenceClient, InferenceRequest};
use milky_settings::MemorySettings;
use milky_store::StateStore;

pub const SUMMARY_INSTRUCTION: &str = "You condense chat transcripts. Summarize the \
conversation below in a short third-person paragraph. Keep names, facts, promises and the \
emotional tone. Output only the summary.";

const SUMMARY_MAX_TOKENS: u32 = 512;

type KeyLocks = DashMap<ConversationKey, Arc<Mutex<()>>>;

pub struct MemoryManager {
    store: Arc<StateStore>,
    client: Arc<InferenceClient>,
    settings: MemorySettings,
    locks: KeyLocks,
}

/// Exclusive hold on one key's history. The map entry is pruned on drop
/// when no other task is waiting for the same key.
pub struct KeyLock<'a> {
    locks: &'a KeyLocks,
    key: ConversationKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyLock<'_> {
    pub fn key(&self) -> &ConversationKey {
        &self.key
    }
}

impl Drop for KeyLock<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks.remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

impl MemoryManager {
    pub fn new(store: Arc<StateStore>, client: Arc<InferenceClient>, settings: MemorySettings) -> Self {
        Self {
            store,
            client,
            settings,
            locks: DashMap::new(),
        }
    }

    pub fn settings(&self) -> &MemorySettings {
        &self.settings
    }

    /// Ordered turns for `key`; empty when the key is new.
    pub fn get_history(&self, key: &ConversationKey) -> Vec<ConversationTurn> {
        self.store.history(key)
    }

    /// Wait for exclusive access to `key`. One in-flight turn per key.
    pub async fn lock(&self, key: &ConversationKey) -> KeyLock<'_> {
        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        KeyLock {
            locks: &self.locks,
            key: key.clone(),
            guard: Some(guard),
        }
    }

    pub async fn append_turn(
        &self,
        key: &ConversationKey,
        user_turn: ConversationTurn,
        assistant_turn: ConversationTurn,
    ) -> usize {
        self.append_turns(key, vec![user_turn, assistant_turn]).await
    }

    pub async fn append_turns(&self, key: &ConversationKey, turns: Vec<ConversationTurn>) -> usize {
        let held = self.lock(key).await;
        self.append_locked(&held, turns).await
    }

    /// Append `turns` under an already held key lock and compact once if the
    /// bound is exceeded. Returns the resulting history length.
    ///
    /// Compaction calls the inference client directly and never appends, so
    /// it cannot trigger itself.
    pub async fn append_locked(&self, held: &KeyLock<'_>, turns: Vec<ConversationTurn>) -> usize {
        let key = held.key();
        let mut history = self.store.history(key);
        history.extend(turns);

        if history.len() > self.settings.max_history {
            history = self.compact(key, history).await;
        }

        let len = history.len();
        self.store.set_history(key, history);
        len
    }

    pub async fn clear_history(&self, key: &ConversationKey) -> bool {
        let _held = self.lock(key).await;
        self.store.clear_history(key)
    }

    async fn compact(&self, key: &ConversationKey, history: Vec<ConversationTurn>) -> Vec<ConversationTurn> {
        let split = history.len().saturating_sub(self.settings.retain_tail);
        let (head, tail) = history.split_at(split);

        let request = InferenceRequest::new(SUMMARY_INSTRUCTION, vec![ConversationTurn::user(transcript(head))])
            .with_temperature(self.settings.summary_temperature)
            .with_max_tokens(SUMMARY_MAX_TOKENS);

        match self.client.infer_request(&request, "summary").await {
            InferOutcome::Reply(summary) => {
                info!(key = %key, summarized = head.len(), kept = tail.len(), "history compacted");
                let mut compacted = Vec::with_capacity(tail.len() + 1);
                compacted.push(ConversationTurn::summary(format!(
                    "Summary of the earlier conversation: {summary}"
                )));
                compacted.extend_from_slice(tail);
                compacted
            }
            InferOutcome::Failed => {
                warn!(key = %key, "summary failed, truncating history");
                self.truncate(history)
            }
        }
    }

    fn truncate(&self, mut history: Vec<ConversationTurn>) -> Vec<ConversationTurn> {
        let excess = history.len().saturating_sub(self.settings.max_history);
        history.drain(..excess);
        history
    }
}

fn transcript(turns: &[ConversationTurn]) -> String {
    turns
        .iter()
        .map(|t| {
            let speaker = match t.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
                Role::System => "Earlier summary",
            };
            format!("{speaker}: {}", t.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
