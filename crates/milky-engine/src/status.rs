use std::time::Instant;

use serde::Serialize;
use tracing::info;

use milky_core::{ConversationTurn, FeatureFlags};
use milky_llm::{InferOutcome, InferenceRequest, InferenceStats};
use milky_store::SyncStats;

use crate::companion::Companion;

#[derive(Clone, Debug, Serialize)]
pub struct ServiceStatus {
    pub inference: InferenceStats,
    pub circuit_open: bool,
    pub active_persona: Option<String>,
    pub flags: FeatureFlags,
    pub sync_configured: bool,
    pub sync: SyncStats,
    pub conversations: usize,
    pub authorized_users: usize,
    pub emojis: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct ProbeReport {
    pub ok: bool,
    pub latency_ms: u64,
    pub reply: Option<String>,
}

impl Companion {
    pub fn status(&self) -> ServiceStatus {
        let flags = self.store.flags();
        let (conversations, authorized_users, emojis) = self.store.read(|s| {
            (
                s.conversation_history.len(),
                s.authorized_users.len(),
                s.emojis.len(),
            )
        });
        ServiceStatus {
            inference: self.client.stats(),
            circuit_open: self.client.circuit_open(),
            active_persona: flags.active_persona.clone(),
            flags,
            sync_configured: self.sync.is_configured(),
            sync: self.sync.stats(),
            conversations,
            authorized_users,
            emojis,
        }
    }

    /// Tiny round trip through the full retry path.
    pub async fn probe(&self) -> ProbeReport {
        let request = InferenceRequest::new("Reply with one short word.", vec![ConversationTurn::user("ping")])
            .with_temperature(0.1)
            .with_max_tokens(10);
        let started = Instant::now();
        let outcome = self.client.infer_request(&request, "probe").await;
        let latency_ms = started.elapsed().as_millis() as u64;
        info!(ok = !outcome.is_failed(), latency_ms, "backend probe");
        ProbeReport {
            ok: !outcome.is_failed(),
            latency_ms,
            reply: match outcome {
                InferOutcome::Reply(text) => Some(text),
                InferOutcome::Failed => None,
            },
        }
    }

    pub fn reset_circuit(&self) {
        self.client.reset_circuit();
    }
}
