use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use milky_core::OperatorNotifier;
use milky_settings::SyncSettings;
use secrecy::SecretString;

use crate::error::SyncError;
use crate::remote::{HfHubStore, LocalDirStore, RemoteStore};
use crate::state::{PersistedState, StateStore};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadOutcome {
    /// Remote document replaced the in-memory state.
    Adopted,
    /// Remote document equals the in-memory state.
    Unchanged,
    /// No document yet; defaults kept.
    Absent,
    /// Document could not be parsed; defaults kept.
    Malformed,
    /// Remote unreachable; defaults kept.
    Unavailable,
    NotConfigured,
}

#[derive(Clone, Debug, Serialize)]
pub struct SyncStats {
    pub remote: Option<String>,
    pub saves: u64,
    pub save_failures: u64,
}

/// Write-through bridge between the [`StateStore`] and a [`RemoteStore`].
///
/// Uploads are serialized through an async mutex so two saves never
/// interleave. Failures are logged and escalated, never propagated into the
/// caller's turn.
pub struct SyncAdapter {
    store: Arc<StateStore>,
    remote: Option<Arc<dyn RemoteStore>>,
    notifier: Arc<dyn OperatorNotifier>,
    save_lock: tokio::sync::Mutex<()>,
    saves: AtomicU64,
    save_failures: AtomicU64,
}

impl SyncAdapter {
    pub fn new(
        store: Arc<StateStore>,
        remote: Option<Arc<dyn RemoteStore>>,
        notifier: Arc<dyn OperatorNotifier>,
    ) -> Self {
        Self {
            store,
            remote,
            notifier,
            save_lock: tokio::sync::Mutex::new(()),
            saves: AtomicU64::new(0),
            save_failures: AtomicU64::new(0),
        }
    }

    /// Pick the remote from settings: a local directory wins over the hub,
    /// and the hub needs both a repo id and a token.
    pub fn from_settings(
        store: Arc<StateStore>,
        settings: &SyncSettings,
        hf_token: Option<SecretString>,
        notifier: Arc<dyn OperatorNotifier>,
    ) -> Result<Self, SyncError> {
        let remote: Option<Arc<dyn RemoteStore>> = match (&settings.local_dir, &settings.repo_id, hf_token) {
            (Some(dir), _, _) => Some(Arc::new(LocalDirStore::new(dir, &settings.filename))),
            (None, Some(repo), Some(token)) => Some(Arc::new(HfHubStore::new(
                &settings.endpoint,
                repo,
                &settings.filename,
                token,
            )?)),
            (None, Some(repo), None) => {
                warn!(repo = %repo, "HF_TOKEN missing, remote sync disabled");
                None
            }
            (None, None, _) => None,
        };
        Ok(Self::new(store, remote, notifier))
    }

    pub fn is_configured(&self) -> bool {
        self.remote.is_some()
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Populate the store from the remote document. Never fatal.
    pub async fn load(&self) -> LoadOutcome {
        let Some(remote) = &self.remote else {
            warn!("no remote store configured, state is volatile");
            return LoadOutcome::NotConfigured;
        };
        let bytes = match remote.download().await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                warn!(remote = %remote.describe(), "remote document absent, starting empty");
                return LoadOutcome::Absent;
            }
            Err(e) => {
                error!(remote = %remote.describe(), error = %e, "remote load failed, starting empty");
                return LoadOutcome::Unavailable;
            }
        };
        let loaded: PersistedState = match serde_json::from_slice(&bytes) {
            Ok(state) => state,
            Err(e) => {
                error!(remote = %remote.describe(), error = %e, "remote document malformed, starting empty");
                return LoadOutcome::Malformed;
            }
        };
        if self.store.read(|current| *current == loaded) {
            info!(remote = %remote.describe(), "remote document matches memory, skipping adopt");
            return LoadOutcome::Unchanged;
        }
        self.store.replace(loaded);
        info!(
            remote = %remote.describe(),
            users = self.store.read(|s| s.user_data.len()),
            conversations = self.store.read(|s| s.conversation_history.len()),
            "state loaded from remote"
        );
        LoadOutcome::Adopted
    }

    /// Serialize the whole store and upload it.
    ///
    /// The temporary file is removed when this returns, whatever the outcome.
    pub async fn save(&self) -> Result<(), SyncError> {
        let Some(remote) = &self.remote else {
            return Err(SyncError::NotConfigured);
        };
        let _guard = self.save_lock.lock().await;

        let result = self.upload_snapshot(remote.as_ref()).await;
        match &result {
            Ok(()) => {
                self.saves.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.save_failures.fetch_add(1, Ordering::Relaxed);
                error!(remote = %remote.describe(), error = %e, "state save failed");
                self.notifier
                    .notify("Data save failed", &format!("{}: {}", remote.describe(), e))
                    .await;
            }
        }
        result
    }

    async fn upload_snapshot(&self, remote: &dyn RemoteStore) -> Result<(), SyncError> {
        let snapshot = self.store.snapshot();
        let encoded = serde_json::to_vec_pretty(&snapshot)?;

        let mut temp = tempfile::Builder::new()
            .prefix("milky_upload_")
            .suffix(".json")
            .tempfile()?;
        temp.write_all(&encoded)?;
        temp.flush()?;

        let message = commit_message(Utc::now());
        remote.upload(temp.path(), &message).await
        // `temp` is dropped here, deleting the file.
    }

    /// Fire-and-forget save on the runtime. Errors are handled inside `save`.
    pub fn persist(self: &Arc<Self>) {
        if self.remote.is_none() {
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _ = this.save().await;
        });
    }

    pub fn stats(&self) -> SyncStats {
        SyncStats {
            remote: self.remote.as_ref().map(|r| r.describe()),
            saves: self.saves.load(Ordering::Relaxed),
            save_failures: self.save_failures.load(Ordering::Relaxed),
        }
    }
}

pub fn commit_message(now: chrono::DateTime<Utc>) -> String {
    now.format("chore: Bot data auto-update at %Y-%m-%d %H:%M:%S UTC")
        .to_string()
}
