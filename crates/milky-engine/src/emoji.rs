//! Background jobs that describe custom emoji with the vision backend.
//!
//! One job per guild. Starting a job for a guild that already has one
//! running cancels the older job.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use milky_core::EmojiDescriptor;
use milky_llm::InferenceClient;
use milky_store::{StateStore, SyncAdapter};

use crate::error::EngineError;

pub const DESCRIBE_PROMPT: &str = "You are an emoji analyst. Describe this emoji image in one \
short phrase of at most 15 words, focused on the emotion, action or object it conveys, for \
example 'jumping happily', 'awkward smile', 'a tasty burger'. The phrase guides a chat model \
in using the emoji. Reply with the phrase only.";

pub const MAX_DESCRIPTION_WORDS: usize = 15;

const DEFAULT_PAUSE: Duration = Duration::from_millis(1500);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub guild_id: u64,
    pub pending: usize,
    pub described: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Returned when a job starts. `handle` resolves to the final report.
pub struct JobTicket {
    pub guild_id: u64,
    pub pending: usize,
    pub handle: JoinHandle<JobReport>,
}

struct RunningJob {
    generation: u64,
    cancel: CancellationToken,
}

pub struct EmojiDescriber {
    http: reqwest::Client,
    client: Arc<InferenceClient>,
    store: Arc<StateStore>,
    sync: Arc<SyncAdapter>,
    jobs: Arc<DashMap<u64, RunningJob>>,
    generation: AtomicU64,
    pause: Duration,
}

impl EmojiDescriber {
    pub fn new(
        client: Arc<InferenceClient>,
        store: Arc<StateStore>,
        sync: Arc<SyncAdapter>,
    ) -> Result<Self, EngineError> {
        let http = reqwest::Client::builder().timeout(DOWNLOAD_TIMEOUT).build()?;
        Ok(Self {
            http,
            client,
            store,
            sync,
            jobs: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
            pause: DEFAULT_PAUSE,
        })
    }

    /// Delay between two emoji of one job.
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn is_running(&self, guild_id: u64) -> bool {
        self.jobs.contains_key(&guild_id)
    }

    /// Start describing every undescribed emoji of `guild_id`, cancelling
    /// any job already running for that guild.
    pub fn start(&self, guild_id: u64) -> JobTicket {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();
        if let Some(previous) = self.jobs.insert(
            guild_id,
            RunningJob {
                generation,
                cancel: cancel.clone(),
            },
        ) {
            info!(guild_id, "superseding running emoji job");
            previous.cancel.cancel();
        }

        let pending = self.store.undescribed_emojis(guild_id).len();
        let worker = Worker {
            http: self.http.clone(),
            client: self.client.clone(),
            store: self.store.clone(),
            sync: self.sync.clone(),
            pause: self.pause,
        };
        let jobs = self.jobs.clone();
        let handle = tokio::spawn(async move {
            let report = worker.run(guild_id, cancel).await;
            jobs.remove_if(&guild_id, |_, job| job.generation == generation);
            report
        });
        JobTicket {
            guild_id,
            pending,
            handle,
        }
    }
}

struct Worker {
    http: reqwest::Client,
    client: Arc<InferenceClient>,
    store: Arc<StateStore>,
    sync: Arc<SyncAdapter>,
    pause: Duration,
}

impl Worker {
    async fn run(&self, guild_id: u64, cancel: CancellationToken) -> JobReport {
        let mut report = JobReport {
            guild_id,
            ..JobReport::default()
        };
        let targets = self.store.undescribed_emojis(guild_id);
        report.pending = targets.len();
        if targets.is_empty() {
            info!(guild_id, "no emoji left to describe");
            return report;
        }
        info!(guild_id, pending = targets.len(), "emoji description job started");

        for (i, emoji) in targets.iter().enumerate() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            // A newer job may already have handled this one.
            if self.store.emoji(emoji.id).is_some_and(|e| e.description.is_some()) {
                continue;
            }

            match self.describe_one(emoji).await {
                Some(description) => match self.store.set_emoji_description(emoji.id, &description) {
                    Ok(()) => {
                        report.described += 1;
                        if self.sync.is_configured() {
                            let _ = self.sync.save().await;
                        }
                    }
                    Err(e) => {
                        warn!(emoji = %emoji.name, error = %e, "emoji vanished before description landed");
                        report.failed += 1;
                    }
                },
                None => report.failed += 1,
            }

            if i + 1 < targets.len() {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        report.cancelled = true;
                        break;
                    }
                    _ = tokio::time::sleep(self.pause) => {}
                }
            }
        }

        info!(
            guild_id,
            described = report.described,
            failed = report.failed,
            cancelled = report.cancelled,
            "emoji description job finished"
        );
        report
    }

    async fn describe_one(&self, emoji: &EmojiDescriptor) -> Option<String> {
        let response = match self.http.get(&emoji.url).send().await {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                warn!(emoji = %emoji.name, status = resp.status().as_u16(), "emoji image download failed");
                return None;
            }
            Err(e) => {
                warn!(emoji = %emoji.name, error = %e, "emoji image download failed");
                return None;
            }
        };
        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| v.starts_with("image/"))
            .map(str::to_string)
            .unwrap_or_else(|| guess_mime(&emoji.url, emoji.animated).to_string());
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(emoji = %emoji.name, error = %e, "emoji image read failed");
                return None;
            }
        };

        let text = self.client.describe_image(&bytes, &mime, DESCRIBE_PROMPT).await;
        match text.map(|t| clamp_words(&t, MAX_DESCRIPTION_WORDS)) {
            Some(t) if !t.is_empty() => Some(t),
            _ => {
                warn!(emoji = %emoji.name, "no description generated");
                None
            }
        }
    }
}

fn guess_mime(url: &str, animated: bool) -> &'static str {
    let path = url.split('?').next().unwrap_or(url).to_ascii_lowercase();
    if path.ends_with(".gif") || animated {
        "image/gif"
    } else if path.ends_with(".webp") {
        "image/webp"
    } else if path.ends_with(".jpg") || path.ends_with(".jpeg") {
        "image/jpeg"
    } else {
        "image/png"
    }
}

/// Trim quotes and keep at most `max` words.
fn clamp_words(text: &str, max: usize) -> String {
    text.trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .split_whitespace()
        .take(max)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use milky_core::{ApiKey, RecordingNotifier};
    use milky_llm::mock::{MockBackend, MockResponse};
    use milky_llm::InferenceConfig;
    use milky_store::MemoryRemote;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn emoji(id: u64, guild_id: u64, server: &MockServer) -> EmojiDescriptor {
        EmojiDescriptor {
            id,
            name: format!("e{id}"),
            url: format!("{}/emojis/{id}.png", server.uri()),
            animated: false,
            guild_id,
            description: None,
        }
    }

    async fn image_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/emojis/404.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(vec![0x89, 0x50, 0x4e, 0x47]),
            )
            .mount(&server)
            .await;
        server
    }

    struct Fixture {
        describer: EmojiDescriber,
        store: Arc<StateStore>,
        remote: Arc<MemoryRemote>,
        backend: Arc<MockBackend>,
    }

    fn fixture(backend: MockBackend, pause: Duration) -> Fixture {
        let backend = Arc::new(backend);
        let store = Arc::new(StateStore::new());
        let remote = Arc::new(MemoryRemote::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let client = Arc::new(InferenceClient::new(
            backend.clone(),
            vec![ApiKey::new("a"), ApiKey::new("b")],
            InferenceConfig::default(),
            notifier.clone(),
        ));
        let sync = Arc::new(SyncAdapter::new(store.clone(), Some(remote.clone()), notifier));
        let describer = EmojiDescriber::new(client, store.clone(), sync)
            .unwrap()
            .with_pause(pause);
        Fixture {
            describer,
            store,
            remote,
            backend,
        }
    }

    #[tokio::test]
    async fn describes_guild_emojis_and_saves_each() {
        let server = image_server().await;
        let fx = fixture(
            MockBackend::new(vec![MockResponse::text("waving paw"), MockResponse::text("\"sleepy cat\"")]),
            Duration::from_millis(1),
        );
        fx.store.refresh_emojis(vec![emoji(1, 10, &server), emoji(2, 10, &server), emoji(3, 99, &server)]);

        let ticket = fx.describer.start(10);
        assert_eq!(ticket.pending, 2);
        let report = ticket.handle.await.unwrap();

        assert_eq!(report.described, 2);
        assert!(!report.cancelled);
        assert_eq!(fx.store.emoji(1).unwrap().description.as_deref(), Some("waving paw"));
        assert_eq!(fx.store.emoji(2).unwrap().description.as_deref(), Some("sleepy cat"));
        assert!(fx.store.emoji(3).unwrap().description.is_none());
        assert_eq!(fx.remote.commits().len(), 2);
        assert!(!fx.describer.is_running(10));
    }

    #[tokio::test]
    async fn download_failure_skips_emoji() {
        let server = image_server().await;
        let fx = fixture(MockBackend::new(vec![MockResponse::text("ok")]), Duration::from_millis(1));
        fx.store.refresh_emojis(vec![emoji(404, 10, &server), emoji(5, 10, &server)]);
        let report = fx.describer.start(10).handle.await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.described, 1);
        assert_eq!(fx.backend.call_count(), 1);
    }

    #[tokio::test]
    async fn vision_failure_tries_each_credential_once() {
        let server = image_server().await;
        let fx = fixture(
            MockBackend::new(vec![MockResponse::server_error(), MockResponse::server_error()]),
            Duration::from_millis(1),
        );
        fx.store.refresh_emojis(vec![emoji(1, 10, &server)]);
        let report = fx.describer.start(10).handle.await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(fx.backend.call_count(), 2);
        assert_eq!(fx.backend.keys_used(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn newer_job_cancels_older() {
        let server = image_server().await;
        let fx = fixture(
            MockBackend::new(vec![]).with_fallback(MockResponse::text("described")),
            Duration::from_secs(60),
        );
        fx.store.refresh_emojis(vec![emoji(1, 10, &server), emoji(2, 10, &server)]);

        let first = fx.describer.start(10);
        // Wait until the first job is pausing after emoji 1.
        for _ in 0..200 {
            if fx.store.emoji(1).unwrap().description.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let second = fx.describer.start(10);
        assert_eq!(second.pending, 1);

        let first = first.handle.await.unwrap();
        assert!(first.cancelled);
        assert_eq!(first.described, 1);

        let second = second.handle.await.unwrap();
        assert_eq!(second.described, 1);
        assert!(fx.store.undescribed_emojis(10).is_empty());
    }

    #[test]
    fn clamps_to_word_limit() {
        let long = (0..30).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        assert_eq!(clamp_words(&long, 15).split(' ').count(), 15);
        assert_eq!(clamp_words("  'a cat'  ", 15), "a cat");
    }

    #[test]
    fn mime_guess() {
        assert_eq!(guess_mime("https://cdn/x.webp?size=64", false), "image/webp");
        assert_eq!(guess_mime("https://cdn/x.png", true), "image/gif");
        assert_eq!(guess_mime("https://cdn/x", false), "image/png");
    }

    #[tokio::test]
    async fn http_client_failures_become_engine_errors() {
        let err = reqwest::Client::new().get("not a url").send().await.unwrap_err();
        assert!(matches!(EngineError::from(err), EngineError::HttpClient(_)));
    }

}
