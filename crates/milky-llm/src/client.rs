use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use milky_core::{ApiKey, ConversationTurn, GatewayError, OperatorNotifier};
use milky_settings::InferenceSettings;

use crate::backend::{InferenceBackend, InferenceRequest};
use crate::breaker::CircuitBreaker;
use crate::rotation::CredentialRing;

/// Text rendered for a failed inference wherever a string is required.
pub const ERROR_SIGNAL: &str = "INTERNAL_AI_ERROR_SIGNAL";

/// Result of an inference call. Never an error: failures collapse into
/// [`InferOutcome::Failed`] so callers can substitute fallback text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InferOutcome {
    Reply(String),
    Failed,
}

impl InferOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }

    pub fn into_reply(self) -> Option<String> {
        match self {
            Self::Reply(text) => Some(text),
            Self::Failed => None,
        }
    }

    /// Reply text, or [`ERROR_SIGNAL`].
    pub fn as_text(&self) -> &str {
        match self {
            Self::Reply(text) => text,
            Self::Failed => ERROR_SIGNAL,
        }
    }
}

/// Retry and breaker configuration for [`InferenceClient`].
#[derive(Clone, Debug)]
pub struct InferenceConfig {
    pub max_attempts: u32,
    pub failure_threshold: u32,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
    pub circuit_cooldown: Option<Duration>,
    pub max_tokens: u32,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self::from(&InferenceSettings::default())
    }
}

impl From<&InferenceSettings> for InferenceConfig {
    fn from(s: &InferenceSettings) -> Self {
        Self {
            max_attempts: s.max_attempts.max(1),
            failure_threshold: s.failure_threshold.max(1),
            backoff_min: Duration::from_millis(s.backoff_min_ms),
            backoff_max: Duration::from_millis(s.backoff_max_ms.max(s.backoff_min_ms)),
            circuit_cooldown: (s.circuit_cooldown_secs > 0)
                .then(|| Duration::from_secs(s.circuit_cooldown_secs)),
            max_tokens: s.max_tokens,
        }
    }
}

/// Snapshot of client health for status reporting.
#[derive(Clone, Debug, Serialize)]
pub struct InferenceStats {
    pub backend: String,
    pub circuit: &'static str,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub credential_count: usize,
    pub credential_selections: Vec<u64>,
    pub attempts: u64,
    pub failures: u64,
    pub successes: u64,
    pub short_circuits: u64,
}

/// Resilient wrapper around an [`InferenceBackend`].
///
/// - one credential per attempt, rotated round-robin after every attempt
/// - up to `max_attempts` attempts per call with uniform jittered backoff between them
/// - a process-wide circuit breaker checked before each attempt
/// - operator notification on exhaustion and when the circuit opens
pub struct InferenceClient {
    backend: Arc<dyn InferenceBackend>,
    ring: CredentialRing,
    breaker: CircuitBreaker,
    notifier: Arc<dyn OperatorNotifier>,
    config: InferenceConfig,
    attempts: AtomicU64,
    failures: AtomicU64,
    successes: AtomicU64,
    short_circuits: AtomicU64,
}

impl InferenceClient {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        keys: Vec<ApiKey>,
        config: InferenceConfig,
        notifier: Arc<dyn OperatorNotifier>,
    ) -> Self {
        if keys.is_empty() {
            warn!(backend = backend.name(), "inference client has no credentials configured");
        }
        Self {
            backend,
            ring: CredentialRing::new(keys),
            breaker: CircuitBreaker::new(config.failure_threshold, config.circuit_cooldown),
            notifier,
            config,
            attempts: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            short_circuits: AtomicU64::new(0),
        }
    }

    /// Produce a completion for `turns` under `system_instruction`.
    pub async fn infer(
        &self,
        turns: &[ConversationTurn],
        temperature: f32,
        system_instruction: &str,
    ) -> InferOutcome {
        let request = InferenceRequest {
            system_instruction: system_instruction.to_string(),
            turns: turns.to_vec(),
            temperature,
            max_tokens: self.config.max_tokens,
        };
        self.infer_request(&request, "chat").await
    }

    /// Full-control variant. `label` names the caller in logs and alerts.
    pub async fn infer_request(&self, request: &InferenceRequest, label: &str) -> InferOutcome {
        if self.ring.is_empty() {
            error!(label, error_kind = "missing_credentials", "inference skipped");
            return InferOutcome::Failed;
        }

        let mut last_error: Option<GatewayError> = None;

        for attempt in 1..=self.config.max_attempts {
            if !self.breaker.allow() {
                self.short_circuits.fetch_add(1, Ordering::Relaxed);
                warn!(
                    label,
                    attempt,
                    consecutive_failures = self.breaker.consecutive_failures(),
                    "circuit open, short-circuiting inference"
                );
                return InferOutcome::Failed;
            }

            let Some((slot, key)) = self.ring.next() else {
                return InferOutcome::Failed;
            };
            self.attempts.fetch_add(1, Ordering::Relaxed);

            match self.backend.generate(key, request).await {
                Ok(text) if !text.trim().is_empty() => {
                    self.breaker.record_success();
                    self.successes.fetch_add(1, Ordering::Relaxed);
                    debug!(label, attempt, credential = slot, "inference succeeded");
                    return InferOutcome::Reply(text.trim().to_string());
                }
                Ok(_) => {
                    self.on_attempt_failure(label, attempt, slot, &GatewayError::EmptyCompletion)
                        .await;
                    last_error = Some(GatewayError::EmptyCompletion);
                }
                Err(e) => {
                    self.on_attempt_failure(label, attempt, slot, &e).await;
                    last_error = Some(e);
                }
            }

            if attempt < self.config.max_attempts {
                tokio::time::sleep(self.backoff()).await;
            }
        }

        let detail = last_error
            .map(|e| format!("{} ({})", e, e.error_kind()))
            .unwrap_or_else(|| "no attempt completed".to_string());
        error!(
            label,
            attempts = self.config.max_attempts,
            detail = %detail,
            "inference exhausted all attempts"
        );
        self.notifier
            .notify(
                &format!("AI failure ({label}): retries exhausted"),
                &detail,
            )
            .await;
        InferOutcome::Failed
    }

    async fn on_attempt_failure(&self, label: &str, attempt: u32, slot: usize, e: &GatewayError) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        let class = if e.is_content() { "content" } else { "transport" };
        warn!(
            label,
            attempt,
            credential = slot,
            error_kind = e.error_kind(),
            class,
            error = %e,
            "inference attempt failed"
        );
        if self.breaker.record_failure() {
            self.notifier
                .notify(
                    "AI circuit breaker opened",
                    &format!(
                        "{} consecutive failures; last: {}",
                        self.breaker.consecutive_failures(),
                        e
                    ),
                )
                .await;
        }
    }

    fn backoff(&self) -> Duration {
        let min = self.config.backoff_min.as_millis() as u64;
        let max = self.config.backoff_max.as_millis() as u64;
        if max <= min {
            return Duration::from_millis(min);
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    /// Embed `text`. One pass over all credentials, no breaker.
    pub async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        for _ in 0..self.ring.len() {
            let (slot, key) = self.ring.next()?;
            match self.backend.embed(key, text).await {
                Ok(values) if !values.is_empty() => return Some(values),
                Ok(_) => warn!(credential = slot, "embedding came back empty"),
                Err(e) => warn!(credential = slot, error_kind = e.error_kind(), error = %e, "embedding attempt failed"),
            }
        }
        None
    }

    /// Ask the backend to describe an image. Same strategy as [`Self::embed`].
    pub async fn describe_image(&self, image: &[u8], mime_type: &str, prompt: &str) -> Option<String> {
        for _ in 0..self.ring.len() {
            let (slot, key) = self.ring.next()?;
            match self.backend.describe_image(key, image, mime_type, prompt).await {
                Ok(text) if !text.trim().is_empty() => return Some(text.trim().to_string()),
                Ok(_) => warn!(credential = slot, "image description came back empty"),
                Err(e) => warn!(credential = slot, error_kind = e.error_kind(), error = %e, "image description attempt failed"),
            }
        }
        None
    }

    /// Close the breaker by operator request.
    pub fn reset_circuit(&self) {
        self.breaker.reset();
        info!("inference circuit reset");
    }

    pub fn circuit_open(&self) -> bool {
        self.breaker.state_name() == "open"
    }

    pub fn credential_count(&self) -> usize {
        self.ring.len()
    }

    pub fn stats(&self) -> InferenceStats {
        InferenceStats {
            backend: self.backend.name().to_string(),
            circuit: self.breaker.state_name(),
            consecutive_failures: self.breaker.consecutive_failures(),
            failure_threshold: self.breaker.threshold(),
            credential_count: self.ring.len(),
            credential_selections: self.ring.selections(),
            attempts: self.attempts.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            short_circuits: self.short_circuits.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBackend, MockResponse};
    use milky_core::RecordingNotifier;

    fn keys(n: usize) -> Vec<ApiKey> {
        (0..n).map(|i| ApiKey::new(format!("key-{i}"))).collect()
    }

    fn fast_config(max_attempts: u32, threshold: u32) -> InferenceConfig {
        InferenceConfig {
            max_attempts,
            failure_threshold: threshold,
            backoff_min: Duration::from_millis(1500),
            backoff_max: Duration::from_millis(3000),
            circuit_cooldown: None,
            max_tokens: 2048,
        }
    }

    fn client(
        mock: Arc<MockBackend>,
        n_keys: usize,
        config: InferenceConfig,
    ) -> (InferenceClient, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::new());
        let client = InferenceClient::new(mock, keys(n_keys), config, notifier.clone());
        (client, notifier)
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_first_try() {
        let mock = Arc::new(MockBackend::new(vec![MockResponse::text("hello")]));
        let (client, notifier) = client(mock.clone(), 2, fast_config(5, 5));
        let outcome = client.infer(&[ConversationTurn::user("hi")], 0.8, "be nice").await;
        assert_eq!(outcome, InferOutcome::Reply("hello".into()));
        assert_eq!(mock.call_count(), 1);
        assert_eq!(notifier.count(), 0);
        assert_eq!(mock.requests()[0].system_instruction, "be nice");
    }

    #[tokio::test(start_paused = true)]
    async fn retries_rotate_credentials() {
        let mock = Arc::new(MockBackend::new(vec![
            MockResponse::server_error(),
            MockResponse::Error(GatewayError::Blocked("SAFETY".into())),
            MockResponse::text("recovered"),
        ]));
        let (client, _) = client(mock.clone(), 2, fast_config(5, 10));
        let outcome = client.infer(&[], 0.8, "").await;
        assert_eq!(outcome.as_text(), "recovered");
        assert_eq!(mock.keys_used(), vec!["key-0", "key-1", "key-0"]);
        assert_eq!(client.stats().failures, 2);
        assert_eq!(client.stats().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rotation_advances_on_success_too() {
        let mock = Arc::new(MockBackend::new(vec![]).with_fallback(MockResponse::text("ok")));
        let (client, _) = client(mock.clone(), 3, fast_config(5, 5));
        for _ in 0..10 {
            assert!(!client.infer(&[], 0.8, "").await.is_failed());
        }
        let selections = client.stats().credential_selections;
        assert_eq!(selections.iter().sum::<u64>(), 10);
        for count in selections {
            assert!(count == 3 || count == 4, "unfair count {count}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_notifies_and_returns_sentinel() {
        let mock = Arc::new(MockBackend::new(vec![]).with_fallback(MockResponse::server_error()));
        let (client, notifier) = client(mock.clone(), 2, fast_config(3, 100));
        let outcome = client.infer(&[], 0.8, "").await;
        assert!(outcome.is_failed());
        assert_eq!(outcome.as_text(), ERROR_SIGNAL);
        assert_eq!(mock.call_count(), 3);
        assert_eq!(notifier.count(), 1);
        assert!(notifier.sent()[0].0.contains("retries exhausted"));
        assert!(notifier.sent()[0].1.contains("server_error"));
    }

    #[tokio::test(start_paused = true)]
    async fn circuit_short_circuits_until_success() {
        // Two credentials, threshold 5, one attempt per call.
        let mock = Arc::new(MockBackend::new(vec![
            MockResponse::server_error(),
            MockResponse::server_error(),
            MockResponse::server_error(),
            MockResponse::server_error(),
            MockResponse::server_error(),
        ]));
        let (client, notifier) = client(mock.clone(), 2, fast_config(1, 5));
        for _ in 0..5 {
            assert!(client.infer(&[], 0.8, "").await.is_failed());
        }
        assert_eq!(mock.call_count(), 5);
        assert!(client.circuit_open());

        // Sixth call: sentinel without a network attempt.
        assert!(client.infer(&[], 0.8, "").await.is_failed());
        assert_eq!(mock.call_count(), 5);
        assert_eq!(client.stats().short_circuits, 1);
        assert!(notifier
            .sent()
            .iter()
            .any(|(subject, _)| subject.contains("circuit breaker opened")));

        // A success elsewhere resets the counter.
        client.breaker.record_success();
        mock.push(MockResponse::text("back"));
        assert_eq!(client.infer(&[], 0.8, "").await.as_text(), "back");
        assert_eq!(client.stats().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_stops_mid_call() {
        let mock = Arc::new(MockBackend::new(vec![]).with_fallback(MockResponse::server_error()));
        let (client, _) = client(mock.clone(), 2, fast_config(5, 2));
        assert!(client.infer(&[], 0.8, "").await.is_failed());
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_circuit_reopens_traffic() {
        let mock = Arc::new(MockBackend::new(vec![MockResponse::server_error()]));
        let (client, _) = client(mock.clone(), 1, fast_config(1, 1));
        assert!(client.infer(&[], 0.8, "").await.is_failed());
        assert!(client.circuit_open());
        client.reset_circuit();
        mock.push(MockResponse::text("ok"));
        assert_eq!(client.infer(&[], 0.8, "").await.as_text(), "ok");
    }

    #[tokio::test(start_paused = true)]
    async fn missing_credentials_fail_fast() {
        let mock = Arc::new(MockBackend::new(vec![MockResponse::text("unused")]));
        let (client, _) = client(mock.clone(), 0, fast_config(5, 5));
        assert!(client.infer(&[], 0.8, "").await.is_failed());
        assert_eq!(mock.call_count(), 0);
        assert_eq!(client.stats().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_completion_is_retried() {
        let mock = Arc::new(MockBackend::new(vec![
            MockResponse::text(""),
            MockResponse::text("second"),
        ]));
        let (client, _) = client(mock.clone(), 1, fast_config(5, 5));
        assert_eq!(client.infer(&[], 0.8, "").await.as_text(), "second");
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_stays_in_range() {
        let mock = Arc::new(MockBackend::new(vec![]));
        let (client, _) = client(mock, 1, fast_config(5, 5));
        for _ in 0..50 {
            let d = client.backoff();
            assert!(d >= Duration::from_millis(1500) && d <= Duration::from_millis(3000));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn embed_single_pass_without_breaker() {
        let mock = Arc::new(MockBackend::new(vec![
            MockResponse::server_error(),
            MockResponse::server_error(),
        ]));
        let (client, _) = client(mock.clone(), 2, fast_config(5, 1));
        assert!(client.embed("hello").await.is_none());
        assert_eq!(mock.call_count(), 2);
        assert!(!client.circuit_open());

        mock.push(MockResponse::Embedding(vec![0.1, 0.2]));
        assert_eq!(client.embed("hello").await, Some(vec![0.1, 0.2]));
    }

    #[tokio::test(start_paused = true)]
    async fn describe_image_falls_through_credentials() {
        let mock = Arc::new(MockBackend::new(vec![
            MockResponse::server_error(),
            MockResponse::text("a smiling cat"),
        ]));
        let (client, _) = client(mock.clone(), 3, fast_config(5, 5));
        let text = client.describe_image(b"png", "image/png", "describe").await;
        assert_eq!(text.as_deref(), Some("a smiling cat"));
    }

    #[test]
    fn config_from_settings() {
        let mut settings = InferenceSettings::default();
        settings.circuit_cooldown_secs = 30;
        let config = InferenceConfig::from(&settings);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.backoff_min, Duration::from_millis(1500));
        assert_eq!(config.circuit_cooldown, Some(Duration::from_secs(30)));
        assert!(InferenceConfig::default().circuit_cooldown.is_none());
    }
}
