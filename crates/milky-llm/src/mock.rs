use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use milky_core::{ApiKey, GatewayError};

use crate::backend::{InferenceBackend, InferenceRequest};

/// Pre-programmed responses for deterministic testing without API calls.
#[derive(Clone, Debug)]
pub enum MockResponse {
    Text(String),
    Embedding(Vec<f32>),
    Error(GatewayError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    pub fn text(text: &str) -> Self {
        Self::Text(text.to_string())
    }

    pub fn server_error() -> Self {
        Self::Error(GatewayError::ServerError {
            status: 500,
            body: "internal".into(),
        })
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Backend that pops scripted responses in order.
///
/// Calls beyond the script fail with `InvalidRequest`, unless a fallback
/// response was set with [`MockBackend::with_fallback`].
#[derive(Default)]
pub struct MockBackend {
    script: Mutex<VecDeque<MockResponse>>,
    fallback: Option<MockResponse>,
    call_count: AtomicUsize,
    keys_used: Mutex<Vec<String>>,
    requests: Mutex<Vec<InferenceRequest>>,
}

impl MockBackend {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            ..Default::default()
        }
    }

    /// Response used whenever the script is exhausted.
    pub fn with_fallback(mut self, response: MockResponse) -> Self {
        self.fallback = Some(response);
        self
    }

    pub fn push(&self, response: MockResponse) {
        self.script.lock().push_back(response);
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Exposed credential values, one per call, in call order.
    pub fn keys_used(&self) -> Vec<String> {
        self.keys_used.lock().clone()
    }

    /// Every `generate` request received.
    pub fn requests(&self) -> Vec<InferenceRequest> {
        self.requests.lock().clone()
    }

    async fn next_response(&self, key: &ApiKey) -> MockResponse {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.keys_used.lock().push(key.expose().to_string());
        let scripted = self.script.lock().pop_front();
        let mut response = match scripted.or_else(|| self.fallback.clone()) {
            Some(response) => response,
            None => {
                return MockResponse::Error(GatewayError::InvalidRequest(format!(
                    "MockBackend: no response configured for call {idx}"
                )))
            }
        };
        while let MockResponse::Delay(delay, inner) = response {
            tokio::time::sleep(delay).await;
            response = *inner;
        }
        response
    }
}

#[async_trait]
impl InferenceBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(
        &self,
        key: &ApiKey,
        request: &InferenceRequest,
    ) -> Result<String, GatewayError> {
        self.requests.lock().push(request.clone());
        match self.next_response(key).await {
            MockResponse::Text(text) if text.trim().is_empty() => Err(GatewayError::EmptyCompletion),
            MockResponse::Text(text) => Ok(text.trim().to_string()),
            MockResponse::Error(e) => Err(e),
            other => Err(GatewayError::MalformedResponse(format!(
                "MockBackend: unexpected {other:?} for generate"
            ))),
        }
    }

    async fn embed(&self, key: &ApiKey, _text: &str) -> Result<Vec<f32>, GatewayError> {
        match self.next_response(key).await {
            MockResponse::Embedding(values) => Ok(values),
            MockResponse::Error(e) => Err(e),
            other => Err(GatewayError::MalformedResponse(format!(
                "MockBackend: unexpected {other:?} for embed"
            ))),
        }
    }

    async fn describe_image(
        &self,
        key: &ApiKey,
        _image: &[u8],
        _mime_type: &str,
        _prompt: &str,
    ) -> Result<String, GatewayError> {
        match self.next_response(key).await {
            MockResponse::Text(text) if text.trim().is_empty() => Err(GatewayError::EmptyCompletion),
            MockResponse::Text(text) => Ok(text.trim().to_string()),
            MockResponse::Error(e) => Err(e),
            other => Err(GatewayError::MalformedResponse(format!(
                "MockBackend: unexpected {other:?} for describe_image"
            ))),
        }
    }
}
