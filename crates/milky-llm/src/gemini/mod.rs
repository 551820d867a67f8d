//! Google Gemini backend over the public REST API.

pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use tracing::debug;

use milky_core::{ApiKey, GatewayError};
use milky_settings::InferenceSettings;

use crate::backend::{InferenceBackend, InferenceRequest};
use types::{
    extract_text, to_generate_request, to_vision_request, Content, EmbedContentRequest,
    EmbedContentResponse, GenerateContentResponse, Part,
};

#[derive(Clone, Debug)]
pub struct GeminiConfig {
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
    pub vision_model: String,
    pub timeout: Duration,
}

impl From<&InferenceSettings> for GeminiConfig {
    fn from(s: &InferenceSettings) -> Self {
        Self {
            base_url: s.base_url.trim_end_matches('/').to_string(),
            model: s.model.clone(),
            embedding_model: s.embedding_model.clone(),
            vision_model: s.vision_model.clone(),
            timeout: Duration::from_secs(s.request_timeout_secs),
        }
    }
}

pub struct GeminiBackend {
    client: Client,
    config: GeminiConfig,
}

impl GeminiBackend {
    pub fn new(config: GeminiConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn get_api_url(&self, model: &str, action: &str) -> String {
        format!("{}/models/{}:{}", self.config.base_url, model, action)
    }

    async fn post_json<B: serde::Serialize + Sync, R: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        key: &ApiKey,
        body: &B,
    ) -> Result<R, GatewayError> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", key.expose())
            .json(body)
            .send()
            .await
            .map_err(|e| self.classify_transport(e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();
            return Err(match GatewayError::from_status(status.as_u16(), body) {
                GatewayError::RateLimited { .. } => GatewayError::RateLimited { retry_after },
                other => other,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.classify_transport(e))?;
        serde_json::from_slice(&bytes).map_err(|e| GatewayError::MalformedResponse(e.to_string()))
    }

    fn classify_transport(&self, e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            GatewayError::Timeout(self.config.timeout)
        } else {
            GatewayError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl InferenceBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(
        &self,
        key: &ApiKey,
        request: &InferenceRequest,
    ) -> Result<String, GatewayError> {
        let url = self.get_api_url(&self.config.model, "generateContent");
        debug!(model = %self.config.model, turns = request.turns.len(), "gemini generateContent");
        let body = to_generate_request(request);
        let response: GenerateContentResponse = self.post_json(&url, key, &body).await?;
        extract_text(response)
    }

    async fn embed(&self, key: &ApiKey, text: &str) -> Result<Vec<f32>, GatewayError> {
        let url = self.get_api_url(&self.config.embedding_model, "embedContent");
        let body = EmbedContentRequest {
            model: format!("models/{}", self.config.embedding_model),
            content: Content {
                role: None,
                parts: vec![Part::Text {
                    text: text.to_string(),
                }],
            },
        };
        let response: EmbedContentResponse = self.post_json(&url, key, &body).await?;
        if response.embedding.values.is_empty() {
            return Err(GatewayError::EmptyCompletion);
        }
        Ok(response.embedding.values)
    }

    async fn describe_image(
        &self,
        key: &ApiKey,
        image: &[u8],
        mime_type: &str,
        prompt: &str,
    ) -> Result<String, GatewayError> {
        let url = self.get_api_url(&self.config.vision_model, "generateContent");
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let body = to_vision_request(encoded, mime_type, prompt);
        let response: GenerateContentResponse = self.post_json(&url, key, &body).await?;
        extract_text(response)
    }
}
