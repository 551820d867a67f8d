//! Gemini `generateContent` / `embedContent` wire types.

use serde::{Deserialize, Serialize};

use milky_core::{GatewayError, Role};

use crate::backend::InferenceRequest;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    pub generation_config: GenerationConfig,
    pub safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Part {
    Text { text: String },
    Image {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
    /// Anything else the API returns (function calls, thoughts) is ignored.
    Other(serde_json::Value),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
pub struct SafetySetting {
    pub category: &'static str,
    pub threshold: &'static str,
}

/// Every adjustable harm category with blocking disabled.
pub fn default_safety_settings() -> Vec<SafetySetting> {
    [
        "HARM_CATEGORY_HARASSMENT",
        "HARM_CATEGORY_HATE_SPEECH",
        "HARM_CATEGORY_SEXUALLY_EXPLICIT",
        "HARM_CATEGORY_DANGEROUS_CONTENT",
    ]
    .into_iter()
    .map(|category| SafetySetting {
        category,
        threshold: "BLOCK_NONE",
    })
    .collect()
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerateContentResponse {
    pub candidates: Vec<Candidate>,
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Candidate {
    pub content: Option<Content>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PromptFeedback {
    pub block_reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EmbedContentRequest {
    pub model: String,
    pub content: Content,
}

#[derive(Debug, Deserialize)]
pub struct EmbedContentResponse {
    pub embedding: Embedding,
}

#[derive(Debug, Deserialize)]
pub struct Embedding {
    #[serde(default)]
    pub values: Vec<f32>,
}

fn text_part(text: &str) -> Part {
    Part::Text {
        text: text.to_string(),
    }
}

/// Convert a request into Gemini form. System-role turns are folded into
/// `systemInstruction`; assistant turns become role `model`.
pub fn to_generate_request(request: &InferenceRequest) -> GenerateContentRequest {
    let (instruction, chat) = request.split_system();
    let contents = chat
        .into_iter()
        .map(|turn| Content {
            role: Some(match turn.role {
                Role::Assistant => "model".to_string(),
                _ => "user".to_string(),
            }),
            parts: vec![text_part(&turn.content)],
        })
        .collect();
    GenerateContentRequest {
        contents,
        system_instruction: (!instruction.trim().is_empty()).then(|| Content {
            role: None,
            parts: vec![text_part(&instruction)],
        }),
        generation_config: GenerationConfig {
            temperature: request.temperature,
            max_output_tokens: request.max_tokens,
        },
        safety_settings: default_safety_settings(),
    }
}

/// Single-turn vision request: image followed by the prompt.
pub fn to_vision_request(image_b64: String, mime_type: &str, prompt: &str) -> GenerateContentRequest {
    GenerateContentRequest {
        contents: vec![Content {
            role: Some("user".to_string()),
            parts: vec![
                Part::Image {
                    inline_data: InlineData {
                        mime_type: mime_type.to_string(),
                        data: image_b64,
                    },
                },
                text_part(prompt),
            ],
        }],
        system_instruction: None,
        generation_config: GenerationConfig {
            temperature: 0.4,
            max_output_tokens: 100,
        },
        safety_settings: default_safety_settings(),
    }
}

const BLOCKING_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "RECITATION",
    "BLOCKLIST",
    "PROHIBITED_CONTENT",
    "SPII",
    "IMAGE_SAFETY",
];

/// Extract trimmed completion text, classifying empty and blocked replies.
pub fn extract_text(response: GenerateContentResponse) -> Result<String, GatewayError> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(GatewayError::Blocked(format!("prompt feedback: {reason}")));
    }
    let Some(candidate) = response.candidates.into_iter().next() else {
        return Err(GatewayError::EmptyCompletion);
    };
    let text: String = candidate
        .content
        .map(|c| {
            c.parts
                .into_iter()
                .filter_map(|p| match p {
                    Part::Text { text } => Some(text),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();
    let text = text.trim();
    if !text.is_empty() {
        return Ok(text.to_string());
    }
    match candidate.finish_reason {
        Some(reason) if BLOCKING_FINISH_REASONS.contains(&reason.as_str()) => {
            Err(GatewayError::Blocked(reason))
        }
        _ => Err(GatewayError::EmptyCompletion),
    }
}
