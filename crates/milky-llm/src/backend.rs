use async_trait::async_trait;

use milky_core::{ApiKey, ConversationTurn, GatewayError, Role};

/// One completion request as handed to a backend.
#[derive(Clone, Debug, PartialEq)]
pub struct InferenceRequest {
    pub system_instruction: String,
    pub turns: Vec<ConversationTurn>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl InferenceRequest {
    pub fn new(system_instruction: impl Into<String>, turns: Vec<ConversationTurn>) -> Self {
        Self {
            system_instruction: system_instruction.into(),
            turns,
            temperature: 0.8,
            max_tokens: 2048,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Fold system-role turns (memory summaries) into the instruction.
    ///
    /// Returns the effective instruction and the remaining chat turns in order.
    pub fn split_system(&self) -> (String, Vec<&ConversationTurn>) {
        let mut instruction = self.system_instruction.clone();
        let mut chat = Vec::with_capacity(self.turns.len());
        for turn in &self.turns {
            if turn.role == Role::System {
                if !instruction.is_empty() {
                    instruction.push('\n');
                }
                instruction.push_str(&turn.content);
            } else {
                chat.push(turn);
            }
        }
        (instruction, chat)
    }
}

/// A language-model endpoint reachable with one credential at a time.
///
/// Implementations make exactly one network attempt per call. Retry,
/// rotation and circuit breaking belong to [`crate::InferenceClient`].
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Returns trimmed, non-empty completion text.
    async fn generate(&self, key: &ApiKey, request: &InferenceRequest)
        -> Result<String, GatewayError>;

    async fn embed(&self, key: &ApiKey, text: &str) -> Result<Vec<f32>, GatewayError>;

    async fn describe_image(
        &self,
        key: &ApiKey,
        image: &[u8],
        mime_type: &str,
        prompt: &str,
    ) -> Result<String, GatewayError>;
}
