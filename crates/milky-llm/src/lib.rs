pub mod backend;
pub mod breaker;
pub mod client;
pub mod gemini;
pub mod rotation;

pub mod mock;

pub use backend::{InferenceBackend, InferenceRequest};
pub use breaker::CircuitBreaker;
pub use client::{InferOutcome, InferenceClient, InferenceConfig, InferenceStats, ERROR_SIGNAL};
pub use gemini::{GeminiBackend, GeminiConfig};
pub use rotation::CredentialRing;
