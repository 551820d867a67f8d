use milky_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("unknown persona: {0}")]
    UnknownPersona(String),

    #[error("unknown emoji: {0}")]
    UnknownEmoji(u64),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("http client: {0}")]
    HttpClient(#[from] reqwest::Error),
}
