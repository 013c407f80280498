use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    /// 429 from the provider. Retried with backoff.
    #[error("LLM rate limited: {0}")]
    RateLimited(String),

    /// Request exceeded its deadline. Retried with backoff.
    #[error("LLM request timed out: {0}")]
    Timeout(String),

    /// Non-retryable provider error (4xx/5xx body included).
    #[error("LLM API error: {0}")]
    Api(String),

    /// The model returned something that is not the JSON we asked for.
    /// Never retried; scoring falls back to defaults.
    #[error("LLM returned malformed JSON: {0}")]
    MalformedJson(String),

    /// Websocket / connection level failure on the realtime path.
    #[error("LLM transport error: {0}")]
    Transport(String),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::RateLimited(_) | LlmError::Timeout(_))
    }
}
