use thiserror::Error;

/// Transport-level failures. Never fatal: the fetcher logs them and the
/// caller sees an absent page.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("empty url")]
    EmptyUrl,

    #[error("failed to build http client: {0}")]
    Client(String),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {0}")]
    Status(u16),

    #[error("not an image ({0})")]
    NotAnImage(String),

    #[error("body larger than {0} bytes")]
    TooLarge(usize),
}

/// Failures of the structured-extraction capability.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("network error: {0}")]
    Network(String),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("malformed structured output: {0}")]
    Malformed(String),

    #[error("empty response")]
    Empty,
}

impl ExtractError {
    /// An empty completion is a definite answer; everything else may
    /// succeed on a second try.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ExtractError::Empty)
    }
}

impl From<serde_json::Error> for ExtractError {
    fn from(e: serde_json::Error) -> Self {
        ExtractError::Malformed(e.to_string())
    }
}
