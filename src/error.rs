use serde_json::Value;

/// Failures surfaced by the registry, stores, API client and worker.
#[derive(thiserror::Error, Debug)]
pub enum MinerError {
    /// A persisted-operation hash is missing or unresolvable.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("no credentials for {login}")]
    NoCredentials { login: String },

    /// Transport failure, 5xx or 429 past the attempt ceiling.
    #[error("{operation}: retry limit exceeded after {attempts} attempts ({last})")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        last: String,
    },

    /// Request rejected pending anti-bot verification and no fresh token was available.
    #[error("{operation}: integrity challenge ({detail})")]
    IntegrityChallenge { operation: String, detail: String },

    /// GraphQL-level `errors` payload. Never retried.
    #[error("{operation}: api error {errors}")]
    Api { operation: String, errors: Value },

    /// Non-retryable HTTP status that is not an integrity challenge.
    #[error("{operation}: HTTP {status}: {body}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MinerError>;
