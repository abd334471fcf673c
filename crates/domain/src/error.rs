/// Shared error type used across all codeact crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("llm {provider}: {message}")]
    Llm { provider: String, message: String },

    #[error("sandbox: {0}")]
    Sandbox(String),

    #[error("config: {0}")]
    Config(String),

    /// Infra-pause sentinel (e.g. insufficient credits). The control loop
    /// translates this into an immediate pause result instead of a retry.
    #[error("pause required: {0}")]
    Pause(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error must suspend the task instead of retrying it.
    pub fn is_pause(&self) -> bool {
        matches!(self, Error::Pause(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
