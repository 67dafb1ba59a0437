//! Common error type shared by the dispatcher, the crawler, and the store.
//!
//! Besides the usual not-found / database / I/O cases, the enum carries the
//! provider-facing failures so that a job can decide whether a failure is
//! worth retrying (see [`Error::is_retryable`]).

/// Common error type for pinmonl.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested entity was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input was provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No provider is registered under the given name.
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// Every credential is held or exhausted and none freed up in time.
    #[error("No credential available")]
    NoCredentialAvailable,

    /// The provider answered with an HTTP error status.
    #[error("Provider responded with status {status}")]
    ProviderResponse { status: u16 },

    /// The provider answered but reported an error in its payload
    /// (rate limited, temporarily unavailable, ...).
    #[error("Provider error: {0}")]
    Provider(String),

    /// The provider payload could not be decoded.
    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    /// The request never produced a response (connect, timeout, ...).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The surrounding work was cancelled before it finished.
    #[error("Cancelled")]
    Cancelled,

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new NotFound error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new Database error.
    pub fn database<S: Into<String>>(msg: S) -> Self {
        Self::Database(msg.into())
    }

    /// Create a new InvalidInput error.
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new UnknownProvider error.
    pub fn unknown_provider<S: Into<String>>(name: S) -> Self {
        Self::UnknownProvider(name.into())
    }

    /// Create a new Provider error.
    pub fn provider<S: Into<String>>(msg: S) -> Self {
        Self::Provider(msg.into())
    }

    /// Create a new MalformedResponse error.
    pub fn malformed<S: Into<String>>(msg: S) -> Self {
        Self::MalformedResponse(msg.into())
    }

    /// Create a new Transport error.
    pub fn transport<S: Into<String>>(msg: S) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a new Internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether a job that failed with this error should be re-armed.
    ///
    /// Network, quota, and storage hiccups are transient. Bad payloads,
    /// missing targets, and configuration mistakes will fail again the same
    /// way, so they are terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_)
            | Self::ProviderResponse { .. }
            | Self::Provider(_)
            | Self::NoCredentialAvailable
            | Self::Database(_)
            | Self::Cancelled
            | Self::Internal(_)
            | Self::Io(_) => true,
            Self::NotFound(_)
            | Self::InvalidInput(_)
            | Self::UnknownProvider(_)
            | Self::MalformedResponse(_) => false,
        }
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
