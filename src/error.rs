//! Error types

/// Storage layer failures
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    #[error("{0}")]
    Invalid(String),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        StoreError::Invalid(msg.into())
    }
}

/// Failures of an import or selection replace
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("content is required")]
    EmptyContent,

    #[error("no channels found in m3u")]
    NoChannels,

    #[error("failed to read playlist: {0}")]
    Read(#[source] std::io::Error),

    #[error("import cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ImportError {
    /// True for input problems the caller should see as a rejected request
    pub fn is_rejection(&self) -> bool {
        match self {
            ImportError::EmptyContent | ImportError::NoChannels | ImportError::Read(_) => true,
            ImportError::Store(StoreError::Invalid(_)) => true,
            ImportError::Cancelled | ImportError::Store(_) => false,
        }
    }
}

/// Remote playlist download failures
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("url must be http or https")]
    InvalidUrl,

    #[error("request failed: {0}")]
    Request(String),

    #[error("upstream returned {0}")]
    Status(u16),

    #[error("playlist exceeds {0} bytes")]
    TooLarge(u64),

    #[error("read failed: {0}")]
    Read(#[from] std::io::Error),
}

/// Configuration loading failures
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Invalid(String),
}
