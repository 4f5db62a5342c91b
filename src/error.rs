use thiserror::Error;

/// Failure of a call against the remote resource API.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// Network failure, timeout, 5xx or an unreadable response. Triggers cache fallback.
    #[error("remote unavailable: {0}")]
    Unavailable(String),
    /// 4xx: the server's real answer. Never masked by cached data.
    #[error("remote rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    /// The request body could not be encoded. Nothing was sent.
    #[error("request body could not be encoded: {0}")]
    Encode(String),
}

impl RemoteError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if (400..500).contains(&status) {
            RemoteError::Rejected { status, message }
        } else {
            RemoteError::Unavailable(format!("status {}: {}", status, message))
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_))
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(
        "quota exceeded for `{key}`: {size} bytes would bring usage to {prospective} of {ceiling}"
    )]
    QuotaExceeded {
        key: String,
        size: usize,
        prospective: usize,
        ceiling: usize,
    },
    #[error("failed to serialize `{key}`: {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, StoreError::QuotaExceeded { .. })
    }
}

/// What a domain caller sees from the fallback client. Raised only when remote
/// and cache both fail, or when the remote gave a definitive answer.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),
    #[error("remote rejected request ({status}): {message}")]
    RemoteRejected { status: u16, message: String },
    #[error("no cached copy of `{key}` after remote failure: {cause}")]
    CacheMiss { key: String, cause: RemoteError },
    #[error("request body could not be encoded: {0}")]
    Encode(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Unavailable(reason) => SyncError::RemoteUnavailable(reason),
            RemoteError::Rejected { status, message } => {
                SyncError::RemoteRejected { status, message }
            }
            RemoteError::Encode(reason) => SyncError::Encode(reason),
        }
    }
}

/// Failure of a single asset upload. Scoped to that asset only.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("not a decodable inline payload: {0}")]
    InvalidPayload(String),
    #[error("upload transport failed: {0}")]
    Transport(String),
    #[error("upload rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("upload returned no usable url: {0}")]
    InvalidResponse(String),
}
