use thiserror::Error;

/// Failure kinds a container runtime reports.
#[derive(Debug, Error)]
pub enum RuntimeApiError {
    /// The named container, network or secret does not exist.
    #[error("'{0}' not found")]
    NotFound(String),

    #[error("image '{0}' not found")]
    ImageNotFound(String),

    /// The runtime rejected the request.
    #[error("container runtime error: {0}")]
    Api(String),

    /// The runtime could not be reached at all.
    #[error("failed to invoke container runtime: {0}")]
    Io(#[from] std::io::Error),
}

impl RuntimeApiError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
