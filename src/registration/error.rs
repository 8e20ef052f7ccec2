// Registration flow errors.
//
// The Display text of ValidationFailure and RemoteRejection is shown to the
// user as the inline form error, so keep it user-facing.

/// Why a registration step failed.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// A client-side field check failed before any request was made.
    #[error("{0}")]
    ValidationFailure(String),

    /// The backend answered with a non-success status.
    #[error("{0}")]
    RemoteRejection(String),

    /// The backend could not be reached or answered with something other
    /// than JSON.
    #[error("Network error: {0:#}")]
    NetworkFailure(anyhow::Error),

    /// Reading or writing the local store failed.
    #[error("Local storage error: {0:#}")]
    Storage(anyhow::Error),

    /// The step doesn't apply to the flow's current state.
    #[error("{0}")]
    InvalidState(&'static str),
}

impl FlowError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationFailure(message.into())
    }

    pub fn rejection(message: impl Into<String>) -> Self {
        Self::RemoteRejection(message.into())
    }
}
