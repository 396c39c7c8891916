use thiserror::Error;

use crate::auth::AuthFailure;

pub type CoreResult<T> = Result<T, CoreError>;

/// Every error stays local to the event that raised it; the connection
/// it arrived on keeps running.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("authentication failed: {0}")]
    Auth(AuthFailure),

    #[error("invalid payload: {0}")]
    Validation(String),

    #[error("database error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("{0} not found")]
    NotFound(&'static str),
}

impl CoreError {
    /// Classification string echoed back on the `error` event. `expired`
    /// tells the client a credential refresh makes the event retryable;
    /// everything else is not retried by the core.
    pub fn classification(&self) -> &'static str {
        match self {
            CoreError::Auth(AuthFailure::Expired) => "expired",
            CoreError::Auth(AuthFailure::Invalid) => "invalid",
            CoreError::Validation(_) => "validation",
            CoreError::Persistence(_) => "internal",
            CoreError::NotFound(_) => "not_found",
        }
    }
}

impl From<AuthFailure> for CoreError {
    fn from(failure: AuthFailure) -> Self {
        CoreError::Auth(failure)
    }
}
