use service_core::error::AppError;
use thiserror::Error;

use super::store::StoreError;
use super::verification::ProviderError;

#[derive(Error, Debug)]
pub enum IamError {
    // Argument errors
    #[error("invalid argument {field}: {reason}")]
    InvalidArgument { field: &'static str, reason: String },

    // Authorization errors
    #[error("authorization context invalid")]
    AuthorizationInvalid,

    #[error("operation requires a user context")]
    UserContextRequired,

    #[error("operation not allowed")]
    OperationNotAllowed,

    #[error("client is not allowed to use this grant")]
    UnauthorizedClient,

    #[error("invalid credentials")]
    InvalidCredentials,

    // Conflict errors
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("identifier generation failed after {0} attempts")]
    RetryExhausted(usize),

    // Verification errors
    #[error("verification code mismatch")]
    CodeMismatch,

    #[error("verification code expired")]
    CodeExpired,

    #[error("authorization code already claimed")]
    AlreadyClaimed,

    // Configuration and infrastructure errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("delivery failed: {0}")]
    Delivery(#[from] ProviderError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IamError {
    pub fn invalid_argument(field: &'static str, reason: impl Into<String>) -> Self {
        IamError::InvalidArgument {
            field,
            reason: reason.into(),
        }
    }

    /// Expected, user-facing outcomes as opposed to faults.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            IamError::Configuration(_)
                | IamError::Delivery(_)
                | IamError::Store(_)
                | IamError::Internal(_)
        )
    }
}

impl From<IamError> for AppError {
    fn from(err: IamError) -> Self {
        match err {
            IamError::InvalidArgument { .. } => AppError::BadRequest(anyhow::anyhow!(err)),
            IamError::AuthorizationInvalid | IamError::InvalidCredentials => {
                AppError::Unauthorized(anyhow::anyhow!(err))
            }
            IamError::UserContextRequired
            | IamError::OperationNotAllowed
            | IamError::UnauthorizedClient => AppError::Forbidden(anyhow::anyhow!(err)),
            IamError::Conflict(_) | IamError::RetryExhausted(_) => {
                AppError::Conflict(anyhow::anyhow!(err))
            }
            IamError::CodeMismatch | IamError::CodeExpired | IamError::AlreadyClaimed => {
                AppError::BadRequest(anyhow::anyhow!(err))
            }
            IamError::Configuration(msg) => AppError::ConfigError(anyhow::anyhow!(msg)),
            IamError::Delivery(e) => AppError::BadGateway(e.to_string()),
            IamError::Store(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            IamError::Internal(msg) => AppError::InternalError(anyhow::anyhow!(msg)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    fn status_of(err: IamError) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn test_taxonomy_maps_to_distinct_statuses() {
        assert_eq!(
            status_of(IamError::invalid_argument("phone_number", "empty")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(IamError::AuthorizationInvalid), StatusCode::UNAUTHORIZED);
        assert_eq!(status_of(IamError::UnauthorizedClient), StatusCode::FORBIDDEN);
        assert_eq!(
            status_of(IamError::Conflict("phone number".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(status_of(IamError::CodeExpired), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(IamError::Configuration("no signer".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(IamError::Delivery(ProviderError::RateLimited("quota".into()))),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_client_error_classification() {
        assert!(IamError::CodeMismatch.is_client_error());
        assert!(IamError::AlreadyClaimed.is_client_error());
        assert!(!IamError::Internal("bug".into()).is_client_error());
        assert!(!IamError::Store(StoreError::Database(anyhow::anyhow!("down"))).is_client_error());
    }
}
