use axum::http::StatusCode;
use thiserror::Error;

/// Errors produced while making an admission decision.
///
/// A denied request is not an error; it is a [`crate::algorithms::State::Deny`]
/// decision. Everything here means no valid decision exists.
#[derive(Debug, Error)]
pub enum ThrottlerError {
    #[error("failed to extract rate limit key: {0}")]
    KeyExtractionFailed(String),

    #[error("invalid rate limit key: {0}")]
    InvalidKey(String),

    #[error("counter store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("counter store timed out: {0}")]
    StoreTimeout(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type ThrottlerResult<T> = Result<T, ThrottlerError>;

impl From<redis::RedisError> for ThrottlerError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            ThrottlerError::StoreTimeout(err.to_string())
        } else {
            ThrottlerError::StoreUnavailable(err.to_string())
        }
    }
}

impl From<validator::ValidationErrors> for ThrottlerError {
    fn from(err: validator::ValidationErrors) -> Self {
        ThrottlerError::Validation(err.to_string())
    }
}

impl ThrottlerError {
    /// HTTP status a request failing with this error is answered with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ThrottlerError::KeyExtractionFailed(_) | ThrottlerError::InvalidKey(_) => {
                StatusCode::BAD_REQUEST
            }
            ThrottlerError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ThrottlerError::StoreUnavailable(_)
            | ThrottlerError::StoreTimeout(_)
            | ThrottlerError::Configuration(_)
            | ThrottlerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_map_to_4xx() {
        let err = ThrottlerError::KeyExtractionFailed("missing header".into());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let err = ThrottlerError::InvalidKey("empty".into());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_store_errors_map_to_5xx() {
        let err = ThrottlerError::StoreUnavailable("connection refused".into());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let err = ThrottlerError::StoreTimeout("no answer within 50ms".into());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_redis_timeout_keeps_redis_error_text() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "read timed out");
        let err: ThrottlerError = redis::RedisError::from(io).into();
        assert!(matches!(err, ThrottlerError::StoreTimeout(_)));
        let message = err.to_string();
        assert!(message.contains("read timed out"), "{}", message);
        assert!(!message.contains("0ns"), "{}", message);
    }

    #[test]
    fn test_redis_io_error_is_store_unavailable() {
        let err: ThrottlerError =
            redis::RedisError::from((redis::ErrorKind::IoError, "broken pipe")).into();
        assert!(matches!(err, ThrottlerError::StoreUnavailable(_)));
    }
}
