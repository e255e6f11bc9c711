//! Service error taxonomy.
//!
//! Services raise typed errors carrying a short `title` for the client
//! toast; the HTTP layer maps the variants onto status codes
//! (404 / 403 / 400 / 401 / 500). No retries happen at the service layer.

use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// A referenced document or member is missing (404).
    #[error("{message}")]
    NotFound { message: String, title: String },

    /// The caller lacks the required role (403).
    #[error("{message}")]
    Forbidden { message: String, title: String },

    /// A game or lobby rule was violated (400).
    #[error("{message}")]
    Precondition { message: String, title: String },

    /// No credential was presented (401).
    #[error("No token provided")]
    Unauthorized,

    /// Store or I/O failure (500); the message is the failure's own text.
    #[error("{message}")]
    Internal { message: String, title: String },
}

impl ServiceError {
    pub fn not_found(message: impl Into<String>, title: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
            title: title.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>, title: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
            title: title.into(),
        }
    }

    pub fn precondition(message: impl Into<String>, title: impl Into<String>) -> Self {
        Self::Precondition {
            message: message.into(),
            title: title.into(),
        }
    }

    pub fn internal(message: impl Into<String>, title: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            title: title.into(),
        }
    }

    /// The toast title shown by clients.
    pub fn title(&self) -> &str {
        match self {
            Self::NotFound { title, .. }
            | Self::Forbidden { title, .. }
            | Self::Precondition { title, .. }
            | Self::Internal { title, .. } => title,
            Self::Unauthorized => "Authentication Error",
        }
    }

    /// The HTTP status this error maps to.
    pub fn status(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::Forbidden { .. } => 403,
            Self::Precondition { .. } => 400,
            Self::Unauthorized => 401,
            Self::Internal { .. } => 500,
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        Self::Internal {
            message: err.to_string(),
            title: "Storage Error".to_string(),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ServiceError::not_found("x", "t").status(), 404);
        assert_eq!(ServiceError::forbidden("x", "t").status(), 403);
        assert_eq!(ServiceError::precondition("x", "t").status(), 400);
        assert_eq!(ServiceError::Unauthorized.status(), 401);
        assert_eq!(ServiceError::internal("x", "t").status(), 500);
    }

    #[test]
    fn test_store_error_becomes_internal() {
        let err: ServiceError = StoreError::InvalidPath {
            path: "a.b".to_string(),
        }
        .into();
        assert_eq!(err.status(), 500);
        assert_eq!(err.title(), "Storage Error");
    }
}
