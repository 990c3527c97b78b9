use thiserror::Error;

use parlay_backend::{AuthFailure, BackendError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("no user is signed in")]
    NotSignedIn,
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Text for the alert shown after a user-initiated action fails.
    pub fn user_message(&self) -> String {
        match self {
            Self::Backend(BackendError::Auth(AuthFailure::NotAuthorized)) => {
                "Current password is incorrect.".into()
            }
            Self::Backend(BackendError::Auth(AuthFailure::LimitExceeded)) => {
                "Too many attempts. Please try again later.".into()
            }
            Self::Backend(BackendError::Auth(AuthFailure::InvalidPassword)) => {
                "New password does not meet the requirements.".into()
            }
            Self::Backend(BackendError::Auth(AuthFailure::CodeMismatch)) => {
                "The verification code is incorrect.".into()
            }
            Self::Backend(BackendError::Network(_)) => {
                "Network error. Check your connection and try again.".into()
            }
            Self::NotSignedIn => "Please sign in again.".into(),
            Self::PermissionDenied(what) => format!("Permission needed: {}", what),
            Self::InvalidInput(msg) => msg.clone(),
            _ => "Something went wrong. Please try again.".into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_failures_have_specific_messages() {
        let wrong = ClientError::from(BackendError::Auth(AuthFailure::NotAuthorized));
        assert_eq!(wrong.user_message(), "Current password is incorrect.");

        let weak = ClientError::from(BackendError::Auth(AuthFailure::InvalidPassword));
        assert!(weak.user_message().contains("requirements"));
    }

    #[test]
    fn unknown_failures_get_generic_message() {
        let err = ClientError::from(BackendError::Other("boom".into()));
        assert_eq!(err.user_message(), "Something went wrong. Please try again.");
    }
}
