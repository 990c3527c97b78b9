use thiserror::Error;

/// Auth failures the app tells apart. Everything else lands in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthFailure {
    #[error("not authorized")]
    NotAuthorized,
    #[error("attempt limit exceeded")]
    LimitExceeded,
    #[error("password does not meet requirements")]
    InvalidPassword,
    #[error("verification code mismatch")]
    CodeMismatch,
    #[error("{0}")]
    Other(String),
}

impl AuthFailure {
    /// Map an auth service exception name (`NotAuthorizedException`, ...) to a failure.
    pub fn from_exception_name(name: &str) -> Self {
        match name.trim_end_matches("Exception") {
            "NotAuthorized" => Self::NotAuthorized,
            "LimitExceeded" | "TooManyRequests" => Self::LimitExceeded,
            "InvalidPassword" => Self::InvalidPassword,
            "CodeMismatch" | "EnableSoftwareTokenMFA" => Self::CodeMismatch,
            _ => Self::Other(name.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("subscription error: {0}")]
    Subscription(String),
    #[error("auth error: {0}")]
    Auth(AuthFailure),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            return Self::Network(e.to_string());
        }
        match e.status() {
            Some(status) if status == reqwest::StatusCode::NOT_FOUND => Self::NotFound(e.to_string()),
            Some(status)
                if status == reqwest::StatusCode::UNAUTHORIZED
                    || status == reqwest::StatusCode::FORBIDDEN =>
            {
                Self::Unauthorized(e.to_string())
            }
            Some(_) => Self::Storage(e.to_string()),
            None => Self::Other(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, BackendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_names_map_to_failures() {
        assert_eq!(
            AuthFailure::from_exception_name("NotAuthorizedException"),
            AuthFailure::NotAuthorized
        );
        assert_eq!(
            AuthFailure::from_exception_name("LimitExceededException"),
            AuthFailure::LimitExceeded
        );
        assert_eq!(
            AuthFailure::from_exception_name("InvalidPasswordException"),
            AuthFailure::InvalidPassword
        );
        assert_eq!(
            AuthFailure::from_exception_name("UserNotFoundException"),
            AuthFailure::Other("UserNotFoundException".into())
        );
    }
}
