use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Base URL or anonymous key is missing from the environment.
    #[error("backend is not configured")]
    NotConfigured,

    #[error("backend error ({status}): {message}")]
    Backend { status: u16, message: String },

    /// A non-2xx response that looked like an expired bearer token.
    #[error("session expired ({status}): {message}")]
    AuthExpired { status: u16, message: String },

    #[error("not signed in")]
    NotAuthenticated,

    #[error("administrator rights required")]
    Forbidden,

    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    /// A multi-step write failed half way through.
    #[error("{message}")]
    PartialWrite { rolled_back: bool, message: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(String),
}

impl Error {
    pub fn backend(status: u16, message: impl Into<String>) -> Self {
        Self::Backend {
            status,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::AuthExpired { .. })
    }

    pub fn is_not_configured(&self) -> bool {
        matches!(self, Self::NotConfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_write_displays_its_message() {
        let err = Error::PartialWrite {
            rolled_back: false,
            message: "manual cleanup required".into(),
        };
        assert_eq!(err.to_string(), "manual cleanup required");
    }

    #[test]
    fn auth_expired_is_classified() {
        let err = Error::AuthExpired {
            status: 401,
            message: "jwt expired".into(),
        };
        assert!(err.is_auth_expired());
        assert!(!Error::backend(500, "boom").is_auth_expired());
    }
}
