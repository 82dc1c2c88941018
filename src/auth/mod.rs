mod firebase;
mod memory;

use async_trait::async_trait;
use thiserror::Error;
use crate::models::notice::Notice;
use crate::models::user::SessionContext;

pub use self::firebase::FirebaseAuth;
pub use self::memory::MemoryAuth;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid email address")]
    InvalidEmail,
    #[error("no user with this email")]
    UserNotFound,
    #[error("wrong password")]
    WrongPassword,
    #[error("email already registered")]
    EmailExists,
    #[error("weak password: {0}")]
    WeakPassword(String),
    #[error("network failure: {0}")]
    Network(String),
    #[error("authentication failed: {0}")]
    Unknown(String),
}

impl AuthError {
    /// Maps a provider error code (`EMAIL_NOT_FOUND`, `WEAK_PASSWORD : ...`) to a variant.
    pub fn from_provider_code(message: &str) -> Self {
        let (code, detail) = match message.split_once(':') {
            Some((code, detail)) => (code.trim(), detail.trim()),
            None => (message.trim(), ""),
        };
        match code {
            "INVALID_EMAIL" | "MISSING_EMAIL" => AuthError::InvalidEmail,
            "EMAIL_NOT_FOUND" | "USER_NOT_FOUND" => AuthError::UserNotFound,
            "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS" | "MISSING_PASSWORD" => AuthError::WrongPassword,
            "EMAIL_EXISTS" => AuthError::EmailExists,
            "WEAK_PASSWORD" => AuthError::WeakPassword(detail.to_string()),
            _ => AuthError::Unknown(message.to_string()),
        }
    }

    pub fn notice(&self) -> Notice {
        match self {
            AuthError::InvalidEmail => Notice::new("Invalid Email", "The email address is not valid."),
            AuthError::UserNotFound => Notice::new("User Not Found", "No user found with this email."),
            AuthError::WrongPassword => Notice::new("Incorrect Password", "The password is incorrect."),
            AuthError::EmailExists => Notice::new("Error", "The email address is already in use by another account."),
            AuthError::WeakPassword(_) => Notice::new("Error", "Password should be at least 6 characters."),
            AuthError::Network(_) => Notice::new("Network Error", "Please check your internet connection."),
            AuthError::Unknown(_) => Notice::new("Login Error", "An unexpected error occurred. Please try again."),
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            AuthError::Network(err.to_string())
        } else {
            AuthError::Unknown(err.to_string())
        }
    }
}

/// Email + password identity provider yielding a stable user id.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str) -> Result<SessionContext, AuthError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<SessionContext, AuthError>;

    /// Replaces the password of the signed-in user and returns refreshed credentials.
    async fn update_password(
        &self,
        ctx: &SessionContext,
        new_password: &str
    ) -> Result<SessionContext, AuthError>;
}
