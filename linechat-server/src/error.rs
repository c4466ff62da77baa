//! Login failures.
//!
//! The `Display` text of each variant is what the client is sent.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoginError {
    #[error("Login name must not be empty")]
    EmptyName,
    #[error("Login name must be at most {max} characters")]
    NameTooLong { max: usize },
    #[error("Login name must not contain spaces or control characters")]
    InvalidCharacter,
    #[error("Login name {0} is reserved, try another one")]
    Reserved(String),
    #[error("Login {0} is taken, try another one")]
    Taken(String),
    #[error("You are already logged in as {0}. Reconnect to use another name")]
    AlreadyLoggedIn(String),
}

impl LoginError {
    /// Whether the connection must be closed after reporting this error.
    pub fn closes_connection(&self) -> bool {
        matches!(self, LoginError::Taken(_))
    }
}
