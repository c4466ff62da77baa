//! Per-session login state.

use std::fmt;

use crate::error::LoginError;

/// Longest login name accepted.
pub const MAX_LOGIN_LEN: usize = 64;

/// Names that would be confused with commands.
const RESERVED: &[&str] = &["online"];

/// Who a session is speaking as.
///
/// A session starts `Anonymous` and moves to `LoggedIn` at most once; there
/// is no way back short of reconnecting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Identity {
    #[default]
    Anonymous,
    LoggedIn(String),
}

impl Identity {
    pub fn login(&self) -> Option<&str> {
        match self {
            Identity::Anonymous => None,
            Identity::LoggedIn(login) => Some(login),
        }
    }

    pub fn is_logged_in(&self) -> bool {
        matches!(self, Identity::LoggedIn(_))
    }

    /// Move to `LoggedIn(login)`. Fails if already logged in.
    pub fn log_in(&mut self, login: String) -> Result<(), LoginError> {
        match self {
            Identity::Anonymous => {
                *self = Identity::LoggedIn(login);
                Ok(())
            }
            Identity::LoggedIn(current) => Err(LoginError::AlreadyLoggedIn(current.clone())),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Anonymous => f.write_str("*"),
            Identity::LoggedIn(login) => f.write_str(login),
        }
    }
}

/// Check a requested login name before it is claimed on the hub.
pub fn validate_login(name: &str) -> Result<(), LoginError> {
    if name.is_empty() {
        return Err(LoginError::EmptyName);
    }
    if name.chars().count() > MAX_LOGIN_LEN {
        return Err(LoginError::NameTooLong { max: MAX_LOGIN_LEN });
    }
    if name.contains(|c: char| c.is_control() || c.is_whitespace()) {
        return Err(LoginError::InvalidCharacter);
    }
    if RESERVED.contains(&name) {
        return Err(LoginError::Reserved(name.to_string()));
    }
    Ok(())
}
