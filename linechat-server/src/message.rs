//! A chat line relayed between sessions.

use std::fmt;
use std::time::SystemTime;

/// A message broadcast by a logged-in session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Login of the sender.
    pub author: String,
    pub text: String,
    /// Unix seconds at which the hub accepted the message.
    pub timestamp: u64,
}

impl Message {
    pub fn new(author: impl Into<String>, text: impl Into<String>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Self {
            author: author.into(),
            text: text.into(),
            timestamp,
        }
    }

    /// `<author> text`, as delivered to other clients.
    pub fn formatted(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}> {}", self.author, self.text)
    }
}
