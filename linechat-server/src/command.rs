//! Parsing inbound lines into commands.

/// Prefix of the login command.
pub const LOGIN_PREFIX: &str = "login:";

/// Text of the roster command.
pub const ONLINE: &str = "online";

/// Everything a client can send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List logged-in users.
    Online,
    /// Claim a login name. The name is not validated here.
    Login(String),
    /// Anything else: a chat line.
    Chat(String),
}

impl Command {
    /// Classify one line of input. Trailing `\r`/`\n` are ignored.
    ///
    /// Precedence: exact `online`, then the `login:` prefix, then chat.
    pub fn parse(line: &str) -> Command {
        let line = strip_terminator(line);
        if line == ONLINE {
            Command::Online
        } else if let Some(name) = line.strip_prefix(LOGIN_PREFIX) {
            Command::Login(name.to_string())
        } else {
            Command::Chat(line.to_string())
        }
    }
}

/// Drop any trailing line terminator characters.
pub fn strip_terminator(line: &str) -> &str {
    line.trim_end_matches(['\r', '\n'])
}
