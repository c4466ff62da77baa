//! Server configuration.

use clap::Parser;

/// Default number of messages kept for replay on login.
pub const DEFAULT_HISTORY_SIZE: usize = 10;

/// Default cap on a single inbound line, in bytes.
pub const DEFAULT_MAX_LINE_LEN: usize = 8192;

#[derive(Parser, Debug, Clone)]
#[command(name = "linechat-server", about = "Line-oriented chat relay")]
pub struct ServerConfig {
    /// Address to listen on for client connections.
    #[arg(long, env = "LINECHAT_LISTEN_ADDR", default_value = "127.0.0.1:8888")]
    pub listen_addr: String,

    /// Number of recent messages replayed to a client after login.
    #[arg(long, env = "LINECHAT_HISTORY_SIZE", default_value_t = DEFAULT_HISTORY_SIZE)]
    pub history_size: usize,

    /// Longest accepted input line in bytes; longer lines are dropped.
    #[arg(long, env = "LINECHAT_MAX_LINE_LEN", default_value_t = DEFAULT_MAX_LINE_LEN)]
    pub max_line_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8888".to_string(),
            history_size: DEFAULT_HISTORY_SIZE,
            max_line_len: DEFAULT_MAX_LINE_LEN,
        }
    }
}
