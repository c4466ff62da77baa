//! Line-oriented chat relay.
//!
//! Clients connect over TCP, pick a name with `login:<name>`, and every line
//! they send afterwards is relayed to all other connected clients. The last
//! few messages are kept in memory and replayed to clients as they log in.
//!
//! Layout, leaves first:
//! - [`identity`] — per-session login state and name validation
//! - [`message`] — a relayed chat line
//! - [`history`] — bounded ring of recent messages
//! - [`command`] — parsing inbound lines into commands
//! - [`hub`] — shared session registry, login claims, fan-out
//! - [`session`] — protocol state machine for one connection
//! - [`connection`] — socket read loop and writer task
//! - [`server`] — TCP listener

pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod history;
pub mod hub;
pub mod identity;
pub mod message;
pub mod server;
pub mod session;

pub use hub::{Hub, Relay, SessionId};
pub use identity::Identity;
pub use message::Message;
pub use session::{Flow, Session};
