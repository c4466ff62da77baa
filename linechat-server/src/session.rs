//! Protocol state machine for one connection.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::command::Command;
use crate::error::LoginError;
use crate::hub::{Hub, Relay, SessionId};
use crate::identity::{self, Identity};
use crate::message::Message;

const LOGIN_REQUIRED: &str = "You must log in first using login:<name>";
const HISTORY_HEADER: &str = "Recent messages:";

/// What the connection should do after a line has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Close the transport. Queued replies are still flushed.
    Close,
}

/// One live connection and its login state.
pub struct Session<R: Relay = Hub> {
    id: SessionId,
    identity: Identity,
    outbound: mpsc::UnboundedSender<String>,
    relay: Arc<R>,
}

impl<R: Relay> Session<R> {
    pub fn new(id: SessionId, outbound: mpsc::UnboundedSender<String>, relay: Arc<R>) -> Self {
        Self {
            id,
            identity: Identity::Anonymous,
            outbound,
            relay,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Queue a line of text for this session's own client.
    pub fn send(&self, text: &str) {
        queue_line(&self.outbound, &self.id, text);
    }

    /// Interpret one inbound line.
    pub fn handle_line(&mut self, line: &str) -> Flow {
        match Command::parse(line) {
            Command::Online => {
                self.send(&self.relay.roster().join(", "));
                Flow::Continue
            }
            Command::Login(name) => self.handle_login(name),
            Command::Chat(text) => {
                self.handle_chat(text);
                Flow::Continue
            }
        }
    }

    fn handle_login(&mut self, name: String) -> Flow {
        if let Identity::LoggedIn(current) = &self.identity {
            let err = LoginError::AlreadyLoggedIn(current.clone());
            self.send(&err.to_string());
            return Flow::Continue;
        }

        if let Err(err) = identity::validate_login(&name) {
            tracing::info!(session_id = %self.id, login = %name, "Rejected login name: {err}");
            self.send(&err.to_string());
            return Flow::Continue;
        }

        let greeting = format!("Hello, {name}!");
        let (outbound, id) = (&self.outbound, self.id.as_str());
        let claimed = self.relay.claim_login(&self.id, &name, &mut |history| {
            queue_line(outbound, id, &greeting);
            if !history.is_empty() {
                queue_line(outbound, id, &history_block(history));
            }
        });
        if let Err(err) = claimed {
            tracing::info!(session_id = %self.id, login = %name, "Login refused: {err}");
            self.send(&err.to_string());
            return if err.closes_connection() {
                Flow::Close
            } else {
                Flow::Continue
            };
        }

        if let Err(err) = self.identity.log_in(name) {
            self.send(&err.to_string());
            return Flow::Continue;
        }
        tracing::info!(session_id = %self.id, login = %self.identity, "Logged in");
        Flow::Continue
    }

    fn handle_chat(&self, text: String) {
        let Some(login) = self.identity.login() else {
            self.send(LOGIN_REQUIRED);
            return;
        };
        let delivered = self.relay.broadcast(Message::new(login, text));
        tracing::debug!(session_id = %self.id, login, delivered, "Broadcast");
    }
}

fn queue_line(outbound: &mpsc::UnboundedSender<String>, session_id: &str, text: &str) {
    if outbound.send(format!("{text}\r\n")).is_err() {
        tracing::debug!(session_id, "Reply dropped, writer gone");
    }
}

/// Header line followed by one formatted message per line.
fn history_block(history: &[Arc<Message>]) -> String {
    let mut block = HISTORY_HEADER.to_string();
    for msg in history {
        block.push_str("\r\n");
        block.push_str(&msg.formatted());
    }
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(line) = rx.try_recv() {
            out.push(line);
        }
        out
    }

    fn connect(hub: &Arc<Hub>, id: &str) -> (Session, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        hub.register(id.to_string(), tx.clone());
        (Session::new(id.to_string(), tx, Arc::clone(hub)), rx)
    }

    #[test]
    fn chat_before_login_is_refused() {
        let hub = Arc::new(Hub::new(10));
        let (mut a, mut a_rx) = connect(&hub, "a");
        let (_b, mut b_rx) = connect(&hub, "b");

        assert_eq!(a.handle_line("hello\r\n"), Flow::Continue);
        assert_eq!(drain(&mut a_rx), vec![format!("{LOGIN_REQUIRED}\r\n")]);
        assert!(drain(&mut b_rx).is_empty());
        assert!(hub.last_messages(10).is_empty());
    }

    #[test]
    fn login_greets_and_replays_history() {
        let hub = Arc::new(Hub::new(10));
        let (mut a, mut a_rx) = connect(&hub, "a");
        a.handle_line("login:Alice");
        assert_eq!(drain(&mut a_rx), vec!["Hello, Alice!\r\n"]);

        a.handle_line("first");
        a.handle_line("second");

        let (mut b, mut b_rx) = connect(&hub, "b");
        b.handle_line("login:Bob\r\n");
        assert_eq!(
            drain(&mut b_rx),
            vec![
                "Hello, Bob!\r\n".to_string(),
                "Recent messages:\r\n<Alice> first\r\n<Alice> second\r\n".to_string(),
            ]
        );
        assert_eq!(b.identity(), &Identity::LoggedIn("Bob".into()));
    }

    #[test]
    fn duplicate_login_closes_requester_only() {
        let hub = Arc::new(Hub::new(10));
        let (mut a, _a_rx) = connect(&hub, "a");
        let (mut c, mut c_rx) = connect(&hub, "c");
        a.handle_line("login:Alice");

        assert_eq!(c.handle_line("login:Alice"), Flow::Close);
        assert_eq!(drain(&mut c_rx), vec!["Login Alice is taken, try another one\r\n"]);
        assert_eq!(c.identity(), &Identity::Anonymous);
        assert_eq!(a.identity().login(), Some("Alice"));
        assert_eq!(hub.roster(), vec!["Alice"]);
    }

    #[test]
    fn relogin_is_informational() {
        let hub = Arc::new(Hub::new(10));
        let (mut a, mut a_rx) = connect(&hub, "a");
        a.handle_line("login:Alice");
        drain(&mut a_rx);

        assert_eq!(a.handle_line("login:Other"), Flow::Continue);
        assert_eq!(
            drain(&mut a_rx),
            vec!["You are already logged in as Alice. Reconnect to use another name\r\n"]
        );
        assert_eq!(hub.roster(), vec!["Alice"]);
    }

    #[test]
    fn invalid_names_keep_session_open_and_anonymous() {
        let hub = Arc::new(Hub::new(10));
        let (mut a, mut a_rx) = connect(&hub, "a");
        for line in ["login:", "login:online", "login:two words"] {
            assert_eq!(a.handle_line(line), Flow::Continue);
        }
        assert_eq!(drain(&mut a_rx).len(), 3);
        assert_eq!(a.identity(), &Identity::Anonymous);
        assert!(hub.roster().is_empty());
    }

    #[test]
    fn online_lists_logged_in_users() {
        let hub = Arc::new(Hub::new(10));
        let (mut a, mut a_rx) = connect(&hub, "a");
        let (mut b, mut b_rx) = connect(&hub, "b");

        a.handle_line("online");
        assert_eq!(drain(&mut a_rx), vec!["\r\n"]);

        a.handle_line("login:Alice");
        b.handle_line("login:Bob");
        drain(&mut a_rx);
        drain(&mut b_rx);

        b.handle_line("online");
        assert_eq!(drain(&mut b_rx), vec!["Alice, Bob\r\n"]);
    }

    #[test]
    fn blank_lines_follow_the_chat_rules() {
        let hub = Arc::new(Hub::new(10));
        let (mut a, mut a_rx) = connect(&hub, "a");
        let (mut b, mut b_rx) = connect(&hub, "b");

        assert_eq!(a.handle_line("\r\n"), Flow::Continue);
        assert_eq!(drain(&mut a_rx), vec![format!("{LOGIN_REQUIRED}\r\n")]);

        a.handle_line("login:Alice");
        b.handle_line("login:Bob");
        drain(&mut a_rx);
        drain(&mut b_rx);

        a.handle_line("\r\n");
        assert_eq!(drain(&mut b_rx), vec!["<Alice> \r\n"]);
        assert!(drain(&mut a_rx).is_empty());
    }

    /// Broadcasts a message the moment a login has been claimed, the way a
    /// concurrent sender on another connection could.
    struct BroadcastAfterClaim {
        hub: Arc<Hub>,
    }

    impl Relay for BroadcastAfterClaim {
        fn roster(&self) -> Vec<String> {
            self.hub.roster()
        }

        fn is_online(&self, login: &str) -> bool {
            self.hub.is_online(login)
        }

        fn claim_login(
            &self,
            session_id: &str,
            login: &str,
            on_claimed: &mut dyn FnMut(&[Arc<Message>]),
        ) -> Result<(), LoginError> {
            self.hub.claim_login(session_id, login, on_claimed)?;
            self.hub.broadcast(Message::new("Alice", "live"));
            Ok(())
        }

        fn broadcast(&self, message: Message) -> usize {
            self.hub.broadcast(message)
        }
    }

    #[test]
    fn greeting_and_history_precede_concurrent_broadcasts() {
        let hub = Arc::new(Hub::new(10));
        let (mut a, _a_rx) = connect(&hub, "a");
        a.handle_line("login:Alice");
        a.handle_line("old");

        let relay = Arc::new(BroadcastAfterClaim { hub: Arc::clone(&hub) });
        let (tx, mut b_rx) = mpsc::unbounded_channel();
        hub.register("b".to_string(), tx.clone());
        let mut b = Session::new("b".to_string(), tx, relay);

        b.handle_line("login:Bob");
        assert_eq!(
            drain(&mut b_rx),
            vec![
                "Hello, Bob!\r\n".to_string(),
                "Recent messages:\r\n<Alice> old\r\n".to_string(),
                "<Alice> live\r\n".to_string(),
            ]
        );
    }

    /// Relay double that records broadcasts and refuses one name.
    #[derive(Default)]
    struct FakeRelay {
        broadcasts: Mutex<Vec<Message>>,
    }

    impl Relay for FakeRelay {
        fn roster(&self) -> Vec<String> {
            vec!["x".into(), "y".into()]
        }

        fn is_online(&self, login: &str) -> bool {
            login == "taken"
        }

        fn claim_login(
            &self,
            _session_id: &str,
            login: &str,
            on_claimed: &mut dyn FnMut(&[Arc<Message>]),
        ) -> Result<(), LoginError> {
            if self.is_online(login) {
                return Err(LoginError::Taken(login.to_string()));
            }
            on_claimed(&[]);
            Ok(())
        }

        fn broadcast(&self, message: Message) -> usize {
            self.broadcasts.lock().push(message);
            0
        }
    }

    #[test]
    fn session_works_against_any_relay() {
        let relay = Arc::new(FakeRelay::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = Session::new("s1".into(), tx, Arc::clone(&relay));

        assert_eq!(session.handle_line("login:taken"), Flow::Close);
        assert_eq!(session.handle_line("login:free"), Flow::Continue);
        session.handle_line("hi there");
        session.handle_line("online");

        let sent = relay.broadcasts.lock().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].formatted(), "<free> hi there");
        assert_eq!(
            drain(&mut rx),
            vec![
                "Login taken is taken, try another one\r\n".to_string(),
                "Hello, free!\r\n".to_string(),
                "x, y\r\n".to_string(),
            ]
        );
    }
}
