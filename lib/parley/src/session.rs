use crate::codec::{classify, Payload};
use crate::command::Reply;
use crate::entity::ClientId;
use crate::logging;
use crate::scheduler::{token_of, Step, Task, Wait, LISTENER};
use crate::server::{Accept, Flush, Input, Relay};
use std::collections::VecDeque;

const GREETING: &str = "Hi! Write your username.";
const NAME_TAKEN: &str = "Username is already in use, try another one:";
const NOT_IN_CHAT: &str = "You are not consistent with any chat.";

/// Queued outbound messages of one task, delivered one suspension at a time.
///
/// Each message is appended whole to the destination client's write buffer,
/// then the task waits for that socket's write readiness and flushes. A
/// destination that disappears mid-delivery simply loses the message.
struct Outbox {
    queue: VecDeque<Reply>,
    flushing: Option<ClientId>,
}

impl Outbox {
    fn new() -> Outbox {
        Outbox {
            queue: VecDeque::new(),
            flushing: None,
        }
    }

    #[inline]
    fn push(&mut self, reply: Reply) {
        self.queue.push_back(reply);
    }

    #[inline]
    fn extend(&mut self, replies: Vec<Reply>) {
        self.queue.extend(replies);
    }

    /// Drives delivery as far as possible; `Some(wait)` means the task must
    /// suspend, `None` means everything queued has hit the wire.
    fn pump(&mut self, relay: &mut Relay) -> Option<Wait> {
        loop {
            if let Some(to) = self.flushing {
                match relay.flush(to) {
                    Flush::Busy => return Some(Wait::write(token_of(to))),
                    Flush::Clean | Flush::Gone => self.flushing = None,
                }
            }

            match self.queue.pop_front() {
                Some(reply) => {
                    if relay.queue_line(reply.to, &reply.text) {
                        self.flushing = Some(reply.to);
                        return Some(Wait::write(token_of(reply.to)));
                    }
                    // Recipient is gone; drop the message and move on.
                }
                None => return None,
            }
        }
    }
}

/// The listener task: accepts until the listener would block, greets every
/// new connection and hands it to a registrar.
pub struct Acceptor {
    outbox: Outbox,
    log: logging::Logger,
}

impl Acceptor {
    pub fn new(log: logging::Logger) -> Acceptor {
        Acceptor {
            outbox: Outbox::new(),
            log,
        }
    }
}

impl Task for Acceptor {
    fn resume(&mut self, relay: &mut Relay) -> Step {
        loop {
            if let Some(wait) = self.outbox.pump(relay) {
                return Step::Pending(wait);
            }

            match relay.accept() {
                Accept::Session(client) => {
                    self.outbox.push(Reply::new(client, GREETING));
                    relay.spawn(Box::new(Registrar::new(
                        client,
                        self.log.new(logging::o!("client_id" => client)),
                    )));
                }
                Accept::Wait | Accept::Retry => return Step::Pending(Wait::read(LISTENER)),
                Accept::Halt => return Step::Done,
            }
        }
    }

    fn kind(&self) -> &'static str {
        "acceptor"
    }
}

/// Registration loop of a single connection. Retires into a `Conversation`
/// once a unique name is assigned.
pub struct Registrar {
    client: ClientId,
    outbox: Outbox,
    retired: bool,
    log: logging::Logger,
}

impl Registrar {
    pub fn new(client: ClientId, log: logging::Logger) -> Registrar {
        Registrar {
            client,
            outbox: Outbox::new(),
            retired: false,
            log,
        }
    }

    fn register(&mut self, relay: &mut Relay, line: String) {
        let name = line.as_str();

        if !acceptable_name(name) || relay.name_taken(name) {
            logging::info!(self.log, "rejected username"; "input_username" => name);
            self.outbox.push(Reply::new(self.client, NAME_TAKEN));
            return;
        }

        relay.register_name(self.client, name);
        relay.spawn(Box::new(Conversation::new(self.client, self.log.clone())));
        self.outbox
            .push(Reply::new(self.client, crate::command::help_text()));
        self.retired = true;
    }
}

impl Task for Registrar {
    fn resume(&mut self, relay: &mut Relay) -> Step {
        loop {
            if let Some(wait) = self.outbox.pump(relay) {
                return Step::Pending(wait);
            }

            if self.retired {
                return Step::Done;
            }

            match relay.next_line(self.client) {
                Input::Line(line) => self.register(relay, line),
                Input::More => return Step::Pending(Wait::read(token_of(self.client))),
                Input::Gone => {
                    relay.disconnect(self.client);
                    return Step::Done;
                }
            }
        }
    }

    fn kind(&self) -> &'static str {
        "registrar"
    }
}

/// Names must address a single whitespace-separated command argument, so
/// they carry no whitespace at all.
fn acceptable_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(char::is_whitespace)
}

/// The steady-state loop of a registered connection: commands go through the
/// dispatcher, anything else is chat text for the active peer.
pub struct Conversation {
    client: ClientId,
    outbox: Outbox,
    log: logging::Logger,
}

impl Conversation {
    pub fn new(client: ClientId, log: logging::Logger) -> Conversation {
        Conversation {
            client,
            outbox: Outbox::new(),
            log,
        }
    }

    fn handle(&mut self, relay: &mut Relay, line: String) {
        match classify(&line) {
            Payload::Command { name, args } => {
                let replies = relay.dispatch(self.client, &name, &args);
                self.outbox.extend(replies);
            }
            Payload::Chat(text) => match relay.active_peer(self.client) {
                Some(peer) => {
                    let sender = relay.client_name(self.client).unwrap_or_default();
                    self.outbox
                        .push(Reply::new(peer, format!("{}: {}", sender, text)));
                }
                None => {
                    logging::debug!(self.log, "chat text without an active chat");
                    self.outbox.push(Reply::new(self.client, NOT_IN_CHAT));
                }
            },
        }
    }
}

impl Task for Conversation {
    fn resume(&mut self, relay: &mut Relay) -> Step {
        loop {
            if let Some(wait) = self.outbox.pump(relay) {
                return Step::Pending(wait);
            }

            match relay.next_line(self.client) {
                Input::Line(line) => self.handle(relay, line),
                Input::More => return Step::Pending(Wait::read(token_of(self.client))),
                Input::Gone => {
                    relay.disconnect(self.client);
                    return Step::Done;
                }
            }
        }
    }

    fn kind(&self) -> &'static str {
        "conversation"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Direction;
    use crate::testutil::{read_lines, test_rig};
    use std::io::Write;

    fn pending_direction(step: Step) -> Direction {
        match step {
            Step::Pending(wait) => wait.direction,
            Step::Done => panic!("Task finished unexpectedly"),
        }
    }

    #[test]
    fn test_registrar_assigns_name_and_spawns_conversation() {
        let (_scheduler, mut relay) = test_rig();
        let (client, mut peer) = relay.admit_for_test();
        let mut registrar = Registrar::new(client, crate::testutil::discard_logger());

        peer.write_all(b"alice\n").unwrap();

        // First resumption: reads the name, queues the help text.
        let step = registrar.resume(&mut relay);
        assert_eq!(pending_direction(step), Direction::Write);

        // Second resumption: the help text flushed, the registrar retires.
        match registrar.resume(&mut relay) {
            Step::Done => {}
            Step::Pending(_) => panic!("Registrar failed to retire"),
        }

        assert_eq!(relay.client_name(client).as_deref(), Some("alice"));
        assert_eq!(relay.drain_spawned().len(), 1);

        let lines = read_lines(&mut peer, 9);
        assert_eq!(lines[0], "Available commands:");
    }

    #[test]
    fn test_registrar_rejects_taken_name() {
        let (_scheduler, mut relay) = test_rig();

        let (first, mut first_peer) = relay.admit_for_test();
        let mut first_registrar = Registrar::new(first, crate::testutil::discard_logger());
        first_peer.write_all(b"alice\n").unwrap();
        first_registrar.resume(&mut relay);

        let (second, mut second_peer) = relay.admit_for_test();
        let mut registrar = Registrar::new(second, crate::testutil::discard_logger());
        second_peer.write_all(b"alice\n").unwrap();

        let step = registrar.resume(&mut relay);
        assert_eq!(pending_direction(step), Direction::Write);

        // After the rejection flushes, the registrar waits for another try.
        let step = registrar.resume(&mut relay);
        assert_eq!(pending_direction(step), Direction::Read);

        assert!(relay.client_name(second).is_none());
        assert_eq!(read_lines(&mut second_peer, 1), vec![NAME_TAKEN.to_string()]);
    }

    #[test]
    fn test_registrar_rejects_names_with_whitespace() {
        let (_scheduler, mut relay) = test_rig();
        let (client, mut peer) = relay.admit_for_test();
        let mut registrar = Registrar::new(client, crate::testutil::discard_logger());

        peer.write_all(b"al ice\n").unwrap();
        registrar.resume(&mut relay);
        registrar.resume(&mut relay);

        assert!(relay.client_name(client).is_none());
        assert_eq!(read_lines(&mut peer, 1), vec![NAME_TAKEN.to_string()]);
    }

    #[test]
    fn test_conversation_forwards_chat_text() {
        let (_scheduler, mut relay) = test_rig();

        let (alice, mut alice_peer) = relay.admit_for_test();
        let (bob, mut bob_peer) = relay.admit_for_test();
        relay.register_name(alice, "alice");
        relay.register_name(bob, "bob");

        let chat = relay.chats_mut().open(alice, bob);
        relay.chats_mut().approve(chat);

        let mut conversation = Conversation::new(alice, crate::testutil::discard_logger());
        alice_peer.write_all(b"  hello bob  \n").unwrap();

        conversation.resume(&mut relay);
        conversation.resume(&mut relay);

        assert_eq!(read_lines(&mut bob_peer, 1), vec!["alice: hello bob".to_string()]);
    }

    #[test]
    fn test_conversation_rejects_chat_text_without_chat() {
        let (_scheduler, mut relay) = test_rig();

        let (alice, mut alice_peer) = relay.admit_for_test();
        relay.register_name(alice, "alice");

        let mut conversation = Conversation::new(alice, crate::testutil::discard_logger());
        alice_peer.write_all(b"anyone there?\n").unwrap();

        conversation.resume(&mut relay);
        conversation.resume(&mut relay);

        assert_eq!(read_lines(&mut alice_peer, 1), vec![NOT_IN_CHAT.to_string()]);
    }

    #[test]
    fn test_conversation_detects_disconnect() {
        let (_scheduler, mut relay) = test_rig();

        let (alice, alice_peer) = relay.admit_for_test();
        let (bob, _bob_peer) = relay.admit_for_test();
        relay.register_name(alice, "alice");
        relay.register_name(bob, "bob");

        let chat = relay.chats_mut().open(bob, alice);
        relay.chats_mut().approve(chat);

        let mut conversation = Conversation::new(alice, crate::testutil::discard_logger());
        drop(alice_peer);

        match conversation.resume(&mut relay) {
            Step::Done => {}
            Step::Pending(_) => panic!("Conversation survived a dead socket"),
        }

        // Full cleanup: client gone, chats gone, token retired.
        assert!(!relay.is_connected(alice));
        assert!(relay.chats_mut().is_empty());
        assert_eq!(relay.drain_retired(), vec![token_of(alice)]);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let (_scheduler, mut relay) = test_rig();
        let (alice, _peer) = relay.admit_for_test();

        relay.disconnect(alice);
        relay.disconnect(alice);

        assert_eq!(relay.drain_retired(), vec![token_of(alice)]);
    }
}
