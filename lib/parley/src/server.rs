use crate::command::{self, Reply};
use crate::config::RelayConfig;
use crate::entity::ClientId;
use crate::logging;
use crate::registry::{Chats, Clients};
use crate::scheduler::{client_of, token_of, Scheduler, Task, LISTENER};
use crate::session::Acceptor;
use crate::support::{NetError, RelayError};
use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Registry, Token};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

/// Outcome of one accept attempt.
pub enum Accept {
    /// A connection was admitted and registered.
    Session(ClientId),
    /// The listener has nothing queued.
    Wait,
    /// A transient failure; try again on the next readiness.
    Retry,
    /// The listener is broken; the server is going down.
    Halt,
}

/// Outcome of asking a client for its next line.
pub enum Input {
    Line(String),
    /// Nothing complete buffered; wait for read readiness.
    More,
    /// The client is disconnected (or was never there).
    Gone,
}

/// Outcome of flushing a client's write buffer.
pub enum Flush {
    Clean,
    /// Data remains; wait for write readiness.
    Busy,
    Gone,
}

/// The single-threaded server state every task runs against: the listener,
/// both registries, and the queues the scheduler absorbs between
/// resumptions.
pub struct Relay {
    listener: TcpListener,
    registry: Registry,

    clients: Clients,
    chats: Chats,

    spawned: Vec<Box<dyn Task>>,
    retired: Vec<Token>,
    fatal: Option<RelayError>,

    log: logging::Logger,
}

impl Relay {
    pub fn new(
        mut listener: TcpListener,
        registry: Registry,
        log: logging::Logger,
    ) -> io::Result<Relay> {
        registry.register(&mut listener, LISTENER, Interest::READABLE)?;

        Ok(Relay {
            listener,
            registry,
            clients: Clients::new(log.new(logging::o!("system" => "clients"))),
            chats: Chats::new(log.new(logging::o!("system" => "chats"))),
            spawned: Vec::new(),
            retired: Vec::new(),
            fatal: None,
            log,
        })
    }

    #[inline]
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts one queued connection, admitting it into the registry and
    /// onto the poll.
    pub fn accept(&mut self) -> Accept {
        match self.listener.accept() {
            Ok((stream, address)) => match self.admit(stream, address) {
                Some(client) => Accept::Session(client),
                None => Accept::Retry,
            },
            Err(err) => {
                if err.kind() == io::ErrorKind::WouldBlock {
                    return Accept::Wait;
                }
                if transient_accept(&err) {
                    logging::warn!(self.log, "transient accept failure"; "error" => ?err);
                    return Accept::Retry;
                }
                logging::error!(self.log, "accept failed"; "error" => ?err);
                self.fatal = Some(RelayError::Io(err));
                Accept::Halt
            }
        }
    }

    fn admit(&mut self, stream: TcpStream, address: SocketAddr) -> Option<ClientId> {
        let client = self.clients.admit(stream, address);
        let token = token_of(client);

        let registered = {
            let registry = &self.registry;
            match self.clients.get_mut(client) {
                Some(entry) => registry.register(entry.stream_mut(), token, Interest::READABLE),
                None => return None,
            }
        };

        if let Err(err) = registered {
            logging::error!(self.log, "stream registration failed";
                            "client_id" => client,
                            "error" => ?err);
            self.disconnect(client);
            return None;
        }

        Some(client)
    }

    /// The next complete line from the client, pulling fresh bytes off the
    /// socket when none is buffered. Any transport failure disconnects the
    /// client and reports `Gone`.
    pub fn next_line(&mut self, client: ClientId) -> Input {
        let filled = match self.clients.get_mut(client) {
            None => return Input::Gone,
            Some(entry) => {
                if let Some(line) = entry.next_line() {
                    return Input::Line(line);
                }
                entry.fill()
            }
        };

        match filled {
            Ok(_) => match self.clients.get_mut(client).and_then(|entry| entry.next_line()) {
                Some(line) => Input::Line(line),
                None => Input::More,
            },
            Err(NetError::Wait) => Input::More,
            Err(NetError::Fatal(reason)) => {
                logging::debug!(self.log, "read failure";
                                "client_id" => client,
                                "reason" => ?reason);
                self.disconnect(client);
                Input::Gone
            }
        }
    }

    /// Appends one message to the client's write buffer. `false` means the
    /// recipient cannot take it (gone, or disconnected for overflowing).
    pub fn queue_line(&mut self, client: ClientId, text: &str) -> bool {
        let queued = match self.clients.get_mut(client) {
            None => return false,
            Some(entry) => entry.queue_line(text),
        };

        match queued {
            Ok(()) => true,
            Err(err) => {
                logging::debug!(self.log, "write queue failure";
                                "client_id" => client,
                                "error" => ?err);
                self.disconnect(client);
                false
            }
        }
    }

    /// Drains the client's write buffer to its socket.
    pub fn flush(&mut self, client: ClientId) -> Flush {
        let flushed = match self.clients.get_mut(client) {
            None => return Flush::Gone,
            Some(entry) => entry.flush(),
        };

        match flushed {
            Ok(_) => Flush::Clean,
            Err(NetError::Wait) => Flush::Busy,
            Err(NetError::Fatal(reason)) => {
                logging::debug!(self.log, "send failure";
                                "client_id" => client,
                                "reason" => ?reason);
                self.disconnect(client);
                Flush::Gone
            }
        }
    }

    /// Removes the client, every chat it belongs to, and retires its token
    /// so the scheduler can scrub parked waiters. Re-entry for an already
    /// removed client is a no-op; the socket closes exactly once, when the
    /// removed entry drops.
    pub fn disconnect(&mut self, client: ClientId) {
        let mut entry = match self.clients.remove(client) {
            Some(entry) => entry,
            None => return,
        };

        let removed = self.chats.remove_of(client);
        self.retired.push(token_of(client));
        drop(self.registry.deregister(entry.stream_mut()));

        logging::info!(self.log, "disconnected client";
                       "client_id" => client,
                       "name" => entry.name().unwrap_or("-"),
                       "address" => %entry.address(),
                       "chats_removed" => removed.len());
    }

    /// Re-registers the socket behind a token with a fresh interest set.
    /// `false` reports a vanished socket; the caller decides what to do with
    /// the waiter.
    pub(crate) fn rearm(&mut self, token: Token, interest: Interest) -> io::Result<bool> {
        if token == LISTENER {
            self.registry
                .reregister(&mut self.listener, LISTENER, interest)?;
            return Ok(true);
        }

        let registry = &self.registry;
        match self.clients.get_mut(client_of(token)) {
            Some(entry) => {
                registry.reregister(entry.stream_mut(), token, interest)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn spawn(&mut self, task: Box<dyn Task>) {
        self.spawned.push(task);
    }

    pub(crate) fn drain_spawned(&mut self) -> Vec<Box<dyn Task>> {
        self.spawned.drain(..).collect()
    }

    pub(crate) fn drain_retired(&mut self) -> Vec<Token> {
        self.retired.drain(..).collect()
    }

    pub(crate) fn take_fatal(&mut self) -> Option<RelayError> {
        self.fatal.take()
    }

    #[inline]
    pub fn name_taken(&self, name: &str) -> bool {
        self.clients.name_taken(name)
    }

    pub fn register_name(&mut self, client: ClientId, name: &str) {
        if let Some(entry) = self.clients.get_mut(client) {
            entry.set_name(name);
            logging::info!(self.log, "registered client"; "client_id" => client, "name" => name);
        }
    }

    pub fn client_name(&self, client: ClientId) -> Option<String> {
        self.clients
            .get(client)
            .and_then(|entry| entry.name())
            .map(str::to_string)
    }

    #[inline]
    pub fn is_connected(&self, client: ClientId) -> bool {
        self.clients.get(client).is_some()
    }

    /// The other member of the client's active chat, if one exists.
    pub fn active_peer(&self, client: ClientId) -> Option<ClientId> {
        self.chats
            .active_of(client)
            .map(|chat| chat.second_member(client))
    }

    pub fn dispatch(&mut self, caller: ClientId, name: &str, args: &[String]) -> Vec<Reply> {
        logging::debug!(self.log, "dispatching command";
                        "client_id" => caller,
                        "command" => name,
                        "args" => ?args);

        command::dispatch(
            &mut self.clients,
            &mut self.chats,
            caller,
            name,
            args,
            &self.log,
        )
    }

    #[cfg(test)]
    pub(crate) fn chats_mut(&mut self) -> &mut Chats {
        &mut self.chats
    }

    /// Admits a loopback connection directly, bypassing the acceptor.
    #[cfg(test)]
    pub(crate) fn admit_for_test(&mut self) -> (ClientId, std::net::TcpStream) {
        let (stream, peer, address) = crate::testutil::loopback_client();
        let client = self
            .admit(stream, address)
            .expect("Loopback admission failed");
        (client, peer)
    }
}

/// 23/24 are ENFILE/EMFILE: out of descriptors is worth riding out.
fn transient_accept(err: &io::Error) -> bool {
    match err.kind() {
        io::ErrorKind::Interrupted
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset => true,
        _ => matches!(err.raw_os_error(), Some(23) | Some(24)),
    }
}

/// The public entry point: binds, wires the acceptor and runs the scheduler
/// for the lifetime of the process.
pub struct Server {
    relay: Relay,
    scheduler: Scheduler,
    log: logging::Logger,
}

impl Server {
    pub fn bind(config: &RelayConfig, log: logging::Logger) -> Result<Server, RelayError> {
        let address = resolve(&config.address())?;

        // mio sets SO_REUSEADDR before binding.
        let listener = TcpListener::bind(address)?;

        let scheduler = Scheduler::new(log.new(logging::o!("system" => "scheduler")))?;
        let relay = Relay::new(
            listener,
            scheduler.registry()?,
            log.new(logging::o!("system" => "relay")),
        )?;

        Ok(Server {
            relay,
            scheduler,
            log,
        })
    }

    #[inline]
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.relay.local_addr()
    }

    /// Blocks for the lifetime of the server.
    pub fn run(mut self) -> Result<(), RelayError> {
        if let Ok(address) = self.local_addr() {
            logging::info!(self.log, "running server"; "address" => %address);
        }

        self.scheduler.spawn(Box::new(Acceptor::new(
            self.log.new(logging::o!("system" => "acceptor")),
        )));

        self.scheduler.run(&mut self.relay)
    }
}

fn resolve(address: &str) -> Result<SocketAddr, RelayError> {
    let mut candidates = address.to_socket_addrs()?;

    match candidates.next() {
        Some(resolved) => Ok(resolved),
        None => Err(RelayError::Addr(address.to_string())),
    }
}
