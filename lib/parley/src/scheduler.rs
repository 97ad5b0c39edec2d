use crate::entity::ClientId;
use crate::logging;
use crate::server::Relay;
use crate::support::RelayError;
use hashbrown::HashMap;
use mio::{Events, Interest, Poll, Registry, Token};
use std::collections::VecDeque;
use std::io;

/// Token of the listening socket; client tokens are their IDs, which start
/// at 1.
pub const LISTENER: Token = Token(0);

const EVENT_CAPACITY: usize = 1024;

#[inline]
pub fn token_of(id: ClientId) -> Token {
    Token(id)
}

#[inline]
pub fn client_of(token: Token) -> ClientId {
    token.0
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Direction {
    Read,
    Write,
}

/// What a suspended task is waiting for: one socket, one direction.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Wait {
    pub token: Token,
    pub direction: Direction,
}

impl Wait {
    #[inline]
    pub fn read(token: Token) -> Wait {
        Wait {
            token,
            direction: Direction::Read,
        }
    }

    #[inline]
    pub fn write(token: Token) -> Wait {
        Wait {
            token,
            direction: Direction::Write,
        }
    }
}

/// Outcome of one resumption.
pub enum Step {
    Pending(Wait),
    Done,
}

/// A suspendable unit of work. Each resumption runs until the task either
/// finishes or needs socket readiness; tasks never block.
pub trait Task: Send {
    fn resume(&mut self, relay: &mut Relay) -> Step;

    fn kind(&self) -> &'static str;
}

/// Cooperative single-threaded executor: a FIFO queue of runnable tasks plus
/// a readiness table of parked ones, driven by one mio poll.
pub struct Scheduler {
    poll: Poll,
    events: Events,

    ready: VecDeque<Box<dyn Task>>,
    waiting: HashMap<(Token, Direction), Box<dyn Task>>,

    log: logging::Logger,
}

impl Scheduler {
    pub fn new(log: logging::Logger) -> io::Result<Scheduler> {
        Ok(Scheduler {
            poll: Poll::new()?,
            events: Events::with_capacity(EVENT_CAPACITY),
            ready: VecDeque::new(),
            waiting: HashMap::new(),
            log,
        })
    }

    /// A standalone handle for registering sockets on this scheduler's poll.
    pub fn registry(&self) -> io::Result<Registry> {
        self.poll.registry().try_clone()
    }

    /// Queues a task for its first resumption, behind everything already
    /// runnable.
    pub fn spawn(&mut self, task: Box<dyn Task>) {
        logging::debug!(self.log, "spawned task"; "task" => task.kind());
        self.ready.push_back(task);
    }

    /// Runs until no task is runnable or parked. Returns early only on
    /// server-fatal failures.
    pub fn run(&mut self, relay: &mut Relay) -> Result<(), RelayError> {
        loop {
            self.absorb(relay);

            if self.ready.is_empty() && self.waiting.is_empty() {
                logging::info!(self.log, "scheduler drained, shutting down");
                return Ok(());
            }

            if self.ready.is_empty() {
                self.poll_ready()?;
                continue;
            }

            let mut task = match self.ready.pop_front() {
                Some(task) => task,
                None => continue,
            };

            logging::trace!(self.log, "resuming task"; "task" => task.kind());

            match task.resume(relay) {
                Step::Done => {
                    logging::trace!(self.log, "task finished"; "task" => task.kind());
                }
                Step::Pending(wait) => self.park(task, wait, relay)?,
            }

            if let Some(err) = relay.take_fatal() {
                return Err(err);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn parked_count(&self) -> usize {
        self.waiting.len()
    }

    /// Adopts tasks spawned during the last resumption and drops waiters
    /// whose sockets were retired by a disconnect.
    fn absorb(&mut self, relay: &mut Relay) {
        for token in relay.drain_retired() {
            for &direction in &[Direction::Read, Direction::Write] {
                if let Some(orphan) = self.waiting.remove(&(token, direction)) {
                    logging::debug!(self.log, "dropped orphaned waiter";
                                    "task" => orphan.kind(),
                                    "token" => token.0);
                }
            }
        }

        for task in relay.drain_spawned() {
            self.spawn(task);
        }
    }

    /// Parks a task under its wait descriptor and re-arms the socket with
    /// the union of directions still being waited on. A later waiter for the
    /// same key replaces (and drops) the previous one.
    fn park(
        &mut self,
        task: Box<dyn Task>,
        wait: Wait,
        relay: &mut Relay,
    ) -> Result<(), RelayError> {
        let key = (wait.token, wait.direction);

        logging::trace!(self.log, "parking task";
                        "task" => task.kind(),
                        "token" => wait.token.0,
                        "direction" => ?wait.direction);

        if let Some(replaced) = self.waiting.insert(key, task) {
            logging::warn!(self.log, "replaced parked task";
                           "task" => replaced.kind(),
                           "token" => wait.token.0,
                           "direction" => ?wait.direction);
        }

        let mut interest = if self.waiting.contains_key(&(wait.token, Direction::Read)) {
            Some(Interest::READABLE)
        } else {
            None
        };
        if self.waiting.contains_key(&(wait.token, Direction::Write)) {
            interest = Some(match interest {
                Some(current) => current | Interest::WRITABLE,
                None => Interest::WRITABLE,
            });
        }

        let interest = match interest {
            Some(interest) => interest,
            None => return Ok(()),
        };

        match relay.rearm(wait.token, interest) {
            Ok(true) => Ok(()),
            Ok(false) => {
                // The socket vanished while the task was running. Hand the
                // task straight back so it can observe the disconnect.
                if let Some(task) = self.waiting.remove(&key) {
                    self.ready.push_back(task);
                }
                Ok(())
            }
            Err(err) => Err(RelayError::Io(err)),
        }
    }

    /// Blocks for readiness and moves every matching waiter to the ready
    /// queue, in the order the OS reports events.
    fn poll_ready(&mut self) -> Result<(), RelayError> {
        if let Err(err) = self.poll.poll(&mut self.events, None) {
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(RelayError::Io(err));
        }

        for event in self.events.iter() {
            let token = event.token();
            let failed = event.is_error();

            logging::trace!(self.log, "readiness event";
                            "token" => token.0,
                            "readable" => event.is_readable(),
                            "writable" => event.is_writable(),
                            "error" => failed);

            if event.is_readable() || event.is_read_closed() || failed {
                match self.waiting.remove(&(token, Direction::Read)) {
                    Some(task) => self.ready.push_back(task),
                    None => {
                        // Stale readiness from an interest union; harmless.
                        logging::trace!(self.log, "readiness without waiter";
                                        "token" => token.0, "direction" => "read");
                    }
                }
            }

            if event.is_writable() || event.is_write_closed() || failed {
                match self.waiting.remove(&(token, Direction::Write)) {
                    Some(task) => self.ready.push_back(task),
                    None => {
                        logging::trace!(self.log, "readiness without waiter";
                                        "token" => token.0, "direction" => "write");
                    }
                }
            }
        }

        Ok(())
    }
}
