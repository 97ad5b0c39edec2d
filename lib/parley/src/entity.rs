use crate::codec::{LineReader, LineWriter, READ_BUF_SIZE, WRITE_BUF_SIZE};
use crate::support::NetResult;
use mio::net::TcpStream;
use std::net::SocketAddr;

pub type ClientId = usize;
pub type ChatId = usize;

/// A connected peer. Owns the socket and both codec buffers; dropping a
/// client closes its connection.
pub struct Client {
    pub id: ClientId,

    stream: TcpStream,
    address: SocketAddr,

    /// Set exactly once, by a successful registration.
    name: Option<String>,

    reader: LineReader,
    writer: LineWriter,
}

impl Client {
    #[inline]
    pub fn new(id: ClientId, stream: TcpStream, address: SocketAddr) -> Client {
        Client {
            id,
            stream,
            address,
            name: None,
            reader: LineReader::new(READ_BUF_SIZE),
            writer: LineWriter::new(WRITE_BUF_SIZE),
        }
    }

    #[inline]
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[inline]
    pub fn set_name(&mut self, name: &str) {
        self.name = Some(name.to_string());
    }

    #[inline]
    pub fn is_registered(&self) -> bool {
        self.name.is_some()
    }

    /// Pulls everything currently available off the socket.
    #[inline]
    pub fn fill(&mut self) -> NetResult<usize> {
        self.reader.ingress(&mut self.stream)
    }

    #[inline]
    pub fn next_line(&mut self) -> Option<String> {
        self.reader.next_line()
    }

    /// Queues one outbound message; the terminator is added by the writer.
    #[inline]
    pub fn queue_line(&mut self, text: &str) -> NetResult<()> {
        self.writer.push_line(text)
    }

    /// Drains the write buffer to the socket.
    #[inline]
    pub fn flush(&mut self) -> NetResult<usize> {
        self.writer.egress(&mut self.stream)
    }

    #[inline]
    pub(crate) fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }
}

/// A directed dialog request from `initiator` to `target`; `approved`
/// distinguishes a pending request from a live conversation.
pub struct Chat {
    pub id: ChatId,
    pub initiator: ClientId,
    pub target: ClientId,

    approved: bool,
}

impl Chat {
    #[inline]
    pub fn new(id: ChatId, initiator: ClientId, target: ClientId) -> Chat {
        Chat {
            id,
            initiator,
            target,
            approved: false,
        }
    }

    #[inline]
    pub fn is_approved(&self) -> bool {
        self.approved
    }

    #[inline]
    pub fn approve(&mut self) {
        self.approved = true;
    }

    #[inline]
    pub fn members(&self) -> [ClientId; 2] {
        [self.initiator, self.target]
    }

    #[inline]
    pub fn involves(&self, client: ClientId) -> bool {
        self.initiator == client || self.target == client
    }

    /// The member on the other side. Asking about a non-member is a
    /// programming error.
    pub fn second_member(&self, member: ClientId) -> ClientId {
        if member == self.initiator {
            self.target
        } else if member == self.target {
            self.initiator
        } else {
            panic!("Client {} is not a member of chat {}", member, self.id)
        }
    }
}
