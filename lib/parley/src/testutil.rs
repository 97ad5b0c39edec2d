use crate::logging;
use crate::scheduler::Scheduler;
use crate::server::Relay;
use mio::net::{TcpListener, TcpStream};
use std::io::{BufRead, BufReader};
use std::net::SocketAddr;
use std::time::Duration;

pub fn discard_logger() -> logging::Logger {
    logging::Logger::root(logging::Discard, logging::o!())
}

/// A connected non-blocking stream (server side) plus its blocking peer end.
pub fn loopback_client() -> (TcpStream, std::net::TcpStream, SocketAddr) {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let peer = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let (accepted, address) = listener.accept().unwrap();

    accepted.set_nonblocking(true).unwrap();

    (TcpStream::from_std(accepted), peer, address)
}

/// A scheduler and a relay wired to the same poll, on an ephemeral port.
pub fn test_rig() -> (Scheduler, Relay) {
    let log = discard_logger();

    let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let scheduler = Scheduler::new(log.clone()).unwrap();
    let relay = Relay::new(listener, scheduler.registry().unwrap(), log).unwrap();

    (scheduler, relay)
}

/// Reads exactly `count` newline-terminated messages off a peer socket.
pub fn read_lines(peer: &mut std::net::TcpStream, count: usize) -> Vec<String> {
    peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    let mut reader = BufReader::new(peer);
    let mut lines = Vec::new();

    for _ in 0..count {
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert!(
            line.ends_with('\n'),
            "Message missing its terminator: {:?}",
            line
        );
        line.pop();
        lines.push(line);
    }

    lines
}
