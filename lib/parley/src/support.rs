use std::io;

pub type NetResult<T> = Result<T, NetError>;

/// Outcome of a non-blocking socket operation. `Wait` means the operation
/// would block and should be retried once the socket reports readiness;
/// everything else is fatal for the connection it happened on.
#[derive(Debug, Eq, PartialEq)]
pub enum NetError {
    Wait,
    Fatal(ErrorType),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorType {
    /// Orderly shutdown by the peer (zero-byte read).
    Closed,
    /// A line or a backlog of unsent replies outgrew its buffer.
    Overflow,
    Io(io::ErrorKind),
}

impl From<io::Error> for NetError {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::WouldBlock => NetError::Wait,
            io::ErrorKind::Interrupted => NetError::Wait,
            kind => NetError::Fatal(ErrorType::Io(kind)),
        }
    }
}

/// Failures that take the whole server down rather than a single connection.
#[derive(Debug)]
pub enum RelayError {
    Io(io::Error),
    Addr(String),
}

impl From<io::Error> for RelayError {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        RelayError::Io(io_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_would_block_maps_to_wait() {
        let err: NetError = io::Error::from(io::ErrorKind::WouldBlock).into();
        assert_eq!(err, NetError::Wait);
    }

    #[test]
    fn test_interrupted_maps_to_wait() {
        let err: NetError = io::Error::from(io::ErrorKind::Interrupted).into();
        assert_eq!(err, NetError::Wait);
    }

    #[test]
    fn test_reset_is_fatal() {
        let err: NetError = io::Error::from(io::ErrorKind::ConnectionReset).into();
        assert_eq!(
            err,
            NetError::Fatal(ErrorType::Io(io::ErrorKind::ConnectionReset))
        );
    }
}
