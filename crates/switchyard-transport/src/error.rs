use std::io;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] io::Error),

    /// Binding the listening socket failed.
    #[error("bind failed: {0}")]
    BindFailed(#[source] io::Error),

    /// Accepting a connection failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] io::Error),

    /// Dialing a remote peer failed.
    #[error("connect to {addr} failed: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// A peer announced a frame larger than [`MAX_FRAME_LEN`](crate::MAX_FRAME_LEN).
    #[error("frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),

    /// The listener was closed through its [`ListenerCloser`](crate::ListenerCloser).
    #[error("transport shut down")]
    Shutdown,
}

impl TransportError {
    /// Returns `true` if the accept loop should back off and retry instead
    /// of giving up.
    ///
    /// Only accept failures qualify. Aborted handshakes, interrupted calls
    /// and descriptor exhaustion clear up on their own; a closed listener
    /// or any other error does not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::AcceptFailed(e) => is_transient_io(e),
            _ => false,
        }
    }
}

/// EMFILE / ENFILE: out of file descriptors, process-wide or system-wide.
#[cfg(unix)]
const DESCRIPTOR_EXHAUSTION: [i32; 2] = [24, 23];
#[cfg(not(unix))]
const DESCRIPTOR_EXHAUSTION: [i32; 0] = [];

fn is_transient_io(e: &io::Error) -> bool {
    if let Some(code) = e.raw_os_error() {
        if DESCRIPTOR_EXHAUSTION.contains(&code) {
            return true;
        }
    }
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_transient_aborted_accept_returns_true() {
        let err = TransportError::AcceptFailed(io::Error::from(
            io::ErrorKind::ConnectionAborted,
        ));
        assert!(err.is_transient());
    }

    #[test]
    fn test_is_transient_permission_denied_returns_false() {
        let err = TransportError::AcceptFailed(io::Error::from(
            io::ErrorKind::PermissionDenied,
        ));
        assert!(!err.is_transient());
    }

    #[cfg(unix)]
    #[test]
    fn test_is_transient_descriptor_exhaustion_returns_true() {
        let err = TransportError::AcceptFailed(io::Error::from_raw_os_error(24));
        assert!(err.is_transient());
    }

    #[test]
    fn test_is_transient_shutdown_returns_false() {
        assert!(!TransportError::Shutdown.is_transient());
    }

    #[test]
    fn test_is_transient_only_applies_to_accept() {
        // A reset on an established stream is the session's problem,
        // not a reason to keep the accept loop alive.
        let err = TransportError::ReceiveFailed(io::Error::from(
            io::ErrorKind::ConnectionReset,
        ));
        assert!(!err.is_transient());
    }
}
