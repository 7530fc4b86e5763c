//! # Error Definitions
//!
//! Everything an endpoint, a call or a server can fail with. Errors are
//! `Clone` so one close cause can be handed to every waiter on a connection.

#[derive(Debug, Clone)]
pub enum Error {
    /// The local side called `close()`.
    ClosedLocally,
    /// The counterpart announced it was closing.
    ClosedByCounterpart,
    /// `close()` was called on an endpoint that was already closing.
    AlreadyClosed,
    /// The counterpart broke the protocol (unknown service, function or slot).
    Protocol(String),
    /// Reading or writing the connection failed, including end of stream.
    Transport(String),
    /// A payload could not be encoded or decoded.
    Codec(varpack::Error),
    /// A packet header was malformed.
    Wire(varrpc::Error),
    /// The caller's context ended before a call slot was free.
    Cancelled(String),
    /// The server is shutting down and accepts nothing new.
    ServerClosed,
    /// Several endpoints failed to close cleanly.
    Multiple(Vec<Error>),
}

impl Error {
    /// Classifies a decode failure on the connection: a short read or I/O
    /// error is a transport failure, anything else is a codec error.
    pub fn from_stream(e: varpack::Error) -> Self {
        match e.root_cause() {
            varpack::Error::UnexpectedEnd => Self::Transport("connection closed mid-stream".into()),
            varpack::Error::Io { message, .. } => Self::Transport(message.clone()),
            _ => Self::Codec(e),
        }
    }

    /// Like `from_stream`, for a packet header.
    pub fn from_wire(e: varrpc::Error) -> Self {
        match e {
            varrpc::Error::Codec(inner) if inner.is_stream() => Self::from_stream(inner),
            other => Self::Wire(other),
        }
    }

    /// True for the causes that mean "this endpoint is gone".
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            Self::ClosedLocally | Self::ClosedByCounterpart | Self::Protocol(_) | Self::Transport(_) | Self::Wire(_)
        )
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClosedLocally => write!(f, "endpoint closed locally"),
            Self::ClosedByCounterpart => write!(f, "endpoint closed by counterpart"),
            Self::AlreadyClosed => write!(f, "endpoint already closed"),
            Self::Protocol(msg) => write!(f, "protocol error: {}", msg),
            Self::Transport(msg) => write!(f, "transport error: {}", msg),
            Self::Codec(e) => write!(f, "codec error: {}", e),
            Self::Wire(e) => write!(f, "wire error: {}", e),
            Self::Cancelled(cause) => write!(f, "call cancelled: {}", cause),
            Self::ServerClosed => write!(f, "server closed"),
            Self::Multiple(errors) => {
                write!(f, "{} errors:", errors.len())?;
                for e in errors {
                    write!(f, " [{}]", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Codec(e) => Some(e),
            Self::Wire(e) => Some(e),
            _ => None,
        }
    }
}

impl From<varpack::Error> for Error {
    fn from(e: varpack::Error) -> Self {
        Self::Codec(e)
    }
}

impl From<varrpc::Error> for Error {
    fn from(e: varrpc::Error) -> Self {
        Self::Wire(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
