#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;

use tokio_tungstenite::tungstenite;

use crate::error::{Error, Kind};

/// Transport failures of the gateway socket.
///
/// Every variant is local to one connection attempt: the session loop answers
/// them with the same reconnection logic as an abnormal close. Frames that fail
/// to decode are a [`DecodeError`](crate::gateway::payload::DecodeError) instead.
#[non_exhaustive]
#[derive(Debug)]
pub enum WsError {
    /// Opening, reading or writing the socket failed
    Connection(tungstenite::Error),
    /// The socket or the session loop behind it is gone
    ConnectionClosed,
    /// No `Hello` arrived within the configured timeout
    Timeout,
    /// No heartbeat acknowledgement arrived between two scheduled beats
    HeartbeatTimeout,
    /// The server sent a payload that is not valid in the current state
    InvalidMessage(String),
    /// An event stream fell behind the broadcast buffer
    Lagged {
        /// Events skipped
        count: u64,
    },
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "gateway socket error: {e}"),
            Self::ConnectionClosed => f.write_str("gateway connection closed"),
            Self::Timeout => f.write_str("timed out waiting for Hello"),
            Self::HeartbeatTimeout => f.write_str("heartbeat was not acknowledged"),
            Self::InvalidMessage(msg) => write!(f, "unexpected gateway payload: {msg}"),
            Self::Lagged { count } => write!(f, "event stream lagged, missed {count} events"),
        }
    }
}

impl StdError for WsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Connection(e) => Some(e),
            _ => None,
        }
    }
}

impl From<WsError> for Error {
    fn from(e: WsError) -> Self {
        Error::with_source(Kind::WebSocket, e)
    }
}

impl From<tungstenite::Error> for Error {
    fn from(e: tungstenite::Error) -> Self {
        WsError::Connection(e).into()
    }
}
