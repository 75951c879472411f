//! Session state, kept free of I/O so every transition can be tested directly.
//!
//! [`SessionState`] is the single owner of the session ID and the last sequence
//! number. The connection loop feeds it what arrives on the socket and acts on
//! what it answers.

use std::time::Duration;

use secrecy::SecretString;

use super::close_code::{PostCloseAction, action_for};
use super::payload::{Identify, Payload, Resume};

/// Where the session stands. Published to callers through a watch channel.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum Status {
    #[default]
    Disconnected,
    /// Opening the socket
    Connecting,
    /// Socket open, waiting for `Hello`
    AwaitingHello,
    /// `Identify` sent, waiting for `READY`
    Identifying,
    /// `Resume` sent, waiting for `RESUMED`
    Resuming,
    Live,
    /// Caller asked to disconnect; waiting for the close handshake
    Closing,
}

impl Status {
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Live)
    }
}

/// How to establish the session on a freshly opened socket.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handshake {
    Identify,
    Resume { session_id: String, sequence: u64 },
}

impl Handshake {
    /// Build the payload to send, given the identify template holding the token.
    #[must_use]
    pub fn payload(&self, identify: &Identify) -> Payload {
        match self {
            Self::Identify => Payload::Identify(identify.clone()),
            Self::Resume {
                session_id,
                sequence,
            } => Payload::Resume(Resume::new(
                SecretString::clone(&identify.token),
                session_id.clone(),
                *sequence,
            )),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionState {
    session_id: Option<String>,
    /// `None` until the first dispatch of the session
    last_sequence: Option<u64>,
    heartbeat_interval: Option<Duration>,
    status: Status,
}

impl SessionState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    #[must_use]
    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.status
    }

    pub fn set_status(&mut self, status: Status) {
        self.status = status;
    }

    /// Record the heartbeat interval and pick the handshake.
    ///
    /// Resumes when a session ID is held, identifies otherwise.
    pub fn on_hello(&mut self, heartbeat_interval_ms: u64) -> Handshake {
        self.heartbeat_interval = Some(Duration::from_millis(heartbeat_interval_ms));

        if let Some(session_id) = &self.session_id {
            self.status = Status::Resuming;
            Handshake::Resume {
                session_id: session_id.clone(),
                sequence: self.last_sequence.unwrap_or_default(),
            }
        } else {
            self.status = Status::Identifying;
            Handshake::Identify
        }
    }

    /// Track the highest sequence number seen. Lower numbers are ignored.
    pub fn on_dispatch(&mut self, sequence: u64) {
        self.last_sequence = Some(self.last_sequence.map_or(sequence, |last| last.max(sequence)));
    }

    /// A fresh session is live.
    pub fn on_ready(&mut self, session_id: String) {
        self.session_id = Some(session_id);
        self.status = Status::Live;
    }

    /// The resumed session is live again.
    pub fn on_resumed(&mut self) {
        self.status = Status::Live;
    }

    /// Pick what to do after the socket closed with `code`, forgetting the session
    /// unless it is going to be resumed.
    pub fn on_close(&mut self, code: Option<u16>) -> PostCloseAction {
        let action = action_for(code, self.session_id.is_some());
        self.after(action)
    }

    /// The heartbeat went unacknowledged. The server has not invalidated the
    /// session, so it is resumed when there is one.
    pub fn on_heartbeat_death(&mut self) -> PostCloseAction {
        let action = if self.session_id.is_some() {
            PostCloseAction::Resume
        } else {
            PostCloseAction::Restart
        };
        self.after(action)
    }

    /// The server asked for a reconnect (op 7).
    pub fn on_reconnect(&mut self) -> PostCloseAction {
        self.on_heartbeat_death()
    }

    /// The server invalidated the session (op 9). Answers the handshake to send
    /// on the same socket.
    pub fn on_invalid_session(&mut self, resumable: bool) -> Handshake {
        if !resumable {
            self.forget();
        }

        if let Some(session_id) = &self.session_id {
            self.status = Status::Resuming;
            Handshake::Resume {
                session_id: session_id.clone(),
                sequence: self.last_sequence.unwrap_or_default(),
            }
        } else {
            self.status = Status::Identifying;
            Handshake::Identify
        }
    }

    fn after(&mut self, action: PostCloseAction) -> PostCloseAction {
        if action != PostCloseAction::Resume {
            self.forget();
        }
        self.status = Status::Disconnected;
        action
    }

    fn forget(&mut self) {
        self.session_id = None;
        self.last_sequence = None;
    }
}
