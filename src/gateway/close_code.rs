//! Close code → post-close action table.

use strum_macros::Display;

/// What the session loop does after the socket closes.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum PostCloseAction {
    /// The session is unrecoverable: surface a fatal error and stop
    Close,
    /// Keep `session_id`/`last_sequence`, reconnect and send `Resume`
    Resume,
    /// Discard the session, reconnect and send a fresh `Identify`
    Restart,
}

/// Gateway and RFC 6455 close codes the client knows how to react to.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CloseCode {
    Normal = 1000,
    GoingAway = 1001,
    Abnormal = 1006,
    UnknownError = 4000,
    UnknownOpcode = 4001,
    DecodeError = 4002,
    NotAuthenticated = 4003,
    AuthenticationFailed = 4004,
    AlreadyAuthenticated = 4005,
    InvalidSequence = 4007,
    RateLimited = 4008,
    SessionTimeout = 4009,
    InvalidShard = 4010,
    ShardingRequired = 4011,
    InvalidApiVersion = 4012,
}

impl CloseCode {
    #[must_use]
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            1000 => Some(Self::Normal),
            1001 => Some(Self::GoingAway),
            1006 => Some(Self::Abnormal),
            4000 => Some(Self::UnknownError),
            4001 => Some(Self::UnknownOpcode),
            4002 => Some(Self::DecodeError),
            4003 => Some(Self::NotAuthenticated),
            4004 => Some(Self::AuthenticationFailed),
            4005 => Some(Self::AlreadyAuthenticated),
            4007 => Some(Self::InvalidSequence),
            4008 => Some(Self::RateLimited),
            4009 => Some(Self::SessionTimeout),
            4010 => Some(Self::InvalidShard),
            4011 => Some(Self::ShardingRequired),
            4012 => Some(Self::InvalidApiVersion),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    #[must_use]
    pub const fn action(self) -> PostCloseAction {
        match self {
            Self::Normal
            | Self::AuthenticationFailed
            | Self::InvalidShard
            | Self::ShardingRequired
            | Self::InvalidApiVersion => PostCloseAction::Close,
            Self::GoingAway
            | Self::Abnormal
            | Self::NotAuthenticated
            | Self::InvalidSequence
            | Self::SessionTimeout => PostCloseAction::Restart,
            Self::UnknownError
            | Self::UnknownOpcode
            | Self::DecodeError
            | Self::AlreadyAuthenticated
            | Self::RateLimited => PostCloseAction::Resume,
        }
    }

    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Normal => "Normal closure",
            Self::GoingAway => "Going away",
            Self::Abnormal => "Abnormal closure",
            Self::UnknownError => "Unknown error",
            Self::UnknownOpcode => "Unknown opcode",
            Self::DecodeError => "Decode error",
            Self::NotAuthenticated => "Not authenticated",
            Self::AuthenticationFailed => "Authentication failed",
            Self::AlreadyAuthenticated => "Already authenticated",
            Self::InvalidSequence => "Invalid sequence",
            Self::RateLimited => "Rate limited",
            Self::SessionTimeout => "Session timed out",
            Self::InvalidShard => "Invalid shard",
            Self::ShardingRequired => "Sharding required",
            Self::InvalidApiVersion => "Invalid API version",
        }
    }
}

/// Map a raw close code (or its absence) to a [`PostCloseAction`].
///
/// Codes outside the table resume when there is a session to resume and restart otherwise.
#[must_use]
pub fn action_for(code: Option<u16>, has_session: bool) -> PostCloseAction {
    match code.and_then(CloseCode::from_u16) {
        Some(known) => known.action(),
        None if has_session => PostCloseAction::Resume,
        None => PostCloseAction::Restart,
    }
}
