use serde_repr::{Deserialize_repr, Serialize_repr};

/// Gateway operation codes carried in the `op` field of every frame.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum OpCode {
    /// Server dispatches an event (server only)
    Dispatch = 0,
    /// Liveness ping (client and server)
    Heartbeat = 1,
    /// Start a new session (client only)
    Identify = 2,
    /// Update the client's presence (client only)
    StatusUpdate = 3,
    /// Join or move voice channels (client only, unused by this crate)
    VoiceStateUpdate = 4,
    /// Replay a dropped session (client only)
    Resume = 6,
    /// Server asks the client to reconnect and resume (server only)
    Reconnect = 7,
    /// Request offline members of a large guild (client only)
    RequestGuildMembers = 8,
    /// The session is no longer valid (server only)
    InvalidSession = 9,
    /// First frame of every connection (server only)
    Hello = 10,
    /// Heartbeat acknowledged (server only)
    HeartbeatAck = 11,
}

impl OpCode {
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Dispatch),
            1 => Some(Self::Heartbeat),
            2 => Some(Self::Identify),
            3 => Some(Self::StatusUpdate),
            4 => Some(Self::VoiceStateUpdate),
            6 => Some(Self::Resume),
            7 => Some(Self::Reconnect),
            8 => Some(Self::RequestGuildMembers),
            9 => Some(Self::InvalidSession),
            10 => Some(Self::Hello),
            11 => Some(Self::HeartbeatAck),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}
