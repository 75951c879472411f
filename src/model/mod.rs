//! Cached entity records and the wire packets they are built from.
//!
//! Records never hold references to one another. Cross-references (a message's
//! channel, a channel's guild, a member's user) are plain [`Snowflake`]s resolved
//! through the [`Cache`](crate::cache::Cache) at read time, so an evicted or
//! deleted entity can never be reached through a stale pointer.

pub mod channel;
pub mod guild;
pub mod message;
pub mod user;

pub use channel::{Channel, ChannelKind, ChannelPacket};
pub use guild::{Emoji, Guild, GuildPacket, Member, MemberPacket, Role};
pub use message::{Message, MessagePacket};
pub use user::{User, UserPacket};

use crate::types::Snowflake;

/// A cached entity that can be created from, and updated by, its wire packet.
///
/// `merge` applies only the fields present in the packet, so applying the same
/// packet twice yields the same record as applying it once.
pub trait Record: Clone + Send + Sync + 'static {
    /// The wire shape that both creates and updates this record
    type Packet;

    /// Identifier the packet refers to.
    fn packet_id(packet: &Self::Packet) -> Snowflake;

    /// Build a new record from a packet, defaulting absent fields.
    fn from_packet(packet: Self::Packet) -> Self;

    /// Apply the fields present in `packet` to this record.
    fn merge(&mut self, packet: Self::Packet);
}

/// Overwrite `target` when the packet carried a value.
pub(crate) fn assign<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}
