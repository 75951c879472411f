//! Dispatch events, tagged by the `t` field of an op 0 frame.
//!
//! Decoding goes through a static lookup table from event name to decoder, so
//! adding an event is one variant plus one table row. Names missing from the
//! table decode to [`Dispatch::Unknown`] rather than failing.

use phf::phf_map;
use serde::Deserialize;
use serde_json::Value;

use super::payload::{Activity, DecodeError};
use crate::model::{
    ChannelPacket, Emoji, GuildPacket, MemberPacket, MessagePacket, Role, UserPacket,
};
use crate::types::Snowflake;

type Decoder = fn(Value) -> serde_json::Result<Dispatch>;

macro_rules! decoder {
    ($variant:ident) => {{
        fn decode(data: Value) -> serde_json::Result<Dispatch> {
            serde_json::from_value(data).map(Dispatch::$variant)
        }
        decode as Decoder
    }};
}

static DECODERS: phf::Map<&'static str, Decoder> = phf_map! {
    "READY" => decoder!(Ready),
    "RESUMED" => decoder!(Resumed),
    "GUILD_CREATE" => decoder!(GuildCreate),
    "GUILD_UPDATE" => decoder!(GuildUpdate),
    "GUILD_DELETE" => decoder!(GuildDelete),
    "GUILD_BAN_ADD" => decoder!(GuildBanAdd),
    "GUILD_BAN_REMOVE" => decoder!(GuildBanRemove),
    "GUILD_EMOJIS_UPDATE" => decoder!(GuildEmojisUpdate),
    "GUILD_MEMBER_ADD" => decoder!(GuildMemberAdd),
    "GUILD_MEMBER_UPDATE" => decoder!(GuildMemberUpdate),
    "GUILD_MEMBER_REMOVE" => decoder!(GuildMemberRemove),
    "GUILD_ROLE_CREATE" => decoder!(GuildRoleCreate),
    "GUILD_ROLE_UPDATE" => decoder!(GuildRoleUpdate),
    "GUILD_ROLE_DELETE" => decoder!(GuildRoleDelete),
    "CHANNEL_CREATE" => decoder!(ChannelCreate),
    "CHANNEL_UPDATE" => decoder!(ChannelUpdate),
    "CHANNEL_DELETE" => decoder!(ChannelDelete),
    "MESSAGE_CREATE" => decoder!(MessageCreate),
    "MESSAGE_UPDATE" => decoder!(MessageUpdate),
    "MESSAGE_DELETE" => decoder!(MessageDelete),
    "MESSAGE_DELETE_BULK" => decoder!(MessageDeleteBulk),
    "MESSAGE_REACTION_ADD" => decoder!(MessageReactionAdd),
    "MESSAGE_REACTION_REMOVE" => decoder!(MessageReactionRemove),
    "TYPING_START" => decoder!(TypingStart),
    "PRESENCE_UPDATE" => decoder!(PresenceUpdate),
    "USER_UPDATE" => decoder!(UserUpdate),
};

/// A server event, before it has been applied to the cache.
#[non_exhaustive]
#[derive(Debug, Clone, strum_macros::IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Dispatch {
    Ready(Box<Ready>),
    Resumed(Resumed),
    GuildCreate(Box<GuildPacket>),
    GuildUpdate(Box<GuildPacket>),
    GuildDelete(UnavailableGuild),
    GuildBanAdd(GuildUser),
    GuildBanRemove(GuildUser),
    GuildEmojisUpdate(GuildEmojisUpdate),
    GuildMemberAdd(GuildMember),
    GuildMemberUpdate(GuildMember),
    GuildMemberRemove(GuildUser),
    GuildRoleCreate(GuildRole),
    GuildRoleUpdate(GuildRole),
    GuildRoleDelete(GuildRoleDelete),
    ChannelCreate(Box<ChannelPacket>),
    ChannelUpdate(Box<ChannelPacket>),
    ChannelDelete(Box<ChannelPacket>),
    MessageCreate(Box<MessagePacket>),
    MessageUpdate(Box<MessagePacket>),
    MessageDelete(MessageDelete),
    MessageDeleteBulk(MessageDeleteBulk),
    MessageReactionAdd(Reaction),
    MessageReactionRemove(Reaction),
    TypingStart(TypingStart),
    PresenceUpdate(Box<PresenceUpdate>),
    UserUpdate(UserPacket),
    /// An event this crate has no shape for
    Unknown { name: String, data: Value },
}

impl Dispatch {
    /// Decode the `d` field of a dispatch named `name`.
    pub fn decode(name: &str, data: Value) -> Result<Self, DecodeError> {
        match DECODERS.get(name) {
            Some(decode) => decode(data).map_err(|source| DecodeError::InvalidData {
                what: name.to_owned(),
                source,
            }),
            None => Ok(Self::Unknown {
                name: name.to_owned(),
                data,
            }),
        }
    }

    /// The wire event name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Unknown { name, .. } => name,
            known => known.into(),
        }
    }
}

#[non_exhaustive]
#[derive(Debug, Clone, Deserialize)]
pub struct Ready {
    /// Gateway protocol version
    pub v: u8,
    pub user: UserPacket,
    #[serde(default)]
    pub private_channels: Vec<ChannelPacket>,
    /// Guilds the session will deliver through `GUILD_CREATE`
    pub guilds: Vec<UnavailableGuild>,
    pub session_id: String,
}

#[non_exhaustive]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Resumed {
    #[serde(default, rename = "_trace")]
    pub trace: Vec<String>,
}

/// A guild known only by ID, as listed in `READY` and sent in `GUILD_DELETE`.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct UnavailableGuild {
    pub id: Snowflake,
    /// `true` for an outage, absent when the user left or was removed
    #[serde(default)]
    pub unavailable: Option<bool>,
}

impl UnavailableGuild {
    #[must_use]
    pub fn is_outage(&self) -> bool {
        self.unavailable.unwrap_or_default()
    }
}

/// Bans and member removals.
#[non_exhaustive]
#[derive(Debug, Clone, Deserialize)]
pub struct GuildUser {
    pub guild_id: Snowflake,
    pub user: UserPacket,
}

#[non_exhaustive]
#[derive(Debug, Clone, Deserialize)]
pub struct GuildEmojisUpdate {
    pub guild_id: Snowflake,
    pub emojis: Vec<Emoji>,
}

/// Member additions and updates.
#[non_exhaustive]
#[derive(Debug, Clone, Deserialize)]
pub struct GuildMember {
    pub guild_id: Snowflake,
    #[serde(flatten)]
    pub member: MemberPacket,
}

#[non_exhaustive]
#[derive(Debug, Clone, Deserialize)]
pub struct GuildRole {
    pub guild_id: Snowflake,
    pub role: Role,
}

#[non_exhaustive]
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct GuildRoleDelete {
    pub guild_id: Snowflake,
    pub role_id: Snowflake,
}

#[non_exhaustive]
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct MessageDelete {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
}

#[non_exhaustive]
#[derive(Debug, Clone, Deserialize)]
pub struct MessageDeleteBulk {
    pub ids: Vec<Snowflake>,
    pub channel_id: Snowflake,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Reaction {
    pub user_id: Snowflake,
    pub channel_id: Snowflake,
    pub message_id: Snowflake,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    pub emoji: Emoji,
}

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TypingStart {
    pub channel_id: Snowflake,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    pub user_id: Snowflake,
    /// Unix time in seconds
    pub timestamp: u64,
}

#[non_exhaustive]
#[derive(Debug, Clone, Deserialize)]
pub struct PresenceUpdate {
    /// Only `id` is guaranteed; other fields are present when they changed
    pub user: UserPacket,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub roles: Option<Vec<Snowflake>>,
    #[serde(default)]
    pub game: Option<Activity>,
}
