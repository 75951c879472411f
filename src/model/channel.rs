use bon::Builder;
use serde::{Deserialize, Serialize};

use super::{Record, UserPacket, assign};
use crate::types::Snowflake;

/// Channel type as carried in the `type` field.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(from = "u8", into = "u8")]
pub enum ChannelKind {
    GuildText,
    Dm,
    GuildVoice,
    GroupDm,
    GuildCategory,
    GuildNews,
    GuildStore,
    /// A channel type this crate does not know yet (captures the raw value)
    Unknown(u8),
}

impl ChannelKind {
    /// Whether channels of this kind belong to a guild rather than to the cache root.
    #[must_use]
    pub const fn is_guild(self) -> bool {
        !matches!(self, Self::Dm | Self::GroupDm)
    }
}

impl From<u8> for ChannelKind {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::GuildText,
            1 => Self::Dm,
            2 => Self::GuildVoice,
            3 => Self::GroupDm,
            4 => Self::GuildCategory,
            5 => Self::GuildNews,
            6 => Self::GuildStore,
            other => Self::Unknown(other),
        }
    }
}

impl From<ChannelKind> for u8 {
    fn from(kind: ChannelKind) -> Self {
        match kind {
            ChannelKind::GuildText => 0,
            ChannelKind::Dm => 1,
            ChannelKind::GuildVoice => 2,
            ChannelKind::GroupDm => 3,
            ChannelKind::GuildCategory => 4,
            ChannelKind::GuildNews => 5,
            ChannelKind::GuildStore => 6,
            ChannelKind::Unknown(other) => other,
        }
    }
}

/// A channel, either owned by a guild or a direct-message channel owned by the cache root.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Channel {
    pub id: Snowflake,
    pub kind: ChannelKind,
    /// Owning guild; `None` for direct-message channels
    pub guild_id: Option<Snowflake>,
    pub name: Option<String>,
    pub topic: Option<String>,
    pub position: Option<i64>,
    pub nsfw: bool,
    pub last_message_id: Option<Snowflake>,
    /// Direct-message participants, resolved through the user store
    pub recipients: Vec<Snowflake>,
}

impl Channel {
    #[must_use]
    pub const fn is_dm(&self) -> bool {
        !self.kind.is_guild()
    }
}

/// Channel object as sent by the gateway and REST API.
#[non_exhaustive]
#[derive(Debug, Clone, Deserialize, Serialize, Builder)]
pub struct ChannelPacket {
    pub id: Snowflake,
    #[serde(rename = "type")]
    pub kind: ChannelKind,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(
        default,
        with = "::serde_with::rust::double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub topic: Option<Option<String>>,
    #[serde(default)]
    pub position: Option<i64>,
    #[serde(default)]
    pub nsfw: Option<bool>,
    #[serde(
        default,
        with = "::serde_with::rust::double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_message_id: Option<Option<Snowflake>>,
    #[serde(default)]
    pub recipients: Option<Vec<UserPacket>>,
}

impl Record for Channel {
    type Packet = ChannelPacket;

    fn packet_id(packet: &ChannelPacket) -> Snowflake {
        packet.id
    }

    fn from_packet(packet: ChannelPacket) -> Self {
        Self {
            id: packet.id,
            kind: packet.kind,
            guild_id: packet.guild_id,
            name: packet.name,
            topic: packet.topic.flatten(),
            position: packet.position,
            nsfw: packet.nsfw.unwrap_or_default(),
            last_message_id: packet.last_message_id.flatten(),
            recipients: packet
                .recipients
                .map(|users| users.iter().map(|u| u.id).collect())
                .unwrap_or_default(),
        }
    }

    fn merge(&mut self, packet: ChannelPacket) {
        self.kind = packet.kind;
        if packet.guild_id.is_some() {
            self.guild_id = packet.guild_id;
        }
        if packet.name.is_some() {
            self.name = packet.name;
        }
        assign(&mut self.topic, packet.topic);
        if packet.position.is_some() {
            self.position = packet.position;
        }
        assign(&mut self.nsfw, packet.nsfw);
        assign(&mut self.last_message_id, packet.last_message_id);
        if let Some(recipients) = packet.recipients {
            self.recipients = recipients.iter().map(|u| u.id).collect();
        }
    }
}
