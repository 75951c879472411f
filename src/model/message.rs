use bon::Builder;
use serde::{Deserialize, Serialize};

use super::{Record, UserPacket, assign};
use crate::types::{DateTime, Snowflake, Utc};

/// A message, owned by exactly one channel's message store.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    pub guild_id: Option<Snowflake>,
    /// Resolved through the user store
    pub author_id: Snowflake,
    pub content: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub edited_timestamp: Option<DateTime<Utc>>,
    pub tts: bool,
    pub pinned: bool,
    pub mention_everyone: bool,
    /// Mentioned users, resolved through the user store
    pub mentions: Vec<Snowflake>,
    /// Raw message type (0 for regular messages)
    pub kind: u8,
}

/// Message object as sent in `MESSAGE_CREATE`, `MESSAGE_UPDATE` and REST responses.
///
/// `MESSAGE_UPDATE` may carry only `id`, `channel_id` and the changed fields.
#[non_exhaustive]
#[derive(Debug, Clone, Deserialize, Builder)]
pub struct MessagePacket {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    #[serde(default)]
    pub author: Option<UserPacket>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub edited_timestamp: Option<Option<DateTime<Utc>>>,
    #[serde(default)]
    pub tts: Option<bool>,
    #[serde(default)]
    pub pinned: Option<bool>,
    #[serde(default)]
    pub mention_everyone: Option<bool>,
    #[serde(default)]
    pub mentions: Option<Vec<UserPacket>>,
    #[serde(default, rename = "type")]
    pub kind: Option<u8>,
}

impl Record for Message {
    type Packet = MessagePacket;

    fn packet_id(packet: &MessagePacket) -> Snowflake {
        packet.id
    }

    fn from_packet(packet: MessagePacket) -> Self {
        Self {
            id: packet.id,
            channel_id: packet.channel_id,
            guild_id: packet.guild_id,
            author_id: packet.author.as_ref().map(|a| a.id).unwrap_or_default(),
            content: packet.content.unwrap_or_default(),
            timestamp: packet.timestamp,
            edited_timestamp: packet.edited_timestamp.flatten(),
            tts: packet.tts.unwrap_or_default(),
            pinned: packet.pinned.unwrap_or_default(),
            mention_everyone: packet.mention_everyone.unwrap_or_default(),
            mentions: packet
                .mentions
                .map(|users| users.iter().map(|u| u.id).collect())
                .unwrap_or_default(),
            kind: packet.kind.unwrap_or_default(),
        }
    }

    fn merge(&mut self, packet: MessagePacket) {
        if packet.guild_id.is_some() {
            self.guild_id = packet.guild_id;
        }
        if let Some(author) = &packet.author {
            self.author_id = author.id;
        }
        assign(&mut self.content, packet.content);
        if packet.timestamp.is_some() {
            self.timestamp = packet.timestamp;
        }
        assign(&mut self.edited_timestamp, packet.edited_timestamp);
        assign(&mut self.tts, packet.tts);
        assign(&mut self.pinned, packet.pinned);
        assign(&mut self.mention_everyone, packet.mention_everyone);
        if let Some(mentions) = packet.mentions {
            self.mentions = mentions.iter().map(|u| u.id).collect();
        }
        assign(&mut self.kind, packet.kind);
    }
}
