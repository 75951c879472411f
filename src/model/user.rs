use bon::Builder;
use serde::{Deserialize, Serialize};

use super::{Record, assign};
use crate::types::Snowflake;

/// A user as known to the cache.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: Snowflake,
    pub username: String,
    /// Four-digit tag disambiguating equal usernames
    pub discriminator: String,
    /// Avatar hash
    pub avatar: Option<String>,
    pub bot: bool,
}

impl User {
    /// `username#discriminator`
    #[must_use]
    pub fn tag(&self) -> String {
        format!("{}#{}", self.username, self.discriminator)
    }
}

/// User object as sent by the gateway and REST API.
///
/// Presence updates carry only `id` plus whatever changed, so every other field is optional.
#[non_exhaustive]
#[derive(Debug, Clone, Deserialize, Serialize, Builder)]
pub struct UserPacket {
    pub id: Snowflake,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub discriminator: Option<String>,
    /// `Some(None)` clears the avatar, `None` leaves it unchanged
    #[serde(
        default,
        with = "::serde_with::rust::double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub avatar: Option<Option<String>>,
    #[serde(default)]
    pub bot: Option<bool>,
}

impl Record for User {
    type Packet = UserPacket;

    fn packet_id(packet: &UserPacket) -> Snowflake {
        packet.id
    }

    fn from_packet(packet: UserPacket) -> Self {
        Self {
            id: packet.id,
            username: packet.username.unwrap_or_default(),
            discriminator: packet.discriminator.unwrap_or_else(|| "0000".to_owned()),
            avatar: packet.avatar.flatten(),
            bot: packet.bot.unwrap_or_default(),
        }
    }

    fn merge(&mut self, packet: UserPacket) {
        assign(&mut self.username, packet.username);
        assign(&mut self.discriminator, packet.discriminator);
        assign(&mut self.avatar, packet.avatar);
        assign(&mut self.bot, packet.bot);
    }
}
