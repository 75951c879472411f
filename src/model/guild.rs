use std::collections::HashMap;

use bon::Builder;
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, PickFirst, serde_as};

use super::{Channel, ChannelPacket, Record, UserPacket, assign};
use crate::types::{DateTime, Snowflake, Utc};

/// A guild and every sub-record it exclusively owns.
///
/// Channels, roles, emojis and members live and die with the guild: removing the
/// guild from the cache drops all of them.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Guild {
    pub id: Snowflake,
    pub name: String,
    pub icon: Option<String>,
    pub owner_id: Snowflake,
    pub region: Option<String>,
    pub member_count: u64,
    /// Whether the guild is above the identify `large_threshold`
    pub large: bool,
    /// Set while the guild is in an outage
    pub unavailable: bool,
    pub channels: HashMap<Snowflake, Channel>,
    pub roles: HashMap<Snowflake, Role>,
    pub emojis: HashMap<Snowflake, Emoji>,
    /// Members keyed by user ID
    pub members: HashMap<Snowflake, Member>,
}

impl Guild {
    #[must_use]
    pub fn channel(&self, id: Snowflake) -> Option<&Channel> {
        self.channels.get(&id)
    }

    #[must_use]
    pub fn member(&self, user_id: Snowflake) -> Option<&Member> {
        self.members.get(&user_id)
    }

    #[must_use]
    pub fn role(&self, id: Snowflake) -> Option<&Role> {
        self.roles.get(&id)
    }

    pub(crate) fn insert_channel(&mut self, packet: ChannelPacket) -> Channel {
        let id = packet.id;
        let mut channel = match self.channels.remove(&id) {
            Some(mut existing) => {
                existing.merge(packet);
                existing
            }
            None => Channel::from_packet(packet),
        };
        channel.guild_id = Some(self.id);
        self.channels.insert(id, channel.clone());
        channel
    }

    pub(crate) fn replace_emojis(&mut self, emojis: Vec<Emoji>) {
        self.emojis = emojis
            .into_iter()
            .filter_map(|e| e.id.map(|id| (id, e)))
            .collect();
    }
}

/// Guild object as sent in `GUILD_CREATE`, `GUILD_UPDATE` and REST responses.
///
/// `GUILD_UPDATE` omits channels and members, which are then left untouched.
#[non_exhaustive]
#[derive(Debug, Clone, Deserialize, Builder)]
pub struct GuildPacket {
    pub id: Snowflake,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub icon: Option<Option<String>>,
    #[serde(default)]
    pub owner_id: Option<Snowflake>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub member_count: Option<u64>,
    #[serde(default)]
    pub large: Option<bool>,
    #[serde(default)]
    pub unavailable: Option<bool>,
    #[serde(default)]
    pub channels: Option<Vec<ChannelPacket>>,
    #[serde(default)]
    pub roles: Option<Vec<Role>>,
    #[serde(default)]
    pub emojis: Option<Vec<Emoji>>,
    #[serde(default)]
    pub members: Option<Vec<MemberPacket>>,
}

impl GuildPacket {
    /// A placeholder packet for a guild whose body has not arrived.
    #[must_use]
    pub fn unavailable(id: Snowflake) -> Self {
        Self::builder().id(id).unavailable(true).build()
    }
}

impl Record for Guild {
    type Packet = GuildPacket;

    fn packet_id(packet: &GuildPacket) -> Snowflake {
        packet.id
    }

    fn from_packet(packet: GuildPacket) -> Self {
        let mut guild = Self {
            id: packet.id,
            name: String::new(),
            icon: None,
            owner_id: Snowflake::default(),
            region: None,
            member_count: 0,
            large: false,
            unavailable: false,
            channels: HashMap::new(),
            roles: HashMap::new(),
            emojis: HashMap::new(),
            members: HashMap::new(),
        };
        guild.merge(packet);
        guild
    }

    fn merge(&mut self, packet: GuildPacket) {
        assign(&mut self.name, packet.name);
        assign(&mut self.icon, packet.icon);
        assign(&mut self.owner_id, packet.owner_id);
        if packet.region.is_some() {
            self.region = packet.region;
        }
        assign(&mut self.member_count, packet.member_count);
        assign(&mut self.large, packet.large);
        assign(&mut self.unavailable, packet.unavailable);

        if let Some(channels) = packet.channels {
            self.channels.clear();
            for channel in channels {
                self.insert_channel(channel);
            }
        }
        if let Some(roles) = packet.roles {
            self.roles = roles.into_iter().map(|r| (r.id, r)).collect();
        }
        if let Some(emojis) = packet.emojis {
            self.replace_emojis(emojis);
        }
        if let Some(members) = packet.members {
            self.members = members
                .into_iter()
                .map(|m| (m.user.id, Member::from_packet(m)))
                .collect();
        }
    }
}

/// A user's membership in one guild.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Member {
    /// Resolved through the user store
    pub user_id: Snowflake,
    pub nick: Option<String>,
    pub roles: Vec<Snowflake>,
    pub joined_at: Option<DateTime<Utc>>,
}

/// Member object; the embedded user is pulled into the user store separately.
#[non_exhaustive]
#[derive(Debug, Clone, Deserialize, Builder)]
pub struct MemberPacket {
    pub user: UserPacket,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub nick: Option<Option<String>>,
    #[serde(default)]
    pub roles: Option<Vec<Snowflake>>,
    #[serde(default)]
    pub joined_at: Option<DateTime<Utc>>,
}

impl Record for Member {
    type Packet = MemberPacket;

    fn packet_id(packet: &MemberPacket) -> Snowflake {
        packet.user.id
    }

    fn from_packet(packet: MemberPacket) -> Self {
        Self {
            user_id: packet.user.id,
            nick: packet.nick.flatten(),
            roles: packet.roles.unwrap_or_default(),
            joined_at: packet.joined_at,
        }
    }

    fn merge(&mut self, packet: MemberPacket) {
        assign(&mut self.nick, packet.nick);
        assign(&mut self.roles, packet.roles);
        if packet.joined_at.is_some() {
            self.joined_at = packet.joined_at;
        }
    }
}

/// Role object; always sent whole, so it is its own packet.
#[non_exhaustive]
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Builder)]
pub struct Role {
    pub id: Snowflake,
    pub name: String,
    #[serde(default)]
    #[builder(default)]
    pub color: u32,
    #[serde(default)]
    #[builder(default)]
    pub position: i64,
    /// Permission bit set, sent as a number or a decimal string
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    #[serde(default)]
    #[builder(default)]
    pub permissions: u64,
    #[serde(default)]
    #[builder(default)]
    pub hoist: bool,
    #[serde(default)]
    #[builder(default)]
    pub mentionable: bool,
}

/// Custom guild emoji.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Builder)]
pub struct Emoji {
    /// `None` for unicode emojis in reactions
    #[serde(default)]
    pub id: Option<Snowflake>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    #[builder(default)]
    pub roles: Vec<Snowflake>,
    #[serde(default)]
    #[builder(default)]
    pub animated: bool,
    #[serde(default)]
    #[builder(default)]
    pub require_colons: bool,
}
