//! Domain events delivered to listeners and event streams.
//!
//! An [`Event`] is what a [`Dispatch`](crate::gateway::Dispatch) becomes after it
//! has been applied to the [`Cache`]: records are resolved, and update events
//! carry the cached state from before the change.

pub mod translate;

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bitflags::bitflags;
use serde_json::Value;

pub use translate::translate;

use crate::cache::Cache;
use crate::error::{Error, Kind};
use crate::gateway::dispatch::{Reaction, TypingStart};
use crate::gateway::payload::Activity;
use crate::model::{Channel, Emoji, Guild, Member, Message, Role, User};
use crate::types::Snowflake;

#[non_exhaustive]
#[derive(Debug, Clone, strum_macros::EnumDiscriminants)]
#[strum_discriminants(name(EventKind), derive(Hash, strum_macros::Display))]
pub enum Event {
    /// The session is established; listed guilds arrive later through `GuildAvailable`
    Ready {
        user: Arc<User>,
        guilds: Vec<Snowflake>,
        session_id: String,
    },
    Resumed,
    /// A guild listed in `Ready`, or back from an outage, is now resolved
    GuildAvailable(Arc<Guild>),
    /// The client joined a new guild
    GuildJoin(Arc<Guild>),
    GuildUpdate {
        before: Arc<Guild>,
        after: Arc<Guild>,
    },
    /// The guild is in an outage and pending again
    GuildUnavailable {
        id: Snowflake,
    },
    /// The client left or was removed from the guild
    GuildRemove {
        id: Snowflake,
        guild: Option<Arc<Guild>>,
    },
    Ban {
        guild_id: Snowflake,
        user: Arc<User>,
    },
    Unban {
        guild_id: Snowflake,
        user: Arc<User>,
    },
    EmojisUpdate {
        guild_id: Snowflake,
        before: HashMap<Snowflake, Emoji>,
        after: HashMap<Snowflake, Emoji>,
    },
    MemberJoin {
        guild_id: Snowflake,
        user: Arc<User>,
        member: Member,
    },
    MemberUpdate {
        guild_id: Snowflake,
        before: Option<Member>,
        after: Member,
    },
    MemberLeave {
        guild_id: Snowflake,
        user: Arc<User>,
        member: Option<Member>,
    },
    RoleCreate {
        guild_id: Snowflake,
        role: Role,
    },
    RoleUpdate {
        guild_id: Snowflake,
        before: Option<Role>,
        after: Role,
    },
    RoleDelete {
        guild_id: Snowflake,
        role_id: Snowflake,
        role: Option<Role>,
    },
    ChannelCreate(Channel),
    ChannelUpdate {
        before: Option<Channel>,
        after: Channel,
    },
    ChannelDelete(Channel),
    MessageCreate(Arc<Message>),
    /// `after` is `None` when the edited message was not cached
    MessageUpdate {
        channel_id: Snowflake,
        message_id: Snowflake,
        before: Option<Arc<Message>>,
        after: Option<Arc<Message>>,
    },
    MessageDelete {
        channel_id: Snowflake,
        message_id: Snowflake,
        message: Option<Arc<Message>>,
    },
    MessageDeleteBulk {
        channel_id: Snowflake,
        message_ids: Vec<Snowflake>,
        /// The deleted messages that were cached
        messages: Vec<Arc<Message>>,
    },
    ReactionAdd(Reaction),
    ReactionRemove(Reaction),
    TypingStart(TypingStart),
    PresenceUpdate {
        user: Arc<User>,
        guild_id: Option<Snowflake>,
        status: Option<String>,
        game: Option<Activity>,
    },
    /// The current user changed
    UserUpdate {
        before: Option<Arc<User>>,
        after: Arc<User>,
    },
    /// A dispatch this crate has no shape for, passed through untouched
    Unknown {
        name: String,
        data: Value,
    },
}

impl Event {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.into()
    }

    /// The interest flag a listener needs to receive this event.
    #[must_use]
    pub fn interest(&self) -> Interest {
        Interest::from_kind(self.kind())
    }
}

bitflags! {
    /// Event categories a [`Listener`] wants to receive.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Interest: u32 {
        const NONE = 0;

        /// `Ready` and `Resumed`
        const SESSION = 1;

        /// Guild lifecycle and guild-level updates, including emojis
        const GUILD = 1 << 1;

        /// Bans and unbans
        const MODERATION = 1 << 2;

        const MEMBER = 1 << 3;

        const ROLE = 1 << 4;

        const CHANNEL = 1 << 5;

        const MESSAGE = 1 << 6;

        const REACTION = 1 << 7;

        const TYPING = 1 << 8;

        const PRESENCE = 1 << 9;

        /// Changes to the current user
        const USER = 1 << 10;

        /// Dispatches without a known shape
        const UNKNOWN = 1 << 11;

        /// Everything guild-scoped
        const GUILDS = Self::GUILD.bits()
            | Self::MODERATION.bits()
            | Self::MEMBER.bits()
            | Self::ROLE.bits()
            | Self::CHANNEL.bits();

        const ALL = Self::SESSION.bits()
            | Self::GUILDS.bits()
            | Self::MESSAGE.bits()
            | Self::REACTION.bits()
            | Self::TYPING.bits()
            | Self::PRESENCE.bits()
            | Self::USER.bits()
            | Self::UNKNOWN.bits();
    }
}

impl Interest {
    #[must_use]
    pub fn from_kind(kind: EventKind) -> Self {
        match kind {
            EventKind::Ready | EventKind::Resumed => Self::SESSION,
            EventKind::GuildAvailable
            | EventKind::GuildJoin
            | EventKind::GuildUpdate
            | EventKind::GuildUnavailable
            | EventKind::GuildRemove
            | EventKind::EmojisUpdate => Self::GUILD,
            EventKind::Ban | EventKind::Unban => Self::MODERATION,
            EventKind::MemberJoin | EventKind::MemberUpdate | EventKind::MemberLeave => {
                Self::MEMBER
            }
            EventKind::RoleCreate | EventKind::RoleUpdate | EventKind::RoleDelete => Self::ROLE,
            EventKind::ChannelCreate | EventKind::ChannelUpdate | EventKind::ChannelDelete => {
                Self::CHANNEL
            }
            EventKind::MessageCreate
            | EventKind::MessageUpdate
            | EventKind::MessageDelete
            | EventKind::MessageDeleteBulk => Self::MESSAGE,
            EventKind::ReactionAdd | EventKind::ReactionRemove => Self::REACTION,
            EventKind::TypingStart => Self::TYPING,
            EventKind::PresenceUpdate => Self::PRESENCE,
            EventKind::UserUpdate => Self::USER,
            EventKind::Unknown => Self::UNKNOWN,
        }
    }

    #[must_use]
    pub fn wants(self, event: &Event) -> bool {
        self.contains(event.interest())
    }
}

impl Default for Interest {
    fn default() -> Self {
        Self::ALL
    }
}

/// Receives events from a [`Client`](crate::client::Client).
///
/// Every delivery runs as its own task, so a slow listener never holds up the
/// session or other listeners. Listeners read the cache; they never write it.
#[async_trait]
pub trait Listener: Send + Sync + 'static {
    /// Categories to deliver. Defaults to everything.
    fn interest(&self) -> Interest {
        Interest::ALL
    }

    async fn on_event(&self, event: Arc<Event>, cache: Arc<Cache>);
}

/// A dispatch that cannot be applied because it references an entity the cache
/// does not hold. Only that one event is dropped.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslateError {
    /// The guild is unknown or still pending
    MissingGuild(Snowflake),
    /// The channel is neither a known guild channel nor a direct-message channel
    MissingChannel(Snowflake),
}

impl fmt::Display for TranslateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingGuild(id) => write!(f, "guild {id} is not resolved in the cache"),
            Self::MissingChannel(id) => write!(f, "channel {id} is not in the cache"),
        }
    }
}

impl StdError for TranslateError {}

impl From<TranslateError> for Error {
    fn from(e: TranslateError) -> Self {
        Error::with_source(Kind::Translation, e)
    }
}
