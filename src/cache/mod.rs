//! The entity cache: a memory-bounded mirror of server-side state.
//!
//! Each entity kind has its own store and policy:
//!
//! * users and direct-message channels live in [`RecencyStore`]s that demote
//!   least-recently-used entries instead of dropping values still referenced
//!   elsewhere
//! * guilds live in a [`GuildStore`], pending until their body arrives
//! * guild channels, roles, emojis and members are owned by their guild
//! * messages live in one [`RecencyStore`] per channel
//!
//! Reads never perform network I/O. The cache is internally synchronized, so the
//! dispatch task and REST hydration can both write to it.

pub mod guild;
pub mod store;

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use dashmap::DashMap;
use serde::Serialize;

pub use guild::{GuildChange, GuildStore, Resolution};
pub use store::{RecencyStore, StoreLimits};

use crate::model::{
    Channel, ChannelPacket, Guild, GuildPacket, Message, MessagePacket, User, UserPacket,
};
use crate::types::Snowflake;

/// Limits for every recency-bounded store.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub users: StoreLimits,
    pub dm_channels: StoreLimits,
    /// Applied to each channel's message store separately
    pub messages: StoreLimits,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            users: StoreLimits {
                max_size: 10_000,
                min_size: 1_000,
                trash_size: 1_000,
            },
            dm_channels: StoreLimits {
                max_size: 1_000,
                min_size: 100,
                trash_size: 100,
            },
            messages: StoreLimits {
                max_size: 100,
                min_size: 10,
                trash_size: 25,
            },
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn with_users(mut self, limits: StoreLimits) -> Self {
        self.users = limits;
        self
    }

    #[must_use]
    pub fn with_dm_channels(mut self, limits: StoreLimits) -> Self {
        self.dm_channels = limits;
        self
    }

    #[must_use]
    pub fn with_messages(mut self, limits: StoreLimits) -> Self {
        self.messages = limits;
        self
    }
}

/// Entry counts, as reported by [`Cache::stats`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub users: usize,
    pub dm_channels: usize,
    pub guilds: usize,
    pub pending_guilds: usize,
    pub guild_channels: usize,
    pub message_channels: usize,
    pub messages: usize,
}

#[derive(Debug)]
pub struct Cache {
    config: CacheConfig,
    current_user: RwLock<Option<Arc<User>>>,
    users: Mutex<RecencyStore<User>>,
    dm_channels: Mutex<RecencyStore<Channel>>,
    guilds: GuildStore,
    /// Guild channel → owning guild
    channel_guilds: DashMap<Snowflake, Snowflake>,
    /// Channel → its messages
    messages: DashMap<Snowflake, RecencyStore<Message>>,
}

impl Default for Cache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl Cache {
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            current_user: RwLock::new(None),
            users: Mutex::new(RecencyStore::new(config.users)),
            dm_channels: Mutex::new(RecencyStore::new(config.dm_channels)),
            guilds: GuildStore::new(),
            channel_guilds: DashMap::new(),
            messages: DashMap::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> CacheConfig {
        self.config
    }

    /// The user this client is logged in as, once `READY` arrived.
    #[must_use]
    pub fn current_user(&self) -> Option<Arc<User>> {
        self.current_user
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(Arc::clone)
    }

    /// Merge `packet` into the current user. The record is also kept in the user
    /// store, where the pin held here keeps it regenerable.
    pub fn pull_current_user(&self, packet: UserPacket) -> Arc<User> {
        let user = self.users().pull(packet);
        *self
            .current_user
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&user));
        user
    }

    #[must_use]
    pub fn user(&self, id: Snowflake) -> Option<Arc<User>> {
        self.users().get(id)
    }

    pub fn pull_user(&self, packet: UserPacket) -> Arc<User> {
        let user = self.users().pull(packet);
        self.repin(&user);
        user
    }

    pub fn push_user(&self, packet: UserPacket) -> Arc<User> {
        let user = self.users().push(packet);
        self.repin(&user);
        user
    }

    pub fn remove_user(&self, id: Snowflake) -> Option<Arc<User>> {
        self.users().remove(id)
    }

    /// The resolved guild. Pending guilds read as `None`; see [`Cache::wait_guild`].
    #[must_use]
    pub fn guild(&self, id: Snowflake) -> Option<Arc<Guild>> {
        self.guilds.get(id)
    }

    /// Wait for a pending guild to resolve. `None` if the guild is unknown or removed.
    pub async fn wait_guild(&self, id: Snowflake) -> Option<Arc<Guild>> {
        self.guilds.wait(id).await
    }

    #[must_use]
    pub fn is_guild_pending(&self, id: Snowflake) -> bool {
        self.guilds.is_pending(id)
    }

    #[must_use]
    pub fn guild_ids(&self) -> Vec<Snowflake> {
        self.guilds.ids()
    }

    /// Register a guild whose body has not arrived yet.
    pub fn add_pending_guild(&self, id: Snowflake) -> bool {
        self.guilds.insert_pending(id)
    }

    /// Create or merge a guild, pulling its members' users into the user store and
    /// indexing its channels.
    pub fn pull_guild(&self, packet: GuildPacket) -> (Arc<Guild>, Resolution) {
        for member in packet.members.iter().flatten() {
            self.pull_user(member.user.clone());
        }

        let (guild, resolution) = self.guilds.resolve(packet);
        self.index_channels(&guild);
        (guild, resolution)
    }

    /// Create a guild from `packet` alone, replacing any cached record with the
    /// same ID instead of merging into it. Users and channels are handled as in
    /// [`Cache::pull_guild`].
    pub fn push_guild(&self, packet: GuildPacket) -> (Arc<Guild>, Resolution) {
        for member in packet.members.iter().flatten() {
            self.pull_user(member.user.clone());
        }

        let (guild, resolution) = self.guilds.replace(packet);
        self.index_channels(&guild);
        (guild, resolution)
    }

    /// Mark a guild unavailable. Its channels and messages are kept for when it comes back.
    pub fn demote_guild(&self, id: Snowflake) -> Option<Arc<Guild>> {
        self.guilds.demote(id)
    }

    /// Remove a guild together with everything it owns, including the message
    /// stores of its channels.
    pub fn remove_guild(&self, id: Snowflake) -> Option<Arc<Guild>> {
        let guild = self.guilds.remove(id);
        self.channel_guilds.retain(|channel_id, guild_id| {
            if *guild_id == id {
                self.messages.remove(channel_id);
                false
            } else {
                true
            }
        });
        guild
    }

    /// Mutate a resolved guild. `None` if it is unknown or pending.
    pub fn update_guild<R, F>(&self, id: Snowflake, f: F) -> Option<GuildChange<R>>
    where
        F: FnOnce(&mut Guild) -> R,
    {
        self.guilds.update(id, f)
    }

    /// A guild or direct-message channel.
    #[must_use]
    pub fn channel(&self, id: Snowflake) -> Option<Channel> {
        match self.channel_guild(id) {
            Some(guild_id) => self.guild(guild_id)?.channel(id).cloned(),
            None => self
                .dm_channels()
                .get(id)
                .map(|channel| Channel::clone(&channel)),
        }
    }

    /// Guild that owns channel `id`, if it is a known guild channel.
    #[must_use]
    pub fn channel_guild(&self, id: Snowflake) -> Option<Snowflake> {
        self.channel_guilds.get(&id).map(|guild_id| *guild_id)
    }

    /// Create or merge a channel into its guild or into the direct-message store.
    ///
    /// Returns `None` when the channel belongs to a guild that is not resolved.
    pub fn pull_channel(&self, packet: ChannelPacket) -> Option<Channel> {
        match packet.guild_id.or_else(|| self.channel_guild(packet.id)) {
            Some(guild_id) => {
                let id = packet.id;
                let change = self.guilds.update(guild_id, |guild| guild.insert_channel(packet))?;
                self.channel_guilds.insert(id, guild_id);
                Some(change.output)
            }
            None => {
                self.pull_recipients(&packet);
                let channel = self.dm_channels().pull(packet);
                Some(Channel::clone(&channel))
            }
        }
    }

    /// Create a channel, replacing any cached record with the same ID.
    pub fn push_channel(&self, packet: ChannelPacket) -> Option<Channel> {
        match packet.guild_id.or_else(|| self.channel_guild(packet.id)) {
            Some(guild_id) => {
                let id = packet.id;
                let change = self.guilds.update(guild_id, |guild| {
                    guild.channels.remove(&id);
                    guild.insert_channel(packet)
                })?;
                self.channel_guilds.insert(id, guild_id);
                Some(change.output)
            }
            None => {
                self.pull_recipients(&packet);
                let channel = self.dm_channels().push(packet);
                Some(Channel::clone(&channel))
            }
        }
    }

    /// Remove a channel and its message store.
    pub fn remove_channel(&self, id: Snowflake) -> Option<Channel> {
        self.messages.remove(&id);

        match self.channel_guilds.remove(&id) {
            Some((_, guild_id)) => {
                self.guilds
                    .update(guild_id, |guild| guild.channels.remove(&id))?
                    .output
            }
            None => self
                .dm_channels()
                .remove(id)
                .map(|channel| Channel::clone(&channel)),
        }
    }

    #[must_use]
    pub fn message(&self, channel_id: Snowflake, id: Snowflake) -> Option<Arc<Message>> {
        self.messages.get_mut(&channel_id)?.get(id)
    }

    /// Cached messages of a channel, oldest use first.
    #[must_use]
    pub fn messages(&self, channel_id: Snowflake) -> Vec<Arc<Message>> {
        self.messages
            .get(&channel_id)
            .map(|store| store.values())
            .unwrap_or_default()
    }

    /// Store a new message and pull its author and mentions into the user store.
    pub fn push_message(&self, packet: MessagePacket) -> Arc<Message> {
        self.pull_message_users(&packet);
        self.message_store(packet.channel_id).push(packet)
    }

    /// Create or merge a message.
    pub fn pull_message(&self, packet: MessagePacket) -> Arc<Message> {
        self.pull_message_users(&packet);
        self.message_store(packet.channel_id).pull(packet)
    }

    pub fn remove_message(&self, channel_id: Snowflake, id: Snowflake) -> Option<Arc<Message>> {
        self.messages.get_mut(&channel_id)?.remove(id)
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let guilds = self.guilds.len();
        let pending_guilds = self.guilds.pending_count();

        CacheStats {
            users: self.users().len(),
            dm_channels: self.dm_channels().len(),
            guilds: guilds.saturating_sub(pending_guilds),
            pending_guilds,
            guild_channels: self.channel_guilds.len(),
            message_channels: self.messages.len(),
            messages: self.messages.iter().map(|store| store.len()).sum(),
        }
    }

    fn users(&self) -> std::sync::MutexGuard<'_, RecencyStore<User>> {
        self.users.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dm_channels(&self) -> std::sync::MutexGuard<'_, RecencyStore<Channel>> {
        self.dm_channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn message_store(
        &self,
        channel_id: Snowflake,
    ) -> dashmap::mapref::one::RefMut<'_, Snowflake, RecencyStore<Message>> {
        self.messages
            .entry(channel_id)
            .or_insert_with(|| RecencyStore::new(self.config.messages))
    }

    /// Keep the current-user pin on the latest version of that user.
    fn repin(&self, user: &Arc<User>) {
        let mut current = self
            .current_user
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if current.as_ref().is_some_and(|pinned| pinned.id == user.id) {
            *current = Some(Arc::clone(user));
        }
    }

    /// Point the channel index at `guild`'s channels. Channels it no longer has
    /// lose their index entry and message store.
    fn index_channels(&self, guild: &Guild) {
        self.channel_guilds.retain(|channel_id, guild_id| {
            let kept = *guild_id != guild.id || guild.channels.contains_key(channel_id);
            if !kept {
                self.messages.remove(channel_id);
            }
            kept
        });
        for channel_id in guild.channels.keys() {
            self.channel_guilds.insert(*channel_id, guild.id);
        }
    }

    fn pull_recipients(&self, packet: &ChannelPacket) {
        for recipient in packet.recipients.iter().flatten() {
            self.pull_user(recipient.clone());
        }
    }

    fn pull_message_users(&self, packet: &MessagePacket) {
        if let Some(author) = &packet.author {
            self.pull_user(author.clone());
        }
        for mention in packet.mentions.iter().flatten() {
            self.pull_user(mention.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::model::ChannelKind;

    const GUILD: Snowflake = Snowflake::new(100);
    const CHANNEL: Snowflake = Snowflake::new(200);
    const USER: Snowflake = Snowflake::new(300);

    fn guild_packet() -> GuildPacket {
        serde_json::from_value(json!({
            "id": "100",
            "name": "Test Guild",
            "owner_id": "300",
            "channels": [{ "id": "200", "type": 0, "name": "general" }],
            "members": [{ "user": { "id": "300", "username": "owner" }, "roles": [] }]
        }))
        .expect("valid guild")
    }

    fn message_packet(id: u64, content: &str) -> MessagePacket {
        serde_json::from_value(json!({
            "id": id.to_string(),
            "channel_id": "200",
            "author": { "id": "300", "username": "owner" },
            "content": content
        }))
        .expect("valid message")
    }

    #[test]
    fn guild_pull_indexes_channels_and_users() {
        let cache = Cache::default();
        cache.add_pending_guild(GUILD);

        let (guild, resolution) = cache.pull_guild(guild_packet());

        assert_eq!(resolution, Resolution::Available);
        assert_eq!(guild.name, "Test Guild");
        assert_eq!(cache.channel_guild(CHANNEL), Some(GUILD));
        assert_eq!(
            cache.channel(CHANNEL).and_then(|c| c.name),
            Some("general".to_owned())
        );
        assert_eq!(cache.user(USER).map(|u| u.username.clone()), Some("owner".to_owned()));
    }

    #[test]
    fn guild_push_replaces_instead_of_merging() {
        let cache = Cache::default();
        cache.pull_guild(guild_packet());
        cache.push_message(message_packet(1, "hi"));

        let bare = GuildPacket::builder()
            .id(GUILD)
            .name("Renamed".to_owned())
            .build();
        let (merged, _) = cache.pull_guild(bare.clone());
        assert_eq!(merged.channels.len(), 1, "pull keeps absent fields");
        assert_eq!(merged.owner_id, USER);

        let (replaced, resolution) = cache.push_guild(bare);

        assert_eq!(resolution, Resolution::Updated);
        assert_eq!(replaced.name, "Renamed");
        assert!(replaced.channels.is_empty(), "push starts from the packet alone");
        assert_eq!(replaced.owner_id, Snowflake::default());
        assert_eq!(cache.channel_guild(CHANNEL), None, "stale channel unindexed");
        assert!(cache.messages(CHANNEL).is_empty());
    }

    #[test]
    fn evicted_dm_channels_are_regenerated() {
        let limits = StoreLimits::new(3, 1, 3).expect("valid limits");
        let cache = Cache::new(CacheConfig::default().with_dm_channels(limits));

        for id in 501..=504 {
            let packet: ChannelPacket = serde_json::from_value(json!({
                "id": id.to_string(),
                "type": 1,
                "recipients": [{ "id": "301", "username": "friend" }]
            }))
            .expect("valid channel");
            cache.pull_channel(packet);
        }
        assert_eq!(cache.stats().dm_channels, 1);

        let channel = cache
            .channel(Snowflake::new(501))
            .expect("demoted, not lost");
        assert!(channel.is_dm());
        assert_eq!(channel.recipients, vec![Snowflake::new(301)]);
    }

    #[test]
    fn removing_guild_drops_owned_records() {
        let cache = Cache::default();
        cache.pull_guild(guild_packet());
        cache.push_message(message_packet(1, "hi"));

        cache.remove_guild(GUILD).expect("guild was cached");

        assert!(cache.guild(GUILD).is_none());
        assert!(cache.channel(CHANNEL).is_none());
        assert!(cache.messages(CHANNEL).is_empty());
        assert!(cache.user(USER).is_some(), "users outlive the guild");
    }

    #[test]
    fn channel_in_unresolved_guild_is_rejected() {
        let cache = Cache::default();
        cache.add_pending_guild(GUILD);

        let packet = ChannelPacket::builder()
            .id(CHANNEL)
            .kind(ChannelKind::GuildText)
            .guild_id(GUILD)
            .build();

        assert!(cache.pull_channel(packet).is_none());
    }

    #[test]
    fn dm_channels_live_at_the_root() {
        let cache = Cache::default();
        let packet: ChannelPacket = serde_json::from_value(json!({
            "id": "500",
            "type": 1,
            "recipients": [{ "id": "301", "username": "friend" }]
        }))
        .expect("valid channel");

        let channel = cache.pull_channel(packet).expect("dm channels need no guild");

        assert!(channel.is_dm());
        assert_eq!(channel.recipients, vec![Snowflake::new(301)]);
        assert!(cache.user(Snowflake::new(301)).is_some());
        assert!(cache.remove_channel(Snowflake::new(500)).is_some());
        assert!(cache.channel(Snowflake::new(500)).is_none());
    }

    #[test]
    fn message_pull_merges() {
        let cache = Cache::default();
        cache.push_message(message_packet(1, "first"));

        let edit: MessagePacket = serde_json::from_value(json!({
            "id": "1",
            "channel_id": "200",
            "content": "edited"
        }))
        .expect("valid update");
        let merged = cache.pull_message(edit);

        assert_eq!(merged.content, "edited");
        assert_eq!(merged.author_id, USER);
        assert_eq!(cache.messages(CHANNEL).len(), 1);
    }

    #[test]
    fn message_stores_are_bounded_per_channel() {
        let limits = StoreLimits::new(5, 1, 2).expect("valid limits");
        let cache = Cache::new(CacheConfig::default().with_messages(limits));

        for id in 1..=20 {
            cache.push_message(message_packet(id, "spam"));
        }

        let stats = cache.stats();
        assert_eq!(stats.message_channels, 1);
        assert!(stats.messages <= 5, "store exceeded its bound: {stats:?}");
        assert!(cache.message(CHANNEL, Snowflake::new(20)).is_some());
    }

    #[test]
    fn current_user_is_pinned() {
        let limits = StoreLimits::new(2, 1, 2).expect("valid limits");
        let cache = Cache::new(CacheConfig::default().with_users(limits));

        let me = cache.pull_current_user(UserPacket::builder().id(USER).build());
        for id in 1..=10 {
            cache.pull_user(UserPacket::builder().id(Snowflake::new(id)).build());
        }

        let regenerated = cache.user(USER).expect("pinned user is regenerable");
        assert!(Arc::ptr_eq(&me, &regenerated));
    }
}
