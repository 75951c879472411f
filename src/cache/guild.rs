//! Guild slots that start out pending and become resolved.
//!
//! Each slot is a [`watch`] channel holding `None` while the guild is pending
//! and the resolved record afterwards. Readers that need the resolved form
//! subscribe and wait for the value to turn `Some`; plain lookups never block and
//! never see a half-built guild.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;

use crate::model::{Guild, GuildPacket, Record as _};
use crate::types::Snowflake;

type Slot = watch::Sender<Option<Arc<Guild>>>;

/// How [`GuildStore::resolve`] treated a guild packet.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// A pending placeholder was resolved
    Available,
    /// The guild was not known before
    Joined,
    /// The guild was already resolved; the packet was merged into it
    Updated,
}

/// The guild before and after an [`update`](GuildStore::update), plus what the
/// update closure returned.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct GuildChange<R> {
    pub before: Arc<Guild>,
    pub after: Arc<Guild>,
    pub output: R,
}

#[derive(Debug, Default)]
pub struct GuildStore {
    slots: DashMap<Snowflake, Slot>,
}

impl GuildStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` as pending. Returns `false` if the guild is already known.
    pub fn insert_pending(&self, id: Snowflake) -> bool {
        match self.slots.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(watch::channel(None).0);
                true
            }
        }
    }

    /// Turn a resolved guild back into a pending placeholder, as during an outage.
    ///
    /// Waiters keep waiting for the next resolution. Returns the demoted record.
    pub fn demote(&self, id: Snowflake) -> Option<Arc<Guild>> {
        match self.slots.entry(id) {
            Entry::Occupied(slot) => slot.get().send_replace(None),
            Entry::Vacant(vacant) => {
                vacant.insert(watch::channel(None).0);
                None
            }
        }
    }

    /// The resolved guild, if any. Pending guilds read as `None`.
    #[must_use]
    pub fn get(&self, id: Snowflake) -> Option<Arc<Guild>> {
        let slot = self.slots.get(&id)?;
        let current = slot.borrow();
        current.as_ref().map(Arc::clone)
    }

    #[must_use]
    pub fn is_pending(&self, id: Snowflake) -> bool {
        self.slots
            .get(&id)
            .is_some_and(|slot| slot.borrow().is_none())
    }

    #[must_use]
    pub fn contains(&self, id: Snowflake) -> bool {
        self.slots.contains_key(&id)
    }

    /// Wait until `id` is resolved.
    ///
    /// Returns at once for resolved guilds, and `None` for unknown guilds or when
    /// the guild is removed while waiting.
    pub async fn wait(&self, id: Snowflake) -> Option<Arc<Guild>> {
        let mut rx = self.slots.get(&id)?.subscribe();
        let resolved = rx.wait_for(Option::is_some).await.ok()?;
        resolved.as_ref().map(Arc::clone)
    }

    /// Resolve a pending guild, create an unknown one, or merge into a resolved one.
    pub fn resolve(&self, packet: GuildPacket) -> (Arc<Guild>, Resolution) {
        match self.slots.entry(packet.id) {
            Entry::Occupied(slot) => {
                let previous = slot.get().borrow().as_ref().map(Arc::clone);
                let (guild, resolution) = match previous {
                    Some(mut guild) => {
                        Arc::make_mut(&mut guild).merge(packet);
                        (guild, Resolution::Updated)
                    }
                    None => (Arc::new(Guild::from_packet(packet)), Resolution::Available),
                };
                slot.get().send_replace(Some(Arc::clone(&guild)));
                (guild, resolution)
            }
            Entry::Vacant(vacant) => {
                let guild = Arc::new(Guild::from_packet(packet));
                vacant.insert(watch::channel(Some(Arc::clone(&guild))).0);
                (guild, Resolution::Joined)
            }
        }
    }

    /// Build the guild from `packet` alone, discarding whatever the slot held.
    ///
    /// Resolves a pending placeholder like [`resolve`](Self::resolve) does.
    pub fn replace(&self, packet: GuildPacket) -> (Arc<Guild>, Resolution) {
        let guild = Arc::new(Guild::from_packet(packet));
        let resolution = match self.slots.entry(guild.id) {
            Entry::Occupied(slot) => {
                let previous = slot.get().send_replace(Some(Arc::clone(&guild)));
                if previous.is_some() {
                    Resolution::Updated
                } else {
                    Resolution::Available
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(watch::channel(Some(Arc::clone(&guild))).0);
                Resolution::Joined
            }
        };
        (guild, resolution)
    }

    /// Apply `f` to a copy of the resolved guild and publish the result.
    ///
    /// Returns `None`, without calling `f`, when the guild is unknown or pending.
    pub fn update<R, F>(&self, id: Snowflake, f: F) -> Option<GuildChange<R>>
    where
        F: FnOnce(&mut Guild) -> R,
    {
        let slot = self.slots.get_mut(&id)?;
        let before = slot.borrow().as_ref().map(Arc::clone)?;

        let mut after = Arc::clone(&before);
        let output = f(Arc::make_mut(&mut after));
        slot.send_replace(Some(Arc::clone(&after)));

        Some(GuildChange {
            before,
            after,
            output,
        })
    }

    /// Forget the guild. Anyone waiting on it is woken with `None`.
    pub fn remove(&self, id: Snowflake) -> Option<Arc<Guild>> {
        let (_, slot) = self.slots.remove(&id)?;
        slot.borrow().as_ref().map(Arc::clone)
    }

    #[must_use]
    pub fn ids(&self) -> Vec<Snowflake> {
        self.slots.iter().map(|slot| *slot.key()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.value().borrow().is_none())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    const ID: Snowflake = Snowflake::new(41_771_983_423_143_937);

    fn packet(name: &str) -> GuildPacket {
        GuildPacket::builder().id(ID).name(name.to_owned()).build()
    }

    #[test]
    fn pending_guild_reads_as_absent() {
        let store = GuildStore::new();

        assert!(store.insert_pending(ID));
        assert!(!store.insert_pending(ID), "second registration is a no-op");
        assert!(store.is_pending(ID));
        assert!(store.get(ID).is_none());
        assert_eq!(store.pending_count(), 1);
    }

    #[test]
    fn resolution_kinds() {
        let store = GuildStore::new();
        store.insert_pending(ID);

        let (guild, resolution) = store.resolve(packet("first"));
        assert_eq!(resolution, Resolution::Available);
        assert_eq!(guild.name, "first");

        let (guild, resolution) = store.resolve(packet("second"));
        assert_eq!(resolution, Resolution::Updated);
        assert_eq!(guild.name, "second");

        let other = Snowflake::new(7);
        let (_, resolution) = store.resolve(GuildPacket::builder().id(other).build());
        assert_eq!(resolution, Resolution::Joined);
    }

    #[tokio::test]
    async fn waiter_observes_resolution() {
        let store = Arc::new(GuildStore::new());
        store.insert_pending(ID);

        let waiter = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.wait(ID).await })
        };
        tokio::task::yield_now().await;
        store.resolve(packet("resolved"));

        let guild = timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter finished")
            .expect("waiter did not panic")
            .expect("guild resolved");
        assert_eq!(guild.id, ID);
        assert_eq!(guild.name, "resolved");
    }

    #[tokio::test]
    async fn removal_wakes_waiters_empty_handed() {
        let store = Arc::new(GuildStore::new());
        store.insert_pending(ID);

        let waiter = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.wait(ID).await })
        };
        tokio::task::yield_now().await;
        store.remove(ID);

        let result = timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter finished")
            .expect("waiter did not panic");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn unknown_guild_is_not_awaited() {
        let store = GuildStore::new();
        assert!(store.wait(ID).await.is_none());
    }

    #[test]
    fn update_keeps_previous_snapshot() {
        let store = GuildStore::new();
        store.resolve(packet("before"));

        let change = store
            .update(ID, |guild| {
                guild.name = "after".to_owned();
                guild.member_count
            })
            .expect("guild is resolved");

        assert_eq!(change.before.name, "before");
        assert_eq!(change.after.name, "after");
        assert_eq!(store.get(ID).map(|g| g.name.clone()), Some("after".to_owned()));
    }

    #[test]
    fn update_skips_pending_guilds() {
        let store = GuildStore::new();
        store.insert_pending(ID);

        let mut called = false;
        let change = store.update(ID, |_| called = true);

        assert!(change.is_none());
        assert!(!called);
    }

    #[test]
    fn replace_discards_previous_fields() {
        let store = GuildStore::new();
        store.insert_pending(ID);
        store.resolve(
            GuildPacket::builder()
                .id(ID)
                .name("first".to_owned())
                .region("eu-west".to_owned())
                .build(),
        );

        let (guild, resolution) = store.replace(packet("second"));

        assert_eq!(resolution, Resolution::Updated);
        assert_eq!(guild.name, "second");
        assert_eq!(guild.region, None, "replace does not merge");
        assert!(Arc::ptr_eq(&store.get(ID).unwrap(), &guild));
    }

    #[tokio::test]
    async fn replace_resolves_pending_waiters() {
        let store = Arc::new(GuildStore::new());
        store.insert_pending(ID);

        let waiter = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.wait(ID).await })
        };
        tokio::task::yield_now().await;
        let (_, resolution) = store.replace(packet("fresh"));

        assert_eq!(resolution, Resolution::Available);
        let guild = timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter finished")
            .expect("waiter did not panic")
            .expect("guild resolved");
        assert_eq!(guild.name, "fresh");
    }

    #[test]
    fn demote_returns_to_pending() {
        let store = GuildStore::new();
        store.resolve(packet("up"));

        let demoted = store.demote(ID).expect("was resolved");
        assert_eq!(demoted.name, "up");
        assert!(store.is_pending(ID));
    }
}
