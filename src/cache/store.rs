//! Size-bounded, recency-ordered store with demotion instead of destruction.
//!
//! Live entries are ranked by a monotonically increasing touch counter. When a new
//! key arrives while the store is full, a batch of the least recently touched
//! entries is evicted. Evicted values are demoted, not dropped: a [`Weak`] handle
//! brings back the very same value while something outside the store still holds
//! it, and a retained copy of the record regenerates it otherwise. At most
//! `max_size` retained copies are kept; past that the oldest demotions are
//! forgotten unless their value is still held elsewhere.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

use crate::Result;
use crate::error::Error;
use crate::model::Record;
use crate::types::Snowflake;

/// Bounds for a [`RecencyStore`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLimits {
    /// Live-entry count that triggers an eviction batch
    pub max_size: usize,
    /// Eviction never leaves fewer live entries than this
    pub min_size: usize,
    /// Number of entries evicted per batch
    pub trash_size: usize,
}

impl StoreLimits {
    pub fn new(max_size: usize, min_size: usize, trash_size: usize) -> Result<Self> {
        if max_size == 0 {
            return Err(Error::validation("max_size must be at least 1"));
        }
        if min_size >= max_size {
            return Err(Error::validation(format!(
                "min_size ({min_size}) must be below max_size ({max_size})"
            )));
        }
        if trash_size == 0 {
            return Err(Error::validation("trash_size must be at least 1"));
        }

        Ok(Self {
            max_size,
            min_size,
            trash_size,
        })
    }
}

/// A value plus its recency rank.
#[derive(Debug)]
struct CacheEntry<V> {
    value: Arc<V>,
    rank: u64,
}

/// An evicted value.
#[derive(Debug)]
struct Demoted<V> {
    handle: Weak<V>,
    /// Copy to rebuild from once `handle` is dead
    record: Option<V>,
    /// Demotion order, the key into `retired`
    stamp: u64,
}

impl<V> Demoted<V> {
    fn new(value: Arc<V>, stamp: u64) -> Self
    where
        V: Clone,
    {
        match Arc::try_unwrap(value) {
            Ok(record) => Self {
                handle: Weak::new(),
                record: Some(record),
                stamp,
            },
            Err(shared) => Self {
                handle: Arc::downgrade(&shared),
                record: Some(V::clone(&shared)),
                stamp,
            },
        }
    }

    fn is_reachable(&self) -> bool {
        self.record.is_some() || self.handle.strong_count() > 0
    }

    fn regenerate(self) -> Option<Arc<V>> {
        self.handle.upgrade().or_else(|| self.record.map(Arc::new))
    }
}

#[derive(Debug)]
pub struct RecencyStore<V: Record> {
    limits: StoreLimits,
    live: HashMap<Snowflake, CacheEntry<V>>,
    /// rank → key, oldest first
    order: BTreeMap<u64, Snowflake>,
    demoted: HashMap<Snowflake, Demoted<V>>,
    /// stamp → key for demoted entries that still hold a record, oldest first
    retired: BTreeMap<u64, Snowflake>,
    clock: u64,
}

impl<V: Record> RecencyStore<V> {
    #[must_use]
    pub fn new(limits: StoreLimits) -> Self {
        Self {
            limits,
            live: HashMap::new(),
            order: BTreeMap::new(),
            demoted: HashMap::new(),
            retired: BTreeMap::new(),
            clock: 0,
        }
    }

    #[must_use]
    pub fn limits(&self) -> StoreLimits {
        self.limits
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Whether `id` is a live entry. Demoted entries do not count.
    #[must_use]
    pub fn is_live(&self, id: Snowflake) -> bool {
        self.live.contains_key(&id)
    }

    /// Look up `id` without touching its rank or promoting demoted entries.
    #[must_use]
    pub fn peek(&self, id: Snowflake) -> Option<Arc<V>> {
        self.live.get(&id).map(|e| Arc::clone(&e.value))
    }

    /// Look up `id`, marking it most recently used.
    ///
    /// A demoted entry is promoted back to live: the same value if it is still
    /// referenced elsewhere, otherwise one rebuilt from the retained record.
    pub fn get(&mut self, id: Snowflake) -> Option<Arc<V>> {
        if self.live.contains_key(&id) {
            self.touch(id);
            return self.peek(id);
        }

        let value = self.take_demoted(id)?;
        Some(self.insert_live(id, value))
    }

    /// Number of demoted entries that can still be promoted.
    #[must_use]
    pub fn demoted_len(&self) -> usize {
        self.demoted.values().filter(|d| d.is_reachable()).count()
    }

    /// Create the record if absent, otherwise merge the packet into it.
    pub fn pull(&mut self, packet: V::Packet) -> Arc<V> {
        let id = V::packet_id(&packet);
        match self.take(id) {
            Some(mut value) => {
                Arc::make_mut(&mut value).merge(packet);
                self.insert_live(id, value)
            }
            None => self.insert_live(id, Arc::new(V::from_packet(packet))),
        }
    }

    /// Create the record from the packet, replacing whatever was stored under its ID.
    pub fn push(&mut self, packet: V::Packet) -> Arc<V> {
        let id = V::packet_id(&packet);
        self.insert(id, V::from_packet(packet))
    }

    /// Store an already built record.
    pub fn insert(&mut self, id: Snowflake, value: V) -> Arc<V> {
        drop(self.take(id));
        self.insert_live(id, Arc::new(value))
    }

    /// Drop `id` from both the live and the demoted sets.
    pub fn remove(&mut self, id: Snowflake) -> Option<Arc<V>> {
        self.take(id)
    }

    /// Live values, most recently used last.
    #[must_use]
    pub fn values(&self) -> Vec<Arc<V>> {
        self.order
            .values()
            .filter_map(|id| self.live.get(id))
            .map(|e| Arc::clone(&e.value))
            .collect()
    }

    fn take(&mut self, id: Snowflake) -> Option<Arc<V>> {
        if let Some(entry) = self.live.remove(&id) {
            self.order.remove(&entry.rank);
            self.take_demoted(id);
            return Some(entry.value);
        }

        self.take_demoted(id)
    }

    fn take_demoted(&mut self, id: Snowflake) -> Option<Arc<V>> {
        let demoted = self.demoted.remove(&id)?;
        self.retired.remove(&demoted.stamp);
        demoted.regenerate()
    }

    fn next_rank(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn touch(&mut self, id: Snowflake) {
        let rank = self.next_rank();
        if let Some(entry) = self.live.get_mut(&id) {
            self.order.remove(&entry.rank);
            entry.rank = rank;
            self.order.insert(rank, id);
        }
    }

    fn insert_live(&mut self, id: Snowflake, value: Arc<V>) -> Arc<V> {
        if !self.live.contains_key(&id) && self.live.len() >= self.limits.max_size {
            self.evict_batch();
        }

        let rank = self.next_rank();
        if let Some(previous) = self.live.insert(
            id,
            CacheEntry {
                value: Arc::clone(&value),
                rank,
            },
        ) {
            self.order.remove(&previous.rank);
        }
        self.order.insert(rank, id);
        value
    }

    /// Evict up to `trash_size` least recently used entries so that, once the
    /// incoming entry is added, at least `min_size` entries are live.
    fn evict_batch(&mut self) {
        self.demoted.retain(|_, demoted| demoted.is_reachable());

        let len = self.live.len();
        let count = self
            .limits
            .trash_size
            .min((len + 1).saturating_sub(self.limits.min_size))
            .min(len);

        for _ in 0..count {
            let Some((_, id)) = self.order.pop_first() else {
                break;
            };
            if let Some(entry) = self.live.remove(&id) {
                let stamp = self.next_rank();
                self.retired.insert(stamp, id);
                self.demoted.insert(id, Demoted::new(entry.value, stamp));
            }
        }

        self.forget_oldest();
    }

    /// Drop retained records past `max_size`, oldest demotion first. Values still
    /// held elsewhere keep their handle.
    fn forget_oldest(&mut self) {
        while self.retired.len() > self.limits.max_size {
            let Some((_, id)) = self.retired.pop_first() else {
                break;
            };
            let Some(demoted) = self.demoted.get_mut(&id) else {
                continue;
            };
            demoted.record = None;
            if demoted.handle.strong_count() == 0 {
                self.demoted.remove(&id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{User, UserPacket};

    fn packet(id: u64) -> UserPacket {
        UserPacket::builder()
            .id(Snowflake::new(id))
            .username(format!("user{id}"))
            .build()
    }

    fn store(max: usize, min: usize, trash: usize) -> RecencyStore<User> {
        RecencyStore::new(StoreLimits::new(max, min, trash).unwrap())
    }

    #[test]
    fn limits_are_validated() {
        assert!(StoreLimits::new(10, 10, 1).is_err(), "min must be below max");
        assert!(StoreLimits::new(10, 1, 0).is_err(), "trash must be positive");
        assert!(StoreLimits::new(0, 0, 1).is_err(), "max must be positive");
        assert!(StoreLimits::new(10, 1, 10).is_ok(), "valid limits");
    }

    #[test]
    fn eviction_drops_least_recently_used_batch() {
        let mut users = store(4, 1, 2);
        for id in 1..=4 {
            users.push(packet(id));
        }
        // 1 becomes the most recent; 2 and 3 are now the oldest
        users.get(Snowflake::new(1));

        users.push(packet(5));

        assert_eq!(users.len(), 3);
        assert!(!users.is_live(Snowflake::new(2)), "2 should be evicted");
        assert!(!users.is_live(Snowflake::new(3)), "3 should be evicted");
        assert!(users.is_live(Snowflake::new(1)), "1 was touched");
        assert!(users.is_live(Snowflake::new(4)), "4 is recent");
        assert!(users.is_live(Snowflake::new(5)), "5 was just added");
    }

    #[test]
    fn size_stays_within_bounds_after_max_plus_trash_inserts() {
        let (max, min, trash) = (10, 3, 4);
        let mut users = store(max, min, trash);
        for id in 1..=(max + trash) as u64 {
            users.push(packet(id));
            assert!(users.len() <= max, "store exceeded max_size");
        }

        assert!((min..=max).contains(&users.len()), "size {}", users.len());
        for id in 1..=trash as u64 {
            assert!(!users.is_live(Snowflake::new(id)), "{id} should be evicted");
        }
    }

    #[test]
    fn single_survivor_after_full_batch() {
        let mut users = store(10, 1, 10);
        let held: Vec<_> = (1..=11).map(|id| users.push(packet(id))).collect();

        assert_eq!(users.len(), 1);
        assert!(users.is_live(Snowflake::new(11)), "most recent survives");

        // Held values are demoted, not lost
        let regenerated = users.get(Snowflake::new(3)).unwrap();
        assert_eq!(regenerated.username, "user3");
        assert!(Arc::ptr_eq(&regenerated, &held[2]), "same value is promoted");
        assert!(users.is_live(Snowflake::new(3)), "3 promoted back to live");
    }

    #[test]
    fn unreferenced_evicted_values_are_rebuilt() {
        let mut users = store(10, 1, 10);
        for id in 1..=11 {
            users.push(packet(id));
        }
        assert_eq!(users.len(), 1);
        assert_eq!(users.demoted_len(), 10);

        let rebuilt = users.get(Snowflake::new(3)).expect("evicted, not lost");
        assert_eq!(rebuilt.username, "user3");
        assert!(users.is_live(Snowflake::new(3)));
    }

    #[test]
    fn oldest_retained_records_are_forgotten_past_max_size() {
        let mut users = store(2, 1, 1);
        for id in 1..=5 {
            users.push(packet(id));
        }

        // 1, 2 and 3 were evicted in turn; only two records are retained
        assert!(users.get(Snowflake::new(1)).is_none(), "oldest demotion forgotten");
        assert_eq!(users.get(Snowflake::new(2)).unwrap().username, "user2");
    }

    #[test]
    fn held_values_outlive_forgotten_records() {
        let mut users = store(2, 1, 1);
        let held = users.push(packet(1));
        for id in 2..=6 {
            users.push(packet(id));
        }

        let promoted = users.get(Snowflake::new(1)).expect("still referenced");
        assert!(Arc::ptr_eq(&promoted, &held));
    }

    #[test]
    fn merge_after_regeneration_keeps_earlier_fields() {
        let mut users = store(2, 1, 1);
        users.push(packet(1));
        users.push(packet(2));
        users.push(packet(3));

        let merged = users.pull(
            UserPacket::builder()
                .id(Snowflake::new(1))
                .avatar(Some("f00d".to_owned()))
                .build(),
        );

        assert_eq!(merged.username, "user1");
        assert_eq!(merged.avatar.as_deref(), Some("f00d"));
    }

    #[test]
    fn pull_merges_instead_of_duplicating() {
        let mut users = store(10, 1, 5);
        let first = users.pull(packet(1));
        let rename = UserPacket::builder()
            .id(Snowflake::new(1))
            .username("renamed".to_owned())
            .build();

        let second = users.pull(rename.clone());
        let mut expected = (*first).clone();
        expected.merge(rename);

        assert_eq!(*second, expected);
        assert_eq!(users.len(), 1);
        assert_eq!(first.username, "user1", "outstanding handles are not mutated");
    }

    #[test]
    fn remove_clears_demoted_handle() {
        let mut users = store(2, 1, 1);
        let held = users.push(packet(1));
        users.push(packet(2));
        users.push(packet(3));

        assert!(users.remove(Snowflake::new(1)).is_some(), "demoted value returned");
        assert!(users.get(Snowflake::new(1)).is_none(), "removed for good");
        drop(held);
    }

    #[test]
    fn values_are_ordered_by_recency() {
        let mut users = store(5, 1, 1);
        users.push(packet(1));
        users.push(packet(2));
        users.get(Snowflake::new(1));

        let ids: Vec<_> = users.values().iter().map(|u| u.id.get()).collect();
        assert_eq!(ids, vec![2, 1]);
    }
}
