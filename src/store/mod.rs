//! Expiring keyed store.
//!
//! Maps a key (usually a chatter id) to an insertion-ordered history of
//! time-stamped items, each with its own expiry. The key space is split into
//! a fixed number of shards, each guarded by its own lock, so writers for keys
//! in different shards never contend.
//!
//! Every shard keeps two views of the same items:
//! - a per-key list of slot handles in insertion order
//! - a min-heap on `expires_at` whose entries point back at the same slots
//!
//! Items live in a slab (`slots`) and each item records its current heap
//! position, so removal through either view can find and remove the entry in
//! the other without pointer comparisons.
//!
//! Expired items are reclaimed by [`ExpiringStore::reclaim_expired`], which a
//! background task spawned with [`ExpiringStore::spawn_reclaimer`] calls on a
//! fixed tick. Until that tick runs, expired items remain visible to `len` and
//! `for_each`.

pub mod clock;

pub use clock::{Clock, MockClock, SystemClock};

use ahash::AHasher;
use log::debug;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

const MIN_RECLAIM_INTERVAL: Duration = Duration::from_millis(1);

/// Longest accepted TTL. Larger values are clamped so expiry never overflows.
pub const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// One stored entry. Owned by the shard holding it.
#[derive(Debug)]
pub struct StoredItem<K, T> {
    key: K,
    payload: T,
    inserted_at: Instant,
    expires_at: Instant,
    heap_pos: usize,
    /// Shard-wide insertion counter, increasing along every key list
    seq: u64,
}

impl<K, T> StoredItem<K, T> {
    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn inserted_at(&self) -> Instant {
        self.inserted_at
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }
}

#[derive(Debug, Clone, Copy)]
struct HeapEntry {
    expires_at: Instant,
    slot: usize,
}

#[derive(Debug)]
struct Shard<K, T> {
    slots: Vec<Option<StoredItem<K, T>>>,
    free: Vec<usize>,
    keys: HashMap<K, VecDeque<usize>>,
    heap: Vec<HeapEntry>,
    next_seq: u64,
}

impl<K, T> Shard<K, T>
where
    K: Hash + Eq + Clone,
{
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            keys: HashMap::new(),
            heap: Vec::new(),
            next_seq: 0,
        }
    }

    fn push(&mut self, key: K, payload: T, now: Instant, ttl: Duration) {
        let expires_at = now.checked_add(ttl.min(MAX_TTL)).unwrap_or(now);
        let seq = self.next_seq;
        self.next_seq += 1;
        let item = StoredItem {
            key: key.clone(),
            payload,
            inserted_at: now,
            expires_at,
            heap_pos: self.heap.len(),
            seq,
        };

        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(item);
                slot
            }
            None => {
                self.slots.push(Some(item));
                self.slots.len() - 1
            }
        };

        self.heap.push(HeapEntry { expires_at, slot });
        self.sift_up(self.heap.len() - 1);
        self.keys.entry(key).or_default().push_back(slot);
    }

    fn len(&self, key: &K) -> usize {
        self.keys.get(key).map_or(0, VecDeque::len)
    }

    fn clear_key(&mut self, key: &K) -> usize {
        let Some(slots) = self.keys.remove(key) else {
            return 0;
        };

        let removed = slots.len();
        for slot in slots {
            if let Some(item) = self.slots[slot].take() {
                self.heap_remove(item.heap_pos);
                self.free.push(slot);
            }
        }
        removed
    }

    /// Pop every heap entry expiring at or before `now`.
    fn reclaim(&mut self, now: Instant) -> usize {
        let mut reclaimed = 0;

        while let Some(top) = self.heap.first().copied() {
            if top.expires_at > now {
                break;
            }
            self.heap_remove(0);

            let Some(item) = self.slots[top.slot].take() else {
                continue;
            };
            self.unlink(&item.key, top.slot, item.seq);
            self.free.push(top.slot);
            reclaimed += 1;
        }

        reclaimed
    }

    /// Drop `slot` from its key list. The list is ordered by `seq`, so the
    /// slot is found at the front in the common case and by binary search
    /// otherwise. `slot` must already be vacated.
    fn unlink(&mut self, key: &K, slot: usize, seq: u64) {
        let slots = &self.slots;
        let Some(list) = self.keys.get_mut(key) else {
            return;
        };

        if list.front() == Some(&slot) {
            list.pop_front();
        } else {
            let live_seq = |s: &usize| slots[*s].as_ref().map_or(seq, |item| item.seq);
            if let Ok(index) = list.binary_search_by_key(&seq, live_seq) {
                if list[index] == slot {
                    list.remove(index);
                }
            }
        }

        if list.is_empty() {
            self.keys.remove(key);
        }
    }

    fn heap_remove(&mut self, pos: usize) {
        if pos >= self.heap.len() {
            return;
        }
        let last = self.heap.len() - 1;
        self.heap.swap(pos, last);
        self.heap.pop();

        if pos < self.heap.len() {
            self.set_heap_pos(pos);
            if self.sift_down(pos) == pos {
                self.sift_up(pos);
            }
        }
    }

    fn sift_up(&mut self, mut pos: usize) {
        self.set_heap_pos(pos);
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if self.heap[pos].expires_at >= self.heap[parent].expires_at {
                break;
            }
            self.heap.swap(pos, parent);
            self.set_heap_pos(pos);
            self.set_heap_pos(parent);
            pos = parent;
        }
    }

    fn sift_down(&mut self, mut pos: usize) -> usize {
        let len = self.heap.len();
        loop {
            let left = 2 * pos + 1;
            let right = left + 1;
            let mut smallest = pos;

            if left < len && self.heap[left].expires_at < self.heap[smallest].expires_at {
                smallest = left;
            }
            if right < len && self.heap[right].expires_at < self.heap[smallest].expires_at {
                smallest = right;
            }
            if smallest == pos {
                return pos;
            }

            self.heap.swap(pos, smallest);
            self.set_heap_pos(pos);
            self.set_heap_pos(smallest);
            pos = smallest;
        }
    }

    fn set_heap_pos(&mut self, pos: usize) {
        let slot = self.heap[pos].slot;
        if let Some(item) = self.slots[slot].as_mut() {
            item.heap_pos = pos;
        }
    }

    fn for_each<F>(&self, key: &K, mut f: F)
    where
        F: FnMut(&StoredItem<K, T>),
    {
        if let Some(slots) = self.keys.get(key) {
            for &slot in slots {
                if let Some(item) = self.slots[slot].as_ref() {
                    f(item);
                }
            }
        }
    }

    fn items(&self) -> usize {
        self.heap.len()
    }
}

/// Exclusive access to one key's history. The owning shard stays write-locked
/// for as long as the entry is borrowed.
pub struct KeyEntry<'a, K, T> {
    shard: &'a mut Shard<K, T>,
    key: &'a K,
    now: Instant,
}

impl<'a, K, T> KeyEntry<'a, K, T>
where
    K: Hash + Eq + Clone,
{
    pub fn len(&self) -> usize {
        self.shard.len(self.key)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn for_each<F>(&self, f: F)
    where
        F: FnMut(&StoredItem<K, T>),
    {
        self.shard.for_each(self.key, f);
    }

    pub fn push(&mut self, payload: T, ttl: Duration) {
        self.shard.push(self.key.clone(), payload, self.now, ttl);
    }

    pub fn clear(&mut self) -> usize {
        self.shard.clear_key(self.key)
    }
}

/// Generic sharded store of expiring per-key histories.
#[derive(Debug)]
pub struct ExpiringStore<K, T> {
    name: String,
    shards: Box<[RwLock<Shard<K, T>>]>,
    clock: Arc<dyn Clock>,
    reclaim_interval: Duration,
}

impl<K, T> ExpiringStore<K, T>
where
    K: Hash + Eq + Clone,
{
    /// Create a store using the system clock
    pub fn new(name: impl Into<String>, shard_count: usize, reclaim_interval: Duration) -> Self {
        Self::with_clock(name, shard_count, reclaim_interval, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(
        name: impl Into<String>,
        shard_count: usize,
        reclaim_interval: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let shards = (0..shard_count.max(1))
            .map(|_| RwLock::new(Shard::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            name: name.into(),
            shards,
            clock,
            reclaim_interval: reclaim_interval.max(MIN_RECLAIM_INTERVAL),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn reclaim_interval(&self) -> Duration {
        self.reclaim_interval
    }

    /// Shard owning `key`. Fixed for the lifetime of the store.
    pub fn shard_index(&self, key: &K) -> usize {
        let mut hasher = AHasher::default();
        key.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    fn read_shard(&self, index: usize) -> RwLockReadGuard<'_, Shard<K, T>> {
        self.shards[index].read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_shard(&self, index: usize) -> RwLockWriteGuard<'_, Shard<K, T>> {
        self.shards[index].write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an item to the key's history, expiring `ttl` from now.
    pub fn push(&self, key: K, payload: T, ttl: Duration) {
        let now = self.clock.now();
        let index = self.shard_index(&key);
        self.write_shard(index).push(key, payload, now, ttl);
    }

    /// Visit the key's items oldest to newest under the shard's read lock.
    pub fn for_each<F>(&self, key: &K, f: F)
    where
        F: FnMut(&StoredItem<K, T>),
    {
        self.read_shard(self.shard_index(key)).for_each(key, f);
    }

    /// Run `f` with the key's shard write-locked, so a read of the history and
    /// the writes that depend on it cannot interleave with another caller.
    pub fn with_key<R, F>(&self, key: &K, f: F) -> R
    where
        F: FnOnce(&mut KeyEntry<'_, K, T>) -> R,
    {
        let now = self.clock.now();
        let mut shard = self.write_shard(self.shard_index(key));
        let mut entry = KeyEntry {
            shard: &mut *shard,
            key,
            now,
        };
        f(&mut entry)
    }

    /// Number of items currently held for `key`.
    pub fn len(&self, key: &K) -> usize {
        self.read_shard(self.shard_index(key)).len(key)
    }

    /// Remove every item for `key` from both the key list and the heap.
    pub fn clear_key(&self, key: &K) -> usize {
        let index = self.shard_index(key);
        self.write_shard(index).clear_key(key)
    }

    /// Evict everything that has expired as of the clock's current time.
    pub fn reclaim_expired(&self) -> usize {
        let now = self.clock.now();
        (0..self.shards.len())
            .map(|index| self.write_shard(index).reclaim(now))
            .sum()
    }

    /// Number of keys with at least one item
    pub fn key_count(&self) -> usize {
        (0..self.shards.len())
            .map(|index| self.read_shard(index).keys.len())
            .sum()
    }

    pub fn total_items(&self) -> usize {
        (0..self.shards.len())
            .map(|index| self.read_shard(index).items())
            .sum()
    }
}

impl<K, T> ExpiringStore<K, T>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    /// Run `reclaim_expired` every `reclaim_interval` until `shutdown` fires
    /// or the store is dropped.
    pub fn spawn_reclaimer(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let store = Arc::downgrade(self);
        let period = self.reclaim_interval;
        let name = self.name.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let Some(store) = store.upgrade() else {
                            break;
                        };
                        let reclaimed = store.reclaim_expired();
                        if reclaimed > 0 {
                            debug!("Store '{}' reclaimed {} expired items", name, reclaimed);
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
            }

            debug!("Reclaimer for store '{}' stopped", name);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    fn mock_store(shards: usize) -> (ExpiringStore<String, u32>, MockClock) {
        let clock = MockClock::default();
        let store = ExpiringStore::with_clock(
            "test",
            shards,
            Duration::from_millis(100),
            Arc::new(clock.clone()),
        );
        (store, clock)
    }

    fn payloads(store: &ExpiringStore<String, u32>, key: &str) -> Vec<u32> {
        let mut seen = Vec::new();
        store.for_each(&key.to_string(), |item| seen.push(*item.payload()));
        seen
    }

    /// Both views must reference exactly the same live slots.
    fn assert_consistent(store: &ExpiringStore<String, u32>) {
        for index in 0..store.shard_count() {
            let shard = store.read_shard(index);
            let listed: usize = shard.keys.values().map(VecDeque::len).sum();
            assert_eq!(listed, shard.heap.len());

            for (pos, entry) in shard.heap.iter().enumerate() {
                let item = shard.slots[entry.slot].as_ref().expect("heap entry points at live slot");
                assert_eq!(item.heap_pos, pos);
                assert_eq!(item.expires_at, entry.expires_at);
                if pos > 0 {
                    assert!(shard.heap[(pos - 1) / 2].expires_at <= entry.expires_at);
                }
            }
            for slots in shard.keys.values() {
                assert!(!slots.is_empty());
                for slot in slots {
                    assert!(shard.slots[*slot].is_some());
                }
            }
        }
    }

    #[test]
    fn test_push_preserves_insertion_order() {
        let (store, clock) = mock_store(4);
        let key = "user".to_string();

        // Later items expiring sooner must not disturb list order
        store.push(key.clone(), 1, Duration::from_secs(30));
        clock.advance(Duration::from_millis(10));
        store.push(key.clone(), 2, Duration::from_secs(5));
        store.push(key.clone(), 3, Duration::from_secs(60));

        assert_eq!(payloads(&store, "user"), vec![1, 2, 3]);
        assert_eq!(store.len(&key), 3);
        assert_consistent(&store);
    }

    #[test]
    fn test_item_timestamps() {
        let (store, clock) = mock_store(1);
        let start = clock.now();
        store.push("user".to_string(), 7, Duration::from_secs(10));

        store.for_each(&"user".to_string(), |item| {
            assert_eq!(item.key(), "user");
            assert_eq!(item.inserted_at(), start);
            assert_eq!(item.expires_at(), start + Duration::from_secs(10));
        });
    }

    #[test]
    fn test_reclamation_correctness() {
        let (store, clock) = mock_store(2);
        let key = "user".to_string();
        let ttl = Duration::from_secs(10);
        let epsilon = Duration::from_millis(1);

        store.push(key.clone(), 1, ttl);

        clock.advance(ttl - epsilon);
        assert_eq!(store.reclaim_expired(), 0);
        assert_eq!(store.len(&key), 1);

        clock.advance(epsilon + store.reclaim_interval());
        assert_eq!(store.reclaim_expired(), 1);
        assert_eq!(store.len(&key), 0);
        assert!(payloads(&store, "user").is_empty());
        assert_eq!(store.key_count(), 0);
        assert_consistent(&store);
    }

    #[test]
    fn test_expired_item_visible_until_tick() {
        let (store, clock) = mock_store(1);
        let key = "user".to_string();
        store.push(key.clone(), 1, Duration::from_secs(1));

        clock.advance(Duration::from_secs(2));
        assert_eq!(store.len(&key), 1);

        store.reclaim_expired();
        assert_eq!(store.len(&key), 0);
    }

    #[test]
    fn test_reclaim_removes_interior_items() {
        let (store, clock) = mock_store(1);
        let key = "user".to_string();

        store.push(key.clone(), 1, Duration::from_secs(60));
        store.push(key.clone(), 2, Duration::from_secs(5));
        store.push(key.clone(), 3, Duration::from_secs(60));
        store.push("other".to_string(), 9, Duration::from_secs(5));

        clock.advance(Duration::from_secs(5));
        assert_eq!(store.reclaim_expired(), 2);

        assert_eq!(payloads(&store, "user"), vec![1, 3]);
        assert_eq!(store.len(&"other".to_string()), 0);
        assert_eq!(store.key_count(), 1);
        assert_consistent(&store);
    }

    #[test]
    fn test_reclaim_interior_items_in_reused_slots() {
        let (store, clock) = mock_store(1);
        let key = "user".to_string();

        // Free low slot numbers so later pushes land out of slot order
        for i in 0..4 {
            store.push("filler".to_string(), i, Duration::from_secs(60));
        }
        store.push(key.clone(), 1, Duration::from_secs(60));
        store.clear_key(&"filler".to_string());
        store.push(key.clone(), 2, Duration::from_secs(60));
        store.push(key.clone(), 3, Duration::from_secs(5));
        store.push(key.clone(), 4, Duration::from_secs(5));
        store.push(key.clone(), 5, Duration::from_secs(60));

        clock.advance(Duration::from_secs(5));
        assert_eq!(store.reclaim_expired(), 2);
        assert_eq!(payloads(&store, "user"), vec![1, 2, 5]);
        assert_consistent(&store);
    }

    #[test]
    fn test_huge_ttl_is_clamped() {
        let (store, clock) = mock_store(1);
        let key = "user".to_string();
        let start = clock.now();

        store.push(key.clone(), 1, Duration::from_secs(u64::MAX));
        store.push(key.clone(), 2, Duration::MAX);

        store.for_each(&key, |item| assert_eq!(item.expires_at(), start + MAX_TTL));
        clock.advance(Duration::from_secs(365 * 24 * 60 * 60));
        assert_eq!(store.reclaim_expired(), 0);
        assert_eq!(payloads(&store, "user"), vec![1, 2]);
        assert_consistent(&store);
    }

    #[test]
    fn test_clear_key_removes_both_views() {
        let (store, clock) = mock_store(1);
        let key = "user".to_string();

        for n in 0..10 {
            store.push(key.clone(), n, Duration::from_secs(u64::from(n) + 1));
            store.push("other".to_string(), n, Duration::from_secs(20 - u64::from(n)));
        }

        assert_eq!(store.clear_key(&key), 10);
        assert_eq!(store.len(&key), 0);
        assert!(payloads(&store, "user").is_empty());
        assert_eq!(store.total_items(), 10);
        assert_consistent(&store);

        // Reclaiming after a clear must not touch the cleared key again
        clock.advance(Duration::from_secs(15));
        assert_eq!(store.reclaim_expired(), 5);
        assert_eq!(store.len(&"other".to_string()), 5);
        assert_consistent(&store);
    }

    #[test]
    fn test_cleared_slots_are_reused() {
        let (store, _clock) = mock_store(1);
        let key = "user".to_string();

        for n in 0..8 {
            store.push(key.clone(), n, Duration::from_secs(60));
        }
        store.clear_key(&key);
        for n in 0..8 {
            store.push(key.clone(), n, Duration::from_secs(60));
        }

        assert_eq!(store.read_shard(0).slots.len(), 8);
        assert_consistent(&store);
    }

    #[test]
    fn test_clear_key_concurrent_with_reclaim() {
        let clock = MockClock::default();
        let store = Arc::new(ExpiringStore::<String, u32>::with_clock(
            "race",
            2,
            Duration::from_millis(1),
            Arc::new(clock.clone()),
        ));

        let writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for n in 0..2_000u32 {
                    store.push("user".to_string(), n, Duration::from_millis(u64::from(n % 7)));
                    if n % 5 == 0 {
                        store.clear_key(&"user".to_string());
                    }
                }
            })
        };
        let reclaimer = {
            let store = Arc::clone(&store);
            let clock = clock.clone();
            thread::spawn(move || {
                for _ in 0..2_000 {
                    clock.advance(Duration::from_millis(1));
                    store.reclaim_expired();
                }
            })
        };

        writer.join().unwrap();
        reclaimer.join().unwrap();

        store.clear_key(&"user".to_string());
        assert_eq!(store.len(&"user".to_string()), 0);

        let mut calls = 0;
        store.for_each(&"user".to_string(), |_| calls += 1);
        assert_eq!(calls, 0);
        assert_consistent(&store);
    }

    #[test]
    fn test_shard_isolation() {
        let store = Arc::new(ExpiringStore::<String, u32>::new("iso", 8, Duration::from_secs(1)));

        let first = "user-0".to_string();
        let other = (1..1_000)
            .map(|n| format!("user-{}", n))
            .find(|key| store.shard_index(key) != store.shard_index(&first))
            .expect("some key lands on another shard");

        // Hold the first key's shard exclusively while another thread writes
        let _guard = store.write_shard(store.shard_index(&first));

        let (tx, rx) = mpsc::channel();
        let writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                store.push(other.clone(), 1, Duration::from_secs(60));
                tx.send(store.len(&other)).unwrap();
            })
        };

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(1));
        writer.join().unwrap();
    }

    #[test]
    fn test_shard_assignment_is_stable() {
        let store = ExpiringStore::<String, u32>::new("stable", 16, Duration::from_secs(1));
        let key = "someone".to_string();
        let index = store.shard_index(&key);
        for _ in 0..10 {
            assert_eq!(store.shard_index(&key), index);
        }
        assert!(index < 16);
    }

    #[test]
    fn test_with_key_read_modify_write() {
        let (store, _clock) = mock_store(2);
        let key = "user".to_string();
        store.push(key.clone(), 1, Duration::from_secs(60));

        let prior = store.with_key(&key, |entry| {
            let prior = entry.len();
            entry.push(2, Duration::from_secs(60));
            let mut seen = Vec::new();
            entry.for_each(|item| seen.push(*item.payload()));
            assert_eq!(seen, vec![1, 2]);
            prior
        });
        assert_eq!(prior, 1);
        assert_eq!(store.len(&key), 2);

        let cleared = store.with_key(&key, |entry| entry.clear());
        assert_eq!(cleared, 2);
        assert!(store.with_key(&key, |entry| entry.is_empty()));
        assert_consistent(&store);
    }

    #[test]
    fn test_concurrent_counters_never_double_count() {
        let store = Arc::new(ExpiringStore::<String, u32>::new("count", 4, Duration::from_secs(1)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    (0..100)
                        .map(|_| {
                            store.with_key(&"user".to_string(), |entry| {
                                let prior = entry.len();
                                entry.push(0, Duration::from_secs(60));
                                prior
                            })
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut priors: Vec<usize> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        priors.sort_unstable();
        assert_eq!(priors, (0..800).collect::<Vec<_>>());
    }

    #[test]
    fn test_zero_shards_clamped() {
        let store = ExpiringStore::<String, u32>::new("tiny", 0, Duration::ZERO);
        assert_eq!(store.shard_count(), 1);
        assert!(store.reclaim_interval() > Duration::ZERO);
        store.push("a".to_string(), 1, Duration::from_secs(1));
        assert_eq!(store.len(&"a".to_string()), 1);
    }

    #[tokio::test]
    async fn test_background_reclaimer() {
        let clock = MockClock::default();
        let store = Arc::new(ExpiringStore::<String, u32>::with_clock(
            "background",
            4,
            Duration::from_millis(10),
            Arc::new(clock.clone()),
        ));
        let shutdown = CancellationToken::new();
        let handle = store.spawn_reclaimer(shutdown.clone());

        store.push("user".to_string(), 1, Duration::from_secs(5));
        clock.advance(Duration::from_secs(6));

        let mut remaining = store.len(&"user".to_string());
        for _ in 0..100 {
            if remaining == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            remaining = store.len(&"user".to_string());
        }
        assert_eq!(remaining, 0);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
