use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use super::user::User;
use crate::cryption::hash::time_hmac;

/// Window half-width: a hash is live for `[now-W, now+W]`.
const WINDOW: i64 = 120;
/// Background refresh tick period.
const TICK: Duration = Duration::from_secs(10);

fn now_sec() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs() as i64
}

/// A single hash's position in the min-heap, ordered purely on `t_sec` --
/// mirrors the `BufFrame`/`Reverse<_>` reorder-buffer idiom used elsewhere
/// in this codebase's relay paths.
#[derive(Debug)]
struct HeapEntry {
    t_sec: i64,
    hash: [u8; 16],
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.t_sec == other.t_sec
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.t_sec.cmp(&other.t_sec)
    }
}

struct HeapState {
    heap: BinaryHeap<Reverse<HeapEntry>>,
    /// First `t_sec` not yet materialized into the map.
    next_unhashed: i64,
    /// Oldest `t_sec` guaranteed still present (everything below this has
    /// been evicted as of the last tick).
    low_water: i64,
}

/// Time-rotating lookup structure: `hash -> (user_index, t_sec)` for every
/// configured user and every second in the live window. The background
/// tick task is the sole writer to `hash_map` and `heap`; `GetUser` reads
/// concurrently without blocking on a global lock (dashmap shards its
/// internal locking).
pub struct TimedUserSet {
    users: RwLock<Vec<Arc<User>>>,
    hash_map: DashMap<[u8; 16], (usize, i64)>,
    heap: Mutex<HeapState>,
}

impl TimedUserSet {
    /// Build a user set and spawn its background refresh task. The window
    /// is empty until the first tick (at most `TICK` later).
    pub fn new(initial_users: Vec<User>) -> Arc<Self> {
        let t_start = now_sec() - WINDOW;
        let set = Arc::new(Self {
            users: RwLock::new(initial_users.into_iter().map(Arc::new).collect()),
            hash_map: DashMap::new(),
            heap: Mutex::new(HeapState {
                heap: BinaryHeap::new(),
                next_unhashed: t_start,
                low_water: t_start,
            }),
        });
        let bg = Arc::clone(&set);
        tokio::spawn(async move { bg.refresh_loop().await });
        set
    }

    async fn refresh_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(TICK);
        loop {
            interval.tick().await;
            self.tick(now_sec());
        }
    }

    /// Evict stale entries, then extend coverage for every user up to
    /// `now + WINDOW`. Exposed at crate level for deterministic tests that
    /// inject a synthetic `now` instead of sleeping in wall-clock time.
    pub(crate) fn tick(&self, now: i64) {
        let mut state = self.heap.lock();

        while state.heap.peek().is_some_and(|Reverse(e)| e.t_sec < now - WINDOW) {
            let Reverse(entry) = state.heap.pop().expect("peeked Some");
            self.hash_map.remove(&entry.hash);
        }
        state.low_water = now - WINDOW;

        let extend_from = state.next_unhashed;
        // Inclusive of `now + WINDOW` (SPEC_FULL.md §3's closed window
        // invariant takes precedence over §4.2's literal half-open
        // interval text; see DESIGN.md).
        let extend_to = now + WINDOW + 1;
        if extend_from < extend_to {
            let users = self.users.read();
            for t in extend_from..extend_to {
                for (idx, user) in users.iter().enumerate() {
                    let hash = time_hmac(user.id().uuid_bytes(), t);
                    self.hash_map.insert(hash, (idx, t));
                    state.heap.push(Reverse(HeapEntry { t_sec: t, hash }));
                }
            }
            state.next_unhashed = extend_to;
        }
    }

    /// Append a user and materialize its hashes over the window currently
    /// covered by every other user (not a fresh `[now-W, now+W)`), so the
    /// new user becomes queryable for exactly the same live range.
    pub fn add_user(self: &Arc<Self>, user: User) {
        let user = Arc::new(user);
        let idx = {
            let mut users = self.users.write();
            users.push(Arc::clone(&user));
            users.len() - 1
        };

        let set = Arc::clone(self);
        tokio::spawn(async move {
            let (low, high) = {
                let state = set.heap.lock();
                (state.low_water, state.next_unhashed)
            };
            for t in low..high {
                let hash = time_hmac(user.id().uuid_bytes(), t);
                set.hash_map.insert(hash, (idx, t));
                set.heap.lock().heap.push(Reverse(HeapEntry { t_sec: t, hash }));
            }
        });
    }

    /// Resolve a user hash. Returns the user and the timestamp at which
    /// this hash was minted, so the caller can key its decryptor. Pins no
    /// lifetime in the set; the caller owns its own clone after this call.
    pub fn get_user(&self, hash: &[u8; 16]) -> Option<(Arc<User>, i64)> {
        let (idx, t) = *self.hash_map.get(hash)?;
        let users = self.users.read();
        users.get(idx).map(|u| (Arc::clone(u), t))
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.hash_map.len()
    }

    /// Build an already-ticked set without spawning the background refresh
    /// task, for tests elsewhere in the crate that need a working set
    /// without racing a live tokio timer.
    #[cfg(test)]
    pub(crate) fn new_for_test(users: Vec<User>) -> Arc<Self> {
        let t_start = now_sec() - WINDOW;
        let set = Arc::new(Self {
            users: RwLock::new(users.into_iter().map(Arc::new).collect()),
            hash_map: DashMap::new(),
            heap: Mutex::new(HeapState {
                heap: BinaryHeap::new(),
                next_unhashed: t_start,
                low_water: t_start,
            }),
        });
        set.tick(now_sec());
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::id::UserId;

    fn user_set_with_one_user() -> (Arc<TimedUserSet>, Arc<User>) {
        let id = UserId::parse("2418d087-648d-4990-86e8-19dca1d006d3").unwrap();
        let user = User::new(id);
        let t_start = now_sec() - WINDOW;
        let set = Arc::new(TimedUserSet {
            users: RwLock::new(vec![Arc::new(user)]),
            hash_map: DashMap::new(),
            heap: Mutex::new(HeapState {
                heap: BinaryHeap::new(),
                next_unhashed: t_start,
                low_water: t_start,
            }),
        });
        let u = set.users.read()[0].clone();
        (set, u)
    }

    #[test]
    fn lookup_covers_full_window_after_one_tick() {
        let (set, user) = user_set_with_one_user();
        let now = now_sec();
        set.tick(now);

        for t in (now - WINDOW)..=(now + WINDOW) {
            let hash = time_hmac(user.id().uuid_bytes(), t);
            let (found_user, found_t) = set.get_user(&hash).expect("hash should resolve");
            assert_eq!(found_t, t);
            assert_eq!(found_user.id(), user.id());
        }
    }

    #[test]
    fn eviction_drops_stale_entries_after_time_jump() {
        let (set, user) = user_set_with_one_user();
        let now = now_sec();
        set.tick(now);
        assert!(set.len() > 0);

        let jumped = now + 300;
        set.tick(jumped);

        let stale_hash = time_hmac(user.id().uuid_bytes(), now - WINDOW);
        assert!(set.get_user(&stale_hash).is_none());

        for t in (jumped - WINDOW)..=(jumped + WINDOW) {
            let hash = time_hmac(user.id().uuid_bytes(), t);
            assert!(set.get_user(&hash).is_some());
        }
    }
}
