use std::collections::HashMap;
use std::time::{Duration, Instant};

use rt_chat_protocol::{FriendEntry, GroupEntry};
use tokio::sync::RwLock;

/// Number of independent shards a keyed cache is split across, so lookups
/// for unrelated users don't contend on the same lock.
const SHARD_COUNT: usize = 16;

fn shard_index(key: &str) -> usize {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in key.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01B3);
    }
    (hash as usize) % SHARD_COUNT
}

struct Entry<T> {
    value: T,
    expires_at: Option<Instant>,
}

impl<T> Entry<T> {
    fn fresh(value: T) -> Self {
        Entry { value, expires_at: None }
    }

    fn with_ttl(value: T, ttl: Duration) -> Self {
        Entry { value, expires_at: Some(Instant::now() + ttl) }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

struct ShardedMap<T> {
    shards: Vec<RwLock<HashMap<String, Entry<T>>>>,
}

impl<T: Clone> ShardedMap<T> {
    fn new() -> Self {
        ShardedMap { shards: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect() }
    }

    async fn get(&self, key: &str) -> Option<T> {
        let shard = self.shards[shard_index(key)].read().await;
        match shard.get(key) {
            Some(entry) if !entry.is_expired() => Some(entry.value.clone()),
            _ => None,
        }
    }

    async fn put(&self, key: String, value: T) {
        let mut shard = self.shards[shard_index(&key)].write().await;
        shard.insert(key, Entry::fresh(value));
    }

    async fn put_with_ttl(&self, key: String, value: T, ttl: Duration) {
        let mut shard = self.shards[shard_index(&key)].write().await;
        shard.insert(key, Entry::with_ttl(value, ttl));
    }

    async fn remove(&self, key: &str) {
        let mut shard = self.shards[shard_index(key)].write().await;
        shard.remove(key);
    }

    /// Drops every expired entry across all shards. Called periodically by
    /// `RelationCache::run_eviction`, not on every read -- a read just
    /// treats an expired entry as absent (see `get`).
    async fn evict_expired(&self) {
        for shard in &self.shards {
            let mut guard = shard.write().await;
            guard.retain(|_, entry| !entry.is_expired());
        }
    }
}

const RELATION_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const VERI_CODE_TTL: Duration = Duration::from_secs(300);
const AUTHENTICATED_EMAIL_TTL: Duration = Duration::from_secs(300);
const EVICTION_INTERVAL: Duration = Duration::from_secs(60);

/// A user's cached friend list -- a miss simply falls through to the
/// durable store.
#[derive(Clone)]
pub struct FriendList(pub Vec<FriendEntry>);

/// In-memory view over relation and presence state, backed by the durable
/// store per the "store-then-cache" discipline: every write lands in
/// `repo::*` first and only then updates here.
pub struct RelationCache {
    friends: ShardedMap<FriendList>,
    groups: ShardedMap<GroupEntry>,
    presence: ShardedMap<bool>,
    veri_codes: ShardedMap<String>,
    authenticated_emails: ShardedMap<()>,
}

impl Default for RelationCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RelationCache {
    pub fn new() -> Self {
        RelationCache {
            friends: ShardedMap::new(),
            groups: ShardedMap::new(),
            presence: ShardedMap::new(),
            veri_codes: ShardedMap::new(),
            authenticated_emails: ShardedMap::new(),
        }
    }

    pub async fn friends_of(&self, user_id: &str) -> Option<Vec<FriendEntry>> {
        self.friends.get(user_id).await.map(|list| list.0)
    }

    pub async fn put_friends(&self, user_id: &str, friends: Vec<FriendEntry>) {
        self.friends.put_with_ttl(user_id.to_owned(), FriendList(friends), RELATION_TTL).await;
    }

    pub async fn invalidate_friends(&self, user_id: &str) {
        self.friends.remove(user_id).await;
    }

    /// Group entries carry no TTL -- membership changes invalidate the
    /// entry explicitly instead of waiting out a timer.
    pub async fn group(&self, group_id: &str) -> Option<GroupEntry> {
        self.groups.get(group_id).await
    }

    pub async fn put_group(&self, group: GroupEntry) {
        self.groups.put(group.id.clone(), group).await;
    }

    pub async fn invalidate_group(&self, group_id: &str) {
        self.groups.remove(group_id).await;
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        self.presence.get(user_id).await.unwrap_or(false)
    }

    pub async fn set_online(&self, user_id: &str, online: bool) {
        self.presence.put(user_id.to_owned(), online).await;
    }

    pub async fn put_veri_code(&self, email: &str, code: String) {
        self.veri_codes.put_with_ttl(email.to_owned(), code, VERI_CODE_TTL).await;
    }

    pub async fn take_veri_code(&self, email: &str) -> Option<String> {
        let code = self.veri_codes.get(email).await;
        if code.is_some() {
            self.veri_codes.remove(email).await;
        }
        code
    }

    /// Reads a cached code without consuming it, for callers that need to
    /// observe it out-of-band (there is no SMTP delivery path in this repo).
    pub async fn peek_veri_code(&self, email: &str) -> Option<String> {
        self.veri_codes.get(email).await
    }

    /// Marks `email` as having just passed `AUTHENTICATION`, for the
    /// duration of one verification-code window. `REGISTER` consumes this
    /// so an account can't be created for an email whose code was never
    /// confirmed.
    pub async fn mark_email_authenticated(&self, email: &str) {
        self.authenticated_emails.put_with_ttl(email.to_owned(), (), AUTHENTICATED_EMAIL_TTL).await;
    }

    pub async fn take_authenticated_email(&self, email: &str) -> bool {
        let marked = self.authenticated_emails.get(email).await.is_some();
        if marked {
            self.authenticated_emails.remove(email).await;
        }
        marked
    }

    /// Background sweep dropping expired relation, verify-code, and
    /// authenticated-email entries. Groups and presence carry no TTL and
    /// are untouched here.
    pub async fn run_eviction(&self) -> ! {
        let mut interval = tokio::time::interval(EVICTION_INTERVAL);
        loop {
            interval.tick().await;
            self.friends.evict_expired().await;
            self.veri_codes.evict_expired().await;
            self.authenticated_emails.evict_expired().await;
        }
    }
}
