use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rt_chat_protocol::{ChannelKind, CommandAction, CommandRequest, Envelope, Payload};
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::ws_conn::{now_millis, ConnectionWriter};

/// The three connections bound to a single user.
#[derive(Default, Clone)]
pub struct Slots {
    pub msg: Option<ConnectionWriter>,
    pub cmd: Option<ConnectionWriter>,
    pub data: Option<ConnectionWriter>,
}

impl Slots {
    fn get(&self, channel: ChannelKind) -> Option<&ConnectionWriter> {
        match channel {
            ChannelKind::Msg => self.msg.as_ref(),
            ChannelKind::Cmd => self.cmd.as_ref(),
            ChannelKind::Data => self.data.as_ref(),
        }
    }

    fn set(&mut self, channel: ChannelKind, writer: ConnectionWriter) {
        match channel {
            ChannelKind::Msg => self.msg = Some(writer),
            ChannelKind::Cmd => self.cmd = Some(writer),
            ChannelKind::Data => self.data = Some(writer),
        }
    }

    fn is_empty(&self) -> bool {
        self.msg.is_none() && self.cmd.is_none() && self.data.is_none()
    }

    /// The freshest `last_active` timestamp across the bound slots.
    fn last_active(&self) -> i64 {
        [&self.msg, &self.cmd, &self.data]
            .into_iter()
            .flatten()
            .map(ConnectionWriter::last_active_millis)
            .max()
            .unwrap_or(0)
    }
}

/// Maps `user_id -> {msg, cmd, data}`. Each user's triple is guarded by its
/// own lock -- treat each user as its own serial actor -- so cross-user
/// `bind`/`unbind`/`get`/`touch` calls proceed in parallel.
pub struct ConnectionRegistry {
    users: RwLock<HashMap<String, Arc<Mutex<Slots>>>>,
    heartbeat_misses: RwLock<HashMap<String, u32>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        ConnectionRegistry {
            users: RwLock::new(HashMap::new()),
            heartbeat_misses: RwLock::new(HashMap::new()),
        }
    }

    async fn slot_for(&self, user_id: &str) -> Arc<Mutex<Slots>> {
        if let Some(slot) = self.users.read().await.get(user_id) {
            return slot.clone();
        }
        let mut write = self.users.write().await;
        write
            .entry(user_id.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(Slots::default())))
            .clone()
    }

    /// Registers `writer` in `channel`'s slot for `user_id`. A prior
    /// connection in that slot is dropped -- last writer wins, so a
    /// reconnecting client supersedes its own ghost.
    pub async fn bind(&self, user_id: &str, channel: ChannelKind, writer: ConnectionWriter) {
        let slot = self.slot_for(user_id).await;
        let mut guard = slot.lock().await;
        guard.set(channel, writer);
        self.heartbeat_misses.write().await.remove(user_id);
        info!(user_id, channel = channel.as_str(), "connection bound");
    }

    pub async fn get(&self, user_id: &str, channel: ChannelKind) -> Option<ConnectionWriter> {
        let slot = {
            let map = self.users.read().await;
            map.get(user_id)?.clone()
        };
        let guard = slot.lock().await;
        guard.get(channel).cloned()
    }

    /// Closes and removes all three slots and drops any heartbeat-miss
    /// bookkeeping for `user_id`.
    pub async fn unbind(&self, user_id: &str) {
        self.users.write().await.remove(user_id);
        self.heartbeat_misses.write().await.remove(user_id);
        info!(user_id, "connection unbound");
    }

    /// Clears a single channel's slot, e.g. when that connection's socket
    /// closes while the user's other two channels stay live. Removes the
    /// user entirely once all three slots are empty, same as `unbind`, and
    /// reports that case to the caller so it can treat the user as fully
    /// offline (presence update, `FRIEND_OFFLINE` broadcast).
    pub async fn unbind_channel(&self, user_id: &str, channel: ChannelKind) -> bool {
        let slot = {
            let map = self.users.read().await;
            match map.get(user_id) {
                Some(slot) => slot.clone(),
                None => return false,
            }
        };
        let empty = {
            let mut guard = slot.lock().await;
            match channel {
                ChannelKind::Msg => guard.msg = None,
                ChannelKind::Cmd => guard.cmd = None,
                ChannelKind::Data => guard.data = None,
            }
            guard.is_empty()
        };
        if empty {
            self.users.write().await.remove(user_id);
            self.heartbeat_misses.write().await.remove(user_id);
        }
        info!(user_id, channel = channel.as_str(), "connection unbound");
        empty
    }

    pub async fn touch(&self, user_id: &str, channel: ChannelKind) {
        let slot = self.slot_for(user_id).await;
        let guard = slot.lock().await;
        if let Some(writer) = guard.get(channel) {
            writer.touch();
        }
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        let map = self.users.read().await;
        match map.get(user_id) {
            Some(slot) => !slot.lock().await.is_empty(),
            None => false,
        }
    }

    /// A snapshot of currently-bound user ids, taken without holding any
    /// per-user lock -- the heartbeat sweep iterates this, not the map
    /// itself, so it never blocks a `bind`/`unbind` while scanning.
    async fn snapshot_users(&self) -> Vec<String> {
        self.users.read().await.keys().cloned().collect()
    }

    async fn send_cmd(&self, user_id: &str, action: CommandAction) -> bool {
        if let Some(writer) = self.get(user_id, ChannelKind::Cmd).await {
            writer
                .send(Envelope {
                    user_id: None,
                    payload: Payload::CommandRequest(CommandRequest {
                        action,
                        sender: String::new(),
                        args: vec![],
                    }),
                })
                .await
        } else {
            false
        }
    }
}

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);
pub const HEARTBEAT_TIMEOUT_MILLIS: i64 = 90_000;

/// Scans all bound users at a fixed interval; a user whose freshest
/// `last_active` exceeds the timeout gets a `HEARTBEAT` on CMD. Two
/// consecutive misses unbind the user and broadcast `FRIEND_OFFLINE` to
/// each online friend.
pub async fn heartbeat_sweep<F, Fut>(registry: Arc<ConnectionRegistry>, mut on_offline: F)
where
    F: FnMut(String) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
    interval.tick().await;
    loop {
        interval.tick().await;
        sweep_once(&registry, &mut on_offline).await;
    }
}

async fn sweep_once<F, Fut>(registry: &Arc<ConnectionRegistry>, on_offline: &mut F)
where
    F: FnMut(String) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let now = now_millis();
    for user_id in registry.snapshot_users().await {
        let last_active = {
            let map = registry.users.read().await;
            match map.get(&user_id) {
                Some(slot) => slot.lock().await.last_active(),
                None => continue,
            }
        };
        if now - last_active <= HEARTBEAT_TIMEOUT_MILLIS {
            registry.heartbeat_misses.write().await.remove(&user_id);
            continue;
        }

        let mut misses = registry.heartbeat_misses.write().await;
        let count = misses.entry(user_id.clone()).or_insert(0);
        *count += 1;
        let count = *count;
        drop(misses);

        if count >= 2 {
            registry.unbind(&user_id).await;
            on_offline(user_id).await;
        } else {
            registry.send_cmd(&user_id, CommandAction::Heartbeat).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writer() -> (ConnectionWriter, tokio::sync::mpsc::Receiver<Envelope>) {
        let (w, rx, _) = ConnectionWriter::new();
        (w, rx)
    }

    #[tokio::test]
    async fn bind_then_get_returns_the_same_connection() {
        let registry = ConnectionRegistry::new();
        let (w, _rx) = writer();
        registry.bind("alice", ChannelKind::Cmd, w).await;
        assert!(registry.get("alice", ChannelKind::Cmd).await.is_some());
        assert!(registry.get("alice", ChannelKind::Msg).await.is_none());
    }

    #[tokio::test]
    async fn rebind_replaces_prior_connection_last_writer_wins() {
        let registry = ConnectionRegistry::new();
        let (w1, _rx1) = writer();
        let (w2, _rx2) = writer();
        registry.bind("alice", ChannelKind::Cmd, w1).await;
        registry.bind("alice", ChannelKind::Cmd, w2.clone()).await;

        let env = Envelope { user_id: None, payload: rt_chat_protocol::Payload::CommandRequest(CommandRequest { action: CommandAction::Heartbeat, sender: String::new(), args: vec![] }) };
        assert!(w2.send(env.clone()).await);

        let bound = registry.get("alice", ChannelKind::Cmd).await.unwrap();
        assert!(bound.send(env).await);
    }

    #[tokio::test]
    async fn unbind_clears_all_three_slots() {
        let registry = ConnectionRegistry::new();
        let (wm, _) = writer();
        let (wc, _) = writer();
        let (wd, _) = writer();
        registry.bind("alice", ChannelKind::Msg, wm).await;
        registry.bind("alice", ChannelKind::Cmd, wc).await;
        registry.bind("alice", ChannelKind::Data, wd).await;
        assert!(registry.is_online("alice").await);

        registry.unbind("alice").await;
        assert!(!registry.is_online("alice").await);
        assert!(registry.get("alice", ChannelKind::Msg).await.is_none());
    }

    #[tokio::test]
    async fn unbind_channel_clears_only_that_slot() {
        let registry = ConnectionRegistry::new();
        let (wm, _) = writer();
        let (wc, _) = writer();
        registry.bind("alice", ChannelKind::Msg, wm).await;
        registry.bind("alice", ChannelKind::Cmd, wc).await;

        let emptied = registry.unbind_channel("alice", ChannelKind::Msg).await;
        assert!(!emptied, "alice still has a live CMD connection");
        assert!(registry.get("alice", ChannelKind::Msg).await.is_none());
        assert!(registry.get("alice", ChannelKind::Cmd).await.is_some());
        assert!(registry.is_online("alice").await);
    }

    #[tokio::test]
    async fn unbind_channel_removes_the_user_once_all_slots_are_empty() {
        let registry = ConnectionRegistry::new();
        let (wc, _) = writer();
        registry.bind("alice", ChannelKind::Cmd, wc).await;
        let emptied = registry.unbind_channel("alice", ChannelKind::Cmd).await;
        assert!(emptied, "the last channel closing should report the triple as empty");
        assert!(!registry.is_online("alice").await);
    }

    #[tokio::test]
    async fn cross_user_binds_do_not_block_each_other() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (wa, _) = writer();
        let (wb, _) = writer();
        let r1 = registry.clone();
        let r2 = registry.clone();
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { r1.bind("alice", ChannelKind::Cmd, wa).await }),
            tokio::spawn(async move { r2.bind("bob", ChannelKind::Cmd, wb).await })
        );
        ra.unwrap();
        rb.unwrap();
        assert!(registry.get("alice", ChannelKind::Cmd).await.is_some());
        assert!(registry.get("bob", ChannelKind::Cmd).await.is_some());
    }

    #[tokio::test]
    async fn fresh_connection_survives_a_sweep() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (w, _rx) = writer();
        registry.bind("alice", ChannelKind::Cmd, w).await;

        let mut offline_count = 0;
        sweep_once(&registry, &mut |_user| {
            offline_count += 1;
            async {}
        })
        .await;
        assert_eq!(offline_count, 0);
        assert!(registry.is_online("alice").await);
    }

    #[tokio::test]
    async fn stale_connection_is_unbound_after_two_missed_sweeps() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (w, mut rx) = writer();
        registry.bind("alice", ChannelKind::Cmd, w).await;
        {
            let map = registry.users.read().await;
            let slot = map.get("alice").unwrap().clone();
            drop(map);
            let guard = slot.lock().await;
            if let Some(cmd) = &guard.cmd {
                cmd.set_last_active_for_test(now_millis() - HEARTBEAT_TIMEOUT_MILLIS - 1);
            }
        }

        let mut offline_count = 0;
        sweep_once(&registry, &mut |_user| {
            offline_count += 1;
            async {}
        })
        .await;
        assert_eq!(offline_count, 0);
        assert!(registry.is_online("alice").await);
        assert!(rx.try_recv().is_ok(), "a heartbeat probe should have been sent");

        sweep_once(&registry, &mut |_user| {
            offline_count += 1;
            async {}
        })
        .await;
        assert_eq!(offline_count, 1);
        assert!(!registry.is_online("alice").await);
    }

    #[tokio::test]
    async fn a_miss_followed_by_fresh_activity_does_not_compound_into_a_disconnect() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (w, _rx) = writer();
        registry.bind("alice", ChannelKind::Cmd, w).await;
        {
            let map = registry.users.read().await;
            let slot = map.get("alice").unwrap().clone();
            drop(map);
            let guard = slot.lock().await;
            if let Some(cmd) = &guard.cmd {
                cmd.set_last_active_for_test(now_millis() - HEARTBEAT_TIMEOUT_MILLIS - 1);
            }
        }

        let mut offline_count = 0;
        sweep_once(&registry, &mut |_user| {
            offline_count += 1;
            async {}
        })
        .await;
        assert_eq!(offline_count, 0, "first miss only probes, it doesn't disconnect");

        // the user's connection answers the heartbeat before the next sweep.
        {
            let map = registry.users.read().await;
            let slot = map.get("alice").unwrap().clone();
            drop(map);
            let guard = slot.lock().await;
            if let Some(cmd) = &guard.cmd {
                cmd.set_last_active_for_test(now_millis());
            }
        }

        sweep_once(&registry, &mut |_user| {
            offline_count += 1;
            async {}
        })
        .await;
        assert_eq!(offline_count, 0, "a fresh sweep must reset the miss counter, not carry it forward");
        assert!(registry.is_online("alice").await);
    }
}
