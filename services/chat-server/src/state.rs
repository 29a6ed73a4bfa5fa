use std::sync::Arc;

use rt_chat_protocol::{ChannelKind, CommandAction, Envelope};
use sqlx::MySqlPool;

use crate::cache::RelationCache;
use crate::fileio::SharedFileManager;
use crate::registry::ConnectionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub pool: MySqlPool,
    pub registry: Arc<ConnectionRegistry>,
    pub cache: Arc<RelationCache>,
    pub files: SharedFileManager,
}

impl AppState {
    pub fn new(pool: MySqlPool, storage_dir: impl Into<std::path::PathBuf>) -> Self {
        AppState {
            pool,
            registry: Arc::new(ConnectionRegistry::new()),
            cache: Arc::new(RelationCache::new()),
            files: Arc::new(crate::fileio::FileManager::new(storage_dir)),
        }
    }

    /// Marks `user_id` offline in the presence cache and broadcasts
    /// `FRIEND_OFFLINE` to each friend who is currently online. Shared by
    /// every path that can take a user from online to offline: `SIGN_OUT`,
    /// a closed socket dropping a user's last bound channel, and a missed
    /// heartbeat pair.
    pub async fn mark_offline_and_broadcast(&self, user_id: &str) {
        self.cache.set_online(user_id, false).await;
        if let Some(friends) = self.cache.friends_of(user_id).await {
            for friend in friends {
                if self.cache.is_online(&friend.id).await {
                    if let Some(writer) = self.registry.get(&friend.id, ChannelKind::Cmd).await {
                        writer
                            .send(Envelope::command(CommandAction::FriendOffline { user_id: user_id.to_owned() }))
                            .await;
                    }
                }
            }
        }
    }
}
