use rt_chat_protocol::{ChannelKind, CommandAction};

use crate::error::ChatError;
use crate::repo;
use crate::state::AppState;
use crate::ws_conn::ConnectionWriter;

/// Everything a handler needs to act on a single live connection: which
/// channel it is, the identity it's bound to (if `REMEMBER_CONNECTION` has
/// run), and a way to write straight back to the peer without going through
/// the registry (useful before binding has happened at all, e.g. during
/// `SIGN_IN`).
pub struct ConnCtx {
    pub state: AppState,
    pub channel: ChannelKind,
    pub user_id: Option<String>,
    pub writer: ConnectionWriter,
}

impl ConnCtx {
    pub async fn reply(&self, action: CommandAction) {
        self.writer.send(rt_chat_protocol::Envelope::command(action)).await;
    }

    pub async fn reply_result(&self, result: Result<CommandAction, ChatError>) {
        match result {
            Ok(action) => self.reply(action).await,
            Err(err) => self.reply(err.to_refusal()).await,
        }
    }

    /// Sends `action` to `user_id`'s connection on `channel`, if bound.
    /// Silently drops the notification when the user is offline on that
    /// channel -- notifications are best-effort, unlike chat messages which
    /// fall back to durable persistence.
    pub async fn notify(&self, user_id: &str, channel: ChannelKind, action: CommandAction) {
        if let Some(writer) = self.state.registry.get(user_id, channel).await {
            writer.send(rt_chat_protocol::Envelope::command(action)).await;
        }
    }

    /// Persists `action` for `user_id` before anything else, then attempts
    /// immediate delivery if they're online on `channel`. The persisted row
    /// survives a missed delivery; `online_init` drains whatever's left the
    /// next time the user connects.
    pub async fn notify_or_queue(&self, user_id: &str, channel: ChannelKind, action: CommandAction) -> Result<(), ChatError> {
        let command_id = repo::pending_commands::enqueue(&self.state.pool, user_id, &action).await?;
        if let Some(writer) = self.state.registry.get(user_id, channel).await {
            writer.send(rt_chat_protocol::Envelope::command(action)).await;
            repo::pending_commands::mark_delivered(&self.state.pool, command_id).await?;
        }
        Ok(())
    }

    pub fn require_auth(&self) -> Result<&str, ChatError> {
        self.user_id.as_deref().ok_or_else(|| ChatError::Auth("not signed in".to_owned()))
    }
}
