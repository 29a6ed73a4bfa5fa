use rt_chat_protocol::{
    ChannelKind, CommandAction, Envelope, FriendStatusList, OfflineMessages, Payload, RelationNetFull,
    SyncItem, SyncItemKind,
};

use crate::conn_ctx::ConnCtx;
use crate::error::ChatError;
use crate::repo;
use crate::ws_conn::now_millis;

pub async fn remember_connection(
    ctx: &mut ConnCtx,
    user_id: &str,
    channel: ChannelKind,
) -> Result<CommandAction, ChatError> {
    if channel != ctx.channel {
        return Err(ChatError::Protocol(format!(
            "REMEMBER_CONNECTION for {} channel received on {} connection",
            channel.as_str(),
            ctx.channel.as_str()
        )));
    }
    if let Some(bound) = &ctx.user_id {
        if bound != user_id {
            return Err(ChatError::Auth("connection already bound to a different user".to_owned()));
        }
    }
    ctx.user_id = Some(user_id.to_owned());
    ctx.state.registry.bind(user_id, channel, ctx.writer.clone()).await;
    Ok(CommandAction::Success)
}

/// Pushes, in order: the full relation net, presence for every friend, the
/// backlog of queued control notifications, then the undelivered message
/// backlog -- a client never sees a chat message before it knows who sent
/// it, and never sees a group/friend notification before the relation net
/// that would explain it. Relation net, presence, and the offline-message
/// backlog all go out on the DATA connection (the spec's sync channel);
/// only the pending-command backlog goes on CMD, the channel `ONLINE_INIT`
/// itself arrived on.
pub async fn online_init(ctx: &ConnCtx, user_id: &str) -> Result<CommandAction, ChatError> {
    if ctx.user_id.as_deref() != Some(user_id) {
        return Err(ChatError::Auth("ONLINE_INIT for an unbound user".to_owned()));
    }
    let data = ctx.state.registry.get(user_id, ChannelKind::Data).await;

    let friends = match ctx.state.cache.friends_of(user_id).await {
        Some(friends) => friends,
        None => {
            let friends = repo::friends::list_friends(&ctx.state.pool, user_id).await?;
            ctx.state.cache.put_friends(user_id, friends.clone()).await;
            friends
        }
    };
    let group_ids = repo::groups::groups_for_user(&ctx.state.pool, user_id).await?;
    let mut groups = Vec::with_capacity(group_ids.len());
    for group_id in &group_ids {
        if let Some(group) = ctx.state.cache.group(group_id).await {
            groups.push(group);
        } else if let Some(group) = repo::groups::fetch_group(&ctx.state.pool, group_id).await? {
            ctx.state.cache.put_group(group.clone()).await;
            groups.push(group);
        }
    }
    let net = RelationNetFull { friends: friends.clone(), groups };
    if let Some(data) = &data {
        data.send(Envelope {
            user_id: None,
            payload: Payload::SyncItem(SyncItem {
                kind: SyncItemKind::RelationNetFull,
                content: serde_json::to_string(&net).map_err(|e| ChatError::Protocol(e.to_string()))?,
                timestamp: now_millis(),
            }),
        })
        .await;
    }

    let mut statuses = Vec::with_capacity(friends.len());
    for friend in &friends {
        statuses.push((friend.id.clone(), ctx.state.cache.is_online(&friend.id).await));
    }
    if let Some(data) = &data {
        data.send(Envelope {
            user_id: None,
            payload: Payload::SyncItem(SyncItem {
                kind: SyncItemKind::AllFriendStatus,
                content: serde_json::to_string(&FriendStatusList(statuses))
                    .map_err(|e| ChatError::Protocol(e.to_string()))?,
                timestamp: now_millis(),
            }),
        })
        .await;
    }

    for row in repo::pending_commands::fetch_undelivered(&ctx.state.pool, user_id).await? {
        ctx.writer.send(Envelope::command(row.action)).await;
        repo::pending_commands::mark_delivered(&ctx.state.pool, row.command_id).await?;
    }

    let pending = repo::messages::fetch_pending(&ctx.state.pool, user_id).await?;
    if !pending.is_empty() {
        if let Some(data) = &data {
            data.send(Envelope { user_id: None, payload: Payload::OfflineMessages(OfflineMessages { messages: pending }) })
                .await;
            repo::messages::mark_delivered(&ctx.state.pool, user_id).await?;
        }
    }

    for friend in &ctx.state.cache.friends_of(user_id).await.unwrap_or_default() {
        if ctx.state.cache.is_online(&friend.id).await {
            ctx.notify(&friend.id, ChannelKind::Cmd, CommandAction::FriendOnline { user_id: user_id.to_owned() }).await;
        }
    }

    Ok(CommandAction::Success)
}

pub async fn heartbeat(ctx: &ConnCtx) -> Result<CommandAction, ChatError> {
    if let Some(user_id) = &ctx.user_id {
        ctx.state.registry.touch(user_id, ctx.channel).await;
    }
    Ok(CommandAction::Heartbeat)
}
