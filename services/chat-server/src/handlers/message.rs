use rt_chat_protocol::{ChannelKind, ChatMessage, Envelope, Payload};

use crate::conn_ctx::ConnCtx;
use crate::error::ChatError;
use crate::repo;

/// Persists `msg` and fans it out. The wire timestamp is advisory only --
/// it's overwritten with the server's receive time before anything touches
/// the store, so ordering never depends on a client clock. The message is
/// always persisted, even when every recipient has the sender blocked --
/// only forwarding is skipped, so a blocked sender never learns they were
/// blocked and a later unblock doesn't lose the history in between. A group
/// message fans out to every member but the sender; an individual member's
/// own block of the sender is honored the same way, per member.
pub async fn handle_chat_message(ctx: &ConnCtx, mut msg: ChatMessage) -> Result<(), ChatError> {
    let sender = ctx.require_auth()?;
    if sender != msg.sender {
        return Err(ChatError::Protocol("message sender does not match the bound connection".to_owned()));
    }
    if msg.text.is_empty() && msg.payload.is_none() {
        return Err(ChatError::Integrity("message has no text and no attachment".to_owned()));
    }
    msg.timestamp = crate::ws_conn::now_millis();

    let recipients = if msg.is_group {
        repo::groups::member_ids(&ctx.state.pool, &msg.receiver).await?.into_iter().filter(|m| m != sender).collect()
    } else {
        vec![msg.receiver.clone()]
    };

    if recipients.is_empty() {
        return Ok(());
    }

    let message_id = repo::messages::insert(&ctx.state.pool, &msg, &recipients).await?;

    for recipient in &recipients {
        if repo::friends::is_blocked(&ctx.state.pool, recipient, sender).await? {
            continue;
        }
        if let Some(writer) = ctx.state.registry.get(recipient, ChannelKind::Msg).await {
            let delivered = writer
                .send(Envelope { user_id: None, payload: Payload::ChatMessage(msg.clone()) })
                .await;
            if delivered {
                repo::messages::mark_recipient_delivered(&ctx.state.pool, message_id, recipient).await?;
            }
        }
    }

    Ok(())
}
