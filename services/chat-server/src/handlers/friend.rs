use rt_chat_protocol::{ChannelKind, CommandAction};

use crate::conn_ctx::ConnCtx;
use crate::error::ChatError;
use crate::repo;

pub async fn search_person(ctx: &ConnCtx, query: &str) -> Result<CommandAction, ChatError> {
    let matches = repo::users::search(&ctx.state.pool, query).await?;
    match matches.into_iter().find(|u| u.user_id == query) {
        Some(user) => {
            let name = user.shown_name().to_owned();
            Ok(CommandAction::NotifyExist { id: user.user_id, name: Some(name) })
        }
        None => Ok(CommandAction::NotifyNotExist),
    }
}

pub async fn add_friend_req(ctx: &ConnCtx, target: &str) -> Result<CommandAction, ChatError> {
    let requester = ctx.require_auth()?;
    if requester == target {
        return Err(ChatError::Integrity("cannot friend yourself".to_owned()));
    }
    if repo::users::find_by_user_id(&ctx.state.pool, target).await?.is_none() {
        return Err(ChatError::NotFound(target.to_owned()));
    }
    if repo::friends::are_friends(&ctx.state.pool, requester, target).await? {
        return Err(ChatError::Integrity("already friends".to_owned()));
    }
    repo::friends::create_request(&ctx.state.pool, requester, target).await?;
    ctx.notify_or_queue(target, ChannelKind::Cmd, CommandAction::NotifyExist { id: requester.to_owned(), name: None }).await?;
    Ok(CommandAction::Success)
}

/// Resolves a pending friend request. A concurrent `ACCEPT_FREQ`/
/// `REFUSE_FREQ` pair for the same (requester, target) races on
/// `try_manage_request`'s compare-and-set; the loser gets `MANAGED` and
/// makes no further change.
pub async fn accept_freq(ctx: &ConnCtx, requester: &str) -> Result<CommandAction, ChatError> {
    let target = ctx.require_auth()?;
    match repo::friends::try_manage_request(&ctx.state.pool, requester, target).await? {
        repo::friends::ManageOutcome::Claimed => {
            repo::friends::accept_request(&ctx.state.pool, requester, target).await?;
            ctx.state.cache.invalidate_friends(requester).await;
            ctx.state.cache.invalidate_friends(target).await;
            ctx.notify(requester, ChannelKind::Cmd, CommandAction::Success).await;
            Ok(CommandAction::Success)
        }
        repo::friends::ManageOutcome::AlreadyManaged => Ok(CommandAction::Managed),
        repo::friends::ManageOutcome::NeverExisted => Err(ChatError::NotFound("friend request".to_owned())),
    }
}

pub async fn refuse_freq(ctx: &ConnCtx, requester: &str) -> Result<CommandAction, ChatError> {
    let target = ctx.require_auth()?;
    match repo::friends::try_manage_request(&ctx.state.pool, requester, target).await? {
        repo::friends::ManageOutcome::Claimed => Ok(CommandAction::Success),
        repo::friends::ManageOutcome::AlreadyManaged => Ok(CommandAction::Managed),
        repo::friends::ManageOutcome::NeverExisted => Err(ChatError::NotFound("friend request".to_owned())),
    }
}

pub async fn remove_friend(ctx: &ConnCtx, other: &str) -> Result<CommandAction, ChatError> {
    let user_id = ctx.require_auth()?;
    repo::friends::remove_friend(&ctx.state.pool, user_id, other).await?;
    ctx.state.cache.invalidate_friends(user_id).await;
    ctx.state.cache.invalidate_friends(other).await;
    ctx.notify_or_queue(
        other,
        ChannelKind::Cmd,
        CommandAction::Refused { reason: format!("{user_id} removed you as a friend") },
    )
    .await?;
    Ok(CommandAction::Success)
}

pub async fn block_friend(ctx: &ConnCtx, other: &str) -> Result<CommandAction, ChatError> {
    let user_id = ctx.require_auth()?;
    repo::friends::set_blocked(&ctx.state.pool, user_id, other, true).await?;
    ctx.state.cache.invalidate_friends(user_id).await;
    Ok(CommandAction::Success)
}

pub async fn unblock_friend(ctx: &ConnCtx, other: &str) -> Result<CommandAction, ChatError> {
    let user_id = ctx.require_auth()?;
    repo::friends::set_blocked(&ctx.state.pool, user_id, other, false).await?;
    ctx.state.cache.invalidate_friends(user_id).await;
    Ok(CommandAction::Success)
}
