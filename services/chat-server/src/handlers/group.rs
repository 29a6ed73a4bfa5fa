use rt_chat_protocol::{ChannelKind, CommandAction};
use uuid::Uuid;

use crate::conn_ctx::ConnCtx;
use crate::error::ChatError;
use crate::repo;

fn new_group_id() -> String {
    format!("Group_{}", Uuid::new_v4().simple())
}

pub async fn create_group(ctx: &ConnCtx, name: &str) -> Result<CommandAction, ChatError> {
    let owner = ctx.require_auth()?;
    let group_id = new_group_id();
    repo::groups::create_group(&ctx.state.pool, &group_id, name, owner).await?;
    Ok(CommandAction::GiveGroupId { group_id })
}

pub async fn search_group(ctx: &ConnCtx, group_id: &str) -> Result<CommandAction, ChatError> {
    match repo::groups::search(&ctx.state.pool, group_id).await? {
        Some((name, _owner)) => Ok(CommandAction::NotifyExist { id: group_id.to_owned(), name: Some(name) }),
        None => Ok(CommandAction::NotifyNotExist),
    }
}

/// A member-initiated join request. Sits pending until an admin calls
/// `ACCEPT_GREQ`/`REFUSE_GREQ`. Every admin of the group is a valid
/// resolver, so every admin gets the notification -- queued for whichever
/// ones are offline.
pub async fn join_group_req(ctx: &ConnCtx, group_id: &str) -> Result<CommandAction, ChatError> {
    let requester = ctx.require_auth()?;
    if repo::groups::is_member(&ctx.state.pool, group_id, requester).await? {
        return Err(ChatError::Integrity("already a member".to_owned()));
    }
    repo::groups::search(&ctx.state.pool, group_id)
        .await?
        .ok_or_else(|| ChatError::NotFound(group_id.to_owned()))?;
    let command_id = repo::join_requests::create_join_request(&ctx.state.pool, group_id, requester, None).await?;
    let admins = repo::groups::admin_ids(&ctx.state.pool, group_id).await?;
    for admin in admins {
        ctx.notify_or_queue(
            &admin,
            ChannelKind::Cmd,
            CommandAction::GroupJoinRequest { group_id: group_id.to_owned(), requester: requester.to_owned(), command_id },
        )
        .await?;
    }
    Ok(CommandAction::Success)
}

/// An admin-initiated invite. The pending row's `invited_by` marks it as an
/// invite (rather than a self-join), which flips who is allowed to resolve
/// it in `accept_greq`/`refuse_greq`.
pub async fn invite_to_group_req(
    ctx: &ConnCtx,
    group_id: &str,
    name: &str,
    invitee: &str,
) -> Result<CommandAction, ChatError> {
    let inviter = ctx.require_auth()?;
    if !repo::groups::is_admin(&ctx.state.pool, group_id, inviter).await? {
        return Err(ChatError::Auth("only an admin can invite".to_owned()));
    }
    if repo::groups::is_member(&ctx.state.pool, group_id, invitee).await? {
        return Err(ChatError::Integrity("already a member".to_owned()));
    }
    repo::join_requests::create_join_request(&ctx.state.pool, group_id, invitee, Some(inviter)).await?;
    ctx.notify_or_queue(
        invitee,
        ChannelKind::Cmd,
        CommandAction::GroupInvite { group_id: group_id.to_owned(), name: name.to_owned(), inviter: inviter.to_owned() },
    )
    .await?;
    Ok(CommandAction::Success)
}

async fn authorize_resolution(
    ctx: &ConnCtx,
    row: &repo::join_requests::JoinRequestRow,
) -> Result<(), ChatError> {
    let actor = ctx.require_auth()?;
    match &row.invited_by {
        Some(_) => {
            if actor != row.requester_id {
                return Err(ChatError::Auth("only the invitee can respond to this invite".to_owned()));
            }
        }
        None => {
            if !repo::groups::is_admin(&ctx.state.pool, &row.group_id, actor).await? {
                return Err(ChatError::Auth("only an admin can approve a join request".to_owned()));
            }
        }
    }
    Ok(())
}

pub async fn accept_greq(ctx: &ConnCtx, command_id: i64) -> Result<CommandAction, ChatError> {
    let row = repo::join_requests::fetch(&ctx.state.pool, command_id)
        .await?
        .ok_or_else(|| ChatError::NotFound("join request".to_owned()))?;
    authorize_resolution(ctx, &row).await?;

    if !repo::join_requests::try_manage(&ctx.state.pool, command_id).await? {
        return Ok(CommandAction::Managed);
    }

    repo::groups::add_member(&ctx.state.pool, &row.group_id, &row.requester_id).await?;
    ctx.state.cache.invalidate_group(&row.group_id).await;
    ctx.notify_or_queue(&row.requester_id, ChannelKind::Cmd, CommandAction::Success).await?;
    broadcast_resolution(ctx, &row.group_id, &row.requester_id, CommandAction::Success).await?;
    Ok(CommandAction::Success)
}

pub async fn refuse_greq(ctx: &ConnCtx, command_id: i64) -> Result<CommandAction, ChatError> {
    let row = repo::join_requests::fetch(&ctx.state.pool, command_id)
        .await?
        .ok_or_else(|| ChatError::NotFound("join request".to_owned()))?;
    authorize_resolution(ctx, &row).await?;

    if !repo::join_requests::try_manage(&ctx.state.pool, command_id).await? {
        return Ok(CommandAction::Managed);
    }

    let outcome = CommandAction::Refused { reason: "join request declined".to_owned() };
    ctx.notify_or_queue(&row.requester_id, ChannelKind::Cmd, outcome.clone()).await?;
    broadcast_resolution(ctx, &row.group_id, &row.requester_id, outcome).await?;
    Ok(CommandAction::Success)
}

/// Tells every admin of `group_id` (except `requester`, who was already
/// notified directly) how a `JOIN_GROUP_REQ`/`INVITE_TO_GROUP_REQ` was
/// resolved, whichever admin actually resolved it.
async fn broadcast_resolution(
    ctx: &ConnCtx,
    group_id: &str,
    requester: &str,
    outcome: CommandAction,
) -> Result<(), ChatError> {
    for admin in repo::groups::admin_ids(&ctx.state.pool, group_id).await? {
        if admin != requester {
            ctx.notify_or_queue(&admin, ChannelKind::Cmd, outcome.clone()).await?;
        }
    }
    Ok(())
}

pub async fn leave_group(ctx: &ConnCtx, group_id: &str) -> Result<CommandAction, ChatError> {
    let user_id = ctx.require_auth()?;
    if let Some((_, owner)) = repo::groups::search(&ctx.state.pool, group_id).await? {
        if owner == user_id {
            return Err(ChatError::Integrity("owner must disband the group instead of leaving".to_owned()));
        }
    }
    repo::groups::remove_member(&ctx.state.pool, group_id, user_id).await?;
    ctx.state.cache.invalidate_group(group_id).await;
    Ok(CommandAction::Success)
}

pub async fn disband_group(ctx: &ConnCtx, group_id: &str) -> Result<CommandAction, ChatError> {
    let user_id = ctx.require_auth()?;
    let (_, owner) = repo::groups::search(&ctx.state.pool, group_id)
        .await?
        .ok_or_else(|| ChatError::NotFound(group_id.to_owned()))?;
    if owner != user_id {
        return Err(ChatError::Auth("only the owner can disband the group".to_owned()));
    }
    let members = repo::groups::member_ids(&ctx.state.pool, group_id).await?;
    repo::groups::disband(&ctx.state.pool, group_id).await?;
    ctx.state.cache.invalidate_group(group_id).await;
    for member in members {
        if member != user_id {
            ctx.notify(&member, ChannelKind::Cmd, CommandAction::Refused { reason: format!("group {group_id} was disbanded") }).await;
        }
    }
    Ok(CommandAction::Success)
}

/// An admin can remove any non-admin member; the owner can remove anyone,
/// admins included (an admin removing a fellow admin is not authorized --
/// only the owner outranks another admin).
pub async fn remove_from_group(ctx: &ConnCtx, group_id: &str, member: &str) -> Result<CommandAction, ChatError> {
    let actor = ctx.require_auth()?;
    let (_, owner) = repo::groups::search(&ctx.state.pool, group_id)
        .await?
        .ok_or_else(|| ChatError::NotFound(group_id.to_owned()))?;
    let is_owner = actor == owner;
    if !is_owner {
        if !repo::groups::is_admin(&ctx.state.pool, group_id, actor).await? {
            return Err(ChatError::Auth("only an admin can remove members".to_owned()));
        }
        if repo::groups::is_admin(&ctx.state.pool, group_id, member).await? {
            return Err(ChatError::Auth("only the owner can remove an admin".to_owned()));
        }
    }
    repo::groups::remove_member(&ctx.state.pool, group_id, member).await?;
    ctx.state.cache.invalidate_group(group_id).await;
    let outcome = CommandAction::Refused { reason: format!("removed from group {group_id}") };
    ctx.notify_or_queue(member, ChannelKind::Cmd, outcome.clone()).await?;
    broadcast_resolution(ctx, group_id, member, outcome).await?;
    Ok(CommandAction::Success)
}

pub async fn add_admin(ctx: &ConnCtx, group_id: &str, member: &str) -> Result<CommandAction, ChatError> {
    let actor = ctx.require_auth()?;
    let (_, owner) = repo::groups::search(&ctx.state.pool, group_id)
        .await?
        .ok_or_else(|| ChatError::NotFound(group_id.to_owned()))?;
    if owner != actor {
        return Err(ChatError::Auth("only the owner can grant admin".to_owned()));
    }
    repo::groups::set_admin(&ctx.state.pool, group_id, member, true).await?;
    ctx.state.cache.invalidate_group(group_id).await;
    Ok(CommandAction::Success)
}

pub async fn remove_admin(ctx: &ConnCtx, group_id: &str, member: &str) -> Result<CommandAction, ChatError> {
    let actor = ctx.require_auth()?;
    let (_, owner) = repo::groups::search(&ctx.state.pool, group_id)
        .await?
        .ok_or_else(|| ChatError::NotFound(group_id.to_owned()))?;
    if owner != actor {
        return Err(ChatError::Auth("only the owner can revoke admin".to_owned()));
    }
    repo::groups::set_admin(&ctx.state.pool, group_id, member, false).await?;
    ctx.state.cache.invalidate_group(group_id).await;
    Ok(CommandAction::Success)
}
