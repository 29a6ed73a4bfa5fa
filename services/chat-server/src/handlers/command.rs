use rt_chat_protocol::CommandAction;

use crate::conn_ctx::ConnCtx;
use crate::error::ChatError;
use crate::handlers::{auth, connection, file, friend, group};

/// Dispatches one `CommandRequest`'s action to its handler and replies on
/// the CMD connection. `ctx` is `&mut` because a handful of actions
/// (`SIGN_IN`, `SIGN_OUT`, `CHANGE_USERNAME`, `REMEMBER_CONNECTION`) bind or
/// clear the connection's identity as a side effect.
pub async fn dispatch(ctx: &mut ConnCtx, action: CommandAction) {
    match action {
        // --- auth ---
        CommandAction::SignIn { principal, pw_hash } => {
            let result = auth::sign_in(ctx, &principal, &pw_hash).await;
            ctx.reply_result(result).await;
        }
        CommandAction::SignOut => {
            let result = auth::sign_out(ctx).await;
            ctx.reply_result(result).await;
        }
        CommandAction::GetVeriCode { email } => {
            let result = auth::get_veri_code(ctx, &email).await;
            ctx.reply_result(result).await;
        }
        CommandAction::Authentication { email, code } => {
            let result = auth::authentication(ctx, &email, &code).await;
            ctx.reply_result(result).await;
        }
        CommandAction::Register { email, user_id, pw_hash } => {
            let result = auth::register(ctx, &email, &user_id, &pw_hash).await;
            ctx.reply_result(result).await;
        }
        CommandAction::ChangePassword { old_pw_hash, new_pw_hash } => {
            let result = auth::change_password(ctx, &old_pw_hash, &new_pw_hash).await;
            ctx.reply_result(result).await;
        }
        CommandAction::ChangeUsername { new_user_id } => {
            let result = auth::change_username(ctx, &new_user_id).await;
            ctx.reply_result(result).await;
        }
        CommandAction::FindPassword { email, code, new_pw_hash } => {
            let result = auth::find_password(ctx, &email, &code, &new_pw_hash).await;
            ctx.reply_result(result).await;
        }

        // --- connection binding ---
        CommandAction::RememberConnection { user_id, channel } => {
            let result = connection::remember_connection(ctx, &user_id, channel).await;
            ctx.reply_result(result).await;
        }
        CommandAction::OnlineInit { user_id } => {
            let result = connection::online_init(ctx, &user_id).await;
            ctx.reply_result(result).await;
        }
        CommandAction::Heartbeat => {
            let result = connection::heartbeat(ctx).await;
            ctx.reply_result(result).await;
        }

        // --- friendship ---
        CommandAction::SearchPerson { query } => {
            let result = friend::search_person(ctx, &query).await;
            ctx.reply_result(result).await;
        }
        CommandAction::AddFriendReq { target } => {
            let result = friend::add_friend_req(ctx, &target).await;
            ctx.reply_result(result).await;
        }
        CommandAction::AcceptFreq { requester, .. } => {
            let result = friend::accept_freq(ctx, &requester).await;
            ctx.reply_result(result).await;
        }
        CommandAction::RefuseFreq { requester, .. } => {
            let result = friend::refuse_freq(ctx, &requester).await;
            ctx.reply_result(result).await;
        }
        CommandAction::RemoveFriend { other, .. } => {
            let result = friend::remove_friend(ctx, &other).await;
            ctx.reply_result(result).await;
        }
        CommandAction::BlockFriend { other } => {
            let result = friend::block_friend(ctx, &other).await;
            ctx.reply_result(result).await;
        }
        CommandAction::UnblockFriend { other } => {
            let result = friend::unblock_friend(ctx, &other).await;
            ctx.reply_result(result).await;
        }

        // --- group ---
        CommandAction::CreateGroup { name, .. } => {
            let result = group::create_group(ctx, &name).await;
            ctx.reply_result(result).await;
        }
        CommandAction::SearchGroup { group_id } => {
            let result = group::search_group(ctx, &group_id).await;
            ctx.reply_result(result).await;
        }
        CommandAction::JoinGroupReq { group_id, .. } => {
            let result = group::join_group_req(ctx, &group_id).await;
            ctx.reply_result(result).await;
        }
        CommandAction::InviteToGroupReq { group_id, name, invitee, .. } => {
            let result = group::invite_to_group_req(ctx, &group_id, &name, &invitee).await;
            ctx.reply_result(result).await;
        }
        CommandAction::AcceptGreq { command_id, .. } => {
            let result = group::accept_greq(ctx, command_id).await;
            ctx.reply_result(result).await;
        }
        CommandAction::RefuseGreq { command_id, .. } => {
            let result = group::refuse_greq(ctx, command_id).await;
            ctx.reply_result(result).await;
        }
        CommandAction::LeaveGroup { group_id, .. } => {
            let result = group::leave_group(ctx, &group_id).await;
            ctx.reply_result(result).await;
        }
        CommandAction::DisbandGroup { group_id, .. } => {
            let result = group::disband_group(ctx, &group_id).await;
            ctx.reply_result(result).await;
        }
        CommandAction::RemoveFromGroup { group_id, member, .. } => {
            let result = group::remove_from_group(ctx, &group_id, &member).await;
            ctx.reply_result(result).await;
        }
        CommandAction::AddAdmin { group_id, member, .. } => {
            let result = group::add_admin(ctx, &group_id, &member).await;
            ctx.reply_result(result).await;
        }
        CommandAction::RemoveAdmin { group_id, member, .. } => {
            let result = group::remove_admin(ctx, &group_id, &member).await;
            ctx.reply_result(result).await;
        }

        // --- file ---
        CommandAction::UploadFile { file_name, file_hash, file_size } => {
            let result = file::upload_file(ctx, &file_name, &file_hash, file_size).await;
            ctx.reply_result(result).await;
        }
        CommandAction::DownloadFile { file_id } => match file::download_file(ctx, &file_id).await {
            Ok(action) => ctx.reply(action).await,
            Err(err) => ctx.reply(deny_file_req(&err)).await,
        },

        // --- server -> client only; a client sending one of these is a
        // protocol violation rather than a recognized request ---
        other => {
            ctx.reply(CommandAction::Refused { reason: format!("{other:?} is not a client-issued command") }).await;
        }
    }
}

fn deny_file_req(err: &ChatError) -> CommandAction {
    match err.to_refusal() {
        CommandAction::Refused { reason } => CommandAction::DenyFileReq { reason },
        other => other,
    }
}
