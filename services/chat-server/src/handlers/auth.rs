use rand::Rng;
use rt_chat_protocol::CommandAction;

use crate::conn_ctx::ConnCtx;
use crate::error::ChatError;
use crate::password::{hash_password, verify_password};
use crate::{repo, password};

/// `SIGN_IN { principal, pw_hash }`. `principal` may be a user id or an
/// email; both are tried since the original client lets a user log in with
/// either.
pub async fn sign_in(ctx: &mut ConnCtx, principal: &str, pw_hash: &str) -> Result<CommandAction, ChatError> {
    let row = match repo::users::find_by_user_id(&ctx.state.pool, principal).await? {
        Some(row) => Some(row),
        None => repo::users::find_by_email(&ctx.state.pool, principal).await?,
    };
    let row = row.ok_or_else(|| ChatError::Auth("unknown account".to_owned()))?;

    if !verify_password(pw_hash, &row.password_hash) {
        return Err(ChatError::Auth("wrong password".to_owned()));
    }

    ctx.user_id = Some(row.user_id.clone());
    ctx.state.cache.set_online(&row.user_id, true).await;
    Ok(CommandAction::AcceptLogin { other_identifier: row.user_id })
}

pub async fn sign_out(ctx: &mut ConnCtx) -> Result<CommandAction, ChatError> {
    let user_id = ctx.require_auth()?.to_owned();
    ctx.state.registry.unbind(&user_id).await;
    ctx.state.mark_offline_and_broadcast(&user_id).await;
    ctx.user_id = None;
    Ok(CommandAction::Success)
}

/// `GET_VERI_CODE { email }`: issues a 6-digit code and caches it for 300s.
/// Delivery (SMTP) is out of scope here -- the code is only cached, never
/// transmitted.
pub async fn get_veri_code(ctx: &ConnCtx, email: &str) -> Result<CommandAction, ChatError> {
    let code: u32 = rand::thread_rng().gen_range(0..1_000_000);
    let code = format!("{code:06}");
    ctx.state.cache.put_veri_code(email, code).await;
    Ok(CommandAction::AcceptPostCode)
}

pub async fn authentication(ctx: &ConnCtx, email: &str, code: &str) -> Result<CommandAction, ChatError> {
    let expected = ctx.state.cache.take_veri_code(email).await;
    if expected.as_deref() != Some(code) {
        return Err(ChatError::Auth("invalid or expired verification code".to_owned()));
    }
    ctx.state.cache.mark_email_authenticated(email).await;
    Ok(CommandAction::SuccessAuth)
}

/// `REGISTER` is only valid right after `AUTHENTICATION` confirmed the
/// same email -- the flag set there is consumed here, so one verified
/// code only ever creates one account.
pub async fn register(
    ctx: &ConnCtx,
    email: &str,
    user_id: &str,
    pw_hash: &str,
) -> Result<CommandAction, ChatError> {
    if !ctx.state.cache.take_authenticated_email(email).await {
        return Err(ChatError::Auth("email not verified by AUTHENTICATION".to_owned()));
    }
    if repo::users::user_id_taken(&ctx.state.pool, user_id).await? {
        return Err(ChatError::Integrity("user id already taken".to_owned()));
    }
    if repo::users::find_by_email(&ctx.state.pool, email).await?.is_some() {
        return Err(ChatError::Integrity("email already registered".to_owned()));
    }
    let stored_hash = hash_password(pw_hash).map_err(|e| ChatError::Integrity(e.to_string()))?;
    repo::users::create_user(&ctx.state.pool, user_id, email, &stored_hash).await?;
    Ok(CommandAction::AcceptRegi)
}

pub async fn change_password(
    ctx: &ConnCtx,
    old_pw_hash: &str,
    new_pw_hash: &str,
) -> Result<CommandAction, ChatError> {
    let user_id = ctx.require_auth()?;
    let row = repo::users::find_by_user_id(&ctx.state.pool, user_id)
        .await?
        .ok_or_else(|| ChatError::NotFound("account".to_owned()))?;
    if !verify_password(old_pw_hash, &row.password_hash) {
        return Err(ChatError::Auth("wrong current password".to_owned()));
    }
    let stored = password::hash_password(new_pw_hash).map_err(|e| ChatError::Integrity(e.to_string()))?;
    repo::users::update_password(&ctx.state.pool, user_id, &stored).await?;
    Ok(CommandAction::Success)
}

pub async fn change_username(ctx: &mut ConnCtx, new_user_id: &str) -> Result<CommandAction, ChatError> {
    let old_user_id = ctx.require_auth()?.to_owned();
    if repo::users::user_id_taken(&ctx.state.pool, new_user_id).await? {
        return Err(ChatError::Integrity("user id already taken".to_owned()));
    }
    repo::users::rename_user(&ctx.state.pool, &old_user_id, new_user_id).await?;
    ctx.state.cache.invalidate_friends(&old_user_id).await;
    ctx.user_id = Some(new_user_id.to_owned());
    Ok(CommandAction::Success)
}

/// `FIND_PASSWORD { email, code, new_pw_hash }`: reuses the same
/// verify-code cache as `Authentication` rather than a separate flow.
pub async fn find_password(
    ctx: &ConnCtx,
    email: &str,
    code: &str,
    new_pw_hash: &str,
) -> Result<CommandAction, ChatError> {
    let expected = ctx.state.cache.take_veri_code(email).await;
    if expected.as_deref() != Some(code) {
        return Err(ChatError::Auth("invalid or expired verification code".to_owned()));
    }
    let row = repo::users::find_by_email(&ctx.state.pool, email)
        .await?
        .ok_or_else(|| ChatError::NotFound("account".to_owned()))?;
    let stored = password::hash_password(new_pw_hash).map_err(|e| ChatError::Integrity(e.to_string()))?;
    repo::users::update_password(&ctx.state.pool, &row.user_id, &stored).await?;
    Ok(CommandAction::Success)
}
