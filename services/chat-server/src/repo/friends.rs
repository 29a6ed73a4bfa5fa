use rt_chat_protocol::FriendEntry;
use sqlx::MySqlPool;

/// Starts a friend request, unless one is already outstanding for this pair.
/// A pair that has already been resolved once (accepted, then unfriended; or
/// refused) is free to request again -- only a live unmanaged row blocks a
/// duplicate, so this is a plain existence check rather than `INSERT IGNORE`
/// against a uniqueness constraint.
pub async fn create_request(pool: &MySqlPool, requester_id: &str, target_id: &str) -> Result<(), sqlx::Error> {
    let pending = sqlx::query!(
        "SELECT 1 AS present FROM friend_requests WHERE requester_id = ? AND target_id = ? AND managed = FALSE",
        requester_id,
        target_id
    )
    .fetch_optional(pool)
    .await?;
    if pending.is_some() {
        return Ok(());
    }
    sqlx::query!(
        "INSERT INTO friend_requests (requester_id, target_id) VALUES (?, ?)",
        requester_id,
        target_id
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Outcome of trying to claim a pending friend request for resolution.
pub enum ManageOutcome {
    /// This call won the race and must go on to mutate `friends` / notify.
    Claimed,
    /// Someone already resolved this request; reply `MANAGED` and stop.
    AlreadyManaged,
    /// No such request was ever made between this pair.
    NeverExisted,
}

/// Atomically claims a friend request for resolution. A concurrent
/// `ACCEPT_FREQ`/`REFUSE_FREQ` pair for the same (requester, target) races on
/// the single `UPDATE`; the loser must still be able to tell "already
/// resolved" apart from "never existed", so a failed claim falls through to
/// a plain existence check -- the row is never deleted on resolution (see
/// `accept_request`), so that check is unambiguous. Mirrors the discipline
/// `join_requests::try_manage` uses for the group-admin race.
pub async fn try_manage_request(
    pool: &MySqlPool,
    requester_id: &str,
    target_id: &str,
) -> Result<ManageOutcome, sqlx::Error> {
    let result = sqlx::query!(
        "UPDATE friend_requests SET managed = TRUE WHERE requester_id = ? AND target_id = ? AND managed = FALSE",
        requester_id,
        target_id
    )
    .execute(pool)
    .await?;
    if result.rows_affected() == 1 {
        return Ok(ManageOutcome::Claimed);
    }
    let existed = sqlx::query!(
        "SELECT 1 AS present FROM friend_requests WHERE requester_id = ? AND target_id = ?",
        requester_id,
        target_id
    )
    .fetch_optional(pool)
    .await?
    .is_some();
    Ok(if existed { ManageOutcome::AlreadyManaged } else { ManageOutcome::NeverExisted })
}

/// Accepting a request makes the friendship mutual: one `friends` row per
/// direction, both unblocked. The resolved `friend_requests` row is left in
/// place with `managed = TRUE` as a record, not deleted.
pub async fn accept_request(pool: &MySqlPool, requester_id: &str, target_id: &str) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query!(
        "INSERT IGNORE INTO friends (owner_id, friend_id) VALUES (?, ?)",
        requester_id,
        target_id
    )
    .execute(&mut *tx)
    .await?;
    sqlx::query!(
        "INSERT IGNORE INTO friends (owner_id, friend_id) VALUES (?, ?)",
        target_id,
        requester_id
    )
    .execute(&mut *tx)
    .await?;
    tx.commit().await
}

pub async fn remove_friend(pool: &MySqlPool, owner_id: &str, friend_id: &str) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query!(
        "DELETE FROM friends WHERE owner_id = ? AND friend_id = ?",
        owner_id,
        friend_id
    )
    .execute(&mut *tx)
    .await?;
    sqlx::query!(
        "DELETE FROM friends WHERE owner_id = ? AND friend_id = ?",
        friend_id,
        owner_id
    )
    .execute(&mut *tx)
    .await?;
    tx.commit().await
}

pub async fn set_blocked(pool: &MySqlPool, owner_id: &str, friend_id: &str, blocked: bool) -> Result<(), sqlx::Error> {
    sqlx::query!(
        "UPDATE friends SET blocked = ? WHERE owner_id = ? AND friend_id = ?",
        blocked,
        owner_id,
        friend_id
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// True when `owner_id` has blocked `other_id` -- checked from the
/// receiver's row, since blocking is a one-directional silencing choice.
pub async fn is_blocked(pool: &MySqlPool, owner_id: &str, other_id: &str) -> Result<bool, sqlx::Error> {
    let row = sqlx::query!(
        "SELECT blocked AS `blocked: bool` FROM friends WHERE owner_id = ? AND friend_id = ?",
        owner_id,
        other_id
    )
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some_and(|r| r.blocked))
}

pub async fn list_friends(pool: &MySqlPool, owner_id: &str) -> Result<Vec<FriendEntry>, sqlx::Error> {
    let rows = sqlx::query!(
        "SELECT friend_id, blocked AS `blocked: bool` FROM friends WHERE owner_id = ?",
        owner_id
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|r| FriendEntry { id: r.friend_id, blocked: r.blocked })
        .collect())
}

pub async fn are_friends(pool: &MySqlPool, owner_id: &str, other_id: &str) -> Result<bool, sqlx::Error> {
    let row = sqlx::query!(
        "SELECT 1 AS present FROM friends WHERE owner_id = ? AND friend_id = ?",
        owner_id,
        other_id
    )
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}
