use sqlx::MySqlPool;

pub struct JoinRequestRow {
    pub group_id: String,
    pub requester_id: String,
    pub invited_by: Option<String>,
}

pub async fn create_join_request(
    pool: &MySqlPool,
    group_id: &str,
    requester_id: &str,
    invited_by: Option<&str>,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query!(
        "INSERT INTO group_join_requests (group_id, requester_id, invited_by) VALUES (?, ?, ?)",
        group_id,
        requester_id,
        invited_by
    )
    .execute(pool)
    .await?;
    Ok(result.last_insert_id() as i64)
}

pub async fn fetch(pool: &MySqlPool, command_id: i64) -> Result<Option<JoinRequestRow>, sqlx::Error> {
    sqlx::query_as!(
        JoinRequestRow,
        "SELECT group_id, requester_id, invited_by FROM group_join_requests WHERE command_id = ?",
        command_id
    )
    .fetch_optional(pool)
    .await
}

/// Atomically claims `command_id` for handling. Two concurrent resolutions
/// of the same request (e.g. an admin's `ACCEPT_GREQ` racing the
/// requester's own `LEAVE_GROUP`) race on this single `UPDATE`; only the
/// writer that flips `managed` from false to true gets `true` back, and the
/// loser should reply `MANAGED` rather than act twice.
pub async fn try_manage(pool: &MySqlPool, command_id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query!(
        "UPDATE group_join_requests SET managed = TRUE WHERE command_id = ? AND managed = FALSE",
        command_id
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}
