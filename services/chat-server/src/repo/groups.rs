use rt_chat_protocol::{GroupEntry, GroupMemberEntry};
use sqlx::MySqlPool;

pub async fn create_group(pool: &MySqlPool, group_id: &str, name: &str, owner_id: &str) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query!(
        "INSERT INTO groups (group_id, name, owner_id) VALUES (?, ?, ?)",
        group_id,
        name,
        owner_id
    )
    .execute(&mut *tx)
    .await?;
    sqlx::query!(
        "INSERT INTO group_members (group_id, user_id, is_admin) VALUES (?, ?, TRUE)",
        group_id,
        owner_id
    )
    .execute(&mut *tx)
    .await?;
    tx.commit().await
}

pub async fn fetch_group(pool: &MySqlPool, group_id: &str) -> Result<Option<GroupEntry>, sqlx::Error> {
    let header = sqlx::query!(
        "SELECT name, owner_id FROM groups WHERE group_id = ?",
        group_id
    )
    .fetch_optional(pool)
    .await?;
    let Some(header) = header else { return Ok(None) };

    let member_rows = sqlx::query!(
        "SELECT user_id, is_admin AS `is_admin: bool` FROM group_members WHERE group_id = ?",
        group_id
    )
    .fetch_all(pool)
    .await?;

    Ok(Some(GroupEntry {
        id: group_id.to_owned(),
        name: header.name,
        owner: header.owner_id,
        members: member_rows
            .into_iter()
            .map(|r| GroupMemberEntry { id: r.user_id, is_admin: r.is_admin })
            .collect(),
    }))
}

pub async fn search(pool: &MySqlPool, group_id: &str) -> Result<Option<(String, String)>, sqlx::Error> {
    let row = sqlx::query!("SELECT name, owner_id FROM groups WHERE group_id = ?", group_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| (r.name, r.owner_id)))
}

pub async fn add_member(pool: &MySqlPool, group_id: &str, user_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query!(
        "INSERT IGNORE INTO group_members (group_id, user_id) VALUES (?, ?)",
        group_id,
        user_id
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn remove_member(pool: &MySqlPool, group_id: &str, user_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query!(
        "DELETE FROM group_members WHERE group_id = ? AND user_id = ?",
        group_id,
        user_id
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn is_member(pool: &MySqlPool, group_id: &str, user_id: &str) -> Result<bool, sqlx::Error> {
    let row = sqlx::query!(
        "SELECT 1 AS present FROM group_members WHERE group_id = ? AND user_id = ?",
        group_id,
        user_id
    )
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}

pub async fn is_admin(pool: &MySqlPool, group_id: &str, user_id: &str) -> Result<bool, sqlx::Error> {
    let row = sqlx::query!(
        "SELECT is_admin AS `is_admin: bool` FROM group_members WHERE group_id = ? AND user_id = ?",
        group_id,
        user_id
    )
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some_and(|r| r.is_admin))
}

pub async fn set_admin(pool: &MySqlPool, group_id: &str, user_id: &str, is_admin: bool) -> Result<(), sqlx::Error> {
    sqlx::query!(
        "UPDATE group_members SET is_admin = ? WHERE group_id = ? AND user_id = ?",
        is_admin,
        group_id,
        user_id
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn member_ids(pool: &MySqlPool, group_id: &str) -> Result<Vec<String>, sqlx::Error> {
    let rows = sqlx::query!("SELECT user_id FROM group_members WHERE group_id = ?", group_id)
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|r| r.user_id).collect())
}

/// Every admin of a group, owner included -- the full audience for a
/// `JOIN_GROUP_REQ` notification.
pub async fn admin_ids(pool: &MySqlPool, group_id: &str) -> Result<Vec<String>, sqlx::Error> {
    let rows = sqlx::query!(
        "SELECT user_id FROM group_members WHERE group_id = ? AND is_admin = TRUE",
        group_id
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|r| r.user_id).collect())
}

/// `group_members` cascades on `group_id` delete, so dropping the `groups`
/// row is enough to disband.
pub async fn disband(pool: &MySqlPool, group_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query!("DELETE FROM groups WHERE group_id = ?", group_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn groups_for_user(pool: &MySqlPool, user_id: &str) -> Result<Vec<String>, sqlx::Error> {
    let rows = sqlx::query!(
        "SELECT group_id FROM group_members WHERE user_id = ?",
        user_id
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|r| r.group_id).collect())
}
