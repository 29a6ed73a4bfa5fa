use sqlx::MySqlPool;

pub struct UserRow {
    pub user_id: String,
    pub email: String,
    pub password_hash: String,
    pub display_name: String,
}

impl UserRow {
    /// The name a client should show: the chosen display name, or the
    /// user-id handle itself if none was ever set.
    pub fn shown_name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.user_id
        } else {
            &self.display_name
        }
    }
}

pub async fn find_by_email(pool: &MySqlPool, email: &str) -> Result<Option<UserRow>, sqlx::Error> {
    sqlx::query_as!(
        UserRow,
        "SELECT user_id, email, password_hash, display_name FROM users WHERE email = ?",
        email
    )
    .fetch_optional(pool)
    .await
}

pub async fn find_by_user_id(pool: &MySqlPool, user_id: &str) -> Result<Option<UserRow>, sqlx::Error> {
    sqlx::query_as!(
        UserRow,
        "SELECT user_id, email, password_hash, display_name FROM users WHERE user_id = ?",
        user_id
    )
    .fetch_optional(pool)
    .await
}

pub async fn user_id_taken(pool: &MySqlPool, user_id: &str) -> Result<bool, sqlx::Error> {
    let row = sqlx::query!("SELECT 1 AS present FROM users WHERE user_id = ?", user_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

pub async fn create_user(
    pool: &MySqlPool,
    user_id: &str,
    email: &str,
    password_hash: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query!(
        "INSERT INTO users (user_id, email, password_hash) VALUES (?, ?, ?)",
        user_id,
        email,
        password_hash
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn update_password(
    pool: &MySqlPool,
    user_id: &str,
    new_password_hash: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query!(
        "UPDATE users SET password_hash = ? WHERE user_id = ?",
        new_password_hash,
        user_id
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Renames a user's id in place. Every table referencing `users.user_id`
/// carries `ON UPDATE CASCADE`, so this single statement is enough to keep
/// friends/groups/messages/files consistent.
pub async fn rename_user(pool: &MySqlPool, old_user_id: &str, new_user_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query!(
        "UPDATE users SET user_id = ? WHERE user_id = ?",
        new_user_id,
        old_user_id
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn search(pool: &MySqlPool, query: &str) -> Result<Vec<UserRow>, sqlx::Error> {
    let pattern = format!("%{query}%");
    sqlx::query_as!(
        UserRow,
        "SELECT user_id, email, password_hash, display_name FROM users WHERE user_id LIKE ? LIMIT 20",
        pattern
    )
    .fetch_all(pool)
    .await
}

pub async fn set_display_name(pool: &MySqlPool, user_id: &str, display_name: &str) -> Result<(), sqlx::Error> {
    sqlx::query!("UPDATE users SET display_name = ? WHERE user_id = ?", display_name, user_id)
        .execute(pool)
        .await?;
    Ok(())
}
