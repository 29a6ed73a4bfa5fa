use sqlx::MySqlPool;

pub struct FileRow {
    pub file_id: String,
    pub file_hash: String,
    pub file_name: String,
    pub file_size: i64,
}

/// A prior upload with the same content hash -- if present, the new upload
/// is a dedup hit and the chunk stream can be skipped entirely.
pub async fn find_by_hash(pool: &MySqlPool, file_hash: &str) -> Result<Option<FileRow>, sqlx::Error> {
    sqlx::query_as!(
        FileRow,
        "SELECT file_id, file_hash, file_name, file_size FROM files WHERE file_hash = ? LIMIT 1",
        file_hash
    )
    .fetch_optional(pool)
    .await
}

pub async fn find_by_id(pool: &MySqlPool, file_id: &str) -> Result<Option<FileRow>, sqlx::Error> {
    sqlx::query_as!(
        FileRow,
        "SELECT file_id, file_hash, file_name, file_size FROM files WHERE file_id = ?",
        file_id
    )
    .fetch_optional(pool)
    .await
}

pub async fn register(
    pool: &MySqlPool,
    file_id: &str,
    file_hash: &str,
    file_name: &str,
    file_size: i64,
    uploaded_by: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query!(
        r#"INSERT INTO files (file_id, file_hash, file_name, file_size, uploaded_by)
           VALUES (?, ?, ?, ?, ?)"#,
        file_id,
        file_hash,
        file_name,
        file_size,
        uploaded_by
    )
    .execute(pool)
    .await?;
    Ok(())
}
