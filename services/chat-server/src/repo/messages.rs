use rt_chat_protocol::{ChatMessage, FilePayload};
use sqlx::MySqlPool;

/// Persists `message` and fans it out to `recipients` (a single user for a
/// direct message, every group member for a group message). Returns the
/// assigned message id.
pub async fn insert(
    pool: &MySqlPool,
    message: &ChatMessage,
    recipients: &[String],
) -> Result<i64, sqlx::Error> {
    let (file_name, file_size, file_hash, file_id) = match &message.payload {
        Some(p) => (Some(p.file_name.clone()), Some(p.file_size as i64), Some(p.file_hash.clone()), Some(p.file_id.clone())),
        None => (None, None, None, None),
    };

    let mut tx = pool.begin().await?;
    let result = sqlx::query!(
        r#"INSERT INTO chat_messages
            (sender, receiver, is_group, timestamp, text, pin, file_name, file_size, file_hash, file_id)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        message.sender,
        message.receiver,
        message.is_group,
        message.timestamp,
        message.text,
        message.pin,
        file_name,
        file_size,
        file_hash,
        file_id,
    )
    .execute(&mut *tx)
    .await?;
    let message_id = result.last_insert_id() as i64;

    for recipient in recipients {
        sqlx::query!(
            "INSERT INTO message_recipients (message_id, recipient) VALUES (?, ?)",
            message_id,
            recipient
        )
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(message_id)
}

struct PendingRow {
    id: i64,
    sender: String,
    receiver: String,
    is_group: bool,
    timestamp: i64,
    text: String,
    pin: bool,
    file_name: Option<String>,
    file_size: Option<i64>,
    file_hash: Option<String>,
    file_id: Option<String>,
}

impl PendingRow {
    fn into_message(self) -> ChatMessage {
        let payload = match (self.file_name, self.file_size, self.file_hash, self.file_id) {
            (Some(file_name), Some(file_size), Some(file_hash), Some(file_id)) => {
                Some(FilePayload { file_name, file_size: file_size as u64, file_hash, file_id })
            }
            _ => None,
        };
        ChatMessage {
            sender: self.sender,
            receiver: self.receiver,
            is_group: self.is_group,
            timestamp: self.timestamp,
            text: self.text,
            pin: self.pin,
            payload,
        }
    }
}

/// Messages awaiting delivery to `recipient`, oldest first -- the batch
/// pushed as `OfflineMessages` right after `ONLINE_INIT`'s relation sync.
pub async fn fetch_pending(pool: &MySqlPool, recipient: &str) -> Result<Vec<ChatMessage>, sqlx::Error> {
    let rows = sqlx::query_as!(
        PendingRow,
        r#"SELECT m.id, m.sender, m.receiver, m.is_group AS `is_group: bool`, m.timestamp,
                  m.text, m.pin AS `pin: bool`, m.file_name, m.file_size, m.file_hash, m.file_id
           FROM chat_messages m
           JOIN message_recipients r ON r.message_id = m.id
           WHERE r.recipient = ? AND r.delivered = FALSE
           ORDER BY m.timestamp ASC, m.id ASC"#,
        recipient
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(PendingRow::into_message).collect())
}

pub async fn mark_recipient_delivered(pool: &MySqlPool, message_id: i64, recipient: &str) -> Result<(), sqlx::Error> {
    sqlx::query!(
        "UPDATE message_recipients SET delivered = TRUE WHERE message_id = ? AND recipient = ?",
        message_id,
        recipient
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_delivered(pool: &MySqlPool, recipient: &str) -> Result<(), sqlx::Error> {
    sqlx::query!(
        "UPDATE message_recipients SET delivered = TRUE WHERE recipient = ? AND delivered = FALSE",
        recipient
    )
    .execute(pool)
    .await?;
    Ok(())
}
