use rt_chat_protocol::{ChannelKind, CommandAction, FileChunk, Payload};
use uuid::Uuid;

use crate::conn_ctx::ConnCtx;
use crate::error::ChatError;
use crate::fileio::ChunkOutcome;
use crate::repo;

/// Largest upload the server will stage. Matches `chat_messages.file_size`'s
/// practical ceiling; anything larger is refused before a byte is sent.
const MAX_FILE_SIZE: u64 = 1024 * 1024 * 1024;

fn new_file_id() -> String {
    format!("File_{}", Uuid::new_v4().simple())
}

/// Announces an upload. A prior upload with the same hash is a dedup hit --
/// the caller is denied with reason "1" and the existing file's id, so it
/// can reference the already-stored bytes instead of streaming chunks. Only
/// one upload per user may be in flight at a time; a second `UPLOAD_FILE`
/// before the first finishes is refused by `begin_upload`'s depth-1 gate.
pub async fn upload_file(
    ctx: &ConnCtx,
    file_name: &str,
    file_hash: &str,
    file_size: u64,
) -> Result<CommandAction, ChatError> {
    let uploader = ctx.require_auth()?;
    if file_size > MAX_FILE_SIZE {
        return Err(ChatError::Integrity("file too large".to_owned()));
    }

    if let Some(existing) = repo::files::find_by_hash(&ctx.state.pool, file_hash).await? {
        return Ok(CommandAction::DenyFile {
            file_hash: file_hash.to_owned(),
            reason: "1".to_owned(),
            file_id: existing.file_id,
        });
    }

    let file_id = new_file_id();
    let total_chunks = file_size.div_ceil(crate::fileio::CHUNK_SIZE as u64).max(1) as u32;
    ctx.state
        .files
        .begin_upload(&file_id, total_chunks, file_hash.to_owned(), file_name.to_owned(), uploader.to_owned())
        .await
        .map_err(|e| ChatError::Integrity(e.to_string()))?;
    Ok(CommandAction::AcceptFile { file_id })
}

/// Looks a file up by id and, if found, streams it to the requester's DATA
/// connection. Streaming happens after the CMD-channel reply so the
/// requester has already been told to expect chunks before the first one
/// arrives. Gated by the requester's depth-1 download permit, held for the
/// duration of the stream.
pub async fn download_file(ctx: &ConnCtx, file_id: &str) -> Result<CommandAction, ChatError> {
    let requester = ctx.require_auth()?.to_owned();
    let row = repo::files::find_by_id(&ctx.state.pool, file_id)
        .await?
        .ok_or_else(|| ChatError::NotFound(file_id.to_owned()))?;

    let stored_path = ctx.state.files.stored_path_for_hash(&row.file_hash);
    if tokio::fs::metadata(&stored_path).await.is_err() {
        return Err(ChatError::NotFound(format!("stored bytes for {file_id}")));
    }

    let _download_permit = ctx
        .state
        .files
        .try_acquire_download(&requester)
        .await
        .map_err(|e| ChatError::Integrity(e.to_string()))?;

    ctx.reply(CommandAction::AcceptFileReq {
        file_name: row.file_name.clone(),
        file_hash: row.file_hash.clone(),
        file_size: row.file_size as u64,
    })
    .await;

    let Some(data_writer) = ctx.state.registry.get(&requester, ChannelKind::Data).await else {
        return Err(ChatError::Integrity("no open data connection".to_owned()));
    };

    let result = ctx
        .state
        .files
        .stream_chunks(&stored_path, file_id, |chunk| {
            let data_writer = data_writer.clone();
            async move {
                data_writer.send(rt_chat_protocol::Envelope { user_id: None, payload: Payload::FileChunk(chunk) }).await;
            }
        })
        .await;

    match result {
        Ok(()) => Ok(CommandAction::Success),
        Err(e) => Err(ChatError::Integrity(e.to_string())),
    }
}

/// Handles one chunk arriving on the DATA channel. On completion, registers
/// the file and tells the uploader whether the assembled bytes matched what
/// `UPLOAD_FILE` announced.
pub async fn handle_file_chunk(ctx: &ConnCtx, chunk: FileChunk) -> Result<(), ChatError> {
    let uploader = ctx.require_auth()?.to_owned();
    let file_id = chunk.file_id.clone();

    let outcome = ctx
        .state
        .files
        .receive_chunk(&chunk)
        .await
        .map_err(|e| ChatError::Integrity(e.to_string()))?;

    match outcome {
        ChunkOutcome::Pending => {}
        ChunkOutcome::Complete { hash, staged_size, announcement } => {
            repo::files::register(&ctx.state.pool, &file_id, &hash, &announcement.file_name, staged_size as i64, &announcement.uploaded_by)
                .await?;
            ctx.notify(&uploader, ChannelKind::Cmd, CommandAction::AcceptFile { file_id }).await;
        }
        ChunkOutcome::HashMismatch { expected, actual } => {
            ctx.notify(
                &uploader,
                ChannelKind::Cmd,
                CommandAction::DenyFile { file_hash: actual, reason: format!("expected hash {expected}"), file_id },
            )
            .await;
        }
    }

    Ok(())
}
