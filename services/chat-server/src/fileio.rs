use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rt_chat_protocol::FileChunk;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

/// Chunks are fixed-size slices streamed over the DATA channel.
pub const CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Tracks one in-progress upload. Chunks may arrive out of order (the
/// sender paces them but delivery order isn't guaranteed across frames), so
/// writes seek to `chunk_index * CHUNK_SIZE` rather than assuming append-only.
struct UploadState {
    staging_path: PathBuf,
    total_chunks: u32,
    received: Vec<bool>,
    expected_hash: String,
    file_name: String,
    uploaded_by: String,
    /// Held for the life of the upload; dropping it (when the entry is
    /// removed on completion, mismatch, or discard) frees the uploader's
    /// depth-1 upload slot.
    _permit: OwnedSemaphorePermit,
}

/// Metadata an upload was announced with (`UPLOAD_FILE`'s command args),
/// carried through to finalization so the hash can be verified and the
/// `files` row registered with its real name and uploader.
pub struct UploadAnnouncement {
    pub expected_hash: String,
    pub file_name: String,
    pub uploaded_by: String,
}

/// Content-addressed file store: uploads land in a staging file under
/// `base_dir/staging/<file_id>` and are renamed to `base_dir/<sha256-hex>`
/// once every chunk has arrived and the hash is confirmed.
pub struct FileManager {
    base_dir: PathBuf,
    uploads: Mutex<HashMap<String, UploadState>>,
    upload_gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    download_gates: Mutex<HashMap<String, Arc<Semaphore>>>,
}

#[derive(Debug)]
pub enum ChunkOutcome {
    /// More chunks are still expected.
    Pending,
    /// The last chunk arrived and its content hash matched the announced
    /// one; the upload has been moved into content-addressed storage.
    Complete { hash: String, staged_size: u64, announcement: UploadAnnouncement },
    /// The last chunk arrived but the assembled bytes don't hash to what
    /// `UPLOAD_FILE` announced. The staged bytes are discarded.
    HashMismatch { expected: String, actual: String },
}

#[derive(Debug, thiserror::Error)]
pub enum FileIoError {
    #[error("unknown upload: {0}")]
    UnknownUpload(String),
    #[error("chunk index {0} out of range for {1} total chunks")]
    ChunkOutOfRange(u32, u32),
    #[error("an upload is already in progress for this user")]
    UploadBusy,
    #[error("a download is already in progress for this user")]
    DownloadBusy,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Looks up (creating if absent) the depth-1 semaphore gating `user_id`'s
/// uploads or downloads, one direction at a time.
async fn gate_for(gates: &Mutex<HashMap<String, Arc<Semaphore>>>, user_id: &str) -> Arc<Semaphore> {
    let mut map = gates.lock().await;
    map.entry(user_id.to_owned()).or_insert_with(|| Arc::new(Semaphore::new(1))).clone()
}

impl FileManager {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        FileManager {
            base_dir: base_dir.into(),
            uploads: Mutex::new(HashMap::new()),
            upload_gates: Mutex::new(HashMap::new()),
            download_gates: Mutex::new(HashMap::new()),
        }
    }

    fn staging_path(&self, file_id: &str) -> PathBuf {
        self.base_dir.join("staging").join(file_id)
    }

    fn stored_path(&self, hash: &str) -> PathBuf {
        self.base_dir.join(hash)
    }

    /// Reserves `uploaded_by`'s single upload slot for the life of this
    /// upload; a second `UPLOAD_FILE` from the same user before this one
    /// finishes (or is discarded) is refused rather than queued.
    pub async fn begin_upload(
        &self,
        file_id: &str,
        total_chunks: u32,
        expected_hash: String,
        file_name: String,
        uploaded_by: String,
    ) -> Result<(), FileIoError> {
        let semaphore = gate_for(&self.upload_gates, &uploaded_by).await;
        let permit = semaphore.try_acquire_owned().map_err(|_| FileIoError::UploadBusy)?;

        let staging_path = self.staging_path(file_id);
        if let Some(parent) = staging_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::File::create(&staging_path).await?;
        self.uploads.lock().await.insert(
            file_id.to_owned(),
            UploadState {
                staging_path,
                total_chunks,
                received: vec![false; total_chunks as usize],
                expected_hash,
                file_name,
                uploaded_by,
                _permit: permit,
            },
        );
        Ok(())
    }

    /// Reserves `user_id`'s single download slot; the caller holds the
    /// returned permit for as long as the download streams.
    pub async fn try_acquire_download(&self, user_id: &str) -> Result<OwnedSemaphorePermit, FileIoError> {
        let semaphore = gate_for(&self.download_gates, user_id).await;
        semaphore.try_acquire_owned().map_err(|_| FileIoError::DownloadBusy)
    }

    pub async fn receive_chunk(&self, chunk: &FileChunk) -> Result<ChunkOutcome, FileIoError> {
        let (staging_path, all_received, expected_hash, file_name, uploaded_by) = {
            let mut uploads = self.uploads.lock().await;
            let state = uploads
                .get_mut(&chunk.file_id)
                .ok_or_else(|| FileIoError::UnknownUpload(chunk.file_id.clone()))?;
            if chunk.chunk_index >= state.total_chunks {
                return Err(FileIoError::ChunkOutOfRange(chunk.chunk_index, state.total_chunks));
            }
            state.received[chunk.chunk_index as usize] = true;
            (
                state.staging_path.clone(),
                state.received.iter().all(|r| *r),
                state.expected_hash.clone(),
                state.file_name.clone(),
                state.uploaded_by.clone(),
            )
        };

        let mut file = fs::OpenOptions::new().write(true).open(&staging_path).await?;
        file.seek(SeekFrom::Start(chunk.chunk_index as u64 * CHUNK_SIZE as u64)).await?;
        file.write_all(&chunk.data).await?;
        file.flush().await?;

        if !all_received {
            return Ok(ChunkOutcome::Pending);
        }

        let hash = hash_file(&staging_path).await?;
        self.uploads.lock().await.remove(&chunk.file_id);

        if hash != expected_hash {
            fs::remove_file(&staging_path).await.ok();
            return Ok(ChunkOutcome::HashMismatch { expected: expected_hash, actual: hash });
        }

        let staged_size = fs::metadata(&staging_path).await?.len();
        self.finalize_path(&staging_path, &hash).await?;
        Ok(ChunkOutcome::Complete { hash, staged_size, announcement: UploadAnnouncement { expected_hash: expected_hash.clone(), file_name, uploaded_by } })
    }

    /// Moves the staged upload into its content-addressed home. A no-op if
    /// `hash` is already present -- the dedup path never re-stages bytes a
    /// prior upload already wrote.
    async fn finalize_path(&self, staging_path: &Path, hash: &str) -> Result<(), FileIoError> {
        let stored_path = self.stored_path(hash);
        if fs::metadata(&stored_path).await.is_ok() {
            fs::remove_file(staging_path).await.ok();
            return Ok(());
        }
        fs::rename(staging_path, &stored_path).await?;
        Ok(())
    }

    pub async fn discard(&self, file_id: &str) {
        self.uploads.lock().await.remove(file_id);
        fs::remove_file(self.staging_path(file_id)).await.ok();
    }

    pub fn stored_path_for_hash(&self, hash: &str) -> PathBuf {
        self.stored_path(hash)
    }

    /// Reads `path` in `CHUNK_SIZE` slices and hands each one to `on_chunk`.
    /// Backpressure comes from `on_chunk` itself (it pushes onto the
    /// outbound `mpsc` channel), so no artificial pacing delay is needed.
    pub async fn stream_chunks<F, Fut>(
        &self,
        path: &Path,
        file_id: &str,
        mut on_chunk: F,
    ) -> Result<(), FileIoError>
    where
        F: FnMut(FileChunk) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let size = fs::metadata(path).await?.len();
        let total_chunks = size.div_ceil(CHUNK_SIZE as u64).max(1) as u32;
        let mut file = fs::File::open(path).await?;
        let mut buf = vec![0u8; CHUNK_SIZE];

        for chunk_index in 0..total_chunks {
            let n = read_up_to(&mut file, &mut buf).await?;
            let chunk = FileChunk {
                file_id: file_id.to_owned(),
                data: buf[..n].to_vec(),
                chunk_index,
                total_chunks,
                is_last_chunk: chunk_index + 1 == total_chunks,
            };
            on_chunk(chunk).await;
        }
        Ok(())
    }
}

async fn read_up_to(file: &mut fs::File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

async fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub type SharedFileManager = Arc<FileManager>;
