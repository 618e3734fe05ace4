//! File transfer bookkeeping: outgoing send loop, incoming reassembly and the
//! helpers the front-end needs to store received files.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use base64::Engine;
use bytes::{Bytes, BytesMut};
use peerchat_core::{
    FileId, FileMetadata, MAX_FILE_BYTES, MAX_FILE_CHUNK_BYTES, PeerInfo, PeerPayload, derive_id,
    now_unix_ms,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    error::FileSendError,
    event::{EventSink, SessionEvent},
    transport::PeerTransport,
};

const MAX_FILE_NAME_CHARS: usize = 128;
const MAX_NAME_COLLISIONS: u32 = 200;
/// Incoming transfers remembered at once, finalized ones included.
pub const MAX_TRACKED_FILES: usize = 32;
/// An unfinished transfer with no chunk for this long is dropped.
pub const STALLED_TRANSFER_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Sending,
    Receiving,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileTransfer {
    pub id: FileId,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub sender_nickname: String,
    pub direction: TransferDirection,
    pub progress: f64,
}

impl FileTransfer {
    fn from_metadata(meta: &FileMetadata, direction: TransferDirection) -> Self {
        Self {
            id: meta.id.clone(),
            name: meta.name.clone(),
            size: meta.size,
            mime_type: meta.mime_type.clone(),
            sender_nickname: meta.sender_nickname.clone(),
            direction,
            progress: 0.0,
        }
    }
}

/// Reported by the send task, one file at a time.
#[derive(Debug, Clone)]
pub enum FileSendEvent {
    Started(FileTransfer),
    Progress { file_id: FileId, progress: f64 },
    Finished { file_id: FileId },
    Failed { name: String, cause: String },
}

/// Result of a `file-complete` for a tracked transfer.
#[derive(Debug, Clone)]
pub enum Completion {
    Received { transfer: FileTransfer, bytes: Bytes },
    Incomplete { transfer: FileTransfer, missing: u32 },
}

#[derive(Debug)]
struct IncomingFile {
    transfer: FileTransfer,
    total_chunks: u32,
    chunk_bytes: usize,
    chunks: Vec<Option<Bytes>>,
    received: u32,
    finalized: bool,
    last_activity: Instant,
}

/// Incoming transfers keyed by file id. Finalized ids are remembered so a
/// repeated completion is recognised and ignored, up to
/// [`MAX_TRACKED_FILES`] entries.
#[derive(Debug, Default)]
pub struct IncomingFiles {
    files: HashMap<FileId, IncomingFile>,
}

impl IncomingFiles {
    /// Registers a new transfer. Returns `None` for invalid or already known
    /// metadata.
    pub fn on_metadata(&mut self, meta: &FileMetadata) -> Option<FileTransfer> {
        self.on_metadata_at(meta, Instant::now())
    }

    fn on_metadata_at(&mut self, meta: &FileMetadata, now: Instant) -> Option<FileTransfer> {
        if let Err(reason) = validate_metadata(meta) {
            warn!(file_id = %meta.id, "dropping file metadata: {reason}");
            return None;
        }
        if self.files.contains_key(&meta.id) {
            debug!(file_id = %meta.id, "duplicate file metadata ignored");
            return None;
        }
        self.prune(now);

        let mut transfer = FileTransfer::from_metadata(meta, TransferDirection::Receiving);
        transfer.name = sanitize_file_name(&meta.name);
        self.files.insert(
            meta.id.clone(),
            IncomingFile {
                transfer: transfer.clone(),
                total_chunks: meta.total_chunks,
                chunk_bytes: meta.chunk_bytes as usize,
                chunks: vec![None; meta.total_chunks as usize],
                received: 0,
                finalized: false,
                last_activity: now,
            },
        );
        Some(transfer)
    }

    /// Stores one chunk. Returns the new progress when it advanced.
    pub fn on_chunk(&mut self, file_id: &str, chunk_index: u32, data: &str) -> Option<f64> {
        let file = self.files.get_mut(file_id)?;
        if file.finalized || chunk_index >= file.total_chunks {
            debug!(file_id, chunk_index, "ignoring chunk");
            return None;
        }
        let slot = &mut file.chunks[chunk_index as usize];
        if slot.is_some() {
            return None;
        }
        let raw = match base64::engine::general_purpose::STANDARD.decode(data.as_bytes()) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(file_id, chunk_index, "undecodable chunk: {err}");
                return None;
            }
        };

        if raw.len() > file.chunk_bytes {
            warn!(file_id, chunk_index, len = raw.len(), "oversized chunk dropped");
            return None;
        }

        *slot = Some(Bytes::from(raw));
        file.received += 1;
        file.last_activity = Instant::now();
        let progress = f64::from(file.received) / f64::from(file.total_chunks);
        if progress <= file.transfer.progress {
            return None;
        }
        file.transfer.progress = progress;
        Some(progress)
    }

    /// Finalizes a transfer. `None` for unknown or already finalized ids.
    pub fn on_complete(&mut self, file_id: &str) -> Option<Completion> {
        let file = self.files.get_mut(file_id)?;
        if file.finalized {
            debug!(file_id, "repeated completion ignored");
            return None;
        }
        file.finalized = true;
        let chunks = std::mem::take(&mut file.chunks);

        let missing = file.total_chunks - file.received;
        if missing > 0 {
            return Some(Completion::Incomplete {
                transfer: file.transfer.clone(),
                missing,
            });
        }

        let mut out = BytesMut::with_capacity(file.transfer.size as usize);
        for chunk in chunks.into_iter().flatten() {
            out.extend_from_slice(&chunk);
        }
        if out.len() as u64 != file.transfer.size {
            warn!(
                file_id,
                expected = file.transfer.size,
                actual = out.len(),
                "assembled size mismatch"
            );
            return Some(Completion::Incomplete {
                transfer: file.transfer.clone(),
                missing: 0,
            });
        }

        file.transfer.progress = 1.0;
        Some(Completion::Received {
            transfer: file.transfer.clone(),
            bytes: out.freeze(),
        })
    }

    pub fn progress(&self, file_id: &str) -> Option<f64> {
        self.files.get(file_id).map(|file| file.transfer.progress)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }

    /// Drops stalled transfers, then evicts until a new entry fits. Finalized
    /// records go first, oldest activity first.
    fn prune(&mut self, now: Instant) {
        self.files.retain(|file_id, file| {
            let stalled = !file.finalized
                && now.saturating_duration_since(file.last_activity) >= STALLED_TRANSFER_TIMEOUT;
            if stalled {
                warn!(file_id = %file_id, "dropping stalled incoming transfer");
            }
            !stalled
        });
        while self.files.len() >= MAX_TRACKED_FILES {
            let oldest = self
                .files
                .iter()
                .min_by_key(|(_, file)| (!file.finalized, file.last_activity))
                .map(|(file_id, _)| file_id.clone());
            let Some(oldest) = oldest else {
                break;
            };
            debug!(file_id = %oldest, "evicting incoming transfer record");
            self.files.remove(&oldest);
        }
    }
}

fn validate_metadata(meta: &FileMetadata) -> Result<(), String> {
    if meta.id.trim().is_empty() {
        return Err("empty file id".to_string());
    }
    if meta.size == 0 || meta.size > MAX_FILE_BYTES {
        return Err(format!("size {} out of range", meta.size));
    }
    let chunk_bytes = meta.chunk_bytes as usize;
    if chunk_bytes == 0 || chunk_bytes > MAX_FILE_CHUNK_BYTES {
        return Err(format!("chunk size {chunk_bytes} out of range"));
    }
    if u64::from(meta.total_chunks) != FileMetadata::expected_chunks(meta.size, chunk_bytes) {
        return Err(format!(
            "chunk count {} inconsistent with size {} at {chunk_bytes} bytes per chunk",
            meta.total_chunks, meta.size
        ));
    }
    Ok(())
}

/// Reads one file and builds the metadata announcing it.
pub async fn prepare_file(
    path: &Path,
    sender: &PeerInfo,
    chunk_bytes: usize,
) -> Result<(FileMetadata, Bytes), FileSendError> {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or(FileSendError::InvalidName)?
        .to_string();

    let len = tokio::fs::metadata(path).await?.len();
    if len == 0 {
        return Err(FileSendError::Empty);
    }
    if len > MAX_FILE_BYTES {
        return Err(FileSendError::TooLarge {
            size: len,
            max: MAX_FILE_BYTES,
        });
    }
    let data = Bytes::from(tokio::fs::read(path).await?);

    let chunk_bytes = chunk_bytes.clamp(1, MAX_FILE_CHUNK_BYTES);
    let size = data.len() as u64;
    let total_chunks = u32::try_from(FileMetadata::expected_chunks(size, chunk_bytes)).map_err(
        |_| FileSendError::TooLarge {
            size,
            max: MAX_FILE_BYTES,
        },
    )?;
    let timestamp_unix_ms = now_unix_ms();
    let meta = FileMetadata {
        id: derive_id(&[
            sender.user_id.as_str(),
            timestamp_unix_ms.to_string().as_str(),
            name.as_str(),
        ]),
        mime_type: guess_mime(&name).to_string(),
        name,
        size,
        total_chunks,
        chunk_bytes: chunk_bytes as u32,
        sender_nickname: sender.nickname.clone(),
        timestamp_unix_ms,
    };
    Ok((meta, data))
}

/// Sends every file in turn over the direct transport. A failing file is
/// reported and skipped.
pub async fn send_files(
    transport: Arc<dyn PeerTransport>,
    paths: Vec<PathBuf>,
    sender: PeerInfo,
    chunk_bytes: usize,
    sink: EventSink,
) {
    let generation = sink.generation();
    let report = |event: FileSendEvent| sink.session(SessionEvent::FileSend { generation, event });

    for path in paths {
        let display_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let result = send_one(transport.as_ref(), &path, &sender, chunk_bytes, &report).await;
        if let Err(err) = result {
            warn!(file = %display_name, "file send failed: {err}");
            if !report(FileSendEvent::Failed {
                name: display_name,
                cause: err.to_string(),
            }) {
                return;
            }
        }
    }
}

async fn send_one(
    transport: &dyn PeerTransport,
    path: &Path,
    sender: &PeerInfo,
    chunk_bytes: usize,
    report: &(dyn Fn(FileSendEvent) -> bool + Send + Sync),
) -> Result<(), FileSendError> {
    let (meta, data) = prepare_file(path, sender, chunk_bytes).await?;
    let chunk_bytes = meta.chunk_bytes as usize;

    transport.send(&PeerPayload::FileMetadata(meta.clone()))?;
    report(FileSendEvent::Started(FileTransfer::from_metadata(
        &meta,
        TransferDirection::Sending,
    )));

    let engine = base64::engine::general_purpose::STANDARD;
    for (index, raw) in data.chunks(chunk_bytes).enumerate() {
        let chunk_index = index as u32;
        transport.send(&PeerPayload::FileChunk {
            file_id: meta.id.clone(),
            chunk_index,
            data: engine.encode(raw),
        })?;
        report(FileSendEvent::Progress {
            file_id: meta.id.clone(),
            progress: f64::from(chunk_index + 1) / f64::from(meta.total_chunks),
        });
        tokio::task::yield_now().await;
    }

    transport.send(&PeerPayload::FileComplete {
        file_id: meta.id.clone(),
    })?;
    info!(file_id = %meta.id, size = meta.size, "file sent");
    report(FileSendEvent::Finished { file_id: meta.id });
    Ok(())
}

pub fn guess_mime(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("txt" | "log" | "md") => "text/plain",
        Some("html" | "htm") => "text/html",
        Some("css") => "text/css",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("gz") => "application/gzip",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        _ => "application/octet-stream",
    }
}

pub fn sanitize_file_name(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return "file.bin".to_string();
    }
    let mut out: String = trimmed
        .chars()
        .map(|ch| match ch {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            ch if ch.is_control() => '_',
            ch => ch,
        })
        .take(MAX_FILE_NAME_CHARS)
        .collect();
    if out.chars().all(|ch| ch == '.') {
        out = "file.bin".to_string();
    }
    out
}

/// First free path for `name` inside `dir`, adding ` (n)` on collisions.
pub fn unique_download_path(dir: &Path, name: &str) -> PathBuf {
    let safe = sanitize_file_name(name);
    let dest = dir.join(&safe);
    if !dest.exists() {
        return dest;
    }

    let safe_path = Path::new(&safe);
    let stem = safe_path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("file");
    let ext = safe_path.extension().and_then(|ext| ext.to_str());
    for i in 1..=MAX_NAME_COLLISIONS {
        let candidate = match ext {
            Some(ext) => dir.join(format!("{stem} ({i}).{ext}")),
            None => dir.join(format!("{stem} ({i})")),
        };
        if !candidate.exists() {
            return candidate;
        }
    }
    dir.join(format!("{stem} ({}).{}", now_unix_ms(), ext.unwrap_or("bin")))
}

/// Writes a received file into `dir` and returns where it landed.
pub async fn save_received(dir: &Path, name: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let dest = unique_download_path(dir, name);
    tokio::fs::write(&dest, bytes).await?;
    Ok(dest)
}
