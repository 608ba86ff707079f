//! Transfer manager
//!
//! Uploads go through a single system-wide slot: a second upload while one is
//! in progress fails with [`ClientError::Busy`] instead of queueing. Downloads
//! are independent of the slot and of each other.
//!
//! Bytes enter through a [`FileSource`] and leave through a [`FileSink`], so
//! the same manager serves local files, in-memory buffers and tests.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::{ClientError, ValidationError};
use crate::mutation::RefreshSignal;
use crate::path;
use crate::transport::{byte_stream_from, ByteStream, FilePart, Transport};

fn transfer_log(msg: &str) {
    info!("[TRANSFER] {}", msg);
}

// ============ Progress ============

/// Progress of one transfer. `fraction` never decreases and is clamped to
/// `[0, 1]`; it stays at 0 until completion when the size is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TransferProgress {
    pub transferred: u64,
    pub total: Option<u64>,
    pub fraction: f64,
}

impl TransferProgress {
    pub fn new(transferred: u64, total: Option<u64>) -> Self {
        let fraction = match total {
            Some(0) => 1.0,
            Some(total) => (transferred as f64 / total as f64).min(1.0),
            None => 0.0,
        };
        Self {
            transferred,
            total,
            fraction,
        }
    }

    pub fn complete(transferred: u64, total: Option<u64>) -> Self {
        Self {
            transferred,
            total,
            fraction: 1.0,
        }
    }

    pub fn percentage(&self) -> u8 {
        (self.fraction * 100.0).round() as u8
    }
}

pub type ProgressCallback = Arc<dyn Fn(TransferProgress) + Send + Sync>;

/// Count bytes as they pass through `stream`.
fn track(
    stream: ByteStream,
    total: Option<u64>,
    report: impl Fn(TransferProgress) + Send + Sync + 'static,
) -> ByteStream {
    let mut transferred = 0u64;
    stream
        .map(move |chunk| {
            if let Ok(bytes) = &chunk {
                transferred += bytes.len() as u64;
                report(TransferProgress::new(transferred, total));
            }
            chunk
        })
        .boxed()
}

// ============ Sessions ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Upload,
    Download,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransferState {
    Idle,
    /// Name validation, opening the source
    Preparing,
    InFlight,
    Succeeded,
    Failed,
}

/// One upload or download attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferSession {
    pub id: String,
    pub direction: TransferDirection,
    pub file_name: String,
    pub target_path: String,
    pub size: Option<u64>,
    pub progress: f64,
    pub state: TransferState,
    pub error: Option<String>,
}

impl TransferSession {
    fn idle_upload() -> Self {
        Self {
            id: String::new(),
            direction: TransferDirection::Upload,
            file_name: String::new(),
            target_path: String::new(),
            size: None,
            progress: 0.0,
            state: TransferState::Idle,
            error: None,
        }
    }
}

/// Upload slot status plus every download still in flight.
#[derive(Debug, Clone, Serialize)]
pub struct TransferSnapshot {
    pub upload: TransferSession,
    pub downloads: Vec<TransferSession>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub id: String,
    pub file_name: String,
    pub target_path: String,
    pub size: Option<u64>,
    /// Directory whose listing now contains the file
    pub refresh: RefreshSignal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedFile {
    /// Where the sink put the bytes (a filesystem path for [`DirectorySink`])
    pub location: String,
    pub bytes: u64,
}

// ============ Sources & sinks ============

/// Something that can be uploaded. Consumed by the upload that reads it.
#[async_trait]
pub trait FileSource: Send {
    fn name(&self) -> &str;

    fn size(&self) -> Option<u64>;

    fn mime_type(&self) -> String {
        mime_guess::from_path(self.name())
            .first_or_octet_stream()
            .to_string()
    }

    async fn open(self: Box<Self>) -> io::Result<ByteStream>;
}

/// Destination for downloaded bytes.
#[async_trait]
pub trait FileSink: Send + Sync {
    async fn write(&self, name: &str, stream: ByteStream) -> io::Result<SavedFile>;
}

/// File on the local filesystem.
pub struct LocalFile {
    path: PathBuf,
    name: String,
    size: u64,
}

impl LocalFile {
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            path,
            name,
            size: metadata.len(),
        })
    }
}

#[async_trait]
impl FileSource for LocalFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> Option<u64> {
        Some(self.size)
    }

    async fn open(self: Box<Self>) -> io::Result<ByteStream> {
        let file = tokio::fs::File::open(&self.path).await?;
        Ok(tokio_util::io::ReaderStream::new(file).boxed())
    }
}

/// In-memory file contents.
#[derive(Debug, Clone)]
pub struct MemoryFile {
    name: String,
    data: Bytes,
}

impl MemoryFile {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

#[async_trait]
impl FileSource for MemoryFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    async fn open(self: Box<Self>) -> io::Result<ByteStream> {
        Ok(byte_stream_from(self.data))
    }
}

/// Writes downloads into a local directory. Each file lands in a hidden
/// `.part` file first and is renamed into place once complete; every write
/// gets its own part file, so concurrent downloads of one name never share.
pub struct DirectorySink {
    dir: PathBuf,
    writes: AtomicU64,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            writes: AtomicU64::new(0),
        }
    }

    /// The user's download directory, or the working directory without one.
    pub fn downloads() -> Self {
        Self::new(dirs::download_dir().unwrap_or_else(|| PathBuf::from(".")))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn target_for(&self, name: &str) -> io::Result<PathBuf> {
        let escapes = path::validate_segment(name).is_err() || name.contains('\\') || name.contains('\0');
        if escapes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Refusing to write '{}' outside {}", name, self.dir.display()),
            ));
        }
        Ok(self.dir.join(name))
    }
}

#[async_trait]
impl FileSink for DirectorySink {
    async fn write(&self, name: &str, mut stream: ByteStream) -> io::Result<SavedFile> {
        let target = self.target_for(name)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let n = self.writes.fetch_add(1, Ordering::Relaxed);
        let part = self
            .dir
            .join(format!(".{}.{}-{}.part", name, std::process::id(), n));

        let written = async {
            let mut file = tokio::fs::File::create(&part).await?;
            let mut written = 0u64;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            Ok::<u64, io::Error>(written)
        }
        .await;

        match written {
            Ok(bytes) => {
                tokio::fs::rename(&part, &target).await?;
                Ok(SavedFile {
                    location: target.display().to_string(),
                    bytes,
                })
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                Err(e)
            }
        }
    }
}

/// Keeps downloads in memory, keyed by name.
#[derive(Default)]
pub struct MemorySink {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemorySink {
    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }
}

#[async_trait]
impl FileSink for MemorySink {
    async fn write(&self, name: &str, mut stream: ByteStream) -> io::Result<SavedFile> {
        let mut data = Vec::new();
        while let Some(chunk) = stream.next().await {
            data.extend_from_slice(&chunk?);
        }
        let bytes = data.len() as u64;
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), data);
        Ok(SavedFile {
            location: format!("memory:{}", name),
            bytes,
        })
    }
}

// ============ Manager ============

type DownloadTable = Arc<Mutex<HashMap<String, TransferSession>>>;

/// Holds the upload slot; resets the published status and frees the slot on
/// drop, whichever way the upload ended.
struct UploadSlot<'a> {
    manager: &'a TransferManager,
}

impl Drop for UploadSlot<'_> {
    fn drop(&mut self) {
        self.manager.upload_status.send_modify(|s| s.state = TransferState::Idle);
        self.manager.upload_busy.store(false, Ordering::Release);
    }
}

/// Removes a download from the active table on drop.
struct ActiveDownload {
    table: DownloadTable,
    id: String,
}

impl Drop for ActiveDownload {
    fn drop(&mut self) {
        self.table
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
    }
}

pub struct TransferManager {
    transport: Arc<Transport>,
    upload_busy: AtomicBool,
    upload_status: Arc<watch::Sender<TransferSession>>,
    downloads: DownloadTable,
    counter: AtomicU64,
}

impl TransferManager {
    pub fn new(transport: Arc<Transport>) -> Self {
        let (tx, _) = watch::channel(TransferSession::idle_upload());
        Self {
            transport,
            upload_busy: AtomicBool::new(false),
            upload_status: Arc::new(tx),
            downloads: Arc::new(Mutex::new(HashMap::new())),
            counter: AtomicU64::new(0),
        }
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}-{}", prefix, chrono::Utc::now().timestamp_millis(), n)
    }

    pub fn is_uploading(&self) -> bool {
        self.upload_busy.load(Ordering::Acquire)
    }

    pub fn upload_status(&self) -> TransferSession {
        self.upload_status.borrow().clone()
    }

    pub fn subscribe_upload(&self) -> watch::Receiver<TransferSession> {
        self.upload_status.subscribe()
    }

    pub fn snapshot(&self) -> TransferSnapshot {
        let mut downloads: Vec<TransferSession> = self
            .downloads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        downloads.sort_by(|a, b| a.id.cmp(&b.id));
        TransferSnapshot {
            upload: self.upload_status(),
            downloads,
        }
    }

    fn acquire_upload_slot(&self) -> Result<UploadSlot<'_>, ClientError> {
        self.upload_busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ClientError::Busy)?;
        Ok(UploadSlot { manager: self })
    }

    fn finish_upload(&self, state: TransferState, error: Option<String>) {
        self.upload_status.send_modify(|s| {
            s.state = state;
            if state == TransferState::Succeeded {
                s.progress = 1.0;
            }
            s.error = error;
        });
    }

    /// Upload `source` into the directory `target_path`.
    ///
    /// Fails with [`ClientError::Busy`] while another upload holds the slot.
    /// Every call is a new transfer, even for a source already uploaded.
    pub async fn begin_upload<S>(
        &self,
        source: S,
        target_path: &str,
        on_progress: Option<ProgressCallback>,
    ) -> Result<UploadReport, ClientError>
    where
        S: FileSource + 'static,
    {
        let _slot = self.acquire_upload_slot()?;

        let target_path = path::normalize(target_path);
        let file_name = source.name().to_string();
        let size = source.size();
        let id = self.next_id("ul");
        self.upload_status.send_replace(TransferSession {
            id: id.clone(),
            direction: TransferDirection::Upload,
            file_name: file_name.clone(),
            target_path: target_path.clone(),
            size,
            progress: 0.0,
            state: TransferState::Preparing,
            error: None,
        });

        let result = self
            .send_upload(Box::new(source), &file_name, &target_path, size, on_progress.clone())
            .await;

        match result {
            Ok(()) => {
                self.finish_upload(TransferState::Succeeded, None);
                if let Some(cb) = &on_progress {
                    cb(TransferProgress::complete(size.unwrap_or(0), size));
                }
                transfer_log(&format!("Uploaded {} to '{}'", file_name, target_path));
                Ok(UploadReport {
                    id,
                    file_name,
                    target_path: target_path.clone(),
                    size,
                    refresh: RefreshSignal::new(target_path),
                })
            }
            Err(e) => {
                warn!("[TRANSFER] Upload of {} failed: {}", file_name, e);
                self.finish_upload(TransferState::Failed, Some(e.to_string()));
                Err(e)
            }
        }
    }

    async fn send_upload(
        &self,
        source: Box<dyn FileSource>,
        file_name: &str,
        target_path: &str,
        size: Option<u64>,
        on_progress: Option<ProgressCallback>,
    ) -> Result<(), ClientError> {
        validate_upload_name(file_name)?;
        let mime_type = source.mime_type();
        let stream = source.open().await?;

        self.upload_status.send_modify(|s| s.state = TransferState::InFlight);
        let status = self.upload_status.clone();
        let stream = track(stream, size, move |progress| {
            status.send_modify(|s| s.progress = s.progress.max(progress.fraction));
            if let Some(cb) = &on_progress {
                cb(progress);
            }
        });

        self.transport
            .upload(
                target_path,
                FilePart {
                    field: "file".to_string(),
                    file_name: file_name.to_string(),
                    mime_type,
                    length: size,
                    stream,
                },
            )
            .await
    }

    /// Download `file_name` from directory `dir_path` into `sink`.
    ///
    /// Failures other than losing the session come back as
    /// [`ClientError::DownloadFailed`].
    pub async fn download<K>(
        &self,
        file_name: &str,
        dir_path: &str,
        sink: &K,
        on_progress: Option<ProgressCallback>,
    ) -> Result<SavedFile, ClientError>
    where
        K: FileSink + ?Sized,
    {
        let dir_path = path::normalize(dir_path);
        let id = self.next_id("dl");
        self.downloads.lock().unwrap_or_else(|e| e.into_inner()).insert(
            id.clone(),
            TransferSession {
                id: id.clone(),
                direction: TransferDirection::Download,
                file_name: file_name.to_string(),
                target_path: dir_path.clone(),
                size: None,
                progress: 0.0,
                state: TransferState::InFlight,
                error: None,
            },
        );
        let _active = ActiveDownload {
            table: self.downloads.clone(),
            id: id.clone(),
        };

        let body = self
            .transport
            .download(file_name, &dir_path)
            .await
            .map_err(download_error)?;
        let total = body.content_length;
        let generation = body.generation;

        let table = self.downloads.clone();
        let row = id.clone();
        let cb = on_progress.clone();
        let stream = track(body.stream, total, move |progress| {
            if let Some(session) = table.lock().unwrap_or_else(|e| e.into_inner()).get_mut(&row) {
                session.size = total;
                session.progress = session.progress.max(progress.fraction);
            }
            if let Some(cb) = &cb {
                cb(progress);
            }
        });

        let written = sink.write(file_name, stream).await;
        // A session that ended mid-stream outranks whatever the sink reported.
        self.transport.ensure_current(generation)?;
        let saved = written.map_err(|e| {
            warn!("[TRANSFER] Download of {} failed: {}", file_name, e);
            ClientError::DownloadFailed(e.to_string())
        })?;
        if let Some(cb) = &on_progress {
            cb(TransferProgress::complete(saved.bytes, total));
        }
        transfer_log(&format!("Downloaded {} to {}", file_name, saved.location));
        Ok(saved)
    }
}

fn validate_upload_name(name: &str) -> Result<(), ValidationError> {
    match path::validate_name(name) {
        Err(ValidationError::EmptyName) => Err(ValidationError::invalid(name, "file name is empty")),
        other => other,
    }
}

fn download_error(e: ClientError) -> ClientError {
    match e {
        ClientError::AuthExpired | ClientError::NotAuthenticated => e,
        other => ClientError::DownloadFailed(other.to_string()),
    }
}
