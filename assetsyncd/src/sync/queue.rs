use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use super::transfer::BlobRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Queued,
    Processing,
    Complete,
    Error,
}

impl FileStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, FileStatus::Complete | FileStatus::Error)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("invalid transition for {id}: {from:?} -> {to:?}")]
    InvalidTransition {
        id: String,
        from: FileStatus,
        to: FileStatus,
    },
    #[error("queue item not found: {0}")]
    NotFound(String),
}

/// One file's upload lifecycle: `queued -> processing -> complete | error`.
///
/// Progress only grows while processing and stays below 100 until the item
/// completes. Terminal items are history; a retry is a new queued item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileQueueItem {
    id: String,
    source: PathBuf,
    name: String,
    size: u64,
    mime_type: String,
    status: FileStatus,
    progress: u8,
    error: Option<String>,
    blob: Option<BlobRef>,
}

/// What observers render for one file during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileSnapshot {
    pub id: String,
    pub name: String,
    pub status: FileStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileQueueItem {
    pub fn queued(
        source: impl Into<PathBuf>,
        name: impl Into<String>,
        size: u64,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source: source.into(),
            name: name.into(),
            size,
            mime_type: mime_type.into(),
            status: FileStatus::Queued,
            progress: 0,
            error: None,
            blob: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> &std::path::Path {
        &self.source
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn status(&self) -> FileStatus {
        self.status
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn blob(&self) -> Option<&BlobRef> {
        self.blob.as_ref()
    }

    pub fn start(&mut self) -> Result<(), QueueError> {
        self.transition(FileStatus::Queued, FileStatus::Processing)
    }

    /// Raises progress, capped at 99. Lower values are ignored.
    pub fn advance(&mut self, progress: u8) -> Result<(), QueueError> {
        if self.status != FileStatus::Processing {
            return Err(self.invalid(FileStatus::Processing));
        }
        self.progress = self.progress.max(progress.min(99));
        Ok(())
    }

    pub fn complete(&mut self, blob: BlobRef) -> Result<(), QueueError> {
        self.transition(FileStatus::Processing, FileStatus::Complete)?;
        self.progress = 100;
        self.blob = Some(blob);
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), QueueError> {
        self.transition(FileStatus::Processing, FileStatus::Error)?;
        self.error = Some(message.into());
        Ok(())
    }

    pub fn snapshot(&self) -> FileSnapshot {
        FileSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            status: self.status,
            progress: self.progress,
            error: self.error.clone(),
        }
    }

    fn transition(&mut self, from: FileStatus, to: FileStatus) -> Result<(), QueueError> {
        if self.status != from {
            return Err(self.invalid(to));
        }
        self.status = to;
        Ok(())
    }

    fn invalid(&self, to: FileStatus) -> QueueError {
        QueueError::InvalidTransition {
            id: self.id.clone(),
            from: self.status,
            to,
        }
    }
}

/// Files picked or dropped by the user but not yet read into the queue.
///
/// Reading drains the selection, so the same pick is never enqueued twice.
#[derive(Debug, Default)]
pub struct FileSelection {
    paths: Vec<PathBuf>,
}

impl FileSelection {
    pub fn push(&mut self, path: impl Into<PathBuf>) {
        self.paths.push(path.into());
    }

    pub fn take(&mut self) -> Vec<PathBuf> {
        std::mem::take(&mut self.paths)
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl<P: Into<PathBuf>> FromIterator<P> for FileSelection {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        Self {
            paths: iter.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Default)]
pub struct UploadQueue {
    items: Vec<FileQueueItem>,
}

impl UploadQueue {
    /// Enqueues every readable file in `selection`, returning the new ids.
    pub async fn enqueue_selection(&mut self, selection: &mut FileSelection) -> Vec<String> {
        let mut ids = Vec::new();
        for path in selection.take() {
            let meta = match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => {
                    warn!(path = %path.display(), "skipping selection entry that is not a file");
                    continue;
                }
                Err(err) => {
                    warn!(path = %path.display(), %err, "skipping unreadable selection entry");
                    continue;
                }
            };
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            let mime = mime_guess::from_path(&path)
                .first_or_octet_stream()
                .essence_str()
                .to_string();
            let item = FileQueueItem::queued(path, name, meta.len(), mime);
            ids.push(item.id.clone());
            self.items.push(item);
        }
        ids
    }

    pub fn push(&mut self, item: FileQueueItem) {
        self.items.push(item);
    }

    /// Removes an item that has not started yet.
    pub fn cancel(&mut self, id: &str) -> Result<FileQueueItem, QueueError> {
        let index = self
            .items
            .iter()
            .position(|item| item.id == id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        let item = &self.items[index];
        if item.status != FileStatus::Queued {
            return Err(QueueError::InvalidTransition {
                id: id.to_string(),
                from: item.status,
                to: FileStatus::Queued,
            });
        }
        Ok(self.items.remove(index))
    }

    pub fn items(&self) -> &[FileQueueItem] {
        &self.items
    }

    pub fn items_mut(&mut self) -> &mut [FileQueueItem] {
        &mut self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
