use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::orchestrator::UploadSummary;
use super::queue::{FileQueueItem, FileSnapshot, FileStatus, QueueError};
use super::transfer::BlobClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    NothingToUpload,
    AllFailed,
    Partial,
    AllComplete,
}

impl BatchOutcome {
    fn from_counts(processed: usize, completed: usize) -> Self {
        match (processed, completed) {
            (0, _) => BatchOutcome::NothingToUpload,
            (_, 0) => BatchOutcome::AllFailed,
            (p, c) if p == c => BatchOutcome::AllComplete,
            _ => BatchOutcome::Partial,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum UploadEvent {
    Item(FileSnapshot),
    Aggregate { progress: u8 },
    Finished(UploadSummary),
}

#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<UploadEvent>>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<UploadEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: UploadEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub completed: Vec<FileQueueItem>,
    pub processed: usize,
    pub had_errors: bool,
    pub outcome: BatchOutcome,
}

/// Drives queued items through the blob store.
///
/// Only `queued` items are touched, so a list can be submitted again after
/// more files were added. A failing file ends in `error` and never stops its
/// siblings.
pub struct UploadExecutor {
    blob: BlobClient,
    events: EventSink,
}

impl UploadExecutor {
    pub fn new(blob: BlobClient) -> Self {
        Self {
            blob,
            events: EventSink::none(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    pub async fn run(&self, items: &mut [FileQueueItem], license_type: &str) -> ExecutionReport {
        let batch: Vec<usize> = items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.status() == FileStatus::Queued)
            .map(|(index, _)| index)
            .collect();
        if batch.is_empty() {
            return ExecutionReport {
                completed: Vec::new(),
                processed: 0,
                had_errors: false,
                outcome: BatchOutcome::NothingToUpload,
            };
        }

        info!(files = batch.len(), "upload batch started");
        for &index in &batch {
            if let Err(err) = self.process(&mut items[index], license_type).await {
                warn!(%err, "skipping item with inconsistent state");
            }
            let progress = aggregate_progress(batch.iter().map(|&i| &items[i]));
            self.events.emit(UploadEvent::Aggregate { progress });
        }

        let completed: Vec<FileQueueItem> = batch
            .iter()
            .map(|&i| &items[i])
            .filter(|item| item.status() == FileStatus::Complete)
            .cloned()
            .collect();
        let had_errors = batch
            .iter()
            .any(|&i| items[i].status() == FileStatus::Error);
        let outcome = BatchOutcome::from_counts(batch.len(), completed.len());
        info!(
            processed = batch.len(),
            completed = completed.len(),
            ?outcome,
            "upload batch finished"
        );
        ExecutionReport {
            completed,
            processed: batch.len(),
            had_errors,
            outcome,
        }
    }

    async fn process(&self, item: &mut FileQueueItem, license_type: &str) -> Result<(), QueueError> {
        item.start()?;
        self.events.emit(UploadEvent::Item(item.snapshot()));

        let progress = Arc::new(AtomicU8::new(0));
        let on_progress = {
            let progress = Arc::clone(&progress);
            let events = self.events.clone();
            let base = item.snapshot();
            let total = item.size();
            move |sent: u64| {
                let pct = percent(sent, total);
                if progress.fetch_max(pct, Ordering::SeqCst) < pct {
                    events.emit(UploadEvent::Item(FileSnapshot {
                        progress: pct,
                        ..base.clone()
                    }));
                }
            }
        };

        let result = self
            .blob
            .upload(
                item.source(),
                item.name(),
                item.mime_type(),
                license_type,
                on_progress,
            )
            .await;
        item.advance(progress.load(Ordering::SeqCst))?;
        match result {
            Ok(blob) => item.complete(blob)?,
            Err(err) => {
                warn!(file = item.name(), %err, "file upload failed");
                item.fail(err.to_string())?;
            }
        }
        self.events.emit(UploadEvent::Item(item.snapshot()));
        Ok(())
    }
}

/// Processing progress never reports 100; only completion does.
fn percent(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    (sent.saturating_mul(100) / total).min(99) as u8
}

fn aggregate_progress<'a>(items: impl Iterator<Item = &'a FileQueueItem>) -> u8 {
    let (sum, count) = items.fold((0u64, 0u64), |(sum, count), item| {
        (sum + u64::from(item.progress()), count + 1)
    });
    if count == 0 {
        return 0;
    }
    (sum / count) as u8
}
