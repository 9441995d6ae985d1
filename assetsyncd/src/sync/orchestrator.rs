use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use super::commit::{CommitError, CommitService};
use super::executor::{BatchOutcome, UploadEvent, UploadExecutor};
use super::loader::RemoteLoader;
use super::model::Project;
use super::notify::Notifier;
use super::queue::FileQueueItem;
use super::resolver::{FolderTarget, RecoveryFolderPolicy, find_folder, find_folder_in};
use super::store::{StoreError, TreeStore};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("project not found: {0}")]
    ProjectNotFound(String),
    #[error("folder {folder_id} not found in project {project_id}")]
    FolderNotFound {
        project_id: String,
        folder_id: String,
    },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("commit failed: {0}")]
    Commit(#[from] CommitError),
}

/// Terminal result of one submitted batch, as rendered by callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSummary {
    pub success: bool,
    pub count: usize,
    pub project_id: String,
    pub project_name: String,
    pub folder_id: String,
    pub outcome: BatchOutcome,
}

pub struct UploadOrchestrator {
    store: Arc<TreeStore>,
    executor: UploadExecutor,
    commit: CommitService,
    loader: Option<(RemoteLoader, u32)>,
    notifier: Notifier,
}

impl UploadOrchestrator {
    pub fn new(
        store: Arc<TreeStore>,
        executor: UploadExecutor,
        commit: CommitService,
        notifier: Notifier,
    ) -> Self {
        Self {
            store,
            executor,
            commit,
            loader: None,
            notifier,
        }
    }

    /// Projects missing from the local store are fetched through `loader`
    /// before the batch is rejected.
    pub fn with_loader(mut self, loader: RemoteLoader, max_retries: u32) -> Self {
        self.loader = Some((loader, max_retries));
        self
    }

    /// Repairs the tree, validates the target, uploads every queued item,
    /// commits what completed and reports once.
    pub async fn submit(
        &self,
        project_id: &str,
        target: &FolderTarget,
        license_type: &str,
        items: &mut [FileQueueItem],
    ) -> Result<UploadSummary, UploadError> {
        if let Err(err) = self.store.ensure_integrity().await {
            return Err(self.report(err.into()));
        }

        let project = self.locate_project(project_id).await?;
        self.check_target(&project, target).await?;

        let report = self.executor.run(items, license_type).await;
        let receipt = match self
            .commit
            .commit(project_id, &report.completed, license_type, target)
            .await
        {
            Ok(receipt) => receipt,
            Err(err) => return Err(self.report(err.into())),
        };

        let summary = UploadSummary {
            success: receipt.success,
            count: receipt.count,
            project_id: project.id.clone(),
            project_name: project.name.clone(),
            folder_id: receipt.location.folder_id().to_string(),
            outcome: report.outcome,
        };
        info!(
            project_id,
            count = summary.count,
            outcome = ?summary.outcome,
            "upload batch summarized"
        );
        match summary.outcome {
            BatchOutcome::NothingToUpload => self.notifier.info("Nothing to upload"),
            BatchOutcome::AllFailed => self
                .notifier
                .error(format!("No files could be uploaded to {}", project.name)),
            BatchOutcome::Partial | BatchOutcome::AllComplete => self.notifier.info(format!(
                "Uploaded {} of {} files to {}",
                summary.count, report.processed, project.name
            )),
        }
        self.executor
            .events()
            .emit(UploadEvent::Finished(summary.clone()));
        Ok(summary)
    }

    async fn locate_project(&self, project_id: &str) -> Result<Project, UploadError> {
        if let Some(project) = self.store.project(project_id).await {
            return Ok(project);
        }
        match &self.loader {
            // The loader has already notified on failure.
            Some((loader, max_retries)) => loader
                .load(project_id, *max_retries)
                .await
                .ok_or_else(|| UploadError::ProjectNotFound(project_id.to_string())),
            None => Err(self.report(UploadError::ProjectNotFound(project_id.to_string()))),
        }
    }

    async fn check_target(&self, project: &Project, target: &FolderTarget) -> Result<(), UploadError> {
        let FolderTarget::Folder(folder_id) = target else {
            return Ok(());
        };
        if find_folder_in(&project.subfolders, folder_id).is_some() {
            return Ok(());
        }
        if find_folder(&self.store.snapshot().await, folder_id).is_some() {
            warn!(project_id = %project.id, %folder_id, "target folder belongs to another project");
        } else {
            warn!(project_id = %project.id, %folder_id, "target folder is missing");
        }
        match self.commit.policy() {
            RecoveryFolderPolicy::Fabricate => Ok(()),
            RecoveryFolderPolicy::Reject => Err(self.report(UploadError::FolderNotFound {
                project_id: project.id.clone(),
                folder_id: folder_id.clone(),
            })),
        }
    }

    fn report(&self, err: UploadError) -> UploadError {
        warn!(%err, "upload batch failed");
        self.notifier.error(err.to_string());
        err
    }
}
