use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use assetsync_core::{AssetRow, FolderRow, RemoteError, RemoteStoreClient};
use futures_util::future::try_join_all;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::model::{Asset, Folder, Project};
use super::notify::Notifier;
use super::retry::{Backoff, RetryPolicy, retry};
use super::store::TreeStore;

/// Only a missing project ends a load early. Every other remote failure,
/// including a 404 from a secondary listing, is retried.
#[derive(Debug, Error)]
enum LoadError {
    #[error("project not found: {0}")]
    ProjectMissing(RemoteError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl LoadError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

enum Fetched {
    Cached(Project),
    Remote(Project),
}

/// Read-through loader: local store first, then the remote store with
/// bounded linear backoff.
pub struct RemoteLoader {
    client: RemoteStoreClient,
    store: Arc<TreeStore>,
    notifier: Notifier,
    base_delay: Duration,
}

impl RemoteLoader {
    pub fn new(
        client: RemoteStoreClient,
        store: Arc<TreeStore>,
        notifier: Notifier,
        base_delay: Duration,
    ) -> Self {
        Self {
            client,
            store,
            notifier,
            base_delay,
        }
    }

    /// Never fails past this call: a project that cannot be found anywhere
    /// yields `None` and exactly one notification.
    pub async fn load(&self, project_id: &str, max_retries: u32) -> Option<Project> {
        if let Some(project) = self.store.project(project_id).await {
            debug!(project_id, "project served from local cache");
            return Some(project);
        }
        self.fetch(project_id, max_retries, true).await
    }

    /// Re-syncs one project from the remote store, ignoring the local copy
    /// unless the remote stays unreachable.
    pub async fn refresh(&self, project_id: &str, max_retries: u32) -> Option<Project> {
        self.fetch(project_id, max_retries, false).await
    }

    async fn fetch(&self, project_id: &str, max_retries: u32, prefer_cache: bool) -> Option<Project> {
        let policy = RetryPolicy::new(max_retries, Backoff::linear(self.base_delay));
        let result = retry(
            policy,
            LoadError::is_retryable,
            |attempt| async move {
                if prefer_cache && attempt > 1 {
                    if let Some(project) = self.store.project(project_id).await {
                        return Ok(Fetched::Cached(project));
                    }
                }
                self.fetch_remote(project_id).await.map(Fetched::Remote)
            },
        )
        .await;

        match result {
            Ok(Fetched::Cached(project)) => {
                debug!(project_id, "local cache populated while retrying");
                Some(project)
            }
            Ok(Fetched::Remote(project)) => {
                info!(
                    project_id,
                    folders = project.subfolders.len(),
                    assets = project.asset_count(),
                    "project loaded from remote store"
                );
                match self.store.upsert_project(project.clone()).await {
                    Ok(stored) => Some(stored),
                    Err(err) => {
                        warn!(project_id, %err, "failed to cache remote project");
                        Some(project)
                    }
                }
            }
            Err(err) => {
                warn!(project_id, %err, attempts = policy.max_attempts, "remote load failed");
                if let Some(project) = self.store.project(project_id).await {
                    return Some(project);
                }
                self.notifier
                    .error(format!("Project {project_id} could not be loaded"));
                None
            }
        }
    }

    async fn fetch_remote(&self, project_id: &str) -> Result<Project, LoadError> {
        let row = match self.client.get_project(project_id).await {
            Ok(row) => row,
            Err(err) if err.is_not_found() => return Err(LoadError::ProjectMissing(err)),
            Err(err) => return Err(err.into()),
        };
        let root_assets = self.client.list_root_assets(project_id).await?;
        let folders = self.client.list_folders(project_id).await?;
        let folder_assets = try_join_all(
            folders
                .iter()
                .map(|folder| self.folder_assets(&folder.id)),
        )
        .await?;

        let mut project = Project::from_row(row);
        project.assets = root_assets.into_iter().map(Asset::from).collect();
        project.subfolders = assemble_folders(folders, folder_assets);
        Ok(project)
    }

    /// A folder listed a moment ago may be gone by the time its assets are
    /// read; it loads as empty.
    async fn folder_assets(&self, folder_id: &str) -> Result<Vec<AssetRow>, RemoteError> {
        match self.client.list_folder_assets(folder_id).await {
            Err(err) if err.is_not_found() => {
                warn!(folder_id, "folder assets not found, loading folder as empty");
                Ok(Vec::new())
            }
            other => other,
        }
    }
}

/// Nests flat folder rows by `parent_folder_id`. Rows whose parent is unknown
/// and rows caught in a parent cycle end up at the project root.
fn assemble_folders(rows: Vec<FolderRow>, assets: Vec<Vec<AssetRow>>) -> Vec<Folder> {
    let known: HashSet<String> = rows.iter().map(|row| row.id.clone()).collect();
    let mut children: HashMap<Option<String>, Vec<Folder>> = HashMap::new();

    for (row, rows_assets) in rows.into_iter().zip(assets) {
        let mut folder = Folder::from(row);
        folder.assets = rows_assets.into_iter().map(Asset::from).collect();
        let parent = folder
            .parent_id
            .clone()
            .filter(|parent| known.contains(parent) && *parent != folder.id);
        if parent.is_none() && folder.parent_id.is_some() {
            warn!(folder_id = %folder.id, "folder parent unknown, attaching at root");
        }
        children.entry(parent).or_default().push(folder);
    }

    let mut roots = children.remove(&None).unwrap_or_default();
    for root in &mut roots {
        attach_children(root, &mut children);
    }
    while let Some(key) = children.keys().next().cloned() {
        let mut stranded = children.remove(&key).unwrap_or_default();
        warn!(count = stranded.len(), "folder cycle detected, attaching at root");
        for folder in &mut stranded {
            attach_children(folder, &mut children);
        }
        roots.extend(stranded);
    }
    roots
}

fn attach_children(folder: &mut Folder, children: &mut HashMap<Option<String>, Vec<Folder>>) {
    if let Some(mut kids) = children.remove(&Some(folder.id.clone())) {
        for kid in &mut kids {
            attach_children(kid, children);
        }
        folder.subfolders.extend(kids);
    }
}
