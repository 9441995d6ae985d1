use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::cache::{CacheError, TreeCache};
use super::integrity::{self, RepairReport};
use super::model::{Project, ProjectTree};
use super::preview::PreviewRegistry;
use super::resolver::find_folder_in;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
}

/// Projects other than the one being updated.
pub struct OtherProjects<'a> {
    before: &'a [Project],
    after: &'a [Project],
}

impl OtherProjects<'_> {
    pub fn holds_folder(&self, folder_id: &str) -> bool {
        self.before
            .iter()
            .chain(self.after)
            .any(|project| find_folder_in(&project.subfolders, folder_id).is_some())
    }
}

/// Process-wide owner of the project tree.
///
/// Every mutation is repaired and written to the local cache before it
/// becomes visible: the next tree is built on a copy, persisted, then
/// swapped in while the lock is still held.
pub struct TreeStore {
    tree: Mutex<ProjectTree>,
    cache: TreeCache,
    previews: PreviewRegistry,
}

impl TreeStore {
    pub async fn open(cache: TreeCache, previews: PreviewRegistry) -> Result<Self, StoreError> {
        let tree = match cache.load_tree().await {
            Ok(tree) => tree.unwrap_or_default(),
            Err(CacheError::Decode(err)) => {
                warn!(%err, "discarding undecodable cached tree");
                ProjectTree::default()
            }
            Err(err) => return Err(err.into()),
        };
        let store = Self {
            tree: Mutex::new(tree),
            cache,
            previews,
        };
        store.ensure_integrity().await?;
        Ok(store)
    }

    pub fn previews(&self) -> &PreviewRegistry {
        &self.previews
    }

    pub async fn ensure_integrity(&self) -> Result<RepairReport, StoreError> {
        let mut guard = self.tree.lock().await;
        let (next, report) = integrity::repair(guard.clone(), &self.previews);
        self.cache.save_tree(&next).await?;
        *guard = next;
        if report.is_clean() {
            debug!("project tree passed integrity check");
        } else {
            info!(?report, "project tree repaired");
        }
        Ok(report)
    }

    /// Applies `f` to one project. Returns `Ok(None)` without touching the
    /// cache when the project does not exist.
    pub async fn update_project<F, R>(&self, project_id: &str, f: F) -> Result<Option<R>, StoreError>
    where
        F: FnOnce(&mut Project) -> R,
    {
        self.update_project_with(project_id, |project, _| f(project))
            .await
    }

    /// Like `update_project`, also handing `f` a read-only view of every
    /// other project in the same snapshot.
    pub async fn update_project_with<F, R>(
        &self,
        project_id: &str,
        f: F,
    ) -> Result<Option<R>, StoreError>
    where
        F: FnOnce(&mut Project, &OtherProjects<'_>) -> R,
    {
        let mut guard = self.tree.lock().await;
        let mut next = guard.clone();
        let Some(index) = next.projects.iter().position(|p| p.id == project_id) else {
            return Ok(None);
        };
        let (before, rest) = next.projects.split_at_mut(index);
        let Some((project, after)) = rest.split_first_mut() else {
            return Ok(None);
        };
        let out = f(project, &OtherProjects { before, after });
        let report = integrity::repair_project(project, &self.previews);
        if !report.is_clean() {
            debug!(project_id, ?report, "repaired project after update");
        }
        self.cache.save_tree(&next).await?;
        *guard = next;
        Ok(Some(out))
    }

    /// Inserts or replaces a whole project, returning it as stored.
    pub async fn upsert_project(&self, mut project: Project) -> Result<Project, StoreError> {
        integrity::repair_project(&mut project, &self.previews);
        let mut guard = self.tree.lock().await;
        let mut next = guard.clone();
        match next.project_mut(&project.id) {
            Some(existing) => *existing = project.clone(),
            None => next.projects.push(project.clone()),
        }
        self.cache.save_tree(&next).await?;
        *guard = next;
        Ok(project)
    }

    pub async fn project(&self, project_id: &str) -> Option<Project> {
        self.tree.lock().await.project(project_id).cloned()
    }

    pub async fn snapshot(&self) -> ProjectTree {
        self.tree.lock().await.clone()
    }
}
