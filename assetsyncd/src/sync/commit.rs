use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use assetsync_core::{RemoteError, RemoteStoreClient};
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{info, warn};

use super::model::{Asset, Folder};
use super::queue::{FileQueueItem, FileStatus};
use super::resolver::{
    AssetLocation, FolderTarget, RECOVERY_FOLDER_NAME, RecoveryFolderPolicy, ResolveError,
    resolve_or_create,
};
use super::retry::{Backoff, RetryPolicy, retry};
use super::store::{StoreError, TreeStore};

#[derive(Debug, Error)]
pub enum CommitError {
    #[error("project not found: {0}")]
    ProjectNotFound(String),
    #[error("folder not found: {0}")]
    FolderNotFound(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteSync {
    Skipped,
    Synced,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitReceipt {
    pub success: bool,
    pub count: usize,
    pub location: AssetLocation,
    pub remote: RemoteSync,
}

/// Turns completed queue items into asset records inside one project.
pub struct CommitService {
    store: Arc<TreeStore>,
    policy: RecoveryFolderPolicy,
    remote: Option<RemoteStoreClient>,
    write_retry: RetryPolicy,
}

impl CommitService {
    pub fn new(store: Arc<TreeStore>) -> Self {
        Self {
            store,
            policy: RecoveryFolderPolicy::default(),
            remote: None,
            write_retry: RetryPolicy::new(
                3,
                Backoff::exponential(Duration::from_millis(250), Duration::from_secs(5), true),
            ),
        }
    }

    pub fn with_policy(mut self, policy: RecoveryFolderPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Mirrors committed rows to the remote store after the local write.
    pub fn with_remote(mut self, remote: RemoteStoreClient, write_retry: RetryPolicy) -> Self {
        self.remote = Some(remote);
        self.write_retry = write_retry;
        self
    }

    pub fn policy(&self) -> RecoveryFolderPolicy {
        self.policy
    }

    pub async fn commit(
        &self,
        project_id: &str,
        files: &[FileQueueItem],
        license_type: &str,
        target: &FolderTarget,
    ) -> Result<CommitReceipt, CommitError> {
        if self.store.project(project_id).await.is_none() {
            return Err(CommitError::ProjectNotFound(project_id.to_string()));
        }

        let completed: Vec<&FileQueueItem> = files
            .iter()
            .filter(|item| item.status() == FileStatus::Complete)
            .collect();
        if completed.is_empty() {
            return Ok(CommitReceipt {
                success: false,
                count: 0,
                location: requested_location(target),
                remote: RemoteSync::Skipped,
            });
        }

        let uploaded_at = OffsetDateTime::now_utc().format(&Rfc3339).ok();
        let pending: Vec<(Asset, Option<&Path>)> = completed
            .iter()
            .map(|item| {
                let asset = asset_from(item, project_id, license_type, uploaded_at.clone());
                let source = item.mime_type().starts_with("image/").then(|| item.source());
                (asset, source)
            })
            .collect();
        let count = pending.len();
        let policy = self.policy;
        let previews = self.store.previews().clone();

        let outcome = self
            .store
            .update_project_with(project_id, |project, others| {
                let (location, list) =
                    resolve_or_create(project, target, policy, |id| others.holds_folder(id))?;
                let folder_id = folder_id_of(&location);
                let landed: Vec<Asset> = pending
                    .into_iter()
                    .map(|(mut asset, source)| {
                        asset.folder_id = folder_id.clone();
                        asset.preview = source.map(|source| previews.register(source));
                        asset
                    })
                    .collect();
                list.extend(landed.iter().cloned());
                Ok::<_, ResolveError>((location, landed))
            })
            .await?;

        let (location, landed) = match outcome {
            None => return Err(CommitError::ProjectNotFound(project_id.to_string())),
            Some(Err(ResolveError::FolderNotFound(id))) => {
                return Err(CommitError::FolderNotFound(id));
            }
            Some(Ok(done)) => done,
        };
        info!(project_id, count, %location, "assets committed");

        let remote = match &self.remote {
            Some(client) => self.write_through(client, project_id, &location, &landed).await,
            None => RemoteSync::Skipped,
        };

        Ok(CommitReceipt {
            success: true,
            count,
            location,
            remote,
        })
    }

    async fn write_through(
        &self,
        client: &RemoteStoreClient,
        project_id: &str,
        location: &AssetLocation,
        assets: &[Asset],
    ) -> RemoteSync {
        if let AssetLocation::RecoveredFolder(id) = location {
            let row = Folder::new(id.clone(), RECOVERY_FOLDER_NAME, None).to_row(project_id);
            let written = retry(self.write_retry, RemoteError::is_retryable, |_| {
                client.insert_folder(&row)
            })
            .await;
            if let Err(err) = written {
                warn!(project_id, folder_id = %id, %err, "failed to mirror recovery folder");
                return RemoteSync::Failed;
            }
        }

        for asset in assets {
            let row = asset.to_row();
            let written = retry(self.write_retry, RemoteError::is_retryable, |_| {
                client.insert_asset(&row)
            })
            .await;
            if let Err(err) = written {
                warn!(project_id, asset_id = %asset.id, %err, "failed to mirror asset row");
                return RemoteSync::Failed;
            }
        }
        RemoteSync::Synced
    }
}

/// Image previews are registered only once the asset has a home.
fn asset_from(
    item: &FileQueueItem,
    project_id: &str,
    license_type: &str,
    uploaded_at: Option<String>,
) -> Asset {
    Asset {
        id: uuid::Uuid::new_v4().to_string(),
        name: item.name().to_string(),
        asset_type: item.mime_type().to_string(),
        size: item.size(),
        preview: None,
        license_type: license_type.to_string(),
        uploaded_at,
        project_id: project_id.to_string(),
        folder_id: None,
        storage_ref: item.blob().map(|blob| blob.reference.clone()),
    }
}

fn requested_location(target: &FolderTarget) -> AssetLocation {
    match target {
        FolderTarget::Root => AssetLocation::Root,
        FolderTarget::Folder(id) => AssetLocation::Folder(id.clone()),
    }
}

fn folder_id_of(location: &AssetLocation) -> Option<String> {
    match location {
        AssetLocation::Root => None,
        AssetLocation::Folder(id) | AssetLocation::RecoveredFolder(id) => Some(id.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::cache::memory_cache;
    use crate::sync::model::Project;
    use crate::sync::preview::PreviewRegistry;
    use crate::sync::resolver::find_folder_in;
    use crate::sync::transfer::BlobRef;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn store_with_projects() -> Arc<TreeStore> {
        let store = TreeStore::open(memory_cache().await, PreviewRegistry::new())
            .await
            .unwrap();
        store
            .upsert_project(Project {
                id: "p1".into(),
                name: "Launch".into(),
                subfolders: vec![Folder::new("f1", "Shots", None)],
                ..Project::default()
            })
            .await
            .unwrap();
        store
            .upsert_project(Project {
                id: "p2".into(),
                name: "Other".into(),
                ..Project::default()
            })
            .await
            .unwrap();
        Arc::new(store)
    }

    fn completed_item(source: &Path, name: &str, mime: &str) -> FileQueueItem {
        let mut item = FileQueueItem::queued(source.join(name), name, 4, mime);
        item.start().unwrap();
        item.complete(BlobRef {
            reference: format!("blob-{name}"),
        })
        .unwrap();
        item
    }

    fn failed_item(name: &str) -> FileQueueItem {
        let mut item = FileQueueItem::queued(format!("/tmp/{name}"), name, 4, "text/plain");
        item.start().unwrap();
        item.fail("transport").unwrap();
        item
    }

    #[tokio::test]
    async fn missing_project_rejects_regardless_of_files() {
        let store = store_with_projects().await;
        let service = CommitService::new(store);
        let dir = tempdir().unwrap();

        for files in [vec![], vec![completed_item(dir.path(), "a.txt", "text/plain")]] {
            let err = service
                .commit("nope", &files, "standard", &FolderTarget::Root)
                .await
                .unwrap_err();
            assert!(matches!(err, CommitError::ProjectNotFound(id) if id == "nope"));
        }
    }

    #[tokio::test]
    async fn nothing_completed_leaves_tree_unchanged() {
        let store = store_with_projects().await;
        let before = store.snapshot().await;
        let service = CommitService::new(Arc::clone(&store));

        let receipt = service
            .commit("p1", &[failed_item("a.txt")], "standard", &FolderTarget::Root)
            .await
            .unwrap();

        assert!(!receipt.success);
        assert_eq!(receipt.count, 0);
        assert_eq!(store.snapshot().await, before);
    }

    #[tokio::test]
    async fn root_commit_lands_only_in_root_list() {
        let store = store_with_projects().await;
        let service = CommitService::new(Arc::clone(&store));
        let dir = tempdir().unwrap();
        let files = vec![
            completed_item(dir.path(), "a.txt", "text/plain"),
            failed_item("b.txt"),
        ];

        let receipt = service
            .commit("p1", &files, "standard", &FolderTarget::Root)
            .await
            .unwrap();

        assert!(receipt.success);
        assert_eq!(receipt.count, 1);
        assert_eq!(receipt.location, AssetLocation::Root);
        let project = store.project("p1").await.unwrap();
        assert_eq!(project.assets.len(), 1);
        assert_eq!(project.assets[0].storage_ref.as_deref(), Some("blob-a.txt"));
        assert_eq!(project.assets[0].folder_id, None);
        assert!(project.subfolders[0].assets.is_empty());
    }

    #[tokio::test]
    async fn folder_commit_lands_only_in_that_folder() {
        let store = store_with_projects().await;
        let service = CommitService::new(Arc::clone(&store));
        let dir = tempdir().unwrap();
        let files = vec![completed_item(dir.path(), "a.txt", "text/plain")];

        let receipt = service
            .commit("p1", &files, "exclusive", &FolderTarget::Folder("f1".into()))
            .await
            .unwrap();

        assert_eq!(receipt.location, AssetLocation::Folder("f1".into()));
        let project = store.project("p1").await.unwrap();
        assert!(project.assets.is_empty());
        let folder = &project.subfolders[0];
        assert_eq!(folder.assets.len(), 1);
        assert_eq!(folder.assets[0].folder_id.as_deref(), Some("f1"));
        assert_eq!(folder.assets[0].license_type, "exclusive");
    }

    #[tokio::test]
    async fn missing_folder_is_recovered_not_rejected() {
        let store = store_with_projects().await;
        let untouched = store.project("p2").await.unwrap();
        let service = CommitService::new(Arc::clone(&store));
        let dir = tempdir().unwrap();
        let files = vec![
            completed_item(dir.path(), "a.txt", "text/plain"),
            completed_item(dir.path(), "b.txt", "text/plain"),
        ];

        let receipt = service
            .commit("p1", &files, "standard", &FolderTarget::Folder("gone".into()))
            .await
            .unwrap();

        assert!(receipt.success);
        assert_eq!(receipt.location, AssetLocation::RecoveredFolder("gone".into()));
        let project = store.project("p1").await.unwrap();
        let folder = find_folder_in(&project.subfolders, "gone").unwrap();
        assert_eq!(folder.name, RECOVERY_FOLDER_NAME);
        assert_eq!(folder.assets.len(), 2);
        assert_eq!(store.project("p2").await.unwrap(), untouched);
    }

    #[tokio::test]
    async fn strict_policy_rejects_missing_folder() {
        let store = store_with_projects().await;
        let before = store.snapshot().await;
        let service =
            CommitService::new(Arc::clone(&store)).with_policy(RecoveryFolderPolicy::Reject);
        let dir = tempdir().unwrap();
        let files = vec![completed_item(dir.path(), "a.txt", "text/plain")];

        let err = service
            .commit("p1", &files, "standard", &FolderTarget::Folder("gone".into()))
            .await
            .unwrap_err();

        assert!(matches!(err, CommitError::FolderNotFound(id) if id == "gone"));
        assert_eq!(store.snapshot().await, before);
    }

    #[tokio::test]
    async fn recovery_folder_never_duplicates_an_id_held_by_another_project() {
        let store = store_with_projects().await;
        store
            .update_project("p2", |project| {
                project.subfolders.push(Folder::new("f9", "Elsewhere", None));
            })
            .await
            .unwrap();
        let service = CommitService::new(Arc::clone(&store));
        let dir = tempdir().unwrap();
        let files = vec![completed_item(dir.path(), "a.txt", "text/plain")];

        let receipt = service
            .commit("p1", &files, "standard", &FolderTarget::Folder("f9".into()))
            .await
            .unwrap();

        let AssetLocation::RecoveredFolder(recovered) = &receipt.location else {
            panic!("expected a recovery folder, got {:?}", receipt.location);
        };
        assert_ne!(recovered, "f9");
        let tree = store.snapshot().await;
        let holders: Vec<&str> = tree
            .projects
            .iter()
            .filter(|project| find_folder_in(&project.subfolders, "f9").is_some())
            .map(|project| project.id.as_str())
            .collect();
        assert_eq!(holders, ["p2"]);
        let p1 = store.project("p1").await.unwrap();
        let folder = find_folder_in(&p1.subfolders, recovered).unwrap();
        assert_eq!(folder.assets[0].folder_id.as_deref(), Some(recovered.as_str()));
    }

    #[tokio::test]
    async fn rejected_commit_registers_no_previews() {
        let store = store_with_projects().await;
        let service =
            CommitService::new(Arc::clone(&store)).with_policy(RecoveryFolderPolicy::Reject);
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("cover.png"), b"png!").unwrap();
        let files = vec![completed_item(dir.path(), "cover.png", "image/png")];

        service
            .commit("p1", &files, "standard", &FolderTarget::Folder("gone".into()))
            .await
            .unwrap_err();

        assert!(store.previews().is_empty());
    }

    #[tokio::test]
    async fn image_assets_get_live_transient_preview() {
        let store = store_with_projects().await;
        let service = CommitService::new(Arc::clone(&store));
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("cover.png"), b"png!").unwrap();
        let files = vec![
            completed_item(dir.path(), "cover.png", "image/png"),
            completed_item(dir.path(), "notes.txt", "text/plain"),
        ];

        service
            .commit("p1", &files, "standard", &FolderTarget::Root)
            .await
            .unwrap();

        let project = store.project("p1").await.unwrap();
        let preview = project.assets[0].preview.clone().unwrap();
        assert!(store.previews().is_live(&preview));
        assert_eq!(project.assets[1].preview, None);
    }

    #[tokio::test]
    async fn recovered_commit_is_mirrored_to_remote() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/folders"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": "gone", "project_id": "p1", "name": RECOVERY_FOLDER_NAME
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/assets"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": "x", "project_id": "p1", "name": "a.txt"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = store_with_projects().await;
        let client = RemoteStoreClient::with_base_url(&server.uri(), "k").unwrap();
        let service = CommitService::new(store).with_remote(
            client,
            RetryPolicy::new(2, Backoff::linear(Duration::from_millis(1))),
        );
        let dir = tempdir().unwrap();
        let files = vec![completed_item(dir.path(), "a.txt", "text/plain")];

        let receipt = service
            .commit("p1", &files, "standard", &FolderTarget::Folder("gone".into()))
            .await
            .unwrap();
        assert_eq!(receipt.remote, RemoteSync::Synced);
    }

    #[tokio::test]
    async fn remote_failure_does_not_fail_commit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/assets"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let store = store_with_projects().await;
        let client = RemoteStoreClient::with_base_url(&server.uri(), "k").unwrap();
        let service = CommitService::new(Arc::clone(&store)).with_remote(
            client,
            RetryPolicy::new(2, Backoff::linear(Duration::from_millis(1))),
        );
        let dir = tempdir().unwrap();
        let files = vec![completed_item(dir.path(), "a.txt", "text/plain")];

        let receipt = service
            .commit("p1", &files, "standard", &FolderTarget::Root)
            .await
            .unwrap();

        assert!(receipt.success);
        assert_eq!(receipt.remote, RemoteSync::Failed);
        assert_eq!(store.project("p1").await.unwrap().assets.len(), 1);
    }
}
