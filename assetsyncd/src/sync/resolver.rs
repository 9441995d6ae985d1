use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use super::model::{Asset, Folder, Project, ProjectTree};

/// Reserved folder id meaning "the project's own asset list".
pub const ROOT_FOLDER_ID: &str = "root";
pub const RECOVERY_FOLDER_NAME: &str = "Recovered uploads";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderTarget {
    Root,
    Folder(String),
}

impl FolderTarget {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") | Some(ROOT_FOLDER_ID) => FolderTarget::Root,
            Some(id) => FolderTarget::Folder(id.to_string()),
        }
    }

    pub fn as_id(&self) -> &str {
        match self {
            FolderTarget::Root => ROOT_FOLDER_ID,
            FolderTarget::Folder(id) => id,
        }
    }
}

/// What to do when assets target a folder the project does not contain.
///
/// `Fabricate` never loses uploaded files but can fragment the folder tree
/// when a caller passes a stale id; `Reject` keeps the tree strict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecoveryFolderPolicy {
    #[default]
    Fabricate,
    Reject,
}

impl FromStr for RecoveryFolderPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fabricate" => Ok(Self::Fabricate),
            "reject" => Ok(Self::Reject),
            other => Err(format!("unknown recovery folder policy: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "folderId", rename_all = "camelCase")]
pub enum AssetLocation {
    Root,
    Folder(String),
    RecoveredFolder(String),
}

impl AssetLocation {
    pub fn folder_id(&self) -> &str {
        match self {
            AssetLocation::Root => ROOT_FOLDER_ID,
            AssetLocation::Folder(id) | AssetLocation::RecoveredFolder(id) => id,
        }
    }
}

impl fmt::Display for AssetLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetLocation::Root => write!(f, "project root"),
            AssetLocation::Folder(id) => write!(f, "folder {id}"),
            AssetLocation::RecoveredFolder(id) => write!(f, "recovered folder {id}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("folder not found: {0}")]
    FolderNotFound(String),
}

/// Depth-first search across every project's folder tree.
pub fn find_folder<'a>(tree: &'a ProjectTree, folder_id: &str) -> Option<&'a Folder> {
    if folder_id == ROOT_FOLDER_ID {
        return None;
    }
    tree.projects
        .iter()
        .find_map(|project| find_folder_in(&project.subfolders, folder_id))
}

pub fn find_folder_in<'a>(folders: &'a [Folder], folder_id: &str) -> Option<&'a Folder> {
    for folder in folders {
        if folder.id == folder_id {
            return Some(folder);
        }
        if let Some(found) = find_folder_in(&folder.subfolders, folder_id) {
            return Some(found);
        }
    }
    None
}

pub fn find_folder_mut<'a>(folders: &'a mut [Folder], folder_id: &str) -> Option<&'a mut Folder> {
    for folder in folders.iter_mut() {
        if folder.id == folder_id {
            return Some(folder);
        }
        if let Some(found) = find_folder_mut(&mut folder.subfolders, folder_id) {
            return Some(found);
        }
    }
    None
}

/// Finds the asset list `target` names inside `project`, creating a recovery
/// folder when the target is missing and `policy` allows it.
///
/// The recovery folder reuses the requested id, so later commits against the
/// same stale id land in the same place. When `used_elsewhere` reports the id
/// as held by another project, the recovery folder gets a fresh id instead so
/// folder ids stay unique across the tree.
pub fn resolve_or_create<'a, U>(
    project: &'a mut Project,
    target: &FolderTarget,
    policy: RecoveryFolderPolicy,
    used_elsewhere: U,
) -> Result<(AssetLocation, &'a mut Vec<Asset>), ResolveError>
where
    U: Fn(&str) -> bool,
{
    let folder_id = match target {
        FolderTarget::Root => return Ok((AssetLocation::Root, &mut project.assets)),
        FolderTarget::Folder(id) => id,
    };

    let location = if find_folder_in(&project.subfolders, folder_id).is_some() {
        AssetLocation::Folder(folder_id.clone())
    } else {
        match policy {
            RecoveryFolderPolicy::Reject => {
                return Err(ResolveError::FolderNotFound(folder_id.clone()));
            }
            RecoveryFolderPolicy::Fabricate => {
                let recovery_id = if used_elsewhere(folder_id) {
                    format!("folder-{}", uuid::Uuid::new_v4())
                } else {
                    folder_id.clone()
                };
                warn!(
                    project_id = %project.id,
                    folder_id = %folder_id,
                    %recovery_id,
                    "target folder missing, creating recovery folder"
                );
                project
                    .subfolders
                    .push(Folder::new(recovery_id.clone(), RECOVERY_FOLDER_NAME, None));
                AssetLocation::RecoveredFolder(recovery_id)
            }
        }
    };

    let folder = find_folder_mut(&mut project.subfolders, location.folder_id())
        .ok_or_else(|| ResolveError::FolderNotFound(folder_id.clone()))?;
    Ok((location, &mut folder.assets))
}
