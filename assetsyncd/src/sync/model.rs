//! Project tree records as held in memory and mirrored to the local cache.
//!
//! Decoding is lenient: absent or wrongly-typed `assets`/`subfolders` decode
//! as empty lists, and malformed elements are dropped instead of failing the
//! whole tree.

use std::collections::BTreeMap;

use assetsync_core::{AssetRow, FolderRow, LicensingRow, OwnerRow, ProjectRow};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const DEFAULT_LICENSE_TYPE: &str = "standard";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ProjectTree {
    pub projects: Vec<Project>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub created_by: String,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub created_at: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub updated_at: Option<String>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub owners: Vec<Owner>,
    #[serde(default, deserialize_with = "lenient_option")]
    pub licensing: Option<Licensing>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub assets: Vec<Asset>,
    #[serde(default, alias = "folders", deserialize_with = "lenient_vec")]
    pub subfolders: Vec<Folder>,
}

/// Royalty percentages are informational; nothing requires them to sum to 100.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Owner {
    #[serde(default, deserialize_with = "lenient_string")]
    pub user_id: String,
    #[serde(default)]
    pub royalty_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Licensing {
    #[serde(rename = "type", default = "default_license_type")]
    pub license_type: String,
    #[serde(default)]
    pub usage_rights: BTreeMap<String, bool>,
}

impl Default for Licensing {
    fn default() -> Self {
        Self {
            license_type: default_license_type(),
            usage_rights: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub parent_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub assets: Vec<Asset>,
    #[serde(default, alias = "folders", deserialize_with = "lenient_vec")]
    pub subfolders: Vec<Folder>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(rename = "type", default, deserialize_with = "lenient_string")]
    pub asset_type: String,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub size: u64,
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub preview: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub license_type: String,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub uploaded_at: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub project_id: String,
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub folder_id: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub storage_ref: Option<String>,
}

impl ProjectTree {
    pub fn from_value(value: Value) -> Self {
        let projects = match value {
            Value::Object(mut map) => map
                .remove("projects")
                .map(decode_elements)
                .unwrap_or_default(),
            other => decode_elements(other),
        };
        Self { projects }
    }

    pub fn project(&self, project_id: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.id == project_id)
    }

    pub fn project_mut(&mut self, project_id: &str) -> Option<&mut Project> {
        self.projects.iter_mut().find(|p| p.id == project_id)
    }
}

impl<'de> Deserialize<'de> for ProjectTree {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value(value))
    }
}

impl Project {
    pub fn from_row(row: ProjectRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
            owners: row.owners.into_iter().map(Owner::from).collect(),
            licensing: row.licensing.map(Licensing::from),
            assets: Vec::new(),
            subfolders: Vec::new(),
        }
    }

    /// Assets at the root plus every nested folder.
    pub fn asset_count(&self) -> usize {
        self.assets.len() + self.subfolders.iter().map(Folder::asset_count).sum::<usize>()
    }
}

impl Folder {
    pub fn new(id: impl Into<String>, name: impl Into<String>, parent_id: Option<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parent_id,
            assets: Vec::new(),
            subfolders: Vec::new(),
        }
    }

    pub fn asset_count(&self) -> usize {
        self.assets.len() + self.subfolders.iter().map(Folder::asset_count).sum::<usize>()
    }

    pub fn to_row(&self, project_id: &str) -> FolderRow {
        FolderRow {
            id: self.id.clone(),
            project_id: project_id.to_string(),
            name: self.name.clone(),
            parent_folder_id: self.parent_id.clone(),
        }
    }
}

impl From<FolderRow> for Folder {
    fn from(row: FolderRow) -> Self {
        Folder::new(row.id, row.name, row.parent_folder_id)
    }
}

impl From<OwnerRow> for Owner {
    fn from(row: OwnerRow) -> Self {
        Self {
            user_id: row.user_id,
            royalty_percentage: row.royalty_percentage,
        }
    }
}

impl From<LicensingRow> for Licensing {
    fn from(row: LicensingRow) -> Self {
        Self {
            license_type: row.license_type,
            usage_rights: row.usage_rights,
        }
    }
}

impl From<AssetRow> for Asset {
    fn from(row: AssetRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            asset_type: row.asset_type,
            size: row.size,
            preview: row.preview.filter(|p| !p.is_empty()),
            license_type: row.license_type,
            uploaded_at: row.uploaded_at,
            project_id: row.project_id,
            folder_id: row.folder_id,
            storage_ref: row.storage_ref,
        }
    }
}

impl Asset {
    /// Transient `blob:` previews never leave the process.
    pub fn to_row(&self) -> AssetRow {
        AssetRow {
            id: self.id.clone(),
            project_id: self.project_id.clone(),
            folder_id: self.folder_id.clone(),
            name: self.name.clone(),
            asset_type: self.asset_type.clone(),
            size: self.size,
            preview: self
                .preview
                .clone()
                .filter(|p| !p.starts_with(super::preview::BLOB_SCHEME)),
            license_type: self.license_type.clone(),
            uploaded_at: self.uploaded_at.clone(),
            storage_ref: self.storage_ref.clone(),
        }
    }
}

fn default_license_type() -> String {
    DEFAULT_LICENSE_TYPE.to_string()
}

fn decode_elements<T: DeserializeOwned>(value: Value) -> Vec<T> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(prefer_subfolders_key)
            .filter_map(|item| match serde_json::from_value(item) {
                Ok(decoded) => Some(decoded),
                Err(err) => {
                    tracing::warn!(%err, "dropping malformed tree element");
                    None
                }
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// `folders` is a legacy spelling of `subfolders`. When an element carries
/// both keys, `subfolders` wins.
fn prefer_subfolders_key(mut item: Value) -> Value {
    if let Value::Object(map) = &mut item {
        if map.contains_key("subfolders") && map.remove("folders").is_some() {
            tracing::debug!("ignoring legacy folders key next to subfolders");
        }
    }
    item
}

fn lenient_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(decode_elements(Value::deserialize(deserializer)?))
}

fn lenient_option<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    match Value::deserialize(deserializer)? {
        value @ Value::Object(_) => Ok(serde_json::from_value(value).ok()),
        _ => Ok(None),
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(scalar_to_string(Value::deserialize(deserializer)?).unwrap_or_default())
}

fn lenient_opt_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(scalar_to_string(Value::deserialize(deserializer)?).filter(|s| !s.is_empty()))
}

fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let size = match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|v| *v > 0.0).map(|v| v as u64))
            .unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    };
    Ok(size)
}

fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn absent_and_non_array_lists_decode_empty() {
        let tree = ProjectTree::from_value(json!([
            {"id": "p1", "name": "A", "assets": null},
            {"id": "p2", "name": "B", "assets": "oops", "subfolders": {"x": 1}},
            {"id": "p3", "name": "C", "folders": [{"id": "f1", "name": "F", "assets": 3}]}
        ]));

        assert_eq!(tree.projects.len(), 3);
        assert!(tree.projects[0].assets.is_empty());
        assert!(tree.projects[0].subfolders.is_empty());
        assert!(tree.projects[1].assets.is_empty());
        assert!(tree.projects[1].subfolders.is_empty());
        assert_eq!(tree.projects[2].subfolders.len(), 1);
        assert!(tree.projects[2].subfolders[0].assets.is_empty());
    }

    #[test]
    fn subfolders_key_wins_over_legacy_folders_key() {
        let tree = ProjectTree::from_value(json!([{
            "id": "p1",
            "subfolders": [{
                "id": "f1",
                "subfolders": [{"id": "f2"}],
                "folders": [{"id": "old-nested"}]
            }],
            "folders": [{"id": "old"}]
        }]));

        assert_eq!(tree.projects.len(), 1);
        let project = &tree.projects[0];
        assert_eq!(project.subfolders.len(), 1);
        assert_eq!(project.subfolders[0].id, "f1");
        assert_eq!(project.subfolders[0].subfolders.len(), 1);
        assert_eq!(project.subfolders[0].subfolders[0].id, "f2");
    }

    #[test]
    fn malformed_elements_are_dropped() {
        let tree = ProjectTree::from_value(json!({
            "projects": [{"id": "p1", "assets": [{"id": "a1", "name": "ok"}, 42, "nope"]}, 7]
        }));
        assert_eq!(tree.projects.len(), 1);
        assert_eq!(tree.projects[0].assets.len(), 1);
        assert_eq!(tree.projects[0].assets[0].id, "a1");
    }

    #[test]
    fn preview_scalars_are_coerced_and_objects_cleared() {
        let tree = ProjectTree::from_value(json!([{
            "id": "p1",
            "assets": [
                {"id": "a1", "preview": 12},
                {"id": "a2", "preview": {"url": "x"}},
                {"id": "a3", "preview": ""},
                {"id": "a4", "preview": "data:image/png;base64,AAAA"}
            ]
        }]));
        let assets = &tree.projects[0].assets;
        assert_eq!(assets[0].preview.as_deref(), Some("12"));
        assert_eq!(assets[1].preview, None);
        assert_eq!(assets[2].preview, None);
        assert_eq!(
            assets[3].preview.as_deref(),
            Some("data:image/png;base64,AAAA")
        );
    }

    #[test]
    fn non_object_licensing_decodes_as_missing() {
        let tree = ProjectTree::from_value(json!([{"id": "p1", "licensing": "exclusive"}]));
        assert_eq!(tree.projects[0].licensing, None);
    }

    #[test]
    fn serializes_as_plain_array_with_camel_case_fields() {
        let mut project = Project {
            id: "p1".into(),
            created_by: "u1".into(),
            ..Project::default()
        };
        project.assets.push(Asset {
            id: "a1".into(),
            asset_type: "image/png".into(),
            project_id: "p1".into(),
            ..Asset::default()
        });
        let tree = ProjectTree {
            projects: vec![project],
        };
        let value = serde_json::to_value(&tree).unwrap();
        assert_eq!(value[0]["createdBy"], "u1");
        assert_eq!(value[0]["assets"][0]["type"], "image/png");
        assert_eq!(value[0]["assets"][0]["projectId"], "p1");
        assert!(value[0]["assets"][0].get("folderId").is_none());
    }

    #[test]
    fn asset_rows_drop_transient_previews() {
        let asset = Asset {
            id: "a1".into(),
            preview: Some("blob:assetsync/123".into()),
            ..Asset::default()
        };
        assert_eq!(asset.to_row().preview, None);
    }
}
