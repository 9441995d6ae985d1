use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ProjectRow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub owners: Vec<OwnerRow>,
    #[serde(default)]
    pub licensing: Option<LicensingRow>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct OwnerRow {
    pub user_id: String,
    #[serde(default)]
    pub royalty_percentage: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct LicensingRow {
    #[serde(rename = "type")]
    pub license_type: String,
    #[serde(default)]
    pub usage_rights: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct FolderRow {
    pub id: String,
    pub project_id: String,
    pub name: String,
    #[serde(default)]
    pub parent_folder_id: Option<String>,
}

/// `folder_id = None` places the asset at the project root.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct AssetRow {
    pub id: String,
    pub project_id: String,
    #[serde(default)]
    pub folder_id: Option<String>,
    pub name: String,
    #[serde(rename = "type", default)]
    pub asset_type: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub preview: Option<String>,
    #[serde(default)]
    pub license_type: String,
    #[serde(default)]
    pub uploaded_at: Option<String>,
    #[serde(default)]
    pub storage_ref: Option<String>,
}
