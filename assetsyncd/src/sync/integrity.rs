//! Structural repair of the project tree.
//!
//! `repair` is pure and idempotent: a second pass over its output changes
//! nothing and reports zero fixes. List-shape problems are already handled
//! while decoding (see `model`); this pass fixes what a well-typed tree can
//! still get wrong.

use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::Serialize;
use time::OffsetDateTime;

use super::model::{Asset, Folder, Licensing, Project, ProjectTree};
use super::preview::{PreviewRegistry, normalize_preview};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub ids_synthesized: usize,
    pub licensing_added: usize,
    pub previews_cleared: usize,
    pub assets_relinked: usize,
    pub folders_relinked: usize,
}

impl RepairReport {
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }

    fn absorb(&mut self, other: RepairReport) {
        self.ids_synthesized += other.ids_synthesized;
        self.licensing_added += other.licensing_added;
        self.previews_cleared += other.previews_cleared;
        self.assets_relinked += other.assets_relinked;
        self.folders_relinked += other.folders_relinked;
    }
}

pub fn repair(mut tree: ProjectTree, previews: &PreviewRegistry) -> (ProjectTree, RepairReport) {
    let mut report = RepairReport::default();
    for project in &mut tree.projects {
        report.absorb(repair_project(project, previews));
    }
    (tree, report)
}

pub fn repair_project(project: &mut Project, previews: &PreviewRegistry) -> RepairReport {
    let mut report = RepairReport::default();
    if project.id.trim().is_empty() {
        project.id = synthesize_project_id();
        report.ids_synthesized += 1;
    }
    if project.licensing.is_none() {
        project.licensing = Some(Licensing::default());
        report.licensing_added += 1;
    }
    for asset in &mut project.assets {
        repair_asset(asset, &project.id, None, previews, &mut report);
    }
    for folder in &mut project.subfolders {
        repair_folder(folder, &project.id, None, previews, &mut report);
    }
    report
}

fn repair_folder(
    folder: &mut Folder,
    project_id: &str,
    parent_id: Option<&str>,
    previews: &PreviewRegistry,
    report: &mut RepairReport,
) {
    if folder.id.trim().is_empty() {
        folder.id = format!("folder-{}", uuid::Uuid::new_v4());
        report.ids_synthesized += 1;
    }
    if folder.parent_id.as_deref() != parent_id {
        folder.parent_id = parent_id.map(str::to_string);
        report.folders_relinked += 1;
    }
    for asset in &mut folder.assets {
        repair_asset(asset, project_id, Some(&folder.id), previews, report);
    }
    for child in &mut folder.subfolders {
        repair_folder(child, project_id, Some(&folder.id), previews, report);
    }
}

fn repair_asset(
    asset: &mut Asset,
    project_id: &str,
    folder_id: Option<&str>,
    previews: &PreviewRegistry,
    report: &mut RepairReport,
) {
    if asset.id.trim().is_empty() {
        asset.id = format!("asset-{}", uuid::Uuid::new_v4());
        report.ids_synthesized += 1;
    }
    if asset.project_id != project_id || asset.folder_id.as_deref() != folder_id {
        asset.project_id = project_id.to_string();
        asset.folder_id = folder_id.map(str::to_string);
        report.assets_relinked += 1;
    }
    let had_preview = asset.preview.is_some();
    asset.preview = normalize_preview(asset.preview.take(), previews);
    if had_preview && asset.preview.is_none() {
        report.previews_cleared += 1;
    }
}

fn synthesize_project_id() -> String {
    let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect();
    format!("project-{millis}-{}", suffix.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn messy_tree() -> ProjectTree {
        ProjectTree::from_value(json!([
            {
                "name": "No id",
                "assets": [{"id": "a1", "name": "x.png", "preview": "blob:stale/1"}],
                "subfolders": [
                    {
                        "id": "f1",
                        "name": "Top",
                        "parentId": "root",
                        "assets": [{"name": "y.wav", "projectId": "elsewhere"}],
                        "subfolders": [{"id": "f2", "name": "Deep", "assets": null}]
                    }
                ]
            },
            {"id": "p2", "name": "Clean", "licensing": {"type": "exclusive"}}
        ]))
    }

    #[test]
    fn repair_twice_is_byte_identical() {
        let previews = PreviewRegistry::new();
        let (once, first) = repair(messy_tree(), &previews);
        let (twice, second) = repair(once.clone(), &previews);

        assert!(!first.is_clean());
        assert!(second.is_clean());
        assert_eq!(
            serde_json::to_string(&once).unwrap(),
            serde_json::to_string(&twice).unwrap()
        );
    }

    #[test]
    fn synthesizes_ids_and_licensing() {
        let (tree, report) = repair(messy_tree(), &PreviewRegistry::new());
        let project = &tree.projects[0];

        assert!(project.id.starts_with("project-"));
        assert_eq!(project.licensing, Some(Licensing::default()));
        assert_eq!(
            tree.projects[1].licensing.as_ref().unwrap().license_type,
            "exclusive"
        );
        assert!(!project.subfolders[0].assets[0].id.is_empty());
        assert_eq!(report.ids_synthesized, 2);
        assert_eq!(report.licensing_added, 1);
    }

    #[test]
    fn relinks_nested_folders_and_assets() {
        let (tree, _) = repair(messy_tree(), &PreviewRegistry::new());
        let project = &tree.projects[0];
        let top = &project.subfolders[0];
        let deep = &top.subfolders[0];

        assert_eq!(top.parent_id, None);
        assert_eq!(deep.parent_id.as_deref(), Some("f1"));
        assert!(deep.assets.is_empty());
        assert_eq!(top.assets[0].project_id, project.id);
        assert_eq!(top.assets[0].folder_id.as_deref(), Some("f1"));
        assert_eq!(project.assets[0].folder_id, None);
    }

    #[test]
    fn clears_stale_blob_previews_and_keeps_live_ones() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("live.png");
        std::fs::write(&source, b"png").unwrap();
        let previews = PreviewRegistry::new();
        let live = previews.register(&source);

        let mut tree = messy_tree();
        tree.projects[1].assets.push(Asset {
            id: "a9".into(),
            project_id: "p2".into(),
            preview: Some(live.clone()),
            ..Asset::default()
        });

        let (tree, report) = repair(tree, &previews);
        assert_eq!(tree.projects[0].assets[0].preview, None);
        assert_eq!(tree.projects[1].assets[0].preview, Some(live));
        assert_eq!(report.previews_cleared, 1);
    }

    #[test]
    fn repair_project_leaves_other_projects_alone() {
        let mut tree = messy_tree();
        let untouched = tree.projects[0].clone();
        let report = repair_project(&mut tree.projects[1], &PreviewRegistry::new());

        assert!(report.is_clean());
        assert_eq!(tree.projects[0], untouched);
    }
}
