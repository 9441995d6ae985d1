use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

pub const BLOB_SCHEME: &str = "blob:";

/// Transient preview references handed out during this process.
///
/// A `blob:` preview resolves only while it is registered here and the file
/// it points at still exists. After a restart the registry is empty, so every
/// cached `blob:` preview is stale.
#[derive(Debug, Clone, Default)]
pub struct PreviewRegistry {
    inner: Arc<RwLock<HashMap<String, PathBuf>>>,
}

impl PreviewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, source: &Path) -> String {
        let uri = format!("{BLOB_SCHEME}assetsync/{}", uuid::Uuid::new_v4());
        if let Ok(mut map) = self.inner.write() {
            map.insert(uri.clone(), source.to_path_buf());
        }
        uri
    }

    pub fn resolve(&self, uri: &str) -> Option<PathBuf> {
        self.inner.read().ok()?.get(uri).cloned()
    }

    /// Entries whose file has gone are dropped from the registry.
    pub fn is_live(&self, uri: &str) -> bool {
        let Some(path) = self.resolve(uri) else {
            return false;
        };
        if path.exists() {
            return true;
        }
        if let Ok(mut map) = self.inner.write() {
            map.remove(uri);
        }
        false
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn is_transient(preview: &str) -> bool {
    preview.starts_with(BLOB_SCHEME)
}

/// `None` when the preview must be dropped.
pub fn normalize_preview(preview: Option<String>, registry: &PreviewRegistry) -> Option<String> {
    let preview = preview.filter(|p| !p.trim().is_empty())?;
    if is_transient(&preview) && !registry.is_live(&preview) {
        return None;
    }
    Some(preview)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn registered_preview_is_live_until_file_disappears() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("shot.png");
        std::fs::write(&source, b"png").unwrap();

        let registry = PreviewRegistry::new();
        let uri = registry.register(&source);
        assert!(uri.starts_with("blob:assetsync/"));
        assert!(registry.is_live(&uri));

        std::fs::remove_file(&source).unwrap();
        assert!(!registry.is_live(&uri));
        assert_eq!(registry.resolve(&uri), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn unknown_blob_preview_is_cleared() {
        let registry = PreviewRegistry::new();
        assert_eq!(
            normalize_preview(Some("blob:http://old-session/1".into()), &registry),
            None
        );
    }

    #[test]
    fn durable_previews_are_kept() {
        let registry = PreviewRegistry::new();
        let data = "data:image/png;base64,AAAA".to_string();
        assert_eq!(
            normalize_preview(Some(data.clone()), &registry),
            Some(data)
        );
        assert_eq!(normalize_preview(Some("   ".into()), &registry), None);
    }
}
