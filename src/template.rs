//! In-memory template file cache.
//!
//! Templates are read at most once per build; [`TemplateCache::clear`] runs
//! at the start of every build so stale in-memory content never survives
//! across builds. The modification time is read **before** the contents on
//! first load: if the file changes between the two reads, the cache's
//! belief about when the content was last known-good under-counts rather
//! than over-counts, costing at worst one extra render next build and never
//! a skipped one.

use parking_lot::RwLock;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::UNIX_EPOCH,
};

use crate::error::StrataError;

/// A cached template: path, modification time and contents as of first
/// load this build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateDetails {
    pub identifier: String,
    pub path: PathBuf,
    /// Unix seconds, read before `contents`.
    pub modification_date: i64,
    pub contents: String,
    /// File extension of the template, which is also the extension of the
    /// rendered output.
    pub extension: String,
}

/// Cache of template file content and modification time, keyed by template
/// identifier. Owned by one builder and cleared at the start of each build.
pub struct TemplateCache {
    templates_dir: PathBuf,
    cache: RwLock<HashMap<String, Arc<TemplateDetails>>>,
}

impl TemplateCache {
    pub fn new(templates_dir: impl Into<PathBuf>) -> Self {
        TemplateCache {
            templates_dir: templates_dir.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Lazily load and cache the template named by `identifier` (a file
    /// name under the templates directory, extension included). Returns
    /// `Ok(None)` when no such template file exists.
    pub fn details(&self, identifier: &str) -> Result<Option<Arc<TemplateDetails>>, StrataError> {
        if let Some(hit) = self.cache.read().get(identifier) {
            return Ok(Some(hit.clone()));
        }

        let path = self.templates_dir.join(identifier);
        let metadata = match std::fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let modification_date = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        // Contents read strictly after the mtime: see module docs.
        let contents = std::fs::read_to_string(&path)?;

        let details = Arc::new(TemplateDetails {
            identifier: identifier.to_string(),
            extension: extension_of(&path),
            path,
            modification_date,
            contents,
        });

        let mut cache = self.cache.write();
        // A concurrent loader may have filled the slot; keep the first
        // entry so all readers of this build observe one consistent value.
        let entry = cache
            .entry(identifier.to_string())
            .or_insert_with(|| details.clone());
        Ok(Some(entry.clone()))
    }

    /// Drop every cached template. Invoked once per build, at its start.
    pub fn clear(&self) {
        self.cache.write().clear();
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("html")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn details_caches_until_clear() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("page.html");
        fs::write(&path, "<html>v1</html>").unwrap();

        let cache = TemplateCache::new(dir.path());
        let first = cache.details("page.html").unwrap().unwrap();
        assert_eq!(first.contents, "<html>v1</html>");
        assert_eq!(first.extension, "html");

        // A file change is invisible until the cache is cleared.
        fs::write(&path, "<html>v2</html>").unwrap();
        let second = cache.details("page.html").unwrap().unwrap();
        assert_eq!(second.contents, "<html>v1</html>");

        cache.clear();
        let third = cache.details("page.html").unwrap().unwrap();
        assert_eq!(third.contents, "<html>v2</html>");
    }

    #[test]
    fn missing_template_is_none() {
        let dir = TempDir::new().unwrap();
        let cache = TemplateCache::new(dir.path());
        assert!(cache.details("nope.html").unwrap().is_none());
    }

    #[test]
    fn modification_date_matches_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("page.html");
        fs::write(&path, "x").unwrap();
        filetime::set_file_mtime(&path, filetime::FileTime::from_unix_time(1_700_000_000, 0))
            .unwrap();

        let cache = TemplateCache::new(dir.path());
        let details = cache.details("page.html").unwrap().unwrap();
        assert_eq!(details.modification_date, 1_700_000_000);
    }
}
