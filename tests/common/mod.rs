//! Shared test utilities: temp site scaffolding and importer doubles.
#![allow(dead_code)]

use filetime::{set_file_mtime, FileTime};
use std::{path::PathBuf, sync::Arc};
use tempfile::TempDir;

use strata_core::{
    builder::Builder,
    config::Site,
    error::StrataError,
    importer::{
        ImportContext, ImportOutput, Importer, ImporterRegistry, ImporterSettings,
        MarkdownImporter, SourceFile,
    },
    render::PlaceholderRenderer,
    store::Store,
};

/// Base mtime for seeded files; edits bump from here so modification times
/// always differ regardless of filesystem timestamp granularity.
pub const T0: i64 = 1_700_000_000;

pub const SITE_YAML: &str = "\
version: 1
title: Test Site
handlers:
  - when: \"**/*.md\"
    then: markdown
  - when: \"**/*\"
    then: copy
";

/// A disposable site root with `site.yaml`, `content/` and `templates/`.
pub struct TestSite {
    pub dir: TempDir,
}

impl TestSite {
    pub fn new() -> TestSite {
        Self::with_config(SITE_YAML)
    }

    pub fn with_config(site_yaml: &str) -> TestSite {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("content")).unwrap();
        std::fs::create_dir_all(dir.path().join("templates")).unwrap();
        std::fs::write(dir.path().join("site.yaml"), site_yaml).unwrap();
        TestSite { dir }
    }

    pub fn write_content(&self, relative: &str, contents: &str, mtime: i64) {
        let path = self.dir.path().join("content").join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, contents).unwrap();
        set_file_mtime(&path, FileTime::from_unix_time(mtime, 0)).unwrap();
    }

    pub fn remove_content(&self, relative: &str) {
        std::fs::remove_file(self.dir.path().join("content").join(relative)).unwrap();
    }

    pub fn write_template(&self, name: &str, contents: &str, mtime: i64) {
        let path = self.dir.path().join("templates").join(name);
        std::fs::write(&path, contents).unwrap();
        set_file_mtime(&path, FileTime::from_unix_time(mtime, 0)).unwrap();
    }

    pub fn touch_template(&self, name: &str, mtime: i64) {
        let path = self.dir.path().join("templates").join(name);
        set_file_mtime(&path, FileTime::from_unix_time(mtime, 0)).unwrap();
    }

    pub fn output_path(&self, relative: &str) -> PathBuf {
        self.dir.path().join("build").join("files").join(relative)
    }

    /// A fresh builder over this site's (persistent) store, with the
    /// built-in importer registry.
    pub async fn builder(&self) -> Builder<PlaceholderRenderer> {
        self.builder_with_registry(ImporterRegistry::builtin()).await
    }

    pub async fn builder_with_registry(
        &self,
        registry: ImporterRegistry,
    ) -> Builder<PlaceholderRenderer> {
        let site = Arc::new(Site::load(self.dir.path(), &registry).unwrap());
        let store = Store::open(&site.store_path()).await.unwrap();
        Builder::new(site, store, PlaceholderRenderer, false)
    }
}

/// Markdown importer with a caller-chosen version, for exercising the
/// version-bump re-import trigger.
pub struct VersionedMarkdown {
    pub version: u32,
}

impl Importer for VersionedMarkdown {
    fn identifier(&self) -> &'static str {
        "markdown"
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn settings(&self, raw: &serde_yaml::Value) -> Result<ImporterSettings, StrataError> {
        MarkdownImporter.settings(raw)
    }

    fn import(
        &self,
        source: &SourceFile,
        settings: &ImporterSettings,
        ctx: &ImportContext,
    ) -> Result<ImportOutput, StrataError> {
        MarkdownImporter.import(source, settings, ctx)
    }
}

/// Registry whose `markdown` importer reports the given version.
pub fn registry_with_markdown_version(version: u32) -> ImporterRegistry {
    let mut registry = ImporterRegistry::builtin();
    registry.register(Arc::new(VersionedMarkdown { version }));
    registry
}
