//! Build orchestration.
//!
//! One build pass runs `importing → rendering`; watch mode then loops whole
//! passes on the change observer: many filesystem events coalesce into one
//! rebuild, never a partial one. The import phase skips files whose
//! modification time and handler configuration are both unchanged; the
//! render phase re-renders exactly the documents whose recorded
//! dependencies disagree with the store's current state.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::Arc,
    time::UNIX_EPOCH,
};
use walkdir::WalkDir;

use crate::{
    config::Site,
    document::{Document, ImportStatus, RenderStatus},
    error::StrataError,
    fingerprint::Fingerprinted,
    importer::{ImportContext, SourceFile},
    observer::ChangeObserver,
    query::QueryDescription,
    render::Renderer,
    runner::TaskRunner,
    store::Store,
    template::TemplateCache,
    tracker::RenderTracker,
};

/// Everything one build pass did, with per-item failures attached to their
/// offending path or url.
#[derive(Debug, Default)]
pub struct BuildReport {
    pub imported: Vec<String>,
    pub skipped_imports: usize,
    pub deleted: Vec<String>,
    pub rendered: Vec<String>,
    pub skipped_renders: usize,
    pub failures: Vec<StrataError>,
}

impl BuildReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The build orchestrator. Owns the template cache; shares the store and
/// renderer with the worker tasks it spawns.
pub struct Builder<R: Renderer> {
    site: Arc<Site>,
    store: Store,
    templates: Arc<TemplateCache>,
    renderer: Arc<R>,
    runner: TaskRunner,
}

impl<R: Renderer> Builder<R> {
    pub fn new(site: Arc<Site>, store: Store, renderer: R, serialize: bool) -> Self {
        let templates = Arc::new(TemplateCache::new(site.templates_dir()));
        Builder {
            site,
            store,
            templates,
            renderer: Arc::new(renderer),
            runner: TaskRunner::for_build(serialize),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Run one full import+render pass.
    pub async fn build(&self) -> Result<BuildReport, StrataError> {
        // Stale in-memory template content must not survive across builds.
        self.templates.clear();

        let mut report = BuildReport::default();
        self.import_phase(&mut report).await?;
        self.render_phase(&mut report).await?;

        tracing::info!(
            "build finished: {} imported, {} import(s) skipped, {} deleted, \
             {} rendered, {} render(s) skipped, {} failure(s)",
            report.imported.len(),
            report.skipped_imports,
            report.deleted.len(),
            report.rendered.len(),
            report.skipped_renders,
            report.failures.len()
        );
        Ok(report)
    }

    /// Loop whole build passes on the observer. A fatal pass is logged and
    /// the loop keeps waiting; the next change triggers a fresh attempt.
    /// Returns once the observer is closed.
    pub async fn watch(&self, observer: &ChangeObserver) -> Result<(), StrataError> {
        loop {
            match self.build().await {
                Ok(report) if !report.is_clean() => {
                    for failure in &report.failures {
                        tracing::warn!("{failure}");
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!("build pass failed: {e}"),
            }
            tracing::info!("watching for changes");
            if !observer.wait().await {
                tracing::info!("watch cancelled");
                return Ok(());
            }
        }
    }

    async fn import_phase(&self, report: &mut BuildReport) -> Result<(), StrataError> {
        let content_root = self.site.content_dir();
        let sources = enumerate_sources(&content_root)?;
        let seen: HashSet<String> = sources.iter().map(|s| s.relative_path.clone()).collect();

        let handler_fingerprints: Vec<String> = self
            .site
            .handlers
            .iter()
            .map(Fingerprinted::fingerprint)
            .collect();
        let import_ctx = ImportContext {
            content_root: content_root.clone(),
            output_root: self.site.output_dir(),
        };

        let mut tasks = Vec::new();
        for source in sources {
            let Some(handler_idx) = self
                .site
                .handlers
                .iter()
                .position(|h| h.matches(&source.relative_path))
            else {
                tracing::debug!("no handler matches {}", source.relative_path);
                continue;
            };
            let site = self.site.clone();
            let store = self.store.clone();
            let handler_fingerprint = handler_fingerprints[handler_idx].clone();
            let import_ctx = import_ctx.clone();

            tasks.push(async move {
                let handler = &site.handlers[handler_idx];
                let relative_path = source.relative_path.clone();

                if let Some(prior) = store.status_for(&relative_path).await? {
                    if prior.content_modification_date == source.modification_date
                        && prior.handler_fingerprint == handler_fingerprint
                    {
                        tracing::debug!("unchanged, skipping import of {relative_path}");
                        return Ok(None);
                    }
                }

                // Owned assets are regenerated wholesale on re-import.
                for asset in store.assets_for(&relative_path).await? {
                    let path = import_ctx.output_root.join(&asset.relative_output_path);
                    if let Err(e) = std::fs::remove_file(&path) {
                        if e.kind() != std::io::ErrorKind::NotFound {
                            tracing::warn!("could not remove stale asset {path:?}: {e}");
                        }
                    }
                }
                store.forget_assets(&relative_path).await?;

                let output = handler
                    .importer
                    .import(&source, &handler.settings, &import_ctx)
                    .map_err(|e| match e {
                        already @ StrataError::Import { .. } => already,
                        other => StrataError::import(&relative_path, other),
                    })?;

                let status = ImportStatus {
                    relative_source_path: relative_path.clone(),
                    content_modification_date: source.modification_date,
                    importer: handler.importer.identifier().to_string(),
                    handler_fingerprint,
                };
                store
                    .save_import(output.document.as_ref(), &output.assets, &status)
                    .await?;
                tracing::debug!("imported {relative_path}");
                Ok(Some(relative_path))
            });
        }

        let total = tasks.len();
        let outcome = self.runner.run(tasks).await;
        if let Some(fatal) = outcome.failures.iter().find(|e| e.is_fatal()) {
            return Err(fatal.clone());
        }
        report.skipped_imports = total - outcome.completed.len() - outcome.failures.len();
        report.imported = outcome.completed;
        report.failures.extend(outcome.failures);

        // Source files that disappeared since the previous pass take their
        // documents and owned assets with them.
        let stored = self.store.all_relative_source_paths().await?;
        let removed: Vec<String> = stored.into_iter().filter(|p| !seen.contains(p)).collect();
        if !removed.is_empty() {
            for source_path in &removed {
                for asset in self.store.assets_for(source_path).await? {
                    let path = self.site.output_dir().join(&asset.relative_output_path);
                    if let Err(e) = std::fs::remove_file(&path) {
                        if e.kind() != std::io::ErrorKind::NotFound {
                            tracing::warn!("could not remove deleted asset {path:?}: {e}");
                        }
                    }
                }
            }
            self.store.delete_documents(&removed).await?;
            report.deleted = removed;
        }
        Ok(())
    }

    async fn render_phase(&self, report: &mut BuildReport) -> Result<(), StrataError> {
        // The render set is fixed from one snapshot of documents and render
        // statuses before any render starts.
        let statuses = self.store.all_render_statuses().await?;
        let documents = self.store.documents(&QueryDescription::all()).await?;
        let site_context = Arc::new(self.site.context());
        let output_dir = self.site.output_dir();

        let mut tasks = Vec::new();
        let mut considered = 0usize;
        for document in documents {
            considered += 1;
            if let Some(prior) = statuses.get(&document.url) {
                if !self.needs_render(&document, prior).await? {
                    tracing::debug!("up to date, skipping render of {}", document.url);
                    continue;
                }
            }

            let store = self.store.clone();
            let templates = self.templates.clone();
            let renderer = self.renderer.clone();
            let site_context = site_context.clone();
            let output_dir = output_dir.clone();

            tasks.push(async move {
                let tracker =
                    RenderTracker::new(&store, &templates, renderer.as_ref(), &document, &site_context);
                let rendered = tracker.render(None).await?;
                let status = tracker.render_status();

                let out_path = output_path(&output_dir, &document.url, &rendered.extension);
                if let Some(parent) = out_path.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| StrataError::render(&document.url, e))?;
                }
                std::fs::write(&out_path, rendered.output.content.as_bytes())
                    .map_err(|e| StrataError::render(&document.url, e))?;

                // Persisted only after output landed: a failed render
                // leaves no status behind and is retried next build.
                store.save_render_status(&document.url, &status).await?;
                tracing::debug!("rendered {} -> {}", document.url, out_path.display());
                Ok(Some(document.url.clone()))
            });
        }

        let outcome = self.runner.run(tasks).await;
        if let Some(fatal) = outcome.failures.iter().find(|e| e.is_fatal()) {
            return Err(fatal.clone());
        }
        report.skipped_renders = considered - outcome.completed.len() - outcome.failures.len();
        report.rendered = outcome.completed;
        report.failures.extend(outcome.failures);
        Ok(())
    }

    /// The four re-render triggers, any one sufficient: document
    /// fingerprint drift, renderer version drift, template modification
    /// drift, or a recorded query now returning different fingerprints.
    async fn needs_render(
        &self,
        document: &Document,
        prior: &RenderStatus,
    ) -> Result<bool, StrataError> {
        if prior.document_fingerprint != document.fingerprint {
            return Ok(true);
        }
        for renderer in &prior.renderers {
            if renderer.name != self.renderer.name()
                || renderer.version != self.renderer.version()
            {
                return Ok(true);
            }
        }
        for template in &prior.templates {
            match self.templates.details(&template.identifier)? {
                Some(current) if current.modification_date == template.modification_date => {}
                _ => return Ok(true),
            }
        }
        for query in &prior.queries {
            if self.store.fingerprints(&query.query).await? != query.fingerprints {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Derive the output file for a document url: urls carrying a file
/// extension map verbatim, everything else nests an `index.<ext>`.
fn output_path(output_dir: &Path, url: &str, extension: &str) -> PathBuf {
    let trimmed = url.trim_matches('/');
    let last = trimmed.rsplit('/').next().unwrap_or("");
    if last.contains('.') {
        output_dir.join(trimmed)
    } else if trimmed.is_empty() {
        output_dir.join(format!("index.{extension}"))
    } else {
        output_dir.join(trimmed).join(format!("index.{extension}"))
    }
}

/// Enumerate importable files under the content root, skipping hidden files
/// and directories.
fn enumerate_sources(content_root: &Path) -> Result<Vec<SourceFile>, StrataError> {
    if !content_root.exists() {
        return Err(StrataError::Config(format!(
            "content directory missing at {}",
            content_root.display()
        )));
    }
    let mut sources = Vec::new();
    for entry in WalkDir::new(content_root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            !e.file_name()
                .to_str()
                .map(|name| name.starts_with('.'))
                .unwrap_or(false)
        })
    {
        let entry = entry.map_err(|e| StrataError::Io(format!("content walk failed: {e}")))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let metadata = entry.metadata().map_err(|e| {
            StrataError::Io(format!("could not stat {:?}: {e}", entry.path()))
        })?;
        let modification_date = metadata
            .modified()
            .ok()
            .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let relative_path = entry
            .path()
            .strip_prefix(content_root)?
            .to_string_lossy()
            .replace('\\', "/");
        sources.push(SourceFile {
            absolute_path: entry.path().to_path_buf(),
            relative_path,
            modification_date,
        });
    }
    sources.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_paths_nest_extensionless_urls() {
        let out = Path::new("/site/build/files");
        assert_eq!(
            output_path(out, "/posts/hello", "html"),
            out.join("posts/hello/index.html")
        );
        assert_eq!(output_path(out, "/", "html"), out.join("index.html"));
        assert_eq!(
            output_path(out, "/feed.xml", "xml"),
            out.join("feed.xml")
        );
    }

    #[test]
    fn hidden_entries_are_not_enumerated() {
        let dir = tempfile::TempDir::new().unwrap();
        let content = dir.path().join("content");
        std::fs::create_dir_all(content.join(".git")).unwrap();
        std::fs::write(content.join(".git/config"), "x").unwrap();
        std::fs::write(content.join(".hidden.md"), "x").unwrap();
        std::fs::write(content.join("visible.md"), "x").unwrap();

        let sources = enumerate_sources(&content).unwrap();
        let paths: Vec<&str> = sources.iter().map(|s| s.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["visible.md"]);
    }
}
