//! Per-render dependency tracking.
//!
//! One [`RenderTracker`] exists per top-level document render and is not
//! reused across documents. Every query, template and renderer version the
//! render touches is recorded as a side effect of going through the
//! tracker, then frozen into a [`RenderStatus`]. This is what makes the
//! next build's needs-render decision sound without guessing which inputs
//! mattered.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::{
    document::{Document, QueryStatus, RenderStatus, RendererStatus, TemplateStatus},
    error::StrataError,
    query::QueryDescription,
    render::{RenderOutput, Renderer, Value},
    store::Store,
    template::{TemplateCache, TemplateDetails},
};

/// Identifier used for synthetic inline-template renders. Inline templates
/// are part of the document fingerprint, so they never appear in the
/// recorded template set.
const INLINE_TEMPLATE_ID: &str = "<inline>";

#[derive(Default)]
struct Scratch {
    queries: Vec<QueryStatus>,
    templates: Vec<TemplateStatus>,
    renderers: Vec<RendererStatus>,
}

/// A render plus its resolved output file extension.
#[derive(Debug)]
pub struct TrackedRender {
    pub output: RenderOutput,
    pub extension: String,
}

/// Scratch accumulator for one document render.
pub struct RenderTracker<'a, R: Renderer> {
    store: &'a Store,
    templates: &'a TemplateCache,
    renderer: &'a R,
    document: &'a Document,
    site_context: &'a Value,
    scratch: Mutex<Scratch>,
}

impl<'a, R: Renderer> RenderTracker<'a, R> {
    pub fn new(
        store: &'a Store,
        templates: &'a TemplateCache,
        renderer: &'a R,
        document: &'a Document,
        site_context: &'a Value,
    ) -> Self {
        RenderTracker {
            store,
            templates,
            renderer,
            document,
            site_context,
            scratch: Mutex::new(Scratch::default()),
        }
    }

    /// The document this tracker is rendering.
    pub fn document(&self) -> &Document {
        self.document
    }

    /// Resolve one of the document's embedded named queries.
    pub fn embedded_query(&self, name: &str) -> Option<QueryDescription> {
        self.document.queries.get(name).cloned()
    }

    /// Execute a query through the store, recording the query and the
    /// fingerprints of the documents it returned.
    pub async fn documents(
        &self,
        query: &QueryDescription,
    ) -> Result<Vec<Document>, StrataError> {
        let documents = self.store.documents(query).await?;
        let fingerprints: Vec<String> =
            documents.iter().map(|d| d.fingerprint.clone()).collect();
        let mut scratch = self.scratch.lock();
        if let Some(existing) = scratch.queries.iter_mut().find(|qs| &qs.query == query) {
            existing.fingerprints = fingerprints;
        } else {
            scratch.queries.push(QueryStatus {
                query: query.clone(),
                fingerprints,
            });
        }
        drop(scratch);
        Ok(documents)
    }

    /// Like [`RenderTracker::documents`], shaped for the renderer boundary.
    pub async fn document_contexts(
        &self,
        query: &QueryDescription,
    ) -> Result<Vec<Value>, StrataError> {
        let documents = self.documents(query).await?;
        Ok(documents.iter().map(Value::document).collect())
    }

    /// Load a template through the cache, recording its identifier and
    /// modification time.
    pub fn template(
        &self,
        identifier: &str,
    ) -> Result<Option<Arc<TemplateDetails>>, StrataError> {
        let Some(details) = self.templates.details(identifier)? else {
            return Ok(None);
        };
        self.record_template(TemplateStatus {
            identifier: details.identifier.clone(),
            modification_date: details.modification_date,
        });
        Ok(Some(details))
    }

    pub fn record_template(&self, status: TemplateStatus) {
        let mut scratch = self.scratch.lock();
        if !scratch
            .templates
            .iter()
            .any(|t| t.identifier == status.identifier)
        {
            scratch.templates.push(status);
        }
    }

    pub fn record_renderer(&self, name: &str, version: u32) {
        let mut scratch = self.scratch.lock();
        if !scratch.renderers.iter().any(|r| r.name == name) {
            scratch.renderers.push(RendererStatus {
                name: name.to_string(),
                version,
            });
        }
    }

    /// Render the document, delegating the actual templating to the
    /// renderer and passing this tracker so nested lookups keep recording
    /// dependencies. `template_override` takes precedence over the
    /// document's own template identifier; an inline template wins over
    /// both.
    pub async fn render(
        &self,
        template_override: Option<&str>,
    ) -> Result<TrackedRender, StrataError> {
        self.record_renderer(self.renderer.name(), self.renderer.version());

        let mut context = Value::map();
        context.insert("document".into(), Value::document(self.document));
        context.insert(
            "site".into(),
            self.site_context.clone(),
        );
        let context = Value::Map(context);

        let details = if let Some(inline) = &self.document.inline_template {
            Arc::new(TemplateDetails {
                identifier: INLINE_TEMPLATE_ID.to_string(),
                path: Default::default(),
                modification_date: self.document.content_modification_date,
                contents: inline.clone(),
                extension: "html".to_string(),
            })
        } else {
            let identifier = template_override
                .map(str::to_string)
                .or_else(|| self.document.template.clone())
                .ok_or_else(|| {
                    StrataError::render(&self.document.url, "document names no template")
                })?;
            self.template(&identifier)?.ok_or_else(|| {
                StrataError::render(
                    &self.document.url,
                    format!("missing template '{identifier}'"),
                )
            })?
        };

        let output = self
            .renderer
            .render(self, &details, &context)
            .await
            .map_err(|e| match e {
                already @ StrataError::Render { .. } => already,
                other => StrataError::render(&self.document.url, other),
            })?;

        // Renderers report every template they consulted; fold any the
        // tracker has not already seen into the recorded set so the status
        // stays complete even for renderers that resolve includes on their
        // own.
        for identifier in &output.templates_used {
            if identifier.as_str() != INLINE_TEMPLATE_ID {
                let _ = self.template(identifier)?;
            }
        }

        Ok(TrackedRender {
            extension: details.extension.clone(),
            output,
        })
    }

    /// Freeze the accumulated queries/templates/renderers plus the
    /// document's own fingerprint into the persistable status.
    pub fn render_status(&self) -> RenderStatus {
        let scratch = self.scratch.lock();
        RenderStatus {
            document_fingerprint: self.document.fingerprint.clone(),
            queries: scratch.queries.clone(),
            renderers: scratch.renderers.clone(),
            templates: scratch.templates.clone(),
        }
    }
}
