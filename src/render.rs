//! Renderer boundary: the context value tree handed to template renderers,
//! the [`Renderer`] contract, and a minimal built-in placeholder renderer.
//!
//! The context is an explicit tagged-variant value type with a closed set
//! of named accessors per entity, with no reflection. Nested document lookups
//! go through the [`RenderTracker`], which is the only party that can
//! execute queries and therefore the only place dependencies get recorded.

use futures_core::future::BoxFuture;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::BTreeMap;

use crate::{
    document::Document, error::StrataError, template::TemplateDetails, tracker::RenderTracker,
};

/// A renderable context value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn map() -> BTreeMap<String, Value> {
        BTreeMap::new()
    }

    /// The closed accessor set a document exposes to templates.
    pub fn document(doc: &Document) -> Value {
        let mut map = Value::map();
        map.insert("url".into(), Value::String(doc.url.clone()));
        map.insert("parent".into(), Value::String(doc.parent.clone()));
        map.insert("category".into(), Value::String(doc.category.clone()));
        if let Some(title) = &doc.title {
            map.insert("title".into(), Value::String(title.clone()));
        }
        if let Some(date) = doc.date {
            map.insert("date".into(), Value::String(date.format("%Y-%m-%d").to_string()));
        }
        if let Some(thumbnail) = &doc.thumbnail {
            map.insert("thumbnail".into(), Value::String(thumbnail.clone()));
        }
        map.insert("contents".into(), Value::String(doc.contents.clone()));
        let metadata: BTreeMap<String, Value> = doc
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), Value::from_json(v)))
            .collect();
        map.insert("metadata".into(), Value::Map(metadata));
        Value::Map(map)
    }

    pub fn from_json(value: &serde_json::Value) -> Value {
        match value {
            serde_json::Value::Null => Value::String(String::new()),
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::List(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Resolve a dot-separated accessor path against nested maps.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut current = self;
        for segment in path.split('.') {
            match current {
                Value::Map(map) => current = map.get(segment)?,
                _ => return None,
            }
        }
        Some(current)
    }

    /// Textual form used when a value is substituted into output.
    pub fn to_display(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::List(items) => items
                .iter()
                .map(Value::to_display)
                .collect::<Vec<_>>()
                .join(", "),
            Value::Map(_) => String::new(),
        }
    }
}

/// What a renderer hands back: the rendered content plus every template
/// identifier it consulted (transitive includes included).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOutput {
    pub content: String,
    pub templates_used: Vec<String>,
}

/// External templating engine contract. Implementations must resolve
/// nested template and document lookups through the passed tracker so every
/// dependency of the render gets recorded.
pub trait Renderer: Send + Sync + Sized + 'static {
    fn name(&self) -> &'static str;

    /// Bumped whenever output semantics change; feeds the needs-render
    /// decision directly.
    fn version(&self) -> u32;

    fn render<'a>(
        &'a self,
        tracker: &'a RenderTracker<'a, Self>,
        template: &'a TemplateDetails,
        context: &'a Value,
    ) -> BoxFuture<'a, Result<RenderOutput, StrataError>>;
}

static SUBSTITUTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([\w.]+)\s*\}\}").expect("substitution regex"));
static INCLUDE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\{%\s*include\s+"([^"]+)"\s*%\}"#).expect("include regex"));
static QUERY_BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)\{%\s*query\s+"([^"]+)"\s*%\}(.*?)\{%\s*end\s*%\}"#)
        .expect("query block regex")
});

/// Include recursion cutoff; a template cycle surfaces as a render error
/// instead of unbounded recursion.
const MAX_INCLUDE_DEPTH: usize = 16;

/// Built-in placeholder renderer.
///
/// Supported forms: `{{ accessor.path }}` substitution,
/// `{% include "partial.html" %}` partial inclusion, and
/// `{% query "name" %}…{% end %}` iteration over a document's embedded
/// named query (the block body renders once per result with the result
/// bound to `item`). Query blocks do not nest.
#[derive(Debug, Default, Clone)]
pub struct PlaceholderRenderer;

impl Renderer for PlaceholderRenderer {
    fn name(&self) -> &'static str {
        "placeholder"
    }

    fn version(&self) -> u32 {
        1
    }

    fn render<'a>(
        &'a self,
        tracker: &'a RenderTracker<'a, Self>,
        template: &'a TemplateDetails,
        context: &'a Value,
    ) -> BoxFuture<'a, Result<RenderOutput, StrataError>> {
        Box::pin(async move {
            let used = Mutex::new(vec![template.identifier.clone()]);
            let content =
                expand(tracker, &template.contents, context, &used, 0).await?;
            Ok(RenderOutput {
                content,
                templates_used: used.into_inner(),
            })
        })
    }
}

fn expand<'a>(
    tracker: &'a RenderTracker<'a, PlaceholderRenderer>,
    input: &'a str,
    context: &'a Value,
    used: &'a Mutex<Vec<String>>,
    depth: usize,
) -> BoxFuture<'a, Result<String, StrataError>> {
    Box::pin(async move {
        if depth > MAX_INCLUDE_DEPTH {
            return Err(StrataError::render(
                context
                    .lookup("document.url")
                    .map(Value::to_display)
                    .unwrap_or_default(),
                "template include depth exceeded (cycle?)",
            ));
        }

        // Query blocks first: their bodies get the full pipeline per item.
        let mut output = String::with_capacity(input.len());
        let mut cursor = 0;
        for captures in QUERY_BLOCK_RE.captures_iter(input) {
            let whole = captures.get(0).expect("capture 0");
            let name = &captures[1];
            let body = captures.get(2).expect("body capture").as_str();
            output.push_str(&input[cursor..whole.start()]);

            let query = tracker
                .embedded_query(name)
                .ok_or_else(|| StrataError::Internal(format!("unknown embedded query '{name}'")))?;
            let contexts = tracker.document_contexts(&query).await?;
            for item in contexts {
                let mut scope = match context {
                    Value::Map(map) => map.clone(),
                    _ => Value::map(),
                };
                scope.insert("item".into(), item);
                let rendered =
                    expand(tracker, body, &Value::Map(scope), used, depth + 1).await?;
                output.push_str(&rendered);
            }
            cursor = whole.end();
        }
        output.push_str(&input[cursor..]);

        // Includes next, each through the tracker so its mtime is recorded.
        let with_blocks = output;
        let mut output = String::with_capacity(with_blocks.len());
        let mut cursor = 0;
        for captures in INCLUDE_RE.captures_iter(&with_blocks) {
            let whole = captures.get(0).expect("capture 0");
            let identifier = &captures[1];
            output.push_str(&with_blocks[cursor..whole.start()]);

            let details = tracker.template(identifier)?.ok_or_else(|| {
                StrataError::render(
                    context
                        .lookup("document.url")
                        .map(Value::to_display)
                        .unwrap_or_default(),
                    format!("missing template '{identifier}'"),
                )
            })?;
            {
                let mut used = used.lock();
                if !used.iter().any(|u| u.as_str() == identifier) {
                    used.push(identifier.to_string());
                }
            }
            let rendered = expand(tracker, &details.contents, context, used, depth + 1).await?;
            output.push_str(&rendered);
            cursor = whole.end();
        }
        output.push_str(&with_blocks[cursor..]);

        // Substitutions last.
        let result = SUBSTITUTION_RE.replace_all(&output, |captures: &regex::Captures<'_>| {
            let path = &captures[1];
            match context.lookup(path) {
                Some(value) => value.to_display(),
                None => {
                    tracing::debug!("unresolved template accessor '{path}'");
                    String::new()
                }
            }
        });
        Ok(result.into_owned())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_walks_nested_maps() {
        let mut inner = Value::map();
        inner.insert("title".into(), Value::String("Hello".into()));
        let mut outer = Value::map();
        outer.insert("document".into(), Value::Map(inner));
        let value = Value::Map(outer);

        assert_eq!(
            value.lookup("document.title"),
            Some(&Value::String("Hello".into()))
        );
        assert_eq!(value.lookup("document.missing"), None);
        assert_eq!(value.lookup("nope"), None);
    }

    #[test]
    fn document_value_exposes_closed_accessors() {
        let doc = Document {
            url: "/a".into(),
            parent: "/".into(),
            category: "post".into(),
            title: Some("A".into()),
            contents: "body".into(),
            ..Default::default()
        };
        let value = Value::document(&doc);
        assert_eq!(value.lookup("url"), Some(&Value::String("/a".into())));
        assert_eq!(value.lookup("title"), Some(&Value::String("A".into())));
        assert_eq!(value.lookup("contents"), Some(&Value::String("body".into())));
        // No open-ended reflection: unknown names resolve to nothing.
        assert_eq!(value.lookup("relative_source_path"), None);
    }

    #[test]
    fn json_round_trip_preserves_shape() {
        let json = serde_json::json!({"tags": ["a", "b"], "count": 2, "draft": false});
        let value = Value::from_json(&json);
        assert_eq!(value.lookup("count"), Some(&Value::Integer(2)));
        assert_eq!(value.lookup("draft"), Some(&Value::Bool(false)));
        assert_eq!(
            value.lookup("tags").map(Value::to_display),
            Some("a, b".to_string())
        );
    }
}
