//! Core data model: documents, generated assets, import bookkeeping, and
//! render bookkeeping.
//!
//! A [`Document`] is one importable unit of content keyed by its canonical
//! output path (`url`). [`ImportStatus`] and [`RenderStatus`] are the two
//! bookkeeping records the incremental engine compares across builds to
//! decide what work can be skipped.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, FromRow, Row};
use std::collections::BTreeMap;

use crate::{
    error::StrataError,
    fingerprint::{Fingerprint, Fingerprinted},
    query::QueryDescription,
};

/// Content format of a document body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    #[default]
    Text,
    Image,
    Video,
}

impl DocumentFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::Text => "text",
            DocumentFormat::Image => "image",
            DocumentFormat::Video => "video",
        }
    }
}

impl TryFrom<&str> for DocumentFormat {
    type Error = StrataError;

    fn try_from(value: &str) -> Result<Self, StrataError> {
        match value {
            "text" => Ok(DocumentFormat::Text),
            "image" => Ok(DocumentFormat::Image),
            "video" => Ok(DocumentFormat::Video),
            other => Err(StrataError::Internal(format!(
                "unknown document format '{other}' in store"
            ))),
        }
    }
}

/// One importable unit of content.
///
/// `url` is globally unique and is the join key for storage and for
/// `parent` relationships (which form a DAG rooted at `/`). `fingerprint`
/// is a pure function of the semantically significant fields; use
/// [`Document::fingerprinted`] after any mutation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Canonical output path, e.g. `/posts/hello`.
    pub url: String,
    /// Output path of the logical parent, for hierarchy/sibling queries.
    pub parent: String,
    pub category: String,
    pub date: Option<DateTime<Utc>>,
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    /// Author-embedded named sub-queries, resolvable during render.
    pub queries: BTreeMap<String, QueryDescription>,
    /// Open key/value map from front matter / structured metadata.
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Raw or HTML-rendered body text.
    pub contents: String,
    /// Unix seconds of the source file at import time.
    pub content_modification_date: i64,
    pub template: Option<String>,
    pub inline_template: Option<String>,
    /// Path of the originating source file, relative to the content root.
    pub relative_source_path: String,
    pub format: DocumentFormat,
    /// Identity hash over the fields above. Never mutates independently.
    pub fingerprint: String,
}

impl Document {
    /// Tags are the `tags` metadata entry, when it is a list of strings.
    pub fn tags(&self) -> Vec<String> {
        match self.metadata.get("tags") {
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Return this document with its `fingerprint` field recomputed.
    pub fn fingerprinted(mut self) -> Self {
        self.fingerprint = Fingerprinted::fingerprint(&self);
        self
    }
}

impl Fingerprinted for Document {
    fn fingerprint_into(&self, fp: &mut Fingerprint) {
        fp.push_str(&self.url);
        fp.push_str(&self.parent);
        fp.push_str(&self.category);
        fp.push_opt_timestamp(self.date.map(|d| d.timestamp()));
        fp.push_opt_str(self.title.as_deref());
        fp.push_opt_str(self.thumbnail.as_deref());
        fp.push_map(&self.queries);
        fp.push_map(&self.metadata);
        fp.push_str(&self.contents);
        fp.push_timestamp(self.content_modification_date);
        fp.push_opt_str(self.template.as_deref());
        fp.push_opt_str(self.inline_template.as_deref());
        fp.push_str(&self.relative_source_path);
        fp.push_str(self.format.as_str());
    }
}

impl FromRow<'_, SqliteRow> for Document {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let decode = |e: StrataError| sqlx::Error::Decode(Box::new(e));
        let queries_json: String = row.try_get("queries")?;
        let metadata_json: String = row.try_get("metadata")?;
        let format_str: String = row.try_get("format")?;
        let date_secs: Option<i64> = row.try_get("date")?;

        Ok(Document {
            url: row.try_get("url")?,
            parent: row.try_get("parent")?,
            category: row.try_get("category")?,
            date: date_secs.and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
            title: row.try_get("title")?,
            thumbnail: row.try_get("thumbnail")?,
            queries: serde_json::from_str(&queries_json)
                .map_err(StrataError::from)
                .map_err(decode)?,
            metadata: serde_json::from_str(&metadata_json)
                .map_err(StrataError::from)
                .map_err(decode)?,
            contents: row.try_get("contents")?,
            content_modification_date: row.try_get("content_modification_date")?,
            template: row.try_get("template")?,
            inline_template: row.try_get("inline_template")?,
            relative_source_path: row.try_get("relative_source_path")?,
            format: DocumentFormat::try_from(format_str.as_str()).map_err(decode)?,
            fingerprint: row.try_get("fingerprint")?,
        })
    }
}

/// Per-source-file import bookkeeping. Written on every successful import;
/// consulted before re-importing to skip unchanged files whose handler
/// configuration is also unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ImportStatus {
    pub relative_source_path: String,
    /// Unix seconds of the source file at last import.
    pub content_modification_date: i64,
    /// Identifier of the importer that produced the last import.
    pub importer: String,
    /// Fingerprint of the handler (pattern + importer + settings) used.
    pub handler_fingerprint: String,
}

/// A generated output file owned by a source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Asset {
    /// Output-relative path, primary key.
    pub relative_output_path: String,
    /// Source file that produced this asset.
    pub relative_source_path: String,
}

/// One query a render executed, with the ordered document fingerprints it
/// returned at that time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryStatus {
    pub query: QueryDescription,
    pub fingerprints: Vec<String>,
}

/// One template a render consulted, with its modification time at that
/// point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateStatus {
    pub identifier: String,
    /// Unix seconds.
    pub modification_date: i64,
}

/// One renderer a render went through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RendererStatus {
    pub name: String,
    pub version: u32,
}

/// Per-document render bookkeeping, keyed by document `url`. Everything a
/// render touched, frozen by the tracker when the render completed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderStatus {
    /// The document fingerprint observed at render time.
    pub document_fingerprint: String,
    pub queries: Vec<QueryStatus>,
    pub renderers: Vec<RendererStatus>,
    pub templates: Vec<TemplateStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Fingerprinted;

    fn sample() -> Document {
        Document {
            url: "/posts/hello".to_string(),
            parent: "/posts".to_string(),
            category: "post".to_string(),
            title: Some("Hello".to_string()),
            contents: "Hello, world.".to_string(),
            content_modification_date: 1_700_000_000,
            relative_source_path: "posts/hello.md".to_string(),
            ..Default::default()
        }
        .fingerprinted()
    }

    #[test]
    fn fingerprint_is_pure() {
        assert_eq!(sample().fingerprint, sample().fingerprint);
    }

    #[test]
    fn every_tracked_field_changes_fingerprint() {
        let base = sample();
        let variants: Vec<Document> = vec![
            Document {
                url: "/posts/other".into(),
                ..base.clone()
            },
            Document {
                parent: "/".into(),
                ..base.clone()
            },
            Document {
                category: "page".into(),
                ..base.clone()
            },
            Document {
                date: Some(Utc.timestamp_opt(1_000, 0).unwrap()),
                ..base.clone()
            },
            Document {
                title: None,
                ..base.clone()
            },
            Document {
                thumbnail: Some("/thumb.png".into()),
                ..base.clone()
            },
            Document {
                contents: "Other body.".into(),
                ..base.clone()
            },
            Document {
                content_modification_date: 1,
                ..base.clone()
            },
            Document {
                template: Some("page.html".into()),
                ..base.clone()
            },
            Document {
                inline_template: Some("{{ contents }}".into()),
                ..base.clone()
            },
            Document {
                relative_source_path: "posts/other.md".into(),
                ..base.clone()
            },
            Document {
                format: DocumentFormat::Image,
                ..base.clone()
            },
        ];
        for variant in variants {
            assert_ne!(
                base.fingerprint,
                Fingerprinted::fingerprint(&variant),
                "field change went undetected: {variant:?}"
            );
        }
    }

    #[test]
    fn metadata_order_does_not_change_fingerprint() {
        let mut a = sample();
        a.metadata
            .insert("author".into(), serde_json::Value::from("b"));
        a.metadata
            .insert("tags".into(), serde_json::json!(["rust"]));
        let a = a.fingerprinted();

        let mut b = sample();
        b.metadata
            .insert("tags".into(), serde_json::json!(["rust"]));
        b.metadata
            .insert("author".into(), serde_json::Value::from("b"));
        let b = b.fingerprinted();

        assert_eq!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn tags_reads_metadata_list() {
        let mut doc = sample();
        doc.metadata
            .insert("tags".into(), serde_json::json!(["rust", "build"]));
        assert_eq!(doc.tags(), vec!["rust".to_string(), "build".to_string()]);
        doc.metadata
            .insert("tags".into(), serde_json::Value::from("not-a-list"));
        assert!(doc.tags().is_empty());
    }
}
