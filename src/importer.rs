//! Importer boundary: the contract content importers implement, the
//! handler table binding importers to path patterns, and the two built-in
//! importers (markdown, copy).
//!
//! Importers are treated as potentially slow and user-extensible: the
//! builder never holds a store lock across an import call, and an import
//! failure is attributed to its source file without aborting the batch.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use pulldown_cmark::{html, Options, Parser};
use regex::Regex;
use serde::Deserialize;
use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use crate::{
    document::{Asset, Document, DocumentFormat},
    error::StrataError,
    fingerprint::{Fingerprint, Fingerprinted},
    query::QueryDescription,
};

/// A source file under the content root, as handed to an importer.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub absolute_path: PathBuf,
    /// Path relative to the content root, forward slashes.
    pub relative_path: String,
    /// Unix seconds.
    pub modification_date: i64,
}

/// Directories an importer may read from and write generated assets into.
#[derive(Debug, Clone)]
pub struct ImportContext {
    pub content_root: PathBuf,
    pub output_root: PathBuf,
}

/// Parsed, canonicalized importer settings. Held as a JSON value so the
/// handler fingerprint is independent of the YAML's key order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImporterSettings(pub serde_json::Value);

impl ImporterSettings {
    pub fn empty() -> Self {
        ImporterSettings(serde_json::Value::Null)
    }
}

/// What one import produced. Some importers produce only assets.
#[derive(Debug, Clone, Default)]
pub struct ImportOutput {
    pub document: Option<Document>,
    pub assets: Vec<Asset>,
}

/// A content importer. `version` must be bumped whenever output semantics
/// change; it feeds directly into the handler fingerprint, forcing
/// re-import of every matched file.
pub trait Importer: Send + Sync {
    fn identifier(&self) -> &'static str;

    fn version(&self) -> u32;

    /// Parse and validate raw handler args into canonical settings.
    fn settings(&self, raw: &serde_yaml::Value) -> Result<ImporterSettings, StrataError>;

    fn import(
        &self,
        source: &SourceFile,
        settings: &ImporterSettings,
        ctx: &ImportContext,
    ) -> Result<ImportOutput, StrataError>;
}

/// The known importers, keyed by identifier.
pub struct ImporterRegistry {
    importers: BTreeMap<&'static str, Arc<dyn Importer>>,
}

impl ImporterRegistry {
    /// Registry with the built-in importers.
    pub fn builtin() -> Self {
        let mut registry = ImporterRegistry {
            importers: BTreeMap::new(),
        };
        registry.register(Arc::new(MarkdownImporter));
        registry.register(Arc::new(CopyImporter));
        registry
    }

    pub fn register(&mut self, importer: Arc<dyn Importer>) {
        self.importers.insert(importer.identifier(), importer);
    }

    pub fn get(&self, identifier: &str) -> Option<Arc<dyn Importer>> {
        self.importers.get(identifier).cloned()
    }
}

/// A bound (path-pattern, importer, importer-settings) triple. Handlers are
/// consulted in configuration order; the first whose pattern matches a
/// source path wins.
pub struct Handler {
    pub pattern: String,
    matcher: Regex,
    pub importer: Arc<dyn Importer>,
    pub settings: ImporterSettings,
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("pattern", &self.pattern)
            .field("matcher", &self.matcher)
            .field("importer", &self.importer.identifier())
            .field("settings", &self.settings)
            .finish()
    }
}

impl Handler {
    pub fn new(
        pattern: &str,
        importer: Arc<dyn Importer>,
        raw_args: &serde_yaml::Value,
    ) -> Result<Handler, StrataError> {
        let settings = importer.settings(raw_args)?;
        Ok(Handler {
            pattern: pattern.to_string(),
            matcher: glob_to_regex(pattern)?,
            importer,
            settings,
        })
    }

    pub fn matches(&self, relative_path: &str) -> bool {
        self.matcher.is_match(relative_path)
    }
}

impl Fingerprinted for Handler {
    fn fingerprint_into(&self, fp: &mut Fingerprint) {
        fp.push_str(&self.pattern);
        fp.push_str(self.importer.identifier());
        fp.push_u64(self.importer.version() as u64);
        fp.push_nested(&self.settings.0);
    }
}

/// Translate a path glob (`*` within one segment, `**` across segments,
/// `?` single char) into an anchored regex.
fn glob_to_regex(pattern: &str) -> Result<Regex, StrataError> {
    let mut regex = String::with_capacity(pattern.len() * 2 + 2);
    regex.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    // Swallow a following '/' so `**/x` also matches `x`.
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        regex.push_str("(?:.*/)?");
                    } else {
                        regex.push_str(".*");
                    }
                } else {
                    regex.push_str("[^/]*");
                }
            }
            '?' => regex.push_str("[^/]"),
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex.push('$');
    Ok(Regex::new(&regex)?)
}

/// Derive a document's canonical output path from its source path:
/// extension stripped, `index` collapsing into its directory.
pub fn url_for_relative_path(relative_path: &str) -> String {
    let without_ext = match relative_path.rfind('.') {
        Some(dot) if !relative_path[dot + 1..].contains('/') => &relative_path[..dot],
        _ => relative_path,
    };
    let without_index = without_ext
        .strip_suffix("/index")
        .or_else(|| (without_ext == "index").then_some(""))
        .unwrap_or(without_ext);
    format!("/{}", without_index.trim_start_matches('/'))
        .trim_end_matches('/')
        .to_string()
        + if without_index.is_empty() { "/" } else { "" }
}

/// Parent output path of a url: everything up to the last segment, `/` for
/// top-level documents.
pub fn parent_of(url: &str) -> String {
    match url.trim_end_matches('/').rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => url[..idx].to_string(),
    }
}

static FRONT_MATTER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\A---\s*\n(.*?)\n---\s*\n?").expect("front matter regex")
});

#[derive(Debug, Clone, Default, Deserialize)]
struct MarkdownSettings {
    /// Category assigned to documents this handler imports.
    #[serde(default)]
    category: Option<String>,
    /// Template identifier assigned when the front matter names none.
    #[serde(default)]
    template: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FrontMatter {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    template: Option<String>,
    #[serde(default)]
    inline_template: Option<String>,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    queries: BTreeMap<String, QueryDescription>,
    #[serde(flatten)]
    rest: BTreeMap<String, serde_yaml::Value>,
}

/// Markdown importer: YAML front matter plus a CommonMark body rendered to
/// HTML.
pub struct MarkdownImporter;

impl Importer for MarkdownImporter {
    fn identifier(&self) -> &'static str {
        "markdown"
    }

    fn version(&self) -> u32 {
        1
    }

    fn settings(&self, raw: &serde_yaml::Value) -> Result<ImporterSettings, StrataError> {
        if raw.is_null() {
            return Ok(ImporterSettings::empty());
        }
        // Validate the shape up front so configuration errors surface
        // before any build work starts.
        let _: MarkdownSettings = serde_yaml::from_value(raw.clone())?;
        Ok(ImporterSettings(yaml_to_json(raw)?))
    }

    fn import(
        &self,
        source: &SourceFile,
        settings: &ImporterSettings,
        _ctx: &ImportContext,
    ) -> Result<ImportOutput, StrataError> {
        let settings: MarkdownSettings =
            serde_json::from_value(settings.0.clone()).unwrap_or_default();
        let raw = std::fs::read_to_string(&source.absolute_path)
            .map_err(|e| StrataError::import(&source.relative_path, e))?;

        let (front, body) = match FRONT_MATTER_RE.captures(&raw) {
            Some(captures) => {
                let yaml = captures.get(1).expect("front matter body").as_str();
                let front: FrontMatter = serde_yaml::from_str(yaml)
                    .map_err(|e| StrataError::import(&source.relative_path, e))?;
                (front, &raw[captures.get(0).expect("capture 0").end()..])
            }
            None => (FrontMatter::default(), raw.as_str()),
        };

        let mut html_out = String::with_capacity(body.len() * 2);
        let parser = Parser::new_ext(body, Options::ENABLE_TABLES | Options::ENABLE_FOOTNOTES);
        html::push_html(&mut html_out, parser);

        let url = url_for_relative_path(&source.relative_path);
        let mut metadata = BTreeMap::new();
        for (key, value) in front.rest {
            metadata.insert(key, yaml_to_json(&value)?);
        }

        let document = Document {
            parent: parent_of(&url),
            category: front
                .category
                .or(settings.category)
                .unwrap_or_else(|| "page".to_string()),
            date: front
                .date
                .as_deref()
                .map(|raw| parse_date(raw, &source.relative_path))
                .transpose()?,
            title: front.title.or_else(|| {
                url.rsplit('/')
                    .next()
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            }),
            thumbnail: front.thumbnail,
            queries: front.queries,
            metadata,
            contents: html_out.trim_end().to_string(),
            content_modification_date: source.modification_date,
            template: front.template.or(settings.template),
            inline_template: front.inline_template,
            relative_source_path: source.relative_path.clone(),
            format: DocumentFormat::Text,
            fingerprint: String::new(),
            url,
        }
        .fingerprinted();

        Ok(ImportOutput {
            document: Some(document),
            assets: Vec::new(),
        })
    }
}

/// Copy importer: verbatim byte copy into the output tree, producing one
/// asset record and no document.
pub struct CopyImporter;

impl Importer for CopyImporter {
    fn identifier(&self) -> &'static str {
        "copy"
    }

    fn version(&self) -> u32 {
        1
    }

    fn settings(&self, raw: &serde_yaml::Value) -> Result<ImporterSettings, StrataError> {
        match raw {
            serde_yaml::Value::Null => Ok(ImporterSettings::empty()),
            other => Ok(ImporterSettings(yaml_to_json(other)?)),
        }
    }

    fn import(
        &self,
        source: &SourceFile,
        _settings: &ImporterSettings,
        ctx: &ImportContext,
    ) -> Result<ImportOutput, StrataError> {
        let destination = ctx.output_root.join(&source.relative_path);
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StrataError::import(&source.relative_path, e))?;
        }
        std::fs::copy(&source.absolute_path, &destination)
            .map_err(|e| StrataError::import(&source.relative_path, e))?;

        Ok(ImportOutput {
            document: None,
            assets: vec![Asset {
                relative_output_path: source.relative_path.clone(),
                relative_source_path: source.relative_path.clone(),
            }],
        })
    }
}

fn parse_date(raw: &str, source: &str) -> Result<DateTime<Utc>, StrataError> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        let midnight = date.and_hms_opt(0, 0, 0).expect("midnight exists");
        return Ok(Utc.from_utc_datetime(&midnight));
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StrataError::import(source, format!("unparseable date '{raw}': {e}")))
}

fn yaml_to_json(value: &serde_yaml::Value) -> Result<serde_json::Value, StrataError> {
    Ok(serde_json::to_value(value)?)
}
