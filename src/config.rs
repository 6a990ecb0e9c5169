//! Site configuration.
//!
//! A [`Site`] is constructed once at startup from `site.yaml` and passed by
//! reference into the builder, store and template cache. Configuration
//! errors (unsupported schema version, unknown importer identifiers,
//! malformed settings) are fatal and reported before any build work starts.

use serde::Deserialize;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use crate::{
    error::StrataError,
    importer::{Handler, ImporterRegistry},
    render::Value,
    store::STORE_FILE,
};

/// Supported `site.yaml` schema version.
pub const SITE_CONFIG_VERSION: u32 = 1;

/// Site settings file name, at the site root.
pub const SITE_CONFIG_FILE: &str = "site.yaml";

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Deserialize)]
struct HandlerConfig {
    /// Path pattern matched against content-relative source paths.
    when: String,
    /// Importer identifier.
    then: String,
    /// Importer-specific settings.
    #[serde(default)]
    args: serde_yaml::Value,
}

#[derive(Debug, Deserialize)]
struct SiteConfig {
    version: u32,
    title: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default)]
    metadata: BTreeMap<String, serde_yaml::Value>,
    /// Bookmarked sub-paths by name.
    #[serde(default)]
    favorites: BTreeMap<String, String>,
    /// Shell-invokable build hooks by name.
    #[serde(default)]
    actions: BTreeMap<String, String>,
    #[serde(default)]
    handlers: Vec<HandlerConfig>,
}

/// One loaded site: its root directory, settings, and the resolved import
/// handler table in configuration order.
pub struct Site {
    root: PathBuf,
    pub title: String,
    pub url: Option<String>,
    pub port: u16,
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub favorites: BTreeMap<String, String>,
    pub actions: BTreeMap<String, String>,
    pub handlers: Vec<Handler>,
}

impl std::fmt::Debug for Site {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Site")
            .field("root", &self.root)
            .field("title", &self.title)
            .field("url", &self.url)
            .field("port", &self.port)
            .field("metadata", &self.metadata)
            .field("favorites", &self.favorites)
            .field("actions", &self.actions)
            .field("handlers", &self.handlers)
            .finish()
    }
}

impl Site {
    /// Load `site.yaml` from `root`, resolving handlers against `registry`.
    pub fn load(root: &Path, registry: &ImporterRegistry) -> Result<Site, StrataError> {
        let config_path = root.join(SITE_CONFIG_FILE);
        let raw = std::fs::read_to_string(&config_path).map_err(|_| {
            StrataError::Config(format!("missing site settings at {}", config_path.display()))
        })?;
        let config: SiteConfig = serde_yaml::from_str(&raw)
            .map_err(|e| StrataError::Config(format!("malformed {SITE_CONFIG_FILE}: {e}")))?;

        if config.version != SITE_CONFIG_VERSION {
            return Err(StrataError::Config(format!(
                "unsupported site settings version {} (supported: {SITE_CONFIG_VERSION})",
                config.version
            )));
        }

        let mut handlers = Vec::with_capacity(config.handlers.len());
        for handler in &config.handlers {
            let importer = registry.get(&handler.then).ok_or_else(|| {
                StrataError::Config(format!("unknown importer '{}' in handlers", handler.then))
            })?;
            handlers.push(Handler::new(&handler.when, importer, &handler.args)?);
        }

        let mut metadata = BTreeMap::new();
        for (key, value) in &config.metadata {
            metadata.insert(key.clone(), serde_json::to_value(value)?);
        }

        Ok(Site {
            root: root.to_path_buf(),
            title: config.title,
            url: config.url,
            port: config.port,
            metadata,
            favorites: config.favorites,
            actions: config.actions,
            handlers,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Source content directory.
    pub fn content_dir(&self) -> PathBuf {
        self.root.join("content")
    }

    /// Template sources directory.
    pub fn templates_dir(&self) -> PathBuf {
        self.root.join("templates")
    }

    /// The store's backing file.
    pub fn store_path(&self) -> PathBuf {
        self.root.join("build").join(STORE_FILE)
    }

    /// Rendered/copied output, served as the site root.
    pub fn output_dir(&self) -> PathBuf {
        self.root.join("build").join("files")
    }

    /// The site-level context value handed to every render.
    pub fn context(&self) -> Value {
        let mut map = Value::map();
        map.insert("title".into(), Value::String(self.title.clone()));
        if let Some(url) = &self.url {
            map.insert("url".into(), Value::String(url.clone()));
        }
        let metadata: BTreeMap<String, Value> = self
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), Value::from_json(v)))
            .collect();
        map.insert("metadata".into(), Value::Map(metadata));
        Value::Map(map)
    }
}
