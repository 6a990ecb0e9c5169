//! # strata-core
//!
//! An incremental static-site build engine. Source content is imported
//! into a SQLite-backed document store, rendered through templates, and
//! written out as files, while repeated builds skip every import and
//! render whose recorded inputs are unchanged.
//!
//! ## Overview
//!
//! The engine is a miniature build system whose cache invalidation hinges
//! on two bookkeeping records:
//!
//! - an [`document::ImportStatus`] per source file (modification time plus
//!   a fingerprint of the handler configuration that imported it), and
//! - a [`document::RenderStatus`] per document (the document fingerprint,
//!   every query result, every template modification time and every
//!   renderer version the last render consulted).
//!
//! A render records its dependencies as a side effect of executing them
//! through a [`tracker::RenderTracker`], so the next build's needs-render
//! decision never has to guess which inputs mattered.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use strata_core::{
//!     builder::Builder, config::Site, importer::ImporterRegistry,
//!     render::PlaceholderRenderer, store::Store,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = ImporterRegistry::builtin();
//!     let site = Arc::new(Site::load(std::path::Path::new("."), &registry)?);
//!     let store = Store::open(&site.store_path()).await?;
//!
//!     let builder = Builder::new(site, store, PlaceholderRenderer, false);
//!     let report = builder.build().await?;
//!     println!(
//!         "{} imported, {} rendered",
//!         report.imported.len(),
//!         report.rendered.len()
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Watch mode
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use strata_core::{
//! #     builder::Builder, config::Site, importer::ImporterRegistry,
//! #     observer::ChangeObserver, render::PlaceholderRenderer, store::Store,
//! # };
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! # let registry = ImporterRegistry::builtin();
//! # let site = Arc::new(Site::load(std::path::Path::new("."), &registry)?);
//! # let store = Store::open(&site.store_path()).await?;
//! let observer = ChangeObserver::watch(&[site.content_dir(), site.templates_dir()])?;
//! let builder = Builder::new(site, store, PlaceholderRenderer, false);
//! // Each wake triggers exactly one more full import+render pass.
//! builder.watch(&observer).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`builder`]: the `importing → rendering → (idle | watching)`
//!   orchestrator
//! - [`store`]: the persistent system of record and its result caches
//! - [`query`]: declarative filter/sort/limit descriptions over documents
//! - [`tracker`]: per-render dependency recording
//! - [`fingerprint`]: the content-hash combinator all change detection
//!   rests on
//! - [`importer`] / [`render`]: the two external-collaborator boundaries
//! - [`template`], [`runner`], [`observer`]: template cache, batch
//!   execution, coalesced change signalling
//! - [`config`]: `site.yaml` loading

pub mod builder;
pub mod config;
pub mod document;
pub mod error;
pub mod fingerprint;
pub mod importer;
pub mod observer;
pub mod query;
pub mod render;
pub mod runner;
pub mod store;
pub mod template;
pub mod tracker;

pub use error::*;
