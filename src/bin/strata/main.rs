//! strata CLI
//!
//! Command-line interface for building and serving a strata site.
//!
//! ## Commands
//!
//! - `build <path>`: one full import+render pass
//! - `serve <path>`: local HTTP server over `build/files`, optionally with
//!   `--watch` driving a live rebuild loop
//!
//! Exit code 0 on success; per-file and per-document failures are reported
//! without failing the invocation, a fatal error (configuration, storage)
//! exits non-zero.

use clap::{Parser, Subcommand};
use std::{path::PathBuf, sync::Arc};

use strata_core::{
    builder::Builder, config::Site, importer::ImporterRegistry, observer::ChangeObserver,
    render::PlaceholderRenderer, store::Store, StrataError,
};

mod dev_server;

#[derive(Parser)]
#[command(name = "strata")]
#[command(author, version, about = "An incremental static-site build engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one full import+render pass
    Build {
        /// Site root (contains site.yaml, content/, templates/)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Run import and render batches strictly sequentially
        #[arg(long)]
        serialize: bool,
    },

    /// Serve build/files over HTTP, optionally rebuilding on change
    Serve {
        /// Site root (contains site.yaml, content/, templates/)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Rebuild whenever content, templates or settings change
        #[arg(short, long)]
        watch: bool,

        /// Port override (defaults to the site settings port)
        #[arg(long)]
        port: Option<u16>,

        /// Run import and render batches strictly sequentially
        #[arg(long)]
        serialize: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build { path, serialize } => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(async {
                let builder = open_builder(&path, serialize).await?;
                let report = builder.build().await?;

                for failure in &report.failures {
                    eprintln!("warning: {failure}");
                }
                println!(
                    "{} imported ({} skipped), {} rendered ({} skipped), {} deleted",
                    report.imported.len(),
                    report.skipped_imports,
                    report.rendered.len(),
                    report.skipped_renders,
                    report.deleted.len()
                );
                Ok::<(), StrataError>(())
            })?;
            Ok(())
        }

        Commands::Serve {
            path,
            watch,
            port,
            serialize,
        } => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(async {
                let registry = ImporterRegistry::builtin();
                let site = Arc::new(Site::load(&path, &registry)?);
                let port = port.unwrap_or(site.port);
                let store = Store::open(&site.store_path()).await?;
                let builder =
                    Builder::new(site.clone(), store, PlaceholderRenderer, serialize);

                let observer = Arc::new(if watch {
                    ChangeObserver::watch(&[site.content_dir(), site.templates_dir()])?
                } else {
                    ChangeObserver::manual()
                });

                let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
                {
                    let observer = observer.clone();
                    ctrlc::set_handler(move || {
                        println!("\nShutting down...");
                        observer.close();
                        let _ = shutdown_tx.send(true);
                    })
                    .map_err(|e| StrataError::Internal(format!("ctrl-c handler: {e}")))?;
                }

                let build_loop = if watch {
                    let observer = observer.clone();
                    tokio::spawn(async move { builder.watch(&observer).await })
                } else {
                    tokio::spawn(async move {
                        let report = builder.build().await?;
                        for failure in &report.failures {
                            tracing::warn!("{failure}");
                        }
                        Ok(())
                    })
                };

                let server = dev_server::DevServer::new(site.output_dir(), port);
                let shutdown = async move {
                    let _ = shutdown_rx.changed().await;
                };
                server
                    .serve(shutdown)
                    .await
                    .map_err(|e| StrataError::Internal(format!("dev server: {e}")))?;

                observer.close();
                match build_loop.await {
                    Ok(result) => result?,
                    Err(join_error) if join_error.is_cancelled() => {}
                    Err(join_error) => {
                        return Err(StrataError::Internal(format!(
                            "build loop panicked: {join_error}"
                        )))
                    }
                }

                println!("Shutdown complete");
                Ok::<(), StrataError>(())
            })?;
            Ok(())
        }
    }
}

async fn open_builder(
    path: &PathBuf,
    serialize: bool,
) -> Result<Builder<PlaceholderRenderer>, StrataError> {
    let registry = ImporterRegistry::builtin();
    let site = Arc::new(Site::load(path, &registry)?);
    let store = Store::open(&site.store_path()).await?;
    Ok(Builder::new(site, store, PlaceholderRenderer, serialize))
}
