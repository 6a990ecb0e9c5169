//! Local development server.
//!
//! Serves the site's `build/files` directory over HTTP. No rendering
//! happens here; the builder owns output generation. This is a static
//! file server with graceful shutdown.

use axum::Router;
use std::{net::SocketAddr, path::PathBuf};
use tower_http::{services::ServeDir, trace::TraceLayer};

/// Static file server over the rendered output directory.
pub struct DevServer {
    files_root: PathBuf,
    port: u16,
}

impl DevServer {
    pub fn new(files_root: PathBuf, port: u16) -> Self {
        DevServer { files_root, port }
    }

    /// Serve until `shutdown_signal` completes.
    pub async fn serve(
        self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let addr = SocketAddr::from(([127, 0, 0, 1], self.port));

        let app = Router::new()
            .nest_service("/", ServeDir::new(&self.files_root))
            .layer(TraceLayer::new_for_http());

        tracing::info!("Dev server starting on http://{}", addr);
        println!("Serving {} at http://{}", self.files_root.display(), addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(shutdown_signal)
            .await?;

        tracing::info!("Dev server shut down");
        Ok(())
    }
}
