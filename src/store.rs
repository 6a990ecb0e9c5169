//! Persistent system of record for documents, assets, import status and
//! render status, backed by one SQLite file.
//!
//! All mutating operations pass through a single write queue and run inside
//! one transaction; the in-process result caches (`documents`,
//! `fingerprints`) are invalidated atomically with every write via a
//! generation counter, so no caller can observe a cached result that races
//! ahead of a just-committed write.
//!
//! Schema evolution is an in-code migration list applied in order on open.
//! A database carrying versions this binary does not know about is a fatal
//! configuration error, never silently ignored.

use futures_core::future::BoxFuture;
use parking_lot::RwLock;
use sqlx::{
    error::BoxDynError,
    migrate::{Migration as SqlxMigration, MigrationSource, MigrationType, Migrator},
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, QueryBuilder, Sqlite,
};
use std::{
    collections::HashMap,
    path::Path,
    str::FromStr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::Mutex;

use crate::{
    document::{Asset, Document, ImportStatus, RenderStatus},
    error::StrataError,
    query::QueryDescription,
};

/// File name of the store inside the site's `build/` directory.
pub const STORE_FILE: &str = "store.sqlite";

/// A migration definition.
#[derive(Debug, Clone)]
struct Migration {
    version: i64,
    description: &'static str,
    sql: &'static str,
}

#[derive(Debug, Clone)]
struct MigrationList(Vec<Migration>);

impl MigrationSource<'static> for MigrationList {
    fn resolve(self) -> BoxFuture<'static, Result<Vec<SqlxMigration>, BoxDynError>> {
        Box::pin(async move {
            Ok(self
                .0
                .into_iter()
                .map(|migration| {
                    SqlxMigration::new(
                        migration.version,
                        migration.description.into(),
                        MigrationType::Simple,
                        migration.sql.into(),
                        false,
                    )
                })
                .collect())
        })
    }
}

fn migrations() -> MigrationList {
    MigrationList(vec![Migration {
        version: 1,
        description: "create_initial_tables",
        sql: "\
            CREATE TABLE documents (\
                url TEXT PRIMARY KEY, \
                parent TEXT NOT NULL, \
                category TEXT NOT NULL, \
                date INTEGER, \
                title TEXT, \
                thumbnail TEXT, \
                queries TEXT NOT NULL, \
                metadata TEXT NOT NULL, \
                contents TEXT NOT NULL, \
                content_modification_date INTEGER NOT NULL, \
                template TEXT, \
                inline_template TEXT, \
                relative_source_path TEXT NOT NULL, \
                format TEXT NOT NULL, \
                fingerprint TEXT NOT NULL); \
            CREATE INDEX idx_documents_source ON documents (relative_source_path); \
            CREATE INDEX idx_documents_parent ON documents (parent); \
            CREATE TABLE import_status (\
                relative_source_path TEXT PRIMARY KEY, \
                content_modification_date INTEGER NOT NULL, \
                importer TEXT NOT NULL, \
                handler_fingerprint TEXT NOT NULL); \
            CREATE TABLE assets (\
                relative_output_path TEXT PRIMARY KEY, \
                relative_source_path TEXT NOT NULL); \
            CREATE INDEX idx_assets_source ON assets (relative_source_path); \
            CREATE TABLE render_status (\
                url TEXT PRIMARY KEY, \
                status TEXT NOT NULL);",
    }])
}

#[derive(Default)]
struct ResultCaches {
    documents: HashMap<QueryDescription, Vec<Document>>,
    fingerprints: HashMap<QueryDescription, Vec<String>>,
}

/// Handle to the backing database plus the in-process result caches.
/// Cloning is cheap; all clones share the same pool, write queue and
/// caches.
#[derive(Clone)]
pub struct Store {
    pool: Pool<Sqlite>,
    /// Single-writer queue: every mutating operation holds this across its
    /// transaction and cache invalidation.
    write_queue: Arc<Mutex<()>>,
    /// Bumped inside every write's critical section. Readers snapshot it
    /// before querying and only populate the cache if no write landed in
    /// between.
    generation: Arc<AtomicU64>,
    caches: Arc<RwLock<ResultCaches>>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("pool", &self.pool)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Open (creating if missing) the store at `db_path` and bring its
    /// schema up to date.
    pub async fn open(db_path: &Path) -> Result<Store, StrataError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let url = format!("sqlite:{}", db_path.display());
        tracing::debug!("Opening store at {url}");
        let options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        Self::init(pool).await
    }

    /// In-memory store for tests. A single connection keeps every query on
    /// the same database.
    pub async fn open_in_memory() -> Result<Store, StrataError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::init(pool).await
    }

    async fn init(pool: Pool<Sqlite>) -> Result<Store, StrataError> {
        let migrator = Migrator::new(migrations()).await?;
        migrator.run(&pool).await?;
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM documents")
            .fetch_one(&pool)
            .await?;
        tracing::info!("Store opened with {} documents", count.0);
        Ok(Store {
            pool,
            write_queue: Arc::new(Mutex::new(())),
            generation: Arc::new(AtomicU64::new(0)),
            caches: Arc::new(RwLock::new(ResultCaches::default())),
        })
    }

    /// Invalidate the result caches. Called inside every write's critical
    /// section, after commit and before the write queue is released.
    fn invalidate(&self) {
        let mut caches = self.caches.write();
        self.generation.fetch_add(1, Ordering::SeqCst);
        caches.documents.clear();
        caches.fingerprints.clear();
    }

    /// Upsert a document (optional; some importers produce only assets),
    /// replace all assets owned by the status's source path, and upsert the
    /// status row, atomically.
    pub async fn save_import(
        &self,
        document: Option<&Document>,
        assets: &[Asset],
        status: &ImportStatus,
    ) -> Result<(), StrataError> {
        let _write = self.write_queue.lock().await;
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM assets WHERE relative_source_path = ?")
            .bind(&status.relative_source_path)
            .execute(&mut *tx)
            .await?;

        if let Some(document) = document {
            sqlx::query(
                "INSERT OR REPLACE INTO documents (\
                 url, parent, category, date, title, thumbnail, queries, metadata, \
                 contents, content_modification_date, template, inline_template, \
                 relative_source_path, format, fingerprint) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&document.url)
            .bind(&document.parent)
            .bind(&document.category)
            .bind(document.date.map(|d| d.timestamp()))
            .bind(&document.title)
            .bind(&document.thumbnail)
            .bind(serde_json::to_string(&document.queries)?)
            .bind(serde_json::to_string(&document.metadata)?)
            .bind(&document.contents)
            .bind(document.content_modification_date)
            .bind(&document.template)
            .bind(&document.inline_template)
            .bind(&document.relative_source_path)
            .bind(document.format.as_str())
            .bind(&document.fingerprint)
            .execute(&mut *tx)
            .await?;
        }

        for asset in assets {
            sqlx::query(
                "INSERT OR REPLACE INTO assets (relative_output_path, relative_source_path) \
                 VALUES (?, ?)",
            )
            .bind(&asset.relative_output_path)
            .bind(&asset.relative_source_path)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "INSERT OR REPLACE INTO import_status (\
             relative_source_path, content_modification_date, importer, handler_fingerprint) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(&status.relative_source_path)
        .bind(status.content_modification_date)
        .bind(&status.importer)
        .bind(&status.handler_fingerprint)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        self.invalidate();
        Ok(())
    }

    pub async fn status_for(&self, source_path: &str) -> Result<Option<ImportStatus>, StrataError> {
        let status = sqlx::query_as::<_, ImportStatus>(
            "SELECT * FROM import_status WHERE relative_source_path = ?",
        )
        .bind(source_path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(status)
    }

    pub async fn assets_for(&self, source_path: &str) -> Result<Vec<Asset>, StrataError> {
        let assets = sqlx::query_as::<_, Asset>(
            "SELECT * FROM assets WHERE relative_source_path = ? ORDER BY relative_output_path",
        )
        .bind(source_path)
        .fetch_all(&self.pool)
        .await?;
        Ok(assets)
    }

    /// Drop the asset records owned by one source path.
    pub async fn forget_assets(&self, source_path: &str) -> Result<(), StrataError> {
        let _write = self.write_queue.lock().await;
        sqlx::query("DELETE FROM assets WHERE relative_source_path = ?")
            .bind(source_path)
            .execute(&self.pool)
            .await?;
        self.invalidate();
        Ok(())
    }

    /// Execute a query description. Results are cached in-process keyed by
    /// the query value itself until the next write.
    pub async fn documents(&self, query: &QueryDescription) -> Result<Vec<Document>, StrataError> {
        if let Some(hit) = self.caches.read().documents.get(query) {
            return Ok(hit.clone());
        }
        let generation = self.generation.load(Ordering::SeqCst);

        let mut qb = QueryBuilder::new("");
        query.push_select("*", &mut qb);
        let documents = qb
            .build_query_as::<Document>()
            .fetch_all(&self.pool)
            .await?;

        if self.generation.load(Ordering::SeqCst) == generation {
            self.caches
                .write()
                .documents
                .insert(query.clone(), documents.clone());
        }
        Ok(documents)
    }

    /// Cheaper projection of [`Store::documents`] used only for change
    /// detection: the ordered fingerprints a query currently selects.
    pub async fn fingerprints(&self, query: &QueryDescription) -> Result<Vec<String>, StrataError> {
        if let Some(hit) = self.caches.read().fingerprints.get(query) {
            return Ok(hit.clone());
        }
        let generation = self.generation.load(Ordering::SeqCst);

        let mut qb = QueryBuilder::new("");
        query.push_select("fingerprint", &mut qb);
        let rows: Vec<(String,)> = qb.build_query_as().fetch_all(&self.pool).await?;
        let fingerprints: Vec<String> = rows.into_iter().map(|(fp,)| fp).collect();

        if self.generation.load(Ordering::SeqCst) == generation {
            self.caches
                .write()
                .fingerprints
                .insert(query.clone(), fingerprints.clone());
        }
        Ok(fingerprints)
    }

    /// Every source path with an import status row. Used to detect source
    /// files deleted since the previous build.
    pub async fn all_relative_source_paths(&self) -> Result<Vec<String>, StrataError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT relative_source_path FROM import_status ORDER BY relative_source_path",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(path,)| path).collect())
    }

    /// Remove the documents, assets, import statuses and render statuses
    /// owned by the given source paths, atomically.
    pub async fn delete_documents(&self, source_paths: &[String]) -> Result<(), StrataError> {
        if source_paths.is_empty() {
            return Ok(());
        }
        let _write = self.write_queue.lock().await;
        let mut tx = self.pool.begin().await?;

        for source_path in source_paths {
            sqlx::query(
                "DELETE FROM render_status WHERE url IN \
                 (SELECT url FROM documents WHERE relative_source_path = ?)",
            )
            .bind(source_path)
            .execute(&mut *tx)
            .await?;
            sqlx::query("DELETE FROM documents WHERE relative_source_path = ?")
                .bind(source_path)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM assets WHERE relative_source_path = ?")
                .bind(source_path)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM import_status WHERE relative_source_path = ?")
                .bind(source_path)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        self.invalidate();
        tracing::debug!("Deleted {} source path(s) from store", source_paths.len());
        Ok(())
    }

    /// Persist a fresh render status for `url`, replacing any prior one.
    pub async fn save_render_status(
        &self,
        url: &str,
        status: &RenderStatus,
    ) -> Result<(), StrataError> {
        let _write = self.write_queue.lock().await;
        sqlx::query("INSERT OR REPLACE INTO render_status (url, status) VALUES (?, ?)")
            .bind(url)
            .bind(serde_json::to_string(status)?)
            .execute(&self.pool)
            .await?;
        self.invalidate();
        Ok(())
    }

    /// Bulk-load every render status. The builder calls this once per build
    /// and holds the map for the duration of the pass.
    pub async fn all_render_statuses(&self) -> Result<HashMap<String, RenderStatus>, StrataError> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT url, status FROM render_status")
            .fetch_all(&self.pool)
            .await?;
        let mut statuses = HashMap::with_capacity(rows.len());
        for (url, json) in rows {
            let status: RenderStatus = serde_json::from_str(&json).map_err(|e| {
                StrataError::Internal(format!("corrupt render status for {url}: {e}"))
            })?;
            statuses.insert(url, status);
        }
        Ok(statuses)
    }
}
