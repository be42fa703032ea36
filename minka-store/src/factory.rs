//! Connection lifecycle and table registry.
//!
//! A [`Factory`] owns one connection pool, the per-table runtime state,
//! and every background task. Multiple factories (for example one per
//! database) coexist without interference; nothing here is global except
//! the one-time sqlx driver installation.
use crate::{
    compact,
    dialect::{parse_dsn, Dialect},
    error::{Error, Result},
    hub::Hub,
    migrate,
    store::Store,
    table::{TableDefinition, TableState},
    templates::Templates,
};
use sqlx::{any::AnyPoolOptions, AnyPool};
use std::{
    collections::HashMap,
    sync::{Arc, Once},
    time::Duration,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

static DRIVERS: Once = Once::new();

/// Tunables for a factory and the stores it hands out
#[derive(Clone, Debug)]
pub struct FactoryConfig {
    /// Upper bound on pooled connections
    pub max_connections: u32,
    /// How long to wait for a pooled connection before giving up
    pub acquire_timeout: Duration,
    /// Cadence of the per-table compaction task
    pub compaction_interval: Duration,
    /// Rows fetched per query cycle by watch sessions and internal paging
    pub watch_batch: u32,
    /// Capacity of each watch session's outbound event channel
    pub watch_buffer: usize,
    /// Quiet-stream interval after which watchers re-query and, when the
    /// client opted in, emit a keepalive bookmark
    pub progress_interval: Duration,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
            compaction_interval: Duration::from_secs(15 * 60),
            watch_batch: 500,
            watch_buffer: 64,
            progress_interval: Duration::from_secs(60),
        }
    }
}

/// Owner of one database connection and every store opened on it
pub struct Factory {
    pool: AnyPool,
    dialect: Dialect,
    config: Arc<FactoryConfig>,
    tables: Mutex<HashMap<String, Arc<TableState>>>,
    shutdown: CancellationToken,
}

impl Factory {
    /// Open a database with default configuration.
    ///
    /// Accepted DSNs: `sqlite://<path>`, `sqlite://:memory:`,
    /// `postgres://…` (or the `postgresql://` alias).
    pub async fn open(dsn: &str) -> Result<Self> {
        Self::open_with(dsn, FactoryConfig::default()).await
    }

    /// Open a database with explicit configuration
    pub async fn open_with(dsn: &str, config: FactoryConfig) -> Result<Self> {
        DRIVERS.call_once(sqlx::any::install_default_drivers);
        let dsn = parse_dsn(dsn)?;
        let options = AnyPoolOptions::new().acquire_timeout(config.acquire_timeout);
        let options = if dsn.in_memory {
            // an in-memory SQLite database lives and dies with its
            // connection, so the pool must hold exactly one open forever
            options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            options.max_connections(config.max_connections)
        };
        let pool = options.connect(&dsn.url).await.map_err(Error::Unavailable)?;
        let factory = Self {
            pool,
            dialect: dsn.dialect,
            config: Arc::new(config),
            tables: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        };
        factory.ping().await?;
        migrate::ensure_compaction_table(&factory.pool).await?;
        info!(dialect = ?factory.dialect, "database opened");
        Ok(factory)
    }

    /// Verify the database is reachable
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(Error::Unavailable)?;
        Ok(())
    }

    /// Open (creating or migrating on first use) the store for a kind.
    ///
    /// Table creation is serialized across callers; the table's compactor
    /// starts on first open.
    pub async fn store(&self, def: TableDefinition) -> Result<Store> {
        let name = def.table_name();
        let mut tables = self.tables.lock().await;
        if let Some(state) = tables.get(&name) {
            if state.def.indexed_fields != def.indexed_fields {
                return Err(Error::Invalid(format!(
                    "kind {} is already registered with a different indexed field set",
                    def.resource.kind
                )));
            }
            return Ok(Store::new(self.pool.clone(), state.clone(), self.config.clone()));
        }

        let templates = Templates::new(self.dialect, &name, def.field_columns());
        migrate::migrate_table(&self.pool, self.dialect, &templates, &def).await?;
        let state = Arc::new(TableState {
            def,
            templates,
            hub: Hub::new(),
            shutdown: self.shutdown.child_token(),
        });
        compact::spawn(self.pool.clone(), state.clone(), self.config.compaction_interval);
        tables.insert(name, state.clone());
        Ok(Store::new(self.pool.clone(), state, self.config.clone()))
    }

    /// Stop background tasks and close the pool.
    ///
    /// Live watch streams end; subsequent operations fail
    /// `ServiceUnavailable`.
    pub async fn destroy(&self) {
        self.shutdown.cancel();
        self.pool.close().await;
        info!("factory destroyed");
    }
}
