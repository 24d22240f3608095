#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use outbox_worker::{BackoffPolicy, MemoryJobStore, PgJobStore, WorkerOptions, WorkerUtils};
use rand::RngCore;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Counter usable from `'static` handler closures.
pub struct StaticCounter {
    cell: AtomicU32,
}

impl StaticCounter {
    pub const fn new() -> Self {
        Self {
            cell: AtomicU32::new(0),
        }
    }

    /// Increments and returns the new value.
    pub fn increment(&self) -> u32 {
        self.cell.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self) -> u32 {
        self.cell.load(Ordering::SeqCst)
    }
}

static TRACING: OnceCell<()> = OnceCell::const_new();

pub async fn enable_logs() {
    TRACING
        .get_or_init(|| async {
            let _ = tracing_subscriber::registry()
                .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
                .with(tracing_subscriber::fmt::layer().with_test_writer())
                .try_init();
        })
        .await;
}

/// Options for a worker on `store`, retrying without delay and ignoring OS
/// signals.
pub fn memory_worker_options(store: &MemoryJobStore) -> WorkerOptions {
    WorkerOptions::default()
        .store(store.clone())
        .concurrency(4)
        .poll_interval(Duration::from_millis(20))
        .backoff(BackoffPolicy::none())
        .listen_os_signals(false)
}

pub fn memory_utils(store: &MemoryJobStore) -> WorkerUtils {
    WorkerUtils::from_store(store.clone())
}

/// A PostgreSQL database isolated in its own schema.
pub struct TestDatabase {
    pub pool: PgPool,
    pub schema: String,
}

impl TestDatabase {
    pub fn create_worker_options(&self) -> WorkerOptions {
        WorkerOptions::default()
            .pg_pool(self.pool.clone())
            .schema(&self.schema)
            .concurrency(4)
            .poll_interval(Duration::from_millis(20))
            .backoff(BackoffPolicy::none())
            .listen_os_signals(false)
    }

    pub async fn store(&self) -> PgJobStore {
        PgJobStore::connect(self.pool.clone(), &self.schema)
            .await
            .expect("Failed to migrate test schema")
    }

    async fn drop_schema(&self) {
        sqlx::query(&format!("drop schema if exists {} cascade", self.schema))
            .execute(&self.pool)
            .await
            .expect("Failed to drop test schema");
        self.pool.close().await;
    }
}

/// Runs `test_fn` against a fresh schema of the database at `DATABASE_URL`.
///
/// Tests using it are `#[ignore]`d, run them with `cargo test -- --ignored`.
pub async fn with_test_db<F, Fut>(test_fn: F)
where
    F: FnOnce(TestDatabase) -> Fut,
    Fut: Future<Output = ()>,
{
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    enable_logs().await;

    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DATABASE_URL");

    let mut random_bytes = [0u8; 6];
    rand::rng().fill_bytes(&mut random_bytes);
    let schema = format!("outbox_test_{}", hex::encode(random_bytes));

    let test_db = TestDatabase { pool, schema };
    let cleanup = TestDatabase {
        pool: test_db.pool.clone(),
        schema: test_db.schema.clone(),
    };

    test_fn(test_db).await;

    cleanup.drop_schema().await;
}
