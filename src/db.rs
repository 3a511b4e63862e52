use std::time::Duration;

use anyhow::Context;
use diesel::pg::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

pub type PgPool = Pool<ConnectionManager<PgConnection>>;
pub type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

pub const DEFAULT_MAX_POOL_SIZE: u32 = 2;
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 10;
pub const DEFAULT_CONNECT_RETRY_DELAY: Duration = Duration::from_millis(3000);

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Bounded attempts with a fixed delay, used only while establishing the pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_CONNECT_ATTEMPTS,
            delay: DEFAULT_CONNECT_RETRY_DELAY,
        }
    }
}

pub fn init_pool_with_size(database_url: &str, max_size: u32) -> anyhow::Result<PgPool> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool_size = max_size.max(1);
    let pool = Pool::builder()
        .max_size(pool_size)
        .connection_timeout(Duration::from_secs(10))
        .build(manager)?;
    Ok(pool)
}

pub async fn connect_with_retry(
    database_url: &str,
    max_size: u32,
    retry: RetryPolicy,
) -> anyhow::Result<PgPool> {
    let attempts = retry.attempts.max(1);
    let mut attempt = 1;
    loop {
        match init_pool_with_size(database_url, max_size) {
            Ok(pool) => return Ok(pool),
            Err(err) if attempt < attempts => {
                tracing::warn!(
                    attempt,
                    attempts,
                    retry_in_ms = retry.delay.as_millis() as u64,
                    error = %err,
                    "unable to connect to the database, retrying"
                );
                attempt += 1;
                tokio::time::sleep(retry.delay).await;
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("unable to connect to the database after {attempts} attempts")
                })
            }
        }
    }
}

pub fn run_migrations(pool: &PgPool) -> anyhow::Result<Vec<String>> {
    let mut conn = pool
        .get()
        .context("failed to get connection for migrations")?;
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|err| anyhow::anyhow!("failed to run migrations: {err}"))?;
    Ok(applied.iter().map(|version| version.to_string()).collect())
}
