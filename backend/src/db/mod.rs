use diesel::connection::SimpleConnection;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PoolError};

use crate::config::AppConfig;
use crate::error::AppError;

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

const SCHEMA: &str = include_str!("schema.sql");

pub fn build_pool(config: &AppConfig) -> Result<DbPool, PoolError> {
    log::info!(
        "Connecting to database with a pool of {} connections",
        config.database_pool_size
    );
    let manager = ConnectionManager::<PgConnection>::new(&config.database_url);
    Pool::builder()
        .max_size(config.database_pool_size)
        .build(manager)
}

/// A pool that opens no connection until one is requested.
#[cfg(test)]
pub fn lazy_pool(database_url: &str) -> DbPool {
    Pool::builder()
        .max_size(1)
        .build_unchecked(ConnectionManager::<PgConnection>::new(database_url))
}

/// Creates every table and index the service needs when they are missing.
pub fn ensure_schema(conn: &mut PgConnection) -> QueryResult<()> {
    conn.batch_execute(SCHEMA)?;
    log::info!("Database schema is up to date");
    Ok(())
}

/// Runs a blocking diesel closure on a pooled connection without stalling the runtime.
pub async fn run<F, T>(pool: &DbPool, f: F) -> Result<T, AppError>
where
    F: FnOnce(&mut PgConnection) -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        f(&mut conn)
    })
    .await?
}
