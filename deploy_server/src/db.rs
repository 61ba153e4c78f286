//! PostgreSQL connection pool (diesel-async + deadpool).

use diesel_async::pooled_connection::deadpool::{Object, Pool};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;

use crate::error::StoreError;

pub type DbPool = Pool<AsyncPgConnection>;
pub type DbConn = Object<AsyncPgConnection>;

/// Build the shared pool.
pub fn create_pool(database_url: &str, max_size: usize) -> anyhow::Result<DbPool> {
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
    Pool::builder(manager)
        .max_size(max_size)
        .build()
        .map_err(|e| anyhow::anyhow!("diesel pool: {e}"))
}

/// Check out a connection, mapping pool errors into the store taxonomy.
pub async fn checkout(pool: &DbPool) -> Result<DbConn, StoreError> {
    pool.get().await.map_err(|e| StoreError::Pool(e.to_string()))
}
