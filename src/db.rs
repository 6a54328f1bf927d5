//! Database connection management
//!
//! Handles connection pooling and the session seam every schema and
//! execution path goes through. A session is one physical connection
//! borrowed from the pool; dropping it hands it back, `discard` closes it.

pub mod queries;

use crate::config::DatabaseConfig;
use crate::error::AppError;
use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use postgres_types::ToSql;
use tokio_postgres::{NoTls, Row, SimpleQueryMessage};
use tracing::info;

/// One row of a simple-protocol result, every cell in text form
pub type TextRow = Vec<Option<String>>;

/// Read-only metadata access used by fingerprinting and introspection
#[async_trait]
pub trait MetadataQueryer: Send + Sync {
    async fn text_rows(&self, sql: &str) -> Result<Vec<TextRow>, AppError>;
}

/// A physical connection checked out of the pool
#[async_trait]
pub trait PooledSession: MetadataQueryer {
    /// Run one or more statements without results (SET ROLE, BEGIN, ...)
    async fn batch(&self, sql: &str) -> Result<(), AppError>;

    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Vec<Row>, AppError>;

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<u64, AppError>;

    /// Close the physical connection instead of returning it to the pool
    fn discard(self: Box<Self>);
}

/// Hands out dedicated sessions, one per logical operation
#[async_trait]
pub trait SessionSource: Send + Sync {
    async fn acquire(&self) -> Result<Box<dyn PooledSession>, AppError>;
}

#[async_trait]
impl MetadataQueryer for deadpool_postgres::Object {
    async fn text_rows(&self, sql: &str) -> Result<Vec<TextRow>, AppError> {
        let client: &tokio_postgres::Client = self;
        let messages = client.simple_query(sql).await?;

        Ok(messages
            .iter()
            .filter_map(|message| match message {
                SimpleQueryMessage::Row(row) => Some(
                    (0..row.len())
                        .map(|i| row.get(i).map(str::to_string))
                        .collect(),
                ),
                _ => None,
            })
            .collect())
    }
}

#[async_trait]
impl PooledSession for deadpool_postgres::Object {
    async fn batch(&self, sql: &str) -> Result<(), AppError> {
        let client: &tokio_postgres::Client = self;
        client.batch_execute(sql).await?;
        Ok(())
    }

    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Vec<Row>, AppError> {
        let client: &tokio_postgres::Client = self;
        Ok(client.query(sql, params).await?)
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<u64, AppError> {
        let client: &tokio_postgres::Client = self;
        Ok(client.execute(sql, params).await?)
    }

    fn discard(self: Box<Self>) {
        // Detaching drops the client, which closes the connection
        drop(deadpool_postgres::Object::take(*self));
    }
}

#[async_trait]
impl SessionSource for Pool {
    async fn acquire(&self) -> Result<Box<dyn PooledSession>, AppError> {
        let client = self.get().await?;
        Ok(Box::new(client))
    }
}

/// Create the connection pool for the configured database
pub fn create_pool(config: &DatabaseConfig) -> Result<Pool, AppError> {
    let mut cfg = Config::new();
    cfg.host = Some(config.host.clone());
    cfg.port = Some(config.port);
    cfg.user = Some(config.user.clone());
    cfg.password = Some(config.password.clone());
    cfg.dbname = Some(config.database.clone());
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    cfg.pool = Some(PoolConfig::new(config.max_pool_size));

    if config.require_tls {
        let certs = rustls_native_certs::load_native_certs();
        let mut root_store = rustls::RootCertStore::empty();
        for cert in certs.certs {
            root_store.add(cert).ok();
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);

        cfg.create_pool(Some(Runtime::Tokio1), tls)
            .map_err(|e| AppError::Config(format!("Failed to create TLS pool: {}", e)))
    } else {
        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| AppError::Config(format!("Failed to create pool: {}", e)))
    }
}

/// Check that the pool can hand out a working connection
pub async fn verify_pool(pool: &Pool) -> Result<(), AppError> {
    let client = pool.get().await?;
    client.query_one("SELECT 1", &[]).await?;
    info!("Database connection verified ({} max connections)", pool.status().max_size);
    Ok(())
}
