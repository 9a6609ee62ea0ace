//! Database Connection Manager
//!
//! One lazily created pool per environment. Pools are only opened for
//! commands that actually read a live database and are closed before exit.

use crate::config::{EnvironmentConfig, Settings};
use crate::error::AppError;
use crate::introspection::PostgresIntrospector;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_postgres::NoTls;
use tracing::{debug, info};

/// Result of testing a connection
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionTestResult {
    pub environment: String,
    pub latency_ms: u64,
    pub server_version: String,
    pub database: String,
    pub host: String,
}

/// Connection Manager - one pool per environment name
pub struct ConnectionManager {
    settings: Arc<Settings>,
    pools: RwLock<HashMap<String, Pool>>,
    pool_size: usize,
}

impl ConnectionManager {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self {
            settings,
            pools: RwLock::new(HashMap::new()),
            // Commands run sequentially; a couple of slots is plenty
            pool_size: 2,
        }
    }

    /// Pool for `env`, created on first use
    pub async fn pool(&self, env: &str) -> Result<Pool, AppError> {
        if let Some(pool) = self.pools.read().await.get(env) {
            return Ok(pool.clone());
        }

        let config = self.settings.registry().get(env)?.clone();
        let mut pools = self.pools.write().await;
        // Another caller may have won the race between the two locks
        if let Some(pool) = pools.get(env) {
            return Ok(pool.clone());
        }

        let pool = self.create_pool(&config)?;
        debug!("Created pool for {} ({})", env, config.display_string());
        pools.insert(env.to_string(), pool.clone());
        Ok(pool)
    }

    /// Introspector bound to `env` and the configured schema
    pub async fn introspector(&self, env: &str) -> Result<PostgresIntrospector, AppError> {
        let pool = self.pool(env).await?;
        Ok(PostgresIntrospector::new(
            pool,
            env,
            self.settings.introspection.schema.clone(),
            self.settings.migrations.clone(),
        ))
    }

    /// Round-trip a query and report latency plus server version
    pub async fn test_connection(&self, env: &str) -> Result<ConnectionTestResult, AppError> {
        let config = self.settings.registry().get(env)?.clone();
        let introspector = self.introspector(env).await?;

        let start = std::time::Instant::now();
        let server_version = introspector.server_version().await?;
        let latency = start.elapsed();

        info!("✅ Connected to {} ({} ms)", config.display_string(), latency.as_millis());

        Ok(ConnectionTestResult {
            environment: env.to_string(),
            latency_ms: latency.as_millis() as u64,
            server_version,
            database: config.database,
            host: config.host,
        })
    }

    pub async fn close_all(&self) {
        let mut pools = self.pools.write().await;
        for (env, pool) in pools.drain() {
            pool.close();
            debug!("Closed pool for {}", env);
        }
    }

    fn create_pool(&self, env: &EnvironmentConfig) -> Result<Pool, AppError> {
        let mut cfg = Config::new();
        cfg.host = Some(env.host.clone());
        cfg.port = Some(env.port);
        cfg.user = Some(env.user.clone());
        cfg.password = Some(env.password.clone());
        cfg.dbname = Some(env.database.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(deadpool_postgres::PoolConfig::new(self.pool_size));

        if env.tls {
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
                .map_err(|e| AppError::Config(format!("Failed to create TLS pool for {}: {}", env.name, e)))
        } else {
            cfg.create_pool(Some(Runtime::Tokio1), NoTls)
                .map_err(|e| AppError::Config(format!("Failed to create pool for {}: {}", env.name, e)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pools_are_lazy_and_cached() {
        let manager = ConnectionManager::new(Arc::new(Settings::default()));
        assert!(manager.pools.read().await.is_empty());

        manager.pool("dev").await.unwrap();
        manager.pool("dev").await.unwrap();
        assert_eq!(manager.pools.read().await.len(), 1);

        manager.introspector("prod").await.unwrap();
        assert_eq!(manager.pools.read().await.len(), 2);

        manager.close_all().await;
        assert!(manager.pools.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_environment() {
        let manager = ConnectionManager::new(Arc::new(Settings::default()));
        let err = manager.pool("staging").await.unwrap_err();
        assert!(matches!(err, AppError::UnknownEnvironment(name) if name == "staging"));
    }
}
