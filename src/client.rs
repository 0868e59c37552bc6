//! Shared entry point for tandem
//!
//! A [`Client`] bundles the two process-wide singletons (pool and
//! transaction manager) and mints per-task [`Query`] façades. Clone it
//! freely; clones share the same pool.

use std::sync::Arc;

use crate::connector::ConnectorBuilder;
use crate::pool::{Pool, PoolConfig, PoolRegistry};
use crate::query::Query;
use crate::transaction::TransactionManager;

/// Shared handle over one pool
#[derive(Clone)]
pub struct Client {
    pool: Arc<Pool>,
    manager: Arc<TransactionManager>,
}

impl Client {
    /// Create a client whose pool is deduplicated through `registry`.
    /// Requesting the same builder key again returns a client sharing the
    /// existing pool.
    pub fn new(
        config: PoolConfig,
        builder: Arc<dyn ConnectorBuilder>,
        registry: &PoolRegistry,
    ) -> Self {
        let pool = registry.get_or_create(config, builder);
        let manager = Arc::new(TransactionManager::new(pool.clone()));
        Self { pool, manager }
    }

    /// Create a client through the process-wide registry
    pub fn with_global_registry(config: PoolConfig, builder: Arc<dyn ConnectorBuilder>) -> Self {
        Self::new(config, builder, PoolRegistry::global())
    }

    /// Mint a per-task query façade over `table`
    pub fn query(&self, table: impl Into<String>) -> Query {
        Query::new(self.manager.clone(), table)
    }

    /// The shared transaction manager
    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    /// The shared pool
    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    /// Close the underlying pool
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").field("pool", &self.pool).finish()
    }
}
