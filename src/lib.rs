//! # tandem
//!
//! A read/write-split MySQL client core for cooperative-multitasking
//! servers: a bounded dual-channel connection pool, a transaction manager
//! whose state is isolated per task, and a fluent query façade.
//!
//! ## Features
//!
//! - **Read/write splitting**: reads draw from the replica pool, writes
//!   from the primary pool; implicit statements route by SQL keyword
//! - **Bounded growth**: each role grows to a hard ceiling, after which
//!   acquirers wait with a timeout; repeated timeouts turn fatal
//! - **Self-healing**: transport failures reconnect once outside
//!   transactions; a reaper evicts idle-expired connectors
//! - **Per-task isolation**: one shared [`Client`], per-task [`Query`]
//!   façades; transaction and builder state never leak across tasks
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tandem::prelude::*;
//!
//! let write = ConnectorConfig::from_url("mysql://app:pw@primary:3306/shop")?;
//! let read = ConnectorConfig::from_url("mysql://app:pw@replica:3306/shop")?;
//! let client = Client::with_global_registry(
//!     PoolConfig::default(),
//!     Arc::new(MySqlConnectorBuilder::new(write, read)),
//! );
//!
//! // Implicit read transaction on a replica connection
//! let mut q = client.query("users");
//! let user = q.where_("id = 1").one().await?;
//!
//! // Explicit write transaction on one primary connection
//! q.begin(Role::Write).await?;
//! q.execute("INSERT INTO users (name) VALUES (?)", vec!["ada".into()]).await?;
//! q.execute("UPDATE users SET active = 1 WHERE id = ?", vec![q.last_insert_id().into()]).await?;
//! q.commit().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod client;
pub mod connector;
pub mod context;
pub mod driver;
pub mod error;
pub mod mysql;
pub mod pool;
pub mod query;
pub mod testing;
pub mod transaction;
pub mod types;

/// Prelude module for convenient imports
pub mod prelude {
    // Error types
    pub use crate::error::{Error, ErrorCategory, Result};

    // Value and type system
    pub use crate::types::{ExecInfo, QueryOutput, Row, Value};

    // Connector types
    pub use crate::connector::{
        Connector, ConnectorBuilder, ConnectorConfig, ConnectorInfo, Role, Status,
    };

    // Driver seam
    pub use crate::driver::Driver;
    pub use crate::mysql::{MySqlConnectorBuilder, MySqlDriver};

    // Pool types
    pub use crate::pool::{AtomicPoolStats, Pool, PoolConfig, PoolRegistry, PoolStats};

    // Task-scoped state
    pub use crate::context::TaskContext;

    // Transaction and query surface
    pub use crate::client::Client;
    pub use crate::query::{Page, Query, Section};
    pub use crate::transaction::{infer_role, TransactionManager};
}

// Re-export commonly used items at crate root
pub use client::Client;
pub use connector::Role;
pub use error::{Error, Result};
pub use types::Value;
