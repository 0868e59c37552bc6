//! Wire-driver trait for tandem
//!
//! The minimal surface a MySQL client must provide for the connector to
//! sit on top of it. The production implementation lives in
//! [`crate::mysql`]; tests use the scripted driver in [`crate::testing`].

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{QueryOutput, Value};

/// A low-level MySQL session.
///
/// Failures carry the server/client errno inside [`crate::Error`], which
/// is what the connector's reconnect gating inspects.
#[async_trait]
pub trait Driver: Send {
    /// Establish the session. Idempotent: a no-op when already connected.
    async fn connect(&mut self) -> Result<()>;

    /// Execute a statement without parameters (direct query path).
    async fn query(&mut self, sql: &str) -> Result<QueryOutput>;

    /// Execute a statement with parameters (prepare + execute path).
    async fn exec(&mut self, sql: &str, params: &[Value]) -> Result<QueryOutput>;

    /// Whether the session is currently established.
    fn connected(&self) -> bool;

    /// Check the session is alive by sending a ping.
    async fn ping(&mut self) -> Result<()>;

    /// Tear the session down. Idempotent.
    async fn close(&mut self) -> Result<()>;
}
