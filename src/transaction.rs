//! Per-task transaction manager for tandem
//!
//! One [`TransactionManager`] is shared process-wide; everything mutable
//! lives in the caller's [`TaskContext`], so any number of cooperatively
//! scheduled tasks can drive the same manager without observing each
//! other's state.
//!
//! State machine per task:
//!
//! ```text
//! idle ──begin(model)──▶ running(connector, model)
//! running ──command──▶ running      (statement runs on the held connector)
//! running ──commit──▶ idle          (connector returns to the pool)
//! running ──rollback──▶ idle
//! ```
//!
//! A `command` on an idle task is an implicit transaction: the model is
//! inferred from the SQL, the connector is acquired and released around
//! the single statement, and no BEGIN/COMMIT goes over the wire.

use std::sync::Arc;

use tracing::warn;

use crate::connector::{Connector, Role};
use crate::context::TaskContext;
use crate::error::{Error, Result};
use crate::pool::Pool;
use crate::types::{ExecInfo, QueryOutput, Value};

pub(crate) const TX_STATE: &str = "transaction.state";

/// Per-task transaction record, stored in the task's context
#[derive(Default)]
pub(crate) struct TxState {
    pub(crate) connector: Option<Connector>,
    pub(crate) running: bool,
    pub(crate) model: Option<Role>,
    pub(crate) last_exec: ExecInfo,
}

/// Statements whose first keyword routes to the write primary
const WRITE_KEYWORDS: [&str; 9] = [
    "update", "replace", "delete", "insert", "drop", "grant", "truncate", "alter", "create",
];

/// Infer the access model from a statement's first keyword
pub fn infer_role(sql: &str) -> Role {
    let first = sql.trim_start().split_whitespace().next().unwrap_or("");
    if WRITE_KEYWORDS.iter().any(|kw| first.eq_ignore_ascii_case(kw)) {
        Role::Write
    } else {
        Role::Read
    }
}

/// Routes commands onto a pooled connector, one transaction per task
pub struct TransactionManager {
    pool: Arc<Pool>,
}

impl TransactionManager {
    /// Create a manager over a pool
    pub fn new(pool: Arc<Pool>) -> Self {
        Self { pool }
    }

    /// The pool this manager draws from
    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    fn state<'a>(&self, ctx: &'a mut TaskContext) -> &'a mut TxState {
        ctx.get_or_default::<TxState>(TX_STATE)
    }

    /// Whether the task has a transaction running
    pub fn is_running(&self, ctx: &mut TaskContext) -> bool {
        self.state(ctx).running
    }

    /// The task's current access model
    pub fn model(&self, ctx: &mut TaskContext) -> Option<Role> {
        self.state(ctx).model
    }

    /// Set the task's access model for the next transaction.
    ///
    /// Rejected while a transaction is running: the held connector's role
    /// cannot change mid-flight.
    pub fn set_model(&self, ctx: &mut TaskContext, model: Role) -> Result<()> {
        let state = self.state(ctx);
        if state.running {
            return Err(Error::transaction(
                "model is locked while a transaction is running",
            ));
        }
        state.model = Some(model);
        Ok(())
    }

    /// What the driver reported for the task's most recent statement
    pub fn last_exec(&self, ctx: &mut TaskContext) -> ExecInfo {
        self.state(ctx).last_exec.clone()
    }

    /// Start a transaction for the task. Idempotent while running.
    ///
    /// Acquires a connector for `model`; with `implicit` set, no BEGIN
    /// goes over the wire.
    pub async fn begin(&self, ctx: &mut TaskContext, model: Role, implicit: bool) -> Result<()> {
        if self.state(ctx).running {
            return Ok(());
        }

        let mut conn = self.pool.get(model).await.map_err(|err| {
            Error::transaction_with_source("cannot begin: connector acquisition failed", err)
        })?;

        if !implicit {
            if let Err(err) = conn.begin().await {
                self.state(ctx).last_exec = ExecInfo::from_error(&err);
                self.pool.put(conn).await;
                return Err(err);
            }
        }

        let state = self.state(ctx);
        state.last_exec = ExecInfo::default();
        state.model = Some(model);
        state.running = true;
        state.connector = Some(conn);
        Ok(())
    }

    /// Execute a statement for the task.
    ///
    /// Inside a running transaction the statement goes to the held
    /// connector. Otherwise it runs as an implicit transaction: model
    /// inferred from the SQL, connector acquired and released around the
    /// single statement. A failing implicit statement still releases the
    /// connector before the error propagates.
    pub async fn command(
        &self,
        ctx: &mut TaskContext,
        sql: &str,
        params: &[Value],
    ) -> Result<QueryOutput> {
        if self.state(ctx).running {
            return self.run_on_held(ctx, sql, params).await;
        }

        let model = infer_role(sql);
        self.begin(ctx, model, true).await?;
        match self.run_on_held(ctx, sql, params).await {
            Ok(out) => {
                self.commit(ctx, true).await?;
                Ok(out)
            }
            Err(err) => {
                // Force-release through the rollback path; implicit
                // transactions never sent a wire BEGIN, so no ROLLBACK
                // statement is due either.
                self.release(ctx).await;
                Err(err)
            }
        }
    }

    async fn run_on_held(
        &self,
        ctx: &mut TaskContext,
        sql: &str,
        params: &[Value],
    ) -> Result<QueryOutput> {
        let state = self.state(ctx);
        let conn = state
            .connector
            .as_mut()
            .ok_or_else(|| Error::transaction("transaction running without a connector"))?;
        let result = conn.query(sql, params).await;
        state.last_exec = conn.exec_info().clone();
        result
    }

    /// Commit the task's transaction. No-op when none is running.
    ///
    /// With `implicit` set no COMMIT goes over the wire. A failing wire
    /// COMMIT triggers an automatic rollback before the error propagates;
    /// on every path the connector returns to the pool.
    pub async fn commit(&self, ctx: &mut TaskContext, implicit: bool) -> Result<()> {
        if !self.state(ctx).running {
            return Ok(());
        }

        if !implicit {
            let failure = {
                let state = self.state(ctx);
                let conn = state
                    .connector
                    .as_mut()
                    .ok_or_else(|| Error::transaction("transaction running without a connector"))?;
                match conn.commit().await {
                    Ok(_) => None,
                    Err(err) => {
                        warn!(%err, "commit failed, rolling back");
                        let info = conn.exec_info().clone();
                        let _ = conn.rollback().await;
                        Some((err, info))
                    }
                }
            };
            if let Some((err, info)) = failure {
                self.state(ctx).last_exec = info;
                self.release(ctx).await;
                return Err(err);
            }
        }

        self.release(ctx).await;
        Ok(())
    }

    /// Roll the task's transaction back. No-op when none is running; the
    /// wire ROLLBACK is best-effort and its result is discarded.
    pub async fn rollback(&self, ctx: &mut TaskContext) -> Result<()> {
        if !self.state(ctx).running {
            return Ok(());
        }
        if let Some(conn) = self.state(ctx).connector.as_mut() {
            let _ = conn.rollback().await;
        }
        self.release(ctx).await;
        Ok(())
    }

    /// Return the held connector and reset the task's record
    async fn release(&self, ctx: &mut TaskContext) {
        let state = self.state(ctx);
        let conn = state.connector.take();
        state.running = false;
        state.model = None;
        if let Some(conn) = conn {
            self.pool.put(conn).await;
        }
    }

    /// Pull the held connector out for drop-time cleanup, resetting the
    /// task's record. Returns `None` when no transaction is running.
    pub(crate) fn extract_for_drop(ctx: &mut TaskContext) -> Option<Connector> {
        let state = ctx.get_mut::<TxState>(TX_STATE)?;
        if !state.running {
            return None;
        }
        state.running = false;
        state.model = None;
        state.connector.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;
    use crate::testing::MockConnectorBuilder;

    fn manager() -> (TransactionManager, Arc<MockConnectorBuilder>) {
        let builder = Arc::new(MockConnectorBuilder::new());
        let pool = Pool::new(PoolConfig::default().with_size(2), builder.clone());
        (TransactionManager::new(pool), builder)
    }

    #[test]
    fn test_infer_role() {
        assert_eq!(infer_role("SELECT * FROM t"), Role::Read);
        assert_eq!(infer_role("  \n\tselect 1"), Role::Read);
        assert_eq!(infer_role("INSERT INTO t VALUES (1)"), Role::Write);
        assert_eq!(infer_role("UpDaTe t SET a=1"), Role::Write);
        assert_eq!(infer_role("TRUNCATE t"), Role::Write);
        assert_eq!(infer_role("SHOW TABLES"), Role::Read);
        assert_eq!(infer_role(""), Role::Read);
    }

    #[tokio::test]
    async fn test_begin_is_idempotent() {
        let (manager, builder) = manager();
        let mut ctx = TaskContext::new();

        manager.begin(&mut ctx, Role::Write, false).await.unwrap();
        manager.begin(&mut ctx, Role::Write, false).await.unwrap();

        assert!(manager.is_running(&mut ctx));
        assert_eq!(builder.built(Role::Write), 1);
        assert_eq!(builder.script().journal_matching("BEGIN").await.len(), 1);

        manager.rollback(&mut ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_set_model_rejected_while_running() {
        let (manager, _builder) = manager();
        let mut ctx = TaskContext::new();

        manager.set_model(&mut ctx, Role::Read).unwrap();
        assert_eq!(manager.model(&mut ctx), Some(Role::Read));

        manager.begin(&mut ctx, Role::Write, false).await.unwrap();
        let err = manager.set_model(&mut ctx, Role::Read).unwrap_err();
        assert!(err.to_string().contains("locked"));
        // The locked model is still readable
        assert_eq!(manager.model(&mut ctx), Some(Role::Write));

        manager.rollback(&mut ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_rollback_when_idle_is_noop() {
        let (manager, builder) = manager();
        let mut ctx = TaskContext::new();

        manager.rollback(&mut ctx).await.unwrap();
        assert!(!manager.is_running(&mut ctx));
        assert_eq!(builder.built(Role::Read) + builder.built(Role::Write), 0);
    }

    #[tokio::test]
    async fn test_implicit_command_routes_by_keyword() {
        let (manager, builder) = manager();
        let mut ctx = TaskContext::new();

        manager
            .command(&mut ctx, "SELECT * FROM t WHERE id=1", &[])
            .await
            .unwrap();
        assert_eq!(builder.built(Role::Read), 1);
        assert_eq!(builder.built(Role::Write), 0);

        manager
            .command(&mut ctx, "DELETE FROM t WHERE id=1", &[])
            .await
            .unwrap();
        assert_eq!(builder.built(Role::Write), 1);

        // No wire BEGIN/COMMIT for implicit transactions
        assert!(builder.script().journal_matching("BEGIN").await.is_empty());
        assert!(builder.script().journal_matching("COMMIT").await.is_empty());
        assert!(!manager.is_running(&mut ctx));
    }

    #[tokio::test]
    async fn test_implicit_failure_releases_connector() {
        let (manager, builder) = manager();
        builder
            .script()
            .fail_times("INSERT", 1062, "duplicate entry", 1)
            .await;
        let mut ctx = TaskContext::new();

        let err = manager
            .command(&mut ctx, "INSERT INTO t VALUES (1)", &[])
            .await
            .unwrap_err();
        assert_eq!(err.errno(), Some(1062));
        assert!(!manager.is_running(&mut ctx));
        assert_eq!(manager.last_exec(&mut ctx).errno, 1062);
        // Released back to the pool, not leaked
        assert_eq!(manager.pool().idle_count(Role::Write), 1);
    }
}
