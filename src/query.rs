//! Query façade for tandem
//!
//! A fluent builder over the per-task transaction manager. Builder state
//! lives in the task's [`TaskContext`], and multi-step operations that
//! suspend at the network boundary (pagination runs count + select)
//! snapshot and restore it through a stash keyed on the same context, so
//! concurrent tasks never observe each other's predicates.

use std::sync::Arc;

use tracing::warn;

use crate::connector::Role;
use crate::context::TaskContext;
use crate::error::Result;
use crate::transaction::{TransactionManager, TxState, TX_STATE};
use crate::types::{QueryOutput, Row, Value};

const BUILDER_STATE: &str = "query.builder";
const STASH: &str = "query.stash";

/// Builder sections addressable by [`Query::reset`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    /// Everything
    All,
    /// SELECT expression list
    Fields,
    /// WHERE predicates and their bound parameters
    Where,
    /// ORDER BY expression
    Order,
    /// GROUP BY expression
    Group,
    /// LIMIT / OFFSET
    Limit,
}

/// Mutable builder state, one instance per task
#[derive(Debug, Clone, Default, PartialEq)]
struct BuilderState {
    fields: Option<String>,
    wheres: Vec<String>,
    params: Vec<Value>,
    order: Option<String>,
    group: Option<String>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl BuilderState {
    fn reset(&mut self, section: Section) {
        match section {
            Section::All => *self = Self::default(),
            Section::Fields => self.fields = None,
            Section::Where => {
                self.wheres.clear();
                self.params.clear();
            }
            Section::Order => self.order = None,
            Section::Group => self.group = None,
            Section::Limit => {
                self.limit = None;
                self.offset = None;
            }
        }
    }

    fn compile(&self, table: &str) -> (String, Vec<Value>) {
        let mut sql = format!(
            "SELECT {} FROM `{}`",
            self.fields.as_deref().unwrap_or("*"),
            table
        );
        if !self.wheres.is_empty() {
            let conds: Vec<String> = self.wheres.iter().map(|c| format!("({c})")).collect();
            sql.push_str(" WHERE ");
            sql.push_str(&conds.join(" AND "));
        }
        if let Some(group) = &self.group {
            sql.push_str(" GROUP BY ");
            sql.push_str(group);
        }
        if let Some(order) = &self.order {
            sql.push_str(" ORDER BY ");
            sql.push_str(order);
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
        (sql, self.params.clone())
    }
}

/// Snapshot taken before a multi-step operation rewrites the builder
struct Stash {
    builder: BuilderState,
    model: Option<Role>,
}

/// One page of results
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// Total rows matching the predicates, ignoring LIMIT/OFFSET
    pub total: u64,
    /// The requested page
    pub data: Vec<Row>,
}

/// Fluent query façade bound to one task.
///
/// Mint one per task from [`Client::query`](crate::client::Client::query);
/// the pool and transaction manager behind it are the shared singletons.
pub struct Query {
    manager: Arc<TransactionManager>,
    ctx: TaskContext,
    table: String,
}

impl Query {
    /// Create a façade over `table`
    pub fn new(manager: Arc<TransactionManager>, table: impl Into<String>) -> Self {
        Self {
            manager,
            ctx: TaskContext::new(),
            table: table.into(),
        }
    }

    fn builder_mut(&mut self) -> &mut BuilderState {
        self.ctx.get_or_default::<BuilderState>(BUILDER_STATE)
    }

    fn compile(&mut self) -> (String, Vec<Value>) {
        let table = self.table.clone();
        self.builder_mut().compile(&table)
    }

    /// Set the SELECT expression list
    pub fn fields(&mut self, expr: impl Into<String>) -> &mut Self {
        self.builder_mut().fields = Some(expr.into());
        self
    }

    /// Add a WHERE predicate (ANDed with earlier ones)
    pub fn where_(&mut self, cond: impl Into<String>) -> &mut Self {
        self.builder_mut().wheres.push(cond.into());
        self
    }

    /// Add a WHERE predicate with bound parameters
    pub fn where_bind(&mut self, cond: impl Into<String>, params: Vec<Value>) -> &mut Self {
        let builder = self.builder_mut();
        builder.wheres.push(cond.into());
        builder.params.extend(params);
        self
    }

    /// Set the ORDER BY expression
    pub fn order_by(&mut self, expr: impl Into<String>) -> &mut Self {
        self.builder_mut().order = Some(expr.into());
        self
    }

    /// Set the GROUP BY expression
    pub fn group_by(&mut self, expr: impl Into<String>) -> &mut Self {
        self.builder_mut().group = Some(expr.into());
        self
    }

    /// Set LIMIT
    pub fn limit(&mut self, n: u64) -> &mut Self {
        self.builder_mut().limit = Some(n);
        self
    }

    /// Set OFFSET
    pub fn offset(&mut self, n: u64) -> &mut Self {
        self.builder_mut().offset = Some(n);
        self
    }

    /// Clear a builder section
    pub fn reset(&mut self, section: Section) -> &mut Self {
        self.builder_mut().reset(section);
        self
    }

    /// The SQL and parameters the current builder state compiles to,
    /// without executing or resetting anything
    pub fn raw_sql(&mut self) -> (String, Vec<Value>) {
        self.compile()
    }

    /// Snapshot builder state and model ahead of a multi-step operation
    fn stash(&mut self) {
        let builder = self.builder_mut().clone();
        let model = self.manager.model(&mut self.ctx);
        self.ctx.set(STASH, Stash { builder, model });
    }

    /// Restore the stashed builder state and model
    fn stash_apply(&mut self) {
        if let Some(stash) = self.ctx.take::<Stash>(STASH) {
            self.ctx.set(BUILDER_STATE, stash.builder);
            if let Some(model) = stash.model {
                // Rejected while a transaction runs; the model is pinned
                // by the held connector then anyway.
                let _ = self.manager.set_model(&mut self.ctx, model);
            }
        }
    }

    fn clear_stash(&mut self) {
        let _ = self.ctx.take::<Stash>(STASH);
    }

    /// Compile, execute, and return all rows. The builder resets
    /// afterwards, success or not.
    pub async fn list(&mut self) -> Result<Vec<Row>> {
        let (sql, params) = self.compile();
        let result = self.manager.command(&mut self.ctx, &sql, &params).await;
        self.reset(Section::All);
        Ok(result?.rows)
    }

    /// Execute with `LIMIT 1` and return the first row, if any
    pub async fn one(&mut self) -> Result<Option<Row>> {
        self.limit(1);
        let rows = self.list().await?;
        Ok(rows.into_iter().next())
    }

    /// Return the first column of the first row, if any
    pub async fn column(&mut self) -> Result<Option<Value>> {
        let row = self.one().await?;
        Ok(row.and_then(|r| r.get(0).cloned()))
    }

    /// Run a paginated query: a count over the current predicates, then
    /// the page itself with the caller's LIMIT/OFFSET restored.
    pub async fn page(&mut self) -> Result<Page> {
        self.stash();
        {
            let builder = self.builder_mut();
            builder.fields = Some("count(*) as cnt".into());
            builder.limit = None;
            builder.offset = None;
        }

        let (sql, params) = self.compile();
        let counted = self.manager.command(&mut self.ctx, &sql, &params).await;
        let total = match counted {
            Ok(out) => out
                .rows
                .first()
                .and_then(|row| row.get(0))
                .and_then(Value::as_u64)
                .unwrap_or(0),
            Err(err) => {
                self.clear_stash();
                self.reset(Section::All);
                return Err(err);
            }
        };

        if total == 0 {
            self.clear_stash();
            self.reset(Section::All);
            return Ok(Page::default());
        }

        self.stash_apply();
        let data = self.list().await?;
        Ok(Page { total, data })
    }

    /// Execute a statement.
    ///
    /// An empty `sql` compiles the statement from the builder state
    /// (which then resets); otherwise the supplied prepared SQL and
    /// parameters run as-is.
    pub async fn execute(&mut self, sql: &str, params: Vec<Value>) -> Result<QueryOutput> {
        if sql.is_empty() {
            let (compiled, compiled_params) = self.compile();
            self.reset(Section::All);
            self.manager
                .command(&mut self.ctx, &compiled, &compiled_params)
                .await
        } else {
            self.manager.command(&mut self.ctx, sql, &params).await
        }
    }

    /// Start an explicit transaction on this task
    pub async fn begin(&mut self, model: Role) -> Result<()> {
        self.manager.begin(&mut self.ctx, model, false).await
    }

    /// Commit this task's transaction
    pub async fn commit(&mut self) -> Result<()> {
        self.manager.commit(&mut self.ctx, false).await
    }

    /// Roll this task's transaction back
    pub async fn rollback(&mut self) -> Result<()> {
        self.manager.rollback(&mut self.ctx).await
    }

    /// Set the access model for the next transaction
    pub fn set_model(&mut self, model: Role) -> Result<()> {
        self.manager.set_model(&mut self.ctx, model)
    }

    /// The task's current access model
    pub fn model(&mut self) -> Option<Role> {
        self.manager.model(&mut self.ctx)
    }

    /// Whether this task has a transaction running
    pub fn is_running(&mut self) -> bool {
        self.manager.is_running(&mut self.ctx)
    }

    fn exec_info_field<T>(&self, read: impl Fn(&TxState) -> T, fallback: T) -> T {
        self.ctx
            .get::<TxState>(TX_STATE)
            .map(|state| read(state))
            .unwrap_or(fallback)
    }

    /// Insert id of the most recent statement
    pub fn last_insert_id(&self) -> Option<u64> {
        self.exec_info_field(|s| s.last_exec.insert_id, None)
    }

    /// Error text of the most recent failure
    pub fn last_error(&self) -> Option<String> {
        self.exec_info_field(|s| s.last_exec.error.clone(), None)
    }

    /// Errno of the most recent failure, 0 when it succeeded
    pub fn last_error_no(&self) -> u16 {
        self.exec_info_field(|s| s.last_exec.errno, 0)
    }

    /// Affected rows of the most recent statement
    pub fn affected_rows(&self) -> u64 {
        self.exec_info_field(|s| s.last_exec.affected_rows, 0)
    }
}

impl Drop for Query {
    fn drop(&mut self) {
        // A task that aborts mid-transaction must not leak its connector:
        // roll back best-effort and hand it back to the pool.
        if let Some(mut conn) = TransactionManager::extract_for_drop(&mut self.ctx) {
            let pool = self.manager.pool().clone();
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        let _ = conn.rollback().await;
                        pool.put(conn).await;
                    });
                }
                Err(_) => {
                    warn!("query dropped mid-transaction outside a runtime, connector lost");
                }
            }
        }
    }
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query").field("table", &self.table).finish()
    }
}
