//! Test doubles for tandem
//!
//! A scripted [`MockDriver`] plus a [`MockConnectorBuilder`] that mints
//! mock-backed connectors, so pool/transaction/query behavior can be
//! exercised without a MySQL server. Outcomes are matched by statement
//! prefix; every executed statement lands in a journal.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::connector::{Connector, ConnectorBuilder, ConnectorConfig, Role};
use crate::driver::Driver;
use crate::error::{Error, Result, CR_SERVER_GONE_ERROR};
use crate::types::{QueryOutput, Row, Value};

/// What a scripted statement should produce
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Return result rows
    Rows(Vec<Row>),
    /// Return a write result
    Exec {
        /// Rows affected
        affected_rows: u64,
        /// Generated insert id
        last_insert_id: Option<u64>,
    },
    /// Fail with a typed db error
    Fail {
        /// Errno to report
        errno: u16,
        /// Error text to report
        message: String,
    },
}

#[derive(Debug)]
struct Rule {
    prefix: String,
    outcome: Outcome,
    remaining: Option<usize>,
}

#[derive(Debug, Default)]
struct ScriptInner {
    rules: Vec<Rule>,
    connects: u64,
    connect_failures: VecDeque<(u16, String)>,
    journal: Vec<String>,
}

/// Shared script driving every [`MockDriver`] minted from one builder.
///
/// Rules are matched first-wins by case-insensitive statement prefix;
/// a rule with a use count falls out of rotation once spent. Statements
/// with no matching rule succeed with an empty output.
#[derive(Clone, Default)]
pub struct Script {
    inner: Arc<Mutex<ScriptInner>>,
}

impl Script {
    /// Script an outcome for statements starting with `prefix`
    pub async fn on(&self, prefix: &str, outcome: Outcome) {
        self.inner.lock().await.rules.push(Rule {
            prefix: prefix.to_uppercase(),
            outcome,
            remaining: None,
        });
    }

    /// Script rows for statements starting with `prefix`
    pub async fn rows(&self, prefix: &str, rows: Vec<Row>) {
        self.on(prefix, Outcome::Rows(rows)).await;
    }

    /// Fail the next `times` statements starting with `prefix`, then let
    /// later rules (or the default) take over
    pub async fn fail_times(&self, prefix: &str, errno: u16, message: &str, times: usize) {
        self.inner.lock().await.rules.push(Rule {
            prefix: prefix.to_uppercase(),
            outcome: Outcome::Fail {
                errno,
                message: message.to_string(),
            },
            remaining: Some(times),
        });
    }

    /// Fail the next `times` connect attempts
    pub async fn fail_connects(&self, errno: u16, message: &str, times: usize) {
        let mut inner = self.inner.lock().await;
        for _ in 0..times {
            inner
                .connect_failures
                .push_back((errno, message.to_string()));
        }
    }

    /// Successful connect attempts so far, across all minted drivers
    pub async fn connects(&self) -> u64 {
        self.inner.lock().await.connects
    }

    /// Every statement executed so far, in order
    pub async fn journal(&self) -> Vec<String> {
        self.inner.lock().await.journal.clone()
    }

    /// Statements executed so far that start with `prefix`
    pub async fn journal_matching(&self, prefix: &str) -> Vec<String> {
        let upper = prefix.to_uppercase();
        self.inner
            .lock()
            .await
            .journal
            .iter()
            .filter(|sql| sql.to_uppercase().starts_with(&upper))
            .cloned()
            .collect()
    }

    async fn dispatch(&self, sql: &str) -> Result<QueryOutput> {
        let mut inner = self.inner.lock().await;
        inner.journal.push(sql.to_string());

        let upper = sql.to_uppercase();
        for rule in inner.rules.iter_mut() {
            if rule.remaining == Some(0) || !upper.starts_with(&rule.prefix) {
                continue;
            }
            if let Some(n) = rule.remaining.as_mut() {
                *n -= 1;
            }
            return match &rule.outcome {
                Outcome::Rows(rows) => Ok(QueryOutput::rows(rows.clone())),
                Outcome::Exec {
                    affected_rows,
                    last_insert_id,
                } => Ok(QueryOutput::exec(*affected_rows, *last_insert_id)),
                Outcome::Fail { errno, message } => Err(Error::db(*errno, message.clone())),
            };
        }
        Ok(QueryOutput::empty())
    }
}

/// A scripted wire driver
pub struct MockDriver {
    script: Script,
    connected: bool,
}

impl MockDriver {
    /// Create a driver bound to a script
    pub fn new(script: Script) -> Self {
        Self {
            script,
            connected: false,
        }
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn connect(&mut self) -> Result<()> {
        if self.connected {
            return Ok(());
        }
        let mut inner = self.script.inner.lock().await;
        if let Some((errno, message)) = inner.connect_failures.pop_front() {
            return Err(Error::connect(errno, message));
        }
        inner.connects += 1;
        drop(inner);
        self.connected = true;
        Ok(())
    }

    async fn query(&mut self, sql: &str) -> Result<QueryOutput> {
        if !self.connected {
            return Err(Error::connect(CR_SERVER_GONE_ERROR, "not connected"));
        }
        self.script.dispatch(sql).await
    }

    async fn exec(&mut self, sql: &str, _params: &[Value]) -> Result<QueryOutput> {
        if !self.connected {
            return Err(Error::connect(CR_SERVER_GONE_ERROR, "not connected"));
        }
        self.script.dispatch(sql).await
    }

    fn connected(&self) -> bool {
        self.connected
    }

    async fn ping(&mut self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(Error::connect(CR_SERVER_GONE_ERROR, "not connected"))
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }
}

static MOCK_KEY_SEQ: AtomicUsize = AtomicUsize::new(0);

/// Mints mock-backed connectors sharing one script
pub struct MockConnectorBuilder {
    script: Script,
    config: ConnectorConfig,
    key: String,
    read_built: AtomicUsize,
    write_built: AtomicUsize,
}

impl Default for MockConnectorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnectorBuilder {
    /// Create a builder with a fresh script and a unique registry key
    pub fn new() -> Self {
        let seq = MOCK_KEY_SEQ.fetch_add(1, Ordering::Relaxed);
        Self {
            script: Script::default(),
            config: ConnectorConfig::default(),
            key: format!("mock://pool-{seq}"),
            read_built: AtomicUsize::new(0),
            write_built: AtomicUsize::new(0),
        }
    }

    /// Handle to the shared script
    pub fn script(&self) -> Script {
        self.script.clone()
    }

    /// Connectors built so far for a role
    pub fn built(&self, role: Role) -> usize {
        match role {
            Role::Read => self.read_built.load(Ordering::Relaxed),
            Role::Write => self.write_built.load(Ordering::Relaxed),
        }
    }

    /// Build and connect, for tests that drive a connector directly
    pub async fn connected(&self, role: Role) -> Connector {
        let mut conn = self.build(role).expect("mock build");
        conn.connect().await.expect("mock connect");
        conn
    }
}

impl ConnectorBuilder for MockConnectorBuilder {
    fn build(&self, role: Role) -> Result<Connector> {
        match role {
            Role::Read => self.read_built.fetch_add(1, Ordering::Relaxed),
            Role::Write => self.write_built.fetch_add(1, Ordering::Relaxed),
        };
        Ok(Connector::new(
            Box::new(MockDriver::new(self.script.clone())),
            role,
            &self.config,
        ))
    }

    fn key(&self) -> String {
        self.key.clone()
    }
}
