//! MySQL wire driver for tandem
//!
//! Implements [`Driver`] over `mysql_async`:
//! - Session lifecycle (connect, ping, disconnect)
//! - Direct and prepared statement execution
//! - Value conversion both ways
//! - Errno mapping so the connector's reconnect gating sees real codes

use async_trait::async_trait;
use chrono::{Datelike, Timelike};
use mysql_async::prelude::*;
use mysql_async::{Conn, OptsBuilder};

use crate::connector::{Connector, ConnectorBuilder, ConnectorConfig, Role};
use crate::driver::Driver;
use crate::error::{Error, Result, CR_SERVER_GONE_ERROR, CR_SERVER_LOST};
use crate::types::{QueryOutput, Row, Value};

/// Convert a tandem value to a MySQL parameter
fn value_to_sql(value: &Value) -> mysql_async::Value {
    match value {
        Value::Null => mysql_async::Value::NULL,
        Value::Bool(b) => mysql_async::Value::from(*b),
        Value::Int64(n) => mysql_async::Value::from(*n),
        Value::UInt64(n) => mysql_async::Value::from(*n),
        Value::Float32(n) => mysql_async::Value::from(*n),
        Value::Float64(n) => mysql_async::Value::from(*n),
        Value::Decimal(d) => mysql_async::Value::from(d.to_string()),
        Value::String(s) => mysql_async::Value::from(s.clone()),
        Value::Bytes(b) => mysql_async::Value::from(b.clone()),
        Value::Date(d) => {
            mysql_async::Value::Date(d.year() as u16, d.month() as u8, d.day() as u8, 0, 0, 0, 0)
        }
        Value::Time(t) => mysql_async::Value::Time(
            false,
            0,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
            t.nanosecond() / 1000,
        ),
        Value::DateTime(dt) => mysql_async::Value::Date(
            dt.year() as u16,
            dt.month() as u8,
            dt.day() as u8,
            dt.hour() as u8,
            dt.minute() as u8,
            dt.second() as u8,
            dt.nanosecond() / 1000,
        ),
        Value::Json(j) => mysql_async::Value::from(j.to_string()),
        Value::Uuid(u) => mysql_async::Value::from(u.to_string()),
    }
}

/// Convert a MySQL value to a tandem value
fn mysql_value_to_value(val: mysql_async::Value) -> Value {
    match val {
        mysql_async::Value::NULL => Value::Null,
        mysql_async::Value::Bytes(b) => match String::from_utf8(b) {
            Ok(s) => Value::String(s),
            Err(err) => Value::Bytes(err.into_bytes()),
        },
        mysql_async::Value::Int(n) => Value::Int64(n),
        mysql_async::Value::UInt(n) => Value::UInt64(n),
        mysql_async::Value::Float(f) => Value::Float32(f),
        mysql_async::Value::Double(d) => Value::Float64(d),
        mysql_async::Value::Date(year, month, day, hour, min, sec, micro) => {
            let date = chrono::NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), u32::from(day));
            let time = chrono::NaiveTime::from_hms_micro_opt(
                u32::from(hour),
                u32::from(min),
                u32::from(sec),
                micro,
            );
            match (date, time) {
                (Some(d), _) if hour == 0 && min == 0 && sec == 0 && micro == 0 => Value::Date(d),
                (Some(d), Some(t)) => Value::DateTime(chrono::NaiveDateTime::new(d, t)),
                _ => Value::Null,
            }
        }
        mysql_async::Value::Time(neg, days, hour, min, sec, micro) => {
            if neg || days > 0 {
                // Out of NaiveTime's range; callers needing raw durations
                // should select seconds instead.
                Value::Null
            } else {
                chrono::NaiveTime::from_hms_micro_opt(
                    u32::from(hour),
                    u32::from(min),
                    u32::from(sec),
                    micro,
                )
                .map(Value::Time)
                .unwrap_or(Value::Null)
            }
        }
    }
}

/// Map a `mysql_async` failure to a typed error with its errno
fn map_err(err: mysql_async::Error) -> Error {
    match err {
        mysql_async::Error::Server(e) => Error::db(e.code, e.message),
        mysql_async::Error::Io(e) => Error::connect(CR_SERVER_LOST, e.to_string()),
        other => Error::connect(CR_SERVER_GONE_ERROR, other.to_string()),
    }
}

fn row_from_mysql(row: mysql_async::Row) -> Row {
    let columns: Vec<String> = row
        .columns_ref()
        .iter()
        .map(|c| c.name_str().to_string())
        .collect();
    let values: Vec<Value> = (0..row.len())
        .map(|i| {
            let val: mysql_async::Value = row.get(i).unwrap_or(mysql_async::Value::NULL);
            mysql_value_to_value(val)
        })
        .collect();
    Row::new(columns, values)
}

/// [`Driver`] implementation over `mysql_async`
pub struct MySqlDriver {
    config: ConnectorConfig,
    conn: Option<Conn>,
}

impl MySqlDriver {
    /// Create an unconnected driver for one endpoint
    pub fn new(config: ConnectorConfig) -> Self {
        Self { config, conn: None }
    }

    fn opts(&self) -> OptsBuilder {
        let db_name = (!self.config.database.is_empty()).then(|| self.config.database.clone());
        OptsBuilder::default()
            .ip_or_hostname(self.config.host.clone())
            .tcp_port(self.config.port)
            .user(Some(self.config.user.clone()))
            .pass(Some(self.config.password.clone()))
            .db_name(db_name)
            .init(vec![format!("SET NAMES {}", self.config.charset)])
    }

    fn conn_mut(&mut self) -> Result<&mut Conn> {
        self.conn
            .as_mut()
            .ok_or_else(|| Error::connect(CR_SERVER_GONE_ERROR, "not connected"))
    }

    fn output(conn: &Conn, rows: Vec<mysql_async::Row>) -> QueryOutput {
        QueryOutput {
            rows: rows.into_iter().map(row_from_mysql).collect(),
            affected_rows: conn.affected_rows(),
            last_insert_id: conn.last_insert_id(),
        }
    }
}

#[async_trait]
impl Driver for MySqlDriver {
    async fn connect(&mut self) -> Result<()> {
        if self.conn.is_some() {
            return Ok(());
        }
        let conn = Conn::new(self.opts()).await.map_err(map_err)?;
        self.conn = Some(conn);
        Ok(())
    }

    async fn query(&mut self, sql: &str) -> Result<QueryOutput> {
        let conn = self.conn_mut()?;
        let rows: Vec<mysql_async::Row> = conn.query(sql).await.map_err(map_err)?;
        Ok(Self::output(conn, rows))
    }

    async fn exec(&mut self, sql: &str, params: &[Value]) -> Result<QueryOutput> {
        let conn = self.conn_mut()?;
        let mysql_params: Vec<mysql_async::Value> = params.iter().map(value_to_sql).collect();
        let rows: Vec<mysql_async::Row> = conn.exec(sql, mysql_params).await.map_err(map_err)?;
        Ok(Self::output(conn, rows))
    }

    fn connected(&self) -> bool {
        self.conn.is_some()
    }

    async fn ping(&mut self) -> Result<()> {
        self.conn_mut()?.ping().await.map_err(map_err)
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.disconnect().await.map_err(map_err)?;
        }
        Ok(())
    }
}

/// Mints MySQL connectors: reads go to the replica endpoint, writes to
/// the primary.
pub struct MySqlConnectorBuilder {
    write: ConnectorConfig,
    read: ConnectorConfig,
}

impl MySqlConnectorBuilder {
    /// Create a builder with distinct primary and replica endpoints
    pub fn new(write: ConnectorConfig, read: ConnectorConfig) -> Self {
        Self { write, read }
    }

    /// Create a builder pointing both roles at one endpoint
    pub fn single(config: ConnectorConfig) -> Self {
        Self {
            read: config.clone(),
            write: config,
        }
    }

    fn config_for(&self, role: Role) -> &ConnectorConfig {
        match role {
            Role::Read => &self.read,
            Role::Write => &self.write,
        }
    }
}

impl ConnectorBuilder for MySqlConnectorBuilder {
    fn build(&self, role: Role) -> Result<Connector> {
        let config = self.config_for(role);
        Ok(Connector::new(
            Box::new(MySqlDriver::new(config.clone())),
            role,
            config,
        ))
    }

    fn key(&self) -> String {
        format!("{}|{}", self.write.key(), self.read.key())
    }
}
