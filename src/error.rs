//! Error types for tandem
//!
//! Provides granular error classification for proper retry handling:
//! - Retriable errors (connection, acquisition timeout)
//! - Non-retriable errors (pool closed, fatal acquisition threshold)

use std::fmt;
use thiserror::Error;

/// Result type for tandem operations
pub type Result<T> = std::result::Result<T, Error>;

/// Client-side errno: cannot reach the server (CR_CONNECTION_ERROR).
pub const CR_CONNECTION_ERROR: u16 = 2002;
/// Client-side errno: server has gone away (CR_SERVER_GONE_ERROR).
pub const CR_SERVER_GONE_ERROR: u16 = 2006;
/// Client-side errno: connection lost during query (CR_SERVER_LOST).
pub const CR_SERVER_LOST: u16 = 2013;
/// Server errno: too many connections (ER_CON_COUNT_ERROR).
pub const ER_CON_COUNT_ERROR: u16 = 1040;

/// Errnos after which a connector may reconnect and retry once.
pub const RECONNECT_ERRNOS: [u16; 3] =
    [CR_CONNECTION_ERROR, CR_SERVER_GONE_ERROR, CR_SERVER_LOST];

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Connection establishment or acquisition errors (retriable)
    Connect,
    /// Acquisition timeouts exceeded the fatal threshold (not retriable)
    Fatal,
    /// Operation on a closed pool (not retriable)
    PoolClosed,
    /// Transaction lifecycle errors
    Transaction,
    /// SQL execution failure reported by the server
    Db,
    /// Query or connect wall-clock timeout (retriable)
    Timeout,
    /// Configuration error
    Configuration,
}

impl ErrorCategory {
    /// Whether errors in this category are generally retriable
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Connect | Self::Timeout)
    }
}

/// Main error type for tandem
#[derive(Error, Debug)]
pub enum Error {
    /// Transient acquisition or transport failure.
    ///
    /// `code` carries the MySQL client/server errno when one is known,
    /// 0 for pool-internal acquisition failures.
    #[error("connect error ({code}): {message}")]
    Connect {
        /// MySQL errno, 0 when the failure is pool-internal
        code: u16,
        /// Human-readable description
        message: String,
    },

    /// Consecutive acquisition timeouts exceeded the configured threshold;
    /// the database appears down.
    #[error("connect fatal: {message}")]
    ConnectFatal {
        /// Human-readable description
        message: String,
    },

    /// Operation attempted on a closed pool
    #[error("pool is closed")]
    PoolClosed,

    /// Transaction lifecycle failure (begin without a connector, model
    /// change while running, ...)
    #[error("transaction error: {message}")]
    Transaction {
        /// Human-readable description
        message: String,
        /// Underlying cause, when one exists
        #[source]
        source: Option<Box<Error>>,
    },

    /// SQL execution failure reported by the driver
    #[error("db error ({errno}): {message}")]
    Db {
        /// Server errno
        errno: u16,
        /// Server error text
        message: String,
    },

    /// Query or connect exceeded its wall-clock timeout
    #[error("timeout: {message}")]
    Timeout {
        /// Human-readable description
        message: String,
    },

    /// Configuration error (bad DSN, invalid option)
    #[error("configuration error: {message}")]
    Configuration {
        /// Human-readable description
        message: String,
    },
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connect { .. } => ErrorCategory::Connect,
            Self::ConnectFatal { .. } => ErrorCategory::Fatal,
            Self::PoolClosed => ErrorCategory::PoolClosed,
            Self::Transaction { .. } => ErrorCategory::Transaction,
            Self::Db { .. } => ErrorCategory::Db,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Configuration { .. } => ErrorCategory::Configuration,
        }
    }

    /// Whether this error is retriable
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// The MySQL errno carried by this error, if any
    pub fn errno(&self) -> Option<u16> {
        match self {
            Self::Connect { code, .. } if *code != 0 => Some(*code),
            Self::Db { errno, .. } => Some(*errno),
            _ => None,
        }
    }

    /// Whether a connector seeing this error may reconnect and retry
    pub fn is_reconnectable(&self) -> bool {
        self.errno()
            .map(|no| RECONNECT_ERRNOS.contains(&no))
            .unwrap_or(false)
    }

    /// Create a connect error with an errno
    pub fn connect(code: u16, message: impl Into<String>) -> Self {
        Self::Connect {
            code,
            message: message.into(),
        }
    }

    /// Create a pool-internal connect error (no errno)
    pub fn acquire(message: impl Into<String>) -> Self {
        Self::Connect {
            code: 0,
            message: message.into(),
        }
    }

    /// Create a fatal acquisition error
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::ConnectFatal {
            message: message.into(),
        }
    }

    /// Create a transaction error
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transaction error wrapping its cause
    pub fn transaction_with_source(message: impl Into<String>, source: Error) -> Self {
        Self::Transaction {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a db error
    pub fn db(errno: u16, message: impl Into<String>) -> Self {
        Self::Db {
            errno,
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => write!(f, "connect"),
            Self::Fatal => write!(f, "fatal"),
            Self::PoolClosed => write!(f, "pool_closed"),
            Self::Transaction => write!(f, "transaction"),
            Self::Db => write!(f, "db"),
            Self::Timeout => write!(f, "timeout"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_retriable() {
        assert!(ErrorCategory::Connect.is_retriable());
        assert!(ErrorCategory::Timeout.is_retriable());

        assert!(!ErrorCategory::Fatal.is_retriable());
        assert!(!ErrorCategory::PoolClosed.is_retriable());
        assert!(!ErrorCategory::Db.is_retriable());
    }

    #[test]
    fn test_reconnectable_gating() {
        assert!(Error::db(2002, "refused").is_reconnectable());
        assert!(Error::db(2006, "gone away").is_reconnectable());
        assert!(Error::connect(2013, "lost").is_reconnectable());

        // Semantic failures never trigger a reconnect
        assert!(!Error::db(1062, "duplicate entry").is_reconnectable());
        assert!(!Error::db(1040, "too many connections").is_reconnectable());
        assert!(!Error::acquire("timeout").is_reconnectable());
        assert!(!Error::PoolClosed.is_reconnectable());
    }

    #[test]
    fn test_errno_extraction() {
        assert_eq!(Error::db(1040, "too many").errno(), Some(1040));
        assert_eq!(Error::connect(2002, "refused").errno(), Some(2002));
        assert_eq!(Error::acquire("timeout").errno(), None);
        assert_eq!(Error::PoolClosed.errno(), None);
    }

    #[test]
    fn test_display() {
        let err = Error::db(1064, "syntax error near 'FORM'");
        assert!(err.to_string().contains("1064"));
        assert!(err.to_string().contains("syntax error"));

        assert_eq!(Error::PoolClosed.to_string(), "pool is closed");
    }

    #[test]
    fn test_transaction_source_chain() {
        let cause = Error::acquire("acquire timed out");
        let err = Error::transaction_with_source("begin failed", cause);
        assert_eq!(err.category(), ErrorCategory::Transaction);
        assert!(std::error::Error::source(&err).is_some());
    }
}
