//! SQL dialect quirks and DSN parsing.
//!
//! The engine runs on PostgreSQL in production and SQLite for development.
//! Statements are rendered per dialect by the template registry; this
//! module concentrates every place the two disagree.
use crate::error::{Error, Result};

/// The database flavor behind a factory
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dialect {
    /// SQLite, for development and tests
    Sqlite,
    /// PostgreSQL, the production target
    Postgres,
}

impl Dialect {
    /// Positional bind placeholder for 1-based position `n`
    pub(crate) fn placeholder(&self, n: usize) -> String {
        match self {
            Dialect::Sqlite => "?".to_string(),
            Dialect::Postgres => format!("${n}"),
        }
    }

    /// Column clause for the autoincrementing 64-bit primary key
    pub(crate) fn autoincrement_pk(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
            Dialect::Postgres => "BIGSERIAL PRIMARY KEY",
        }
    }

    /// Row-lock suffix for reads inside write transactions.
    ///
    /// SQLite serializes writers natively, so no suffix is needed there.
    pub(crate) fn for_update(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "",
            Dialect::Postgres => " FOR UPDATE",
        }
    }

    /// Query returning one row per existing column of `table`, with the
    /// column name under the alias `name`
    pub(crate) fn columns_query(&self, table: &str) -> (String, Option<String>) {
        match self {
            Dialect::Sqlite => (format!("PRAGMA table_info(\"{table}\")"), None),
            Dialect::Postgres => (
                format!(
                    "SELECT column_name AS name FROM information_schema.columns WHERE table_name = {}",
                    self.placeholder(1)
                ),
                Some(table.to_string()),
            ),
        }
    }
}

/// A parsed data source name
#[derive(Clone, Debug)]
pub struct Dsn {
    /// The dialect the DSN addresses
    pub dialect: Dialect,
    /// The connection url handed to the pool
    pub url: String,
    /// Whether this is an in-memory SQLite database (pinned to one
    /// connection so it survives for the factory's lifetime)
    pub in_memory: bool,
}

/// Parse a `sqlite://<path>` or `postgres://…` DSN.
///
/// `postgresql://` is accepted as an alias for `postgres://`.
pub fn parse_dsn(dsn: &str) -> Result<Dsn> {
    if let Some(path) = dsn.strip_prefix("sqlite://") {
        let in_memory = path == ":memory:" || path.is_empty();
        let url = if in_memory {
            "sqlite::memory:".to_string()
        } else {
            // mode=rwc creates the file on first open
            format!("sqlite://{path}?mode=rwc")
        };
        return Ok(Dsn {
            dialect: Dialect::Sqlite,
            url,
            in_memory,
        });
    }
    if dsn.starts_with("postgres://") {
        return Ok(Dsn {
            dialect: Dialect::Postgres,
            url: dsn.to_string(),
            in_memory: false,
        });
    }
    if let Some(rest) = dsn.strip_prefix("postgresql://") {
        return Ok(Dsn {
            dialect: Dialect::Postgres,
            url: format!("postgres://{rest}"),
            in_memory: false,
        });
    }
    Err(Error::Invalid(format!(
        "unsupported DSN {dsn:?}: expected sqlite:// or postgres://"
    )))
}
