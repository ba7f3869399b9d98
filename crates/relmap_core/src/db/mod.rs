//! SQLite session bootstrap and schema migration entry points.
//!
//! # Responsibility
//! - Open and configure SQLite sessions for relmap callers.
//! - Diff registered descriptors against the live schema and apply additive
//!   migrations.
//!
//! # Invariants
//! - Returned sessions honor `SessionConfig` pragmas before first use.
//! - Migrations never drop columns or narrow types.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrate;
mod open;
mod session;

pub use open::{open_session, open_session_in_memory};
pub use session::Session;

pub type DbResult<T> = Result<T, DbError>;

/// Storage transport errors, free of any model context.
#[derive(Debug)]
pub enum DbError {
    /// Connection could not be opened.
    Open(rusqlite::Error),
    /// Connection opened but pragma setup failed.
    Bootstrap(rusqlite::Error),
    /// Statement preparation or execution failed.
    Sqlite(rusqlite::Error),
}

impl DbError {
    /// Returns the underlying SQLite error.
    pub fn sqlite_error(&self) -> &rusqlite::Error {
        match self {
            Self::Open(err) | Self::Bootstrap(err) | Self::Sqlite(err) => err,
        }
    }
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open(err) => write!(f, "failed to open database: {err}"),
            Self::Bootstrap(err) => write!(f, "failed to configure database session: {err}"),
            Self::Sqlite(err) => write!(f, "{err}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.sqlite_error())
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
