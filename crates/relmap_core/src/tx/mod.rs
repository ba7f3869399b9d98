//! Transaction manager and the executor seam shared by all operations.
//!
//! # Responsibility
//! - Give mapper, resolver and migration calls one explicit argument naming
//!   where they run: a session or a transaction.
//! - Enforce the `Active -> Committed | RolledBack` handle lifecycle.
//!
//! # Invariants
//! - A terminal handle rejects every operation with `TransactionClosed`.
//! - A failed commit leaves the handle `RolledBack`.
//! - Handles are flat; nesting is impossible because `begin` borrows the
//!   session mutably.

use crate::db::DbError;
use crate::error::{OrmError, OrmResult};
use log::{error, info, warn};
use rusqlite::Connection;
use std::cell::Cell;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Target of a data-layer operation.
pub trait Executor {
    /// Connection to run statements on, or `TransactionClosed`.
    fn connection(&self) -> OrmResult<&Connection>;

    /// Requests that the enclosing unit of work cannot commit.
    ///
    /// Returns `false` when there is no transaction to mark.
    fn mark_rollback_only(&self) -> bool {
        false
    }
}

/// Transaction handle lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committed,
    RolledBack,
}

impl TxState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl Display for TxState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Active => "active",
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
        })
    }
}

/// Why a commit did not happen.
#[derive(Debug)]
pub enum CommitFailure {
    /// Storage refused the commit.
    Storage(DbError),
    /// An after-hook marked the transaction rollback-only.
    RollbackOnly,
}

impl Display for CommitFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Storage(err) => write!(f, "{err}"),
            Self::RollbackOnly => write!(f, "transaction was marked rollback-only"),
        }
    }
}

impl Error for CommitFailure {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Storage(err) => Some(err),
            Self::RollbackOnly => None,
        }
    }
}

/// Scoped, single-use unit of atomic work bound to one session.
pub struct Transaction<'s> {
    inner: Option<rusqlite::Transaction<'s>>,
    state: TxState,
    rollback_only: Cell<bool>,
}

impl<'s> Transaction<'s> {
    pub(crate) fn new(inner: rusqlite::Transaction<'s>) -> Self {
        Self {
            inner: Some(inner),
            state: TxState::Active,
            rollback_only: Cell::new(false),
        }
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only.get()
    }

    /// Commits all operations run through this handle.
    ///
    /// # Errors
    /// - `TransactionClosed` when the handle is already terminal.
    /// - `Commit` when storage refuses or the handle is rollback-only; the
    ///   handle is `RolledBack` afterwards.
    pub fn commit(&mut self) -> OrmResult<()> {
        let inner = self.take_active()?;

        if self.rollback_only.get() {
            self.state = TxState::RolledBack;
            warn!("event=tx_commit module=tx status=rolled_back reason=rollback_only");
            inner
                .rollback()
                .map_err(|err| OrmError::Rollback(DbError::Sqlite(err)))?;
            return Err(OrmError::Commit(CommitFailure::RollbackOnly));
        }

        match inner.commit() {
            Ok(()) => {
                self.state = TxState::Committed;
                info!("event=tx_commit module=tx status=ok");
                Ok(())
            }
            Err(err) => {
                // The consumed rusqlite handle rolls back on drop.
                self.state = TxState::RolledBack;
                error!(
                    "event=tx_commit module=tx status=error error_code=commit_failed error={}",
                    err
                );
                Err(OrmError::Commit(CommitFailure::Storage(DbError::Sqlite(
                    err,
                ))))
            }
        }
    }

    /// Discards all operations run through this handle.
    pub fn rollback(&mut self) -> OrmResult<()> {
        let inner = self.take_active()?;
        self.state = TxState::RolledBack;
        match inner.rollback() {
            Ok(()) => {
                info!("event=tx_rollback module=tx status=ok");
                Ok(())
            }
            Err(err) => {
                error!(
                    "event=tx_rollback module=tx status=error error_code=rollback_failed error={}",
                    err
                );
                Err(OrmError::Rollback(DbError::Sqlite(err)))
            }
        }
    }

    fn take_active(&mut self) -> OrmResult<rusqlite::Transaction<'s>> {
        match (self.state, self.inner.take()) {
            (TxState::Active, Some(inner)) => Ok(inner),
            (state, _) => Err(OrmError::TransactionClosed { state }),
        }
    }
}

impl Executor for Transaction<'_> {
    fn connection(&self) -> OrmResult<&Connection> {
        match (&self.inner, self.state) {
            (Some(inner), TxState::Active) => Ok(&**inner),
            (_, state) => Err(OrmError::TransactionClosed { state }),
        }
    }

    fn mark_rollback_only(&self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.rollback_only.set(true);
        true
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.inner.is_some() {
            warn!("event=tx_drop module=tx status=rolled_back reason=not_finished");
        }
    }
}
