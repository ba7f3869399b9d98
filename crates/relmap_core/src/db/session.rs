//! Caller-owned storage session.

use crate::db::DbError;
use crate::error::{OrmError, OrmResult};
use crate::tx::{Executor, Transaction};
use log::{debug, error};
use rusqlite::{Connection, TransactionBehavior};

/// One SQLite connection owned by one caller.
///
/// Operations run directly against a session execute in autocommit mode.
/// `begin` borrows the session mutably, so no ad-hoc operation can run next
/// to an active transaction.
pub struct Session {
    conn: Connection,
}

impl Session {
    pub(crate) fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Raw connection for introspection and caller-owned SQL.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Starts a transaction (`BEGIN IMMEDIATE`).
    pub fn begin(&mut self) -> OrmResult<Transaction<'_>> {
        match self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
        {
            Ok(inner) => {
                debug!("event=tx_begin module=tx status=ok");
                Ok(Transaction::new(inner))
            }
            Err(err) => {
                error!(
                    "event=tx_begin module=tx status=error error_code=begin_failed error={}",
                    err
                );
                Err(OrmError::Db(DbError::Sqlite(err)))
            }
        }
    }
}

impl Executor for Session {
    fn connection(&self) -> OrmResult<&Connection> {
        Ok(&self.conn)
    }
}
