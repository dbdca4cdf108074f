use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sqlite::SqliteConnection;

use crate::error::{Error, Result};

const CREATE_QUEUE: &str = include_str!("../migrations/2024-06-01-000000_create_queue/up.sql");

/// Milliseconds a connection waits on a competing writer before giving up.
const BUSY_TIMEOUT_MS: u32 = 5_000;

pub fn establish_connection(database_url: &str) -> Result<SqliteConnection> {
    let mut connection =
        SqliteConnection::establish(database_url).map_err(|source| Error::Connection {
            url: database_url.to_owned(),
            source,
        })?;

    let mut pragmas = format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS};");
    if !is_memory(database_url) {
        pragmas.push_str(" PRAGMA journal_mode = WAL;");
    }
    connection
        .batch_execute(&pragmas)
        .map_err(|e| Error::Datasource(format!("failed to configure {database_url}: {e}")))?;

    Ok(connection)
}

/// Creates the queue table and its index when missing.
pub fn setup(connection: &mut SqliteConnection) -> Result<()> {
    connection
        .batch_execute(CREATE_QUEUE)
        .map_err(|e| Error::Datasource(format!("failed to create queue table: {e}")))
}

/// Failures that mean the connection itself is unusable, as opposed to a
/// single statement failing.
pub fn is_connection_failure(error: &DieselError) -> bool {
    matches!(
        error,
        DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, _)
            | DieselError::BrokenTransactionManager
    )
}

fn is_memory(database_url: &str) -> bool {
    database_url == ":memory:" || database_url.contains("mode=memory")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_is_idempotent() {
        let mut connection = establish_connection(":memory:").unwrap();
        setup(&mut connection).unwrap();
        setup(&mut connection).unwrap();
    }

    #[test]
    fn unreachable_database_is_a_connection_error() {
        let result = establish_connection("/nonexistent/dir/queue.sqlite");
        assert!(matches!(result, Err(Error::Connection { .. })));
    }

    #[test]
    fn closed_connection_is_not_a_statement_failure() {
        assert!(is_connection_failure(&DieselError::BrokenTransactionManager));
        assert!(!is_connection_failure(&DieselError::NotFound));
    }
}
