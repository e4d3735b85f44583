//! Database connection management

use crate::error::Result;
use crate::sync::TableRegistry;
use libsql::{Builder, Connection, Database as LibSqlDatabase};
use std::path::Path;

use super::migrations;

/// Database wrapper for a local libSQL connection
pub struct Database {
    // Keeps the database handle alive alongside its connection
    _db: LibSqlDatabase,
    conn: Connection,
}

impl Database {
    /// Open a database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations and creates one table per registered descriptor.
    pub async fn open(path: impl AsRef<Path>, registry: &TableRegistry) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let db = Builder::new_local(&path_str).build().await?;
        Self::from_database(db, registry).await
    }

    /// Open an in-memory database (useful for testing)
    pub async fn open_in_memory(registry: &TableRegistry) -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        Self::from_database(db, registry).await
    }

    async fn from_database(db: LibSqlDatabase, registry: &TableRegistry) -> Result<Self> {
        let conn = db.connect()?;
        let database = Self { _db: db, conn };
        database.configure().await?;
        migrations::run(&database.conn).await?;
        migrations::ensure_tables(&database.conn, registry).await?;
        Ok(database)
    }

    /// Configure `SQLite` for a single-writer local store
    async fn configure(&self) -> Result<()> {
        // In-memory databases reject WAL; that is fine
        self.conn
            .execute("PRAGMA journal_mode = WAL;", ())
            .await
            .ok();
        self.conn
            .execute("PRAGMA synchronous = NORMAL;", ())
            .await
            .ok();
        // Synced tables reference each other by id only; rows may arrive in any order
        self.conn.execute("PRAGMA foreign_keys = OFF;", ()).await?;
        Ok(())
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Commit when `outcome` is `Ok`, roll back otherwise.
///
/// Pairs with a `BEGIN TRANSACTION` issued by the caller.
pub(crate) async fn finish_transaction<T>(conn: &Connection, outcome: Result<T>) -> Result<T> {
    match outcome {
        Ok(value) => {
            if let Err(error) = conn.execute("COMMIT", ()).await {
                conn.execute("ROLLBACK", ()).await.ok();
                return Err(error.into());
            }
            Ok(value)
        }
        Err(error) => {
            conn.execute("ROLLBACK", ()).await.ok();
            Err(error)
        }
    }
}
