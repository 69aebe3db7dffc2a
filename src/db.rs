// SQLite persistence for the entity store.
//
// One row per entity: (collection, id, version, data). Entities are stored
// as JSON text; the rowid preserves creation order so rehydration returns
// collections in the order entities were created.

use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

use crate::model::Collection;

/// A committed row as loaded at startup.
#[derive(Debug, Clone)]
pub struct StoredRow {
    pub collection: Collection,
    pub id: String,
    pub version: u64,
    pub data: String,
}

/// One row-level change inside a logical store transaction.
#[derive(Debug, Clone)]
pub enum RowChange {
    Upsert {
        collection: Collection,
        id: String,
        version: u64,
        data: String,
    },
    Delete {
        collection: Collection,
        id: String,
    },
}

/// SQLite-backed write-through storage for the four entity collections.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure the schema
    /// exists. Pass `":memory:"` for an ephemeral database (useful for
    /// tests).
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS entities (
                seq        INTEGER PRIMARY KEY AUTOINCREMENT,
                collection TEXT NOT NULL,
                id         TEXT NOT NULL,
                version    INTEGER NOT NULL,
                data       TEXT NOT NULL,
                UNIQUE(collection, id)
            );

            CREATE INDEX IF NOT EXISTS idx_entities_collection ON entities(collection);
            ",
        )
        .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock). This should never happen in normal operation.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    /// Load every persisted entity, in creation order.
    pub fn load_all(&self) -> Result<Vec<StoredRow>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT collection, id, version, data FROM entities ORDER BY seq")
            .context("failed to prepare load_all query")?;

        let rows = stmt
            .query_map([], |row| {
                let collection: String = row.get(0)?;
                Ok((
                    collection,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .context("failed to query entities")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map entity rows")?;

        let mut out = Vec::with_capacity(rows.len());
        for (collection, id, version, data) in rows {
            let collection = parse_collection(&collection)
                .with_context(|| format!("unknown collection `{collection}` for entity {id}"))?;
            out.push(StoredRow {
                collection,
                id,
                version: version as u64,
                data,
            });
        }
        Ok(out)
    }

    /// Apply a batch of row changes in one SQLite transaction. Either every
    /// change lands or none does; a crash mid-batch rolls back cleanly on
    /// the next open.
    pub fn apply(&self, changes: &[RowChange]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;

        for change in changes {
            match change {
                RowChange::Upsert {
                    collection,
                    id,
                    version,
                    data,
                } => {
                    tx.execute(
                        "INSERT INTO entities (collection, id, version, data)
                         VALUES (?1, ?2, ?3, ?4)
                         ON CONFLICT(collection, id) DO UPDATE SET
                            version = excluded.version,
                            data    = excluded.data",
                        params![collection.name(), id, *version as i64, data],
                    )
                    .with_context(|| format!("failed to upsert {collection} entity {id}"))?;
                }
                RowChange::Delete { collection, id } => {
                    tx.execute(
                        "DELETE FROM entities WHERE collection = ?1 AND id = ?2",
                        params![collection.name(), id],
                    )
                    .with_context(|| format!("failed to delete {collection} entity {id}"))?;
                }
            }
        }

        tx.commit().context("failed to commit entity batch")?;
        Ok(())
    }

    /// Number of persisted entities in `collection`.
    pub fn count(&self, collection: Collection) -> Result<usize> {
        let conn = self.conn();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM entities WHERE collection = ?1",
                params![collection.name()],
                |row| row.get(0),
            )
            .context("failed to count entities")?;
        Ok(count as usize)
    }
}

fn parse_collection(name: &str) -> Option<Collection> {
    Collection::ALL.iter().copied().find(|c| c.name() == name)
}
