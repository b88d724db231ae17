pub mod evals;
pub(crate) mod helpers;
pub mod prompts;
pub mod reports;
mod schema;
pub mod users;

#[cfg(test)]
mod tests;

use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

/// Handle to the single SQLite database carrying the three logical stores
/// (prompts, users, evals).
///
/// All access goes through the connection mutex; multi-statement operations
/// take the guard once, open a transaction on it, and commit or roll back as
/// a unit. References that cross store boundaries (prompt ids in the evals
/// schema, user ids everywhere) are plain values with no foreign keys.
pub struct Database {
    pub(crate) conn: Mutex<Connection>,
    pub(crate) vector_search_enabled: AtomicBool,
    pub(crate) dimensions: usize,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("dimensions", &self.dimensions)
            .field(
                "vector_search_enabled",
                &self.vector_search_enabled.load(Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Open (or create) the database at `path`. `dimensions` is the width of
    /// prompt embeddings; the vector index is created to match.
    pub fn open(path: impl AsRef<Path>, dimensions: usize) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        schema::register_vec_extension();

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            ",
        )?;
        schema::init_prompts_schema(&conn)?;
        schema::init_users_schema(&conn)?;
        schema::init_evals_schema(&conn)?;
        let vec_enabled = schema::init_vector_schema(&conn, dimensions);

        Ok(Self {
            conn: Mutex::new(conn),
            vector_search_enabled: AtomicBool::new(vec_enabled),
            dimensions,
        })
    }

    /// Lock the connection. Held for the duration of one operation or one
    /// transaction; never across an await point.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    pub fn vector_search_enabled(&self) -> bool {
        self.vector_search_enabled.load(Ordering::Relaxed)
    }

    pub(crate) fn disable_vector_search(&self, error: &rusqlite::Error, context: &'static str) {
        if self.vector_search_enabled.swap(false, Ordering::Relaxed) {
            warn!(error = %error, context, "sqlite-vec path disabled, using exact-text prompt matching");
        }
    }
}
