//! Schema cache
//!
//! Durable cache of introspected schema graphs, keyed by (host, database)
//! with a time-to-live. Backed by a local SQLite database so concurrent
//! pgcarve processes are serialised by SQLite's own locking. The engine
//! is correct with caching disabled; a corrupt or stale entry is treated
//! as a miss and purged.

use crate::error::{CarveError, Result};
use crate::schema::SchemaGraph;
use chrono::{Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Durable schema-graph cache
pub struct SchemaCache {
    conn: Connection,
}

impl SchemaCache {
    /// Default cache location under the user cache directory.
    pub fn default_path() -> Result<PathBuf> {
        let base = dirs::cache_dir()
            .ok_or_else(|| CarveError::Usage("no cache directory available".to_string()))?;
        Ok(base.join("pgcarve").join("schema_cache.db"))
    }

    /// Open (creating if needed) the cache at the default location.
    pub fn open_default() -> Result<Self> {
        Self::open(&Self::default_path()?)
    }

    /// Open (creating if needed) a cache database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;

            CREATE TABLE IF NOT EXISTS schema_graphs (
                host        TEXT NOT NULL,
                database    TEXT NOT NULL,
                captured_at INTEGER NOT NULL,
                checksum    TEXT NOT NULL,
                graph_json  TEXT NOT NULL,
                PRIMARY KEY (host, database)
            );
            ",
        )?;

        Ok(Self { conn })
    }

    /// Return the cached graph iff it is younger than `ttl` and its
    /// stored checksum still matches the deserialized content.
    pub fn load(&self, host: &str, database: &str, ttl: Duration) -> Result<Option<SchemaGraph>> {
        let row: Option<(i64, String, String)> = self
            .conn
            .query_row(
                "SELECT captured_at, checksum, graph_json
                 FROM schema_graphs WHERE host = ?1 AND database = ?2",
                params![host, database],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((captured_at, checksum, graph_json)) = row else {
            return Ok(None);
        };

        let cutoff = (Utc::now() - ttl).timestamp();
        if captured_at <= cutoff {
            debug!(host, database, "schema cache entry expired");
            self.invalidate(host, database)?;
            return Ok(None);
        }

        match serde_json::from_str::<SchemaGraph>(&graph_json) {
            Ok(graph) if graph.compute_checksum() == checksum => {
                debug!(host, database, tables = graph.len(), "schema cache hit");
                Ok(Some(graph))
            }
            Ok(_) => {
                warn!(host, database, "schema cache checksum mismatch, purging entry");
                self.invalidate(host, database)?;
                Ok(None)
            }
            Err(e) => {
                warn!(host, database, error = %e, "unreadable schema cache entry, purging");
                self.invalidate(host, database)?;
                Ok(None)
            }
        }
    }

    /// Atomically replace any previous entry for (host, database).
    pub fn store(&self, host: &str, database: &str, graph: &SchemaGraph) -> Result<()> {
        let graph_json = serde_json::to_string(graph)?;
        let checksum = graph.compute_checksum();

        self.conn.execute(
            "INSERT INTO schema_graphs (host, database, captured_at, checksum, graph_json)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (host, database) DO UPDATE SET
                 captured_at = excluded.captured_at,
                 checksum = excluded.checksum,
                 graph_json = excluded.graph_json",
            params![host, database, Utc::now().timestamp(), checksum, graph_json],
        )?;

        debug!(host, database, tables = graph.len(), "schema graph cached");
        Ok(())
    }

    /// Drop the entry for (host, database), if any.
    pub fn invalidate(&self, host: &str, database: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM schema_graphs WHERE host = ?1 AND database = ?2",
            params![host, database],
        )?;
        Ok(())
    }

    /// Drop every cached graph (`--clear-cache`).
    pub fn clear(&self) -> Result<usize> {
        let removed = self.conn.execute("DELETE FROM schema_graphs", [])?;
        debug!(removed, "schema cache cleared");
        Ok(removed)
    }
}
