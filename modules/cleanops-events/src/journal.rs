//! SQLite journal backing the in-memory log.
//!
//! One row per event in `events`, keyed by sequence number. A row is
//! committed before `append` makes the event visible in memory.

use std::path::{Path, PathBuf};

use cleanops_common::RunEvent;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::types::StoreError;

const CREATE_EVENTS: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    seq         INTEGER PRIMARY KEY,
    run_id      TEXT NOT NULL,
    pipeline_id TEXT NOT NULL,
    kind        TEXT NOT NULL,
    payload     TEXT NOT NULL
)
"#;

pub(crate) struct SqlJournal {
    path: PathBuf,
    pool: SqlitePool,
}

impl SqlJournal {
    /// Open (creating if needed) the journal database and its table.
    pub(crate) async fn connect(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        // Single writer; the store serializes appends anyway.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::query(CREATE_EVENTS).execute(&pool).await?;

        Ok(Self {
            path: path.to_path_buf(),
            pool,
        })
    }

    /// Every journaled event in sequence order, still encoded.
    pub(crate) async fn read_all(&self) -> Result<Vec<(i64, String)>, StoreError> {
        let rows = sqlx::query_as::<_, (i64, String)>(
            r#"
            SELECT seq, payload
            FROM events
            ORDER BY seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Commit one event row. Either the whole row lands or nothing does.
    pub(crate) async fn insert(&self, seq: u64, event: &RunEvent) -> Result<(), StoreError> {
        let payload = serde_json::to_string(event).map_err(|e| StoreError::Encode(e.to_string()))?;
        let seq = i64::try_from(seq).map_err(|_| StoreError::Encode(format!("seq {seq} out of range")))?;

        sqlx::query(
            r#"
            INSERT INTO events (seq, run_id, pipeline_id, kind, payload)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(seq)
        .bind(&event.run_id)
        .bind(&event.pipeline_id)
        .bind(event.kind.as_str())
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}
