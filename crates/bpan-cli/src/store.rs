//! Persistent snapshot store (SQLite via sqlx).
//!
//! One row per transfer; the engine snapshot is kept verbatim as JSON so it
//! round-trips through the engine types unchanged. The database file lives
//! under the XDG state directory (`~/.local/state/bpan/transfers.db`).

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

pub type TransferId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Upload,
    Download,
}

impl TransferKind {
    fn as_str(self) -> &'static str {
        match self {
            TransferKind::Upload => "upload",
            TransferKind::Download => "download",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "upload" => TransferKind::Upload,
            _ => TransferKind::Download,
        }
    }
}

/// Lifecycle of a stored transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Running,
    /// Interrupted but resumable from its snapshot.
    Recoverable,
    Completed,
    Failed,
}

impl TransferState {
    fn as_str(self) -> &'static str {
        match self {
            TransferState::Running => "running",
            TransferState::Recoverable => "recoverable",
            TransferState::Completed => "completed",
            TransferState::Failed => "failed",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "running" => TransferState::Running,
            "recoverable" => TransferState::Recoverable,
            "completed" => TransferState::Completed,
            _ => TransferState::Failed,
        }
    }
}

/// Full row, as needed by `resume`.
#[derive(Debug, Clone)]
pub struct TransferRow {
    pub id: TransferId,
    pub kind: TransferKind,
    pub remote: String,
    pub local: String,
    pub state: TransferState,
    pub snapshot_json: Option<String>,
}

/// Summary view used by the `status` command.
#[derive(Debug, Clone)]
pub struct TransferSummary {
    pub id: TransferId,
    pub kind: TransferKind,
    pub remote: String,
    pub state: TransferState,
}

#[derive(Clone)]
pub struct SnapshotStore {
    pool: Pool<Sqlite>,
}

impl SnapshotStore {
    /// Open (or create) the default store and run migrations.
    pub async fn open_default() -> Result<Self> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("bpan")?;
        let state_dir = xdg_dirs.get_state_home();
        std::fs::create_dir_all(&state_dir)?;
        Self::open_at(&state_dir.join("transfers.db")).await
    }

    pub async fn open_at(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let store = SnapshotStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transfers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                remote TEXT NOT NULL,
                local TEXT NOT NULL,
                state TEXT NOT NULL,
                snapshot_json TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert a new running transfer; the snapshot arrives with the first
    /// `update_snapshot`.
    pub async fn add_transfer(
        &self,
        kind: TransferKind,
        remote: &str,
        local: &str,
    ) -> Result<TransferId> {
        let now = unix_timestamp();
        let id = sqlx::query(
            r#"
            INSERT INTO transfers (kind, remote, local, state, snapshot_json, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?6)
            "#,
        )
        .bind(kind.as_str())
        .bind(remote)
        .bind(local)
        .bind(TransferState::Running.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    /// Store the engine's snapshot JSON and the transfer's new state.
    pub async fn update_snapshot(
        &self,
        id: TransferId,
        state: TransferState,
        snapshot_json: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE transfers
            SET state = ?1, snapshot_json = ?2, updated_at = ?3
            WHERE id = ?4
            "#,
        )
        .bind(state.as_str())
        .bind(snapshot_json)
        .bind(unix_timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_transfer(&self, id: TransferId) -> Result<Option<TransferRow>> {
        let row = sqlx::query(
            r#"
            SELECT id, kind, remote, local, state, snapshot_json
            FROM transfers WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| {
            let kind: String = row.get("kind");
            let state: String = row.get("state");
            TransferRow {
                id: row.get("id"),
                kind: TransferKind::from_str(&kind),
                remote: row.get("remote"),
                local: row.get("local"),
                state: TransferState::from_str(&state),
                snapshot_json: row.get("snapshot_json"),
            }
        }))
    }

    /// All transfers, newest first.
    pub async fn list_transfers(&self) -> Result<Vec<TransferSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT id, kind, remote, state
            FROM transfers
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let kind: String = row.get("kind");
            let state: String = row.get("state");
            out.push(TransferSummary {
                id: row.get("id"),
                kind: TransferKind::from_str(&kind),
                remote: row.get("remote"),
                state: TransferState::from_str(&state),
            });
        }
        Ok(out)
    }

    pub async fn remove_transfer(&self, id: TransferId) -> Result<()> {
        sqlx::query("DELETE FROM transfers WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
