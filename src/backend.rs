//! Durable backing store for results, conversations, and memories.
//!
//! [`ResultBackend`] is the narrow interface the result store needs for
//! its rows; [`SqliteBackend`] implements it over a [`SqlitePool`] and
//! additionally carries the conversation and memory tables used by the
//! orchestration collaborators. Every operation is durable on return;
//! SQLite serializes writes internally, so the backend needs no locking
//! of its own.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::db;
use crate::migrate;
use crate::models::{ChatMessage, MemoryEntry, MemoryType, ResultRow};

/// Persistence operations for the results table.
///
/// All operations address rows by `(session_id, key)`. Implementations
/// must be safe under concurrent callers.
#[async_trait]
pub trait ResultBackend: Send + Sync {
    /// Insert or replace a result row.
    async fn store_result(&self, row: &ResultRow) -> Result<()>;

    /// Load every persisted result row.
    async fn load_all_results(&self) -> Result<Vec<ResultRow>>;

    /// Load all result rows for one session.
    async fn load_session_results(&self, session_id: &str) -> Result<Vec<ResultRow>>;

    /// Atomically bump `access_count` and set `accessed_at` for a row.
    async fn bump_result_access(&self, session_id: &str, key: &str, accessed_at: i64)
        -> Result<()>;

    /// Delete one result row.
    async fn delete_result(&self, session_id: &str, key: &str) -> Result<()>;

    /// Delete every result row for a session.
    async fn delete_session_results(&self, session_id: &str) -> Result<()>;

    /// Release the underlying connections. Idempotent.
    async fn close(&self);
}

/// SQLite-backed implementation of all four tables.
#[derive(Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Open (or create) the database at `path` and run migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool)
            .await
            .context("failed to initialize schema")?;
        Ok(SqliteBackend { pool })
    }

    /// A private in-memory database, for tests and ephemeral sessions.
    pub async fn in_memory() -> Result<Self> {
        let pool = db::connect_in_memory().await?;
        migrate::run_migrations(&pool)
            .await
            .context("failed to initialize schema")?;
        Ok(SqliteBackend { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn ensure_session(&self, session_id: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO sessions (session_id) VALUES (?)")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .context("failed to ensure session")?;
        Ok(())
    }

    // ── Conversation storage ────────────────────────────────────────────

    /// Replace the conversation history for a session.
    ///
    /// Runs in a transaction so readers never observe a partially written
    /// history.
    pub async fn save_messages(&self, session_id: &str, history: &[ChatMessage]) -> Result<()> {
        self.ensure_session(session_id).await?;

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM messages WHERE session_id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;

        for (i, msg) in history.iter().enumerate() {
            sqlx::query(
                "INSERT INTO messages (session_id, message_index, role, content) VALUES (?, ?, ?, ?)",
            )
            .bind(session_id)
            .bind(i as i64)
            .bind(&msg.role)
            .bind(&msg.content)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE sessions SET updated_at = datetime('now') WHERE session_id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Load the conversation history for a session, in order. Returns an
    /// empty vector for unknown sessions.
    pub async fn load_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query(
            "SELECT role, content FROM messages WHERE session_id = ? ORDER BY message_index ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ChatMessage {
                role: row.get("role"),
                content: row.get("content"),
            })
            .collect())
    }

    /// Remove a session row; messages and memories cascade with it.
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// All session ids, most recently updated first.
    pub async fn list_sessions(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT session_id FROM sessions ORDER BY updated_at DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|row| row.get("session_id")).collect())
    }

    pub async fn session_exists(&self, session_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE session_id = ?")
            .bind(session_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    // ── Memory storage ──────────────────────────────────────────────────

    /// Insert or replace a memory entry.
    pub async fn store_memory(&self, entry: &MemoryEntry) -> Result<()> {
        self.ensure_session(&entry.session_id).await?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO memories
            (id, session_id, agent_id, memory_type, content, created_at, accessed_at, access_count, metadata)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.session_id)
        .bind(&entry.agent_id)
        .bind(entry.mem_type.to_string())
        .bind(&entry.content)
        .bind(entry.created_at)
        .bind(entry.accessed_at)
        .bind(entry.access_count as i64)
        .bind(&entry.metadata)
        .execute(&self.pool)
        .await
        .context("failed to store memory")?;

        Ok(())
    }

    /// Query memories for a session, newest first, optionally filtered by
    /// type.
    pub async fn query_memories(
        &self,
        session_id: &str,
        mem_type: Option<MemoryType>,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>> {
        let rows = match mem_type {
            Some(t) => {
                sqlx::query(
                    r#"
                    SELECT id, session_id, agent_id, memory_type, content, created_at, accessed_at, access_count, metadata
                    FROM memories
                    WHERE session_id = ? AND memory_type = ?
                    ORDER BY created_at DESC
                    LIMIT ?
                    "#,
                )
                .bind(session_id)
                .bind(t.to_string())
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT id, session_id, agent_id, memory_type, content, created_at, accessed_at, access_count, metadata
                    FROM memories
                    WHERE session_id = ?
                    ORDER BY created_at DESC
                    LIMIT ?
                    "#,
                )
                .bind(session_id)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(scan_memory_row).collect()
    }

    /// Recent memories across all types.
    pub async fn recent_memories(&self, session_id: &str, limit: usize) -> Result<Vec<MemoryEntry>> {
        self.query_memories(session_id, None, limit).await
    }

    /// Fetch one memory by id and bump its access tracking. Returns
    /// `None` for unknown ids.
    pub async fn get_memory(&self, id: &str) -> Result<Option<MemoryEntry>> {
        let row = sqlx::query(
            r#"
            SELECT id, session_id, agent_id, memory_type, content, created_at, accessed_at, access_count, metadata
            FROM memories WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };
        let mut entry = scan_memory_row(&row)?;

        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "UPDATE memories SET accessed_at = ?, access_count = access_count + 1 WHERE id = ?",
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("failed to update memory access tracking")?;

        entry.accessed_at = now;
        entry.access_count += 1;
        Ok(Some(entry))
    }

    pub async fn delete_memory(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM memories WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_session_memories(&self, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM memories WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn scan_memory_row(row: &sqlx::sqlite::SqliteRow) -> Result<MemoryEntry> {
    let type_str: String = row.get("memory_type");
    // An unparseable type means schema drift or corruption; surface it
    // rather than silently defaulting.
    let mem_type = MemoryType::from_str(&type_str)
        .with_context(|| format!("invalid memory type {:?} in database", type_str))?;

    let access_count: i64 = row.get("access_count");
    Ok(MemoryEntry {
        id: row.get("id"),
        session_id: row.get("session_id"),
        agent_id: row.get("agent_id"),
        mem_type,
        content: row.get("content"),
        created_at: row.get("created_at"),
        accessed_at: row.get("accessed_at"),
        access_count: access_count as u32,
        metadata: row.get("metadata"),
    })
}

fn scan_result_row(row: &sqlx::sqlite::SqliteRow) -> ResultRow {
    ResultRow {
        session_id: row.get("session_id"),
        key: row.get("key"),
        content_hash: row.get("content_hash"),
        content: row.get("content"),
        summary: row.get("summary"),
        line_count: row.get("line_count"),
        byte_size: row.get("byte_size"),
        created_at: row.get("created_at"),
        accessed_at: row.get("accessed_at"),
        access_count: row.get("access_count"),
    }
}

const RESULT_COLUMNS: &str = "session_id, key, content_hash, content, summary, line_count, \
                              byte_size, created_at, accessed_at, access_count";

#[async_trait]
impl ResultBackend for SqliteBackend {
    async fn store_result(&self, row: &ResultRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO results
            (session_id, key, content_hash, content, summary, line_count, byte_size, created_at, accessed_at, access_count)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.session_id)
        .bind(&row.key)
        .bind(&row.content_hash)
        .bind(&row.content)
        .bind(&row.summary)
        .bind(row.line_count)
        .bind(row.byte_size)
        .bind(row.created_at)
        .bind(row.accessed_at)
        .bind(row.access_count)
        .execute(&self.pool)
        .await
        .context("failed to persist result")?;
        Ok(())
    }

    async fn load_all_results(&self) -> Result<Vec<ResultRow>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM results ORDER BY accessed_at DESC",
            RESULT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .context("failed to load results")?;

        debug!(count = rows.len(), "loaded persisted results");
        Ok(rows.iter().map(scan_result_row).collect())
    }

    async fn load_session_results(&self, session_id: &str) -> Result<Vec<ResultRow>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM results WHERE session_id = ? ORDER BY accessed_at DESC",
            RESULT_COLUMNS
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(scan_result_row).collect())
    }

    async fn bump_result_access(
        &self,
        session_id: &str,
        key: &str,
        accessed_at: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE results SET accessed_at = ?, access_count = access_count + 1 \
             WHERE session_id = ? AND key = ?",
        )
        .bind(accessed_at)
        .bind(session_id)
        .bind(key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_result(&self, session_id: &str, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM results WHERE session_id = ? AND key = ?")
            .bind(session_id)
            .bind(key)
            .execute(&self.pool)
            .await
            .context("failed to delete result")?;
        Ok(())
    }

    async fn delete_session_results(&self, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM results WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .context("failed to delete session results")?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn messages_round_trip_in_order() {
        let backend = SqliteBackend::in_memory().await.unwrap();
        let history = vec![
            ChatMessage {
                role: "user".into(),
                content: "list the files".into(),
            },
            ChatMessage {
                role: "assistant".into(),
                content: "src/main.rs, src/lib.rs".into(),
            },
        ];

        backend.save_messages("S", &history).await.unwrap();
        let loaded = backend.load_messages("S").await.unwrap();
        assert_eq!(loaded, history);

        // Re-save replaces rather than appends.
        backend.save_messages("S", &history[..1]).await.unwrap();
        let loaded = backend.load_messages("S").await.unwrap();
        assert_eq!(loaded.len(), 1);

        assert!(backend.session_exists("S").await.unwrap());
        assert!(!backend.session_exists("T").await.unwrap());
    }

    #[tokio::test]
    async fn unknown_session_loads_empty_history() {
        let backend = SqliteBackend::in_memory().await.unwrap();
        assert!(backend.load_messages("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn memory_entries_query_by_type_and_bump_on_get() {
        let backend = SqliteBackend::in_memory().await.unwrap();

        let decision = MemoryEntry::new("S", MemoryType::Orchestration, "handed off to worker");
        let episode = MemoryEntry::new("S", MemoryType::Episodic, "compiled the crate");
        backend.store_memory(&decision).await.unwrap();
        backend.store_memory(&episode).await.unwrap();

        let all = backend.recent_memories("S", 10).await.unwrap();
        assert_eq!(all.len(), 2);

        let episodic = backend
            .query_memories("S", Some(MemoryType::Episodic), 10)
            .await
            .unwrap();
        assert_eq!(episodic.len(), 1);
        assert_eq!(episodic[0].content, "compiled the crate");

        let got = backend.get_memory(&decision.id).await.unwrap().unwrap();
        assert_eq!(got.access_count, decision.access_count + 1);
        assert!(got.accessed_at >= decision.accessed_at);

        assert!(backend.get_memory("missing").await.unwrap().is_none());

        backend.delete_session_memories("S").await.unwrap();
        assert!(backend.recent_memories("S", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn result_rows_round_trip_and_bump() {
        let backend = SqliteBackend::in_memory().await.unwrap();
        let row = ResultRow {
            session_id: "S".into(),
            key: "a.txt".into(),
            content_hash: "00ff00ff00ff00ff".into(),
            content: "alpha\nbeta".into(),
            summary: "alpha\nbeta".into(),
            line_count: 2,
            byte_size: 10,
            created_at: 100,
            accessed_at: 100,
            access_count: 1,
        };
        backend.store_result(&row).await.unwrap();

        let all = backend.load_all_results().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].content, "alpha\nbeta");

        backend.bump_result_access("S", "a.txt", 200).await.unwrap();
        let all = backend.load_session_results("S").await.unwrap();
        assert_eq!(all[0].access_count, 2);
        assert_eq!(all[0].accessed_at, 200);

        backend.delete_result("S", "a.txt").await.unwrap();
        assert!(backend.load_all_results().await.unwrap().is_empty());
    }
}
