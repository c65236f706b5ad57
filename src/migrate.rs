//! Database schema creation.
//!
//! Creates all required tables and ensures idempotent execution.
//! Runs on every store open (and via `cvault init`).
//!
//! # Schema
//!
//! ```text
//! ┌──────────────┐     ┌──────────────────┐     ┌──────────────────┐
//! │   sessions   │──┐  │    messages      │     │    memories      │
//! │              │  │  │                  │     │                  │
//! │ session_id PK│  ├──│ session_id (FK)  │  ┌──│ id (PK)          │
//! │ created_at   │  │  │ message_index    │  │  │ session_id (FK)  │
//! │ updated_at   │  │  │ role             │  │  │ agent_id?        │
//! └──────────────┘  │  │ content          │  │  │ memory_type      │
//!                   │  └──────────────────┘  │  │ content          │
//!                   │                        │  │ created_at       │
//!                   └────────────────────────┘  │ accessed_at      │
//!                                               │ access_count     │
//! ┌───────────────────────────┐                 │ metadata?        │
//! │         results           │                 └──────────────────┘
//! │                           │
//! │ (session_id, key) PK      │
//! │ content_hash  (indexed)   │
//! │ content / summary         │
//! │ line_count / byte_size    │
//! │ created_at / accessed_at  │
//! │ access_count              │
//! └───────────────────────────┘
//! ```
//!
//! # Idempotency
//!
//! All statements use `CREATE TABLE IF NOT EXISTS` / `CREATE INDEX IF NOT
//! EXISTS`; running the migration repeatedly is safe. New columns must be
//! added as nullable so older databases keep loading.

use anyhow::Result;
use sqlx::SqlitePool;

/// Create all tables and indexes used by the store.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            session_id TEXT PRIMARY KEY,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            message_index INTEGER NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            FOREIGN KEY (session_id) REFERENCES sessions(session_id) ON DELETE CASCADE,
            UNIQUE(session_id, message_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, message_index)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS memories (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            agent_id TEXT,
            memory_type TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            accessed_at INTEGER NOT NULL,
            access_count INTEGER DEFAULT 1,
            metadata TEXT,
            FOREIGN KEY (session_id) REFERENCES sessions(session_id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_memories_session_type \
         ON memories(session_id, memory_type, created_at DESC)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS results (
            session_id TEXT NOT NULL,
            key TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            content TEXT NOT NULL,
            summary TEXT NOT NULL,
            line_count INTEGER NOT NULL,
            byte_size INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            accessed_at INTEGER NOT NULL,
            access_count INTEGER DEFAULT 1,
            PRIMARY KEY (session_id, key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_results_session ON results(session_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_results_hash ON results(content_hash)")
        .execute(pool)
        .await?;

    Ok(())
}
