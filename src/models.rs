//! Core data types for the result store and its collaborators.
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`ResultKey`] | `(session_id, key)` pair identifying a stored result |
//! | [`ResultMetadata`] | Summary view of a result (hash, size, counters) |
//! | [`StoredResult`] | Metadata plus the full content |
//! | [`SearchMatch`] | One pattern occurrence with position, line, context |
//! | [`LineRange`] | Inclusive 1-based line range |
//! | [`StoreOptions`] / [`QueryOptions`] | Store and list knobs |
//! | [`StoredContent`] | Reference returned by [`store_content`](crate::store::ResultStore::store_content) |
//! | [`ChatMessage`] | One conversation turn (role + content) |
//! | [`MemoryEntry`] / [`MemoryType`] | Structured agent memory rows |

use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use serde::{Deserialize, Serialize};

/// Uniquely identifies a stored result within the store.
///
/// `key` carries no syntactic constraints. Callers typically use file
/// paths, but the store treats it as an opaque string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResultKey {
    pub session_id: String,
    pub key: String,
}

impl ResultKey {
    pub fn new(session_id: impl Into<String>, key: impl Into<String>) -> Self {
        ResultKey {
            session_id: session_id.into(),
            key: key.into(),
        }
    }

    /// The composite form under which the trie indexes this key.
    pub fn composite(&self) -> String {
        format!("{}:{}", self.session_id, self.key)
    }
}

/// Summary information about stored content: what an orchestrator
/// receives instead of the content itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub key: ResultKey,
    /// 16 hex chars; pure function of the content (see
    /// [`content_fingerprint`](crate::fingerprint::content_fingerprint)).
    pub content_hash: String,
    /// Prefix-derived excerpt, capped by [`StoreOptions`].
    pub summary: String,
    /// 0 for empty content, otherwise `1 + newline count`.
    pub line_count: usize,
    pub byte_size: usize,
    /// Epoch seconds.
    pub created_at: i64,
    /// Epoch seconds.
    pub accessed_at: i64,
    pub access_count: u64,
}

/// Full stored content with its metadata.
#[derive(Debug, Clone)]
pub struct StoredResult {
    pub metadata: ResultMetadata,
    pub content: String,
}

/// One occurrence of a search pattern within stored content.
///
/// `position` is a byte offset into the owning result's content; the
/// pattern occurs bytewise at `content[position..position + pattern.len()]`.
/// `line` is 1-based and `context` is the full source line containing the
/// match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchMatch {
    pub key: ResultKey,
    pub position: usize,
    pub line: usize,
    pub context: String,
}

/// Inclusive 1-based line range. Applied to content it is clamped to
/// `[1, line_count]`; an empty intersection yields the empty string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

impl LineRange {
    pub fn new(start: usize, end: usize) -> Self {
        LineRange { start, end }
    }
}

/// Knobs for [`store`](crate::store::ResultStore::store).
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    /// Summary cap in characters (default 200).
    pub summary_char_cap: usize,
    /// Summary cap in complete lines (default 5).
    pub summary_line_cap: usize,
    /// Reserved for callers that want to bypass a future size threshold;
    /// every call is currently honored regardless.
    pub force_store: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        StoreOptions {
            summary_char_cap: 200,
            summary_line_cap: 5,
            force_store: false,
        }
    }
}

/// Pagination for [`list`](crate::store::ResultStore::list).
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryOptions {
    /// Skip the first N results (0 = none).
    pub offset: usize,
    /// Maximum results to return (0 = unbounded).
    pub limit: usize,
}

/// Reference handed back to read-file style tools that stored content
/// instead of returning it inline.
#[derive(Debug, Clone, Serialize)]
pub struct StoredContent {
    pub reference: String,
    pub lines: usize,
    pub bytes: usize,
    pub preview: String,
}

/// One conversation turn, as persisted in the messages table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Memory categories for different agent use cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    /// Past task executions and their results.
    Episodic,
    /// Supervisor and router decisions, handoffs.
    Orchestration,
    /// Chat history.
    Conversation,
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MemoryType::Episodic => "episodic",
            MemoryType::Orchestration => "orchestration",
            MemoryType::Conversation => "conversation",
        };
        f.write_str(s)
    }
}

impl FromStr for MemoryType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "episodic" => Ok(MemoryType::Episodic),
            "orchestration" => Ok(MemoryType::Orchestration),
            "conversation" => Ok(MemoryType::Conversation),
            other => bail!("unknown memory type: {}", other),
        }
    }
}

/// A structured memory row with access tracking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub session_id: String,
    /// Agent that created this memory, if any.
    pub agent_id: Option<String>,
    pub mem_type: MemoryType,
    pub content: String,
    pub created_at: i64,
    pub accessed_at: i64,
    pub access_count: u32,
    /// Optional JSON metadata for extensibility.
    pub metadata: Option<String>,
}

impl MemoryEntry {
    /// A new entry with a fresh id and zero accesses.
    pub fn new(
        session_id: impl Into<String>,
        mem_type: MemoryType,
        content: impl Into<String>,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        MemoryEntry {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            agent_id: None,
            mem_type,
            content: content.into(),
            created_at: now,
            accessed_at: now,
            access_count: 0,
            metadata: None,
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }
}

/// A persisted results-table row, as exchanged with the backend.
#[derive(Debug, Clone)]
pub struct ResultRow {
    pub session_id: String,
    pub key: String,
    pub content_hash: String,
    pub content: String,
    pub summary: String,
    pub line_count: i64,
    pub byte_size: i64,
    pub created_at: i64,
    pub accessed_at: i64,
    pub access_count: i64,
}
