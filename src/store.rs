//! The result store: content-addressed storage with search indices.
//!
//! Orchestrates every piece of in-memory state over the durable
//! [`ResultBackend`]:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     ResultStore                         │
//! │  ┌───────────┐  ┌──────────────┐  ┌─────────────────┐   │
//! │  │ RadixTrie │  │ key → hash   │  │ hash → Result   │   │
//! │  │ (prefix)  │  │ (composite)  │  │ (+ ref count)   │   │
//! │  └───────────┘  └──────────────┘  └─────────────────┘   │
//! │  ┌──────────────────┐  ┌─────────────────────────────┐  │
//! │  │ session → keys   │  │ session → suffix index      │  │
//! │  │ (insertion order)│  │ (lazy, epoch-tracked)       │  │
//! │  └──────────────────┘  └─────────────────────────────┘  │
//! │                          │                              │
//! │                ┌─────────▼──────────┐                   │
//! │                │   ResultBackend    │  (SQLite)         │
//! │                └────────────────────┘                   │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! # Deduplication
//!
//! One result per content fingerprint; many composite keys may reference
//! it. A per-fingerprint reference count decides when a result is
//! dropped, so deleting one key of shared content keeps the content
//! reachable through the others.
//!
//! # Lazy search index
//!
//! Each session owns a concatenated buffer of its contents (separated by
//! NUL), a span table mapping buffer offsets back to keys, and a suffix
//! array. Mutations only bump the session's epoch; the next search
//! rebuilds the index outside the lock and installs it atomically. A
//! rebuild records the epoch it captured, so a mutation racing the
//! rebuild leaves the index marked stale instead of masking the write.
//!
//! # Concurrency
//!
//! One `RwLock` guards all in-memory state: many readers or one writer.
//! No lock is ever held across an await (backend I/O and suffix-array
//! construction happen outside), so cancelling any operation's future
//! leaves the store self-consistent.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use anyhow::Result;
use tracing::{debug, warn};

use crate::backend::{ResultBackend, SqliteBackend};
use crate::fingerprint::content_fingerprint;
use crate::models::{
    LineRange, QueryOptions, ResultKey, ResultMetadata, ResultRow, SearchMatch, StoreOptions,
    StoredContent, StoredResult,
};
use crate::suffix::SuffixArray;
use crate::trie::RadixTrie;

/// A deduplicated result plus the number of composite keys referencing it.
struct ResultEntry {
    result: StoredResult,
    ref_count: usize,
}

/// Maps a range of the session buffer back to its owning result.
struct Span {
    key: ResultKey,
    start: usize,
    end: usize,
}

/// The installed search index for one session.
struct SessionIndex {
    buffer: String,
    spans: Vec<Span>,
    sa: SuffixArray,
    /// Mutation epoch this index was built from. Stale while it differs
    /// from the session's current epoch.
    built_epoch: u64,
}

#[derive(Default)]
struct StoreState {
    key_index: RadixTrie<ResultKey>,
    key_to_hash: HashMap<String, String>,
    content_index: HashMap<String, ResultEntry>,
    /// User keys per session, in first-store order. Drives `list`
    /// enumeration so repeated calls are deterministic.
    session_keys: HashMap<String, Vec<String>>,
    search_indexes: HashMap<String, SessionIndex>,
    session_epochs: HashMap<String, u64>,
    backend: Option<Arc<dyn ResultBackend>>,
}

impl StoreState {
    fn bump_epoch(&mut self, session_id: &str) {
        *self.session_epochs.entry(session_id.to_string()).or_insert(0) += 1;
    }

    fn release_hash(&mut self, hash: &str) {
        let now_unreferenced = match self.content_index.get_mut(hash) {
            Some(entry) => {
                entry.ref_count -= 1;
                entry.ref_count == 0
            }
            None => false,
        };
        if now_unreferenced {
            self.content_index.remove(hash);
        }
    }

    fn metadata_for(&self, composite: &str) -> Option<ResultMetadata> {
        let hash = self.key_to_hash.get(composite)?;
        let entry = self.content_index.get(hash)?;
        let key = self.key_index.get(composite)?;
        let mut meta = entry.result.metadata.clone();
        meta.key = key.clone();
        Some(meta)
    }
}

/// Content-addressed key/value store for large agent outputs.
///
/// Construction loads every persisted row into the in-memory indices; a
/// read failure fails the open rather than leaving the store partially
/// available. All operations are safe under concurrent callers.
pub struct ResultStore {
    state: RwLock<StoreState>,
}

impl ResultStore {
    /// Open a store over an already-constructed backend, loading all
    /// persisted rows.
    pub async fn open(backend: Arc<dyn ResultBackend>) -> Result<Self> {
        let rows = backend.load_all_results().await?;

        let mut state = StoreState {
            backend: Some(backend),
            ..StoreState::default()
        };

        for row in rows {
            let key = ResultKey::new(row.session_id.clone(), row.key.clone());
            let composite = key.composite();
            match state.content_index.get_mut(&row.content_hash) {
                Some(entry) => entry.ref_count += 1,
                None => {
                    let metadata = ResultMetadata {
                        key: key.clone(),
                        content_hash: row.content_hash.clone(),
                        summary: row.summary,
                        line_count: row.line_count.max(0) as usize,
                        byte_size: row.byte_size.max(0) as usize,
                        created_at: row.created_at,
                        accessed_at: row.accessed_at,
                        access_count: row.access_count.max(0) as u64,
                    };
                    state.content_index.insert(
                        row.content_hash.clone(),
                        ResultEntry {
                            result: StoredResult {
                                metadata,
                                content: row.content,
                            },
                            ref_count: 1,
                        },
                    );
                }
            }
            state.key_index.insert(&composite, key.clone());
            state.key_to_hash.insert(composite, row.content_hash);
            let keys = state.session_keys.entry(key.session_id.clone()).or_default();
            if !keys.contains(&key.key) {
                keys.push(key.key);
            }
        }

        Ok(ResultStore {
            state: RwLock::new(state),
        })
    }

    /// Open (or create) a store persisted at `path`.
    pub async fn open_path(path: &Path) -> Result<Self> {
        let backend = SqliteBackend::open(path).await?;
        Self::open(Arc::new(backend)).await
    }

    /// An ephemeral store over a private in-memory database.
    pub async fn in_memory() -> Result<Self> {
        let backend = SqliteBackend::in_memory().await?;
        Self::open(Arc::new(backend)).await
    }

    /// Store `content` under `key`, returning its metadata.
    ///
    /// Content equal to an already-stored result (by fingerprint) is
    /// deduplicated: the existing result gains a reference and an access
    /// bump, and the returned metadata echoes the caller's key. The
    /// fingerprint is 64-bit and non-cryptographic, so two distinct
    /// contents may alias at extreme store sizes (~2^32 entries); the
    /// store treats aliased contents as identical.
    ///
    /// Content must not contain NUL bytes if the session is to be
    /// searched: NUL is the separator of the search buffer.
    ///
    /// A persistence failure fails the call, but the in-memory indices
    /// already reflect the write; callers may retry.
    pub async fn store(
        &self,
        key: ResultKey,
        content: &str,
        opts: StoreOptions,
    ) -> Result<ResultMetadata> {
        let hash = content_fingerprint(content);
        let composite = key.composite();
        let now = chrono::Utc::now().timestamp();

        let mut metadata = ResultMetadata {
            key: key.clone(),
            content_hash: hash.clone(),
            summary: make_summary(content, opts),
            line_count: count_lines(content),
            byte_size: content.len(),
            created_at: now,
            accessed_at: now,
            access_count: 1,
        };

        let backend = {
            let mut state = self.state.write().unwrap();

            // Re-binding a key to different content releases its old
            // reference before taking the new one.
            let previous_hash = state.key_to_hash.get(&composite).cloned();
            if let Some(ref old) = previous_hash {
                if *old != hash {
                    state.release_hash(old);
                }
            }
            let takes_new_reference = previous_hash.as_deref() != Some(hash.as_str());

            match state.content_index.get_mut(&hash) {
                Some(entry) => {
                    entry.result.metadata.accessed_at = now;
                    entry.result.metadata.access_count += 1;
                    if takes_new_reference {
                        entry.ref_count += 1;
                    }
                    metadata = entry.result.metadata.clone();
                    metadata.key = key.clone();
                }
                None => {
                    state.content_index.insert(
                        hash.clone(),
                        ResultEntry {
                            result: StoredResult {
                                metadata: metadata.clone(),
                                content: content.to_string(),
                            },
                            ref_count: 1,
                        },
                    );
                }
            }

            state.key_index.insert(&composite, key.clone());
            state.key_to_hash.insert(composite, hash);
            let keys = state.session_keys.entry(key.session_id.clone()).or_default();
            if !keys.contains(&key.key) {
                keys.push(key.key.clone());
            }
            state.bump_epoch(&key.session_id);

            state.backend.clone()
        };

        if let Some(backend) = backend {
            backend
                .store_result(&row_from(&metadata, content))
                .await?;
        }

        Ok(metadata)
    }

    /// Retrieve the full result for `key`, bumping its access counters.
    /// Returns `None` (not an error) for unknown keys.
    pub async fn get(&self, key: &ResultKey) -> Result<Option<StoredResult>> {
        let composite = key.composite();

        let (hash, mut metadata, content) = {
            let state = self.state.read().unwrap();
            let hash = match state.key_to_hash.get(&composite) {
                Some(h) => h.clone(),
                None => return Ok(None),
            };
            let entry = match state.content_index.get(&hash) {
                Some(e) => e,
                None => return Ok(None),
            };
            let mut metadata = entry.result.metadata.clone();
            metadata.key = key.clone();
            (hash, metadata, entry.result.content.clone())
        };

        let now = chrono::Utc::now().timestamp();
        let backend = {
            let mut state = self.state.write().unwrap();
            if let Some(entry) = state.content_index.get_mut(&hash) {
                entry.result.metadata.accessed_at = now;
                entry.result.metadata.access_count += 1;
                metadata.accessed_at = now;
                metadata.access_count = entry.result.metadata.access_count;
            }
            state.backend.clone()
        };

        // Persisted counters advance best-effort; the content itself was
        // already read consistently above.
        if let Some(backend) = backend {
            if let Err(err) = backend
                .bump_result_access(&key.session_id, &key.key, now)
                .await
            {
                warn!(session = %key.session_id, key = %key.key, error = %err,
                      "failed to persist access tracking");
            }
        }

        Ok(Some(StoredResult { metadata, content }))
    }

    /// Retrieve metadata only: no content, no access bump. Returns
    /// `None` for unknown keys.
    pub fn get_metadata(&self, key: &ResultKey) -> Option<ResultMetadata> {
        let state = self.state.read().unwrap();
        state.metadata_for(&key.composite())
    }

    /// Retrieve a line range from stored content, clamped to
    /// `[1, line_count]`. An empty intersection (inverted or fully
    /// out-of-range) yields the empty string, as does an unknown key.
    pub async fn get_lines(&self, key: &ResultKey, range: LineRange) -> Result<String> {
        let result = match self.get(key).await? {
            Some(r) => r,
            None => return Ok(String::new()),
        };

        let lines: Vec<&str> = result.content.split('\n').collect();
        let start = range.start.max(1) - 1;
        let end = range.end.min(lines.len());
        if start >= end {
            return Ok(String::new());
        }

        Ok(lines[start..end].join("\n"))
    }

    /// Search `pattern` across all stored content in a session.
    ///
    /// Rebuilds the session's suffix index first if any mutation touched
    /// the session since the last build. Matches come back in ascending
    /// buffer order; `limit > 0` caps the count, `limit == 0` does not.
    /// The empty pattern and unknown sessions yield no matches. Patterns
    /// containing NUL are unsupported (NUL separates the indexed
    /// contents).
    pub async fn search(
        &self,
        session_id: &str,
        pattern: &str,
        limit: usize,
    ) -> Result<Vec<SearchMatch>> {
        if pattern.is_empty() {
            return Ok(Vec::new());
        }

        // Collect rebuild input under the read lock; build without it.
        let rebuild = {
            let state = self.state.read().unwrap();
            let epoch = state.session_epochs.get(session_id).copied().unwrap_or(0);
            let stale = match state.search_indexes.get(session_id) {
                Some(index) => index.built_epoch != epoch,
                None => true,
            };
            if stale {
                let items: Vec<(ResultKey, String)> = state
                    .session_keys
                    .get(session_id)
                    .map(|keys| {
                        keys.iter()
                            .filter_map(|k| {
                                let key = ResultKey::new(session_id, k.clone());
                                let hash = state.key_to_hash.get(&key.composite())?;
                                let entry = state.content_index.get(hash)?;
                                Some((key, entry.result.content.clone()))
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                Some((epoch, items))
            } else {
                None
            }
        };

        if let Some((epoch, items)) = rebuild {
            let mut buffer = String::new();
            let mut spans = Vec::with_capacity(items.len());
            for (key, content) in items {
                let start = buffer.len();
                buffer.push_str(&content);
                buffer.push('\0');
                spans.push(Span {
                    key,
                    start,
                    end: buffer.len() - 1,
                });
            }
            debug!(session = session_id, bytes = buffer.len(), results = spans.len(),
                   "rebuilding search index");
            let sa = SuffixArray::build(&buffer);

            let mut state = self.state.write().unwrap();
            state.search_indexes.insert(
                session_id.to_string(),
                SessionIndex {
                    buffer,
                    spans,
                    sa,
                    built_epoch: epoch,
                },
            );
        }

        let state = self.state.read().unwrap();
        let index = match state.search_indexes.get(session_id) {
            Some(index) => index,
            None => return Ok(Vec::new()),
        };

        let mut matches = Vec::new();
        for pos in index.sa.search(pattern) {
            if limit > 0 && matches.len() >= limit {
                break;
            }
            // The span table is small (one entry per session result), so a
            // linear scan beats anything cleverer.
            let span = match index
                .spans
                .iter()
                .find(|s| pos >= s.start && pos < s.end)
            {
                Some(s) => s,
                None => continue, // the separator itself
            };

            let before = &index.buffer.as_bytes()[span.start..pos];
            let line = 1 + before.iter().filter(|&&b| b == b'\n').count();

            let line_start = before
                .iter()
                .rposition(|&b| b == b'\n')
                .map(|i| span.start + i + 1)
                .unwrap_or(span.start);
            let line_end = index.buffer.as_bytes()[pos..span.end]
                .iter()
                .position(|&b| b == b'\n')
                .map(|i| pos + i)
                .unwrap_or(span.end);

            matches.push(SearchMatch {
                key: span.key.clone(),
                position: pos - span.start,
                line,
                context: index.buffer[line_start..line_end].to_string(),
            });
        }

        Ok(matches)
    }

    /// All metadata whose user key starts with `prefix`, within a session.
    pub fn get_by_prefix(&self, session_id: &str, prefix: &str) -> Vec<ResultMetadata> {
        let state = self.state.read().unwrap();
        let composite_prefix = format!("{}:{}", session_id, prefix);

        state
            .key_index
            .keys_with_prefix(&composite_prefix)
            .iter()
            .filter_map(|composite| state.metadata_for(composite))
            .collect()
    }

    /// Remove a stored result. Unknown keys are a no-op. Content shared
    /// with other keys survives under those keys.
    pub async fn delete(&self, key: &ResultKey) -> Result<()> {
        let composite = key.composite();

        let backend = {
            let mut state = self.state.write().unwrap();
            let hash = match state.key_to_hash.remove(&composite) {
                Some(h) => h,
                None => return Ok(()),
            };
            state.key_index.remove(&composite);
            state.release_hash(&hash);
            if let Some(keys) = state.session_keys.get_mut(&key.session_id) {
                keys.retain(|k| k != &key.key);
            }
            state.bump_epoch(&key.session_id);
            state.backend.clone()
        };

        if let Some(backend) = backend {
            backend.delete_result(&key.session_id, &key.key).await?;
        }
        Ok(())
    }

    /// Remove every result in a session, along with its search index.
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        let backend = {
            let mut state = self.state.write().unwrap();
            let keys = match state.session_keys.remove(session_id) {
                Some(keys) => keys,
                None => return Ok(()),
            };

            for user_key in keys {
                let composite = ResultKey::new(session_id, user_key).composite();
                if let Some(hash) = state.key_to_hash.remove(&composite) {
                    state.release_hash(&hash);
                }
                state.key_index.remove(&composite);
            }

            state.search_indexes.remove(session_id);
            state.session_epochs.remove(session_id);
            state.backend.clone()
        };

        if let Some(backend) = backend {
            backend.delete_session_results(session_id).await?;
        }
        Ok(())
    }

    /// All result metadata for a session, in first-store order, with
    /// `offset` applied before `limit` (0 = unbounded).
    pub fn list(&self, session_id: &str, opts: QueryOptions) -> Vec<ResultMetadata> {
        let state = self.state.read().unwrap();
        let keys = match state.session_keys.get(session_id) {
            Some(keys) => keys,
            None => return Vec::new(),
        };

        let mut results: Vec<ResultMetadata> = keys
            .iter()
            .filter_map(|k| state.metadata_for(&ResultKey::new(session_id, k.clone()).composite()))
            .collect();

        if opts.offset >= results.len() {
            return Vec::new();
        }
        if opts.offset > 0 {
            results.drain(..opts.offset);
        }
        if opts.limit > 0 && opts.limit < results.len() {
            results.truncate(opts.limit);
        }
        results
    }

    /// Store content on behalf of a read-file style tool, keyed by
    /// `(content_type, path)`, and return a lightweight reference.
    pub async fn store_content(
        &self,
        content_type: &str,
        path: &str,
        content: &str,
    ) -> Result<StoredContent> {
        let key = ResultKey::new(content_type, path);
        let meta = self.store(key, content, StoreOptions::default()).await?;

        Ok(StoredContent {
            reference: path.to_string(),
            lines: meta.line_count,
            bytes: meta.byte_size,
            preview: meta.summary,
        })
    }

    /// Drop all in-memory state and close the backend. Idempotent.
    pub async fn close(&self) {
        let backend = {
            let mut state = self.state.write().unwrap();
            let backend = state.backend.take();
            *state = StoreState::default();
            backend
        };
        if let Some(backend) = backend {
            backend.close().await;
        }
    }
}

fn row_from(meta: &ResultMetadata, content: &str) -> ResultRow {
    ResultRow {
        session_id: meta.key.session_id.clone(),
        key: meta.key.key.clone(),
        content_hash: meta.content_hash.clone(),
        content: content.to_string(),
        summary: meta.summary.clone(),
        line_count: meta.line_count as i64,
        byte_size: meta.byte_size as i64,
        created_at: meta.created_at,
        accessed_at: meta.accessed_at,
        access_count: meta.access_count as i64,
    }
}

/// 0 for empty content, otherwise 1 + the number of newlines.
fn count_lines(content: &str) -> usize {
    if content.is_empty() {
        0
    } else {
        1 + content.bytes().filter(|&b| b == b'\n').count()
    }
}

/// The longest prefix of `content` satisfying both the character and the
/// whole-line cap. When the character cap cuts a line short, the summary
/// ends with an ellipsis marker; when the line cap stops first, the
/// summary ends on a line boundary.
fn make_summary(content: &str, opts: StoreOptions) -> String {
    let char_cap = if opts.summary_char_cap == 0 {
        StoreOptions::default().summary_char_cap
    } else {
        opts.summary_char_cap
    };
    let line_cap = if opts.summary_line_cap == 0 {
        StoreOptions::default().summary_line_cap
    } else {
        opts.summary_line_cap
    };

    let mut summary = String::new();
    let mut chars = 0usize;
    let mut lines = 0usize;

    for line in content.split('\n') {
        if lines >= line_cap || chars >= char_cap {
            break;
        }
        if !summary.is_empty() {
            summary.push('\n');
            chars += 1;
        }
        summary.push_str(line);
        chars += line.chars().count();
        lines += 1;
    }

    if chars > char_cap {
        summary = summary.chars().take(char_cap).collect();
        summary.push_str("...");
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> StoreOptions {
        StoreOptions::default()
    }

    #[test]
    fn line_count_matches_newlines() {
        assert_eq!(count_lines(""), 0);
        assert_eq!(count_lines("a"), 1);
        assert_eq!(count_lines("a\nb"), 2);
        assert_eq!(count_lines("a\nb\n"), 3);
    }

    #[test]
    fn summary_respects_line_cap_without_ellipsis() {
        let content = "one\ntwo\nthree\nfour\nfive\nsix\nseven";
        let summary = make_summary(content, opts());
        assert_eq!(summary, "one\ntwo\nthree\nfour\nfive");
    }

    #[test]
    fn summary_respects_char_cap_with_ellipsis() {
        let content = "abcdefghij";
        let summary = make_summary(
            content,
            StoreOptions {
                summary_char_cap: 4,
                summary_line_cap: 5,
                force_store: false,
            },
        );
        assert_eq!(summary, "abcd...");
    }

    #[test]
    fn summary_counts_characters_not_bytes() {
        let content = "αβγδε";
        let summary = make_summary(
            content,
            StoreOptions {
                summary_char_cap: 3,
                summary_line_cap: 5,
                force_store: false,
            },
        );
        assert_eq!(summary, "αβγ...");
    }

    #[test]
    fn summary_of_short_content_is_content() {
        assert_eq!(make_summary("alpha\nbeta\ngamma", opts()), "alpha\nbeta\ngamma");
        assert_eq!(make_summary("", opts()), "");
    }

    #[tokio::test]
    async fn store_and_get_round_trip() {
        let store = ResultStore::in_memory().await.unwrap();
        let key = ResultKey::new("S", "a.txt");

        let meta = store.store(key.clone(), "alpha\nbeta\ngamma", opts()).await.unwrap();
        assert_eq!(meta.line_count, 3);
        assert_eq!(meta.byte_size, 16);
        assert!(meta.summary.starts_with("alpha"));
        assert_eq!(meta.key, key);

        let result = store.get(&key).await.unwrap().unwrap();
        assert_eq!(result.content, "alpha\nbeta\ngamma");
        assert!(result.metadata.access_count >= 2);

        assert!(store.get(&ResultKey::new("S", "missing")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_metadata_does_not_bump_counters() {
        let store = ResultStore::in_memory().await.unwrap();
        let key = ResultKey::new("S", "a.txt");
        store.store(key.clone(), "content", opts()).await.unwrap();

        let before = store.get_metadata(&key).unwrap();
        let after = store.get_metadata(&key).unwrap();
        assert_eq!(before.access_count, after.access_count);
        assert!(after.summary.starts_with("content"));
    }

    #[tokio::test]
    async fn duplicate_content_shares_one_result() {
        let store = ResultStore::in_memory().await.unwrap();
        let k1 = ResultKey::new("S", "a.txt");
        let k2 = ResultKey::new("S", "b.txt");

        let m1 = store.store(k1.clone(), "same content", opts()).await.unwrap();
        let m2 = store.store(k2.clone(), "same content", opts()).await.unwrap();
        assert_eq!(m1.content_hash, m2.content_hash);
        assert_eq!(m2.key, k2);
        assert!(m2.access_count > m1.access_count);
        assert_eq!(m2.created_at, m1.created_at);

        // Deleting one key keeps the content alive for the other.
        store.delete(&k1).await.unwrap();
        assert!(store.get(&k1).await.unwrap().is_none());
        let survivor = store.get(&k2).await.unwrap().unwrap();
        assert_eq!(survivor.content, "same content");

        let matches = store.search("S", "same", 0).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].key, k2);
    }

    #[tokio::test]
    async fn rebinding_a_key_releases_the_old_content() {
        let store = ResultStore::in_memory().await.unwrap();
        let key = ResultKey::new("S", "a.txt");

        store.store(key.clone(), "first", opts()).await.unwrap();
        store.store(key.clone(), "second", opts()).await.unwrap();

        let result = store.get(&key).await.unwrap().unwrap();
        assert_eq!(result.content, "second");

        // The old content has no referring key left.
        assert!(store.search("S", "first", 0).await.unwrap().is_empty());
        assert_eq!(store.list("S", QueryOptions::default()).len(), 1);
    }

    #[tokio::test]
    async fn get_lines_clamps_and_joins() {
        let store = ResultStore::in_memory().await.unwrap();
        let key = ResultKey::new("S", "a.txt");
        store.store(key.clone(), "alpha\nbeta\ngamma", opts()).await.unwrap();

        assert_eq!(store.get_lines(&key, LineRange::new(2, 2)).await.unwrap(), "beta");
        assert_eq!(
            store.get_lines(&key, LineRange::new(1, 3)).await.unwrap(),
            "alpha\nbeta\ngamma"
        );
        // Clamped from both ends.
        assert_eq!(
            store.get_lines(&key, LineRange::new(0, 1_000_000_000)).await.unwrap(),
            "alpha\nbeta\ngamma"
        );
        // Inverted and out-of-range ranges are empty, not errors.
        assert_eq!(store.get_lines(&key, LineRange::new(3, 2)).await.unwrap(), "");
        assert_eq!(store.get_lines(&key, LineRange::new(7, 9)).await.unwrap(), "");
        assert_eq!(
            store
                .get_lines(&ResultKey::new("S", "missing"), LineRange::new(1, 1))
                .await
                .unwrap(),
            ""
        );
    }

    #[tokio::test]
    async fn search_reports_position_line_and_context() {
        let store = ResultStore::in_memory().await.unwrap();
        let key = ResultKey::new("S", "a.txt");
        store.store(key.clone(), "alpha\nbeta\ngamma", opts()).await.unwrap();

        let matches = store.search("S", "eta", 0).await.unwrap();
        assert_eq!(matches.len(), 1);
        let m = &matches[0];
        assert_eq!(m.key, key);
        assert_eq!(m.position, 7);
        assert_eq!(&"alpha\nbeta\ngamma"[m.position..m.position + 3], "eta");
        assert_eq!(m.line, 2);
        assert_eq!(m.context, "beta");
    }

    #[tokio::test]
    async fn search_isolates_results_and_sessions() {
        let store = ResultStore::in_memory().await.unwrap();
        store.store(ResultKey::new("T", "x"), "xxx", opts()).await.unwrap();
        store.store(ResultKey::new("T", "y"), "yyy", opts()).await.unwrap();

        let matches = store.search("T", "x", 0).await.unwrap();
        assert!(!matches.is_empty());
        assert!(matches.iter().all(|m| m.key.key == "x"));

        assert!(store.search("T", "z", 0).await.unwrap().is_empty());
        assert!(store.search("other", "x", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn search_does_not_bridge_results() {
        let store = ResultStore::in_memory().await.unwrap();
        store.store(ResultKey::new("S", "one"), "end", opts()).await.unwrap();
        store.store(ResultKey::new("S", "two"), "start", opts()).await.unwrap();

        // "endstart" would only exist across the separator.
        assert!(store.search("S", "endstart", 0).await.unwrap().is_empty());
        assert!(store.search("S", "dst", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn search_line_numbers_are_per_result() {
        let store = ResultStore::in_memory().await.unwrap();
        store
            .store(ResultKey::new("S", "first"), "l1\nl2\nl3", opts())
            .await
            .unwrap();
        store
            .store(ResultKey::new("S", "second"), "only needle here", opts())
            .await
            .unwrap();

        let matches = store.search("S", "needle", 0).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].key.key, "second");
        assert_eq!(matches[0].line, 1);
        assert_eq!(matches[0].context, "only needle here");
    }

    #[tokio::test]
    async fn search_sees_writes_immediately() {
        let store = ResultStore::in_memory().await.unwrap();
        store.store(ResultKey::new("S", "a"), "before", opts()).await.unwrap();
        assert_eq!(store.search("S", "before", 0).await.unwrap().len(), 1);

        // A write after a build marks the index stale.
        store.store(ResultKey::new("S", "b"), "after", opts()).await.unwrap();
        assert_eq!(store.search("S", "after", 0).await.unwrap().len(), 1);

        // So does a delete.
        store.delete(&ResultKey::new("S", "b")).await.unwrap();
        assert!(store.search("S", "after", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn search_limit_caps_matches() {
        let store = ResultStore::in_memory().await.unwrap();
        store
            .store(ResultKey::new("S", "a"), "ab ab ab ab", opts())
            .await
            .unwrap();

        assert_eq!(store.search("S", "ab", 0).await.unwrap().len(), 4);
        assert_eq!(store.search("S", "ab", 2).await.unwrap().len(), 2);

        let all = store.search("S", "ab", 0).await.unwrap();
        let positions: Vec<usize> = all.iter().map(|m| m.position).collect();
        assert_eq!(positions, vec![0, 3, 6, 9]);
    }

    #[tokio::test]
    async fn empty_pattern_and_empty_session_yield_nothing() {
        let store = ResultStore::in_memory().await.unwrap();
        assert!(store.search("S", "", 0).await.unwrap().is_empty());
        assert!(store.search("S", "x", 0).await.unwrap().is_empty());

        store.store(ResultKey::new("S", "a"), "text", opts()).await.unwrap();
        assert!(store.search("S", "", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_content_stores_normally() {
        let store = ResultStore::in_memory().await.unwrap();
        let key = ResultKey::new("S", "empty");
        let meta = store.store(key.clone(), "", opts()).await.unwrap();
        assert_eq!(meta.line_count, 0);
        assert_eq!(meta.byte_size, 0);
        assert_eq!(meta.summary, "");

        let result = store.get(&key).await.unwrap().unwrap();
        assert_eq!(result.content, "");
    }

    #[tokio::test]
    async fn prefix_listing_filters_by_user_key() {
        let store = ResultStore::in_memory().await.unwrap();
        store.store(ResultKey::new("S", "src/a.rs"), "a", opts()).await.unwrap();
        store.store(ResultKey::new("S", "src/b.rs"), "b", opts()).await.unwrap();
        store.store(ResultKey::new("S", "docs/c.md"), "c", opts()).await.unwrap();
        store.store(ResultKey::new("T", "src/d.rs"), "d", opts()).await.unwrap();

        let metas = store.get_by_prefix("S", "src/");
        let mut keys: Vec<&str> = metas.iter().map(|m| m.key.key.as_str()).collect();
        keys.sort();
        assert_eq!(keys, vec!["src/a.rs", "src/b.rs"]);

        let all = store.get_by_prefix("S", "");
        assert_eq!(all.len(), 3);
        assert!(store.get_by_prefix("S", "nope").is_empty());
    }

    #[tokio::test]
    async fn list_is_deterministic_and_paginates() {
        let store = ResultStore::in_memory().await.unwrap();
        for name in ["one", "two", "three", "four"] {
            store
                .store(ResultKey::new("S", name), format!("content {}", name).as_str(), opts())
                .await
                .unwrap();
        }

        let all = store.list("S", QueryOptions::default());
        let keys: Vec<&str> = all.iter().map(|m| m.key.key.as_str()).collect();
        assert_eq!(keys, vec!["one", "two", "three", "four"]);

        let page = store.list("S", QueryOptions { offset: 1, limit: 2 });
        let keys: Vec<&str> = page.iter().map(|m| m.key.key.as_str()).collect();
        assert_eq!(keys, vec!["two", "three"]);

        assert!(store.list("S", QueryOptions { offset: 10, limit: 0 }).is_empty());
        assert!(store.list("missing", QueryOptions::default()).is_empty());
    }

    #[tokio::test]
    async fn delete_session_removes_everything() {
        let store = ResultStore::in_memory().await.unwrap();
        store.store(ResultKey::new("S", "a"), "alpha", opts()).await.unwrap();
        store.store(ResultKey::new("S", "b"), "beta", opts()).await.unwrap();
        store.store(ResultKey::new("T", "c"), "gamma", opts()).await.unwrap();

        store.delete_session("S").await.unwrap();
        assert!(store.list("S", QueryOptions::default()).is_empty());
        assert!(store.get(&ResultKey::new("S", "a")).await.unwrap().is_none());
        assert!(store.search("S", "alpha", 0).await.unwrap().is_empty());

        // Other sessions are untouched.
        assert_eq!(store.list("T", QueryOptions::default()).len(), 1);

        // Deleting again is a no-op.
        store.delete_session("S").await.unwrap();
    }

    #[tokio::test]
    async fn store_content_returns_reference() {
        let store = ResultStore::in_memory().await.unwrap();
        let stored = store
            .store_content("file", "/tmp/notes.txt", "line one\nline two")
            .await
            .unwrap();
        assert_eq!(stored.reference, "/tmp/notes.txt");
        assert_eq!(stored.lines, 2);
        assert_eq!(stored.bytes, 17);
        assert!(stored.preview.starts_with("line one"));

        let key = ResultKey::new("file", "/tmp/notes.txt");
        assert!(store.get(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let store = ResultStore::in_memory().await.unwrap();
        store.store(ResultKey::new("S", "a"), "alpha", opts()).await.unwrap();
        store.close().await;
        store.close().await;
        assert!(store.list("S", QueryOptions::default()).is_empty());
    }

    #[tokio::test]
    async fn concurrent_stores_all_land() {
        let store = Arc::new(ResultStore::in_memory().await.unwrap());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let key = ResultKey::new("S", format!("key-{}", i));
                store
                    .store(key, format!("content {}", i).as_str(), StoreOptions::default())
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.list("S", QueryOptions::default()).len(), 16);
    }

    #[tokio::test]
    async fn concurrent_gets_see_consistent_results() {
        let store = Arc::new(ResultStore::in_memory().await.unwrap());
        let key = ResultKey::new("S", "shared");
        store.store(key.clone(), "shared content", StoreOptions::default()).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                let result = store.get(&key).await.unwrap().unwrap();
                assert_eq!(result.metadata.byte_size, result.content.len());
                result.metadata.access_count
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap() >= 2);
        }
    }
}
