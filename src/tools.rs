//! Retrieval tools over the result store.
//!
//! Agents explore stored content through three read-only tools rather
//! than re-reading it into their context window:
//!
//! | Tool | Backed by | Purpose |
//! |------|-----------|---------|
//! | `search_stored` | suffix array | Find a pattern across all stored content |
//! | `get_lines` | line split | Fetch a specific line range |
//! | `list_stored` | radix trie / key list | Enumerate stored keys, optionally by prefix |
//!
//! Each tool takes a JSON argument object and returns a human-readable
//! string payload. Tools hold a reference to the store (never the other
//! way around) and perform no indexing, mutation, or caching of their
//! own. Core errors are translated into short messages an agent can act
//! on.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::models::{LineRange, QueryOptions, ResultKey};
use crate::recent::StoredFileContext;
use crate::store::ResultStore;

/// A callable tool that agents can discover and invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name: a lowercase identifier with underscores.
    fn name(&self) -> &str;

    /// One-line description for agent discovery.
    fn description(&self) -> &str;

    /// JSON Schema of the argument object.
    fn parameters_schema(&self) -> Value;

    /// Execute with JSON arguments, returning a human-readable payload.
    async fn execute(&self, params: Value) -> Result<String>;
}

/// Registry of tools scoped to one session's store.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        ToolRegistry { tools: Vec::new() }
    }

    /// A registry pre-loaded with the three built-in retrieval tools.
    pub fn with_builtins(
        store: Arc<ResultStore>,
        session_id: impl Into<String>,
        file_context: Arc<StoredFileContext>,
    ) -> Self {
        let session_id = session_id.into();
        let mut registry = Self::new();
        registry.register(Box::new(SearchStoredTool::new(
            Arc::clone(&store),
            session_id.clone(),
        )));
        registry.register(Box::new(GetLinesTool::new(
            Arc::clone(&store),
            session_id.clone(),
            Arc::clone(&file_context),
        )));
        registry.register(Box::new(ListStoredTool::new(store, session_id)));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// search_stored
// ═══════════════════════════════════════════════════════════════════════

/// Search a pattern across all stored content in the session.
pub struct SearchStoredTool {
    store: Arc<ResultStore>,
    session_id: String,
}

#[derive(Deserialize)]
struct SearchStoredArgs {
    pattern: String,
    limit: Option<usize>,
}

impl SearchStoredTool {
    pub fn new(store: Arc<ResultStore>, session_id: impl Into<String>) -> Self {
        SearchStoredTool {
            store,
            session_id: session_id.into(),
        }
    }
}

#[async_trait]
impl Tool for SearchStoredTool {
    fn name(&self) -> &str {
        "search_stored"
    }

    fn description(&self) -> &str {
        "Search a pattern across ALL stored content in this session. Returns matching lines with context."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "The search pattern" },
                "limit": { "type": "integer", "description": "Maximum results", "default": 20 }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, params: Value) -> Result<String> {
        let args: SearchStoredArgs =
            serde_json::from_value(params).context("invalid arguments")?;
        if args.pattern.trim().is_empty() {
            bail!("pattern cannot be empty");
        }
        let limit = match args.limit {
            Some(l) if l > 0 => l,
            _ => 20,
        };

        let matches = self
            .store
            .search(&self.session_id, &args.pattern, limit)
            .await
            .context("search failed")?;

        if matches.is_empty() {
            return Ok(format!("No matches found for pattern: {}", args.pattern));
        }

        let mut out = format!("Found {} matches for '{}':\n\n", matches.len(), args.pattern);
        for (i, m) in matches.iter().enumerate() {
            out.push_str(&format!(
                "[{}] {} (line {}):\n  {}\n\n",
                i + 1,
                m.key.key,
                m.line,
                m.context
            ));
        }
        Ok(out)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// get_lines
// ═══════════════════════════════════════════════════════════════════════

/// Fetch a specific line range from stored content. Falls back to the
/// most recently stored key when none is given.
pub struct GetLinesTool {
    store: Arc<ResultStore>,
    session_id: String,
    file_context: Arc<StoredFileContext>,
}

#[derive(Deserialize)]
struct GetLinesArgs {
    key: Option<String>,
    start: usize,
    end: usize,
}

impl GetLinesTool {
    pub fn new(
        store: Arc<ResultStore>,
        session_id: impl Into<String>,
        file_context: Arc<StoredFileContext>,
    ) -> Self {
        GetLinesTool {
            store,
            session_id: session_id.into(),
            file_context,
        }
    }
}

#[async_trait]
impl Tool for GetLinesTool {
    fn name(&self) -> &str {
        "get_lines"
    }

    fn description(&self) -> &str {
        "Get a specific line range from stored content. If key is omitted, uses the most recently stored file."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "key": { "type": "string", "description": "The storage key (optional - defaults to the last stored file)" },
                "start": { "type": "integer", "description": "Start line (1-indexed, inclusive)" },
                "end": { "type": "integer", "description": "End line (1-indexed, inclusive)" }
            },
            "required": ["start", "end"]
        })
    }

    async fn execute(&self, params: Value) -> Result<String> {
        let args: GetLinesArgs = serde_json::from_value(params).context("invalid arguments")?;
        if args.start < 1 {
            bail!("start must be >= 1");
        }
        if args.end < args.start {
            bail!("end must be >= start");
        }

        let file_key = match args.key.filter(|k| !k.is_empty()) {
            Some(k) => k,
            None => match self.file_context.last() {
                Some(k) => k,
                None => bail!("no key provided and no files have been stored yet"),
            },
        };

        let key = ResultKey::new(self.session_id.clone(), file_key.clone());
        let lines = self
            .store
            .get_lines(&key, LineRange::new(args.start, args.end))
            .await
            .context("failed to get lines")?;

        if lines.is_empty() {
            return Ok(format!(
                "No content found for key: {} (lines {}-{})",
                file_key, args.start, args.end
            ));
        }

        Ok(format!(
            "Lines {}-{} of {}:\n\n{}",
            args.start, args.end, file_key, lines
        ))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// list_stored
// ═══════════════════════════════════════════════════════════════════════

/// List stored results, optionally filtered by key prefix.
pub struct ListStoredTool {
    store: Arc<ResultStore>,
    session_id: String,
}

#[derive(Deserialize)]
struct ListStoredArgs {
    #[serde(default)]
    prefix: Option<String>,
}

impl ListStoredTool {
    pub fn new(store: Arc<ResultStore>, session_id: impl Into<String>) -> Self {
        ListStoredTool {
            store,
            session_id: session_id.into(),
        }
    }
}

#[async_trait]
impl Tool for ListStoredTool {
    fn name(&self) -> &str {
        "list_stored"
    }

    fn description(&self) -> &str {
        "List all stored content in this session. Use prefix to filter (e.g., 'src/' for all files in src)."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "prefix": { "type": "string", "description": "Optional key prefix filter (e.g., 'src/')" }
            }
        })
    }

    async fn execute(&self, params: Value) -> Result<String> {
        let args: ListStoredArgs = serde_json::from_value(params).context("invalid arguments")?;
        let prefix = args.prefix.unwrap_or_default();

        let results = if prefix.is_empty() {
            self.store.list(
                &self.session_id,
                QueryOptions {
                    offset: 0,
                    limit: 100,
                },
            )
        } else {
            self.store.get_by_prefix(&self.session_id, &prefix)
        };

        if results.is_empty() {
            return Ok(if prefix.is_empty() {
                "No stored content in this session".to_string()
            } else {
                format!("No stored content found with prefix: {}", prefix)
            });
        }

        let mut out = if prefix.is_empty() {
            format!("All stored content ({} items):\n\n", results.len())
        } else {
            format!(
                "Stored content with prefix '{}' ({} items):\n\n",
                prefix,
                results.len()
            )
        };

        for meta in &results {
            out.push_str(&format!(
                "- {} ({} lines, {} bytes)\n",
                meta.key.key, meta.line_count, meta.byte_size
            ));
            if !meta.summary.is_empty() {
                let first_line = meta.summary.split('\n').next().unwrap_or("");
                let preview: String = if first_line.chars().count() > 60 {
                    let head: String = first_line.chars().take(60).collect();
                    format!("{}...", head)
                } else {
                    first_line.to_string()
                };
                out.push_str(&format!("  Preview: {}\n", preview));
            }
        }

        Ok(out)
    }
}
