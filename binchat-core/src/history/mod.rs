//! # Session log
//!
//! Durable, append-only record of a conversation. Each target (one analyzed
//! binary) owns a set of session files; each session is a chain of entries
//! where every `parentUuid` points at the entry written just before it.
//!
//! ## Guarantees
//! - Entries are never rewritten or deleted
//! - One line per entry, written with a single append
//! - Readers skip unparsable lines instead of failing

mod backend;
mod entry;

pub use backend::{encode_target_path, FileBackend, LogBackend, MemoryBackend};
pub use entry::{AssistantMessage, ContentBlock, EntryBody, LogEntry, Role, UserMessage};

use crate::error::{self, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Written into every entry's `version` field
pub const LOG_VERSION: &str = "binchat-1.0.0";

/// Tool name recorded for executed fragments
pub const SCRIPT_TOOL_NAME: &str = "IDAPythonExec";

const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const SUMMARY_PREVIEW_CHARS: usize = 100;

/// Overview of one stored session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub id: String,
    /// First user text, cut to 100 characters, or `(empty)`
    pub first_message: String,
    /// Timestamp of the first entry
    pub timestamp: Option<DateTime<Utc>>,
    pub message_count: usize,
}

/// Append-only session log for one target
pub struct SessionLog {
    backend: Box<dyn LogBackend>,
    cwd: String,
    model: String,
    session_id: Option<String>,
    parent_uuid: Option<String>,
}

impl SessionLog {
    /// `$HOME/.binchat/sessions`
    pub fn default_root() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(".binchat").join("sessions"))
            .ok_or_else(|| error::config_invalid("HOME", "cannot determine home directory"))
    }

    /// File-backed log for `target` under the default root
    pub fn open(target: &str) -> Result<Self> {
        Ok(Self::for_target(Self::default_root()?, target))
    }

    /// File-backed log for `target` under `root`
    pub fn for_target(root: impl AsRef<Path>, target: &str) -> Self {
        Self::with_backend(target, FileBackend::new(root, target))
    }

    pub fn in_memory(target: &str) -> Self {
        Self::with_backend(target, MemoryBackend::new())
    }

    pub fn with_backend(target: &str, backend: impl LogBackend + 'static) -> Self {
        let cwd = Path::new(target)
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        Self {
            backend: Box::new(backend),
            cwd,
            model: DEFAULT_MODEL.to_string(),
            session_id: None,
            parent_uuid: None,
        }
    }

    /// Model name recorded on assistant entries
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn backend(&self) -> &dyn LogBackend {
        self.backend.as_ref()
    }

    /// Begin a new session; the next entry has no parent.
    pub fn start_new_session(&mut self) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.backend.prepare_session(&id)?;
        debug!(session = %id, backend = self.backend.backend_name(), "session started");
        self.session_id = Some(id.clone());
        self.parent_uuid = None;
        Ok(id)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Path of the active session file, for file-backed logs
    pub fn session_path(&self) -> Option<PathBuf> {
        self.backend.location(self.session_id.as_deref()?)
    }

    // =========================================================================
    // Appends
    // =========================================================================

    pub fn append_user_message(&mut self, content: &str) -> Result<String> {
        self.append(EntryBody::User {
            message: UserMessage {
                role: Role::User,
                content: vec![ContentBlock::Text {
                    text: content.to_string(),
                }],
            },
        })
    }

    pub fn append_assistant_message(
        &mut self,
        content: &str,
        usage: Option<serde_json::Value>,
    ) -> Result<String> {
        let message = self.assistant_message(
            vec![ContentBlock::Text {
                text: content.to_string(),
            }],
            Some("end_turn"),
            usage,
        );
        self.append(EntryBody::Assistant { message })
    }

    /// Returns the entry uuid; the correlation id is generated when absent.
    pub fn append_tool_use(
        &mut self,
        tool_name: &str,
        input: serde_json::Value,
        tool_use_id: Option<&str>,
    ) -> Result<String> {
        let id = tool_use_id.map(str::to_string).unwrap_or_else(new_tool_use_id);
        let message = self.assistant_message(
            vec![ContentBlock::ToolUse {
                id,
                name: tool_name.to_string(),
                input,
            }],
            Some("tool_use"),
            None,
        );
        self.append(EntryBody::Assistant { message })
    }

    pub fn append_tool_result(
        &mut self,
        tool_use_id: &str,
        content: &str,
        is_error: bool,
    ) -> Result<String> {
        self.append(EntryBody::User {
            message: UserMessage {
                role: Role::User,
                content: vec![ContentBlock::ToolResult {
                    tool_use_id: tool_use_id.to_string(),
                    content: content.to_string(),
                    is_error,
                }],
            },
        })
    }

    pub fn append_thinking(&mut self, thinking: &str) -> Result<String> {
        let message = self.assistant_message(
            vec![ContentBlock::Thinking {
                thinking: thinking.to_string(),
            }],
            None,
            None,
        );
        self.append(EntryBody::Assistant { message })
    }

    /// `level` is free-form (`info`, `warning`, `error`)
    pub fn append_system_message(
        &mut self,
        content: &str,
        level: &str,
        subtype: Option<&str>,
    ) -> Result<String> {
        self.append(EntryBody::System {
            content: content.to_string(),
            level: level.to_string(),
            subtype: subtype.map(str::to_string),
        })
    }

    /// Tool-use plus tool-result pair for one executed fragment.
    ///
    /// Returns the uuid of the result entry.
    pub fn append_script_execution(&mut self, code: &str, output: &str, is_error: bool) -> Result<String> {
        let tool_use_id = new_tool_use_id();
        self.append_tool_use(
            SCRIPT_TOOL_NAME,
            serde_json::json!({ "code": code }),
            Some(&tool_use_id),
        )?;
        self.append_tool_result(&tool_use_id, output, is_error)
    }

    fn assistant_message(
        &self,
        content: Vec<ContentBlock>,
        stop_reason: Option<&str>,
        usage: Option<serde_json::Value>,
    ) -> AssistantMessage {
        AssistantMessage {
            id: format!("msg_{}", Uuid::new_v4()),
            kind: "message".to_string(),
            role: Role::Assistant,
            model: self.model.clone(),
            content,
            stop_reason: stop_reason.map(str::to_string),
            usage,
        }
    }

    fn append(&mut self, body: EntryBody) -> Result<String> {
        let session_id = self.session_id.clone().ok_or_else(error::no_active_session)?;
        let entry = LogEntry {
            uuid: Uuid::new_v4().to_string(),
            parent_uuid: self.parent_uuid.clone(),
            session_id: session_id.clone(),
            timestamp: Utc::now(),
            version: LOG_VERSION.to_string(),
            cwd: self.cwd.clone(),
            is_sidechain: false,
            user_type: "external".to_string(),
            body,
        };

        let line = serde_json::to_string(&entry)
            .map_err(|e| error::serialization_error(e.to_string()).set_source(e))?;
        self.backend.append_line(&session_id, &line)?;

        // Only a written entry may become the next parent.
        self.parent_uuid = Some(entry.uuid.clone());
        Ok(entry.uuid)
    }

    // =========================================================================
    // Reading
    // =========================================================================

    /// Every parsable entry of a session, in file order
    pub fn load_session(&self, session_id: &str) -> Result<Vec<LogEntry>> {
        let lines = self.backend.read_lines(session_id)?;
        Ok(parse_lines(session_id, &lines))
    }

    /// All stored sessions of this target, newest first
    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let mut summaries = Vec::new();
        for id in self.backend.session_ids()? {
            let entries = self.load_session(&id)?;
            let first_message = entries
                .iter()
                .find_map(LogEntry::user_text)
                .map(|text| text.chars().take(SUMMARY_PREVIEW_CHARS).collect::<String>())
                .unwrap_or_else(|| "(empty)".to_string());
            summaries.push(SessionSummary {
                timestamp: entries.first().map(|e| e.timestamp),
                first_message,
                message_count: entries.len(),
                id,
            });
        }
        summaries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
        Ok(summaries)
    }

    /// Every user text across all sessions, oldest first, without repeats
    pub fn all_user_messages(&self) -> Result<Vec<String>> {
        let mut timed: Vec<(DateTime<Utc>, String)> = Vec::new();
        for id in self.backend.session_ids()? {
            for entry in self.load_session(&id)? {
                if let Some(text) = entry.user_text() {
                    if !text.is_empty() {
                        timed.push((entry.timestamp, text.to_string()));
                    }
                }
            }
        }
        timed.sort_by(|a, b| a.0.cmp(&b.0));

        let mut seen = HashSet::new();
        Ok(timed
            .into_iter()
            .filter_map(|(_, text)| seen.insert(text.clone()).then_some(text))
            .collect())
    }

    /// Plain-text replay of a session
    pub fn export_transcript(&self, session_id: &str) -> Result<String> {
        let entries = self.load_session(session_id)?;
        if entries.is_empty() {
            return Err(error::session_not_found(session_id));
        }
        Ok(entries
            .iter()
            .map(LogEntry::render)
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}

/// Check that each entry's parent is the entry before it.
///
/// Returns the index of the first entry that breaks the chain.
pub fn verify_chain(entries: &[LogEntry]) -> std::result::Result<(), usize> {
    let mut previous: Option<&LogEntry> = None;
    for (index, entry) in entries.iter().enumerate() {
        let expected = previous.map(|p| p.uuid.as_str());
        let same_session = previous.map_or(true, |p| p.session_id == entry.session_id);
        if entry.parent_uuid.as_deref() != expected || !same_session {
            return Err(index);
        }
        previous = Some(entry);
    }
    Ok(())
}

fn parse_lines(session_id: &str, lines: &[String]) -> Vec<LogEntry> {
    lines
        .iter()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(n, line)| match serde_json::from_str::<LogEntry>(line.trim()) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(session = session_id, line = n + 1, error = %e, "skipping malformed log line");
                None
            }
        })
        .collect()
}

fn new_tool_use_id() -> String {
    format!("toolu_{}", Uuid::new_v4())
}
