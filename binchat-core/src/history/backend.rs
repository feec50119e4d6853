//! Storage backends for session logs
//!
//! A backend stores the line-oriented files of one target (one analyzed
//! binary). It knows nothing about entry structure: lines go in whole and
//! come back whole.

use crate::error::{self, Result};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

/// Line storage for the sessions of one target
pub trait LogBackend: Send + Sync {
    /// Make sure a new session can be written
    fn prepare_session(&self, session_id: &str) -> Result<()>;

    /// Append one complete line (without the trailing newline)
    fn append_line(&self, session_id: &str, line: &str) -> Result<()>;

    /// Every line of a session; a missing session has none
    fn read_lines(&self, session_id: &str) -> Result<Vec<String>>;

    /// Ids of every stored session, in no particular order
    fn session_ids(&self) -> Result<Vec<String>>;

    /// Where a session lives, when it has a path
    fn location(&self, _session_id: &str) -> Option<PathBuf> {
        None
    }

    /// Get backend name for debugging
    fn backend_name(&self) -> &'static str;
}

/// Turn a target path into a directory name.
///
/// `/`, `\`, `:` and spaces become `_`, leading underscores are dropped and
/// runs of underscores collapse to one.
pub fn encode_target_path(path: &str) -> String {
    let mut encoded = String::with_capacity(path.len());
    for c in path.chars() {
        let c = match c {
            '/' | '\\' | ':' | ' ' => '_',
            other => other,
        };
        if c == '_' && (encoded.is_empty() || encoded.ends_with('_')) {
            continue;
        }
        encoded.push(c);
    }
    encoded
}

// =============================================================================
// File-based Backend (JSONL files)
// =============================================================================

/// One append-only `.jsonl` file per session
///
/// Structure:
/// ```text
/// {root}/
///   {encoded target}/
///     {session_id}.jsonl
/// ```
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Backend for `target` under `root`. Nothing is created until a session starts.
    pub fn new(root: impl AsRef<Path>, target: &str) -> Self {
        Self {
            dir: root.as_ref().join(encode_target_path(target)),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", session_id))
    }
}

impl LogBackend for FileBackend {
    fn prepare_session(&self, _session_id: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| error::io_error(format!("Failed to create session directory: {}", e)).set_source(e))
    }

    fn append_line(&self, session_id: &str, line: &str) -> Result<()> {
        let path = self.session_path(session_id);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| error::io_error(format!("Failed to open {}: {}", path.display(), e)).set_source(e))?;

        // One write per line so concurrent readers never see half an entry.
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');
        file.write_all(buf.as_bytes())
            .map_err(|e| error::io_error(format!("Failed to append to {}: {}", path.display(), e)).set_source(e))
    }

    fn read_lines(&self, session_id: &str) -> Result<Vec<String>> {
        let path = self.session_path(session_id);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(error::io_error(format!("Failed to read {}: {}", path.display(), e)).set_source(e))
            }
        };
        Ok(String::from_utf8_lossy(&bytes)
            .lines()
            .map(str::to_string)
            .collect())
    }

    fn session_ids(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(error::io_error(format!("Failed to read sessions dir: {}", e)).set_source(e))
            }
        };

        let mut ids = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        Ok(ids)
    }

    fn location(&self, session_id: &str) -> Option<PathBuf> {
        Some(self.session_path(session_id))
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}

// =============================================================================
// In-Memory Backend (for testing)
// =============================================================================

/// In-memory line storage; clones share the same sessions
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    sessions: Arc<RwLock<BTreeMap<String, Vec<String>>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogBackend for MemoryBackend {
    fn prepare_session(&self, session_id: &str) -> Result<()> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(session_id.to_string())
            .or_default();
        Ok(())
    }

    fn append_line(&self, session_id: &str, line: &str) -> Result<()> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(session_id.to_string())
            .or_default()
            .push(line.to_string());
        Ok(())
    }

    fn read_lines(&self, session_id: &str) -> Result<Vec<String>> {
        Ok(self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    fn session_ids(&self) -> Result<Vec<String>> {
        Ok(self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_encode_target_path() {
        assert_eq!(encode_target_path("/home/user/samples/malware.exe"), "home_user_samples_malware.exe");
        assert_eq!(encode_target_path("C:\\Samples\\My Binary.dll"), "C_Samples_My_Binary.dll");
        assert_eq!(encode_target_path("//a  b::c"), "a_b_c");
        assert_eq!(encode_target_path(""), "");
    }

    #[test]
    fn test_file_backend_appends_lines() {
        let tmp = TempDir::new().unwrap();
        let backend = FileBackend::new(tmp.path(), "/bin/ls");
        assert!(backend.session_ids().unwrap().is_empty());

        backend.prepare_session("s1").unwrap();
        backend.append_line("s1", "{\"a\":1}").unwrap();
        backend.append_line("s1", "{\"a\":2}").unwrap();

        let path = backend.location("s1").unwrap();
        assert_eq!(path, tmp.path().join("bin_ls").join("s1.jsonl"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"a\":1}\n{\"a\":2}\n");
        assert_eq!(backend.read_lines("s1").unwrap().len(), 2);
        assert_eq!(backend.session_ids().unwrap(), vec!["s1".to_string()]);
    }

    #[test]
    fn test_file_backend_ignores_other_files() {
        let tmp = TempDir::new().unwrap();
        let backend = FileBackend::new(tmp.path(), "target");
        backend.prepare_session("s1").unwrap();
        std::fs::write(backend.dir().join("notes.txt"), "x").unwrap();
        backend.append_line("s1", "{}").unwrap();
        assert_eq!(backend.session_ids().unwrap(), vec!["s1".to_string()]);
    }

    #[test]
    fn test_missing_session_reads_empty() {
        let tmp = TempDir::new().unwrap();
        let backend = FileBackend::new(tmp.path(), "target");
        assert!(backend.read_lines("nope").unwrap().is_empty());
        assert!(MemoryBackend::new().read_lines("nope").unwrap().is_empty());
    }

    #[test]
    fn test_memory_backend_clones_share_state() {
        let backend = MemoryBackend::new();
        let view = backend.clone();
        backend.append_line("s1", "line").unwrap();
        assert_eq!(view.read_lines("s1").unwrap(), vec!["line".to_string()]);
    }
}
