//! Per-conversation diagnostic logging
//!
//! There is no process-wide subscriber. A [`ConversationLogger`] owns a
//! [`Dispatch`] that the turn loop installs around its own work, so two
//! conversations in one process can log to two different files.

use crate::error::{self, Result};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::Dispatch;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Environment variable overriding the default filter
pub const LOG_FILTER_ENV: &str = "BINCHAT_LOG";

const DEFAULT_FILTER: &str = "info";

/// A tracing dispatcher scoped to one conversation
#[derive(Clone)]
pub struct ConversationLogger {
    dispatch: Dispatch,
    path: Option<PathBuf>,
}

impl ConversationLogger {
    /// Append to `path`, creating it and its parent directories
    pub fn to_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::to_file_with_filter(path, DEFAULT_FILTER)
    }

    pub fn to_file_with_filter(path: impl AsRef<Path>, filter: &str) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| error::io_error(format!("Failed to create log directory: {}", e)).set_source(e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| error::io_error(format!("Failed to open log {}: {}", path.display(), e)).set_source(e))?;

        let mut logger = Self::build(Mutex::new(file), filter);
        logger.path = Some(path);
        Ok(logger)
    }

    /// Log into any writer factory (e.g. `std::io::stderr`)
    pub fn to_writer<W>(make_writer: W) -> Self
    where
        W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
    {
        Self::build(make_writer, DEFAULT_FILTER)
    }

    pub fn to_writer_with_filter<W>(make_writer: W, filter: &str) -> Self
    where
        W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
    {
        Self::build(make_writer, filter)
    }

    fn build<W>(make_writer: W, filter: &str) -> Self
    where
        W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
    {
        let filter = EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new(filter));
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_ansi(false)
            .with_writer(make_writer)
            .finish();
        Self {
            dispatch: Dispatch::new(subscriber),
            path: None,
        }
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// Log file, when logging to one
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` with this logger as the current dispatcher
    pub fn in_scope<R>(&self, f: impl FnOnce() -> R) -> R {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }
}

impl std::fmt::Debug for ConversationLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationLogger")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
