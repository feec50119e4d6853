//! # Script execution
//!
//! A fragment runs with exactly one injected binding (the analysis database
//! handle, `db` by default) and a print primitive whose output is captured.
//!
//! - [`ScriptEngine`] is the interpreter seam: it evaluates code against a [`ScriptEnv`].
//! - [`ScriptExecutor`] is what the turn loop calls. It never fails: engine
//!   errors and panics come back as [`ScriptOutcome::Error`], rendered as
//!   `Script error: <message>`.
//! - [`InProcessExecutor`] runs the engine on the caller's thread.
//! - [`ThreadBoundExecutor`] and [`marshal_channel`] hand each fragment to the
//!   thread that owns the database and block until it answers.

mod command;
mod console;
mod marshal;

pub use command::CommandEngine;
pub use console::{Console, OutputCapture};
pub use marshal::{marshal_channel, MarshaledExecutor, ScriptMailbox, ThreadBoundExecutor};

use crate::config::ChatConfig;
use crate::error::Result;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

/// Prefix of every failed execution's text
pub const SCRIPT_ERROR_PREFIX: &str = "Script error: ";

/// Default name of the database binding
pub const DEFAULT_BINDING: &str = "db";

/// Result of running one fragment. Every fragment gets exactly one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOutcome {
    /// Everything printed while the fragment ran (possibly empty)
    Output(String),
    /// The failure message, without the `Script error: ` prefix
    Error(String),
}

impl ScriptOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, ScriptOutcome::Error(_))
    }

    /// The text fed back to the agent
    pub fn text(&self) -> String {
        self.to_string()
    }

    /// True for a successful run that printed nothing
    pub fn is_silent(&self) -> bool {
        matches!(self, ScriptOutcome::Output(out) if out.is_empty())
    }
}

impl fmt::Display for ScriptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptOutcome::Output(out) => f.write_str(out),
            ScriptOutcome::Error(msg) => write!(f, "{}{}", SCRIPT_ERROR_PREFIX, msg),
        }
    }
}

/// Runs a code fragment and reports what it printed.
///
/// Implementations must not panic or block forever; the turn loop waits for
/// each call before moving to the next fragment.
pub trait ScriptExecutor: Send {
    fn execute(&self, code: &str) -> ScriptOutcome;
}

impl<F> ScriptExecutor for F
where
    F: Fn(&str) -> ScriptOutcome + Send,
{
    fn execute(&self, code: &str) -> ScriptOutcome {
        self(code)
    }
}

/// The environment a fragment sees: one named binding plus `print`.
pub struct ScriptEnv<'a, D: ?Sized> {
    binding: &'a str,
    db: &'a mut D,
    console: &'a Console,
}

impl<'a, D: ?Sized> ScriptEnv<'a, D> {
    pub fn new(binding: &'a str, db: &'a mut D, console: &'a Console) -> Self {
        Self {
            binding,
            db,
            console,
        }
    }

    /// Name under which the database handle is exposed to scripts
    pub fn binding(&self) -> &str {
        self.binding
    }

    /// The database handle, mutable
    pub fn db(&mut self) -> &mut D {
        self.db
    }

    /// `print(value)`: writes the value followed by a newline
    pub fn print(&self, value: impl fmt::Display) {
        self.console.write_str(&format!("{}\n", value));
    }

    /// Raw write without a trailing newline
    pub fn write(&self, text: &str) {
        self.console.write_str(text);
    }
}

/// An interpreter able to evaluate fragments against a database handle `D`.
pub trait ScriptEngine<D: ?Sized>: Send {
    fn eval(&self, code: &str, env: &mut ScriptEnv<'_, D>) -> Result<()>;
}

/// Executes fragments directly on the calling thread.
///
/// The handle sits behind a mutex so only one fragment touches it at a time.
pub struct InProcessExecutor<D, E> {
    db: Mutex<D>,
    engine: E,
    binding: String,
    console: Console,
}

impl<D, E> InProcessExecutor<D, E>
where
    E: ScriptEngine<D>,
{
    /// Executor binding the handle as `db`, printing to stdout outside fragments
    pub fn new(db: D, engine: E) -> Self {
        Self {
            db: Mutex::new(db),
            engine,
            binding: DEFAULT_BINDING.to_string(),
            console: Console::new(),
        }
    }

    /// Executor using the binding name from the chat settings
    pub fn for_config(db: D, engine: E, config: &ChatConfig) -> Self {
        Self::new(db, engine).with_binding(config.binding.clone())
    }

    /// Expose the handle under another name
    pub fn with_binding(mut self, binding: impl Into<String>) -> Self {
        self.binding = binding.into();
        self
    }

    /// Share a console with the host, e.g. one that also logs elsewhere
    pub fn with_console(mut self, console: Console) -> Self {
        self.console = console;
        self
    }

    /// The print target fragments write to
    pub fn console(&self) -> &Console {
        &self.console
    }

    /// Direct access to the handle, outside any fragment
    pub fn with_db<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        let mut db = self.db.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut db)
    }

    /// Run one fragment. Works for handles that are not `Send`.
    pub fn run(&self, code: &str) -> ScriptOutcome {
        let mut db = self.db.lock().unwrap_or_else(PoisonError::into_inner);
        let capture = self.console.capture();

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut env = ScriptEnv::new(&self.binding, &mut *db, &self.console);
            self.engine.eval(code, &mut env)
        }));

        // Restores the previous print target; the guard also does it on drop.
        let output = capture.finish();

        match result {
            Ok(Ok(())) => {
                debug!(bytes = output.len(), "script finished");
                ScriptOutcome::Output(output)
            }
            Ok(Err(err)) => {
                debug!(error = %err, "script failed");
                ScriptOutcome::Error(err.message().to_string())
            }
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                warn!(panic = %msg, "script engine panicked");
                ScriptOutcome::Error(msg)
            }
        }
    }
}

impl<D, E> ScriptExecutor for InProcessExecutor<D, E>
where
    D: Send,
    E: ScriptEngine<D>,
{
    fn execute(&self, code: &str) -> ScriptOutcome {
        self.run(code)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "script engine panicked".to_string()
    }
}
