//! External interpreter engine.
//!
//! Pipes each fragment into a child process (for example `python3 -`) and
//! treats its stdout as the printed output. The database path reaches the
//! child through an environment variable named after the binding, so a
//! fragment bound as `db` reads `$DB`.

use super::{ScriptEngine, ScriptEnv};
use crate::error::{self, Result};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Instant;
use tracing::{debug, warn};

/// Runs fragments with an external interpreter.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
}

impl CommandEngine {
    /// Engine running `program` with no arguments
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append one command-line argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// `python3 -`, reading the fragment from stdin
    pub fn python() -> Self {
        Self::new("python3").arg("-")
    }

    /// The interpreter executable
    pub fn program(&self) -> &str {
        &self.program
    }
}

impl ScriptEngine<PathBuf> for CommandEngine {
    fn eval(&self, code: &str, env: &mut ScriptEnv<'_, PathBuf>) -> Result<()> {
        let start = Instant::now();
        let var = env.binding().to_uppercase();
        let db_path = env.db().clone();

        debug!(program = %self.program, db = %db_path.display(), "spawning interpreter");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env(&var, &db_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                error::script_failed(format!("failed to spawn {}: {}", self.program, e)).set_source(e)
            })?;

        // Stdin is fed from its own thread so stdout keeps draining.
        let stdin = child.stdin.take();
        let output = thread::scope(|scope| {
            if let Some(mut stdin) = stdin {
                scope.spawn(move || {
                    // A fragment that exits early closes the pipe; its exit status tells the story.
                    if let Err(e) = stdin.write_all(code.as_bytes()) {
                        warn!(error = %e, "interpreter closed stdin early");
                    }
                });
            }
            child.wait_with_output()
        })
        .map_err(|e| error::script_failed(format!("interpreter wait failed: {}", e)).set_source(e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        env.write(&stdout);

        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        let exit_code = output.status.code().unwrap_or(-1);
        debug!(program = %self.program, exit_code, duration_ms, "interpreter finished");

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        if stderr.is_empty() {
            Err(error::script_failed(format!("interpreter exited with {}", output.status)))
        } else {
            Err(error::script_failed(stderr.to_string()))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::executor::{InProcessExecutor, ScriptExecutor, ScriptOutcome};

    fn sh(db: &str) -> InProcessExecutor<PathBuf, CommandEngine> {
        InProcessExecutor::new(PathBuf::from(db), CommandEngine::new("sh"))
    }

    #[test]
    fn test_binding_is_exported() {
        let ex = sh("/tmp/sample.i64");
        assert_eq!(
            ex.execute("echo \"$DB\""),
            ScriptOutcome::Output("/tmp/sample.i64\n".to_string())
        );
    }

    #[test]
    fn test_stderr_becomes_error() {
        let ex = sh("/tmp/sample.i64");
        let outcome = ex.execute("echo partial; echo 'NameError: x' >&2; exit 1");
        assert_eq!(outcome.text(), "Script error: NameError: x");
    }

    #[test]
    fn test_exit_code_without_stderr() {
        let ex = sh("/tmp/sample.i64");
        let outcome = ex.execute("exit 3");
        assert!(outcome.is_error());
        assert!(outcome.text().starts_with("Script error: interpreter exited with"));
    }

    #[test]
    fn test_missing_interpreter() {
        let ex = InProcessExecutor::new(
            PathBuf::from("/tmp/sample.i64"),
            CommandEngine::new("/nonexistent/interpreter"),
        );
        assert!(ex.execute("print(1)").is_error());
    }

    #[test]
    fn test_large_fragment_with_large_output() {
        let ex = sh("/tmp/sample.i64");
        let mut code = String::from("head -c 300000 /dev/zero | tr '\\0' x\n");
        for i in 0..20_000 {
            code.push_str(&format!("# padding line {} to overflow the stdin pipe\n", i));
        }
        assert!(code.len() > 400_000);

        match ex.execute(&code) {
            ScriptOutcome::Output(out) => {
                assert_eq!(out.len(), 300_000);
                assert!(out.bytes().all(|b| b == b'x'));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_silent_fragment() {
        let ex = sh("/tmp/sample.i64");
        assert!(ex.execute("true").is_silent());
    }
}
