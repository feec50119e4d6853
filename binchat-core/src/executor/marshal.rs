//! Running fragments on the thread that owns the database.
//!
//! Some hosts only allow their database API to be called from one thread.
//! [`marshal_channel`] splits execution into a sending half the turn loop
//! calls and a [`ScriptMailbox`] the owning thread drains. Each call blocks
//! until the owning thread has run the fragment and replied.

use super::{InProcessExecutor, ScriptEngine, ScriptExecutor, ScriptOutcome};
use crate::error::{self, Result};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

struct Job {
    code: String,
    reply: SyncSender<ScriptOutcome>,
}

/// Create a connected executor/mailbox pair.
pub fn marshal_channel() -> (MarshaledExecutor, ScriptMailbox) {
    let (tx, rx) = mpsc::channel();
    (MarshaledExecutor { tx }, ScriptMailbox { rx })
}

/// Sending half: forwards each fragment and waits for the answer.
#[derive(Clone)]
pub struct MarshaledExecutor {
    tx: Sender<Job>,
}

impl ScriptExecutor for MarshaledExecutor {
    fn execute(&self, code: &str) -> ScriptOutcome {
        let (reply, answer) = mpsc::sync_channel(1);
        let job = Job {
            code: code.to_string(),
            reply,
        };
        if self.tx.send(job).is_err() {
            return ScriptOutcome::Error(error::channel_closed("script mailbox").message().to_string());
        }
        answer.recv().unwrap_or_else(|_| {
            ScriptOutcome::Error(error::channel_closed("script reply").message().to_string())
        })
    }
}

/// Receiving half, owned by the thread the fragments must run on.
pub struct ScriptMailbox {
    rx: Receiver<Job>,
}

impl ScriptMailbox {
    /// Run jobs until every [`MarshaledExecutor`] has been dropped.
    pub fn serve(&self, mut run: impl FnMut(&str) -> ScriptOutcome) {
        while let Ok(job) = self.rx.recv() {
            Self::answer(job, &mut run);
        }
    }

    /// Run whatever is queued right now and return how many jobs ran.
    ///
    /// For hosts with their own event loop that poll between events.
    pub fn serve_pending(&self, mut run: impl FnMut(&str) -> ScriptOutcome) -> usize {
        let mut served = 0;
        while let Ok(job) = self.rx.try_recv() {
            Self::answer(job, &mut run);
            served += 1;
        }
        served
    }

    fn answer(job: Job, run: &mut impl FnMut(&str) -> ScriptOutcome) {
        let outcome = run(&job.code);
        // The caller may have given up; nothing to do then.
        let _ = job.reply.send(outcome);
    }
}

/// Executor backed by a dedicated thread that creates and owns the handle.
///
/// The handle never leaves that thread, so it does not need to be `Send`.
/// Dropping the executor closes the mailbox and joins the thread.
pub struct ThreadBoundExecutor {
    sender: Option<MarshaledExecutor>,
    handle: Option<JoinHandle<()>>,
}

impl ThreadBoundExecutor {
    pub fn spawn<D, E, F>(name: &str, binding: &str, make_db: F, engine: E) -> Result<Self>
    where
        D: 'static,
        E: ScriptEngine<D> + 'static,
        F: FnOnce() -> D + Send + 'static,
    {
        let (sender, mailbox) = marshal_channel();
        let binding = binding.to_string();
        let thread_name = name.to_string();

        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let executor = InProcessExecutor::new(make_db(), engine).with_binding(binding);
                info!(thread = %thread_name, "script thread ready");
                mailbox.serve(|code| executor.run(code));
                debug!(thread = %thread_name, "script thread stopped");
            })
            .map_err(|e| error::io_error(format!("failed to spawn script thread: {}", e)).set_source(e))?;

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
        })
    }
}

impl ScriptExecutor for ThreadBoundExecutor {
    fn execute(&self, code: &str) -> ScriptOutcome {
        match &self.sender {
            Some(sender) => sender.execute(code),
            None => ScriptOutcome::Error(error::channel_closed("script mailbox").message().to_string()),
        }
    }
}

impl Drop for ThreadBoundExecutor {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
