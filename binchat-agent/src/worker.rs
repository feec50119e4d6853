//! Background driver for hosts with their own UI thread.
//!
//! The worker owns the [`ChatCore`] on a dedicated OS thread running a
//! current-thread Tokio runtime. Commands are queued in order; cancellation
//! skips the queue because the worker is busy inside the loop exactly when
//! it matters.

use crate::agent::{CancelHandle, ChatCore};
use binchat_core::error::{self, Result};
use binchat_core::{AgentTransport, OutputSink};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Requests a host can queue for the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerCommand {
    Connect,
    /// Run the turn loop for a user message
    Send(String),
    NewSession,
    /// Disconnect and stop the worker thread
    Disconnect,
}

struct Envelope {
    command: WorkerCommand,
    reply: oneshot::Sender<Result<String>>,
}

/// Completion of one queued command.
///
/// `Send` resolves to the joined script outputs, `NewSession` to the new
/// session id (empty without a log), the others to an empty string.
pub struct Reply(oneshot::Receiver<Result<String>>);

impl Reply {
    /// Block the calling (non-async) thread until the command finished
    pub fn blocking_wait(self) -> Result<String> {
        self.0
            .blocking_recv()
            .unwrap_or_else(|_| Err(error::channel_closed("worker reply")))
    }

    /// Await the command from async code
    pub async fn wait(self) -> Result<String> {
        self.0
            .await
            .unwrap_or_else(|_| Err(error::channel_closed("worker reply")))
    }
}

/// Handle to a chat running on its own thread
pub struct ChatWorker {
    commands: mpsc::UnboundedSender<Envelope>,
    cancel: CancelHandle,
    handle: Option<JoinHandle<()>>,
}

impl ChatWorker {
    /// Move `core` onto a new worker thread
    pub fn spawn<T>(core: ChatCore<T>) -> Result<Self>
    where
        T: AgentTransport + 'static,
    {
        let (commands, rx) = mpsc::unbounded_channel();
        let cancel = core.cancel_handle();

        let handle = thread::Builder::new()
            .name("binchat-worker".to_string())
            .spawn(move || run_worker(core, rx))
            .map_err(|e| error::io_error(format!("failed to spawn worker thread: {}", e)).set_source(e))?;

        Ok(Self {
            commands,
            cancel,
            handle: Some(handle),
        })
    }

    /// Queue a command
    pub fn submit(&self, command: WorkerCommand) -> Result<Reply> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Envelope { command, reply })
            .map_err(|_| error::channel_closed("worker commands"))?;
        Ok(Reply(rx))
    }

    /// Queue [`WorkerCommand::Connect`]
    pub fn connect(&self) -> Result<Reply> {
        self.submit(WorkerCommand::Connect)
    }

    /// Queue a user message for the turn loop
    pub fn send_message(&self, message: impl Into<String>) -> Result<Reply> {
        self.submit(WorkerCommand::Send(message.into()))
    }

    /// Queue [`WorkerCommand::NewSession`]
    pub fn new_session(&self) -> Result<Reply> {
        self.submit(WorkerCommand::NewSession)
    }

    /// Queue [`WorkerCommand::Disconnect`], which also stops the thread
    pub fn disconnect(&self) -> Result<Reply> {
        self.submit(WorkerCommand::Disconnect)
    }

    /// Stop the running loop before its next turn
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The flag `cancel` sets
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Wait for the worker thread to exit.
    ///
    /// The thread stops after `Disconnect`, or once this handle is gone.
    pub fn join(mut self) -> Result<()> {
        let handle = self.handle.take();
        drop(self);
        match handle {
            Some(handle) => handle
                .join()
                .map_err(|_| error::channel_closed("worker thread panicked")),
            None => Ok(()),
        }
    }
}

fn run_worker<T: AgentTransport>(mut core: ChatCore<T>, mut rx: mpsc::UnboundedReceiver<Envelope>) {
    let sink: Arc<dyn OutputSink> = core.sink();
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            sink.on_error(&format!("Failed to start worker runtime: {}", e));
            return;
        }
    };

    runtime.block_on(async move {
        info!("worker started");
        while let Some(Envelope { command, reply }) = rx.recv().await {
            debug!(?command, "worker command");
            let stop = command == WorkerCommand::Disconnect;

            let result = match command {
                WorkerCommand::Connect => core.connect().await.map(|()| String::new()),
                WorkerCommand::Send(message) => core.process_message(&message).await,
                WorkerCommand::NewSession => core.start_new_session().map(Option::unwrap_or_default),
                WorkerCommand::Disconnect => core.disconnect().await.map(|()| String::new()),
            };

            if let Err(err) = &result {
                warn!(error = %err, "worker command failed");
                sink.on_error(err.message());
            }
            // The host may not be waiting for this reply.
            let _ = reply.send(result);

            if stop {
                break;
            }
        }

        if core.is_connected() {
            if let Err(err) = core.disconnect().await {
                warn!(error = %err, "disconnect on shutdown failed");
            }
        }
        info!("worker stopped");
    });
}
