//! The agentic turn loop

use binchat_core::error::{self, Result};
use binchat_core::{
    AgentTransport, ChatConfig, ConversationLogger, OutputSink, ResponseUnit, ScriptBlockExtractor,
    ScriptExecutor, SessionLog, TurnStats,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::instrument::WithSubscriber;
use tracing::{debug, info, warn};

/// Fed back when a lone fragment printed nothing
pub const NO_OUTPUT_SENTINEL: &str = "Script executed successfully with no output.";

/// Sent to the sink when the loop stops on request
pub const CANCELLED_MESSAGE: &str = "Operation cancelled";

const PROBE_PROMPT: &str = "Tell me a short (one sentence) joke about reverse engineering";

/// Cooperative cancellation flag, shareable across threads
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Flag that is not yet cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the loop to stop before its next turn
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Why the loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    /// A response had no fragments
    Done,
    Cancelled,
    MaxTurns,
    TransportFailed,
}

/// What one turn produced
struct TurnOutcome {
    fragments: usize,
    outputs: Vec<String>,
}

/// Drives one conversation between the agent and the database.
///
/// Each call to [`process_message`](Self::process_message) sends the user's
/// message, runs every script block the agent answers with, and feeds the
/// outputs back until the agent replies without scripts, the turn cap is
/// hit, or cancellation is requested.
pub struct ChatCore<T: AgentTransport> {
    transport: T,
    executor: Box<dyn ScriptExecutor>,
    sink: Arc<dyn OutputSink>,
    history: Option<SessionLog>,
    config: ChatConfig,
    extractor: ScriptBlockExtractor,
    cancel: CancelHandle,
    connected: bool,
    logger: Option<ConversationLogger>,
}

impl<T: AgentTransport> ChatCore<T> {
    /// Loop with default settings and no session log
    pub fn new(
        transport: T,
        executor: impl ScriptExecutor + 'static,
        sink: Arc<dyn OutputSink>,
    ) -> Self {
        Self::with_config(transport, executor, sink, ChatConfig::default())
    }

    /// Loop with explicit settings
    pub fn with_config(
        transport: T,
        executor: impl ScriptExecutor + 'static,
        sink: Arc<dyn OutputSink>,
        config: ChatConfig,
    ) -> Self {
        let extractor = ScriptBlockExtractor::with_tag(&config.script_tag);
        Self {
            transport,
            executor: Box::new(executor),
            sink,
            history: None,
            config,
            extractor,
            cancel: CancelHandle::new(),
            connected: false,
            logger: None,
        }
    }

    /// Record the conversation in a session log
    pub fn with_history(mut self, history: SessionLog) -> Self {
        self.history = Some(history);
        self
    }

    /// Share a cancellation flag created by the host
    pub fn with_cancel_handle(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    /// Route this conversation's diagnostics to its own logger
    pub fn with_logger(mut self, logger: ConversationLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Settings in use
    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Shared handle to the presentation sink
    pub fn sink(&self) -> Arc<dyn OutputSink> {
        self.sink.clone()
    }

    /// The agent connection
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable access to the agent connection
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// The attached session log, if any
    pub fn history(&self) -> Option<&SessionLog> {
        self.history.as_ref()
    }

    /// Mutable access to the attached session log
    pub fn history_mut(&mut self) -> Option<&mut SessionLog> {
        self.history.as_mut()
    }

    /// Whether `connect` succeeded and `disconnect` has not run since
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Connect the transport and make sure an attached log has a session.
    ///
    /// A log that already has an active session keeps it.
    pub async fn connect(&mut self) -> Result<()> {
        let dispatch = self.logger.as_ref().map(|l| l.dispatch().clone());
        let fut = async {
            info!(transport = self.transport.name(), "connecting");
            self.transport.connect().await?;
            if let Some(history) = self.history.as_mut() {
                if history.session_id().is_none() {
                    let id = history.start_new_session()?;
                    info!(session = %id, "session log started");
                }
            }
            self.connected = true;
            info!("connected");
            Ok(())
        };
        match dispatch {
            Some(dispatch) => fut.with_subscriber(dispatch).await,
            None => fut.await,
        }
    }

    /// Disconnect the transport; a no-op when not connected
    pub async fn disconnect(&mut self) -> Result<()> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;
        self.transport.disconnect().await
    }

    /// Stop before the next turn; a running fragment finishes first.
    pub fn request_cancel(&self) {
        info!("cancel requested");
        self.cancel.cancel();
    }

    /// Handle other threads can use to cancel the running loop
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Start a new log session; `None` without a log
    pub fn start_new_session(&mut self) -> Result<Option<String>> {
        match self.history.as_mut() {
            Some(history) => history.start_new_session().map(Some),
            None => Ok(None),
        }
    }

    /// Run the agentic loop for one user message.
    ///
    /// Returns every fragment output of every turn, joined with newlines.
    /// Only a missing connection is an error; transport failures, the turn
    /// cap and cancellation are reported through the sink.
    pub async fn process_message(&mut self, message: &str) -> Result<String> {
        let dispatch = self.logger.as_ref().map(|l| l.dispatch().clone());
        let fut = self.run_loop(message);
        match dispatch {
            Some(dispatch) => fut.with_subscriber(dispatch).await,
            None => fut.await,
        }
    }

    async fn run_loop(&mut self, message: &str) -> Result<String> {
        if !self.connected {
            return Err(error::not_connected());
        }

        info!(chars = message.len(), "user message");
        self.record(|h| h.append_user_message(message));

        let max_turns = self.config.max_turns;
        let mut current_input = message.to_string();
        let mut all_outputs: Vec<String> = Vec::new();
        let mut turn = 0;
        let mut exit = Exit::MaxTurns;
        self.cancel.reset();

        while turn < max_turns {
            if self.cancel.is_cancelled() {
                info!(turn, "operation cancelled");
                self.sink.on_error(CANCELLED_MESSAGE);
                exit = Exit::Cancelled;
                break;
            }

            turn += 1;
            info!(turn, max_turns, "turn started");
            self.sink.on_turn_start(turn, max_turns);
            self.sink.on_thinking();

            let outcome = match self.run_turn(turn, &current_input).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(turn, error = %err, "transport failed");
                    self.sink.on_error(err.message());
                    let note = err.message().to_string();
                    self.record(|h| h.append_system_message(&note, "error", Some("transport_error")));
                    exit = Exit::TransportFailed;
                    break;
                }
            };

            if outcome.fragments == 0 {
                info!(turn, "no scripts in response, agent is done");
                exit = Exit::Done;
                break;
            }

            current_input = next_input(&outcome.outputs);
            debug!(turn, chars = current_input.len(), "feeding script output back");
            all_outputs.extend(outcome.outputs);
        }

        if exit == Exit::MaxTurns {
            warn!(max_turns, "reached maximum turns");
            self.sink.on_error(&format!("Reached maximum turns ({})", max_turns));
        }

        Ok(all_outputs.join("\n"))
    }

    /// One request/response round plus execution of its fragments
    async fn run_turn(&mut self, turn: usize, input: &str) -> Result<TurnOutcome> {
        self.transport.query(input).await?;
        let mut stream = self.transport.receive_response().await?;

        let mut full_text = String::new();
        let mut first_unit = true;
        let mut stats = TurnStats::default();

        while let Some(unit) = stream.next().await {
            if unit.is_terminal() {
                if let ResponseUnit::Result(s) = unit {
                    stats = s;
                }
                break;
            }
            if first_unit {
                self.sink.on_thinking_done();
                first_unit = false;
            }

            match unit {
                ResponseUnit::Text(text) => {
                    debug!(turn, chars = text.len(), "text unit");
                    let display = self.extractor.display_text(&text);
                    full_text.push_str(&text);
                    if !display.is_empty() {
                        self.sink.on_text(&display);
                        self.record(|h| h.append_assistant_message(&display, None));
                    }
                }
                ResponseUnit::ToolUse { id, name, input } => {
                    let details = tool_details(&name, &input);
                    info!(turn, tool = %name, "tool use");
                    self.sink.on_tool_use(&name, &details);
                    let input = if input.is_object() {
                        input
                    } else {
                        serde_json::json!({ "input": input.to_string() })
                    };
                    self.record(|h| h.append_tool_use(&name, input, Some(&id)));
                }
                ResponseUnit::Thinking(thinking) => {
                    debug!(turn, chars = thinking.len(), "thinking unit");
                    self.record(|h| h.append_thinking(&thinking));
                }
                ResponseUnit::Error(message) => {
                    return Err(error::stream_failed(message));
                }
                ResponseUnit::Result(_) => {}
            }
        }
        drop(stream);

        let fragments = self.extractor.extract(&full_text);
        info!(turn, count = fragments.len(), "scripts found");

        let mut outputs = Vec::with_capacity(fragments.len());
        for (i, fragment) in fragments.iter().enumerate() {
            let code = fragment.trim();
            debug!(turn, script = i + 1, "running script");
            self.sink.on_script_code(code);

            let outcome = self.executor.execute(code);
            let text = outcome.text();
            if outcome.is_error() || !text.is_empty() {
                self.sink.on_script_output(&text);
            }
            self.record(|h| h.append_script_execution(code, &text, outcome.is_error()));
            outputs.push(text);
        }

        if self.config.verbose {
            let turns = stats.num_turns.unwrap_or(turn);
            let cost = stats.total_cost_usd.unwrap_or(0.0);
            info!(turns, cost, input_tokens = stats.input_tokens, output_tokens = stats.output_tokens, "turn stats");
            self.sink.on_result(turns, cost);
        }

        Ok(TurnOutcome {
            fragments: fragments.len(),
            outputs,
        })
    }

    /// Write to the session log; a failed write never stops the loop.
    fn record(&mut self, write: impl FnOnce(&mut SessionLog) -> Result<String>) {
        if let Some(history) = self.history.as_mut() {
            if let Err(err) = write(history) {
                warn!(error = %err, "session log write dropped");
            }
        }
    }
}

/// Short, human-relevant summary of a tool invocation
pub fn tool_details(name: &str, input: &serde_json::Value) -> String {
    let field = match name {
        "Read" => "file_path",
        "Grep" | "Glob" => "pattern",
        "Task" => "description",
        _ => {
            warn!(tool = name, "unknown tool");
            return input.to_string();
        }
    };
    input
        .get(field)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

/// Next agent input built from a turn's fragment outputs
pub fn next_input(outputs: &[String]) -> String {
    match outputs {
        [single] if single.is_empty() => NO_OUTPUT_SENTINEL.to_string(),
        [single] => single.clone(),
        many => many
            .iter()
            .enumerate()
            .map(|(i, output)| format!("Script {} output:\n{}", i + 1, output))
            .collect::<Vec<_>>()
            .join("\n\n"),
    }
}

/// Check the agent setup without a database.
///
/// Connects, asks for a one-line reply, and disconnects. Returns the reply
/// text or the error that stopped it.
pub async fn probe_connection<T: AgentTransport>(transport: &mut T) -> Result<String> {
    info!(transport = transport.name(), "testing agent connection");
    transport.connect().await?;

    let reply = async {
        transport.query(PROBE_PROMPT).await?;
        transport.receive_response().await?.collect_text().await
    }
    .await;

    if let Err(err) = transport.disconnect().await {
        warn!(error = %err, "disconnect after probe failed");
    }

    match reply {
        Ok(text) => {
            info!(chars = text.len(), "connection test successful");
            Ok(text.trim().to_string())
        }
        Err(err) => {
            warn!(error = %err, "connection test failed");
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_details() {
        assert_eq!(tool_details("Read", &json!({"file_path": "/p/USAGE.md"})), "/p/USAGE.md");
        assert_eq!(tool_details("Grep", &json!({"pattern": "xref"})), "xref");
        assert_eq!(tool_details("Glob", &json!({"pattern": "*.md"})), "*.md");
        assert_eq!(tool_details("Task", &json!({"description": "scan"})), "scan");
        assert_eq!(tool_details("Read", &json!({})), "");
        assert_eq!(tool_details("WebFetch", &json!({"url": "x"})), r#"{"url":"x"}"#);
    }

    #[test]
    fn test_next_input() {
        assert_eq!(next_input(&["func_0\n".to_string()]), "func_0\n");
        assert_eq!(next_input(&[String::new()]), NO_OUTPUT_SENTINEL);
        assert_eq!(
            next_input(&["a\n".to_string(), String::new(), "Script error: x".to_string()]),
            "Script 1 output:\na\n\n\nScript 2 output:\n\n\nScript 3 output:\nScript error: x"
        );
    }

    #[test]
    fn test_cancel_handle_is_shared() {
        let handle = CancelHandle::new();
        let other = handle.clone();
        other.cancel();
        assert!(handle.is_cancelled());
        handle.reset();
        assert!(!other.is_cancelled());
    }
}
