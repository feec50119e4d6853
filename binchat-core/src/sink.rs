//! Presentation events.
//!
//! The turn loop reports progress through an [`OutputSink`]. Every method is
//! a one-way notification with a no-op default, so a host implements only
//! what it renders. Sinks are shared with the worker thread and take `&self`;
//! implementations needing state use interior mutability.

/// Receiver of turn-loop events, in the order they happen.
pub trait OutputSink: Send + Sync {
    /// A new turn begins (1-based)
    fn on_turn_start(&self, _turn: usize, _max_turns: usize) {}

    /// The request was sent; waiting for the first unit
    fn on_thinking(&self) {}

    /// The first unit of the response arrived
    fn on_thinking_done(&self) {}

    /// The agent invoked one of its own tools
    fn on_tool_use(&self, _tool_name: &str, _details: &str) {}

    /// Prose with script blocks removed
    fn on_text(&self, _text: &str) {}

    /// A fragment is about to run
    fn on_script_code(&self, _code: &str) {}

    /// What a fragment printed, or its error text
    fn on_script_output(&self, _output: &str) {}

    fn on_error(&self, _message: &str) {}

    /// Per-turn statistics, verbose mode only
    fn on_result(&self, _num_turns: usize, _cost_usd: f64) {}
}

/// Sink that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl OutputSink for NullSink {}

impl<S: OutputSink + ?Sized> OutputSink for std::sync::Arc<S> {
    fn on_turn_start(&self, turn: usize, max_turns: usize) {
        (**self).on_turn_start(turn, max_turns)
    }
    fn on_thinking(&self) {
        (**self).on_thinking()
    }
    fn on_thinking_done(&self) {
        (**self).on_thinking_done()
    }
    fn on_tool_use(&self, tool_name: &str, details: &str) {
        (**self).on_tool_use(tool_name, details)
    }
    fn on_text(&self, text: &str) {
        (**self).on_text(text)
    }
    fn on_script_code(&self, code: &str) {
        (**self).on_script_code(code)
    }
    fn on_script_output(&self, output: &str) {
        (**self).on_script_output(output)
    }
    fn on_error(&self, message: &str) {
        (**self).on_error(message)
    }
    fn on_result(&self, num_turns: usize, cost_usd: f64) {
        (**self).on_result(num_turns, cost_usd)
    }
}
