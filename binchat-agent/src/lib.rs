//! # binchat agent
//!
//! The agent drives an LLM against a binary-analysis database:
//! 1. The user asks a question
//! 2. The agent answers with prose and `<idascript>` blocks
//! 3. Each block runs against the database and its output is captured
//! 4. The outputs become the agent's next input
//! 5. Repeat until the agent answers without scripts, the turn cap is hit,
//!    or the user cancels
//!
//! [`ChatCore`] is the loop itself; [`ChatWorker`] runs it on a background
//! thread for hosts with their own event loop.

mod agent;
mod worker;

pub use agent::{
    next_input, probe_connection, tool_details, CancelHandle, ChatCore, CANCELLED_MESSAGE,
    NO_OUTPUT_SENTINEL,
};
pub use worker::{ChatWorker, Reply, WorkerCommand};
