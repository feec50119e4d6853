//! # binchat core
//!
//! Building blocks for letting an LLM agent drive a binary-analysis database
//! through embedded scripts.
//!
//! ## Core Concepts
//! - **Extractor**: pulls `<idascript>` fragments out of agent prose
//! - **Executor**: runs a fragment against the database handle and captures what it prints
//! - **Transport**: one ongoing conversation with the agent, streamed unit by unit
//! - **Sink**: one-way presentation events
//! - **History**: append-only, causally chained JSONL session log

pub mod config;
pub mod error;
pub mod executor;
pub mod extract;
pub mod history;
pub mod logging;
pub mod sink;
pub mod transport;

pub use config::{ChatConfig, TransportConfig};
pub use error::{Error, ErrorKind, ErrorStatus, Result};
pub use executor::{
    marshal_channel, CommandEngine, Console, InProcessExecutor, MarshaledExecutor, OutputCapture,
    ScriptEngine, ScriptEnv, ScriptExecutor, ScriptMailbox, ScriptOutcome, ThreadBoundExecutor,
    DEFAULT_BINDING, SCRIPT_ERROR_PREFIX,
};
pub use extract::{ScriptBlockExtractor, DEFAULT_SCRIPT_TAG};
pub use history::{
    encode_target_path, verify_chain, ContentBlock, EntryBody, FileBackend, LogBackend,
    LogEntry, MemoryBackend, Role, SessionLog, SessionSummary, SCRIPT_TOOL_NAME,
};
pub use logging::ConversationLogger;
pub use sink::{NullSink, OutputSink};
pub use transport::{
    AgentTransport, AnthropicTransport, ReplayTransport, ResponseStream, ResponseUnit,
    TurnStats,
};
