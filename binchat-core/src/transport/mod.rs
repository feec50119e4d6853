//! # Agent transport
//!
//! One ongoing conversation with the agent. `query` sends the next input as a
//! continuation of that conversation; `receive_response` streams the reply as
//! typed [`ResponseUnit`]s that end with a single terminal
//! [`ResponseUnit::Result`].
//!
//! ## Implementations
//! - [`AnthropicTransport`]: Messages API over HTTP with server-sent events
//! - [`ReplayTransport`]: canned responses for tests and demos

pub mod anthropic;
pub mod replay;

pub use anthropic::AnthropicTransport;
pub use replay::ReplayTransport;

use crate::error::{self, Result};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// Statistics carried by the terminal unit of a response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnStats {
    /// Turn count as reported by the agent backend, if it tracks one
    pub num_turns: Option<usize>,
    pub total_cost_usd: Option<f64>,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// One typed unit of a streamed response
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseUnit {
    /// A prose chunk
    Text(String),
    /// Private reasoning, logged but never shown
    Thinking(String),
    /// The agent invoked one of its own tools
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    /// The backend failed mid-stream
    Error(String),
    /// Terminal marker
    Result(TurnStats),
}

impl ResponseUnit {
    pub fn text(text: impl Into<String>) -> Self {
        ResponseUnit::Text(text.into())
    }

    pub fn tool_use(name: impl Into<String>, input: serde_json::Value) -> Self {
        ResponseUnit::ToolUse {
            id: format!("toolu_{}", uuid::Uuid::new_v4().simple()),
            name: name.into(),
            input,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ResponseUnit::Result(_))
    }
}

/// Async sequence of response units
pub struct ResponseStream {
    inner: Pin<Box<dyn futures_core::Stream<Item = ResponseUnit> + Send>>,
}

impl ResponseStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: futures_core::Stream<Item = ResponseUnit> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// Stream over units already in memory
    pub fn from_units(units: Vec<ResponseUnit>) -> Self {
        Self::new(futures_util::stream::iter(units))
    }

    pub async fn next(&mut self) -> Option<ResponseUnit> {
        self.inner.next().await
    }

    /// Concatenate every prose chunk up to the terminal unit
    pub async fn collect_text(mut self) -> Result<String> {
        let mut text = String::new();
        while let Some(unit) = self.next().await {
            match unit {
                ResponseUnit::Text(t) => text.push_str(&t),
                ResponseUnit::Error(e) => return Err(error::stream_failed(e)),
                ResponseUnit::Result(_) => break,
                _ => {}
            }
        }
        Ok(text)
    }
}

impl std::fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseStream").finish_non_exhaustive()
    }
}

/// A stateful, multi-turn connection to the agent
#[allow(async_fn_in_trait)]
pub trait AgentTransport: Send {
    /// Transport name for logs (e.g. "anthropic", "replay")
    fn name(&self) -> &str;

    async fn connect(&mut self) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;

    /// Send the next input of the conversation
    async fn query(&mut self, input: &str) -> Result<()>;

    /// Stream the reply to the last query
    async fn receive_response(&mut self) -> Result<ResponseStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collect_text_stops_at_terminal() {
        let stream = ResponseStream::from_units(vec![
            ResponseUnit::text("Hello, "),
            ResponseUnit::Thinking("hmm".into()),
            ResponseUnit::text("world"),
            ResponseUnit::Result(TurnStats::default()),
            ResponseUnit::text("ignored"),
        ]);
        assert_eq!(stream.collect_text().await.unwrap(), "Hello, world");
    }

    #[tokio::test]
    async fn test_collect_text_surfaces_errors() {
        let stream = ResponseStream::from_units(vec![
            ResponseUnit::text("partial"),
            ResponseUnit::Error("overloaded".into()),
        ]);
        let err = stream.collect_text().await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::StreamFailed);
    }

    #[test]
    fn test_stream_ends_after_units() {
        let mut stream = ResponseStream::from_units(vec![ResponseUnit::text("only")]);
        tokio_test::block_on(async {
            assert_eq!(stream.next().await, Some(ResponseUnit::text("only")));
            assert_eq!(stream.next().await, None);
        });
    }

    #[test]
    fn test_tool_use_ids() {
        let unit = ResponseUnit::tool_use("Read", serde_json::json!({"file_path": "/tmp/a"}));
        match unit {
            ResponseUnit::ToolUse { id, name, .. } => {
                assert!(id.starts_with("toolu_"));
                assert_eq!(name, "Read");
            }
            other => panic!("unexpected unit: {:?}", other),
        }
        assert!(ResponseUnit::Result(TurnStats::default()).is_terminal());
    }
}
