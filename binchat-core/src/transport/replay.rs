//! Replays canned responses

use super::*;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Transport that answers each query with the next scripted response.
///
/// Every query is recorded so callers can check what was fed back. Once
/// the script runs out, replies contain only the terminal unit, which ends
/// the turn loop naturally.
#[derive(Default)]
pub struct ReplayTransport {
    responses: VecDeque<Vec<ResponseUnit>>,
    queries: Arc<Mutex<Vec<String>>>,
    connected: bool,
    awaiting_response: bool,
    fail_connect: Option<String>,
    fail_query_at: Option<(usize, String)>,
}

impl ReplayTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply; a terminal unit is appended if missing
    pub fn push_response(mut self, mut units: Vec<ResponseUnit>) -> Self {
        if !units.last().is_some_and(ResponseUnit::is_terminal) {
            units.push(ResponseUnit::Result(TurnStats::default()));
        }
        self.responses.push_back(units);
        self
    }

    /// Queue a reply made of a single prose unit
    pub fn push_text(self, text: impl Into<String>) -> Self {
        self.push_response(vec![ResponseUnit::Text(text.into())])
    }

    /// Make `connect` fail with the given message
    pub fn fail_connect(mut self, message: impl Into<String>) -> Self {
        self.fail_connect = Some(message.into());
        self
    }

    /// Make the n-th query (1-based) fail with the given message
    pub fn fail_query_at(mut self, n: usize, message: impl Into<String>) -> Self {
        self.fail_query_at = Some((n, message.into()));
        self
    }

    /// Shared view of every query sent so far, usable after the transport moves
    pub fn query_log(&self) -> Arc<Mutex<Vec<String>>> {
        self.queries.clone()
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.len()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

impl AgentTransport for ReplayTransport {
    fn name(&self) -> &str {
        "replay"
    }

    async fn connect(&mut self) -> Result<()> {
        if let Some(message) = &self.fail_connect {
            return Err(error::network_failed(message.clone()));
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        self.awaiting_response = false;
        Ok(())
    }

    async fn query(&mut self, input: &str) -> Result<()> {
        if !self.connected {
            return Err(error::not_connected());
        }
        let count = {
            let mut queries = self.queries.lock().unwrap_or_else(PoisonError::into_inner);
            queries.push(input.to_string());
            queries.len()
        };
        if let Some((n, message)) = &self.fail_query_at {
            if *n == count {
                return Err(error::transport_failed(message.clone()));
            }
        }
        debug!(query = count, "replay query");
        self.awaiting_response = true;
        Ok(())
    }

    async fn receive_response(&mut self) -> Result<ResponseStream> {
        if !self.awaiting_response {
            return Err(error::stream_failed("no query in flight"));
        }
        self.awaiting_response = false;
        let units = self
            .responses
            .pop_front()
            .unwrap_or_else(|| vec![ResponseUnit::Result(TurnStats::default())]);
        Ok(ResponseStream::from_units(units))
    }
}
