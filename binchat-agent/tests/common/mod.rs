#![allow(dead_code)]

use binchat_core::OutputSink;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    TurnStart(usize, usize),
    Thinking,
    ThinkingDone,
    ToolUse(String, String),
    Text(String),
    ScriptCode(String),
    ScriptOutput(String),
    Error(String),
    Result(usize, f64),
}

/// Sink that remembers every event in order
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Error(msg) => Some(msg),
                _ => None,
            })
            .collect()
    }

    pub fn turn_starts(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::TurnStart(..)))
            .count()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl OutputSink for Recorder {
    fn on_turn_start(&self, turn: usize, max_turns: usize) {
        self.push(Event::TurnStart(turn, max_turns));
    }
    fn on_thinking(&self) {
        self.push(Event::Thinking);
    }
    fn on_thinking_done(&self) {
        self.push(Event::ThinkingDone);
    }
    fn on_tool_use(&self, tool_name: &str, details: &str) {
        self.push(Event::ToolUse(tool_name.into(), details.into()));
    }
    fn on_text(&self, text: &str) {
        self.push(Event::Text(text.into()));
    }
    fn on_script_code(&self, code: &str) {
        self.push(Event::ScriptCode(code.into()));
    }
    fn on_script_output(&self, output: &str) {
        self.push(Event::ScriptOutput(output.into()));
    }
    fn on_error(&self, message: &str) {
        self.push(Event::Error(message.into()));
    }
    fn on_result(&self, num_turns: usize, cost_usd: f64) {
        self.push(Event::Result(num_turns, cost_usd));
    }
}
