//! Configuration for the turn loop and the agent transport.

use crate::error::{self, Result};
use crate::extract::DEFAULT_SCRIPT_TAG;
use crate::executor::DEFAULT_BINDING;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

pub const ENV_MAX_TURNS: &str = "BINCHAT_MAX_TURNS";
pub const ENV_VERBOSE: &str = "BINCHAT_VERBOSE";
pub const ENV_SCRIPT_TAG: &str = "BINCHAT_SCRIPT_TAG";
/// `1` when running inside the disassembler UI
pub const ENV_INSIDE_UI: &str = "BINCHAT_INSIDE_UI";

/// Main system prompt, looked up in the prompt directory
pub const PROMPT_FILE: &str = "PROMPT.md";
/// UI interaction API, appended to the prompt inside the disassembler
pub const UI_PROMPT_FILE: &str = "IDA.md";

/// Turn loop settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// Upper bound on request/response rounds per user message
    pub max_turns: usize,
    /// Emit per-turn statistics through `on_result`
    pub verbose: bool,
    /// Tag wrapping executable fragments
    pub script_tag: String,
    /// Name of the database binding inside fragments
    pub binding: String,
    /// Add the UI addendum to the system prompt
    pub inside_ui: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_turns: 20,
            verbose: false,
            script_tag: DEFAULT_SCRIPT_TAG.to_string(),
            binding: DEFAULT_BINDING.to_string(),
            inside_ui: false,
        }
    }
}

impl ChatConfig {
    /// Defaults overlaid with `BINCHAT_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup.
    pub fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(raw) = lookup(ENV_MAX_TURNS) {
            let turns: usize = raw.trim().parse().map_err(|_| {
                error::config_invalid(ENV_MAX_TURNS, format!("expected a positive integer, got '{}'", raw))
            })?;
            if turns == 0 {
                return Err(error::config_invalid(ENV_MAX_TURNS, "must be at least 1"));
            }
            self.max_turns = turns;
        }

        if let Some(raw) = lookup(ENV_VERBOSE) {
            self.verbose = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                _ => {
                    return Err(error::config_invalid(
                        ENV_VERBOSE,
                        format!("expected a boolean, got '{}'", raw),
                    ))
                }
            };
        }

        if let Some(raw) = lookup(ENV_SCRIPT_TAG) {
            let tag = raw.trim();
            if tag.is_empty() || tag.contains(['<', '>', '/']) {
                return Err(error::config_invalid(
                    ENV_SCRIPT_TAG,
                    format!("'{}' is not a valid tag name", raw),
                ));
            }
            self.script_tag = tag.to_string();
        }

        if let Some(raw) = lookup(ENV_INSIDE_UI) {
            self.inside_ui = raw.trim() == "1";
        }

        Ok(self)
    }

    /// Cap on turns per user message
    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Report per-turn statistics
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Tag name wrapping fragments, without angle brackets
    pub fn with_script_tag(mut self, tag: impl Into<String>) -> Self {
        self.script_tag = tag.into();
        self
    }

    /// Name fragments use for the database handle
    pub fn with_binding(mut self, binding: impl Into<String>) -> Self {
        self.binding = binding.into();
        self
    }

    /// Add the UI addendum to the system prompt
    pub fn with_inside_ui(mut self, inside_ui: bool) -> Self {
        self.inside_ui = inside_ui;
        self
    }

    /// Prompt used when no prompt file can be read
    pub fn fallback_prompt(&self) -> String {
        format!(
            "You have access to an open IDA database via the `{}` variable. Use <{}> tags for code.",
            self.binding, self.script_tag
        )
    }

    /// System prompt from `dir`: [`PROMPT_FILE`] or the fallback, then
    /// [`UI_PROMPT_FILE`] when running inside the UI.
    pub fn load_system_prompt(&self, dir: impl AsRef<Path>) -> String {
        let dir = dir.as_ref();
        let main = dir.join(PROMPT_FILE);
        let mut prompt = match std::fs::read_to_string(&main) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %main.display(), error = %e, "prompt file not readable, using fallback");
                self.fallback_prompt()
            }
        };

        if self.inside_ui {
            let addendum = dir.join(UI_PROMPT_FILE);
            match std::fs::read_to_string(&addendum) {
                Ok(text) => {
                    info!(path = %addendum.display(), "appending UI prompt");
                    prompt.push_str("\n\n");
                    prompt.push_str(&text);
                }
                Err(e) => warn!(path = %addendum.display(), error = %e, "UI prompt not readable"),
            }
        }
        prompt
    }
}

/// Agent endpoint settings
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub max_tokens: usize,
    pub timeout_secs: u64,
    /// Token budget for extended thinking; off when `None`
    pub thinking_budget: Option<usize>,
    pub system_prompt: Option<String>,
    pub headers: HashMap<String, String>,
}

impl TransportConfig {
    /// Messages API defaults; the system prompt is the fallback for default chat settings
    pub fn anthropic(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            base_url: "https://api.anthropic.com/v1".into(),
            model: "claude-sonnet-4-20250514".into(),
            max_tokens: 8192,
            timeout_secs: 300,
            thinking_budget: None,
            system_prompt: Some(ChatConfig::default().fallback_prompt()),
            headers: HashMap::new(),
        }
    }

    /// Reads `ANTHROPIC_API_KEY`
    pub fn anthropic_from_env() -> Result<Self> {
        let key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| error::config_invalid("ANTHROPIC_API_KEY", "not set"))?;
        Ok(Self::anthropic(key))
    }

    /// Endpoint root, without a trailing slash
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Model id sent with every request
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Reply length cap
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Whole-request timeout in seconds
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Enable extended thinking with the given budget
    pub fn with_thinking(mut self, budget_tokens: usize) -> Self {
        self.thinking_budget = Some(budget_tokens);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// System prompt loaded from `dir` for the given chat settings
    pub fn with_prompt_from(self, chat: &ChatConfig, dir: impl AsRef<Path>) -> Self {
        let prompt = chat.load_system_prompt(dir);
        self.with_system_prompt(prompt)
    }

    /// Extra HTTP header on every request
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Timeout as a `Duration`
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ChatConfig::default();
        assert_eq!(config.max_turns, 20);
        assert!(!config.verbose);
        assert_eq!(config.script_tag, "idascript");
        assert_eq!(config.binding, "db");
    }

    #[test]
    fn test_overlay() {
        let config = ChatConfig::default()
            .overlay(vars(&[
                (ENV_MAX_TURNS, "5"),
                (ENV_VERBOSE, "true"),
                (ENV_SCRIPT_TAG, "pyscript"),
            ]))
            .unwrap();
        assert_eq!(config.max_turns, 5);
        assert!(config.verbose);
        assert_eq!(config.script_tag, "pyscript");
    }

    #[test]
    fn test_overlay_rejects_bad_values() {
        let err = ChatConfig::default()
            .overlay(vars(&[(ENV_MAX_TURNS, "lots")]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);

        let err = ChatConfig::default()
            .overlay(vars(&[(ENV_MAX_TURNS, "0")]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);

        let err = ChatConfig::default()
            .overlay(vars(&[(ENV_VERBOSE, "maybe")]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);

        let err = ChatConfig::default()
            .overlay(vars(&[(ENV_SCRIPT_TAG, "</x>")]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_fallback_prompt_names_binding_and_tag() {
        let config = ChatConfig::default();
        assert_eq!(
            config.fallback_prompt(),
            "You have access to an open IDA database via the `db` variable. Use <idascript> tags for code."
        );

        let custom = ChatConfig::default().with_binding("idb").with_script_tag("pyscript");
        let prompt = custom.fallback_prompt();
        assert!(prompt.contains("`idb`"));
        assert!(prompt.contains("<pyscript>"));

        let transport = TransportConfig::anthropic("sk-test");
        assert_eq!(transport.system_prompt, Some(config.fallback_prompt()));
    }

    #[test]
    fn test_load_system_prompt() {
        let dir = TempDir::new().unwrap();
        let config = ChatConfig::default();
        assert_eq!(config.load_system_prompt(dir.path()), config.fallback_prompt());

        std::fs::write(dir.path().join(PROMPT_FILE), "Analyze with db.").unwrap();
        std::fs::write(dir.path().join(UI_PROMPT_FILE), "Use db.ui to ask the user.").unwrap();
        assert_eq!(config.load_system_prompt(dir.path()), "Analyze with db.");

        let inside = config.clone().with_inside_ui(true);
        assert_eq!(
            inside.load_system_prompt(dir.path()),
            "Analyze with db.\n\nUse db.ui to ask the user."
        );

        let transport = TransportConfig::anthropic("sk-test").with_prompt_from(&inside, dir.path());
        assert_eq!(
            transport.system_prompt.as_deref(),
            Some("Analyze with db.\n\nUse db.ui to ask the user.")
        );
    }

    #[test]
    fn test_missing_ui_prompt_is_skipped() {
        let dir = TempDir::new().unwrap();
        let config = ChatConfig::default().with_inside_ui(true);
        assert_eq!(config.load_system_prompt(dir.path()), config.fallback_prompt());
    }

    #[test]
    fn test_inside_ui_overlay() {
        let config = ChatConfig::default().overlay(vars(&[(ENV_INSIDE_UI, "1")])).unwrap();
        assert!(config.inside_ui);
        let config = ChatConfig::default().overlay(vars(&[(ENV_INSIDE_UI, "0")])).unwrap();
        assert!(!config.inside_ui);
    }

    #[test]
    fn test_transport_builders() {
        let config = TransportConfig::anthropic("sk-test")
            .with_base_url("http://localhost:8080/v1/")
            .with_model("claude-opus-4-20250514")
            .with_thinking(2048)
            .with_header("x-trace", "1");
        assert_eq!(config.base_url, "http://localhost:8080/v1");
        assert_eq!(config.model, "claude-opus-4-20250514");
        assert_eq!(config.thinking_budget, Some(2048));
        assert_eq!(config.headers.get("x-trace").map(String::as_str), Some("1"));
        assert_eq!(config.timeout(), Duration::from_secs(300));
    }
}
