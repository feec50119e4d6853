//! Session log entry format
//!
//! One JSON object per line. The common envelope (`uuid`, `parentUuid`,
//! `sessionId`, `timestamp`, ...) is flattened together with a body tagged
//! by `type`:
//!
//! ```text
//! {"uuid":"…","parentUuid":null,"sessionId":"…","timestamp":"…",
//!  "version":"binchat-1.0.0","cwd":"/samples","isSidechain":false,
//!  "userType":"external","type":"user",
//!  "message":{"role":"user","content":[{"type":"text","text":"hi"}]}}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who produced an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::User => "USER",
            Role::Assistant => "ASSISTANT",
            Role::System => "SYSTEM",
        })
    }
}

/// A typed payload block inside a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
    Thinking {
        thinking: String,
    },
    /// Block types written by other tools
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub id: String,
    #[serde(rename = "type", default = "message_type")]
    pub kind: String,
    pub role: Role,
    pub model: String,
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<serde_json::Value>,
}

fn message_type() -> String {
    "message".to_string()
}

/// Role-specific part of an entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EntryBody {
    User {
        message: UserMessage,
    },
    Assistant {
        message: AssistantMessage,
    },
    System {
        content: String,
        level: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subtype: Option<String>,
    },
}

/// One immutable line of a session file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub uuid: String,
    pub parent_uuid: Option<String>,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub cwd: String,
    #[serde(default)]
    pub is_sidechain: bool,
    #[serde(default)]
    pub user_type: String,
    #[serde(flatten)]
    pub body: EntryBody,
}

impl LogEntry {
    pub fn role(&self) -> Role {
        match self.body {
            EntryBody::User { .. } => Role::User,
            EntryBody::Assistant { .. } => Role::Assistant,
            EntryBody::System { .. } => Role::System,
        }
    }

    pub fn blocks(&self) -> &[ContentBlock] {
        match &self.body {
            EntryBody::User { message } => &message.content,
            EntryBody::Assistant { message } => &message.content,
            EntryBody::System { .. } => &[],
        }
    }

    /// First text block of a user entry; tool results don't count
    pub fn user_text(&self) -> Option<&str> {
        if self.role() != Role::User {
            return None;
        }
        self.blocks().iter().find_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
    }

    /// Human-readable rendering for transcripts
    pub fn render(&self) -> String {
        if let EntryBody::System { content, level, .. } = &self.body {
            return format!("[SYSTEM:{}] {}", level, content);
        }

        let parts: Vec<String> = self
            .blocks()
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.clone()),
                ContentBlock::ToolUse { name, input, .. } => Some(match input.get("code").and_then(|c| c.as_str()) {
                    Some(code) => format!("<{}>\n{}", name, code),
                    None => format!("<{}> {}", name, input),
                }),
                ContentBlock::ToolResult { content, is_error, .. } => Some(if *is_error {
                    format!("(error) {}", content)
                } else {
                    content.clone()
                }),
                ContentBlock::Thinking { thinking } => Some(format!("(thinking) {}", thinking)),
                ContentBlock::Unknown => None,
            })
            .collect();

        format!("[{}] {}", self.role(), parts.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_foreign_timestamp_offset() {
        let line = r#"{"uuid":"u1","parentUuid":null,"sessionId":"s1","timestamp":"2025-01-02T03:04:05.123456+00:00","version":"ida-chat-1.0.0","cwd":"/bin","isSidechain":false,"userType":"external","type":"user","message":{"role":"user","content":[{"type":"text","text":"what is main?"}]}}"#;
        let entry: LogEntry = serde_json::from_str(line).unwrap();
        assert_eq!(entry.role(), Role::User);
        assert_eq!(entry.user_text(), Some("what is main?"));
        assert_eq!(entry.parent_uuid, None);
    }

    #[test]
    fn test_wire_shape() {
        let entry = LogEntry {
            uuid: "u2".into(),
            parent_uuid: Some("u1".into()),
            session_id: "s1".into(),
            timestamp: Utc::now(),
            version: "binchat-1.0.0".into(),
            cwd: "/samples".into(),
            is_sidechain: false,
            user_type: "external".into(),
            body: EntryBody::System {
                content: "Operation cancelled".into(),
                level: "warning".into(),
                subtype: None,
            },
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["type"], "system");
        assert_eq!(value["parentUuid"], "u1");
        assert_eq!(value["sessionId"], "s1");
        assert_eq!(value["isSidechain"], false);
        assert_eq!(value["level"], "warning");
        assert!(value.get("subtype").is_none());
    }

    #[test]
    fn test_unknown_block_types_are_tolerated() {
        let line = r#"{"uuid":"u1","parentUuid":null,"sessionId":"s1","timestamp":"2025-01-02T03:04:05Z","type":"assistant","message":{"id":"msg_1","type":"message","role":"assistant","model":"m","content":[{"type":"redacted_thinking","data":"x"},{"type":"text","text":"ok"}]}}"#;
        let entry: LogEntry = serde_json::from_str(line).unwrap();
        assert_eq!(entry.blocks().len(), 2);
        assert_eq!(entry.render(), "[ASSISTANT] ok");
    }

    #[test]
    fn test_tool_result_is_not_user_text() {
        let entry = LogEntry {
            uuid: "u3".into(),
            parent_uuid: None,
            session_id: "s1".into(),
            timestamp: Utc::now(),
            version: String::new(),
            cwd: String::new(),
            is_sidechain: false,
            user_type: String::new(),
            body: EntryBody::User {
                message: UserMessage {
                    role: Role::User,
                    content: vec![ContentBlock::ToolResult {
                        tool_use_id: "toolu_1".into(),
                        content: "Script error: boom".into(),
                        is_error: true,
                    }],
                },
            },
        };
        assert_eq!(entry.user_text(), None);
        assert_eq!(entry.render(), "[USER] (error) Script error: boom");
    }
}
