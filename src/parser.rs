//! Classification of raw model output into the tool protocol.
//!
//! The model is asked to answer with exactly one JSON object:
//!
//! ```json
//! {"type": "answer", "text": "..."}
//! {"type": "shell", "command": "...", "reason": "..."}
//! ```
//!
//! Anything else is plain text and comes back as [`ParsedResponse::Fallback`]
//! carrying the raw response unchanged. Parsing never fails.

use crate::types::ParsedResponse;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ToolMessage {
    Answer {
        text: String,
    },
    Shell {
        command: String,
        #[serde(default)]
        reason: Option<String>,
    },
}

pub fn parse(raw: &str) -> ParsedResponse {
    // The whole trimmed response must be the object; no scanning for braces.
    let value = match serde_json::from_str::<Value>(raw.trim()) {
        Ok(value @ Value::Object(_)) => value,
        Ok(_) => {
            debug!("model response is JSON but not an object");
            return fallback(raw);
        }
        Err(err) => {
            debug!(%err, "model response is plain text");
            return fallback(raw);
        }
    };

    let message = match ToolMessage::deserialize(value) {
        Ok(message) => message,
        Err(err) => {
            debug!(%err, "model response is not a tool message");
            return fallback(raw);
        }
    };

    match message {
        ToolMessage::Answer { text } => ParsedResponse::Answer { text },
        ToolMessage::Shell { command, reason } => {
            if command.trim().is_empty() {
                debug!("shell request without a command");
                return fallback(raw);
            }
            ParsedResponse::ShellRequest {
                command,
                reason: reason.unwrap_or_default(),
            }
        }
    }
}

fn fallback(raw: &str) -> ParsedResponse {
    ParsedResponse::Fallback {
        text: raw.to_string(),
    }
}
