use crate::config::Config;
use crate::types::{Entry, Role};
use std::collections::BTreeMap;
use std::fmt::Write;

/// Operator environment rendered into every prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptContext {
    pub host: String,
    pub user: String,
    pub model_name: String,
    /// Routine name to one-line description.
    pub routines: BTreeMap<String, String>,
}

impl PromptContext {
    pub fn from_config(config: &Config) -> Self {
        Self {
            host: config.remote.host.clone(),
            user: config.remote.user.clone(),
            model_name: config.llm.model.clone(),
            routines: config
                .routines
                .iter()
                .map(|(name, r)| (name.clone(), r.description.clone()))
                .collect(),
        }
    }
}

const PREAMBLE: &str = r#"You are a terminal agent operating a remote server on behalf of the operator.
The operator confirms every command before it runs.

RESPONSE FORMAT:
Respond with exactly one JSON object and nothing else, in one of these shapes.

To answer a question:
{"type": "answer", "text": "your response"}

To run a shell command on the remote server:
{"type": "shell", "command": "the command to run", "reason": "what it does and why"}

RULES:
1. Propose one command at a time. You will see its output in the next turn.
2. Prefer read-only commands when inspecting state.
3. Do not wrap the JSON in markdown or add prose around it.
4. A response that is not valid JSON in one of these shapes is shown to the operator as plain text."#;

/// Renders the full prompt for the next model call.
///
/// Pure: the same inputs always produce the same string.
pub fn build(window: &[Entry], new_user_message: &str, context: &PromptContext) -> String {
    let mut prompt = String::from(PREAMBLE);
    prompt.push_str("\n\n");

    prompt.push_str("CONTEXT:\n");
    let _ = writeln!(prompt, "Host: {}", context.host);
    let _ = writeln!(prompt, "User: {}", context.user);
    let _ = writeln!(prompt, "Model: {}", context.model_name);
    if context.routines.is_empty() {
        prompt.push_str("Routines: (none)\n");
    } else {
        prompt.push_str("Routines:\n");
        for (name, description) in &context.routines {
            if description.is_empty() {
                let _ = writeln!(prompt, "  - {name}");
            } else {
                let _ = writeln!(prompt, "  - {name}: {description}");
            }
        }
    }

    if !window.is_empty() {
        prompt.push_str("\nCONVERSATION:\n");
        for entry in window {
            render_entry(&mut prompt, entry);
        }
    }

    let _ = write!(prompt, "\n{}: {}", Role::User.label(), new_user_message);
    prompt
}

fn render_entry(prompt: &mut String, entry: &Entry) {
    match entry.role() {
        Role::User | Role::Assistant => {
            let _ = writeln!(prompt, "{}: {}", entry.role().label(), entry.content());
        }
        Role::Tool => {
            let _ = writeln!(prompt, "{}:", entry.role().label());
            prompt.push_str(entry.content());
            if !entry.content().ends_with('\n') {
                prompt.push('\n');
            }
        }
    }
}
