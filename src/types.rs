use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::Tool => "Tool result",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One item in the conversation log.
///
/// Entries are built unsequenced and receive their sequence number from
/// [`HistoryStore::append`](crate::history::HistoryStore::append). After that
/// they are never modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    role: Role,
    content: String,
    sequence: u64,
    group: u64,
}

impl Entry {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            sequence: 0,
            group: 0,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(Role::Tool, content)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Sequence of the entry that opened this entry's turn-group.
    pub fn group(&self) -> u64 {
        self.group
    }

    pub(crate) fn stamp(mut self, sequence: u64, group: u64) -> Self {
        self.sequence = sequence;
        self.group = group;
        self
    }
}

/// Classification of one raw model response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedResponse {
    Answer { text: String },
    ShellRequest { command: String, reason: String },
    /// Not a recognised tool message; `text` is the raw response, untouched.
    Fallback { text: String },
}

/// A shell request waiting for the operator's yes/no.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    pub command: String,
    pub reason: String,
    pub raw: String,
}

impl PendingCommand {
    /// Text recorded as the assistant's message for this proposal.
    pub fn describe(&self) -> String {
        if self.reason.is_empty() {
            format!("Proposed command: {}", self.command)
        } else {
            format!("Proposed command: {}\nReason: {}", self.command, self.reason)
        }
    }
}

/// Result of a command that ran to completion, whatever its exit code.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// How a turn that did not error ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Answered { text: String },
    Executed { command: String, output: ExecOutput },
    Declined { command: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    Safe,
    Review,
    Dangerous,
    Blocked,
}
