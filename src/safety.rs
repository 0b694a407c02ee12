use crate::config::SafetyConfig;
use crate::turn::Confirm;
use crate::types::{PendingCommand, RiskLevel};
use tracing::{info, warn};

const DESTRUCTIVE_COMMANDS: [&str; 6] = ["rm", "dd", "mkfs", "fdisk", "parted", "shred"];

/// `find` actions that modify or run things.
const SIDE_EFFECT_ARGS: [&str; 5] = ["-delete", "-exec", "-execdir", "-ok", "-okdir"];

pub fn assess_risk(command: &str, config: &SafetyConfig) -> RiskLevel {
    for pattern in &config.dangerous_patterns {
        if command.contains(pattern.as_str()) {
            return RiskLevel::Blocked;
        }
    }

    let programs: Vec<&str> = segments(command)
        .into_iter()
        .filter_map(|segment| segment.split_whitespace().next())
        .map(|first| first.rsplit('/').next().unwrap_or(first))
        .collect();

    if programs.iter().any(|p| DESTRUCTIVE_COMMANDS.contains(p)) {
        return RiskLevel::Dangerous;
    }

    let all_safe = !programs.is_empty()
        && programs
            .iter()
            .all(|p| config.safe_commands.iter().any(|safe| safe == p));

    if all_safe && !has_side_effects(command) {
        RiskLevel::Safe
    } else {
        RiskLevel::Review
    }
}

/// Splits a command line on `;`, `|`, `||`, `&&` and a backgrounding `&`.
///
/// The `&` in `2>&1` or `&>file` is part of a redirection, not a separator.
fn segments(command: &str) -> Vec<&str> {
    let bytes = command.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
    for (i, &b) in bytes.iter().enumerate() {
        let separator = match b {
            b';' | b'|' => true,
            b'&' => {
                let after_gt = i > 0 && bytes[i - 1] == b'>';
                let before_gt = bytes.get(i + 1) == Some(&b'>');
                !after_gt && !before_gt
            }
            _ => false,
        };
        if separator {
            parts.push(&command[start..i]);
            start = i + 1;
        }
    }
    parts.push(&command[start..]);
    parts
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Command substitution or a redirection that writes a file.
fn has_hidden_commands_or_writes(command: &str) -> bool {
    command.contains("$(")
        || command.contains("<(")
        || command.contains('`')
        || writes_file(command)
}

fn has_side_effects(command: &str) -> bool {
    has_hidden_commands_or_writes(command)
        || command
            .split_whitespace()
            .any(|word| SIDE_EFFECT_ARGS.contains(&word))
}

/// True when some `>` sends output anywhere but another descriptor or
/// `/dev/null`.
fn writes_file(command: &str) -> bool {
    let mut rest = command;
    while let Some(pos) = rest.find('>') {
        let target = rest[pos + 1..].trim_start_matches('>').trim_start();
        if !(target.starts_with('&') || target.starts_with("/dev/null")) {
            return true;
        }
        rest = &rest[pos + 1..];
    }
    false
}

/// An exact match of the whole line, or every segment matching an entry
/// (exactly, or by prefix when the entry ends in `*`).
///
/// Lines with command substitution or file redirections never match a prefix.
pub fn is_allowlisted(command: &str, allowlist: &[String]) -> bool {
    let command = command.trim();
    if allowlist.iter().any(|pattern| pattern == command) {
        return true;
    }
    if has_hidden_commands_or_writes(command) {
        return false;
    }
    let parts = segments(command);
    !parts.is_empty()
        && parts
            .iter()
            .all(|part| allowlist.iter().any(|pattern| matches_pattern(part, pattern)))
}

fn matches_pattern(segment: &str, pattern: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => segment.starts_with(prefix),
        None => segment == pattern,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approval {
    Once,
    Always,
    Deny,
}

/// Asks the operator about one command.
pub trait Approve {
    fn approve(&mut self, pending: &PendingCommand, risk: RiskLevel) -> Approval;

    /// Called instead of `approve` when the command is refused outright.
    fn refused(&mut self, _pending: &PendingCommand) {}
}

impl<F> Approve for F
where
    F: FnMut(&PendingCommand, RiskLevel) -> Approval,
{
    fn approve(&mut self, pending: &PendingCommand, risk: RiskLevel) -> Approval {
        self(pending, risk)
    }
}

/// Confirmation policy in front of the operator prompt.
///
/// Blocked commands are refused outright, allowlisted commands and (when
/// enabled) safe commands run without asking; everything else goes to the
/// wrapped [`Approve`].
pub struct ApprovalGate<A> {
    safety: SafetyConfig,
    auto_approve_safe: bool,
    approver: A,
}

impl<A: Approve> ApprovalGate<A> {
    pub fn new(safety: SafetyConfig, auto_approve_safe: bool, approver: A) -> Self {
        Self {
            safety,
            auto_approve_safe,
            approver,
        }
    }

    pub fn allowlist(&self) -> &[String] {
        &self.safety.allowlist
    }

    /// Adds `pattern`; false if it was already there.
    pub fn allow(&mut self, pattern: &str) -> bool {
        let pattern = pattern.trim();
        if pattern.is_empty() || self.safety.allowlist.iter().any(|p| p == pattern) {
            return false;
        }
        self.safety.allowlist.push(pattern.to_string());
        true
    }

    /// Removes `pattern`; false if it was not there.
    pub fn disallow(&mut self, pattern: &str) -> bool {
        let before = self.safety.allowlist.len();
        self.safety.allowlist.retain(|p| p != pattern.trim());
        self.safety.allowlist.len() != before
    }
}

impl<A: Approve> Confirm for ApprovalGate<A> {
    fn confirm(&mut self, pending: &PendingCommand) -> bool {
        let risk = assess_risk(&pending.command, &self.safety);

        if risk == RiskLevel::Blocked {
            warn!(command = %pending.command, "refusing blocked command");
            self.approver.refused(pending);
            return false;
        }

        if risk != RiskLevel::Dangerous && is_allowlisted(&pending.command, &self.safety.allowlist)
        {
            info!(command = %pending.command, "allowlisted");
            return true;
        }

        if risk == RiskLevel::Safe && self.auto_approve_safe {
            info!(command = %pending.command, "auto-approved safe command");
            return true;
        }

        match self.approver.approve(pending, risk) {
            Approval::Once => true,
            Approval::Always => {
                self.allow(&pending.command);
                true
            }
            Approval::Deny => false,
        }
    }
}
