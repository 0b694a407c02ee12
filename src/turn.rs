//! One user turn: prompt, model, parse, confirm, execute, record.
//!
//! The `user` entry is appended before the model is called, so it stays in
//! history when the call fails. Nothing is retried.

use crate::error::{TransportError, TurnError};
use crate::executor::{truncate_lines, Executor};
use crate::history::HistoryStore;
use crate::model::ModelClient;
use crate::parser;
use crate::prompt::{self, PromptContext};
use crate::types::{Entry, ExecOutput, ParsedResponse, PendingCommand, TurnOutcome};
use std::fmt::Write;
use tracing::{debug, info, warn};

/// Blocking yes/no decision on a proposed command.
pub trait Confirm {
    fn confirm(&mut self, pending: &PendingCommand) -> bool;
}

impl<F> Confirm for F
where
    F: FnMut(&PendingCommand) -> bool,
{
    fn confirm(&mut self, pending: &PendingCommand) -> bool {
        self(pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Prompting,
    AwaitingModel,
    Parsed,
    AwaitingConfirmation,
    Executing,
    Recording,
}

pub struct TurnController<M, E, C> {
    history: HistoryStore,
    context: PromptContext,
    model: M,
    executor: E,
    confirm: C,
    max_output_lines: usize,
    state: TurnState,
}

impl<M, E, C> TurnController<M, E, C>
where
    M: ModelClient,
    E: Executor,
    C: Confirm,
{
    pub fn new(
        history: HistoryStore,
        context: PromptContext,
        model: M,
        executor: E,
        confirm: C,
    ) -> Self {
        Self {
            history,
            context,
            model,
            executor,
            confirm,
            max_output_lines: 0,
            state: TurnState::Idle,
        }
    }

    /// Caps stdout and stderr recorded in tool entries; zero keeps everything.
    pub fn with_max_output_lines(mut self, max_lines: usize) -> Self {
        self.max_output_lines = max_lines;
        self
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn context(&self) -> &PromptContext {
        &self.context
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn confirmer(&self) -> &C {
        &self.confirm
    }

    pub fn confirmer_mut(&mut self) -> &mut C {
        &mut self.confirm
    }

    /// Swaps the model for later turns; history is kept.
    pub fn set_model(&mut self, model: M, model_name: impl Into<String>) {
        self.model = model;
        self.context.model_name = model_name.into();
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Drops the conversation window.
    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// Runs one turn to completion.
    ///
    /// `&mut self` keeps turns strictly sequential: a second turn cannot start
    /// while this one waits on the model, the operator or the executor.
    pub fn run_turn(&mut self, message: &str) -> Result<TurnOutcome, TurnError> {
        self.enter(TurnState::Prompting);
        let user_seq = self.history.append(Entry::user(message));
        let window: Vec<Entry> = self
            .history
            .snapshot()
            .into_iter()
            .filter(|e| e.sequence() != user_seq)
            .collect();
        let prompt = prompt::build(&window, message, &self.context);

        self.enter(TurnState::AwaitingModel);
        let raw = match self.model.invoke(&prompt) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(%err, "model call failed");
                self.enter(TurnState::Idle);
                return Err(TurnError::ModelUnavailable(err));
            }
        };

        self.enter(TurnState::Parsed);
        let result = match parser::parse(&raw) {
            ParsedResponse::Answer { text } | ParsedResponse::Fallback { text } => {
                self.enter(TurnState::Recording);
                self.history.append(Entry::assistant(text.clone()));
                Ok(TurnOutcome::Answered { text })
            }
            ParsedResponse::ShellRequest { command, reason } => {
                let pending = PendingCommand {
                    command,
                    reason,
                    raw,
                };
                self.resolve(pending)
            }
        };

        self.enter(TurnState::Idle);
        result
    }

    fn resolve(&mut self, pending: PendingCommand) -> Result<TurnOutcome, TurnError> {
        self.history.append(Entry::assistant(pending.describe()));

        self.enter(TurnState::AwaitingConfirmation);
        if !self.confirm.confirm(&pending) {
            info!(command = %pending.command, "command declined");
            self.enter(TurnState::Recording);
            self.history.append(Entry::tool(format_declined(&pending.command)));
            return Ok(TurnOutcome::Declined {
                command: pending.command,
            });
        }

        self.enter(TurnState::Executing);
        let result = self.executor.run(&pending.command);

        self.enter(TurnState::Recording);
        match result {
            Ok(output) => {
                info!(command = %pending.command, exit_code = output.exit_code, "command finished");
                let content = format_executed(&pending.command, &output, self.max_output_lines);
                self.history.append(Entry::tool(content));
                Ok(TurnOutcome::Executed {
                    command: pending.command,
                    output,
                })
            }
            Err(source) => {
                warn!(command = %pending.command, err = %source, "command could not run");
                self.history
                    .append(Entry::tool(format_failed(&pending.command, &source)));
                Err(TurnError::ExecutorTransportFailure {
                    command: pending.command,
                    source,
                })
            }
        }
    }

    fn enter(&mut self, next: TurnState) {
        debug!(from = ?self.state, to = ?next, "turn state");
        self.state = next;
    }
}

fn format_executed(command: &str, output: &ExecOutput, max_lines: usize) -> String {
    let mut content = format!("Command: {command}\nExit code: {}\n", output.exit_code);
    if !output.stdout.is_empty() {
        let _ = write!(content, "Output:\n{}", truncate_lines(&output.stdout, max_lines));
        if !content.ends_with('\n') {
            content.push('\n');
        }
    }
    if !output.stderr.is_empty() {
        let _ = write!(content, "Error:\n{}", truncate_lines(&output.stderr, max_lines));
        if !content.ends_with('\n') {
            content.push('\n');
        }
    }
    content
}

fn format_declined(command: &str) -> String {
    format!("Command: {command}\nNot executed: declined by operator\n")
}

fn format_failed(command: &str, err: &TransportError) -> String {
    format!("Command: {command}\nNot executed: {err}\n")
}
