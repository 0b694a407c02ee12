use crate::config::Routine;
use crate::error::TurnError;
use crate::safety::{Approval, Approve};
use crate::types::{Entry, ExecOutput, PendingCommand, RiskLevel, Role, TurnOutcome};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    style::Stylize,
    terminal,
};
use std::collections::BTreeMap;
use std::io::{self, IsTerminal, Write};
use std::time::Duration;

pub fn print_header(target: &str, model: &str) {
    println!("{} {} {}", "rex".bold(), target.cyan(), format!("({model})").dim());
    println!("{}", "type /help for commands, /exit to quit".dim());
    println!();
}

pub fn read_input() -> io::Result<Option<String>> {
    print!("{} ", ">".bold().green());
    io::stdout().flush()?;

    let mut line = String::new();
    if io::stdin().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

pub fn print_thinking() {
    eprint!("{}", "thinking...".dim());
    io::stderr().flush().ok();
}

pub fn clear_thinking() {
    eprint!("\r           \r");
    io::stderr().flush().ok();
}

pub fn print_outcome(outcome: &TurnOutcome) {
    match outcome {
        TurnOutcome::Answered { text } => {
            println!();
            println!("{}", text);
            println!();
        }
        TurnOutcome::Executed { output, .. } => print_output(output),
        TurnOutcome::Declined { .. } => {
            println!("{}", "not executed.".dim());
            println!();
        }
    }
}

pub fn print_output(output: &ExecOutput) {
    if !output.stdout.is_empty() {
        print!("{}", output.stdout);
        if !output.stdout.ends_with('\n') {
            println!();
        }
    }
    if !output.stderr.is_empty() {
        eprint!("{}", output.stderr.as_str().red());
        if !output.stderr.ends_with('\n') {
            eprintln!();
        }
    }
    let status = format!("exit {}", output.exit_code);
    if output.succeeded() {
        println!("{}", status.dim());
    } else {
        println!("{}", status.yellow());
    }
    println!();
}

pub fn print_turn_error(err: &TurnError) {
    match err {
        TurnError::ModelUnavailable(_) => {
            print_error(&err.to_string());
            eprintln!("  {}", "your message was kept; try again when the model is back".dim());
        }
        TurnError::ExecutorTransportFailure { .. } => print_error(&err.to_string()),
    }
    eprintln!();
}

pub fn print_error(message: &str) {
    eprintln!("{} {}", "error:".red().bold(), message);
}

pub fn print_plan(pending: &PendingCommand, risk: RiskLevel) {
    println!();
    println!("  {}", pending.command.as_str().bold());
    if !pending.reason.is_empty() {
        println!("  {}", pending.reason.as_str().dim());
    }
    if risk == RiskLevel::Dangerous {
        println!();
        println!("  {}", "warning: this command may be destructive".yellow());
    }
}

pub fn print_blocked(pending: &PendingCommand) {
    println!();
    println!("  {}", pending.command);
    println!();
    println!("  {}", "refused: command blocked for safety".red());
}

pub fn print_history(entries: &[Entry]) {
    if entries.is_empty() {
        println!("no history yet.");
        return;
    }
    for entry in entries {
        let label = match entry.role() {
            Role::User => entry.role().label().green(),
            Role::Assistant => entry.role().label().cyan(),
            Role::Tool => entry.role().label().magenta(),
        };
        println!("{} {}", format!("#{}", entry.sequence()).dim(), label);
        for line in entry.content().lines() {
            println!("    {}", line);
        }
    }
    println!();
}

pub fn print_routines(routines: &BTreeMap<String, Routine>) {
    if routines.is_empty() {
        println!("no routines configured.");
        return;
    }
    for (name, routine) in routines {
        println!("  {}  {}", name.as_str().bold(), routine.description);
        println!("      {}", routine.command.as_str().dim());
    }
    println!();
}

pub fn print_allowlist(allowlist: &[String]) {
    if allowlist.is_empty() {
        println!("allowlist is empty.");
        return;
    }
    for pattern in allowlist {
        println!("  {}", pattern);
    }
    println!();
}

/// Asks on the terminal. One keypress when stdin is a tty, a line otherwise.
pub struct TerminalApprover {
    target: String,
}

impl TerminalApprover {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

impl Approve for TerminalApprover {
    fn approve(&mut self, pending: &PendingCommand, risk: RiskLevel) -> Approval {
        clear_thinking();
        print_plan(pending, risk);
        print!("run on {}? [y]es / [a]lways / [N]o ", self.target.as_str().cyan());
        io::stdout().flush().ok();

        let approval = if io::stdin().is_terminal() {
            read_key().unwrap_or(Approval::Deny)
        } else {
            read_answer().unwrap_or(Approval::Deny)
        };
        println!();
        approval
    }

    fn refused(&mut self, pending: &PendingCommand) {
        clear_thinking();
        print_blocked(pending);
    }
}

fn read_key() -> Option<Approval> {
    terminal::enable_raw_mode().ok()?;
    let result = loop {
        match event::poll(Duration::from_millis(100)) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(_) => break None,
        }
        let Ok(Event::Key(k)) = event::read() else {
            continue;
        };
        if k.kind != KeyEventKind::Press {
            continue;
        }
        match k.code {
            KeyCode::Char('y') => break Some(Approval::Once),
            KeyCode::Char('a') => break Some(Approval::Always),
            KeyCode::Char('c') if k.modifiers.contains(KeyModifiers::CONTROL) => {
                break Some(Approval::Deny)
            }
            KeyCode::Char('n') | KeyCode::Char('q') | KeyCode::Enter | KeyCode::Esc => {
                break Some(Approval::Deny)
            }
            _ => {}
        }
    };
    terminal::disable_raw_mode().ok();
    result
}

fn read_answer() -> Option<Approval> {
    let mut input = String::new();
    if io::stdin().read_line(&mut input).ok()? == 0 {
        return None;
    }
    Some(match input.trim().to_lowercase().as_str() {
        "y" | "yes" => Approval::Once,
        "a" | "always" => Approval::Always,
        _ => Approval::Deny,
    })
}
