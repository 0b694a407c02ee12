use crate::config::{persist_allowlist, save_config, Config, ModelTransport};
use crate::executor::{self, Executor};
use crate::history::HistoryStore;
use crate::model::{self, ModelClient, OllamaClient};
use crate::prompt::PromptContext;
use crate::safety::ApprovalGate;
use crate::turn::TurnController;
use crate::ui::{self, TerminalApprover};
use anyhow::{Context, Result};
use std::path::Path;
use std::{env, io::Write, process::Command};
use tracing::{debug, info, warn};

pub type Agent =
    TurnController<Box<dyn ModelClient>, Box<dyn Executor>, ApprovalGate<TerminalApprover>>;

/// Slash commands understood by the read loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaCommand {
    Help,
    Exit,
    Clear,
    History,
    Routines,
    Run(String),
    Cmd(String),
    Model(String),
    Allowlist,
    AllowlistAdd(String),
    AllowlistRemove(String),
    Shell,
    Unknown(String),
}

/// `None` when `input` is a chat message rather than a command.
pub fn parse_meta(input: &str) -> Option<MetaCommand> {
    let input = input.trim();
    if !input.starts_with('/') {
        return None;
    }
    let (name, arg) = split_word(input);
    Some(match name {
        "/help" | "/?" => MetaCommand::Help,
        "/exit" | "/quit" => MetaCommand::Exit,
        "/clear" | "/reset" => MetaCommand::Clear,
        "/history" => MetaCommand::History,
        "/routines" => MetaCommand::Routines,
        "/run" => MetaCommand::Run(arg.to_string()),
        "/cmd" => MetaCommand::Cmd(arg.to_string()),
        "/model" => MetaCommand::Model(arg.to_string()),
        "/allowlist" | "/whitelist" => match split_word(arg) {
            ("", _) => MetaCommand::Allowlist,
            ("add", pattern) => MetaCommand::AllowlistAdd(pattern.to_string()),
            ("rm" | "remove", pattern) => MetaCommand::AllowlistRemove(pattern.to_string()),
            _ => MetaCommand::Unknown(input.to_string()),
        },
        "/shell" => MetaCommand::Shell,
        _ => MetaCommand::Unknown(input.to_string()),
    })
}

fn split_word(input: &str) -> (&str, &str) {
    match input.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (input, ""),
    }
}

pub fn build_agent(config: &Config) -> Result<Agent> {
    let model =
        model::from_config(&config.remote, &config.llm).context("cannot set up model client")?;
    let executor = executor::from_config(&config.remote);
    let gate = ApprovalGate::new(
        config.safety.clone(),
        config.behavior.auto_approve_safe,
        TerminalApprover::new(executor.target()),
    );
    Ok(TurnController::new(
        HistoryStore::new(config.behavior.history_window),
        PromptContext::from_config(config),
        model,
        executor,
        gate,
    )
    .with_max_output_lines(config.safety.max_output_lines))
}

pub fn cmd_chat(config: &Config, config_path: &Path) -> Result<()> {
    let mut config = config.clone();
    let mut agent = build_agent(&config)?;
    ui::print_header(&agent.executor().target(), &config.llm.model);

    loop {
        let Some(input) = ui::read_input().context("cannot read input")? else {
            println!();
            break;
        };
        if input.is_empty() {
            continue;
        }

        match parse_meta(&input) {
            Some(MetaCommand::Exit) => break,
            Some(meta) => run_meta(meta, &mut agent, &mut config),
            None => run_turn(&mut agent, &input),
        }
        save_allowlist(&agent, &mut config, config_path);
    }

    info!("session closed");
    Ok(())
}

pub fn cmd_ask(query: &str, config: &Config, config_path: &Path) -> Result<()> {
    let mut config = config.clone();
    let mut agent = build_agent(&config)?;
    ui::print_thinking();
    let result = agent.run_turn(query);
    ui::clear_thinking();
    save_allowlist(&agent, &mut config, config_path);
    match result {
        Ok(outcome) => {
            ui::print_outcome(&outcome);
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

fn run_turn(agent: &mut Agent, message: &str) {
    ui::print_thinking();
    let result = agent.run_turn(message);
    ui::clear_thinking();
    match result {
        Ok(outcome) => ui::print_outcome(&outcome),
        Err(err) => ui::print_turn_error(&err),
    }
}

/// Writes the allowlist back when an "always" answer or `/allowlist` changed it.
fn save_allowlist(agent: &Agent, config: &mut Config, config_path: &Path) {
    let current = agent.confirmer().allowlist();
    if current == config.safety.allowlist.as_slice() {
        return;
    }
    config.safety.allowlist = current.to_vec();
    if let Err(err) = persist_allowlist(config_path, current) {
        warn!(%err, "allowlist not saved");
        ui::print_error(&format!("allowlist not saved: {err}"));
    }
}

fn run_meta(meta: MetaCommand, agent: &mut Agent, config: &mut Config) {
    debug!(?meta, "meta command");
    match meta {
        MetaCommand::Help => print_help(),
        MetaCommand::Exit => {}
        MetaCommand::Clear => {
            agent.reset();
            println!("history cleared.");
        }
        MetaCommand::History => ui::print_history(&agent.history().snapshot()),
        MetaCommand::Routines => ui::print_routines(&config.routines),
        MetaCommand::Run(name) => run_routine(agent, config, &name),
        MetaCommand::Cmd(command) => {
            if command.is_empty() {
                ui::print_error("usage: /cmd <command>");
            } else {
                run_direct(agent, &command);
            }
        }
        MetaCommand::Model(name) => switch_model(agent, config, &name),
        MetaCommand::Allowlist => ui::print_allowlist(agent.confirmer().allowlist()),
        MetaCommand::AllowlistAdd(pattern) => {
            if pattern.is_empty() {
                ui::print_error("usage: /allowlist add <pattern>");
            } else if agent.confirmer_mut().allow(&pattern) {
                println!("added to allowlist: {pattern}");
            } else {
                println!("already allowlisted: {pattern}");
            }
        }
        MetaCommand::AllowlistRemove(pattern) => {
            if pattern.is_empty() {
                ui::print_error("usage: /allowlist rm <pattern>");
            } else if agent.confirmer_mut().disallow(&pattern) {
                println!("removed from allowlist: {pattern}");
            } else {
                ui::print_error(&format!("not in allowlist: {pattern} (see /allowlist)"));
            }
        }
        MetaCommand::Shell => {
            if let Err(err) = open_shell(config) {
                ui::print_error(&format!("{err:#}"));
            }
        }
        MetaCommand::Unknown(input) => {
            ui::print_error(&format!("unknown command: {input} (try /help)"));
        }
    }
}

fn run_routine(agent: &Agent, config: &Config, name: &str) {
    if name.is_empty() {
        ui::print_error("usage: /run <routine>");
        return;
    }
    let Some(routine) = config.routines.get(name) else {
        ui::print_error(&format!("no routine named '{name}' (see /routines)"));
        return;
    };
    if routine.command.trim().is_empty() {
        ui::print_error(&format!("routine '{name}' has no command"));
        return;
    }

    println!("running {}: {}", name, routine.command);
    run_direct(agent, &routine.command);
}

/// Operator-typed commands skip the model, the approval prompt and history.
fn run_direct(agent: &Agent, command: &str) {
    info!(command, "direct command");
    match agent.executor().run(command) {
        Ok(output) => ui::print_output(&output),
        Err(err) => ui::print_error(&format!("could not run `{command}`: {err}")),
    }
}

fn switch_model(agent: &mut Agent, config: &mut Config, name: &str) {
    if name.is_empty() {
        println!("model: {}", config.llm.model);
        return;
    }
    let mut llm = config.llm.clone();
    llm.model = name.to_string();
    match model::from_config(&config.remote, &llm) {
        Ok(client) => {
            agent.set_model(client, name);
            config.llm = llm;
            println!("model: {name}");
        }
        Err(err) => ui::print_error(&format!("cannot switch to {name}: {err}")),
    }
}

fn open_shell(config: &Config) -> Result<()> {
    let status = if config.remote.local {
        let shell = env::var("SHELL").unwrap_or_else(|_| "sh".to_string());
        Command::new(&shell).status()
    } else {
        Command::new(&config.remote.ssh_program)
            .arg("-p")
            .arg(config.remote.port.to_string())
            .arg(config.remote.target())
            .status()
    }
    .context("cannot start shell")?;
    debug!(%status, "shell exited");
    Ok(())
}

fn print_help() {
    println!("commands:");
    println!("  /help                     show this help");
    println!("  /history                  show the conversation window");
    println!("  /clear                    forget the conversation");
    println!("  /routines                 list configured routines");
    println!("  /run <routine>            run a routine directly");
    println!("  /cmd <command>            run a command directly");
    println!("  /model [name]             show or switch the model");
    println!("  /allowlist                commands that run without asking");
    println!("  /allowlist add <pattern>  allow a command, or a prefix ending in *");
    println!("  /allowlist rm <pattern>   stop allowing a pattern");
    println!("  /shell                    open an interactive shell on the host");
    println!("  /exit                     quit");
    println!();
    println!("anything else is sent to the model.");
    println!();
}

pub fn cmd_doctor(config: &Config, config_path: &Path) -> Result<()> {
    println!("diagnostics:");
    println!();

    print!("  config ... ");
    std::io::stdout().flush().ok();
    if config_path.exists() {
        println!("ok ({})", config_path.display());
    } else {
        println!("using defaults");
    }

    let executor = executor::from_config(&config.remote);
    print!("  host ({}) ... ", executor.target());
    std::io::stdout().flush().ok();
    match executor.run("true") {
        Ok(output) if output.succeeded() => println!("ok"),
        Ok(output) => println!("failed (exit {})", output.exit_code),
        Err(err) => {
            println!("failed");
            println!("    error: {}", err);
        }
    }

    if config.llm.transport == ModelTransport::Http {
        print!("  ollama ({}) ... ", config.llm.endpoint);
        std::io::stdout().flush().ok();
        match OllamaClient::new(&config.llm) {
            Ok(client) if client.is_available() => println!("ok"),
            Ok(_) => {
                println!("failed");
                println!("    try: ollama serve");
            }
            Err(err) => println!("failed ({})", err),
        }
    }

    let client = match model::from_config(&config.remote, &config.llm) {
        Ok(client) => client,
        Err(err) => {
            println!("  model ... failed ({})", err);
            println!();
            return Ok(());
        }
    };
    print!("  model ({}) ... ", client.model_name());
    std::io::stdout().flush().ok();
    match client.invoke("Say 'ok' and nothing else.") {
        Ok(_) => println!("ok"),
        Err(err) => {
            println!("failed");
            println!("    error: {}", err);
            println!("    try: ollama pull {}", client.model_name());
        }
    }

    println!();
    Ok(())
}

pub fn cmd_config(config_path: &Path) -> Result<()> {
    if !config_path.exists() {
        save_config(&Config::default(), config_path)?;
    }

    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
    Command::new(&editor)
        .arg(config_path)
        .status()
        .with_context(|| format!("cannot start editor {editor}"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_messages_are_not_commands() {
        assert_eq!(parse_meta("why is the sky blue?"), None);
        assert_eq!(parse_meta("check /var/log for errors"), None);
    }

    #[test]
    fn parses_meta_commands() {
        assert_eq!(parse_meta("/help"), Some(MetaCommand::Help));
        assert_eq!(parse_meta("  /quit "), Some(MetaCommand::Exit));
        assert_eq!(parse_meta("/clear"), Some(MetaCommand::Clear));
        assert_eq!(parse_meta("/history"), Some(MetaCommand::History));
        assert_eq!(parse_meta("/allowlist"), Some(MetaCommand::Allowlist));
        assert_eq!(
            parse_meta("/run   backup "),
            Some(MetaCommand::Run("backup".to_string()))
        );
        assert_eq!(parse_meta("/run"), Some(MetaCommand::Run(String::new())));
    }

    #[test]
    fn parses_direct_commands_and_model_switch() {
        assert_eq!(
            parse_meta("/cmd df -h | grep sda"),
            Some(MetaCommand::Cmd("df -h | grep sda".to_string()))
        );
        assert_eq!(parse_meta("/cmd"), Some(MetaCommand::Cmd(String::new())));
        assert_eq!(
            parse_meta("/model qwen2.5:7b"),
            Some(MetaCommand::Model("qwen2.5:7b".to_string()))
        );
        assert_eq!(parse_meta("/model"), Some(MetaCommand::Model(String::new())));
    }

    #[test]
    fn parses_allowlist_edits() {
        assert_eq!(
            parse_meta("/allowlist add systemctl status *"),
            Some(MetaCommand::AllowlistAdd("systemctl status *".to_string()))
        );
        assert_eq!(
            parse_meta("/whitelist rm docker ps"),
            Some(MetaCommand::AllowlistRemove("docker ps".to_string()))
        );
        assert_eq!(
            parse_meta("/allowlist remove uptime"),
            Some(MetaCommand::AllowlistRemove("uptime".to_string()))
        );
        assert_eq!(
            parse_meta("/allowlist add"),
            Some(MetaCommand::AllowlistAdd(String::new()))
        );
        assert_eq!(
            parse_meta("/allowlist purge"),
            Some(MetaCommand::Unknown("/allowlist purge".to_string()))
        );
    }

    #[test]
    fn unknown_commands_are_reported() {
        assert_eq!(
            parse_meta("/frobnicate now"),
            Some(MetaCommand::Unknown("/frobnicate now".to_string()))
        );
    }
}
