use anyhow::Result;
use clap::{Parser, Subcommand};
use rex::commands::{cmd_ask, cmd_chat, cmd_config, cmd_doctor};
use rex::config::{get_config_path, load_config, Config};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rex", version, about = "Ask a local model to operate a remote host")]
struct Cli {
    /// Config file (default: ~/.config/rex/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Remote host, overrides the config file
    #[arg(long, global = true)]
    host: Option<String>,

    /// Remote user, overrides the config file
    #[arg(long, global = true)]
    user: Option<String>,

    /// Model name, overrides the config file
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Run commands on this machine instead of over ssh
    #[arg(long, global = true)]
    local: bool,

    /// More logging on stderr (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run a single turn and exit
    Ask {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },
    /// Check the config, the host and the model
    Doctor,
    /// Open the config file in $EDITOR
    Config,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "rex=warn",
        1 => "rex=debug",
        _ => "rex=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(host) = &cli.host {
        config.remote.host = host.clone();
    }
    if let Some(user) = &cli.user {
        config.remote.user = user.clone();
    }
    if let Some(model) = &cli.model {
        config.llm.model = model.clone();
    }
    if cli.local {
        config.remote.local = true;
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(get_config_path);
    let mut config = load_config(Some(&config_path));
    apply_overrides(&mut config, &cli);

    match &cli.command {
        None => cmd_chat(&config, &config_path),
        Some(Cmd::Ask { query }) => cmd_ask(&query.join(" "), &config, &config_path),
        Some(Cmd::Doctor) => cmd_doctor(&config, &config_path),
        Some(Cmd::Config) => cmd_config(&config_path),
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("rex: {:#}", e);
        std::process::exit(1);
    }
}
