//! rex: ask a local model about a remote host, run the commands you approve.

pub mod commands;
pub mod config;
pub mod error;
pub mod executor;
pub mod history;
pub mod model;
pub mod parser;
pub mod prompt;
pub mod safety;
pub mod turn;
pub mod types;
pub mod ui;
