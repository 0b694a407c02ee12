use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure of the executor capability before any exit code was produced.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("i/o error while running command: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("could not reach {target}: {stderr}")]
    Connection { target: String, stderr: String },
}

/// Failure of the model capability.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model did not answer within {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("request failed: {0}")]
    Http(#[source] reqwest::Error),

    #[error("model endpoint returned {code}: {body}")]
    Status { code: u16, body: String },

    #[error("model process exited with {exit_code}: {stderr}")]
    Remote { exit_code: i32, stderr: String },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors that abort a turn. Both are local to that turn.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("model unavailable: {0}")]
    ModelUnavailable(#[source] ModelError),

    #[error("could not run `{command}`: {source}")]
    ExecutorTransportFailure {
        command: String,
        #[source]
        source: TransportError,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("cannot serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("cannot write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
