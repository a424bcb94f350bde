//! Runtime configuration shared by every component as `Arc<Config>`.

use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use tracing::debug;

use crate::{
    auth::Credentials,
    cli::{BackoffKind, RunArgs},
    supervisor::Backoff,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub watchdog_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(10),
            ping_timeout: Duration::from_secs(5),
            watchdog_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub read_port: u16,
    pub write_port: u16,
    pub history_path: PathBuf,
    pub token_path: PathBuf,
    pub credentials: Credentials,
    pub timings: Timings,
    pub backoff: Backoff,
}

impl Config {
    /// Builds the configuration, falling back to the token file when no
    /// token was given. Fails when neither a token nor a username is known.
    pub fn from_args(args: RunArgs) -> Result<Self> {
        let token = match args.token {
            Some(token) => Some(token),
            None => load_token(&args.token_file).with_context(|| {
                format!("failed to read token file {}", args.token_file.display())
            })?,
        };

        let credentials = Credentials::new(token, args.username);
        credentials.validate()?;

        let backoff = match args.backoff {
            BackoffKind::Immediate => Backoff::Immediate,
            BackoffKind::Linear => Backoff::Linear {
                step: args.backoff_step,
                max: args.backoff_max,
            },
        };

        Ok(Self {
            host: args.server.host,
            read_port: args.read_port,
            write_port: args.server.write_port,
            history_path: args.history,
            token_path: args.token_file,
            credentials,
            timings: Timings {
                ping_interval: args.ping_interval,
                ping_timeout: args.ping_timeout,
                watchdog_timeout: args.watchdog_timeout,
            },
            backoff,
        })
    }
}

/// First non-blank line of `path`, or `None` when the file does not exist.
pub fn load_token(path: &Path) -> io::Result<Option<String>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no token file");
            return Ok(None);
        }
        Err(err) => return Err(err),
    };

    Ok(contents
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string))
}

pub fn save_token(path: &Path, token: &str) -> io::Result<()> {
    std::fs::write(path, format!("{token}\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cli::Cli, error::ChatError};
    use clap::Parser;

    fn run_args(extra: &[&str]) -> RunArgs {
        let mut argv = vec!["resilient_chat", "run"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).expect("parse cli").command {
            crate::cli::Command::Run(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn token_file_round_trip_trims_whitespace() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("token.txt");

        assert_eq!(load_token(&path).expect("missing file"), None);

        save_token(&path, "abc123").expect("save");
        assert_eq!(load_token(&path).expect("load").as_deref(), Some("abc123"));

        std::fs::write(&path, "\n  spaced  \nignored\n").expect("overwrite");
        assert_eq!(load_token(&path).expect("load").as_deref(), Some("spaced"));
    }

    #[test]
    fn explicit_token_wins_over_token_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("token.txt");
        save_token(&path, "from-file").expect("save");
        let path_arg = path.to_str().expect("utf-8 path");

        let config = Config::from_args(run_args(&["--token", "direct", "--token-file", path_arg]))
            .expect("config");
        assert_eq!(config.credentials.token.as_deref(), Some("direct"));

        let config = Config::from_args(run_args(&["--token-file", path_arg])).expect("config");
        assert_eq!(config.credentials.token.as_deref(), Some("from-file"));
    }

    #[test]
    fn no_token_and_no_username_is_missing_credentials() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("absent.txt");

        let err = Config::from_args(run_args(&[
            "--token-file",
            path.to_str().expect("utf-8 path"),
        ]))
        .expect_err("credentials are required");

        assert!(matches!(
            err.downcast_ref::<ChatError>(),
            Some(ChatError::MissingCredentials)
        ));
    }

    #[test]
    fn timings_and_backoff_come_from_flags() {
        let config = Config::from_args(run_args(&[
            "--username",
            "bob",
            "--token-file",
            "/nonexistent/resilient-chat/token.txt",
            "--ping-interval",
            "2.5",
            "--watchdog-timeout",
            "7",
            "--backoff",
            "linear",
            "--backoff-step",
            "0.5",
        ]))
        .expect("config");

        assert_eq!(config.timings.ping_interval, Duration::from_millis(2_500));
        assert_eq!(config.timings.watchdog_timeout, Duration::from_secs(7));
        assert_eq!(
            config.backoff,
            Backoff::Linear {
                step: Duration::from_millis(500),
                max: Duration::from_secs(30),
            }
        );
    }
}
