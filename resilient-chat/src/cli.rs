use std::{path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Join the chat from the terminal, reconnecting whenever the link drops.
    Run(RunArgs),
    /// Register a new account and store its token.
    Register(RegisterArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Chat server host.
    #[arg(long, env = "MINECHAT_SERVER_HOST", default_value = "minechat.dvmn.org")]
    pub host: String,

    /// Port of the sending (and registration) connection.
    #[arg(long, env = "MINECHAT_WRITE_PORT", default_value_t = 5050)]
    pub write_port: u16,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub server: ServerArgs,

    /// Port of the connection that receives broadcast messages.
    #[arg(long, env = "MINECHAT_READ_PORT", default_value_t = 5000)]
    pub read_port: u16,

    /// File every received message is appended to.
    #[arg(long, env = "MINECHAT_HISTORY", default_value = "minechat.history")]
    pub history: PathBuf,

    /// Account token. Takes precedence over the token file.
    #[arg(long, env = "MINECHAT_TOKEN")]
    pub token: Option<String>,

    /// File holding a previously issued token; newly issued tokens are saved here.
    #[arg(long, env = "MINECHAT_TOKEN_FILE", default_value = "token.txt")]
    pub token_file: PathBuf,

    /// Username to register when no valid token is available.
    #[arg(long, env = "MINECHAT_USERNAME")]
    pub username: Option<String>,

    /// Seconds between keepalive pings.
    #[arg(long, value_parser = parse_seconds, default_value = "10")]
    pub ping_interval: Duration,

    /// Seconds a single ping may take before the connection is considered dead.
    #[arg(long, value_parser = parse_seconds, default_value = "5")]
    pub ping_timeout: Duration,

    /// Seconds without any activity before the connection is considered dead.
    #[arg(long, value_parser = parse_seconds, default_value = "15")]
    pub watchdog_timeout: Duration,

    /// Delay policy between reconnect attempts.
    #[arg(long, value_enum, default_value_t = BackoffKind::Linear)]
    pub backoff: BackoffKind,

    /// Seconds added to the delay after each consecutive failed attempt.
    #[arg(long, value_parser = parse_seconds, default_value = "1")]
    pub backoff_step: Duration,

    /// Upper bound on the reconnect delay, in seconds.
    #[arg(long, value_parser = parse_seconds, default_value = "30")]
    pub backoff_max: Duration,
}

#[derive(Args, Debug, Clone)]
pub struct RegisterArgs {
    #[command(flatten)]
    pub server: ServerArgs,

    /// Preferred nickname for the new account.
    #[arg(long, env = "MINECHAT_USERNAME")]
    pub username: String,

    /// Where to store the issued token.
    #[arg(long, env = "MINECHAT_TOKEN_FILE", default_value = "token.txt")]
    pub token_file: PathBuf,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffKind {
    /// Reconnect right away.
    Immediate,
    /// Wait one more step after every consecutive failure.
    Linear,
}

fn parse_seconds(raw: &str) -> Result<Duration, String> {
    let seconds: f64 = raw
        .parse()
        .map_err(|err| format!("'{raw}' is not a number of seconds: {err}"))?;
    Duration::try_from_secs_f64(seconds).map_err(|err| format!("'{raw}': {err}"))
}
