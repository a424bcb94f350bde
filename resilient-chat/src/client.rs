//! Application wiring: sign in once, then hand everything to the supervisor.
//!
//! `run` owns the queues. The history writer and the console are spawned here
//! and outlive every connection attempt; the supervisor borrows nothing from
//! them except the queue ends it was given. The session ends on Ctrl-C,
//! `/quit`, or a history writer failure.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{
    select,
    sync::mpsc,
    time::{sleep, timeout},
};
use tracing::{info, warn};

use crate::{
    auth::{
        AuthOutcome, Credentials, authorise_or_register, read_greeting,
        register as register_account,
    },
    cli::{RegisterArgs, RunArgs},
    config::{Config, save_token},
    console,
    error::{ChatError, ConnectionError},
    history::{self, HistoryWriter},
    supervisor::{Queues, Supervisor},
    transport,
};

pub async fn run(args: RunArgs) -> Result<()> {
    let config = match Config::from_args(args) {
        Ok(config) => Arc::new(config),
        Err(err) => {
            console::notify_fatal(&format!("{err:#}")).await?;
            return Err(err);
        }
    };

    let history_writer = match HistoryWriter::open(&config.history_path).await {
        Ok(writer) => writer,
        Err(err) => {
            console::notify_fatal(&format!("{err:#}")).await?;
            return Err(err);
        }
    };

    let token = match sign_in(&config).await {
        Ok(token) => token,
        Err(err) => {
            console::notify_fatal(&fatal_message(&err)).await?;
            return Err(err.into());
        }
    };

    let (display_tx, display_rx) = mpsc::unbounded_channel();
    let (history_tx, history_rx) = mpsc::unbounded_channel();
    let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = mpsc::unbounded_channel();

    history::replay(&config.history_path, &display_tx).await?;

    let mut history_task = tokio::spawn(history_writer.run(history_rx));
    let mut console_task = tokio::spawn(console::run(display_rx, status_rx, outbox_tx));

    let supervisor = Supervisor::new(
        Arc::clone(&config),
        token,
        Queues {
            display: display_tx,
            history: history_tx.clone(),
            outbox: outbox_rx,
            status: status_tx,
        },
    );

    // Set when the history writer stops on its own, which ends the session.
    let mut history_stopped = None;
    let outcome = supervisor
        .run_until(async {
            select! {
                _ = interrupted() => info!("interrupted"),
                _ = &mut console_task => info!("console closed"),
                result = &mut history_task => history_stopped = Some(result),
            }
        })
        .await;
    console_task.abort();

    let history_result = match history_stopped {
        Some(result) => result,
        None => {
            // Empty string tells the history writer to finish.
            let _ = history_tx.send(String::new());
            history_task.await
        }
    };
    if let Err(err) = history_result
        .context("history writer panicked")
        .and_then(|written| written.context("history writer failed"))
    {
        console::notify_fatal(&format!("{err:#}")).await?;
        return Err(err);
    }

    if let Err(err) = outcome {
        console::notify_fatal(&fatal_message(&err)).await?;
        return Err(err.into());
    }

    info!("chat client stopped");
    Ok(())
}

/// Resolves on Ctrl-C. Without a signal handler the session only ends
/// through the console.
async fn interrupted() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(?error, "failed to install ctrl-c handler");
        std::future::pending::<()>().await;
    }
}

/// Standalone registration: obtain a token for `username` and store it.
pub async fn register(args: RegisterArgs) -> Result<()> {
    let mut connection = transport::open(&args.server.host, args.server.write_port)
        .await
        .with_context(|| {
            format!(
                "failed to connect to {}:{}",
                args.server.host, args.server.write_port
            )
        })?;

    read_greeting(&mut connection.reader).await?;
    let registration =
        register_account(&mut connection.reader, &mut connection.writer, &args.username, false)
            .await?;
    connection.close().await;

    save_token(&args.token_file, &registration.token)
        .with_context(|| format!("failed to save token to {}", args.token_file.display()))?;
    println!(
        "*** registered as {}; token saved to {}",
        registration.nickname,
        args.token_file.display()
    );
    Ok(())
}

/// Runs the handshake on a short-lived send connection, registering when
/// needed, and returns the token the supervisor should use. Connection
/// failures are retried with the configured backoff.
async fn sign_in(config: &Config) -> Result<String, ChatError> {
    let mut failures = 0;
    loop {
        match try_sign_in(config, &config.credentials).await {
            Err(ChatError::Connection(cause)) => {
                failures += 1;
                let delay = config.backoff.delay(failures);
                warn!(error = %cause, ?delay, "sign-in failed; retrying");
                sleep(delay).await;
            }
            other => return other,
        }
    }
}

/// The handshake is bounded by the watchdog window, so a server that
/// accepts but never answers is retried like any other dead connection.
async fn try_sign_in(config: &Config, credentials: &Credentials) -> Result<String, ChatError> {
    let mut connection = transport::open(&config.host, config.write_port).await?;
    let window = config.timings.watchdog_timeout;
    let outcome = timeout(
        window,
        authorise_or_register(&mut connection.reader, &mut connection.writer, credentials),
    )
    .await;
    connection.close().await;

    let outcome = outcome.map_err(|_| ConnectionError::TimedOut {
        operation: "sign-in",
        after: window,
    })?;

    match outcome? {
        AuthOutcome::Authorized { nickname } => {
            info!(%nickname, "token accepted");
            credentials.token.clone().ok_or(ChatError::MissingCredentials)
        }
        AuthOutcome::Registered(registration) => {
            info!(nickname = %registration.nickname, "new account registered");
            if let Err(error) = save_token(&config.token_path, &registration.token) {
                warn!(
                    %error,
                    path = %config.token_path.display(),
                    "could not persist new token"
                );
            }
            Ok(registration.token)
        }
        AuthOutcome::NotAuthorized => Err(ChatError::InvalidToken),
    }
}

fn fatal_message(err: &ChatError) -> String {
    match err {
        ChatError::InvalidToken => {
            "the server did not recognise the token; check it or register a new account".into()
        }
        ChatError::MissingCredentials => {
            "pass --token, provide a token file, or --username to register".into()
        }
        ChatError::MalformedResponse(_) | ChatError::Connection(_) => err.to_string(),
    }
}
