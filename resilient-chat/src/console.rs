//! Terminal presentation layer.
//!
//! Multiplexes three sources onto the terminal: display lines go to stdout,
//! status transitions are rendered as `***` notices, and stdin lines are
//! queued for sending. Closing stdin only closes the send queue; the chat
//! keeps streaming until `/quit` returns from [`run`] or the process is
//! interrupted.

use anyhow::Result;
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    select,
    sync::mpsc::{UnboundedReceiver, UnboundedSender},
};

use crate::supervisor::{ConnectionState, StatusUpdate};

/// What a line of user input asks for.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Continue,
    EndOfInput,
    Quit,
}

/// Returns when the user types `/quit`, or once both output queues close.
pub async fn run(
    mut display: UnboundedReceiver<String>,
    mut status: UnboundedReceiver<StatusUpdate>,
    outbox: UnboundedSender<String>,
) -> Result<()> {
    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();
    let mut outbox = Some(outbox);

    loop {
        select! {
            Some(line) = display.recv() => {
                write_stdout(line.trim_end_matches(['\n', '\r'])).await?;
            }
            Some(update) = status.recv() => {
                write_stdout(&render_status(&update)).await?;
            }
            bytes_read = stdin.read_line(&mut input), if outbox.is_some() => {
                match handle_stdin_input(bytes_read, &input, outbox.as_ref()).await? {
                    Input::Continue => {}
                    Input::EndOfInput => outbox = None,
                    Input::Quit => {
                        write_stdout("*** leaving chat").await?;
                        break;
                    }
                }
                input.clear();
            }
            else => break,
        }
    }

    Ok(())
}

async fn handle_stdin_input(
    bytes_read: io::Result<usize>,
    input: &str,
    outbox: Option<&UnboundedSender<String>>,
) -> Result<Input> {
    if bytes_read? == 0 {
        return Ok(Input::EndOfInput);
    }

    let text = input.trim_end();
    if text.is_empty() {
        return Ok(Input::Continue);
    }

    if text.eq_ignore_ascii_case("/quit") {
        return Ok(Input::Quit);
    }

    if let Some(outbox) = outbox {
        if outbox.send(text.to_string()).is_err() {
            write_stderr("!!! not connected; message dropped").await?;
        }
    }
    Ok(Input::Continue)
}

pub fn render_status(update: &StatusUpdate) -> String {
    match update {
        StatusUpdate::ReadConnectionStateChanged(state) => {
            format!("*** read connection {}", describe(*state))
        }
        StatusUpdate::SendingConnectionStateChanged(state) => {
            format!("*** send connection {}", describe(*state))
        }
        StatusUpdate::NicknameReceived(nickname) => format!("*** connected as {nickname}"),
    }
}

fn describe(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Initiated => "connecting…",
        ConnectionState::Established => "established",
        ConnectionState::Closed => "closed",
    }
}

/// Reports a condition the user has to act on.
pub async fn notify_fatal(message: &str) -> io::Result<()> {
    write_stderr(&format!("!!! {message}")).await
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}
