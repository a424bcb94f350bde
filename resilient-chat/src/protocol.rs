//! Newline-framed wire protocol.
//!
//! Control lines (tokens, usernames) end with a single `\n`; chat lines end
//! with `\n\n`, the blank line telling the server the message is complete.
//! Embedded line breaks are escaped so a payload never spans two wire lines.

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::{ChatError, ConnectionError, Result};

const LINE_ENDINGS: &[char] = &['\n', '\r'];
const CONTROL_TERMINATOR: &str = "\n";
const CHAT_TERMINATOR: &str = "\n\n";

/// Replaces raw newlines with the two-character `\n` escape. Carriage
/// returns pass through untouched.
pub fn escape(text: &str) -> String {
    text.replace('\n', "\\n")
}

/// Reads the next line, newline included.
///
/// A zero-byte read means the peer closed the stream and is reported as
/// [`ConnectionError::Closed`]. Invalid UTF-8 is replaced rather than
/// rejected so one garbled broadcast cannot tear the connection down.
pub async fn read_line<R>(reader: &mut R) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut raw = Vec::new();
    let bytes = reader.read_until(b'\n', &mut raw).await?;
    if bytes == 0 {
        return Err(ConnectionError::Closed.into());
    }

    let line = String::from_utf8_lossy(&raw).into_owned();
    trace!(line = line.trim_end_matches(LINE_ENDINGS), "received line");
    Ok(line)
}

/// Reads one line and parses it as JSON.
pub async fn read_json<R>(reader: &mut R) -> Result<Value>
where
    R: AsyncBufRead + Unpin,
{
    let line = read_line(reader).await?;
    let trimmed = line.trim_end_matches(LINE_ENDINGS);
    serde_json::from_str(trimmed)
        .map_err(|err| ChatError::MalformedResponse(format!("{err} in {trimmed:?}")))
}

/// Writes a handshake line terminated by a single newline.
pub async fn write_control_line<W>(writer: &mut W, text: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_terminated(writer, text, CONTROL_TERMINATOR).await
}

/// Writes a user message terminated by a blank line.
pub async fn write_chat_line<W>(writer: &mut W, text: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_terminated(writer, text, CHAT_TERMINATOR).await
}

async fn write_terminated<W>(writer: &mut W, text: &str, terminator: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    // Single buffer so the payload and its terminator leave in one write.
    let mut encoded = escape(text);
    encoded.push_str(terminator);
    trace!(line = encoded.trim_end_matches(LINE_ENDINGS), "sending line");
    writer.write_all(encoded.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
