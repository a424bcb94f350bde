//! The per-attempt tasks that move data between sockets and queues.
//!
//! Sender and keepalive share the send-side writer through a
//! [`tokio::sync::Mutex`] so a ping can never interleave with a chat line.

use std::{convert::Infallible, time::Duration};

use tokio::{
    io::{AsyncBufRead, AsyncWrite},
    sync::{
        Mutex,
        mpsc::{UnboundedReceiver, UnboundedSender},
    },
    time::{MissedTickBehavior, interval, timeout},
};
use tracing::{debug, info, warn};

use crate::{
    error::{ChatError, ConnectionError, Result},
    liveness::{Activity, LivenessSender},
    protocol::{read_line, write_chat_line},
};

/// Republishes every broadcast line to the display and history queues.
///
/// Returns `Ok(())` when the server closes the stream; the supervisor treats
/// that the same as a failure and reconnects.
pub async fn read_messages<R>(
    reader: &mut R,
    display: &UnboundedSender<String>,
    history: &UnboundedSender<String>,
    liveness: &LivenessSender,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let line = match read_line(reader).await {
            Ok(line) => line,
            Err(ChatError::Connection(ConnectionError::Closed)) => {
                info!("read connection closed by server");
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        liveness.notify(Activity::MessageReceived);
        // Display first, then history, so both see the same order.
        if display.send(line.clone()).is_err() {
            debug!("display queue closed; dropping line");
        }
        if history.send(line).is_err() {
            debug!("history queue closed; dropping line");
        }
    }
}

/// Writes queued user messages as chat lines.
///
/// Empty messages are skipped. Returns `Ok(())` once every producer of the
/// send queue is gone; the caller decides whether the connection lives on.
pub async fn send_messages<W>(
    writer: &Mutex<W>,
    outbox: &mut UnboundedReceiver<String>,
    liveness: &LivenessSender,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbox.recv().await {
        if message.is_empty() {
            continue;
        }

        let mut writer = writer.lock().await;
        write_chat_line(&mut *writer, &message).await?;
        drop(writer);

        liveness.notify(Activity::MessageSent);
        debug!(len = message.len(), "message sent");
    }

    info!("send queue closed");
    Ok(())
}

/// Sends an empty chat line every `every`, failing if one takes longer than
/// `ping_timeout`. The first ping goes out immediately.
pub async fn keep_alive<W>(
    writer: &Mutex<W>,
    liveness: &LivenessSender,
    every: Duration,
    ping_timeout: Duration,
) -> Result<Infallible>
where
    W: AsyncWrite + Unpin,
{
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        // Lock acquisition counts against the budget: a sender stuck
        // mid-write is as dead as a stuck ping.
        let ping = async {
            let mut writer = writer.lock().await;
            write_chat_line(&mut *writer, "").await
        };

        match timeout(ping_timeout, ping).await {
            Ok(Ok(())) => liveness.notify(Activity::PingSent),
            Ok(Err(err)) => {
                warn!(error = %err, "keepalive ping failed");
                return Err(err);
            }
            Err(_) => {
                warn!(?ping_timeout, "keepalive ping timed out");
                return Err(ConnectionError::TimedOut {
                    operation: "keepalive ping",
                    after: ping_timeout,
                }
                .into());
            }
        }
    }
}
