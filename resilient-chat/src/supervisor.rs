//! Connection supervisor: one attempt at a time, forever.
//!
//! Each attempt opens the read and send connections, authenticates on the
//! send side and then races four futures on the current task:
//!
//! - reader: broadcast lines into the display and history queues
//! - sender: queued user messages onto the send connection
//! - keepalive: periodic empty chat lines
//! - watchdog: fails when the liveness queue stays silent
//!
//! Whichever fails first ends the attempt. The others are dropped, both
//! sockets are closed, `Closed` is published for both sides and, after the
//! backoff delay, a fresh attempt starts from `Initiated`. A closed send
//! queue only silences the sender; the connection keeps running until the
//! shutdown future passed to [`Supervisor::run_until`] resolves. Only errors
//! that a retry cannot fix escape the loop.

use std::{
    convert::Infallible,
    future::{Future, pending},
    sync::Arc,
    time::Duration,
};

use tokio::{
    select,
    sync::{
        Mutex,
        mpsc::{UnboundedReceiver, UnboundedSender},
    },
    time::{sleep, timeout},
};
use tracing::{debug, error, info, warn};

use crate::{
    auth::{authorise, read_greeting},
    config::Config,
    error::{ChatError, ConnectionError, Result},
    liveness::{self, Activity, LivenessEvent, LivenessSender},
    relay::{keep_alive, read_messages, send_messages},
    transport::{self, Connection},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Initiated,
    Established,
    Closed,
}

/// Transitions published for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
    ReadConnectionStateChanged(ConnectionState),
    SendingConnectionStateChanged(ConnectionState),
    NicknameReceived(String),
}

/// Delay before a reconnect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Immediate,
    /// `0, step, 2 * step, ...` before each consecutive retry, capped at `max`.
    Linear { step: Duration, max: Duration },
}

impl Backoff {
    /// `failures` counts consecutive attempts that never authenticated, so
    /// the first retry follows one failure and goes out without waiting.
    pub fn delay(&self, failures: u32) -> Duration {
        match *self {
            Backoff::Immediate => Duration::ZERO,
            Backoff::Linear { step, max } => {
                step.saturating_mul(failures.saturating_sub(1)).min(max)
            }
        }
    }
}

/// Queues the supervisor shares with the rest of the application.
pub struct Queues {
    pub display: UnboundedSender<String>,
    pub history: UnboundedSender<String>,
    pub outbox: UnboundedReceiver<String>,
    pub status: UnboundedSender<StatusUpdate>,
}

pub struct Supervisor {
    config: Arc<Config>,
    token: String,
    display: UnboundedSender<String>,
    history: UnboundedSender<String>,
    outbox: UnboundedReceiver<String>,
    status: UnboundedSender<StatusUpdate>,
    liveness: LivenessSender,
    events: UnboundedReceiver<LivenessEvent>,
}

impl Supervisor {
    pub fn new(config: Arc<Config>, token: String, queues: Queues) -> Self {
        let (liveness, events) = liveness::channel();
        Self {
            config,
            token,
            display: queues.display,
            history: queues.history,
            outbox: queues.outbox,
            status: queues.status,
            liveness,
            events,
        }
    }

    /// Runs attempts forever. Returns only with an error no retry can fix.
    pub async fn run(mut self) -> Result<Infallible> {
        let mut failures: u32 = 0;

        loop {
            let delay = self.config.backoff.delay(failures);
            if !delay.is_zero() {
                info!(?delay, failures, "waiting before reconnect");
                sleep(delay).await;
            }

            let mut authenticated = false;
            let outcome = self.attempt(&mut authenticated).await;
            self.publish_both(ConnectionState::Closed);

            match outcome {
                Ok(never) => match never {},
                Err(ChatError::Connection(cause)) => {
                    warn!(error = %cause, "connection lost; reconnecting");
                }
                Err(
                    err @ (ChatError::InvalidToken
                    | ChatError::MissingCredentials
                    | ChatError::MalformedResponse(_)),
                ) => {
                    error!(error = %err, "unrecoverable error; giving up");
                    return Err(err);
                }
            }

            failures = if authenticated {
                0
            } else {
                failures.saturating_add(1)
            };
        }
    }

    /// Like [`Supervisor::run`], but stops with `Ok` when `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let status = self.status.clone();
        tokio::pin!(shutdown);

        select! {
            result = self.run() => match result {
                Ok(never) => match never {},
                Err(err) => Err(err),
            },
            _ = &mut shutdown => {
                info!("supervisor shutting down");
                for update in closed_updates() {
                    let _ = status.send(update);
                }
                Ok(())
            }
        }
    }

    async fn attempt(&mut self, authenticated: &mut bool) -> Result<Infallible> {
        let drained = liveness::drain_stale(&mut self.events);
        if drained > 0 {
            debug!(drained, "discarded stale liveness events");
        }

        self.publish_both(ConnectionState::Initiated);

        let config = Arc::clone(&self.config);
        let (mut read_conn, mut send_conn) = tokio::try_join!(
            transport::open(&config.host, config.read_port),
            transport::open(&config.host, config.write_port),
        )?;
        info!(read = read_conn.peer(), send = send_conn.peer(), "connections open");
        self.publish(StatusUpdate::ReadConnectionStateChanged(
            ConnectionState::Established,
        ));

        let nickname = self.authenticate(&mut send_conn).await?;
        *authenticated = true;
        self.publish(StatusUpdate::NicknameReceived(nickname));
        self.publish(StatusUpdate::SendingConnectionStateChanged(
            ConnectionState::Established,
        ));

        let outcome = self.relay(&mut read_conn, &mut send_conn).await;
        tokio::join!(read_conn.close(), send_conn.close());
        outcome
    }

    /// Greeting plus token exchange, bounded by the watchdog window since
    /// the watchdog itself is not running yet.
    async fn authenticate(&self, send_conn: &mut Connection) -> Result<String> {
        let window = self.config.timings.watchdog_timeout;
        let handshake = async {
            read_greeting(&mut send_conn.reader).await?;
            self.liveness.notify(Activity::GreetingReceived);
            authorise(&mut send_conn.reader, &mut send_conn.writer, &self.token).await
        };

        let nickname = match timeout(window, handshake).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ConnectionError::TimedOut {
                    operation: "handshake",
                    after: window,
                }
                .into());
            }
        };

        let nickname = nickname.ok_or(ChatError::InvalidToken)?;
        self.liveness.notify(Activity::AuthCompleted);
        Ok(nickname)
    }

    async fn relay(
        &mut self,
        read_conn: &mut Connection,
        send_conn: &mut Connection,
    ) -> Result<Infallible> {
        let timings = self.config.timings;
        let writer = Mutex::new(&mut send_conn.writer);

        let reader = read_messages(
            &mut read_conn.reader,
            &self.display,
            &self.history,
            &self.liveness,
        );
        let (outbox, sent) = (&mut self.outbox, &self.liveness);
        let sender = async {
            send_messages(&writer, outbox, sent).await?;
            debug!("sender idle until the connection ends");
            pending::<Result<Infallible>>().await
        };
        let keepalive = keep_alive(
            &writer,
            &self.liveness,
            timings.ping_interval,
            timings.ping_timeout,
        );
        let watchdog = liveness::watch(&mut self.events, timings.watchdog_timeout);

        select! {
            result = reader => result.and(Err(ConnectionError::Closed.into())),
            result = sender => result,
            result = keepalive => result,
            result = watchdog => result,
        }
    }

    fn publish(&self, update: StatusUpdate) {
        debug!(?update, "status");
        if self.status.send(update).is_err() {
            debug!("status queue closed");
        }
    }

    fn publish_both(&self, state: ConnectionState) {
        self.publish(StatusUpdate::ReadConnectionStateChanged(state));
        self.publish(StatusUpdate::SendingConnectionStateChanged(state));
    }
}

fn closed_updates() -> [StatusUpdate; 2] {
    [
        StatusUpdate::ReadConnectionStateChanged(ConnectionState::Closed),
        StatusUpdate::SendingConnectionStateChanged(ConnectionState::Closed),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_backoff_never_waits() {
        assert_eq!(Backoff::Immediate.delay(0), Duration::ZERO);
        assert_eq!(Backoff::Immediate.delay(7), Duration::ZERO);
    }

    #[test]
    fn linear_backoff_retries_at_once_then_grows_by_step_and_caps() {
        let backoff = Backoff::Linear {
            step: Duration::from_secs(1),
            max: Duration::from_secs(3),
        };
        // Index 0 is the initial attempt, index 1 the first retry.
        let delays: Vec<_> = (0..7).map(|n| backoff.delay(n).as_secs()).collect();
        assert_eq!(delays, vec![0, 0, 1, 2, 3, 3, 3]);
    }
}
