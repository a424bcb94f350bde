//! Liveness events and the watchdog that consumes them.
//!
//! Every component that observes real traffic reports it through a
//! [`LivenessSender`]. The watchdog does not care what the activity was; it
//! only converts a silent window into a [`ConnectionError::TimedOut`].

use std::{convert::Infallible, fmt, time::Duration};

use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    time::{Instant, timeout},
};
use tracing::{debug, warn};

use crate::error::{ConnectionError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    GreetingReceived,
    AuthCompleted,
    MessageReceived,
    MessageSent,
    PingSent,
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Activity::GreetingReceived => "prompt before auth",
            Activity::AuthCompleted => "authorization done",
            Activity::MessageReceived => "new message in chat",
            Activity::MessageSent => "message sent",
            Activity::PingSent => "ping message sent",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LivenessEvent {
    pub activity: Activity,
    pub at: Instant,
}

/// Producer side of the liveness queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LivenessSender {
    tx: UnboundedSender<LivenessEvent>,
}

impl LivenessSender {
    pub fn notify(&self, activity: Activity) {
        let event = LivenessEvent {
            activity,
            at: Instant::now(),
        };
        // A closed queue means the supervisor is gone and nobody is watching.
        let _ = self.tx.send(event);
    }
}

pub fn channel() -> (LivenessSender, UnboundedReceiver<LivenessEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (LivenessSender { tx }, rx)
}

/// Discards events left over from an earlier attempt so they cannot vouch
/// for a connection that has not produced anything yet.
pub fn drain_stale(events: &mut UnboundedReceiver<LivenessEvent>) -> usize {
    let mut drained = 0;
    while events.try_recv().is_ok() {
        drained += 1;
    }
    drained
}

/// Fails once `window` passes without any event. Never returns `Ok`.
pub async fn watch(
    events: &mut UnboundedReceiver<LivenessEvent>,
    window: Duration,
) -> Result<Infallible> {
    loop {
        match timeout(window, events.recv()).await {
            Ok(Some(event)) => {
                debug!(reason = %event.activity, "connection is alive");
            }
            Ok(None) => {
                warn!("liveness queue closed");
                return Err(ConnectionError::Closed.into());
            }
            Err(_) => {
                warn!(?window, "no activity within watchdog window");
                return Err(ConnectionError::TimedOut {
                    operation: "watchdog",
                    after: window,
                }
                .into());
            }
        }
    }
}
