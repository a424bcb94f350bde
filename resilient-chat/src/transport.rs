//! TCP connections to the chat service.
//!
//! A [`Connection`] owns both halves of its socket. Dropping it closes the
//! socket, so cancelling a future that holds one cannot leak a descriptor;
//! [`Connection::close`] additionally flushes and half-closes the write side
//! when the caller has time to be polite.

use std::time::Duration;

use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time::timeout,
};
use tracing::{debug, warn};

use crate::error::{ConnectionError, Result};

/// Upper bound on the graceful shutdown of the write half.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

pub struct Connection {
    pub reader: BufReader<OwnedReadHalf>,
    pub writer: OwnedWriteHalf,
    peer: String,
}

/// Connects to `host:port`. No retries happen here.
pub async fn open(host: &str, port: u16) -> Result<Connection> {
    let stream = TcpStream::connect((host, port))
        .await
        .map_err(ConnectionError::from)?;
    let peer = format!("{host}:{port}");
    debug!(%peer, "connection opened");

    let (reader, writer) = stream.into_split();
    Ok(Connection {
        reader: BufReader::new(reader),
        writer,
        peer,
    })
}

impl Connection {
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Flushes pending output and shuts the socket down.
    pub async fn close(mut self) {
        match timeout(CLOSE_TIMEOUT, self.writer.shutdown()).await {
            Ok(Ok(())) => debug!(peer = %self.peer, "connection closed"),
            Ok(Err(error)) => {
                debug!(peer = %self.peer, ?error, "connection already broken at close")
            }
            Err(_) => warn!(peer = %self.peer, "timed out closing connection"),
        }
    }
}
