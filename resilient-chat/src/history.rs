//! Append-only message log.
//!
//! The writer outlives every connection attempt: it is spawned once by the
//! client and stopped only by the empty-string sentinel (or a closed queue).
//! Wire lines always carry their newline, so a received message can never be
//! mistaken for the sentinel.

use std::{
    io,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    sync::mpsc::{UnboundedReceiver, UnboundedSender},
};
use tracing::{debug, info};

const TIMESTAMP_FORMAT: &str = "%d.%m.%Y %H:%M";

/// `[DD.MM.YYYY HH:MM] <message>\n`
pub fn format_entry(at: &DateTime<Local>, message: &str) -> String {
    let message = message.trim_end_matches(['\n', '\r']);
    format!("[{}] {message}\n", at.format(TIMESTAMP_FORMAT))
}

/// Append handle on the history file. Opening happens up front so a bad
/// path is reported before any connection is made.
#[derive(Debug)]
pub struct HistoryWriter {
    file: File,
    path: PathBuf,
}

impl HistoryWriter {
    pub async fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("failed to open history file {}", path.display()))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Appends queued messages until the sentinel arrives or the queue
    /// closes. Returns how many entries were written.
    pub async fn run(mut self, mut queue: UnboundedReceiver<String>) -> Result<usize> {
        let mut written = 0;
        while let Some(message) = queue.recv().await {
            if message.is_empty() {
                break;
            }

            let entry = format_entry(&Local::now(), &message);
            self.file
                .write_all(entry.as_bytes())
                .await
                .context("failed to append to history")?;
            self.file.flush().await.context("failed to flush history")?;
            written += 1;
        }

        info!(written, path = %self.path.display(), "history writer stopped");
        Ok(written)
    }
}

/// Pushes every stored entry onto the display queue. A missing file is an
/// empty history.
pub async fn replay(path: &Path, display: &UnboundedSender<String>) -> Result<usize> {
    let file = match File::open(path).await {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no history to replay");
            return Ok(0);
        }
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to open history file {}", path.display()));
        }
    };

    let mut lines = BufReader::new(file).lines();
    let mut replayed = 0;
    while let Some(line) = lines.next_line().await.context("failed to read history")? {
        if display.send(line).is_err() {
            break;
        }
        replayed += 1;
    }

    debug!(replayed, "history replayed");
    Ok(replayed)
}
