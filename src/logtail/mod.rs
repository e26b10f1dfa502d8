//! Log file tailing.
//!
//! [`Tailer`] follows a file as it is written, emitting complete lines to
//! a bounded channel. It polls rather than relying on filesystem events,
//! survives in-place truncation (rewinds to the start), and reopens the
//! path after rotation, retrying while the new file does not exist yet.

use std::io::SeekFrom;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// How often to poll for new data once EOF is reached.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Streams lines from a log file as they are written.
pub struct Tailer {
    path: PathBuf,
}

impl Tailer {
    /// Create a new tailer for the given file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Follow the file and send each complete line to `lines` until the
    /// token is cancelled or the receiver goes away.
    ///
    /// The file must exist when tailing starts; rotations after that are
    /// handled by reopening.
    pub async fn run(
        &self,
        token: CancellationToken,
        lines: mpsc::Sender<String>,
    ) -> std::io::Result<()> {
        let file = File::open(&self.path).await?;
        let mut inode = inode_of(&file).await;
        let mut reader = BufReader::new(file);
        let mut offset: u64 = 0;
        // Bytes of a line whose newline has not arrived yet.
        let mut pending = String::new();
        let mut chunk = String::new();

        info!(path = %self.path.display(), "tailing log file");

        loop {
            if token.is_cancelled() {
                return Ok(());
            }

            chunk.clear();
            match reader.read_line(&mut chunk).await {
                Ok(0) => {
                    tokio::select! {
                        _ = token.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(POLL_INTERVAL) => {}
                    }
                    if let Some(reopened) = self.reopen_if_rotated(inode).await {
                        inode = inode_of(&reopened).await;
                        reader = BufReader::new(reopened);
                        offset = 0;
                        pending.clear();
                    } else if self.truncated(offset).await {
                        reader.seek(SeekFrom::Start(0)).await?;
                        offset = 0;
                        pending.clear();
                        info!(path = %self.path.display(), "log file truncated, rewinding");
                    }
                }
                Ok(n) => {
                    offset += n as u64;
                    pending.push_str(&chunk);
                    // A chunk without a trailing newline is a line still
                    // being written; wait for the rest.
                    if pending.ends_with('\n') {
                        let line = pending.trim_end_matches(['\r', '\n']).to_string();
                        pending.clear();
                        tokio::select! {
                            _ = token.cancelled() => return Ok(()),
                            sent = lines.send(line) => {
                                if sent.is_err() {
                                    return Ok(());
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(path = %self.path.display(), error = %e, "tail read error");
                    tokio::select! {
                        _ = token.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(POLL_INTERVAL) => {}
                    }
                }
            }
        }
    }

    /// Reopen the path if it was rotated away (inode changed or the file
    /// vanished). Returns the fresh handle, or `None` when the current one
    /// is still valid or the new file has not been created yet.
    async fn reopen_if_rotated(&self, inode: Option<u64>) -> Option<File> {
        let rotated = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => {
                #[cfg(unix)]
                {
                    use std::os::unix::fs::MetadataExt;
                    inode.is_some_and(|ino| ino != meta.ino())
                }
                #[cfg(not(unix))]
                {
                    let _ = (&meta, inode);
                    false
                }
            }
            Err(_) => true,
        };
        if !rotated {
            return None;
        }
        match File::open(&self.path).await {
            Ok(file) => {
                info!(path = %self.path.display(), "log file rotated, reopened");
                Some(file)
            }
            Err(_) => None,
        }
    }

    /// The file shrank below our read offset: it was truncated in place.
    async fn truncated(&self, offset: u64) -> bool {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta.len() < offset,
            Err(_) => false,
        }
    }
}

async fn inode_of(file: &File) -> Option<u64> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        file.metadata().await.ok().map(|m| m.ino())
    }
    #[cfg(not(unix))]
    {
        let _ = file;
        None
    }
}
