//! Append-only deployment logs and their live subscribers.
//!
//! Each deployment owns one log file. While a worker is writing it, the
//! [`LogHub`] keeps a [`DeploymentLog`] registered under the deployment id;
//! every append publishes an event on a broadcast channel. Subscribers treat
//! events as wake-ups and read the file from their own offset, so each byte is
//! delivered exactly once even when a slow reader lags behind the channel.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};

use futures::Stream;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use crate::errors::ConsoleError;
use crate::models::DeploymentId;
use crate::storage::layout::StorageLayout;

/// First line of every deployment log
pub const BANNER: &str = "Deployment initialized. Logs will appear here.\n";

/// Marks the end of a log; nothing is appended after it
pub const COMPLETION_SENTINEL: &str = "===DEPLOYMENT COMPLETED===";

/// Precedes the description of an error that aborted the pipeline
pub const ERROR_MARKER: &str = "===DEPLOYMENT ERROR===";

/// Written instead of build output when a page has no build script
pub const NO_BUILD_SCRIPT: &str = "No build script provided.";

const CHANNEL_CAPACITY: usize = 256;

/// Notification published to subscribers of a live log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogEvent {
    /// Bytes were appended; the file is now `len` bytes long
    Appended { len: u64 },

    /// The completion sentinel was written
    Completed,
}

struct LogWriter {
    file: fs::File,
    len: u64,
    completed: bool,
}

/// Single-writer handle on one deployment's log file
pub struct DeploymentLog {
    deployment_id: DeploymentId,
    path: PathBuf,
    writer: Mutex<LogWriter>,
    events: broadcast::Sender<LogEvent>,
}

impl std::fmt::Debug for DeploymentLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentLog")
            .field("deployment_id", &self.deployment_id)
            .field("path", &self.path)
            .finish()
    }
}

impl DeploymentLog {
    async fn open(
        deployment_id: DeploymentId,
        path: PathBuf,
        truncate: bool,
    ) -> Result<Self, ConsoleError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut options = fs::OpenOptions::new();
        if truncate {
            options.write(true).create(true).truncate(true);
        } else {
            options.append(true).create(true);
        }
        let file = options.open(&path).await?;
        let len = file.metadata().await?.len();

        let (events, _) = broadcast::channel(CHANNEL_CAPACITY);
        Ok(Self {
            deployment_id,
            path,
            writer: Mutex::new(LogWriter {
                file,
                len,
                completed: false,
            }),
            events,
        })
    }

    pub fn deployment_id(&self) -> DeploymentId {
        self.deployment_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Subscribe to append notifications
    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.events.subscribe()
    }

    /// Append raw output. Ignored once the log is completed.
    pub async fn append(&self, bytes: &[u8]) -> Result<(), ConsoleError> {
        if bytes.is_empty() {
            return Ok(());
        }

        let mut writer = self.writer.lock().await;
        if writer.completed {
            return Ok(());
        }
        writer.file.write_all(bytes).await?;
        writer.file.flush().await?;
        writer.len += bytes.len() as u64;

        let _ = self.events.send(LogEvent::Appended { len: writer.len });
        Ok(())
    }

    /// Append one line of text
    pub async fn line(&self, text: &str) -> Result<(), ConsoleError> {
        self.append(format!("{}\n", text).as_bytes()).await
    }

    /// Append an orchestration step marker
    pub async fn step(&self, text: &str) -> Result<(), ConsoleError> {
        self.append(format!("\n>>> {}\n", text).as_bytes()).await
    }

    /// Append the error marker followed by a description
    pub async fn error(&self, text: &str) -> Result<(), ConsoleError> {
        self.append(format!("\n{}\n{}\n", ERROR_MARKER, text).as_bytes())
            .await
    }

    /// Append the completion sentinel and close the log to further writes
    pub async fn finish(&self) -> Result<(), ConsoleError> {
        let mut writer = self.writer.lock().await;
        if writer.completed {
            return Ok(());
        }
        let tail = format!("\n{}\n", COMPLETION_SENTINEL);
        writer.file.write_all(tail.as_bytes()).await?;
        writer.file.flush().await?;
        writer.len += tail.len() as u64;
        writer.completed = true;

        let _ = self.events.send(LogEvent::Appended { len: writer.len });
        let _ = self.events.send(LogEvent::Completed);
        Ok(())
    }
}

/// Byte stream pushed to a live log client
pub type LogChunkStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, std::io::Error>> + Send>>;

/// What a reader gets when it opens a deployment log
pub enum LogSubscription {
    /// The log is complete (or no worker is writing it); this is all of it
    Complete(Vec<u8>),

    /// The log is being written: current contents first, then every append
    Live(LogChunkStream),
}

/// Registry of logs that are currently being written
pub struct LogHub {
    layout: StorageLayout,
    live: StdMutex<HashMap<DeploymentId, Arc<DeploymentLog>>>,
}

impl LogHub {
    pub fn new(layout: StorageLayout) -> Self {
        Self {
            layout,
            live: StdMutex::new(HashMap::new()),
        }
    }

    /// Create a fresh log holding only the banner and register it as live
    pub async fn create(&self, deployment_id: DeploymentId) -> Result<Arc<DeploymentLog>, ConsoleError> {
        let path = self.layout.deployment_log(deployment_id).path().to_path_buf();
        let log = Arc::new(DeploymentLog::open(deployment_id, path, true).await?);
        log.append(BANNER.as_bytes()).await?;
        self.register(log.clone());
        Ok(log)
    }

    /// Reopen an existing log for appending (used when reconciling)
    pub async fn reopen(&self, deployment_id: DeploymentId) -> Result<Arc<DeploymentLog>, ConsoleError> {
        let path = self.layout.deployment_log(deployment_id).path().to_path_buf();
        let log = Arc::new(DeploymentLog::open(deployment_id, path, false).await?);
        self.register(log.clone());
        Ok(log)
    }

    /// The live writer of a deployment, if one is registered
    pub fn get(&self, deployment_id: DeploymentId) -> Option<Arc<DeploymentLog>> {
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&deployment_id)
            .cloned()
    }

    /// Stop tracking a log once its writer is done
    pub fn release(&self, deployment_id: DeploymentId) {
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&deployment_id);
        debug!("Released log for deployment {}", deployment_id);
    }

    /// Read the full log of a deployment as stored on disk
    pub async fn read(&self, deployment_id: DeploymentId) -> Result<Vec<u8>, ConsoleError> {
        let file = self.layout.deployment_log(deployment_id);
        match file.read_bytes().await {
            Ok(bytes) => Ok(bytes),
            Err(ConsoleError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => Err(
                ConsoleError::NotFound(format!("log for deployment {}", deployment_id)),
            ),
            Err(e) => Err(e),
        }
    }

    /// Delete a deployment's log file
    pub async fn remove(&self, deployment_id: DeploymentId) -> Result<(), ConsoleError> {
        self.release(deployment_id);
        self.layout.deployment_log(deployment_id).delete().await
    }

    /// Open a deployment log for reading.
    ///
    /// The subscription is taken before the file is read, so no append can
    /// fall between the initial snapshot and the first event.
    pub async fn subscribe(&self, deployment_id: DeploymentId) -> Result<LogSubscription, ConsoleError> {
        let events = self.get(deployment_id).map(|log| log.subscribe());
        let contents = self.read(deployment_id).await?;

        if contains_sentinel(&contents) {
            return Ok(LogSubscription::Complete(contents));
        }
        let Some(events) = events else {
            return Ok(LogSubscription::Complete(contents));
        };

        let path = self.layout.deployment_log(deployment_id).path().to_path_buf();
        Ok(LogSubscription::Live(live_stream(path, contents, events)))
    }

    fn register(&self, log: Arc<DeploymentLog>) {
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(log.deployment_id(), log);
    }
}

/// Whether the bytes contain the completion sentinel
pub fn contains_sentinel(contents: &[u8]) -> bool {
    let needle = COMPLETION_SENTINEL.as_bytes();
    contents.windows(needle.len()).any(|window| window == needle)
}

fn live_stream(
    path: PathBuf,
    initial: Vec<u8>,
    mut events: broadcast::Receiver<LogEvent>,
) -> LogChunkStream {
    Box::pin(async_stream::stream! {
        let mut offset = initial.len() as u64;
        yield Ok(initial);

        loop {
            let finished = match events.recv().await {
                Ok(LogEvent::Appended { len }) if len <= offset => continue,
                Ok(LogEvent::Appended { .. }) | Err(broadcast::error::RecvError::Lagged(_)) => false,
                Ok(LogEvent::Completed) | Err(broadcast::error::RecvError::Closed) => true,
            };

            match read_from(&path, offset).await {
                Ok(chunk) => {
                    offset += chunk.len() as u64;
                    if !chunk.is_empty() {
                        yield Ok(chunk);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    break;
                }
            }

            if finished {
                break;
            }
        }
    })
}

async fn read_from(path: &Path, offset: u64) -> Result<Vec<u8>, std::io::Error> {
    let mut file = fs::File::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    let mut chunk = Vec::new();
    file.read_to_end(&mut chunk).await?;
    Ok(chunk)
}
