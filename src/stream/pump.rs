//! Read and write pumps between descriptors and event streams.

use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use futures_util::stream::{BoxStream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::exec::Priority;

/// Size of the buffer used by read pumps.
pub const READ_CHUNK_SIZE: usize = 8192;

/// Byte written to a PTY master to signal end of input.
///
/// In canonical mode it only flushes a partial line, so a second one is
/// needed when input did not end with a newline.
pub const PTY_EOF: u8 = 0x04;

/// Error type for stream operations.
///
/// Cloned to every subscriber, so it carries rendered messages rather than
/// the original error values.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Reading from a child descriptor failed.
    #[error("Read failed on {channel}: {message}")]
    Read { channel: String, message: String },
    /// An attached input source reported an error.
    #[error("Input source failed: {0}")]
    Upstream(String),
    /// An item could not be rendered for output.
    #[error("Failed to encode output: {0}")]
    Encode(String),
}

/// Items delivered to stream subscribers.
pub type StreamResult<T> = Result<T, StreamError>;

/// Boxed output stream handed to consumers.
pub type OutputStream<T> = BoxStream<'static, StreamResult<T>>;

/// One read from a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteChunk {
    seq: u64,
    data: Vec<u8>,
}

impl ByteChunk {
    #[must_use]
    pub fn new(seq: u64, data: Vec<u8>) -> Self {
        Self { seq, data }
    }

    /// Arrival position within its descriptor, starting at 0.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Empty chunks mark end of stream.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Observer list with one unbounded queue per subscriber.
///
/// Closing drops every sender, which completes each subscriber's stream.
#[derive(Debug)]
pub struct Fanout<T> {
    subscribers: Mutex<Option<Vec<mpsc::UnboundedSender<StreamResult<T>>>>>,
}

impl<T> Default for Fanout<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Fanout<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Some(Vec::new())),
        }
    }

    /// Register a new subscriber.
    ///
    /// Subscribers only see items published after this call. Subscribing
    /// after close returns a stream that is already complete.
    pub fn subscribe(&self) -> UnboundedReceiverStream<StreamResult<T>> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(subscribers) = self.lock().as_mut() {
            subscribers.push(tx);
        }
        UnboundedReceiverStream::new(rx)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock().as_ref().map_or(0, Vec::len)
    }

    /// Drop every subscriber queue, completing their streams.
    pub fn close(&self) {
        self.lock().take();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Vec<mpsc::UnboundedSender<StreamResult<T>>>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> Fanout<T> {
    /// Send `item` to every subscriber, pruning dropped ones.
    pub fn publish(&self, item: T) {
        self.send(&Ok(item));
    }

    /// Send an error to every subscriber.
    pub fn fail(&self, error: StreamError) {
        self.send(&Err(error));
    }

    fn send(&self, item: &StreamResult<T>) {
        if let Some(subscribers) = self.lock().as_mut() {
            subscribers.retain(|tx| tx.send(item.clone()).is_ok());
        }
    }
}

/// Start a thread draining `source` into `sink` until EOF.
///
/// Each read is published as a [`ByteChunk`]. At EOF an empty chunk is
/// published and the sink is closed. `EIO` counts as EOF, since that is
/// how a PTY master reports a closed slave.
///
/// # Errors
///
/// Returns an error if the thread cannot be spawned.
pub fn spawn_read_pump(
    channel: &str,
    pid: u32,
    priority: Priority,
    mut source: File,
    sink: Arc<Fanout<ByteChunk>>,
) -> std::io::Result<JoinHandle<()>> {
    let channel = channel.to_string();
    std::thread::Builder::new()
        .name(format!("{channel}-{pid}-{priority}"))
        .spawn(move || {
            let span = tracing::debug_span!("read_pump", %channel, pid, %priority);
            let _guard = span.enter();

            let mut buf = vec![0u8; READ_CHUNK_SIZE];
            let mut seq = 0u64;
            loop {
                match source.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        tracing::trace!(seq, bytes = n, "Read chunk");
                        sink.publish(ByteChunk::new(seq, buf[..n].to_vec()));
                        seq += 1;
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => {}
                    Err(e) if e.raw_os_error() == Some(nix::libc::EIO) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Read failed");
                        sink.fail(StreamError::Read {
                            channel: channel.clone(),
                            message: e.to_string(),
                        });
                        sink.close();
                        return;
                    }
                }
            }

            tracing::debug!(chunks = seq, "Reached end of stream");
            sink.publish(ByteChunk::new(seq, Vec::new()));
            sink.close();
        })
}

/// Start a task feeding `source` into `sink` in order.
///
/// When the source ends or fails, `sink` is closed. For a terminal,
/// [`PTY_EOF`] is written first, twice if the last line was left
/// unterminated. The child itself is left running. Resolves to the upstream
/// error if the source failed.
pub fn spawn_write_pump(
    pid: u32,
    sink: File,
    mut source: BoxStream<'static, StreamResult<Vec<u8>>>,
    terminal: bool,
) -> tokio::task::JoinHandle<StreamResult<()>> {
    tokio::spawn(async move {
        let mut sink = Some(sink);
        let mut outcome = Ok(());
        let mut partial_line = false;

        while let Some(item) = source.next().await {
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::warn!(pid, error = %e, "Input source failed, closing stdin");
                    outcome = Err(e);
                    break;
                }
            };
            let Some(file) = sink.take() else { break };
            if let Some(&last) = chunk.last() {
                partial_line = last != b'\n';
            }
            match write_blocking(file, chunk).await {
                Ok(file) => sink = Some(file),
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                    tracing::debug!(pid, "Child closed its input");
                    break;
                }
                Err(e) => {
                    tracing::warn!(pid, error = %e, "Write to child failed");
                    break;
                }
            }
        }

        if let Some(file) = sink.filter(|_| terminal) {
            if let Err(e) = write_blocking(file, eof_marker(partial_line)).await {
                tracing::debug!(pid, error = %e, "Final input marker not written");
            }
        }
        tracing::debug!(pid, "Input closed");
        outcome
    })
}

fn eof_marker(partial_line: bool) -> Vec<u8> {
    if partial_line {
        vec![PTY_EOF, PTY_EOF]
    } else {
        vec![PTY_EOF]
    }
}

/// Write on the blocking pool, handing the file back on success.
async fn write_blocking(mut file: File, chunk: Vec<u8>) -> std::io::Result<File> {
    tokio::task::spawn_blocking(move || {
        file.write_all(&chunk)?;
        file.flush()?;
        Ok(file)
    })
    .await
    .map_err(std::io::Error::other)?
}
