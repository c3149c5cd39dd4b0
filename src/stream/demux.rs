//! Stream demultiplexer: raw child output in, line and chunk events out.
//!
//! Each started demultiplexer runs two tasks. The reader task pulls bytes
//! from the stream, splits them with a [`LineSplitter`] and pushes the
//! resulting events onto an unbounded queue. The dispatch task drains the
//! queue and invokes subscribers in registration order. A slow subscriber
//! therefore delays only later deliveries on its own stream, never the OS
//! read loop.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use super::error::StreamError;
use super::events::{Chunk, OutputEvent, StreamKind};
use super::splitter::LineSplitter;

/// Size of the buffer used for each read from the child stream.
pub const READ_BUFFER_SIZE: usize = 8192;

/// Callback invoked for each complete line.
pub type LineCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Callback invoked for each partial-line chunk.
pub type ChunkCallback = Arc<dyn Fn(&Chunk) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    line: Vec<LineCallback>,
    chunk: Vec<ChunkCallback>,
}

struct Inner {
    kind: StreamKind,
    subscribers: Mutex<Subscribers>,
    started: AtomicBool,
    stop: CancellationToken,
    closed: CancellationToken,
}

impl Inner {
    fn subscribers(&self) -> MutexGuard<'_, Subscribers> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatch(&self, event: &OutputEvent) {
        match event {
            OutputEvent::Line { text } => {
                let callbacks = self.subscribers().line.clone();
                for callback in &callbacks {
                    self.guarded(|| callback(text));
                }
            }
            OutputEvent::Chunk(chunk) => {
                let callbacks = self.subscribers().chunk.clone();
                for callback in &callbacks {
                    self.guarded(|| callback(chunk));
                }
            }
        }
    }

    /// Run one subscriber, containing a panic to that delivery.
    fn guarded(&self, deliver: impl FnOnce()) {
        if panic::catch_unwind(AssertUnwindSafe(deliver)).is_err() {
            tracing::warn!(stream = %self.kind, "Subscriber panicked, event skipped for it");
        }
    }

    /// Drop all subscribers and mark the stream closed.
    fn close(&self) {
        let mut subscribers = self.subscribers();
        subscribers.line.clear();
        subscribers.chunk.clear();
        self.closed.cancel();
        drop(subscribers);
        tracing::debug!(stream = %self.kind, "Stream closed");
    }
}

/// Closes the demultiplexer when the dispatch task ends.
struct CloseOnDrop(Arc<Inner>);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Turns one raw output stream into [`OutputEvent`]s and fans them out.
///
/// Cloning yields another handle to the same demultiplexer.
#[derive(Clone)]
pub struct StreamDemultiplexer {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for StreamDemultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamDemultiplexer")
            .field("kind", &self.inner.kind)
            .field("started", &self.is_started())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl StreamDemultiplexer {
    /// Create an idle demultiplexer for the given stream.
    #[must_use]
    pub fn new(kind: StreamKind) -> Self {
        Self {
            inner: Arc::new(Inner {
                kind,
                subscribers: Mutex::new(Subscribers::default()),
                started: AtomicBool::new(false),
                stop: CancellationToken::new(),
                closed: CancellationToken::new(),
            }),
        }
    }

    /// Create a demultiplexer and immediately start reading `reader`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<R>(kind: StreamKind, reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let demux = Self::new(kind);
        demux.launch(reader);
        demux
    }

    #[must_use]
    pub fn kind(&self) -> StreamKind {
        self.inner.kind
    }

    /// Register a subscriber for complete lines.
    ///
    /// Subscribers only see events dispatched after registration. Registering
    /// on a closed stream is a no-op. A panicking subscriber misses that event
    /// but stays registered, and other subscribers are unaffected.
    pub fn on_line<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let mut subscribers = self.inner.subscribers();
        if self.inner.closed.is_cancelled() {
            return;
        }
        subscribers.line.push(Arc::new(callback));
        tracing::debug!(stream = %self.inner.kind, count = subscribers.line.len(), "Line subscriber added");
    }

    /// Register a subscriber for partial-line chunks.
    pub fn on_chunk<F>(&self, callback: F)
    where
        F: Fn(&Chunk) + Send + Sync + 'static,
    {
        let mut subscribers = self.inner.subscribers();
        if self.inner.closed.is_cancelled() {
            return;
        }
        subscribers.chunk.push(Arc::new(callback));
        tracing::debug!(stream = %self.inner.kind, count = subscribers.chunk.len(), "Chunk subscriber added");
    }

    /// Subscribe to both event kinds as an async stream.
    ///
    /// The stream ends once the demultiplexer closes.
    #[must_use]
    pub fn subscribe(&self) -> UnboundedReceiverStream<OutputEvent> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut subscribers = self.inner.subscribers();
        if !self.inner.closed.is_cancelled() {
            let line_tx = tx.clone();
            subscribers.line.push(Arc::new(move |text: &str| {
                let _ = line_tx.send(OutputEvent::Line {
                    text: text.to_string(),
                });
            }));
            subscribers.chunk.push(Arc::new(move |chunk: &Chunk| {
                let _ = tx.send(OutputEvent::Chunk(chunk.clone()));
            }));
        }

        UnboundedReceiverStream::new(rx)
    }

    /// Begin reading `reader` in the background.
    ///
    /// Returns immediately. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::AlreadyStarted` if this demultiplexer is
    /// already reading a stream.
    pub fn start<R>(&self, reader: R) -> Result<(), StreamError>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        if self.is_started() {
            return Err(StreamError::AlreadyStarted(self.inner.kind));
        }
        self.launch(reader);
        Ok(())
    }

    fn launch<R>(&self, reader: R)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        tracing::debug!(stream = %self.inner.kind, "Starting stream reader");

        tokio::spawn(read_loop(
            self.inner.kind,
            reader,
            self.inner.stop.clone(),
            tx,
        ));
        tokio::spawn(dispatch_loop(Arc::clone(&self.inner), rx));
    }

    /// Stop reading even if the stream has not reached end-of-data.
    ///
    /// Any buffered partial line is still delivered as a final line.
    pub fn stop(&self) {
        self.inner.stop.cancel();
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// Whether the stream ended and every event has been dispatched.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Wait until the stream ended and every event has been dispatched.
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await;
    }
}

async fn read_loop<R>(
    kind: StreamKind,
    mut reader: R,
    stop: CancellationToken,
    tx: UnboundedSender<OutputEvent>,
) where
    R: AsyncRead + Unpin,
{
    let mut splitter = LineSplitter::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let read = tokio::select! {
            biased;
            () = stop.cancelled() => {
                tracing::debug!(stream = %kind, "Stream reader stopped");
                break;
            }
            read = reader.read(&mut buf) => read,
        };

        match read {
            Ok(0) => break,
            Ok(n) => {
                for event in splitter.feed(&buf[..n]) {
                    if tx.send(event).is_err() {
                        return;
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => {
                tracing::warn!(stream = %kind, error = %e, "Stream read failed, treating as end of stream");
                break;
            }
        }
    }

    if let Some(last) = splitter.finish() {
        let _ = tx.send(last);
    }
}

async fn dispatch_loop(inner: Arc<Inner>, mut rx: UnboundedReceiver<OutputEvent>) {
    let guard = CloseOnDrop(inner);
    while let Some(event) = rx.recv().await {
        guard.0.dispatch(&event);
    }
}
