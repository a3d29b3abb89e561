use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{mpsc, Mutex};

/// Bound on the number of in-flight chunks per pipe direction.
pub const PIPE_BOUND: usize = 100;
/// Idle timeout on `pop`: an empty pipe this long is treated as closed.
pub const POP_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Result of popping a chunk off a half-duplex pipe.
pub enum Pop {
    Chunk(Vec<u8>),
    /// The pipe is closed, either because the producer closed it or
    /// because it sat idle past `POP_IDLE_TIMEOUT`.
    Closed,
}

/// One direction of a `Channel`: a bounded FIFO of opaque byte chunks,
/// backed by a `tokio::sync::mpsc` channel the way the reference
/// implementation's `Input`/`Output` pair drives a native Go channel
/// (`original_source/core/channel.go`). `close()` drops this pipe's sender
/// outright rather than merely flipping a flag: a dropped sender makes
/// `pop`'s `recv()` drain whatever is already buffered and only then
/// report closed, matching the contract in SPEC_FULL.md §4.3 ("pending
/// pops drain, then return closed") without the raciness of a
/// timeout-triggered close stepping on a concurrent push (§9 open
/// question (c)) -- a push against an already-closed sender is just a
/// no-op send on a closed channel.
pub struct HalfDuplexChannel {
    tx: SyncMutex<Option<mpsc::Sender<Vec<u8>>>>,
    rx: Mutex<mpsc::Receiver<Vec<u8>>>,
}

impl HalfDuplexChannel {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::channel(PIPE_BOUND);
        Arc::new(Self { tx: SyncMutex::new(Some(tx)), rx: Mutex::new(rx) })
    }

    /// Enqueue a chunk, blocking only this producer if the pipe is at
    /// capacity (never the socket read that produced the chunk, since the
    /// read's own timeout has already elapsed by the time this runs --
    /// see `core::relay::pump_input`). Sequential calls from the same
    /// caller preserve order, matching the reference `Input` loop's
    /// direct, un-spawned channel send. A no-op once the pipe is closed.
    pub async fn push(&self, chunk: Vec<u8>) {
        let tx = self.tx.lock().clone();
        if let Some(tx) = tx {
            let _ = tx.send(chunk).await;
        }
    }

    pub async fn pop(&self) -> Pop {
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(POP_IDLE_TIMEOUT, rx.recv()).await {
            Ok(Some(chunk)) => Pop::Chunk(chunk),
            Ok(None) => Pop::Closed,
            Err(_elapsed) => Pop::Closed,
        }
    }

    /// Drop this pipe's sender. Any chunks already queued are still
    /// delivered to `pop`; once drained, `pop` reports closed.
    pub fn close(&self) {
        self.tx.lock().take();
    }
}

/// A full-duplex pairing of two half-duplex pipes, as described by
/// `SPEC_FULL.md` §4.3: `forward` carries client->destination bytes,
/// `backward` carries destination->client bytes. Cheaply `Clone`: both
/// fields are `Arc`s, so the listener and the spawned caller task each
/// hold their own handle onto the same pair of pipes.
#[derive(Clone)]
pub struct FullDuplexChannel {
    pub forward: Arc<HalfDuplexChannel>,
    pub backward: Arc<HalfDuplexChannel>,
}

impl FullDuplexChannel {
    pub fn new() -> Self {
        Self { forward: HalfDuplexChannel::new(), backward: HalfDuplexChannel::new() }
    }
}

impl Default for FullDuplexChannel {
    fn default() -> Self {
        Self::new()
    }
}
