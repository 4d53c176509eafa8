//! Decoder runners and rendezvous pools
//!
//! Each decoder section gets a bounded pool of running `DecoderRunner`
//! workers. The pool channel *is* the rendezvous: a consumer (usually an
//! input) takes a runner out, feeds it packs, and puts it back. A decode
//! call completes only after the worker has finished decoding and handed
//! the pack to the router, so a handle resident in the pool always belongs
//! to an idle decoder. Capacity equals pool size, so at most `pool_size`
//! decoders of one section are busy at a time and an exhausted pool blocks
//! its consumers.

use std::collections::HashMap;
use std::sync::Arc;

use crossfire::{MAsyncRx, MAsyncTx};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::pack::Pack;
use crate::plugin::Decoder;

/// One pack awaiting decode, plus the ack the worker completes it with
type DecodeRequest = (Pack, oneshot::Sender<bool>);

/// Handle to one running decoder worker
#[derive(Clone)]
pub struct DecoderRunner {
    name: Arc<str>,
    in_tx: mpsc::Sender<DecodeRequest>,
}

impl DecoderRunner {
    /// The worker's name, `"<section>-<index>"`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Decode one pack and forward it to the router
    ///
    /// Resolves only once the worker has finished with the pack, so the
    /// runner is idle again when this returns and may be released back to
    /// its pool. Returns true when the pack decoded and reached the router;
    /// false when it was discarded as undecodable or the worker has shut
    /// down (the pack recycles either way).
    pub async fn decode(&self, pack: Pack) -> bool {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.in_tx.send((pack, ack_tx)).await.is_err() {
            return false;
        }
        ack_rx.await.unwrap_or(false)
    }
}

impl std::fmt::Debug for DecoderRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoderRunner")
            .field("name", &self.name)
            .finish()
    }
}

/// Spawn the worker task behind a [`DecoderRunner`]
pub(crate) fn spawn_decoder_runner(
    name: String,
    mut decoder: Box<dyn Decoder>,
    router_tx: mpsc::Sender<Pack>,
    tracker: &TaskTracker,
    stopping: CancellationToken,
) -> DecoderRunner {
    // Rendezvous: the holder of the handle has at most one decode in
    // flight, completed before the handle goes back to the pool.
    let (in_tx, mut in_rx) = mpsc::channel::<DecodeRequest>(1);
    let runner = DecoderRunner {
        name: name.clone().into(),
        in_tx,
    };

    tracker.spawn(async move {
        tracing::debug!(decoder = %name, "decoder runner starting");
        loop {
            tokio::select! {
                _ = stopping.cancelled() => break,
                maybe = in_rx.recv() => match maybe {
                    Some((mut pack, ack)) => match decoder.decode(&mut pack) {
                        Ok(()) => {
                            pack.set_decoded(true);
                            let delivered = router_tx.send(pack).await.is_ok();
                            let _ = ack.send(delivered);
                            if !delivered {
                                break;
                            }
                        }
                        Err(err) => {
                            tracing::warn!(
                                decoder = %name,
                                error = %err,
                                "discarding undecodable pack"
                            );
                            // Dropping the pack recycles it
                            let _ = ack.send(false);
                        }
                    },
                    None => break,
                },
            }
        }
        tracing::debug!(decoder = %name, "decoder runner stopping");
    });

    runner
}

/// The rendezvous pool for one decoder section
///
/// Holds exactly one handle per idle decoder: handles leave on
/// [`DecoderChan::acquire`] and return on [`DecoderChan::release`], and
/// [`DecoderRunner::decode`] does not resolve until the worker is idle
/// again, so at rest the channel holds `capacity` handles.
#[derive(Clone)]
pub struct DecoderChan {
    tx: MAsyncTx<DecoderRunner>,
    rx: MAsyncRx<DecoderRunner>,
    capacity: usize,
}

impl DecoderChan {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, rx) = crossfire::mpmc::bounded_async(capacity);
        Self { tx, rx, capacity }
    }

    /// Seed the pool with a freshly started runner
    pub(crate) fn put(&self, runner: DecoderRunner) {
        // The pool is only ever seeded up to capacity
        if self.tx.try_send(runner).is_err() {
            tracing::error!("decoder pool over capacity; dropping runner handle");
        }
    }

    /// Take a ready decoder, waiting for one to be returned if all are busy
    pub async fn acquire(&self) -> Option<DecoderRunner> {
        self.rx.recv().await.ok()
    }

    /// Take a ready decoder without waiting
    pub fn try_acquire(&self) -> Option<DecoderRunner> {
        self.rx.try_recv().ok()
    }

    /// Return a decoder to the pool after use
    pub async fn release(&self, runner: DecoderRunner) {
        let _ = self.tx.send(runner).await;
    }

    /// The configured pool size
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl std::fmt::Debug for DecoderChan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoderChan")
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Read-only handle over every decoder pool in the pipeline
///
/// Lookup is by section name or, for inputs that read a wire-format header,
/// by encoding id.
#[derive(Debug, Clone)]
pub struct DecoderSet {
    channels: Arc<HashMap<String, DecoderChan>>,
    sections_by_encoding: Arc<HashMap<u16, String>>,
}

impl DecoderSet {
    pub(crate) fn new(
        channels: HashMap<String, DecoderChan>,
        sections_by_encoding: HashMap<u16, String>,
    ) -> Self {
        Self {
            channels: Arc::new(channels),
            sections_by_encoding: Arc::new(sections_by_encoding),
        }
    }

    /// The pool for a decoder section
    pub fn by_name(&self, name: &str) -> Option<&DecoderChan> {
        self.channels.get(name)
    }

    /// The pool serving a wire-encoding id
    pub fn by_encoding(&self, id: u16) -> Option<&DecoderChan> {
        let section = self.sections_by_encoding.get(&id)?;
        self.channels.get(section)
    }

    /// All decoder section names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }
}
