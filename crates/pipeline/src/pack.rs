//! Message packs and recycle pools
//!
//! A `Pack` carries one message (plus its undecoded bytes) through the
//! pipeline. Packs are backed by preallocated carriers that live in one of
//! two bounded recycle pools - one feeding inputs, one feeding filter
//! injection. The pools are strictly separate: a filter that borrowed from
//! the input pool could deadlock against an input waiting on the filter.
//!
//! In-flight sharing uses `Arc<Pack>`: the router clones the `Arc` once per
//! accepting destination, each consumer drops its clone when done, and the
//! final drop clears the carrier and returns it to its home pool. A carrier
//! is therefore either resident in exactly one pool or owned by exactly one
//! live `Pack`.

use crossfire::{MAsyncRx, MAsyncTx};
use relay_message::Message;

/// Reusable backing storage for one in-flight message
///
/// `msg_bytes` holds the raw input payload until a decoder turns it into
/// the structured `message`.
#[derive(Debug, Default)]
pub(crate) struct Carrier {
    pub(crate) message: Message,
    pub(crate) msg_bytes: Vec<u8>,
}

type CarrierTx = MAsyncTx<Box<Carrier>>;
type CarrierRx = MAsyncRx<Box<Carrier>>;

/// A bounded pool of idle message carriers
///
/// The pool is a bounded MPMC channel preallocated to capacity; taking a
/// carrier when the pool is empty blocks, which is the pipeline's
/// fundamental backpressure point.
pub struct RecyclePool {
    tx: CarrierTx,
    rx: CarrierRx,
    capacity: usize,
}

impl RecyclePool {
    /// Create a pool preallocated with `capacity` carriers
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = crossfire::mpmc::bounded_async(capacity);
        for _ in 0..capacity {
            // Filling an empty bounded channel cannot fail
            let _ = tx.try_send(Box::new(Carrier::default()));
        }
        Self { tx, rx, capacity }
    }

    /// Take a pack, waiting until a carrier is idle
    ///
    /// Returns `None` only if the pool has been torn down.
    pub async fn take(&self) -> Option<Pack> {
        let carrier = self.rx.recv().await.ok()?;
        Some(Pack::new(carrier, self.tx.clone()))
    }

    /// Take a pack without waiting
    pub fn try_take(&self) -> Option<Pack> {
        let carrier = self.rx.try_recv().ok()?;
        Some(Pack::new(carrier, self.tx.clone()))
    }

    /// Number of carriers this pool was built with
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl std::fmt::Debug for RecyclePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecyclePool")
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// One in-flight message and its carrier
///
/// The pack returns its carrier to the home pool when the last reference
/// to it is dropped.
pub struct Pack {
    carrier: Box<Carrier>,
    msg_loop_count: u32,
    decoded: bool,
    home: CarrierTx,
}

impl Pack {
    fn new(carrier: Box<Carrier>, home: CarrierTx) -> Self {
        Self {
            carrier,
            msg_loop_count: 0,
            decoded: false,
            home,
        }
    }

    /// The decoded message
    #[inline]
    pub fn message(&self) -> &Message {
        &self.carrier.message
    }

    /// Mutable access to the message, for inputs and decoders that still
    /// own the pack exclusively
    #[inline]
    pub fn message_mut(&mut self) -> &mut Message {
        &mut self.carrier.message
    }

    /// The raw, not-yet-decoded input bytes
    #[inline]
    pub fn msg_bytes(&self) -> &[u8] {
        &self.carrier.msg_bytes
    }

    /// Mutable access to the raw input bytes
    #[inline]
    pub fn msg_bytes_mut(&mut self) -> &mut Vec<u8> {
        &mut self.carrier.msg_bytes
    }

    /// How many times this logical message has re-entered the pipeline
    #[inline]
    pub fn msg_loop_count(&self) -> u32 {
        self.msg_loop_count
    }

    #[inline]
    pub(crate) fn set_msg_loop_count(&mut self, count: u32) {
        self.msg_loop_count = count;
    }

    /// Whether a decoder has produced the structured message
    #[inline]
    pub fn decoded(&self) -> bool {
        self.decoded
    }

    #[inline]
    pub fn set_decoded(&mut self, decoded: bool) {
        self.decoded = decoded;
    }
}

impl Drop for Pack {
    fn drop(&mut self) {
        // Swap the carrier out, reset it and send it home. The pool's
        // capacity equals the number of carriers in existence, so the send
        // only fails during teardown, where dropping the carrier is fine.
        let mut carrier = std::mem::take(&mut self.carrier);
        carrier.message.clear();
        carrier.msg_bytes.clear();
        let _ = self.home.try_send(carrier);
    }
}

impl std::fmt::Debug for Pack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pack")
            .field("msg_loop_count", &self.msg_loop_count)
            .field("decoded", &self.decoded)
            .field("msg_bytes_len", &self.carrier.msg_bytes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_pool_preallocates_capacity() {
        let pool = RecyclePool::new(3);
        assert_eq!(pool.capacity(), 3);

        let p1 = pool.try_take().unwrap();
        let p2 = pool.try_take().unwrap();
        let p3 = pool.try_take().unwrap();
        // All carriers are out; the pool is empty until one returns
        assert!(pool.try_take().is_none());

        drop(p1);
        assert!(pool.try_take().is_some());
        drop((p2, p3));
    }

    #[test]
    fn test_drop_recycles_and_clears() {
        let pool = RecyclePool::new(1);

        let mut pack = pool.try_take().unwrap();
        pack.message_mut().set_payload("dirty");
        pack.msg_bytes_mut().extend_from_slice(b"raw");
        pack.set_decoded(true);
        drop(pack);

        let recycled = pool.try_take().unwrap();
        assert_eq!(recycled.message().payload(), "");
        assert!(recycled.msg_bytes().is_empty());
        assert!(!recycled.decoded());
        assert_eq!(recycled.msg_loop_count(), 0);
    }

    #[test]
    fn test_shared_pack_recycles_on_last_drop() {
        let pool = RecyclePool::new(1);

        let pack = pool.try_take().unwrap();
        let shared = Arc::new(pack);
        let clone_a = Arc::clone(&shared);
        let clone_b = Arc::clone(&shared);
        assert_eq!(Arc::strong_count(&shared), 3);

        drop(shared);
        drop(clone_a);
        // One reference still holds the carrier
        assert!(pool.try_take().is_none());

        drop(clone_b);
        assert!(pool.try_take().is_some());
    }

    #[tokio::test]
    async fn test_take_blocks_until_return() {
        let pool = Arc::new(RecyclePool::new(1));
        let held = pool.take().await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.take().await.is_some() })
        };

        // Give the waiter time to block on the empty pool
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        let got = tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("waiter timed out")
            .expect("waiter panicked");
        assert!(got);
    }
}
