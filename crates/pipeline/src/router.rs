//! The message router
//!
//! A single actor that owns the authoritative matcher lists. It consumes
//! two channels: inbound packs from inputs, decoders and filters, and a
//! control channel carrying matcher add/remove events. Because both are
//! handled by the same loop, a filter can never receive a pack after its
//! removal has been processed.
//!
//! A control message whose matcher id is already installed is a removal;
//! anything else is an add.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use relay_matcher::Matcher;
use relay_message::Message;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::PipelineError;
use crate::pack::Pack;
use crate::plugin::PluginCategory;

static NEXT_MATCHER_ID: AtomicU64 = AtomicU64::new(1);

/// A compiled matcher tied to one filter or output runner
///
/// Pairs the predicate with the destination channel and an optional
/// required signer.
pub struct MatchRunner {
    id: u64,
    category: PluginCategory,
    name: String,
    matcher: Matcher,
    signer: Option<String>,
    dest: mpsc::Sender<Arc<Pack>>,
}

impl MatchRunner {
    pub(crate) fn new(
        category: PluginCategory,
        name: impl Into<String>,
        matcher: Matcher,
        signer: Option<String>,
        dest: mpsc::Sender<Arc<Pack>>,
    ) -> Self {
        Self {
            id: NEXT_MATCHER_ID.fetch_add(1, Ordering::Relaxed),
            category,
            name: name.into(),
            matcher,
            signer,
            dest,
        }
    }

    /// Unique id; the router keys add/remove events on this
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Name of the runner this matcher feeds
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this matcher belongs to a filter or an output
    pub fn category(&self) -> PluginCategory {
        self.category
    }

    /// The compiled predicate
    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    /// Whether this destination wants the message
    pub fn accepts(&self, msg: &Message) -> bool {
        if let Some(required) = &self.signer {
            if msg.signer() != Some(required.as_str()) {
                return false;
            }
        }
        self.matcher.matches(msg)
    }

    fn dest(&self) -> mpsc::Sender<Arc<Pack>> {
        self.dest.clone()
    }
}

impl std::fmt::Debug for MatchRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchRunner")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("matcher", &self.matcher.source())
            .finish()
    }
}

/// Delivery counters, relaxed atomics in the usual style
#[derive(Debug, Default)]
pub struct RouterMetrics {
    packs_received: AtomicU64,
    deliveries: AtomicU64,
    packs_unmatched: AtomicU64,
    send_failures: AtomicU64,
}

impl RouterMetrics {
    #[inline]
    fn record_received(&self) {
        self.packs_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_delivery(&self) {
        self.deliveries.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_unmatched(&self) {
        self.packs_unmatched.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> RouterSnapshot {
        RouterSnapshot {
            packs_received: self.packs_received.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            packs_unmatched: self.packs_unmatched.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`RouterMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RouterSnapshot {
    /// Packs received from inputs, decoders and filters
    pub packs_received: u64,
    /// Individual pack deliveries to destinations
    pub deliveries: u64,
    /// Packs no destination wanted
    pub packs_unmatched: u64,
    /// Deliveries that failed because a destination had shut down
    pub send_failures: u64,
}

#[derive(Default)]
struct MatcherSet {
    filters: Vec<Arc<MatchRunner>>,
    outputs: Vec<Arc<MatchRunner>>,
}

struct RouterState {
    in_rx: mpsc::Receiver<Pack>,
    mr_rx: mpsc::UnboundedReceiver<Arc<MatchRunner>>,
}

/// The central fan-out actor
pub struct MessageRouter {
    in_tx: mpsc::Sender<Pack>,
    mr_tx: mpsc::UnboundedSender<Arc<MatchRunner>>,
    matchers: Arc<Mutex<MatcherSet>>,
    state: Mutex<Option<RouterState>>,
    metrics: Arc<RouterMetrics>,
}

impl MessageRouter {
    pub(crate) fn new(chan_size: usize) -> Self {
        let (in_tx, in_rx) = mpsc::channel(chan_size);
        let (mr_tx, mr_rx) = mpsc::unbounded_channel();
        Self {
            in_tx,
            mr_tx,
            matchers: Arc::new(Mutex::new(MatcherSet::default())),
            state: Mutex::new(Some(RouterState { in_rx, mr_rx })),
            metrics: Arc::new(RouterMetrics::default()),
        }
    }

    /// A sender for injecting packs into the router
    pub fn sender(&self) -> mpsc::Sender<Pack> {
        self.in_tx.clone()
    }

    /// Queue a matcher add/remove event (`MrChan`)
    ///
    /// The router interprets a matcher id it already holds as a removal.
    pub(crate) fn notify(&self, matcher: Arc<MatchRunner>) {
        // The receiver lives as long as the router; a send can only fail
        // after teardown, when the event no longer matters.
        let _ = self.mr_tx.send(matcher);
    }

    /// Install a matcher directly, before the router starts
    pub(crate) fn install_matcher(&self, matcher: Arc<MatchRunner>) {
        apply_matcher_event(&self.matchers, matcher);
    }

    /// Number of installed filter matchers
    pub fn filter_matcher_count(&self) -> usize {
        self.matchers.lock().filters.len()
    }

    /// Number of installed output matchers
    pub fn output_matcher_count(&self) -> usize {
        self.matchers.lock().outputs.len()
    }

    /// Delivery metrics
    pub fn metrics(&self) -> RouterSnapshot {
        self.metrics.snapshot()
    }

    /// Start the router actor
    pub(crate) fn start(
        &self,
        tracker: &TaskTracker,
        stopping: CancellationToken,
    ) -> Result<(), PipelineError> {
        let state = self
            .state
            .lock()
            .take()
            .ok_or(PipelineError::RouterStarted)?;
        let matchers = Arc::clone(&self.matchers);
        let metrics = Arc::clone(&self.metrics);
        tracker.spawn(run_router(state, matchers, metrics, stopping));
        Ok(())
    }
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let set = self.matchers.lock();
        f.debug_struct("MessageRouter")
            .field("filter_matchers", &set.filters.len())
            .field("output_matchers", &set.outputs.len())
            .finish()
    }
}

async fn run_router(
    mut state: RouterState,
    matchers: Arc<Mutex<MatcherSet>>,
    metrics: Arc<RouterMetrics>,
    stopping: CancellationToken,
) {
    {
        let set = matchers.lock();
        tracing::info!(
            filter_matchers = set.filters.len(),
            output_matchers = set.outputs.len(),
            "message router starting"
        );
    }

    loop {
        tokio::select! {
            biased;
            _ = stopping.cancelled() => break,
            event = state.mr_rx.recv() => match event {
                Some(matcher) => apply_matcher_event(&matchers, matcher),
                None => break,
            },
            maybe = state.in_rx.recv() => match maybe {
                Some(pack) => deliver(pack, &matchers, &metrics).await,
                None => break,
            },
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        packs_received = snapshot.packs_received,
        deliveries = snapshot.deliveries,
        packs_unmatched = snapshot.packs_unmatched,
        send_failures = snapshot.send_failures,
        "message router stopping"
    );
}

fn apply_matcher_event(matchers: &Mutex<MatcherSet>, matcher: Arc<MatchRunner>) {
    let mut set = matchers.lock();
    let list = match matcher.category() {
        PluginCategory::Filter => &mut set.filters,
        PluginCategory::Output => &mut set.outputs,
        other => {
            tracing::error!(category = %other, "matcher event for non-routable category");
            return;
        }
    };
    if let Some(pos) = list.iter().position(|m| m.id() == matcher.id()) {
        tracing::debug!(name = %matcher.name(), "matcher removed");
        list.remove(pos);
    } else {
        tracing::debug!(name = %matcher.name(), expr = %matcher.matcher(), "matcher added");
        list.push(matcher);
    }
}

async fn deliver(pack: Pack, matchers: &Mutex<MatcherSet>, metrics: &RouterMetrics) {
    metrics.record_received();

    // Collect accepting destinations under the lock, then send without it;
    // sends may block on slow consumers.
    let destinations: Vec<mpsc::Sender<Arc<Pack>>> = {
        let set = matchers.lock();
        set.filters
            .iter()
            .chain(set.outputs.iter())
            .filter(|m| m.accepts(pack.message()))
            .map(|m| m.dest())
            .collect()
    };

    if destinations.is_empty() {
        metrics.record_unmatched();
        // Dropping the pack recycles it
        return;
    }

    // One clone per accepting destination; the strong count is the pack's
    // reference count.
    let shared = Arc::new(pack);
    for dest in destinations {
        if dest.send(Arc::clone(&shared)).await.is_ok() {
            metrics.record_delivery();
        } else {
            metrics.record_send_failure();
        }
    }
}

#[cfg(test)]
#[path = "router_test.rs"]
mod router_test;
