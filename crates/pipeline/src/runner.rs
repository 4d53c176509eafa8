//! Plugin runners
//!
//! Runners are the supervisory workers around plugins: they own the
//! plugin's inbound channel and tick timer, and they restart the plugin
//! with exponential backoff when it fails. The supervision loop is shared;
//! what differs per category is the worker capability the plugin exposes
//! (`Input::run` drives itself, filters and outputs are driven per pack and
//! per tick).

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use relay_config::PluginGlobals;
use relay_matcher::Matcher;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::PipelineError;
use crate::pack::{Pack, RecyclePool};
use crate::plugin::{Filter, Input, Output, PluginCategory, PluginError, PluginHelper};
use crate::retry::Backoff;
use crate::router::MatchRunner;

/// Supervisor for one input plugin
///
/// The runner is also the input's interface to the pipeline: fresh packs
/// come from [`InputRunner::new_pack`] and populated ones go out through
/// [`InputRunner::inject`].
pub struct InputRunner {
    name: String,
    globals: PluginGlobals,
    input_pool: Arc<RecyclePool>,
    router_tx: mpsc::Sender<Pack>,
    stopping: CancellationToken,
    plugin: Mutex<Option<Box<dyn Input>>>,
}

impl InputRunner {
    pub(crate) fn new(
        name: impl Into<String>,
        plugin: Box<dyn Input>,
        globals: &PluginGlobals,
        input_pool: Arc<RecyclePool>,
        router_tx: mpsc::Sender<Pack>,
        stopping: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            globals: globals.clone(),
            input_pool,
            router_tx,
            stopping,
            plugin: Mutex::new(Some(plugin)),
        })
    }

    /// The section name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The pipeline-level settings this runner was configured with
    pub fn plugin_globals(&self) -> &PluginGlobals {
        &self.globals
    }

    /// Take a fresh pack from the input pool
    ///
    /// Blocks while every carrier is in flight; this is where input
    /// backpressure comes from.
    pub async fn new_pack(&self) -> Option<Pack> {
        self.input_pool.take().await
    }

    /// Send a populated pack to the router
    pub async fn inject(&self, pack: Pack) -> bool {
        self.router_tx.send(pack).await.is_ok()
    }

    /// Token the input should watch to wind down promptly
    pub fn stopping(&self) -> &CancellationToken {
        &self.stopping
    }

    pub(crate) fn start(
        self: &Arc<Self>,
        helper: Arc<dyn PluginHelper>,
        tracker: &TaskTracker,
    ) -> Result<(), PipelineError> {
        let mut plugin =
            self.plugin
                .lock()
                .take()
                .ok_or_else(|| PipelineError::AlreadyStarted {
                    name: self.name.clone(),
                })?;
        let runner = Arc::clone(self);

        tracker.spawn(async move {
            tracing::debug!(input = %runner.name, "input runner starting");
            let mut backoff = Backoff::new(&runner.globals.retries);
            loop {
                let result = plugin.run(&runner, Arc::clone(&helper)).await;
                if runner.stopping.is_cancelled() {
                    break;
                }
                match result {
                    Ok(()) => break,
                    Err(err) => {
                        tracing::error!(input = %runner.name, error = %err, "input exited with error");
                        plugin.cleanup();
                        if !sleep_before_retry(&mut backoff, &runner.name, &runner.stopping).await {
                            break;
                        }
                    }
                }
            }
            plugin.stop();
            tracing::debug!(input = %runner.name, "input runner stopping");
        });
        Ok(())
    }
}

impl std::fmt::Debug for InputRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputRunner").field("name", &self.name).finish()
    }
}

/// The plugin half of a filter-or-output runner
pub(crate) enum FoPlugin {
    Filter(Box<dyn Filter>),
    Output(Box<dyn Output>),
}

impl FoPlugin {
    fn category(&self) -> PluginCategory {
        match self {
            FoPlugin::Filter(_) => PluginCategory::Filter,
            FoPlugin::Output(_) => PluginCategory::Output,
        }
    }

    async fn process(
        &mut self,
        pack: Arc<Pack>,
        helper: &dyn PluginHelper,
    ) -> Result<(), PluginError> {
        match self {
            FoPlugin::Filter(p) => p.process(pack, helper).await,
            FoPlugin::Output(p) => p.process(pack, helper).await,
        }
    }

    async fn timer_event(&mut self, helper: &dyn PluginHelper) -> Result<(), PluginError> {
        match self {
            FoPlugin::Filter(p) => p.timer_event(helper).await,
            FoPlugin::Output(p) => p.timer_event(helper).await,
        }
    }

    fn cleanup(&mut self) {
        match self {
            FoPlugin::Filter(p) => p.cleanup(),
            FoPlugin::Output(p) => p.cleanup(),
        }
    }
}

struct FoState {
    plugin: FoPlugin,
    in_rx: mpsc::Receiver<Arc<Pack>>,
}

/// Supervisor for one filter or output plugin
///
/// Carries the plugin handle, an optional tick interval and the matcher
/// that routes packs to its inbound channel.
pub struct FilterOutputRunner {
    name: String,
    category: PluginCategory,
    globals: PluginGlobals,
    matcher: Option<Arc<MatchRunner>>,
    sender: Mutex<Option<mpsc::Sender<Arc<Pack>>>>,
    state: Mutex<Option<FoState>>,
}

impl FilterOutputRunner {
    pub(crate) fn new(
        name: impl Into<String>,
        plugin: FoPlugin,
        globals: &PluginGlobals,
        matcher: Option<Matcher>,
        chan_size: usize,
    ) -> Arc<Self> {
        let name = name.into();
        let category = plugin.category();
        let (in_tx, in_rx) = mpsc::channel(chan_size);

        let match_runner = matcher.map(|m| {
            Arc::new(MatchRunner::new(
                category,
                name.clone(),
                m,
                globals.message_signer.clone(),
                in_tx.clone(),
            ))
        });

        Arc::new(Self {
            name,
            category,
            globals: globals.clone(),
            matcher: match_runner,
            sender: Mutex::new(Some(in_tx)),
            state: Mutex::new(Some(FoState { plugin, in_rx })),
        })
    }

    /// The section name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The pipeline-level settings this runner was configured with
    pub fn plugin_globals(&self) -> &PluginGlobals {
        &self.globals
    }

    /// Filter or Output
    pub fn category(&self) -> PluginCategory {
        self.category
    }

    /// The matcher feeding this runner, if one was configured
    pub fn matcher(&self) -> Option<&Arc<MatchRunner>> {
        self.matcher.as_ref()
    }

    /// Tick interval, if ticking is enabled
    pub fn ticker(&self) -> Option<Duration> {
        self.globals.ticker()
    }

    /// A sender for direct delivery to this runner
    ///
    /// Returns `None` once the runner has been closed. Callers should
    /// obtain a sender per use rather than holding one long-term, so
    /// closing the runner actually drains it.
    pub fn sender(&self) -> Option<mpsc::Sender<Arc<Pack>>> {
        self.sender.lock().clone()
    }

    /// Drop this runner's own inbound sender so the channel can drain
    pub(crate) fn close(&self) {
        self.sender.lock().take();
    }

    pub(crate) fn start(
        self: &Arc<Self>,
        helper: Arc<dyn PluginHelper>,
        tracker: &TaskTracker,
        stopping: CancellationToken,
    ) -> Result<(), PipelineError> {
        let FoState { mut plugin, mut in_rx } =
            self.state
                .lock()
                .take()
                .ok_or_else(|| PipelineError::AlreadyStarted {
                    name: self.name.clone(),
                })?;
        let runner = Arc::clone(self);

        tracker.spawn(async move {
            tracing::debug!(plugin = %runner.name, category = %runner.category, "runner starting");
            let mut backoff = Backoff::new(&runner.globals.retries);
            let mut ticker = runner.ticker().map(|period| {
                tokio::time::interval_at(tokio::time::Instant::now() + period, period)
            });
            loop {
                match drive(&mut plugin, &mut in_rx, &mut ticker, &helper, &stopping).await {
                    Ok(()) => break,
                    Err(err) => {
                        tracing::error!(plugin = %runner.name, error = %err, "plugin failed");
                        plugin.cleanup();
                        if !sleep_before_retry(&mut backoff, &runner.name, &stopping).await {
                            break;
                        }
                    }
                }
            }
            tracing::debug!(plugin = %runner.name, "runner stopping");
        });
        Ok(())
    }
}

impl std::fmt::Debug for FilterOutputRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterOutputRunner")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("ticker", &self.ticker())
            .finish()
    }
}

/// Feed the plugin until its channel closes or the pipeline stops
async fn drive(
    plugin: &mut FoPlugin,
    in_rx: &mut mpsc::Receiver<Arc<Pack>>,
    ticker: &mut Option<tokio::time::Interval>,
    helper: &Arc<dyn PluginHelper>,
    stopping: &CancellationToken,
) -> Result<(), PluginError> {
    loop {
        tokio::select! {
            _ = stopping.cancelled() => return Ok(()),
            maybe = in_rx.recv() => match maybe {
                Some(pack) => plugin.process(pack, helper.as_ref()).await?,
                None => return Ok(()),
            },
            _ = next_tick(ticker) => plugin.timer_event(helper.as_ref()).await?,
        }
    }
}

/// Resolve on the next tick, or never when ticking is disabled
async fn next_tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Sleep out the backoff delay; false when retries are exhausted or the
/// pipeline stopped while waiting
async fn sleep_before_retry(
    backoff: &mut Backoff,
    name: &str,
    stopping: &CancellationToken,
) -> bool {
    match backoff.next_delay() {
        Some(delay) => {
            tracing::info!(
                plugin = %name,
                delay_ms = delay.as_millis() as u64,
                attempt = backoff.attempts(),
                "restarting plugin"
            );
            tokio::select! {
                _ = stopping.cancelled() => false,
                _ = tokio::time::sleep(delay) => true,
            }
        }
        None => {
            tracing::error!(plugin = %name, "plugin retries exhausted");
            false
        }
    }
}
