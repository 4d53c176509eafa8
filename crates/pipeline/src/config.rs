//! Pipeline configuration and the plugin loader
//!
//! `PipelineConfig` is the instantiated pipeline graph: every runner,
//! wrapper, pool and table, plus the router. It is built once per process,
//! populated by the loader, mutated at runtime only through filter
//! add/remove, and torn down when the stopping token cancels and the task
//! trackers drain.
//!
//! Loading is resilient per section: each failing section is logged and
//! counted, the rest keep loading, and a non-zero count fails the load as a
//! whole at the end.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_config::{Config, GlobalConfig, PluginGlobals};
use relay_matcher::Matcher;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::decoder::{spawn_decoder_runner, DecoderChan, DecoderRunner, DecoderSet};
use crate::error::{PipelineError, Result};
use crate::pack::{Pack, RecyclePool};
use crate::plugin::{
    Decoder, Filter, PluginCategory, PluginHelper, PluginKind,
};
use crate::registry::PluginRegistry;
use crate::router::MessageRouter;
use crate::runner::{FilterOutputRunner, FoPlugin, InputRunner};
use crate::wrapper::PluginWrapper;

/// The instantiated pipeline graph
pub struct PipelineConfig {
    registry: PluginRegistry,
    globals: GlobalConfig,

    input_runners: HashMap<String, Arc<InputRunner>>,
    input_wrappers: HashMap<String, PluginWrapper>,
    decoder_wrappers: HashMap<String, PluginWrapper>,
    filter_runners: Mutex<HashMap<String, Arc<FilterOutputRunner>>>,
    filter_wrappers: HashMap<String, PluginWrapper>,
    output_runners: HashMap<String, Arc<FilterOutputRunner>>,
    output_wrappers: HashMap<String, PluginWrapper>,

    decoder_channels: HashMap<String, DecoderChan>,
    sections_by_encoding: HashMap<u16, String>,
    all_decoders: Vec<DecoderRunner>,

    input_pool: Arc<RecyclePool>,
    inject_pool: Arc<RecyclePool>,
    router: MessageRouter,

    log_msgs: Vec<String>,

    workers_tracker: TaskTracker,
    filters_tracker: TaskTracker,
    decoders_tracker: TaskTracker,
    stopping: CancellationToken,

    hostname: String,
    pid: i32,
}

impl PipelineConfig {
    /// Create an empty pipeline around a frozen registry
    pub fn new(registry: PluginRegistry, globals: GlobalConfig) -> Self {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_default();
        let router = MessageRouter::new(globals.plugin_chan_size);
        Self {
            input_runners: HashMap::new(),
            input_wrappers: HashMap::new(),
            decoder_wrappers: HashMap::new(),
            filter_runners: Mutex::new(HashMap::new()),
            filter_wrappers: HashMap::new(),
            output_runners: HashMap::new(),
            output_wrappers: HashMap::new(),
            decoder_channels: HashMap::new(),
            sections_by_encoding: HashMap::new(),
            all_decoders: Vec::new(),
            input_pool: Arc::new(RecyclePool::new(globals.pool_size)),
            inject_pool: Arc::new(RecyclePool::new(globals.pool_size)),
            router,
            log_msgs: Vec::new(),
            workers_tracker: TaskTracker::new(),
            filters_tracker: TaskTracker::new(),
            decoders_tracker: TaskTracker::new(),
            stopping: CancellationToken::new(),
            hostname,
            pid: std::process::id() as i32,
            registry,
            globals,
        }
    }

    /// The frozen plugin registry
    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Process-wide settings
    pub fn globals(&self) -> &GlobalConfig {
        &self.globals
    }

    /// The message router
    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    /// Token cancelled when the pipeline begins shutting down
    pub fn stopping(&self) -> &CancellationToken {
        &self.stopping
    }

    /// Host name captured at construction
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Process id captured at construction
    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Plugin loading errors accumulated so far
    pub fn log_msgs(&self) -> &[String] {
        &self.log_msgs
    }

    /// The pool feeding input plugins
    pub fn input_pool(&self) -> &Arc<RecyclePool> {
        &self.input_pool
    }

    /// Look up an input runner by section name
    pub fn input(&self, name: &str) -> Option<Arc<InputRunner>> {
        self.input_runners.get(name).cloned()
    }

    /// Look up an output runner by section name
    pub fn output(&self, name: &str) -> Option<Arc<FilterOutputRunner>> {
        self.output_runners.get(name).cloned()
    }

    /// Look up a filter runner by section name
    pub fn filter(&self, name: &str) -> Option<Arc<FilterOutputRunner>> {
        self.filter_runners.lock().get(name).cloned()
    }

    /// All input runners
    pub fn input_runners(&self) -> impl Iterator<Item = &Arc<InputRunner>> {
        self.input_runners.values()
    }

    /// All output runners
    pub fn output_runners(&self) -> impl Iterator<Item = &Arc<FilterOutputRunner>> {
        self.output_runners.values()
    }

    /// Names of currently installed filters
    pub fn filter_names(&self) -> Vec<String> {
        self.filter_runners.lock().keys().cloned().collect()
    }

    /// The wrapper for an input section
    ///
    /// Wrappers are retained for every category so fresh instances can be
    /// minted later; today only decoder pools and restarted filters do.
    pub fn input_wrapper(&self, name: &str) -> Option<&PluginWrapper> {
        self.input_wrappers.get(name)
    }

    /// The wrapper for a filter section
    pub fn filter_wrapper(&self, name: &str) -> Option<&PluginWrapper> {
        self.filter_wrappers.get(name)
    }

    /// The wrapper for an output section
    pub fn output_wrapper(&self, name: &str) -> Option<&PluginWrapper> {
        self.output_wrappers.get(name)
    }

    /// Whether a decoder section loaded successfully
    pub fn has_decoder(&self, name: &str) -> bool {
        self.decoder_wrappers.contains_key(name)
    }

    /// The wrapper for a decoder section
    pub fn decoder_wrapper(&self, name: &str) -> Option<&PluginWrapper> {
        self.decoder_wrappers.get(name)
    }

    /// The rendezvous pool for a decoder section
    pub fn decoder_channel(&self, name: &str) -> Option<&DecoderChan> {
        self.decoder_channels.get(name)
    }

    /// Every started decoder runner, across all sections
    pub fn all_decoders(&self) -> &[DecoderRunner] {
        &self.all_decoders
    }

    /// Handle over the decoder rendezvous pools
    pub fn decoder_set(&self) -> DecoderSet {
        DecoderSet::new(
            self.decoder_channels.clone(),
            self.sections_by_encoding.clone(),
        )
    }

    /// Obtain a stamped pack from the inject pool
    ///
    /// `msg_loop_count` is the loop count of the message being reacted to
    /// (zero if there is none). Returns `None` when the incremented count
    /// exceeds `max_msg_loops`, which is the signal to drop instead of
    /// re-injecting. The returned pack has a fresh timestamp, uuid, and the
    /// captured hostname and pid.
    ///
    /// Always draws from the inject pool; handing filters input-pool packs
    /// could deadlock the pipeline.
    pub async fn pipeline_pack(&self, msg_loop_count: u32) -> Option<Pack> {
        let msg_loop_count = msg_loop_count + 1;
        if msg_loop_count > self.globals.max_msg_loops {
            return None;
        }
        let mut pack = self.inject_pool.take().await?;
        let message = pack.message_mut();
        message.set_timestamp(now_nanos());
        message.set_uuid(Uuid::new_v4());
        message.set_hostname(self.hostname.clone());
        message.set_pid(self.pid);
        pack.set_msg_loop_count(msg_loop_count);
        Some(pack)
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Load every plugin section from a parsed config
    ///
    /// Sections that fail are logged and counted rather than aborting the
    /// load; if any failed, the result is a summary [`PipelineError::LoadErrors`].
    /// Afterwards the `JsonDecoder` and `ProtobufDecoder` sections are
    /// synthesized with their default encodings if the config did not
    /// provide them.
    pub fn load_from_config(&mut self, config: &Config) -> Result<()> {
        let mut errcnt = 0usize;
        for (name, section) in &config.plugins {
            tracing::info!(plugin = %name, "loading");
            errcnt += self.load_section(name, section);
        }

        for (name, section) in default_decoder_sections() {
            if !self.decoder_wrappers.contains_key(&name) {
                tracing::info!(plugin = %name, "loading default decoder");
                errcnt += self.load_section(&name, &section);
            }
        }

        if errcnt != 0 {
            return Err(PipelineError::LoadErrors { count: errcnt });
        }
        Ok(())
    }

    /// Parse a TOML document and load its plugin sections
    ///
    /// Process-wide settings come from construction; a `[global]` table in
    /// `contents` does not change an already-built pipeline.
    pub fn load_from_str(&mut self, contents: &str) -> Result<()> {
        let config: Config = contents.parse().map_err(|e: relay_config::ConfigError| {
            PipelineError::ConfigLoad {
                section: "<document>".into(),
                name: "<document>".into(),
                reason: e.to_string(),
            }
        })?;
        self.load_from_config(&config)
    }

    /// Load one plugin section, returning the number of errors (0 or 1)
    fn load_section(&mut self, section_name: &str, section: &toml::Table) -> usize {
        let globals = match PluginGlobals::from_table(section) {
            Ok(globals) => globals,
            Err(err) => {
                self.log(format!(
                    "Unable to decode config for plugin: {section_name}, error: {err}"
                ));
                return 1;
            }
        };

        let plugin_type = globals
            .type_override
            .clone()
            .unwrap_or_else(|| section_name.to_string());

        let Some(factory) = self.registry.factory(&plugin_type) else {
            self.log(format!("No such plugin: {section_name}"));
            return 1;
        };

        let wrapper = PluginWrapper::new(section_name, section.clone(), factory);

        // Construct and initialize the first instance; this also proves the
        // captured config is usable for later instances.
        let plugin = match wrapper.create_with_error() {
            Ok(plugin) => plugin,
            Err(err) => {
                self.log(err.to_string());
                return 1;
            }
        };

        let Some(category) = PluginCategory::from_type_name(&plugin_type) else {
            self.log(format!(
                "Type doesn't contain valid plugin name: {plugin_type}"
            ));
            return 1;
        };
        if plugin.category() != category {
            self.log(format!(
                "Plugin type '{plugin_type}' is classified {category} but the factory produced {}",
                plugin.category()
            ));
            return 1;
        }

        match plugin {
            PluginKind::Decoder(decoder) => {
                self.install_decoder(section_name, &plugin_type, globals, wrapper, decoder)
            }
            PluginKind::Input(input) => {
                self.install_input(section_name, globals, wrapper, input);
                0
            }
            PluginKind::Filter(filter) => {
                self.install_fo(section_name, globals, wrapper, FoPlugin::Filter(filter))
            }
            PluginKind::Output(output) => {
                self.install_fo(section_name, globals, wrapper, FoPlugin::Output(output))
            }
        }
    }

    fn install_decoder(
        &mut self,
        section_name: &str,
        plugin_type: &str,
        globals: PluginGlobals,
        wrapper: PluginWrapper,
        decoder: Box<dyn Decoder>,
    ) -> usize {
        if let Some(encoding) = globals.encoding_name.as_deref() {
            match self.registry.bind_decoder(plugin_type, encoding) {
                Ok(id) => {
                    self.sections_by_encoding.insert(id, section_name.to_string());
                }
                Err(err) => {
                    self.log(format!(
                        "Can't register decoder '{section_name}' for encoding '{encoding}': {err}"
                    ));
                    return 1;
                }
            }
        }

        let pool_size = if globals.pool_size > 0 {
            globals.pool_size
        } else {
            self.globals.decoder_pool_size
        };

        let chan = DecoderChan::new(pool_size);
        let first = self.spawn_decoder(format!("{section_name}-0"), decoder);
        chan.put(first.clone());
        self.all_decoders.push(first);

        // Mint the remaining pool members from the wrapper. A failed slot
        // leaves the pool under capacity; that is logged, not fatal.
        for i in 1..pool_size {
            match wrapper.create() {
                Some(PluginKind::Decoder(extra)) => {
                    let runner = self.spawn_decoder(format!("{section_name}-{i}"), extra);
                    chan.put(runner.clone());
                    self.all_decoders.push(runner);
                }
                Some(other) => {
                    tracing::error!(
                        decoder = %section_name,
                        slot = i,
                        produced = %other.category(),
                        "factory produced a non-decoder; pool left under capacity"
                    );
                }
                None => {
                    tracing::error!(
                        decoder = %section_name,
                        slot = i,
                        "failed to create pooled decoder; pool left under capacity"
                    );
                }
            }
        }

        self.decoder_channels.insert(section_name.to_string(), chan);
        self.decoder_wrappers
            .insert(section_name.to_string(), wrapper);
        0
    }

    fn spawn_decoder(&self, name: String, decoder: Box<dyn Decoder>) -> DecoderRunner {
        spawn_decoder_runner(
            name,
            decoder,
            self.router.sender(),
            &self.decoders_tracker,
            self.stopping.clone(),
        )
    }

    fn install_input(
        &mut self,
        section_name: &str,
        globals: PluginGlobals,
        wrapper: PluginWrapper,
        input: Box<dyn crate::plugin::Input>,
    ) {
        let runner = InputRunner::new(
            section_name,
            input,
            &globals,
            Arc::clone(&self.input_pool),
            self.router.sender(),
            self.stopping.clone(),
        );
        self.input_runners.insert(section_name.to_string(), runner);
        self.input_wrappers
            .insert(section_name.to_string(), wrapper);
    }

    fn install_fo(
        &mut self,
        section_name: &str,
        globals: PluginGlobals,
        wrapper: PluginWrapper,
        plugin: FoPlugin,
    ) -> usize {
        let matcher = match globals.message_matcher.as_deref() {
            Some(source) => match Matcher::new(source) {
                Ok(matcher) => Some(matcher),
                Err(err) => {
                    self.log(format!(
                        "Can't create message matcher for '{section_name}': {err}"
                    ));
                    return 1;
                }
            },
            None => None,
        };

        let runner = FilterOutputRunner::new(
            section_name,
            plugin,
            &globals,
            matcher,
            self.globals.plugin_chan_size,
        );
        if let Some(match_runner) = runner.matcher() {
            self.router.install_matcher(Arc::clone(match_runner));
        }

        match runner.category() {
            PluginCategory::Filter => {
                self.filter_runners
                    .lock()
                    .insert(section_name.to_string(), runner);
                self.filter_wrappers
                    .insert(section_name.to_string(), wrapper);
            }
            PluginCategory::Output => {
                self.output_runners.insert(section_name.to_string(), runner);
                self.output_wrappers
                    .insert(section_name.to_string(), wrapper);
            }
            // install_fo is only called for filters and outputs
            _ => {}
        }
        0
    }

    fn log(&mut self, msg: String) {
        tracing::error!("{msg}");
        self.log_msgs.push(msg);
    }

    // ------------------------------------------------------------------
    // Dynamic filters
    // ------------------------------------------------------------------

    /// Build a filter runner outside the loader, e.g. for dynamic addition
    pub fn new_filter_runner(
        &self,
        name: &str,
        plugin: Box<dyn Filter>,
        globals: &PluginGlobals,
    ) -> Result<Arc<FilterOutputRunner>> {
        let matcher = match globals.message_matcher.as_deref() {
            Some(source) => {
                Some(
                    Matcher::new(source).map_err(|source| PipelineError::MatcherCompile {
                        name: name.to_string(),
                        source,
                    })?,
                )
            }
            None => None,
        };
        Ok(FilterOutputRunner::new(
            name,
            FoPlugin::Filter(plugin),
            globals,
            matcher,
            self.globals.plugin_chan_size,
        ))
    }

    /// Start a filter runner and install it while the pipeline is live
    ///
    /// On a start failure the filter map is left unchanged. On success the
    /// filter's matcher is queued to the router, which installs it in order
    /// with pack deliveries.
    pub fn add_filter_runner(
        self: &Arc<Self>,
        runner: Arc<FilterOutputRunner>,
    ) -> Result<()> {
        let mut filters = self.filter_runners.lock();
        let previous = filters.insert(runner.name().to_string(), Arc::clone(&runner));

        let helper: Arc<dyn PluginHelper> = self.clone();
        if let Err(err) = runner.start(helper, &self.filters_tracker, self.stopping.clone()) {
            // Leave the map exactly as it was before the attempt
            match previous {
                Some(previous) => filters.insert(runner.name().to_string(), previous),
                None => filters.remove(runner.name()),
            };
            return Err(PipelineError::FilterStart {
                name: runner.name().to_string(),
                reason: err.to_string(),
            });
        }

        if let Some(matcher) = runner.matcher() {
            self.router.notify(Arc::clone(matcher));
        }
        Ok(())
    }

    /// Remove a filter while the pipeline is live
    ///
    /// Returns false when the name is unknown or the pipeline is already
    /// stopping (teardown owns filters at that point). The router drops the
    /// filter's matcher when it processes the removal event, after which the
    /// runner's inbound channel drains and the runner exits.
    pub fn remove_filter_runner(&self, name: &str) -> bool {
        if self.stopping.is_cancelled() {
            return false;
        }

        let mut filters = self.filter_runners.lock();
        let Some(runner) = filters.remove(name) else {
            return false;
        };
        if let Some(matcher) = runner.matcher() {
            self.router.notify(Arc::clone(matcher));
        }
        runner.close();
        true
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start the router and every configured runner
    pub fn start(self: &Arc<Self>) -> Result<()> {
        self.router
            .start(&self.workers_tracker, self.stopping.clone())?;

        let helper: Arc<dyn PluginHelper> = self.clone();
        for runner in self.output_runners.values() {
            runner.start(
                Arc::clone(&helper),
                &self.workers_tracker,
                self.stopping.clone(),
            )?;
        }
        {
            let filters = self.filter_runners.lock();
            for runner in filters.values() {
                runner.start(
                    Arc::clone(&helper),
                    &self.filters_tracker,
                    self.stopping.clone(),
                )?;
            }
        }
        for runner in self.input_runners.values() {
            runner.start(Arc::clone(&helper), &self.workers_tracker)?;
        }
        tracing::info!(
            inputs = self.input_runners.len(),
            filters = self.filter_runners.lock().len(),
            outputs = self.output_runners.len(),
            decoders = self.all_decoders.len(),
            "pipeline started"
        );
        Ok(())
    }

    /// Cancel the stopping token and wait for every worker to exit
    pub async fn shutdown(&self) {
        tracing::info!("pipeline shutting down");
        self.stopping.cancel();

        // Drop our half of every runner's inbound channel so drained
        // runners exit even before the router unwinds.
        {
            let filters = self.filter_runners.lock();
            for runner in filters.values() {
                runner.close();
            }
        }
        for runner in self.output_runners.values() {
            runner.close();
        }

        self.workers_tracker.close();
        self.filters_tracker.close();
        self.decoders_tracker.close();
        self.workers_tracker.wait().await;
        self.filters_tracker.wait().await;
        self.decoders_tracker.wait().await;
        tracing::info!("pipeline stopped");
    }
}

impl std::fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("inputs", &self.input_runners.len())
            .field("decoders", &self.decoder_wrappers.len())
            .field("filters", &self.filter_runners.lock().len())
            .field("outputs", &self.output_runners.len())
            .finish()
    }
}

#[async_trait]
impl PluginHelper for PipelineConfig {
    fn output(&self, name: &str) -> Option<Arc<FilterOutputRunner>> {
        PipelineConfig::output(self, name)
    }

    fn filter(&self, name: &str) -> Option<Arc<FilterOutputRunner>> {
        PipelineConfig::filter(self, name)
    }

    fn decoder_set(&self) -> DecoderSet {
        PipelineConfig::decoder_set(self)
    }

    async fn pipeline_pack(&self, msg_loop_count: u32) -> Option<Pack> {
        PipelineConfig::pipeline_pack(self, msg_loop_count).await
    }

    async fn inject(&self, pack: Pack) -> bool {
        self.router.sender().send(pack).await.is_ok()
    }
}

/// The decoder sections synthesized when a config does not provide them
fn default_decoder_sections() -> Vec<(String, toml::Table)> {
    let mut json = toml::Table::new();
    json.insert(
        "encoding_name".to_string(),
        toml::Value::String("JSON".to_string()),
    );
    let mut protobuf = toml::Table::new();
    protobuf.insert(
        "encoding_name".to_string(),
        toml::Value::String("PROTOCOL_BUFFER".to_string()),
    );
    vec![
        ("JsonDecoder".to_string(), json),
        ("ProtobufDecoder".to_string(), protobuf),
    ]
}

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
