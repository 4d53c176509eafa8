//! Loader and pipeline-config tests
//!
//! Covers section loading and its error accounting, default decoder
//! synthesis, decoder pools, pack stamping, dynamic filter add/remove and
//! the end-to-end input → decoder → router → output path.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_config::{Config, PluginGlobals, RetryOptions};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::plugin::{
    Decoder, Filter, Input, Output, Plugin, PluginConfig, PluginError, PluginHelper, PluginKind,
};
use crate::registry::PluginRegistry;
use crate::runner::InputRunner;

// ============================================================================
// Test plugins
// ============================================================================

/// Input that does nothing until the pipeline stops
struct StubInput;

impl Plugin for StubInput {
    fn init(&mut self, _config: &PluginConfig) -> Result<(), PluginError> {
        Ok(())
    }
}

#[async_trait]
impl Input for StubInput {
    async fn run(
        &mut self,
        runner: &InputRunner,
        _helper: Arc<dyn PluginHelper>,
    ) -> Result<(), PluginError> {
        runner.stopping().cancelled().await;
        Ok(())
    }
}

/// Input that runs each configured payload through the json decoder pool
#[derive(Default)]
struct EmitInput {
    payloads: Vec<String>,
}

impl Plugin for EmitInput {
    fn init(&mut self, config: &PluginConfig) -> Result<(), PluginError> {
        if let Some(value) = config.get("payloads") {
            let list = value
                .as_array()
                .ok_or_else(|| PluginError::config("payloads must be an array"))?;
            for entry in list {
                let payload = entry
                    .as_str()
                    .ok_or_else(|| PluginError::config("payloads must be strings"))?;
                self.payloads.push(payload.to_string());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Input for EmitInput {
    async fn run(
        &mut self,
        runner: &InputRunner,
        helper: Arc<dyn PluginHelper>,
    ) -> Result<(), PluginError> {
        let decoders = helper.decoder_set();
        let chan = decoders
            .by_name("JsonDecoder")
            .ok_or_else(|| PluginError::failed("no JsonDecoder pool"))?
            .clone();

        for payload in &self.payloads {
            let Some(mut pack) = runner.new_pack().await else {
                return Err(PluginError::failed("input pool torn down"));
            };
            let envelope = format!(r#"{{"type": "emitted", "payload": "{payload}"}}"#);
            pack.msg_bytes_mut().extend_from_slice(envelope.as_bytes());

            let Some(decoder) = chan.acquire().await else {
                return Err(PluginError::failed("decoder pool torn down"));
            };
            decoder.decode(pack).await;
            chan.release(decoder).await;
        }

        runner.stopping().cancelled().await;
        Ok(())
    }
}

/// Filter that counts the packs it processes
struct CountingFilter {
    counter: Arc<AtomicUsize>,
}

impl Plugin for CountingFilter {
    fn init(&mut self, _config: &PluginConfig) -> Result<(), PluginError> {
        Ok(())
    }
}

#[async_trait]
impl Filter for CountingFilter {
    async fn process(
        &mut self,
        _pack: Arc<crate::pack::Pack>,
        _helper: &dyn PluginHelper,
    ) -> Result<(), PluginError> {
        self.counter.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Filter that fails on every pack, recording cleanup calls
struct FailingFilter {
    cleanups: Arc<AtomicUsize>,
}

impl Plugin for FailingFilter {
    fn init(&mut self, _config: &PluginConfig) -> Result<(), PluginError> {
        Ok(())
    }

    fn cleanup(&mut self) {
        self.cleanups.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl Filter for FailingFilter {
    async fn process(
        &mut self,
        _pack: Arc<crate::pack::Pack>,
        _helper: &dyn PluginHelper,
    ) -> Result<(), PluginError> {
        Err(PluginError::failed("always fails"))
    }
}

/// Output that forwards payloads into a test channel
struct CollectOutput {
    tx: mpsc::UnboundedSender<String>,
}

impl Plugin for CollectOutput {
    fn init(&mut self, _config: &PluginConfig) -> Result<(), PluginError> {
        Ok(())
    }
}

#[async_trait]
impl Output for CollectOutput {
    async fn process(
        &mut self,
        pack: Arc<crate::pack::Pack>,
        _helper: &dyn PluginHelper,
    ) -> Result<(), PluginError> {
        let _ = self.tx.send(pack.message().payload().to_string());
        Ok(())
    }
}

/// Decoder that records each decode call
struct ProbeDecoder {
    decoded: Arc<AtomicUsize>,
}

impl Plugin for ProbeDecoder {
    fn init(&mut self, _config: &PluginConfig) -> Result<(), PluginError> {
        Ok(())
    }
}

impl Decoder for ProbeDecoder {
    fn decode(&mut self, pack: &mut crate::pack::Pack) -> Result<(), PluginError> {
        self.decoded.fetch_add(1, Ordering::Relaxed);
        pack.message_mut().set_payload("probed");
        Ok(())
    }
}

/// Input whose init always fails
struct FailInput;

impl Plugin for FailInput {
    fn init(&mut self, _config: &PluginConfig) -> Result<(), PluginError> {
        Err(PluginError::failed("nope"))
    }
}

#[async_trait]
impl Input for FailInput {
    async fn run(
        &mut self,
        _runner: &InputRunner,
        _helper: Arc<dyn PluginHelper>,
    ) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Input whose init panics
struct PanicInput;

impl Plugin for PanicInput {
    fn init(&mut self, _config: &PluginConfig) -> Result<(), PluginError> {
        panic!("boom");
    }
}

#[async_trait]
impl Input for PanicInput {
    async fn run(
        &mut self,
        _runner: &InputRunner,
        _helper: Arc<dyn PluginHelper>,
    ) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Input with a typed config requirement
struct StrictInput;

impl Plugin for StrictInput {
    fn init(&mut self, config: &PluginConfig) -> Result<(), PluginError> {
        match config.get("mode") {
            Some(value) if value.as_str().is_some() => Ok(()),
            Some(_) => Err(PluginError::config("mode must be a string")),
            None => Err(PluginError::config("mode is required")),
        }
    }
}

#[async_trait]
impl Input for StrictInput {
    async fn run(
        &mut self,
        runner: &InputRunner,
        _helper: Arc<dyn PluginHelper>,
    ) -> Result<(), PluginError> {
        runner.stopping().cancelled().await;
        Ok(())
    }
}

fn test_registry() -> PluginRegistry {
    let mut registry = PluginRegistry::with_builtins();
    registry.register_plugin("StubInput", || PluginKind::Input(Box::new(StubInput)));
    registry.register_plugin("EmitInput", || {
        PluginKind::Input(Box::<EmitInput>::default())
    });
    registry.register_plugin("StrictInput", || PluginKind::Input(Box::new(StrictInput)));
    registry.register_plugin("FailInput", || PluginKind::Input(Box::new(FailInput)));
    registry.register_plugin("PanicInput", || PluginKind::Input(Box::new(PanicInput)));
    // A name without a category suffix, for classification failures
    registry.register_plugin("Widget", || PluginKind::Input(Box::new(StubInput)));
    // A name that claims one category while producing another
    registry.register_plugin("FakeInput", || {
        PluginKind::Decoder(Box::<crate::builtin::JsonDecoder>::default())
    });
    registry
}

fn build(registry: PluginRegistry, toml: &str) -> (PipelineConfig, Result<(), PipelineError>) {
    let config: Config = toml.parse().expect("test config must parse");
    let mut pipeline = PipelineConfig::new(registry, config.global.clone());
    let result = pipeline.load_from_config(&config);
    (pipeline, result)
}

async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

// ============================================================================
// Scenario S1: decoder section with a type override and encoding binding
// ============================================================================

#[tokio::test]
async fn test_decoder_section_with_type_override() {
    let (cfg, result) = build(
        test_registry(),
        r#"
[A]
type = "JsonDecoder"
encoding_name = "JSON"
"#,
    );
    result.unwrap();

    assert!(cfg.has_decoder("A"));
    let chan = cfg.decoder_channel("A").unwrap();
    assert_eq!(chan.capacity(), 4); // global decoder_pool_size default

    let mut names = Vec::new();
    for _ in 0..4 {
        names.push(chan.try_acquire().unwrap().name().to_string());
    }
    assert!(chan.try_acquire().is_none());
    names.sort();
    assert_eq!(names, ["A-0", "A-1", "A-2", "A-3"]);

    assert_eq!(
        cfg.registry().decoder_for_encoding(relay_message::JSON),
        Some("JsonDecoder")
    );
}

// ============================================================================
// Scenario S2: empty config synthesizes the default decoders
// ============================================================================

#[tokio::test]
async fn test_empty_config_loads_default_decoders() {
    let (cfg, result) = build(test_registry(), "");
    result.unwrap();

    assert!(cfg.has_decoder("JsonDecoder"));
    assert!(cfg.has_decoder("ProtobufDecoder"));
    assert_eq!(
        cfg.registry().decoder_for_encoding(relay_message::JSON),
        Some("JsonDecoder")
    );
    assert_eq!(
        cfg.registry()
            .decoder_for_encoding(relay_message::PROTOCOL_BUFFER),
        Some("ProtobufDecoder")
    );

    assert_eq!(cfg.input_runners().count(), 0);
    assert!(cfg.filter_names().is_empty());
    assert_eq!(cfg.output_runners().count(), 0);

    // Both default pools are at the global default size
    assert_eq!(cfg.decoder_channel("JsonDecoder").unwrap().capacity(), 4);
    assert_eq!(cfg.all_decoders().len(), 8);
}

#[tokio::test]
async fn test_user_decoder_sections_suppress_defaults() {
    let (cfg, result) = build(
        test_registry(),
        r#"
[JsonDecoder]
pool_size = 1

[ProtobufDecoder]
pool_size = 1
"#,
    );
    result.unwrap();
    assert_eq!(cfg.decoder_channel("JsonDecoder").unwrap().capacity(), 1);
    assert_eq!(cfg.all_decoders().len(), 2);
}

// ============================================================================
// Scenario S3: unknown plugin type
// ============================================================================

#[tokio::test]
async fn test_unknown_plugin_counts_one_error() {
    let (cfg, result) = build(
        test_registry(),
        r#"
[Bad]
type = "NoSuchThing"
"#,
    );
    let err = result.unwrap_err();
    assert_eq!(err.to_string(), "1 errors loading plugins");
    assert!(cfg
        .log_msgs()
        .contains(&"No such plugin: Bad".to_string()));
}

#[tokio::test]
async fn test_multiple_errors_accumulate() {
    let (cfg, result) = build(
        test_registry(),
        r#"
[Bad1]
type = "NoSuchThing"

[Bad2]
type = "FailInput"

[Good]
type = "StubInput"
"#,
    );
    let err = result.unwrap_err();
    assert_eq!(err.to_string(), "2 errors loading plugins");
    // The healthy section still loaded
    assert!(cfg.input("Good").is_some());
    assert_eq!(cfg.log_msgs().len(), 2);
}

// ============================================================================
// Scenario S4: filter with a TRUE matcher, removed at runtime
// ============================================================================

#[tokio::test]
async fn test_filter_matcher_install_and_remove() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mut registry = test_registry();
    let shared = Arc::clone(&counter);
    registry.register_plugin("CounterFilter", move || {
        PluginKind::Filter(Box::new(CountingFilter {
            counter: Arc::clone(&shared),
        }))
    });

    let (cfg, result) = build(
        registry,
        r#"
[F]
type = "CounterFilter"
message_matcher = "TRUE"
"#,
    );
    result.unwrap();

    assert_eq!(cfg.router().filter_matcher_count(), 1);
    assert!(cfg.filter("F").is_some());

    let cfg = Arc::new(cfg);
    cfg.start().unwrap();

    assert!(cfg.remove_filter_runner("F"));
    assert!(eventually(|| cfg.router().filter_matcher_count() == 0).await);
    assert!(cfg.filter("F").is_none());

    // A second removal finds nothing
    assert!(!cfg.remove_filter_runner("F"));

    timeout(Duration::from_secs(5), cfg.shutdown())
        .await
        .expect("shutdown hung");
}

#[tokio::test]
async fn test_remove_refused_while_stopping() {
    let (cfg, result) = build(test_registry(), "");
    result.unwrap();
    cfg.stopping().cancel();
    assert!(!cfg.remove_filter_runner("anything"));
}

// ============================================================================
// Scenario S5: pipeline_pack loop bounds and stamping
// ============================================================================

#[tokio::test]
async fn test_pipeline_pack_stamps_and_bounds() {
    let (cfg, result) = build(test_registry(), "");
    result.unwrap();

    // max_msg_loops defaults to 4
    let pack = cfg.pipeline_pack(3).await.unwrap();
    assert_eq!(pack.msg_loop_count(), 4);
    assert!(pack.message().uuid().is_some());
    assert!(pack.message().timestamp() > 0);
    assert_eq!(pack.message().pid(), cfg.pid());
    assert_eq!(pack.message().hostname(), Some(cfg.hostname()));

    assert!(cfg.pipeline_pack(4).await.is_none());
}

#[tokio::test]
async fn test_pipeline_pack_uses_inject_pool_only() {
    let (cfg, result) = build(test_registry(), "[global]\npool_size = 2\n");
    result.unwrap();

    // Drain the input pool entirely; the inject pool must be unaffected
    let _a = cfg.input_pool().try_take().unwrap();
    let _b = cfg.input_pool().try_take().unwrap();
    assert!(cfg.input_pool().try_take().is_none());

    let pack = timeout(Duration::from_secs(1), cfg.pipeline_pack(0))
        .await
        .expect("inject pool starved by input pool")
        .unwrap();
    assert_eq!(pack.msg_loop_count(), 1);
}

// ============================================================================
// Scenario S6: decoder pool rendezvous blocks at capacity
// ============================================================================

#[tokio::test]
async fn test_decoder_pool_rendezvous_blocks() {
    let (cfg, result) = build(
        test_registry(),
        r#"
[PD]
type = "ProtobufDecoder"
encoding_name = "PROTOCOL_BUFFER"
pool_size = 2
"#,
    );
    result.unwrap();

    let chan = cfg.decoder_channel("PD").unwrap().clone();
    assert_eq!(chan.capacity(), 2);

    let first = chan.acquire().await.unwrap();
    let _second = chan.acquire().await.unwrap();

    let waiter = {
        let chan = chan.clone();
        tokio::spawn(async move { chan.acquire().await.is_some() })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished(), "third acquire should block");

    chan.release(first).await;
    let got = timeout(Duration::from_secs(1), waiter)
        .await
        .expect("blocked acquire never woke")
        .unwrap();
    assert!(got);
}

#[tokio::test]
async fn test_decode_completes_before_release() {
    let decoded = Arc::new(AtomicUsize::new(0));
    let mut registry = test_registry();
    let shared = Arc::clone(&decoded);
    registry.register_plugin("ProbeDecoder", move || {
        PluginKind::Decoder(Box::new(ProbeDecoder {
            decoded: Arc::clone(&shared),
        }))
    });

    let (cfg, result) = build(
        registry,
        r#"
[PD]
type = "ProbeDecoder"
pool_size = 1
"#,
    );
    result.unwrap();
    let cfg = Arc::new(cfg);
    cfg.start().unwrap();

    let chan = cfg.decoder_channel("PD").unwrap().clone();
    let runner = chan.acquire().await.unwrap();
    // While the handle is out the pool holds nothing
    assert!(chan.try_acquire().is_none());

    let mut pack = cfg.input_pool().try_take().unwrap();
    pack.msg_bytes_mut().extend_from_slice(b"{}");
    let delivered = runner.decode(pack).await;

    // The rendezvous resolves only after the decode has actually run and
    // the pack was handed to the router, so the runner is idle here
    assert!(delivered);
    assert_eq!(decoded.load(Ordering::Relaxed), 1);

    // Releasing the idle runner restores the pool to capacity
    chan.release(runner).await;
    assert!(chan.try_acquire().is_some());

    timeout(Duration::from_secs(5), cfg.shutdown())
        .await
        .expect("shutdown hung");
}

#[tokio::test]
async fn test_decoder_set_lookup() {
    let (cfg, result) = build(test_registry(), "");
    result.unwrap();

    let decoders = cfg.decoder_set();
    assert!(decoders.by_name("JsonDecoder").is_some());
    assert!(decoders.by_name("ProtobufDecoder").is_some());
    assert!(decoders.by_encoding(relay_message::JSON).is_some());
    assert!(decoders
        .by_encoding(relay_message::PROTOCOL_BUFFER)
        .is_some());
    assert!(decoders.by_encoding(99).is_none());
}

// ============================================================================
// Loader error paths
// ============================================================================

#[tokio::test]
async fn test_globals_decode_error() {
    let (cfg, result) = build(
        test_registry(),
        r#"
[X]
ticker_interval = "soon"
"#,
    );
    assert!(result.is_err());
    assert!(cfg.log_msgs()[0].starts_with("Unable to decode config for plugin: X, error:"));
}

#[tokio::test]
async fn test_plugin_config_error() {
    let (cfg, result) = build(
        test_registry(),
        r#"
[S1]
type = "StrictInput"
mode = 3
"#,
    );
    assert!(result.is_err());
    assert_eq!(
        cfg.log_msgs(),
        ["Can't load config for S1 'S1': mode must be a string"]
    );
}

#[tokio::test]
async fn test_init_failure_logged() {
    let (cfg, result) = build(
        test_registry(),
        r#"
[F1]
type = "FailInput"
"#,
    );
    assert!(result.is_err());
    assert_eq!(cfg.log_msgs(), ["Initialization failed for 'F1': nope"]);
}

#[tokio::test]
async fn test_init_panic_trapped_and_logged() {
    let (cfg, result) = build(
        test_registry(),
        r#"
[P1]
type = "PanicInput"
"#,
    );
    assert!(result.is_err());
    assert_eq!(cfg.log_msgs(), ["'P1' Init() panicked: boom"]);
}

#[tokio::test]
async fn test_unclassifiable_type_logged() {
    let (cfg, result) = build(test_registry(), "[Widget]\n");
    assert!(result.is_err());
    assert_eq!(
        cfg.log_msgs(),
        ["Type doesn't contain valid plugin name: Widget"]
    );
}

#[tokio::test]
async fn test_category_mismatch_logged() {
    let (cfg, result) = build(test_registry(), "[FakeInput]\n");
    assert!(result.is_err());
    assert_eq!(cfg.log_msgs().len(), 1);
    assert!(cfg.log_msgs()[0].contains("classified Input"));
    assert!(cfg.log_msgs()[0].contains("produced Decoder"));
}

#[tokio::test]
async fn test_bad_matcher_logged() {
    let mut registry = test_registry();
    registry.register_plugin("NoopFilter", || {
        PluginKind::Filter(Box::new(CountingFilter {
            counter: Arc::new(AtomicUsize::new(0)),
        }))
    });
    let (cfg, result) = build(
        registry,
        r#"
[F]
type = "NoopFilter"
message_matcher = "Color == 'red'"
"#,
    );
    assert!(result.is_err());
    assert!(cfg.log_msgs()[0].starts_with("Can't create message matcher for 'F':"));
}

#[tokio::test]
async fn test_bad_encoding_binding_logged() {
    let (cfg, result) = build(
        test_registry(),
        r#"
[D]
type = "JsonDecoder"
encoding_name = "CSV"
"#,
    );
    assert!(result.is_err());
    assert_eq!(
        cfg.log_msgs(),
        ["Can't register decoder 'D' for encoding 'CSV': No encoding named 'CSV'"]
    );
}

#[tokio::test]
async fn test_pool_size_ignored_for_non_decoders() {
    let (cfg, result) = build(
        test_registry(),
        r#"
[I]
type = "StubInput"
pool_size = 99
"#,
    );
    result.unwrap();
    assert!(cfg.input("I").is_some());
    assert!(cfg.decoder_channel("I").is_none());
}

#[tokio::test]
async fn test_section_named_by_suffix_needs_no_type() {
    let (cfg, result) = build(test_registry(), "[StubInput]\n");
    result.unwrap();
    assert!(cfg.input("StubInput").is_some());
}

// ============================================================================
// Config round-trip
// ============================================================================

#[tokio::test]
async fn test_round_trip_preserves_runners_and_matchers() {
    let toml = r#"
[In1]
type = "StubInput"

[F1]
type = "NoopFilter"
message_matcher = "Severity < 7"
ticker_interval = 30

[O1]
type = "LogOutput"
message_matcher = "TRUE"

[D1]
type = "JsonDecoder"
pool_size = 2
"#;
    let registry = || {
        let mut r = test_registry();
        r.register_plugin("NoopFilter", || {
            PluginKind::Filter(Box::new(CountingFilter {
                counter: Arc::new(AtomicUsize::new(0)),
            }))
        });
        r
    };

    let (first, result) = build(registry(), toml);
    result.unwrap();

    // Serialize every runner's effective globals back into a document
    let mut reloaded = Config::default();
    for runner in first.input_runners() {
        reloaded.plugins.insert(
            runner.name().to_string(),
            runner.plugin_globals().to_table().unwrap(),
        );
    }
    for name in first.filter_names() {
        let runner = first.filter(&name).unwrap();
        reloaded
            .plugins
            .insert(name, runner.plugin_globals().to_table().unwrap());
    }
    for runner in first.output_runners() {
        reloaded.plugins.insert(
            runner.name().to_string(),
            runner.plugin_globals().to_table().unwrap(),
        );
    }
    reloaded.plugins.insert(
        "D1".to_string(),
        first.decoder_wrapper("D1").unwrap().config().clone(),
    );

    let mut second = PipelineConfig::new(registry(), reloaded.global.clone());
    second.load_from_config(&reloaded).unwrap();

    assert!(second.input("In1").is_some());
    assert!(second.output("O1").is_some());
    assert!(second.has_decoder("D1"));
    assert_eq!(second.decoder_channel("D1").unwrap().capacity(), 2);
    assert_eq!(
        second.router().filter_matcher_count(),
        first.router().filter_matcher_count()
    );
    assert_eq!(
        second.router().output_matcher_count(),
        first.router().output_matcher_count()
    );

    let f1 = second.filter("F1").unwrap();
    assert_eq!(f1.matcher().unwrap().matcher().source(), "Severity < 7");
    assert_eq!(f1.ticker(), Some(Duration::from_secs(30)));
}

// ============================================================================
// Dynamic filters
// ============================================================================

#[tokio::test]
async fn test_dynamic_filter_receives_then_stops_receiving() {
    let (cfg, result) = build(test_registry(), "");
    result.unwrap();
    let cfg = Arc::new(cfg);
    cfg.start().unwrap();

    let counter = Arc::new(AtomicUsize::new(0));
    let mut globals = PluginGlobals::default();
    globals.message_matcher = Some("TRUE".to_string());
    let runner = cfg
        .new_filter_runner(
            "DynF",
            Box::new(CountingFilter {
                counter: Arc::clone(&counter),
            }),
            &globals,
        )
        .unwrap();
    cfg.add_filter_runner(runner).unwrap();

    assert!(cfg.filter("DynF").is_some());
    assert!(eventually(|| cfg.router().filter_matcher_count() == 1).await);

    let pack = cfg.pipeline_pack(0).await.unwrap();
    cfg.router().sender().send(pack).await.unwrap();
    assert!(eventually(|| counter.load(Ordering::Relaxed) == 1).await);

    assert!(cfg.remove_filter_runner("DynF"));
    assert!(eventually(|| cfg.router().filter_matcher_count() == 0).await);

    let pack = cfg.pipeline_pack(0).await.unwrap();
    cfg.router().sender().send(pack).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(counter.load(Ordering::Relaxed), 1);

    timeout(Duration::from_secs(5), cfg.shutdown())
        .await
        .expect("shutdown hung");
}

#[tokio::test]
async fn test_add_filter_runner_start_failure_restores_map() {
    let (cfg, result) = build(test_registry(), "");
    result.unwrap();
    let cfg = Arc::new(cfg);

    let mut globals = PluginGlobals::default();
    globals.message_matcher = Some("TRUE".to_string());
    let runner = cfg
        .new_filter_runner(
            "DynF",
            Box::new(CountingFilter {
                counter: Arc::new(AtomicUsize::new(0)),
            }),
            &globals,
        )
        .unwrap();

    cfg.add_filter_runner(Arc::clone(&runner)).unwrap();
    assert!(cfg.filter("DynF").is_some());

    // Re-adding the same runner fails (it is already started) and must not
    // disturb the installed entry
    let err = cfg.add_filter_runner(runner).unwrap_err();
    assert!(err
        .to_string()
        .starts_with("AddFilterRunner 'DynF' failed to start:"));
    assert!(cfg.filter("DynF").is_some());
}

#[tokio::test]
async fn test_failing_filter_restarts_with_cleanup() {
    let (cfg, result) = build(test_registry(), "");
    result.unwrap();
    let cfg = Arc::new(cfg);
    cfg.start().unwrap();

    let cleanups = Arc::new(AtomicUsize::new(0));
    let mut globals = PluginGlobals::default();
    globals.message_matcher = Some("TRUE".to_string());
    globals.retries = RetryOptions {
        delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        max_retries: 3,
    };
    let runner = cfg
        .new_filter_runner(
            "Flaky",
            Box::new(FailingFilter {
                cleanups: Arc::clone(&cleanups),
            }),
            &globals,
        )
        .unwrap();
    cfg.add_filter_runner(runner).unwrap();
    assert!(eventually(|| cfg.router().filter_matcher_count() == 1).await);

    let pack = cfg.pipeline_pack(0).await.unwrap();
    cfg.router().sender().send(pack).await.unwrap();

    // The failed run is cleaned up before the restart
    assert!(eventually(|| cleanups.load(Ordering::Relaxed) >= 1).await);

    timeout(Duration::from_secs(5), cfg.shutdown())
        .await
        .expect("shutdown hung");
}

// ============================================================================
// End to end
// ============================================================================

#[tokio::test]
async fn test_end_to_end_input_decoder_router_output() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut registry = test_registry();
    registry.register_plugin("CollectOutput", move || {
        PluginKind::Output(Box::new(CollectOutput { tx: tx.clone() }))
    });

    let toml = r#"
[Emitter]
type = "EmitInput"
payloads = ["alpha", "beta"]

[Collector]
type = "CollectOutput"
message_matcher = "Type == 'emitted'"
"#;
    let config: Config = toml.parse().unwrap();
    let mut pipeline = PipelineConfig::new(registry, config.global.clone());
    pipeline.load_from_config(&config).unwrap();
    let pipeline = Arc::new(pipeline);
    pipeline.start().unwrap();

    let mut got = Vec::new();
    for _ in 0..2 {
        let payload = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("end-to-end delivery timed out")
            .expect("collector channel closed");
        got.push(payload);
    }
    got.sort();
    assert_eq!(got, ["alpha", "beta"]);

    timeout(Duration::from_secs(5), pipeline.shutdown())
        .await
        .expect("shutdown hung");
}

// ============================================================================
// File loading
// ============================================================================

#[tokio::test]
async fn test_load_from_config_file() {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[global]
decoder_pool_size = 2

[MyInput]
type = "StubInput"
"#
    )
    .unwrap();

    let config = Config::from_file(file.path()).unwrap();
    let mut pipeline = PipelineConfig::new(test_registry(), config.global.clone());
    pipeline.load_from_config(&config).unwrap();

    assert!(pipeline.input("MyInput").is_some());
    assert_eq!(
        pipeline.decoder_channel("JsonDecoder").unwrap().capacity(),
        2
    );
}
