//! Relay - Pipeline
//!
//! The runtime core: message packs and their recycle pools, the plugin
//! registry and loader, per-plugin runners, decoder rendezvous pools and
//! the central message router.
//!
//! # Architecture
//!
//! ```text
//! [Inputs]                     [Router]                  [Destinations]
//!   tcp ───┐  raw bytes                              ┌──→ Filter ──┐
//!   udp ───┼──→ DecoderPool ──→ Pack ──→ Matchers ───┤             │ inject
//!   ...  ──┘                                         └──→ Output   │
//!      ▲                                                           │
//!      │            input pool ◄── recycle ──┐                     │
//!      └── packs ◄──────────────             │                     │
//!                   inject pool ◄────────────┴──── recycle ◄───────┘
//! ```
//!
//! # Key Design
//!
//! - **Bounded everywhere**: packs live in two preallocated recycle pools
//!   (input vs inject - separate to prevent deadlock); decoder pools are
//!   bounded rendezvous channels; every runner has a bounded inbound
//!   channel. Waiting on any of them is the backpressure.
//! - **Arc fan-out**: the router clones one `Arc<Pack>` per accepting
//!   matcher; the last drop recycles the carrier to its home pool.
//! - **Single-writer matcher set**: matcher add/remove funnels through the
//!   router's control channel, serialized with deliveries, so a removed
//!   filter never sees another pack.
//! - **Supervised plugins**: every plugin runs under a runner that traps
//!   failures and restarts it with exponential backoff per its
//!   `retries` options.

mod builtin;
mod config;
mod decoder;
mod error;
mod pack;
mod plugin;
mod registry;
mod retry;
mod router;
mod runner;
mod wrapper;

pub use builtin::{JsonDecoder, LogOutput, ProtobufDecoder};
pub use config::PipelineConfig;
pub use decoder::{DecoderChan, DecoderRunner, DecoderSet};
pub use error::{PipelineError, Result};
pub use pack::{Pack, RecyclePool};
pub use plugin::{
    Decoder, Filter, Input, Output, Plugin, PluginCategory, PluginConfig, PluginError,
    PluginHelper, PluginKind,
};
pub use registry::{PluginFactory, PluginRegistry};
pub use retry::Backoff;
pub use router::{MatchRunner, MessageRouter, RouterMetrics, RouterSnapshot};
pub use runner::{FilterOutputRunner, InputRunner};
pub use wrapper::PluginWrapper;

// Re-export the config types the loader consumes
pub use relay_config::{Config, GlobalConfig, PluginGlobals, RetryOptions};
