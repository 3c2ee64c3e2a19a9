//! Roll Core - media-session library for Roll
//!
//! This crate provides the per-tab core of the Roll video helper:
//! - Candidate media scanning across nested same-origin frames
//! - Real-player selection heuristic
//! - Per-tab sessions applying the transform/playback config
//! - AB-loop and ad-skip controllers
//! - Audio pipeline coordination (stream capture with element fallback)
//! - Debounced rescans and the inbound/outbound message protocol
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Roll Engine                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐           │
//! │  │   Rescan     │  │   Session    │  │    Audio     │           │
//! │  │  Scheduler   │  │    Store     │  │ Coordinator  │           │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘           │
//! │         │                 │                 │                   │
//! │         └─────────────────┼─────────────────┘                   │
//! │                           │                                     │
//! │                    ┌──────┴──────┐                              │
//! │                    │     Tab     │                              │
//! │                    │   Session   │                              │
//! │                    └──────┬──────┘                              │
//! │                           │                                     │
//! │  ┌──────────────┐  ┌──────┴──────┐  ┌──────────────┐            │
//! │  │   Scanner /  │  │  Listener   │  │  AB-Loop /   │            │
//! │  │  Heuristic   │  │  Registry   │  │   Ad-Skip    │            │
//! │  └──────────────┘  └─────────────┘  └──────────────┘            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod types;
pub mod config;
pub mod site;
pub mod host;
pub mod sim;
pub mod registry;
pub mod scanner;
pub mod heuristic;
pub mod looper;
pub mod ad_skip;
pub mod session;
pub mod store;
pub mod audio;
pub mod scheduler;
pub mod message;
pub mod engine;

pub use error::{Error, Result};
pub use types::*;
pub use config::{PersistedState, RollConfig};
pub use host::{CaptureBackend, DocumentRef, DocumentTree, MediaElement, MediaEvent, MediaRef};
pub use heuristic::RealPlayerHeuristic;
pub use looper::{parse_timestamp, AbLoopController, LoopWindow};
pub use ad_skip::AdSkipWatcher;
pub use session::Session;
pub use store::SessionStore;
pub use audio::AudioCoordinator;
pub use scheduler::RescanScheduler;
pub use message::{Inbound, NotificationRecord, Outbound, Outbox};
pub use engine::{EngineChannels, EngineConfig, RollEngine};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the library
pub fn init() {
    tracing::info!(version = VERSION, "Roll Core initialized");
}
