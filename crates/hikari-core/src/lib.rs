//! Hikari Core - adaptive playback controller
//!
//! This crate binds an episode's HLS master playlist to a media surface:
//! - Transport selection (native HLS or software demuxing)
//! - Rendition ladder negotiation and throughput-driven level selection
//! - Fault classification and recovery
//! - Control surface with scoped keyboard shortcuts
//! - Watch-progress telemetry
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     PlaybackController                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐           │
//! │  │    Level     │  │    Error     │  │    View      │           │
//! │  │  Negotiator  │  │   Recovery   │  │   Tracker    │           │
//! │  └──────▲───────┘  └──────▲───────┘  └──────▲───────┘           │
//! │         │                 │                 │                   │
//! │         └─────────── SessionEvent queue ────┘                   │
//! │                           ▲                                     │
//! │            ┌──────────────┴──────────────┐                      │
//! │  ┌─────────┴────┐                 ┌──────┴───────┐              │
//! │  │  Transport   │── segments ──▶  │    Media     │              │
//! │  │ (HLS/Native) │                 │   Surface    │              │
//! │  └──────────────┘                 └──────────────┘              │
//! │         ▲                                                       │
//! │  ┌──────┴───────┐  ┌──────────────┐                             │
//! │  │   Manifest   │  │   Keyboard   │                             │
//! │  │    + ABR     │  │     Hub      │                             │
//! │  └──────────────┘  └──────────────┘                             │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod abr;
pub mod config;
pub mod controller;
pub mod controls;
pub mod error;
pub mod events;
pub mod manifest;
pub mod quality;
pub mod recovery;
pub mod surface;
pub mod telemetry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tracks;
pub mod transport;
pub mod types;

pub use config::{ControlConfig, PlayerConfig, TelemetryConfig, TransportConfig};
pub use controller::PlaybackController;
pub use controls::{Command, CommandOutcome, ControlItem, FocusTarget, InfoOverlay, Key, KeyPress, KeyboardHub};
pub use error::{Error, Result};
pub use events::{ControllerEvent, EventSink, PlayerEvent, SessionEvent};
pub use manifest::{HttpFetcher, Manifest, MediaFetcher};
pub use quality::{LevelNegotiator, QualityMenu, SwitchReason};
pub use recovery::{ErrorRecovery, RecoveryAction, RecoveryState};
pub use surface::{MediaSurface, MemorySurface};
pub use telemetry::{HttpViewCounter, ViewCounter, ViewTracker};
pub use tracks::{TrackKind, TrackSelector};
pub use transport::{Transport, TransportAdapter, TransportFactory, TransportKind};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log library start-up
pub fn init() {
    tracing::info!(version = VERSION, "Hikari Core initialized");
}
