//! Typed events flowing into and out of the controller
//!
//! Inbound events ([`PlayerEvent`]) come from the transport, the media surface
//! and the keyboard hub. They are tagged with the session that produced them
//! and queued on a channel; the controller drains the queue on its own thread
//! and drops anything tagged with a session that is no longer attached.
//!
//! Outbound events ([`ControllerEvent`]) go to the handlers the host registered.

use crate::{
    controls::{KeyPress, NavDirection},
    quality::{QualityMenu, SwitchReason},
    recovery::RecoveryState,
    tracks::TrackKind,
    transport::TransportKind,
    types::{FaultKind, FaultRecord, RenditionLevel, SessionId},
};
use serde::Serialize;
use tokio::sync::mpsc;

/// Event produced by a session's collaborators
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// Master playlist parsed; `current` is the transport's starting level
    ManifestParsed {
        levels: Vec<RenditionLevel>,
        current: usize,
    },
    /// The transport started delivering a different rendition
    LevelSwitched { index: usize, reason: SwitchReason },
    /// Transport or decode fault
    Fault(FaultRecord),
    /// Playback clock tick
    TimeUpdate { position: f64 },
    /// A segment reached the media buffer
    FragmentBuffered { level: usize, sequence: u64 },
    /// Key press routed from the keyboard hub
    Key(KeyPress),
}

/// A [`PlayerEvent`] tagged with its originating session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub session: SessionId,
    pub event: PlayerEvent,
}

/// Sending half of the controller's event queue, bound to one session
#[derive(Debug, Clone)]
pub struct EventSink {
    session: SessionId,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSink {
    pub fn new(session: SessionId, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Queue an event. Returns false once the controller is gone.
    pub fn emit(&self, event: PlayerEvent) -> bool {
        self.tx
            .send(SessionEvent {
                session: self.session,
                event,
            })
            .is_ok()
    }

    pub fn fault(&self, fault: FaultRecord) -> bool {
        self.emit(PlayerEvent::Fault(fault))
    }

    pub fn time_update(&self, position: f64) -> bool {
        self.emit(PlayerEvent::TimeUpdate { position })
    }
}

/// Notification delivered to the host
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ControllerEvent {
    SessionStarted {
        session: SessionId,
        episode_id: String,
        transport: TransportKind,
    },
    SessionEnded {
        session: SessionId,
        episode_id: String,
    },
    /// `None` means no quality control is shown
    QualityMenuChanged { menu: Option<QualityMenu> },
    LevelSwitched {
        index: usize,
        label: String,
        reason: SwitchReason,
    },
    TrackSelected { kind: TrackKind, label: String },
    ViewThresholdCrossed { episode_id: String },
    RecoveryStateChanged { state: RecoveryState },
    FatalError { kind: FaultKind, detail: String },
    NavigationRequested { direction: NavDirection },
}

/// Registered outbound event handlers
#[derive(Default)]
pub struct EventHandlers {
    handlers: Vec<Box<dyn FnMut(&ControllerEvent) + Send>>,
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Box<dyn FnMut(&ControllerEvent) + Send>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&mut self, event: &ControllerEvent) {
        for handler in self.handlers.iter_mut() {
            handler(event);
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
