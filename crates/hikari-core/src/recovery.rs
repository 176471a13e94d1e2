//! Error recovery state machine
//!
//! ```text
//! Healthy ──fatal fault──▶ Degraded(kind) ──action dispatched──▶ Recovering(kind)
//!    ▲                           │                                    │
//!    └──── fragment buffered ────┴────────────────────────────────────┘
//!                                │ other kind / failed recovery
//!                                ▼
//!                            Terminal
//! ```
//!
//! Health is never acknowledged explicitly; the next delivered segment is
//! taken as proof the pipeline works again. After a media fault only a
//! segment at or past the one that failed counts, so re-delivering earlier
//! media cannot reopen the recovery budget.

use crate::types::{FaultClass, FaultKind, FaultRecord};
use serde::Serialize;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "kind", rename_all = "snake_case")]
pub enum RecoveryState {
    Healthy,
    Degraded(FaultKind),
    Recovering(FaultKind),
    Terminal,
}

/// What the controller must do in response to a fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Nothing to do
    Ignore,
    /// Restart segment loading at the current position
    RestartLoad,
    /// In-place decoder recovery
    RecoverMedia,
    /// Release the transport and report a failure
    Terminate,
}

#[derive(Debug)]
pub struct ErrorRecovery {
    state: RecoveryState,
    network_restarts: u32,
    media_recoveries: u32,
    /// Highest sequence delivered so far
    delivered: Option<u64>,
    /// First sequence that proves a media recovery held
    media_floor: Option<u64>,
}

impl ErrorRecovery {
    pub fn new() -> Self {
        Self {
            state: RecoveryState::Healthy,
            network_restarts: 0,
            media_recoveries: 0,
            delivered: None,
            media_floor: None,
        }
    }

    pub fn state(&self) -> RecoveryState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state == RecoveryState::Terminal
    }

    pub fn network_restarts(&self) -> u32 {
        self.network_restarts
    }

    pub fn media_recoveries(&self) -> u32 {
        self.media_recoveries
    }

    /// Classify a fault and decide the response.
    ///
    /// On `RestartLoad`/`RecoverMedia` the state is already `Recovering`;
    /// call [`on_dispatch_failed`](Self::on_dispatch_failed) if the action
    /// could not be carried out.
    pub fn on_fault(&mut self, fault: &FaultRecord) -> RecoveryAction {
        if self.is_terminal() {
            debug!(kind = %fault.kind, "Fault after terminal failure ignored");
            return RecoveryAction::Ignore;
        }

        match fault.class() {
            FaultClass::NonFatalDecodeHiccup => {
                warn!(kind = %fault.kind, detail = %fault.detail, "Non-fatal fault");
                RecoveryAction::Ignore
            }
            FaultClass::FatalNetwork => {
                self.state = RecoveryState::Degraded(FaultKind::Network);
                self.network_restarts += 1;
                warn!(
                    detail = %fault.detail,
                    restarts = self.network_restarts,
                    "Fatal network fault, restarting load"
                );
                self.state = RecoveryState::Recovering(FaultKind::Network);
                RecoveryAction::RestartLoad
            }
            FaultClass::FatalMedia => {
                if self.state == RecoveryState::Recovering(FaultKind::Media) {
                    error!(detail = %fault.detail, "Media recovery did not hold");
                    self.state = RecoveryState::Terminal;
                    return RecoveryAction::Terminate;
                }
                self.state = RecoveryState::Degraded(FaultKind::Media);
                self.media_recoveries += 1;
                self.media_floor = Some(self.delivered.map_or(0, |s| s + 1));
                warn!(
                    detail = %fault.detail,
                    resume_sequence = self.media_floor,
                    "Fatal media fault, recovering decoder"
                );
                self.state = RecoveryState::Recovering(FaultKind::Media);
                RecoveryAction::RecoverMedia
            }
            FaultClass::FatalOther => {
                error!(detail = %fault.detail, "Unrecoverable fault");
                self.state = RecoveryState::Terminal;
                RecoveryAction::Terminate
            }
        }
    }

    /// A recovery action could not be dispatched
    pub fn on_dispatch_failed(&mut self) {
        error!(state = ?self.state, "Recovery dispatch failed");
        self.state = RecoveryState::Terminal;
    }

    /// Segment `sequence` reached the buffer. Returns true if the state changed.
    pub fn on_fragment_buffered(&mut self, sequence: u64) -> bool {
        self.delivered = Some(self.delivered.map_or(sequence, |d| d.max(sequence)));

        match self.state {
            RecoveryState::Degraded(FaultKind::Media) | RecoveryState::Recovering(FaultKind::Media)
                if self.media_floor.map_or(false, |floor| sequence < floor) =>
            {
                debug!(sequence, floor = self.media_floor, "Earlier segment re-delivered, still recovering");
                false
            }
            RecoveryState::Degraded(_) | RecoveryState::Recovering(_) => {
                info!(sequence, "Segment delivered, playback healthy");
                self.state = RecoveryState::Healthy;
                self.media_floor = None;
                true
            }
            _ => false,
        }
    }
}

impl Default for ErrorRecovery {
    fn default() -> Self {
        Self::new()
    }
}
