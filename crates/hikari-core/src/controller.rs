//! Playback controller - binds episodes to the media surface
//!
//! Owns at most one [`ActiveSession`]: the live transport, the keyboard
//! subscription and the per-session negotiator, recovery and telemetry state.
//! Rebinding releases the old bundle completely before the new transport is
//! opened, so the surface never has two owners.
//!
//! All state changes happen on the thread that calls into the controller.
//! Transports and the keyboard hub only queue [`SessionEvent`]s; the host
//! drains them with [`PlaybackController::process_pending`] or
//! [`PlaybackController::recv_event`].

use crate::{
    config::PlayerConfig,
    controls::{Command, CommandOutcome, ControlItem, InfoOverlay, KeyListenerGuard, KeyboardHub, NavDirection},
    error::Error,
    events::{ControllerEvent, EventHandlers, EventSink, PlayerEvent, SessionEvent},
    quality::{LevelNegotiator, QualityMenu, SwitchReason},
    recovery::{ErrorRecovery, RecoveryAction, RecoveryState},
    surface::MediaSurface,
    telemetry::{HttpViewCounter, ViewCounter, ViewTracker},
    tracks::{TrackKind, TrackSelector},
    transport::{OpenOutcome, OpenRequest, Transport, TransportAdapter, TransportFactory, TransportKind},
    types::{EpisodeDescriptor, FaultRecord, RenditionLevel, SessionId},
    Result,
};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

type NavCallback = Box<dyn FnMut() + Send>;

/// Everything owned by the episode currently bound
struct ActiveSession {
    id: SessionId,
    episode: EpisodeDescriptor,
    /// `None` once the session went terminal
    transport: Option<Box<dyn Transport>>,
    transport_kind: TransportKind,
    keys: KeyListenerGuard,
    levels: LevelNegotiator,
    recovery: ErrorRecovery,
    views: ViewTracker,
    subtitles: Option<TrackSelector>,
    audio: Option<TrackSelector>,
    overlay: InfoOverlay,
}

impl ActiveSession {
    fn release_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.destroy();
        }
    }
}

/// Adaptive playback controller
pub struct PlaybackController {
    config: PlayerConfig,
    factory: Box<dyn TransportFactory>,
    surface: Arc<dyn MediaSurface>,
    keyboard: KeyboardHub,
    tx: mpsc::UnboundedSender<SessionEvent>,
    rx: mpsc::UnboundedReceiver<SessionEvent>,
    session: Option<ActiveSession>,
    handlers: EventHandlers,
    view_counter: Option<Arc<dyn ViewCounter>>,
    on_previous: Option<NavCallback>,
    on_next: Option<NavCallback>,
}

impl PlaybackController {
    /// Create a controller with an explicit transport factory
    pub fn new(
        config: PlayerConfig,
        factory: Box<dyn TransportFactory>,
        surface: Arc<dyn MediaSurface>,
        keyboard: KeyboardHub,
    ) -> Result<Self> {
        config.validate()?;
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Self {
            config,
            factory,
            surface,
            keyboard,
            tx,
            rx,
            session: None,
            handlers: EventHandlers::new(),
            view_counter: None,
            on_previous: None,
            on_next: None,
        })
    }

    /// Controller fetching over HTTP, reporting views to the configured API
    pub fn from_config(
        config: PlayerConfig,
        surface: Arc<dyn MediaSurface>,
        keyboard: KeyboardHub,
    ) -> Result<Self> {
        let factory = TransportAdapter::new(config.transport.clone())?;
        let counter = HttpViewCounter::from_config(&config.telemetry)?;
        let mut controller = Self::new(config, Box::new(factory), surface, keyboard)?;
        if let Some(counter) = counter {
            controller.view_counter = Some(Arc::new(counter));
        }
        Ok(controller)
    }

    pub fn with_view_counter(mut self, counter: Arc<dyn ViewCounter>) -> Self {
        self.view_counter = Some(counter);
        self
    }

    /// Show a "previous episode" control that calls `callback`
    pub fn on_previous(mut self, callback: impl FnMut() + Send + 'static) -> Self {
        self.on_previous = Some(Box::new(callback));
        self
    }

    /// Show a "next episode" control that calls `callback`
    pub fn on_next(mut self, callback: impl FnMut() + Send + 'static) -> Self {
        self.on_next = Some(Box::new(callback));
        self
    }

    /// Register an outbound event handler
    pub fn subscribe(&mut self, handler: impl FnMut(&ControllerEvent) + Send + 'static) {
        self.handlers.register(Box::new(handler));
    }

    // =========================================================================
    // Session lifecycle
    // =========================================================================

    /// Bind an episode, replacing the current session
    #[instrument(skip(self, episode), fields(episode_id = %episode.id))]
    pub fn bind(&mut self, episode: EpisodeDescriptor) -> Result<SessionId> {
        let url = episode.playlist_url()?;

        // Old transport must let go of the surface before the new one claims it
        self.release();

        let id = SessionId::new();
        let sink = EventSink::new(id, self.tx.clone());
        let outcome = self.factory.open(OpenRequest {
            session: id,
            url: url.clone(),
            surface: self.surface.clone(),
            sink: sink.clone(),
            start_position: 0.0,
        })?;

        let transport = match outcome {
            OpenOutcome::Connected(transport) => transport,
            OpenOutcome::Unsupported => {
                warn!(url = %url, "Surface cannot play this source");
                return Err(Error::UnsupportedSource {
                    url: url.to_string(),
                });
            }
        };

        self.surface.set_volume(self.config.controls.initial_volume);
        if self.config.controls.autoplay {
            self.surface.play();
        }

        let transport_kind = transport.kind();
        let session = ActiveSession {
            id,
            transport: Some(transport),
            transport_kind,
            keys: self.keyboard.listen(sink),
            levels: LevelNegotiator::new(),
            recovery: ErrorRecovery::new(),
            views: ViewTracker::new(self.config.telemetry.view_threshold_secs),
            subtitles: TrackSelector::for_subtitles(&episode),
            audio: TrackSelector::for_audio(&episode),
            overlay: InfoOverlay::for_episode(&episode),
            episode,
        };

        info!(
            session_id = %id,
            transport = %transport_kind,
            "Session started"
        );
        let started = ControllerEvent::SessionStarted {
            session: id,
            episode_id: session.episode.id.clone(),
            transport: transport_kind,
        };
        self.session = Some(session);
        self.handlers.dispatch(&started);
        Ok(id)
    }

    /// Tear down the current session. Returns false if none was bound.
    pub fn release(&mut self) -> bool {
        let Some(mut session) = self.session.take() else {
            return false;
        };

        session.release_transport();
        let ActiveSession { id, episode, keys, .. } = session;
        drop(keys);

        info!(session_id = %id, episode_id = %episode.id, "Session ended");
        self.handlers.dispatch(&ControllerEvent::SessionEnded {
            session: id,
            episode_id: episode.id,
        });
        true
    }

    // =========================================================================
    // Event intake
    // =========================================================================

    /// Sink for the host to deliver events into the current session
    pub fn event_sink(&self) -> Option<EventSink> {
        self.session
            .as_ref()
            .map(|s| EventSink::new(s.id, self.tx.clone()))
    }

    /// Handle every queued event. Returns how many applied to the live session.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.rx.try_recv() {
            if self.dispatch(event) {
                handled += 1;
            }
        }
        handled
    }

    /// Wait for the next queued event and handle it
    pub async fn recv_event(&mut self) -> bool {
        match self.rx.recv().await {
            Some(event) => self.dispatch(event),
            None => false,
        }
    }

    /// Handle one event. Events from a session other than the live one are
    /// dropped and `false` is returned.
    pub fn dispatch(&mut self, event: SessionEvent) -> bool {
        let Some(session) = self.session.as_mut() else {
            debug!(session_id = %event.session, "No session, event dropped");
            return false;
        };
        if event.session != session.id {
            debug!(session_id = %event.session, "Stale session event dropped");
            return false;
        }

        let mut outbound = Vec::new();
        let mut view_report = None;
        let mut command = None;

        match event.event {
            PlayerEvent::ManifestParsed { levels, current } => {
                if session.levels.on_manifest_parsed(levels, current) {
                    outbound.push(ControllerEvent::QualityMenuChanged {
                        menu: session.levels.menu(),
                    });
                }
            }
            PlayerEvent::LevelSwitched { index, reason } => {
                if session.levels.on_level_switched(index) {
                    if let Some(level) = session.levels.active_level() {
                        outbound.push(ControllerEvent::LevelSwitched {
                            index,
                            label: level.label(),
                            reason,
                        });
                    }
                    outbound.push(ControllerEvent::QualityMenuChanged {
                        menu: session.levels.menu(),
                    });
                }
            }
            PlayerEvent::Fault(fault) => {
                Self::handle_fault(session, self.surface.as_ref(), fault, &mut outbound);
            }
            PlayerEvent::TimeUpdate { position } => {
                if session.views.on_time_update(position) {
                    info!(
                        session_id = %session.id,
                        episode_id = %session.episode.id,
                        position,
                        "View threshold crossed"
                    );
                    outbound.push(ControllerEvent::ViewThresholdCrossed {
                        episode_id: session.episode.id.clone(),
                    });
                    view_report = Some(session.episode.id.clone());
                }
            }
            PlayerEvent::FragmentBuffered { level, sequence } => {
                debug!(session_id = %session.id, level, sequence, "Fragment buffered");
                if session.recovery.on_fragment_buffered(sequence) {
                    outbound.push(ControllerEvent::RecoveryStateChanged {
                        state: session.recovery.state(),
                    });
                }
            }
            PlayerEvent::Key(press) => {
                command = Some(press.key.command(&self.config.controls));
            }
        }

        for event in outbound.iter() {
            self.handlers.dispatch(event);
        }
        if let Some(episode_id) = view_report {
            self.report_view(episode_id);
        }
        if let Some(command) = command {
            self.execute(command);
        }
        true
    }

    fn handle_fault(
        session: &mut ActiveSession,
        surface: &dyn MediaSurface,
        fault: FaultRecord,
        outbound: &mut Vec<ControllerEvent>,
    ) {
        let before = session.recovery.state();
        let action = session.recovery.on_fault(&fault);

        let dispatched = match (action, session.transport.as_mut()) {
            // Resume after what is already buffered
            (RecoveryAction::RestartLoad, Some(transport)) => {
                transport.start_load(surface.buffered_end())
            }
            (RecoveryAction::RecoverMedia, Some(transport)) => transport.recover_media_error(),
            (RecoveryAction::RestartLoad | RecoveryAction::RecoverMedia, None) => Err(Error::NoSession),
            _ => Ok(()),
        };
        if let Err(err) = dispatched {
            warn!(session_id = %session.id, error = %err, "Recovery action failed");
            session.recovery.on_dispatch_failed();
        }

        let after = session.recovery.state();
        if after != before {
            outbound.push(ControllerEvent::RecoveryStateChanged { state: after });
        }
        if after == RecoveryState::Terminal && before != RecoveryState::Terminal {
            session.release_transport();
            outbound.push(ControllerEvent::FatalError {
                kind: fault.kind,
                detail: fault.detail,
            });
        }
    }

    fn report_view(&self, episode_id: String) {
        let Some(counter) = self.view_counter.clone() else {
            return;
        };
        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = counter.record_view(&episode_id).await {
                        warn!(episode_id = %episode_id, error = %e, "View report failed");
                    }
                });
            }
            Err(_) => warn!(episode_id = %episode_id, "No runtime, view report skipped"),
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Run a control command. Ignored (`None`) while no session is bound.
    pub fn execute(&mut self, command: Command) -> Option<CommandOutcome> {
        let session = self.session.as_mut()?;
        let outcome = command.apply(self.surface.as_ref());

        if let CommandOutcome::Seeked { to, .. } = outcome {
            // Nothing buffered at the target: load from there
            if self.surface.buffered_end() <= to {
                if let Some(transport) = session.transport.as_mut() {
                    if let Err(e) = transport.start_load(to) {
                        warn!(session_id = %session.id, error = %e, "Reload after seek failed");
                    }
                }
            }
        }

        debug!(session_id = %session.id, ?command, ?outcome, "Command applied");
        Some(outcome)
    }

    pub fn toggle_playback(&mut self) -> Option<CommandOutcome> {
        self.execute(Command::TogglePlayback)
    }

    pub fn seek_relative(&mut self, delta: f64) -> Option<CommandOutcome> {
        self.execute(Command::SeekRelative(delta))
    }

    pub fn adjust_volume(&mut self, delta: f64) -> Option<CommandOutcome> {
        self.execute(Command::AdjustVolume(delta))
    }

    pub fn toggle_mute(&mut self) -> Option<CommandOutcome> {
        self.execute(Command::ToggleMute)
    }

    pub fn toggle_fullscreen(&mut self) -> Option<CommandOutcome> {
        self.execute(Command::ToggleFullscreen)
    }

    /// Switch rendition. `Ok(false)` if `index` is already active.
    ///
    /// Fails with `LevelsUnknown` until the ladder is parsed, and with
    /// `SessionTerminated` once a fatal fault released the transport.
    pub fn select_level(&mut self, index: usize) -> Result<bool> {
        let session = self.session.as_mut().ok_or(Error::NoSession)?;
        let transport = session.transport.as_mut().ok_or(Error::SessionTerminated)?;
        if !session.levels.select_level(index, transport.as_mut())? {
            return Ok(false);
        }

        let label = session
            .levels
            .active_level()
            .map(|l| l.label())
            .unwrap_or_default();
        let menu = session.levels.menu();
        self.handlers.dispatch(&ControllerEvent::LevelSwitched {
            index,
            label,
            reason: SwitchReason::Manual,
        });
        self.handlers
            .dispatch(&ControllerEvent::QualityMenuChanged { menu });
        Ok(true)
    }

    pub fn select_subtitle(&mut self, label: &str) -> Result<bool> {
        self.select_track(TrackKind::Subtitle, label)
    }

    pub fn select_audio(&mut self, label: &str) -> Result<bool> {
        self.select_track(TrackKind::Audio, label)
    }

    fn select_track(&mut self, kind: TrackKind, label: &str) -> Result<bool> {
        let session = self.session.as_mut().ok_or(Error::NoSession)?;
        let selector = match kind {
            TrackKind::Subtitle => session.subtitles.as_mut(),
            TrackKind::Audio => session.audio.as_mut(),
        }
        .ok_or_else(|| Error::UnknownTrack {
            kind: kind.to_string(),
            label: label.to_string(),
        })?;

        if !selector.select(label)? {
            return Ok(false);
        }
        info!(session_id = %session.id, %kind, label, "Track selected");
        self.handlers.dispatch(&ControllerEvent::TrackSelected {
            kind,
            label: label.to_string(),
        });
        Ok(true)
    }

    /// Invoke the injected "next episode" callback, if any
    pub fn request_next(&mut self) -> bool {
        self.navigate(NavDirection::Next)
    }

    /// Invoke the injected "previous episode" callback, if any
    pub fn request_previous(&mut self) -> bool {
        self.navigate(NavDirection::Previous)
    }

    fn navigate(&mut self, direction: NavDirection) -> bool {
        let callback = match direction {
            NavDirection::Previous => self.on_previous.as_mut(),
            NavDirection::Next => self.on_next.as_mut(),
        };
        let Some(callback) = callback else {
            return false;
        };
        callback();
        self.handlers
            .dispatch(&ControllerEvent::NavigationRequested { direction });
        true
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Controls to render, in order. Empty while no session is bound.
    pub fn controls(&self) -> Vec<ControlItem> {
        let Some(session) = self.session.as_ref() else {
            return Vec::new();
        };

        let mut items = Vec::new();
        if self.on_previous.is_some() {
            items.push(ControlItem::Previous);
        }
        items.push(ControlItem::PlayPause);
        if self.on_next.is_some() {
            items.push(ControlItem::Next);
        }
        items.extend([ControlItem::Seek, ControlItem::Volume, ControlItem::Mute]);
        if session.levels.menu().is_some() {
            items.push(ControlItem::Quality);
        }
        if session.subtitles.is_some() {
            items.push(ControlItem::Subtitles);
        }
        if session.audio.is_some() {
            items.push(ControlItem::Audio);
        }
        items.push(ControlItem::Fullscreen);
        items
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn surface(&self) -> &Arc<dyn MediaSurface> {
        &self.surface
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|s| s.id)
    }

    pub fn episode(&self) -> Option<&EpisodeDescriptor> {
        self.session.as_ref().map(|s| &s.episode)
    }

    pub fn transport_kind(&self) -> Option<TransportKind> {
        self.session.as_ref().map(|s| s.transport_kind)
    }

    /// False once a terminal fault released the transport
    pub fn has_transport(&self) -> bool {
        self.session
            .as_ref()
            .map(|s| s.transport.is_some())
            .unwrap_or(false)
    }

    pub fn levels(&self) -> Option<&[RenditionLevel]> {
        self.session.as_ref()?.levels.levels()
    }

    pub fn active_level(&self) -> Option<usize> {
        self.session.as_ref()?.levels.active()
    }

    pub fn quality_menu(&self) -> Option<QualityMenu> {
        self.session.as_ref()?.levels.menu()
    }

    pub fn recovery_state(&self) -> Option<RecoveryState> {
        self.session.as_ref().map(|s| s.recovery.state())
    }

    pub fn view_counted(&self) -> bool {
        self.session
            .as_ref()
            .map(|s| s.views.counted())
            .unwrap_or(false)
    }

    pub fn subtitles(&self) -> Option<&TrackSelector> {
        self.session.as_ref()?.subtitles.as_ref()
    }

    pub fn audio(&self) -> Option<&TrackSelector> {
        self.session.as_ref()?.audio.as_ref()
    }

    pub fn overlay(&self) -> Option<&InfoOverlay> {
        self.session.as_ref().map(|s| &s.overlay)
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.release();
    }
}
