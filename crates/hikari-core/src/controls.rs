//! Playback control surface and keyboard binding
//!
//! Key presses reach a session only through a [`KeyListenerGuard`] the
//! session owns. Dropping the guard unregisters the listener, so a torn-down
//! session can no longer be driven from the keyboard.

use crate::{
    config::ControlConfig,
    error::Error,
    events::{EventSink, PlayerEvent},
    surface::MediaSurface,
    types::EpisodeDescriptor,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Control command
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    TogglePlayback,
    /// Seek by a signed number of seconds
    SeekRelative(f64),
    /// Change volume by a signed step
    AdjustVolume(f64),
    ToggleMute,
    ToggleFullscreen,
}

/// State change a command produced
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CommandOutcome {
    Playing(bool),
    Seeked { from: f64, to: f64 },
    Volume(f64),
    Muted(bool),
    Fullscreen(bool),
}

impl Command {
    /// Apply to the surface. Seeks clamp to `[0, duration]`, volume to `[0, 1]`.
    pub fn apply(&self, surface: &dyn MediaSurface) -> CommandOutcome {
        match *self {
            Command::TogglePlayback => {
                if surface.is_paused() {
                    surface.play();
                    CommandOutcome::Playing(true)
                } else {
                    surface.pause();
                    CommandOutcome::Playing(false)
                }
            }
            Command::SeekRelative(delta) => {
                let from = surface.current_time();
                let mut to = (from + delta).max(0.0);
                if let Some(duration) = surface.duration() {
                    to = to.min(duration);
                }
                surface.set_current_time(to);
                CommandOutcome::Seeked { from, to }
            }
            Command::AdjustVolume(delta) => {
                let volume = (surface.volume() + delta).clamp(0.0, 1.0);
                surface.set_volume(volume);
                CommandOutcome::Volume(volume)
            }
            Command::ToggleMute => {
                let muted = !surface.is_muted();
                surface.set_muted(muted);
                CommandOutcome::Muted(muted)
            }
            Command::ToggleFullscreen => {
                let fullscreen = !surface.is_fullscreen();
                surface.set_fullscreen(fullscreen);
                CommandOutcome::Fullscreen(fullscreen)
            }
        }
    }
}

/// Keys with a playback binding, named by their key code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Key {
    Space,
    ArrowLeft,
    ArrowRight,
    ArrowUp,
    ArrowDown,
    KeyF,
    KeyM,
}

impl Key {
    /// Binding table
    pub fn command(&self, config: &ControlConfig) -> Command {
        match self {
            Key::Space => Command::TogglePlayback,
            Key::ArrowLeft => Command::SeekRelative(-config.seek_step),
            Key::ArrowRight => Command::SeekRelative(config.seek_step),
            Key::ArrowUp => Command::AdjustVolume(config.volume_step),
            Key::ArrowDown => Command::AdjustVolume(-config.volume_step),
            Key::KeyF => Command::ToggleFullscreen,
            Key::KeyM => Command::ToggleMute,
        }
    }
}

impl FromStr for Key {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Space" | " " => Ok(Key::Space),
            "ArrowLeft" => Ok(Key::ArrowLeft),
            "ArrowRight" => Ok(Key::ArrowRight),
            "ArrowUp" => Ok(Key::ArrowUp),
            "ArrowDown" => Ok(Key::ArrowDown),
            "KeyF" | "f" | "F" => Ok(Key::KeyF),
            "KeyM" | "m" | "M" => Ok(Key::KeyM),
            other => Err(Error::UnknownKey(other.to_string())),
        }
    }
}

/// Where input focus was when a key went down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusTarget {
    /// Text input or textarea; keys belong to the field
    TextEntry,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPress {
    pub key: Key,
    pub focus: FocusTarget,
}

impl KeyPress {
    pub fn new(key: Key) -> Self {
        Self {
            key,
            focus: FocusTarget::Other,
        }
    }

    pub fn in_text_field(key: Key) -> Self {
        Self {
            key,
            focus: FocusTarget::TextEntry,
        }
    }
}

type Listeners = Arc<Mutex<HashMap<u64, EventSink>>>;

fn lock(listeners: &Listeners) -> MutexGuard<'_, HashMap<u64, EventSink>> {
    listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Process-wide key source with scoped subscriptions
#[derive(Clone, Default)]
pub struct KeyboardHub {
    listeners: Listeners,
    next_id: Arc<AtomicU64>,
}

impl KeyboardHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route key presses to `sink` until the guard is dropped
    pub fn listen(&self, sink: EventSink) -> KeyListenerGuard {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        debug!(listener = id, session_id = %sink.session(), "Key listener registered");
        lock(&self.listeners).insert(id, sink);
        KeyListenerGuard {
            id,
            listeners: self.listeners.clone(),
        }
    }

    /// Deliver a key press. Returns how many listeners received it.
    pub fn dispatch(&self, press: KeyPress) -> usize {
        if press.focus == FocusTarget::TextEntry {
            debug!(key = ?press.key, "Key press left to text field");
            return 0;
        }
        lock(&self.listeners)
            .values()
            .filter(|sink| sink.emit(PlayerEvent::Key(press)))
            .count()
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }
}

/// Registration handle; unregisters on drop
pub struct KeyListenerGuard {
    id: u64,
    listeners: Listeners,
}

impl Drop for KeyListenerGuard {
    fn drop(&mut self) {
        if lock(&self.listeners).remove(&self.id).is_some() {
            debug!(listener = self.id, "Key listener removed");
        }
    }
}

impl std::fmt::Debug for KeyListenerGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyListenerGuard").field("id", &self.id).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavDirection {
    Previous,
    Next,
}

/// Entries of the control bar, in display order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlItem {
    Previous,
    PlayPause,
    Next,
    Seek,
    Volume,
    Mute,
    Quality,
    Subtitles,
    Audio,
    Fullscreen,
}

/// Episode caption drawn over the video
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoOverlay {
    pub episode_number: u32,
    pub title: String,
}

impl InfoOverlay {
    pub fn for_episode(episode: &EpisodeDescriptor) -> Self {
        Self {
            episode_number: episode.episode_number,
            title: episode.title.clone(),
        }
    }

    pub fn text(&self) -> String {
        format!("Episode {}: {}", self.episode_number, self.title)
    }

    /// Pointer and key events pass through to the video
    pub fn intercepts_input(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::MemorySurface;
    use crate::types::SessionId;
    use tokio::sync::mpsc;

    #[test]
    fn test_key_codes() {
        assert_eq!("ArrowLeft".parse::<Key>().unwrap(), Key::ArrowLeft);
        assert_eq!("KeyF".parse::<Key>().unwrap(), Key::KeyF);
        assert_eq!("m".parse::<Key>().unwrap(), Key::KeyM);
        assert!(matches!("KeyQ".parse::<Key>(), Err(Error::UnknownKey(_))));
    }

    #[test]
    fn test_binding_table() {
        let config = ControlConfig::default();
        assert_eq!(Key::Space.command(&config), Command::TogglePlayback);
        assert_eq!(Key::ArrowLeft.command(&config), Command::SeekRelative(-10.0));
        assert_eq!(Key::ArrowRight.command(&config), Command::SeekRelative(10.0));
        assert_eq!(Key::ArrowUp.command(&config), Command::AdjustVolume(0.1));
        assert_eq!(Key::ArrowDown.command(&config), Command::AdjustVolume(-0.1));
        assert_eq!(Key::KeyF.command(&config), Command::ToggleFullscreen);
        assert_eq!(Key::KeyM.command(&config), Command::ToggleMute);
    }

    #[test]
    fn test_seek_and_volume_clamp() {
        let surface = MemorySurface::new();
        surface.set_duration(Some(100.0));
        surface.set_current_time(4.0);

        assert_eq!(
            Command::SeekRelative(-10.0).apply(&surface),
            CommandOutcome::Seeked { from: 4.0, to: 0.0 }
        );
        surface.set_current_time(95.0);
        assert_eq!(
            Command::SeekRelative(10.0).apply(&surface),
            CommandOutcome::Seeked { from: 95.0, to: 100.0 }
        );

        surface.set_volume(0.95);
        assert_eq!(Command::AdjustVolume(0.1).apply(&surface), CommandOutcome::Volume(1.0));
        surface.set_volume(0.05);
        assert_eq!(Command::AdjustVolume(-0.1).apply(&surface), CommandOutcome::Volume(0.0));
    }

    #[test]
    fn test_toggles() {
        let surface = MemorySurface::new();
        assert_eq!(Command::TogglePlayback.apply(&surface), CommandOutcome::Playing(true));
        assert_eq!(Command::TogglePlayback.apply(&surface), CommandOutcome::Playing(false));
        assert_eq!(Command::ToggleMute.apply(&surface), CommandOutcome::Muted(true));
        assert_eq!(Command::ToggleFullscreen.apply(&surface), CommandOutcome::Fullscreen(true));
    }

    #[test]
    fn test_hub_scoped_listener() {
        let hub = KeyboardHub::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = SessionId::new();

        let guard = hub.listen(EventSink::new(session, tx));
        assert_eq!(hub.dispatch(KeyPress::new(Key::Space)), 1);
        assert_eq!(rx.try_recv().unwrap().event, PlayerEvent::Key(KeyPress::new(Key::Space)));

        assert_eq!(hub.dispatch(KeyPress::in_text_field(Key::Space)), 0);
        assert!(rx.try_recv().is_err());

        drop(guard);
        assert_eq!(hub.listener_count(), 0);
        assert_eq!(hub.dispatch(KeyPress::new(Key::Space)), 0);
    }

    #[test]
    fn test_overlay_passes_input_through() {
        let episode = EpisodeDescriptor::new("ep-1", "The Beginning", 1, "https://cdn.example.com/m.m3u8");
        let overlay = InfoOverlay::for_episode(&episode);
        assert_eq!(overlay.text(), "Episode 1: The Beginning");
        assert!(!overlay.intercepts_input());
    }
}
