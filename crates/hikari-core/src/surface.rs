//! Media surface - the playback target segments are decoded into
//!
//! A surface is exclusively owned by one session's transport at a time. The
//! owner must `claim` it before touching the buffer and `release` it on
//! teardown; a second claim while another session holds it fails.

use crate::{error::Error, types::SessionId, Result};
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use url::Url;

/// Container format detected for a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    MpegTs,
    Fmp4,
}

/// A probed segment ready to be buffered
#[derive(Debug, Clone)]
pub struct MediaChunk {
    pub level: usize,
    pub sequence: u64,
    pub start: f64,
    pub end: f64,
    pub container: Container,
    pub data: Bytes,
}

/// Playback surface abstraction
pub trait MediaSurface: Send + Sync {
    /// Software demuxing can feed this surface's buffer
    fn supports_media_source(&self) -> bool;

    /// The surface decodes HLS by itself when given the playlist URL
    fn can_play_native_hls(&self) -> bool;

    /// Take exclusive ownership for a session
    fn claim(&self, session: SessionId) -> Result<()>;

    /// Give up ownership. A release by a non-owner is ignored.
    fn release(&self, session: SessionId);

    fn owner(&self) -> Option<SessionId>;

    /// Hand a playlist URL to the native decoder, or clear it
    fn set_native_source(&self, url: Option<&Url>);

    /// Buffer a chunk on behalf of `session`. A chunk with the same sequence
    /// number replaces the one already buffered.
    fn append(&self, session: SessionId, chunk: MediaChunk) -> Result<()>;

    /// End of the contiguous buffered range starting at the playhead
    fn buffered_end(&self) -> f64;

    /// Drop buffered media ending at or before `time`; returns chunks removed.
    /// A non-owner removes nothing.
    fn evict_before(&self, session: SessionId, time: f64) -> usize;

    fn clear_buffer(&self);

    /// Reinitialize the decoder without touching the source
    fn reset_decoder(&self);

    fn current_time(&self) -> f64;

    fn set_current_time(&self, time: f64);

    fn duration(&self) -> Option<f64>;

    fn set_duration(&self, duration: Option<f64>);

    fn is_paused(&self) -> bool;

    fn play(&self);

    fn pause(&self);

    fn volume(&self) -> f64;

    fn set_volume(&self, volume: f64);

    fn is_muted(&self) -> bool;

    fn set_muted(&self, muted: bool);

    fn is_fullscreen(&self) -> bool;

    fn set_fullscreen(&self, fullscreen: bool);
}

/// Ownership history entry, kept by [`MemorySurface`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipChange {
    Claimed(SessionId),
    Released(SessionId),
}

#[derive(Debug)]
struct SurfaceState {
    owner: Option<SessionId>,
    history: Vec<OwnershipChange>,
    native_source: Option<Url>,
    chunks: VecDeque<MediaChunk>,
    bytes_used: usize,
    decoder_resets: u32,
    current_time: f64,
    duration: Option<f64>,
    paused: bool,
    volume: f64,
    muted: bool,
    fullscreen: bool,
}

/// Headless in-memory surface
pub struct MemorySurface {
    media_source: bool,
    native_hls: bool,
    capacity_bytes: usize,
    state: Mutex<SurfaceState>,
}

/// Gap tolerated between chunks when measuring the contiguous buffer
const BUFFER_HOLE_TOLERANCE: f64 = 0.1;

impl MemorySurface {
    /// Surface with software-demux support and a 256 MB buffer
    pub fn new() -> Self {
        Self::with_capabilities(true, false)
    }

    pub fn with_capabilities(media_source: bool, native_hls: bool) -> Self {
        Self {
            media_source,
            native_hls,
            capacity_bytes: 256 * 1024 * 1024,
            state: Mutex::new(SurfaceState {
                owner: None,
                history: Vec::new(),
                native_source: None,
                chunks: VecDeque::new(),
                bytes_used: 0,
                decoder_resets: 0,
                current_time: 0.0,
                duration: None,
                paused: true,
                volume: 1.0,
                muted: false,
                fullscreen: false,
            }),
        }
    }

    pub fn with_capacity(mut self, capacity_bytes: usize) -> Self {
        self.capacity_bytes = capacity_bytes;
        self
    }

    fn state(&self) -> MutexGuard<'_, SurfaceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every claim and release in order
    pub fn ownership_history(&self) -> Vec<OwnershipChange> {
        self.state().history.clone()
    }

    pub fn native_source(&self) -> Option<Url> {
        self.state().native_source.clone()
    }

    pub fn buffered_chunks(&self) -> usize {
        self.state().chunks.len()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.state().bytes_used
    }

    pub fn decoder_resets(&self) -> u32 {
        self.state().decoder_resets
    }

    /// Move the playhead forward while playing, never past buffered media.
    /// Returns the new position.
    pub fn advance(&self, seconds: f64) -> f64 {
        let buffered_end = self.buffered_end();
        let mut state = self.state();
        if state.paused {
            return state.current_time;
        }
        let mut target = (state.current_time + seconds).min(buffered_end);
        if let Some(duration) = state.duration {
            target = target.min(duration);
        }
        state.current_time = target.max(state.current_time);
        state.current_time
    }
}

impl Default for MemorySurface {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaSurface for MemorySurface {
    fn supports_media_source(&self) -> bool {
        self.media_source
    }

    fn can_play_native_hls(&self) -> bool {
        self.native_hls
    }

    fn claim(&self, session: SessionId) -> Result<()> {
        let mut state = self.state();
        match state.owner {
            Some(owner) if owner != session => Err(Error::SurfaceBusy { owner }),
            Some(_) => Ok(()),
            None => {
                state.owner = Some(session);
                state.history.push(OwnershipChange::Claimed(session));
                Ok(())
            }
        }
    }

    fn release(&self, session: SessionId) {
        let mut state = self.state();
        if state.owner == Some(session) {
            state.owner = None;
            state.history.push(OwnershipChange::Released(session));
            state.native_source = None;
            state.chunks.clear();
            state.bytes_used = 0;
            state.current_time = 0.0;
            state.duration = None;
            state.paused = true;
        }
    }

    fn owner(&self) -> Option<SessionId> {
        self.state().owner
    }

    fn set_native_source(&self, url: Option<&Url>) {
        self.state().native_source = url.cloned();
    }

    fn append(&self, session: SessionId, chunk: MediaChunk) -> Result<()> {
        if chunk.data.is_empty() {
            return Err(Error::BufferAppend(format!(
                "segment {} is empty",
                chunk.sequence
            )));
        }

        let mut state = self.state();
        if state.owner != Some(session) {
            return Err(Error::SurfaceNotOwned { session });
        }

        let replaced = state.chunks.iter().position(|c| c.sequence == chunk.sequence);
        let reclaimed = replaced.map(|i| state.chunks[i].data.len()).unwrap_or(0);
        let available = self
            .capacity_bytes
            .saturating_sub(state.bytes_used - reclaimed);
        if chunk.data.len() > available {
            return Err(Error::BufferFull {
                requested: chunk.data.len(),
                available,
            });
        }

        if let Some(i) = replaced {
            state.chunks.remove(i);
            state.bytes_used -= reclaimed;
        }
        state.bytes_used += chunk.data.len();
        let pos = state
            .chunks
            .iter()
            .position(|c| c.start > chunk.start)
            .unwrap_or(state.chunks.len());
        state.chunks.insert(pos, chunk);
        Ok(())
    }

    fn buffered_end(&self) -> f64 {
        let state = self.state();
        if state.native_source.is_some() {
            return state.duration.unwrap_or(state.current_time);
        }

        let mut end = state.current_time;
        for chunk in state.chunks.iter() {
            if chunk.start <= end + BUFFER_HOLE_TOLERANCE && chunk.end > end {
                end = chunk.end;
            }
        }
        end
    }

    fn evict_before(&self, session: SessionId, time: f64) -> usize {
        let mut state = self.state();
        if state.owner != Some(session) {
            return 0;
        }
        let before = state.chunks.len();
        let mut freed = 0;
        state.chunks.retain(|c| {
            let keep = c.end > time;
            if !keep {
                freed += c.data.len();
            }
            keep
        });
        state.bytes_used -= freed;
        before - state.chunks.len()
    }

    fn clear_buffer(&self) {
        let mut state = self.state();
        state.chunks.clear();
        state.bytes_used = 0;
    }

    fn reset_decoder(&self) {
        self.state().decoder_resets += 1;
    }

    fn current_time(&self) -> f64 {
        self.state().current_time
    }

    fn set_current_time(&self, time: f64) {
        self.state().current_time = time.max(0.0);
    }

    fn duration(&self) -> Option<f64> {
        self.state().duration
    }

    fn set_duration(&self, duration: Option<f64>) {
        self.state().duration = duration;
    }

    fn is_paused(&self) -> bool {
        self.state().paused
    }

    fn play(&self) {
        self.state().paused = false;
    }

    fn pause(&self) {
        self.state().paused = true;
    }

    fn volume(&self) -> f64 {
        self.state().volume
    }

    fn set_volume(&self, volume: f64) {
        self.state().volume = volume.clamp(0.0, 1.0);
    }

    fn is_muted(&self) -> bool {
        self.state().muted
    }

    fn set_muted(&self, muted: bool) {
        self.state().muted = muted;
    }

    fn is_fullscreen(&self) -> bool {
        self.state().fullscreen
    }

    fn set_fullscreen(&self, fullscreen: bool) {
        self.state().fullscreen = fullscreen;
    }
}
