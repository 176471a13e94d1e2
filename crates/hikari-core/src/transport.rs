//! Transport layer adapter
//!
//! Binds a playlist URL to a media surface. Two transports exist:
//! - [`HlsTransport`]: software demuxing. A background loader fetches the
//!   manifest and streams segments into the surface buffer.
//! - [`NativeTransport`]: the surface decodes HLS itself; we only hand it the URL.
//!
//! Every transport claims the surface on attach and releases it on `destroy`,
//! so a surface never has two transports feeding it. Loader tasks touch the
//! surface only through a generation gate: once `destroy` or a restart has
//! bumped the generation, a superseded loader cannot write another byte.

use crate::{
    abr::ThroughputEstimator,
    config::TransportConfig,
    error::Error,
    events::{EventSink, PlayerEvent},
    manifest::{load_manifest, load_media_playlist, HttpFetcher, Manifest, MediaFetcher, MediaPlaylist, Segment},
    quality::SwitchReason,
    surface::{Container, MediaChunk, MediaSurface},
    types::{FaultRecord, SessionId},
    Result,
};
use bytes::Bytes;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Which decoding path a session uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Native,
    Software,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Native => write!(f, "native"),
            TransportKind::Software => write!(f, "software"),
        }
    }
}

/// Everything a transport needs to attach
pub struct OpenRequest {
    pub session: SessionId,
    pub url: Url,
    pub surface: Arc<dyn MediaSurface>,
    pub sink: EventSink,
    pub start_position: f64,
}

/// Result of [`TransportFactory::open`]
pub enum OpenOutcome {
    Connected(Box<dyn Transport>),
    Unsupported,
}

impl OpenOutcome {
    pub fn is_connected(&self) -> bool {
        matches!(self, OpenOutcome::Connected(_))
    }
}

impl std::fmt::Debug for OpenOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpenOutcome::Connected(t) => write!(f, "Connected({})", t.kind()),
            OpenOutcome::Unsupported => write!(f, "Unsupported"),
        }
    }
}

/// A live transport attached to a surface for one session
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    /// Point the loader at another rendition. Takes effect at the next
    /// segment boundary; nothing already buffered is flushed.
    fn set_current_level(&mut self, index: usize) -> Result<()>;

    /// (Re)start segment loading at `position`
    fn start_load(&mut self, position: f64) -> Result<()>;

    /// Recover the decode path in place, keeping the parsed manifest and
    /// whatever is already buffered
    fn recover_media_error(&mut self) -> Result<()>;

    /// Stop all loading and release the surface. Idempotent.
    fn destroy(&mut self);
}

/// Opens transports for new sessions
pub trait TransportFactory: Send {
    fn open(&self, request: OpenRequest) -> Result<OpenOutcome>;
}

/// Production transport factory
pub struct TransportAdapter {
    config: TransportConfig,
    fetcher: Arc<dyn MediaFetcher>,
}

impl TransportAdapter {
    /// Adapter fetching over HTTP
    pub fn new(config: TransportConfig) -> Result<Self> {
        let fetcher = HttpFetcher::new(config.request_timeout())?;
        Ok(Self::with_fetcher(config, Arc::new(fetcher)))
    }

    pub fn with_fetcher(config: TransportConfig, fetcher: Arc<dyn MediaFetcher>) -> Self {
        Self { config, fetcher }
    }
}

impl TransportFactory for TransportAdapter {
    #[instrument(skip(self, request), fields(session_id = %request.session, url = %request.url))]
    fn open(&self, request: OpenRequest) -> Result<OpenOutcome> {
        // Software demuxing needs a buffer-fed surface and a runtime for the loader
        let runtime = Handle::try_current().ok();
        let software = request.surface.supports_media_source() && runtime.is_some();
        let native = request.surface.can_play_native_hls();

        if native && (self.config.prefer_native || !software) {
            let transport = NativeTransport::attach(request)?;
            return Ok(OpenOutcome::Connected(Box::new(transport)));
        }

        match runtime {
            Some(runtime) if software => {
                let transport =
                    HlsTransport::attach(request, self.config.clone(), self.fetcher.clone(), runtime)?;
                Ok(OpenOutcome::Connected(Box::new(transport)))
            }
            _ => {
                info!("No transport available for this surface");
                Ok(OpenOutcome::Unsupported)
            }
        }
    }
}

// =============================================================================
// Native playback
// =============================================================================

/// Delegates decoding to the surface
pub struct NativeTransport {
    session: SessionId,
    url: Url,
    surface: Arc<dyn MediaSurface>,
    destroyed: bool,
}

impl NativeTransport {
    fn attach(request: OpenRequest) -> Result<Self> {
        request.surface.claim(request.session)?;
        request.surface.set_native_source(Some(&request.url));
        request.surface.set_current_time(request.start_position);
        info!(session_id = %request.session, "Native transport attached");

        Ok(Self {
            session: request.session,
            url: request.url,
            surface: request.surface,
            destroyed: false,
        })
    }
}

impl Transport for NativeTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Native
    }

    fn set_current_level(&mut self, index: usize) -> Result<()> {
        debug!(index, "Native surface selects levels itself");
        Ok(())
    }

    fn start_load(&mut self, position: f64) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        self.surface.set_native_source(Some(&self.url));
        self.surface.set_current_time(position);
        Ok(())
    }

    fn recover_media_error(&mut self) -> Result<()> {
        if !self.destroyed {
            self.surface.reset_decoder();
        }
        Ok(())
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.surface.set_native_source(None);
        self.surface.release(self.session);
        info!(session_id = %self.session, "Native transport destroyed");
    }
}

impl Drop for NativeTransport {
    fn drop(&mut self) {
        self.destroy();
    }
}

// =============================================================================
// Software demuxing
// =============================================================================

/// State shared between the transport handle and its loader task
struct LoaderShared {
    active_level: AtomicUsize,
    auto_level: AtomicBool,
    manifest: Mutex<Option<Arc<Manifest>>>,
    /// Generation of the loader allowed to touch the surface
    generation: Mutex<u64>,
}

impl LoaderShared {
    fn generation(&self) -> MutexGuard<'_, u64> {
        self.generation
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn manifest(&self) -> Option<Arc<Manifest>> {
        self.manifest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_manifest(&self, manifest: Arc<Manifest>) {
        *self
            .manifest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(manifest);
    }

    fn switch_reason(&self) -> SwitchReason {
        if self.auto_level.load(Ordering::SeqCst) {
            SwitchReason::Auto
        } else {
            SwitchReason::Manual
        }
    }
}

#[derive(Clone)]
struct LoaderContext {
    session: SessionId,
    url: Url,
    config: TransportConfig,
    fetcher: Arc<dyn MediaFetcher>,
    surface: Arc<dyn MediaSurface>,
    sink: EventSink,
    shared: Arc<LoaderShared>,
    generation: u64,
}

impl LoaderContext {
    /// Run `f` against the surface and sink only while this loader is current.
    /// The gate is held for the whole call, so a retire never interleaves.
    fn gated<T>(&self, f: impl FnOnce(&dyn MediaSurface, &EventSink) -> T) -> Result<T> {
        let current = self.shared.generation();
        if *current != self.generation {
            return Err(Error::LoaderCancelled);
        }
        Ok(f(self.surface.as_ref(), &self.sink))
    }

    fn emit(&self, event: PlayerEvent) -> Result<()> {
        self.gated(|_, sink| {
            sink.emit(event);
        })
    }
}

/// Software-demuxing HLS transport
pub struct HlsTransport {
    ctx: LoaderContext,
    runtime: Handle,
    task: Option<JoinHandle<()>>,
    destroyed: bool,
}

impl HlsTransport {
    fn attach(
        request: OpenRequest,
        config: TransportConfig,
        fetcher: Arc<dyn MediaFetcher>,
        runtime: Handle,
    ) -> Result<Self> {
        request.surface.claim(request.session)?;

        let ctx = LoaderContext {
            session: request.session,
            url: request.url,
            config,
            fetcher,
            surface: request.surface,
            sink: request.sink,
            shared: Arc::new(LoaderShared {
                active_level: AtomicUsize::new(0),
                auto_level: AtomicBool::new(true),
                manifest: Mutex::new(None),
                generation: Mutex::new(0),
            }),
            generation: 0,
        };

        info!(
            session_id = %ctx.session,
            worker = ctx.config.enable_worker,
            low_latency = ctx.config.low_latency_mode,
            "Software transport attached"
        );

        let mut transport = Self {
            ctx,
            runtime,
            task: None,
            destroyed: false,
        };
        transport.spawn_loader(request.start_position);
        Ok(transport)
    }

    /// Fence off the running loader. Once this returns it can no longer
    /// touch the surface or emit events, even if it is mid-poll on a worker.
    fn retire_loader(&mut self) {
        {
            let mut generation = self.ctx.shared.generation();
            *generation += 1;
            self.ctx.generation = *generation;
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn spawn_loader(&mut self, position: f64) {
        self.retire_loader();
        let ctx = self.ctx.clone();
        self.task = Some(self.runtime.spawn(run_loader(ctx, position)));
    }
}

impl Transport for HlsTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Software
    }

    fn set_current_level(&mut self, index: usize) -> Result<()> {
        if let Some(manifest) = self.ctx.shared.manifest() {
            if index >= manifest.variants.len() {
                return Err(Error::LevelOutOfRange {
                    index,
                    available: manifest.variants.len(),
                });
            }
        }
        self.ctx.shared.auto_level.store(false, Ordering::SeqCst);
        self.ctx.shared.active_level.store(index, Ordering::SeqCst);
        debug!(session_id = %self.ctx.session, index, "Manual level selected");
        Ok(())
    }

    fn start_load(&mut self, position: f64) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        debug!(session_id = %self.ctx.session, position, "Restarting segment loading");
        self.spawn_loader(position);
        Ok(())
    }

    fn recover_media_error(&mut self) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        self.retire_loader();
        self.ctx.surface.reset_decoder();
        // Buffered media decoded fine; only what follows it is fetched again
        let position = self.ctx.surface.buffered_end();
        debug!(session_id = %self.ctx.session, position, "Decoder reset, resuming load");
        self.spawn_loader(position);
        Ok(())
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.retire_loader();
        self.ctx.surface.release(self.ctx.session);
        info!(session_id = %self.ctx.session, "Software transport destroyed");
    }
}

impl Drop for HlsTransport {
    fn drop(&mut self) {
        self.destroy();
    }
}

async fn run_loader(ctx: LoaderContext, start_position: f64) {
    match load_segments(&ctx, start_position).await {
        Ok(()) => debug!(session_id = %ctx.session, "Segment loading finished"),
        Err(Error::LoaderCancelled) => {
            debug!(session_id = %ctx.session, generation = ctx.generation, "Loader superseded")
        }
        Err(err) => {
            let fault = FaultRecord::from_error(&err, true);
            let reported = ctx.gated(|_, sink| sink.fault(fault.clone()));
            if reported.is_ok() {
                warn!(
                    session_id = %ctx.session,
                    kind = %fault.kind,
                    code = err.error_code(),
                    "Fatal transport fault: {}",
                    err
                );
            }
        }
    }
}

async fn load_segments(ctx: &LoaderContext, start_position: f64) -> Result<()> {
    let manifest = match ctx.shared.manifest() {
        Some(manifest) => manifest,
        None => announce_manifest(ctx).await?,
    };
    let levels = manifest.levels();

    let mut estimator = ThroughputEstimator::new();
    let mut forward_target = ctx
        .config
        .max_buffer_length
        .min(ctx.config.max_max_buffer_length);
    let mut position = start_position;
    let mut current: Option<(usize, MediaPlaylist)> = None;
    let mut next = 0usize;

    loop {
        // Wait first so a switch made meanwhile applies to the next segment
        wait_for_buffer_room(ctx, forward_target).await;

        let level = ctx.shared.active_level.load(Ordering::SeqCst);
        let loaded = current.as_ref().map(|(l, _)| *l);
        if loaded != Some(level) {
            let variant = manifest.variant(level).ok_or(Error::LevelOutOfRange {
                index: level,
                available: manifest.variants.len(),
            })?;
            let playlist = load_media_playlist(ctx.fetcher.as_ref(), &variant.uri).await?;
            if playlist.ended {
                ctx.gated(|surface, _| {
                    if surface.duration().is_none() {
                        surface.set_duration(Some(playlist.duration()));
                    }
                })?;
            }
            next = if playlist.ended && position >= playlist.duration() {
                playlist.segments.len()
            } else {
                playlist.segment_index_at(position).unwrap_or(0)
            };

            if let Some(previous) = loaded {
                info!(session_id = %ctx.session, from = previous, to = level, "Level switched");
                ctx.emit(PlayerEvent::LevelSwitched {
                    index: level,
                    reason: ctx.shared.switch_reason(),
                })?;
            }
            current = Some((level, playlist));
        }

        let (segment, target_duration) = match current.as_ref() {
            Some((_, playlist)) => match playlist.segments.get(next) {
                Some(segment) => (segment.clone(), playlist.target_duration),
                None => return Ok(()),
            },
            None => return Ok(()),
        };

        let started = tokio::time::Instant::now();
        let data = ctx.fetcher.fetch_bytes(&segment.uri).await?;
        estimator.record(data.len(), started.elapsed());

        let chunk = demux(ctx, level, &segment, data).await?;
        append_with_backoff(ctx, chunk, &mut forward_target, target_duration)?;
        evict_back_buffer(ctx)?;

        ctx.emit(PlayerEvent::FragmentBuffered {
            level,
            sequence: segment.sequence,
        })?;
        position = segment.end();
        next += 1;

        if ctx.shared.auto_level.load(Ordering::SeqCst) {
            if let Some(best) = estimator.select_level(&levels, ctx.config.abr_safety_factor) {
                if best != level {
                    // Loses to a concurrent manual selection
                    let _ = ctx.shared.active_level.compare_exchange(
                        level,
                        best,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    );
                }
            }
        }
    }
}

/// Load the entry playlist once per session and publish the ladder
async fn announce_manifest(ctx: &LoaderContext) -> Result<Arc<Manifest>> {
    let manifest = Arc::new(load_manifest(ctx.fetcher.as_ref(), &ctx.url).await?);
    let levels = manifest.levels();
    let last = levels.len().saturating_sub(1);

    let start = if ctx.shared.auto_level.load(Ordering::SeqCst) {
        ctx.config.start_level.unwrap_or(0).min(last)
    } else {
        ctx.shared.active_level.load(Ordering::SeqCst).min(last)
    };
    ctx.shared.active_level.store(start, Ordering::SeqCst);
    ctx.shared.set_manifest(manifest.clone());

    info!(
        session_id = %ctx.session,
        levels = levels.len(),
        start_level = start,
        "Manifest parsed"
    );
    ctx.emit(PlayerEvent::ManifestParsed {
        levels,
        current: start,
    })?;
    Ok(manifest)
}

async fn wait_for_buffer_room(ctx: &LoaderContext, forward_target: f64) {
    loop {
        let ahead = ctx.surface.buffered_end() - ctx.surface.current_time();
        if ahead < forward_target {
            return;
        }
        tokio::time::sleep(ctx.config.buffer_poll_interval()).await;
    }
}

async fn demux(ctx: &LoaderContext, level: usize, segment: &Segment, data: Bytes) -> Result<MediaChunk> {
    let container = if ctx.config.enable_worker {
        let bytes = data.clone();
        tokio::task::spawn_blocking(move || probe_segment(&bytes))
            .await
            .map_err(|e| Error::Internal(format!("demux worker failed: {}", e)))??
    } else {
        probe_segment(&data)?
    };

    Ok(MediaChunk {
        level,
        sequence: segment.sequence,
        start: segment.start,
        end: segment.end(),
        container,
        data,
    })
}

/// Append, halving the forward target once if the surface is full
fn append_with_backoff(
    ctx: &LoaderContext,
    chunk: MediaChunk,
    forward_target: &mut f64,
    target_duration: Duration,
) -> Result<()> {
    let session = ctx.session;
    match ctx.gated(|surface, _| surface.append(session, chunk.clone()))? {
        Err(err @ Error::BufferFull { .. }) => {
            let floor = target_duration.as_secs_f64().max(1.0);
            *forward_target = (*forward_target / 2.0)
                .max(floor)
                .min(ctx.config.max_max_buffer_length);
            warn!(
                session_id = %session,
                forward_target = *forward_target,
                "Media buffer full, shrinking forward buffer"
            );
            ctx.gated(|surface, sink| {
                sink.fault(FaultRecord::from_error(&err, false));
                surface.evict_before(session, surface.current_time());
                surface.append(session, chunk)
            })?
        }
        other => other,
    }
}

fn evict_back_buffer(ctx: &LoaderContext) -> Result<()> {
    let removed = ctx.gated(|surface, _| {
        let cutoff = surface.current_time() - ctx.config.back_buffer_length;
        if cutoff > 0.0 {
            surface.evict_before(ctx.session, cutoff)
        } else {
            0
        }
    })?;
    if removed > 0 {
        debug!(session_id = %ctx.session, removed, "Back buffer evicted");
    }
    Ok(())
}

const TS_PACKET_SIZE: usize = 188;
const TS_SYNC_BYTE: u8 = 0x47;
const MP4_BOX_TYPES: [&[u8; 4]; 8] = [
    b"ftyp", b"styp", b"moof", b"moov", b"sidx", b"emsg", b"free", b"mdat",
];

/// Identify a segment's container, rejecting corrupt payloads
pub fn probe_segment(data: &[u8]) -> Result<Container> {
    if data.len() >= TS_PACKET_SIZE && data[0] == TS_SYNC_BYTE {
        let packets = (data.len() / TS_PACKET_SIZE).min(5);
        if (0..packets).all(|i| data[i * TS_PACKET_SIZE] == TS_SYNC_BYTE) {
            return Ok(Container::MpegTs);
        }
        return Err(Error::Demux("MPEG-TS sync byte lost".into()));
    }

    if data.len() >= 8 && MP4_BOX_TYPES.iter().any(|t| data[4..8] == t[..]) {
        return Ok(Container::Fmp4);
    }

    Err(Error::Demux(format!(
        "unrecognized container ({} bytes)",
        data.len()
    )))
}
