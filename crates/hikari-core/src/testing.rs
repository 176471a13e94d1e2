//! In-memory collaborators for exercising the controller without a network
//!
//! [`StaticFetcher`] serves playlists and segments from maps.
//! [`RecordingFactory`] opens [`FakeTransport`]s that claim the surface and
//! log every call, so tests can assert ordering across sessions.

use crate::{
    error::Error,
    manifest::MediaFetcher,
    surface::MediaSurface,
    transport::{OpenOutcome, OpenRequest, Transport, TransportFactory, TransportKind},
    types::SessionId,
    Result,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

/// A run of valid MPEG-TS packets
pub fn ts_segment(packets: usize) -> Bytes {
    let mut data = vec![0xFFu8; packets * 188];
    for packet in data.chunks_mut(188) {
        packet[0] = 0x47;
    }
    Bytes::from(data)
}

/// Master playlist text for `(bandwidth, height)` pairs, variant `i` at `v{i}/index.m3u8`
pub fn master_playlist(ladder: &[(u64, u32)]) -> String {
    let mut text = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
    for (i, (bandwidth, height)) in ladder.iter().enumerate() {
        let width = height * 16 / 9;
        text.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{}\nv{}/index.m3u8\n",
            bandwidth, width, height, i
        ));
    }
    text
}

/// Ended media playlist of `segments` six-second segments named `seg{n}.ts`
pub fn media_playlist(segments: usize) -> String {
    let mut text = String::from(
        "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:6\n#EXT-X-MEDIA-SEQUENCE:0\n",
    );
    for n in 0..segments {
        text.push_str(&format!("#EXTINF:6.0,\nseg{}.ts\n", n));
    }
    text.push_str("#EXT-X-ENDLIST\n");
    text
}

/// Serves canned responses; unknown URLs answer 404
#[derive(Default)]
pub struct StaticFetcher {
    texts: HashMap<String, String>,
    bytes: HashMap<String, Bytes>,
    latency: Option<Duration>,
    requests: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A complete VOD title: master at `master_url`, one media playlist per
    /// ladder entry, every segment a valid TS payload
    pub fn vod(master_url: &str, ladder: &[(u64, u32)], segments: usize) -> Self {
        let mut fetcher = Self::new().with_text(master_url, master_playlist(ladder));
        let Ok(base) = Url::parse(master_url) else {
            return fetcher;
        };
        for i in 0..ladder.len() {
            let Ok(playlist) = base.join(&format!("v{}/index.m3u8", i)) else {
                continue;
            };
            fetcher = fetcher.with_text(playlist.as_str(), media_playlist(segments));
            for n in 0..segments {
                if let Ok(segment) = playlist.join(&format!("seg{}.ts", n)) {
                    fetcher = fetcher.with_bytes(segment.as_str(), ts_segment(10));
                }
            }
        }
        fetcher
    }

    pub fn with_text(mut self, url: &str, body: impl Into<String>) -> Self {
        self.texts.insert(url.to_string(), body.into());
        self
    }

    pub fn with_bytes(mut self, url: &str, body: Bytes) -> Self {
        self.bytes.insert(url.to_string(), body);
        self
    }

    /// Drop a URL so it answers 404
    pub fn without(mut self, url: &str) -> Self {
        self.texts.remove(url);
        self.bytes.remove(url);
        self
    }

    /// Delay every response
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// URLs requested so far, in order
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    async fn serve<T: Clone>(&self, map: &HashMap<String, T>, url: &Url) -> Result<T> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(url.to_string());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        map.get(url.as_str()).cloned().ok_or(Error::HttpStatus {
            url: url.to_string(),
            status: 404,
        })
    }
}

#[async_trait]
impl MediaFetcher for StaticFetcher {
    async fn fetch_text(&self, url: &Url) -> Result<String> {
        self.serve(&self.texts, url).await
    }

    async fn fetch_bytes(&self, url: &Url) -> Result<Bytes> {
        self.serve(&self.bytes, url).await
    }
}

/// One observed transport interaction
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    Opened(SessionId, TransportKind),
    SetLevel(SessionId, usize),
    StartLoad(SessionId, f64),
    RecoverMedia(SessionId),
    Destroyed(SessionId),
}

/// Shared log of transport calls plus failure switches
#[derive(Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<TransportCall>>>,
    fail_recovery: Arc<AtomicBool>,
}

impl CallLog {
    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Make recovery actions fail from now on
    pub fn fail_recoveries(&self, fail: bool) {
        self.fail_recovery.store(fail, Ordering::SeqCst);
    }

    pub fn count(&self, pred: impl Fn(&TransportCall) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    fn push(&self, call: TransportCall) {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(call);
    }

    fn recovery_result(&self) -> Result<()> {
        if self.fail_recovery.load(Ordering::SeqCst) {
            Err(Error::Internal("recovery rejected".into()))
        } else {
            Ok(())
        }
    }
}

/// Factory handing out [`FakeTransport`]s
pub struct RecordingFactory {
    kind: Option<TransportKind>,
    log: CallLog,
}

impl RecordingFactory {
    pub fn new(kind: TransportKind) -> Self {
        Self {
            kind: Some(kind),
            log: CallLog::default(),
        }
    }

    /// Factory for a surface that cannot play HLS at all
    pub fn unsupported() -> Self {
        Self {
            kind: None,
            log: CallLog::default(),
        }
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }
}

impl TransportFactory for RecordingFactory {
    fn open(&self, request: OpenRequest) -> Result<OpenOutcome> {
        let Some(kind) = self.kind else {
            return Ok(OpenOutcome::Unsupported);
        };
        request.surface.claim(request.session)?;
        self.log.push(TransportCall::Opened(request.session, kind));
        Ok(OpenOutcome::Connected(Box::new(FakeTransport {
            session: request.session,
            kind,
            surface: request.surface,
            log: self.log.clone(),
            destroyed: false,
        })))
    }
}

/// Transport that records calls instead of loading media
pub struct FakeTransport {
    session: SessionId,
    kind: TransportKind,
    surface: Arc<dyn MediaSurface>,
    log: CallLog,
    destroyed: bool,
}

impl Transport for FakeTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn set_current_level(&mut self, index: usize) -> Result<()> {
        self.log.push(TransportCall::SetLevel(self.session, index));
        Ok(())
    }

    fn start_load(&mut self, position: f64) -> Result<()> {
        self.log.push(TransportCall::StartLoad(self.session, position));
        self.log.recovery_result()
    }

    fn recover_media_error(&mut self) -> Result<()> {
        self.log.push(TransportCall::RecoverMedia(self.session));
        self.log.recovery_result()
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.surface.release(self.session);
        self.log.push(TransportCall::Destroyed(self.session));
    }
}

impl Drop for FakeTransport {
    fn drop(&mut self) {
        self.destroy();
    }
}
