//! HLS manifest model and loading

mod hls;

pub use hls::{parse_master, parse_media, parse_playlist};

use crate::{
    error::Error,
    types::{FaultKind, RenditionLevel, Resolution},
    Result,
};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// How the entry playlist was structured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistKind {
    /// Multivariant playlist listing renditions
    Master,
    /// Single media playlist used directly as the entry point
    Media,
}

/// One variant stream advertised by the master playlist
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    /// Position in manifest order
    pub index: usize,
    /// Bandwidth in bits per second
    pub bandwidth: u64,
    pub resolution: Option<Resolution>,
    pub frame_rate: Option<f64>,
    pub codecs: Option<String>,
    /// Media playlist for this variant
    pub uri: Url,
}

/// Parsed entry playlist
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub kind: PlaylistKind,
    /// Variants in manifest order
    pub variants: Vec<Variant>,
    pub base_url: Url,
}

impl Manifest {
    /// The rendition ladder in manifest order
    pub fn levels(&self) -> Vec<RenditionLevel> {
        self.variants
            .iter()
            .map(|v| RenditionLevel {
                index: v.index,
                height: v.resolution.map(|r| r.height).unwrap_or(0),
                bandwidth: v.bandwidth,
            })
            .collect()
    }

    pub fn variant(&self, index: usize) -> Option<&Variant> {
        self.variants.get(index)
    }
}

/// A segment of a media playlist
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Media sequence number
    pub sequence: u64,
    pub uri: Url,
    pub duration: Duration,
    /// Start time on the presentation timeline, in seconds
    pub start: f64,
}

impl Segment {
    pub fn end(&self) -> f64 {
        self.start + self.duration.as_secs_f64()
    }
}

/// Parsed media playlist of one variant
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    pub segments: Vec<Segment>,
    pub target_duration: Duration,
    /// `#EXT-X-ENDLIST` seen
    pub ended: bool,
}

impl MediaPlaylist {
    /// Total presentation duration in seconds
    pub fn duration(&self) -> f64 {
        self.segments.last().map(|s| s.end()).unwrap_or(0.0)
    }

    /// Index of the segment covering `position`, clamped to the playlist
    pub fn segment_index_at(&self, position: f64) -> Option<usize> {
        if self.segments.is_empty() {
            return None;
        }
        let idx = self
            .segments
            .iter()
            .position(|s| position < s.end())
            .unwrap_or(self.segments.len() - 1);
        Some(idx)
    }
}

/// Fetches playlists and segments
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch_text(&self, url: &Url) -> Result<String>;

    async fn fetch_bytes(&self, url: &Url) -> Result<Bytes>;
}

/// HTTP fetcher backed by reqwest
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn get(&self, url: &Url) -> Result<reqwest::Response> {
        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                Error::SegmentTimeout { url: url.to_string() }
            } else {
                Error::SegmentFetch {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl MediaFetcher for HttpFetcher {
    #[instrument(skip(self))]
    async fn fetch_text(&self, url: &Url) -> Result<String> {
        debug!("Fetching playlist: {}", url);
        let response = self.get(url).await?;
        response
            .text()
            .await
            .map_err(|e| Error::ManifestFetch(e.to_string()))
    }

    #[instrument(skip(self))]
    async fn fetch_bytes(&self, url: &Url) -> Result<Bytes> {
        let response = self.get(url).await?;
        response.bytes().await.map_err(|e| Error::SegmentFetch {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Fetch and parse the entry playlist
pub async fn load_manifest(fetcher: &dyn MediaFetcher, url: &Url) -> Result<Manifest> {
    let content = fetcher.fetch_text(url).await.map_err(|e| match e.fault_kind() {
        FaultKind::Network => Error::ManifestFetch(e.to_string()),
        _ => e,
    })?;
    parse_playlist(&content, url)
}

/// Fetch and parse one variant's media playlist
pub async fn load_media_playlist(fetcher: &dyn MediaFetcher, url: &Url) -> Result<MediaPlaylist> {
    let content = fetcher.fetch_text(url).await?;
    parse_media(&content, url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playlist(durations: &[f32]) -> MediaPlaylist {
        let base = Url::parse("https://cdn.example.com/v0/index.m3u8").unwrap();
        let mut start = 0.0;
        let segments = durations
            .iter()
            .enumerate()
            .map(|(i, d)| {
                let seg = Segment {
                    sequence: i as u64,
                    uri: base.join(&format!("seg{}.ts", i)).unwrap(),
                    duration: Duration::from_secs_f32(*d),
                    start,
                };
                start += *d as f64;
                seg
            })
            .collect();
        MediaPlaylist {
            segments,
            target_duration: Duration::from_secs(6),
            ended: true,
        }
    }

    #[test]
    fn test_segment_index_at() {
        let p = playlist(&[6.0, 6.0, 4.0]);
        assert_eq!(p.duration(), 16.0);
        assert_eq!(p.segment_index_at(0.0), Some(0));
        assert_eq!(p.segment_index_at(6.0), Some(1));
        assert_eq!(p.segment_index_at(13.0), Some(2));
        assert_eq!(p.segment_index_at(99.0), Some(2));
        assert_eq!(playlist(&[]).segment_index_at(0.0), None);
    }
}
