//! HLS (HTTP Live Streaming) playlist parsing
//!
//! Implements parsing for:
//! - Master playlists (multivariant), keeping manifest order
//! - Media playlists (segments with cumulative start times)
//! - Media playlists used directly as the entry point

use super::{Manifest, MediaPlaylist, PlaylistKind, Segment, Variant};
use crate::{error::Error, types::Resolution, Result};
use std::time::Duration;
use url::Url;

/// Parse whichever playlist type the content is
pub fn parse_playlist(content: &str, url: &Url) -> Result<Manifest> {
    if content.contains("#EXT-X-STREAM-INF") {
        return parse_master(content, url);
    }

    // Single rendition: the media playlist itself is the only variant
    let media = parse_media(content, url)?;
    if media.segments.is_empty() {
        return Err(Error::NoPlayableRendition);
    }

    Ok(Manifest {
        kind: PlaylistKind::Media,
        variants: vec![Variant {
            index: 0,
            bandwidth: 0,
            resolution: None,
            frame_rate: None,
            codecs: None,
            uri: url.clone(),
        }],
        base_url: url.clone(),
    })
}

/// Parse a master playlist into variants in manifest order
pub fn parse_master(content: &str, base_url: &Url) -> Result<Manifest> {
    let parsed = m3u8_rs::parse_master_playlist_res(content.as_bytes())
        .map_err(|e| Error::ManifestParse(format!("Failed to parse HLS master: {:?}", e)))?;

    let mut variants = Vec::new();
    for variant in parsed.variants.iter().filter(|v| !v.is_i_frame) {
        let uri = resolve_uri(base_url, &variant.uri)?;
        variants.push(Variant {
            index: variants.len(),
            bandwidth: variant.bandwidth,
            resolution: variant.resolution.map(|r| Resolution {
                width: r.width as u32,
                height: r.height as u32,
            }),
            frame_rate: variant.frame_rate,
            codecs: variant.codecs.clone(),
            uri,
        });
    }

    if variants.is_empty() {
        return Err(Error::NoPlayableRendition);
    }

    Ok(Manifest {
        kind: PlaylistKind::Master,
        variants,
        base_url: base_url.clone(),
    })
}

/// Parse a media playlist
pub fn parse_media(content: &str, base_url: &Url) -> Result<MediaPlaylist> {
    let parsed = m3u8_rs::parse_media_playlist_res(content.as_bytes())
        .map_err(|e| Error::ManifestParse(format!("Failed to parse HLS media: {:?}", e)))?;

    let mut segments = Vec::with_capacity(parsed.segments.len());
    let mut start = 0.0;
    for (idx, seg) in parsed.segments.iter().enumerate() {
        let duration = Duration::from_secs_f32(seg.duration.max(0.0));
        segments.push(Segment {
            sequence: parsed.media_sequence + idx as u64,
            uri: resolve_uri(base_url, &seg.uri)?,
            duration,
            start,
        });
        start += duration.as_secs_f64();
    }

    Ok(MediaPlaylist {
        segments,
        target_duration: Duration::from_secs(parsed.target_duration),
        ended: parsed.end_list,
    })
}

/// Resolve relative URI against base URL
fn resolve_uri(base: &Url, relative: &str) -> Result<Url> {
    base.join(relative)
        .map_err(|e| Error::InvalidManifest(format!("Invalid URI '{}': {}", relative, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-STREAM-INF:BANDWIDTH=2800000,RESOLUTION=1280x720,CODECS=\"avc1.64001f,mp4a.40.2\"
720p/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360
360p/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=5000000,RESOLUTION=1920x1080
1080p/index.m3u8
";

    const MEDIA: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:6
#EXT-X-MEDIA-SEQUENCE:5
#EXTINF:6.0,
seg5.ts
#EXTINF:6.0,
seg6.ts
#EXTINF:3.5,
seg7.ts
#EXT-X-ENDLIST
";

    fn base() -> Url {
        Url::parse("https://cdn.example.com/ep1/master.m3u8").unwrap()
    }

    #[test]
    fn test_master_keeps_manifest_order() {
        let manifest = parse_master(MASTER, &base()).unwrap();
        assert_eq!(manifest.kind, PlaylistKind::Master);
        let heights: Vec<u32> = manifest.levels().iter().map(|l| l.height).collect();
        assert_eq!(heights, vec![720, 360, 1080]);
        assert_eq!(manifest.variants[0].index, 0);
        assert_eq!(manifest.variants[2].index, 2);
        assert_eq!(
            manifest.variants[1].uri.as_str(),
            "https://cdn.example.com/ep1/360p/index.m3u8"
        );
        assert_eq!(
            manifest.variants[0].codecs.as_deref(),
            Some("avc1.64001f,mp4a.40.2")
        );
    }

    #[test]
    fn test_media_playlist_timeline() {
        let url = Url::parse("https://cdn.example.com/ep1/720p/index.m3u8").unwrap();
        let media = parse_media(MEDIA, &url).unwrap();
        assert!(media.ended);
        assert_eq!(media.target_duration, Duration::from_secs(6));
        assert_eq!(media.segments.len(), 3);
        assert_eq!(media.segments[0].sequence, 5);
        assert_eq!(media.segments[2].start, 12.0);
        assert_eq!(media.duration(), 15.5);
        assert_eq!(
            media.segments[1].uri.as_str(),
            "https://cdn.example.com/ep1/720p/seg6.ts"
        );
    }

    #[test]
    fn test_media_entry_point_is_single_rendition() {
        let manifest = parse_playlist(MEDIA, &base()).unwrap();
        assert_eq!(manifest.kind, PlaylistKind::Media);
        assert_eq!(manifest.variants.len(), 1);
        assert_eq!(manifest.levels()[0].height, 0);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(parse_playlist("<html>not a playlist</html>", &base()).is_err());
    }
}
