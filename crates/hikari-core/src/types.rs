//! Core types for Hikari

use crate::{error::Error, Result};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

/// Unique identifier for a playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Episode metadata handed to the controller by the catalog layer.
///
/// Field names follow the catalog API's JSON (`camelCase`), so a descriptor can
/// be deserialized straight from an episode response. Unknown fields such as
/// `viewCount` or `description` are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeDescriptor {
    pub id: String,
    pub title: String,
    pub episode_number: u32,
    #[serde(default)]
    pub thumbnail: String,
    #[serde(default)]
    pub master_playlist_url: String,
    /// Nominal duration, advisory only
    #[serde(default)]
    pub duration_seconds: f64,
    /// Advisory quality labels; the real ladder comes from the manifest
    #[serde(default)]
    pub available_qualities: Vec<String>,
    #[serde(default)]
    pub available_audios: Vec<String>,
    #[serde(default)]
    pub available_subtitles: Vec<String>,
}

impl EpisodeDescriptor {
    /// Create a descriptor with the fields the controller needs
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        episode_number: u32,
        master_playlist_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            episode_number,
            thumbnail: String::new(),
            master_playlist_url: master_playlist_url.into(),
            duration_seconds: 0.0,
            available_qualities: Vec::new(),
            available_audios: Vec::new(),
            available_subtitles: Vec::new(),
        }
    }

    pub fn with_audios<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.available_audios = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_subtitles<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.available_subtitles = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration_seconds = seconds;
        self
    }

    /// Parse the master playlist location
    pub fn playlist_url(&self) -> Result<Url> {
        let raw = self.master_playlist_url.trim();
        if raw.is_empty() {
            return Err(Error::MissingPlaylist {
                episode_id: self.id.clone(),
            });
        }
        Ok(Url::parse(raw)?)
    }
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One entry of the rendition ladder as seen by the control surface.
///
/// `index` is the position in manifest order and stays stable for the whole
/// session. Whether a level is current is never stored here; ask the
/// negotiator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenditionLevel {
    pub index: usize,
    pub height: u32,
    /// Advertised bandwidth in bits per second
    pub bandwidth: u64,
}

impl RenditionLevel {
    /// Menu label by vertical resolution, e.g. "720p"
    pub fn label(&self) -> String {
        format!("{}p", self.height)
    }

    pub fn is_current(&self, active: Option<usize>) -> bool {
        active == Some(self.index)
    }
}

/// Fault category reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    Network,
    Media,
    Other,
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FaultKind::Network => write!(f, "network"),
            FaultKind::Media => write!(f, "media"),
            FaultKind::Other => write!(f, "other"),
        }
    }
}

/// Transport or decode fault, consumed immediately by the recovery machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultRecord {
    pub fatal: bool,
    pub kind: FaultKind,
    pub detail: String,
}

impl FaultRecord {
    pub fn fatal(kind: FaultKind, detail: impl Into<String>) -> Self {
        Self {
            fatal: true,
            kind,
            detail: detail.into(),
        }
    }

    pub fn non_fatal(kind: FaultKind, detail: impl Into<String>) -> Self {
        Self {
            fatal: false,
            kind,
            detail: detail.into(),
        }
    }

    /// Build a fault from a transport error, keeping its code in the detail
    pub fn from_error(err: &Error, fatal: bool) -> Self {
        Self {
            fatal,
            kind: err.fault_kind(),
            detail: format!("{}: {}", err.error_code(), err),
        }
    }

    pub fn class(&self) -> FaultClass {
        match (self.fatal, self.kind) {
            (false, _) => FaultClass::NonFatalDecodeHiccup,
            (true, FaultKind::Network) => FaultClass::FatalNetwork,
            (true, FaultKind::Media) => FaultClass::FatalMedia,
            (true, FaultKind::Other) => FaultClass::FatalOther,
        }
    }
}

/// Error taxonomy driving the recovery policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultClass {
    /// Logged and ignored
    NonFatalDecodeHiccup,
    /// Restart segment loading
    FatalNetwork,
    /// In-place decoder recovery
    FatalMedia,
    /// Terminal
    FatalOther,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_from_api_json() {
        let json = r#"{
            "id": "ep-42",
            "animeId": "a-1",
            "seasonNumber": 1,
            "episodeNumber": 3,
            "title": "The Storm",
            "thumbnail": "https://img.example.com/ep3.jpg",
            "masterPlaylistUrl": "https://cdn.example.com/ep3/master.m3u8",
            "durationSeconds": 1420,
            "availableQualities": ["1080p", "720p"],
            "availableAudios": ["Japanese", "English"],
            "availableSubtitles": ["English"],
            "viewCount": 1200
        }"#;

        let ep: EpisodeDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(ep.id, "ep-42");
        assert_eq!(ep.episode_number, 3);
        assert_eq!(ep.duration_seconds, 1420.0);
        assert_eq!(ep.available_audios, vec!["Japanese", "English"]);
        assert_eq!(
            ep.playlist_url().unwrap().as_str(),
            "https://cdn.example.com/ep3/master.m3u8"
        );
    }

    #[test]
    fn test_missing_playlist_url() {
        let ep = EpisodeDescriptor::new("ep-1", "Pilot", 1, "  ");
        assert!(matches!(ep.playlist_url(), Err(Error::MissingPlaylist { .. })));
    }

    #[test]
    fn test_level_label_and_current() {
        let level = RenditionLevel {
            index: 2,
            height: 720,
            bandwidth: 2_800_000,
        };
        assert_eq!(level.label(), "720p");
        assert!(level.is_current(Some(2)));
        assert!(!level.is_current(Some(0)));
        assert!(!level.is_current(None));
    }

    #[test]
    fn test_fault_classes() {
        assert_eq!(
            FaultRecord::non_fatal(FaultKind::Media, "gap").class(),
            FaultClass::NonFatalDecodeHiccup
        );
        assert_eq!(
            FaultRecord::fatal(FaultKind::Network, "frag").class(),
            FaultClass::FatalNetwork
        );
        assert_eq!(
            FaultRecord::fatal(FaultKind::Other, "?").class(),
            FaultClass::FatalOther
        );
    }
}
