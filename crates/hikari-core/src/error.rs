//! Error types for Hikari Core

use crate::types::{FaultKind, SessionId};
use thiserror::Error;

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;

/// Controller error types
#[derive(Error, Debug)]
pub enum Error {
    // Manifest errors
    #[error("Failed to fetch manifest: {0}")]
    ManifestFetch(String),

    #[error("Failed to parse manifest: {0}")]
    ManifestParse(String),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("Manifest advertises no playable rendition")]
    NoPlayableRendition,

    // Segment errors
    #[error("Failed to fetch segment {url}: {reason}")]
    SegmentFetch { url: String, reason: String },

    #[error("HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Segment timeout: {url}")]
    SegmentTimeout { url: String },

    #[error("Segment demux failed: {0}")]
    Demux(String),

    // Surface errors
    #[error("Media surface is owned by session {owner}")]
    SurfaceBusy { owner: SessionId },

    #[error("Session {session} does not own the media surface")]
    SurfaceNotOwned { session: SessionId },

    #[error("Media buffer full: {requested} bytes requested, {available} available")]
    BufferFull { requested: usize, available: usize },

    #[error("Failed to append to media buffer: {0}")]
    BufferAppend(String),

    #[error("Decoder error: {0}")]
    Decode(String),

    // Session errors
    #[error("No playback session is attached")]
    NoSession,

    #[error("Playback failed; the session has no transport left")]
    SessionTerminated,

    #[error("Segment loader was superseded")]
    LoaderCancelled,

    #[error("Episode {episode_id} has no playlist URL")]
    MissingPlaylist { episode_id: String },

    #[error("No transport can play {url}")]
    UnsupportedSource { url: String },

    #[error("Rendition level {index} out of range ({available} available)")]
    LevelOutOfRange { index: usize, available: usize },

    #[error("Rendition levels are not known yet")]
    LevelsUnknown,

    #[error("Unknown {kind} track: {label}")]
    UnknownTrack { kind: String, label: String },

    #[error("Unknown key code: {0}")]
    UnknownKey(String),

    // Telemetry errors
    #[error("View report for episode {episode_id} failed: {reason}")]
    ViewReport { episode_id: String, reason: String },

    // Network errors
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Connection timeout")]
    ConnectionTimeout,

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Fault category used by the recovery state machine
    pub fn fault_kind(&self) -> FaultKind {
        match self {
            Error::ManifestFetch(_)
            | Error::SegmentFetch { .. }
            | Error::HttpStatus { .. }
            | Error::SegmentTimeout { .. }
            | Error::Network(_)
            | Error::ConnectionTimeout => FaultKind::Network,
            Error::Demux(_)
            | Error::BufferFull { .. }
            | Error::BufferAppend(_)
            | Error::Decode(_) => FaultKind::Media,
            _ => FaultKind::Other,
        }
    }

    /// Returns the error code used in fault details and logs
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::ManifestFetch(_) => "MANIFEST_LOAD",
            Error::ManifestParse(_) => "MANIFEST_PARSE",
            Error::InvalidManifest(_) => "INVALID_MANIFEST",
            Error::NoPlayableRendition => "NO_RENDITION",
            Error::SegmentFetch { .. } => "FRAG_LOAD",
            Error::HttpStatus { .. } => "HTTP_STATUS",
            Error::SegmentTimeout { .. } => "FRAG_TIMEOUT",
            Error::Demux(_) => "FRAG_PARSE",
            Error::SurfaceBusy { .. } => "SURFACE_BUSY",
            Error::SurfaceNotOwned { .. } => "SURFACE_NOT_OWNED",
            Error::BufferFull { .. } => "BUFFER_FULL",
            Error::BufferAppend(_) => "BUFFER_APPEND",
            Error::Decode(_) => "DECODE",
            Error::NoSession => "NO_SESSION",
            Error::SessionTerminated => "SESSION_TERMINATED",
            Error::LoaderCancelled => "CANCELLED",
            Error::MissingPlaylist { .. } => "MISSING_PLAYLIST",
            Error::UnsupportedSource { .. } => "UNSUPPORTED",
            Error::LevelOutOfRange { .. } => "LEVEL_RANGE",
            Error::LevelsUnknown => "LEVELS_UNKNOWN",
            Error::UnknownTrack { .. } => "UNKNOWN_TRACK",
            Error::UnknownKey(_) => "UNKNOWN_KEY",
            Error::ViewReport { .. } => "VIEW_REPORT",
            Error::Network(_) => "NETWORK",
            Error::ConnectionTimeout => "TIMEOUT",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::InvalidUrl(_) => "INVALID_URL",
            Error::Json(_) => "JSON",
            Error::Internal(_) => "INTERNAL",
            Error::Io(_) => "IO",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_kind_mapping() {
        let err = Error::SegmentFetch {
            url: "https://cdn.example.com/seg0.ts".into(),
            reason: "connection reset".into(),
        };
        assert_eq!(err.fault_kind(), FaultKind::Network);
        assert_eq!(Error::Demux("bad sync byte".into()).fault_kind(), FaultKind::Media);
        assert_eq!(Error::NoPlayableRendition.fault_kind(), FaultKind::Other);
        assert_eq!(Error::ManifestParse("garbage".into()).fault_kind(), FaultKind::Other);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::ConnectionTimeout.error_code(), "TIMEOUT");
        assert_eq!(
            Error::BufferFull { requested: 10, available: 0 }.error_code(),
            "BUFFER_FULL"
        );
    }
}
