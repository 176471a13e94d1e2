//! Subtitle and audio track selectors

use crate::{error::Error, types::EpisodeDescriptor, Result};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Subtitle,
    Audio,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKind::Subtitle => write!(f, "subtitle"),
            TrackKind::Audio => write!(f, "audio"),
        }
    }
}

/// A selectable list of track labels. Only remembers what is displayed;
/// switching the actual stream is up to whoever receives the selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackSelector {
    kind: TrackKind,
    labels: Vec<String>,
    selected: usize,
}

impl TrackSelector {
    /// Shown whenever the episode lists any subtitle
    pub fn for_subtitles(episode: &EpisodeDescriptor) -> Option<Self> {
        Self::build(TrackKind::Subtitle, &episode.available_subtitles, 1)
    }

    /// Shown only when there is an actual choice of audio
    pub fn for_audio(episode: &EpisodeDescriptor) -> Option<Self> {
        Self::build(TrackKind::Audio, &episode.available_audios, 2)
    }

    fn build(kind: TrackKind, labels: &[String], min: usize) -> Option<Self> {
        if labels.len() < min {
            return None;
        }
        Some(Self {
            kind,
            labels: labels.to_vec(),
            selected: 0,
        })
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn selected(&self) -> &str {
        &self.labels[self.selected]
    }

    /// Select by label. Returns false if it was already selected.
    pub fn select(&mut self, label: &str) -> Result<bool> {
        let index = self
            .labels
            .iter()
            .position(|l| l == label)
            .ok_or_else(|| Error::UnknownTrack {
                kind: self.kind.to_string(),
                label: label.to_string(),
            })?;
        if index == self.selected {
            return Ok(false);
        }
        self.selected = index;
        Ok(true)
    }
}
