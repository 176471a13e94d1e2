//! Quality/level negotiation
//!
//! Holds the rendition ladder announced by the transport and the index it is
//! currently delivering. The ladder is set once per session; the active index
//! moves with every switch the transport reports.

use crate::{error::Error, transport::Transport, types::RenditionLevel, Result};
use serde::Serialize;
use tracing::{debug, info};

/// What triggered a rendition switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchReason {
    /// Throughput heuristic
    Auto,
    /// Viewer selection
    Manual,
}

/// One entry of the quality menu
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualityItem {
    pub index: usize,
    pub label: String,
    /// Currently delivered rendition
    pub default: bool,
}

/// The selectable quality control
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualityMenu {
    pub items: Vec<QualityItem>,
}

impl QualityMenu {
    pub fn selected(&self) -> Option<&QualityItem> {
        self.items.iter().find(|i| i.default)
    }
}

#[derive(Debug, Default)]
pub struct LevelNegotiator {
    levels: Option<Vec<RenditionLevel>>,
    active: Option<usize>,
}

impl LevelNegotiator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the ladder. Later announcements in the same session are ignored.
    pub fn on_manifest_parsed(&mut self, levels: Vec<RenditionLevel>, current: usize) -> bool {
        if self.levels.is_some() {
            debug!("Ladder already known, ignoring repeated manifest");
            return false;
        }
        info!(levels = levels.len(), current, "Rendition ladder received");
        self.active = Some(current.min(levels.len().saturating_sub(1)));
        self.levels = Some(levels);
        true
    }

    pub fn levels(&self) -> Option<&[RenditionLevel]> {
        self.levels.as_deref()
    }

    pub fn active(&self) -> Option<usize> {
        self.active
    }

    pub fn levels_known(&self) -> bool {
        self.levels.is_some()
    }

    pub fn active_level(&self) -> Option<&RenditionLevel> {
        let active = self.active?;
        self.levels.as_ref()?.get(active)
    }

    /// Ask the transport for another rendition.
    ///
    /// Returns `Ok(false)` when `index` is already active; nothing is sent then.
    pub fn select_level(&mut self, index: usize, transport: &mut dyn Transport) -> Result<bool> {
        let levels = self.levels.as_ref().ok_or(Error::LevelsUnknown)?;
        if index >= levels.len() {
            return Err(Error::LevelOutOfRange {
                index,
                available: levels.len(),
            });
        }
        if self.active == Some(index) {
            return Ok(false);
        }

        transport.set_current_level(index)?;
        self.active = Some(index);
        info!(index, label = %levels[index].label(), "Level selected");
        Ok(true)
    }

    /// Transport switched renditions. Returns false if it changes nothing.
    pub fn on_level_switched(&mut self, index: usize) -> bool {
        let in_range = self
            .levels
            .as_ref()
            .map(|l| index < l.len())
            .unwrap_or(false);
        if !in_range || self.active == Some(index) {
            return false;
        }
        self.active = Some(index);
        true
    }

    /// The quality control, present only with two or more renditions
    pub fn menu(&self) -> Option<QualityMenu> {
        let levels = self.levels.as_ref()?;
        if levels.len() < 2 {
            return None;
        }
        Some(QualityMenu {
            items: levels
                .iter()
                .map(|l| QualityItem {
                    index: l.index,
                    label: l.label(),
                    default: l.is_current(self.active),
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingFactory, TransportCall};
    use crate::transport::{OpenOutcome, OpenRequest, TransportFactory, TransportKind};
    use crate::events::EventSink;
    use crate::surface::MemorySurface;
    use crate::types::SessionId;
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use url::Url;

    fn ladder(heights: &[u32]) -> Vec<RenditionLevel> {
        heights
            .iter()
            .enumerate()
            .map(|(index, &height)| RenditionLevel {
                index,
                height,
                bandwidth: height as u64 * 4_000,
            })
            .collect()
    }

    fn fake_transport() -> (Box<dyn Transport>, crate::testing::CallLog, SessionId) {
        let factory = RecordingFactory::new(TransportKind::Software);
        let log = factory.log();
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = SessionId::new();
        let outcome = factory
            .open(OpenRequest {
                session,
                url: Url::parse("https://cdn.example.com/master.m3u8").unwrap(),
                surface: Arc::new(MemorySurface::new()),
                sink: EventSink::new(session, tx),
                start_position: 0.0,
            })
            .unwrap();
        match outcome {
            OpenOutcome::Connected(t) => (t, log, session),
            OpenOutcome::Unsupported => panic!("fake factory refused"),
        }
    }

    #[test]
    fn test_menu_requires_two_levels() {
        let mut single = LevelNegotiator::new();
        single.on_manifest_parsed(ladder(&[720]), 0);
        assert!(single.menu().is_none());

        let mut multi = LevelNegotiator::new();
        multi.on_manifest_parsed(ladder(&[720, 360, 1080]), 1);
        let menu = multi.menu().unwrap();
        let labels: Vec<&str> = menu.items.iter().map(|i| i.label.as_str()).collect();
        assert_eq!(labels, vec!["720p", "360p", "1080p"]);
        assert_eq!(menu.selected().unwrap().index, 1);
    }

    #[test]
    fn test_select_before_ladder_known() {
        let mut negotiator = LevelNegotiator::new();
        let (mut transport, log, _) = fake_transport();
        assert!(matches!(
            negotiator.select_level(0, transport.as_mut()),
            Err(Error::LevelsUnknown)
        ));
        assert_eq!(log.count(|c| matches!(c, TransportCall::SetLevel(..))), 0);
    }

    #[test]
    fn test_select_is_idempotent() {
        let mut negotiator = LevelNegotiator::new();
        negotiator.on_manifest_parsed(ladder(&[720, 360]), 0);
        let (mut transport, log, session) = fake_transport();

        assert!(!negotiator.select_level(0, transport.as_mut()).unwrap());
        assert!(negotiator.select_level(1, transport.as_mut()).unwrap());
        assert!(!negotiator.select_level(1, transport.as_mut()).unwrap());

        let switches: Vec<TransportCall> = log
            .calls()
            .into_iter()
            .filter(|c| matches!(c, TransportCall::SetLevel(..)))
            .collect();
        assert_eq!(switches, vec![TransportCall::SetLevel(session, 1)]);
        assert_eq!(negotiator.active(), Some(1));
    }

    #[test]
    fn test_select_out_of_range() {
        let mut negotiator = LevelNegotiator::new();
        negotiator.on_manifest_parsed(ladder(&[720, 360]), 0);
        let (mut transport, _, _) = fake_transport();
        assert!(matches!(
            negotiator.select_level(5, transport.as_mut()),
            Err(Error::LevelOutOfRange { index: 5, available: 2 })
        ));
    }

    #[test]
    fn test_ladder_fixed_per_session() {
        let mut negotiator = LevelNegotiator::new();
        assert!(negotiator.on_manifest_parsed(ladder(&[720, 360]), 0));
        assert!(!negotiator.on_manifest_parsed(ladder(&[1080]), 0));
        assert_eq!(negotiator.levels().unwrap().len(), 2);

        assert!(negotiator.on_level_switched(1));
        assert!(!negotiator.on_level_switched(1));
        assert!(!negotiator.on_level_switched(9));
        assert_eq!(negotiator.active_level().unwrap().height, 360);
    }
}
