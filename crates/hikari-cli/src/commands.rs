//! CLI command implementations

use crate::output::{self, LadderReport, LadderRow, OutputFormat};
use hikari_core::{
    manifest::load_manifest, EpisodeDescriptor, HttpFetcher, KeyboardHub, LevelNegotiator,
    MediaSurface, MemorySurface, PlaybackController, PlayerConfig, RecoveryState,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

/// Show the rendition ladder and whether a quality menu would appear
pub async fn inspect(manifest_url: &str, config: &PlayerConfig, format: &str) -> anyhow::Result<()> {
    let url = Url::parse(manifest_url)?;
    let fetcher = HttpFetcher::new(config.transport.request_timeout())?;
    let manifest = load_manifest(&fetcher, &url).await?;

    let mut negotiator = LevelNegotiator::new();
    negotiator.on_manifest_parsed(manifest.levels(), config.transport.start_level.unwrap_or(0));

    let levels = manifest
        .variants
        .iter()
        .map(|v| LadderRow {
            index: v.index,
            label: v
                .resolution
                .map(|r| format!("{}p", r.height))
                .unwrap_or_else(|| "-".to_string()),
            bandwidth: v.bandwidth,
            resolution: v.resolution.map(|r| r.to_string()).unwrap_or_default(),
            codecs: v.codecs.clone().unwrap_or_default(),
        })
        .collect();

    let report = LadderReport {
        url: url.to_string(),
        kind: format!("{:?}", manifest.kind),
        quality_menu: negotiator.menu().is_some(),
        levels,
    };
    output::print_report(&report, OutputFormat::from(format))
}

pub struct PlayOptions {
    pub episode_id: String,
    pub title: String,
    pub number: u32,
    pub seconds: f64,
    pub speed: f64,
    pub level: Option<usize>,
}

/// Drive one playback session on a headless surface
pub async fn play(
    manifest_url: &str,
    options: PlayOptions,
    config: PlayerConfig,
    format: &str,
) -> anyhow::Result<()> {
    let format = OutputFormat::from(format);
    let surface = Arc::new(MemorySurface::new());
    let mut controller = PlaybackController::from_config(config, surface.clone(), KeyboardHub::new())?;
    controller.subscribe(move |event| output::print_event(event, format));

    let episode = EpisodeDescriptor::new(
        options.episode_id,
        options.title,
        options.number,
        manifest_url,
    );
    controller.bind(episode)?;
    if let Some(overlay) = controller.overlay() {
        info!("{}", overlay.text());
    }
    surface.play();

    let tick = Duration::from_millis(250);
    let step = tick.as_secs_f64() * options.speed.max(0.1);
    let mut interval = tokio::time::interval(tick);
    let mut pending_level = options.level;
    let mut clock = 0.0;

    while clock < options.seconds {
        let ticked = tokio::select! {
            _ = interval.tick() => true,
            _ = controller.recv_event() => false,
        };

        if ticked {
            clock += step;
            let position = surface.advance(step);
            if let Some(sink) = controller.event_sink() {
                sink.time_update(position);
            }
            if surface.duration().map(|d| position >= d).unwrap_or(false) {
                info!(position, "Reached end of stream");
                break;
            }
        }

        if let Some(level) = pending_level {
            if controller.levels().is_some() {
                if let Err(e) = controller.select_level(level) {
                    warn!(level, error = %e, "Level selection rejected");
                }
                pending_level = None;
            }
        }

        if controller.recovery_state() == Some(RecoveryState::Terminal) {
            break;
        }
    }
    controller.process_pending();

    let failed = controller.recovery_state() == Some(RecoveryState::Terminal);
    println!(
        "\nStopped at {:.1}s, buffered to {:.1}s, level {}",
        surface.current_time(),
        surface.buffered_end(),
        controller
            .active_level()
            .map(|l| l.to_string())
            .unwrap_or_else(|| "-".to_string()),
    );
    controller.release();

    if failed {
        anyhow::bail!("playback failed");
    }
    Ok(())
}
