//! Output formatting for CLI

use chrono::Local;
use hikari_core::{ControllerEvent, RecoveryState};
use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
    Table,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "table" => OutputFormat::Table,
            _ => OutputFormat::Text,
        }
    }
}

/// One rendition row of `inspect`
#[derive(Debug, Serialize, Tabled)]
pub struct LadderRow {
    #[tabled(rename = "#")]
    pub index: usize,
    pub label: String,
    pub bandwidth: u64,
    pub resolution: String,
    pub codecs: String,
}

/// Result of `inspect`
#[derive(Debug, Serialize)]
pub struct LadderReport {
    pub url: String,
    pub kind: String,
    pub quality_menu: bool,
    pub levels: Vec<LadderRow>,
}

pub fn print_report(report: &LadderReport, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Table => {
            println!("{} ({})", report.url, report.kind);
            println!("{}", Table::new(&report.levels));
            println!("Quality menu: {}", if report.quality_menu { "shown" } else { "hidden" });
        }
        OutputFormat::Text => {
            println!("Manifest: {}", report.url);
            println!("  Type: {}", report.kind);
            println!("  Renditions: {}", report.levels.len());
            println!("  Quality menu: {}", if report.quality_menu { "shown" } else { "hidden" });
            println!("\nRenditions:");
            for row in &report.levels {
                println!(
                    "  {}. {} - {}bps {} {}",
                    row.index, row.label, row.bandwidth, row.resolution, row.codecs
                );
            }
        }
    }
    Ok(())
}

/// Print a controller event as it happens
pub fn print_event(event: &ControllerEvent, format: OutputFormat) {
    if format == OutputFormat::Json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => eprintln!("unserializable event: {}", e),
        }
        return;
    }

    let stamp = Local::now().format("%H:%M:%S%.3f");
    println!("[{}] {}", stamp, describe(event));
}

fn describe(event: &ControllerEvent) -> String {
    match event {
        ControllerEvent::SessionStarted { session, episode_id, transport } => {
            format!("session {} started: {} via {} transport", session, episode_id, transport)
        }
        ControllerEvent::SessionEnded { session, episode_id } => {
            format!("session {} ended: {}", session, episode_id)
        }
        ControllerEvent::QualityMenuChanged { menu: Some(menu) } => {
            let labels: Vec<String> = menu
                .items
                .iter()
                .map(|i| {
                    if i.default {
                        format!("[{}]", i.label)
                    } else {
                        i.label.clone()
                    }
                })
                .collect();
            format!("quality: {}", labels.join(" "))
        }
        ControllerEvent::QualityMenuChanged { menu: None } => "quality: single rendition".to_string(),
        ControllerEvent::LevelSwitched { index, label, reason } => {
            format!("level {} ({}) selected, {:?}", index, label, reason)
        }
        ControllerEvent::TrackSelected { kind, label } => format!("{} track: {}", kind, label),
        ControllerEvent::ViewThresholdCrossed { episode_id } => format!("view counted for {}", episode_id),
        ControllerEvent::RecoveryStateChanged { state } => match state {
            RecoveryState::Healthy => "recovered".to_string(),
            RecoveryState::Degraded(kind) => format!("degraded ({})", kind),
            RecoveryState::Recovering(kind) => format!("recovering from {} fault", kind),
            RecoveryState::Terminal => "playback failed".to_string(),
        },
        ControllerEvent::FatalError { kind, detail } => format!("FATAL {}: {}", kind, detail),
        ControllerEvent::NavigationRequested { direction } => format!("navigate {:?}", direction),
    }
}
