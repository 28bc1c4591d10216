//! gesture-replay: run a recorded position stream through the gesture engine
//! and print every event as an s-expression.

use std::path::PathBuf;

use anyhow::{anyhow, Context};
use clap::Parser;
use tracing::info;

use motion_gestures::{recording, DrawnTemplate, EngineConfig, TargetId};

#[derive(Parser, Debug)]
#[command(name = "gesture-replay", about = "Replay recorded motion through the gesture engine")]
struct Cli {
    /// Recording of (:t SECONDS :target ID :pos (X Y Z)) rows
    #[arg(long)]
    recording: PathBuf,

    /// Engine configuration (default: built-in defaults, no shapes)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Capture a drawn template from the recording and write it here
    #[arg(long)]
    capture_template: Option<PathBuf>,

    /// Target to capture from (default: lowest id in the recording)
    #[arg(long)]
    capture_target: Option<u64>,

    /// Number of points in the captured template
    #[arg(long, default_value_t = 32)]
    capture_points: usize,

    /// Mark the captured template as a closed loop
    #[arg(long)]
    closed: bool,

    /// Print engine status after the replay
    #[arg(long)]
    status: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "motion_gestures=info,gesture_replay=info".into()),
        )
        .init();

    info!("gesture-replay v{} starting", env!("CARGO_PKG_VERSION"));

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let frames = recording::load(&cli.recording)?;
    let targets = recording::targets(&frames);

    let mut engine = config.build();
    for &target in &targets {
        engine.register(target);
    }
    engine.subscribe(|event| println!("{}", event.to_sexp()));

    let mut event_count = 0;
    for frame in &frames {
        event_count += engine.tick(frame.timestamp_s, &frame.positions).len();
    }
    info!(
        "Replayed {} ticks for {} targets: {} events",
        frames.len(),
        targets.len(),
        event_count
    );

    if cli.status {
        println!("{}", engine.status_sexp());
    }

    if let Some(out) = &cli.capture_template {
        let target = cli
            .capture_target
            .map(TargetId)
            .or_else(|| targets.first().copied())
            .ok_or_else(|| anyhow!("recording has no targets to capture"))?;
        let samples = recording::samples_for(&frames, target);
        let template = DrawnTemplate::capture(&samples, cli.closed, cli.capture_points)
            .with_context(|| format!("target {} trail is too degenerate to capture", target))?;
        template.save(out)?;
        info!(
            "Captured {}-point template from target {} into {}",
            template.points.len(),
            target,
            out.display()
        );
    }

    Ok(())
}
