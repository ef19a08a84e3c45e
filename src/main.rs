use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use pose_anchor::config::Config;
use pose_anchor::geometry::WorldPose;
use pose_anchor::inference::InferencePipeline;
use pose_anchor::sim::{ScriptedAnalyzer, SimulatedSession};
use pose_anchor::{Anchor, ArRenderer, EngineError, LabelSink};

const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Anchor pose-landmark labels in a simulated AR session
#[derive(Parser, Debug)]
#[command(name = "pose-anchor", version = env!("GIT_VERSION"))]
struct Args {
    /// Path to the TOML config
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Number of frames to run (overrides simulation.frames)
    #[arg(short, long)]
    frames: Option<u32>,

    /// Scan once instead of continuously
    #[arg(long)]
    single_scan: bool,
}

/// 描画の代わりにラベル位置をログに出す
struct TraceSink;

impl LabelSink for TraceSink {
    fn draw_label(&mut self, label: &str, anchor_pose: &WorldPose, camera_pose: &WorldPose) {
        debug!(
            label,
            position = ?anchor_pose.position,
            distance = anchor_pose.distance_to(camera_pose),
            "draw label"
        );
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = Config::load_or_default(&args.config)?;
    if args.single_scan {
        config.scan.continuous = false;
    }
    if let Some(path) = pose_anchor::logging::init(&config.logging)? {
        info!("Log: {}", path.display());
    }

    let sim = &config.simulation;
    let frames = args.frames.unwrap_or(sim.frames);
    info!(version = env!("GIT_VERSION"), frames, "pose-anchor simulation");
    info!(
        image = %format!("{}x{}", sim.image_width, sim.image_height),
        view = %format!("{}x{}", sim.view_width, sim.view_height),
        display_rotation = sim.display_rotation,
        continuous = config.scan.continuous,
        "session configured"
    );

    let session = SimulatedSession::new(sim)?;
    let analyzer = ScriptedAnalyzer::standing_person(
        sim.image_width,
        sim.image_height,
        Duration::from_millis(sim.inference_latency_ms),
    );
    let pipeline = InferencePipeline::spawn(analyzer)?;
    let mut renderer = ArRenderer::new(session, pipeline, &config);
    let mut sink = TraceSink;

    let mut batches = 0u32;
    for _ in 0..frames {
        match renderer.draw_frame(&mut sink) {
            Ok(report) => {
                if report.published.is_some() {
                    batches += 1;
                }
                if let Some(notice) = report.notice {
                    warn!("{}", notice);
                }
            }
            // エンジンのエラーはセッションにとって致命的
            Err(e) if e.downcast_ref::<EngineError>().is_some() => return Err(e),
            Err(e) => warn!("{:#}; retrying next frame", e),
        }
        thread::sleep(FRAME_INTERVAL);
    }

    let batch = renderer.anchors().snapshot();
    info!(
        frames = renderer.session().frame_index(),
        batches,
        version = batch.version(),
        anchors = batch.len(),
        "simulation finished"
    );
    for entry in batch.entries() {
        let pose = entry.anchor.pose();
        info!(
            "{:<16} [{:>6.2}, {:>6.2}, {:>6.2}] {:?}",
            entry.label,
            pose.position[0],
            pose.position[1],
            pose.position[2],
            entry.anchor.tracking_state()
        );
    }

    Ok(())
}
