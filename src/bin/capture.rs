//! capture - record fixed-duration camera sessions
//!
//! Each session writes three files under the data directory, sharing a
//! timestamped base name:
//! - `video/<id>.ved`: length-prefixed MJPEG frame log
//! - `fingerprint/<id>.vhd`: SHA-256 content fingerprint (64 hex chars)
//! - `meta/<id>.vmd`: session parameters and final frame count
//!
//! Camera and driver faults are fatal here: hardware misconfiguration must
//! be operator-visible, not masked by retries.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use frameseal::{
    run_session, Camera, CameraConfig, CaptureConfig, GridSpec, SessionParams, SessionPaths,
};

#[derive(Parser, Debug)]
#[command(
    name = "capture",
    about = "Record fixed-duration camera sessions with content fingerprints"
)]
struct Args {
    /// Session length in seconds
    video_time: u64,

    /// Fingerprint grid rows
    row: u32,

    /// Fingerprint grid columns
    column: u32,

    /// Downsample scale in (0, 1]
    scale: f64,

    /// Number of back-to-back sessions to record
    #[arg(long, default_value_t = 1)]
    sessions: u32,

    /// Camera device path (use stub:// for the synthetic camera)
    #[arg(long)]
    device: Option<String>,

    /// Output directory root
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.video_time == 0 {
        bail!("video_time must be at least 1 second");
    }
    let grid = GridSpec::new(args.row, args.column, args.scale)?;

    let mut cfg = CaptureConfig::load()?;
    if let Some(device) = args.device {
        cfg.device = device;
    }
    if let Some(data_dir) = args.data_dir {
        cfg.data_dir = data_dir;
    }

    let params = SessionParams {
        duration: Duration::from_secs(args.video_time),
        grid,
    };
    let paths = SessionPaths::under(&cfg.data_dir);
    paths.ensure()?;

    log::info!(
        "capture: video_time={}s row={} column={} scale={} device={}",
        args.video_time,
        args.row,
        args.column,
        args.scale,
        cfg.device
    );

    let mut camera = Camera::open(CameraConfig {
        device: cfg.device.clone(),
        width: cfg.width,
        height: cfg.height,
    })?;

    for n in 1..=args.sessions {
        let summary = run_session(&mut camera, &params, &paths, cfg.queue_capacity)
            .with_context(|| format!("session {n} of {}", args.sessions))?;

        let elapsed_s = summary.elapsed.as_secs_f64();
        log::info!(
            "session {}: {} frames in {:.2}s ({:.1} fps), {} bytes logged, digest {}",
            summary.id,
            summary.frame_count,
            elapsed_s,
            summary.frame_count as f64 / elapsed_s.max(f64::EPSILON),
            summary.log.bytes,
            hex::encode(summary.digest)
        );
    }

    camera.close()?;
    Ok(())
}
