//! log_verify - external verifier for session frame logs
//!
//! Replays every record of a session's frame log through the same grid hash
//! the capture session used and compares the result against the stored
//! fingerprint. Proves three things without trusting the capture runtime:
//! the log framing is intact, the record count matches the metadata, and the
//! logged frames reproduce the fingerprint bit for bit.

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;

use frameseal::fingerprint::{fingerprint_frame, SessionHash};
use frameseal::{read_log, GridSpec, SessionMetadata, SessionPaths};

#[derive(Parser, Debug)]
#[command(
    name = "log_verify",
    about = "Verify a session's frame log against its stored fingerprint"
)]
struct Args {
    /// Session base name (e.g. 2026-08-24_10:15:42)
    session: String,

    /// Data directory root
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Per-record output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let paths = SessionPaths::under(&args.data_dir);

    let meta = SessionMetadata::load(&paths.meta_path(&args.session))?;
    let grid = GridSpec::new(meta.row, meta.column, meta.scale)?;

    let log_path = paths.log_path(&args.session);
    let records = read_log(&log_path)?;
    println!(
        "log_verify: {} ({} records, grid {}x{}, scale {})",
        log_path.display(),
        records.len(),
        meta.row,
        meta.column,
        meta.scale
    );

    if records.len() as u64 != meta.frame_count {
        bail!(
            "frame count mismatch: log has {} records, metadata says {}",
            records.len(),
            meta.frame_count
        );
    }

    let mut hash = SessionHash::new();
    for (i, payload) in records.iter().enumerate() {
        fingerprint_frame(&mut hash, payload, &grid)
            .with_context(|| format!("record {i} of {}", records.len()))?;
        if args.verbose {
            println!("  record {i}: {} bytes OK", payload.len());
        }
    }
    let digest = hex::encode(hash.finalize());

    let fingerprint_path = paths.fingerprint_path(&args.session);
    let stored = std::fs::read_to_string(&fingerprint_path)
        .with_context(|| format!("read fingerprint {}", fingerprint_path.display()))?;
    let stored = stored.trim();

    if digest != stored {
        return Err(anyhow!(
            "fingerprint mismatch: recomputed {digest}, stored {stored}"
        ));
    }
    println!("OK: fingerprint matches ({digest})");
    Ok(())
}
