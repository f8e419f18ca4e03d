//! Session producer loop.
//!
//! One session is one bounded-duration capture run: acquire a frame from the
//! camera, trim the reused buffer to its payload, hand a copy to the
//! persistence worker, and fold the decoded pixel grid into the session
//! fingerprint. Sessions run strictly sequentially; the worker is joined and
//! the log closed before the next session's queue exists.

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::camera::Camera;
use crate::fingerprint::{self, GridSpec, SessionHash, SessionMetadata};
use crate::persist::{self, LogSummary};
use crate::queue::{session_queue, Message, MessageSender};

/// Parameters of one capture session.
#[derive(Clone, Debug)]
pub struct SessionParams {
    pub duration: Duration,
    pub grid: GridSpec,
}

/// Where a session's three output files live.
#[derive(Clone, Debug)]
pub struct SessionPaths {
    pub video_dir: PathBuf,
    pub meta_dir: PathBuf,
    pub fingerprint_dir: PathBuf,
}

impl SessionPaths {
    pub fn under(data_dir: &Path) -> Self {
        Self {
            video_dir: data_dir.join("video"),
            meta_dir: data_dir.join("meta"),
            fingerprint_dir: data_dir.join("fingerprint"),
        }
    }

    pub fn ensure(&self) -> Result<()> {
        for dir in [&self.video_dir, &self.meta_dir, &self.fingerprint_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create output directory {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn log_path(&self, id: &str) -> PathBuf {
        self.video_dir.join(format!("{id}.{}", persist::LOG_EXTENSION))
    }

    pub fn meta_path(&self, id: &str) -> PathBuf {
        self.meta_dir.join(format!("{id}.vmd"))
    }

    pub fn fingerprint_path(&self, id: &str) -> PathBuf {
        self.fingerprint_dir.join(format!("{id}.vhd"))
    }
}

/// What one completed session produced.
#[derive(Debug)]
pub struct SessionSummary {
    pub id: String,
    pub frame_count: u64,
    pub digest: [u8; 32],
    pub elapsed: Duration,
    pub log: LogSummary,
}

/// Runs one capture session to completion.
///
/// Teardown is strictly ordered regardless of how capture ended: EndSession
/// is sent, the digest finalized, the fingerprint and metadata written (on
/// success only), and the worker joined, so the log is closed before this
/// returns. A mid-session error still drains and joins the worker.
pub fn run_session(
    camera: &mut Camera,
    params: &SessionParams,
    paths: &SessionPaths,
    queue_capacity: usize,
) -> Result<SessionSummary> {
    let id = reserve_session_id(paths)?;
    log::info!("session {id}: recording for {:?}", params.duration);

    let (sender, receiver) = session_queue(queue_capacity);
    sender.enqueue(Message::StartSession(id.clone()))?;
    let worker = persist::spawn_writer(receiver, paths.video_dir.clone())?;

    let mut hash = SessionHash::new();
    let mut frame_count = 0u64;
    let started = Instant::now();

    let capture_result = capture_frames(
        camera,
        params,
        &sender,
        &mut hash,
        &mut frame_count,
        started,
        &id,
    );

    // The worker must observe EndSession and close the log even when capture
    // failed; only then is the join below guaranteed to return.
    let end_result = sender.enqueue(Message::EndSession);
    drop(sender);

    let digest = hash.finalize();
    let elapsed = started.elapsed();

    let output_result = if capture_result.is_ok() && end_result.is_ok() {
        write_outputs(params, paths, &id, &digest, frame_count)
    } else {
        Ok(())
    };

    let worker_result = worker
        .join()
        .map_err(|_| anyhow!("persistence worker panicked"))?;

    // The worker's own error is the root cause when it died first: a dropped
    // receiver shows up producer-side as an opaque hang-up.
    let log = worker_result?;
    capture_result?;
    end_result?;
    output_result?;

    Ok(SessionSummary {
        id,
        frame_count,
        digest,
        elapsed,
        log,
    })
}

fn capture_frames(
    camera: &mut Camera,
    params: &SessionParams,
    sender: &MessageSender,
    hash: &mut SessionHash,
    frame_count: &mut u64,
    started: Instant,
    id: &str,
) -> Result<()> {
    while started.elapsed() < params.duration {
        let view = camera.acquire_frame()?;
        let len = payload_len(view);
        if len == 0 {
            // The driver produced no data this cycle.
            continue;
        }

        let mut payload = Vec::new();
        payload
            .try_reserve_exact(len)
            .with_context(|| format!("allocate {len} byte frame payload"))?;
        payload.extend_from_slice(&view[..len]);

        // Decode before enqueueing: a frame that cannot be decoded is dropped
        // everywhere at once (log, count, and hash).
        let frame = match fingerprint::decode_frame(&payload) {
            Ok(frame) => frame,
            Err(err) => {
                log::debug!("session {id}: dropping undecodable frame: {err:#}");
                continue;
            }
        };

        sender.enqueue(Message::FrameData(payload))?;
        fingerprint::hash_cells(hash, &frame, &params.grid);
        *frame_count += 1;
    }
    Ok(())
}

fn write_outputs(
    params: &SessionParams,
    paths: &SessionPaths,
    id: &str,
    digest: &[u8; 32],
    frame_count: u64,
) -> Result<()> {
    fingerprint::write_fingerprint(&paths.fingerprint_path(id), digest)?;
    SessionMetadata {
        video_time: params.duration.as_secs(),
        row: params.grid.rows,
        column: params.grid.cols,
        scale: params.grid.scale,
        frame_count,
    }
    .write_to(&paths.meta_path(id))
}

/// Payload length inside the reused capture buffer: the region past the
/// encoded frame is zero, so the payload ends at the last non-zero byte.
fn payload_len(view: &[u8]) -> usize {
    view.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1)
}

/// Session id from local time at second resolution, disambiguated so that two
/// sessions starting within the same second never overwrite each other.
fn reserve_session_id(paths: &SessionPaths) -> Result<String> {
    let base = Local::now().format("%Y-%m-%d_%H:%M:%S").to_string();
    if !session_exists(paths, &base) {
        return Ok(base);
    }
    (2..u32::MAX)
        .map(|n| format!("{base}_{n}"))
        .find(|id| !session_exists(paths, id))
        .ok_or_else(|| anyhow!("no free session id for {base}"))
}

fn session_exists(paths: &SessionPaths, id: &str) -> bool {
    paths.log_path(id).exists()
        || paths.meta_path(id).exists()
        || paths.fingerprint_path(id).exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_len_trims_trailing_zeros_only() {
        assert_eq!(payload_len(&[]), 0);
        assert_eq!(payload_len(&[0, 0, 0]), 0);
        assert_eq!(payload_len(&[1, 0, 2, 0, 0]), 3);
        assert_eq!(payload_len(&[0, 0, 7]), 3);
    }

    #[test]
    fn session_ids_disambiguate_within_one_second() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let paths = SessionPaths::under(dir.path());
        paths.ensure()?;

        let first = reserve_session_id(&paths)?;
        std::fs::write(paths.log_path(&first), b"")?;
        let second = reserve_session_id(&paths)?;
        assert_ne!(first, second);
        std::fs::write(paths.fingerprint_path(&second), b"")?;
        let third = reserve_session_id(&paths)?;
        assert_ne!(third, second);
        assert_ne!(third, first);
        Ok(())
    }
}
