//! Persistence worker: drains the session queue and writes the frame log.
//!
//! Log format: a bare sequence of records, each a 4-byte big-endian payload
//! length followed by that many payload bytes. No header, no trailer, no
//! stored record count; the sequence ends at end of file.
//!
//! The worker owns the output stream for exactly one session. StartSession
//! names and opens the log, FrameData appends one record, EndSession closes
//! the log and terminates the thread. The producer guarantees that ordering
//! structurally; a violation here is a bug and is reported as an error.

use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use crate::queue::{Message, MessageReceiver};

pub const LOG_EXTENSION: &str = "ved";

/// What the worker wrote, reported back through its join handle.
#[derive(Debug)]
pub struct LogSummary {
    pub path: PathBuf,
    pub frames: u64,
    pub bytes: u64,
}

/// Spawns the persistence worker for one session.
///
/// An I/O failure makes the worker return an error, which also drops the
/// receiver; the producer's next enqueue then fails and the session aborts.
pub fn spawn_writer(
    receiver: MessageReceiver,
    video_dir: PathBuf,
) -> Result<JoinHandle<Result<LogSummary>>> {
    thread::Builder::new()
        .name("frame-writer".to_string())
        .spawn(move || write_log(receiver, &video_dir))
        .context("spawn persistence worker")
}

fn write_log(receiver: MessageReceiver, video_dir: &Path) -> Result<LogSummary> {
    let id = match receiver.dequeue()? {
        Message::StartSession(id) => id,
        other => bail!("expected StartSession, got {}", other.kind()),
    };

    let path = video_dir.join(format!("{id}.{LOG_EXTENSION}"));
    // No buffering layer: every record reaches the OS before the next
    // dequeue, so a crashed session leaves only whole records behind.
    let mut file =
        File::create(&path).with_context(|| format!("open frame log {}", path.display()))?;
    log::debug!("worker: recording to {}", path.display());

    let mut frames = 0u64;
    let mut bytes = 0u64;
    loop {
        match receiver.dequeue()? {
            Message::StartSession(other) => {
                bail!("unexpected StartSession({other}) while recording {id}")
            }
            Message::FrameData(payload) => {
                let len = u32::try_from(payload.len()).with_context(|| {
                    format!("frame payload of {} bytes exceeds record limit", payload.len())
                })?;
                file.write_all(&len.to_be_bytes())
                    .and_then(|()| file.write_all(&payload))
                    .with_context(|| format!("append record to {}", path.display()))?;
                frames += 1;
                bytes += 4 + payload.len() as u64;
            }
            Message::EndSession => break,
        }
    }

    file.sync_all()
        .with_context(|| format!("flush frame log {}", path.display()))?;
    Ok(LogSummary { path, frames, bytes })
}

/// Parses a frame log back into its payload sequence.
pub fn read_log(path: &Path) -> Result<Vec<Vec<u8>>> {
    let data =
        std::fs::read(path).with_context(|| format!("read frame log {}", path.display()))?;

    let mut records = Vec::new();
    let mut rest = data.as_slice();
    while !rest.is_empty() {
        if rest.len() < 4 {
            bail!("truncated record header in {}", path.display());
        }
        let len = u32::from_be_bytes(rest[..4].try_into()?) as usize;
        rest = &rest[4..];
        if rest.len() < len {
            bail!(
                "truncated record payload in {} (need {len}, have {})",
                path.display(),
                rest.len()
            );
        }
        records.push(rest[..len].to_vec());
        rest = &rest[len..];
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{session_queue, DEFAULT_QUEUE_CAPACITY};

    #[test]
    fn log_round_trips_sent_payloads_in_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (tx, rx) = session_queue(DEFAULT_QUEUE_CAPACITY);
        let worker = spawn_writer(rx, dir.path().to_path_buf())?;

        let payloads: Vec<Vec<u8>> = (0..5u8).map(|i| vec![i; (i as usize + 1) * 10]).collect();
        tx.enqueue(Message::StartSession("s1".to_string()))?;
        for payload in &payloads {
            tx.enqueue(Message::FrameData(payload.clone()))?;
        }
        tx.enqueue(Message::EndSession)?;

        let summary = worker.join().expect("worker thread")?;
        assert_eq!(summary.frames, 5);
        assert_eq!(summary.path, dir.path().join("s1.ved"));

        let records = read_log(&summary.path)?;
        assert_eq!(records, payloads);

        // File size is exactly the sum of (4 + length) over all records.
        let expected: u64 = payloads.iter().map(|p| 4 + p.len() as u64).sum();
        assert_eq!(std::fs::metadata(&summary.path)?.len(), expected);
        assert_eq!(summary.bytes, expected);
        Ok(())
    }

    #[test]
    fn empty_session_leaves_an_empty_log() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (tx, rx) = session_queue(DEFAULT_QUEUE_CAPACITY);
        let worker = spawn_writer(rx, dir.path().to_path_buf())?;

        tx.enqueue(Message::StartSession("empty".to_string()))?;
        tx.enqueue(Message::EndSession)?;

        let summary = worker.join().expect("worker thread")?;
        assert_eq!(summary.frames, 0);
        assert_eq!(std::fs::metadata(&summary.path)?.len(), 0);
        assert!(read_log(&summary.path)?.is_empty());
        Ok(())
    }

    #[test]
    fn worker_rejects_frame_before_start() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (tx, rx) = session_queue(DEFAULT_QUEUE_CAPACITY);
        let worker = spawn_writer(rx, dir.path().to_path_buf())?;

        tx.enqueue(Message::FrameData(vec![1, 2, 3]))?;
        let result = worker.join().expect("worker thread");
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn read_log_rejects_truncated_records() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("bad.ved");
        std::fs::write(&path, [0u8, 0, 0, 9, 1, 2])?;
        assert!(read_log(&path).is_err());

        std::fs::write(&path, [0u8, 0])?;
        assert!(read_log(&path).is_err());
        Ok(())
    }
}
