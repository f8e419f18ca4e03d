//! frameseal
//!
//! Sessioned camera capture with per-session content fingerprints.
//!
//! A session is one bounded-duration capture run. Frames are pulled from a
//! single reused camera buffer on the producer thread, appended to a
//! length-prefixed binary log by a background persistence worker, and folded
//! into one SHA-256 fingerprint over their decoded pixel content partitioned
//! into a fixed grid. Each session emits three files sharing one timestamped
//! base name: the frame log (`.ved`), the fingerprint (`.vhd`, 64 lowercase
//! hex characters), and a `key=value` metadata record (`.vmd`).
//!
//! # Module structure
//!
//! - `camera`: the device adapter (V4L2 or synthetic) and its buffer rules
//! - `queue`: the bounded producer/worker message channel
//! - `session`: the producer loop driving one session end to end
//! - `persist`: the worker that serializes frames to the log
//! - `fingerprint`: grid partitioning, hashing, and output files
//! - `config`: layered runtime configuration

pub mod camera;
pub mod config;
pub mod fingerprint;
pub mod persist;
pub mod queue;
pub mod session;

pub use camera::{pattern_jpeg, Camera, CameraConfig};
pub use config::CaptureConfig;
pub use fingerprint::{GridSpec, SessionHash, SessionMetadata};
pub use persist::{read_log, LogSummary};
pub use queue::{session_queue, Message, MessageReceiver, MessageSender, DEFAULT_QUEUE_CAPACITY};
pub use session::{run_session, SessionParams, SessionPaths, SessionSummary};
