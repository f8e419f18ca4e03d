use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_DEVICE: &str = "/dev/video0";
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    device: Option<String>,
    data_dir: Option<PathBuf>,
    camera: Option<CameraConfigFile>,
    queue_capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    width: Option<u32>,
    height: Option<u32>,
}

/// Runtime configuration for the capture binary: an optional JSON file named
/// by `FRAMESEAL_CONFIG`, with environment overrides on top.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub device: String,
    pub data_dir: PathBuf,
    pub width: u32,
    pub height: u32,
    pub queue_capacity: usize,
}

impl CaptureConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("FRAMESEAL_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CaptureConfigFile) -> Self {
        Self {
            device: file.device.unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
            data_dir: file
                .data_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            width: file
                .camera
                .as_ref()
                .and_then(|camera| camera.width)
                .unwrap_or(DEFAULT_WIDTH),
            height: file
                .camera
                .as_ref()
                .and_then(|camera| camera.height)
                .unwrap_or(DEFAULT_HEIGHT),
            queue_capacity: file
                .queue_capacity
                .unwrap_or(crate::queue::DEFAULT_QUEUE_CAPACITY),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(device) = std::env::var("FRAMESEAL_DEVICE") {
            if !device.trim().is_empty() {
                self.device = device;
            }
        }
        if let Ok(dir) = std::env::var("FRAMESEAL_DATA_DIR") {
            if !dir.trim().is_empty() {
                self.data_dir = PathBuf::from(dir);
            }
        }
        if let Ok(capacity) = std::env::var("FRAMESEAL_QUEUE_CAPACITY") {
            self.queue_capacity = capacity
                .parse()
                .map_err(|_| anyhow!("FRAMESEAL_QUEUE_CAPACITY must be a positive integer"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(anyhow!("queue capacity must be greater than zero"));
        }
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!(
                "camera resolution must be non-zero, got {}x{}",
                self.width,
                self.height
            ));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<CaptureConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
