//! Camera device adapter.
//!
//! Owns the capture handle and its single memory-mapped buffer. Two backends:
//!
//! - `stub://` paths select a synthetic camera that serves pre-encoded JPEG
//!   frames from memory (used by tests and demos, no hardware required).
//! - Real device paths select a V4L2 backend (feature `camera-v4l2`) that
//!   negotiates MJPG at the requested resolution with exactly one mmap buffer.
//!
//! Both backends hand out a borrowed view into one reused buffer. The view is
//! valid only until the next `acquire_frame` call; the caller must copy out
//! any bytes it needs before acquiring again. The borrow checker enforces
//! this: the view holds the adapter's `&mut` borrow.
//!
//! Adapter methods return errors rather than exiting; the capture binary is
//! the one that decides camera faults are fatal.

use anyhow::{Context, Result};
use image::{ImageFormat, RgbImage};
use std::io::Cursor;
use std::time::Duration;

#[cfg(feature = "camera-v4l2")]
use anyhow::anyhow;

/// Bounded wait for the driver to fill a buffer. Exceeding it is an error.
#[cfg(feature = "camera-v4l2")]
const FRAME_WAIT: Duration = Duration::from_secs(2);

/// Pacing delay for the synthetic backend, roughly 100 fps.
const STUB_FRAME_INTERVAL: Duration = Duration::from_millis(2);

/// Capacity of the synthetic backend's reused buffer.
const STUB_BUFFER_CAPACITY: usize = 256 * 1024;

/// Configuration for opening a camera.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Device path (e.g. "/dev/video0"), or "stub://..." for the synthetic
    /// backend.
    pub device: String,
    pub width: u32,
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
        }
    }
}

/// Camera capture handle.
pub struct Camera {
    backend: CameraBackend,
}

enum CameraBackend {
    Stub(StubCamera),
    #[cfg(feature = "camera-v4l2")]
    Device(DeviceCamera),
}

impl Camera {
    /// Opens the device, negotiates the capture format, and starts streaming.
    pub fn open(config: CameraConfig) -> Result<Self> {
        if config.device.starts_with("stub://") {
            return Ok(Self {
                backend: CameraBackend::Stub(StubCamera::endless(&config)),
            });
        }

        #[cfg(feature = "camera-v4l2")]
        {
            Ok(Self {
                backend: CameraBackend::Device(DeviceCamera::open(config)?),
            })
        }
        #[cfg(not(feature = "camera-v4l2"))]
        {
            anyhow::bail!(
                "device {} requires the camera-v4l2 feature (only stub:// sources are built in)",
                config.device
            )
        }
    }

    /// A synthetic camera that serves the given frames in order, then
    /// all-zero buffers once they are exhausted.
    pub fn stub_with_frames(frames: Vec<Vec<u8>>) -> Self {
        Self {
            backend: CameraBackend::Stub(StubCamera::with_frames(frames)),
        }
    }

    /// Blocks until the driver fills the buffer, then returns a view into it.
    ///
    /// The view is invalidated by the next call; the buffer is reused and
    /// overwritten in place.
    pub fn acquire_frame(&mut self) -> Result<&[u8]> {
        match &mut self.backend {
            CameraBackend::Stub(camera) => camera.acquire_frame(),
            #[cfg(feature = "camera-v4l2")]
            CameraBackend::Device(camera) => camera.acquire_frame(),
        }
    }

    /// Stops streaming and releases the device.
    pub fn close(self) -> Result<()> {
        match self.backend {
            CameraBackend::Stub(_) => Ok(()),
            #[cfg(feature = "camera-v4l2")]
            CameraBackend::Device(camera) => camera.close(),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic backend (stub://)
// ----------------------------------------------------------------------------

struct StubCamera {
    frames: StubFrames,
    /// The single reused buffer, zero-padded past each payload.
    buffer: Vec<u8>,
    index: u64,
}

enum StubFrames {
    /// Endless distinct pattern frames at a fixed resolution.
    Endless { width: u32, height: u32 },
    /// A fixed frame list; all-zero buffers after exhaustion.
    Fixed(Vec<Vec<u8>>),
}

impl StubCamera {
    fn endless(config: &CameraConfig) -> Self {
        log::info!(
            "camera: opened {} (synthetic, {}x{})",
            config.device,
            config.width,
            config.height
        );
        Self {
            frames: StubFrames::Endless {
                width: config.width,
                height: config.height,
            },
            buffer: vec![0u8; STUB_BUFFER_CAPACITY],
            index: 0,
        }
    }

    fn with_frames(frames: Vec<Vec<u8>>) -> Self {
        let capacity = frames
            .iter()
            .map(Vec::len)
            .max()
            .unwrap_or(0)
            .max(STUB_BUFFER_CAPACITY);
        Self {
            frames: StubFrames::Fixed(frames),
            buffer: vec![0u8; capacity],
            index: 0,
        }
    }

    fn acquire_frame(&mut self) -> Result<&[u8]> {
        std::thread::sleep(STUB_FRAME_INTERVAL);

        let payload = match &self.frames {
            StubFrames::Endless { width, height } => {
                Some(pattern_jpeg(*width, *height, self.index)?)
            }
            StubFrames::Fixed(frames) => frames.get(self.index as usize).cloned(),
        };
        self.index += 1;

        self.buffer.fill(0);
        if let Some(payload) = payload {
            self.buffer[..payload.len()].copy_from_slice(&payload);
        }
        Ok(&self.buffer)
    }
}

/// Encodes a distinct JPEG test pattern for frame `seed`.
pub fn pattern_jpeg(width: u32, height: u32, seed: u64) -> Result<Vec<u8>> {
    let s = seed as u8;
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([
            s.wrapping_add(x as u8),
            s.wrapping_mul(31).wrapping_add(y as u8),
            ((x + y) % 256) as u8,
        ])
    });
    let mut jpeg = Vec::new();
    img.write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
        .context("encode pattern frame")?;
    Ok(jpeg)
}

// ----------------------------------------------------------------------------
// V4L2 backend
// ----------------------------------------------------------------------------

#[cfg(feature = "camera-v4l2")]
struct DeviceCamera {
    device_path: String,
    fd: std::os::fd::RawFd,
    state: DeviceState,
    frame_count: u64,
}

#[cfg(feature = "camera-v4l2")]
#[ouroboros::self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

#[cfg(feature = "camera-v4l2")]
impl DeviceCamera {
    fn open(config: CameraConfig) -> Result<Self> {
        use std::os::fd::AsRawFd;
        use v4l::buffer::Type;
        use v4l::io::traits::Stream;
        use v4l::video::Capture;

        let device = v4l::Device::with_path(&config.device)
            .with_context(|| format!("open camera device {}", config.device))?;
        let fd = device.as_raw_fd();

        let mut format = device.format().context("read capture format")?;
        format.width = config.width;
        format.height = config.height;
        format.fourcc = v4l::FourCC::new(b"MJPG");
        let format = device
            .set_format(&format)
            .with_context(|| format!("negotiate MJPG on {}", config.device))?;
        if format.fourcc != v4l::FourCC::new(b"MJPG") {
            return Err(anyhow!(
                "device {} does not support MJPG capture (driver offered {})",
                config.device,
                format.fourcc
            ));
        }

        // Exactly one buffer: the caller copies payloads out before the next
        // acquire re-queues it.
        let mut state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 1)
                    .map_err(|err| anyhow::Error::new(err).context("request capture buffer"))
            },
        }
        .try_build()?;

        state
            .with_stream_mut(|stream| stream.start())
            .context("start streaming")?;

        log::info!(
            "camera: opened {} ({}x{}, MJPG)",
            config.device,
            format.width,
            format.height
        );

        Ok(Self {
            device_path: config.device,
            fd,
            state,
            frame_count: 0,
        })
    }

    /// Waits for the driver to signal readiness, bounded by `FRAME_WAIT`.
    fn wait_ready(&self) -> Result<()> {
        let mut pfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let rc = unsafe { libc::poll(&mut pfd, 1, FRAME_WAIT.as_millis() as i32) };
        if rc < 0 {
            return Err(std::io::Error::last_os_error())
                .with_context(|| format!("wait for frame on {}", self.device_path));
        }
        if rc == 0 {
            return Err(anyhow!(
                "timed out waiting for frame on {} after {:?}",
                self.device_path,
                FRAME_WAIT
            ));
        }
        Ok(())
    }

    fn acquire_frame(&mut self) -> Result<&[u8]> {
        use v4l::io::traits::CaptureStream;

        self.wait_ready()?;
        let (buf, meta) = self
            .state
            .with_mut(|fields| fields.stream.next())
            .with_context(|| format!("dequeue buffer from {}", self.device_path))?;
        self.frame_count += 1;

        let used = (meta.bytesused as usize).min(buf.len());
        Ok(&buf[..used])
    }

    fn close(mut self) -> Result<()> {
        use v4l::io::traits::Stream;

        self.state
            .with_stream_mut(|stream| stream.stop())
            .with_context(|| format!("stop streaming on {}", self.device_path))?;
        log::info!(
            "camera: closed {} after {} frames",
            self.device_path,
            self.frame_count
        );
        Ok(())
    }
}
