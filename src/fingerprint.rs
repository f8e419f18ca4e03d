//! Session fingerprint and per-session output files.
//!
//! Every accepted frame is decoded to RGB, partitioned into an R x C grid
//! with floor-division cell bounds, and each cell is nearest-neighbor
//! downsampled by the session scale. The downsampled cell bytes feed a single
//! SHA-256 accumulator in row-major cell order, identically for every frame,
//! so a session's digest is a deterministic function of the ordered cell-byte
//! sequence and nothing else.

use anyhow::{anyhow, bail, Context, Result};
use image::{ImageFormat, RgbImage};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Spatial partitioning parameters for one session.
#[derive(Clone, Copy, Debug)]
pub struct GridSpec {
    pub rows: u32,
    pub cols: u32,
    /// Downsample scale in (0, 1]. 1.0 hashes cells at full resolution.
    pub scale: f64,
}

impl GridSpec {
    pub fn new(rows: u32, cols: u32, scale: f64) -> Result<Self> {
        if rows == 0 {
            bail!("grid rows must be at least 1");
        }
        if cols == 0 {
            bail!("grid columns must be at least 1");
        }
        if !(scale > 0.0 && scale <= 1.0) {
            bail!("downsample scale must be in (0, 1], got {scale}");
        }
        Ok(Self { rows, cols, scale })
    }
}

/// Running fingerprint accumulator for one session.
///
/// Finalizing with no updates yields the digest of the empty byte sequence,
/// so a session with zero accepted frames still produces a valid fingerprint.
pub struct SessionHash {
    hasher: Sha256,
}

impl SessionHash {
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    pub fn finalize(self) -> [u8; 32] {
        self.hasher.finalize().into()
    }
}

impl Default for SessionHash {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounding box `(x1, y1, x2, y2)` of cell `(r, c)`, half-open on both axes.
///
/// Floor division puts the rounding remainder in the last row and column, so
/// the R x C boxes tile `[0, width) x [0, height)` exactly.
pub fn cell_bounds(width: u32, height: u32, rows: u32, cols: u32, r: u32, c: u32) -> (u32, u32, u32, u32) {
    let x1 = (width as u64 * c as u64 / cols as u64) as u32;
    let x2 = (width as u64 * (c as u64 + 1) / cols as u64) as u32;
    let y1 = (height as u64 * r as u64 / rows as u64) as u32;
    let y2 = (height as u64 * (r as u64 + 1) / rows as u64) as u32;
    (x1, y1, x2, y2)
}

/// Nearest-neighbor downsample of one cell, returned as packed RGB rows.
fn downsample(frame: &RgbImage, x1: u32, y1: u32, x2: u32, y2: u32, scale: f64) -> Vec<u8> {
    let cell_w = x2 - x1;
    let cell_h = y2 - y1;
    if cell_w == 0 || cell_h == 0 {
        return Vec::new();
    }

    let out_w = ((cell_w as f64 * scale).round() as u32).max(1);
    let out_h = ((cell_h as f64 * scale).round() as u32).max(1);

    let mut out = Vec::with_capacity((out_w * out_h * 3) as usize);
    for oy in 0..out_h {
        let sy = y1 + ((oy as f64 / scale) as u32).min(cell_h - 1);
        for ox in 0..out_w {
            let sx = x1 + ((ox as f64 / scale) as u32).min(cell_w - 1);
            out.extend_from_slice(&frame.get_pixel(sx, sy).0);
        }
    }
    out
}

/// Decodes one MJPEG payload into an RGB pixel grid.
pub fn decode_frame(jpeg: &[u8]) -> Result<RgbImage> {
    let decoded =
        image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg).context("decode MJPEG frame")?;
    Ok(decoded.to_rgb8())
}

/// Feeds every cell of a decoded frame into the session hash, row-major.
pub fn hash_cells(hash: &mut SessionHash, frame: &RgbImage, grid: &GridSpec) {
    let (width, height) = frame.dimensions();
    for r in 0..grid.rows {
        for c in 0..grid.cols {
            let (x1, y1, x2, y2) = cell_bounds(width, height, grid.rows, grid.cols, r, c);
            hash.update(&downsample(frame, x1, y1, x2, y2, grid.scale));
        }
    }
}

/// Decode, partition, and hash one frame payload.
pub fn fingerprint_frame(hash: &mut SessionHash, jpeg: &[u8], grid: &GridSpec) -> Result<()> {
    let frame = decode_frame(jpeg)?;
    hash_cells(hash, &frame, grid);
    Ok(())
}

/// Writes the finalized digest as exactly 64 lowercase hex characters.
pub fn write_fingerprint(path: &Path, digest: &[u8; 32]) -> Result<()> {
    std::fs::write(path, hex::encode(digest))
        .with_context(|| format!("write fingerprint {}", path.display()))
}

/// The `key=value` metadata record emitted next to each session's log.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionMetadata {
    pub video_time: u64,
    pub row: u32,
    pub column: u32,
    pub scale: f64,
    pub frame_count: u64,
}

impl SessionMetadata {
    /// Writes the five fixed-order lines.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let text = format!(
            "video_time={}\nrow={}\ncolumn={}\nscale={}\nframe_count={}\n",
            self.video_time, self.row, self.column, self.scale, self.frame_count
        );
        std::fs::write(path, text).with_context(|| format!("write metadata {}", path.display()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read metadata {}", path.display()))?;

        let mut video_time = None;
        let mut row = None;
        let mut column = None;
        let mut scale = None;
        let mut frame_count = None;

        for line in raw.lines() {
            let Some((key, value)) = line.split_once('=') else {
                bail!("malformed metadata line {line:?} in {}", path.display());
            };
            match key {
                "video_time" => video_time = Some(parse_value(key, value)?),
                "row" => row = Some(parse_value(key, value)?),
                "column" => column = Some(parse_value(key, value)?),
                "scale" => scale = Some(parse_value(key, value)?),
                "frame_count" => frame_count = Some(parse_value(key, value)?),
                _ => bail!("unknown metadata key {key:?} in {}", path.display()),
            }
        }

        Ok(Self {
            video_time: video_time.ok_or_else(|| missing("video_time", path))?,
            row: row.ok_or_else(|| missing("row", path))?,
            column: column.ok_or_else(|| missing("column", path))?,
            scale: scale.ok_or_else(|| missing("scale", path))?,
            frame_count: frame_count.ok_or_else(|| missing("frame_count", path))?,
        })
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow!("invalid {key} value {value:?}"))
}

fn missing(key: &str, path: &Path) -> anyhow::Error {
    anyhow!("missing {key} in {}", path.display())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    fn assert_exact_tiling(width: u32, height: u32, rows: u32, cols: u32) {
        let mut covered = vec![false; (width * height) as usize];
        for r in 0..rows {
            for c in 0..cols {
                let (x1, y1, x2, y2) = cell_bounds(width, height, rows, cols, r, c);
                assert!(x2 <= width && y2 <= height);
                for y in y1..y2 {
                    for x in x1..x2 {
                        let i = (y * width + x) as usize;
                        assert!(!covered[i], "pixel ({x},{y}) covered twice");
                        covered[i] = true;
                    }
                }
            }
        }
        assert!(covered.iter().all(|&c| c), "tiling left a gap");
    }

    #[test]
    fn grid_cells_tile_the_image_exactly() {
        assert_exact_tiling(640, 480, 2, 2);
        assert_exact_tiling(7, 5, 3, 4);
        assert_exact_tiling(13, 1, 1, 5);
        assert_exact_tiling(16, 16, 16, 16);
        // More cells than pixels on one axis: empty cells are allowed.
        assert_exact_tiling(3, 3, 5, 2);
    }

    #[test]
    fn last_row_and_column_absorb_the_remainder() {
        let (x1, _, x2, _) = cell_bounds(10, 10, 3, 3, 2, 2);
        assert_eq!((x1, x2), (6, 10));
        let (_, y1, _, y2) = cell_bounds(10, 10, 3, 3, 2, 2);
        assert_eq!((y1, y2), (6, 10));
    }

    #[test]
    fn digest_is_deterministic_in_cell_order() {
        let cells: Vec<Vec<u8>> = (0..8u8).map(|i| vec![i; 64]).collect();

        let mut a = SessionHash::new();
        let mut b = SessionHash::new();
        for cell in &cells {
            a.update(cell);
            b.update(cell);
        }
        assert_eq!(a.finalize(), b.finalize());

        let mut c = SessionHash::new();
        for cell in cells.iter().rev() {
            c.update(cell);
        }
        let mut d = SessionHash::new();
        for cell in &cells {
            d.update(cell);
        }
        assert_ne!(c.finalize(), d.finalize());
    }

    #[test]
    fn empty_session_digest_is_the_empty_sequence_digest() {
        let digest = SessionHash::new().finalize();
        assert_eq!(hex::encode(digest), EMPTY_SHA256);
    }

    #[test]
    fn downsample_halves_cell_dimensions() {
        let frame = RgbImage::from_fn(8, 8, |x, y| image::Rgb([x as u8, y as u8, 0]));
        let bytes = downsample(&frame, 0, 0, 8, 8, 0.5);
        assert_eq!(bytes.len(), 4 * 4 * 3);

        let full = downsample(&frame, 0, 0, 8, 8, 1.0);
        assert_eq!(full.len(), 8 * 8 * 3);
        assert_eq!(full, frame.as_raw().as_slice());
    }

    #[test]
    fn fingerprint_frame_rejects_garbage() {
        let mut hash = SessionHash::new();
        let grid = GridSpec::new(2, 2, 0.5).unwrap();
        assert!(fingerprint_frame(&mut hash, &[0x42; 128], &grid).is_err());
        // A failed decode must leave the accumulator untouched.
        assert_eq!(hex::encode(hash.finalize()), EMPTY_SHA256);
    }

    #[test]
    fn grid_spec_validates_parameters() {
        assert!(GridSpec::new(0, 2, 0.5).is_err());
        assert!(GridSpec::new(2, 0, 0.5).is_err());
        assert!(GridSpec::new(2, 2, 0.0).is_err());
        assert!(GridSpec::new(2, 2, 1.5).is_err());
        assert!(GridSpec::new(2, 2, 1.0).is_ok());
    }

    #[test]
    fn metadata_round_trips_in_fixed_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("session.vmd");
        let meta = SessionMetadata {
            video_time: 10,
            row: 2,
            column: 3,
            scale: 0.5,
            frame_count: 42,
        };
        meta.write_to(&path)?;

        let raw = std::fs::read_to_string(&path)?;
        assert_eq!(
            raw,
            "video_time=10\nrow=2\ncolumn=3\nscale=0.5\nframe_count=42\n"
        );
        assert_eq!(SessionMetadata::load(&path)?, meta);
        Ok(())
    }

    #[test]
    fn metadata_load_rejects_unknown_keys() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("bad.vmd");
        std::fs::write(&path, "video_time=1\nbogus=2\n")?;
        assert!(SessionMetadata::load(&path).is_err());
        Ok(())
    }
}
