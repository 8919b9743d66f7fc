//! # Depth store
//!
//! Buffers the depth camera frames of an episode and writes them out as a single NumPy array of
//! shape `(height, width, frames)` once the episode has finished. Each pixel holds the natural log
//! of the raw depth value, stored as a half precision float.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use byteorder::{LittleEndian, WriteBytesExt};
use half::f16;
use log::debug;
use ndarray::{s, Array3, ArrayView2};
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

// Internal
use comms_if::sim::{SensorFrame, SensorFrameError};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

const NPY_MAGIC: &[u8] = b"\x93NUMPY";

/// Length of the magic string, version and header length fields.
const NPY_PREAMBLE_LEN: usize = 10;

/// The total header length is padded to a multiple of this.
const NPY_ALIGN: usize = 64;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Write-behind buffer of depth frames.
pub struct DepthStore {
    /// Log depth, indexed by `[row, column, frame]`
    data: Array3<f16>,

    /// Number of frames captured so far
    num_captured: usize,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DepthStoreError {
    #[error("Frame index {0} is outside the store, which holds {1} frames")]
    FrameOutOfRange(usize, usize),

    #[error("Expected a {expected_w}x{expected_h} depth frame, got {found_w}x{found_h}")]
    WrongFrameSize {
        expected_w: usize,
        expected_h: usize,
        found_w: usize,
        found_h: usize,
    },

    #[error("Invalid depth frame: {0}")]
    InvalidFrame(#[from] SensorFrameError),

    #[error("Could not shape the depth frame: {0}")]
    ShapeError(#[from] ndarray::ShapeError),

    #[error("Could not write the depth archive: {0}")]
    WriteError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl DepthStore {
    /// Create a new zeroed store.
    pub fn new(height: usize, width: usize, num_frames: usize) -> Self {
        Self {
            data: Array3::from_elem((height, width, num_frames), f16::from_f32(0.0)),
            num_captured: 0,
        }
    }

    /// `(height, width, frames)`
    pub fn shape(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn num_captured(&self) -> usize {
        self.num_captured
    }

    /// Log depth of one pixel.
    pub fn get(&self, row: usize, col: usize, frame: usize) -> Option<f32> {
        self.data.get((row, col, frame)).map(|v| v.to_f32())
    }

    /// Capture a depth frame into the given frame slot.
    pub fn capture(&mut self, frame_idx: usize, frame: &SensorFrame) -> Result<(), DepthStoreError> {
        let (height, width, num_frames) = self.data.dim();

        if frame_idx >= num_frames {
            return Err(DepthStoreError::FrameOutOfRange(frame_idx, num_frames));
        }

        if frame.width as usize != width || frame.height as usize != height {
            return Err(DepthStoreError::WrongFrameSize {
                expected_w: width,
                expected_h: height,
                found_w: frame.width as usize,
                found_h: frame.height as usize,
            });
        }

        let values = frame.values()?;
        let image = ArrayView2::from_shape((height, width), &values[..])?;

        self.data
            .slice_mut(s![.., .., frame_idx])
            .zip_mut_with(&image, |d, v| *d = f16::from_f32(v.ln()));
        self.num_captured += 1;

        Ok(())
    }

    /// Write the store as a little-endian `f16` NumPy v1.0 array.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), DepthStoreError> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);

        writer.write_all(&npy_header(self.shape()))?;

        // Arrays are created in standard layout so this iterates in C order
        for v in self.data.iter() {
            writer.write_u16::<LittleEndian>(v.to_bits())?;
        }

        writer.flush()?;

        debug!(
            "Depth archive written to {:?} ({} of {} frames captured)",
            path.as_ref(),
            self.num_captured,
            self.shape().2
        );

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Build the NumPy v1.0 header for a C ordered `<f2` array of the given shape.
fn npy_header(shape: (usize, usize, usize)) -> Vec<u8> {
    let mut dict = format!(
        "{{'descr': '<f2', 'fortran_order': False, 'shape': ({}, {}, {}), }}",
        shape.0, shape.1, shape.2
    );

    // Pad with spaces and a final newline so the data starts aligned
    let unpadded = NPY_PREAMBLE_LEN + dict.len() + 1;
    let padding = (NPY_ALIGN - unpadded % NPY_ALIGN) % NPY_ALIGN;
    dict.push_str(&" ".repeat(padding));
    dict.push('\n');

    let mut header = Vec::with_capacity(NPY_PREAMBLE_LEN + dict.len());
    header.extend_from_slice(NPY_MAGIC);
    header.push(1);
    header.push(0);
    header.extend_from_slice(&(dict.len() as u16).to_le_bytes());
    header.extend_from_slice(dict.as_bytes());

    header
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::f32::consts::E;

    #[test]
    fn test_capture_takes_log() {
        let mut store = DepthStore::new(2, 3, 4);
        let frame = SensorFrame::from_values(3, 2, &[1.0, E, 1.0, 1.0, 1.0, E * E]);

        store.capture(1, &frame).unwrap();

        assert_eq!(store.num_captured(), 1);
        assert_eq!(store.get(0, 0, 1), Some(0.0));
        assert!((store.get(0, 1, 1).unwrap() - 1.0).abs() < 1e-3);
        assert!((store.get(1, 2, 1).unwrap() - 2.0).abs() < 2e-3);

        // Other frames untouched
        assert_eq!(store.get(0, 1, 0), Some(0.0));
        assert_eq!(store.get(0, 1, 2), Some(0.0));
    }

    #[test]
    fn test_store_uses_two_bytes_per_value() {
        let store = DepthStore::new(150, 200, 10);
        assert_eq!(std::mem::size_of_val(&store.data[[0, 0, 0]]), 2);
    }

    #[test]
    fn test_capture_rejects_bad_frames() {
        let mut store = DepthStore::new(2, 3, 4);

        let wrong_size = SensorFrame::from_values(2, 3, &[1.0; 6]);
        assert!(matches!(
            store.capture(0, &wrong_size),
            Err(DepthStoreError::WrongFrameSize { .. })
        ));

        let ok = SensorFrame::from_values(3, 2, &[1.0; 6]);
        assert!(matches!(
            store.capture(4, &ok),
            Err(DepthStoreError::FrameOutOfRange(4, 4))
        ));

        assert_eq!(store.num_captured(), 0);
    }

    #[test]
    fn test_save_npy() {
        let path = std::env::temp_dir().join(format!(
            "track_exec_depth_store_test_{}.npy",
            std::process::id()
        ));

        let mut store = DepthStore::new(3, 4, 5);
        store
            .capture(4, &SensorFrame::from_values(4, 3, &[E; 12]))
            .unwrap();
        store.save(&path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(&bytes[..8], b"\x93NUMPY\x01\x00");

        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((NPY_PREAMBLE_LEN + header_len) % NPY_ALIGN, 0);

        let header = std::str::from_utf8(&bytes[10..10 + header_len]).unwrap();
        assert!(header.contains("'descr': '<f2'"));
        assert!(header.contains("'fortran_order': False"));
        assert!(header.contains("'shape': (3, 4, 5)"));
        assert!(header.ends_with('\n'));

        let data = &bytes[10 + header_len..];
        assert_eq!(data.len(), 3 * 4 * 5 * 2);

        // [0, 0, 4] is the fifth value in C order, the last frame of the first pixel
        let v = f16::from_bits(u16::from_le_bytes([data[8], data[9]])).to_f32();
        assert!((v - 1.0).abs() < 1e-3);
        let v = f16::from_bits(u16::from_le_bytes([data[0], data[1]])).to_f32();
        assert_eq!(v, 0.0);
    }
}
