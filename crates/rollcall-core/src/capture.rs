//! Capture adapter contract: image frame in, optional signature out.

use crate::types::{Signature, SignatureError};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    /// No camera or embedding backend is available. Fatal to the session.
    #[error("capture unavailable: {0}")]
    Unavailable(String),
    #[error("invalid frame: expected {expected} bytes, got {actual}")]
    InvalidFrame { expected: usize, actual: usize },
    #[error("failed to decode image {path}: {reason}")]
    Decode { path: String, reason: String },
    #[error("embedding backend failed: {0}")]
    Backend(String),
    #[error("embedding backend returned a bad signature: {0}")]
    BadSignature(#[from] SignatureError),
}

/// A captured RGB frame (8 bits per channel, row-major, interleaved).
#[derive(Clone, Debug)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self, CaptureError> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(CaptureError::InvalidFrame {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Decode an image file (any format the `image` crate reads) into RGB.
    pub fn open(path: &Path) -> Result<Self, CaptureError> {
        let img = image::open(path).map_err(|e| CaptureError::Decode {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let rgb = img.to_rgb8();
        let (width, height) = rgb.dimensions();
        Self::new(rgb.into_raw(), width, height)
    }

    /// Binary PPM (P6) encoding, the simplest format embedding tools accept on stdin.
    pub fn to_ppm(&self) -> Vec<u8> {
        let header = format!("P6\n{} {}\n255\n", self.width, self.height);
        let mut out = Vec::with_capacity(header.len() + self.data.len());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&self.data);
        out
    }
}

/// Turns a frame into a face signature.
///
/// Implemented by the external detection/embedding model. `Ok(None)` means
/// the model ran but found no face. Calls may block for as long as the model
/// needs and cannot be cancelled midway.
pub trait CaptureAdapter: Send {
    fn capture_signature(&mut self, frame: &Frame) -> Result<Option<Signature>, CaptureError>;
}

impl<F> CaptureAdapter for F
where
    F: FnMut(&Frame) -> Result<Option<Signature>, CaptureError> + Send,
{
    fn capture_signature(&mut self, frame: &Frame) -> Result<Option<Signature>, CaptureError> {
        self(frame)
    }
}
