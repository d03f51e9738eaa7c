use crate::error::{PipelineError, Result};

/// Capture geometry is fixed at build time.
pub const CAPTURE_WIDTH: usize = 640;
pub const CAPTURE_HEIGHT: usize = 480;

/// Bytes per pixel on each side of the converter.
pub const RAW_BYTES_PER_PIXEL: usize = 3;
pub const DISPLAY_BYTES_PER_PIXEL: usize = 2;

/// Width and height in pixels. Fixed for the lifetime of the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    pub width: usize,
    pub height: usize,
}

impl Geometry {
    pub const fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    pub const fn capture() -> Self {
        Self::new(CAPTURE_WIDTH, CAPTURE_HEIGHT)
    }

    pub const fn pixels(&self) -> usize {
        self.width * self.height
    }

    /// Size of a 24-bit RGB frame of this geometry.
    pub const fn raw_len(&self) -> usize {
        self.pixels() * RAW_BYTES_PER_PIXEL
    }

    /// Size of an RGB565 frame of this geometry.
    pub const fn display_len(&self) -> usize {
        self.pixels() * DISPLAY_BYTES_PER_PIXEL
    }
}

impl std::fmt::Display for Geometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A fixed-size frame buffer, allocated once and reused for every frame.
///
/// The length never changes after allocation, so every copy into or out of
/// a channel slot is between buffers of the same size.
#[derive(Debug)]
pub struct Frame {
    bytes: Box<[u8]>,
}

impl Frame {
    /// Allocate a zeroed buffer of `len` bytes, reporting allocation failure
    /// instead of aborting.
    pub fn alloc(what: &'static str, len: usize) -> Result<Self> {
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|_| PipelineError::Alloc { what, bytes: len })?;
        bytes.resize(len, 0);
        Ok(Self {
            bytes: bytes.into_boxed_slice(),
        })
    }

    /// A RawFrame: `width * height * 3` bytes of packed R, G, B.
    pub fn raw(geometry: Geometry) -> Result<Self> {
        Self::alloc("raw frame", geometry.raw_len())
    }

    /// A DisplayFrame: `width * height * 2` bytes of RGB565.
    pub fn display(geometry: Geometry) -> Result<Self> {
        Self::alloc("display frame", geometry.display_len())
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}
