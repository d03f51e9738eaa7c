use rayon::prelude::*;
use tracing::{debug, info};

use crate::core::channel::{FrameReceiver, FrameSender};
use crate::core::frame::{Frame, Geometry, DISPLAY_BYTES_PER_PIXEL, RAW_BYTES_PER_PIXEL};
use crate::core::pipeline::FrameLimit;
use crate::error::Result;

/// Pack 8-bit components into RGB565: 5 bits red, 6 bits green, 5 bits blue.
#[inline(always)]
pub fn pack_rgb565(r: u8, g: u8, b: u8) -> u16 {
    (((r as u16) >> 3) << 11) | (((g as u16) >> 2) << 5) | ((b as u16) >> 3)
}

/// The two bytes written to the framebuffer for one pixel: the packed value
/// byte-swapped, then stored high byte first.
#[inline(always)]
pub fn encode_pixel(r: u8, g: u8, b: u8) -> [u8; 2] {
    pack_rgb565(r, g, b).swap_bytes().to_be_bytes()
}

/// Maps a 24-bit capture frame onto a 16-bit display frame.
///
/// Capture content is placed top-left. Display pixels with
/// `col >= capture.width` or `row > capture.height` are black. Every other
/// display pixel takes the next capture pixel from a single running cursor
/// in capture scan order, so the mapping follows capture rows only when the
/// display is at least as wide as the capture.
#[derive(Clone, Copy, Debug)]
pub struct Converter {
    capture: Geometry,
    display: Geometry,
}

impl Converter {
    pub fn new(capture: Geometry, display: Geometry) -> Self {
        Self { capture, display }
    }

    pub fn capture(&self) -> Geometry {
        self.capture
    }

    pub fn display(&self) -> Geometry {
        self.display
    }

    // The height bound is inclusive: row == capture.height is still image.
    #[inline(always)]
    pub fn is_border(&self, row: usize, col: usize) -> bool {
        col >= self.capture.width || row > self.capture.height
    }

    /// Convert `raw` (capture geometry, RGB888) into `out` (display
    /// geometry, RGB565) in one pass.
    ///
    /// # Panics
    ///
    /// If either buffer does not match its geometry.
    pub fn convert(&self, raw: &[u8], out: &mut [u8]) {
        assert_eq!(raw.len(), self.capture.raw_len(), "raw frame size");
        assert_eq!(out.len(), self.display.display_len(), "display frame size");

        let capture_pixels = self.capture.pixels();
        if capture_pixels == 0 || out.is_empty() {
            out.fill(0);
            return;
        }

        // The cursor advances once per image pixel. Rows up to and including
        // capture.height each hold `image_cols` image pixels, so the cursor
        // at the start of any image row is known without walking earlier
        // rows. That lets rows be filled independently.
        let image_cols = self.display.width.min(self.capture.width);
        let row_bytes = self.display.width * DISPLAY_BYTES_PER_PIXEL;

        out.par_chunks_mut(row_bytes)
            .enumerate()
            .for_each(|(row, line)| {
                let mut cursor = row * image_cols;
                for (col, px) in line.chunks_exact_mut(DISPLAY_BYTES_PER_PIXEL).enumerate() {
                    if self.is_border(row, col) {
                        px.fill(0);
                        continue;
                    }
                    // The inclusive height bound runs the cursor one row past
                    // the end of the capture; wrap instead of reading past it.
                    let src = (cursor % capture_pixels) * RAW_BYTES_PER_PIXEL;
                    cursor += 1;
                    px.copy_from_slice(&encode_pixel(raw[src], raw[src + 1], raw[src + 2]));
                }
            });
    }
}

/// Converter unit: receive a RawFrame, convert it, send a DisplayFrame.
pub struct ConvertUnit {
    converter: Converter,
    input: FrameReceiver,
    output: FrameSender,
    raw: Frame,
    display: Frame,
}

impl ConvertUnit {
    pub fn new(converter: Converter, input: FrameReceiver, output: FrameSender) -> Result<Self> {
        let raw = Frame::raw(converter.capture())?;
        let display = Frame::display(converter.display())?;
        Ok(Self {
            converter,
            input,
            output,
            raw,
            display,
        })
    }

    pub fn step(&mut self) {
        self.input.receive(&mut self.raw);
        self.converter
            .convert(self.raw.as_slice(), self.display.as_mut_slice());
        self.output.send(&self.display);
    }

    /// Convert frames until `limit` is reached. Returns the frame count.
    pub fn run(mut self, limit: FrameLimit) -> Result<u64> {
        info!(
            capture = %self.converter.capture(),
            display = %self.converter.display(),
            "converter started"
        );
        let mut frames = 0;
        while limit.allows(frames) {
            self.step();
            frames += 1;
            debug!(frame = frames, "converted");
        }
        Ok(frames)
    }
}
