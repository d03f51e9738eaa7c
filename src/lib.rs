//! Real-time 24-bit RGB capture to RGB565 framebuffer feed.
//!
//! Three units run on their own threads: capture reads raw frames from the
//! capture device, convert repacks them for the display, display writes them
//! to the framebuffer. Neighbouring units hand whole frames over through a
//! single-slot [`core::channel`].

pub mod core;
pub mod decoder;
pub mod error;
pub mod renderer;
