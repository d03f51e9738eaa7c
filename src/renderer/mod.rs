pub mod converter;
pub mod framebuffer;

pub use framebuffer::{open_framebuffer, query_screen, ScreenInfo};
