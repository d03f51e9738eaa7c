pub mod capture;

pub use capture::open_capture;
