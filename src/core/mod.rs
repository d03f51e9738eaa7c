pub mod channel;
pub mod frame;
pub mod pipeline;
