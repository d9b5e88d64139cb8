//! Hand-off of decoded video frames from a decoder to a renderer that never
//! blocks the decoder on a slow consumer.

pub mod config;
pub mod decoder;
pub mod display;
pub mod frame;
pub mod pipeline;
pub mod workers;
