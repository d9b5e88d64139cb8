//! Background workers around the decode path
//!
//! The packet source feeds the decoder from a container file, the recorder
//! persists every decoded frame on its own thread.

pub mod recorder;
pub mod source;

pub use recorder::{FrameSink, RecordStats, Recorder};
pub use source::{InterruptibleReader, PacketSource};
