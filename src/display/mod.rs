//! Hand-off of decoded frames to the renderer

pub mod frame_slot;

pub use frame_slot::{FrameGuard, FrameSlot, Offered, SlotConfig, SlotError};
