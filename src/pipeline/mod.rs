//! Pipeline plumbing shared by the decode and render sides
//!
//! - `events`: the coalesced decoder-to-renderer notification channel
//! - `health`: frame counters and the periodic fps report

pub mod events;
pub mod health;

pub use events::{DecoderEvent, EventReceiver, EventSender, event_channel};
pub use health::{FpsCounter, HealthSummary, PipelineHealth};
