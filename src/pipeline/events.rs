//! Per-pipeline notification channel between the decoder and the renderer.
//!
//! Sending never blocks: the channel is unbounded, and the frame slot keeps
//! at most one `NewFrame` outstanding, so it cannot grow with the frame rate.

use log::debug;
use tokio::sync::mpsc;

/// Events delivered to the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderEvent {
    /// At least one new frame is available in the slot
    NewFrame,
    /// The decode loop ended; no further frames will be offered
    StreamStopped,
}

/// Producer half, owned by the decoder.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<DecoderEvent>,
}

/// Consumer half, owned by the renderer.
pub type EventReceiver = mpsc::UnboundedReceiver<DecoderEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, rx)
}

impl EventSender {
    /// Fire-and-forget; a renderer that went away is not an error for the
    /// producer.
    pub fn send(&self, event: DecoderEvent) {
        if self.tx.send(event).is_err() {
            debug!("EventSender: renderer gone, dropping {:?}", event);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
