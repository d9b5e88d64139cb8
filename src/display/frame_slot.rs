//! Single-frame hand-off between the decoder and the renderer
//!
//! The slot owns exactly two frames that are reused for the whole stream:
//! - **Decoding frame**: written by the decoder, never seen by the renderer
//! - **Rendering frame**: the latest published frame, read by the renderer
//!
//! Offering a frame swaps the two under the slot lock. If the renderer has
//! not consumed the previous rendering frame, that frame is dropped and the
//! caller is told not to notify again: the notification sent for the dropped
//! frame is still pending and the renderer will find the newer one instead.
//!
//! # Locking
//!
//! `decoding` is only locked by the producer. `shared` is locked by both
//! sides for the duration of a swap, and by the renderer for as long as it
//! holds a [`FrameGuard`]. The producer always takes `decoding` first.

use crate::frame::VideoFrame;
use crate::pipeline::health::PipelineHealth;
use std::ops::Deref;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Slot behaviour when the renderer falls behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotConfig {
    /// Replace an unconsumed frame (`true`), or block the producer until the
    /// renderer has consumed it (`false`).
    pub skip_frames: bool,
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self { skip_frames: true }
    }
}

/// Result of publishing a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offered {
    /// The previous frame had been consumed (or this is the first frame):
    /// the caller must raise a new notification.
    Fresh,
    /// The previous frame was never consumed and has been dropped: a
    /// notification is already pending.
    Replaced,
}

impl Offered {
    pub fn needs_notification(self) -> bool {
        self == Offered::Fresh
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SlotError {
    /// No frame has been offered yet; nothing to render.
    #[error("no frame has been decoded yet")]
    Empty,
    /// The stream is being torn down.
    #[error("frame slot interrupted")]
    Interrupted,
}

#[derive(Debug)]
struct SlotState {
    rendering: VideoFrame,
    has_frame: bool,
    consumed: bool,
    interrupted: bool,
}

pub struct FrameSlot {
    decoding: Mutex<VideoFrame>,
    shared: Mutex<SlotState>,
    consumed_cond: Condvar,
    config: SlotConfig,
    health: Arc<PipelineHealth>,
}

impl FrameSlot {
    pub fn new(config: SlotConfig, health: Arc<PipelineHealth>) -> Self {
        Self {
            decoding: Mutex::new(VideoFrame::empty()),
            shared: Mutex::new(SlotState {
                rendering: VideoFrame::empty(),
                has_frame: false,
                // so that the very first offer notifies
                consumed: true,
                interrupted: false,
            }),
            consumed_cond: Condvar::new(),
            config,
            health,
        }
    }

    pub fn health(&self) -> &Arc<PipelineHealth> {
        &self.health
    }

    /// Exclusive access to the frame the decoder writes into.
    ///
    /// Nothing written here is visible to the renderer until
    /// [`offer_decoded_frame`](Self::offer_decoded_frame).
    pub fn decoding_frame(&self) -> MutexGuard<'_, VideoFrame> {
        self.decoding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Move `frame` into the decoding buffer and publish it.
    pub fn offer(&self, frame: VideoFrame) -> Result<Offered, SlotError> {
        *self.decoding_frame() = frame;
        self.offer_decoded_frame()
    }

    /// Publish the decoding frame, making it the frame the next consume sees.
    ///
    /// With `skip_frames` disabled this blocks until the renderer consumed the
    /// previous frame or the slot is interrupted.
    pub fn offer_decoded_frame(&self) -> Result<Offered, SlotError> {
        let mut decoding = self.decoding_frame();
        let mut state = self.lock_shared();

        if !self.config.skip_frames {
            while !state.consumed && !state.interrupted {
                state = self
                    .consumed_cond
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }

        if state.interrupted {
            return Err(SlotError::Interrupted);
        }

        std::mem::swap(&mut *decoding, &mut state.rendering);
        let previous_consumed = state.consumed;
        state.has_frame = true;
        state.consumed = false;

        if previous_consumed {
            Ok(Offered::Fresh)
        } else {
            self.health.record_frame_drop();
            Ok(Offered::Replaced)
        }
    }

    /// Claim the latest frame for presentation.
    ///
    /// The returned guard keeps the slot locked; drop it as soon as the frame
    /// has been presented, the next offer waits for it.
    pub fn consume(&self) -> Result<FrameGuard<'_>, SlotError> {
        let mut state = self.lock_shared();
        if state.interrupted {
            return Err(SlotError::Interrupted);
        }
        if !state.has_frame {
            return Err(SlotError::Empty);
        }

        if !state.consumed {
            state.consumed = true;
            self.health.record_rendered();
            if !self.config.skip_frames {
                self.consumed_cond.notify_one();
            }
        }

        Ok(FrameGuard { state })
    }

    /// Look at the latest frame without consuming it.
    pub fn peek(&self) -> Result<FrameGuard<'_>, SlotError> {
        let state = self.lock_shared();
        if state.interrupted {
            return Err(SlotError::Interrupted);
        }
        if !state.has_frame {
            return Err(SlotError::Empty);
        }
        Ok(FrameGuard { state })
    }

    /// True while a published frame waits for the renderer.
    pub fn has_pending_frame(&self) -> bool {
        let state = self.lock_shared();
        state.has_frame && !state.consumed
    }

    /// Release every blocked or future offer/consume with
    /// [`SlotError::Interrupted`]. Sticky.
    pub fn interrupt(&self) {
        let mut state = self.lock_shared();
        state.interrupted = true;
        drop(state);
        self.consumed_cond.notify_all();
    }

    pub fn is_interrupted(&self) -> bool {
        self.lock_shared().interrupted
    }

    fn lock_shared(&self) -> MutexGuard<'_, SlotState> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new(SlotConfig::default(), Arc::new(PipelineHealth::new()))
    }
}

/// Scoped read access to the rendering frame.
pub struct FrameGuard<'a> {
    state: MutexGuard<'a, SlotState>,
}

impl Deref for FrameGuard<'_> {
    type Target = VideoFrame;

    fn deref(&self) -> &Self::Target {
        &self.state.rendering
    }
}

impl std::fmt::Debug for FrameGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameGuard")
            .field("pts", &self.pts)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}
