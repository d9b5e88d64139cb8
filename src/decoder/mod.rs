//! Video decoding and frame publication
//!
//! [`Decoder`] drives a [`DecodeEngine`] with one compressed packet at a time
//! and publishes every decoded frame into the shared [`FrameSlot`]. A
//! [`DecoderEvent::NewFrame`] is sent only when the slot reports that the
//! previous frame had been consumed, so bursts collapse into a single
//! pending notification.

mod ffmpeg;

pub use ffmpeg::FfmpegEngine;

use crate::display::{FrameSlot, Offered};
use crate::frame::{Packet, VideoFrame};
use crate::pipeline::events::{DecoderEvent, EventSender};
use crate::workers::recorder::FrameSink;
use ac_ffmpeg::codec::VideoCodecParameters;
use log::{debug, info, warn};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("could not allocate decoder context: {0}")]
    CodecAlloc(String),

    #[error("could not open codec: {0}")]
    CodecOpen(String),

    #[error("could not send video packet: {0}")]
    Submit(String),

    #[error("could not receive video frame: {0}")]
    Decode(String),

    #[error("decoder is not open")]
    NotOpen,
}

/// Failure reported by an engine call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The call noticed the cancellation token and gave up.
    #[error("interrupted")]
    Interrupted,

    #[error("{0}")]
    Failed(String),
}

/// Outcome of a successful [`DecodeEngine::retrieve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retrieved {
    /// The frame passed to `retrieve` now holds a complete decoded frame
    Frame,
    /// The engine needs more input before it can output a frame
    NeedMore,
}

/// Outcome of one [`Decoder::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pushed {
    /// A frame was published; `notified` tells whether a new event was sent
    Frame { notified: bool },
    NeedMore,
    /// The decoder was interrupted; unwind instead of pushing more packets
    Interrupted,
}

/// Everything needed to allocate and configure a codec context.
#[derive(Clone, Default)]
pub struct CodecDescriptor {
    /// FFmpeg decoder name, e.g. `h264`
    pub codec: String,
    /// Codec-specific initialization data (e.g. SPS/PPS for H.264)
    pub extradata: Option<Vec<u8>>,
    /// Private codec options
    pub options: Vec<(String, String)>,
    /// Stream parameters from a demuxer, preferred over `codec` when present
    pub parameters: Option<VideoCodecParameters>,
}

impl CodecDescriptor {
    pub fn new(codec: impl Into<String>) -> Self {
        Self {
            codec: codec.into(),
            ..Default::default()
        }
    }

    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.push((name.into(), value.into()));
        self
    }
}

impl std::fmt::Debug for CodecDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecDescriptor")
            .field("codec", &self.codec)
            .field("extradata", &self.extradata.as_ref().map(|e| e.len()))
            .field("options", &self.options)
            .field("from_stream", &self.parameters.is_some())
            .finish()
    }
}

/// The opaque decode step: a two-call submit/retrieve protocol.
///
/// Implementations may block inside either call, but must check `cancel` at
/// every blocking point and return [`EngineError::Interrupted`] once it is
/// cancelled.
pub trait DecodeEngine: Send {
    /// Allocate and configure a codec context.
    fn open(descriptor: &CodecDescriptor) -> Result<Self, DecodeError>
    where
        Self: Sized;

    /// Feed one packet. An end-of-stream packet starts flushing.
    fn submit(&mut self, packet: &Packet, cancel: &CancellationToken) -> Result<(), EngineError>;

    /// Write the next decoded frame, if any, into `frame`.
    fn retrieve(
        &mut self,
        frame: &mut VideoFrame,
        cancel: &CancellationToken,
    ) -> Result<Retrieved, EngineError>;
}

/// Cloneable handle that tears the decode side down from any thread.
#[derive(Clone)]
pub struct InterruptHandle {
    token: CancellationToken,
    slot: Arc<FrameSlot>,
}

impl InterruptHandle {
    pub fn interrupt(&self) {
        if !self.token.is_cancelled() {
            info!("Decoder: interrupt requested");
        }
        self.token.cancel();
        self.slot.interrupt();
    }

    pub fn is_interrupted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The token blocking collaborators (engine, packet source) poll.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

pub struct Decoder<E: DecodeEngine = FfmpegEngine> {
    engine: Option<E>,
    slot: Arc<FrameSlot>,
    events: EventSender,
    interrupt: InterruptHandle,
    sink: Option<Box<dyn FrameSink>>,
}

impl<E: DecodeEngine> Decoder<E> {
    /// Bind the decoder to the slot it publishes into and to the renderer's
    /// event channel. No codec is allocated until [`open`](Self::open).
    pub fn new(slot: Arc<FrameSlot>, events: EventSender) -> Self {
        Self::with_token(slot, events, CancellationToken::new())
    }

    /// Like [`new`](Self::new), sharing an existing cancellation token.
    pub fn with_token(slot: Arc<FrameSlot>, events: EventSender, token: CancellationToken) -> Self {
        let interrupt = InterruptHandle {
            token,
            slot: slot.clone(),
        };
        Self {
            engine: None,
            slot,
            events,
            interrupt,
            sink: None,
        }
    }

    /// Also hand every decoded frame to `sink` before publishing it.
    pub fn with_sink(mut self, sink: Box<dyn FrameSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn take_sink(&mut self) -> Option<Box<dyn FrameSink>> {
        self.sink.take()
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    pub fn interrupt(&self) {
        self.interrupt.interrupt();
    }

    pub fn slot(&self) -> &Arc<FrameSlot> {
        &self.slot
    }

    pub fn is_open(&self) -> bool {
        self.engine.is_some()
    }

    pub fn open(&mut self, descriptor: &CodecDescriptor) -> Result<(), DecodeError> {
        if self.engine.is_some() {
            warn!("Decoder: reopening, previous codec context released");
            self.close();
        }
        let engine = E::open(descriptor)?;
        self.engine = Some(engine);
        info!("Decoder: opened {:?}", descriptor);
        Ok(())
    }

    /// Release the codec context. No-op when not open.
    pub fn close(&mut self) {
        if self.engine.take().is_some() {
            debug!("Decoder: closed");
        }
    }

    /// Decode one packet and publish at most one frame.
    pub fn push(&mut self, packet: &Packet) -> Result<Pushed, DecodeError> {
        let cancel = self.interrupt.token();
        if cancel.is_cancelled() {
            return Ok(Pushed::Interrupted);
        }

        let engine = self.engine.as_mut().ok_or(DecodeError::NotOpen)?;
        match engine.submit(packet, &cancel) {
            Ok(()) => {}
            Err(EngineError::Interrupted) => return Ok(Pushed::Interrupted),
            Err(EngineError::Failed(e)) => {
                self.slot.health().record_decode_failure();
                return Err(DecodeError::Submit(e));
            }
        }

        self.publish_next(&cancel)
    }

    /// Publish one frame still buffered in the engine without feeding new
    /// input, typically after an end-of-stream packet.
    pub fn drain(&mut self) -> Result<Pushed, DecodeError> {
        let cancel = self.interrupt.token();
        self.publish_next(&cancel)
    }

    fn publish_next(&mut self, cancel: &CancellationToken) -> Result<Pushed, DecodeError> {
        if cancel.is_cancelled() {
            return Ok(Pushed::Interrupted);
        }
        let engine = self.engine.as_mut().ok_or(DecodeError::NotOpen)?;

        let mut decoding = self.slot.decoding_frame();
        match engine.retrieve(&mut decoding, cancel) {
            Ok(Retrieved::Frame) => {}
            Ok(Retrieved::NeedMore) => return Ok(Pushed::NeedMore),
            Err(EngineError::Interrupted) => return Ok(Pushed::Interrupted),
            Err(EngineError::Failed(e)) => {
                self.slot.health().record_decode_failure();
                return Err(DecodeError::Decode(e));
            }
        }

        self.slot.health().record_decoded(decoding.byte_len());
        if let Some(sink) = self.sink.as_mut()
            && let Err(e) = sink.record(&decoding)
        {
            warn!("Decoder: recording sink failed: {:#}", e);
        }
        drop(decoding);

        match self.slot.offer_decoded_frame() {
            Ok(Offered::Fresh) => {
                self.events.send(DecoderEvent::NewFrame);
                Ok(Pushed::Frame { notified: true })
            }
            // the pending notification will pick up this frame instead
            Ok(Offered::Replaced) => Ok(Pushed::Frame { notified: false }),
            // offering only fails once interrupted
            Err(_) => Ok(Pushed::Interrupted),
        }
    }

    #[cfg(test)]
    fn engine(&self) -> Option<&E> {
        self.engine.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::SlotConfig;
    use crate::frame::{PixelFormat, Plane};
    use crate::pipeline::events::{EventReceiver, event_channel};
    use crate::pipeline::health::PipelineHealth;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    /// Engine driven by the first byte of each packet:
    /// `F` decodes a frame, `N` needs more input, `X` is rejected on submit,
    /// `D` fails on retrieve, `B` blocks until cancelled, `P` queues two frames.
    #[derive(Default)]
    struct ScriptedEngine {
        queued: VecDeque<Result<i64, String>>,
        submits: usize,
    }

    impl DecodeEngine for ScriptedEngine {
        fn open(descriptor: &CodecDescriptor) -> Result<Self, DecodeError> {
            match descriptor.codec.as_str() {
                "unknown" => Err(DecodeError::CodecAlloc("no such codec".into())),
                "reject" => Err(DecodeError::CodecOpen("unsupported parameters".into())),
                _ => Ok(Self::default()),
            }
        }

        fn submit(&mut self, packet: &Packet, cancel: &CancellationToken) -> Result<(), EngineError> {
            self.submits += 1;
            let pts = packet.pts.unwrap_or_default();
            match packet.data.first() {
                Some(b'F') => self.queued.push_back(Ok(pts)),
                Some(b'P') => {
                    self.queued.push_back(Ok(pts));
                    self.queued.push_back(Ok(pts + 1));
                }
                Some(b'D') => self.queued.push_back(Err("corrupt slice".into())),
                Some(b'X') => return Err(EngineError::Failed("invalid data".into())),
                Some(b'B') => {
                    while !cancel.is_cancelled() {
                        thread::sleep(Duration::from_millis(1));
                    }
                    return Err(EngineError::Interrupted);
                }
                _ => {}
            }
            Ok(())
        }

        fn retrieve(
            &mut self,
            frame: &mut VideoFrame,
            _cancel: &CancellationToken,
        ) -> Result<Retrieved, EngineError> {
            match self.queued.pop_front() {
                None => Ok(Retrieved::NeedMore),
                Some(Err(e)) => Err(EngineError::Failed(e)),
                Some(Ok(pts)) => {
                    frame.pts = Some(pts);
                    frame.width = 2;
                    frame.height = 2;
                    frame.format = PixelFormat::Yuv420p;
                    frame.planes = vec![
                        Plane { data: vec![pts as u8; 4], stride: 2 },
                        Plane { data: vec![128], stride: 1 },
                        Plane { data: vec![128], stride: 1 },
                    ];
                    Ok(Retrieved::Frame)
                }
            }
        }
    }

    struct CollectingSink(Arc<Mutex<Vec<Option<i64>>>>);

    impl FrameSink for CollectingSink {
        fn record(&mut self, frame: &VideoFrame) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(frame.pts);
            Ok(())
        }
    }

    struct FailingSink;

    impl FrameSink for FailingSink {
        fn record(&mut self, _frame: &VideoFrame) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }
    }

    fn open_decoder() -> (Decoder<ScriptedEngine>, EventReceiver) {
        let (tx, rx) = event_channel();
        let mut decoder = Decoder::new(Arc::new(FrameSlot::default()), tx);
        decoder.open(&CodecDescriptor::new("h264")).unwrap();
        (decoder, rx)
    }

    fn count_events(rx: &mut EventReceiver) -> usize {
        let mut count = 0;
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event, DecoderEvent::NewFrame);
            count += 1;
        }
        count
    }

    #[test]
    fn test_notification_coalescing() {
        let (mut decoder, mut rx) = open_decoder();
        let slot = decoder.slot().clone();

        let pushed = decoder.push(&Packet::new(&b"F"[..], Some(1))).unwrap();
        assert_eq!(pushed, Pushed::Frame { notified: true });
        assert_eq!(count_events(&mut rx), 1);
        assert_eq!(slot.consume().unwrap().pts, Some(1));

        let pushed = decoder.push(&Packet::new(&b"F"[..], Some(2))).unwrap();
        assert_eq!(pushed, Pushed::Frame { notified: true });

        // F2 not consumed yet
        let pushed = decoder.push(&Packet::new(&b"F"[..], Some(3))).unwrap();
        assert_eq!(pushed, Pushed::Frame { notified: false });
        assert_eq!(count_events(&mut rx), 1);

        assert_eq!(slot.consume().unwrap().pts, Some(3));
        assert_eq!(slot.health().frame_drops(), 1);
    }

    #[test]
    fn test_need_more_input() {
        let (mut decoder, mut rx) = open_decoder();
        let pushed = decoder.push(&Packet::new(&b"N"[..], Some(0))).unwrap();
        assert_eq!(pushed, Pushed::NeedMore);
        assert_eq!(count_events(&mut rx), 0);
        assert_eq!(decoder.slot().consume().unwrap_err(), crate::display::SlotError::Empty);
    }

    #[test]
    fn test_submit_and_decode_errors_surface() {
        let (mut decoder, mut rx) = open_decoder();

        let err = decoder.push(&Packet::new(&b"X"[..], None)).unwrap_err();
        assert!(matches!(err, DecodeError::Submit(_)));

        let err = decoder.push(&Packet::new(&b"D"[..], None)).unwrap_err();
        assert!(matches!(err, DecodeError::Decode(_)));

        // the stream keeps going if the caller wants it to
        let pushed = decoder.push(&Packet::new(&b"F"[..], Some(9))).unwrap();
        assert_eq!(pushed, Pushed::Frame { notified: true });
        assert_eq!(count_events(&mut rx), 1);
        assert_eq!(decoder.slot().health().decode_failures(), 2);
    }

    #[test]
    fn test_one_frame_per_push_then_drain() {
        let (mut decoder, mut rx) = open_decoder();

        let pushed = decoder.push(&Packet::new(&b"P"[..], Some(10))).unwrap();
        assert_eq!(pushed, Pushed::Frame { notified: true });
        assert_eq!(decoder.slot().consume().unwrap().pts, Some(10));

        decoder.push(&Packet::end_of_stream()).unwrap();
        assert_eq!(decoder.drain().unwrap(), Pushed::NeedMore);
        assert_eq!(decoder.slot().consume().unwrap().pts, Some(11));
        assert_eq!(count_events(&mut rx), 2);
    }

    #[test]
    fn test_open_errors_leave_decoder_closed() {
        let (tx, _rx) = event_channel();
        let mut decoder: Decoder<ScriptedEngine> = Decoder::new(Arc::new(FrameSlot::default()), tx);

        let err = decoder.open(&CodecDescriptor::new("reject")).unwrap_err();
        assert!(matches!(err, DecodeError::CodecOpen(_)));
        assert!(!decoder.is_open());

        let err = decoder.open(&CodecDescriptor::new("unknown")).unwrap_err();
        assert!(matches!(err, DecodeError::CodecAlloc(_)));
        assert!(!decoder.is_open());

        decoder.close();
        let err = decoder.push(&Packet::new(&b"F"[..], None)).unwrap_err();
        assert!(matches!(err, DecodeError::NotOpen));
    }

    #[test]
    fn test_push_after_interrupt_skips_engine() {
        let (mut decoder, mut rx) = open_decoder();
        decoder.interrupt();

        let pushed = decoder.push(&Packet::new(&b"F"[..], Some(1))).unwrap();
        assert_eq!(pushed, Pushed::Interrupted);
        assert_eq!(decoder.engine().unwrap().submits, 0);
        assert_eq!(count_events(&mut rx), 0);
        assert_eq!(
            decoder.slot().consume().unwrap_err(),
            crate::display::SlotError::Interrupted
        );
    }

    #[test]
    fn test_interrupt_unblocks_inflight_push() {
        let (mut decoder, _rx) = open_decoder();
        let handle = decoder.interrupt_handle();

        let worker = thread::spawn(move || decoder.push(&Packet::new(&b"B"[..], None)));

        thread::sleep(Duration::from_millis(20));
        handle.interrupt();

        assert_eq!(worker.join().unwrap().unwrap(), Pushed::Interrupted);
        assert!(handle.is_interrupted());
    }

    #[test]
    fn test_interrupt_releases_blocked_offer() {
        let (tx, _rx) = event_channel();
        let slot = Arc::new(FrameSlot::new(
            SlotConfig { skip_frames: false },
            Arc::new(PipelineHealth::new()),
        ));
        let mut decoder: Decoder<ScriptedEngine> = Decoder::new(slot, tx);
        decoder.open(&CodecDescriptor::new("h264")).unwrap();
        decoder.push(&Packet::new(&b"F"[..], Some(1))).unwrap();

        let handle = decoder.interrupt_handle();
        let worker = thread::spawn(move || decoder.push(&Packet::new(&b"F"[..], Some(2))));

        thread::sleep(Duration::from_millis(20));
        handle.interrupt();
        assert_eq!(worker.join().unwrap().unwrap(), Pushed::Interrupted);
    }

    #[test]
    fn test_sink_sees_every_frame() {
        let recorded = Arc::new(Mutex::new(Vec::new()));
        let (tx, _rx) = event_channel();
        let mut decoder: Decoder<ScriptedEngine> = Decoder::new(Arc::new(FrameSlot::default()), tx)
            .with_sink(Box::new(CollectingSink(recorded.clone())));
        decoder.open(&CodecDescriptor::new("h264")).unwrap();

        for pts in 0..3 {
            decoder.push(&Packet::new(&b"F"[..], Some(pts))).unwrap();
        }
        // the renderer only sees the last one, the recording gets all of them
        assert_eq!(decoder.slot().consume().unwrap().pts, Some(2));
        assert_eq!(*recorded.lock().unwrap(), vec![Some(0), Some(1), Some(2)]);
    }

    #[test]
    fn test_sink_failure_is_not_fatal() {
        let (tx, mut rx) = event_channel();
        let mut decoder: Decoder<ScriptedEngine> =
            Decoder::new(Arc::new(FrameSlot::default()), tx).with_sink(Box::new(FailingSink));
        decoder.open(&CodecDescriptor::new("h264")).unwrap();

        let pushed = decoder.push(&Packet::new(&b"F"[..], Some(1))).unwrap();
        assert_eq!(pushed, Pushed::Frame { notified: true });
        assert_eq!(count_events(&mut rx), 1);
    }
}
