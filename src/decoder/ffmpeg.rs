use super::{CodecDescriptor, DecodeEngine, DecodeError, EngineError, Retrieved};
use crate::frame::{Packet, PixelFormat, VideoFrame};
use ac_ffmpeg::codec::Decoder;
use ac_ffmpeg::codec::video::{self, VideoDecoder};
use ac_ffmpeg::packet::{self, PacketMut};
use ac_ffmpeg::time::{TimeBase, Timestamp};
use log::{debug, warn};
use tokio_util::sync::CancellationToken;

/// All timestamps crossing the engine boundary are in microseconds.
fn micros() -> TimeBase {
    TimeBase::new(1, 1_000_000)
}

/// Work the codec refused because its output was full; retried after the
/// next frame has been taken.
enum Pending {
    Packet(packet::Packet),
    Flush,
}

/// Decode engine backed by FFmpeg.
///
/// Decoded planes are copied into the slot's reusable frame with stride
/// padding stripped, so the output buffers are only reallocated when the
/// resolution changes.
pub struct FfmpegEngine {
    decoder: VideoDecoder,
    pending: Option<Pending>,
    /// Failure of a held-back packet, reported by the next `submit`
    deferred: Option<String>,
    /// Last format copied with its padding, to warn once per change
    unknown_format: Option<String>,
}

impl DecodeEngine for FfmpegEngine {
    fn open(descriptor: &CodecDescriptor) -> Result<Self, DecodeError> {
        let builder = match &descriptor.parameters {
            Some(parameters) => VideoDecoder::from_codec_parameters(parameters),
            None => VideoDecoder::builder(&descriptor.codec),
        }
        .map_err(|e| DecodeError::CodecAlloc(e.to_string()))?;

        let mut builder = builder
            .time_base(micros())
            .extradata(descriptor.extradata.clone());
        for (name, value) in &descriptor.options {
            builder = builder.set_option(name, value);
        }

        // a rejected configuration drops the half-built context right here
        let decoder = builder
            .build()
            .map_err(|e| DecodeError::CodecOpen(e.to_string()))?;

        Ok(Self {
            decoder,
            pending: None,
            deferred: None,
            unknown_format: None,
        })
    }

    fn submit(&mut self, packet: &Packet, cancel: &CancellationToken) -> Result<(), EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Interrupted);
        }
        if let Some(e) = self.deferred.take() {
            return Err(EngineError::Failed(e));
        }
        if self.pending.is_some() {
            // the codec is still full from the previous packet
            self.retry_pending()?;
            if self.pending.is_some() {
                return Err(EngineError::Failed("decoder input queue full".into()));
            }
        }

        if packet.is_end_of_stream() {
            return match self.decoder.try_flush() {
                Ok(()) => Ok(()),
                Err(e) if e.is_again() => {
                    self.pending = Some(Pending::Flush);
                    Ok(())
                }
                Err(e) => Err(EngineError::Failed(e.to_string())),
            };
        }

        let mut av_packet = PacketMut::from(packet.data.as_ref());
        if let Some(pts) = packet.pts {
            av_packet = av_packet.with_pts(Timestamp::new(pts, micros()));
        }
        let av_packet = av_packet.freeze();

        match self.decoder.try_push(av_packet.clone()) {
            Ok(()) => Ok(()),
            Err(e) if e.is_again() => {
                debug!("FfmpegEngine: codec full, holding packet");
                self.pending = Some(Pending::Packet(av_packet));
                Ok(())
            }
            Err(e) => Err(EngineError::Failed(e.to_string())),
        }
    }

    fn retrieve(
        &mut self,
        frame: &mut VideoFrame,
        cancel: &CancellationToken,
    ) -> Result<Retrieved, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Interrupted);
        }

        let decoded = match self.decoder.take() {
            Ok(Some(decoded)) => decoded,
            Ok(None) => return Ok(Retrieved::NeedMore),
            Err(e) => return Err(EngineError::Failed(e.to_string())),
        };

        self.copy_frame(&decoded, frame);

        // the frame is good either way; the held-back packet's fate is
        // reported with the next packet
        if let Err(EngineError::Failed(e)) = self.retry_pending() {
            warn!("FfmpegEngine: held-back input rejected: {}", e);
            self.deferred = Some(e);
        }
        Ok(Retrieved::Frame)
    }
}

impl FfmpegEngine {
    fn retry_pending(&mut self) -> Result<(), EngineError> {
        let result = match self.pending.take() {
            None => return Ok(()),
            Some(Pending::Packet(av_packet)) => self
                .decoder
                .try_push(av_packet.clone())
                .map_err(|e| (e, Pending::Packet(av_packet))),
            Some(Pending::Flush) => self.decoder.try_flush().map_err(|e| (e, Pending::Flush)),
        };

        match result {
            Ok(()) => Ok(()),
            Err((e, pending)) if e.is_again() => {
                self.pending = Some(pending);
                Ok(())
            }
            Err((e, _)) => Err(EngineError::Failed(e.to_string())),
        }
    }

    fn copy_frame(&mut self, decoded: &video::VideoFrame, frame: &mut VideoFrame) {
        let w = decoded.width();
        let format = PixelFormat::from_name(decoded.pixel_format().name());
        let row_bytes = row_bytes(&format, w);

        if row_bytes.is_empty() {
            let name = format.to_string();
            if self.unknown_format.as_ref() != Some(&name) {
                warn!("FfmpegEngine: no plane layout for {}, planes copied with padding", name);
                self.unknown_format = Some(name);
            }
        } else {
            self.unknown_format = None;
        }

        frame.pts = decoded.pts().as_micros();
        frame.width = w as u32;
        frame.height = decoded.height() as u32;
        frame.format = format;

        let planes = decoded.planes();
        frame.reset_planes(planes.len());
        for (i, plane) in planes.iter().enumerate() {
            let stride = plane.line_size();
            let data = plane.data();
            let width = row_bytes.get(i).copied().unwrap_or(stride).min(stride);
            let rows = if stride == 0 { 0 } else { data.len() / stride };

            let dst = &mut frame.planes[i];
            extract_plane(&mut dst.data, data, stride, width, rows);
            dst.stride = width;
        }
    }
}

/// Bytes per row of each plane once the padding is stripped; empty when the
/// layout of `format` is not known.
fn row_bytes(format: &PixelFormat, width: usize) -> Vec<usize> {
    match format {
        PixelFormat::Yuv420p => {
            let cw = width.div_ceil(2);
            vec![width, cw, cw]
        }
        PixelFormat::Nv12 => vec![width, width.div_ceil(2) * 2],
        PixelFormat::Rgba => vec![width * 4],
        PixelFormat::Other(_) => Vec::new(),
    }
}

/// Copy a padded plane into a contiguous buffer, reusing its allocation.
///
/// # Performance
/// - Fast path: No padding -> single memcpy
/// - Fallback: Row-by-row copy
#[inline]
fn extract_plane(dst: &mut Vec<u8>, src: &[u8], stride: usize, width: usize, height: usize) {
    dst.clear();

    // Fast path: No stride padding
    if stride == width && src.len() >= width * height {
        dst.extend_from_slice(&src[..width * height]);
        return;
    }

    // Fallback: Row-by-row copy
    dst.reserve(width * height);
    for r in 0..height {
        let src_start = r * stride;
        if src_start + width > src.len() {
            break;
        }
        dst.extend_from_slice(&src[src_start..src_start + width]);
    }
}
