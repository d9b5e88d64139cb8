//! Raw frame and compressed packet types shared by the decoder, the frame
//! slot and the recording sink.

use bytes::Bytes;

/// Pixel layout of a decoded frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PixelFormat {
    /// YUV 4:2:0 planar, three planes
    #[default]
    Yuv420p,
    /// Y plane followed by an interleaved UV plane
    Nv12,
    /// RGBA packed, one plane
    Rgba,
    /// Anything else the engine produced, kept by name
    Other(String),
}

impl PixelFormat {
    pub fn from_name(name: &str) -> Self {
        match name {
            "yuv420p" | "yuvj420p" => PixelFormat::Yuv420p,
            "nv12" => PixelFormat::Nv12,
            "rgba" => PixelFormat::Rgba,
            other => PixelFormat::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PixelFormat::Yuv420p => write!(f, "yuv420p"),
            PixelFormat::Nv12 => write!(f, "nv12"),
            PixelFormat::Rgba => write!(f, "rgba"),
            PixelFormat::Other(name) => write!(f, "{}", name),
        }
    }
}

/// A single plane of pixel data.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Plane {
    pub data: Vec<u8>,
    /// Bytes between the start of two rows (may include padding)
    pub stride: usize,
}

/// One fully decoded image plus its metadata.
///
/// Frames are reused in place by the frame slot, so writers are expected to
/// overwrite every field instead of assuming a freshly allocated value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VideoFrame {
    /// Presentation timestamp in microseconds, if the stream carried one
    pub pts: Option<i64>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: Vec<Plane>,
}

impl VideoFrame {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Total number of pixel bytes over all planes.
    pub fn byte_len(&self) -> usize {
        self.planes.iter().map(|p| p.data.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.planes.is_empty()
    }

    /// Resize the plane list, keeping the existing allocations where possible.
    pub fn reset_planes(&mut self, count: usize) {
        self.planes.resize_with(count, Plane::default);
    }
}

/// One compressed packet, in stream order.
///
/// An empty payload is the end-of-stream marker: it asks the engine to flush
/// whatever it still buffers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Packet {
    pub data: Bytes,
    /// Presentation timestamp in microseconds
    pub pts: Option<i64>,
    pub keyframe: bool,
}

impl Packet {
    pub fn new(data: impl Into<Bytes>, pts: Option<i64>) -> Self {
        Self {
            data: data.into(),
            pts,
            keyframe: false,
        }
    }

    pub fn with_keyframe(mut self, keyframe: bool) -> Self {
        self.keyframe = keyframe;
        self
    }

    pub fn end_of_stream() -> Self {
        Self::default()
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_byte_len() {
        let frame = VideoFrame {
            pts: Some(40_000),
            width: 4,
            height: 2,
            format: PixelFormat::Yuv420p,
            planes: vec![
                Plane { data: vec![0; 8], stride: 4 },
                Plane { data: vec![0; 2], stride: 2 },
                Plane { data: vec![0; 2], stride: 2 },
            ],
        };
        assert_eq!(frame.byte_len(), 12);
        assert!(!frame.is_empty());
        assert!(VideoFrame::empty().is_empty());
    }

    #[test]
    fn test_reset_planes_keeps_allocations() {
        let mut frame = VideoFrame::empty();
        frame.reset_planes(3);
        frame.planes[0].data.extend_from_slice(&[1, 2, 3]);
        frame.reset_planes(3);
        assert_eq!(frame.planes[0].data, vec![1, 2, 3]);
        frame.reset_planes(1);
        assert_eq!(frame.planes.len(), 1);
    }

    #[test]
    fn test_end_of_stream_packet() {
        assert!(Packet::end_of_stream().is_end_of_stream());
        let packet = Packet::new(vec![0u8, 0, 0, 1, 0x65], Some(0)).with_keyframe(true);
        assert!(!packet.is_end_of_stream());
        assert!(packet.keyframe);
    }

    #[test]
    fn test_pixel_format_names() {
        assert_eq!(PixelFormat::from_name("yuvj420p"), PixelFormat::Yuv420p);
        assert_eq!(PixelFormat::from_name("nv12").to_string(), "nv12");
        assert_eq!(
            PixelFormat::from_name("p010le"),
            PixelFormat::Other("p010le".to_string())
        );
    }
}
