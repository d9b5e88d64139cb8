use crate::decoder::CodecDescriptor;
use crate::frame::Packet;
use ac_ffmpeg::format::demuxer::{Demuxer, DemuxerWithStreamInfo};
use ac_ffmpeg::format::io::IO;
use anyhow::{Context, Result, anyhow};
use log::{debug, info};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Reader that fails once the token is cancelled, so a demuxer blocked on
/// input unwinds as soon as the pipeline is torn down.
///
/// The error is not `ErrorKind::Interrupted`: std read loops retry that kind
/// forever.
pub struct InterruptibleReader<R> {
    inner: R,
    token: CancellationToken,
}

impl<R: Read> InterruptibleReader<R> {
    pub fn new(inner: R, token: CancellationToken) -> Self {
        Self { inner, token }
    }
}

impl<R: Read> Read for InterruptibleReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.token.is_cancelled() {
            return Err(io::Error::other("source interrupted"));
        }
        self.inner.read(buf)
    }
}

/// Compressed packets of the first video stream of a container file.
pub struct PacketSource {
    demuxer: DemuxerWithStreamInfo<InterruptibleReader<File>>,
    stream_index: usize,
    descriptor: CodecDescriptor,
    token: CancellationToken,
}

impl PacketSource {
    pub fn open(path: impl AsRef<Path>, token: CancellationToken) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("could not open {}", path.display()))?;

        let io = IO::from_read_stream(InterruptibleReader::new(file, token.clone()));
        let demuxer = Demuxer::builder()
            .build(io)
            .with_context(|| format!("could not read container {}", path.display()))?
            .find_stream_info(None)
            .map_err(|(_, e)| e)
            .context("could not probe streams")?;

        let (stream_index, descriptor) = demuxer
            .streams()
            .iter()
            .enumerate()
            .find_map(|(index, stream)| {
                let params = stream.codec_parameters();
                let video = params.as_video_codec_parameters()?;
                let mut descriptor = CodecDescriptor::new(params.decoder_name().unwrap_or("unknown"));
                descriptor.parameters = Some(video.clone());
                Some((index, descriptor))
            })
            .ok_or_else(|| anyhow!("{} has no video stream", path.display()))?;

        info!(
            "PacketSource: {} stream #{} ({})",
            path.display(),
            stream_index,
            descriptor.codec
        );
        Ok(Self {
            demuxer,
            stream_index,
            descriptor,
            token,
        })
    }

    pub fn descriptor(&self) -> &CodecDescriptor {
        &self.descriptor
    }

    /// Next packet of the selected stream; `None` at end of input.
    pub fn next_packet(&mut self) -> Result<Option<Packet>> {
        loop {
            if self.token.is_cancelled() {
                return Ok(None);
            }
            let Some(packet) = self.demuxer.take().context("could not read packet")? else {
                debug!("PacketSource: end of input");
                return Ok(None);
            };
            if packet.stream_index() != self.stream_index {
                continue;
            }

            let pts = packet.pts().as_micros();
            return Ok(Some(
                Packet::new(packet.data().to_vec(), pts).with_keyframe(packet.is_key()),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_passes_data_through() {
        let token = CancellationToken::new();
        let mut reader = InterruptibleReader::new(&b"abc"[..], token);
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "abc");
    }

    #[test]
    fn test_reader_interrupted_after_cancel() {
        let token = CancellationToken::new();
        let mut reader = InterruptibleReader::new(&b"abc"[..], token.clone());
        let mut buf = [0u8; 1];
        assert_eq!(reader.read(&mut buf).unwrap(), 1);

        token.cancel();
        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
    }

    #[test]
    fn test_read_exact_returns_after_cancel() {
        let token = CancellationToken::new();
        token.cancel();

        let worker = std::thread::spawn(move || {
            let mut reader = InterruptibleReader::new(&b"abcdef"[..], token);
            reader.read_exact(&mut [0u8; 4])
        });

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(3);
        while !worker.is_finished() {
            assert!(std::time::Instant::now() < deadline, "read_exact kept retrying");
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(worker.join().unwrap().is_err());
    }

    #[test]
    fn test_open_missing_file() {
        let path = std::env::temp_dir().join("framegate-no-such-input.mkv");
        assert!(PacketSource::open(&path, CancellationToken::new()).is_err());
    }
}
