use crate::frame::VideoFrame;
use anyhow::{Context, Result, anyhow};
use log::{debug, error, info, warn};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Receives every decoded frame, including the ones the renderer skips.
///
/// Called on the decode thread while the frame is still borrowed from the
/// slot, so implementations must return quickly.
pub trait FrameSink: Send {
    fn record(&mut self, frame: &VideoFrame) -> Result<()>;

    /// Flush whatever is still buffered; called once the stream has ended.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// What the writer thread did before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordStats {
    pub frames_written: u64,
    pub bytes_written: u64,
    /// Frames refused because the queue was full
    pub frames_dropped: u64,
}

/// Dumps raw planar frames to a file from a dedicated writer thread.
///
/// Frames are handed over through a bounded channel; when the writer falls
/// behind, new frames are dropped instead of stalling the decoder.
pub struct Recorder {
    path: PathBuf,
    tx: Option<mpsc::Sender<VideoFrame>>,
    handle: Option<JoinHandle<Result<RecordStats>>>,
    dropped: u64,
}

impl Recorder {
    pub fn start(path: impl AsRef<Path>, queue: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)
            .with_context(|| format!("could not create recording {}", path.display()))?;

        let (tx, rx) = mpsc::channel(queue.max(1));
        let handle = thread::Builder::new()
            .name("recorder".into())
            .spawn(move || write_frames(BufWriter::new(file), rx))
            .context("could not spawn recorder thread")?;

        info!("Recorder: writing raw frames to {}", path.display());
        Ok(Self {
            path,
            tx: Some(tx),
            handle: Some(handle),
            dropped: 0,
        })
    }

    /// Close the queue, wait for the writer to drain it and flush the file.
    fn shutdown(&mut self) -> Result<RecordStats> {
        drop(self.tx.take());
        let Some(handle) = self.handle.take() else {
            return Ok(RecordStats {
                frames_dropped: self.dropped,
                ..Default::default()
            });
        };

        let mut stats = handle
            .join()
            .map_err(|_| anyhow!("recorder thread panicked"))??;
        stats.frames_dropped = self.dropped;
        info!(
            "Recorder: {} frames ({} bytes) written to {}, {} dropped",
            stats.frames_written,
            stats.bytes_written,
            self.path.display(),
            stats.frames_dropped
        );
        Ok(stats)
    }
}

impl FrameSink for Recorder {
    fn record(&mut self, frame: &VideoFrame) -> Result<()> {
        let Some(tx) = &self.tx else {
            return Err(anyhow!("recorder already finished"));
        };

        match tx.try_send(frame.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                // Log every 30 drops to avoid spam
                if self.dropped % 30 == 1 {
                    warn!("Recorder: falling behind, {} frames dropped", self.dropped);
                }
                Ok(())
            }
            Err(TrySendError::Closed(_)) => {
                // the writer stopped on an error; it is reported by finish()
                self.tx = None;
                Err(anyhow!("recorder stopped"))
            }
        }
    }

    fn finish(&mut self) -> Result<()> {
        self.shutdown().map(|_| ())
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.handle.is_some()
            && let Err(e) = self.shutdown()
        {
            error!("Recorder: {:#}", e);
        }
    }
}

fn write_frames<W: Write>(mut out: W, mut rx: mpsc::Receiver<VideoFrame>) -> Result<RecordStats> {
    let mut stats = RecordStats::default();

    while let Some(frame) = rx.blocking_recv() {
        if let Err(e) = write_frame(&mut out, &frame) {
            error!("Recorder: write failed, stopping: {:#}", e);
            return Err(e);
        }
        stats.frames_written += 1;
        stats.bytes_written += frame.byte_len() as u64;
    }

    out.flush().context("could not flush recording")?;
    debug!("Recorder: queue closed after {} frames", stats.frames_written);
    Ok(stats)
}

fn write_frame<W: Write>(out: &mut W, frame: &VideoFrame) -> Result<()> {
    for plane in &frame.planes {
        out.write_all(&plane.data)
            .context("could not write frame plane")?;
    }
    Ok(())
}
