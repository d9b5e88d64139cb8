//! Frame statistics for the decode/render hand-off

use log::info;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Counters shared by the decoder, the frame slot and the renderer.
///
/// All fields use atomic operations for thread-safe access.
pub struct PipelineHealth {
    /// Frames produced by the decode engine
    pub frames_decoded: AtomicU64,

    /// Frames claimed by the renderer
    pub frames_rendered: AtomicU64,

    /// Frames overwritten in the slot before the renderer saw them
    pub frame_drops: AtomicU64,

    /// Submit or decode errors reported by the engine
    pub decode_failures: AtomicU64,

    /// Total bytes of decoded pixel data
    pub bytes_decoded: AtomicU64,

    fps: FpsCounter,
}

impl PipelineHealth {
    pub fn new() -> Self {
        Self {
            frames_decoded: AtomicU64::new(0),
            frames_rendered: AtomicU64::new(0),
            frame_drops: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            bytes_decoded: AtomicU64::new(0),
            fps: FpsCounter::new(),
        }
    }

    pub fn record_decoded(&self, size: usize) {
        self.frames_decoded.fetch_add(1, Ordering::Relaxed);
        self.bytes_decoded.fetch_add(size as u64, Ordering::Relaxed);
    }

    pub fn record_rendered(&self) {
        self.frames_rendered.fetch_add(1, Ordering::Relaxed);
        self.fps.add_rendered();
    }

    pub fn record_frame_drop(&self) {
        self.frame_drops.fetch_add(1, Ordering::Relaxed);
        self.fps.add_skipped();
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded.load(Ordering::Relaxed)
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered.load(Ordering::Relaxed)
    }

    pub fn frame_drops(&self) -> u64 {
        self.frame_drops.load(Ordering::Relaxed)
    }

    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    pub fn bytes_decoded(&self) -> u64 {
        self.bytes_decoded.load(Ordering::Relaxed)
    }

    /// Percentage of decoded frames that were never rendered
    pub fn frame_drop_rate(&self) -> f64 {
        let drops = self.frame_drops();
        let decoded = self.frames_decoded();
        if decoded == 0 {
            return 0.0;
        }
        (drops as f64 / decoded as f64) * 100.0
    }

    /// The per-second fps log line, off until started.
    pub fn fps(&self) -> &FpsCounter {
        &self.fps
    }

    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            frames_decoded: self.frames_decoded(),
            frames_rendered: self.frames_rendered(),
            frame_drops: self.frame_drops(),
            decode_failures: self.decode_failures(),
            bytes_decoded: self.bytes_decoded(),
            frame_drop_rate: self.frame_drop_rate(),
        }
    }
}

impl Default for PipelineHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of health metrics
#[derive(Debug, Clone)]
pub struct HealthSummary {
    pub frames_decoded: u64,
    pub frames_rendered: u64,
    pub frame_drops: u64,
    pub decode_failures: u64,
    pub bytes_decoded: u64,
    pub frame_drop_rate: f64,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Health: {} decoded, {} rendered, {} skipped ({:.2}%), {} decode failures, {} bytes",
            self.frames_decoded,
            self.frames_rendered,
            self.frame_drops,
            self.frame_drop_rate,
            self.decode_failures,
            self.bytes_decoded
        )
    }
}

const FPS_INTERVAL: Duration = Duration::from_secs(1);

/// Rendered/skipped frame counter that logs once per interval.
pub struct FpsCounter {
    started: AtomicBool,
    window: Mutex<FpsWindow>,
}

#[derive(Debug, Clone, Copy)]
struct FpsWindow {
    since: Instant,
    rendered: u32,
    skipped: u32,
}

impl FpsCounter {
    pub fn new() -> Self {
        Self {
            started: AtomicBool::new(false),
            window: Mutex::new(FpsWindow {
                since: Instant::now(),
                rendered: 0,
                skipped: 0,
            }),
        }
    }

    pub fn start(&self) {
        if let Ok(mut window) = self.window.lock() {
            *window = FpsWindow {
                since: Instant::now(),
                rendered: 0,
                skipped: 0,
            };
        }
        self.started.store(true, Ordering::Release);
    }

    pub fn stop(&self) {
        self.started.store(false, Ordering::Release);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    fn add_rendered(&self) {
        if self.is_started() {
            self.add_at(Instant::now(), 1, 0);
        }
    }

    fn add_skipped(&self) {
        if self.is_started() {
            self.add_at(Instant::now(), 0, 1);
        }
    }

    /// Accounts for the frames and returns the `(rendered, skipped)` pair of
    /// the window that just elapsed, if any.
    fn add_at(&self, now: Instant, rendered: u32, skipped: u32) -> Option<(u32, u32)> {
        let Ok(mut window) = self.window.lock() else {
            return None;
        };

        let mut elapsed = None;
        if now.saturating_duration_since(window.since) >= FPS_INTERVAL {
            info!("{} fps (+{} frames skipped)", window.rendered, window.skipped);
            elapsed = Some((window.rendered, window.skipped));
            window.since = now;
            window.rendered = 0;
            window.skipped = 0;
        }

        window.rendered += rendered;
        window.skipped += skipped;
        elapsed
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}
