// src/io/timeline/replay.rs
//
// Fixed-interval replay of a parsed trace through a FrameWriter. Each frame
// sent is also logged locally as transmitted.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use crate::buffer_store::FrameLog;
use crate::io::{CanFrame, FrameCodec, FrameTimestamp, FrameWriter, IoError, SlcanCodec};

/// Frames between progress callbacks
pub const PROGRESS_EVERY: usize = 10;

/// Poll period while paused
const PAUSE_POLL_MS: u64 = 50;

/// Shared cancel/pause flags for a running replay
#[derive(Clone, Debug, Default)]
pub struct ReplayControl {
    /// Set to true to stop after the current frame
    pub cancel_flag: Arc<AtomicBool>,
    /// Set to true to hold playback
    pub pause_flag: Arc<AtomicBool>,
}

impl ReplayControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset control flags for a new replay
    pub fn reset(&self) {
        self.cancel_flag.store(false, Ordering::Relaxed);
        self.pause_flag.store(false, Ordering::Relaxed);
    }

    pub fn cancel(&self) {
        self.cancel_flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::Relaxed)
    }

    pub fn pause(&self) {
        self.pause_flag.store(true, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.pause_flag.store(false, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.pause_flag.load(Ordering::Relaxed)
    }
}

/// Replay pacing
#[derive(Clone, Debug)]
pub struct ReplayOptions {
    /// Gap between consecutive frames
    pub interval_ms: u64,
    /// Start over after the last frame until cancelled
    pub looped: bool,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            interval_ms: 100,
            looped: false,
        }
    }
}

/// How a replay ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// Every frame was sent (never returned when looping)
    Completed { sent: usize },
    /// Stopped through `ReplayControl::cancel`
    Cancelled { sent: usize },
}

/// Send `frames` one per interval.
///
/// Each sent frame is appended to `log` as transmitted with delta 0.
/// `on_progress(position, total)` runs every `PROGRESS_EVERY` frames and after
/// the last one. Frames that cannot be encoded are skipped; a write failure
/// ends the replay.
pub async fn replay<F>(
    frames: &[CanFrame],
    writer: &dyn FrameWriter,
    log: &FrameLog,
    options: &ReplayOptions,
    control: &ReplayControl,
    mut on_progress: F,
) -> Result<ReplayOutcome, IoError>
where
    F: FnMut(usize, usize),
{
    let total = frames.len();
    let interval = Duration::from_millis(options.interval_ms);
    let mut sent = 0usize;
    let mut position = 0usize;

    tlog!(
        "[replay] Starting ({} frames, interval: {}ms, loop: {})",
        total, options.interval_ms, options.looped
    );

    if total == 0 {
        return Ok(ReplayOutcome::Completed { sent });
    }

    loop {
        tokio::time::sleep(interval).await;

        while control.is_paused() && !control.is_cancelled() {
            tokio::time::sleep(Duration::from_millis(PAUSE_POLL_MS)).await;
        }
        if control.is_cancelled() {
            tlog!("[replay] Cancelled after {} frames", sent);
            return Ok(ReplayOutcome::Cancelled { sent });
        }

        if position >= total {
            if options.looped {
                position = 0;
            } else {
                break;
            }
        }

        let frame = &frames[position];
        match SlcanCodec::encode(frame) {
            Ok(bytes) => {
                writer.write_command(bytes).await?;
                log.append(frame.as_transmitted(FrameTimestamp::now(), 0.0));
                sent += 1;
            }
            Err(e) => tlog!("[replay] Skipping frame {}: {}", position, e),
        }

        position += 1;
        if position % PROGRESS_EVERY == 0 || position >= total {
            on_progress(position, total);
        }
        if position >= total && !options.looped {
            break;
        }
    }

    tlog!("[replay] Done ({} frames sent)", sent);
    Ok(ReplayOutcome::Completed { sent })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Direction;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records every command and cancels the replay after `limit` writes
    #[derive(Default)]
    struct RecordingWriter {
        written: Mutex<Vec<String>>,
        limit: Option<(usize, ReplayControl)>,
        fail: bool,
    }

    #[async_trait]
    impl FrameWriter for RecordingWriter {
        async fn write_command(&self, data: Vec<u8>) -> Result<(), IoError> {
            if self.fail {
                return Err(IoError::connection("test", "port closed"));
            }
            let mut written = self.written.lock().unwrap();
            written.push(String::from_utf8(data).unwrap());
            if let Some((limit, control)) = &self.limit {
                if written.len() >= *limit {
                    control.cancel();
                }
            }
            Ok(())
        }
    }

    fn trace(n: u32) -> Vec<CanFrame> {
        (0..n).map(|i| CanFrame::data(0x100 + i, false, &[i as u8])).collect()
    }

    fn fast() -> ReplayOptions {
        ReplayOptions {
            interval_ms: 0,
            looped: false,
        }
    }

    #[tokio::test]
    async fn test_replay_sends_and_logs_every_frame() {
        let writer = RecordingWriter::default();
        let log = FrameLog::new();
        let mut progress = Vec::new();

        let outcome = replay(&trace(12), &writer, &log, &fast(), &ReplayControl::new(), |p, t| {
            progress.push((p, t))
        })
        .await
        .unwrap();

        assert_eq!(outcome, ReplayOutcome::Completed { sent: 12 });
        let written = writer.written.lock().unwrap();
        assert_eq!(written[0], "t100100\r");
        assert_eq!(written[11], "t10B10B\r");
        assert_eq!(progress, vec![(10, 12), (12, 12)]);

        assert_eq!(log.len(), 12);
        let first = log.get(0).unwrap();
        assert_eq!(first.direction, Direction::Tx);
        assert_eq!(first.delta, 0.0);
        assert!(matches!(first.timestamp, FrameTimestamp::Captured(_)));
    }

    #[tokio::test]
    async fn test_replay_loops_until_cancelled() {
        let control = ReplayControl::new();
        let writer = RecordingWriter {
            limit: Some((7, control.clone())),
            ..Default::default()
        };
        let log = FrameLog::new();
        let options = ReplayOptions {
            interval_ms: 0,
            looped: true,
        };

        let outcome = replay(&trace(3), &writer, &log, &options, &control, |_, _| {})
            .await
            .unwrap();

        assert_eq!(outcome, ReplayOutcome::Cancelled { sent: 7 });
        let written = writer.written.lock().unwrap();
        assert_eq!(written[3], written[0]);
        assert_eq!(written[6], written[0]);
    }

    #[tokio::test]
    async fn test_replay_skips_unencodable_frames() {
        let writer = RecordingWriter::default();
        let log = FrameLog::new();
        let mut frames = trace(2);
        frames[0].id = 0x800; // too wide for a standard ID

        let outcome = replay(&frames, &writer, &log, &fast(), &ReplayControl::new(), |_, _| {})
            .await
            .unwrap();
        assert_eq!(outcome, ReplayOutcome::Completed { sent: 1 });
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn test_replay_stops_on_write_error() {
        let writer = RecordingWriter {
            fail: true,
            ..Default::default()
        };
        let log = FrameLog::new();
        let result = replay(&trace(2), &writer, &log, &fast(), &ReplayControl::new(), |_, _| {}).await;
        assert!(result.is_err());
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_replay_cancelled_before_start() {
        let control = ReplayControl::new();
        control.pause();
        control.cancel();
        let outcome = replay(&trace(2), &RecordingWriter::default(), &FrameLog::new(), &fast(), &control, |_, _| {})
            .await
            .unwrap();
        assert_eq!(outcome, ReplayOutcome::Cancelled { sent: 0 });

        control.reset();
        assert!(!control.is_cancelled());
        assert!(!control.is_paused());
    }
}
