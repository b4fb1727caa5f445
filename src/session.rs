// src/session.rs
//
// Live capture pipeline: raw serial chunks in, stamped frames into the log.
// One session owns the decoder; received and transmitted frames share a
// single clock so deltas run across both directions.

use std::sync::Arc;

use crate::buffer_store::FrameLog;
use crate::io::{now_us, CanFrame, FrameTimestamp, SlcanDecoder, SlcanEvent};

/// What one chunk produced
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IngestSummary {
    /// Frames appended to the log
    pub frames: usize,
    /// `z` / `Z` acknowledgements
    pub acks: usize,
    /// Bell (error) responses
    pub errors: usize,
    /// Lines that were neither frames nor control responses, verbatim
    pub unknown: Vec<String>,
}

/// Capture session bound to one frame log
pub struct CaptureSession {
    decoder: SlcanDecoder,
    log: Arc<FrameLog>,
    /// Host time of the last logged frame (RX or TX)
    last_frame_us: Option<u64>,
}

impl CaptureSession {
    pub fn new(log: Arc<FrameLog>) -> Self {
        Self {
            decoder: SlcanDecoder::new(),
            log,
            last_frame_us: None,
        }
    }

    pub fn log(&self) -> &Arc<FrameLog> {
        &self.log
    }

    /// Lines dropped as malformed so far
    pub fn dropped_lines(&self) -> u64 {
        self.decoder.dropped()
    }

    /// Feed a chunk received at the current host time
    pub fn ingest(&mut self, chunk: &[u8]) -> IngestSummary {
        self.ingest_at(chunk, now_us())
    }

    /// Feed a chunk received at `at_us`. Every frame it completes is stamped
    /// with that time and appended to the log in one batch.
    pub fn ingest_at(&mut self, chunk: &[u8], at_us: u64) -> IngestSummary {
        let mut summary = IngestSummary::default();
        let mut batch = Vec::new();

        for event in self.decoder.feed(chunk) {
            match event {
                SlcanEvent::Frame(frame) => {
                    batch.push(self.stamp(frame, at_us));
                }
                SlcanEvent::Ack { .. } => summary.acks += 1,
                SlcanEvent::Error { raw } => {
                    tlog!("[slcan] Adapter reported an error ({:?})", raw);
                    summary.errors += 1;
                }
                SlcanEvent::Unknown { raw } => summary.unknown.push(raw),
            }
        }

        summary.frames = batch.len();
        if !batch.is_empty() {
            self.log.append_batch(batch);
        }
        summary
    }

    /// Log a frame this host transmitted
    pub fn record_tx(&mut self, frame: &CanFrame) -> CanFrame {
        self.record_tx_at(frame, now_us())
    }

    /// Log a frame transmitted at `at_us`, tagged TX / TX_RTR / TX_FD
    pub fn record_tx_at(&mut self, frame: &CanFrame, at_us: u64) -> CanFrame {
        let delta = self.advance(at_us);
        let tx = frame.as_transmitted(FrameTimestamp::Captured(at_us), delta);
        self.log.append(tx.clone());
        tx
    }

    /// Forget partial input and restart the delta clock (e.g. after reconnecting)
    pub fn reset(&mut self) {
        self.decoder.reset();
        self.last_frame_us = None;
    }

    fn stamp(&mut self, mut frame: CanFrame, at_us: u64) -> CanFrame {
        frame.delta = self.advance(at_us);
        frame.timestamp = FrameTimestamp::Captured(at_us);
        frame
    }

    /// Seconds since the previous logged frame; 0 for the first
    fn advance(&mut self, at_us: u64) -> f64 {
        let delta = match self.last_frame_us {
            Some(prev) => at_us.saturating_sub(prev) as f64 / 1_000_000.0,
            None => 0.0,
        };
        self.last_frame_us = Some(at_us);
        delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Direction;

    #[test]
    fn test_ingest_stamps_and_logs_frames() {
        let log = Arc::new(FrameLog::new());
        let mut session = CaptureSession::new(log.clone());

        let summary = session.ingest_at(b"t1231AA\rt12", 1_000_000);
        assert_eq!(summary.frames, 1);
        let summary = session.ingest_at(b"42BBCC\r", 1_250_000);
        assert_eq!(summary.frames, 1);

        assert_eq!(log.len(), 2);
        let first = log.get(0).unwrap();
        assert_eq!(first.timestamp, FrameTimestamp::Captured(1_000_000));
        assert_eq!(first.delta, 0.0);
        assert_eq!(first.direction, Direction::Rx);
        let second = log.get(1).unwrap();
        assert_eq!(second.id, 0x124);
        assert_eq!(second.delta, 0.25);
    }

    #[test]
    fn test_ingest_reports_control_lines() {
        let log = Arc::new(FrameLog::new());
        let mut session = CaptureSession::new(log.clone());

        let summary = session.ingest_at(b"z\r\x07\rV1013\rtZZZ0\r", 0);
        assert_eq!(
            summary,
            IngestSummary {
                frames: 0,
                acks: 1,
                errors: 1,
                unknown: vec!["V1013".to_string()],
            }
        );
        assert_eq!(session.dropped_lines(), 1);
        assert!(log.is_empty());
    }

    #[test]
    fn test_tx_and_rx_share_the_delta_clock() {
        let log = Arc::new(FrameLog::new());
        let mut session = CaptureSession::new(log.clone());

        session.ingest_at(b"t1000\r", 2_000_000);
        let tx = session.record_tx_at(&CanFrame::remote(0x200, false, 2), 2_500_000);
        assert_eq!(tx.direction, Direction::TxRtr);
        assert_eq!(tx.delta, 0.5);
        session.ingest_at(b"t1000\r", 2_600_000);

        let deltas: Vec<f64> = log.snapshot().iter().map(|f| f.delta).collect();
        assert_eq!(deltas.len(), 3);
        assert!((deltas[2] - 0.1).abs() < 1e-9);

        session.reset();
        session.ingest_at(b"t1000\r", 9_000_000);
        assert_eq!(log.get(3).unwrap().delta, 0.0);
    }
}
