//! Quiet-point segment planner.
//!
//! Long audio is cut near the nominal segment length, at the point of
//! lowest speech-band energy inside a ±10% search window, so no segment
//! boundary lands in the middle of a word.

use std::io::Read;
use std::path::Path;

use tracing::{debug, info};

use crate::error::{Result, SublingoError};
use crate::media;

/// Sliding energy window length in seconds.
const ENERGY_WINDOW_SECS: f64 = 0.5;
/// Search tolerance around the nominal length.
const SEARCH_TOLERANCE: f64 = 0.1;
/// A trailing remainder shorter than this fraction of L is folded into the
/// previous segment instead of standing alone.
const MIN_TAIL_RATIO: f64 = 0.25;

/// One planned cut range, in seconds from the start of the source audio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentRange {
    pub start: f64,
    pub end: f64,
}

impl SegmentRange {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Fixed-capacity circular queue accumulating a rolling energy sum.
struct EnergyWindow {
    buf: Vec<f32>,
    head: usize,
    len: usize,
    sum: f32,
}

impl EnergyWindow {
    fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0.0; capacity],
            head: 0,
            len: 0,
            sum: 0.0,
        }
    }

    fn is_full(&self) -> bool {
        self.len == self.buf.len()
    }

    /// Push one sample's energy, evicting the oldest when full.
    /// Returns the rolling sum after the push.
    fn push(&mut self, energy: f32) -> f32 {
        if self.is_full() {
            self.sum -= self.buf[self.head];
        } else {
            self.len += 1;
        }
        self.buf[self.head] = energy;
        self.sum += energy;
        self.head = (self.head + 1) % self.buf.len();
        self.sum
    }
}

/// Scan a PCM byte stream for the index of minimum rolling energy.
///
/// The stream is mono little-endian s16 at [`media::PLAN_SAMPLE_RATE`].
/// The returned value is in seconds relative to `window_start`, biased to
/// the midpoint of the energy window.
fn scan_quietest_offset(mut reader: impl Read, window_start: f64) -> Result<f64> {
    let capacity = (media::PLAN_SAMPLE_RATE as f64 * ENERGY_WINDOW_SECS) as usize;
    let mut window = EnergyWindow::new(capacity);
    let mut chunk = [0u8; 1024];
    let mut pending: Option<u8> = None;
    let mut index: usize = 0;
    let mut min_energy = f32::MAX;
    let mut min_energy_index: usize = 0;

    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                return Err(SublingoError::Media(format!(
                    "error reading pcm stream: {e}"
                )))
            }
        };
        for &byte in &chunk[..n] {
            let low = match pending.take() {
                Some(low) => low,
                None => {
                    pending = Some(byte);
                    continue;
                }
            };
            index += 1;
            let sample = i16::from_le_bytes([low, byte]);
            let energy = sample as f32 * sample as f32;
            let was_full = window.is_full();
            let current = window.push(energy);
            if was_full && current <= min_energy {
                min_energy = current;
                min_energy_index = index.saturating_sub(capacity / 2);
            }
        }
    }

    if index < capacity {
        // Window never filled; no minimum was ever recorded, so the cut
        // stays at the window start.
        min_energy_index = 0;
    }

    Ok(min_energy_index as f64 / media::PLAN_SAMPLE_RATE as f64 + window_start)
}

/// Find the quietest time point inside `[start, end]` of the input audio.
fn quietest_time_point(ffmpeg: &str, input: &Path, start: f64, end: f64) -> Result<f64> {
    let mut child = media::spawn_pcm_stream(ffmpeg, input, start, end)?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| SublingoError::Media("pcm stream has no stdout".to_string()))?;

    let point = scan_quietest_offset(stdout, start)?;

    let status = child
        .wait()
        .map_err(|e| SublingoError::Media(format!("ffmpeg pcm stream wait failed: {e}")))?;
    if !status.success() {
        return Err(SublingoError::Media(
            "ffmpeg pcm stream exited with failure".to_string(),
        ));
    }
    Ok(point)
}

/// Plan cut ranges for the whole file.
///
/// Every range except the last is bounded to `[0.9·L, 1.1·L]`; a short
/// final remainder is absorbed into the preceding range.
pub fn plan_segments(
    ffmpeg: &str,
    ffprobe: &str,
    input: &Path,
    segment_seconds: f64,
) -> Result<Vec<SegmentRange>> {
    let total = media::probe_duration(ffprobe, input)?;
    debug!(total, segment_seconds, "planning segments");

    if total <= segment_seconds {
        return Ok(vec![SegmentRange {
            start: 0.0,
            end: total,
        }]);
    }

    let mut ranges = Vec::new();
    let mut cursor = 0.0;
    while total - cursor > segment_seconds {
        let cut = quietest_time_point(
            ffmpeg,
            input,
            cursor + (1.0 - SEARCH_TOLERANCE) * segment_seconds,
            cursor + (1.0 + SEARCH_TOLERANCE) * segment_seconds,
        )?;
        if total - cut < segment_seconds * MIN_TAIL_RATIO {
            break;
        }
        ranges.push(SegmentRange {
            start: cursor,
            end: cut,
        });
        cursor = cut;
    }
    ranges.push(SegmentRange {
        start: cursor,
        end: total,
    });

    info!(count = ranges.len(), "segment plan ready");
    Ok(ranges)
}

/// Fixed-duration ranges, used when the quiet-point scan is unavailable.
pub fn plan_fixed_segments(total: f64, segment_seconds: f64) -> Vec<SegmentRange> {
    let mut ranges = Vec::new();
    let mut cursor = 0.0;
    while cursor < total {
        let end = (cursor + segment_seconds).min(total);
        ranges.push(SegmentRange { start: cursor, end });
        cursor = end;
    }
    ranges
}
