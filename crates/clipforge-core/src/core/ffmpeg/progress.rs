//! FFmpeg Progress Parsing
//!
//! FFmpeg progress output format (when using `-progress pipe:1`):
//! ```text
//! frame=100
//! fps=30.0
//! out_time_us=3333333
//! out_time_ms=3333333
//! out_time=00:00:03.333333
//! speed=2.5x
//! progress=continue
//! ```
//! Each block ends with a `progress=` line; the last one is `progress=end`.

use std::time::{Duration, Instant};

use crate::core::TimeSec;

/// Parsed FFmpeg progress block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FFmpegProgressData {
    /// Current frame number
    pub frame: u64,
    /// Current FPS
    pub fps: f32,
    /// Output time written so far, in seconds
    pub time_sec: f64,
    /// Speed multiplier (e.g., 2.5x)
    pub speed: Option<f32>,
    /// Set by `progress=end`
    pub finished: bool,
}

/// Parses `HH:MM:SS.micro`
pub fn parse_timestamp(value: &str) -> Option<f64> {
    let mut parts = value.trim().split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Folds one progress line into `data`. Returns true when the line closes a
/// progress block. Unknown keys and `N/A` values leave `data` untouched.
pub fn parse_progress_line(line: &str, data: &mut FFmpegProgressData) -> bool {
    let line = line.trim();
    let Some((key, value)) = line.split_once('=') else {
        return false;
    };
    let value = value.trim();

    match key {
        "frame" => data.frame = value.parse().unwrap_or(data.frame),
        "fps" => data.fps = value.parse().unwrap_or(data.fps),
        // out_time_ms is in microseconds despite the name
        "out_time_us" | "out_time_ms" => {
            if let Ok(micros) = value.parse::<i64>() {
                data.time_sec = micros.max(0) as f64 / 1_000_000.0;
            }
        }
        "out_time" => {
            if let Some(seconds) = parse_timestamp(value) {
                data.time_sec = seconds.max(0.0);
            }
        }
        "speed" => {
            if let Some(num) = value.strip_suffix('x') {
                data.speed = num.trim().parse().ok();
            }
        }
        "progress" => {
            if value == "end" {
                data.finished = true;
            }
            return true;
        }
        _ => {}
    }
    false
}

/// Maps one pass's completion onto its slice of the whole job, so the
/// job-level percentage stays monotonic across passes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressMapper {
    pub offset: f64,
    pub range: f64,
}

impl ProgressMapper {
    pub fn new(offset: f64, range: f64) -> Self {
        Self { offset, range }
    }

    /// Whole job in one pass
    pub fn full() -> Self {
        Self::new(0.0, 100.0)
    }

    /// Splits `[offset, offset + range]` proportionally to `durations`.
    /// Zero total duration splits evenly.
    pub fn split(durations: &[TimeSec], offset: f64, range: f64) -> Vec<ProgressMapper> {
        if durations.is_empty() {
            return Vec::new();
        }
        let total: f64 = durations.iter().map(|d| d.max(0.0)).sum();
        let mut cursor = offset;
        durations
            .iter()
            .map(|d| {
                let share = if total > 0.0 {
                    range * d.max(0.0) / total
                } else {
                    range / durations.len() as f64
                };
                let mapper = ProgressMapper::new(cursor, share);
                cursor += share;
                mapper
            })
            .collect()
    }

    pub fn end(&self) -> f64 {
        self.offset + self.range
    }

    /// Job percentage for a pass completion fraction
    pub fn map(&self, fraction: f64) -> f64 {
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.offset + self.range * fraction
    }

    /// Job percentage for a parsed block of a pass producing `duration` seconds
    pub fn percent(&self, data: &FFmpegProgressData, duration: TimeSec) -> f64 {
        if data.finished {
            return self.end();
        }
        if duration > 0.0 {
            self.map(data.time_sec / duration)
        } else {
            self.offset
        }
    }
}

/// Floor for the progress interval: at most ten events per second
pub const MIN_PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Rate-limits progress emission and never lets the value go backwards
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    interval: Duration,
    last_emit: Option<Instant>,
    last_percent: f64,
}

impl ProgressThrottle {
    /// Intervals shorter than [`MIN_PROGRESS_INTERVAL`] are raised to it
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(MIN_PROGRESS_INTERVAL),
            last_emit: None,
            last_percent: 0.0,
        }
    }

    pub fn last_percent(&self) -> f64 {
        self.last_percent
    }

    /// Returns the value to emit, if any
    pub fn offer(&mut self, percent: f64, now: Instant) -> Option<f64> {
        let percent = percent.clamp(0.0, 100.0);
        if self.last_emit.is_some() && percent <= self.last_percent {
            return None;
        }
        if let Some(last) = self.last_emit {
            if now.saturating_duration_since(last) < self.interval {
                return None;
            }
        }
        self.last_emit = Some(now);
        self.last_percent = percent;
        Some(percent)
    }

    /// Final 100% emission, bypassing the rate limit
    pub fn finish(&mut self, now: Instant) -> Option<f64> {
        if self.last_emit.is_some() && self.last_percent >= 100.0 {
            return None;
        }
        self.last_emit = Some(now);
        self.last_percent = 100.0;
        Some(100.0)
    }
}
