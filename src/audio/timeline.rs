//! Playback timeline
//!
//! Bookkeeping for gapless scheduling: a monotonically advancing
//! "next start" cursor plus the set of in-flight sources. All time
//! values are seconds on the playback clock. The owning scheduler
//! serializes every mutation through one mutex, so capture, transport
//! and output callbacks never race on the cursor.

use crate::constants::SCHEDULE_AHEAD_SECS;

/// One scheduled chunk of decoded audio
#[derive(Debug, Clone)]
pub struct PlaybackSource {
    /// Monotonic id, unique within a session
    pub id: u64,
    /// Scheduled start time on the playback clock
    pub start: f64,
    /// Start plus duration
    pub end: f64,
    /// Decoded mono samples
    pub samples: Vec<f32>,
    /// Sample rate of `samples`
    pub sample_rate: u32,
}

impl PlaybackSource {
    /// Chunk duration in seconds
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Cursor plus active-source set
pub struct Timeline {
    next_start: f64,
    next_id: u64,
    sources: Vec<PlaybackSource>,
}

impl Timeline {
    pub fn new() -> Self {
        Self {
            next_start: 0.0,
            next_id: 0,
            sources: Vec::new(),
        }
    }

    /// Schedule decoded samples back-to-back with whatever is already queued.
    ///
    /// Start time is `max(cursor, now + SCHEDULE_AHEAD_SECS)`; the small
    /// forward offset avoids scheduling in the past when playback had
    /// fallen idle. Returns the registered source's id and start time.
    pub fn enqueue(&mut self, now: f64, samples: Vec<f32>, sample_rate: u32) -> (u64, f64) {
        let duration = samples.len() as f64 / sample_rate as f64;
        let start = self.next_start.max(now + SCHEDULE_AHEAD_SECS);

        let id = self.next_id;
        self.next_id += 1;
        self.sources.push(PlaybackSource {
            id,
            start,
            end: start + duration,
            samples,
            sample_rate,
        });
        self.next_start = start + duration;
        (id, start)
    }

    /// Drop every scheduled source and rewind the cursor to zero.
    ///
    /// Safe to call with an empty set. Returns how many sources were
    /// stopped.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.sources.len();
        self.sources.clear();
        self.next_start = 0.0;
        stopped
    }

    /// Mix every source overlapping `[now, now + out.len() / rate)` into
    /// `out`, then retire sources that finished within the block.
    ///
    /// Returns `true` when this call retired the last remaining source.
    pub fn render(&mut self, now: f64, out: &mut [f32], rate: u32) -> bool {
        out.fill(0.0);
        let block_end = now + out.len() as f64 / rate as f64;

        for source in &self.sources {
            if source.start >= block_end || source.end <= now {
                continue;
            }
            // Index of the source sample that lines up with out[0]
            let offset = ((now - source.start) * source.sample_rate as f64).round() as i64;
            for (i, slot) in out.iter_mut().enumerate() {
                let idx = offset + i as i64;
                if idx < 0 {
                    continue;
                }
                match source.samples.get(idx as usize) {
                    Some(sample) => *slot += sample,
                    None => break,
                }
            }
        }

        let before = self.sources.len();
        self.sources.retain(|s| s.end > block_end);
        before > 0 && self.sources.is_empty()
    }

    /// Time at which the next enqueued chunk would begin, given an
    /// uninterrupted queue
    pub fn cursor(&self) -> f64 {
        self.next_start
    }

    /// Number of scheduled or playing sources
    pub fn active_sources(&self) -> usize {
        self.sources.len()
    }

    /// Scheduled `(start, end)` windows, in enqueue order
    pub fn source_windows(&self) -> Vec<(f64, f64)> {
        self.sources.iter().map(|s| (s.start, s.end)).collect()
    }
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new()
    }
}
