//! Progress reporting for long-running export jobs.
//!
//! Percentages come from the job's timeline: how far the last committed
//! position is between the requested start and end. This works for every
//! data type, since record counts are unknown before the export finishes.

use std::time::{Duration, Instant};

const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);
const MIN_EXPORT_DURATION: Duration = Duration::from_secs(30);

/// Lightweight builder that controls update cadence.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    update_interval: Duration,
    min_percentage_step: f64,
}

impl ProgressTracker {
    /// Create a tracker with custom interval and percentage step.
    pub fn new(update_interval: Duration, min_percentage_step: f64) -> Self {
        Self {
            update_interval,
            min_percentage_step,
        }
    }

    /// Build a [`ProgressState`] for the job range `[start, end)`.
    pub fn create_state(&self, start: i64, end: i64, windows_planned: usize) -> ProgressState {
        let mut state = ProgressState::new(start, end, windows_planned);
        state.update_interval = self.update_interval;
        state.min_percentage_step = self.min_percentage_step;
        state
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(DEFAULT_UPDATE_INTERVAL, 10.0)
    }
}

/// Progress state of one running job.
#[derive(Debug, Clone)]
pub struct ProgressState {
    /// Records delivered so far in this run.
    pub records: u64,
    /// Windows finished (completed or failed) in this run.
    pub windows_done: usize,
    /// Windows planned for this run.
    pub windows_planned: usize,
    /// Job range (start, end) in milliseconds.
    pub range: (i64, i64),
    /// Latest timestamp reached.
    pub last_position: Option<i64>,
    /// When the run started.
    pub start_time: Instant,
    /// Last time progress was reported.
    pub last_update: Instant,
    /// Minimum interval between progress updates.
    pub update_interval: Duration,
    /// Last reported completion percentage (0-100).
    pub last_reported_percentage: f64,
    /// Minimum percentage delta required to emit a new update.
    pub min_percentage_step: f64,
}

impl ProgressState {
    /// New state with default cadence.
    pub fn new(start: i64, end: i64, windows_planned: usize) -> Self {
        let now = Instant::now();
        Self {
            records: 0,
            windows_done: 0,
            windows_planned,
            range: (start, end),
            last_position: None,
            start_time: now,
            last_update: now,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            last_reported_percentage: 0.0,
            min_percentage_step: 10.0,
        }
    }

    /// Count records delivered from a page and advance the position.
    pub fn update(&mut self, new_records: u64, latest_position: Option<i64>) {
        self.records = self.records.saturating_add(new_records);
        if let Some(position) = latest_position {
            self.last_position = Some(position);
        }
    }

    /// Mark a window finished; the position moves to its end.
    pub fn finish_window(&mut self, window_end: i64) {
        self.windows_done += 1;
        self.last_position = Some(window_end);
    }

    /// Whether a progress update should be emitted based on time or percentage.
    pub fn should_emit_update(&self) -> bool {
        if self.last_position.is_none() {
            return false;
        }

        let percentage_jump = self
            .percentage()
            .map(|pct| pct - self.last_reported_percentage >= self.min_percentage_step)
            .unwrap_or(false);

        if percentage_jump {
            return true;
        }

        self.start_time.elapsed() >= MIN_EXPORT_DURATION
            && self.last_update.elapsed() >= self.update_interval
    }

    /// Call after emitting a progress log to reset timers and cached percentage.
    pub fn mark_emitted(&mut self) {
        self.last_update = Instant::now();
        if let Some(pct) = self.percentage() {
            self.last_reported_percentage = pct;
        }
    }

    /// Completion percentage (0-100) along the job's timeline.
    pub fn percentage(&self) -> Option<f64> {
        self.timeline_ratio().map(|ratio| ratio * 100.0)
    }

    /// Estimate remaining time from the timeline ratio.
    pub fn estimate_remaining(&self) -> Option<Duration> {
        let ratio = self.timeline_ratio()?;
        if !(0.0..1.0).contains(&ratio) || ratio == 0.0 {
            return None;
        }
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return None;
        }
        let total_secs = elapsed / ratio;
        Some(Duration::from_secs_f64((total_secs - elapsed).max(0.0)))
    }

    /// Human-readable progress string for logging.
    pub fn format_progress(&self) -> String {
        let mut parts = vec![format!("[PROGRESS] Exported {} records", self.records)];

        if let Some(pct) = self.percentage() {
            parts.push(format!("- {pct:.1}% complete"));
        }

        parts.push(format!(
            "(window {}/{})",
            self.windows_done, self.windows_planned
        ));

        if let Some(remaining) = self.estimate_remaining() {
            parts.push(format!("- ~{} remaining", format_duration(remaining)));
        }

        parts.join(" ")
    }

    fn timeline_ratio(&self) -> Option<f64> {
        let (start, end) = self.range;
        let position = self.last_position?;
        let span = (end - start) as f64;
        if span <= 0.0 {
            return None;
        }
        let clamped = position.clamp(start, end);
        Some(((clamped - start) as f64 / span).clamp(0.0, 1.0))
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}
