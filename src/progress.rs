//! Per-stage progress reporting.
//!
//! [`StageProgress`] is what the stages drive: one `tick` per finished target. Without the
//! `progress` feature it is a no-op; with it, an `indicatif` bar is rendered on stderr whose
//! message reports the pace of the stage as measured by [`TargetPace`].
//!
//! The analysis stage ticks from worker threads, hence the interior mutex.
use std::collections::VecDeque;
#[cfg(feature = "progress")]
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[cfg(feature = "progress")]
use indicatif::{ProgressBar, ProgressStyle};

/// Targets averaged by the pace estimate
const PACE_WINDOW: usize = 16;

/// Wall-clock cost of the targets of one stage.
///
/// Keeps the durations of the last `window` targets; the mean over that window prices the
/// targets still to process. Download and analysis costs drift over a run (archive latency,
/// segment counts), so old targets fall out of the estimate.
pub struct TargetPace {
    started: Instant,
    previous: Instant,
    recent: VecDeque<Duration>,
    window: usize,
    done: usize,
    total: usize,
}

impl TargetPace {
    pub fn new(total: usize, window: usize) -> Self {
        let now = Instant::now();
        TargetPace {
            started: now,
            previous: now,
            recent: VecDeque::with_capacity(window.max(1)),
            window: window.max(1),
            done: 0,
            total,
        }
    }

    /// Record a finished target at `now`, returning how long it took.
    pub fn target_done(&mut self, now: Instant) -> Duration {
        let spent = now.saturating_duration_since(self.previous);
        self.previous = now;
        self.done += 1;
        if self.recent.len() == self.window {
            self.recent.pop_front();
        }
        self.recent.push_back(spent);
        spent
    }

    /// Mean duration over the window, `None` before the first target.
    pub fn per_target(&self) -> Option<Duration> {
        let n = u32::try_from(self.recent.len()).ok().filter(|n| *n > 0)?;
        Some(self.recent.iter().sum::<Duration>() / n)
    }

    /// Estimated time to finish the remaining targets.
    pub fn remaining(&self) -> Option<Duration> {
        let left = u32::try_from(self.total.saturating_sub(self.done)).ok()?;
        self.per_target().map(|mean| mean * left)
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
    }
}

/// Short span for a progress line: `"0.4s"`, `"12s"`, `"3m07s"` or `"1h05m"`.
pub fn format_span(span: Duration) -> String {
    let secs = span.as_secs();
    match secs {
        0..=9 => format!("{:.1}s", span.as_secs_f64()),
        10..=59 => format!("{secs}s"),
        60..=3599 => format!("{}m{:02}s", secs / 60, secs % 60),
        _ => format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60),
    }
}

pub struct StageProgress {
    #[cfg(feature = "progress")]
    bar: ProgressBar,
    #[cfg(feature = "progress")]
    pace: Mutex<TargetPace>,
}

impl StageProgress {
    #[cfg(feature = "progress")]
    pub fn new(stage: &str, total: usize) -> Self {
        let bar = ProgressBar::new(total.max(1) as u64);
        if let Ok(style) =
            ProgressStyle::with_template("{prefix:>9} {bar:40.cyan/blue} {pos}/{len} | {msg}")
        {
            bar.set_style(style);
        }
        bar.set_prefix(stage.to_string());
        bar.enable_steady_tick(Duration::from_millis(200));
        StageProgress {
            bar,
            pace: Mutex::new(TargetPace::new(total, PACE_WINDOW)),
        }
    }

    #[cfg(not(feature = "progress"))]
    pub fn new(_stage: &str, _total: usize) -> Self {
        StageProgress {}
    }

    /// One target done.
    #[cfg(feature = "progress")]
    pub fn tick(&self) {
        if let Ok(mut pace) = self.pace.lock() {
            let now = Instant::now();
            let spent = pace.target_done(now);
            let mut message = format!(
                "last target {}, elapsed {}",
                format_span(spent),
                format_span(pace.elapsed(now))
            );
            if let Some(left) = pace.remaining() {
                message.push_str(&format!(", ~{} left", format_span(left)));
            }
            self.bar.set_message(message);
        }
        self.bar.inc(1);
    }

    #[cfg(not(feature = "progress"))]
    pub fn tick(&self) {}

    #[cfg(feature = "progress")]
    pub fn finish(self) {
        self.bar.disable_steady_tick();
        self.bar.finish_and_clear();
    }

    #[cfg(not(feature = "progress"))]
    pub fn finish(self) {}
}

#[cfg(test)]
mod progress_test {
    use super::*;

    #[test]
    fn test_format_span_scales() {
        assert_eq!(format_span(Duration::from_millis(400)), "0.4s");
        assert_eq!(format_span(Duration::from_secs(12)), "12s");
        assert_eq!(format_span(Duration::from_secs(187)), "3m07s");
        assert_eq!(format_span(Duration::from_secs(3900)), "1h05m");
    }

    #[test]
    fn test_pace_prices_remaining_targets() {
        let mut pace = TargetPace::new(10, 2);
        assert_eq!(pace.per_target(), None);
        assert_eq!(pace.remaining(), None);

        let t0 = pace.previous;
        pace.target_done(t0 + Duration::from_secs(9));
        pace.target_done(t0 + Duration::from_secs(10));
        pace.target_done(t0 + Duration::from_secs(13));

        // window of two: the 9 s target no longer counts
        assert_eq!(pace.per_target(), Some(Duration::from_secs(2)));
        assert_eq!(pace.remaining(), Some(Duration::from_secs(14)));
        assert_eq!(pace.elapsed(t0 + Duration::from_secs(13)), Duration::from_secs(13));
    }

    #[test]
    fn test_pace_past_total() {
        let mut pace = TargetPace::new(1, 4);
        let t0 = pace.previous;
        pace.target_done(t0 + Duration::from_secs(1));
        pace.target_done(t0 + Duration::from_secs(2));
        assert_eq!(pace.remaining(), Some(Duration::ZERO));
    }
}
