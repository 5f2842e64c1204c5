//! Download progress display.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

/// One tracked transfer.
pub trait ProgressTask: Send + Sync {
    fn set_total(&self, total: u64);
    fn advance(&self, bytes: u64);
    fn finish(&self);
}

/// Hands out a progress task per transfer.
pub trait ProgressSink: Send + Sync + std::fmt::Debug {
    fn begin(&self, title: &str) -> Box<dyn ProgressTask>;
}

/// Terminal progress bars, one line per concurrent download.
#[derive(Debug, Clone)]
pub struct IndicatifProgress {
    bars: MultiProgress,
}

impl IndicatifProgress {
    pub fn new() -> Self {
        IndicatifProgress {
            bars: MultiProgress::new(),
        }
    }

    /// Progress that draws nothing, for quiet runs.
    pub fn hidden() -> Self {
        IndicatifProgress {
            bars: MultiProgress::with_draw_target(ProgressDrawTarget::hidden()),
        }
    }
}

impl Default for IndicatifProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for IndicatifProgress {
    fn begin(&self, title: &str) -> Box<dyn ProgressTask> {
        let style = ProgressStyle::default_bar()
            .template("{msg:30} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");

        // Size is unknown until the response headers arrive.
        let bar = self.bars.add(ProgressBar::new(0));
        bar.set_style(style);
        bar.set_message(title.to_string());
        Box::new(BarTask { bar })
    }
}

struct BarTask {
    bar: ProgressBar,
}

impl ProgressTask for BarTask {
    fn set_total(&self, total: u64) {
        self.bar.set_length(total);
    }

    fn advance(&self, bytes: u64) {
        self.bar.inc(bytes);
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

/// Discards all progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

struct NullTask;

impl ProgressTask for NullTask {
    fn set_total(&self, _total: u64) {}
    fn advance(&self, _bytes: u64) {}
    fn finish(&self) {}
}

impl ProgressSink for NullProgress {
    fn begin(&self, _title: &str) -> Box<dyn ProgressTask> {
        Box::new(NullTask)
    }
}
