use tracing::{debug, info};

/// Receives extraction progress for the current batch.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, completed: u64, total: u64);
}

/// Logs every `step` completed blocks and on completion.
#[derive(Debug, Clone)]
pub struct LogProgress {
    step: u64,
}

impl LogProgress {
    pub fn new(step: u64) -> Self {
        Self { step: step.max(1) }
    }
}

impl Default for LogProgress {
    fn default() -> Self {
        Self::new(25)
    }
}

impl ProgressObserver for LogProgress {
    fn on_progress(&self, completed: u64, total: u64) {
        if completed == total {
            debug!("Fetched {}/{} blocks", completed, total);
        } else if completed % self.step == 0 {
            info!(
                "Fetched {}/{} blocks ({:.0}%)",
                completed,
                total,
                completed as f64 * 100.0 / total as f64
            );
        }
    }
}

/// Discards progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&self, _completed: u64, _total: u64) {}
}
