use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::info;
use tokio::time::sleep;

use crate::constants::PROGRESS_REPORT_INTERVAL_SECS;

/// Periodic progress reporting over a shared byte counter.
///
/// The counter is advanced by whoever does the work (the archive producer adds
/// every source byte it copies); the tracker only reads it.
pub struct ProgressTracker {
    total_size: u64,
    bytes_done: Arc<AtomicU64>,
    start_time: Instant,
    last_percentage: u8,
    interval: Duration,
}

impl ProgressTracker {
    /// Create a new progress tracker
    pub fn new(total_size: u64, bytes_done: Arc<AtomicU64>) -> Self {
        Self {
            total_size,
            bytes_done,
            start_time: Instant::now(),
            last_percentage: 0,
            interval: Duration::from_secs(PROGRESS_REPORT_INTERVAL_SECS),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Percentage of `total_size` done, capped at 100
    pub fn percentage(&self) -> u8 {
        percentage(self.bytes_done.load(Ordering::SeqCst), self.total_size)
    }

    /// Start tracking progress in a background task.
    ///
    /// The task ends on its own once the counter reaches the total; callers
    /// abort the handle when the work stops early.
    pub fn start_tracking(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if self.total_size == 0 {
                return;
            }

            loop {
                sleep(self.interval).await;

                let bytes_done = self.bytes_done.load(Ordering::SeqCst);
                let percentage = percentage(bytes_done, self.total_size);

                // Report progress if it's changed by at least 5%
                if percentage >= self.last_percentage.saturating_add(5)
                    || (percentage == 99 && self.last_percentage < 99)
                {
                    let elapsed = self.start_time.elapsed().as_secs_f64();
                    let speed = if elapsed > 0.0 {
                        bytes_done as f64 / elapsed / 1024.0 / 1024.0
                    } else {
                        0.0
                    };

                    info!(
                        "Archive progress: {}% ({}/{} source bytes, {:.2} MB/s)",
                        percentage, bytes_done, self.total_size, speed
                    );
                    self.last_percentage = percentage;
                }

                if bytes_done >= self.total_size {
                    info!("All {} source bytes archived", bytes_done);
                    break;
                }
            }
        })
    }
}

fn percentage(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done as f64 / total as f64) * 100.0).min(100.0) as u8
}
