//! Periodic retention sweep of the segment ring buffer

use std::io;
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use crate::segments::SegmentStore;

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub examined: usize,
    pub removed: usize,
}

/// Deletes buffered segments once they outlive the retention window.
///
/// Runs independently of the stream session; sweeping an empty or absent
/// buffer is a harmless no-op.
pub struct BufferSweeper {
    store: SegmentStore,
    max_age: Duration,
    interval: Duration,
}

impl BufferSweeper {
    pub fn new(store: SegmentStore, max_age: Duration, interval: Duration) -> Self {
        Self {
            store,
            max_age,
            interval,
        }
    }

    /// One pass over the buffer relative to `now`.
    ///
    /// A segment that disappears between listing and deletion was removed
    /// by someone else, which is the goal anyway; other per-file errors
    /// are logged and the pass continues.
    pub fn sweep_at(&self, now: SystemTime) -> io::Result<SweepStats> {
        let mut stats = SweepStats::default();

        for segment in self.store.list() {
            stats.examined += 1;
            // Clock skew can put mtimes in the future; treat those as fresh.
            let age = now.duration_since(segment.modified).unwrap_or_default();
            if age <= self.max_age {
                continue;
            }
            match std::fs::remove_file(&segment.path) {
                Ok(()) => stats.removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(segment = %segment.file_name, error = %e, "failed to sweep segment");
                }
            }
        }

        Ok(stats)
    }

    pub fn sweep(&self) -> io::Result<SweepStats> {
        self.sweep_at(SystemTime::now())
    }

    /// Run forever. A new pass starts only after the previous one
    /// finished, so slow filesystems never pile up overlapping sweeps.
    pub async fn run(self) {
        loop {
            match self.sweep() {
                Ok(stats) if stats.removed > 0 => {
                    debug!(removed = stats.removed, "swept expired segments");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "buffer sweep failed"),
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}
