//! Health and status reporting for the edge daemon

use serde::Serialize;
use sysinfo::System;

use crate::clock;
use crate::paths::StoragePaths;
use crate::queue::{QueueCounters, UploadQueue};
use crate::segments::SegmentStore;
use crate::stream::{SessionSnapshot, StreamSupervisor};

/// Host resource readings, refreshed on each status request.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMetrics {
    pub cpu_usage_percent: f32,
    pub mem_usage_percent: f32,
    pub load_avg_1: f32,
    pub load_avg_5: f32,
    pub load_avg_15: f32,
}

impl Default for DeviceMetrics {
    fn default() -> Self {
        Self {
            cpu_usage_percent: 0.0,
            mem_usage_percent: 0.0,
            load_avg_1: 0.0,
            load_avg_5: 0.0,
            load_avg_15: 0.0,
        }
    }
}

/// State of the live playlist directory.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStatus {
    /// Whether the playlist file exists on disk.
    pub playlist: bool,
    pub segment_count: usize,
}

/// State of the rolling segment buffer.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferStatus {
    pub segment_count: usize,
}

/// Full daemon status as served on the control surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub timestamp_unix_ms: u64,
    pub stream: SessionSnapshot,
    pub live: LiveStatus,
    pub buffer: BufferStatus,
    pub queue: QueueCounters,
    pub device: DeviceMetrics,
}

/// Collect current system metrics for the device.
///
/// # Returns
///
/// Point-in-time CPU, memory and load readings. CPU usage needs two
/// samples to be meaningful, so the first reading after boot is zero.
pub fn collect_device_metrics() -> DeviceMetrics {
    let mut sys = System::new();
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let cpu_usage_percent = sys.global_cpu_usage();

    let total = sys.total_memory();
    let used = sys.used_memory();
    let mem_usage_percent = if total > 0 {
        (used as f32 / total as f32) * 100.0
    } else {
        0.0
    };

    let load = System::load_average();

    DeviceMetrics {
        cpu_usage_percent,
        mem_usage_percent,
        load_avg_1: load.one as f32,
        load_avg_5: load.five as f32,
        load_avg_15: load.fifteen as f32,
    }
}

/// Assemble a status snapshot from the daemon's components.
pub async fn collect_status(
    supervisor: &StreamSupervisor,
    buffer: &SegmentStore,
    live: &SegmentStore,
    queue: &UploadQueue,
    paths: &StoragePaths,
) -> StatusSnapshot {
    let counters = match queue.counters().await {
        Ok(counters) => counters,
        Err(_) => QueueCounters::default(),
    };

    StatusSnapshot {
        timestamp_unix_ms: clock::unix_millis(),
        stream: supervisor.health().await,
        live: LiveStatus {
            playlist: paths.live_playlist().is_file(),
            segment_count: live.count(),
        },
        buffer: BufferStatus {
            segment_count: buffer.count(),
        },
        queue: counters,
        device: collect_device_metrics(),
    }
}
