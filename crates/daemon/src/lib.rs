//! Lookout edge daemon
//!
//! Background service for a camera device: captures the feed into a
//! rolling segment buffer, serves a live playlist, cuts event clips on
//! triggers, and ships them to the cloud through a durable queue.

pub mod clock;
pub mod daemon;
pub mod extractor;
pub mod ffmpeg;
pub mod paths;
pub mod queue;
pub mod relay;
pub mod segments;
pub mod server;
pub mod source;
pub mod startup;
pub mod status;
pub mod stream;
pub mod sweeper;
pub mod trigger;
pub mod uploader;

pub use lookout_config as config;
pub use lookout_config::Config;

pub use daemon::{new_shared_config, Daemon, DaemonError, SharedConfig};
pub use extractor::{select_window, ClipExtractor, ExtractError, ExtractedClip};
pub use paths::StoragePaths;
pub use queue::{
    retry_backoff_seconds, QueueCounters, QueueError, TaskStatus, UploadQueue, UploadTask,
};
pub use relay::SegmentRelay;
pub use segments::{Segment, SegmentStore};
pub use server::{create_router, run_server, AppState, ServerError};
pub use source::{CaptureSource, SourceError};
pub use startup::{check_ffmpeg_available, parse_ffmpeg_version, run_startup_checks, StartupError};
pub use status::{
    collect_device_metrics, collect_status, BufferStatus, DeviceMetrics, LiveStatus,
    StatusSnapshot,
};
pub use stream::{ExitInfo, SessionSnapshot, SessionState, StreamError, StreamSupervisor};
pub use sweeper::{BufferSweeper, SweepStats};
pub use trigger::{TriggerDecision, UdpTrigger};
pub use uploader::{CloudClient, UploadError, UploadWorker};
