//! Daemon startup and component wiring
//!
//! Builds the runtime out of its parts, runs the startup sequence, and
//! owns the handles the control surface and background tasks share.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

use lookout_config::{Config, ConfigError};

use crate::extractor::ClipExtractor;
use crate::paths::StoragePaths;
use crate::queue::{QueueError, UploadQueue};
use crate::relay::SegmentRelay;
use crate::segments::SegmentStore;
use crate::server::{run_server, AppState, ServerError};
use crate::startup::{run_startup_checks, StartupError};
use crate::stream::StreamSupervisor;
use crate::sweeper::BufferSweeper;
use crate::trigger::UdpTrigger;
use crate::uploader::{CloudClient, UploadWorker};

/// Shared configuration handle. Every component reads through it, and
/// the control surface can replace the value at runtime.
pub type SharedConfig = Arc<RwLock<Config>>;

/// Creates a new shared config handle.
pub fn new_shared_config(config: Config) -> SharedConfig {
    Arc::new(RwLock::new(config))
}

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("startup check failed: {0}")]
    Startup(#[from] StartupError),

    #[error("failed to prepare storage: {0}")]
    Storage(#[from] std::io::Error),

    #[error("task log error: {0}")]
    Queue(#[from] QueueError),

    #[error("failed to bind trigger socket: {0}")]
    TriggerBind(std::io::Error),

    #[error("server error: {0}")]
    Server(#[from] ServerError),
}

/// Daemon state containing all runtime components
pub struct Daemon {
    pub config: SharedConfig,
    pub paths: StoragePaths,
    pub supervisor: Arc<StreamSupervisor>,
    pub extractor: Arc<ClipExtractor>,
    pub queue: UploadQueue,
    config_path: Option<PathBuf>,
}

impl Daemon {
    /// Initialize the daemon from a config file.
    ///
    /// The startup sequence:
    /// 1. Load config from file (absent file means defaults) and apply
    ///    environment overrides
    /// 2. Verify ffmpeg is present and recent enough
    /// 3. Prepare the storage tree
    /// 4. Recover upload tasks a previous run left mid-flight
    ///
    /// # Arguments
    /// * `config_path` - Path to the TOML config file
    /// * `data_dir` - Root of the on-device storage tree
    pub async fn new<P: AsRef<Path>>(config_path: P, data_dir: PathBuf) -> Result<Self, DaemonError> {
        let config = Config::load_or_default(&config_path)?;
        run_startup_checks()?;
        Self::assemble(config, data_dir, Some(config_path.as_ref().to_path_buf())).await
    }

    /// Initialize the daemon without running startup checks
    ///
    /// Useful for testing when ffmpeg is not available.
    pub async fn new_without_checks(config: Config, data_dir: PathBuf) -> Result<Self, DaemonError> {
        Self::assemble(config, data_dir, None).await
    }

    async fn assemble(
        config: Config,
        data_dir: PathBuf,
        config_path: Option<PathBuf>,
    ) -> Result<Self, DaemonError> {
        let paths = StoragePaths::new(data_dir);
        paths.ensure_directories()?;

        let config = new_shared_config(config);
        let queue = UploadQueue::new(paths.queue_file());

        let recovered = queue.recover_interrupted().await?;
        if recovered > 0 {
            info!(recovered, "requeued uploads interrupted by restart");
        }

        let (capture, segment_seconds, thumbnail_offset) = {
            let cfg = config.read().await;
            (
                cfg.capture.clone(),
                cfg.capture.segment_seconds,
                cfg.clip.thumbnail_offset_seconds,
            )
        };

        let supervisor = Arc::new(StreamSupervisor::new(paths.clone(), capture));
        let extractor = Arc::new(ClipExtractor::new(
            SegmentStore::new(paths.buffer_dir()),
            paths.events_dir(),
            segment_seconds,
            thumbnail_offset,
            queue.clone(),
        ));

        Ok(Self {
            config,
            paths,
            supervisor,
            extractor,
            queue,
            config_path,
        })
    }

    /// Start the background tasks: buffer sweeper, upload worker, udp
    /// trigger and segment relay.
    ///
    /// The trigger socket binds here so a port conflict surfaces as a
    /// startup failure.
    pub async fn start_background_tasks(&self) -> Result<(), DaemonError> {
        let (max_age, sweep_interval) = {
            let cfg = self.config.read().await;
            (
                Duration::from_secs(cfg.buffer.max_age_seconds),
                Duration::from_secs(cfg.buffer.sweep_interval_seconds),
            )
        };
        let sweeper = BufferSweeper::new(
            SegmentStore::new(self.paths.buffer_dir()),
            max_age,
            sweep_interval,
        );
        tokio::spawn(sweeper.run());

        let client = CloudClient::new(Arc::clone(&self.config));
        let worker = UploadWorker::new(
            self.queue.clone(),
            client.clone(),
            Arc::clone(&self.config),
        );
        tokio::spawn(worker.run());

        let trigger = UdpTrigger::new(Arc::clone(&self.config), Arc::clone(&self.extractor));
        let socket = trigger.bind().await.map_err(DaemonError::TriggerBind)?;
        tokio::spawn(trigger.serve(socket));

        let relay = SegmentRelay::new(
            SegmentStore::new(self.paths.live_dir()),
            client,
            Arc::clone(&self.config),
        );
        tokio::spawn(relay.run());

        Ok(())
    }

    fn app_state(&self) -> AppState {
        AppState {
            config: Arc::clone(&self.config),
            config_path: self.config_path.clone(),
            supervisor: Arc::clone(&self.supervisor),
            extractor: Arc::clone(&self.extractor),
            queue: self.queue.clone(),
            buffer: SegmentStore::new(self.paths.buffer_dir()),
            live: SegmentStore::new(self.paths.live_dir()),
            paths: self.paths.clone(),
        }
    }

    /// Run the daemon: background tasks plus the control server.
    /// Returns only if the server stops.
    pub async fn run(&self) -> Result<(), DaemonError> {
        self.start_background_tasks().await?;
        run_server(self.app_state()).await?;
        Ok(())
    }
}
