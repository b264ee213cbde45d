//! Cloud upload client and the queue worker that drives it
//!
//! Cloud settings are read from the shared config on every request, so
//! a config update applies to the next upload without a restart.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::clock;
use crate::daemon::SharedConfig;
use crate::queue::{QueueError, TaskStatus, UploadQueue, UploadTask};

/// Error type for cloud uploads
#[derive(Debug, Error)]
pub enum UploadError {
    /// The clip vanished from disk; a retry cannot fix this.
    #[error("clip file missing: {}", .0.display())]
    MissingFile(PathBuf),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The server answered but did not confirm the upload.
    #[error("cloud rejected upload: {0}")]
    Rejected(String),
    #[error("failed to read clip: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    /// Permanent errors skip the retry schedule entirely.
    pub fn is_permanent(&self) -> bool {
        matches!(self, UploadError::MissingFile(_))
    }
}

#[derive(Debug, Deserialize)]
struct CloudAck {
    #[serde(default)]
    status: Option<String>,
}

/// HTTP client for the cloud ingest endpoints.
#[derive(Clone)]
pub struct CloudClient {
    http: reqwest::Client,
    config: SharedConfig,
}

impl CloudClient {
    pub fn new(config: SharedConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Upload one event clip: thumbnail first so the dashboard has a
    /// preview even when the video part fails and is retried later.
    ///
    /// # Arguments
    ///
    /// * `task` - Queued upload describing the clip files
    pub async fn upload_event(&self, task: &UploadTask) -> Result<(), UploadError> {
        let (url, timeout, device_id) = {
            let cfg = self.config.read().await;
            (
                join_url(&cfg.cloud.base_url, &cfg.cloud.upload_endpoint),
                Duration::from_secs(cfg.cloud.request_timeout_seconds),
                cfg.device.id.clone(),
            )
        };

        if !task.video_path.is_file() {
            return Err(UploadError::MissingFile(task.video_path.clone()));
        }

        if let Some(thumbnail) = &task.thumbnail_path {
            // A clip without a thumbnail still uploads.
            if thumbnail.is_file() {
                self.send_event_file(
                    &url,
                    timeout,
                    &device_id,
                    task.created_at_unix_ms,
                    "thumbnail",
                    thumbnail,
                )
                .await?;
            }
        }

        self.send_event_file(
            &url,
            timeout,
            &device_id,
            task.created_at_unix_ms,
            "video",
            &task.video_path,
        )
        .await
    }

    async fn send_event_file(
        &self,
        url: &str,
        timeout: Duration,
        device_id: &str,
        timestamp_ms: u64,
        kind: &str,
        path: &Path,
    ) -> Result<(), UploadError> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| String::from("upload.bin"));

        let form = Form::new()
            .part("file", Part::bytes(bytes).file_name(file_name))
            .text("deviceId", device_id.to_string())
            .text("timestamp", timestamp_ms.to_string())
            .text("type", kind.to_string());

        let response = self
            .http
            .post(url)
            .timeout(timeout)
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;

        // Transport success is not enough; the server must confirm it
        // stored the file.
        let ack: CloudAck = response.json().await?;
        match ack.status.as_deref() {
            Some("ok") => Ok(()),
            Some(other) => Err(UploadError::Rejected(other.to_string())),
            None => Err(UploadError::Rejected(String::from("no status in response"))),
        }
    }

    /// Forward one live segment to the cloud relay endpoint.
    pub async fn upload_segment(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        seq: u64,
    ) -> Result<(), UploadError> {
        let (url, timeout, device_id) = {
            let cfg = self.config.read().await;
            (
                join_url(&cfg.cloud.base_url, &cfg.cloud.segment_endpoint),
                Duration::from_secs(cfg.cloud.request_timeout_seconds),
                cfg.device.id.clone(),
            )
        };

        let form = Form::new()
            .part("segment", Part::bytes(bytes).file_name(file_name.to_string()))
            .text("deviceId", device_id.to_string())
            .text("seq", seq.to_string());

        self.http
            .post(&url)
            .timeout(timeout)
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

fn join_url(base: &str, endpoint: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), endpoint)
}

/// Drains the upload queue on a fixed tick.
pub struct UploadWorker {
    queue: UploadQueue,
    client: CloudClient,
    config: SharedConfig,
}

impl UploadWorker {
    pub fn new(queue: UploadQueue, client: CloudClient, config: SharedConfig) -> Self {
        Self {
            queue,
            client,
            config,
        }
    }

    /// Worker loop. Ticks never overlap because the next sleep starts
    /// only after the previous pass finished.
    pub async fn run(self) {
        loop {
            let tick = {
                let cfg = self.config.read().await;
                Duration::from_secs(cfg.upload.tick_seconds.max(1))
            };
            tokio::time::sleep(tick).await;
            match self.tick().await {
                Ok(0) => {}
                Ok(n) => info!(uploaded = n, "upload pass finished"),
                Err(e) => warn!(error = %e, "upload pass failed"),
            }
        }
    }

    /// One pass over the queue: at most one attempt, for the oldest
    /// task whose backoff window has elapsed. A burst of queued clips
    /// drains at one per tick, keeping the uplink load flat.
    /// Returns 1 when a clip was uploaded.
    pub async fn tick(&self) -> Result<usize, QueueError> {
        let now = clock::unix_seconds();
        let Some(task) = self.queue.next_ready(now).await? else {
            return Ok(0);
        };
        if self.process(task).await? {
            Ok(1)
        } else {
            Ok(0)
        }
    }

    async fn process(&self, task: UploadTask) -> Result<bool, QueueError> {
        let (max_attempts, backoff_cap, delete_after) = {
            let cfg = self.config.read().await;
            (
                cfg.upload.max_attempts,
                cfg.upload.backoff_cap_seconds,
                cfg.upload.delete_after_upload,
            )
        };

        self.queue.mark_uploading(&task.id).await?;
        info!(id = %task.id, attempt = task.attempts + 1, "uploading clip");

        match self.client.upload_event(&task).await {
            Ok(()) => {
                self.queue.mark_uploaded(&task.id).await?;
                info!(id = %task.id, "clip uploaded");
                if delete_after {
                    remove_clip_files(&task);
                }
                Ok(true)
            }
            Err(e) if e.is_permanent() => {
                warn!(id = %task.id, error = %e, "upload failed permanently");
                self.queue.mark_failed(&task.id, &e.to_string()).await?;
                Ok(false)
            }
            Err(e) => {
                let status = self
                    .queue
                    .record_failure(
                        &task.id,
                        &e.to_string(),
                        clock::unix_seconds(),
                        max_attempts,
                        backoff_cap,
                    )
                    .await?;
                if status == TaskStatus::Failed {
                    warn!(id = %task.id, error = %e, "upload failed, attempts exhausted");
                } else {
                    warn!(id = %task.id, error = %e, "upload failed, will retry");
                }
                Ok(false)
            }
        }
    }
}

/// Local cleanup after a confirmed upload. Failure to delete is logged
/// and otherwise ignored; the sweeper does not cover the events
/// directory, so leftovers only cost disk.
fn remove_clip_files(task: &UploadTask) {
    if let Err(e) = std::fs::remove_file(&task.video_path) {
        warn!(path = %task.video_path.display(), error = %e, "failed to delete uploaded clip");
    }
    if let Some(thumbnail) = &task.thumbnail_path {
        if let Err(e) = std::fs::remove_file(thumbnail) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %thumbnail.display(), error = %e, "failed to delete thumbnail");
            }
        }
    }
}
