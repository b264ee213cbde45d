//! Durable upload queue persisted as a JSON task log
//!
//! Every mutation rewrites the log through a rename so a crash never
//! leaves a half-written file. Tasks caught mid-upload by a crash are
//! recovered to pending at startup.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Error type for task log operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to access task log: {0}")]
    Io(#[from] io::Error),
    #[error("task log is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("no such task: {0}")]
    UnknownTask(String),
}

/// Lifecycle of an upload task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Uploading,
    Uploaded,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Uploading => "uploading",
            TaskStatus::Uploaded => "uploaded",
            TaskStatus::Failed => "failed",
        }
    }
}

/// One clip upload as persisted in the task log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTask {
    pub id: String,
    pub video_path: PathBuf,
    pub thumbnail_path: Option<PathBuf>,
    pub created_at_unix_ms: u64,
    pub status: TaskStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Unix seconds before which the worker must not retry this task.
    #[serde(default)]
    pub not_before_unix: u64,
}

/// Per-status task counts for the status surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounters {
    pub pending: usize,
    pub uploading: usize,
    pub uploaded: usize,
    pub failed: usize,
}

/// Exponential backoff in seconds for the next retry: `2^attempts`,
/// capped. Attempt counts past the shift width saturate at the cap.
pub fn retry_backoff_seconds(attempts: u32, cap_seconds: u64) -> u64 {
    1u64.checked_shl(attempts)
        .unwrap_or(u64::MAX)
        .min(cap_seconds)
}

#[derive(Debug)]
struct LogFile {
    path: PathBuf,
}

impl LogFile {
    fn load(&self) -> Result<Vec<UploadTask>, QueueError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(Vec::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, tasks: &[UploadTask]) -> Result<(), QueueError> {
        let tmp = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(tasks)?;
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Handle to the persisted task log. Clones share one file and one lock,
/// so concurrent mutations from the extractor, the worker, and the
/// control surface serialize on the log.
#[derive(Debug, Clone)]
pub struct UploadQueue {
    inner: Arc<Mutex<LogFile>>,
}

impl UploadQueue {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LogFile {
                path: path.as_ref().to_path_buf(),
            })),
        }
    }

    /// Full task listing, oldest first (insertion order).
    pub async fn tasks(&self) -> Result<Vec<UploadTask>, QueueError> {
        self.inner.lock().await.load()
    }

    pub async fn counters(&self) -> Result<QueueCounters, QueueError> {
        let mut counters = QueueCounters::default();
        for task in self.tasks().await? {
            match task.status {
                TaskStatus::Pending => counters.pending += 1,
                TaskStatus::Uploading => counters.uploading += 1,
                TaskStatus::Uploaded => counters.uploaded += 1,
                TaskStatus::Failed => counters.failed += 1,
            }
        }
        Ok(counters)
    }

    /// Append a pending task for a freshly extracted clip.
    pub async fn enqueue(
        &self,
        video_path: PathBuf,
        thumbnail_path: Option<PathBuf>,
        created_at_unix_ms: u64,
    ) -> Result<UploadTask, QueueError> {
        let file = self.inner.lock().await;
        let mut tasks = file.load()?;

        let task = UploadTask {
            id: Uuid::new_v4().to_string(),
            video_path,
            thumbnail_path,
            created_at_unix_ms,
            status: TaskStatus::Pending,
            attempts: 0,
            last_error: None,
            not_before_unix: 0,
        };
        tasks.push(task.clone());
        file.save(&tasks)?;
        Ok(task)
    }

    /// Oldest pending task whose backoff window has passed.
    pub async fn next_ready(&self, now_unix: u64) -> Result<Option<UploadTask>, QueueError> {
        let tasks = self.tasks().await?;
        Ok(tasks
            .into_iter()
            .filter(|t| t.status == TaskStatus::Pending && t.not_before_unix <= now_unix)
            .min_by_key(|t| t.created_at_unix_ms))
    }

    pub async fn mark_uploading(&self, id: &str) -> Result<(), QueueError> {
        self.with_task(id, |task| {
            task.status = TaskStatus::Uploading;
        })
        .await
    }

    /// Terminal success.
    pub async fn mark_uploaded(&self, id: &str) -> Result<(), QueueError> {
        self.with_task(id, |task| {
            task.status = TaskStatus::Uploaded;
            task.last_error = None;
        })
        .await
    }

    /// Record a failed attempt: bump the counter and either schedule the
    /// retry or park the task as terminally failed once attempts are
    /// exhausted. Returns the resulting status.
    pub async fn record_failure(
        &self,
        id: &str,
        error: &str,
        now_unix: u64,
        max_attempts: u32,
        backoff_cap_seconds: u64,
    ) -> Result<TaskStatus, QueueError> {
        self.with_task(id, |task| {
            task.attempts += 1;
            task.last_error = Some(error.to_string());
            if task.attempts >= max_attempts {
                task.status = TaskStatus::Failed;
            } else {
                task.status = TaskStatus::Pending;
                task.not_before_unix =
                    now_unix + retry_backoff_seconds(task.attempts, backoff_cap_seconds);
            }
            task.status
        })
        .await
    }

    /// Terminal failure regardless of remaining attempts, for conditions
    /// a retry cannot fix (the clip file no longer exists).
    pub async fn mark_failed(&self, id: &str, error: &str) -> Result<(), QueueError> {
        self.with_task(id, |task| {
            task.status = TaskStatus::Failed;
            task.last_error = Some(error.to_string());
        })
        .await
    }

    /// Startup recovery: a task left `uploading` by a crash goes back to
    /// `pending` so it is retried rather than stuck. Returns how many
    /// tasks were recovered.
    pub async fn recover_interrupted(&self) -> Result<usize, QueueError> {
        let file = self.inner.lock().await;
        let mut tasks = file.load()?;

        let mut recovered = 0;
        for task in tasks.iter_mut() {
            if task.status == TaskStatus::Uploading {
                task.status = TaskStatus::Pending;
                recovered += 1;
            }
        }
        if recovered > 0 {
            file.save(&tasks)?;
        }
        Ok(recovered)
    }

    /// Drop the whole log.
    pub async fn clear(&self) -> Result<(), QueueError> {
        let file = self.inner.lock().await;
        match std::fs::remove_file(&file.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn with_task<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut UploadTask) -> T,
    ) -> Result<T, QueueError> {
        let file = self.inner.lock().await;
        let mut tasks = file.load()?;
        let task = tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| QueueError::UnknownTask(id.to_string()))?;
        let out = f(task);
        file.save(&tasks)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn queue_in(dir: &tempfile::TempDir) -> UploadQueue {
        UploadQueue::new(dir.path().join("queue.json"))
    }

    #[tokio::test]
    async fn test_enqueue_persists_pending_task() {
        let dir = tempfile::tempdir().expect("temp dir");
        let queue = queue_in(&dir);

        let task = queue
            .enqueue("events/event_1.mp4".into(), Some("events/event_1.jpg".into()), 1_000)
            .await
            .expect("enqueue");

        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempts, 0);
        assert!(task.last_error.is_none());

        // A second handle on the same file sees the task.
        let reopened = queue_in(&dir);
        let tasks = reopened.tasks().await.expect("load");
        assert_eq!(tasks, vec![task]);
    }

    #[tokio::test]
    async fn test_next_ready_is_fifo() {
        let dir = tempfile::tempdir().expect("temp dir");
        let queue = queue_in(&dir);

        queue.enqueue("b.mp4".into(), None, 2_000).await.unwrap();
        let oldest = queue.enqueue("a.mp4".into(), None, 1_000).await.unwrap();

        let next = queue.next_ready(10).await.unwrap().expect("one ready");
        assert_eq!(next.id, oldest.id);
    }

    #[tokio::test]
    async fn test_backoff_delays_retry() {
        let dir = tempfile::tempdir().expect("temp dir");
        let queue = queue_in(&dir);
        let task = queue.enqueue("a.mp4".into(), None, 1_000).await.unwrap();

        let status = queue
            .record_failure(&task.id, "connection refused", 100, 5, 300)
            .await
            .unwrap();
        assert_eq!(status, TaskStatus::Pending);

        // First failure schedules the retry 2^1 seconds out.
        assert!(queue.next_ready(100).await.unwrap().is_none());
        assert!(queue.next_ready(101).await.unwrap().is_none());
        assert!(queue.next_ready(102).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_exhausted_attempts_park_task_as_failed() {
        let dir = tempfile::tempdir().expect("temp dir");
        let queue = queue_in(&dir);
        let task = queue.enqueue("a.mp4".into(), None, 1_000).await.unwrap();

        for attempt in 1..=4 {
            let status = queue
                .record_failure(&task.id, "timeout", 0, 5, 300)
                .await
                .unwrap();
            assert_eq!(status, TaskStatus::Pending, "attempt {attempt} stays retryable");
        }
        let status = queue
            .record_failure(&task.id, "timeout", 0, 5, 300)
            .await
            .unwrap();
        assert_eq!(status, TaskStatus::Failed);

        // Terminally failed tasks are excluded from the worker but remain
        // visible in the log.
        assert!(queue.next_ready(u64::MAX).await.unwrap().is_none());
        let tasks = queue.tasks().await.unwrap();
        assert_eq!(tasks[0].status, TaskStatus::Failed);
        assert_eq!(tasks[0].attempts, 5);
        assert_eq!(tasks[0].last_error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_uploaded_tasks_leave_the_rotation() {
        let dir = tempfile::tempdir().expect("temp dir");
        let queue = queue_in(&dir);
        let task = queue.enqueue("a.mp4".into(), None, 1_000).await.unwrap();

        queue.mark_uploading(&task.id).await.unwrap();
        assert!(queue.next_ready(u64::MAX).await.unwrap().is_none());

        queue.mark_uploaded(&task.id).await.unwrap();
        assert!(queue.next_ready(u64::MAX).await.unwrap().is_none());

        let counters = queue.counters().await.unwrap();
        assert_eq!(
            counters,
            QueueCounters { pending: 0, uploading: 0, uploaded: 1, failed: 0 }
        );
    }

    #[tokio::test]
    async fn test_recover_interrupted_resets_uploading_only() {
        let dir = tempfile::tempdir().expect("temp dir");
        let queue = queue_in(&dir);

        let stuck = queue.enqueue("a.mp4".into(), None, 1_000).await.unwrap();
        let done = queue.enqueue("b.mp4".into(), None, 2_000).await.unwrap();
        queue.mark_uploading(&stuck.id).await.unwrap();
        queue.mark_uploading(&done.id).await.unwrap();
        queue.mark_uploaded(&done.id).await.unwrap();

        // Simulated crash: a fresh handle recovers the orphaned task.
        let restarted = queue_in(&dir);
        let recovered = restarted.recover_interrupted().await.unwrap();
        assert_eq!(recovered, 1);

        let next = restarted.next_ready(u64::MAX).await.unwrap().expect("eligible again");
        assert_eq!(next.id, stuck.id);
        let tasks = restarted.tasks().await.unwrap();
        assert_eq!(tasks.iter().filter(|t| t.status == TaskStatus::Uploaded).count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_task_is_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let queue = queue_in(&dir);

        let result = queue.mark_uploaded("no-such-id").await;
        assert!(matches!(result, Err(QueueError::UnknownTask(_))));
    }

    #[tokio::test]
    async fn test_missing_log_is_empty_corrupt_log_is_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let queue = queue_in(&dir);
        assert!(queue.tasks().await.unwrap().is_empty());

        std::fs::write(dir.path().join("queue.json"), b"{not json").unwrap();
        assert!(matches!(queue.tasks().await, Err(QueueError::Corrupt(_))));
    }

    #[tokio::test]
    async fn test_clear_removes_log() {
        let dir = tempfile::tempdir().expect("temp dir");
        let queue = queue_in(&dir);
        queue.enqueue("a.mp4".into(), None, 1_000).await.unwrap();

        queue.clear().await.unwrap();
        assert!(!dir.path().join("queue.json").exists());
        assert!(queue.tasks().await.unwrap().is_empty());

        // Clearing an already-empty queue is fine.
        queue.clear().await.unwrap();
    }

    // For any attempt count, backoff SHALL be nondecreasing and capped.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_backoff_monotonic_and_capped(
            attempts in 0u32..128,
            cap in 1u64..100_000,
        ) {
            let current = retry_backoff_seconds(attempts, cap);
            let next = retry_backoff_seconds(attempts + 1, cap);

            prop_assert!(current >= 1);
            prop_assert!(current <= cap);
            prop_assert!(next >= current);
        }
    }
}
