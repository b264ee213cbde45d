//! Live segment relay
//!
//! Optionally forwards freshly written live segments to the cloud so a
//! dashboard can follow the stream without reaching the device. The
//! relay is best effort: a segment that fails to ship is skipped, never
//! retried, because the live edge has already moved on.

use std::collections::HashSet;
use std::time::Duration;

use tracing::{debug, warn};

use crate::daemon::SharedConfig;
use crate::segments::SegmentStore;
use crate::uploader::CloudClient;

pub struct SegmentRelay {
    store: SegmentStore,
    client: CloudClient,
    config: SharedConfig,
}

impl SegmentRelay {
    pub fn new(store: SegmentStore, client: CloudClient, config: SharedConfig) -> Self {
        Self {
            store,
            client,
            config,
        }
    }

    /// Relay loop. Runs even when forwarding is off so enabling it
    /// through a config update takes effect without a restart.
    /// Forwarding needs both the relay flag and a cloud base URL.
    pub async fn run(self) {
        let mut seen: HashSet<String> = HashSet::new();
        let mut seq: u64 = 0;

        loop {
            let (enabled, poll) = {
                let cfg = self.config.read().await;
                (
                    cfg.relay.enabled && !cfg.cloud.base_url.is_empty(),
                    Duration::from_millis(cfg.relay.poll_millis.max(50)),
                )
            };
            tokio::time::sleep(poll).await;
            if !enabled {
                continue;
            }

            let segments = self.store.list();
            let current: HashSet<String> =
                segments.iter().map(|s| s.file_name.clone()).collect();

            for segment in &segments {
                if !seen.insert(segment.file_name.clone()) {
                    continue;
                }

                let bytes = match tokio::fs::read(&segment.path).await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        // Rotated out between listing and read.
                        debug!(segment = %segment.file_name, error = %e, "segment gone before relay");
                        continue;
                    }
                };

                if let Err(e) = self
                    .client
                    .upload_segment(&segment.file_name, bytes, seq)
                    .await
                {
                    warn!(segment = %segment.file_name, error = %e, "segment relay failed, skipping");
                }
                seq += 1;
            }

            // Names the muxer rotated out leave the set so it cannot
            // grow without bound across a long session.
            seen.retain(|name| current.contains(name));
        }
    }
}
