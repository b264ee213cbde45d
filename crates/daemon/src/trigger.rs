//! UDP intrusion trigger
//!
//! External sensors announce an intrusion with a plain-text datagram.
//! Only an exact phrase match fires the extractor, and accepted
//! triggers are rate limited by a cooldown window.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::daemon::SharedConfig;
use crate::extractor::ClipExtractor;

/// Outcome of evaluating one datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDecision {
    /// Phrase matched and the cooldown window is clear.
    Accepted,
    /// Payload is not the armed phrase.
    WrongPhrase,
    /// Phrase matched inside the cooldown window.
    CoolingDown,
}

/// Evaluate one datagram payload against the armed phrase.
///
/// The comparison is exact and case sensitive after trimming
/// surrounding whitespace. A non-matching payload never counts
/// against the cooldown window.
pub fn evaluate(
    payload: &str,
    phrase: &str,
    since_last_accept: Option<Duration>,
    cooldown: Duration,
) -> TriggerDecision {
    if payload.trim() != phrase {
        return TriggerDecision::WrongPhrase;
    }
    match since_last_accept {
        Some(elapsed) if elapsed < cooldown => TriggerDecision::CoolingDown,
        _ => TriggerDecision::Accepted,
    }
}

/// Listens for trigger datagrams and fires the extractor.
pub struct UdpTrigger {
    config: SharedConfig,
    extractor: Arc<ClipExtractor>,
}

impl UdpTrigger {
    pub fn new(config: SharedConfig, extractor: Arc<ClipExtractor>) -> Self {
        Self { config, extractor }
    }

    /// Bind the trigger socket. Separate from [`serve`](Self::serve) so
    /// a port conflict surfaces as a startup error instead of a dead
    /// background task.
    pub async fn bind(&self) -> std::io::Result<UdpSocket> {
        let port = self.config.read().await.trigger.udp_port;
        let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
        info!(port, "udp trigger armed");
        Ok(socket)
    }

    pub async fn serve(self, socket: UdpSocket) {
        let mut last_accepted: Option<Instant> = None;
        let mut buf = [0u8; 2048];

        loop {
            let (len, peer) = match socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    warn!(error = %e, "udp receive failed");
                    continue;
                }
            };
            let payload = String::from_utf8_lossy(&buf[..len]);

            let (phrase, cooldown, before, after) = {
                let cfg = self.config.read().await;
                (
                    cfg.trigger.phrase.clone(),
                    Duration::from_secs(cfg.trigger.cooldown_seconds),
                    cfg.clip.before_seconds,
                    cfg.clip.after_seconds,
                )
            };

            let elapsed = last_accepted.map(|at| at.elapsed());
            match evaluate(&payload, &phrase, elapsed, cooldown) {
                TriggerDecision::Accepted => {
                    info!(%peer, "intrusion trigger accepted");
                    // The cooldown starts at acceptance, whether or not
                    // a clip comes out, so a hammered sensor cannot
                    // bypass it through extraction failures.
                    last_accepted = Some(Instant::now());
                    self.extractor.extract(before, after).await;
                }
                TriggerDecision::CoolingDown => {
                    debug!(%peer, "trigger inside cooldown window, ignored");
                }
                TriggerDecision::WrongPhrase => {
                    debug!(%peer, "datagram does not match armed phrase");
                }
            }
        }
    }
}
