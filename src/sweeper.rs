//! Periodic sweep refreshing the per-member level metric.
//!
//! Each pass selects the least-recently refreshed members and pushes level
//! tasks through the shared scan queue, so sweep traffic draws on the same
//! rate budget as player-submitted scans. Batch size should be conservative
//! relative to the remote rate limit for that reason.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, warn};
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::queue::{ScanQueue, ScanTask};
use crate::store::GuildStore;

#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Wall-clock interval between passes
    pub interval: Duration,
    /// Max members considered per pass
    pub batch: usize,
    /// Fixed delay between submissions within a pass
    pub delay: Duration,
    /// Members refreshed within this many seconds are skipped
    pub level_ttl_secs: i64,
}

/// Spawn the sweep loop.
pub fn spawn(store: Arc<GuildStore>, queue: ScanQueue, cfg: SweepConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cfg.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = sweep_once(&store, &queue, &cfg).await {
                warn!("Level sweep failed: {}", err);
            }
        }
    })
}

/// One pass: select, filter by freshness, submit with a fixed inter-member
/// delay. The delay is a deliberate throttle independent of the queue's own
/// window accounting.
pub(crate) async fn sweep_once(
    store: &GuildStore,
    queue: &ScanQueue,
    cfg: &SweepConfig,
) -> Result<()> {
    let now = Utc::now().timestamp();
    let candidates = store.members_due_level_refresh(cfg.batch)?;
    debug!("Level sweep selected {} members", candidates.len());

    for candidate in candidates {
        if let Some(checked_at) = candidate.level_checked_at {
            if now - checked_at <= cfg.level_ttl_secs {
                continue;
            }
        }
        queue.submit(ScanTask::level(candidate.uuid));
        tokio::time::sleep(cfg.delay).await;
    }
    Ok(())
}
