//! Scan orchestration: TTL decisions and fetch-and-reconcile execution.
//!
//! The decision half runs on the request path; the execution half runs
//! inside the queue worker, one scan at a time.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use log::info;

use crate::client::HypixelApi;
use crate::error::Result;
use crate::metrics::{self, RollingCounters};
use crate::queue::{ScanTask, TaskKind, TaskRunner};
use crate::store::{GuildStore, Membership};

/// What the orchestrator decided for an inbound player request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanDecision {
    /// Never seen before; placeholder row inserted, scan warranted.
    NewPlayer,
    /// Known member with a stale scan; guild rescan warranted.
    QueueGuildScan { guild_id: String },
    /// Known unguilded player with a stale scan; rescan warranted.
    QueuePlayerScan,
    /// Member scanned within the TTL; nothing to do.
    GuildFresh,
    /// Unguilded player scanned within the TTL; nothing to do.
    PlayerFresh,
}

impl ScanDecision {
    pub fn needs_scan(&self) -> bool {
        matches!(
            self,
            Self::NewPlayer | Self::QueueGuildScan { .. } | Self::QueuePlayerScan
        )
    }
}

/// Strip hyphens and lowercase a player uuid. Returns None when nothing
/// usable remains.
pub fn normalize_uuid(raw: &str) -> Option<String> {
    let normalized: String = raw
        .trim()
        .chars()
        .filter(|c| *c != '-')
        .collect::<String>()
        .to_lowercase();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

pub struct Scanner {
    store: Arc<GuildStore>,
    client: Arc<dyn HypixelApi>,
    counters: Arc<RollingCounters>,
    scan_ttl_secs: i64,
}

impl Scanner {
    pub fn new(
        store: Arc<GuildStore>,
        client: Arc<dyn HypixelApi>,
        counters: Arc<RollingCounters>,
        scan_ttl_secs: u64,
    ) -> Self {
        Self {
            store,
            client,
            counters,
            scan_ttl_secs: scan_ttl_secs as i64,
        }
    }

    /// TTL state machine for an inbound request.
    ///
    /// Inserts the placeholder row for never-seen players; actually queueing
    /// the scan is the caller's move. Cached state is never mutated here
    /// beyond that placeholder.
    pub fn decide(&self, uuid: &str) -> Result<ScanDecision> {
        self.counters.record(metrics::STORE_READS);
        let now = Utc::now().timestamp();

        match self.store.membership(uuid)? {
            Membership::Unknown => {
                self.store.insert_placeholder(uuid)?;
                self.counters.record(metrics::CACHE_WRITES);
                Ok(ScanDecision::NewPlayer)
            }
            Membership::Guilded {
                guild_id,
                last_scan,
            } => {
                if self.is_stale(now, last_scan) {
                    Ok(ScanDecision::QueueGuildScan { guild_id })
                } else {
                    Ok(ScanDecision::GuildFresh)
                }
            }
            Membership::Unguilded { last_scan } => {
                if self.is_stale(now, last_scan) {
                    Ok(ScanDecision::QueuePlayerScan)
                } else {
                    Ok(ScanDecision::PlayerFresh)
                }
            }
        }
    }

    /// last_scan = 0 is the "never scanned" sentinel and is always stale.
    fn is_stale(&self, now: i64, last_scan: i64) -> bool {
        last_scan == 0 || now - last_scan > self.scan_ttl_secs
    }

    async fn run_guild_scan(&self, uuid: &str) -> Result<()> {
        let fetched = self.client.fetch_guild(uuid).await?;
        let now = Utc::now().timestamp();

        match fetched {
            Some(mut guild) => {
                for entry in &mut guild.members {
                    if let Some(normalized) = normalize_uuid(&entry.uuid) {
                        entry.uuid = normalized;
                    }
                }

                let outcome = self.store.apply_guild_scan(uuid, &guild, now)?;
                self.counters.record(metrics::CACHE_WRITES);
                if outcome.guild_added {
                    self.counters.record(metrics::GUILDS_ADDED);
                    info!(
                        "Tracking new guild {} ({}) with {} members",
                        guild.name, guild.id, outcome.members_upserted
                    );
                }
            }
            None => {
                // Confirmed guildless. The upsert keeps any known name.
                self.store.apply_unguilded_scan(uuid, None, now)?;
                self.counters.record(metrics::CACHE_WRITES);
            }
        }
        Ok(())
    }

    async fn run_level_refresh(&self, uuid: &str) -> Result<()> {
        // The player may have left since the sweep selected them.
        let Some(guild_id) = self.store.member_guild(uuid)? else {
            return Ok(());
        };

        let level = self.client.fetch_skyblock_level(uuid).await?;
        let now = Utc::now().timestamp();

        // An absent reading still gets a fresh timestamp so the sweep does
        // not re-pick this member immediately.
        self.store.set_member_level(uuid, level, now)?;
        self.counters.record(metrics::CACHE_WRITES);
        self.store.recompute_guild_avg(&guild_id)?;
        Ok(())
    }
}

#[async_trait]
impl TaskRunner for Scanner {
    async fn run(&self, task: &ScanTask) -> Result<()> {
        match task.kind {
            TaskKind::Guild => self.run_guild_scan(&task.uuid).await,
            TaskKind::Level => self.run_level_refresh(&task.uuid).await,
        }
    }
}
