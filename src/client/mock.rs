//! Mock Hypixel API client for testing
//!
//! Provides a mock implementation of `HypixelApi` for unit testing the
//! scanner and HTTP surface without making real API calls.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{GuildInfo, GuildMemberEntry, HypixelApi};
use crate::error::{ApiError, Result};

/// Mock API client for testing.
///
/// Configure per-uuid responses via builder methods, then hand to the code
/// under test. Unconfigured players resolve as "no guild" / "no profiles".
#[derive(Default)]
pub struct MockHypixelClient {
    guilds: Mutex<HashMap<String, GuildInfo>>,
    levels: Mutex<HashMap<String, f64>>,
    failing: Mutex<HashSet<String>>,
    call_counts: Mutex<CallCounts>,
}

/// Tracks API call counts for test verification
#[derive(Default, Debug, Clone)]
pub struct CallCounts {
    pub fetch_guild: usize,
    pub fetch_skyblock_level: usize,
}

impl MockHypixelClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_guild(self, uuid: &str, guild: GuildInfo) -> Self {
        self.guilds.lock().unwrap().insert(uuid.to_string(), guild);
        self
    }

    pub fn with_level(self, uuid: &str, level: f64) -> Self {
        self.levels.lock().unwrap().insert(uuid.to_string(), level);
        self
    }

    /// Make every call for `uuid` fail with a network error.
    pub fn with_failure(self, uuid: &str) -> Self {
        self.failing.lock().unwrap().insert(uuid.to_string());
        self
    }

    pub fn call_counts(&self) -> CallCounts {
        self.call_counts.lock().unwrap().clone()
    }
}

/// Build a `GuildInfo` fixture from (uuid, rank) pairs.
pub fn guild_fixture(id: &str, name: &str, members: &[(&str, &str)]) -> GuildInfo {
    GuildInfo {
        id: id.to_string(),
        name: name.to_string(),
        tag: Some(name.chars().take(4).collect::<String>().to_uppercase()),
        members: members
            .iter()
            .map(|(uuid, rank)| GuildMemberEntry {
                uuid: uuid.to_string(),
                rank: Some(rank.to_string()),
            })
            .collect(),
    }
}

#[async_trait]
impl HypixelApi for MockHypixelClient {
    async fn fetch_guild(&self, uuid: &str) -> Result<Option<GuildInfo>> {
        self.call_counts.lock().unwrap().fetch_guild += 1;

        if self.failing.lock().unwrap().contains(uuid) {
            return Err(ApiError::Network("mock failure".to_string()).into());
        }
        Ok(self.guilds.lock().unwrap().get(uuid).cloned())
    }

    async fn fetch_skyblock_level(&self, uuid: &str) -> Result<Option<f64>> {
        self.call_counts.lock().unwrap().fetch_skyblock_level += 1;

        if self.failing.lock().unwrap().contains(uuid) {
            return Err(ApiError::Network("mock failure".to_string()).into());
        }
        Ok(self.levels.lock().unwrap().get(uuid).copied())
    }
}
