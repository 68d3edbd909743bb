//! Hypixel API client

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod hypixel;
#[cfg(test)]
pub mod mock;

pub use hypixel::HypixelClient;
#[cfg(test)]
pub use mock::MockHypixelClient;

/// Remote API surface used by the scanner and sweeper.
#[async_trait]
pub trait HypixelApi: Send + Sync {
    /// Fetch the guild a player belongs to.
    ///
    /// `Ok(None)` means the API call succeeded and the player has no guild;
    /// transport failures and non-success responses are errors.
    async fn fetch_guild(&self, uuid: &str) -> Result<Option<GuildInfo>>;

    /// Fetch the player's best derived SkyBlock level across all profiles.
    ///
    /// `Ok(None)` means the call succeeded but the player has no profiles.
    async fn fetch_skyblock_level(&self, uuid: &str) -> Result<Option<f64>>;
}

/// Guild payload from the guild-lookup endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildInfo {
    /// Stable external guild identifier (24 lowercase hex chars)
    #[serde(rename = "_id")]
    pub id: String,

    /// Display name
    pub name: String,

    /// Short tag (optional)
    #[serde(default)]
    pub tag: Option<String>,

    /// Roster as returned by the API
    #[serde(default)]
    pub members: Vec<GuildMemberEntry>,
}

/// One roster entry from a guild payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildMemberEntry {
    /// Player identifier
    pub uuid: String,

    /// Rank label within the guild
    #[serde(default)]
    pub rank: Option<String>,
}
