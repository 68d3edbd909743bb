//! Hypixel API client implementation

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as HttpClient, StatusCode};
use serde::Deserialize;

use super::{GuildInfo, HypixelApi};
use crate::error::{ApiError, Result};
use crate::metrics::{self, RollingCounters};

/// Hypixel API base URL
const API_BASE_URL: &str = "https://api.hypixel.net/v2";

/// Transport timeout for a single request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Hypixel API client
///
/// Throughput is governed by the scan queue, not here; the client's only
/// concern is one call, one parsed result, one `api_calls` tick.
pub struct HypixelClient {
    http: HttpClient,
    base_url: String,
    api_key: String,
    counters: Arc<RollingCounters>,
}

#[derive(Deserialize)]
struct GuildResponse {
    success: bool,
    #[serde(default)]
    guild: Option<GuildInfo>,
    #[serde(default)]
    cause: Option<String>,
}

#[derive(Deserialize)]
struct ProfilesResponse {
    success: bool,
    #[serde(default)]
    profiles: Option<Vec<Profile>>,
    #[serde(default)]
    cause: Option<String>,
}

#[derive(Deserialize)]
struct Profile {
    #[serde(default)]
    members: HashMap<String, ProfileMember>,
}

#[derive(Deserialize)]
struct ProfileMember {
    #[serde(default)]
    leveling: Option<Leveling>,
}

#[derive(Deserialize)]
struct Leveling {
    #[serde(default)]
    experience: f64,
}

impl HypixelClient {
    /// Create a new Hypixel API client
    pub fn new(api_key: String, counters: Arc<RollingCounters>) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Ok(Self {
            http,
            base_url: API_BASE_URL.to_string(),
            api_key,
            counters,
        })
    }

    /// Point the client at a different base URL (for testing)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path_and_query: &str) -> Result<T> {
        // The counter tracks calls made, not successes.
        self.counters.record(metrics::API_CALLS);

        let url = format!("{}{}", self.base_url, path_and_query);
        let response = self
            .http
            .get(&url)
            .header("API-Key", &self.api_key)
            .send()
            .await
            .map_err(ApiError::from)?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(ApiError::Status(status).into());
        }

        let data = response
            .json::<T>()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse response: {}", e)))?;
        Ok(data)
    }
}

#[async_trait]
impl HypixelApi for HypixelClient {
    async fn fetch_guild(&self, uuid: &str) -> Result<Option<GuildInfo>> {
        let body: GuildResponse = self.get_json(&format!("/guild?player={}", uuid)).await?;

        if !body.success {
            let cause = body.cause.unwrap_or_else(|| "unknown cause".to_string());
            return Err(ApiError::Rejected(cause).into());
        }

        // `guild: null` is a valid answer: the player has no guild.
        Ok(body.guild)
    }

    async fn fetch_skyblock_level(&self, uuid: &str) -> Result<Option<f64>> {
        let body: ProfilesResponse = self
            .get_json(&format!("/skyblock/profiles?uuid={}", uuid))
            .await?;

        if !body.success {
            let cause = body.cause.unwrap_or_else(|| "unknown cause".to_string());
            return Err(ApiError::Rejected(cause).into());
        }

        let profiles = match body.profiles {
            Some(profiles) if !profiles.is_empty() => profiles,
            _ => return Ok(None),
        };

        // Best derived level across every profile this player appears in.
        let mut best: Option<f64> = None;
        for profile in profiles {
            if let Some(leveling) = profile.members.get(uuid).and_then(|m| m.leveling.as_ref()) {
                let level = leveling.experience / 100.0;
                best = Some(best.map_or(level, |b: f64| b.max(level)));
            }
        }
        Ok(best)
    }
}
