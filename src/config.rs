//! Process configuration, read from flags or environment.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::sweeper::SweepConfig;

/// Rate-limited local cache of Hypixel guild and player data
#[derive(Parser, Debug, Clone)]
#[command(name = "guildwatch", version, about)]
pub struct Config {
    /// Hypixel API key; startup fails without one
    #[arg(long, env = "HYPIXEL_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// HTTP listen port
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// SQLite database path (defaults under the OS data directory)
    #[arg(long, env = "GUILDWATCH_DB")]
    pub db_path: Option<PathBuf>,

    /// Max remote API calls per rolling 60 second window
    #[arg(long, env = "GUILDWATCH_SCAN_RATE", default_value_t = 60)]
    pub scan_rate: u32,

    /// Staleness threshold for cached scans, in seconds
    #[arg(long, env = "GUILDWATCH_SCAN_TTL_SECS", default_value_t = 3600)]
    pub scan_ttl_secs: u64,

    /// Seconds between level sweep passes
    #[arg(long, env = "GUILDWATCH_SWEEP_INTERVAL_SECS", default_value_t = 600)]
    pub sweep_interval_secs: u64,

    /// Max members refreshed per sweep pass
    #[arg(long, env = "GUILDWATCH_SWEEP_BATCH", default_value_t = 10)]
    pub sweep_batch: usize,

    /// Fixed delay between sweep submissions, in milliseconds
    #[arg(long, env = "GUILDWATCH_SWEEP_DELAY_MS", default_value_t = 2000)]
    pub sweep_delay_ms: u64,

    /// Staleness threshold for the secondary level metric, in seconds
    #[arg(long, env = "GUILDWATCH_LEVEL_TTL_SECS", default_value_t = 7 * 24 * 3600)]
    pub level_ttl_secs: u64,
}

impl Config {
    /// Database location, defaulting under the OS data directory.
    pub fn resolve_db_path(&self) -> anyhow::Result<PathBuf> {
        if let Some(path) = &self.db_path {
            return Ok(path.clone());
        }
        let base = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
        Ok(base.join("guildwatch").join("guilds.db"))
    }

    pub fn sweep_config(&self) -> SweepConfig {
        SweepConfig {
            interval: Duration::from_secs(self.sweep_interval_secs),
            batch: self.sweep_batch,
            delay: Duration::from_millis(self.sweep_delay_ms),
            level_ttl_secs: self.level_ttl_secs as i64,
        }
    }
}
