use once_cell::sync::Lazy;
use poise::serenity_prelude::{ChannelId, RoleId, UserId};
use serde::{Deserialize, Serialize};
use std::fs::File;

use crate::Error;

/// Global config object
pub static CONFIG: Lazy<Config> = Lazy::new(|| Config::load().expect("Failed to load config"));

#[derive(Serialize, Deserialize, Default)]
pub struct DiscordAuth {
    pub token: String,
    /// Users that may manage raid protection regardless of roles
    pub owners: Vec<UserId>,
}

#[derive(Serialize, Deserialize)]
pub struct Meta {
    pub postgres_url: String,
    #[serde(default = "default_incident_log")]
    pub incident_log: String,
}

fn default_incident_log() -> String {
    "data/raids.json".to_string()
}

#[derive(Serialize, Deserialize)]
pub struct RaidProtection {
    /// Channel raid alerts (with action controls) are posted to
    pub alert_channel: ChannelId,
    /// Optional operational log channel mirroring alerts and failures
    pub dev_log_channel: Option<ChannelId>,
    /// Roles allowed to approve/dismiss/lockdown
    pub operator_roles: Vec<RoleId>,
}

#[derive(Serialize, Deserialize)]
pub struct Config {
    pub discord_auth: DiscordAuth,
    pub meta: Meta,
    pub raid_protection: RaidProtection,

    #[serde(skip)]
    /// Setup by load() for statistics
    pub bot_start_time: i64,
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        let file = File::open("config.yaml")
            .map_err(|e| format!("config.yaml could not be loaded: {}", e))?;

        let mut cfg: Config = serde_yaml::from_reader(file)?;

        cfg.bot_start_time = chrono::Utc::now().timestamp();

        Ok(cfg)
    }
}
