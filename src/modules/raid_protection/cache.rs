use moka::future::Cache;
use once_cell::sync::Lazy;
use serenity::all::GuildId;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::Error;

/// Per-guild detection tunables. Guilds without a stored row run on the
/// defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuildSettings {
    pub join_threshold: i32,
    pub join_window_secs: i32,
    pub spam_threshold: i32,
    pub spam_window_secs: i32,
    pub mention_limit: i32,
    pub suspicious_account_age_days: i32,
}

impl Default for GuildSettings {
    fn default() -> Self {
        Self {
            join_threshold: 5,
            join_window_secs: 10,
            spam_threshold: 5,
            spam_window_secs: 5,
            mention_limit: 5,
            suspicious_account_age_days: 30,
        }
    }
}

pub static SETTINGS_CACHE: Lazy<Cache<GuildId, GuildSettings>> =
    Lazy::new(|| Cache::builder().build());

/// Fetches a guild's settings, hitting Postgres only on cache miss.
pub async fn get_settings(pool: &PgPool, guild_id: GuildId) -> Result<GuildSettings, Error> {
    if let Some(settings) = SETTINGS_CACHE.get(&guild_id).await {
        return Ok(settings);
    }

    let row = sqlx::query(
        "SELECT join_threshold, join_window_secs, spam_threshold, spam_window_secs, mention_limit, suspicious_account_age_days FROM raid_protection__settings WHERE guild_id = $1",
    )
    .bind(guild_id.to_string())
    .fetch_optional(pool)
    .await?;

    let settings = match row {
        Some(row) => GuildSettings {
            join_threshold: row.try_get("join_threshold")?,
            join_window_secs: row.try_get("join_window_secs")?,
            spam_threshold: row.try_get("spam_threshold")?,
            spam_window_secs: row.try_get("spam_window_secs")?,
            mention_limit: row.try_get("mention_limit")?,
            suspicious_account_age_days: row.try_get("suspicious_account_age_days")?,
        },
        None => GuildSettings::default(),
    };

    SETTINGS_CACHE.insert(guild_id, settings).await;

    Ok(settings)
}

/// Drops a guild's cached settings after a config change.
pub async fn invalidate(guild_id: GuildId) {
    SETTINGS_CACHE.invalidate(&guild_id).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_detection_profile() {
        let settings = GuildSettings::default();

        assert_eq!(settings.join_threshold, 5);
        assert_eq!(settings.join_window_secs, 10);
        assert_eq!(settings.spam_threshold, 5);
        assert_eq!(settings.spam_window_secs, 5);
        assert_eq!(settings.mention_limit, 5);
        assert_eq!(settings.suspicious_account_age_days, 30);
    }
}
