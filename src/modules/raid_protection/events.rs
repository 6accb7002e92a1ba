use chrono::{Duration, Utc};
use poise::serenity_prelude::FullEvent;
use serenity::all::{CreateEmbed, GuildId, Member, Message};

use crate::{Data, Error};

use super::cache::{get_settings, GuildSettings};
use super::heuristic::classify_message;
use super::incidents::{FlaggedUser, IncidentType, NewIncident};
use super::responder::{dev_log, post_raid_alert, surface_persist_failure, COLOR_INFO};

pub async fn event_listener(
    ctx: &serenity::client::Context,
    event: &FullEvent,
    data: &Data,
) -> Result<(), Error> {
    match event {
        FullEvent::GuildMemberAddition { new_member } => {
            member_join(ctx, new_member, data).await
        }
        FullEvent::Message { new_message } => message(ctx, new_message, data).await,
        _ => Ok(()),
    }
}

fn guild_name(ctx: &serenity::client::Context, guild_id: GuildId) -> String {
    ctx.cache
        .guild(guild_id)
        .map(|g| g.name.clone())
        .unwrap_or_else(|| guild_id.to_string())
}

/// Members the cache saw join within the detection window, most recent burst
/// first as far as the cache can tell.
fn recent_joiners(
    ctx: &serenity::client::Context,
    guild_id: GuildId,
    window: Duration,
) -> Vec<FlaggedUser> {
    let now = Utc::now();

    // The cache guard must not be held across an await.
    let Some(guild) = ctx.cache.guild(guild_id) else {
        return Vec::new();
    };

    guild
        .members
        .values()
        .filter(|m| {
            m.joined_at
                .map(|joined| now.signed_duration_since(joined.with_timezone(&Utc)) <= window)
                .unwrap_or(false)
        })
        .map(|m| FlaggedUser {
            id: m.user.id.to_string(),
            display_name: m.user.tag(),
        })
        .collect()
}

async fn member_join(
    ctx: &serenity::client::Context,
    new_member: &Member,
    data: &Data,
) -> Result<(), Error> {
    let guild_id = new_member.guild_id;
    let settings = get_settings(&data.pool, guild_id).await?;

    let now = Utc::now();
    let window = Duration::seconds(settings.join_window_secs as i64);

    let burst = data
        .detector
        .record_join(guild_id, now, settings.join_threshold as usize, window);

    if burst {
        let flagged = recent_joiners(ctx, guild_id, window);
        let count = if flagged.is_empty() {
            data.detector.join_window_len(guild_id, now, window) as u64
        } else {
            flagged.len() as u64
        };

        log::warn!(
            "Join burst in guild {}: {} joins within {}s",
            guild_id,
            count,
            settings.join_window_secs
        );

        let (incident, persisted) = data.incidents.append(NewIncident {
            guild_id: guild_id.to_string(),
            guild_name: guild_name(ctx, guild_id),
            kind: IncidentType::MassJoin,
            detected_by: "Automated System".to_string(),
            users_flagged: flagged,
            count,
        });
        surface_persist_failure(ctx, incident.id, persisted).await;

        post_raid_alert(
            ctx,
            data.incidents.clone(),
            data.lockdowns.clone(),
            incident,
            None,
        )
        .await?;

        return Ok(());
    }

    notice_young_account(ctx, new_member, &settings).await;

    Ok(())
}

/// Fresh accounts joining outside a burst are worth a note in the
/// operational log, not a full alert.
async fn notice_young_account(
    ctx: &serenity::client::Context,
    member: &Member,
    settings: &GuildSettings,
) {
    let created = member.user.created_at().with_timezone(&Utc);
    let age_days = Utc::now().signed_duration_since(created).num_days();

    if age_days < settings.suspicious_account_age_days as i64 {
        dev_log(
            ctx,
            CreateEmbed::new()
                .title("Young account joined")
                .description(format!(
                    "{} joined; account is {} day(s) old (threshold {}).",
                    member.user.tag(),
                    age_days,
                    settings.suspicious_account_age_days
                ))
                .color(COLOR_INFO),
        )
        .await;
    }
}

/// Shortens message content for an embed field, counting characters rather
/// than bytes so multibyte text is never flagged as over-long.
fn truncate_for_embed(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }

    content
        .chars()
        .take(max_chars.saturating_sub(3))
        .collect::<String>()
        + "..."
}

async fn message(
    ctx: &serenity::client::Context,
    msg: &Message,
    data: &Data,
) -> Result<(), Error> {
    if msg.author.bot {
        return Ok(());
    }

    let Some(guild_id) = msg.guild_id else {
        return Ok(());
    };

    let settings = get_settings(&data.pool, guild_id).await?;

    let spam_flood = data.detector.record_message(
        guild_id,
        msg.author.id,
        Utc::now(),
        settings.spam_threshold as usize,
        Duration::seconds(settings.spam_window_secs as i64),
    );

    let mention_count = msg.mentions.len() + msg.mention_roles.len();

    let Some(kind) = classify_message(
        &msg.content,
        mention_count,
        msg.mention_everyone,
        spam_flood,
        settings.mention_limit as usize,
    ) else {
        return Ok(());
    };

    log::warn!(
        "Flagged message from {} in guild {}: {}",
        msg.author.id,
        guild_id,
        kind
    );

    let (incident, persisted) = data.incidents.append(NewIncident {
        guild_id: guild_id.to_string(),
        guild_name: guild_name(ctx, guild_id),
        kind,
        detected_by: "Automated System".to_string(),
        users_flagged: vec![FlaggedUser {
            id: msg.author.id.to_string(),
            display_name: msg.author.tag(),
        }],
        count: 1,
    });
    surface_persist_failure(ctx, incident.id, persisted).await;

    let content = truncate_for_embed(&msg.content, 200);

    post_raid_alert(
        ctx,
        data.incidents.clone(),
        data.lockdowns.clone(),
        incident,
        Some(format!("Channel: <#{}>\nMessage: {}", msg.channel_id, content)),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::truncate_for_embed;

    #[test]
    fn short_content_passes_through_unchanged() {
        assert_eq!(truncate_for_embed("hello", 200), "hello");
    }

    #[test]
    fn multibyte_content_under_the_limit_is_not_clipped() {
        // 100 characters but 300 bytes; well under a 200-character limit.
        let content = "あ".repeat(100);
        assert_eq!(truncate_for_embed(&content, 200), content);
    }

    #[test]
    fn long_content_is_clipped_to_the_limit_with_an_ellipsis() {
        let content = "x".repeat(500);
        let clipped = truncate_for_embed(&content, 200);

        assert_eq!(clipped.chars().count(), 200);
        assert!(clipped.ends_with("..."));
    }
}
