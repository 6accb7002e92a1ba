use poise::{serenity_prelude::CreateEmbed, CreateReply};

use crate::{Context, Error};

use super::cache;
use super::incidents::{Incident, IncidentStatus, IncidentType, NewIncident};
use super::lockdown::{ApplyOutcome, DiscordChannelEditor, LiftOutcome};
use super::responder::{
    execute_raid_action, is_authorized_operator, surface_persist_failure, RaidAction, COLOR_INFO,
    COLOR_OK, COLOR_WARN,
};

/// Command check shared by every raid-protection command
pub async fn is_operator(ctx: Context<'_>) -> Result<bool, Error> {
    let roles = match ctx.author_member().await {
        Some(member) => member.roles.to_vec(),
        None => Vec::new(),
    };

    if is_authorized_operator(ctx.author().id, &roles) {
        Ok(true)
    } else {
        Err("You are not authorized to manage raid protection.".into())
    }
}

fn incident_line(incident: &Incident) -> String {
    format!(
        "`#{}` **{}** [{}] in {} ({} event(s)) <t:{}:R>",
        incident.id,
        incident.kind,
        incident.status,
        incident.guild_name,
        incident.count,
        incident.timestamp.timestamp(),
    )
}

/// Review and update logged raid incidents
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    check = "is_operator",
    subcommands("list", "update")
)]
pub async fn raidreview(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// List the most recent incidents
#[poise::command(prefix_command, slash_command, guild_only, check = "is_operator")]
pub async fn list(
    ctx: Context<'_>,
    #[description = "How many incidents to show (default 5)"]
    #[min = 1]
    #[max = 25]
    limit: Option<u32>,
) -> Result<(), Error> {
    let limit = limit.unwrap_or(5) as usize;
    let incidents = ctx.data().incidents.list(Some(limit));

    if incidents.is_empty() {
        ctx.say("No incidents logged yet.").await?;
        return Ok(());
    }

    let lines = incidents
        .iter()
        .map(incident_line)
        .collect::<Vec<_>>()
        .join("\n");

    ctx.send(
        CreateReply::default().embed(
            CreateEmbed::default()
                .title(format!("Last {} Incident(s)", incidents.len()))
                .description(lines)
                .color(COLOR_INFO),
        ),
    )
    .await?;

    Ok(())
}

/// Set an incident's review status
#[poise::command(prefix_command, slash_command, guild_only, check = "is_operator")]
pub async fn update(
    ctx: Context<'_>,
    #[description = "Incident id, as shown by list"] id: i64,
    #[description = "New status"] status: IncidentStatus,
) -> Result<(), Error> {
    if !ctx.data().incidents.update_status(id, status)? {
        ctx.say(format!("No incident with id `{}` exists.", id)).await?;
        return Ok(());
    }

    ctx.say(format!("Incident `{}` is now **{}**.", id, status)).await?;

    Ok(())
}

/// Lock the server down, denying Send Messages in every text channel
#[poise::command(prefix_command, slash_command, guild_only, check = "is_operator")]
pub async fn lockdown(
    ctx: Context<'_>,
    #[description = "Why the server is being locked down"] reason: String,
) -> Result<(), Error> {
    let Some(guild_id) = ctx.guild_id() else {
        return Err("This command can only be used in a server.".into());
    };

    ctx.defer().await?;

    let data = ctx.data();
    let editor = DiscordChannelEditor::new(ctx.serenity_context().clone());

    match data
        .lockdowns
        .apply(&editor, guild_id, reason.clone(), ctx.author().id)
        .await?
    {
        ApplyOutcome::Applied(report) => {
            let (incident, persisted) = data.incidents.append(NewIncident {
                guild_id: guild_id.to_string(),
                guild_name: ctx.guild().map(|g| g.name.clone()).unwrap_or_default(),
                kind: IncidentType::LockdownInitiated,
                detected_by: ctx.author().tag(),
                users_flagged: Vec::new(),
                count: report.affected.len() as u64,
            });
            surface_persist_failure(ctx.serenity_context(), incident.id, persisted).await;

            let mut description = format!(
                "Reason: {}\nAffected channels: {}",
                reason,
                report.affected.len()
            );
            for (name, err) in report.failed.iter().take(5) {
                description.push_str(&format!("\nFailed on #{}: {}", name, err));
            }

            ctx.send(
                CreateReply::default().embed(
                    CreateEmbed::default()
                        .title("🔒 Server Locked Down")
                        .description(description)
                        .color(COLOR_WARN),
                ),
            )
            .await?;
        }
        ApplyOutcome::AlreadyLocked => {
            ctx.say("The server is already locked down.").await?;
        }
    }

    Ok(())
}

/// Lift an active lockdown, restoring the saved channel permissions
#[poise::command(prefix_command, slash_command, guild_only, check = "is_operator")]
pub async fn unlock(ctx: Context<'_>) -> Result<(), Error> {
    let Some(guild_id) = ctx.guild_id() else {
        return Err("This command can only be used in a server.".into());
    };

    ctx.defer().await?;

    let data = ctx.data();
    let editor = DiscordChannelEditor::new(ctx.serenity_context().clone());

    match data.lockdowns.lift(&editor, guild_id).await? {
        LiftOutcome::Lifted(report) => {
            let (incident, persisted) = data.incidents.append(NewIncident {
                guild_id: guild_id.to_string(),
                guild_name: ctx.guild().map(|g| g.name.clone()).unwrap_or_default(),
                kind: IncidentType::LockdownLifted,
                detected_by: ctx.author().tag(),
                users_flagged: Vec::new(),
                count: report.affected.len() as u64,
            });
            surface_persist_failure(ctx.serenity_context(), incident.id, persisted).await;

            let mut description = format!("Restored channels: {}", report.affected.len());
            for (name, err) in report.failed.iter().take(5) {
                description.push_str(&format!("\nFailed on #{}: {}", name, err));
            }

            ctx.send(
                CreateReply::default().embed(
                    CreateEmbed::default()
                        .title("🔓 Lockdown Lifted")
                        .description(description)
                        .color(COLOR_OK),
                ),
            )
            .await?;
        }
        LiftOutcome::NotLocked => {
            ctx.say("There is no active lockdown on this server.").await?;
        }
    }

    Ok(())
}

/// Show whether the server is locked down and by whom
#[poise::command(prefix_command, slash_command, guild_only, check = "is_operator")]
pub async fn lockdownstatus(ctx: Context<'_>) -> Result<(), Error> {
    let Some(guild_id) = ctx.guild_id() else {
        return Err("This command can only be used in a server.".into());
    };

    match ctx.data().lockdowns.state(guild_id) {
        Some(state) => {
            ctx.send(
                CreateReply::default().embed(
                    CreateEmbed::default()
                        .title("🔒 Lockdown Active")
                        .field("Since", format!("<t:{}:R>", state.since.timestamp()), true)
                        .field("Initiated By", format!("<@{}>", state.initiated_by), true)
                        .field("Channels Held", state.channels.len().to_string(), true)
                        .field("Reason", state.reason, false)
                        .color(COLOR_WARN),
                ),
            )
            .await?;
        }
        None => {
            ctx.say("No lockdown is active on this server.").await?;
        }
    }

    Ok(())
}

#[derive(poise::ChoiceParameter)]
pub enum RaidActionChoice {
    #[name = "kick"]
    Kick,
    #[name = "ban"]
    Ban,
}

/// Kick or ban everyone flagged on an incident
#[poise::command(prefix_command, slash_command, guild_only, check = "is_operator")]
pub async fn raidaction(
    ctx: Context<'_>,
    #[description = "Incident id, as shown by raidreview list"] incident_id: i64,
    #[description = "What to do with the flagged users"] action: RaidActionChoice,
) -> Result<(), Error> {
    let data = ctx.data();

    let Some(incident) = data.incidents.get(incident_id) else {
        ctx.say(format!("No incident with id `{}` exists.", incident_id)).await?;
        return Ok(());
    };

    if incident.users_flagged.is_empty() {
        ctx.say("That incident has no flagged users to act on.").await?;
        return Ok(());
    }

    ctx.defer().await?;

    let action = match action {
        RaidActionChoice::Kick => RaidAction::Kick,
        RaidActionChoice::Ban => RaidAction::Ban,
    };

    let report = execute_raid_action(
        ctx.serenity_context(),
        &data.incidents,
        &incident,
        action,
        &ctx.author().tag(),
    )
    .await?;

    let mut description = format!(
        "Action: {}\nSucceeded: {}\nFailed: {}",
        action,
        report.actioned.len(),
        report.failed.len()
    );
    for (name, err) in report.failed.iter().take(5) {
        description.push_str(&format!("\n- {}: {}", name, err));
    }

    ctx.send(
        CreateReply::default().embed(
            CreateEmbed::default()
                .title(format!("Raid Action for Incident #{}", incident.id))
                .description(description)
                .color(COLOR_WARN),
        ),
    )
    .await?;

    Ok(())
}

#[derive(poise::ChoiceParameter)]
pub enum SettingField {
    #[name = "join_threshold"]
    JoinThreshold,
    #[name = "join_window_secs"]
    JoinWindowSecs,
    #[name = "spam_threshold"]
    SpamThreshold,
    #[name = "spam_window_secs"]
    SpamWindowSecs,
    #[name = "mention_limit"]
    MentionLimit,
    #[name = "suspicious_account_age_days"]
    SuspiciousAccountAgeDays,
}

/// View or tune this server's detection thresholds
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    check = "is_operator",
    subcommands("view", "set")
)]
pub async fn raidconfig(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Show the detection thresholds in effect for this server
#[poise::command(prefix_command, slash_command, guild_only, check = "is_operator")]
pub async fn view(ctx: Context<'_>) -> Result<(), Error> {
    let Some(guild_id) = ctx.guild_id() else {
        return Err("This command can only be used in a server.".into());
    };

    let settings = cache::get_settings(&ctx.data().pool, guild_id).await?;

    ctx.send(
        CreateReply::default().embed(
            CreateEmbed::default()
                .title("Raid Protection Settings")
                .field("join_threshold", settings.join_threshold.to_string(), true)
                .field("join_window_secs", settings.join_window_secs.to_string(), true)
                .field("spam_threshold", settings.spam_threshold.to_string(), true)
                .field("spam_window_secs", settings.spam_window_secs.to_string(), true)
                .field("mention_limit", settings.mention_limit.to_string(), true)
                .field(
                    "suspicious_account_age_days",
                    settings.suspicious_account_age_days.to_string(),
                    true,
                )
                .color(COLOR_INFO),
        ),
    )
    .await?;

    Ok(())
}

/// Change one detection threshold for this server
#[poise::command(prefix_command, slash_command, guild_only, check = "is_operator")]
pub async fn set(
    ctx: Context<'_>,
    #[description = "Which setting to change"] field: SettingField,
    #[description = "New value"]
    #[min = 1]
    #[max = 10000]
    value: i32,
) -> Result<(), Error> {
    let Some(guild_id) = ctx.guild_id() else {
        return Err("This command can only be used in a server.".into());
    };

    let (column, query) = match field {
        SettingField::JoinThreshold => (
            "join_threshold",
            "INSERT INTO raid_protection__settings (guild_id, join_threshold) VALUES ($1, $2) ON CONFLICT (guild_id) DO UPDATE SET join_threshold = $2",
        ),
        SettingField::JoinWindowSecs => (
            "join_window_secs",
            "INSERT INTO raid_protection__settings (guild_id, join_window_secs) VALUES ($1, $2) ON CONFLICT (guild_id) DO UPDATE SET join_window_secs = $2",
        ),
        SettingField::SpamThreshold => (
            "spam_threshold",
            "INSERT INTO raid_protection__settings (guild_id, spam_threshold) VALUES ($1, $2) ON CONFLICT (guild_id) DO UPDATE SET spam_threshold = $2",
        ),
        SettingField::SpamWindowSecs => (
            "spam_window_secs",
            "INSERT INTO raid_protection__settings (guild_id, spam_window_secs) VALUES ($1, $2) ON CONFLICT (guild_id) DO UPDATE SET spam_window_secs = $2",
        ),
        SettingField::MentionLimit => (
            "mention_limit",
            "INSERT INTO raid_protection__settings (guild_id, mention_limit) VALUES ($1, $2) ON CONFLICT (guild_id) DO UPDATE SET mention_limit = $2",
        ),
        SettingField::SuspiciousAccountAgeDays => (
            "suspicious_account_age_days",
            "INSERT INTO raid_protection__settings (guild_id, suspicious_account_age_days) VALUES ($1, $2) ON CONFLICT (guild_id) DO UPDATE SET suspicious_account_age_days = $2",
        ),
    };

    sqlx::query(query)
        .bind(guild_id.to_string())
        .bind(value)
        .execute(&ctx.data().pool)
        .await?;

    cache::invalidate(guild_id).await;

    ctx.say(format!("`{}` is now `{}` for this server.", column, value)).await?;

    Ok(())
}
