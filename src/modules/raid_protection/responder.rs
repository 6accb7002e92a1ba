use futures_util::StreamExt;
use serenity::all::{
    ButtonStyle, Colour, ComponentInteraction, CreateActionRow, CreateButton, CreateEmbed,
    CreateEmbedFooter, CreateInputText, CreateInteractionResponse, CreateInteractionResponseMessage,
    CreateMessage, CreateQuickModal, EditMessage, GuildId, InputTextStyle, Message, RoleId, UserId,
};
use std::sync::Arc;
use std::time::Duration;

use crate::config::CONFIG;
use crate::Error;

use super::incidents::{Incident, IncidentStatus, IncidentStore, IncidentType, NewIncident};
use super::lockdown::{
    ApplyOutcome, DiscordChannelEditor, LiftOutcome, LockdownRegistry, LockdownReport,
};

pub const COLOR_ALERT: Colour = Colour(0xED4245);
pub const COLOR_OK: Colour = Colour(0x57F287);
pub const COLOR_WARN: Colour = Colour(0xFEE75C);
pub const COLOR_INFO: Colour = Colour(0x5865F2);

/// How long alert controls stay live before the buttons are disabled
const ALERT_CONTROL_TIMEOUT: Duration = Duration::from_secs(600);

/// How long an operator gets to fill in the lockdown reason modal
const LOCKDOWN_MODAL_TIMEOUT: Duration = Duration::from_secs(120);

/// Lifecycle of one raid alert. Every state except `LockdownActive` that is
/// reached by an operator action is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertState {
    Detected,
    ApprovedForAction,
    Dismissed,
    LockdownRequested,
    LockdownActive,
    LockdownLifted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertAction {
    Approve,
    Dismiss,
    RequestLockdown,
    ConfirmLockdown,
    CancelLockdown,
    LiftLockdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub state: AlertState,
    pub action: AlertAction,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} is not valid while the alert is {:?}", self.action, self.state)
    }
}

impl std::error::Error for InvalidTransition {}

impl AlertState {
    pub fn apply(self, action: AlertAction) -> Result<AlertState, InvalidTransition> {
        use AlertAction::*;
        use AlertState::*;

        match (self, action) {
            (Detected, Approve) => Ok(ApprovedForAction),
            (Detected, Dismiss) => Ok(Dismissed),
            (Detected, RequestLockdown) => Ok(LockdownRequested),
            (LockdownRequested, ConfirmLockdown) => Ok(LockdownActive),
            (LockdownRequested, CancelLockdown) => Ok(Detected),
            (LockdownActive, LiftLockdown) => Ok(LockdownLifted),
            (state, action) => Err(InvalidTransition { state, action }),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AlertState::Detected => "Awaiting Review",
            AlertState::ApprovedForAction => "Approved for Action",
            AlertState::Dismissed => "Dismissed",
            AlertState::LockdownRequested => "Lockdown Requested",
            AlertState::LockdownActive => "Lockdown Active",
            AlertState::LockdownLifted => "Lockdown Lifted",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AlertState::ApprovedForAction | AlertState::Dismissed | AlertState::LockdownLifted
        )
    }
}

/// Owners and configured operator roles may drive alert controls and the
/// lockdown commands.
pub fn is_authorized_operator(user_id: UserId, member_roles: &[RoleId]) -> bool {
    if CONFIG.discord_auth.owners.contains(&user_id) {
        return true;
    }

    CONFIG
        .raid_protection
        .operator_roles
        .iter()
        .any(|role| member_roles.contains(role))
}

fn operator_ping() -> String {
    let pings = CONFIG
        .raid_protection
        .operator_roles
        .iter()
        .map(|role| format!("<@&{}>", role))
        .collect::<Vec<_>>()
        .join(" ");

    if pings.is_empty() {
        "@here".to_string()
    } else {
        pings
    }
}

/// Posts an embed to the operational log channel when one is configured.
/// Failures are logged and swallowed so the triggering workflow carries on.
pub async fn dev_log(ctx: &serenity::client::Context, embed: CreateEmbed) {
    let Some(channel) = CONFIG.raid_protection.dev_log_channel else {
        return;
    };

    if let Err(e) = channel
        .send_message(&ctx.http, CreateMessage::new().embed(embed))
        .await
    {
        log::error!("Failed to post to the operational log channel: {}", e);
    }
}

/// Mirrors an incident persistence failure to the operational log so it is
/// never silently dropped.
pub async fn surface_persist_failure(
    ctx: &serenity::client::Context,
    incident_id: i64,
    persisted: Result<(), Error>,
) {
    if let Err(e) = persisted {
        dev_log(
            ctx,
            CreateEmbed::new()
                .title("Incident log write failed")
                .description(format!(
                    "Incident `{}` is held in memory but could not be written to disk: {}",
                    incident_id, e
                ))
                .color(COLOR_WARN),
        )
        .await;
    }
}

fn alert_embed(incident: &Incident, state: AlertState) -> CreateEmbed {
    let mut flagged = incident
        .users_flagged
        .iter()
        .take(10)
        .map(|u| format!("<@{}> ({})", u.id, u.display_name))
        .collect::<Vec<_>>()
        .join("\n");

    if incident.users_flagged.len() > 10 {
        flagged.push_str(&format!("\n...and {} more", incident.users_flagged.len() - 10));
    }

    if flagged.is_empty() {
        flagged = "None captured".to_string();
    }

    let color = match state {
        AlertState::Dismissed | AlertState::LockdownLifted => COLOR_OK,
        AlertState::LockdownRequested | AlertState::LockdownActive => COLOR_WARN,
        _ => COLOR_ALERT,
    };

    CreateEmbed::new()
        .title(format!("🚨 {}", incident.kind))
        .description(format!(
            "Possible raid activity in **{}**. Review and pick a response below.",
            incident.guild_name
        ))
        .field("Detected By", incident.detected_by.clone(), true)
        .field("Event Count", incident.count.to_string(), true)
        .field("Status", state.label(), true)
        .field("Flagged Users", flagged, false)
        .footer(CreateEmbedFooter::new(format!("Incident #{}", incident.id)))
        .timestamp(incident.timestamp)
        .color(color)
}

fn alert_buttons(incident_id: i64, disabled: bool) -> Vec<CreateActionRow> {
    vec![CreateActionRow::Buttons(vec![
        CreateButton::new(format!("raid_approve:{}", incident_id))
            .label("Approve Action")
            .style(ButtonStyle::Success)
            .disabled(disabled),
        CreateButton::new(format!("raid_dismiss:{}", incident_id))
            .label("Dismiss")
            .style(ButtonStyle::Secondary)
            .disabled(disabled),
        CreateButton::new(format!("raid_lockdown:{}", incident_id))
            .label("Lockdown Server")
            .style(ButtonStyle::Danger)
            .disabled(disabled),
        CreateButton::new(format!("raid_lift:{}", incident_id))
            .label("Lift Lockdown")
            .style(ButtonStyle::Primary)
            .disabled(disabled),
    ])]
}

fn report_lines(report: &LockdownReport) -> String {
    let mut out = format!("Affected channels: {}", report.affected.len());

    if !report.failed.is_empty() {
        out.push_str(&format!("\nFailed channels: {}", report.failed.len()));
        for (name, err) in report.failed.iter().take(5) {
            out.push_str(&format!("\n- #{}: {}", name, err));
        }
    }

    out
}

/// Answers a button press with an ephemeral note. Failing to answer is
/// logged; the alert loop keeps running either way.
async fn ephemeral_reply(
    ctx: &serenity::client::Context,
    press: &ComponentInteraction,
    content: impl Into<String>,
) {
    if let Err(e) = press
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(content)
                    .ephemeral(true),
            ),
        )
        .await
    {
        log::error!("Failed to answer alert interaction: {}", e);
    }
}

/// Rewrites the alert message in place for the new state.
async fn update_alert_message(
    ctx: &serenity::client::Context,
    press: &ComponentInteraction,
    incident: &Incident,
    state: AlertState,
    disable_controls: bool,
) {
    if let Err(e) = press
        .create_response(
            &ctx.http,
            CreateInteractionResponse::UpdateMessage(
                CreateInteractionResponseMessage::new()
                    .embed(alert_embed(incident, state))
                    .components(alert_buttons(incident.id, disable_controls)),
            ),
        )
        .await
    {
        log::error!("Failed to update alert for incident {}: {}", incident.id, e);
    }
}

/// Posts the raid alert with its action controls and spawns the task that
/// drives them until a terminal state or timeout.
pub async fn post_raid_alert(
    ctx: &serenity::client::Context,
    store: Arc<IncidentStore>,
    lockdowns: Arc<LockdownRegistry>,
    incident: Incident,
    details: Option<String>,
) -> Result<(), Error> {
    let mut embed = alert_embed(&incident, AlertState::Detected);
    if let Some(details) = details {
        embed = embed.field("Details", details, false);
    }

    let msg = CONFIG
        .raid_protection
        .alert_channel
        .send_message(
            &ctx.http,
            CreateMessage::new()
                .content(operator_ping())
                .embed(embed.clone())
                .components(alert_buttons(incident.id, false)),
        )
        .await?;

    dev_log(ctx, embed).await;

    tokio::spawn(run_alert_controls(
        ctx.clone(),
        store,
        lockdowns,
        msg,
        incident,
    ));

    Ok(())
}

/// Drives one alert's buttons through the state machine. Unauthorized and
/// out-of-order presses are rejected with an ephemeral note and never
/// advance the state. Discord failures on this path are logged and the
/// press skipped; only a terminal state or the collector timeout ends the
/// loop.
async fn run_alert_controls(
    ctx: serenity::client::Context,
    store: Arc<IncidentStore>,
    lockdowns: Arc<LockdownRegistry>,
    mut msg: Message,
    incident: Incident,
) {
    let guild_id = match incident.guild_id.parse::<u64>() {
        Ok(id) => GuildId::new(id),
        Err(e) => {
            log::error!("Incident {} carries a malformed guild id: {}", incident.id, e);
            return;
        }
    };

    let mut state = AlertState::Detected;

    let collector = msg
        .await_component_interactions(&ctx)
        .timeout(ALERT_CONTROL_TIMEOUT);

    let mut stream = collector.stream();

    while let Some(press) = stream.next().await {
        let member_roles = press
            .member
            .as_ref()
            .map(|m| m.roles.to_vec())
            .unwrap_or_default();

        if !is_authorized_operator(press.user.id, &member_roles) {
            ephemeral_reply(&ctx, &press, "You are not authorized to respond to raid alerts.")
                .await;
            continue;
        }

        let action = match press.data.custom_id.split(':').next() {
            Some("raid_approve") => AlertAction::Approve,
            Some("raid_dismiss") => AlertAction::Dismiss,
            Some("raid_lockdown") => AlertAction::RequestLockdown,
            Some("raid_lift") => AlertAction::LiftLockdown,
            _ => continue,
        };

        let next = match state.apply(action) {
            Ok(next) => next,
            Err(invalid) => {
                ephemeral_reply(&ctx, &press, format!("That control is unavailable: {}", invalid))
                    .await;
                continue;
            }
        };

        match action {
            AlertAction::Approve => {
                state = next;

                let (logged, persisted) = store.append(NewIncident {
                    guild_id: incident.guild_id.clone(),
                    guild_name: incident.guild_name.clone(),
                    kind: IncidentType::RaidAlertApproved,
                    detected_by: press.user.tag(),
                    users_flagged: incident.users_flagged.clone(),
                    count: incident.count,
                });
                surface_persist_failure(&ctx, logged.id, persisted).await;

                if let Err(e) = store.update_status(incident.id, IncidentStatus::UnderReview) {
                    log::error!("Failed to move incident {} under review: {}", incident.id, e);
                }

                update_alert_message(&ctx, &press, &incident, state, true).await;
            }
            AlertAction::Dismiss => {
                state = next;

                let (logged, persisted) = store.append(NewIncident {
                    guild_id: incident.guild_id.clone(),
                    guild_name: incident.guild_name.clone(),
                    kind: IncidentType::RaidAlertDismissed,
                    detected_by: press.user.tag(),
                    users_flagged: Vec::new(),
                    count: incident.count,
                });
                surface_persist_failure(&ctx, logged.id, persisted).await;

                if let Err(e) = store.update_status(incident.id, IncidentStatus::Resolved) {
                    log::error!("Failed to resolve incident {}: {}", incident.id, e);
                }

                update_alert_message(&ctx, &press, &incident, state, true).await;
            }
            AlertAction::RequestLockdown => {
                state = next;

                let modal = CreateQuickModal::new("Confirm Server Lockdown")
                    .timeout(LOCKDOWN_MODAL_TIMEOUT)
                    .field(
                        CreateInputText::new(InputTextStyle::Paragraph, "Reason", "reason")
                            .placeholder("Why is the server being locked down?")
                            .required(true),
                    );

                let resp = match press.quick_modal(&ctx, modal).await {
                    Ok(resp) => resp,
                    Err(e) => {
                        log::error!(
                            "Failed to open the lockdown modal for incident {}: {}",
                            incident.id,
                            e
                        );
                        state = state
                            .apply(AlertAction::CancelLockdown)
                            .unwrap_or(AlertState::Detected);
                        continue;
                    }
                };

                let Some(resp) = resp else {
                    // Modal timed out or was dismissed; back to Detected.
                    state = state
                        .apply(AlertAction::CancelLockdown)
                        .unwrap_or(AlertState::Detected);
                    log::info!(
                        "Lockdown request for incident {} expired without confirmation",
                        incident.id
                    );
                    continue;
                };

                let reason = resp
                    .inputs
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "No reason given".to_string());

                let editor = DiscordChannelEditor::new(ctx.clone());

                // State only moves to LockdownActive once apply succeeds;
                // a failed apply returns the alert to Detected with the
                // failure reported on the modal response.
                let outcome = match lockdowns
                    .apply(&editor, guild_id, reason.clone(), press.user.id)
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        log::error!(
                            "Lockdown apply failed for incident {}: {}",
                            incident.id,
                            e
                        );
                        state = state
                            .apply(AlertAction::CancelLockdown)
                            .unwrap_or(AlertState::Detected);

                        let note = format!("Lockdown failed and was not applied: {}", e);
                        if let Err(e) = resp
                            .interaction
                            .create_response(
                                &ctx.http,
                                CreateInteractionResponse::Message(
                                    CreateInteractionResponseMessage::new().content(note),
                                ),
                            )
                            .await
                        {
                            log::error!("Failed to report the lockdown failure: {}", e);
                        }
                        continue;
                    }
                };

                state = state
                    .apply(AlertAction::ConfirmLockdown)
                    .unwrap_or(AlertState::LockdownActive);

                let summary = match outcome {
                    ApplyOutcome::Applied(report) => {
                        let (logged, persisted) = store.append(NewIncident {
                            guild_id: incident.guild_id.clone(),
                            guild_name: incident.guild_name.clone(),
                            kind: IncidentType::LockdownInitiated,
                            detected_by: press.user.tag(),
                            users_flagged: Vec::new(),
                            count: report.affected.len() as u64,
                        });
                        surface_persist_failure(&ctx, logged.id, persisted).await;

                        format!(
                            "🔒 Server locked down.\nReason: {}\n{}",
                            reason,
                            report_lines(&report)
                        )
                    }
                    ApplyOutcome::AlreadyLocked => {
                        "The server is already locked down.".to_string()
                    }
                };

                if let Err(e) = resp
                    .interaction
                    .create_response(
                        &ctx.http,
                        CreateInteractionResponse::Message(
                            CreateInteractionResponseMessage::new().content(summary),
                        ),
                    )
                    .await
                {
                    log::error!(
                        "Failed to answer the lockdown confirmation for incident {}: {}",
                        incident.id,
                        e
                    );
                }

                if let Err(e) = msg
                    .edit(
                        &ctx.http,
                        EditMessage::new()
                            .embed(alert_embed(&incident, state))
                            .components(alert_buttons(incident.id, false)),
                    )
                    .await
                {
                    log::error!("Failed to update alert for incident {}: {}", incident.id, e);
                }
            }
            AlertAction::LiftLockdown => {
                let editor = DiscordChannelEditor::new(ctx.clone());

                match lockdowns.lift(&editor, guild_id).await {
                    Ok(LiftOutcome::Lifted(report)) => {
                        state = next;

                        let (logged, persisted) = store.append(NewIncident {
                            guild_id: incident.guild_id.clone(),
                            guild_name: incident.guild_name.clone(),
                            kind: IncidentType::LockdownLifted,
                            detected_by: press.user.tag(),
                            users_flagged: Vec::new(),
                            count: report.affected.len() as u64,
                        });
                        surface_persist_failure(&ctx, logged.id, persisted).await;

                        update_alert_message(&ctx, &press, &incident, state, true).await;
                    }
                    Ok(LiftOutcome::NotLocked) => {
                        ephemeral_reply(&ctx, &press, "There is no active lockdown to lift.")
                            .await;
                    }
                    Err(e) => {
                        log::error!(
                            "Lockdown lift failed for incident {}: {}",
                            incident.id,
                            e
                        );
                        ephemeral_reply(&ctx, &press, format!("Lift failed: {}", e)).await;
                    }
                }
            }
            AlertAction::ConfirmLockdown | AlertAction::CancelLockdown => {
                // Internal transitions, never mapped from a button.
            }
        }

        if state.is_terminal() {
            return;
        }
    }

    // Timed out with the alert still open; disable the controls.
    if !state.is_terminal() {
        if let Err(e) = msg
            .edit(
                &ctx.http,
                EditMessage::new().components(alert_buttons(incident.id, true)),
            )
            .await
        {
            log::error!(
                "Failed to disable expired alert controls for incident {}: {}",
                incident.id,
                e
            );
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaidAction {
    Kick,
    Ban,
}

impl std::fmt::Display for RaidAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RaidAction::Kick => write!(f, "kick"),
            RaidAction::Ban => write!(f, "ban"),
        }
    }
}

#[derive(Debug, Default)]
pub struct RaidActionReport {
    pub actioned: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Kicks or bans every user flagged on an incident. Per-user failures are
/// collected rather than aborting the sweep.
pub async fn execute_raid_action(
    ctx: &serenity::client::Context,
    store: &IncidentStore,
    incident: &Incident,
    action: RaidAction,
    operator: &str,
) -> Result<RaidActionReport, Error> {
    let guild_id = GuildId::new(incident.guild_id.parse::<u64>()?);
    let reason = format!("Raid response for incident #{}", incident.id);

    let mut report = RaidActionReport::default();

    for flagged in &incident.users_flagged {
        let user_id = match flagged.id.parse::<u64>() {
            Ok(id) => UserId::new(id),
            Err(e) => {
                report.failed.push((flagged.display_name.clone(), e.to_string()));
                continue;
            }
        };

        let result = match action {
            RaidAction::Kick => {
                guild_id
                    .kick_with_reason(&ctx.http, user_id, &reason)
                    .await
            }
            RaidAction::Ban => guild_id.ban_with_reason(&ctx.http, user_id, 0, &reason).await,
        };

        match result {
            Ok(()) => report.actioned.push(flagged.display_name.clone()),
            Err(e) => {
                log::error!(
                    "Failed to {} {} for incident {}: {}",
                    action,
                    flagged.id,
                    incident.id,
                    e
                );
                report.failed.push((flagged.display_name.clone(), e.to_string()));
            }
        }
    }

    let (logged, persisted) = store.append(NewIncident {
        guild_id: incident.guild_id.clone(),
        guild_name: incident.guild_name.clone(),
        kind: IncidentType::RaidActionExecuted,
        detected_by: operator.to_string(),
        users_flagged: incident.users_flagged.clone(),
        count: report.actioned.len() as u64,
    });
    surface_persist_failure(ctx, logged.id, persisted).await;

    Ok(report)
}
