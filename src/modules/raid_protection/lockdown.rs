use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serenity::all::{
    ChannelId, ChannelType, GuildId, PermissionOverwrite, PermissionOverwriteType, Permissions,
    RoleId, UserId,
};

use crate::Error;

/// The @everyone overwrite a channel had before lockdown touched it, so lift
/// can restore it bit for bit. `existed = false` means the channel had no
/// @everyone overwrite at all and lift deletes ours instead of restoring.
#[derive(Debug, Clone)]
pub struct SavedOverwrite {
    pub channel_id: ChannelId,
    pub channel_name: String,
    pub allow: Permissions,
    pub deny: Permissions,
    pub existed: bool,
}

/// An active lockdown for one guild
#[derive(Debug, Clone)]
pub struct LockdownState {
    pub guild_id: GuildId,
    pub since: DateTime<Utc>,
    pub reason: String,
    pub initiated_by: UserId,
    pub channels: Vec<SavedOverwrite>,
}

/// Per-channel results of an apply or lift pass. A channel failing never
/// aborts the pass; it lands in `failed` with the error text.
#[derive(Debug, Default)]
pub struct LockdownReport {
    pub affected: Vec<String>,
    pub failed: Vec<(String, String)>,
}

pub enum ApplyOutcome {
    Applied(LockdownReport),
    AlreadyLocked,
}

pub enum LiftOutcome {
    Lifted(LockdownReport),
    NotLocked,
}

/// What lockdown needs to know about a text channel
#[derive(Debug, Clone)]
pub struct TextChannelView {
    pub id: ChannelId,
    pub name: String,
    pub everyone_allow: Permissions,
    pub everyone_deny: Permissions,
    pub has_everyone_overwrite: bool,
}

/// Seam between the lockdown pass and Discord. The bot talks to the real
/// API through this; tests swap in an in-memory guild.
#[async_trait]
pub trait ChannelPermissionEditor: Send + Sync {
    async fn text_channels(&self, guild_id: GuildId) -> Result<Vec<TextChannelView>, Error>;

    async fn set_everyone_overwrite(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        allow: Permissions,
        deny: Permissions,
    ) -> Result<(), Error>;

    async fn remove_everyone_overwrite(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<(), Error>;
}

/// Tracks which guilds are locked down and holds the saved overwrites needed
/// to lift them.
#[derive(Default)]
pub struct LockdownRegistry {
    states: DashMap<GuildId, LockdownState>,
}

impl LockdownRegistry {
    pub fn state(&self, guild_id: GuildId) -> Option<LockdownState> {
        self.states.get(&guild_id).map(|s| s.clone())
    }

    /// Denies SEND_MESSAGES for @everyone on every text channel, snapshotting
    /// each channel's prior overwrite first. Channels that fail are reported
    /// and skipped; their snapshot is not kept.
    pub async fn apply(
        &self,
        editor: &dyn ChannelPermissionEditor,
        guild_id: GuildId,
        reason: String,
        initiated_by: UserId,
    ) -> Result<ApplyOutcome, Error> {
        if self.states.contains_key(&guild_id) {
            return Ok(ApplyOutcome::AlreadyLocked);
        }

        let channels = editor.text_channels(guild_id).await?;

        let mut report = LockdownReport::default();
        let mut saved = Vec::with_capacity(channels.len());

        for channel in channels {
            let allow = channel.everyone_allow & !Permissions::SEND_MESSAGES;
            let deny = channel.everyone_deny | Permissions::SEND_MESSAGES;

            match editor
                .set_everyone_overwrite(guild_id, channel.id, allow, deny)
                .await
            {
                Ok(()) => {
                    saved.push(SavedOverwrite {
                        channel_id: channel.id,
                        channel_name: channel.name.clone(),
                        allow: channel.everyone_allow,
                        deny: channel.everyone_deny,
                        existed: channel.has_everyone_overwrite,
                    });
                    report.affected.push(channel.name);
                }
                Err(e) => {
                    log::error!(
                        "Lockdown failed on #{} in guild {}: {}",
                        channel.name,
                        guild_id,
                        e
                    );
                    report.failed.push((channel.name, e.to_string()));
                }
            }
        }

        self.states.insert(
            guild_id,
            LockdownState {
                guild_id,
                since: Utc::now(),
                reason,
                initiated_by,
                channels: saved,
            },
        );

        Ok(ApplyOutcome::Applied(report))
    }

    /// Restores each snapshotted overwrite, removing ours where the channel
    /// had none before. The state record is dropped even if some channels
    /// fail; those go to the report for operator follow-up.
    pub async fn lift(
        &self,
        editor: &dyn ChannelPermissionEditor,
        guild_id: GuildId,
    ) -> Result<LiftOutcome, Error> {
        let Some((_, state)) = self.states.remove(&guild_id) else {
            return Ok(LiftOutcome::NotLocked);
        };

        let mut report = LockdownReport::default();

        for saved in state.channels {
            let result = if saved.existed {
                editor
                    .set_everyone_overwrite(guild_id, saved.channel_id, saved.allow, saved.deny)
                    .await
            } else {
                editor
                    .remove_everyone_overwrite(guild_id, saved.channel_id)
                    .await
            };

            match result {
                Ok(()) => report.affected.push(saved.channel_name),
                Err(e) => {
                    log::error!(
                        "Lift failed on #{} in guild {}: {}",
                        saved.channel_name,
                        guild_id,
                        e
                    );
                    report.failed.push((saved.channel_name, e.to_string()));
                }
            }
        }

        Ok(LiftOutcome::Lifted(report))
    }
}

/// Real editor backed by the Discord API
pub struct DiscordChannelEditor {
    ctx: serenity::client::Context,
}

impl DiscordChannelEditor {
    pub fn new(ctx: serenity::client::Context) -> Self {
        Self { ctx }
    }

    fn everyone_role(guild_id: GuildId) -> RoleId {
        // The @everyone role always shares the guild's id
        RoleId::new(guild_id.get())
    }
}

#[async_trait]
impl ChannelPermissionEditor for DiscordChannelEditor {
    async fn text_channels(&self, guild_id: GuildId) -> Result<Vec<TextChannelView>, Error> {
        let everyone = Self::everyone_role(guild_id);
        let channels = guild_id.channels(&self.ctx.http).await?;

        let mut views = Vec::new();
        for channel in channels.into_values() {
            if channel.kind != ChannelType::Text {
                continue;
            }

            let overwrite = channel
                .permission_overwrites
                .iter()
                .find(|o| o.kind == PermissionOverwriteType::Role(everyone));

            views.push(TextChannelView {
                id: channel.id,
                name: channel.name.clone(),
                everyone_allow: overwrite.map(|o| o.allow).unwrap_or(Permissions::empty()),
                everyone_deny: overwrite.map(|o| o.deny).unwrap_or(Permissions::empty()),
                has_everyone_overwrite: overwrite.is_some(),
            });
        }

        Ok(views)
    }

    async fn set_everyone_overwrite(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        allow: Permissions,
        deny: Permissions,
    ) -> Result<(), Error> {
        let channels = guild_id.channels(&self.ctx.http).await?;
        let channel = channels
            .get(&channel_id)
            .ok_or_else(|| format!("Channel {} no longer exists", channel_id))?;

        channel
            .create_permission(
                &self.ctx.http,
                PermissionOverwrite {
                    allow,
                    deny,
                    kind: PermissionOverwriteType::Role(Self::everyone_role(guild_id)),
                },
            )
            .await?;

        Ok(())
    }

    async fn remove_everyone_overwrite(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<(), Error> {
        let channels = guild_id.channels(&self.ctx.http).await?;
        let channel = channels
            .get(&channel_id)
            .ok_or_else(|| format!("Channel {} no longer exists", channel_id))?;

        channel
            .delete_permission(
                &self.ctx.http,
                PermissionOverwriteType::Role(Self::everyone_role(guild_id)),
            )
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    struct MockOverwrite {
        allow: Permissions,
        deny: Permissions,
    }

    /// In-memory guild with a configurable set of channels that reject edits
    struct MockEditor {
        channels: Mutex<Vec<(ChannelId, String, Option<MockOverwrite>)>>,
        failing: Vec<ChannelId>,
        listing_fails: bool,
    }

    impl MockEditor {
        fn new(channels: Vec<(u64, &str, Option<MockOverwrite>)>) -> Self {
            Self {
                channels: Mutex::new(
                    channels
                        .into_iter()
                        .map(|(id, name, o)| (ChannelId::new(id), name.to_string(), o))
                        .collect(),
                ),
                failing: Vec::new(),
                listing_fails: false,
            }
        }

        fn failing_on(mut self, id: u64) -> Self {
            self.failing.push(ChannelId::new(id));
            self
        }

        fn with_broken_listing(mut self) -> Self {
            self.listing_fails = true;
            self
        }

        fn overwrites(&self) -> HashMap<ChannelId, Option<MockOverwrite>> {
            self.channels
                .lock()
                .unwrap()
                .iter()
                .map(|(id, _, o)| (*id, o.clone()))
                .collect()
        }
    }

    #[async_trait]
    impl ChannelPermissionEditor for MockEditor {
        async fn text_channels(&self, _guild_id: GuildId) -> Result<Vec<TextChannelView>, Error> {
            if self.listing_fails {
                return Err("channel listing unavailable".into());
            }

            Ok(self
                .channels
                .lock()
                .unwrap()
                .iter()
                .map(|(id, name, overwrite)| TextChannelView {
                    id: *id,
                    name: name.clone(),
                    everyone_allow: overwrite
                        .as_ref()
                        .map(|o| o.allow)
                        .unwrap_or(Permissions::empty()),
                    everyone_deny: overwrite
                        .as_ref()
                        .map(|o| o.deny)
                        .unwrap_or(Permissions::empty()),
                    has_everyone_overwrite: overwrite.is_some(),
                })
                .collect())
        }

        async fn set_everyone_overwrite(
            &self,
            _guild_id: GuildId,
            channel_id: ChannelId,
            allow: Permissions,
            deny: Permissions,
        ) -> Result<(), Error> {
            if self.failing.contains(&channel_id) {
                return Err("Missing Permissions".into());
            }

            let mut channels = self.channels.lock().unwrap();
            let (_, _, overwrite) = channels
                .iter_mut()
                .find(|(id, _, _)| *id == channel_id)
                .ok_or("unknown channel")?;
            *overwrite = Some(MockOverwrite { allow, deny });
            Ok(())
        }

        async fn remove_everyone_overwrite(
            &self,
            _guild_id: GuildId,
            channel_id: ChannelId,
        ) -> Result<(), Error> {
            if self.failing.contains(&channel_id) {
                return Err("Missing Permissions".into());
            }

            let mut channels = self.channels.lock().unwrap();
            let (_, _, overwrite) = channels
                .iter_mut()
                .find(|(id, _, _)| *id == channel_id)
                .ok_or("unknown channel")?;
            *overwrite = None;
            Ok(())
        }
    }

    fn guild() -> GuildId {
        GuildId::new(1000)
    }

    fn operator() -> UserId {
        UserId::new(77)
    }

    fn three_channel_guild() -> MockEditor {
        MockEditor::new(vec![
            (
                1,
                "general",
                Some(MockOverwrite {
                    allow: Permissions::SEND_MESSAGES,
                    deny: Permissions::empty(),
                }),
            ),
            (2, "memes", None),
            (
                3,
                "mod-chat",
                Some(MockOverwrite {
                    allow: Permissions::empty(),
                    deny: Permissions::ATTACH_FILES,
                }),
            ),
        ])
    }

    #[tokio::test]
    async fn apply_then_lift_restores_original_overwrites() {
        let editor = three_channel_guild();
        let before = editor.overwrites();
        let registry = LockdownRegistry::default();

        let outcome = registry
            .apply(&editor, guild(), "raid".to_string(), operator())
            .await
            .unwrap();
        let ApplyOutcome::Applied(report) = outcome else {
            panic!("expected a fresh lockdown to apply");
        };
        assert_eq!(report.affected, vec!["general", "memes", "mod-chat"]);
        assert!(report.failed.is_empty());

        // Every channel now denies SEND_MESSAGES for @everyone.
        for overwrite in editor.overwrites().values() {
            let o = overwrite.as_ref().unwrap();
            assert!(o.deny.contains(Permissions::SEND_MESSAGES));
            assert!(!o.allow.contains(Permissions::SEND_MESSAGES));
        }

        let LiftOutcome::Lifted(report) = registry.lift(&editor, guild()).await.unwrap() else {
            panic!("expected an active lockdown to lift");
        };
        assert!(report.failed.is_empty());

        assert_eq!(editor.overwrites(), before);
        assert!(registry.state(guild()).is_none());
    }

    #[tokio::test]
    async fn channel_failure_is_reported_but_does_not_abort_the_pass() {
        let editor = three_channel_guild().failing_on(2);
        let registry = LockdownRegistry::default();

        let ApplyOutcome::Applied(report) = registry
            .apply(&editor, guild(), "raid".to_string(), operator())
            .await
            .unwrap()
        else {
            panic!("expected the lockdown to apply");
        };

        assert_eq!(report.affected, vec!["general", "mod-chat"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "memes");

        // The failed channel is not snapshotted, so lift leaves it alone.
        let state = registry.state(guild()).unwrap();
        assert_eq!(state.channels.len(), 2);
        assert_eq!(state.reason, "raid");
        assert_eq!(state.initiated_by, operator());
    }

    #[tokio::test]
    async fn apply_while_locked_is_rejected() {
        let editor = three_channel_guild();
        let registry = LockdownRegistry::default();

        registry
            .apply(&editor, guild(), "first".to_string(), operator())
            .await
            .unwrap();

        let outcome = registry
            .apply(&editor, guild(), "second".to_string(), operator())
            .await
            .unwrap();
        assert!(matches!(outcome, ApplyOutcome::AlreadyLocked));
        assert_eq!(registry.state(guild()).unwrap().reason, "first");
    }

    #[tokio::test]
    async fn failed_channel_listing_leaves_the_guild_unlocked() {
        let registry = LockdownRegistry::default();

        let broken = three_channel_guild().with_broken_listing();
        let result = registry
            .apply(&broken, guild(), "raid".to_string(), operator())
            .await;
        assert!(result.is_err());

        // No state was recorded, so a retry against a healthy API applies.
        assert!(registry.state(guild()).is_none());

        let healthy = three_channel_guild();
        let outcome = registry
            .apply(&healthy, guild(), "raid".to_string(), operator())
            .await
            .unwrap();
        assert!(matches!(outcome, ApplyOutcome::Applied(_)));
        assert!(registry.state(guild()).is_some());
    }

    #[tokio::test]
    async fn lift_without_a_lockdown_is_a_no_op() {
        let editor = three_channel_guild();
        let registry = LockdownRegistry::default();

        let outcome = registry.lift(&editor, guild()).await.unwrap();
        assert!(matches!(outcome, LiftOutcome::NotLocked));
    }

    #[tokio::test]
    async fn lift_removes_overwrites_lockdown_created() {
        let editor = MockEditor::new(vec![(2, "memes", None)]);
        let registry = LockdownRegistry::default();

        registry
            .apply(&editor, guild(), "raid".to_string(), operator())
            .await
            .unwrap();
        assert!(editor.overwrites()[&ChannelId::new(2)].is_some());

        registry.lift(&editor, guild()).await.unwrap();
        assert!(editor.overwrites()[&ChannelId::new(2)].is_none());
    }
}
