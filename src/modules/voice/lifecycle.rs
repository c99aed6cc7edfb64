use super::{
    ownership::{everyone_grant, owner_grant},
    registry::{ChannelRecord, ChannelRegistry, ChannelSettings},
};
use crate::{
    config::VoiceConfig,
    error::Result,
    platform::{Grant, NewChannel, Occupancy, Platform, Subject},
};
use chrono::Utc;
use dashmap::DashMap;
use poise::serenity_prelude::{ChannelId, ChannelType, GuildId, Permissions, UserId};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

const DELETE_REASON: &str = "Temporary voice channel cleanup";

/// Moves temporary channels through create → active ⇄ pending delete → deleted.
#[derive(Debug, Clone)]
pub struct LifecycleController {
    registry: ChannelRegistry,
    platform: Arc<dyn Platform>,
    config: Arc<VoiceConfig>,
    /// Serializes category find-or-create per guild.
    category_locks: Arc<DashMap<GuildId, Arc<Mutex<()>>>>,
}

impl LifecycleController {
    pub fn new(
        registry: ChannelRegistry,
        platform: Arc<dyn Platform>,
        config: Arc<VoiceConfig>,
    ) -> Self {
        Self {
            registry,
            platform,
            config,
            category_locks: Arc::new(DashMap::new()),
        }
    }

    /// Applies one voice state update. A move between channels is a join of
    /// the new channel followed by a leave of the old one.
    pub async fn on_presence_change(
        &self,
        guild: GuildId,
        member: UserId,
        display_name: &str,
        old: Option<ChannelId>,
        new: Option<ChannelId>,
    ) -> Result<Option<ChannelRecord>> {
        let joined = match new.filter(|channel| old != Some(*channel)) {
            Some(channel) => {
                self.on_member_joined(guild, member, display_name, channel)
                    .await
            }
            None => Ok(None),
        };

        if let Some(channel) = old.filter(|channel| new != Some(*channel)) {
            self.on_member_left(guild, channel);
        }

        joined
    }

    pub async fn on_member_joined(
        &self,
        guild: GuildId,
        member: UserId,
        display_name: &str,
        channel: ChannelId,
    ) -> Result<Option<ChannelRecord>> {
        if self.registry.is_temporary(channel) {
            if self.registry.cancel_pending(channel) {
                debug!("Cancelled pending deletion of {} after rejoin", channel);
            }
            return Ok(None);
        }

        if !self.is_trigger(guild, channel) {
            return Ok(None);
        }

        self.create_for(guild, member, display_name).await.map(Some)
    }

    /// Returns true if a deletion was scheduled.
    pub fn on_member_left(&self, guild: GuildId, channel: ChannelId) -> bool {
        if !self.registry.is_temporary(channel) {
            return false;
        }

        match self.platform.occupants(guild, channel) {
            Occupancy::Present(occupants) if !occupants.is_empty() => false,
            Occupancy::Present(_) => self.schedule_deletion(channel),
            Occupancy::Gone => {
                self.purge(channel);
                false
            }
            Occupancy::Unknown => {
                debug!("Guild {} not cached, leaving {} to the sweep", guild, channel);
                false
            }
        }
    }

    fn is_trigger(&self, guild: GuildId, channel: ChannelId) -> bool {
        self.platform
            .channel_name(guild, channel)
            .is_some_and(|name| name == self.config.trigger_channel_name)
    }

    pub async fn ensure_category(&self, guild: GuildId) -> Result<ChannelId> {
        let name = &self.config.category_name;
        let lock = self.category_locks.entry(guild).or_default().clone();
        let _guard = lock.lock().await;

        if let Some(category) = self.platform.find_channel(guild, name, ChannelType::Category) {
            return Ok(category);
        }

        info!("Creating category {} in guild {}", name, guild);
        self.platform
            .create_channel(
                guild,
                NewChannel {
                    name: name.clone(),
                    kind: ChannelType::Category,
                    parent: None,
                    user_limit: None,
                    overwrites: vec![(
                        Subject::everyone(guild),
                        Grant::allow(Permissions::VIEW_CHANNEL | Permissions::CONNECT),
                    )],
                },
            )
            .await
    }

    async fn create_for(
        &self,
        guild: GuildId,
        member: UserId,
        display_name: &str,
    ) -> Result<ChannelRecord> {
        let category = self.ensure_category(guild).await?;

        let settings = ChannelSettings {
            user_limit: self.config.default_user_limit,
            ..Default::default()
        };
        let name = self.config.channel_name_for(display_name);

        let channel = self
            .platform
            .create_channel(
                guild,
                NewChannel {
                    name: name.clone(),
                    kind: ChannelType::Voice,
                    parent: Some(category),
                    user_limit: Some(settings.user_limit),
                    overwrites: vec![
                        (Subject::everyone(guild), everyone_grant(&settings)),
                        (Subject::Member(member), owner_grant()),
                    ],
                },
            )
            .await?;

        let record = ChannelRecord::new(channel, guild, member, name, settings);
        self.registry.put(record.clone());
        info!("Created temporary channel {} ({}) for {}", record.name, channel, member);

        if let Err(e) = self.platform.move_member(guild, member, channel).await {
            warn!("Failed to move {} into {}: {}", member, channel, e);
            self.on_member_left(guild, channel);
        }

        Ok(record)
    }

    /// Schedules deletion after the configured delay, superseding any earlier
    /// schedule for the same channel.
    pub fn schedule_deletion(&self, channel: ChannelId) -> bool {
        let delay = self.config.delete_delay();
        let due_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());

        let controller = self.clone();
        let ticket = self.registry.schedule(channel, due_at, move |ticket| {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                controller.fire_deletion(channel, ticket).await;
            })
        });

        match ticket {
            Some(ticket) => {
                debug!("Scheduled deletion of {} in {:?} (ticket {})", channel, delay, ticket);
                true
            }
            None => false,
        }
    }

    async fn fire_deletion(&self, channel: ChannelId, ticket: u64) {
        let Some(record) = self.registry.lookup(channel) else {
            return;
        };

        if !self.registry.take_pending(channel, ticket) {
            debug!("Deletion ticket {} for {} was superseded", ticket, channel);
            return;
        }

        match self.platform.occupants(record.guild_id, channel) {
            Occupancy::Gone => {
                self.purge(channel);
            }
            Occupancy::Unknown => {
                debug!("Guild of {} not cached, deferring deletion to the sweep", channel);
            }
            Occupancy::Present(occupants) if !occupants.is_empty() => {
                debug!("{} was re-occupied before deletion", channel);
            }
            Occupancy::Present(_) => {
                if let Err(e) = self.delete_channel(channel).await {
                    error!("Failed to delete empty channel {}: {}", channel, e);
                }
            }
        }
    }

    /// Deletes a temporary channel and its record. Succeeds without doing
    /// anything if either is already gone.
    pub async fn delete_channel(&self, channel: ChannelId) -> Result<()> {
        let Some(record) = self.registry.lookup(channel) else {
            debug!("Channel {} already deleted", channel);
            return Ok(());
        };

        self.registry.cancel_pending(channel);

        match self.platform.delete_channel(channel, DELETE_REASON).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!("Channel {} was already gone on the platform", channel);
            }
            Err(e) => return Err(e),
        }

        self.registry.remove(channel);
        info!("Deleted temporary channel {} ({})", record.name, channel);
        Ok(())
    }

    /// Forgets a channel that no longer exists on the platform.
    pub fn purge(&self, channel: ChannelId) -> bool {
        match self.registry.remove(channel) {
            Some(record) => {
                info!("Purged record for vanished channel {} ({})", record.name, channel);
                true
            }
            None => false,
        }
    }

    /// Reconciles every record with the platform: vanished channels are
    /// purged and empty channels without a pending deletion get one.
    /// Channels in guilds missing from the cache are skipped.
    pub fn sweep(&self) -> (usize, usize) {
        let mut purged = 0;
        let mut scheduled = 0;

        for record in self.registry.all() {
            match self.platform.occupants(record.guild_id, record.channel_id) {
                Occupancy::Gone => {
                    if self.purge(record.channel_id) {
                        purged += 1;
                    }
                }
                Occupancy::Present(occupants)
                    if occupants.is_empty() && record.pending_deletion.is_none() =>
                {
                    if self.schedule_deletion(record.channel_id) {
                        scheduled += 1;
                    }
                }
                Occupancy::Present(_) | Occupancy::Unknown => {}
            }
        }

        (purged, scheduled)
    }
}
