use super::registry::{Actor, ChannelRecord, ChannelRegistry, ChannelSettings};
use crate::{
    config::VoiceConfig,
    error::{Result, VoiceError},
    platform::{ChannelEdit, Grant, Occupancy, Platform, Subject},
};
use poise::serenity_prelude::{ChannelId, Permissions, UserId};
use std::sync::Arc;
use tracing::{info, warn};

const MAX_NAME_LENGTH: usize = 100;
const MAX_STATUS_LENGTH: usize = 100;

/// Capabilities the owner holds on their channel.
pub fn owner_grant() -> Grant {
    Grant::allow(
        Permissions::MANAGE_CHANNELS
            | Permissions::MANAGE_ROLES
            | Permissions::MUTE_MEMBERS
            | Permissions::DEAFEN_MEMBERS
            | Permissions::MOVE_MEMBERS,
    )
}

/// The `@everyone` overwrite implied by a channel's settings.
pub fn everyone_grant(settings: &ChannelSettings) -> Grant {
    let mut grant = Grant::default();

    let flag = |grant: &mut Grant, permission: Permissions, allowed: bool| {
        if allowed {
            grant.allow |= permission;
        } else {
            grant.deny |= permission;
        }
    };
    flag(&mut grant, Permissions::VIEW_CHANNEL, !settings.hidden);
    flag(&mut grant, Permissions::CONNECT, !settings.locked);

    if !settings.user_activity {
        grant.deny |= Permissions::USE_VAD;
    }
    if !settings.camera_allowed {
        grant.deny |= Permissions::STREAM;
    }
    grant
}

/// Ownership and per-channel settings. Callers check control first; these
/// operations only enforce the rules of the operation itself.
#[derive(Debug, Clone)]
pub struct OwnershipProtocol {
    registry: ChannelRegistry,
    platform: Arc<dyn Platform>,
    config: Arc<VoiceConfig>,
}

impl OwnershipProtocol {
    pub fn new(
        registry: ChannelRegistry,
        platform: Arc<dyn Platform>,
        config: Arc<VoiceConfig>,
    ) -> Self {
        Self {
            registry,
            platform,
            config,
        }
    }

    fn record(&self, channel: ChannelId) -> Result<ChannelRecord> {
        self.registry
            .lookup(channel)
            .ok_or(VoiceError::NotFound("Voice channel"))
    }

    fn occupants(&self, record: &ChannelRecord) -> Result<Vec<UserId>> {
        match self.platform.occupants(record.guild_id, record.channel_id) {
            Occupancy::Present(members) => Ok(members),
            Occupancy::Gone => Err(VoiceError::NotFound("Voice channel")),
            Occupancy::Unknown => Err(VoiceError::Platform(format!(
                "guild {} is not cached",
                record.guild_id
            ))),
        }
    }

    async fn hand_over(&self, channel: ChannelId, previous: UserId, next: UserId) -> Result<()> {
        match self.platform.revoke(channel, Subject::Member(previous)).await {
            Err(e) if !e.is_not_found() => return Err(e),
            _ => {}
        }
        self.platform
            .grant(channel, Subject::Member(next), owner_grant())
            .await
    }

    /// Takes over a channel whose owner has left. The claimant must be
    /// connected to it.
    pub async fn claim(&self, channel: ChannelId, claimant: UserId) -> Result<bool> {
        if !self.config.allow_claim {
            return Ok(false);
        }

        let record = self.record(channel)?;
        let occupants = self.occupants(&record)?;
        if !occupants.contains(&claimant) {
            return Ok(false);
        }

        let previous = self
            .registry
            .update(channel, |r| {
                if occupants.contains(&r.owner_id) {
                    None
                } else {
                    Some(std::mem::replace(&mut r.owner_id, claimant))
                }
            })
            .ok_or(VoiceError::NotFound("Voice channel"))?;

        let Some(previous) = previous else {
            return Ok(false);
        };

        self.hand_over(channel, previous, claimant).await?;
        info!("{} claimed {} from {}", claimant, channel, previous);
        Ok(true)
    }

    pub async fn transfer(&self, channel: ChannelId, from: &Actor, to: UserId) -> Result<bool> {
        if !self.config.allow_transfer {
            return Ok(false);
        }

        let record = self.record(channel)?;
        if !self.registry.has_control(from, channel) {
            return Err(VoiceError::PermissionDenied);
        }
        if to == from.id || to == record.owner_id {
            return Err(VoiceError::validation("That member already owns this channel."));
        }
        if !self.platform.is_member(record.guild_id, to) {
            return Err(VoiceError::NotFound("User"));
        }

        let previous = self
            .registry
            .update(channel, |r| std::mem::replace(&mut r.owner_id, to))
            .ok_or(VoiceError::NotFound("Voice channel"))?;

        self.hand_over(channel, previous, to).await?;
        info!("{} transferred {} from {} to {}", from.id, channel, previous, to);
        Ok(true)
    }

    /// Permits or rejects a member or role. Rejected members currently in
    /// the channel are disconnected.
    pub async fn set_permission(
        &self,
        channel: ChannelId,
        subject: Subject,
        allow: bool,
    ) -> Result<()> {
        let record = self.record(channel)?;

        let grant = if allow {
            Grant::allow(Permissions::CONNECT | Permissions::SPEAK | Permissions::VIEW_CHANNEL)
        } else {
            if subject == Subject::Member(record.owner_id) {
                return Err(VoiceError::validation("You can't reject the channel owner."));
            }
            Grant::deny(Permissions::CONNECT | Permissions::SPEAK)
        };
        self.platform.grant(channel, subject, grant).await?;

        if let (false, Subject::Member(member)) = (allow, subject) {
            if self.occupants(&record)?.contains(&member) {
                self.platform
                    .disconnect_member(record.guild_id, member)
                    .await?;
            }
        }
        Ok(())
    }

    /// Applies a settings change to the `@everyone` overwrite and records it.
    async fn apply_everyone<F>(&self, channel: ChannelId, change: F) -> Result<ChannelSettings>
    where
        F: Fn(&mut ChannelSettings),
    {
        let record = self.record(channel)?;
        let mut settings = record.settings;
        change(&mut settings);

        self.platform
            .grant(
                channel,
                Subject::everyone(record.guild_id),
                everyone_grant(&settings),
            )
            .await?;
        self.registry.update(channel, |r| change(&mut r.settings));
        Ok(settings)
    }

    async fn set_locked(&self, channel: ChannelId, locked: bool) -> Result<()> {
        self.apply_everyone(channel, |s| s.locked = locked).await?;
        Ok(())
    }

    async fn set_hidden(&self, channel: ChannelId, hidden: bool) -> Result<()> {
        self.apply_everyone(channel, |s| s.hidden = hidden).await?;
        Ok(())
    }

    pub async fn lock(&self, channel: ChannelId) -> Result<()> {
        self.set_locked(channel, true).await
    }

    pub async fn unlock(&self, channel: ChannelId) -> Result<()> {
        self.set_locked(channel, false).await
    }

    pub async fn hide(&self, channel: ChannelId) -> Result<()> {
        self.set_hidden(channel, true).await
    }

    pub async fn unhide(&self, channel: ChannelId) -> Result<()> {
        self.set_hidden(channel, false).await
    }

    /// Returns whether voice activity is now allowed.
    pub async fn toggle_user_activity(&self, channel: ChannelId) -> Result<bool> {
        let value = !self.record(channel)?.settings.user_activity;
        self.apply_everyone(channel, |s| s.user_activity = value)
            .await
            .map(|s| s.user_activity)
    }

    /// Returns whether cameras and streaming are now allowed.
    pub async fn toggle_camera(&self, channel: ChannelId) -> Result<bool> {
        let value = !self.record(channel)?.settings.camera_allowed;
        self.apply_everyone(channel, |s| s.camera_allowed = value)
            .await
            .map(|s| s.camera_allowed)
    }

    pub fn toggle_activity_detection(&self, channel: ChannelId) -> Result<bool> {
        self.registry
            .update(channel, |r| {
                r.settings.activity_detection = !r.settings.activity_detection;
                r.settings.activity_detection
            })
            .ok_or(VoiceError::NotFound("Voice channel"))
    }

    /// Sets the user limit, where 0 means unlimited.
    pub async fn set_user_limit(&self, channel: ChannelId, limit: i64) -> Result<u32> {
        let max = self.config.max_user_limit;
        let limit = u32::try_from(limit)
            .ok()
            .filter(|limit| *limit <= max)
            .ok_or_else(|| {
                VoiceError::validation(format!(
                    "Invalid user limit. Please enter a number between 0-{}.",
                    max
                ))
            })?;

        self.record(channel)?;
        self.platform
            .edit_channel(
                channel,
                ChannelEdit {
                    user_limit: Some(limit),
                    ..Default::default()
                },
            )
            .await?;
        self.registry
            .update(channel, |r| r.settings.user_limit = limit);
        Ok(limit)
    }

    pub async fn rename(&self, channel: ChannelId, name: &str) -> Result<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(VoiceError::validation("Channel name can't be empty."));
        }
        if name.chars().count() > MAX_NAME_LENGTH {
            return Err(VoiceError::validation(format!(
                "Channel name must be {} characters or less.",
                MAX_NAME_LENGTH
            )));
        }

        self.record(channel)?;
        self.platform
            .edit_channel(
                channel,
                ChannelEdit {
                    name: Some(name.to_string()),
                    ..Default::default()
                },
            )
            .await?;
        self.registry.update(channel, |r| r.name = name.to_string());
        Ok(name.to_string())
    }

    /// Sets or clears the free-form status shown in channel info.
    pub fn set_status(&self, channel: ChannelId, status: Option<&str>) -> Result<Option<String>> {
        let status = status
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        if status
            .as_ref()
            .is_some_and(|s| s.chars().count() > MAX_STATUS_LENGTH)
        {
            return Err(VoiceError::validation(format!(
                "Status must be {} characters or less.",
                MAX_STATUS_LENGTH
            )));
        }

        self.registry
            .update(channel, |r| r.settings.custom_status = status.clone())
            .ok_or(VoiceError::NotFound("Voice channel"))?;
        Ok(status)
    }

    pub async fn move_to_top(&self, channel: ChannelId) -> Result<()> {
        self.record(channel)?;
        self.platform
            .edit_channel(
                channel,
                ChannelEdit {
                    position: Some(0),
                    ..Default::default()
                },
            )
            .await
    }

    /// Disconnects everyone in the channel. Returns how many were removed.
    pub async fn disconnect_all(&self, channel: ChannelId) -> Result<usize> {
        let record = self.record(channel)?;
        let mut count = 0;
        for member in self.occupants(&record)? {
            match self.platform.disconnect_member(record.guild_id, member).await {
                Ok(()) => count += 1,
                Err(e) => warn!("Failed to disconnect {} from {}: {}", member, channel, e),
            }
        }
        Ok(count)
    }

    /// Server-mutes or unmutes every occupant except the owner.
    async fn set_mute_all(&self, channel: ChannelId, muted: bool) -> Result<usize> {
        let record = self.record(channel)?;
        let mut count = 0;
        for member in self.occupants(&record)? {
            if member == record.owner_id {
                continue;
            }
            match self.platform.set_mute(record.guild_id, member, muted).await {
                Ok(()) => count += 1,
                Err(e) => warn!("Failed to set mute={} for {}: {}", muted, member, e),
            }
        }
        Ok(count)
    }

    pub async fn mute_all(&self, channel: ChannelId) -> Result<usize> {
        self.set_mute_all(channel, true).await
    }

    pub async fn unmute_all(&self, channel: ChannelId) -> Result<usize> {
        self.set_mute_all(channel, false).await
    }

    pub async fn mute_one(&self, channel: ChannelId, member: UserId) -> Result<bool> {
        self.set_mute_one(channel, member, true).await
    }

    pub async fn unmute_one(&self, channel: ChannelId, member: UserId) -> Result<bool> {
        self.set_mute_one(channel, member, false).await
    }

    /// Returns false if the member isn't in the channel.
    async fn set_mute_one(&self, channel: ChannelId, member: UserId, muted: bool) -> Result<bool> {
        let record = self.record(channel)?;
        if !self.occupants(&record)?.contains(&member) {
            return Ok(false);
        }
        self.platform
            .set_mute(record.guild_id, member, muted)
            .await?;
        Ok(true)
    }

    pub async fn create_invite(&self, channel: ChannelId) -> Result<String> {
        self.record(channel)?;
        self.platform
            .create_invite(
                channel,
                self.config.invite_max_age_secs,
                self.config.invite_max_uses,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::voice::{
        mock::{guild, MockPlatform},
        TempVoice,
    };

    struct Fixture {
        platform: Arc<MockPlatform>,
        voice: TempVoice,
        channel: ChannelId,
        owner: UserId,
    }

    fn fixture_with(config: VoiceConfig) -> Fixture {
        let platform = Arc::new(MockPlatform::new());
        let voice = TempVoice::new(platform.clone(), Arc::new(config));

        let owner = platform.add_member(100, "Owner");
        let channel = platform.add_voice_channel("Owner's Channel");
        platform.set_voice(owner, Some(channel));
        voice.registry.put(ChannelRecord::new(
            channel,
            guild(),
            owner,
            "Owner's Channel",
            ChannelSettings::default(),
        ));

        Fixture {
            platform,
            voice,
            channel,
            owner,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(VoiceConfig::default())
    }

    fn owner_of(f: &Fixture) -> UserId {
        f.voice.registry.lookup(f.channel).unwrap().owner_id
    }

    #[test]
    fn everyone_grant_follows_settings() {
        let open = everyone_grant(&ChannelSettings::default());
        assert!(open.allow.contains(Permissions::VIEW_CHANNEL | Permissions::CONNECT));
        assert!(open.deny.is_empty());

        let closed = everyone_grant(&ChannelSettings {
            locked: true,
            hidden: true,
            user_activity: false,
            camera_allowed: false,
            ..Default::default()
        });
        assert!(closed.allow.is_empty());
        assert!(closed.deny.contains(
            Permissions::VIEW_CHANNEL
                | Permissions::CONNECT
                | Permissions::USE_VAD
                | Permissions::STREAM
        ));
    }

    #[tokio::test]
    async fn claim_requires_owner_absent() {
        let f = fixture();
        let guest = f.platform.add_member(101, "Guest");
        f.platform.set_voice(guest, Some(f.channel));

        assert!(!f.voice.ownership.claim(f.channel, guest).await.unwrap());
        assert_eq!(owner_of(&f), f.owner);
    }

    #[tokio::test]
    async fn claim_requires_claimant_present() {
        let f = fixture();
        let outsider = f.platform.add_member(101, "Outsider");
        f.platform.set_voice(f.owner, None);

        assert!(!f.voice.ownership.claim(f.channel, outsider).await.unwrap());
        assert_eq!(owner_of(&f), f.owner);
    }

    #[tokio::test]
    async fn claim_moves_ownership_and_overwrites() {
        let f = fixture();
        let guest = f.platform.add_member(101, "Guest");
        f.platform
            .grant(f.channel, Subject::Member(f.owner), owner_grant())
            .await
            .unwrap();
        f.platform.set_voice(guest, Some(f.channel));
        f.platform.set_voice(f.owner, None);

        assert!(f.voice.ownership.claim(f.channel, guest).await.unwrap());
        assert_eq!(owner_of(&f), guest);
        assert_eq!(
            f.platform.overwrite(f.channel, Subject::Member(guest)),
            Some(owner_grant())
        );
        assert_eq!(f.platform.overwrite(f.channel, Subject::Member(f.owner)), None);
    }

    #[tokio::test]
    async fn returning_owner_cannot_reclaim_while_new_owner_present() {
        let f = fixture();
        let guest = f.platform.add_member(101, "Guest");
        f.platform.set_voice(guest, Some(f.channel));
        f.platform.set_voice(f.owner, None);
        assert!(f.voice.ownership.claim(f.channel, guest).await.unwrap());

        f.platform.set_voice(f.owner, Some(f.channel));
        assert!(!f.voice.ownership.claim(f.channel, f.owner).await.unwrap());
        assert_eq!(owner_of(&f), guest);
    }

    #[tokio::test]
    async fn claim_disabled_by_config() {
        let f = fixture_with(VoiceConfig {
            allow_claim: false,
            ..Default::default()
        });
        let guest = f.platform.add_member(101, "Guest");
        f.platform.set_voice(guest, Some(f.channel));
        f.platform.set_voice(f.owner, None);

        assert!(!f.voice.ownership.claim(f.channel, guest).await.unwrap());
    }

    #[tokio::test]
    async fn transfer_by_owner_and_admin() {
        let f = fixture();
        let guest = f.platform.add_member(101, "Guest");
        let third = f.platform.add_member(102, "Third");

        assert!(f
            .voice
            .ownership
            .transfer(f.channel, &Actor::member(f.owner), guest)
            .await
            .unwrap());
        assert_eq!(owner_of(&f), guest);

        // The previous owner no longer has control.
        let err = f
            .voice
            .ownership
            .transfer(f.channel, &Actor::member(f.owner), third)
            .await
            .unwrap_err();
        assert!(matches!(err, VoiceError::PermissionDenied));

        assert!(f
            .voice
            .ownership
            .transfer(f.channel, &Actor::admin(UserId::new(999)), third)
            .await
            .unwrap());
        assert_eq!(owner_of(&f), third);
        assert_eq!(f.platform.overwrite(f.channel, Subject::Member(guest)), None);
    }

    #[tokio::test]
    async fn transfer_disabled_by_config() {
        let f = fixture_with(VoiceConfig {
            allow_transfer: false,
            ..Default::default()
        });
        let guest = f.platform.add_member(101, "Guest");

        assert!(!f
            .voice
            .ownership
            .transfer(f.channel, &Actor::member(f.owner), guest)
            .await
            .unwrap());
        assert_eq!(owner_of(&f), f.owner);
        assert_eq!(f.platform.overwrite(f.channel, Subject::Member(guest)), None);
    }

    #[tokio::test]
    async fn transfer_to_non_member_keeps_owner() {
        let f = fixture();
        let err = f
            .voice
            .ownership
            .transfer(f.channel, &Actor::member(f.owner), UserId::new(424242))
            .await
            .unwrap_err();
        assert!(matches!(err, VoiceError::NotFound("User")));
        assert_eq!(owner_of(&f), f.owner);
    }

    #[tokio::test]
    async fn transfer_to_current_owner_is_rejected() {
        let f = fixture();
        let err = f
            .voice
            .ownership
            .transfer(f.channel, &Actor::member(f.owner), f.owner)
            .await
            .unwrap_err();
        assert!(matches!(err, VoiceError::Validation(_)));
    }

    #[tokio::test]
    async fn user_limit_bounds() {
        let f = fixture();
        let ownership = &f.voice.ownership;

        assert_eq!(ownership.set_user_limit(f.channel, 0).await.unwrap(), 0);
        assert_eq!(ownership.set_user_limit(f.channel, 99).await.unwrap(), 99);
        assert!(ownership.set_user_limit(f.channel, 100).await.is_err());
        assert!(ownership.set_user_limit(f.channel, -1).await.is_err());

        assert_eq!(
            f.voice.registry.lookup(f.channel).unwrap().settings.user_limit,
            99
        );
        assert_eq!(f.platform.channel(f.channel).unwrap().user_limit, Some(99));
    }

    #[tokio::test]
    async fn lock_and_hide_update_everyone_overwrite() {
        let f = fixture();
        let ownership = &f.voice.ownership;

        ownership.lock(f.channel).await.unwrap();
        ownership.hide(f.channel).await.unwrap();

        let settings = f.voice.registry.lookup(f.channel).unwrap().settings;
        assert!(settings.locked && settings.hidden);
        let grant = f
            .platform
            .overwrite(f.channel, Subject::everyone(guild()))
            .unwrap();
        assert!(grant.deny.contains(Permissions::CONNECT | Permissions::VIEW_CHANNEL));

        ownership.unlock(f.channel).await.unwrap();
        let grant = f
            .platform
            .overwrite(f.channel, Subject::everyone(guild()))
            .unwrap();
        assert!(grant.allow.contains(Permissions::CONNECT));
        assert!(grant.deny.contains(Permissions::VIEW_CHANNEL));
    }

    #[tokio::test]
    async fn toggles_flip_and_record() {
        let f = fixture();
        let ownership = &f.voice.ownership;

        assert!(!ownership.toggle_camera(f.channel).await.unwrap());
        assert!(ownership.toggle_camera(f.channel).await.unwrap());
        assert!(!ownership.toggle_user_activity(f.channel).await.unwrap());
        assert!(ownership.toggle_activity_detection(f.channel).unwrap());

        let settings = f.voice.registry.lookup(f.channel).unwrap().settings;
        assert!(settings.camera_allowed);
        assert!(!settings.user_activity);
        assert!(settings.activity_detection);
    }

    #[tokio::test]
    async fn failed_platform_call_leaves_settings_untouched() {
        let f = fixture();
        f.platform.fail_next("missing access");
        assert!(f.voice.ownership.lock(f.channel).await.is_err());
        assert!(!f.voice.registry.lookup(f.channel).unwrap().settings.locked);
    }

    #[tokio::test]
    async fn reject_disconnects_present_member() {
        let f = fixture();
        let guest = f.platform.add_member(101, "Guest");
        f.platform.set_voice(guest, Some(f.channel));

        f.voice
            .ownership
            .set_permission(f.channel, Subject::Member(guest), false)
            .await
            .unwrap();

        assert_eq!(f.platform.voice_channel_of(guest), None);
        let grant = f.platform.overwrite(f.channel, Subject::Member(guest)).unwrap();
        assert!(grant.deny.contains(Permissions::CONNECT));
    }

    #[tokio::test]
    async fn owner_cannot_be_rejected() {
        let f = fixture();
        let result = f
            .voice
            .ownership
            .set_permission(f.channel, Subject::Member(f.owner), false)
            .await;
        assert!(matches!(result, Err(VoiceError::Validation(_))));
        assert_eq!(f.platform.voice_channel_of(f.owner), Some(f.channel));
    }

    #[tokio::test]
    async fn rename_validates_length() {
        let f = fixture();
        let ownership = &f.voice.ownership;

        assert!(ownership.rename(f.channel, "   ").await.is_err());
        assert!(ownership.rename(f.channel, &"x".repeat(101)).await.is_err());
        assert_eq!(
            ownership.rename(f.channel, " Study Room ").await.unwrap(),
            "Study Room"
        );
        assert_eq!(f.platform.channel(f.channel).unwrap().name, "Study Room");
        assert_eq!(f.voice.registry.lookup(f.channel).unwrap().name, "Study Room");
    }

    #[tokio::test]
    async fn mute_all_skips_owner() {
        let f = fixture();
        let a = f.platform.add_member(101, "A");
        let b = f.platform.add_member(102, "B");
        f.platform.set_voice(a, Some(f.channel));
        f.platform.set_voice(b, Some(f.channel));

        assert_eq!(f.voice.ownership.mute_all(f.channel).await.unwrap(), 2);
        assert!(f.platform.is_muted(a) && f.platform.is_muted(b));
        assert!(!f.platform.is_muted(f.owner));

        let outsider = f.platform.add_member(103, "C");
        assert!(!f
            .voice
            .ownership
            .mute_one(f.channel, outsider)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn disconnect_all_empties_channel() {
        let f = fixture();
        let a = f.platform.add_member(101, "A");
        f.platform.set_voice(a, Some(f.channel));

        assert_eq!(f.voice.ownership.disconnect_all(f.channel).await.unwrap(), 2);
        assert_eq!(f.platform.occupants(guild(), f.channel), Occupancy::Present(Vec::new()));
    }

    #[test]
    fn status_is_trimmed_and_clearable() {
        let f = fixture();
        let ownership = &f.voice.ownership;

        assert_eq!(
            ownership.set_status(f.channel, Some(" gaming ")).unwrap(),
            Some("gaming".to_string())
        );
        assert_eq!(ownership.set_status(f.channel, None).unwrap(), None);
        assert!(ownership.set_status(f.channel, Some(&"y".repeat(101))).is_err());
    }
}
