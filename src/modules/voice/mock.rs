//! In-memory [`Platform`] used by the voice module tests.

use crate::{
    error::{Result, VoiceError},
    platform::{ChannelEdit, Grant, NewChannel, Occupancy, Platform, Subject},
};
use async_trait::async_trait;
use poise::serenity_prelude::{ChannelId, ChannelType, GuildId, RoleId, UserId};
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
};

#[derive(Debug, Clone)]
pub struct MockChannel {
    pub guild: GuildId,
    pub name: String,
    pub kind: ChannelType,
    pub parent: Option<ChannelId>,
    pub user_limit: Option<u32>,
    pub position: Option<u16>,
    pub overwrites: HashMap<Subject, Grant>,
    pub occupants: Vec<UserId>,
}

#[derive(Debug, Default)]
struct MockState {
    channels: HashMap<ChannelId, MockChannel>,
    members: HashMap<String, UserId>,
    display_names: HashMap<UserId, String>,
    roles: HashMap<String, RoleId>,
    muted: HashSet<UserId>,
    deletes: Vec<ChannelId>,
    fail_next: Option<&'static str>,
    fail_on: HashMap<&'static str, &'static str>,
    unavailable: bool,
}

#[derive(Debug)]
pub struct MockPlatform {
    state: Mutex<MockState>,
    next_id: AtomicU64,
}

pub fn guild() -> GuildId {
    GuildId::new(1)
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPlatform {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            next_id: AtomicU64::new(1000),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn add_voice_channel(&self, name: &str) -> ChannelId {
        let id = ChannelId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.state().channels.insert(
            id,
            MockChannel {
                guild: guild(),
                name: name.to_string(),
                kind: ChannelType::Voice,
                parent: None,
                user_limit: None,
                position: None,
                overwrites: HashMap::new(),
                occupants: Vec::new(),
            },
        );
        id
    }

    pub fn add_member(&self, id: u64, name: &str) -> UserId {
        let id = UserId::new(id);
        let mut state = self.state();
        state.members.insert(name.to_lowercase(), id);
        state.display_names.insert(id, name.to_string());
        id
    }

    pub fn add_role(&self, id: u64, name: &str) -> RoleId {
        let id = RoleId::new(id);
        self.state().roles.insert(name.to_lowercase(), id);
        id
    }

    /// Moves `member` into `channel` (or out of voice with `None`), like the
    /// gateway cache after a voice state update.
    pub fn set_voice(&self, member: UserId, channel: Option<ChannelId>) {
        let mut state = self.state();
        for c in state.channels.values_mut() {
            c.occupants.retain(|m| *m != member);
        }
        if let Some(channel) = channel.and_then(|id| state.channels.get_mut(&id)) {
            channel.occupants.push(member);
        }
    }

    /// Removes a channel as if it had been deleted outside the bot.
    pub fn vanish(&self, channel: ChannelId) {
        self.state().channels.remove(&channel);
    }

    /// Makes the next mutating call fail with a platform error.
    pub fn fail_next(&self, message: &'static str) {
        self.state().fail_next = Some(message);
    }

    /// Makes the next call to the named operation fail, leaving the others
    /// alone.
    pub fn fail_on(&self, operation: &'static str, message: &'static str) {
        self.state().fail_on.insert(operation, message);
    }

    /// Drops the guild from the cache, as during an outage or reconnect.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    pub fn channel(&self, channel: ChannelId) -> Option<MockChannel> {
        self.state().channels.get(&channel).cloned()
    }

    pub fn overwrite(&self, channel: ChannelId, subject: Subject) -> Option<Grant> {
        self.channel(channel)
            .and_then(|c| c.overwrites.get(&subject).copied())
    }

    pub fn exists(&self, channel: ChannelId) -> bool {
        self.state().channels.contains_key(&channel)
    }

    pub fn delete_calls(&self, channel: ChannelId) -> usize {
        self.state().deletes.iter().filter(|c| **c == channel).count()
    }

    pub fn count_of(&self, kind: ChannelType) -> usize {
        self.state()
            .channels
            .values()
            .filter(|c| c.kind == kind)
            .count()
    }

    pub fn is_muted(&self, member: UserId) -> bool {
        self.state().muted.contains(&member)
    }

    pub fn voice_channel_of(&self, member: UserId) -> Option<ChannelId> {
        self.state()
            .channels
            .iter()
            .find(|(_, c)| c.occupants.contains(&member))
            .map(|(id, _)| *id)
    }

    fn check_failure(&self, operation: &'static str) -> Result<()> {
        let mut state = self.state();
        let failure = state
            .fail_next
            .take()
            .or_else(|| state.fail_on.remove(operation));
        match failure {
            Some(message) => Err(VoiceError::Platform(message.to_string())),
            None => Ok(()),
        }
    }

    fn with_channel<R>(
        &self,
        operation: &'static str,
        channel: ChannelId,
        f: impl FnOnce(&mut MockChannel) -> R,
    ) -> Result<R> {
        self.check_failure(operation)?;
        let mut state = self.state();
        let channel = state
            .channels
            .get_mut(&channel)
            .ok_or(VoiceError::NotFound("Platform resource"))?;
        Ok(f(channel))
    }
}

#[async_trait]
impl Platform for MockPlatform {
    fn find_channel(&self, guild: GuildId, name: &str, kind: ChannelType) -> Option<ChannelId> {
        self.state()
            .channels
            .iter()
            .find(|(_, c)| c.guild == guild && c.kind == kind && c.name == name)
            .map(|(id, _)| *id)
    }

    fn channel_name(&self, _guild: GuildId, channel: ChannelId) -> Option<String> {
        self.channel(channel).map(|c| c.name)
    }

    fn occupants(&self, _guild: GuildId, channel: ChannelId) -> Occupancy {
        let state = self.state();
        if state.unavailable {
            return Occupancy::Unknown;
        }
        match state.channels.get(&channel) {
            Some(c) => Occupancy::Present(c.occupants.clone()),
            None => Occupancy::Gone,
        }
    }

    fn is_member(&self, _guild: GuildId, member: UserId) -> bool {
        self.state().display_names.contains_key(&member)
    }

    fn find_member(&self, _guild: GuildId, name: &str) -> Option<UserId> {
        self.state().members.get(&name.to_lowercase()).copied()
    }

    fn find_role(&self, _guild: GuildId, name: &str) -> Option<RoleId> {
        self.state().roles.get(&name.to_lowercase()).copied()
    }

    fn display_name(&self, _guild: GuildId, member: UserId) -> Option<String> {
        self.state().display_names.get(&member).cloned()
    }

    fn role_name(&self, _guild: GuildId, role: RoleId) -> Option<String> {
        self.state()
            .roles
            .iter()
            .find(|(_, id)| **id == role)
            .map(|(name, _)| name.clone())
    }

    async fn create_channel(&self, guild: GuildId, channel: NewChannel) -> Result<ChannelId> {
        // Suspend like a real HTTP call so concurrent creations interleave.
        tokio::task::yield_now().await;
        self.check_failure("create_channel")?;
        let id = ChannelId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.state().channels.insert(
            id,
            MockChannel {
                guild,
                name: channel.name,
                kind: channel.kind,
                parent: channel.parent,
                user_limit: channel.user_limit,
                position: None,
                overwrites: channel.overwrites.into_iter().collect(),
                occupants: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn delete_channel(&self, channel: ChannelId, _reason: &str) -> Result<()> {
        self.check_failure("delete_channel")?;
        let mut state = self.state();
        state.deletes.push(channel);
        state
            .channels
            .remove(&channel)
            .map(|_| ())
            .ok_or(VoiceError::NotFound("Platform resource"))
    }

    async fn edit_channel(&self, channel: ChannelId, edit: ChannelEdit) -> Result<()> {
        self.with_channel("edit_channel", channel, |c| {
            if let Some(name) = edit.name {
                c.name = name;
            }
            if let Some(limit) = edit.user_limit {
                c.user_limit = Some(limit);
            }
            if let Some(position) = edit.position {
                c.position = Some(position);
            }
        })
    }

    async fn grant(&self, channel: ChannelId, subject: Subject, grant: Grant) -> Result<()> {
        self.with_channel("grant", channel, |c| {
            c.overwrites.insert(subject, grant);
        })
    }

    async fn revoke(&self, channel: ChannelId, subject: Subject) -> Result<()> {
        self.with_channel("revoke", channel, |c| {
            c.overwrites.remove(&subject);
        })
    }

    async fn move_member(&self, _guild: GuildId, member: UserId, channel: ChannelId) -> Result<()> {
        self.check_failure("move_member")?;
        if !self.exists(channel) {
            return Err(VoiceError::NotFound("Platform resource"));
        }
        self.set_voice(member, Some(channel));
        Ok(())
    }

    async fn set_mute(&self, _guild: GuildId, member: UserId, muted: bool) -> Result<()> {
        self.check_failure("set_mute")?;
        let mut state = self.state();
        if muted {
            state.muted.insert(member);
        } else {
            state.muted.remove(&member);
        }
        Ok(())
    }

    async fn disconnect_member(&self, _guild: GuildId, member: UserId) -> Result<()> {
        self.check_failure("disconnect_member")?;
        self.set_voice(member, None);
        Ok(())
    }

    async fn create_invite(&self, channel: ChannelId, _max_age: u32, _max_uses: u8) -> Result<String> {
        self.with_channel("create_invite", channel, |_| format!("https://discord.gg/mock{}", channel))
    }
}
