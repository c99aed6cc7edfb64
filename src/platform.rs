use crate::error::Result;
use async_trait::async_trait;
use poise::serenity_prelude::{
    self as serenity, Cache, ChannelId, ChannelType, CreateChannel, CreateInvite, EditChannel,
    EditMember, GuildId, Http, PermissionOverwrite, PermissionOverwriteType, Permissions, RoleId,
    UserId,
};
use std::{fmt::Debug, sync::Arc};

/// Target of a channel permission overwrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subject {
    Member(UserId),
    Role(RoleId),
}

impl Subject {
    /// The implicit `@everyone` role shares its id with the guild.
    pub fn everyone(guild: GuildId) -> Self {
        Self::Role(RoleId::new(guild.get()))
    }
}

impl From<Subject> for PermissionOverwriteType {
    fn from(subject: Subject) -> Self {
        match subject {
            Subject::Member(id) => PermissionOverwriteType::Member(id),
            Subject::Role(id) => PermissionOverwriteType::Role(id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Grant {
    pub allow: Permissions,
    pub deny: Permissions,
}

impl Grant {
    pub fn allow(allow: Permissions) -> Self {
        Self {
            allow,
            deny: Permissions::empty(),
        }
    }

    pub fn deny(deny: Permissions) -> Self {
        Self {
            allow: Permissions::empty(),
            deny,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewChannel {
    pub name: String,
    pub kind: ChannelType,
    pub parent: Option<ChannelId>,
    pub user_limit: Option<u32>,
    pub overwrites: Vec<(Subject, Grant)>,
}

/// What the cache knows about who is connected to a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Occupancy {
    /// The guild isn't cached (outage or reconnect), so the channel may
    /// still exist.
    Unknown,
    /// The guild is cached and the channel is not part of it.
    Gone,
    Present(Vec<UserId>),
}

impl Occupancy {
    pub fn members(self) -> Option<Vec<UserId>> {
        match self {
            Self::Present(members) => Some(members),
            Self::Unknown | Self::Gone => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChannelEdit {
    pub name: Option<String>,
    pub user_limit: Option<u32>,
    pub position: Option<u16>,
}

/// Everything the bot needs from Discord. Lookups are answered from the
/// gateway cache and never suspend; mutations go over HTTP.
#[async_trait]
pub trait Platform: Send + Sync + Debug {
    fn find_channel(&self, guild: GuildId, name: &str, kind: ChannelType) -> Option<ChannelId>;
    fn channel_name(&self, guild: GuildId, channel: ChannelId) -> Option<String>;
    fn occupants(&self, guild: GuildId, channel: ChannelId) -> Occupancy;
    fn is_member(&self, guild: GuildId, member: UserId) -> bool;
    fn find_member(&self, guild: GuildId, name: &str) -> Option<UserId>;
    fn find_role(&self, guild: GuildId, name: &str) -> Option<RoleId>;
    fn display_name(&self, guild: GuildId, member: UserId) -> Option<String>;
    fn role_name(&self, guild: GuildId, role: RoleId) -> Option<String>;

    async fn create_channel(&self, guild: GuildId, channel: NewChannel) -> Result<ChannelId>;
    async fn delete_channel(&self, channel: ChannelId, reason: &str) -> Result<()>;
    async fn edit_channel(&self, channel: ChannelId, edit: ChannelEdit) -> Result<()>;
    async fn grant(&self, channel: ChannelId, subject: Subject, grant: Grant) -> Result<()>;
    async fn revoke(&self, channel: ChannelId, subject: Subject) -> Result<()>;
    async fn move_member(&self, guild: GuildId, member: UserId, channel: ChannelId) -> Result<()>;
    async fn set_mute(&self, guild: GuildId, member: UserId, muted: bool) -> Result<()>;
    async fn disconnect_member(&self, guild: GuildId, member: UserId) -> Result<()>;
    async fn create_invite(&self, channel: ChannelId, max_age: u32, max_uses: u8) -> Result<String>;
}

#[derive(Clone)]
pub struct SerenityPlatform {
    http: Arc<Http>,
    cache: Arc<Cache>,
}

impl Debug for SerenityPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerenityPlatform").finish_non_exhaustive()
    }
}

impl SerenityPlatform {
    pub fn new(ctx: &serenity::Context) -> Self {
        Self {
            http: ctx.http.clone(),
            cache: ctx.cache.clone(),
        }
    }
}

fn overwrite(subject: Subject, grant: Grant) -> PermissionOverwrite {
    PermissionOverwrite {
        allow: grant.allow,
        deny: grant.deny,
        kind: subject.into(),
    }
}

#[async_trait]
impl Platform for SerenityPlatform {
    fn find_channel(&self, guild: GuildId, name: &str, kind: ChannelType) -> Option<ChannelId> {
        let guild = self.cache.guild(guild)?;
        guild
            .channels
            .values()
            .find(|c| c.kind == kind && c.name == name)
            .map(|c| c.id)
    }

    fn channel_name(&self, guild: GuildId, channel: ChannelId) -> Option<String> {
        let guild = self.cache.guild(guild)?;
        guild.channels.get(&channel).map(|c| c.name.clone())
    }

    fn occupants(&self, guild: GuildId, channel: ChannelId) -> Occupancy {
        let Some(guild) = self.cache.guild(guild) else {
            return Occupancy::Unknown;
        };
        if !guild.channels.contains_key(&channel) {
            return Occupancy::Gone;
        }
        Occupancy::Present(
            guild
                .voice_states
                .values()
                .filter(|state| state.channel_id == Some(channel))
                .map(|state| state.user_id)
                .collect(),
        )
    }

    fn is_member(&self, guild: GuildId, member: UserId) -> bool {
        self.cache
            .guild(guild)
            .is_some_and(|guild| guild.members.contains_key(&member))
    }

    fn find_member(&self, guild: GuildId, name: &str) -> Option<UserId> {
        let guild = self.cache.guild(guild)?;
        guild
            .members
            .values()
            .find(|m| {
                m.user.name.eq_ignore_ascii_case(name)
                    || m.display_name().eq_ignore_ascii_case(name)
            })
            .map(|m| m.user.id)
    }

    fn find_role(&self, guild: GuildId, name: &str) -> Option<RoleId> {
        let guild = self.cache.guild(guild)?;
        guild
            .roles
            .values()
            .find(|r| r.name.eq_ignore_ascii_case(name))
            .map(|r| r.id)
    }

    fn display_name(&self, guild: GuildId, member: UserId) -> Option<String> {
        let guild = self.cache.guild(guild)?;
        guild
            .members
            .get(&member)
            .map(|m| m.display_name().to_string())
    }

    fn role_name(&self, guild: GuildId, role: RoleId) -> Option<String> {
        let guild = self.cache.guild(guild)?;
        guild.roles.get(&role).map(|r| r.name.clone())
    }

    async fn create_channel(&self, guild: GuildId, channel: NewChannel) -> Result<ChannelId> {
        let overwrites = channel
            .overwrites
            .into_iter()
            .map(|(subject, grant)| overwrite(subject, grant))
            .collect::<Vec<_>>();

        let mut builder = CreateChannel::new(channel.name)
            .kind(channel.kind)
            .permissions(overwrites);
        if let Some(parent) = channel.parent {
            builder = builder.category(parent);
        }
        if let Some(limit) = channel.user_limit {
            builder = builder.user_limit(limit);
        }

        let created = guild.create_channel(&self.http, builder).await?;
        Ok(created.id)
    }

    async fn delete_channel(&self, channel: ChannelId, reason: &str) -> Result<()> {
        self.http.delete_channel(channel, Some(reason)).await?;
        Ok(())
    }

    async fn edit_channel(&self, channel: ChannelId, edit: ChannelEdit) -> Result<()> {
        let mut builder = EditChannel::new();
        if let Some(name) = edit.name {
            builder = builder.name(name);
        }
        if let Some(limit) = edit.user_limit {
            builder = builder.user_limit(limit);
        }
        if let Some(position) = edit.position {
            builder = builder.position(position);
        }
        channel.edit(&self.http, builder).await?;
        Ok(())
    }

    async fn grant(&self, channel: ChannelId, subject: Subject, grant: Grant) -> Result<()> {
        channel
            .create_permission(&self.http, overwrite(subject, grant))
            .await?;
        Ok(())
    }

    async fn revoke(&self, channel: ChannelId, subject: Subject) -> Result<()> {
        channel.delete_permission(&self.http, subject.into()).await?;
        Ok(())
    }

    async fn move_member(&self, guild: GuildId, member: UserId, channel: ChannelId) -> Result<()> {
        guild.move_member(&self.http, member, channel).await?;
        Ok(())
    }

    async fn set_mute(&self, guild: GuildId, member: UserId, muted: bool) -> Result<()> {
        guild
            .edit_member(&self.http, member, EditMember::new().mute(muted))
            .await?;
        Ok(())
    }

    async fn disconnect_member(&self, guild: GuildId, member: UserId) -> Result<()> {
        guild.disconnect_member(&self.http, member).await?;
        Ok(())
    }

    async fn create_invite(&self, channel: ChannelId, max_age: u32, max_uses: u8) -> Result<String> {
        let invite = channel
            .create_invite(
                &self.http,
                CreateInvite::new()
                    .max_age(max_age)
                    .max_uses(max_uses)
                    .unique(true),
            )
            .await?;
        Ok(invite.url())
    }
}
