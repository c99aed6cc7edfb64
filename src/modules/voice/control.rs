use super::{
    lifecycle::LifecycleController,
    ownership::OwnershipProtocol,
    registry::{Actor, ChannelRecord, ChannelRegistry},
};
use crate::{
    error::{Result, VoiceError},
    platform::{Platform, Subject},
};
use poise::serenity_prelude::{ChannelId, GuildId, RoleId, UserId};
use std::{collections::HashMap, str::FromStr, sync::Arc};
use tracing::{debug, error};

pub const FIELD_CHANNEL_NAME: &str = "channel_name";
pub const FIELD_USER_LIMIT: &str = "user_limit";
pub const FIELD_STATUS: &str = "status";
pub const FIELD_NEW_OWNER: &str = "new_owner";
pub const FIELD_TARGET_USER: &str = "target_user";
pub const FIELD_ROLE_NAME: &str = "role_name";
pub const FIELD_PERMISSION_ACTION: &str = "permission_action";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Lock,
    Unlock,
    Hide,
    Unhide,
    Rename,
    Limit,
    Status,
    Claim,
    Transfer,
    Permit,
    Reject,
    PermitRole,
    Disconnect,
    Invite,
    Top,
    MuteAll,
    UnmuteAll,
    Mute,
    Unmute,
    ActivityDetection,
    UserActivity,
    Camera,
    Owner,
    Info,
    Help,
    Delete,
}

impl Verb {
    pub const ALL: [Verb; 26] = [
        Verb::Lock,
        Verb::Unlock,
        Verb::Hide,
        Verb::Unhide,
        Verb::Rename,
        Verb::Limit,
        Verb::Status,
        Verb::Claim,
        Verb::Transfer,
        Verb::Permit,
        Verb::Reject,
        Verb::PermitRole,
        Verb::Disconnect,
        Verb::Invite,
        Verb::Top,
        Verb::MuteAll,
        Verb::UnmuteAll,
        Verb::Mute,
        Verb::Unmute,
        Verb::ActivityDetection,
        Verb::UserActivity,
        Verb::Camera,
        Verb::Owner,
        Verb::Info,
        Verb::Help,
        Verb::Delete,
    ];

    /// Identifier used in component custom ids.
    pub fn key(self) -> &'static str {
        match self {
            Verb::Lock => "lock",
            Verb::Unlock => "unlock",
            Verb::Hide => "hide",
            Verb::Unhide => "unhide",
            Verb::Rename => "rename",
            Verb::Limit => "limit",
            Verb::Status => "status",
            Verb::Claim => "claim",
            Verb::Transfer => "transfer",
            Verb::Permit => "permit",
            Verb::Reject => "reject",
            Verb::PermitRole => "permitrole",
            Verb::Disconnect => "disconnect",
            Verb::Invite => "invite",
            Verb::Top => "top",
            Verb::MuteAll => "fm",
            Verb::UnmuteAll => "fum",
            Verb::Mute => "mute",
            Verb::Unmute => "unmute",
            Verb::ActivityDetection => "soonoff",
            Verb::UserActivity => "activity",
            Verb::Camera => "camonoff",
            Verb::Owner => "owner",
            Verb::Info => "vcinfo",
            Verb::Help => "help",
            Verb::Delete => "delete",
        }
    }

    /// Verbs anyone may use without controlling the channel.
    pub fn is_open(self) -> bool {
        matches!(
            self,
            Verb::Claim | Verb::Owner | Verb::Info | Verb::Help | Verb::Invite
        )
    }

    /// Form fields collected before the verb can run, as `(field id, label)`.
    pub fn inputs(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Verb::Rename => &[(FIELD_CHANNEL_NAME, "New channel name")],
            Verb::Limit => &[(FIELD_USER_LIMIT, "User limit (0-99, 0 for unlimited)")],
            Verb::Status => &[(FIELD_STATUS, "Channel status")],
            Verb::Transfer => &[(FIELD_NEW_OWNER, "New owner (name or ID)")],
            Verb::Permit | Verb::Reject | Verb::Mute | Verb::Unmute => {
                &[(FIELD_TARGET_USER, "Member (name or ID)")]
            }
            Verb::PermitRole => &[
                (FIELD_ROLE_NAME, "Role (name or ID)"),
                (FIELD_PERMISSION_ACTION, "permit or reject"),
            ],
            _ => &[],
        }
    }

    pub fn needs_input(self) -> bool {
        !self.inputs().is_empty()
    }

    /// The channel the interaction came from is gone once this verb succeeds.
    pub fn removes_channel(self) -> bool {
        self == Verb::Delete
    }
}

impl FromStr for Verb {
    type Err = VoiceError;

    fn from_str(s: &str) -> Result<Self> {
        Verb::ALL
            .into_iter()
            .find(|verb| verb.key() == s)
            .ok_or_else(|| VoiceError::validation(format!("Unknown action \"{}\".", s)))
    }
}

/// A parsed control request: `<verb>_<channel>` from a button or
/// `<verb>_modal_<channel>` from a submitted form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub verb: Verb,
    pub channel: ChannelId,
    pub submitted: bool,
    pub fields: HashMap<String, String>,
}

impl Action {
    pub fn button_id(verb: Verb, channel: ChannelId) -> String {
        format!("{}_{}", verb.key(), channel)
    }

    pub fn modal_id(verb: Verb, channel: ChannelId) -> String {
        format!("{}_modal_{}", verb.key(), channel)
    }

    pub fn parse(custom_id: &str) -> Result<Self> {
        let malformed = || VoiceError::validation("Malformed control action.");

        let parts = custom_id.split('_').collect::<Vec<_>>();
        let (verb, submitted, channel) = match parts.as_slice() {
            [verb, channel] => (*verb, false, *channel),
            [verb, "modal", channel] => (*verb, true, *channel),
            _ => return Err(malformed()),
        };

        let verb = verb.parse::<Verb>()?;
        let channel = channel
            .parse::<u64>()
            .ok()
            .filter(|id| *id != 0)
            .map(ChannelId::new)
            .ok_or_else(malformed)?;

        Ok(Self {
            verb,
            channel,
            submitted,
            fields: HashMap::new(),
        })
    }

    pub fn with_fields<I>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.fields.extend(fields);
        self
    }

    fn field(&self, key: &str) -> Result<&str> {
        self.fields
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| VoiceError::validation(format!("Missing value for {}.", key)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Reply {
        content: String,
        /// The channel's control panel shows stale state and should be redrawn.
        refresh_panel: bool,
    },
    Modal {
        verb: Verb,
        channel: ChannelId,
    },
}

impl Response {
    fn reply(content: impl Into<String>) -> Self {
        Self::Reply {
            content: content.into(),
            refresh_panel: false,
        }
    }

    fn refreshed(content: impl Into<String>) -> Self {
        Self::Reply {
            content: content.into(),
            refresh_panel: true,
        }
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            Self::Reply { content, .. } => Some(content),
            Self::Modal { .. } => None,
        }
    }
}

pub fn error_message(e: &VoiceError) -> String {
    match e {
        VoiceError::NotFound(what) => format!("❌ {} not found.", what),
        VoiceError::PermissionDenied => {
            "❌ You don't have permission to control this channel.".to_string()
        }
        VoiceError::Validation(msg) => format!("❌ {}", msg),
        VoiceError::Platform(_) => "❌ An error occurred while processing your request.".to_string(),
    }
}

pub fn help_text() -> String {
    [
        "**🎙️ Temporary Voice Channels**",
        "Join the create channel to get a voice channel of your own. It is deleted once everyone leaves.",
        "",
        "**Access:** 🔒 Lock · 🔓 Unlock · 👁️‍🗨️ Hide · 👁️ Unhide · ✅ Permit · ❌ Reject · 👥 Permit Role",
        "**Channel:** ✏️ Rename · 🔢 Limit · 📝 Status · ⬆️ Top · 🔗 Invite · 🗑️ Delete",
        "**Members:** 🔇 Mute · 🔊 Unmute · 🔕 Mute All · 🔔 Unmute All · ⛔ Disconnect All",
        "**Activity:** 🎵 Sound Detection · 🎯 Voice Activity · 📹 Camera",
        "**Ownership:** 👑 Claim · 🔄 Transfer · 🙋 Owner · ℹ️ Info",
        "",
        "Claiming only works once the owner has left the channel.",
    ]
    .join("\n")
}

fn on_off(value: bool, on: &'static str, off: &'static str) -> &'static str {
    if value {
        on
    } else {
        off
    }
}

/// Entry point for panel buttons and forms.
#[derive(Debug, Clone)]
pub struct ControlSurface {
    registry: ChannelRegistry,
    platform: Arc<dyn Platform>,
    lifecycle: LifecycleController,
    ownership: OwnershipProtocol,
}

impl ControlSurface {
    pub fn new(
        registry: ChannelRegistry,
        platform: Arc<dyn Platform>,
        lifecycle: LifecycleController,
        ownership: OwnershipProtocol,
    ) -> Self {
        Self {
            registry,
            platform,
            lifecycle,
            ownership,
        }
    }

    /// Parses and runs an action, turning every failure into a user-facing
    /// message.
    pub async fn handle(
        &self,
        guild: GuildId,
        actor: Actor,
        custom_id: &str,
        fields: Vec<(String, String)>,
    ) -> Response {
        let result = match Action::parse(custom_id) {
            Ok(action) => self.dispatch(guild, actor, action.with_fields(fields)).await,
            Err(e) => Err(e),
        };

        result.unwrap_or_else(|e| {
            match &e {
                VoiceError::Platform(_) => {
                    error!("Control action {} by {} failed: {}", custom_id, actor.id, e)
                }
                _ => debug!("Control action {} by {} refused: {}", custom_id, actor.id, e),
            }
            Response::reply(error_message(&e))
        })
    }

    pub async fn dispatch(&self, guild: GuildId, actor: Actor, action: Action) -> Result<Response> {
        let channel = action.channel;
        let record = self
            .registry
            .lookup(channel)
            .filter(|r| r.guild_id == guild)
            .ok_or(VoiceError::NotFound("Voice channel"))?;

        if !action.verb.is_open() && !self.registry.has_control(&actor, channel) {
            return Err(VoiceError::PermissionDenied);
        }

        if action.verb.needs_input() && !action.submitted {
            return Ok(Response::Modal {
                verb: action.verb,
                channel,
            });
        }

        let ownership = &self.ownership;
        let response = match action.verb {
            Verb::Lock => {
                ownership.lock(channel).await?;
                Response::refreshed("🔒 Channel locked.")
            }
            Verb::Unlock => {
                ownership.unlock(channel).await?;
                Response::refreshed("🔓 Channel unlocked.")
            }
            Verb::Hide => {
                ownership.hide(channel).await?;
                Response::refreshed("👁️‍🗨️ Channel hidden.")
            }
            Verb::Unhide => {
                ownership.unhide(channel).await?;
                Response::refreshed("👁️ Channel visible.")
            }
            Verb::Rename => {
                let name = ownership
                    .rename(channel, action.field(FIELD_CHANNEL_NAME)?)
                    .await?;
                Response::refreshed(format!("✏️ Channel renamed to \"{}\".", name))
            }
            Verb::Limit => {
                let limit = action
                    .field(FIELD_USER_LIMIT)?
                    .parse::<i64>()
                    .map_err(|_| {
                        VoiceError::validation("Invalid user limit. Please enter a number.")
                    })?;
                match ownership.set_user_limit(channel, limit).await? {
                    0 => Response::refreshed("👥 User limit removed."),
                    n => Response::refreshed(format!("👥 User limit set to {}.", n)),
                }
            }
            Verb::Status => {
                let status = action.fields.get(FIELD_STATUS).map(String::as_str);
                match ownership.set_status(channel, status)? {
                    Some(status) => {
                        Response::refreshed(format!("📝 Channel status set to: **{}**", status))
                    }
                    None => Response::refreshed("📝 Channel status cleared."),
                }
            }
            Verb::Claim => {
                if ownership.claim(channel, actor.id).await? {
                    Response::refreshed("👑 You now own this channel.")
                } else {
                    Response::reply(
                        "❌ You can only claim a channel you're in after its owner has left.",
                    )
                }
            }
            Verb::Transfer => {
                let to = self.resolve_member(guild, action.field(FIELD_NEW_OWNER)?)?;
                if ownership.transfer(channel, &actor, to).await? {
                    Response::refreshed(format!(
                        "🔄 Ownership transferred to **{}**.",
                        self.member_name(guild, to)
                    ))
                } else {
                    Response::reply("❌ Ownership can't be transferred right now.")
                }
            }
            Verb::Permit | Verb::Reject => {
                let member = self.resolve_member(guild, action.field(FIELD_TARGET_USER)?)?;
                let allow = action.verb == Verb::Permit;
                ownership
                    .set_permission(channel, Subject::Member(member), allow)
                    .await?;
                let name = self.member_name(guild, member);
                if allow {
                    Response::reply(format!("✅ **{}** can now join the channel.", name))
                } else {
                    Response::reply(format!("❌ **{}** has been removed from the channel.", name))
                }
            }
            Verb::PermitRole => {
                let role = self.resolve_role(guild, action.field(FIELD_ROLE_NAME)?)?;
                let allow = match action.field(FIELD_PERMISSION_ACTION)?.to_lowercase().as_str() {
                    "permit" => true,
                    "reject" => false,
                    _ => {
                        return Err(VoiceError::validation(
                            "Invalid action. Please use \"permit\" or \"reject\".",
                        ))
                    }
                };
                ownership
                    .set_permission(channel, Subject::Role(role), allow)
                    .await?;
                let name = self
                    .platform
                    .role_name(guild, role)
                    .unwrap_or_else(|| role.to_string());
                Response::reply(format!(
                    "👥 Role **{}** has been {} access.",
                    name,
                    on_off(allow, "granted", "denied")
                ))
            }
            Verb::Disconnect => {
                let count = ownership.disconnect_all(channel).await?;
                Response::reply(format!("⛔ Disconnected {} member(s).", count))
            }
            Verb::Invite => {
                let url = ownership.create_invite(channel).await?;
                Response::reply(format!("🔗 Invite link: {}", url))
            }
            Verb::Top => {
                ownership.move_to_top(channel).await?;
                Response::reply("⬆️ Channel moved to the top.")
            }
            Verb::MuteAll | Verb::UnmuteAll => {
                let muted = action.verb == Verb::MuteAll;
                let count = if muted {
                    ownership.mute_all(channel).await?
                } else {
                    ownership.unmute_all(channel).await?
                };
                Response::reply(format!(
                    "{} {} {} member(s).",
                    on_off(muted, "🔕", "🔔"),
                    on_off(muted, "Muted", "Unmuted"),
                    count
                ))
            }
            Verb::Mute | Verb::Unmute => {
                let member = self.resolve_member(guild, action.field(FIELD_TARGET_USER)?)?;
                let muted = action.verb == Verb::Mute;
                let name = self.member_name(guild, member);
                let done = if muted {
                    ownership.mute_one(channel, member).await?
                } else {
                    ownership.unmute_one(channel, member).await?
                };
                if done {
                    Response::reply(format!(
                        "{} **{}** has been {}.",
                        on_off(muted, "🔇", "🔊"),
                        name,
                        on_off(muted, "muted", "unmuted")
                    ))
                } else {
                    Response::reply(format!("❌ **{}** isn't in this channel.", name))
                }
            }
            Verb::ActivityDetection => {
                let enabled = ownership.toggle_activity_detection(channel)?;
                Response::refreshed(format!(
                    "🎵 Sound activity detection {}.",
                    on_off(enabled, "enabled", "disabled")
                ))
            }
            Verb::UserActivity => {
                let allowed = ownership.toggle_user_activity(channel).await?;
                Response::refreshed(format!(
                    "🎯 Voice activity {}.",
                    on_off(allowed, "allowed", "restricted to push-to-talk")
                ))
            }
            Verb::Camera => {
                let allowed = ownership.toggle_camera(channel).await?;
                Response::refreshed(format!(
                    "📹 Camera and streaming {}.",
                    on_off(allowed, "allowed", "disabled")
                ))
            }
            Verb::Owner => Response::reply(format!(
                "👑 **Channel owner:** {}",
                self.member_name(guild, record.owner_id)
            )),
            Verb::Info => Response::reply(self.describe(&record)),
            Verb::Help => Response::reply(help_text()),
            Verb::Delete => {
                self.lifecycle.delete_channel(channel).await?;
                Response::reply("🗑️ Channel deleted.")
            }
        };

        Ok(response)
    }

    /// Accepts a mention, a raw ID, or a member name. The result is always
    /// a member of `guild`.
    fn resolve_member(&self, guild: GuildId, query: &str) -> Result<UserId> {
        let query = query.trim();
        let stripped = query
            .trim_start_matches("<@")
            .trim_start_matches('!')
            .trim_end_matches('>');
        let member = match stripped.parse::<u64>().ok().filter(|id| *id != 0) {
            Some(id) => Some(UserId::new(id)),
            None => self.platform.find_member(guild, query),
        };
        member
            .filter(|id| self.platform.is_member(guild, *id))
            .ok_or(VoiceError::NotFound("User"))
    }

    fn resolve_role(&self, guild: GuildId, query: &str) -> Result<RoleId> {
        let query = query.trim();
        let stripped = query.trim_start_matches("<@&").trim_end_matches('>');
        if let Some(id) = stripped.parse::<u64>().ok().filter(|id| *id != 0) {
            return Ok(RoleId::new(id));
        }
        self.platform
            .find_role(guild, query)
            .ok_or(VoiceError::NotFound("Role"))
    }

    fn member_name(&self, guild: GuildId, member: UserId) -> String {
        self.platform
            .display_name(guild, member)
            .unwrap_or_else(|| format!("<@{}>", member))
    }

    pub fn describe(&self, record: &ChannelRecord) -> String {
        let occupants = self
            .platform
            .occupants(record.guild_id, record.channel_id)
            .members()
            .map_or(0, |o| o.len());
        let limit = match record.settings.user_limit {
            0 => "∞".to_string(),
            n => n.to_string(),
        };
        let settings = &record.settings;

        let mut lines = vec![
            format!("**ℹ️ {}**", record.name),
            format!("👑 Owner: {}", self.member_name(record.guild_id, record.owner_id)),
            format!("👥 Members: {}/{}", occupants, limit),
            format!(
                "🔒 {} · 👁️ {}",
                on_off(settings.locked, "Locked", "Unlocked"),
                on_off(settings.hidden, "Hidden", "Visible")
            ),
            format!(
                "🎯 Voice activity {} · 📹 Camera {}",
                on_off(settings.user_activity, "on", "off"),
                on_off(settings.camera_allowed, "on", "off")
            ),
            format!("🕒 Created <t:{}:R>", record.created_at.timestamp()),
        ];
        if let Some(status) = &settings.custom_status {
            lines.push(format!("📝 Status: {}", status));
        }
        if let Some(pending) = &record.pending_deletion {
            lines.push(format!("⏳ Deleting <t:{}:R>", pending.due_at.timestamp()));
        }
        lines.join("\n")
    }
}
