use super::{
    control::help_text,
    registry::{Actor, ChannelRecord, ChannelState},
};
use crate::{
    platform::{Grant, NewChannel, Subject},
    Context, Error,
};
use poise::{
    command,
    serenity_prelude::{ChannelId, ChannelType, Permissions},
    CreateReply,
};
use tracing::info;

/// The caller's current voice channel, as seen by the cache.
fn author_voice_channel(ctx: &Context<'_>) -> Option<ChannelId> {
    let guild = ctx.guild()?;
    let channel = guild
        .voice_states
        .get(&ctx.author().id)
        .and_then(|state| state.channel_id);
    channel
}

/// The temporary channel the caller is sitting in.
fn current_record(ctx: &Context<'_>) -> Option<ChannelRecord> {
    let channel = author_voice_channel(ctx)?;
    ctx.data().voice.registry.lookup(channel)
}

async fn author_actor(ctx: &Context<'_>) -> Actor {
    let is_admin = ctx
        .author_member()
        .await
        .and_then(|m| m.permissions)
        .is_some_and(|p| p.administrator());
    if is_admin {
        Actor::admin(ctx.author().id)
    } else {
        Actor::member(ctx.author().id)
    }
}

/// Create the join-to-create channel for this server
#[command(
    slash_command,
    guild_only,
    ephemeral,
    required_permissions = "ADMINISTRATOR"
)]
pub async fn setup(ctx: Context<'_>) -> Result<(), Error> {
    ctx.defer_ephemeral().await?;

    let guild = ctx.guild_id().ok_or("guild_only command used outside a guild")?;
    let voice = &ctx.data().voice;
    let name = &voice.config.trigger_channel_name;

    if let Some(existing) = voice
        .platform
        .find_channel(guild, name, ChannelType::Voice)
    {
        ctx.say(format!("✅ <#{}> already exists.", existing)).await?;
        return Ok(());
    }

    let category = voice.lifecycle.ensure_category(guild).await?;
    let trigger = voice
        .platform
        .create_channel(
            guild,
            NewChannel {
                name: name.clone(),
                kind: ChannelType::Voice,
                parent: Some(category),
                user_limit: None,
                overwrites: vec![(
                    Subject::everyone(guild),
                    Grant {
                        allow: Permissions::VIEW_CHANNEL | Permissions::CONNECT,
                        deny: Permissions::SPEAK,
                    },
                )],
            },
        )
        .await?;

    info!("Created trigger channel {} in guild {}", trigger, guild);
    ctx.say(format!(
        "✅ Created <#{}>. Members who join it get a voice channel of their own.",
        trigger
    ))
    .await?;
    Ok(())
}

/// How temporary voice channels work
#[command(slash_command, guild_only, ephemeral)]
pub async fn help(ctx: Context<'_>) -> Result<(), Error> {
    ctx.say(help_text()).await?;
    Ok(())
}

/// Temporary channel counts and settings
#[command(slash_command, guild_only, ephemeral)]
pub async fn stats(ctx: Context<'_>) -> Result<(), Error> {
    let guild = ctx.guild_id().ok_or("guild_only command used outside a guild")?;
    let voice = &ctx.data().voice;
    let config = &voice.config;

    let active = voice.registry.in_guild(guild);
    let pending = active
        .iter()
        .filter(|r| r.state() == ChannelState::PendingDelete)
        .count();

    ctx.say(format!(
        "📊 **Temporary Voice Stats**\n\
         Active channels here: {}\n\
         Pending deletion: {}\n\
         Across all servers: {}\n\
         Trigger channel: {}\n\
         Delete delay: {}ms\n\
         Claim: {} · Transfer: {}",
        active.len(),
        pending,
        voice.registry.len(),
        config.trigger_channel_name,
        config.delete_delay_ms,
        if config.allow_claim { "on" } else { "off" },
        if config.allow_transfer { "on" } else { "off" },
    ))
    .await?;
    Ok(())
}

/// Show the control panel for your temporary channel
#[command(slash_command, guild_only, ephemeral)]
pub async fn panel(ctx: Context<'_>) -> Result<(), Error> {
    let Some(record) = current_record(&ctx) else {
        ctx.say("❌ You need to be in a temporary voice channel.")
            .await?;
        return Ok(());
    };

    let voice = &ctx.data().voice;
    ctx.send(
        CreateReply::default()
            .embed(super::panel::embed(voice, &record))
            .components(super::panel::buttons(record.channel_id)),
    )
    .await?;
    Ok(())
}

/// Delete your temporary channel right away
#[command(slash_command, guild_only, ephemeral)]
pub async fn delete(ctx: Context<'_>) -> Result<(), Error> {
    let Some(record) = current_record(&ctx) else {
        ctx.say("❌ You need to be in a temporary voice channel.")
            .await?;
        return Ok(());
    };

    let voice = &ctx.data().voice;
    let actor = author_actor(&ctx).await;
    if !voice.registry.has_control(&actor, record.channel_id) {
        ctx.say("❌ Only the channel owner or an admin can delete it.")
            .await?;
        return Ok(());
    }

    // Reply first: the command may have been run from the channel's own chat.
    ctx.say(format!("🗑️ Deleting **{}**.", record.name)).await?;
    voice.lifecycle.delete_channel(record.channel_id).await?;
    Ok(())
}
