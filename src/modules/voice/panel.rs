use super::{
    control::{Action, Response, Verb},
    registry::ChannelRecord,
    TempVoice,
};
use crate::Error;
use poise::serenity_prelude::{
    ButtonStyle, ChannelId, Context, CreateActionRow, CreateButton, CreateEmbed,
    CreateEmbedFooter, CreateInputText, CreateInteractionResponse,
    CreateInteractionResponseMessage, CreateMessage, CreateModal, EditMessage, GetMessages,
    InputTextStyle, ReactionType, Timestamp,
};
use tracing::debug;

pub const PANEL_TITLE: &str = "🎮 Voice Channel Controls";
const PANEL_COLOUR: u32 = 0x5865F2;

/// Button grid; Discord allows at most five rows of five.
const LAYOUT: [[Verb; 5]; 5] = [
    [Verb::Lock, Verb::Unlock, Verb::Hide, Verb::Unhide, Verb::Rename],
    [Verb::Limit, Verb::Status, Verb::Claim, Verb::Transfer, Verb::Permit],
    [Verb::Reject, Verb::PermitRole, Verb::Disconnect, Verb::Invite, Verb::Top],
    [Verb::MuteAll, Verb::UnmuteAll, Verb::Mute, Verb::Unmute, Verb::ActivityDetection],
    [Verb::UserActivity, Verb::Camera, Verb::Owner, Verb::Info, Verb::Delete],
];

fn face(verb: Verb) -> (&'static str, &'static str) {
    match verb {
        Verb::Lock => ("🔒", "Lock"),
        Verb::Unlock => ("🔓", "Unlock"),
        Verb::Hide => ("👁️‍🗨️", "Hide"),
        Verb::Unhide => ("👁️", "Unhide"),
        Verb::Rename => ("✏️", "Rename"),
        Verb::Limit => ("🔢", "Limit"),
        Verb::Status => ("📝", "Status"),
        Verb::Claim => ("👑", "Claim"),
        Verb::Transfer => ("🔄", "Transfer"),
        Verb::Permit => ("✅", "Permit"),
        Verb::Reject => ("❌", "Reject"),
        Verb::PermitRole => ("👥", "Permit Role"),
        Verb::Disconnect => ("⛔", "Disconnect All"),
        Verb::Invite => ("🔗", "Invite"),
        Verb::Top => ("⬆️", "Top"),
        Verb::MuteAll => ("🔕", "Mute All"),
        Verb::UnmuteAll => ("🔔", "Unmute All"),
        Verb::Mute => ("🔇", "Mute"),
        Verb::Unmute => ("🔊", "Unmute"),
        Verb::ActivityDetection => ("🎵", "Sound Detection"),
        Verb::UserActivity => ("🎯", "Voice Activity"),
        Verb::Camera => ("📹", "Camera"),
        Verb::Owner => ("🙋", "Owner"),
        Verb::Info => ("ℹ️", "Info"),
        Verb::Help => ("❓", "Help"),
        Verb::Delete => ("🗑️", "Delete"),
    }
}

fn style(verb: Verb) -> ButtonStyle {
    match verb {
        Verb::Delete | Verb::Disconnect | Verb::Reject => ButtonStyle::Danger,
        Verb::Claim | Verb::Permit => ButtonStyle::Success,
        Verb::Lock | Verb::Hide | Verb::Rename | Verb::Limit => ButtonStyle::Primary,
        _ => ButtonStyle::Secondary,
    }
}

pub fn buttons(channel: ChannelId) -> Vec<CreateActionRow> {
    LAYOUT
        .iter()
        .map(|row| {
            CreateActionRow::Buttons(
                row.iter()
                    .map(|verb| {
                        let (emoji, label) = face(*verb);
                        CreateButton::new(Action::button_id(*verb, channel))
                            .label(label)
                            .emoji(ReactionType::Unicode(emoji.to_string()))
                            .style(style(*verb))
                    })
                    .collect(),
            )
        })
        .collect()
}

pub fn embed(voice: &TempVoice, record: &ChannelRecord) -> CreateEmbed {
    let owner = format!("<@{}>", record.owner_id);
    let limit = match record.settings.user_limit {
        0 => "Unlimited".to_string(),
        n => n.to_string(),
    };
    let access = match (record.settings.locked, record.settings.hidden) {
        (false, false) => "🔓 Open",
        (true, false) => "🔒 Locked",
        (false, true) => "👁️‍🗨️ Hidden",
        (true, true) => "🔒 Locked & hidden",
    };

    let mut embed = CreateEmbed::new()
        .title(PANEL_TITLE)
        .description(format!(
            "Manage **{}** with the buttons below. Only the owner and server admins can change settings.",
            record.name
        ))
        .colour(PANEL_COLOUR)
        .field("👑 Owner", owner, true)
        .field("👥 Limit", limit, true)
        .field("🔐 Access", access, true)
        .footer(CreateEmbedFooter::new(format!(
            "Empty channels are deleted after {:.1}s",
            voice.config.delete_delay().as_secs_f32()
        )))
        .timestamp(Timestamp::now());

    if let Some(status) = &record.settings.custom_status {
        embed = embed.field("📝 Status", status, false);
    }
    embed
}

pub fn modal(verb: Verb, channel: ChannelId) -> CreateModal {
    let (_, label) = face(verb);
    let rows = verb
        .inputs()
        .iter()
        .map(|(id, prompt)| {
            CreateActionRow::InputText(
                CreateInputText::new(InputTextStyle::Short, *prompt, *id)
                    .required(true)
                    .max_length(100),
            )
        })
        .collect();

    CreateModal::new(Action::modal_id(verb, channel), label).components(rows)
}

/// Converts a control response into an interaction reply. Replies are
/// ephemeral so the panel stays uncluttered.
pub fn interaction_response(response: &Response) -> CreateInteractionResponse {
    match response {
        Response::Reply { content, .. } => CreateInteractionResponse::Message(
            CreateInteractionResponseMessage::new()
                .content(content)
                .ephemeral(true),
        ),
        Response::Modal { verb, channel } => {
            CreateInteractionResponse::Modal(modal(*verb, *channel))
        }
    }
}

/// Posts the control panel into the channel's text chat.
pub async fn send(ctx: &Context, voice: &TempVoice, channel: ChannelId) -> Result<(), Error> {
    let Some(record) = voice.registry.lookup(channel) else {
        debug!("Channel {} is gone, skipping panel", channel);
        return Ok(());
    };

    channel
        .send_message(
            &ctx.http,
            CreateMessage::new()
                .content(format!("<@{}>", record.owner_id))
                .embed(embed(voice, &record))
                .components(buttons(channel)),
        )
        .await?;
    Ok(())
}

/// Redraws the most recent panel in the channel, if one is found.
pub async fn refresh(ctx: &Context, voice: &TempVoice, channel: ChannelId) -> Result<(), Error> {
    let Some(record) = voice.registry.lookup(channel) else {
        return Ok(());
    };
    let me = ctx.cache.current_user().id;

    let messages = channel
        .messages(&ctx.http, GetMessages::new().limit(10))
        .await?;
    let panel = messages.into_iter().find(|m| {
        m.author.id == me
            && m
                .embeds
                .first()
                .and_then(|e| e.title.as_deref())
                .is_some_and(|title| title == PANEL_TITLE)
    });

    if let Some(mut message) = panel {
        message
            .edit(
                &ctx.http,
                EditMessage::new()
                    .embed(embed(voice, &record))
                    .components(buttons(channel)),
            )
            .await?;
    }
    Ok(())
}
