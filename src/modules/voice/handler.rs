use super::{
    control::{Action, Response},
    panel,
    registry::Actor,
    TempVoice,
};
use crate::events::EventHandler;
use async_trait::async_trait;
use poise::serenity_prelude::{
    ActionRowComponent, ComponentInteraction, Context, CreateInteractionResponse,
    CreateInteractionResponseMessage, EditInteractionResponse, FullEvent, Interaction,
    ModalInteraction, Permissions, UserId, VoiceState,
};
use std::time::Duration;
use tracing::{debug, warn};

/// Gives the text chat of a freshly created channel time to come up.
const PANEL_DELAY: Duration = Duration::from_secs(1);

/// Routes gateway events to the temporary voice channel controllers.
#[derive(Debug, Clone)]
pub struct TempVoiceHandler {
    voice: TempVoice,
}

impl TempVoiceHandler {
    pub fn new(voice: TempVoice) -> Self {
        Self { voice }
    }

    async fn on_voice_state(
        &self,
        ctx: &Context,
        old: Option<&VoiceState>,
        new: &VoiceState,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let Some(guild) = new.guild_id else {
            return Ok(());
        };
        let member = new.user_id;
        let display_name = new
            .member
            .as_ref()
            .map(|m| m.display_name().to_string())
            .or_else(|| self.voice.platform.display_name(guild, member))
            .unwrap_or_else(|| member.to_string());

        let created = self
            .voice
            .lifecycle
            .on_presence_change(
                guild,
                member,
                &display_name,
                old.and_then(|s| s.channel_id),
                new.channel_id,
            )
            .await?;

        if let Some(record) = created {
            let ctx = ctx.clone();
            let voice = self.voice.clone();
            tokio::spawn(async move {
                tokio::time::sleep(PANEL_DELAY).await;
                if let Err(e) = panel::send(&ctx, &voice, record.channel_id).await {
                    warn!("Failed to send control panel to {}: {}", record.channel_id, e);
                }
            });
        }
        Ok(())
    }

    async fn on_component(
        &self,
        ctx: &Context,
        interaction: &ComponentInteraction,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let Some(guild) = interaction.guild_id else {
            interaction.create_response(&ctx.http, dm_only()).await?;
            return Ok(());
        };
        let actor = actor(
            interaction.user.id,
            interaction.member.as_ref().and_then(|m| m.permissions),
        );
        let custom_id = &interaction.data.custom_id;

        if acknowledge_first(custom_id) {
            // The text chat this came from may be deleted by the action.
            interaction.defer_ephemeral(&ctx.http).await?;
            let response = self.voice.control.handle(guild, actor, custom_id, Vec::new()).await;
            if let Some(content) = response.content() {
                let edit = EditInteractionResponse::new().content(content);
                if let Err(e) = interaction.edit_response(&ctx.http, edit).await {
                    debug!("Could not confirm {} to {}: {}", custom_id, actor.id, e);
                }
            }
            return Ok(());
        }

        let response = self
            .voice
            .control
            .handle(guild, actor, custom_id, Vec::new())
            .await;
        interaction
            .create_response(&ctx.http, panel::interaction_response(&response))
            .await?;
        self.refresh_if_needed(ctx, &response, &interaction.data.custom_id)
            .await;
        Ok(())
    }

    async fn on_modal(
        &self,
        ctx: &Context,
        interaction: &ModalInteraction,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let Some(guild) = interaction.guild_id else {
            interaction.create_response(&ctx.http, dm_only()).await?;
            return Ok(());
        };
        let actor = actor(
            interaction.user.id,
            interaction.member.as_ref().and_then(|m| m.permissions),
        );

        let fields = interaction
            .data
            .components
            .iter()
            .flat_map(|row| row.components.iter())
            .filter_map(|component| match component {
                ActionRowComponent::InputText(input) => Some((
                    input.custom_id.clone(),
                    input.value.clone().unwrap_or_default(),
                )),
                _ => None,
            })
            .collect();

        let response = self
            .voice
            .control
            .handle(guild, actor, &interaction.data.custom_id, fields)
            .await;
        interaction
            .create_response(&ctx.http, panel::interaction_response(&response))
            .await?;
        self.refresh_if_needed(ctx, &response, &interaction.data.custom_id)
            .await;
        Ok(())
    }

    async fn refresh_if_needed(&self, ctx: &Context, response: &Response, custom_id: &str) {
        let Response::Reply {
            refresh_panel: true,
            ..
        } = response
        else {
            return;
        };
        let Ok(action) = Action::parse(custom_id) else {
            return;
        };
        if let Err(e) = panel::refresh(ctx, &self.voice, action.channel).await {
            warn!("Failed to refresh control panel in {}: {}", action.channel, e);
        }
    }
}

/// Buttons whose action can delete the channel the panel lives in.
fn acknowledge_first(custom_id: &str) -> bool {
    Action::parse(custom_id).is_ok_and(|action| action.verb.removes_channel())
}

/// Interaction payloads carry the member's resolved permissions.
fn actor(user: UserId, permissions: Option<Permissions>) -> Actor {
    match permissions {
        Some(p) if p.administrator() => Actor::admin(user),
        _ => Actor::member(user),
    }
}

fn dm_only() -> CreateInteractionResponse {
    CreateInteractionResponse::Message(
        CreateInteractionResponseMessage::new()
            .content("❌ This only works inside a server.")
            .ephemeral(true),
    )
}

#[async_trait]
impl EventHandler for TempVoiceHandler {
    fn name(&self) -> &str {
        "TempVoice"
    }

    async fn handle(
        &self,
        ctx: &Context,
        event: &FullEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        match event {
            FullEvent::VoiceStateUpdate { old, new } => {
                self.on_voice_state(ctx, old.as_ref(), new).await?;
            }
            FullEvent::InteractionCreate { interaction } => match interaction {
                Interaction::Component(component) => self.on_component(ctx, component).await?,
                Interaction::Modal(modal) => self.on_modal(ctx, modal).await?,
                _ => {}
            },
            FullEvent::ChannelDelete { channel, .. } => {
                self.voice.lifecycle.purge(channel.id);
            }
            _ => {}
        }
        Ok(())
    }

    fn box_clone(&self) -> Box<dyn EventHandler> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::voice::control::Verb;
    use poise::serenity_prelude::ChannelId;

    #[test]
    fn delete_button_is_acknowledged_before_running() {
        let channel = ChannelId::new(42);
        assert!(acknowledge_first(&Action::button_id(Verb::Delete, channel)));
        assert!(!acknowledge_first(&Action::button_id(Verb::Lock, channel)));
        assert!(!acknowledge_first(&Action::modal_id(Verb::Rename, channel)));
        assert!(!acknowledge_first("garbage"));
    }

    #[test]
    fn administrators_become_admin_actors() {
        let user = UserId::new(7);
        assert!(actor(user, Some(Permissions::ADMINISTRATOR)).is_admin);
        assert!(!actor(user, Some(Permissions::MANAGE_CHANNELS)).is_admin);
        assert!(!actor(user, None).is_admin);
    }
}
