use config::VoiceConfig;
use modules::voice::{task::SweepTask, voice, TempVoice};
use platform::SerenityPlatform;
use poise::serenity_prelude::{self as serenity, CreateAllowedMentions};
use std::sync::Arc;
use tasks::TaskManager;
use tracing::{error, info, trace};
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod events;
mod modules;
mod platform;
mod tasks;
mod utils;

use crate::events::EventManager;

#[derive(Clone, Debug)]
pub struct Data {
    pub voice: TempVoice,
    pub task_manager: Arc<TaskManager>,
    pub event_manager: Arc<EventManager>,
}

impl Data {
    pub async fn init_tasks(&self, ctx: &serenity::Context) {
        let sweep = SweepTask::new(
            self.voice.lifecycle.clone(),
            self.voice.config.sweep_interval(),
        );
        self.task_manager.add_task(sweep).await;

        self.task_manager.start_tasks(ctx.clone()).await;
    }
}

type Error = Box<dyn std::error::Error + Send + Sync>;
type Context<'a> = poise::Context<'a, Data, Error>;

#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
async fn register(ctx: Context<'_>) -> Result<(), Error> {
    poise::builtins::register_application_commands_buttons(ctx).await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    info!("starting tempvoice");

    let token = std::env::var("DISCORD_TOKEN").expect("missing DISCORD_TOKEN");
    let config = match VoiceConfig::from_env() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!(
        "Trigger channel {:?}, delete delay {}ms",
        config.trigger_channel_name, config.delete_delay_ms
    );

    let intents = serenity::GatewayIntents::non_privileged();

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions::<Data, Error> {
            allowed_mentions: Some(CreateAllowedMentions::new().empty_roles().empty_users()),
            commands: vec![register(), voice()],
            pre_command: |ctx| {
                Box::pin(async move {
                    trace!(
                        "Command {} used by {} in {}",
                        ctx.command().qualified_name,
                        ctx.author().tag(),
                        ctx.guild_id()
                            .map_or_else(|| "DM".to_string(), |id| id.to_string())
                    );
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    info!(
                        "Command {} completed for {} in {}",
                        ctx.command().qualified_name,
                        ctx.author().tag(),
                        ctx.guild_id()
                            .map_or_else(|| "DM".to_string(), |id| id.to_string())
                    );
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    match error {
                        poise::FrameworkError::Command { error, ctx, .. } => {
                            error!(
                                "Command {} failed for {} in {}: {:?}",
                                ctx.command().qualified_name,
                                ctx.author().tag(),
                                ctx.guild_id()
                                    .map_or_else(|| "DM".to_string(), |id| id.to_string()),
                                error
                            );
                            ctx.say("❌ Something went wrong running that command.")
                                .await
                                .ok();
                        }
                        err => {
                            if let Err(e) = poise::builtins::on_error(err).await {
                                error!("Error while handling framework error: {}", e);
                            }
                        }
                    }
                })
            },
            event_handler: |ctx, event, _framework, data| {
                Box::pin(async move {
                    data.event_manager.handle_event(ctx, event).await;
                    Ok(())
                })
            },
            ..Default::default()
        })
        .setup(move |ctx, _ready, framework| {
            Box::pin(async move {
                info!("registering commands");
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                let platform = Arc::new(SerenityPlatform::new(ctx));
                let voice = TempVoice::new(platform, config);

                let task_manager = Arc::new(TaskManager::new());
                let event_manager = Arc::new(EventManager::new());
                event_manager.init(&voice).await;

                let data = Data {
                    voice,
                    task_manager,
                    event_manager,
                };
                data.init_tasks(ctx).await;

                let shutdown = data.task_manager.clone();
                let shard_manager = framework.shard_manager().clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("Shutting down");
                        shutdown.shutdown().await;
                        shard_manager.shutdown_all().await;
                    }
                });

                Ok(data)
            })
        })
        .build();

    let client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .await;

    match client {
        Ok(mut client) => {
            if let Err(e) = client.start().await {
                error!("Client error: {}", e);
            }
        }
        Err(e) => error!("Failed to create client: {}", e),
    }
}
