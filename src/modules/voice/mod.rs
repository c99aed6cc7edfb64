pub mod commands;
pub mod control;
pub mod handler;
pub mod lifecycle;
pub mod ownership;
pub mod panel;
pub mod registry;
pub mod task;

#[cfg(test)]
mod mock;

use crate::{config::VoiceConfig, platform::Platform};
use commands::*;
use control::ControlSurface;
use lifecycle::LifecycleController;
use ownership::OwnershipProtocol;
use poise::command;
use registry::ChannelRegistry;
use std::sync::Arc;

/// Shared handles to the temporary voice channel machinery. Cloning is cheap
/// and every clone sees the same registry.
#[derive(Debug, Clone)]
pub struct TempVoice {
    pub config: Arc<VoiceConfig>,
    pub platform: Arc<dyn Platform>,
    pub registry: ChannelRegistry,
    pub lifecycle: LifecycleController,
    pub ownership: OwnershipProtocol,
    pub control: ControlSurface,
}

impl TempVoice {
    pub fn new(platform: Arc<dyn Platform>, config: Arc<VoiceConfig>) -> Self {
        let registry = ChannelRegistry::new();
        let lifecycle = LifecycleController::new(registry.clone(), platform.clone(), config.clone());
        let ownership = OwnershipProtocol::new(registry.clone(), platform.clone(), config.clone());
        let control = ControlSurface::new(
            registry.clone(),
            platform.clone(),
            lifecycle.clone(),
            ownership.clone(),
        );

        Self {
            config,
            platform,
            registry,
            lifecycle,
            ownership,
            control,
        }
    }
}

/// 🎙️ Temporary voice channels
#[command(
    slash_command,
    guild_only,
    subcommands("setup", "help", "stats", "panel", "delete")
)]
pub async fn voice(_ctx: crate::Context<'_>) -> Result<(), crate::Error> {
    Ok(())
}
