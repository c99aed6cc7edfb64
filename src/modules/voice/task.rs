use super::lifecycle::LifecycleController;
use crate::tasks::Task;
use async_trait::async_trait;
use poise::serenity_prelude::Context;
use std::time::Duration;
use tracing::{debug, info};

/// Periodically reconciles the registry with what the gateway cache sees,
/// catching channels whose delete event or leave event was missed.
#[derive(Debug, Clone)]
pub struct SweepTask {
    lifecycle: LifecycleController,
    interval: Duration,
}

impl SweepTask {
    pub fn new(lifecycle: LifecycleController, interval: Duration) -> Self {
        Self {
            lifecycle,
            interval,
        }
    }
}

#[async_trait]
impl Task for SweepTask {
    fn name(&self) -> &str {
        "TempVoiceSweep"
    }

    fn schedule(&self) -> Option<Duration> {
        Some(self.interval)
    }

    async fn execute(
        &mut self,
        _ctx: &Context,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        match self.lifecycle.sweep() {
            (0, 0) => debug!("Sweep found nothing to do"),
            (purged, scheduled) => info!(
                "Sweep purged {} vanished channel(s) and scheduled {} deletion(s)",
                purged, scheduled
            ),
        }
        Ok(())
    }

    fn box_clone(&self) -> Box<dyn Task> {
        Box::new(self.clone())
    }
}
