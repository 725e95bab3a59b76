//! Stand-in [`InstanceLifecycle`] for environments with no real instance
//! orchestrator (container scheduler, VM fleet) wired up yet. Logs the
//! request and returns a synthetic instance id so the scaling coordinator's
//! decision loop has something to drive end to end.

use async_trait::async_trait;
use mr_scaling_coordinator::InstanceLifecycle;
use tracing::{info, warn};
use uuid::Uuid;

pub struct LoggingInstanceLifecycle;

#[async_trait]
impl InstanceLifecycle for LoggingInstanceLifecycle {
    async fn spawn(&self) -> anyhow::Result<String> {
        let instance_id = format!("router-{}", Uuid::new_v4());
        info!(instance_id = %instance_id, "scaling coordinator requested a new router instance");
        Ok(instance_id)
    }

    async fn destroy(&self, instance_id: &str) -> anyhow::Result<()> {
        warn!(instance_id, "scaling coordinator requested instance teardown");
        Ok(())
    }
}
