//! Requeue command - Put a dead-lettered operation back in the replay queue

use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;

use clinicsync_core::domain::newtypes::OperationId;
use clinicsync_core::ports::IOperationQueue;

use super::{open_queue, GlobalOptions};

#[derive(Debug, Args)]
pub struct RequeueCommand {
    /// Id of the dead-lettered operation
    pub id: String,
}

impl RequeueCommand {
    pub async fn execute(&self, opts: &GlobalOptions) -> Result<()> {
        let formatter = opts.formatter();
        let id: OperationId = self
            .id
            .parse()
            .with_context(|| format!("'{}' is not an operation id", self.id))?;

        let config = opts.load_config()?;
        let (pool, queue) = open_queue(&config.storage.database_path).await?;
        let requeued = queue
            .requeue_dead_letter(&id)
            .await
            .context("Failed to requeue operation")?;
        pool.close().await;

        if opts.is_json() {
            formatter.print_json(&json!({ "id": id.as_str(), "requeued": requeued }));
        } else if requeued {
            formatter.success(&format!("Operation {id} will be replayed on the next sync"));
        } else {
            formatter.error(&format!("Operation {id} is not dead-lettered"));
        }

        Ok(())
    }
}
