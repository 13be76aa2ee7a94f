//! Enqueue command - Queue a mutation without contacting the remote store
//!
//! Operators use this to re-enter writes by hand; the operation is replayed
//! by the next drain pass like any write captured while offline.

use anyhow::{Context, Result};
use clap::Args;
use serde_json::{json, Value};

use clinicsync_core::domain::{newtypes::TargetName, OperationKind};
use clinicsync_core::ports::IOperationQueue;

use super::{open_queue, GlobalOptions};

#[derive(Debug, Args)]
pub struct EnqueueCommand {
    /// insert, update or delete
    pub kind: String,

    /// Remote table, e.g. `patients`
    pub target: String,

    /// JSON object payload; update and delete need an `id`
    pub payload: String,
}

impl EnqueueCommand {
    pub async fn execute(&self, opts: &GlobalOptions) -> Result<()> {
        let formatter = opts.formatter();
        let (kind, target, payload) = self.parse()?;

        let config = opts.load_config()?;
        let (pool, queue) = open_queue(&config.storage.database_path).await?;
        let id = queue
            .enqueue(kind, &target, payload)
            .await
            .context("Failed to queue operation")?;
        pool.close().await;

        if opts.is_json() {
            formatter.print_json(&json!({ "id": id.as_str(), "kind": kind.as_str(), "target": target.as_str() }));
        } else {
            formatter.success(&format!("Queued {kind} on {target} as {id}"));
        }

        Ok(())
    }

    fn parse(&self) -> Result<(OperationKind, TargetName, Value)> {
        let kind: OperationKind = self.kind.parse()?;
        let target = TargetName::new(self.target.clone())?;
        let payload: Value =
            serde_json::from_str(&self.payload).context("Payload is not valid JSON")?;
        clinicsync_core::domain::operation::validate_payload(kind, &target, &payload)?;
        Ok((kind, target, payload))
    }
}
