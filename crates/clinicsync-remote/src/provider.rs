//! RestRemoteStore - IRemoteStore implementation for PostgREST
//!
//! Wraps the [`RestClient`] to fulfil the [`IRemoteStore`] port contract.
//!
//! ## Design Notes
//!
//! - Mutations send `Prefer: return=representation`, so the server echoes
//!   the stored rows; the first row is returned to the caller.
//! - Update and delete address a single row with an `id=eq.<id>` filter.
//!   An update or delete that matched no row is not an error: the record
//!   is already in the requested state from the caller's point of view, and
//!   `Value::Null` is returned.
//! - The probe reads at most one `id` from the configured table.

use reqwest::Method;
use tracing::{debug, instrument};

use clinicsync_core::config::RemoteConfig;
use clinicsync_core::domain::newtypes::{RecordId, TargetName};
use clinicsync_core::ports::{IRemoteStore, ReadFilter, RemoteError};

use crate::client::RestClient;

const PREFER_REPRESENTATION: &str = "return=representation";

/// PostgREST-backed remote store
#[derive(Debug, Clone)]
pub struct RestRemoteStore {
    client: RestClient,
    probe_table: TargetName,
}

impl RestRemoteStore {
    pub fn new(client: RestClient, probe_table: TargetName) -> Self {
        Self {
            client,
            probe_table,
        }
    }

    /// Builds the store from the `remote` configuration section
    pub fn from_config(config: &RemoteConfig) -> anyhow::Result<Self> {
        let client = RestClient::new(&config.url, &config.api_key, config.request_timeout())?;
        let probe_table = TargetName::new(config.probe_table.clone())?;
        Ok(Self::new(client, probe_table))
    }

    pub fn client(&self) -> &RestClient {
        &self.client
    }
}

/// Returns the first row of a representation response
fn first_row(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Array(mut rows) => {
            if rows.is_empty() {
                serde_json::Value::Null
            } else {
                rows.swap_remove(0)
            }
        }
        other => other,
    }
}

/// Translates a filter into PostgREST query parameters
fn filter_params(filter: &ReadFilter) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), "*".to_string())];
    for (column, value) in &filter.eq {
        params.push((column.clone(), format!("eq.{value}")));
    }
    if let Some(order) = &filter.order_by {
        params.push(("order".to_string(), format!("{order}.asc")));
    }
    if let Some(limit) = filter.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    params
}

fn id_filter(id: &RecordId) -> [(&'static str, String); 1] {
    [("id", format!("eq.{}", id.as_str()))]
}

#[async_trait::async_trait]
impl IRemoteStore for RestRemoteStore {
    #[instrument(skip(self, payload), fields(table = %target))]
    async fn create(
        &self,
        target: &TargetName,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, RemoteError> {
        let request = self
            .client
            .request(Method::POST, target.as_str())
            .header("Prefer", PREFER_REPRESENTATION)
            .json(payload);

        let row = first_row(self.client.send_json(request).await?);
        debug!("Inserted row");
        Ok(row)
    }

    #[instrument(skip(self, payload), fields(table = %target, id = %id))]
    async fn update(
        &self,
        target: &TargetName,
        id: &RecordId,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, RemoteError> {
        let request = self
            .client
            .request(Method::PATCH, target.as_str())
            .query(&id_filter(id))
            .header("Prefer", PREFER_REPRESENTATION)
            .json(payload);

        let row = first_row(self.client.send_json(request).await?);
        debug!(matched = !row.is_null(), "Updated row");
        Ok(row)
    }

    #[instrument(skip(self), fields(table = %target, id = %id))]
    async fn delete(
        &self,
        target: &TargetName,
        id: &RecordId,
    ) -> Result<serde_json::Value, RemoteError> {
        let request = self
            .client
            .request(Method::DELETE, target.as_str())
            .query(&id_filter(id))
            .header("Prefer", PREFER_REPRESENTATION);

        let row = first_row(self.client.send_json(request).await?);
        debug!(matched = !row.is_null(), "Deleted row");
        Ok(row)
    }

    #[instrument(skip(self, filter), fields(table = %target))]
    async fn read(
        &self,
        target: &TargetName,
        filter: &ReadFilter,
    ) -> Result<Vec<serde_json::Value>, RemoteError> {
        let request = self
            .client
            .request(Method::GET, target.as_str())
            .query(&filter_params(filter));

        match self.client.send_json(request).await? {
            serde_json::Value::Array(rows) => {
                debug!(rows = rows.len(), "Read rows");
                Ok(rows)
            }
            serde_json::Value::Null => Ok(Vec::new()),
            other => Ok(vec![other]),
        }
    }

    async fn probe(&self) -> Result<(), RemoteError> {
        let request = self
            .client
            .request(Method::GET, self.probe_table.as_str())
            .query(&[("select", "id"), ("limit", "1")]);

        self.client.send_json(request).await.map(|_| ())
    }
}
