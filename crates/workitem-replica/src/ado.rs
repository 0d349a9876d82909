//! Azure DevOps REST client.
//!
//! Implements [`RemoteSource`] and [`IconFetcher`] over the work item
//! tracking API (`api-version=6.0`):
//!
//! | Operation | Endpoint |
//! |-----------|----------|
//! | active / deleted ids | `POST {org}/{project}/_apis/wit/wiql` |
//! | batch fetch | `POST {org}/{project}/_apis/wit/workitemsbatch` |
//! | item types | `GET {org}/{project}/_apis/wit/workitemtypes` |
//!
//! Authentication is HTTP Basic with `email:pat`. A 401 maps to
//! [`RemoteError::Unauthorized`]; any other non-success status maps to
//! [`RemoteError::Http`]. Icons are fetched without credentials.

use anyhow::Result;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use workitem_replica_core::models::{ItemId, ItemTypeDefinition, RemoteItem};
use workitem_replica_core::remote::{IconFetcher, RemoteError, RemoteSource};

use crate::config::RemoteConfig;

const API_VERSION: &str = "6.0";

pub struct AdoClient {
    client: reqwest::Client,
    base: String,
    area_path: String,
    authorization: String,
}

#[derive(Deserialize)]
struct WiqlResponse {
    #[serde(rename = "workItems", default)]
    work_items: Vec<WiqlRef>,
}

#[derive(Deserialize)]
struct WiqlRef {
    id: ItemId,
}

#[derive(Deserialize)]
struct Collection<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

/// WIQL selecting the area's items, newest-changed first.
pub fn root_query(area_path: &str, deleted: bool) -> String {
    format!(
        "SELECT [System.Id] FROM workitems \
         WHERE [System.TeamProject] = @project \
         AND [System.IsDeleted] = {} \
         AND [System.AreaPath] UNDER '{}' \
         ORDER BY [System.ChangedDate] DESC",
        deleted,
        area_path.replace('\'', "''")
    )
}

/// `Basic base64(email:pat)` header value.
pub fn basic_auth(email: &str, pat: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", email, pat)))
}

fn transport(e: reqwest::Error) -> RemoteError {
    RemoteError::Transport(e.to_string())
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, RemoteError> {
    let status = response.status();
    if !status.is_success() {
        return Err(RemoteError::from_status(status.as_u16()));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| RemoteError::Decode(e.to_string()))
}

impl AdoClient {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let pat = config.resolve_pat().unwrap_or_default();
        if pat.is_empty() {
            tracing::warn!("No personal access token configured; requests will be rejected");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base: format!(
                "{}/{}/{}",
                config.base_url.trim_end_matches('/'),
                config.org,
                config.project
            ),
            area_path: config.area_path.clone(),
            authorization: basic_auth(&config.email, &pat),
        })
    }

    async fn query_ids(&self, deleted: bool, limit: Option<usize>) -> Result<Vec<ItemId>, RemoteError> {
        let mut url = format!("{}/_apis/wit/wiql?api-version={}", self.base, API_VERSION);
        if let Some(top) = limit {
            url.push_str(&format!("&$top={}", top));
        }

        let response = self
            .client
            .post(&url)
            .header("Authorization", &self.authorization)
            .json(&serde_json::json!({ "query": root_query(&self.area_path, deleted) }))
            .send()
            .await
            .map_err(transport)?;

        let body: WiqlResponse = decode(response).await?;
        Ok(body.work_items.into_iter().map(|r| r.id).collect())
    }
}

#[async_trait]
impl RemoteSource for AdoClient {
    async fn list_active_ids(&self, limit: Option<usize>) -> Result<Vec<ItemId>, RemoteError> {
        self.query_ids(false, limit).await
    }

    async fn list_deleted_ids(&self, limit: Option<usize>) -> Result<Vec<ItemId>, RemoteError> {
        self.query_ids(true, limit).await
    }

    async fn get_items(
        &self,
        fields: &[&str],
        ids: &[ItemId],
    ) -> Result<Vec<RemoteItem>, RemoteError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!(
            "{}/_apis/wit/workitemsbatch?api-version={}",
            self.base, API_VERSION
        );
        let response = self
            .client
            .post(&url)
            .header("Authorization", &self.authorization)
            .json(&serde_json::json!({ "ids": ids, "fields": fields }))
            .send()
            .await
            .map_err(transport)?;

        let body: Collection<RemoteItem> = decode(response).await?;
        Ok(body.value)
    }

    async fn list_types(&self) -> Result<Vec<ItemTypeDefinition>, RemoteError> {
        let url = format!(
            "{}/_apis/wit/workitemtypes?api-version={}",
            self.base, API_VERSION
        );
        let response = self
            .client
            .get(&url)
            .header("Authorization", &self.authorization)
            .send()
            .await
            .map_err(transport)?;

        let body: Collection<ItemTypeDefinition> = decode(response).await?;
        Ok(body.value)
    }
}

#[async_trait]
impl IconFetcher for AdoClient {
    async fn fetch_icon(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        let response = self.client.get(url).send().await.map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::from_status(status.as_u16()));
        }
        let bytes = response.bytes().await.map_err(transport)?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_filters_and_orders() {
        let q = root_query("Proj\\Team O'Neil", true);
        assert!(q.contains("[System.IsDeleted] = true"));
        assert!(q.contains("UNDER 'Proj\\Team O''Neil'"));
        assert!(q.ends_with("ORDER BY [System.ChangedDate] DESC"));
    }

    #[test]
    fn basic_auth_encodes_credentials() {
        assert_eq!(basic_auth("a", "b"), "Basic YTpi");
    }

    #[test]
    fn collection_tolerates_missing_value() {
        let parsed: Collection<RemoteItem> = serde_json::from_str(r#"{"count":0}"#).unwrap();
        assert!(parsed.value.is_empty());
    }
}
