//! Catalog access
//!
//! The broker owns schemas, partitions, indexes and segment recovery info.
//! [`HttpBroker`] talks to it with JSON over HTTP.

use crate::common::{Result, UniqueId};
use crate::meta::{DmChannel, TargetSegment};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub field_id: i64,
    pub name: String,
    pub data_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub collection_id: UniqueId,
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub index_id: i64,
    pub field_id: i64,
    #[serde(default)]
    pub index_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryInfo {
    pub channels: Vec<DmChannel>,
    pub segments: Vec<TargetSegment>,
}

#[async_trait]
pub trait Broker: Send + Sync {
    async fn describe_collection(&self, collection: UniqueId) -> Result<CollectionSchema>;

    async fn get_partitions(&self, collection: UniqueId) -> Result<Vec<UniqueId>>;

    async fn describe_index(&self, collection: UniqueId) -> Result<Vec<IndexInfo>>;

    /// Channels and sealed segments of the given partitions.
    async fn get_recovery_info(&self, collection: UniqueId, partitions: &[UniqueId]) -> Result<RecoveryInfo>;
}

pub struct HttpBroker {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct CollectionQuery<'a> {
    collection_id: UniqueId,
    #[serde(skip_serializing_if = "Option::is_none")]
    partition_ids: Option<&'a [UniqueId]>,
}

impl HttpBroker {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn call<T: DeserializeOwned>(&self, op: &str, query: &CollectionQuery<'_>) -> Result<T> {
        let url = format!("{}/v1/{}", self.base_url, op);
        let resp = self
            .client
            .post(&url)
            .json(query)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl Broker for HttpBroker {
    async fn describe_collection(&self, collection: UniqueId) -> Result<CollectionSchema> {
        self.call(
            "describe_collection",
            &CollectionQuery {
                collection_id: collection,
                partition_ids: None,
            },
        )
        .await
    }

    async fn get_partitions(&self, collection: UniqueId) -> Result<Vec<UniqueId>> {
        self.call(
            "show_partitions",
            &CollectionQuery {
                collection_id: collection,
                partition_ids: None,
            },
        )
        .await
    }

    async fn describe_index(&self, collection: UniqueId) -> Result<Vec<IndexInfo>> {
        self.call(
            "describe_index",
            &CollectionQuery {
                collection_id: collection,
                partition_ids: None,
            },
        )
        .await
    }

    async fn get_recovery_info(&self, collection: UniqueId, partitions: &[UniqueId]) -> Result<RecoveryInfo> {
        self.call(
            "get_recovery_info",
            &CollectionQuery {
                collection_id: collection,
                partition_ids: Some(partitions),
            },
        )
        .await
    }
}
