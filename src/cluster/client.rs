//! JSON-over-HTTP client for query nodes

use super::{
    Cluster, ComponentStates, LoadPartitionsRequest, LoadSegmentsRequest, NodeManager,
    ReleasePartitionsRequest, ReleaseSegmentsRequest,
};
use crate::common::{Error, Result, Status, UniqueId};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolves node addresses through the [`NodeManager`] on every call, so a
/// re-registered node is reached at its new address.
pub struct HttpCluster {
    nodes: Arc<NodeManager>,
    client: reqwest::Client,
}

impl HttpCluster {
    pub fn new(nodes: Arc<NodeManager>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { nodes, client })
    }

    fn url(&self, node: UniqueId, op: &str) -> Result<String> {
        let info = self
            .nodes
            .get(node)
            .ok_or_else(|| Error::NodeNotFound(node, String::new()))?;
        Ok(format!("{}/v1/{}", info.addr.trim_end_matches('/'), op))
    }

    async fn post<Req, Resp>(&self, node: UniqueId, op: &str, body: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = self.url(node, op)?;
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl Cluster for HttpCluster {
    async fn load_partitions(&self, node: UniqueId, req: LoadPartitionsRequest) -> Result<Status> {
        self.post(node, "load_partitions", &req).await
    }

    async fn release_partitions(&self, node: UniqueId, req: ReleasePartitionsRequest) -> Result<Status> {
        self.post(node, "release_partitions", &req).await
    }

    async fn load_segments(&self, node: UniqueId, req: LoadSegmentsRequest) -> Result<Status> {
        self.post(node, "load_segments", &req).await
    }

    async fn release_segments(&self, node: UniqueId, req: ReleaseSegmentsRequest) -> Result<Status> {
        self.post(node, "release_segments", &req).await
    }

    async fn get_component_states(&self, node: UniqueId) -> Result<ComponentStates> {
        let url = self.url(node, "component_states")?;
        let resp = self.client.get(&url).send().await?.error_for_status()?;
        Ok(resp.json().await?)
    }
}
