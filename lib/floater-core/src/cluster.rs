//! Cluster read access for Services and Nodes

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Service};
use kube::{Api, Client};

#[cfg(test)]
use mockall::automock;

use crate::Result;

/// Read-only view of the cluster objects a reconciliation needs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterReader: Send + Sync {
    /// Fetch a Service by namespace and name
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service>;

    /// Fetch a Node by name
    async fn get_node(&self, name: &str) -> Result<Node>;
}

/// `ClusterReader` backed by the Kubernetes API
pub struct KubeClusterReader {
    client: Client,
}

impl KubeClusterReader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterReader for KubeClusterReader {
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service> {
        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(services.get(name).await?)
    }

    async fn get_node(&self, name: &str) -> Result<Node> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        Ok(nodes.get(name).await?)
    }
}
