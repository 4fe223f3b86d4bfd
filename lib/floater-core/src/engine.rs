//! Assignment engine
//!
//! One reconciliation pass re-derives everything from the cluster and the
//! cloud API: read the Service, extract the owner node and address, resolve
//! the node's server ID, locate the floating IP and re-attach it if it points
//! elsewhere. Nothing is cached between passes.
//!
//! The engine holds no locks. Passes for the same Service are expected to be
//! serialized by the caller (kube-runtime's controller guarantees this); two
//! racing passes may both issue an assignment, which the cloud API treats as
//! a repeated re-attach.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

#[cfg(test)]
use mockall::automock;

use crate::{
    find_floating_ip, server_id_for_node, ClusterReader, FloatingIp, FloatingIpId,
    OwnershipSignal, Result, ServerId,
};

/// Lists every floating IP visible to the configured credentials
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FloatingIpLister: Send + Sync {
    async fn list_floating_ips(&self) -> Result<Vec<FloatingIp>>;
}

/// Re-attaches a floating IP to a server, replacing any prior attachment
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FloatingIpAssigner: Send + Sync {
    async fn assign_floating_ip(&self, floating_ip: FloatingIpId, server: ServerId)
        -> Result<()>;
}

/// Result of a successful reconciliation pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The Service has no owner-node annotation
    NotApplicable,
    /// The floating IP already routes to the owner node
    AlreadyAssigned {
        floating_ip: FloatingIpId,
        server: ServerId,
    },
    /// The floating IP was re-attached to the owner node
    Assigned {
        floating_ip: FloatingIpId,
        server: ServerId,
    },
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::NotApplicable => "not_applicable",
            ReconcileOutcome::AlreadyAssigned { .. } => "already_assigned",
            ReconcileOutcome::Assigned { .. } => "assigned",
        }
    }
}

/// Keeps floating IPs attached to the node MetalLB elected for a Service
pub struct AssignmentEngine {
    cluster: Arc<dyn ClusterReader>,
    lister: Arc<dyn FloatingIpLister>,
    assigner: Arc<dyn FloatingIpAssigner>,
}

impl AssignmentEngine {
    pub fn new(
        cluster: Arc<dyn ClusterReader>,
        lister: Arc<dyn FloatingIpLister>,
        assigner: Arc<dyn FloatingIpAssigner>,
    ) -> Self {
        Self {
            cluster,
            lister,
            assigner,
        }
    }

    /// Run one reconciliation pass for the Service `namespace/name`.
    ///
    /// Issues at most one assignment, and only when the floating IP does not
    /// already point at the owner node's server.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<ReconcileOutcome> {
        let service = self.cluster.get_service(namespace, name).await?;

        let signal = match OwnershipSignal::from_service(&service)? {
            Some(signal) => signal,
            None => {
                debug!("service has no owner-node annotation");
                return Ok(ReconcileOutcome::NotApplicable);
            }
        };

        let node = self.cluster.get_node(&signal.node_name).await?;
        let server = server_id_for_node(&node)?;

        let floating_ips = self.lister.list_floating_ips().await?;
        let floating_ip = find_floating_ip(&floating_ips, signal.address)?;

        if floating_ip.is_assigned_to(server) {
            debug!(
                node = %signal.node_name,
                floating_ip = %signal.address,
                floating_ip_id = floating_ip.id,
                server_id = server,
                "floating IP already points to the correct node"
            );
            return Ok(ReconcileOutcome::AlreadyAssigned {
                floating_ip: floating_ip.id,
                server,
            });
        }

        self.assigner
            .assign_floating_ip(floating_ip.id, server)
            .await?;

        info!(
            node = %signal.node_name,
            floating_ip = %signal.address,
            floating_ip_id = floating_ip.id,
            server_id = server,
            previous_server_id = ?floating_ip.server,
            "assigned floating IP to owner node"
        );

        Ok(ReconcileOutcome::Assigned {
            floating_ip: floating_ip.id,
            server,
        })
    }
}
