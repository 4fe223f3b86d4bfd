//! Ownership signal extraction
//!
//! MetalLB in layer-2 mode records the node answering ARP/NDP for a service
//! in an annotation. Together with the LoadBalancer ingress address this is
//! everything needed to decide where the floating IP should point.

use std::net::IpAddr;

use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;

use crate::{CoreError, Result};

/// Annotation MetalLB sets to the name of the node owning the service address
pub const OWNER_NODE_ANNOTATION: &str = "layer2.metallb.universe.tf/owner-node";

/// Owner node and external address of an annotated Service
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnershipSignal {
    pub node_name: String,
    pub address: IpAddr,
}

impl OwnershipSignal {
    /// Extract the ownership signal from a Service.
    ///
    /// Returns `Ok(None)` when the Service carries no owner annotation; such
    /// services are not managed. A missing or unparseable ingress address is
    /// an error.
    pub fn from_service(service: &Service) -> Result<Option<Self>> {
        let node_name = match service
            .metadata
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(OWNER_NODE_ANNOTATION))
        {
            Some(node_name) => node_name.clone(),
            None => return Ok(None),
        };

        let raw = service
            .status
            .as_ref()
            .and_then(|status| status.load_balancer.as_ref())
            .and_then(|lb| lb.ingress.as_ref())
            .into_iter()
            .flatten()
            .filter_map(|ingress| ingress.ip.as_deref())
            .find(|ip| !ip.is_empty())
            .ok_or_else(|| CoreError::NoLoadBalancerIp(service_key(service)))?;

        let address = raw
            .parse::<IpAddr>()
            .map_err(|_| CoreError::InvalidLoadBalancerIp(raw.to_string()))?
            .to_canonical();

        Ok(Some(Self { node_name, address }))
    }
}

fn service_key(service: &Service) -> String {
    match service.namespace() {
        Some(namespace) => format!("{}/{}", namespace, service.name_any()),
        None => service.name_any(),
    }
}
