//! Floating IP reconciliation for MetalLB layer-2 services
//!
//! This library provides:
//! - Ownership signal extraction from annotated Services
//! - Provider ID parsing into Hetzner Cloud server IDs
//! - Floating IP lookup by LoadBalancer address
//! - The assignment engine that re-attaches drifted floating IPs

pub mod cluster;
pub mod directory;
pub mod engine;
pub mod error;
pub mod floating_ip;
pub mod ownership;
pub mod provider_id;

pub use cluster::{ClusterReader, KubeClusterReader};
pub use directory::find_floating_ip;
pub use engine::{AssignmentEngine, FloatingIpAssigner, FloatingIpLister, ReconcileOutcome};
pub use error::{CoreError, ErrorKind, Result};
pub use floating_ip::{FloatingIp, FloatingIpAddress, FloatingIpId, ServerId};
pub use ownership::{OwnershipSignal, OWNER_NODE_ANNOTATION};
pub use provider_id::{server_id_for_node, HCLOUD_PROVIDER_PREFIX};
