//! Provider ID parsing
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;

use crate::{CoreError, Result, ServerId};

/// Scheme the Hetzner Cloud controller manager writes into `spec.providerID`
pub const HCLOUD_PROVIDER_PREFIX: &str = "hcloud://";

/// Resolve the Hetzner Cloud server ID backing a Node
pub fn server_id_for_node(node: &Node) -> Result<ServerId> {
    let name = node.name_any();
    let provider_id = node
        .spec
        .as_ref()
        .and_then(|spec| spec.provider_id.as_deref())
        .unwrap_or_default();

    parse_provider_id(&name, provider_id)
}

fn parse_provider_id(node: &str, provider_id: &str) -> Result<ServerId> {
    if provider_id.is_empty() {
        return Err(CoreError::ProviderIdUnset(node.to_string()));
    }

    let id = provider_id
        .strip_prefix(HCLOUD_PROVIDER_PREFIX)
        .ok_or_else(|| CoreError::UnexpectedProviderScheme {
            node: node.to_string(),
            provider_id: provider_id.to_string(),
            prefix: HCLOUD_PROVIDER_PREFIX,
        })?;

    id.parse::<ServerId>()
        .map_err(|source| CoreError::MalformedProviderId {
            node: node.to_string(),
            provider_id: provider_id.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::NodeSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn node(provider_id: Option<&str>) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some("node-7".to_string()),
                ..Default::default()
            },
            spec: Some(NodeSpec {
                provider_id: provider_id.map(str::to_string),
                ..Default::default()
            }),
            status: None,
        }
    }

    #[test]
    fn test_valid_provider_id() {
        assert_eq!(server_id_for_node(&node(Some("hcloud://4242"))).unwrap(), 4242);
    }

    #[test]
    fn test_unset_provider_id() {
        assert!(matches!(
            server_id_for_node(&node(None)),
            Err(CoreError::ProviderIdUnset(ref n)) if n == "node-7"
        ));
        assert!(matches!(
            server_id_for_node(&node(Some(""))),
            Err(CoreError::ProviderIdUnset(_))
        ));

        let mut bare = node(None);
        bare.spec = None;
        assert!(matches!(
            server_id_for_node(&bare),
            Err(CoreError::ProviderIdUnset(_))
        ));
    }

    #[test]
    fn test_unexpected_scheme() {
        for provider_id in ["aws:///eu-central-1a/i-0abc", "cloud://4242", "4242", "HCLOUD://1"] {
            assert!(
                matches!(
                    server_id_for_node(&node(Some(provider_id))),
                    Err(CoreError::UnexpectedProviderScheme { .. })
                ),
                "{} should be rejected",
                provider_id
            );
        }
    }

    #[test]
    fn test_malformed_server_id() {
        for provider_id in ["hcloud://", "hcloud://abc", "hcloud://-1", "hcloud://12 ", "hcloud://99999999999999999999"] {
            assert!(
                matches!(
                    server_id_for_node(&node(Some(provider_id))),
                    Err(CoreError::MalformedProviderId { .. })
                ),
                "{} should be malformed",
                provider_id
            );
        }
    }
}
