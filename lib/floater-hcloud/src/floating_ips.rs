//! Floating IP listing and assignment

use std::net::Ipv4Addr;

use async_trait::async_trait;
use floater_core::{
    FloatingIp, FloatingIpAddress, FloatingIpAssigner, FloatingIpId, FloatingIpLister, ServerId,
};
use ipnetwork::Ipv6Network;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{HcloudClient, HcloudError, Result};

const PER_PAGE: u32 = 50;

#[derive(Debug, Deserialize)]
struct FloatingIpListResponse {
    floating_ips: Vec<FloatingIpSchema>,
    #[serde(default)]
    meta: Option<Meta>,
}

#[derive(Debug, Deserialize)]
struct Meta {
    pagination: Pagination,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    page: u32,
    next_page: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum FloatingIpType {
    Ipv4,
    Ipv6,
}

#[derive(Debug, Deserialize)]
struct FloatingIpSchema {
    id: FloatingIpId,
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    ip_type: FloatingIpType,
    /// Plain address for IPv4, CIDR block for IPv6
    ip: String,
    server: Option<ServerId>,
}

impl TryFrom<FloatingIpSchema> for FloatingIp {
    type Error = HcloudError;

    fn try_from(schema: FloatingIpSchema) -> Result<Self> {
        let address = match schema.ip_type {
            FloatingIpType::Ipv4 => schema
                .ip
                .parse::<Ipv4Addr>()
                .map(FloatingIpAddress::V4)
                .map_err(|_| HcloudError::InvalidAddress {
                    id: schema.id,
                    family: "IPv4",
                    ip: schema.ip.clone(),
                })?,
            FloatingIpType::Ipv6 => schema
                .ip
                .parse::<Ipv6Network>()
                .map(FloatingIpAddress::V6)
                .map_err(|_| HcloudError::InvalidAddress {
                    id: schema.id,
                    family: "IPv6",
                    ip: schema.ip.clone(),
                })?,
        };

        Ok(FloatingIp {
            id: schema.id,
            name: schema.name,
            address,
            server: schema.server,
        })
    }
}

#[derive(Debug, Serialize)]
struct AssignRequest {
    server: ServerId,
}

#[derive(Debug, Deserialize)]
struct ActionResponse {
    action: Action,
}

/// Asynchronous action started by the API
#[derive(Clone, Debug, Deserialize)]
pub struct Action {
    pub id: u64,
    pub command: String,
    pub status: String,
}

impl HcloudClient {
    /// List every floating IP of the project, following pagination
    pub async fn list_all_floating_ips(&self) -> Result<Vec<FloatingIp>> {
        let mut floating_ips = Vec::new();
        let mut page = 1;

        loop {
            let response: FloatingIpListResponse = self
                .get_json(
                    "floating_ips",
                    &[("page", page.to_string()), ("per_page", PER_PAGE.to_string())],
                )
                .await?;

            debug!(page, count = response.floating_ips.len(), "fetched floating IPs");

            for schema in response.floating_ips {
                floating_ips.push(FloatingIp::try_from(schema)?);
            }

            match response.meta.and_then(|meta| {
                let current = meta.pagination.page;
                meta.pagination.next_page.filter(|next| *next > current)
            }) {
                Some(next) => page = next,
                None => break,
            }
        }

        Ok(floating_ips)
    }

    /// Route a floating IP to a server
    pub async fn assign_to_server(
        &self,
        floating_ip: FloatingIpId,
        server: ServerId,
    ) -> Result<Action> {
        let response: ActionResponse = self
            .post_json(
                &format!("floating_ips/{}/actions/assign", floating_ip),
                &AssignRequest { server },
            )
            .await?;

        debug!(
            floating_ip_id = floating_ip,
            server_id = server,
            action_id = response.action.id,
            status = %response.action.status,
            "assign action started"
        );
        Ok(response.action)
    }
}

#[async_trait]
impl FloatingIpLister for HcloudClient {
    async fn list_floating_ips(&self) -> floater_core::Result<Vec<FloatingIp>> {
        Ok(self.list_all_floating_ips().await?)
    }
}

#[async_trait]
impl FloatingIpAssigner for HcloudClient {
    async fn assign_floating_ip(
        &self,
        floating_ip: FloatingIpId,
        server: ServerId,
    ) -> floater_core::Result<()> {
        self.assign_to_server(floating_ip, server).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAGE_ONE: &str = r#"{
        "floating_ips": [
            {"id": 9, "name": "web", "type": "ipv4", "ip": "198.51.100.9", "server": 4241,
             "description": null, "home_location": {"name": "fsn1"}, "blocked": false},
            {"id": 10, "name": "web6", "type": "ipv6", "ip": "2001:db8::/64", "server": null}
        ],
        "meta": {"pagination": {"page": 1, "per_page": 2, "previous_page": null,
                                "next_page": 2, "last_page": 2, "total_entries": 3}}
    }"#;

    const PAGE_TWO: &str = r#"{
        "floating_ips": [
            {"id": 11, "name": "api", "type": "ipv4", "ip": "203.0.113.6", "server": 7}
        ],
        "meta": {"pagination": {"page": 2, "per_page": 2, "previous_page": 1,
                                "next_page": null, "last_page": 2, "total_entries": 3}}
    }"#;

    fn json_response(status: u16, body: &str) -> ResponseTemplate {
        ResponseTemplate::new(status).set_body_raw(body.to_string(), "application/json")
    }

    fn client(server: &MockServer) -> HcloudClient {
        HcloudClient::with_endpoint("secret", format!("{}/v1", server.uri())).unwrap()
    }

    async fn mount_page(server: &MockServer, page: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path("/v1/floating_ips"))
            .and(query_param("page", page))
            .and(query_param("per_page", "50"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(json_response(200, body))
            .expect(1)
            .mount(server)
            .await;
    }

    #[test]
    fn test_schema_conversion() {
        let response: FloatingIpListResponse = serde_json::from_str(PAGE_ONE).unwrap();
        let fips: Vec<FloatingIp> = response
            .floating_ips
            .into_iter()
            .map(FloatingIp::try_from)
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(fips[0].id, 9);
        assert_eq!(fips[0].address, FloatingIpAddress::V4("198.51.100.9".parse().unwrap()));
        assert_eq!(fips[0].server, Some(4241));
        assert_eq!(fips[1].address, FloatingIpAddress::V6("2001:db8::/64".parse().unwrap()));
        assert_eq!(fips[1].server, None);
    }

    #[test]
    fn test_invalid_address_is_rejected() {
        let schema: FloatingIpSchema = serde_json::from_str(
            r#"{"id": 3, "name": "x", "type": "ipv4", "ip": "2001:db8::/64", "server": null}"#,
        )
        .unwrap();
        let err = FloatingIp::try_from(schema).unwrap_err();
        assert_eq!(
            err.to_string(),
            "floating IP 3 has invalid IPv4 address '2001:db8::/64'"
        );
    }

    #[test]
    fn test_unknown_type_fails_to_decode() {
        let result: std::result::Result<FloatingIpSchema, _> = serde_json::from_str(
            r#"{"id": 3, "type": "ipv5", "ip": "1.2.3.4", "server": null}"#,
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_list_follows_pagination() {
        let server = MockServer::start().await;
        mount_page(&server, "1", PAGE_ONE).await;
        mount_page(&server, "2", PAGE_TWO).await;

        let fips = client(&server).list_floating_ips().await.unwrap();
        let ids: Vec<u64> = fips.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![9, 10, 11]);
    }

    #[tokio::test]
    async fn test_list_without_meta_is_single_page() {
        let server = MockServer::start().await;
        mount_page(
            &server,
            "1",
            r#"{"floating_ips": [{"id": 1, "type": "ipv4", "ip": "203.0.113.5", "server": null}]}"#,
        )
        .await;

        let fips = client(&server).list_all_floating_ips().await.unwrap();
        assert_eq!(fips.len(), 1);
    }

    #[tokio::test]
    async fn test_list_stops_when_next_page_does_not_advance() {
        let server = MockServer::start().await;
        mount_page(
            &server,
            "1",
            r#"{"floating_ips": [{"id": 1, "type": "ipv4", "ip": "203.0.113.5", "server": null}],
                "meta": {"pagination": {"page": 1, "next_page": 1}}}"#,
        )
        .await;

        let fips = client(&server).list_all_floating_ips().await.unwrap();
        assert_eq!(fips.len(), 1);
    }

    #[tokio::test]
    async fn test_assign_posts_server_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/floating_ips/9/actions/assign"))
            .and(header("authorization", "Bearer secret"))
            .and(body_json(json!({"server": 4242})))
            .respond_with(json_response(
                201,
                r#"{"action": {"id": 13, "command": "assign_floating_ip", "status": "running",
                               "progress": 0, "resources": [], "error": null}}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let action = client(&server).assign_to_server(9, 4242).await.unwrap();
        assert_eq!(action.id, 13);
        assert_eq!(action.command, "assign_floating_ip");
    }

    #[tokio::test]
    async fn test_api_error_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/floating_ips/9/actions/assign"))
            .respond_with(json_response(
                423,
                r#"{"error": {"code": "locked", "message": "floating IP is locked"}}"#,
            ))
            .expect(2)
            .mount(&server)
            .await;
        let client = client(&server);

        let err = client.assign_to_server(9, 4242).await.unwrap_err();
        match err {
            HcloudError::Api {
                status,
                code,
                message,
            } => {
                assert_eq!(status, 423);
                assert_eq!(code, "locked");
                assert_eq!(message, "floating IP is locked");
            }
            other => panic!("unexpected error: {}", other),
        }

        let core_err = client.assign_floating_ip(9, 4242).await.unwrap_err();
        assert_eq!(core_err.kind(), floater_core::ErrorKind::ExternalCall);
    }
}
