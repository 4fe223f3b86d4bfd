//! Leader election using Kubernetes Leases
//!
//! Only the lease holder runs the controller, so a single replica issues
//! floating IP assignments at a time. The lease is taken with
//! resourceVersion compare-and-swap: if it changes between read and write
//! the update fails with 409 Conflict and the attempt is retried.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, PostParams};
use kube::Client;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const LEASE_DURATION: Duration = Duration::from_secs(30);
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum LeaderElectionError {
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("lease {0} has no resourceVersion")]
    MissingResourceVersion(String),
}

type Result<T> = std::result::Result<T, LeaderElectionError>;

pub struct LeaderElector {
    client: Client,
    lease_name: String,
    namespace: String,
    identity: String,
}

/// Held while this replica is leader
pub struct LeaderGuard {
    elector: Arc<LeaderElector>,
    renewal_task: JoinHandle<()>,
    lost_rx: oneshot::Receiver<()>,
}

impl LeaderElector {
    pub fn new(client: Client, lease_name: &str, namespace: &str, identity: &str) -> Self {
        Self {
            client,
            lease_name: lease_name.to_string(),
            namespace: namespace.to_string(),
            identity: identity.to_string(),
        }
    }

    /// Block until leadership is acquired
    pub async fn acquire(self: Arc<Self>) -> LeaderGuard {
        info!(
            identity = %self.identity,
            lease = %self.lease_name,
            namespace = %self.namespace,
            "Waiting for leadership..."
        );

        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    info!(identity = %self.identity, "Leadership acquired");
                    return self.create_guard();
                }
                Ok(false) => {
                    debug!(identity = %self.identity, "Lease held by another, waiting...");
                }
                Err(e) => {
                    warn!(identity = %self.identity, error = %e, "Failed to acquire lease, retrying...");
                }
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    fn create_guard(self: &Arc<Self>) -> LeaderGuard {
        let (lost_tx, lost_rx) = oneshot::channel();
        let elector = Arc::clone(self);
        let renewal_task = tokio::spawn(async move {
            elector.renewal_loop(lost_tx).await;
        });

        LeaderGuard {
            elector: Arc::clone(self),
            renewal_task,
            lost_rx,
        }
    }

    async fn try_acquire_or_renew(&self) -> Result<bool> {
        let api: Api<Lease> = Api::namespaced(self.client.clone(), &self.namespace);
        let now = Utc::now();

        let existing = match api.get(&self.lease_name).await {
            Ok(lease) => lease,
            Err(kube::Error::Api(e)) if e.code == 404 => {
                let lease = Lease {
                    metadata: ObjectMeta {
                        name: Some(self.lease_name.clone()),
                        namespace: Some(self.namespace.clone()),
                        ..Default::default()
                    },
                    spec: None,
                };
                return self.write_lease(&api, lease, now, now, 0).await;
            }
            Err(e) => return Err(e.into()),
        };

        if existing.metadata.resource_version.is_none() {
            return Err(LeaderElectionError::MissingResourceVersion(
                self.lease_name.clone(),
            ));
        }

        let spec = existing.spec.as_ref();
        let holder = spec.and_then(|s| s.holder_identity.clone());
        let transitions = spec.and_then(|s| s.lease_transitions).unwrap_or(0);

        if holder.as_deref() == Some(self.identity.as_str()) {
            let acquired = spec
                .and_then(|s| s.acquire_time.as_ref())
                .map(|t| t.0)
                .unwrap_or(now);
            return self
                .write_lease(&api, existing, acquired, now, transitions)
                .await;
        }

        if lease_expired(spec, now) {
            info!(
                identity = %self.identity,
                previous = ?holder,
                transitions = transitions + 1,
                "Taking over expired lease"
            );
            self.write_lease(&api, existing, now, now, transitions + 1)
                .await
        } else {
            Ok(false)
        }
    }

    /// Create `lease`, or replace it if it carries a resourceVersion, with
    /// this replica as holder.
    ///
    /// Returns `Ok(false)` on a write conflict.
    async fn write_lease(
        &self,
        api: &Api<Lease>,
        lease: Lease,
        acquired: DateTime<Utc>,
        now: DateTime<Utc>,
        transitions: i32,
    ) -> Result<bool> {
        let create = lease.metadata.resource_version.is_none();
        let lease = claim_lease(lease, &self.identity, acquired, now, transitions);

        let result = if create {
            api.create(&PostParams::default(), &lease).await
        } else {
            api.replace(&self.lease_name, &PostParams::default(), &lease)
                .await
        };

        match result {
            Ok(_) => {
                debug!(identity = %self.identity, "Lease written");
                Ok(true)
            }
            Err(kube::Error::Api(e)) if e.code == 409 => {
                debug!(identity = %self.identity, "Lease write conflict");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn renewal_loop(&self, lost_tx: oneshot::Sender<()>) {
        loop {
            tokio::time::sleep(RENEW_INTERVAL).await;

            match self.try_acquire_or_renew().await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(identity = %self.identity, "Leadership lost");
                    let _ = lost_tx.send(());
                    return;
                }
                Err(e) => {
                    warn!(identity = %self.identity, error = %e, "Leadership lost");
                    let _ = lost_tx.send(());
                    return;
                }
            }
        }
    }

    /// Clear the holder so another replica can take over without waiting
    async fn release(&self) -> Result<()> {
        let api: Api<Lease> = Api::namespaced(self.client.clone(), &self.namespace);

        let mut lease = match api.get(&self.lease_name).await {
            Ok(lease) => lease,
            Err(kube::Error::Api(e)) if e.code == 404 => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let Some(spec) = lease.spec.as_mut() else {
            return Ok(());
        };
        if spec.holder_identity.as_deref() != Some(self.identity.as_str()) {
            debug!(identity = %self.identity, "Not the lease holder, nothing to release");
            return Ok(());
        }
        spec.holder_identity = None;
        spec.acquire_time = None;
        spec.renew_time = None;

        api.replace(&self.lease_name, &PostParams::default(), &lease)
            .await?;
        info!(identity = %self.identity, "Lease released");
        Ok(())
    }
}

impl LeaderGuard {
    /// Resolves when the lease could not be renewed
    pub async fn lost(&mut self) {
        let _ = (&mut self.lost_rx).await;
    }

    /// Stop renewing and hand the lease back
    pub async fn release(self) {
        self.renewal_task.abort();
        if let Err(e) = self.elector.release().await {
            warn!(error = %e, "Failed to release lease");
        }
    }
}

/// Point the lease spec at `identity`, leaving metadata untouched
fn claim_lease(
    mut lease: Lease,
    identity: &str,
    acquired: DateTime<Utc>,
    now: DateTime<Utc>,
    transitions: i32,
) -> Lease {
    let spec = lease.spec.get_or_insert_with(LeaseSpec::default);
    spec.holder_identity = Some(identity.to_string());
    spec.lease_duration_seconds = Some(LEASE_DURATION.as_secs() as i32);
    spec.acquire_time = Some(MicroTime(acquired));
    spec.renew_time = Some(MicroTime(now));
    spec.lease_transitions = Some(transitions);
    lease
}

/// Whether a lease held by someone else may be taken over
fn lease_expired(spec: Option<&LeaseSpec>, now: DateTime<Utc>) -> bool {
    let Some(spec) = spec else {
        return true;
    };
    if spec.holder_identity.as_deref().map_or(true, str::is_empty) {
        return true;
    }
    match (spec.renew_time.as_ref(), spec.lease_duration_seconds) {
        (Some(renewed), Some(duration)) => {
            now > renewed.0 + chrono::Duration::seconds(duration as i64)
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn lease_spec(holder: Option<&str>, renewed_secs_ago: Option<i64>, duration: i32) -> LeaseSpec {
        LeaseSpec {
            holder_identity: holder.map(str::to_string),
            lease_duration_seconds: Some(duration),
            renew_time: renewed_secs_ago
                .map(|ago| MicroTime(Utc::now() - chrono::Duration::seconds(ago))),
            ..Default::default()
        }
    }

    #[test]
    fn test_claim_keeps_lease_metadata() {
        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), "hcloud-metallb-floater".to_string());
        let existing = Lease {
            metadata: ObjectMeta {
                name: Some("floater".to_string()),
                namespace: Some("kube-system".to_string()),
                resource_version: Some("41".to_string()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(lease_spec(Some("other"), Some(60), 30)),
        };

        let now = Utc::now();
        let claimed = claim_lease(existing, "replica-b", now, now, 3);

        assert_eq!(claimed.metadata.resource_version.as_deref(), Some("41"));
        assert_eq!(claimed.metadata.labels, Some(labels));
        let spec = claimed.spec.unwrap();
        assert_eq!(spec.holder_identity.as_deref(), Some("replica-b"));
        assert_eq!(spec.lease_duration_seconds, Some(30));
        assert_eq!(spec.lease_transitions, Some(3));
        assert_eq!(spec.renew_time, Some(MicroTime(now)));
        assert!(!lease_expired(Some(&spec), now));
    }

    #[test]
    fn test_claim_fills_missing_spec() {
        let now = Utc::now();
        let claimed = claim_lease(Lease::default(), "replica-a", now, now, 0);
        let spec = claimed.spec.unwrap();
        assert_eq!(spec.holder_identity.as_deref(), Some("replica-a"));
        assert_eq!(spec.acquire_time, Some(MicroTime(now)));
    }

    #[test]
    fn test_fresh_lease_is_not_expired() {
        let spec = lease_spec(Some("other"), Some(5), 30);
        assert!(!lease_expired(Some(&spec), Utc::now()));
    }

    #[test]
    fn test_stale_lease_is_expired() {
        let spec = lease_spec(Some("other"), Some(31), 30);
        assert!(lease_expired(Some(&spec), Utc::now()));
    }

    #[test]
    fn test_released_lease_is_expired() {
        let spec = lease_spec(None, Some(1), 30);
        assert!(lease_expired(Some(&spec), Utc::now()));
        let spec = lease_spec(Some(""), Some(1), 30);
        assert!(lease_expired(Some(&spec), Utc::now()));
    }

    #[test]
    fn test_incomplete_lease_is_expired() {
        assert!(lease_expired(None, Utc::now()));
        let spec = lease_spec(Some("other"), None, 30);
        assert!(lease_expired(Some(&spec), Utc::now()));
    }
}
