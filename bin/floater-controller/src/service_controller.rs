//! Service controller driving floating IP reconciliation
//!
//! Watches Services cluster-wide and re-runs the assignment engine for every
//! Service that changes. Node changes are mapped back to the Services whose
//! owner-node annotation names them, so a node gaining its providerID is
//! picked up without waiting for the resync.

use std::sync::Arc;
use std::time::Duration;

use floater_core::{AssignmentEngine, CoreError, ReconcileOutcome, OWNER_NODE_ANNOTATION};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Node, Service};
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::Action;
use kube_runtime::reflector::{ObjectRef, Store};
use kube_runtime::watcher::Config as WatcherConfig;
use kube_runtime::Controller;
use tracing::{debug, error, info, warn};

use crate::metrics::ReconcileMetrics;

/// Requeue delay after a failed reconciliation
const ERROR_REQUEUE: Duration = Duration::from_secs(60);

/// Shared state handed to every reconciliation
pub struct Context {
    pub engine: AssignmentEngine,
    pub metrics: ReconcileMetrics,
    pub sync_period: Duration,
}

pub struct ServiceController {
    client: Client,
    context: Arc<Context>,
}

impl ServiceController {
    pub fn new(client: Client, context: Context) -> Self {
        Self {
            client,
            context: Arc::new(context),
        }
    }

    /// Run until a shutdown signal is received
    pub async fn run(&self) {
        info!("Starting Service reconciliation");

        let services: Api<Service> = Api::all(self.client.clone());
        let nodes: Api<Node> = Api::all(self.client.clone());

        let controller = Controller::new(services, WatcherConfig::default());
        let store = controller.store();

        controller
            .watches(nodes, WatcherConfig::default(), move |node: Node| {
                services_owned_by(&store, &node.name_any())
            })
            .shutdown_on_signal()
            .run(reconcile, error_policy, self.context.clone())
            .for_each(|result| async move {
                match result {
                    Ok((object, _)) => debug!(service = %object, "Reconciled Service"),
                    Err(e) => warn!("Error in reconciliation stream: {}", e),
                }
            })
            .await;

        info!("Service controller stopped");
    }
}

/// Services in the cache whose owner-node annotation names `node_name`
fn services_owned_by(store: &Store<Service>, node_name: &str) -> Vec<ObjectRef<Service>> {
    owned_by(store.state(), node_name)
}

fn owned_by(services: Vec<Arc<Service>>, node_name: &str) -> Vec<ObjectRef<Service>> {
    services
        .into_iter()
        .filter(|svc| {
            svc.annotations()
                .get(OWNER_NODE_ANNOTATION)
                .is_some_and(|owner| owner == node_name)
        })
        .map(|svc| ObjectRef::from_obj(svc.as_ref()))
        .collect()
}

async fn reconcile(service: Arc<Service>, ctx: Arc<Context>) -> Result<Action, CoreError> {
    let namespace = service.namespace().unwrap_or_default();
    let name = service.name_any();

    match ctx.engine.reconcile(&namespace, &name).await {
        Ok(outcome) => {
            ctx.metrics.observe_outcome(&outcome);
            if let ReconcileOutcome::NotApplicable = outcome {
                debug!(service = %format!("{}/{}", namespace, name), "Nothing to do");
            }
            Ok(Action::requeue(ctx.sync_period))
        }
        Err(e) => {
            ctx.metrics.observe_error(&e);
            Err(e)
        }
    }
}

fn error_policy(service: Arc<Service>, error: &CoreError, _ctx: Arc<Context>) -> Action {
    error!(
        service = %format!("{}/{}", service.namespace().unwrap_or_default(), service.name_any()),
        kind = error.kind().as_str(),
        error = %error,
        "Error reconciling Service"
    );
    Action::requeue(ERROR_REQUEUE)
}
