use std::sync::Arc;

use anyhow::{anyhow, Context as _, Result};
use clap::Parser;
use floater_core::{AssignmentEngine, KubeClusterReader};
use floater_hcloud::HcloudClient;
use kube::Client;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

mod config;
mod leader_election;
mod metrics;
mod service_controller;

use config::Args;
use leader_election::LeaderElector;
use metrics::ReconcileMetrics;
use service_controller::{Context, ServiceController};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| args.log_filter().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting hcloud-metallb-floater...");

    let hcloud = match &args.hcloud_endpoint {
        Some(endpoint) => HcloudClient::with_endpoint(&args.hcloud_token, endpoint),
        None => HcloudClient::new(&args.hcloud_token),
    }
    .context("could not create Hetzner Cloud client")?;
    let hcloud = Arc::new(hcloud);
    info!("Hetzner Cloud client initialized for {}", hcloud.endpoint());

    let client = Client::try_default()
        .await
        .context("could not create Kubernetes client")?;

    let metrics = ReconcileMetrics::new().context("could not create metrics")?;
    let metrics_server = tokio::spawn(metrics::serve(args.metrics_addr, metrics.clone()));

    let mut leadership = if args.enable_leader_election {
        let identity = std::env::var("POD_NAME")
            .unwrap_or_else(|_| format!("hcloud-metallb-floater-{}", Uuid::new_v4()));
        let elector = Arc::new(LeaderElector::new(
            client.clone(),
            &args.leader_election_id,
            &args.leader_election_namespace,
            &identity,
        ));
        Some(elector.acquire().await)
    } else {
        None
    };

    let engine = AssignmentEngine::new(
        Arc::new(KubeClusterReader::new(client.clone())),
        hcloud.clone(),
        hcloud,
    );
    let controller = ServiceController::new(
        client,
        Context {
            engine,
            metrics,
            sync_period: args.sync_period(),
        },
    );

    let leadership_lost = async {
        match leadership.as_mut() {
            Some(guard) => guard.lost().await,
            None => std::future::pending::<()>().await,
        }
    };

    let result = tokio::select! {
        _ = controller.run() => {
            info!("Shutdown signal received, exiting...");
            Ok(())
        }
        _ = leadership_lost => {
            error!("Leader election lost");
            Err(anyhow!("leader election lost"))
        }
        served = metrics_server => {
            match served {
                Ok(Ok(())) => Err(anyhow!("metrics server stopped")),
                Ok(Err(e)) => Err(e.context("metrics server failed")),
                Err(e) => Err(anyhow::Error::new(e).context("metrics server panicked")),
            }
        }
    };

    if let Some(guard) = leadership {
        guard.release().await;
    }

    result
}
