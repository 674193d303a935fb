/* Copyright (C) 2025 Pedro Henrique / phkaiser13
* Archive: src/main.rs
*
* This file is the main entry point for the preview operator. It wires the
* PreviewEnv controller into the `kube-rs` runtime and serves Prometheus
* metrics next to it.
*
* Architecture:
* 1.  **Configuration**: `OperatorConfig` is read from `PREVIEW_*` environment
* variables before anything else so a bad setting fails fast.
* 2.  **Telemetry**: JSON logs, plus Jaeger export when configured. The guard
* returned by `telemetry::init` lives until `main` returns.
* 3.  **Controller**: watches PreviewEnv objects and the Deployments, Services
* and Ingresses they own. Any change to an owned child re-triggers its parent.
* 4.  **Metrics server**: `/metrics` and `/healthz` on `PREVIEW_METRICS_ADDR`.
* 5.  **Shutdown**: SIGTERM/SIGINT stops the controller; in-flight
* reconciliations finish first.
*
* SPDX-License-Identifier: Apache-2.0 */

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use futures::stream::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, ListParams};
use kube::runtime::{controller, watcher, Controller};
use kube::Client;
use tracing::{error, info, warn};
use warp::http::StatusCode;
use warp::Filter;

use preview_operator::config::OperatorConfig;
use preview_operator::controllers::preview_env::desired::MANAGED_BY_LABEL;
use preview_operator::controllers::preview_env::{
    error_policy, reconcile, Context, KubeClient, PreviewKubeClient,
};
use preview_operator::crds::PreviewEnv;
use preview_operator::metrics::Metrics;
use preview_operator::telemetry;

/// Renders the metrics into the Prometheus text format.
async fn metrics_handler(metrics: Metrics) -> Result<impl warp::Reply, warp::Rejection> {
    let (body, status) = match metrics.render() {
        Ok(body) => (body, StatusCode::OK),
        Err(e) => {
            error!("failed to encode metrics: {}", e);
            (e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
        }
    };
    Ok(warp::reply::with_status(
        warp::reply::with_header(body, "Content-Type", "text/plain; version=0.0.4"),
        status,
    ))
}

/// Runs the HTTP server exposing `/metrics` and `/healthz`.
async fn run_metrics_server(metrics: Metrics, addr: SocketAddr) {
    let metrics_route = warp::path("metrics")
        .and(warp::get())
        .and(warp::any().map(move || metrics.clone()))
        .and_then(metrics_handler);
    let health_route = warp::path("healthz").and(warp::get()).map(|| "ok");

    info!("Starting metrics server on {}", addr);
    warp::serve(metrics_route.or(health_route)).run(addr).await;
}

fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = OperatorConfig::from_env().context("failed to load operator configuration")?;

    let _telemetry = telemetry::init(config.jaeger_agent.as_deref())?;
    info!(
        base_domain = %config.base_domain,
        field_manager = %config.field_manager,
        prune_orphans = config.prune_orphans,
        "Preview operator starting..."
    );

    let metrics_addr = config.metrics_socket_addr()?;

    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    let namespace = config.watch_namespace.as_deref();

    let previews: Api<PreviewEnv> = scoped_api(&client, namespace);
    previews
        .list(&ListParams::default().limit(1))
        .await
        .context(
            "PreviewEnv CRD is not queryable; is it installed? \
             (cargo run --bin crdgen | kubectl apply -f -)",
        )?;

    let metrics = Metrics::new().context("failed to register metrics")?;
    let kube: Arc<dyn PreviewKubeClient> =
        Arc::new(KubeClient::new(client.clone(), &config.field_manager));
    let context = Arc::new(Context::new(kube, &config, metrics.clone()));

    let owned = watcher::Config::default()
        .labels(&format!("{MANAGED_BY_LABEL}={}", config.field_manager));

    let controller = Controller::new(previews, watcher::Config::default())
        .owns(scoped_api::<Deployment>(&client, namespace), owned.clone())
        .owns(scoped_api::<Service>(&client, namespace), owned.clone())
        .owns(scoped_api::<Ingress>(&client, namespace), owned)
        .with_config(controller::Config::default().concurrency(config.concurrency))
        .shutdown_on_signal()
        .run(reconcile, error_policy, context)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => info!("Reconciled PreviewEnv: {}", obj),
                Err(e) => warn!("PreviewEnv reconcile error: {}", e),
            }
        });

    tokio::select! {
        _ = controller => info!("Controller stream ended."),
        _ = run_metrics_server(metrics, metrics_addr) => warn!("Metrics server exited."),
    }

    info!("Preview operator shutting down.");
    Ok(())
}
