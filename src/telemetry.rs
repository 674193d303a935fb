/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/telemetry.rs
*
* Sets up logging and tracing for the operator. Logs are emitted as JSON and
* filtered through `RUST_LOG` (default `info`). When a Jaeger agent is
* configured, spans are also exported through OpenTelemetry.
*
* `init` is called once from `main`. The returned `TelemetryGuard` flushes and
* shuts down the exporter when it is dropped at the end of `main`.
*
* SPDX-License-Identifier: Apache-2.0
*/

use anyhow::Context as _;
use opentelemetry::global;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SERVICE_NAME: &str = "preview-operator";

#[must_use = "dropping the guard shuts the trace exporter down"]
pub struct TelemetryGuard {
    exporting: bool,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if self.exporting {
            global::shutdown_tracer_provider();
        }
    }
}

/// Installs the global tracing subscriber. Must be called from inside the Tokio runtime.
pub fn init(jaeger_agent: Option<&str>) -> anyhow::Result<TelemetryGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().json();

    let telemetry = match jaeger_agent {
        Some(endpoint) => {
            let tracer = opentelemetry_jaeger::new_agent_pipeline()
                .with_endpoint(endpoint)
                .with_service_name(SERVICE_NAME)
                .install_batch(opentelemetry_sdk::runtime::Tokio)
                .with_context(|| {
                    format!("failed to install Jaeger pipeline for agent '{endpoint}'")
                })?;
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };
    let exporting = telemetry.is_some();

    tracing_subscriber::registry()
        .with(filter)
        .with(telemetry)
        .with(fmt_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(TelemetryGuard { exporting })
}
