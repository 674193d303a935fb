/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/metrics.rs
*
* This module defines the Prometheus metrics that the preview operator
* exposes. The metrics live in a registry owned by `Metrics`, which is created
* once at startup and handed to the controller context, so tests can build
* their own isolated instance.
*
* SPDX-License-Identifier: Apache-2.0
*/

use prometheus::{
    histogram_opts, opts, Encoder, Histogram, HistogramTimer, IntCounter, IntCounterVec, Registry,
    TextEncoder,
};

use crate::error::{Error, Result};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Reconciliations, labeled by `result` ("success", "deleted" or an error label).
    pub reconciliations: IntCounterVec,
    pub reconcile_duration: Histogram,
    /// Status subresource writes actually issued (suppressed writes are not counted).
    pub status_writes: IntCounter,
    pub pruned_children: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let reconciliations = IntCounterVec::new(
            opts!(
                "preview_env_reconciliations_total",
                "Total number of PreviewEnv reconciliations."
            ),
            &["result"],
        )?;
        let reconcile_duration = Histogram::with_opts(histogram_opts!(
            "preview_env_reconcile_duration_seconds",
            "Duration of a PreviewEnv reconciliation.",
            vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
        ))?;
        let status_writes = IntCounter::with_opts(opts!(
            "preview_env_status_writes_total",
            "Number of PreviewEnv status updates issued."
        ))?;
        let pruned_children = IntCounter::with_opts(opts!(
            "preview_env_pruned_children_total",
            "Number of owned children deleted because they are no longer desired."
        ))?;

        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(reconcile_duration.clone()))?;
        registry.register(Box::new(status_writes.clone()))?;
        registry.register(Box::new(pruned_children.clone()))?;

        Ok(Self {
            registry,
            reconciliations,
            reconcile_duration,
            status_writes,
            pruned_children,
        })
    }

    pub fn start_timer(&self) -> HistogramTimer {
        self.reconcile_duration.start_timer()
    }

    pub fn record_result(&self, result: &str) {
        self.reconciliations.with_label_values(&[result]).inc();
    }

    /// Renders every registered metric in the Prometheus text format.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| Error::Metrics(prometheus::Error::Msg(e.to_string())))
    }
}
