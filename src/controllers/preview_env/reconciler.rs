/*
 * Copyright (C) 2025 Pedro Henrique / phkaiser13
 *
 * File: src/controllers/preview_env/reconciler.rs
 *
 * This file implements the reconciliation loop for the PreviewEnv custom
 * resource. Every trigger (a change to the PreviewEnv itself or to one of the
 * children it owns) runs the same sequence:
 *
 * 1. Fetch the PreviewEnv. If it is gone there is nothing to do; the garbage
 *    collector is already removing its children.
 * 2. Build the desired children from the spec.
 * 3. Apply them in a fixed order: app Deployment, app Service, Ingress, then
 *    the database Deployment and Service when `includeDB` is set.
 * 4. Optionally prune owned children that are no longer desired.
 * 5. Derive the public URL from the PR number and write status, but only if
 *    it differs from what is stored. A status write re-triggers the watch, so
 *    unconditional writes would loop.
 *
 * Each step recomputes from the freshly fetched object, so two overlapping
 * runs for the same PreviewEnv are harmless. The first error aborts the run;
 * `error_policy` schedules the retry with a per-object exponential backoff.
 *
 * SPDX-License-Identifier: Apache-2.0
 */

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use opentelemetry::propagation::{Extractor, TextMapPropagator};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use tracing::{debug, info, info_span, warn, Instrument};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use super::applier::{apply_owned, prune_orphans, PreviewKubeClient};
use super::backoff::{BackoffTracker, ExponentialBackoff};
use super::desired::{self, ChildKey, ChildTemplates};
use crate::config::OperatorConfig;
use crate::crds::{PreviewEnv, PreviewEnvStatus};
use crate::error::{Error, Result};
use crate::metrics::Metrics;

/// Per-run settings derived from the operator configuration.
#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    pub templates: ChildTemplates,
    pub prune_orphans: bool,
    pub resync: Duration,
}

impl From<&OperatorConfig> for ReconcileSettings {
    fn from(cfg: &OperatorConfig) -> Self {
        Self {
            templates: ChildTemplates::from(cfg),
            prune_orphans: cfg.prune_orphans,
            resync: cfg.resync_interval(),
        }
    }
}

/// Shared state handed to every reconciliation.
pub struct Context {
    pub kube: Arc<dyn PreviewKubeClient>,
    pub settings: ReconcileSettings,
    pub metrics: Metrics,
    pub backoff: BackoffTracker,
}

impl Context {
    pub fn new(kube: Arc<dyn PreviewKubeClient>, cfg: &OperatorConfig, metrics: Metrics) -> Self {
        Self {
            kube,
            settings: ReconcileSettings::from(cfg),
            metrics,
            backoff: BackoffTracker::new(ExponentialBackoff::new(
                Duration::from_secs(cfg.backoff_base_secs),
                Duration::from_secs(cfg.backoff_max_secs),
            )),
        }
    }
}

/// What a successful run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The PreviewEnv no longer exists.
    Deleted,
    Converged {
        applied: Vec<ChildKey>,
        pruned: Vec<ChildKey>,
        status_updated: bool,
    },
}

struct AnnotationExtractor<'a>(&'a BTreeMap<String, String>);

impl Extractor for AnnotationExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|s| s.as_str())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|s| s.as_str()).collect()
    }
}

/// Backoff is tracked per uid so a PreviewEnv recreated under the same name starts fresh.
fn backoff_key(env: &PreviewEnv) -> String {
    env.uid()
        .unwrap_or_else(|| format!("{}/{}", env.namespace().unwrap_or_default(), env.name_any()))
}

/// Controller entry point for a PreviewEnv trigger.
pub async fn reconcile(env: Arc<PreviewEnv>, ctx: Arc<Context>) -> Result<Action> {
    let name = env.name_any();
    let namespace = env.namespace().ok_or(Error::MissingObjectKey("namespace"))?;

    let span = info_span!(
        "reconcile_preview_env",
        "preview.name" = name.as_str(),
        "preview.namespace" = namespace.as_str()
    );
    span.set_parent(TraceContextPropagator::new().extract(&AnnotationExtractor(env.annotations())));

    async move {
        let _timer = ctx.metrics.start_timer();
        match reconcile_preview_env(ctx.kube.as_ref(), &ctx.settings, &namespace, &name).await {
            Ok(Outcome::Deleted) => {
                ctx.backoff.reset(&backoff_key(&env));
                ctx.metrics.record_result("deleted");
                Ok(Action::await_change())
            }
            Ok(Outcome::Converged {
                pruned,
                status_updated,
                ..
            }) => {
                ctx.backoff.reset(&backoff_key(&env));
                ctx.metrics.record_result("success");
                if status_updated {
                    ctx.metrics.status_writes.inc();
                }
                ctx.metrics.pruned_children.inc_by(pruned.len() as u64);
                Ok(Action::requeue(ctx.settings.resync))
            }
            Err(err) => {
                ctx.metrics.record_result(err.metric_label());
                if let Err(e) = ctx
                    .kube
                    .publish_warning(&env, "ReconcileFailed", &err.to_string())
                    .await
                {
                    warn!(error = %e, "failed to publish reconcile failure event");
                }
                Err(err)
            }
        }
    }
    .instrument(span)
    .await
}

/// Requeues a failed PreviewEnv after its backoff delay.
pub fn error_policy(env: Arc<PreviewEnv>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = backoff_key(&env);
    let delay = ctx.backoff.next_delay(&key);
    warn!(
        preview = %env.name_any(),
        namespace = ?env.namespace(),
        attempt = ctx.backoff.failures(&key),
        retry_in_secs = delay.as_secs(),
        "reconciliation failed: {}",
        error
    );
    Action::requeue(delay)
}

/// One full reconciliation of the PreviewEnv `namespace/name`.
pub async fn reconcile_preview_env(
    kube: &dyn PreviewKubeClient,
    settings: &ReconcileSettings,
    namespace: &str,
    name: &str,
) -> Result<Outcome> {
    let Some(env) = kube.get_preview_env(namespace, name).await? else {
        debug!(%namespace, %name, "PreviewEnv not found, nothing to reconcile");
        return Ok(Outcome::Deleted);
    };

    info!(pr = env.spec.pr_number, image_tag = %env.spec.image_tag, "Reconciling PreviewEnv");

    let (applied, pruned) = match converge_children(kube, settings, namespace, name, &env).await {
        Ok(done) => done,
        Err(err) => {
            mark_unavailable(kube, settings, namespace, name, &env).await;
            return Err(err);
        }
    };

    let desired_status = env.desired_status(&settings.templates.base_domain);
    let status_updated = if env.current_status() != desired_status {
        kube.patch_status(namespace, name, &desired_status).await?;
        info!(url = %desired_status.url, "PreviewEnv is available");
        true
    } else {
        false
    };

    Ok(Outcome::Converged {
        applied,
        pruned,
        status_updated,
    })
}

async fn converge_children(
    kube: &dyn PreviewKubeClient,
    settings: &ReconcileSettings,
    namespace: &str,
    name: &str,
    env: &PreviewEnv,
) -> Result<(Vec<ChildKey>, Vec<ChildKey>)> {
    let owner = env
        .controller_owner_ref(&())
        .ok_or(Error::MissingObjectKey("uid"))?;

    let desired = desired::build(name, namespace, &env.spec, &settings.templates);
    let desired_keys = desired.keys();

    let mut applied = Vec::with_capacity(desired_keys.len());
    for child in desired.into_ordered() {
        applied.push(apply_owned(kube, child, &owner).await?);
    }

    let pruned = if settings.prune_orphans {
        prune_orphans(kube, namespace, name, &owner.uid, &desired_keys).await?
    } else {
        Vec::new()
    };

    Ok((applied, pruned))
}

/// Clears `available` after a failed run so the flag never outlives a failed apply.
/// The caller still returns the original error; a failure here is only logged.
async fn mark_unavailable(
    kube: &dyn PreviewKubeClient,
    settings: &ReconcileSettings,
    namespace: &str,
    name: &str,
    env: &PreviewEnv,
) {
    if !env.current_status().available {
        return;
    }
    let status = PreviewEnvStatus {
        url: env.host(&settings.templates.base_domain),
        available: false,
    };
    if let Err(e) = kube.patch_status(namespace, name, &status).await {
        warn!(%namespace, %name, error = %e, "failed to mark PreviewEnv unavailable");
    }
}
