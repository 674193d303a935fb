/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/config.rs
*
* Operator configuration. Every setting has a default matching the existing
* gearpit deployment and can be overridden through a `PREVIEW_*` environment
* variable. The configuration is loaded once at startup and shared read-only
* with every reconciliation.
*
* SPDX-License-Identifier: Apache-2.0
*/

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Error, Result};

pub const DEFAULT_FIELD_MANAGER: &str = "preview-env-controller";

#[derive(Debug, Clone, PartialEq)]
pub struct OperatorConfig {
    /// Domain appended to `pr-<number>` to form the ingress host.
    pub base_domain: String,
    /// Application image repository; the PreviewEnv's tag is appended.
    pub app_image: String,
    /// Image used for the optional database workload.
    pub db_image: String,
    /// `spec.ingressClassName` for generated ingresses, if any.
    pub ingress_class: Option<String>,
    /// Server-side apply field manager identity.
    pub field_manager: String,
    /// Restrict the controller to one namespace. `None` watches all.
    pub watch_namespace: Option<String>,
    pub metrics_addr: String,
    /// Delete owned children that are no longer desired (e.g. after `includeDB` flips to false).
    pub prune_orphans: bool,
    pub concurrency: u16,
    pub resync_secs: u64,
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
    /// `host:port` of a Jaeger agent. Tracing export is disabled when unset.
    pub jaeger_agent: Option<String>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            base_domain: "gearpit.nip.io".to_string(),
            app_image: "ghcr.io/nordiwnd/gearpit/app".to_string(),
            db_image: "postgres:15-alpine".to_string(),
            ingress_class: None,
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
            watch_namespace: None,
            metrics_addr: "0.0.0.0:9090".to_string(),
            prune_orphans: true,
            concurrency: 4,
            resync_secs: 600,
            backoff_base_secs: 5,
            backoff_max_secs: 300,
            jaeger_agent: None,
        }
    }
}

impl OperatorConfig {
    /// Loads the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars().collect())
    }

    /// Builds the configuration from an explicit variable map. Unknown
    /// variables are ignored; empty values count as unset.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self> {
        let get = |key: &str| vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());
        let mut cfg = Self::default();

        if let Some(v) = get("PREVIEW_BASE_DOMAIN") {
            cfg.base_domain = v.to_string();
        }
        if let Some(v) = get("PREVIEW_APP_IMAGE") {
            cfg.app_image = v.to_string();
        }
        if let Some(v) = get("PREVIEW_DB_IMAGE") {
            cfg.db_image = v.to_string();
        }
        if let Some(v) = get("PREVIEW_INGRESS_CLASS") {
            cfg.ingress_class = Some(v.to_string());
        }
        if let Some(v) = get("PREVIEW_FIELD_MANAGER") {
            cfg.field_manager = v.to_string();
        }
        if let Some(v) = get("PREVIEW_WATCH_NAMESPACE") {
            cfg.watch_namespace = Some(v.to_string());
        }
        if let Some(v) = get("PREVIEW_METRICS_ADDR") {
            cfg.metrics_addr = v.to_string();
        }
        if let Some(v) = get("PREVIEW_PRUNE_ORPHANS") {
            cfg.prune_orphans = parse_var("PREVIEW_PRUNE_ORPHANS", v)?;
        }
        if let Some(v) = get("PREVIEW_CONCURRENCY") {
            cfg.concurrency = parse_var("PREVIEW_CONCURRENCY", v)?;
        }
        if let Some(v) = get("PREVIEW_RESYNC_SECS") {
            cfg.resync_secs = parse_var("PREVIEW_RESYNC_SECS", v)?;
        }
        if let Some(v) = get("PREVIEW_BACKOFF_BASE_SECS") {
            cfg.backoff_base_secs = parse_var("PREVIEW_BACKOFF_BASE_SECS", v)?;
        }
        if let Some(v) = get("PREVIEW_BACKOFF_MAX_SECS") {
            cfg.backoff_max_secs = parse_var("PREVIEW_BACKOFF_MAX_SECS", v)?;
        }
        if let Some(v) = get("PREVIEW_JAEGER_AGENT") {
            cfg.jaeger_agent = Some(v.to_string());
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_domain.is_empty() {
            return Err(Error::Config("base domain must not be empty".to_string()));
        }
        if self.app_image.is_empty() || self.db_image.is_empty() {
            return Err(Error::Config("image references must not be empty".to_string()));
        }
        if self.field_manager.is_empty() {
            return Err(Error::Config("field manager must not be empty".to_string()));
        }
        if self.backoff_base_secs == 0 || self.backoff_base_secs > self.backoff_max_secs {
            return Err(Error::Config(format!(
                "backoff base ({}s) must be positive and not exceed the cap ({}s)",
                self.backoff_base_secs, self.backoff_max_secs
            )));
        }
        self.metrics_socket_addr()?;
        Ok(())
    }

    pub fn metrics_socket_addr(&self) -> Result<SocketAddr> {
        self.metrics_addr
            .parse()
            .map_err(|e| {
                Error::Config(format!("invalid metrics address '{}': {}", self.metrics_addr, e))
            })
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_secs)
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| Error::Config(format!("{key}='{value}': {e}")))
}
