/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/error.rs
*
* Error type shared by the PreviewEnv controller. Kubernetes API failures are
* carried through unchanged so the controller runtime can requeue them.
*
* SPDX-License-Identifier: Apache-2.0
*/

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Object is missing metadata.{0}")]
    MissingObjectKey(&'static str),

    #[error("Metrics registry error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Short label used for the `result` dimension of the reconcile metric.
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::KubeError(_) => "kube_error",
            Error::MissingObjectKey(_) => "missing_key",
            Error::Metrics(_) => "metrics_error",
            Error::Config(_) => "config_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
