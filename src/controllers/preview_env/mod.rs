/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/controllers/preview_env/mod.rs
*
* The PreviewEnv controller: desired-state builder, applier, reconciler and
* retry policy.
*
* SPDX-License-Identifier: Apache-2.0
*/

pub mod applier;
pub mod backoff;
pub mod desired;
pub mod reconciler;

pub use applier::{KubeClient, PreviewKubeClient};
pub use reconciler::{
    error_policy, reconcile, reconcile_preview_env, Context, Outcome, ReconcileSettings,
};
