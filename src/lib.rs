/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/lib.rs
*
* Library root of the preview operator. The binaries in this package and the
* unit tests reach the controller through these modules.
*
* SPDX-License-Identifier: Apache-2.0
*/

pub mod config;
pub mod crds;
pub mod error;
pub mod metrics;
pub mod telemetry;

pub mod controllers {
    pub mod preview_env;
}

pub use error::{Error, Result};
