/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/bin/crdgen.rs
*
* Prints the PreviewEnv CustomResourceDefinition as YAML so it can be piped
* into `kubectl apply -f -` or committed alongside the deployment manifests.
*
* SPDX-License-Identifier: Apache-2.0
*/

use kube::CustomResourceExt;
use preview_operator::crds::PreviewEnv;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&PreviewEnv::crd())?);
    Ok(())
}
