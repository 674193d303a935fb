/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/crds.rs
*
* This file defines the `PreviewEnv` Custom Resource. A PreviewEnv is created by
* pull request automation and declares which image tag to run for a given pull
* request and whether the environment needs its own database.
*
* Architecture:
* - The `#[kube(...)]` attribute maps the struct to the
*   `previewenvs.core.gearpit.io` CRD. The printer columns mirror what
*   `kubectl get previewenvs` shows for existing installations.
* - `spec` holds the requester's intent. `status` is written only by the
*   controller and is always derivable from `spec`.
* - `schemars` attributes carry the server-side validation rules (minimum PR
*   number, non-empty image tag, `includeDB` defaulting to true).
*
* SPDX-License-Identifier: Apache-2.0
*/

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "core.gearpit.io",
    version = "v1alpha1",
    kind = "PreviewEnv",
    plural = "previewenvs",
    namespaced,
    status = "PreviewEnvStatus",
    printcolumn = r#"{"name":"PR", "type":"integer", "jsonPath":".spec.prNumber"}"#,
    printcolumn = r#"{"name":"URL", "type":"string", "jsonPath":".status.url"}"#,
    printcolumn = r#"{"name":"Available", "type":"boolean", "jsonPath":".status.available"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PreviewEnvSpec {
    /// The pull request number.
    #[schemars(range(min = 1))]
    pub pr_number: i64,

    /// The container image tag to deploy.
    #[schemars(length(min = 1))]
    pub image_tag: String,

    /// Whether to provision a dedicated database.
    #[serde(rename = "includeDB", default = "default_include_db")]
    pub include_db: bool,
}

fn default_include_db() -> bool {
    true
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PreviewEnvStatus {
    /// The generated access point.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,

    /// Set once every child resource has been applied without error.
    #[serde(default)]
    pub available: bool,
}

impl PreviewEnvSpec {
    /// Externally reachable host for this preview: `pr-<prNumber>.<base_domain>`.
    pub fn host(&self, base_domain: &str) -> String {
        format!("pr-{}.{}", self.pr_number, base_domain)
    }
}

impl PreviewEnv {
    pub fn host(&self, base_domain: &str) -> String {
        self.spec.host(base_domain)
    }

    /// The status a fully converged PreviewEnv reports.
    pub fn desired_status(&self, base_domain: &str) -> PreviewEnvStatus {
        PreviewEnvStatus {
            url: self.host(base_domain),
            available: true,
        }
    }

    /// The stored status, treating a missing subresource as the zero value.
    pub fn current_status(&self) -> PreviewEnvStatus {
        self.status.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn test_include_db_defaults_to_true() {
        let spec: PreviewEnvSpec =
            serde_json::from_str(r#"{"prNumber": 7, "imageTag": "abc123"}"#).unwrap();
        assert!(spec.include_db);
        assert_eq!(spec.pr_number, 7);
        assert_eq!(spec.image_tag, "abc123");
    }

    #[test]
    fn test_spec_uses_wire_field_names() {
        let spec = PreviewEnvSpec {
            pr_number: 42,
            image_tag: "v1.2.3".to_string(),
            include_db: false,
        };
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"prNumber": 42, "imageTag": "v1.2.3", "includeDB": false})
        );
    }

    #[test]
    fn test_status_omits_empty_url() {
        let value = serde_json::to_value(PreviewEnvStatus::default()).unwrap();
        assert_eq!(value, serde_json::json!({"available": false}));
    }

    #[test]
    fn test_host_ignores_image_tag_and_db_flag() {
        let a = PreviewEnvSpec {
            pr_number: 42,
            image_tag: "v1".to_string(),
            include_db: true,
        };
        let b = PreviewEnvSpec {
            pr_number: 42,
            image_tag: "v2".to_string(),
            include_db: false,
        };
        assert_eq!(a.host("gearpit.nip.io"), "pr-42.gearpit.nip.io");
        assert_eq!(a.host("gearpit.nip.io"), b.host("gearpit.nip.io"));
    }

    #[test]
    fn test_crd_metadata() {
        let crd = PreviewEnv::crd();
        assert_eq!(crd.metadata.name.as_deref(), Some("previewenvs.core.gearpit.io"));
        assert_eq!(crd.spec.names.kind, "PreviewEnv");
        assert_eq!(crd.spec.scope, "Namespaced");

        let version = &crd.spec.versions[0];
        assert_eq!(version.name, "v1alpha1");
        let columns = version.additional_printer_columns.as_ref().unwrap();
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["PR", "URL", "Available", "Age"]);
    }

    #[test]
    fn test_crd_schema_enforces_field_rules() {
        let crd = PreviewEnv::crd();
        let version = &crd.spec.versions[0];
        assert!(version.subresources.as_ref().unwrap().status.is_some());

        let schema = version.schema.as_ref().unwrap().open_api_v3_schema.as_ref().unwrap();
        let schema = serde_json::to_value(schema).unwrap();
        let spec = &schema["properties"]["spec"];
        let fields = &spec["properties"];
        assert_eq!(fields["prNumber"]["minimum"].as_f64(), Some(1.0));
        assert_eq!(fields["imageTag"]["minLength"].as_i64(), Some(1));
        assert_eq!(fields["includeDB"]["default"], serde_json::json!(true));

        let required: Vec<&str> = spec["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert!(required.contains(&"prNumber"));
        assert!(required.contains(&"imageTag"));
        assert!(!required.contains(&"includeDB"));
    }
}
