/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/controllers/preview_env/desired.rs
*
* Desired-state builder for a PreviewEnv. Given the intent's identity and spec
* it produces the complete set of child objects the cluster should contain:
*
* - `<name>-app` Deployment and Service running the requested image tag.
* - `<name>` Ingress routing `pr-<prNumber>.<base-domain>` to the app Service.
* - `<name>-db` Deployment and Service, only when `includeDB` is set.
*
* Every function here is pure. Nothing reads the cluster, and all label maps
* are `BTreeMap`s, so the same input always serializes to the same bytes.
* Owner references are not set here; the applier stamps them.
*
* SPDX-License-Identifier: Apache-2.0
*/

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::config::OperatorConfig;
use crate::crds::PreviewEnvSpec;

pub const APP_PORT: i32 = 8080;
pub const APP_SERVICE_PORT: i32 = 80;
pub const DB_PORT: i32 = 5432;

pub const INSTANCE_LABEL: &str = "instance";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

const APP_LABEL_VALUE: &str = "gearpit-app";
const DB_LABEL_VALUE: &str = "gearpit-db";
const DB_CREDENTIAL: &str = "gearpit";

/// Name of the app Deployment and Service.
pub fn app_name(instance: &str) -> String {
    format!("{instance}-app")
}

/// Name of the database Deployment and Service. The app's `DB_HOST` points here.
pub fn db_name(instance: &str) -> String {
    format!("{instance}-db")
}

/// Settings that shape every child but are not part of a PreviewEnv's spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildTemplates {
    pub base_domain: String,
    pub app_image: String,
    pub db_image: String,
    pub ingress_class: Option<String>,
    pub managed_by: String,
}

impl From<&OperatorConfig> for ChildTemplates {
    fn from(cfg: &OperatorConfig) -> Self {
        Self {
            base_domain: cfg.base_domain.clone(),
            app_image: cfg.app_image.clone(),
            db_image: cfg.db_image.clone(),
            ingress_class: cfg.ingress_class.clone(),
            managed_by: cfg.field_manager.clone(),
        }
    }
}

impl Default for ChildTemplates {
    fn default() -> Self {
        Self::from(&OperatorConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChildKind {
    Deployment,
    Service,
    Ingress,
}

impl fmt::Display for ChildKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChildKind::Deployment => "Deployment",
            ChildKind::Service => "Service",
            ChildKind::Ingress => "Ingress",
        };
        f.write_str(s)
    }
}

/// Identity of a child within its namespace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChildKey {
    pub kind: ChildKind,
    pub name: String,
}

impl ChildKey {
    pub fn new(kind: ChildKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for ChildKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// One typed child object, ready to be applied.
#[derive(Debug, Clone, PartialEq)]
pub enum ChildResource {
    Deployment(Deployment),
    Service(Service),
    Ingress(Ingress),
}

impl ChildResource {
    pub fn kind(&self) -> ChildKind {
        match self {
            ChildResource::Deployment(_) => ChildKind::Deployment,
            ChildResource::Service(_) => ChildKind::Service,
            ChildResource::Ingress(_) => ChildKind::Ingress,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            ChildResource::Deployment(d) => &d.metadata,
            ChildResource::Service(s) => &s.metadata,
            ChildResource::Ingress(i) => &i.metadata,
        }
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            ChildResource::Deployment(d) => &mut d.metadata,
            ChildResource::Service(s) => &mut s.metadata,
            ChildResource::Ingress(i) => &mut i.metadata,
        }
    }

    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata().namespace.as_deref()
    }

    pub fn key(&self) -> ChildKey {
        ChildKey::new(self.kind(), self.name())
    }

    /// Replaces any owner references with exactly `owner`.
    pub fn set_owner(&mut self, owner: OwnerReference) {
        self.metadata_mut().owner_references = Some(vec![owner]);
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        match self {
            ChildResource::Deployment(d) => serde_json::to_vec(d),
            ChildResource::Service(s) => serde_json::to_vec(s),
            ChildResource::Ingress(i) => serde_json::to_vec(i),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseChildren {
    pub deployment: Deployment,
    pub service: Service,
}

/// Everything a PreviewEnv should own.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredState {
    pub app_deployment: Deployment,
    pub app_service: Service,
    pub ingress: Ingress,
    pub database: Option<DatabaseChildren>,
}

impl DesiredState {
    /// Children in apply order: app deployment, app service, ingress, then the database pair.
    pub fn into_ordered(self) -> Vec<ChildResource> {
        let mut children = vec![
            ChildResource::Deployment(self.app_deployment),
            ChildResource::Service(self.app_service),
            ChildResource::Ingress(self.ingress),
        ];
        if let Some(db) = self.database {
            children.push(ChildResource::Deployment(db.deployment));
            children.push(ChildResource::Service(db.service));
        }
        children
    }

    pub fn keys(&self) -> BTreeSet<ChildKey> {
        self.clone().into_ordered().iter().map(ChildResource::key).collect()
    }
}

/// Builds the full desired child set for the PreviewEnv `name` in `namespace`.
pub fn build(
    name: &str,
    namespace: &str,
    spec: &PreviewEnvSpec,
    templates: &ChildTemplates,
) -> DesiredState {
    let app = app_name(name);
    let app_selector = selector_labels(APP_LABEL_VALUE, name);

    DesiredState {
        app_deployment: app_deployment(name, namespace, spec, templates),
        app_service: service(
            &app,
            namespace,
            &app_selector,
            object_labels(&app_selector, templates),
            APP_SERVICE_PORT,
            APP_PORT,
        ),
        ingress: ingress(name, namespace, spec, templates),
        database: spec.include_db.then(|| database(name, namespace, templates)),
    }
}

fn selector_labels(app: &str, instance: &str) -> BTreeMap<String, String> {
    [
        ("app".to_string(), app.to_string()),
        (INSTANCE_LABEL.to_string(), instance.to_string()),
    ]
    .into()
}

fn object_labels(
    selector: &BTreeMap<String, String>,
    templates: &ChildTemplates,
) -> BTreeMap<String, String> {
    let mut labels = selector.clone();
    labels.insert(MANAGED_BY_LABEL.to_string(), templates.managed_by.clone());
    labels
}

fn object_meta(name: &str, namespace: &str, labels: BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels),
        ..Default::default()
    }
}

fn deployment(
    name: &str,
    namespace: &str,
    selector: BTreeMap<String, String>,
    templates: &ChildTemplates,
    container: Container,
) -> Deployment {
    Deployment {
        metadata: object_meta(name, namespace, object_labels(&selector, templates)),
        spec: Some(DeploymentSpec {
            selector: LabelSelector {
                match_labels: Some(selector.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(selector),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn app_deployment(
    name: &str,
    namespace: &str,
    spec: &PreviewEnvSpec,
    templates: &ChildTemplates,
) -> Deployment {
    let container = Container {
        name: "app".to_string(),
        image: Some(format!("{}:{}", templates.app_image, spec.image_tag)),
        ports: Some(vec![ContainerPort {
            container_port: APP_PORT,
            ..Default::default()
        }]),
        env: Some(vec![env_var("DB_HOST", &db_name(name))]),
        ..Default::default()
    };
    deployment(
        &app_name(name),
        namespace,
        selector_labels(APP_LABEL_VALUE, name),
        templates,
        container,
    )
}

fn service(
    name: &str,
    namespace: &str,
    selector: &BTreeMap<String, String>,
    labels: BTreeMap<String, String>,
    port: i32,
    target_port: i32,
) -> Service {
    Service {
        metadata: object_meta(name, namespace, labels),
        spec: Some(ServiceSpec {
            selector: Some(selector.clone()),
            ports: Some(vec![ServicePort {
                port,
                target_port: Some(IntOrString::Int(target_port)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn ingress(
    name: &str,
    namespace: &str,
    spec: &PreviewEnvSpec,
    templates: &ChildTemplates,
) -> Ingress {
    let selector = selector_labels(APP_LABEL_VALUE, name);
    Ingress {
        metadata: object_meta(name, namespace, object_labels(&selector, templates)),
        spec: Some(IngressSpec {
            ingress_class_name: templates.ingress_class.clone(),
            rules: Some(vec![IngressRule {
                host: Some(spec.host(&templates.base_domain)),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/".to_string()),
                        path_type: "Prefix".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: app_name(name),
                                port: Some(ServiceBackendPort {
                                    number: Some(APP_SERVICE_PORT),
                                    ..Default::default()
                                }),
                            }),
                            ..Default::default()
                        },
                    }],
                }),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn database(name: &str, namespace: &str, templates: &ChildTemplates) -> DatabaseChildren {
    let db = db_name(name);
    let selector = selector_labels(DB_LABEL_VALUE, name);
    let container = Container {
        name: "postgres".to_string(),
        image: Some(templates.db_image.clone()),
        env: Some(vec![
            env_var("POSTGRES_USER", DB_CREDENTIAL),
            env_var("POSTGRES_PASSWORD", DB_CREDENTIAL),
            env_var("POSTGRES_DB", DB_CREDENTIAL),
        ]),
        ports: Some(vec![ContainerPort {
            container_port: DB_PORT,
            ..Default::default()
        }]),
        ..Default::default()
    };

    DatabaseChildren {
        deployment: deployment(&db, namespace, selector.clone(), templates, container),
        service: service(
            &db,
            namespace,
            &selector,
            object_labels(&selector, templates),
            DB_PORT,
            DB_PORT,
        ),
    }
}

fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(include_db: bool) -> PreviewEnvSpec {
        PreviewEnvSpec {
            pr_number: 42,
            image_tag: "v1.2.3".to_string(),
            include_db,
        }
    }

    fn container(deploy: &Deployment) -> &Container {
        &deploy
            .spec
            .as_ref()
            .unwrap()
            .template
            .spec
            .as_ref()
            .unwrap()
            .containers[0]
    }

    #[test]
    fn test_build_is_byte_identical_across_calls() {
        let templates = ChildTemplates::default();
        let first: Vec<Vec<u8>> = build("pr-42", "previews", &spec(true), &templates)
            .into_ordered()
            .iter()
            .map(|c| c.to_json().unwrap())
            .collect();
        let second: Vec<Vec<u8>> = build("pr-42", "previews", &spec(true), &templates)
            .into_ordered()
            .iter()
            .map(|c| c.to_json().unwrap())
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_children_in_apply_order_with_database() {
        let keys: Vec<String> = build("pr-42", "previews", &spec(true), &ChildTemplates::default())
            .into_ordered()
            .iter()
            .map(|c| c.key().to_string())
            .collect();
        assert_eq!(
            keys,
            vec![
                "Deployment/pr-42-app",
                "Service/pr-42-app",
                "Ingress/pr-42",
                "Deployment/pr-42-db",
                "Service/pr-42-db",
            ]
        );
    }

    #[test]
    fn test_database_omitted_when_not_requested() {
        let desired = build("pr-42", "previews", &spec(false), &ChildTemplates::default());
        assert!(desired.database.is_none());
        let children = desired.into_ordered();
        assert_eq!(children.len(), 3);
        assert!(children.iter().all(|c| !c.name().ends_with("-db")));
    }

    #[test]
    fn test_exactly_one_database_pair_named_db() {
        let desired = build("pr-42", "previews", &spec(true), &ChildTemplates::default());
        let db_keys: Vec<ChildKey> = desired
            .keys()
            .into_iter()
            .filter(|k| k.name == "pr-42-db")
            .collect();
        assert_eq!(
            db_keys,
            vec![
                ChildKey::new(ChildKind::Deployment, "pr-42-db"),
                ChildKey::new(ChildKind::Service, "pr-42-db"),
            ]
        );

        let db = desired.database.unwrap();
        let c = container(&db.deployment);
        assert_eq!(c.image.as_deref(), Some("postgres:15-alpine"));
        assert_eq!(c.ports.as_ref().unwrap()[0].container_port, 5432);
        let svc_port = &db.service.spec.as_ref().unwrap().ports.as_ref().unwrap()[0];
        assert_eq!(svc_port.port, 5432);
        assert_eq!(svc_port.target_port, Some(IntOrString::Int(5432)));
    }

    #[test]
    fn test_app_deployment_uses_image_tag_and_db_host() {
        let desired = build("pr-42", "previews", &spec(true), &ChildTemplates::default());
        let deploy = &desired.app_deployment;
        assert_eq!(deploy.metadata.name.as_deref(), Some("pr-42-app"));
        assert_eq!(deploy.metadata.namespace.as_deref(), Some("previews"));

        let c = container(deploy);
        assert_eq!(c.name, "app");
        assert_eq!(c.image.as_deref(), Some("ghcr.io/nordiwnd/gearpit/app:v1.2.3"));
        assert_eq!(c.ports.as_ref().unwrap()[0].container_port, 8080);
        let env = c.env.as_ref().unwrap();
        assert_eq!(env[0].name, "DB_HOST");
        assert_eq!(env[0].value.as_deref(), Some("pr-42-db"));
    }

    #[test]
    fn test_selectors_exclude_managed_by_label() {
        let desired = build("pr-42", "previews", &spec(false), &ChildTemplates::default());
        let deploy_spec = desired.app_deployment.spec.as_ref().unwrap();
        let selector = deploy_spec.selector.match_labels.as_ref().unwrap();
        assert_eq!(selector.get("app").map(String::as_str), Some("gearpit-app"));
        assert_eq!(selector.get("instance").map(String::as_str), Some("pr-42"));
        assert!(!selector.contains_key(MANAGED_BY_LABEL));

        let labels = desired.app_deployment.metadata.labels.as_ref().unwrap();
        assert_eq!(
            labels.get(MANAGED_BY_LABEL).map(String::as_str),
            Some("preview-env-controller")
        );

        let svc_spec = desired.app_service.spec.as_ref().unwrap();
        assert_eq!(svc_spec.selector.as_ref(), Some(selector));
        let port = &svc_spec.ports.as_ref().unwrap()[0];
        assert_eq!(port.port, 80);
        assert_eq!(port.target_port, Some(IntOrString::Int(8080)));
    }

    #[test]
    fn test_ingress_routes_host_to_app_service() {
        let desired = build("pr-42", "previews", &spec(true), &ChildTemplates::default());
        assert_eq!(desired.ingress.metadata.name.as_deref(), Some("pr-42"));

        let rule = &desired.ingress.spec.as_ref().unwrap().rules.as_ref().unwrap()[0];
        assert_eq!(rule.host.as_deref(), Some("pr-42.gearpit.nip.io"));
        let path = &rule.http.as_ref().unwrap().paths[0];
        assert_eq!(path.path.as_deref(), Some("/"));
        assert_eq!(path.path_type, "Prefix");
        let backend = path.backend.service.as_ref().unwrap();
        assert_eq!(backend.name, "pr-42-app");
        assert_eq!(backend.port.as_ref().unwrap().number, Some(80));
    }

    #[test]
    fn test_ingress_class_and_domain_follow_templates() {
        let templates = ChildTemplates {
            base_domain: "preview.example.com".to_string(),
            ingress_class: Some("nginx".to_string()),
            ..ChildTemplates::default()
        };
        let desired = build("feature", "previews", &spec(false), &templates);
        let ingress_spec = desired.ingress.spec.as_ref().unwrap();
        assert_eq!(ingress_spec.ingress_class_name.as_deref(), Some("nginx"));
        assert_eq!(
            ingress_spec.rules.as_ref().unwrap()[0].host.as_deref(),
            Some("pr-42.preview.example.com")
        );
    }

    #[test]
    fn test_builder_sets_no_owner_references() {
        let children =
            build("pr-42", "previews", &spec(true), &ChildTemplates::default()).into_ordered();
        assert!(children.iter().all(|c| c.metadata().owner_references.is_none()));
    }
}
