/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/controllers/preview_env/applier.rs
*
* Cluster access for the PreviewEnv controller.
*
* Architecture:
* - `PreviewKubeClient` is the seam between the reconciler and the API server.
*   `KubeClient` implements it over `kube::Client`; tests substitute a mock.
* - `apply_owned` stamps the PreviewEnv's controller owner reference on a child
*   and hands it to server-side apply with forced ownership. The API server's
*   garbage collector deletes every child once the PreviewEnv is gone, so the
*   controller carries no cascade-delete logic.
* - `prune_orphans` removes children this PreviewEnv still owns but no longer
*   wants, such as the database pair after `includeDB` is switched off.
*
* Nothing in this module retries. Errors go back to the reconciler untouched.
*
* SPDX-License-Identifier: Apache-2.0
*/

use std::collections::BTreeSet;
use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::runtime::events::{Event, EventType, Recorder};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use super::desired::{ChildKey, ChildKind, ChildResource, INSTANCE_LABEL, MANAGED_BY_LABEL};
use crate::crds::{PreviewEnv, PreviewEnvStatus};
use crate::error::{Error, Result};

/// Kubernetes operations the PreviewEnv reconciler depends on.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PreviewKubeClient: Send + Sync {
    /// Reads a PreviewEnv. `Ok(None)` means it no longer exists.
    async fn get_preview_env(&self, namespace: &str, name: &str) -> Result<Option<PreviewEnv>>;

    /// Server-side applies one child with forced field ownership.
    async fn apply_child(&self, child: &ChildResource) -> Result<()>;

    /// Merge-patches the status subresource of a PreviewEnv.
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &PreviewEnvStatus,
    ) -> Result<()>;

    /// Children in `namespace` labeled for `instance` whose controller owner is `owner_uid`.
    async fn list_owned_children(
        &self,
        namespace: &str,
        instance: &str,
        owner_uid: &str,
    ) -> Result<Vec<ChildKey>>;

    /// Deletes a child. A child that is already gone is not an error.
    async fn delete_child(&self, namespace: &str, key: &ChildKey) -> Result<()>;

    /// Records a Warning event on the PreviewEnv.
    async fn publish_warning(&self, env: &PreviewEnv, reason: &str, note: &str) -> Result<()>;
}

pub struct KubeClient {
    client: Client,
    field_manager: String,
    recorder: Recorder,
}

impl KubeClient {
    pub fn new(client: Client, field_manager: &str) -> Self {
        Self {
            recorder: Recorder::new(client.clone(), field_manager.to_string().into()),
            client,
            field_manager: field_manager.to_string(),
        }
    }

    async fn list_owned<K>(
        &self,
        namespace: &str,
        params: &ListParams,
        owner_uid: &str,
        kind: ChildKind,
    ) -> Result<Vec<ChildKey>>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(params).await?;
        Ok(list
            .items
            .iter()
            .filter(|obj| owned_by(obj.meta(), owner_uid))
            .map(|obj| ChildKey::new(kind, obj.name_any()))
            .collect())
    }

    async fn delete<K>(&self, namespace: &str, name: &str) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        if !deleted_unless_missing(api.delete(name, &DeleteParams::background()).await)? {
            debug!(%namespace, %name, "child already deleted");
        }
        Ok(())
    }
}

#[async_trait]
impl PreviewKubeClient for KubeClient {
    async fn get_preview_env(&self, namespace: &str, name: &str) -> Result<Option<PreviewEnv>> {
        let api: Api<PreviewEnv> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn apply_child(&self, child: &ChildResource) -> Result<()> {
        let namespace = child.namespace().ok_or(Error::MissingObjectKey("namespace"))?;
        let name = child.name();
        let params = apply_params(&self.field_manager);

        match child {
            ChildResource::Deployment(obj) => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
                api.patch(name, &params, &Patch::Apply(obj)).await?;
            }
            ChildResource::Service(obj) => {
                let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
                api.patch(name, &params, &Patch::Apply(obj)).await?;
            }
            ChildResource::Ingress(obj) => {
                let api: Api<Ingress> = Api::namespaced(self.client.clone(), namespace);
                api.patch(name, &params, &Patch::Apply(obj)).await?;
            }
        }
        Ok(())
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &PreviewEnvStatus,
    ) -> Result<()> {
        let api: Api<PreviewEnv> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "status": status });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn list_owned_children(
        &self,
        namespace: &str,
        instance: &str,
        owner_uid: &str,
    ) -> Result<Vec<ChildKey>> {
        let params = ListParams::default().labels(&format!(
            "{INSTANCE_LABEL}={instance},{MANAGED_BY_LABEL}={}",
            self.field_manager
        ));

        let mut keys = self
            .list_owned::<Deployment>(namespace, &params, owner_uid, ChildKind::Deployment)
            .await?;
        keys.extend(
            self.list_owned::<Service>(namespace, &params, owner_uid, ChildKind::Service)
                .await?,
        );
        keys.extend(
            self.list_owned::<Ingress>(namespace, &params, owner_uid, ChildKind::Ingress)
                .await?,
        );
        Ok(keys)
    }

    async fn delete_child(&self, namespace: &str, key: &ChildKey) -> Result<()> {
        match key.kind {
            ChildKind::Deployment => self.delete::<Deployment>(namespace, &key.name).await,
            ChildKind::Service => self.delete::<Service>(namespace, &key.name).await,
            ChildKind::Ingress => self.delete::<Ingress>(namespace, &key.name).await,
        }
    }

    async fn publish_warning(&self, env: &PreviewEnv, reason: &str, note: &str) -> Result<()> {
        self.recorder
            .publish(
                &Event {
                    type_: EventType::Warning,
                    reason: reason.to_string(),
                    note: Some(note.to_string()),
                    action: "Reconcile".to_string(),
                    secondary: None,
                },
                &env.object_ref(&()),
            )
            .await?;
        Ok(())
    }
}

/// Server-side apply under `field_manager`, taking over fields other managers hold.
pub fn apply_params(field_manager: &str) -> PatchParams {
    PatchParams::apply(field_manager).force()
}

/// Returns whether a delete removed the object; a 404 means it was already gone.
fn deleted_unless_missing<T>(result: std::result::Result<T, kube::Error>) -> Result<bool> {
    match result {
        Ok(_) => Ok(true),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// True when `meta` names `owner_uid` as its controlling owner.
pub fn owned_by(meta: &ObjectMeta, owner_uid: &str) -> bool {
    meta.owner_references
        .iter()
        .flatten()
        .any(|r| r.uid == owner_uid && r.controller == Some(true))
}

/// Stamps `owner` on `child` and applies it. Returns the key of the applied child.
pub async fn apply_owned(
    kube: &dyn PreviewKubeClient,
    mut child: ChildResource,
    owner: &OwnerReference,
) -> Result<ChildKey> {
    child.set_owner(owner.clone());
    let key = child.key();
    kube.apply_child(&child).await?;
    debug!(child = %key, "applied");
    Ok(key)
}

/// Deletes every child owned by `owner_uid` that is not in `desired`.
pub async fn prune_orphans(
    kube: &dyn PreviewKubeClient,
    namespace: &str,
    instance: &str,
    owner_uid: &str,
    desired: &BTreeSet<ChildKey>,
) -> Result<Vec<ChildKey>> {
    let mut pruned = Vec::new();
    for key in kube.list_owned_children(namespace, instance, owner_uid).await? {
        if desired.contains(&key) {
            continue;
        }
        kube.delete_child(namespace, &key).await?;
        info!(child = %key, %namespace, "pruned child that is no longer desired");
        pruned.push(key);
    }
    Ok(pruned)
}
