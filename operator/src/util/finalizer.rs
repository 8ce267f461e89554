use super::{CONFLICT_RETRIES, Error};
use kube::{
    Api, Client, ResourceExt,
    api::{Patch, PatchParams, Resource},
    core::NamespaceResourceScope,
};
use serde::{Serialize, de::DeserializeOwned};
use std::fmt::Debug;

/// Add the given finalizer to the resource if it is not already present.
/// The write carries the observed resourceVersion so a concurrent change
/// surfaces as a conflict; conflicts re-fetch and retry a bounded number
/// of times.
pub async fn ensure_finalizer<K>(client: Client, instance: &K, finalizer: &str) -> Result<(), Error>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Serialize
        + DeserializeOwned
        + Debug,
{
    if instance.finalizers().iter().any(|f| f == finalizer) {
        return Ok(());
    }
    mutate_finalizers(client, instance, |finalizers| {
        if !finalizers.iter().any(|f| f == finalizer) {
            finalizers.push(finalizer.to_string());
        }
    })
    .await
}

/// Remove the given finalizer, unblocking platform-side deletion. Called
/// only after owned-object cleanup has run.
pub async fn remove_finalizer<K>(client: Client, instance: &K, finalizer: &str) -> Result<(), Error>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Serialize
        + DeserializeOwned
        + Debug,
{
    if !instance.finalizers().iter().any(|f| f == finalizer) {
        return Ok(());
    }
    mutate_finalizers(client, instance, |finalizers| {
        finalizers.retain(|f| f != finalizer);
    })
    .await
}

/// Strip every finalizer from an owned object so that deleting it is not
/// blocked by a stale entry left behind by a crashed controller.
pub async fn clear_finalizers<K>(api: &Api<K>, name: &str) -> Result<(), Error>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Serialize
        + DeserializeOwned
        + Debug,
{
    let patch = serde_json::json!({"metadata": {"finalizers": null}});
    match api.patch(name, &PatchParams::default(), &Patch::Merge(&patch)).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn mutate_finalizers<K>(
    client: Client,
    instance: &K,
    mutate: impl Fn(&mut Vec<String>),
) -> Result<(), Error>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Serialize
        + DeserializeOwned
        + Debug,
{
    let name = instance
        .meta()
        .name
        .clone()
        .ok_or_else(|| Error::UserInput("resource is missing metadata.name".to_string()))?;
    let namespace = instance
        .meta()
        .namespace
        .clone()
        .ok_or_else(|| Error::UserInput("resource is missing metadata.namespace".to_string()))?;
    let api: Api<K> = Api::namespaced(client, &namespace);

    let mut current = instance.clone();
    for _ in 0..CONFLICT_RETRIES {
        let mut finalizers = current.finalizers().to_vec();
        let before = finalizers.clone();
        mutate(&mut finalizers);
        if finalizers == before {
            return Ok(());
        }
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": current.resource_version(),
            }
        });
        match api
            .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => return Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                current = api.get(&name).await?;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(Error::StatusConflict(name, CONFLICT_RETRIES))
}
