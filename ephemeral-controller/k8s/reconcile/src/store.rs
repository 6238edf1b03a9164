//! Access to cluster objects.

use ephemeral_controller_k8s_api::{
    labels, EphemeralApplication, EphemeralApplicationStatus, Namespace, Resource,
};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error(transparent)]
    Kube(#[from] kube::Error),
}

/// A namespaced object the store can read and write.
pub trait Object:
    Resource<Scope = NamespaceResourceScope, DynamicType = ()>
    + Clone
    + Debug
    + DeserializeOwned
    + Serialize
    + Send
    + Sync
    + 'static
{
}

impl<T> Object for T where
    T: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
        + 'static
{
}

/// The cluster operations the reconciler depends on.
///
/// Implementations must be safe to share between concurrent passes. Deletes
/// report [`Error::NotFound`] for absent objects and creates report
/// [`Error::AlreadyExists`] so that callers decide what to tolerate.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<K>;

    async fn create<K: Object>(&self, namespace: &str, obj: &K) -> Result<K>;

    async fn replace<K: Object>(&self, namespace: &str, name: &str, obj: &K) -> Result<K>;

    async fn delete<K: Object>(&self, namespace: &str, name: &str) -> Result<()>;

    /// Overwrites the record's finalizers, failing if the record changed since
    /// it was read.
    async fn set_finalizers(
        &self,
        app: &EphemeralApplication,
        finalizers: Vec<String>,
    ) -> Result<EphemeralApplication>;

    async fn patch_status(
        &self,
        app: &EphemeralApplication,
        status: &EphemeralApplicationStatus,
    ) -> Result<()>;

    async fn create_namespace(&self, ns: &Namespace) -> Result<()>;

    /// Finds a namespace carrying all of `labels` whose deletion has not
    /// begun.
    async fn find_namespace(&self, labels: &labels::Map) -> Result<Option<String>>;

    async fn delete_namespace(&self, name: &str) -> Result<()>;
}

/// A [`Store`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeStore {
    client: kube::Client,
    params: PatchParams,
}

const FIELD_MANAGER: &str = "argo-ephemeral-controller";

// === impl Error ===

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    fn from_kube(error: kube::Error, what: impl FnOnce() -> String) -> Self {
        match error {
            kube::Error::Api(rsp) if rsp.code == 404 => Self::NotFound(what()),
            kube::Error::Api(rsp) if rsp.code == 409 && rsp.reason == "AlreadyExists" => {
                Self::AlreadyExists(what())
            }
            error => Self::Kube(error),
        }
    }
}

// === impl KubeStore ===

impl KubeStore {
    pub fn new(client: kube::Client) -> Self {
        Self {
            client,
            params: PatchParams {
                field_manager: Some(FIELD_MANAGER.to_string()),
                ..Default::default()
            },
        }
    }

    fn api<K: Object>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn records(&self, app: &EphemeralApplication) -> Api<EphemeralApplication> {
        self.api(app.metadata.namespace.as_deref().unwrap_or_default())
    }
}

fn describe<K: Object>(namespace: &str, name: &str) -> String {
    format!("{} {namespace}/{name}", K::kind(&()))
}

#[async_trait::async_trait]
impl Store for KubeStore {
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<K> {
        self.api(namespace)
            .get(name)
            .await
            .map_err(|e| Error::from_kube(e, || describe::<K>(namespace, name)))
    }

    async fn create<K: Object>(&self, namespace: &str, obj: &K) -> Result<K> {
        self.api(namespace)
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| {
                Error::from_kube(e, || {
                    describe::<K>(namespace, obj.meta().name.as_deref().unwrap_or_default())
                })
            })
    }

    async fn replace<K: Object>(&self, namespace: &str, name: &str, obj: &K) -> Result<K> {
        self.api(namespace)
            .replace(name, &PostParams::default(), obj)
            .await
            .map_err(|e| Error::from_kube(e, || describe::<K>(namespace, name)))
    }

    async fn delete<K: Object>(&self, namespace: &str, name: &str) -> Result<()> {
        self.api::<K>(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| Error::from_kube(e, || describe::<K>(namespace, name)))
    }

    async fn set_finalizers(
        &self,
        app: &EphemeralApplication,
        finalizers: Vec<String>,
    ) -> Result<EphemeralApplication> {
        let name = app.metadata.name.as_deref().unwrap_or_default();
        // The resource version makes the patch fail on a stale read rather than
        // clobbering finalizers written by someone else.
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": app.metadata.resource_version,
            }
        });
        self.records(app)
            .patch(name, &self.params, &Patch::Merge(&patch))
            .await
            .map_err(|e| {
                Error::from_kube(e, || {
                    describe::<EphemeralApplication>(
                        app.metadata.namespace.as_deref().unwrap_or_default(),
                        name,
                    )
                })
            })
    }

    async fn patch_status(
        &self,
        app: &EphemeralApplication,
        status: &EphemeralApplicationStatus,
    ) -> Result<()> {
        let name = app.metadata.name.as_deref().unwrap_or_default();
        let patch = serde_json::json!({ "status": status });
        self.records(app)
            .patch_status(name, &self.params, &Patch::Merge(&patch))
            .await
            .map(|_| ())
            .map_err(|e| {
                Error::from_kube(e, || {
                    describe::<EphemeralApplication>(
                        app.metadata.namespace.as_deref().unwrap_or_default(),
                        name,
                    )
                })
            })
    }

    async fn create_namespace(&self, ns: &Namespace) -> Result<()> {
        let name = ns.metadata.name.as_deref().unwrap_or_default();
        Api::<Namespace>::all(self.client.clone())
            .create(&PostParams::default(), ns)
            .await
            .map(|_| ())
            .map_err(|e| Error::from_kube(e, || format!("Namespace {name}")))
    }

    async fn find_namespace(&self, labels: &labels::Map) -> Result<Option<String>> {
        let params = ListParams::default().labels(&labels::selector(labels));
        let namespaces = Api::<Namespace>::all(self.client.clone())
            .list(&params)
            .await?;
        Ok(namespaces
            .items
            .into_iter()
            .filter(|ns| ns.metadata.deletion_timestamp.is_none())
            .find_map(|ns| ns.metadata.name))
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        Api::<Namespace>::all(self.client.clone())
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| Error::from_kube(e, || format!("Namespace {name}")))
    }
}
