//! ksync kubehub: discovery-backed dynamic clients for rendered documents.

#![forbid(unsafe_code)]

use std::sync::Arc;

use kube::{
    api::{Api, DeleteParams, Patch, PatchParams, PostParams},
    core::DynamicObject,
    Client,
};
use ksync_core::{Error, ResourceDocument, Result};
use once_cell::sync::Lazy;
use tokio::sync::OnceCell;
use tracing::debug;

mod discovery;

pub use discovery::{DiscoveryCache, DiscoverySource, KubeDiscovery, ResolvedTarget, ServerResource};

static KUBE_CLIENT: Lazy<OnceCell<Client>> = Lazy::new(OnceCell::new);

/// Process-wide kube client built from the ambient kubeconfig / in-cluster config.
pub async fn get_kube_client() -> Result<Client> {
    KUBE_CLIENT
        .get_or_try_init(|| async { Client::try_default().await })
        .await
        .cloned()
        .map_err(Error::transport)
}

fn is_not_found(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(ae) if ae.code == 404)
}

/// Maps documents to clients bound to the right endpoint and namespace.
pub struct ClientResolver {
    client: Client,
    cache: Arc<DiscoveryCache>,
    default_namespace: String,
}

impl ClientResolver {
    pub fn new(client: Client, cache: Arc<DiscoveryCache>, default_namespace: impl Into<String>) -> Self {
        Self { client, cache, default_namespace: default_namespace.into() }
    }

    /// Resolver with a fresh cache over live discovery. Falls back to the client's default namespace.
    pub fn for_client(client: Client, default_namespace: Option<String>) -> Self {
        let ns = default_namespace.unwrap_or_else(|| client.default_namespace().to_string());
        let cache = Arc::new(DiscoveryCache::new(Arc::new(KubeDiscovery::new(client.clone()))));
        Self::new(client, cache, ns)
    }

    pub fn default_namespace(&self) -> &str { &self.default_namespace }

    pub async fn resolve(&self, doc: &ResourceDocument) -> Result<ResolvedTarget> {
        self.cache.resolve(&doc.gvk(), doc.namespace(), &self.default_namespace).await
    }

    pub async fn client_for(&self, doc: &ResourceDocument) -> Result<ResourceClient> {
        let target = self.resolve(doc).await?;
        let ar = target.api_resource();
        debug!(resource = %target.resource.name, ns = ?target.namespace, "binding client");
        let api: Api<DynamicObject> = match target.namespace.as_deref() {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        };
        Ok(ResourceClient { api, target })
    }
}

/// A dynamic client bound to one resource type and namespace.
pub struct ResourceClient {
    api: Api<DynamicObject>,
    target: ResolvedTarget,
}

impl ResourceClient {
    pub fn target(&self) -> &ResolvedTarget { &self.target }

    /// The document as it should be sent: namespace defaulted for namespaced types.
    pub fn prepare(&self, doc: &ResourceDocument) -> ResourceDocument {
        match self.target.namespace.as_deref() {
            Some(ns) if doc.namespace().is_empty() => doc.with_namespace(ns),
            _ => doc.clone(),
        }
    }

    fn to_object(&self, doc: &ResourceDocument) -> Result<DynamicObject> {
        serde_json::from_value(self.prepare(doc).into_value())
            .map_err(|e| Error::Document(format!("{}: {}", doc.describe(), e)))
    }

    pub async fn create(&self, doc: &ResourceDocument) -> Result<DynamicObject> {
        let obj = self.to_object(doc)?;
        self.api.create(&PostParams::default(), &obj).await.map_err(Error::transport)
    }

    /// JSON merge patch of the live object. `Ok(None)` when it does not exist.
    pub async fn merge_patch(&self, doc: &ResourceDocument) -> Result<Option<DynamicObject>> {
        let body = self.prepare(doc).into_value();
        match self.api.patch(doc.name(), &PatchParams::default(), &Patch::Merge(&body)).await {
            Ok(obj) => Ok(Some(obj)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(Error::transport(e)),
        }
    }

    /// Foreground deletion. Returns `false` when the object was already gone.
    pub async fn delete(&self, name: &str) -> Result<bool> {
        match self.api.delete(name, &DeleteParams::foreground()).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(Error::transport(e)),
        }
    }
}
