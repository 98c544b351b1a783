//! Per group-version discovery cache and target resolution.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kube::core::ApiResource;
use kube::Client;
use ksync_core::{Error, Gvk, Result};
use metrics::counter;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::debug;

/// One served resource type of a group-version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerResource {
    pub kind: String,
    /// REST resource name (plural), e.g. `deployments`.
    pub name: String,
    pub namespaced: bool,
}

/// Answers "which resource types does the server serve for this group-version".
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    async fn server_resources(&self, group_version: &str) -> Result<Vec<ServerResource>>;
}

/// Discovery against a live API server.
#[derive(Clone)]
pub struct KubeDiscovery {
    client: Client,
}

impl KubeDiscovery {
    pub fn new(client: Client) -> Self { Self { client } }
}

#[async_trait]
impl DiscoverySource for KubeDiscovery {
    async fn server_resources(&self, group_version: &str) -> Result<Vec<ServerResource>> {
        let res = if group_version.contains('/') {
            self.client.list_api_group_resources(group_version).await
        } else {
            self.client.list_core_api_resources(group_version).await
        };
        let list = match res {
            Ok(list) => list,
            // Group-version not served at all: report it as serving nothing.
            Err(kube::Error::Api(ae)) if ae.code == 404 => return Ok(Vec::new()),
            Err(e) => return Err(Error::transport(e)),
        };
        Ok(list
            .resources
            .into_iter()
            .filter(|r| !r.name.contains('/'))
            .map(|r| ServerResource { kind: r.kind, name: r.name, namespaced: r.namespaced })
            .collect())
    }
}

type Entry = Arc<OnceCell<Arc<[ServerResource]>>>;

/// Lazily populated, process-lifetime discovery cache.
///
/// Concurrent lookups of one group-version share a single in-flight fetch. Failed
/// fetches are not cached. Nothing expires; call [`DiscoveryCache::invalidate`] for fresh data.
pub struct DiscoveryCache {
    source: Arc<dyn DiscoverySource>,
    entries: Mutex<FxHashMap<String, Entry>>,
}

impl DiscoveryCache {
    pub fn new(source: Arc<dyn DiscoverySource>) -> Self {
        Self { source, entries: Mutex::new(FxHashMap::default()) }
    }

    fn entry(&self, group_version: &str) -> Entry {
        let mut map = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        map.entry(group_version.to_string()).or_default().clone()
    }

    pub async fn server_resources(&self, group_version: &str) -> Result<Arc<[ServerResource]>> {
        let cell = self.entry(group_version);
        if let Some(hit) = cell.get() {
            counter!("discovery_cache_hit_total", 1u64);
            return Ok(hit.clone());
        }
        let source = &self.source;
        let resources = cell
            .get_or_try_init(|| async move {
                counter!("discovery_fetch_total", 1u64);
                debug!(gv = %group_version, "fetching server resources");
                source.server_resources(group_version).await.map(Arc::from)
            })
            .await?;
        Ok(resources.clone())
    }

    /// Seed an entry without asking the source.
    pub fn prime(&self, group_version: &str, resources: Vec<ServerResource>) {
        let mut map = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        map.insert(group_version.to_string(), Arc::new(OnceCell::new_with(Some(Arc::from(resources)))));
    }

    pub fn invalidate(&self) {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }

    pub fn invalidate_group_version(&self, group_version: &str) {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).remove(group_version);
    }

    /// Find the served resource for `gvk` and the namespace a client must be bound to.
    ///
    /// Namespaced types with an empty `namespace` get `default_namespace`; cluster-scoped
    /// types are never bound to a namespace.
    pub async fn resolve(&self, gvk: &Gvk, namespace: &str, default_namespace: &str) -> Result<ResolvedTarget> {
        let resources = self.server_resources(&gvk.group_version()).await?;
        let resource = resources
            .iter()
            .find(|r| r.kind == gvk.kind)
            .cloned()
            .ok_or_else(|| Error::SchemaMismatch { gvk: gvk.clone() })?;
        debug!(gvk = %gvk, resource = %resource.name, "chose API resource");

        let namespace = if resource.namespaced {
            let ns = if namespace.is_empty() { default_namespace } else { namespace };
            if ns.is_empty() {
                return Err(Error::Document(format!("{} is namespaced but no namespace was given", gvk)));
            }
            Some(ns.to_string())
        } else {
            None
        };
        Ok(ResolvedTarget { gvk: gvk.clone(), resource, namespace })
    }
}

/// Where a document lives on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub gvk: Gvk,
    pub resource: ServerResource,
    /// `None` for cluster-scoped types.
    pub namespace: Option<String>,
}

impl ResolvedTarget {
    pub fn api_resource(&self) -> ApiResource {
        ApiResource {
            group: self.gvk.group.clone(),
            version: self.gvk.version.clone(),
            api_version: self.gvk.group_version(),
            kind: self.gvk.kind.clone(),
            plural: self.resource.name.clone(),
        }
    }
}
