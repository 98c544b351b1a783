#![forbid(unsafe_code)]

use std::sync::Arc;

use ksync_core::{Error, ResourceDocument};
use ksync_kubehub::{ClientResolver, DiscoveryCache, DiscoverySource, KubeDiscovery};
use ksync_mockapi::MockApiServer;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

fn resolver(server: &MockApiServer, ns: &str) -> ClientResolver {
    ClientResolver::for_client(server.client(), Some(ns.to_string()))
}

#[tokio::test]
async fn live_discovery_lists_top_level_resources() {
    let server = MockApiServer::start().await;
    let disco = KubeDiscovery::new(server.client());

    let core = disco.server_resources("v1").await.unwrap();
    assert!(core.iter().all(|r| !r.name.contains('/')), "{:?}", core);
    let ns = core.iter().find(|r| r.kind == "Namespace").unwrap();
    assert_eq!((ns.name.as_str(), ns.namespaced), ("namespaces", false));
    let cm = core.iter().find(|r| r.kind == "ConfigMap").unwrap();
    assert!(cm.namespaced);

    let apps = disco.server_resources("apps/v1").await.unwrap();
    let names: Vec<_> = apps.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["deployments"]);
}

#[tokio::test]
async fn unserved_group_version_is_empty_and_server_errors_are_transport() {
    let server = MockApiServer::start().await;
    Mock::given(method("GET"))
        .and(path("/apis/broken.example.com/v1"))
        .respond_with(ResponseTemplate::new(500))
        .mount(server.server())
        .await;
    let disco = KubeDiscovery::new(server.client());

    assert!(disco.server_resources("example.com/v1").await.unwrap().is_empty());
    assert!(disco.server_resources("broken.example.com/v1").await.unwrap_err().is_transport());

    let cache = DiscoveryCache::new(Arc::new(disco));
    let err = cache.resolve(&ksync_core::Gvk::new("example.com", "v1", "Widget"), "", "default").await.unwrap_err();
    assert!(err.is_schema_mismatch(), "{}", err);
}

#[tokio::test]
async fn client_for_binds_scope_and_default_namespace() {
    let server = MockApiServer::start().await;
    let r = resolver(&server, "team");

    let cm = r.client_for(&ResourceDocument::new("v1", "ConfigMap", "", "cfg")).await.unwrap();
    assert_eq!(cm.target().namespace.as_deref(), Some("team"));
    assert_eq!(cm.target().resource.name, "configmaps");

    let ns = r.client_for(&ResourceDocument::new("v1", "Namespace", "", "team")).await.unwrap();
    assert_eq!(ns.target().namespace, None);

    let err = r.client_for(&ResourceDocument::new("apps/v1", "Gadget", "", "g")).await.err().unwrap();
    assert!(matches!(err, Error::SchemaMismatch { .. }));
}

#[tokio::test]
async fn create_patch_and_delete_round_trip() {
    let server = MockApiServer::start().await;
    let r = resolver(&server, "team");
    let doc = ResourceDocument::from_value(json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {"name": "cfg"},
        "data": {"a": "1", "b": "2"},
    }))
    .unwrap();
    let client = r.client_for(&doc).await.unwrap();

    assert!(client.merge_patch(&doc).await.unwrap().is_none());
    client.create(&doc).await.unwrap();
    let stored = server.object("v1", Some("team"), "configmaps", "cfg").unwrap();
    assert_eq!(stored["metadata"]["namespace"], "team");

    let update = ResourceDocument::from_value(json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {"name": "cfg"},
        "data": {"b": "3"},
    }))
    .unwrap();
    assert!(client.merge_patch(&update).await.unwrap().is_some());
    let stored = server.object("v1", Some("team"), "configmaps", "cfg").unwrap();
    assert_eq!(stored["data"], json!({"a": "1", "b": "3"}));

    assert!(client.delete("cfg").await.unwrap());
    assert!(!client.delete("cfg").await.unwrap());
    assert!(server.object("v1", Some("team"), "configmaps", "cfg").is_none());
}

#[tokio::test]
async fn create_conflicts_are_transport_errors() {
    let server = MockApiServer::start().await;
    server.insert("v1", None, "namespaces", json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "team"}}));
    let r = resolver(&server, "team");
    let doc = ResourceDocument::new("v1", "Namespace", "", "team");
    let err = r.client_for(&doc).await.unwrap().create(&doc).await.unwrap_err();
    assert!(err.is_transport(), "{}", err);
}
