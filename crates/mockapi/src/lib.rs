//! In-process Kubernetes API server for tests, served over HTTP by wiremock.
//!
//! Serves legacy discovery (`/api/v1`, `/apis/<group>/<version>`) for a configurable
//! set of resource types and keeps created objects in memory so that get, create,
//! merge-patch and delete behave like a real API server. Group-versions that are not
//! configured answer 404.

#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};

use kube::{Client, Config};
use rustc_hash::FxHashMap;
use serde_json::{json, Value as Json};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// One served resource type.
#[derive(Debug, Clone)]
pub struct MockResource {
    pub name: String,
    pub kind: String,
    pub namespaced: bool,
}

impl MockResource {
    pub fn namespaced(name: &str, kind: &str) -> Self {
        Self { name: name.to_string(), kind: kind.to_string(), namespaced: true }
    }

    pub fn cluster_scoped(name: &str, kind: &str) -> Self {
        Self { name: name.to_string(), kind: kind.to_string(), namespaced: false }
    }
}

/// Core and `apps/v1` types, including a couple of subresources.
pub fn default_discovery() -> Vec<(String, Vec<MockResource>)> {
    vec![
        (
            "v1".to_string(),
            vec![
                MockResource::cluster_scoped("namespaces", "Namespace"),
                MockResource::namespaced("configmaps", "ConfigMap"),
                MockResource::namespaced("secrets", "Secret"),
                MockResource::namespaced("services", "Service"),
                MockResource::namespaced("pods", "Pod"),
                MockResource::namespaced("pods/log", "Pod"),
            ],
        ),
        (
            "apps/v1".to_string(),
            vec![
                MockResource::namespaced("deployments", "Deployment"),
                MockResource::namespaced("deployments/scale", "Scale"),
            ],
        ),
    ]
}

/// (group-version, namespace, plural, name)
type Key = (String, Option<String>, String, String);
type Objects = Arc<Mutex<FxHashMap<Key, Json>>>;

pub struct MockApiServer {
    server: MockServer,
    objects: Objects,
}

impl MockApiServer {
    pub async fn start() -> Self { Self::with_discovery(default_discovery()).await }

    pub async fn with_discovery(groups: Vec<(String, Vec<MockResource>)>) -> Self {
        let server = MockServer::start().await;
        for (gv, resources) in &groups {
            let p = if gv.contains('/') { format!("/apis/{}", gv) } else { format!("/api/{}", gv) };
            Mock::given(method("GET"))
                .and(path(p))
                .respond_with(ResponseTemplate::new(200).set_body_json(resource_list(gv, resources)))
                .mount(&server)
                .await;
        }
        let objects = Objects::default();
        Mock::given(path_regex(r"^/(api/[^/]+|apis/[^/]+/[^/]+)/.+$"))
            .respond_with(Store { objects: objects.clone() })
            .mount(&server)
            .await;
        Self { server, objects }
    }

    /// The underlying wiremock server, for mounting extra behaviour.
    pub fn server(&self) -> &MockServer { &self.server }

    pub fn uri(&self) -> String { self.server.uri() }

    /// A kube client talking to this server; its default namespace is `default`.
    pub fn client(&self) -> Client {
        let url = self.uri().parse().expect("mock server uri is a valid url");
        Client::try_from(Config::new(url)).expect("kube client for mock server")
    }

    pub fn object(&self, api_version: &str, namespace: Option<&str>, plural: &str, name: &str) -> Option<Json> {
        let key = (api_version.to_string(), namespace.map(str::to_string), plural.to_string(), name.to_string());
        self.objects.lock().expect("object store lock").get(&key).cloned()
    }

    pub fn insert(&self, api_version: &str, namespace: Option<&str>, plural: &str, object: Json) {
        let name = object["metadata"]["name"].as_str().unwrap_or_default().to_string();
        let key = (api_version.to_string(), namespace.map(str::to_string), plural.to_string(), name);
        self.objects.lock().expect("object store lock").insert(key, object);
    }

    /// Non-GET requests received so far, as `"METHOD path"` in arrival order.
    pub async fn writes(&self) -> Vec<String> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.method.as_str() != "GET")
            .map(|r| format!("{} {}", r.method.as_str(), r.url.path()))
            .collect()
    }
}

fn resource_list(gv: &str, resources: &[MockResource]) -> Json {
    let items: Vec<Json> = resources
        .iter()
        .map(|r| {
            json!({
                "name": r.name,
                "singularName": "",
                "namespaced": r.namespaced,
                "kind": r.kind,
                "verbs": ["create", "delete", "get", "list", "patch", "update", "watch"],
            })
        })
        .collect();
    json!({ "kind": "APIResourceList", "apiVersion": "v1", "groupVersion": gv, "resources": items })
}

fn status(code: u16, reason: &str, message: String) -> ResponseTemplate {
    ResponseTemplate::new(code).set_body_json(json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Failure",
        "message": message,
        "reason": reason,
        "code": code,
    }))
}

// RFC 7386 JSON merge patch.
fn merge_patch(target: &mut Json, patch: Json) {
    match patch {
        Json::Object(fields) => {
            if !target.is_object() {
                *target = Json::Object(Default::default());
            }
            if let Json::Object(map) = target {
                for (k, v) in fields {
                    if v.is_null() {
                        map.remove(&k);
                    } else {
                        merge_patch(map.entry(k).or_insert(Json::Null), v);
                    }
                }
            }
        }
        other => *target = other,
    }
}

struct Route {
    gv: String,
    namespace: Option<String>,
    plural: String,
    name: Option<String>,
}

impl Route {
    fn parse(p: &str) -> Option<Self> {
        let (gv, rest) = match p.strip_prefix("/api/") {
            Some(r) => {
                let (v, rest) = r.split_once('/')?;
                (v.to_string(), rest)
            }
            None => {
                let mut it = p.strip_prefix("/apis/")?.splitn(3, '/');
                let (g, v, rest) = (it.next()?, it.next()?, it.next()?);
                (format!("{}/{}", g, v), rest)
            }
        };
        let segs: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
        let (namespace, segs) = match segs.as_slice() {
            ["namespaces", ns, tail @ ..] if !tail.is_empty() => (Some(ns.to_string()), tail),
            all => (None, all),
        };
        Some(Self {
            gv,
            namespace,
            plural: segs.first()?.to_string(),
            name: segs.get(1).map(|s| s.to_string()),
        })
    }

    fn key(&self, name: &str) -> Key {
        (self.gv.clone(), self.namespace.clone(), self.plural.clone(), name.to_string())
    }
}

struct Store {
    objects: Objects,
}

impl Respond for Store {
    fn respond(&self, req: &Request) -> ResponseTemplate {
        let Some(route) = Route::parse(req.url.path()) else {
            return status(404, "NotFound", format!("no route for {}", req.url.path()));
        };
        let mut objects = self.objects.lock().expect("object store lock");
        let not_found = |name: &str| status(404, "NotFound", format!("{} {:?} not found", route.plural, name));
        match (req.method.as_str(), route.name.as_deref()) {
            ("GET", Some(name)) => match objects.get(&route.key(name)) {
                Some(obj) => ResponseTemplate::new(200).set_body_json(obj),
                None => not_found(name),
            },
            ("POST", None) => {
                let body: Json = match serde_json::from_slice(&req.body) {
                    Ok(b) => b,
                    Err(e) => return status(400, "BadRequest", e.to_string()),
                };
                let name = body["metadata"]["name"].as_str().unwrap_or_default().to_string();
                let key = route.key(&name);
                if objects.contains_key(&key) {
                    return status(409, "AlreadyExists", format!("{} {:?} already exists", route.plural, name));
                }
                objects.insert(key, body.clone());
                ResponseTemplate::new(201).set_body_json(body)
            }
            ("PATCH", Some(name)) => {
                let patch: Json = match serde_json::from_slice(&req.body) {
                    Ok(b) => b,
                    Err(e) => return status(400, "BadRequest", e.to_string()),
                };
                match objects.get_mut(&route.key(name)) {
                    Some(obj) => {
                        merge_patch(obj, patch);
                        ResponseTemplate::new(200).set_body_json(obj.clone())
                    }
                    None => not_found(name),
                }
            }
            ("DELETE", Some(name)) => match objects.remove(&route.key(name)) {
                Some(obj) => ResponseTemplate::new(200).set_body_json(obj),
                None => not_found(name),
            },
            (m, _) => status(405, "MethodNotAllowed", format!("{} not supported on {}", m, req.url.path())),
        }
    }
}
