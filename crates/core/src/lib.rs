//! ksync core types: resource documents, group-version-kind keys and shared errors.

#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

pub mod order;

pub use order::{alphabetical_order, dependency_order, sort_alphabetical, sort_for_create, sort_for_delete, KindRanks, DEFAULT_RANK};

/// Error kinds surfaced by the ksync libraries.
///
/// `Transport` and `SchemaMismatch` are deliberately distinct so callers can tell
/// "server unreachable" apart from "server does not serve this type".
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed structured data or image reference.
    #[error("parse error: {0}")]
    Parse(String),
    /// The server has no resource type matching the requested group-version-kind.
    #[error("server is unable to handle {gvk}")]
    SchemaMismatch { gvk: Gvk },
    /// Network or authorization failure talking to discovery or a registry.
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// A reference resolver strategy failed.
    #[error("resolution error: {0}")]
    Resolution(String),
    /// A user supplied regular expression did not compile.
    #[error("invalid pattern: {0}")]
    Pattern(String),
    /// Wrong arity or argument type passed to a native function.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A rendered value is not a usable resource document.
    #[error("invalid document: {0}")]
    Document(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn transport<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error::Transport(err.into())
    }

    pub fn is_transport(&self) -> bool { matches!(self, Error::Transport(_)) }
    pub fn is_schema_mismatch(&self) -> bool { matches!(self, Error::SchemaMismatch { .. }) }
}

/// Group/Version/Kind key used for every schema lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Gvk {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl Gvk {
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self { group: group.into(), version: version.into(), kind: kind.into() }
    }

    /// Split an `apiVersion` string ("v1" or "apps/v1") into group and version.
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        match api_version.split_once('/') {
            Some((g, v)) => Self::new(g, v, kind),
            None => Self::new("", api_version, kind),
        }
    }

    /// The group-version string discovery is keyed by ("v1", "apps/v1").
    pub fn group_version(&self) -> String {
        if self.group.is_empty() { self.version.clone() } else { format!("{}/{}", self.group, self.version) }
    }
}

impl fmt::Display for Gvk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, Kind={}", self.group_version(), self.kind)
    }
}

/// One rendered cluster object.
///
/// The structural identity (apiVersion, kind, name) is read-only once built; the
/// only sanctioned change is defaulting an empty namespace via [`ResourceDocument::with_namespace`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Json", into = "Json")]
pub struct ResourceDocument {
    raw: Map<String, Json>,
}

impl ResourceDocument {
    /// Build a minimal document. An empty `namespace` leaves it unset.
    pub fn new(api_version: &str, kind: &str, namespace: &str, name: &str) -> Self {
        let mut meta = Map::new();
        meta.insert("name".into(), Json::String(name.to_string()));
        if !namespace.is_empty() {
            meta.insert("namespace".into(), Json::String(namespace.to_string()));
        }
        let mut raw = Map::new();
        raw.insert("apiVersion".into(), Json::String(api_version.to_string()));
        raw.insert("kind".into(), Json::String(kind.to_string()));
        raw.insert("metadata".into(), Json::Object(meta));
        Self { raw }
    }

    /// Wrap a rendered value; it must be an object carrying string `apiVersion` and `kind`.
    pub fn from_value(value: Json) -> Result<Self> {
        let raw = match value {
            Json::Object(map) => map,
            other => return Err(Error::Document(format!("expected an object, got {}", type_name(&other)))),
        };
        for key in ["apiVersion", "kind"] {
            match raw.get(key) {
                Some(Json::String(s)) if !s.is_empty() => {}
                _ => return Err(Error::Document(format!("missing or non-string {}", key))),
            }
        }
        if let Some(meta) = raw.get("metadata") {
            if !meta.is_object() {
                return Err(Error::Document("metadata must be an object".into()));
            }
        }
        Ok(Self { raw })
    }

    fn str_field(&self, key: &str) -> &str {
        self.raw.get(key).and_then(|v| v.as_str()).unwrap_or("")
    }

    fn meta_field(&self, key: &str) -> &str {
        self.raw.get("metadata").and_then(|m| m.get(key)).and_then(|v| v.as_str()).unwrap_or("")
    }

    pub fn api_version(&self) -> &str { self.str_field("apiVersion") }
    pub fn kind(&self) -> &str { self.str_field("kind") }
    /// Empty when unset.
    pub fn namespace(&self) -> &str { self.meta_field("namespace") }
    pub fn name(&self) -> &str { self.meta_field("name") }

    pub fn gvk(&self) -> Gvk { Gvk::from_api_version(self.api_version(), self.kind()) }

    /// Copy of this document with `metadata.namespace` set.
    pub fn with_namespace(&self, namespace: &str) -> Self {
        let mut raw = self.raw.clone();
        let meta = raw.entry("metadata").or_insert_with(|| Json::Object(Map::new()));
        if let Json::Object(meta) = meta {
            meta.insert("namespace".into(), Json::String(namespace.to_string()));
        }
        Self { raw }
    }

    /// Short human label, e.g. `apps/v1, Kind=Deployment default/web`.
    pub fn describe(&self) -> String {
        if self.namespace().is_empty() {
            format!("{} {}", self.gvk(), self.name())
        } else {
            format!("{} {}/{}", self.gvk(), self.namespace(), self.name())
        }
    }

    pub fn fields(&self) -> &Map<String, Json> { &self.raw }
    pub fn to_value(&self) -> Json { Json::Object(self.raw.clone()) }
    pub fn into_value(self) -> Json { Json::Object(self.raw) }
}

impl TryFrom<Json> for ResourceDocument {
    type Error = Error;
    fn try_from(value: Json) -> Result<Self> { Self::from_value(value) }
}

impl From<ResourceDocument> for Json {
    fn from(doc: ResourceDocument) -> Self { doc.into_value() }
}

fn type_name(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

fn is_list_kind(map: &Map<String, Json>) -> bool {
    let kind = map.get("kind").and_then(|k| k.as_str()).unwrap_or("");
    kind.ends_with("List") && matches!(map.get("items"), Some(Json::Array(_)))
}

/// Walk a rendered value and collect every resource document in it.
///
/// Objects with both `apiVersion` and `kind` are documents; `*List` documents are
/// flattened into their `items`. Other objects and arrays are descended into, nulls
/// are skipped, and any other scalar is rejected.
pub fn collect_documents(value: Json) -> Result<Vec<ResourceDocument>> {
    let mut out = Vec::new();
    walk(value, &mut out)?;
    Ok(out)
}

fn walk(value: Json, out: &mut Vec<ResourceDocument>) -> Result<()> {
    match value {
        Json::Null => Ok(()),
        Json::Object(mut map) => {
            if map.contains_key("apiVersion") && map.contains_key("kind") {
                if is_list_kind(&map) {
                    if let Some(Json::Array(items)) = map.remove("items") {
                        for item in items { walk(item, out)?; }
                    }
                    return Ok(());
                }
                out.push(ResourceDocument::from_value(Json::Object(map))?);
                return Ok(());
            }
            for (_k, v) in map { walk(v, out)?; }
            Ok(())
        }
        Json::Array(items) => {
            for item in items { walk(item, out)?; }
            Ok(())
        }
        other => Err(Error::Document(format!("unexpected object structure: {}", type_name(&other)))),
    }
}
