//! Container image references.

use std::fmt;
use std::str::FromStr;

use ksync_core::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;

/// Registry host used when a reference names none.
pub const DEFAULT_REGISTRY: &str = "docker.io";
const DOCKER_HUB_API_HOST: &str = "registry-1.docker.io";
pub const DEFAULT_TAG: &str = "latest";

static PATH_COMPONENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$").unwrap());
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").unwrap());
static DIGEST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9]*(?:[-_+.][A-Za-z][A-Za-z0-9]*)*:[0-9a-fA-F]{32,}$").unwrap()
});
static REGISTRY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9](?:[A-Za-z0-9.-]*[A-Za-z0-9])?(?::[0-9]+)?$").unwrap());

fn is_loopback(registry: &str) -> bool {
    let host = match registry.rsplit_once(':') {
        Some((h, port)) if port.chars().all(|c| c.is_ascii_digit()) => h,
        _ => registry,
    };
    host == "localhost" || host.starts_with("127.")
}

/// A parsed image reference: `[registry/]repository[:tag][@digest]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageName {
    /// Empty means the default registry.
    pub registry: String,
    pub repository: String,
    pub tag: String,
    pub digest: String,
}

impl ImageName {
    pub fn parse(reference: &str) -> Result<Self> {
        let bad = |why: &str| Error::Parse(format!("invalid image reference {:?}: {}", reference, why));
        if reference.is_empty() {
            return Err(bad("empty"));
        }

        let (rest, digest) = match reference.split_once('@') {
            Some((r, d)) => {
                if !DIGEST.is_match(d) { return Err(bad("malformed digest")); }
                (r, d.to_string())
            }
            None => (reference, String::new()),
        };

        // A ':' after the last '/' starts the tag; earlier ones belong to a registry port.
        let last_slash = rest.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match rest[last_slash..].rfind(':') {
            Some(i) => {
                let t = &rest[last_slash + i + 1..];
                if !TAG.is_match(t) { return Err(bad("malformed tag")); }
                (&rest[..last_slash + i], t.to_string())
            }
            None => (rest, String::new()),
        };

        let (registry, repository) = match name.split_once('/') {
            Some((first, path)) if first.contains('.') || first.contains(':') || first == "localhost" => {
                if !REGISTRY.is_match(first) { return Err(bad("malformed registry")); }
                (first.to_string(), path.to_string())
            }
            _ => (String::new(), name.to_string()),
        };

        if repository.is_empty() || !repository.split('/').all(|c| PATH_COMPONENT.is_match(c)) {
            return Err(bad("repository must be lower-case path components"));
        }

        let tag = if tag.is_empty() && digest.is_empty() { DEFAULT_TAG.to_string() } else { tag };
        Ok(Self { registry, repository, tag, digest })
    }

    /// Base URL of the registry HTTP API. Loopback registries are spoken to over plain HTTP.
    pub fn registry_url(&self) -> String {
        match self.registry.as_str() {
            "" | DEFAULT_REGISTRY | "index.docker.io" => format!("https://{}", DOCKER_HUB_API_HOST),
            reg if is_loopback(reg) => format!("http://{}", reg),
            reg => format!("https://{}", reg),
        }
    }

    /// Repository path as the registry API expects it (official Hub images live under `library/`).
    pub fn registry_repository(&self) -> String {
        let on_hub = matches!(self.registry.as_str(), "" | DEFAULT_REGISTRY | "index.docker.io");
        if on_hub && !self.repository.contains('/') {
            format!("library/{}", self.repository)
        } else {
            self.repository.clone()
        }
    }

    /// Tag or digest, whichever pins the manifest more precisely.
    pub fn reference(&self) -> &str {
        if self.digest.is_empty() { &self.tag } else { &self.digest }
    }
}

impl fmt::Display for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.registry.is_empty() {
            write!(f, "{}/", self.registry)?;
        }
        f.write_str(&self.repository)?;
        if self.digest.is_empty() {
            write!(f, ":{}", self.tag)
        } else {
            write!(f, "@{}", self.digest)
        }
    }
}

impl FromStr for ImageName {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> { Self::parse(s) }
}
