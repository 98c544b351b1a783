//! Registry-backed resolver: pins a tag to the manifest digest the registry serves.

use ksync_core::{Error, Result};
use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT, WWW_AUTHENTICATE};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::{ImageName, Resolver};

const MANIFEST_TYPES: &str = "application/vnd.docker.distribution.manifest.v2+json, \
application/vnd.docker.distribution.manifest.list.v2+json, \
application/vnd.oci.image.manifest.v1+json, \
application/vnd.oci.image.index.v1+json";
const DIGEST_HEADER: &str = "Docker-Content-Digest";

/// Talks the Docker Registry HTTP API v2, with anonymous bearer-token auth.
///
/// Every call blocks on network I/O and carries no timeout of its own beyond the
/// configured HTTP client's.
#[derive(Debug, Clone)]
pub struct RegistryResolver {
    http: Client,
}

impl RegistryResolver {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("ksync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(Error::transport)?;
        Ok(Self { http })
    }

    pub fn with_client(http: Client) -> Self { Self { http } }

    fn manifest(&self, url: &str, token: Option<&str>) -> Result<Response> {
        let mut req = self.http.head(url).header(ACCEPT, MANIFEST_TYPES);
        if let Some(t) = token {
            req = req.bearer_auth(t);
        }
        req.send().map_err(Error::transport)
    }

    fn token(&self, challenge: &BearerChallenge, image: &ImageName) -> Result<String> {
        #[derive(Deserialize)]
        struct TokenResponse {
            token: Option<String>,
            access_token: Option<String>,
        }

        let scope = challenge
            .scope
            .clone()
            .unwrap_or_else(|| format!("repository:{}:pull", image.registry_repository()));
        let mut query = vec![("scope", scope)];
        if let Some(service) = &challenge.service {
            query.push(("service", service.clone()));
        }
        let resp = self.http.get(&challenge.realm).query(&query).send().map_err(Error::transport)?;
        if !resp.status().is_success() {
            return Err(Error::Resolution(format!("token endpoint {} returned {}", challenge.realm, resp.status())));
        }
        let body: TokenResponse = resp.json().map_err(Error::transport)?;
        body.token
            .or(body.access_token)
            .ok_or_else(|| Error::Resolution(format!("token endpoint {} returned no token", challenge.realm)))
    }

    fn digest(&self, image: &ImageName) -> Result<String> {
        let url = format!("{}/v2/{}/manifests/{}", image.registry_url(), image.registry_repository(), image.tag);
        let mut resp = self.manifest(&url, None)?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            let header = resp.headers().get(WWW_AUTHENTICATE).and_then(|v| v.to_str().ok()).unwrap_or("");
            let challenge = BearerChallenge::parse(header)
                .ok_or_else(|| Error::Resolution(format!("unsupported auth challenge from {}: {:?}", url, header)))?;
            let token = self.token(&challenge, image)?;
            resp = self.manifest(&url, Some(&token))?;
        }
        match resp.status() {
            s if s.is_success() => resp
                .headers()
                .get(DIGEST_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| Error::Resolution(format!("{} did not report a content digest", url))),
            StatusCode::NOT_FOUND => Err(Error::Resolution(format!("image {} not found", image))),
            s => Err(Error::Resolution(format!("registry returned {} for {}", s, url))),
        }
    }
}

impl Resolver for RegistryResolver {
    fn resolve(&self, image: &ImageName) -> Result<ImageName> {
        if !image.digest.is_empty() {
            return Ok(image.clone());
        }
        let digest = self.digest(image)?;
        debug!(image = %image, digest = %digest, "pinned image");
        Ok(ImageName { digest, ..image.clone() })
    }
}

/// Parameters of a `WWW-Authenticate: Bearer ...` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BearerChallenge {
    pub realm: String,
    pub service: Option<String>,
    pub scope: Option<String>,
}

impl BearerChallenge {
    pub(crate) fn parse(header: &str) -> Option<Self> {
        let (scheme, params) = header.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }
        let (mut realm, mut service, mut scope) = (None, None, None);
        for (k, v) in split_params(params) {
            match k.to_ascii_lowercase().as_str() {
                "realm" => realm = Some(v),
                "service" => service = Some(v),
                "scope" => scope = Some(v),
                _ => {}
            }
        }
        Some(Self { realm: realm?, service, scope })
    }
}

// key="value" pairs separated by commas; commas inside quotes are literal.
fn split_params(s: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut chars = s.chars().peekable();
    loop {
        while matches!(chars.peek(), Some(c) if *c == ',' || c.is_whitespace()) { chars.next(); }
        let key: String = std::iter::from_fn(|| chars.next_if(|c| *c != '=')).collect();
        if key.is_empty() || chars.next().is_none() { break; }
        let mut val = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '"' => break,
                    '\\' => { if let Some(n) = chars.next() { val.push(n); } }
                    c => val.push(c),
                }
            }
        } else {
            val = std::iter::from_fn(|| chars.next_if(|c| *c != ',')).collect();
        }
        out.push((key.trim().to_string(), val.trim().to_string()));
    }
    out
}
