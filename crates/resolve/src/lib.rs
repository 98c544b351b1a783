//! ksync resolve: pluggable image reference resolution with a configurable failure policy.
//!
//! A base strategy ([`IdentityResolver`], [`RegistryResolver`]) is decorated with an
//! [`ErrorPolicy`] through [`WithPolicy`], which is itself a [`Resolver`].

#![forbid(unsafe_code)]

use std::str::FromStr;
use std::sync::Arc;

use clap::ValueEnum;
use ksync_core::{Error, Result};
use metrics::counter;
use tracing::warn;

mod image;
mod registry;

pub use image::{ImageName, DEFAULT_REGISTRY, DEFAULT_TAG};
pub use registry::RegistryResolver;

/// Rewrites an image reference into canonical, usually pinned, form.
pub trait Resolver: Send + Sync {
    fn resolve(&self, image: &ImageName) -> Result<ImageName>;
}

impl<R: Resolver + ?Sized> Resolver for Box<R> {
    fn resolve(&self, image: &ImageName) -> Result<ImageName> { (**self).resolve(image) }
}

impl<R: Resolver + ?Sized> Resolver for Arc<R> {
    fn resolve(&self, image: &ImageName) -> Result<ImageName> { (**self).resolve(image) }
}

/// Returns the reference unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityResolver;

impl Resolver for IdentityResolver {
    fn resolve(&self, image: &ImageName) -> Result<ImageName> { Ok(image.clone()) }
}

/// Decides what a resolver failure turns into. `Ok(())` swallows the error.
pub trait ErrorPolicy: Send + Sync {
    fn on_error(&self, err: Error) -> Result<()>;
}

impl<P: ErrorPolicy + ?Sized> ErrorPolicy for Box<P> {
    fn on_error(&self, err: Error) -> Result<()> { (**self).on_error(err) }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Ignore;

impl ErrorPolicy for Ignore {
    fn on_error(&self, _err: Error) -> Result<()> { Ok(()) }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Warn;

impl ErrorPolicy for Warn {
    fn on_error(&self, err: Error) -> Result<()> {
        warn!(error = %err, "image resolution failed; using reference unchanged");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Propagate;

impl ErrorPolicy for Propagate {
    fn on_error(&self, err: Error) -> Result<()> { Err(err) }
}

/// A resolver whose failures are filtered through a policy.
///
/// The inner resolver runs exactly once per call. Successful results pass through
/// untouched; a swallowed failure yields the input reference.
#[derive(Debug, Clone)]
pub struct WithPolicy<R, P> {
    inner: R,
    policy: P,
}

impl<R: Resolver, P: ErrorPolicy> WithPolicy<R, P> {
    pub fn new(inner: R, policy: P) -> Self { Self { inner, policy } }
}

impl<R: Resolver, P: ErrorPolicy> Resolver for WithPolicy<R, P> {
    fn resolve(&self, image: &ImageName) -> Result<ImageName> {
        match self.inner.resolve(image) {
            Ok(resolved) => Ok(resolved),
            Err(err) => {
                counter!("image_resolve_err_total", 1u64);
                self.policy.on_error(err)?;
                Ok(image.clone())
            }
        }
    }
}

/// Base strategy selector exposed to configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ResolverKind {
    #[default]
    Noop,
    Registry,
}

/// Failure policy selector exposed to configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum PolicyKind {
    Ignore,
    #[default]
    Warn,
    Error,
}

impl PolicyKind {
    pub fn into_policy(self) -> Box<dyn ErrorPolicy> {
        match self {
            PolicyKind::Ignore => Box::new(Ignore),
            PolicyKind::Warn => Box::new(Warn),
            PolicyKind::Error => Box::new(Propagate),
        }
    }
}

impl FromStr for ResolverKind {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        <Self as ValueEnum>::from_str(s, true)
            .map_err(|_| Error::InvalidArgument(format!("bad resolver {:?}; expected one of: noop, registry", s)))
    }
}

impl FromStr for PolicyKind {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        <Self as ValueEnum>::from_str(s, true)
            .map_err(|_| Error::InvalidArgument(format!("bad failure policy {:?}; expected one of: ignore, warn, error", s)))
    }
}

/// Compose the configured strategy with the configured policy.
pub fn build_resolver(kind: ResolverKind, policy: PolicyKind) -> Result<Arc<dyn Resolver>> {
    let inner: Box<dyn Resolver> = match kind {
        ResolverKind::Noop => Box::new(IdentityResolver),
        ResolverKind::Registry => Box::new(RegistryResolver::new()?),
    };
    Ok(Arc::new(WithPolicy::new(inner, policy.into_policy())))
}
