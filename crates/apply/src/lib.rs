//! ksync apply: ordered update and delete of rendered documents.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use ksync_core::{sort_for_create, sort_for_delete, Error, KindRanks, ResourceDocument};
use ksync_kubehub::ClientResolver;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

mod input;

pub use input::{parse_documents, read_all, read_documents};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UpdateOptions {
    /// Create objects missing on the server.
    pub create: bool,
    /// Resolve endpoints and report, but send no writes.
    pub dry_run: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self { Self { create: true, dry_run: false } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Created,
    Patched,
    /// Not on the server and creation disabled.
    Missing,
    Deleted,
    AlreadyAbsent,
    DryRun,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub object: String,
    pub action: Action,
}

/// A document that could not be processed; the rest of the batch still ran.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Failure {
    pub object: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Report {
    pub outcomes: Vec<Outcome>,
    pub failures: Vec<Failure>,
}

impl Report {
    pub fn is_clean(&self) -> bool { self.failures.is_empty() }

    fn ok(&mut self, doc: &ResourceDocument, action: Action) {
        self.outcomes.push(Outcome { object: doc.describe(), action });
    }
}

fn validate(doc: &ResourceDocument) -> Result<(), Error> {
    if doc.name().is_empty() {
        return Err(Error::Document(format!("{} is missing metadata.name", doc.gvk())));
    }
    Ok(())
}

// Errors scoped to one document; anything else (transport, auth) aborts the batch.
fn is_per_document(e: &Error) -> bool {
    matches!(e, Error::SchemaMismatch { .. } | Error::Document(_))
}

/// Documents in creation order: kind rank ascending, input order within a rank.
pub fn plan_update(mut docs: Vec<ResourceDocument>, ranks: &KindRanks) -> Vec<ResourceDocument> {
    sort_for_create(&mut docs, ranks);
    docs
}

/// Documents in deletion order, the exact reverse of [`plan_update`].
pub fn plan_delete(mut docs: Vec<ResourceDocument>, ranks: &KindRanks) -> Vec<ResourceDocument> {
    sort_for_delete(&mut docs, ranks);
    docs
}

pub async fn update(
    resolver: &ClientResolver,
    docs: Vec<ResourceDocument>,
    ranks: &KindRanks,
    opts: UpdateOptions,
) -> Result<Report> {
    let mut report = Report::default();
    for doc in plan_update(docs, ranks) {
        let t0 = std::time::Instant::now();
        let desc = doc.describe();
        let client = match validate(&doc) {
            Ok(()) => resolver.client_for(&doc).await,
            Err(e) => Err(e),
        };
        let client = match client {
            Ok(c) => c,
            Err(e) if is_per_document(&e) => {
                counter!("apply_err", 1u64);
                warn!(object = %desc, error = %e, "skipping object");
                report.failures.push(Failure { object: desc, error: e.to_string() });
                continue;
            }
            Err(e) => return Err(anyhow::Error::new(e).context(format!("resolving client for {}", desc))),
        };

        if opts.dry_run {
            info!(object = %desc, resource = %client.target().resource.name, "would update (dry run)");
            report.ok(&doc, Action::DryRun);
            continue;
        }

        let action = match client.merge_patch(&doc).await.with_context(|| format!("patching {}", desc))? {
            Some(_) => Action::Patched,
            None if opts.create => {
                client.create(&doc).await.with_context(|| format!("creating {}", desc))?;
                Action::Created
            }
            None => {
                warn!(object = %desc, "not found on server and creation disabled");
                Action::Missing
            }
        };
        histogram!("apply_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        counter!("apply_ok", 1u64);
        info!(object = %desc, action = ?action, "updated");
        report.ok(&doc, action);
    }
    Ok(report)
}

pub async fn delete(
    resolver: &ClientResolver,
    docs: Vec<ResourceDocument>,
    ranks: &KindRanks,
    dry_run: bool,
) -> Result<Report> {
    let mut report = Report::default();
    for doc in plan_delete(docs, ranks) {
        let desc = doc.describe();
        let client = match validate(&doc) {
            Ok(()) => resolver.client_for(&doc).await,
            Err(e) => Err(e),
        };
        let client = match client {
            Ok(c) => c,
            Err(e) if is_per_document(&e) => {
                warn!(object = %desc, error = %e, "skipping object");
                report.failures.push(Failure { object: desc, error: e.to_string() });
                continue;
            }
            Err(e) => return Err(anyhow::Error::new(e).context(format!("resolving client for {}", desc))),
        };

        if dry_run {
            info!(object = %desc, "would delete (dry run)");
            report.ok(&doc, Action::DryRun);
            continue;
        }

        let action = if client.delete(doc.name()).await.with_context(|| format!("deleting {}", desc))? {
            counter!("delete_ok", 1u64);
            Action::Deleted
        } else {
            Action::AlreadyAbsent
        };
        info!(object = %desc, action = ?action, "deleted");
        report.ok(&doc, action);
    }
    Ok(report)
}
