use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use ksync_core::{sort_alphabetical, KindRanks, ResourceDocument};
use ksync_kubehub::ClientResolver;
use ksync_native::Natives;
use ksync_resolve::{build_resolver, PolicyKind, ResolverKind};
use serde_json::Value as Json;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "ksyncctl", version, about = "Synchronise Kubernetes resources with rendered config")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Yaml)]
    output: Output,

    /// Namespace for namespaced objects that do not set one (default: current context)
    #[arg(short = 'n', long = "namespace", global = true)]
    namespace: Option<String>,

    /// Implementation of the resolveImage native function
    #[arg(long = "resolve-images", value_enum, global = true, env = "KSYNC_RESOLVE_IMAGES", default_value_t = ResolverKind::Noop)]
    resolve_images: ResolverKind,

    /// Action when resolveImage fails
    #[arg(long = "resolve-images-error", value_enum, global = true, env = "KSYNC_RESOLVE_IMAGES_ERROR", default_value_t = PolicyKind::Warn)]
    resolve_images_error: PolicyKind,

    /// YAML/JSON file overriding the kind rank table used for ordering
    #[arg(long = "kind-order", global = true)]
    kind_order: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Yaml, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print rendered objects in stable (namespace, name, kind) order
    Show {
        files: Vec<PathBuf>,
    },
    /// Create or update objects on the cluster, foundations first
    Update {
        files: Vec<PathBuf>,
        /// Create objects that do not exist yet
        #[arg(long = "create", action = ArgAction::Set, default_value_t = true)]
        create: bool,
        /// Resolve endpoints only; send no writes
        #[arg(long = "dry-run", action = ArgAction::SetTrue)]
        dry_run: bool,
    },
    /// Delete objects from the cluster, dependents first
    Delete {
        files: Vec<PathBuf>,
        #[arg(long = "dry-run", action = ArgAction::SetTrue)]
        dry_run: bool,
    },
    /// Call a native template function with string arguments
    Native {
        /// Function name, e.g. resolveImage
        name: String,
        args: Vec<String>,
    },
}

fn init_tracing() {
    let env = std::env::var("KSYNC_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KSYNC_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid KSYNC_METRICS_ADDR; expected host:port");
        }
    }
}

fn load_ranks(path: Option<&Path>) -> Result<KindRanks> {
    match path {
        None => Ok(KindRanks::default()),
        Some(p) => {
            let text = std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
            serde_yaml::from_str(&text).with_context(|| format!("parsing kind order {}", p.display()))
        }
    }
}

fn render(docs: &[ResourceDocument], output: Output) -> Result<String> {
    match output {
        Output::Yaml => {
            let mut out = String::new();
            for d in docs {
                out.push_str("---\n");
                out.push_str(&serde_yaml::to_string(d)?);
            }
            Ok(out)
        }
        Output::Json => {
            let list = serde_json::json!({ "apiVersion": "v1", "kind": "List", "items": docs });
            Ok(serde_json::to_string_pretty(&list)? + "\n")
        }
    }
}

fn print_report(report: &ksync_apply::Report, output: Output) -> Result<()> {
    match output {
        Output::Json => println!("{}", serde_json::to_string_pretty(report)?),
        Output::Yaml => print!("{}", serde_yaml::to_string(report)?),
    }
    if report.is_clean() {
        Ok(())
    } else {
        Err(anyhow!("{} object(s) failed", report.failures.len()))
    }
}

// Resolvers may block on registry I/O, so natives run off the async workers.
async fn call_native(kind: ResolverKind, policy: PolicyKind, name: String, args: Vec<String>) -> Result<Json> {
    tokio::task::spawn_blocking(move || -> Result<Json> {
        let natives = Natives::new(build_resolver(kind, policy)?);
        let args: Vec<Json> = args.into_iter().map(Json::String).collect();
        Ok(natives.call(&name, &args)?)
    })
    .await?
}

async fn cluster(namespace: Option<String>) -> Result<ClientResolver> {
    let client = ksync_kubehub::get_kube_client().await.context("connecting to cluster")?;
    Ok(ClientResolver::for_client(client, namespace))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let ranks = load_ranks(cli.kind_order.as_deref())?;

    match cli.command {
        Commands::Show { files } => {
            let mut docs = ksync_apply::read_all(&files)?;
            sort_alphabetical(&mut docs);
            print!("{}", render(&docs, cli.output)?);
        }
        Commands::Update { files, create, dry_run } => {
            let docs = ksync_apply::read_all(&files)?;
            let resolver = cluster(cli.namespace).await?;
            info!(count = docs.len(), ns = %resolver.default_namespace(), dry_run, "update invoked");
            let opts = ksync_apply::UpdateOptions { create, dry_run };
            let report = ksync_apply::update(&resolver, docs, &ranks, opts).await?;
            print_report(&report, cli.output)?;
        }
        Commands::Delete { files, dry_run } => {
            let docs = ksync_apply::read_all(&files)?;
            let resolver = cluster(cli.namespace).await?;
            info!(count = docs.len(), dry_run, "delete invoked");
            let report = ksync_apply::delete(&resolver, docs, &ranks, dry_run).await?;
            print_report(&report, cli.output)?;
        }
        Commands::Native { name, args } => {
            match call_native(cli.resolve_images, cli.resolve_images_error, name.clone(), args).await {
                Ok(v) => println!("{}", serde_json::to_string_pretty(&v)?),
                Err(e) => {
                    error!(error = ?e, function = %name, "native call failed");
                    return Err(e);
                }
            }
        }
    }
    Ok(())
}
