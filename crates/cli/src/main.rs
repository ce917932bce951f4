use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use fnpkg_core::{ClientConfig, Function, Package, PkgError, ResourceClient, WatchEvent};
use fnpkg_kubehub::KubeResourceClient;
use fnpkg_ops::{check_lookup_name, check_name, CreatePackage, DeleteOutcome, PackageManager, UpdatePackage};
use fnpkg_storage::HttpStorage;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "fnpkgctl", version, about = "Package lifecycle client for the function platform")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Control server URL (http:// is assumed when no scheme is given)
    #[arg(long = "server", env = "FNPKG_URL", global = true)]
    server: Option<String>,

    /// Namespace holding packages and functions
    #[arg(long = "namespace", env = "FNPKG_NAMESPACE", global = true, default_value = "default")]
    namespace: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage packages
    #[command(subcommand)]
    Package(PackageCmd),
}

#[derive(Subcommand, Debug)]
enum PackageCmd {
    /// Create a package from a source and/or deployment archive
    Create {
        /// Environment name
        #[arg(long = "env")]
        env: Option<String>,
        /// Source archive (built by the environment's builder)
        #[arg(long = "src")]
        src: Option<PathBuf>,
        /// Deployment archive (used as-is)
        #[arg(long = "deploy")]
        deploy: Option<PathBuf>,
        /// Description
        #[arg(long = "desc")]
        desc: Option<String>,
    },
    /// Update environment, archives or description of a package
    Update {
        #[arg(long = "name")]
        name: Option<String>,
        #[arg(long = "env")]
        env: Option<String>,
        #[arg(long = "src")]
        src: Option<PathBuf>,
        #[arg(long = "deploy")]
        deploy: Option<PathBuf>,
        #[arg(long = "desc")]
        desc: Option<String>,
        /// Update even when functions use the package
        #[arg(short = 'f', long = "force", action = ArgAction::SetTrue)]
        force: bool,
    },
    /// Download the archives of a package
    Get {
        #[arg(long = "name")]
        name: Option<String>,
        /// Local file name (defaults to the package name)
        #[arg(long = "target")]
        target: Option<String>,
    },
    /// Show package details including the build log
    Info {
        #[arg(long = "name")]
        name: Option<String>,
    },
    /// List packages
    List,
    /// Delete a package
    Delete {
        #[arg(long = "name")]
        name: Option<String>,
        /// Delete even when functions use the package
        #[arg(short = 'f', long = "force", action = ArgAction::SetTrue)]
        force: bool,
    },
    /// Watch packages and print +/- events
    Watch,
}

/// A subcommand whose arguments passed the local checks.
#[derive(Debug)]
enum Action {
    Create(CreatePackage),
    Update(UpdatePackage),
    Get { name: String, target: Option<String> },
    Info { name: String },
    List,
    Delete { name: String, force: bool },
    Watch,
}

/// Check required flags before any kube or storage client is built.
fn plan(cmd: PackageCmd) -> Result<Action, PkgError> {
    let action = match cmd {
        PackageCmd::Create { env, src, deploy, desc } => {
            let req = CreatePackage { environment: env.unwrap_or_default(), source: src, deployment: deploy, description: desc };
            req.validate()?;
            Action::Create(req)
        }
        PackageCmd::Update { name, env, src, deploy, desc, force } => {
            let req = UpdatePackage { name: name.unwrap_or_default(), environment: env, description: desc, source: src, deployment: deploy, force };
            req.validate()?;
            Action::Update(req)
        }
        PackageCmd::Get { name, target } => {
            let name = name.unwrap_or_default();
            check_lookup_name(&name)?;
            Action::Get { name, target }
        }
        PackageCmd::Info { name } => {
            let name = name.unwrap_or_default();
            check_lookup_name(&name)?;
            Action::Info { name }
        }
        PackageCmd::List => Action::List,
        PackageCmd::Delete { name, force } => {
            let name = name.unwrap_or_default();
            check_name(&name)?;
            Action::Delete { name, force }
        }
        PackageCmd::Watch => Action::Watch,
    };
    Ok(action)
}

fn init_tracing() {
    let env = std::env::var("FNPKG_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("FNPKG_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid FNPKG_METRICS_ADDR; expected host:port");
        }
    }
}

fn build_config(cli: &Cli) -> Result<ClientConfig, PkgError> {
    let mut cfg = ClientConfig::new(cli.server.as_deref().unwrap_or(""))?.with_namespace(cli.namespace.clone());
    if let Some(limit) = std::env::var("FNPKG_LITERAL_LIMIT").ok().and_then(|s| s.parse::<u64>().ok()) {
        cfg = cfg.with_literal_size_limit(limit);
    }
    Ok(cfg)
}

/// Print to stderr and exit nonzero.
fn fatal(msg: impl std::fmt::Display) -> ! {
    eprintln!("{}", msg);
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let cfg = build_config(&cli).unwrap_or_else(|e| fatal(e));
    let Commands::Package(cmd) = cli.command;
    let action = plan(cmd).unwrap_or_else(|e| fatal(e));
    let client = fnpkg_kubehub::get_kube_client().await.unwrap_or_else(|e| fatal(format!("{:#}", e)));
    let packages = Arc::new(KubeResourceClient::<Package>::new(client.clone(), &cfg.namespace));
    let functions: Arc<dyn ResourceClient<Function>> = Arc::new(KubeResourceClient::<Function>::new(client, &cfg.namespace));
    let storage = Arc::new(HttpStorage::new(&cfg).unwrap_or_else(|e| fatal(e)));
    info!(server = %cfg.server_url, ns = %cfg.namespace, "client configured");
    let mgr = PackageManager::new(cfg, packages.clone(), functions, storage);

    if let Err(e) = run(&mgr, packages.as_ref(), action, cli.output).await {
        error!(error = %format!("{:#}", e), "command failed");
        fatal(format!("{:#}", e));
    }
    Ok(())
}

async fn run(mgr: &PackageManager, packages: &dyn ResourceClient<Package>, action: Action, output: Output) -> Result<()> {
    match action {
        Action::Create(req) => {
            let pkg = mgr.create(req).await.context("failed to create package")?;
            let name = pkg.metadata.name.clone().unwrap_or_default();
            match output {
                Output::Human => println!("package '{}' created", name),
                Output::Json => println!("{}", serde_json::to_string_pretty(&pkg)?),
            }
        }
        Action::Update(req) => {
            let out = mgr.update(req).await.context("failed to update package")?;
            match output {
                Output::Human => {
                    println!("package '{}' updated", out.package.metadata.name.clone().unwrap_or_default());
                    for f in &out.functions_updated {
                        println!("  function '{}' now uses resourceVersion {}", f, out.package.resource_version().unwrap_or("-"));
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&out.package)?),
            }
        }
        Action::Get { name, target } => {
            let paths = mgr.get(&name, target.as_deref()).await.context("failed to get package")?;
            match output {
                Output::Human => {
                    for p in paths {
                        println!("{}", p.display());
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&paths)?),
            }
        }
        Action::Info { name } => {
            let info = mgr.info(&name).await.context("failed to get package info")?;
            match output {
                Output::Human => print!("{}", fnpkg_ops::render_info(&info)),
                Output::Json => println!("{}", serde_json::to_string_pretty(&info)?),
            }
        }
        Action::List => {
            let rows = mgr.list().await.context("failed to list packages")?;
            match output {
                Output::Human => print!("{}", fnpkg_ops::render_list(&rows)),
                Output::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
            }
        }
        Action::Delete { name, force } => match mgr.delete(&name, force).await.context("failed to delete package")? {
            DeleteOutcome::Deleted { package } => println!("Package {} is deleted", package),
            DeleteOutcome::Blocked { package, dependents } => {
                // Not an error: the CLI reports and exits 0.
                println!(
                    "Package {} is used by function(s) {}, use -f to force delete",
                    package,
                    dependents.join(", ")
                );
            }
        },
        Action::Watch => watch(packages).await?,
    }
    Ok(())
}

async fn watch(packages: &dyn ResourceClient<Package>) -> Result<()> {
    let mut rx = packages.watch().await.context("start package watch")?;
    loop {
        tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(WatchEvent::Applied(p)) => println!("+ {} {}", p.metadata.name.unwrap_or_default(), p.spec.status.build_status),
                Some(WatchEvent::Deleted(p)) => println!("- {}", p.metadata.name.unwrap_or_default()),
                None => {
                    warn!("watch channel closed; exiting watch loop");
                    break;
                }
            },
            _ = signal::ctrl_c() => {
                info!("Ctrl-C received; shutting down watch loop");
                break;
            }
        }
    }
    Ok(())
}
