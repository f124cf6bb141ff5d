//! Passdeck CLI - Tunnel orchestration for remote forwarding agents
//!
//! Registers agent endpoints, creates and manages tunnels on them, and
//! follows their event streams into the local store.

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use passdeck_agent::{AgentClient, HttpAgentClient};
use passdeck_control::{
    agent_endpoint, ansi, BatchExecutor, BatchOutcome, ConfigGroup, ControlConfig, CreateRequest,
    CreatedTunnels, PortValue, QuickCreate, StandardBatchItem, StructuredCreate, TelemetryReader,
    TemplateRequest, TunnelOrchestrator, TunnelRef,
};
use passdeck_store::entities::{endpoint, tunnel, Endpoint};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, QueryOrder, Set};
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::ConfigManager;

/// Passdeck - Orchestrate tunnels across remote forwarding agents
#[derive(Parser, Debug)]
#[command(name = "passdeck")]
#[command(about = "Passdeck - Orchestrate tunnels across remote forwarding agents")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ", built ", env!("BUILD_TIME"), ")"))]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Database URL (defaults to ~/.passdeck/passdeck.db)
    #[arg(long, global = true, env = "PASSDECK_DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create or upgrade the database schema
    Migrate,

    /// Show or change the CLI configuration (~/.passdeck/config.json)
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Manage agent endpoints
    Endpoint {
        #[command(subcommand)]
        command: EndpointCommands,
    },

    /// List tunnels with their status and traffic counters
    List {
        /// Only tunnels on this endpoint
        #[arg(long)]
        endpoint: Option<i32>,
    },

    /// Create a tunnel from individual fields
    Create {
        #[arg(long)]
        name: String,

        /// Endpoint id
        #[arg(long)]
        endpoint: i32,

        /// server or client
        #[arg(long)]
        mode: String,

        /// Listen host (empty = all interfaces)
        #[arg(long, default_value = "")]
        tunnel_address: String,

        #[arg(long)]
        tunnel_port: String,

        #[arg(long)]
        target_address: String,

        #[arg(long)]
        target_port: String,

        /// off, self-signed or custom-cert (also 0-2)
        #[arg(long)]
        tls: Option<String>,

        #[arg(long)]
        cert: Option<String>,

        #[arg(long)]
        key: Option<String>,

        /// debug, info, warn, error, event or none
        #[arg(long)]
        log: Option<String>,

        #[arg(long)]
        min: Option<String>,

        #[arg(long)]
        max: Option<String>,
    },

    /// Create a tunnel from a URL such as client://:8080/host:9090?log=info
    #[command(long_about = r#"
Create a tunnel from a single URL:

  scheme://[listenHost]:listenPort/targetHost:targetPort?key=value&...

The scheme is server or client. Recognized parameters are log, tls (0-2),
cert (or crt), key, min and max. The URL may be percent-encoded.

EXAMPLES:
  passdeck quick --endpoint 1 --name web "server://:10101/127.0.0.1:8080?tls=1"
  passdeck quick --endpoint 2 --name rdp "client://:3389/10.0.0.4:3389?log=debug"
    "#)]
    Quick {
        #[arg(long)]
        endpoint: i32,

        #[arg(long)]
        name: String,

        url: String,
    },

    /// Create tunnels from a JSON template (single, bothway or intranet)
    Template {
        /// Path to the template JSON
        file: PathBuf,
    },

    /// Create many tunnels from a JSON file ({"standard": [...]} or {"config": [...]})
    BatchCreate {
        #[arg(long)]
        file: PathBuf,
    },

    /// Delete a tunnel by instance id and wait for the agent to confirm
    Delete {
        instance_id: String,

        /// Confirmation timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Purge instead of moving to the recycle bin
        #[arg(long)]
        no_recycle: bool,
    },

    /// Delete several tunnels (local ids or instance ids)
    BatchDelete {
        /// Numeric values are local ids; prefix with `instance:` to force an instance id
        targets: Vec<String>,

        #[arg(long)]
        no_recycle: bool,
    },

    /// Start, stop or restart a tunnel
    Control {
        /// Local id or instance id
        target: String,

        /// start, stop or restart
        action: String,
    },

    /// Rename a tunnel
    Rename { id: i32, name: String },

    /// Replace a tunnel with a new definition (JSON file with structured fields)
    Edit { id: i32, file: PathBuf },

    /// Show recent log lines of a tunnel
    Logs {
        /// Local id or instance id
        target: String,

        #[arg(long, default_value = "50")]
        limit: usize,

        /// Render ANSI colors as HTML
        #[arg(long)]
        html: bool,
    },

    /// Show a tunnel with its endpoint, logs and traffic trend
    Details {
        /// Local id or instance id
        target: String,
    },

    /// Show the operation history
    History {
        #[arg(long)]
        limit: Option<u64>,
    },

    /// Follow an endpoint's event stream into the store
    Watch { endpoint: i32 },
}

#[derive(Subcommand, Debug)]
enum EndpointCommands {
    /// Register an agent endpoint
    Add {
        #[arg(long)]
        name: String,

        /// Agent base URL, e.g. http://10.0.0.5:3000
        #[arg(long)]
        url: String,

        #[arg(long, default_value = "/api")]
        api_path: String,

        #[arg(long, env = "PASSDECK_API_KEY")]
        api_key: String,
    },

    /// List registered endpoints
    List,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Write the effective configuration to disk, filling in defaults
    Init,

    /// Set the database URL; omit it to return to the default SQLite file
    SetDatabaseUrl { url: Option<String> },

    /// Set how long deletes wait for the agent's confirmation
    SetDeleteTimeout { ms: u64 },
}

/// Batch file layout
#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum BatchFile {
    Standard(Vec<StandardBatchItem>),
    Config(Vec<ConfigGroup>),
}

/// Setup logging; `RUST_LOG` overrides the verbosity flag
fn setup_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

struct App {
    db: DatabaseConnection,
    config: ControlConfig,
    orchestrator: TunnelOrchestrator,
}

impl App {
    async fn open(database_url: Option<String>) -> Result<Self> {
        let file_config = ConfigManager::load()?;
        let url = ConfigManager::database_url(database_url, &file_config)?;

        let db = passdeck_store::connect(&url)
            .await
            .context(format!("Failed to connect to database: {}", url))?;
        passdeck_store::migrate(&db)
            .await
            .context("Failed to run database migrations")?;

        let agent: Arc<dyn AgentClient> = Arc::new(HttpAgentClient::new());
        let orchestrator = TunnelOrchestrator::new(db.clone(), agent, file_config.control.clone());

        Ok(Self {
            db,
            config: file_config.control,
            orchestrator,
        })
    }

    /// Subscribe to the endpoints' event streams and apply them in the background
    ///
    /// Subscriptions are established before returning so that confirmations
    /// of deletes sent afterwards are not missed.
    async fn watch_endpoints(&self, endpoint_ids: &[i32]) -> Result<()> {
        for &id in endpoint_ids {
            let Some(endpoint) = Endpoint::find_by_id(id).one(&self.db).await? else {
                warn!("Endpoint {} not found; its events will not be followed", id);
                continue;
            };
            match self
                .orchestrator
                .agent()
                .events(&agent_endpoint(&endpoint))
                .await
            {
                Ok(stream) => {
                    let ingestor = self.orchestrator.ingestor();
                    tokio::spawn(async move {
                        ingestor.run(id, stream).await;
                    });
                }
                Err(e) => warn!("Could not subscribe to events of endpoint {}: {}", id, e),
            }
        }
        Ok(())
    }

    /// Local id behind a command-line tunnel reference
    async fn tunnel_id(&self, raw: &str) -> Result<i32> {
        match parse_ref(raw) {
            TunnelRef::Local(id) => Ok(id),
            TunnelRef::Instance(instance_id) => Ok(self
                .orchestrator
                .resolver()
                .resolve_tunnel_id(&instance_id)
                .await?),
        }
    }

    async fn all_endpoint_ids(&self) -> Result<Vec<i32>> {
        Ok(Endpoint::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(|e| e.id)
            .collect())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let command = match cli.command {
        Commands::Config { command } => return run_config(command),
        command => command,
    };

    let app = App::open(cli.database_url).await?;

    match command {
        Commands::Config { .. } => unreachable!("handled before opening the database"),
        Commands::Migrate => {
            info!("Database schema is up to date");
        }
        Commands::Endpoint { command } => run_endpoint(&app, command).await?,
        Commands::List { endpoint } => {
            let tunnels = app.orchestrator.list_tunnels(endpoint).await?;
            if tunnels.is_empty() {
                println!("No tunnels");
            }
            for t in &tunnels {
                println!(
                    "{:>4}  {:<24} {:<10} {:<8} tcp {}/{}  udp {}/{}  {}",
                    t.id,
                    t.name,
                    t.instance().unwrap_or("-"),
                    format!("{:?}", t.status).to_lowercase(),
                    t.tcp_rx,
                    t.tcp_tx,
                    t.udp_rx,
                    t.udp_tx,
                    t.command_line
                );
            }
        }
        Commands::Create {
            name,
            endpoint,
            mode,
            tunnel_address,
            tunnel_port,
            target_address,
            target_port,
            tls,
            cert,
            key,
            log,
            min,
            max,
        } => {
            let request = CreateRequest::Structured(StructuredCreate {
                name,
                endpoint_id: Some(endpoint),
                mode: Some(mode),
                tunnel_address: Some(tunnel_address),
                tunnel_port: Some(PortValue::Text(tunnel_port)),
                target_address: Some(target_address),
                target_port: Some(PortValue::Text(target_port)),
                tls_mode: tls,
                cert_path: cert,
                key_path: key,
                log_level: log,
                min: min.map(PortValue::Text),
                max: max.map(PortValue::Text),
            });
            let created = app.orchestrator.create_from_request(&request).await?;
            print_created(&created);
        }
        Commands::Quick {
            endpoint,
            name,
            url,
        } => {
            let request = CreateRequest::Quick(QuickCreate {
                endpoint_id: endpoint,
                name,
                url,
            });
            let created = app.orchestrator.create_from_request(&request).await?;
            print_created(&created);
        }
        Commands::Template { file } => {
            let template: TemplateRequest = read_json(&file)?;
            let created = app
                .orchestrator
                .create_from_request(&CreateRequest::Template(template))
                .await?;
            print_created(&created);
        }
        Commands::BatchCreate { file } => {
            let batch = BatchExecutor::new(app.orchestrator.clone());
            let outcome = match read_json::<BatchFile>(&file)? {
                BatchFile::Standard(items) => batch.create_standard(&items).await?,
                BatchFile::Config(groups) => batch.create_config_groups(&groups).await?,
            };
            print_outcome(&outcome);
        }
        Commands::Delete {
            instance_id,
            timeout_ms,
            no_recycle,
        } => {
            let row = app
                .orchestrator
                .resolver()
                .resolve_target(&TunnelRef::Instance(instance_id.clone()))
                .await?;
            app.watch_endpoints(&[row.endpoint_id]).await?;

            let timeout = timeout_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| app.config.delete_timeout());
            app.orchestrator
                .delete_tunnel_and_wait(&instance_id, timeout, !no_recycle)
                .await?;
            println!("Deleted tunnel {} (instance {})", row.name, instance_id);
        }
        Commands::BatchDelete {
            targets,
            no_recycle,
        } => {
            app.watch_endpoints(&app.all_endpoint_ids().await?).await?;
            let refs: Vec<TunnelRef> = targets.iter().map(|t| parse_ref(t)).collect();
            let outcome = BatchExecutor::new(app.orchestrator.clone())
                .delete(&refs, !no_recycle)
                .await?;
            print_outcome(&outcome);
        }
        Commands::Control { target, action } => {
            let row = app
                .orchestrator
                .control_tunnel(&parse_ref(&target), &action)
                .await?;
            println!("{} -> {:?}", row.name, row.status);
        }
        Commands::Rename { id, name } => {
            let row = app.orchestrator.rename_tunnel(id, &name).await?;
            println!("Tunnel {} is now named {}", row.id, row.name);
        }
        Commands::Edit { id, file } => {
            let request: StructuredCreate = read_json(&file)?;
            let current = app
                .orchestrator
                .resolver()
                .resolve_target(&TunnelRef::Local(id))
                .await?;
            app.watch_endpoints(&[current.endpoint_id]).await?;

            let row = app.orchestrator.edit_tunnel(id, &request).await?;
            println!("Tunnel {} replaced by tunnel {}", id, row.id);
            print_tunnel(&row);
        }
        Commands::Logs {
            target,
            limit,
            html,
        } => {
            let id = app.tunnel_id(&target).await?;
            let reader = TelemetryReader::new(app.db.clone(), app.config.clone());
            for line in reader.recent_logs(id, limit).await? {
                let text = if html {
                    ansi::to_html(&line.text)
                } else {
                    line.text
                };
                println!("{}  {}", line.time.to_rfc3339(), text);
            }
        }
        Commands::Details { target } => {
            let id = app.tunnel_id(&target).await?;
            let reader = TelemetryReader::new(app.db.clone(), app.config.clone());
            let details = reader.details(id).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&details).context("Failed to render details")?
            );
        }
        Commands::History { limit } => {
            let limit = limit.unwrap_or(app.config.operation_log_limit as u64);
            for entry in app.orchestrator.audit().recent(limit).await? {
                println!(
                    "{}  {:<8} {:<8} {}{}",
                    entry.created_at.to_rfc3339(),
                    entry.action,
                    format!("{:?}", entry.status).to_lowercase(),
                    entry.tunnel_name,
                    entry
                        .message
                        .map(|m| format!(": {}", m))
                        .unwrap_or_default()
                );
            }
        }
        Commands::Watch { endpoint } => {
            let endpoint = Endpoint::find_by_id(endpoint)
                .one(&app.db)
                .await?
                .context(format!("Endpoint {} not found", endpoint))?;
            let ingestor = app.orchestrator.ingestor();
            let agent = app.orchestrator.agent();
            let target = agent_endpoint(&endpoint);

            tokio::select! {
                result = ingestor.follow(agent, &target) => {
                    let applied = result?;
                    info!("Applied {} events from endpoint {}", applied, endpoint.name);
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted; stopped following endpoint {}", endpoint.name);
                }
            }
        }
    }

    Ok(())
}

fn run_config(command: ConfigCommands) -> Result<()> {
    let mut config = ConfigManager::load()?;
    match command {
        ConfigCommands::Show => {}
        ConfigCommands::Init => ConfigManager::save(&config)?,
        ConfigCommands::SetDatabaseUrl { url } => {
            config.database_url = url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty());
            ConfigManager::save(&config)?;
        }
        ConfigCommands::SetDeleteTimeout { ms } => {
            if ms == 0 {
                bail!("Delete timeout must be positive");
            }
            config.control.delete_timeout_ms = ms;
            ConfigManager::save(&config)?;
        }
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&config).context("Failed to render config")?
    );
    Ok(())
}

async fn run_endpoint(app: &App, command: EndpointCommands) -> Result<()> {
    match command {
        EndpointCommands::Add {
            name,
            url,
            api_path,
            api_key,
        } => {
            let url = url.trim().trim_end_matches('/').to_string();
            if url.is_empty() {
                bail!("Endpoint URL must not be empty");
            }
            let endpoint = endpoint::ActiveModel {
                name: Set(name.trim().to_string()),
                url: Set(url),
                api_path: Set(api_path),
                api_key: Set(api_key),
                created_at: Set(Utc::now()),
                ..Default::default()
            }
            .insert(&app.db)
            .await
            .context("Failed to register endpoint")?;
            println!("Registered endpoint {} ({})", endpoint.id, endpoint.name);
        }
        EndpointCommands::List => {
            let endpoints = Endpoint::find()
                .order_by_asc(endpoint::Column::Id)
                .all(&app.db)
                .await?;
            if endpoints.is_empty() {
                println!("No endpoints registered");
            }
            for e in endpoints {
                println!("{:>4}  {:<20} {}{}", e.id, e.name, e.url, e.api_path);
            }
        }
    }
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let json =
        std::fs::read_to_string(path).context(format!("Failed to read file: {:?}", path))?;
    serde_json::from_str(&json).context(format!("Failed to parse JSON file: {:?}", path))
}

/// Numeric targets are local ids; `instance:` forces an instance id
fn parse_ref(raw: &str) -> TunnelRef {
    let raw = raw.trim();
    if let Some(instance) = raw.strip_prefix("instance:") {
        return TunnelRef::Instance(instance.to_string());
    }
    match raw.parse::<i32>() {
        Ok(id) => TunnelRef::Local(id),
        Err(_) => TunnelRef::Instance(raw.to_string()),
    }
}

fn print_tunnel(t: &tunnel::Model) {
    println!(
        "{:>4}  {:<24} {:<10} {}",
        t.id,
        t.name,
        t.instance().unwrap_or("-"),
        t.command_line
    );
}

fn print_created(created: &CreatedTunnels) {
    for t in created.tunnels() {
        print_tunnel(t);
    }
}

fn print_outcome(outcome: &BatchOutcome) {
    for r in &outcome.results {
        match &r.error {
            None => println!("{:>3}. ok      {}", r.index, r.identifier),
            Some(e) => println!("{:>3}. failed  {}: {}", r.index, r.identifier, e),
        }
    }
    println!(
        "{} succeeded, {} failed",
        outcome.success_count, outcome.fail_count
    );
}
