mod config;

use clap::{Parser, Subcommand};
use config::SwitchyardConfig;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use switchyard_builtins::{builtin_registry, builtin_templates};
use switchyard_gateway::{AppState, AuthConfig, GatewayServer};
use switchyard_orchestrator::{WorkflowDefinition, WorkflowEngine};
use switchyard_stream::StreamingHub;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "switchyard",
    version,
    about = "Switchyard: agent job scheduler, workflow engine and event streams"
)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "switchyard.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// List registered agents and their capabilities
    Agents,
    /// Run a workflow definition in-process and print the final record
    Run {
        /// JSON workflow definition
        workflow: PathBuf,
        /// Context override, `key=value`; the value is parsed as JSON when it can be
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = SwitchyardConfig::load(&cli.config)?;

    match cli.command {
        Commands::Serve { host, port } => serve(config, host, port).await,
        Commands::Agents => {
            list_agents();
            Ok(())
        }
        Commands::Run { workflow, set } => run_workflow(config, &workflow, &set).await,
    }
}

async fn serve(
    config: SwitchyardConfig,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let addr = config.bind_addr(host, port);

    let registry = builtin_registry();
    info!(count = registry.agent_count(), "Built-in agents registered");

    let state = AppState::new(
        registry,
        config.scheduler,
        config.workflow,
        config.stream,
    );
    register_templates(&state.engine, config.templates_dir.as_deref())?;

    let background = state.spawn_background();
    let app = GatewayServer::build_with_auth(
        Arc::clone(&state),
        AuthConfig::new(config.security.api_keys),
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Switchyard gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for handle in background {
        handle.abort();
    }
    info!("Switchyard gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Built-in templates first, then any from `dir`, which may replace them.
fn register_templates(engine: &WorkflowEngine, dir: Option<&Path>) -> anyhow::Result<()> {
    for def in builtin_templates() {
        engine.register_template(def)?;
    }
    if let Some(dir) = dir {
        let loaded = engine.load_templates(dir)?;
        info!(dir = %dir.display(), count = loaded, "Workflow templates loaded");
    }
    Ok(())
}

fn list_agents() {
    let registry = builtin_registry();
    let agents = registry.list_descriptors();
    if agents.is_empty() {
        println!("No agents registered.");
        return;
    }
    println!("Registered agents:");
    for agent in &agents {
        println!("  {} — {}", agent.id, agent.description);
        for cap in &agent.capabilities {
            println!("    {}: {}", cap.name, cap.description);
        }
    }
    println!("\nTotal: {} agent(s)", agents.len());
}

async fn run_workflow(
    config: SwitchyardConfig,
    path: &Path,
    set: &[String],
) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        anyhow::anyhow!("Failed to read workflow file '{}': {e}", path.display())
    })?;
    let mut definition: WorkflowDefinition = serde_json::from_str(&raw)?;
    definition.context.extend(parse_overrides(set)?);

    let hub = StreamingHub::new(config.stream);
    let engine = WorkflowEngine::new(config.workflow, Arc::new(builtin_registry()), hub);
    let workflow = engine.create_custom(definition)?;
    info!(workflow_id = %workflow.id, name = %workflow.name, "Running workflow");

    let done = engine.execute(workflow.id).await?;
    println!("{}", serde_json::to_string_pretty(&done)?);
    Ok(())
}

fn parse_overrides(pairs: &[String]) -> anyhow::Result<Map<String, Value>> {
    let mut context = Map::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("expected KEY=VALUE, got '{pair}'"))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        context.insert(key.trim().to_string(), value);
    }
    Ok(context)
}
