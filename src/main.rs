//! Model Artifacts - Main entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use model_artifacts::{
    ArtifactManager, ExecutionContext, FileSystemRegistry, HfHub, Labels, LlmModelServer,
    SamplingParams, ServableModel, api, config::ManagerConfig, engine::ProcessEngineFactory,
    metrics,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;

#[derive(Parser, Debug)]
#[command(name = "model-artifacts")]
#[command(about = "Model artifact lifecycle manager", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override registry project
    #[arg(long, global = true)]
    project: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log format (json or pretty)
    #[arg(long, default_value = "json", global = true)]
    log_format: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the REST API (default)
    Serve {
        /// Override API port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Download a hub model and store it in the registry
    Store {
        /// Hub model identifier, e.g. org/model
        model_id: String,
        /// Registry key
        display_name: String,
        /// Extra label as key=value (repeatable)
        #[arg(long = "label", value_parser = parse_label)]
        labels: Vec<(String, String)>,
    },
    /// Show the latest stored version of an artifact
    Lookup { display_name: String },
    /// Run prompts through the engine with a stored artifact
    Infer {
        display_name: String,
        /// Prompt (repeatable, order is preserved)
        #[arg(long = "prompt", required = true)]
        prompts: Vec<String>,
        #[arg(long)]
        max_tokens: Option<u32>,
        #[arg(long)]
        temperature: Option<f32>,
    },
    /// Remove every stored version of an artifact
    Evict { display_name: String },
}

fn parse_label(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .filter(|(k, _)| !k.is_empty())
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("label '{}' must be key=value", s))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    match cli.log_format.as_str() {
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .with_writer(std::io::stderr)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .with_writer(std::io::stderr)
                .json()
                .init();
        }
    }

    // Load configuration
    let mut config = ManagerConfig::load(cli.config)?;

    // CLI overrides
    if let Some(project) = cli.project {
        config.project = project;
    }
    if let Some(Command::Serve { port: Some(port) }) = &cli.command {
        config.api_port = *port;
    }

    config.validate()?;

    tracing::info!(
        project = %config.project,
        registry_root = ?config.registry_root,
        stage_root = ?config.stage_root,
        engine = %config.engine.name,
        "Configuration loaded"
    );

    let manager = build_manager(&config)?;
    let ctx = ExecutionContext::new(config.project.clone());

    match cli.command.unwrap_or(Command::Serve { port: None }) {
        Command::Serve { .. } => serve(config, manager).await,
        Command::Store {
            model_id,
            display_name,
            labels,
        } => {
            let labels: Labels = labels.into_iter().collect();
            let artifact = manager
                .store_from_hub(&ctx, &model_id, &display_name, labels)
                .await?;
            print_json(&api::models::ArtifactInfo::from(&artifact))
        }
        Command::Lookup { display_name } => {
            let artifact = manager.lookup(&ctx, &display_name).await?;
            print_json(&api::models::ArtifactInfo::from(&artifact))
        }
        Command::Infer {
            display_name,
            prompts,
            max_tokens,
            temperature,
        } => {
            let defaults = SamplingParams::default();
            let sampling = SamplingParams {
                max_tokens: max_tokens.unwrap_or(defaults.max_tokens),
                temperature: temperature.unwrap_or(defaults.temperature),
                ..defaults
            };

            let artifact = manager.lookup(&ctx, &display_name).await?;
            let outputs = manager
                .run_offline_inference(&ctx, &artifact, &prompts, &sampling, &Default::default())
                .await?;
            print_json(&outputs)
        }
        Command::Evict { display_name } => {
            let versions_removed = manager.evict(&ctx, &display_name).await?;
            print_json(&api::models::EvictResponse {
                display_name,
                versions_removed,
            })
        }
    }
}

fn build_manager(config: &ManagerConfig) -> Result<ArtifactManager> {
    let registry = FileSystemRegistry::open(config.registry_root.clone())
        .with_context(|| format!("Failed to open registry at {:?}", config.registry_root))?;

    Ok(ArtifactManager::new(
        Arc::new(HfHub::new(config.hub.clone())),
        Arc::new(registry),
        Arc::new(ProcessEngineFactory::new(config.engine.clone())),
        config.lifecycle_settings(),
    ))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn serve(config: ManagerConfig, manager: ArtifactManager) -> Result<()> {
    tracing::info!("Starting model artifacts service");

    // Setup metrics
    let prometheus_handle = metrics::setup_metrics()?;

    // Load the servable model, if configured
    let server: Option<Arc<dyn ServableModel>> = match config.serving.clone() {
        Some(serving) => {
            let server = Arc::new(LlmModelServer::new(manager.clone(), serving));
            let ctx = ExecutionContext::new(config.project.clone());
            match server.load(&ctx).await {
                Ok(artifact) => tracing::info!(
                    server = %server.name(),
                    remote_uri = artifact.remote_uri().unwrap_or_default(),
                    "Servable model loaded"
                ),
                Err(e) => tracing::error!(
                    server = %server.name(),
                    error = %e,
                    "Failed to load servable model"
                ),
            }
            Some(server)
        }
        None => None,
    };

    // Setup API
    let app_state = api::AppState {
        manager,
        server,
        project: config.project.clone(),
        prometheus_handle,
    };

    let app = api::create_router(app_state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.api_port));
    tracing::info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind API server")?;

    // Graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server error")?;

    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}
