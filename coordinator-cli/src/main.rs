use clap::{Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use std::net::SocketAddr;
use tracing::info;

use arp_coordinator::types::{CoordinatorEvent, NodeRunId};
use arp_coordinator::{
    ConfigError, CoordinatorConfig, CoordinatorConfigBuilder, CoordinatorError, CoordinatorServer,
    Peers, RunCoordinator, RunCoordinatorClient, shutdown_signal,
};

const DEFAULT_URL: &str = "http://127.0.0.1:8081";

#[derive(Parser, Debug)]
#[command(name = "arp-run-coordinator", version)]
#[command(about = "ARP Run Coordinator - NodeRun lifecycle authority")]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Json, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the coordinator API
    Serve {
        /// Listen address, overrides ARP_RUN_COORDINATOR_BIND
        #[arg(long)]
        bind: Option<SocketAddr>,
        /// Enable a permissive CORS layer
        #[arg(long)]
        cors: bool,
    },
    /// Print the effective configuration as JSON
    Config,
    /// Check a running coordinator
    Health {
        #[arg(long, default_value = DEFAULT_URL)]
        url: String,
    },
    /// Inspect and control NodeRuns on a running coordinator
    NodeRun {
        #[arg(long, default_value = DEFAULT_URL, global = true)]
        url: String,
        #[command(subcommand)]
        command: NodeRunCommands,
    },
}

#[derive(Subcommand, Debug)]
enum NodeRunCommands {
    /// Print a NodeRun
    Get { node_run_id: String },
    /// Dispatch a queued NodeRun
    Dispatch { node_run_id: String },
    /// Cancel a NodeRun
    Cancel { node_run_id: String },
    /// Follow a NodeRun's events until it finishes
    Watch { node_run_id: String },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error("Failed to encode output: {0}")]
    Output(#[from] serde_json::Error),
}

fn init_tracing(format: LogFormat) {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let env_filter = match "info".parse() {
        Ok(directive) => env_filter.add_directive(directive),
        Err(_) => env_filter,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(env_filter);
    let _ = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    if let Err(err) = run(cli.command).await {
        tracing::error!(error = %err, "Command failed");
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

async fn run(command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Serve { bind, cors } => serve(bind, cors).await,
        Commands::Config => {
            let config = CoordinatorConfig::from_env()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Health { url } => {
            let client = RunCoordinatorClient::new(&url)?;
            let health = client.health().await?;
            let version = client.version().await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "health": health,
                    "version": version,
                }))?
            );
            Ok(())
        }
        Commands::NodeRun { url, command } => node_run(&url, command).await,
    }
}

async fn serve(bind: Option<SocketAddr>, cors: bool) -> Result<(), CliError> {
    let mut builder = CoordinatorConfigBuilder::from_env()?;
    if let Some(addr) = bind {
        builder = builder.bind_addr(addr);
    }
    if cors {
        builder = builder.enable_cors(true);
    }
    let config = builder.build()?;

    let peers = Peers::from_config(&config)?;
    info!(peers = ?peers, "Peers configured");

    let coordinator = RunCoordinator::from_config(&config, peers);
    CoordinatorServer::new(coordinator)
        .with_cors(config.enable_cors)
        .serve(&config.bind_addr.to_string(), shutdown_signal())
        .await?;
    Ok(())
}

async fn node_run(url: &str, command: NodeRunCommands) -> Result<(), CliError> {
    let client = RunCoordinatorClient::new(url)?;

    let node_run = match command {
        NodeRunCommands::Get { node_run_id } => client.get_node_run(&parse_id(&node_run_id)?).await?,
        NodeRunCommands::Dispatch { node_run_id } => client.dispatch(&parse_id(&node_run_id)?).await?,
        NodeRunCommands::Cancel { node_run_id } => client.cancel(&parse_id(&node_run_id)?).await?,
        NodeRunCommands::Watch { node_run_id } => {
            let mut stream = client
                .stream_node_run_events(&parse_id(&node_run_id)?)
                .await?;
            while let Some(event) = stream.next().await {
                if let CoordinatorEvent::NodeRun(event) = event? {
                    println!("{}", serde_json::to_string(&event)?);
                }
            }
            return Ok(());
        }
    };

    println!("{}", serde_json::to_string_pretty(&node_run)?);
    Ok(())
}

fn parse_id(raw: &str) -> Result<NodeRunId, CoordinatorError> {
    Ok(NodeRunId::parse(raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_serve_with_overrides() {
        let cli = Cli::try_parse_from([
            "arp-run-coordinator",
            "--log-format",
            "pretty",
            "serve",
            "--bind",
            "0.0.0.0:9000",
            "--cors",
        ])
        .unwrap();

        assert_eq!(cli.log_format, LogFormat::Pretty);
        match cli.command {
            Commands::Serve { bind, cors } => {
                assert_eq!(bind.unwrap().port(), 9000);
                assert!(cors);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_node_run_watch_defaults_url() {
        let cli =
            Cli::try_parse_from(["arp-run-coordinator", "node-run", "watch", "node_run_1"]).unwrap();
        match cli.command {
            Commands::NodeRun { url, command } => {
                assert_eq!(url, DEFAULT_URL);
                assert!(matches!(command, NodeRunCommands::Watch { .. }));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_invalid_node_run_id_is_rejected() {
        assert!(parse_id("bad id").is_err());
    }
}
