use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use conclave_coordinator::{
  ManagerConfig, RemotePipelineManager, ResultsClient, ResultsConfig, ServerContext, serve,
};
use conclave_docstore::{DbRegistry, ReplicationHub};
use conclave_registry::ComputationRegistry;
use conclave_sim::{register_builtins, run_simulation};

/// Conclave - coordination core for decentralized pipeline runs
#[derive(Parser)]
#[command(name = "conclave")]
#[command(version, about, long_about = None)]
struct Cli {
  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run the coordination server
  Serve {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:3400")]
    addr: SocketAddr,

    /// Base URL of the API server results are saved to
    #[arg(long, default_value = "http://localhost:3100")]
    api_url: String,

    /// Path to a JSON credentials file for the API server
    #[arg(long)]
    credentials: Option<PathBuf>,

    /// Run-level deadline in seconds
    #[arg(long, default_value_t = 300)]
    run_deadline: u64,
  },

  /// Run a simulation from a decl file
  Simulate {
    /// Path to the decl file (JSON)
    decl_file: PathBuf,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let cli = Cli::parse();

  match cli.command {
    Some(Commands::Serve {
      addr,
      api_url,
      credentials,
      run_deadline,
    }) => {
      serve_coordinator(addr, api_url, credentials, run_deadline).await?;
    }
    Some(Commands::Simulate { decl_file }) => {
      simulate(decl_file).await?;
    }
    None => {
      println!("conclave - use --help to see available commands");
    }
  }

  Ok(())
}

async fn serve_coordinator(
  addr: SocketAddr,
  api_url: String,
  credentials: Option<PathBuf>,
  run_deadline: u64,
) -> Result<()> {
  let credentials = match credentials {
    Some(path) => {
      let text = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("failed to read credentials file: {}", path.display()))?;
      serde_json::from_str(&text)
        .with_context(|| format!("failed to parse credentials file: {}", path.display()))?
    }
    None => serde_json::json!({}),
  };

  let hub = ReplicationHub::new(Duration::ZERO);
  let dbs = Arc::new(DbRegistry::replicated("remote", hub));
  let registry = Arc::new(ComputationRegistry::new());
  register_builtins(&registry);

  let ctx = Arc::new(ServerContext {
    manager: RemotePipelineManager::new(
      ManagerConfig {
        run_deadline: Duration::from_secs(run_deadline),
      },
      dbs,
      registry,
    ),
    results: ResultsClient::new(ResultsConfig::new(api_url, credentials)),
  });

  serve(addr, ctx).await.context("coordination server failed")?;
  Ok(())
}

async fn simulate(decl_file: PathBuf) -> Result<()> {
  eprintln!("Running simulation: {}", decl_file.display());

  let outcome = run_simulation(&decl_file)
    .await
    .with_context(|| format!("simulation failed: {}", decl_file.display()))?;

  for (username, record) in &outcome.runs {
    eprintln!("  {} finished with status {:?}", username, record.status);
  }

  println!("{}", serde_json::to_string_pretty(&outcome.merged)?);
  Ok(())
}
