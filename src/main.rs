use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use delve_capability::Gateway;
use delve_capability::replay::ScriptedGateway;
use delve_config::RunConfig;
use delve_engine::{ChannelNotifier, Executor, ResearchGraph, RunStatus};

mod logging;
mod scenario;

use scenario::Scenario;

/// Delve - a multi-phase research agent engine
#[derive(Parser)]
#[command(name = "delve")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.delve)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Replay a scenario through the research graph
  Run {
    /// Path to the scenario file (JSON)
    scenario_file: PathBuf,

    /// Path to a run configuration (default: <data-dir>/config.json)
    #[arg(long)]
    config: Option<PathBuf>,
  },

  /// Print the research graph's phases and edges
  Describe {
    /// Path to a run configuration (default: <data-dir>/config.json)
    #[arg(long)]
    config: Option<PathBuf>,
  },
}

fn main() -> Result<()> {
  logging::init();
  let cli = Cli::parse();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".delve"),
  };

  match cli.command {
    Some(Commands::Run {
      scenario_file,
      config,
    }) => {
      let config = load_config(config.as_deref(), &data_dir)?;
      run_scenario(scenario_file, config)?;
    }
    Some(Commands::Describe { config }) => {
      let config = load_config(config.as_deref(), &data_dir)?;
      describe(&config)?;
    }
    None => {
      println!("delve - use --help to see available commands");
    }
  }

  Ok(())
}

fn load_config(explicit: Option<&Path>, data_dir: &Path) -> Result<RunConfig> {
  let path = match explicit {
    Some(path) => path.to_path_buf(),
    None => {
      let default = data_dir.join("config.json");
      if !default.exists() {
        debug!(path = %default.display(), "config_defaulted");
        return Ok(RunConfig::default());
      }
      default
    }
  };

  let content = std::fs::read_to_string(&path)
    .with_context(|| format!("failed to read config file: {}", path.display()))?;
  debug!(path = %path.display(), "config_loaded");
  RunConfig::from_json(&content)
    .with_context(|| format!("failed to parse config file: {}", path.display()))
}

fn describe(config: &RunConfig) -> Result<()> {
  let gateway: Arc<dyn Gateway> = Arc::new(ScriptedGateway::new([]));
  let graph = ResearchGraph::build(config, gateway).context("invalid research graph")?;
  println!("{}", serde_json::to_string_pretty(&graph.describe())?);
  Ok(())
}

fn run_scenario(scenario_file: PathBuf, config: RunConfig) -> Result<()> {
  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async { run_scenario_async(scenario_file, config).await })
}

async fn run_scenario_async(scenario_file: PathBuf, config: RunConfig) -> Result<()> {
  let content = tokio::fs::read_to_string(&scenario_file)
    .await
    .with_context(|| format!("failed to read scenario file: {}", scenario_file.display()))?;

  let scenario: Scenario = serde_json::from_str(&content)
    .with_context(|| format!("failed to parse scenario file: {}", scenario_file.display()))?;

  let input = match &scenario.input {
    Some(input) => input.clone(),
    None => read_input_from_stdin()?,
  };
  if input.trim().is_empty() {
    bail!("no research question given (set \"input\" in the scenario or pipe it on stdin)");
  }

  debug!(
    scenario = %scenario_file.display(),
    actions = scenario.actions.len(),
    tools = scenario.tools.len(),
    "scenario_loaded"
  );

  let gateway: Arc<dyn Gateway> = Arc::new(scenario.gateway());
  let graph = ResearchGraph::build(&config, Arc::clone(&gateway)).context("invalid research graph")?;
  let capabilities = ResearchGraph::capabilities(gateway, scenario.tools());

  // Stream events to stderr as JSON lines
  let (tx, mut rx) = mpsc::unbounded_channel();
  let printer = tokio::spawn(async move {
    while let Some(event) = rx.recv().await {
      if let Ok(line) = serde_json::to_string(&event) {
        eprintln!("{}", line);
      }
    }
  });

  let cancel = CancellationToken::new();
  let interrupt = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      interrupt.cancel();
    }
  });

  let executor = Executor::with_notifier(capabilities, ChannelNotifier::new(tx));
  let report = executor
    .execute(Arc::new(graph), input, config.limits(), cancel)
    .await;

  // Dropping the executor closes the event channel
  drop(executor);
  printer.await.context("event printer failed")?;

  info!(run_id = %report.run_id, status = ?report.status, "scenario_finished");
  println!("{}", serde_json::to_string_pretty(&report)?);

  if report.status != RunStatus::Succeeded {
    let reason = report
      .error()
      .map(|e| e.to_string())
      .unwrap_or_else(|| format!("{:?}", report.status));
    bail!("run {} did not succeed: {}", report.run_id, reason);
  }

  Ok(())
}

fn read_input_from_stdin() -> Result<String> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    return Ok(String::new());
  }

  let mut input = String::new();
  io::stdin()
    .read_to_string(&mut input)
    .context("failed to read research question from stdin")?;
  Ok(input.trim().to_string())
}
