mod config;
mod daemon;
mod data_dir;
mod escalation;
mod health;
mod nudge;
mod registry;
mod session;
mod signals;
mod status;
#[cfg(test)]
mod testing;
mod tmux;
mod triage;
mod watchdog;

use clap::{Parser, Subcommand};
use config::WardenConfig;
use daemon::Daemon;
use data_dir::DataDir;
use health::{HealthAction, HealthCheck};
use signals::SignalHandler;
use status::StatusFile;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use watchdog::{Collaborators, TickSummary, Watchdog};

/// A watchdog daemon for long-running agent sessions: reconcile recorded
/// state against tmux liveness, nudge stalled agents, escalate to triage,
/// and terminate the ones that never come back.
#[derive(Parser, Debug)]
#[command(name = "warden", version, about)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Working root containing the `.warden/` control directory (default: cwd)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Config file path (default: <root>/.warden/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Stale threshold in milliseconds (overrides config)
    #[arg(long, global = true)]
    stale_ms: Option<u64>,

    /// Zombie threshold in milliseconds (overrides config)
    #[arg(long, global = true)]
    zombie_ms: Option<u64>,

    /// Tick interval in milliseconds (overrides config)
    #[arg(long, global = true)]
    interval_ms: Option<u64>,

    /// Stall duration per escalation level in milliseconds (overrides config)
    #[arg(long, global = true)]
    nudge_interval_ms: Option<u64>,

    /// Consult triage at escalation level 2
    #[arg(long, global = true)]
    tier1: bool,

    /// Extra logging (every verdict, collaborator failures)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Run the watchdog daemon until SIGINT/SIGTERM (default)
    Run,
    /// Run a single reconciliation pass and print the summary
    Tick,
    /// Show daemon status and the session registry
    Status,
    /// Print the resolved configuration and exit
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);
    tracing::debug!(?cli, "parsed CLI arguments");

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("warden: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(cli: &Cli) {
    let default = if cli.verbose {
        "warden=debug"
    } else if cli.quiet {
        "warden=warn"
    } else {
        "warden=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let root = match &cli.root {
        Some(root) => root.clone(),
        None => std::env::current_dir()?,
    };
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| DataDir::for_root(&root, Path::new(".warden")).config());

    let mut config = WardenConfig::load(&config_path)?;
    apply_overrides(&mut config, &cli);
    config.validate()?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Config => {
            println!("# resolved from {}", config_path.display());
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Status => {
            print_status(&DataDir::for_root(&root, &config.storage.data_dir))?;
            Ok(())
        }
        Command::Tick => {
            let watchdog = build_watchdog(root, &config);
            let summary = watchdog.run_tick().await?;
            print_summary(&summary);
            if summary.persisted {
                println!("registry: {}", watchdog.store().path().display());
            }
            Ok(())
        }
        Command::Run => {
            let watchdog = Arc::new(build_watchdog(root, &config));
            watchdog.data_dir().init()?;

            let daemon = Daemon::start(
                watchdog,
                Duration::from_millis(config.watchdog.tick_interval_ms),
            );
            let cancel = daemon.cancellation_token();
            let _signals = SignalHandler::install(cancel.clone())?;

            cancel.cancelled().await;
            daemon.shutdown().await;
            Ok(())
        }
    }
}

fn apply_overrides(config: &mut WardenConfig, cli: &Cli) {
    let w = &mut config.watchdog;
    if let Some(ms) = cli.stale_ms {
        w.stale_threshold_ms = ms;
    }
    if let Some(ms) = cli.zombie_ms {
        w.zombie_threshold_ms = ms;
    }
    if let Some(ms) = cli.interval_ms {
        w.tick_interval_ms = ms;
    }
    if let Some(ms) = cli.nudge_interval_ms {
        w.nudge_interval_ms = ms;
    }
    if cli.tier1 {
        w.tier1_enabled = true;
    }
}

fn build_watchdog(root: PathBuf, config: &WardenConfig) -> Watchdog {
    Watchdog::new(root, config, Collaborators::production(config))
        .with_observer(Arc::new(log_verdict))
}

/// Default observer: the verdict log is the operator's view of the loop.
fn log_verdict(check: &HealthCheck) {
    match check.action {
        HealthAction::None => tracing::debug!(
            agent = %check.agent_name,
            state = %check.state,
            tmux_alive = check.tmux_alive,
            "healthy"
        ),
        HealthAction::Escalate => tracing::warn!(
            agent = %check.agent_name,
            last_activity = %check.last_activity,
            "stalled"
        ),
        HealthAction::Investigate => tracing::warn!(
            agent = %check.agent_name,
            note = check.reconciliation_note.as_deref().unwrap_or(""),
            "needs investigation"
        ),
        HealthAction::Terminate => tracing::warn!(
            agent = %check.agent_name,
            tmux_alive = check.tmux_alive,
            at = %check.timestamp,
            note = check.reconciliation_note.as_deref().unwrap_or(""),
            "terminating"
        ),
    }
}

fn print_summary(summary: &TickSummary) {
    println!(
        "evaluated {}: {} healthy, {} escalated, {} investigate, {} terminated, {} recovered{}",
        summary.evaluated,
        summary.healthy,
        summary.escalated,
        summary.investigate,
        summary.terminated,
        summary.recovered,
        if summary.persisted { " (registry updated)" } else { "" }
    );
}

fn print_status(data_dir: &DataDir) -> Result<(), registry::RegistryError> {
    match StatusFile::new(data_dir.status()).read() {
        Some(status) => {
            println!(
                "daemon: pid {} {:?}, {} ticks, last tick {}",
                status.pid,
                status.state,
                status.ticks,
                status
                    .last_tick
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string())
            );
            if let Some(err) = status.last_error {
                println!("last error: {err}");
            }
        }
        None => println!("daemon: not running"),
    }

    let entries = registry::SessionStore::new(data_dir.sessions()).load_entries()?;
    if entries.is_empty() {
        println!("no sessions");
        return Ok(());
    }
    println!("{:<24} {:<10} {:>5}  STALLED SINCE", "AGENT", "STATE", "LEVEL");
    let sessions: Vec<_> = entries.iter().filter_map(|e| e.as_session()).collect();
    for s in &sessions {
        println!(
            "{:<24} {:<10} {:>5}  {}",
            s.agent_name,
            s.state.as_str(),
            s.escalation_level,
            s.stalled_since
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string())
        );
    }
    let unrecognized = entries.len() - sessions.len();
    if unrecognized > 0 {
        println!("({unrecognized} unrecognized records left untouched)");
    }
    Ok(())
}
