use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rdiag_core::{DiagnosticsConfig, Engine, Record, Replayer, TraceEvent, parse_trace};

#[derive(Parser)]
#[command(
    name = "rdiag",
    about = "Replay UI lifecycle traces through the render diagnostic engine"
)]
struct Cli {
    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a trace and print the diagnostic summary
    Replay {
        /// JSON-lines trace file
        trace: PathBuf,

        /// TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Entries per ranking
        #[arg(long, default_value_t = 5)]
        top: usize,
    },

    /// Replay a trace and write the retained records as JSON
    Export {
        /// JSON-lines trace file
        trace: PathBuf,

        /// Output file path
        out: PathBuf,

        /// TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print the effective configuration as TOML
    Config {
        /// TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Replay { trace, config, top } => cmd_replay(trace, config.as_deref(), *top),
        Commands::Export { trace, out, config } => cmd_export(trace, out, config.as_deref()),
        Commands::Config { config } => cmd_config(config.as_deref()),
    }
}

fn load_config(path: Option<&Path>) -> Result<DiagnosticsConfig> {
    let config: DiagnosticsConfig = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))?
        }
        None => DiagnosticsConfig::default(),
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn load_trace(path: &Path) -> Result<Vec<TraceEvent>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let events =
        parse_trace(&text).with_context(|| format!("failed to parse trace {}", path.display()))?;
    tracing::debug!(events = events.len(), path = %path.display(), "trace loaded");
    Ok(events)
}

/// Build an engine from the config and run the whole trace through it.
fn run(trace: &Path, config: Option<&Path>) -> Result<(Engine, Replayer)> {
    let config = load_config(config)?;
    let events = load_trace(trace)?;

    let mut engine = Engine::new(config).context("failed to build engine")?;
    let start = events.iter().find_map(TraceEvent::timestamp).unwrap_or(0.0);
    engine.init(start);

    let mut replayer = Replayer::new();
    replayer
        .replay(&mut engine, &events)
        .context("failed to replay trace")?;
    Ok((engine, replayer))
}

fn cmd_replay(trace: &Path, config: Option<&Path>, top: usize) -> Result<()> {
    let (engine, replayer) = run(trace, config)?;
    let summary = engine.summary();

    println!("events:      {}", replayer.applied());
    println!("records:     {}", summary.retained_records);
    println!(
        "updates:     {} (necessary {:.1}%, unnecessary {:.1}%)",
        summary.total_updates, summary.necessary_pct, summary.unnecessary_pct
    );
    println!("entities:    {}", summary.tracked_entities);
    println!("storms:      {}", summary.active_storms);
    println!("recreations: {}", summary.recreations);

    let unnecessary = engine.top_unnecessary(top);
    if !unnecessary.is_empty() {
        println!("\ntop unnecessary:");
        for s in unnecessary {
            println!(
                "  {} {}  unnecessary={}/{}",
                s.entity_id, s.display_name, s.unnecessary, s.total_updates
            );
        }
    }

    let slowest = engine.top_slowest(top);
    if !slowest.is_empty() {
        println!("\nslowest:");
        for s in slowest {
            println!(
                "  {} {}  avg={:.2}ms",
                s.entity_id,
                s.display_name,
                s.average_duration_ms.unwrap_or_default()
            );
        }
    }

    let storms = engine.active_storms();
    if !storms.is_empty() {
        println!("\nactive storms:");
        for storm in storms.iter().take(top) {
            let name = engine
                .entity_stats(storm.entity_id)
                .map_or("?", |s| s.display_name.as_str());
            println!(
                "  {} {}  count={} severity={}",
                storm.entity_id,
                name,
                storm.count,
                storm.severity.as_str()
            );
        }
    }
    Ok(())
}

fn cmd_export(trace: &Path, out: &Path, config: Option<&Path>) -> Result<()> {
    let (engine, _) = run(trace, config)?;
    let records: Vec<&Record> = engine.records().collect();

    let json = serde_json::to_string_pretty(&records).context("failed to serialize records")?;
    std::fs::write(out, &json).with_context(|| format!("failed to write {}", out.display()))?;

    println!("exported {} records to {}", records.len(), out.display());
    Ok(())
}

fn cmd_config(config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let text = toml::to_string(&config).context("failed to serialize config")?;
    print!("{text}");
    Ok(())
}
