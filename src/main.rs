//! Command-line entry point for the circuit-assignment simulator

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::filter::LevelFilter;

use circuit_sched::{
    Catalog, CircuitSource, GeneticConfig, GreedyConfig, Mode, SelectionPolicy, SimConfig, input,
    report, strategy,
};

#[derive(Debug, Parser)]
#[command(
    name = "circuit-sched",
    version,
    about = "Offline circuit selection simulator for onion-routed networks"
)]
struct Cli {
    /// Download list: `<start_sec> <end_sec> <client>` per line
    downloads: PathBuf,

    /// Relay list: `<name> <capacity_bytes_per_sec>` per line
    relays: PathBuf,

    /// Simulator mode: genetic, greedy, maxbw, or dwc (case-insensitive)
    mode: String,

    /// List of circuits to consider; without it the full circuit universe
    /// is generated and used
    #[arg(short, long, value_name = "FILE")]
    circuits: Option<PathBuf>,

    /// Use a pruned set of circuits instead of all possible combinations
    #[arg(short, long, conflicts_with = "circuits")]
    pruned: bool,

    /// Directory where generated circuit selections are saved
    #[arg(short, long, value_name = "DIR", default_value = "circuits")]
    output: PathBuf,

    /// Log level: debug, info, message, warning, or error
    #[arg(short, long, value_name = "LEVEL", default_value = "message")]
    log: String,

    /// Genetic: size of the population
    #[arg(long, value_name = "N", default_value_t = 100)]
    population: usize,

    /// Genetic: draw initial circuits uniformly at random instead of
    /// weighted by their bandwidth
    #[arg(long)]
    initial_unweighted: bool,

    /// Genetic: top fraction of the population to draw parents from
    #[arg(long, value_name = "F", default_value_t = 0.2)]
    breed_percentile: f64,

    /// Genetic: draw parents uniformly at random instead of weighted by
    /// their score
    #[arg(long)]
    breed_unweighted: bool,

    /// Genetic: top fraction of parents kept verbatim in the new population
    #[arg(long, value_name = "F", default_value_t = 0.1)]
    elite_percentile: f64,

    /// Genetic: probability of mutating any single download
    #[arg(long, value_name = "F", default_value_t = 0.01)]
    mutate: f64,

    /// Worker threads for scoring and candidate scanning
    #[arg(short, long, value_name = "N", default_value_t = 4)]
    threads: usize,

    /// Genetic: stop after N rounds (default: run until killed)
    #[arg(long, value_name = "N")]
    rounds: Option<u64>,

    /// Genetic: stop after N consecutive rounds without improvement
    #[arg(long, value_name = "N")]
    stall: Option<u64>,

    /// Greedy: download ordering (inorder, longest, shortest)
    #[arg(long, value_name = "SELECTION", default_value = "inorder")]
    selection: String,
}

/// Map the simulator's log level names onto tracing filters, preserving
/// their relative verbosity (message is the default notable level).
fn log_filter(level: &str) -> LevelFilter {
    match level.to_ascii_lowercase().as_str() {
        "debug" => LevelFilter::TRACE,
        "info" => LevelFilter::DEBUG,
        "message" => LevelFilter::INFO,
        "warning" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        other => {
            eprintln!("unknown log level '{other}', using 'message'");
            LevelFilter::INFO
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(log_filter(&cli.log))
        .with_target(false)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> circuit_sched::Result<()> {
    let mode: Mode = cli.mode.parse()?;

    let config = SimConfig {
        threads: cli.threads,
        output_dir: cli.output,
        genetic: GeneticConfig {
            population: cli.population,
            initial_weighted: !cli.initial_unweighted,
            breed_percentile: cli.breed_percentile,
            breed_weighted: !cli.breed_unweighted,
            elite_percentile: cli.elite_percentile,
            mutation_probability: cli.mutate,
            rounds: cli.rounds,
            stall_rounds: cli.stall,
        },
        greedy: GreedyConfig {
            selection: SelectionPolicy::parse_lossy(&cli.selection),
        },
    };
    config.validate()?;

    info!("reading list of downloads");
    let downloads = input::read_downloads(&cli.downloads)?;
    if downloads.is_empty() {
        warn!("download list is empty, nothing to assign");
    }

    info!("reading list of relays");
    let relays = input::read_relays(&cli.relays)?;

    let source = if let Some(path) = &cli.circuits {
        info!("reading list of circuits");
        CircuitSource::Listed(input::read_circuits(path)?)
    } else if cli.pruned {
        info!("building pruned set of circuits");
        CircuitSource::Pruned
    } else {
        info!("building list of all potential circuits");
        CircuitSource::Full
    };

    let catalog = Catalog::assemble(relays, downloads, source)?;
    info!(
        downloads = catalog.download_count(),
        relays = catalog.relay_count(),
        circuits = catalog.circuit_count(),
        "catalog assembled"
    );

    report::ensure_output_dir(&config.output_dir)?;

    info!(%mode, "running simulator");
    match mode {
        Mode::Genetic => {
            strategy::genetic::run(&catalog, &config.genetic, config.threads, &config.output_dir)?;
        }
        Mode::Greedy => {
            strategy::greedy::run(&catalog, config.greedy.selection)?;
        }
        Mode::MaxBw => {
            strategy::maxbw::run(&catalog)?;
        }
        Mode::Dwc => {
            let assignment = strategy::dwc::run(&catalog, config.threads)?;
            report::write_client_files(&catalog, &assignment, &config.output_dir)?;
        }
    }
    Ok(())
}
