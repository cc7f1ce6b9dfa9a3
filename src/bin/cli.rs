//! trajectory-cli - Inspect trajectory optimization on recorded positions
//!
//! Usage:
//!   trajectory-cli optimize <file.json> [--preset quick|aggressive] [--tolerance <m>] [--output <file>]
//!   trajectory-cli analyze <file.json>
//!   trajectory-cli fetch --device <id> [--from <time> --to <time>] [--raw]
//!
//! Input files hold a JSON array of positions in any field spelling the
//! tracking platforms use. `fetch` reads its connection settings from the
//! same environment variables as the service.

use clap::{Parser, Subcommand};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use trajectory_optimizer::{
    analyze_tolerances, normalize::parse_timestamp_str, normalize_positions, optimize_coordinates,
    OptimizationOptions, OptimizationResult, Position, PositionQuery, PositionService, Preset,
    ServiceConfig, TimeWindow,
};

#[derive(Parser)]
#[command(name = "trajectory-cli")]
#[command(about = "Optimize and analyze GPS trajectories", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose debug output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the optimization pipeline on a JSON file of positions
    Optimize {
        /// JSON file with an array of positions
        file: PathBuf,

        /// Base option set: quick or aggressive
        #[arg(short, long)]
        preset: Option<Preset>,

        /// Douglas-Peucker tolerance in meters
        #[arg(short, long)]
        tolerance: Option<f64>,

        /// Drop stops instead of pinning them
        #[arg(long)]
        drop_stops: bool,

        /// Write optimized positions to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Trial-run 10, 25 and 50 m tolerances and recommend one
    Analyze {
        /// JSON file with an array of positions
        file: PathBuf,
    },

    /// Fetch positions for a device from the tracking API
    Fetch {
        /// Device identifier
        #[arg(short, long)]
        device: String,

        /// Window start (RFC 3339 or epoch)
        #[arg(long, requires = "to")]
        from: Option<String>,

        /// Window end (RFC 3339 or epoch)
        #[arg(long, requires = "from")]
        to: Option<String>,

        /// Return positions as fetched
        #[arg(long)]
        raw: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format(|buf, record| writeln!(buf, "[{:5}] {}", record.level(), record.args()))
        .init();

    let outcome = match cli.command {
        Commands::Optimize {
            file,
            preset,
            tolerance,
            drop_stops,
            output,
        } => {
            let mut options = preset.map(Preset::options).unwrap_or_default();
            if let Some(t) = tolerance {
                options.tolerance = t;
            }
            if drop_stops {
                options.preserve_stops = false;
            }
            run_optimize(&file, &options, output.as_deref())
        }
        Commands::Analyze { file } => run_analyze(&file),
        Commands::Fetch {
            device,
            from,
            to,
            raw,
        } => run_fetch(&device, from.as_deref(), to.as_deref(), raw).await,
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Load and normalize positions from a JSON file
fn load_positions(path: &Path) -> Result<Vec<Position>, String> {
    let text = fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    let payload: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| format!("{}: {}", path.display(), e))?;
    let positions = normalize_positions(&payload);
    println!("Loaded {} positions from {}", positions.len(), path.display());
    Ok(positions)
}

fn print_result(result: &OptimizationResult) {
    let stats = &result.statistics;
    println!("\n{}", "=".repeat(60));
    println!(
        "{} -> {} positions ({:.1}% reduction)",
        result.original_count, result.optimized_count, result.reduction_percentage
    );
    println!("{}", "=".repeat(60));
    println!("  tolerance:          {} m", result.options.tolerance);
    println!("  accuracy filtered:  {}", stats.accuracy_filtered);
    println!("  speed filtered:     {}", stats.speed_filtered);
    println!("  time filtered:      {}", stats.time_filtered);
    println!("  simplifier reduced: {}", stats.simplifier_reduced);
    println!("  protected points:   {}", stats.protected_points);
    println!(
        "  distance:           {:.2} km -> {:.2} km",
        stats.original_distance_m / 1000.0,
        stats.optimized_distance_m / 1000.0
    );
    println!("  processing time:    {:.2} ms", stats.processing_time_ms);
}

fn run_optimize(path: &Path, options: &OptimizationOptions, output: Option<&Path>) -> Result<(), String> {
    let positions = load_positions(path)?;
    let result = optimize_coordinates(&positions, options);
    print_result(&result);

    if let Some(output) = output {
        let json = serde_json::to_string_pretty(&result.optimized_positions).map_err(|e| e.to_string())?;
        fs::write(output, json).map_err(|e| format!("{}: {}", output.display(), e))?;
        println!("\nWrote {} positions to {}", result.optimized_count, output.display());
    }
    Ok(())
}

fn run_analyze(path: &Path) -> Result<(), String> {
    let positions = load_positions(path)?;
    let analysis = analyze_tolerances(&positions, &OptimizationOptions::default());

    println!("\n{:>10} {:>10} {:>10} {:>12}", "tolerance", "kept", "reduction", "distance");
    for trial in &analysis.trials {
        let marker = if trial.tolerance == analysis.recommended_tolerance { " <-" } else { "" };
        println!(
            "{:>8} m {:>10} {:>9.1}% {:>9.2} km{}",
            trial.tolerance,
            trial.optimized_count,
            trial.reduction_percentage,
            trial.optimized_distance_m / 1000.0,
            marker
        );
    }
    println!("\nRecommended tolerance: {} m", analysis.recommended_tolerance);
    println!(
        "Estimated savings: {} bytes per response, {} bytes stored",
        analysis.estimated_bandwidth_savings_bytes, analysis.estimated_storage_savings_bytes
    );
    Ok(())
}

async fn run_fetch(device: &str, from: Option<&str>, to: Option<&str>, raw: bool) -> Result<(), String> {
    let config = ServiceConfig::from_env();
    println!("Fetching device {} from {}", device, config.tracking_api_url);

    let service = Arc::new(PositionService::from_config(&config).map_err(|e| e.to_string())?);

    let mut query = PositionQuery::new(device);
    if let (Some(from), Some(to)) = (from, to) {
        let from = parse_timestamp_str(from).ok_or_else(|| format!("invalid --from '{}'", from))?;
        let to = parse_timestamp_str(to).ok_or_else(|| format!("invalid --to '{}'", to))?;
        query = query.with_window(TimeWindow::new(from, to));
    }
    if raw {
        query = query.without_optimization();
    }

    let response = service.positions(&query).await;
    print_result(&response.optimization);
    let json = serde_json::to_string_pretty(&response.positions).map_err(|e| e.to_string())?;
    println!("{}", json);
    Ok(())
}
