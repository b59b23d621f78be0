//! taktplan CLI - Production Scheduling Engine
//!
//! Command-line interface for loading a catalog document, running scheduling
//! scenarios and reporting delivery outcomes.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use taktplan_core::{ScenarioMode, ScenarioResult, ScenarioStatus};
use taktplan_parser::load_catalog;
use taktplan_solver::{validate_dag, validate_schedulability, RunConfig, Scheduler, SolverMode};

#[derive(Parser)]
#[command(name = "taktplan")]
#[command(author, version, about = "Production scheduling engine", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a catalog document (no scheduling)
    Validate {
        /// Input file path
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Schedule against the fixed catalog capacities, minimizing lateness
    Baseline {
        /// Input file path
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Use the greedy fallback scheduler instead of the CP solver
        #[arg(long)]
        heuristic: bool,

        /// Solver wall-clock budget in seconds
        #[arg(long, value_name = "SECS")]
        time_limit: Option<u64>,

        /// Write the full scenario result as JSON
        #[arg(short, long, value_name = "FILE")]
        json: Option<PathBuf>,
    },

    /// Jointly minimize lateness and total workforce
    Optimize {
        /// Input file path
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Solver wall-clock budget in seconds
        #[arg(long, value_name = "SECS")]
        time_limit: Option<u64>,

        /// Write the full scenario result as JSON
        #[arg(short, long, value_name = "FILE")]
        json: Option<PathBuf>,
    },

    /// Prioritize one product line's completion
    WhatIf {
        /// Input file path
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Product line to pull forward
        #[arg(value_name = "PRODUCT")]
        product: String,

        /// Use the greedy fallback scheduler instead of the CP solver
        #[arg(long)]
        heuristic: bool,

        /// Solver wall-clock budget in seconds
        #[arg(long, value_name = "SECS")]
        time_limit: Option<u64>,

        /// Write the full scenario result as JSON
        #[arg(short, long, value_name = "FILE")]
        json: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match cli.command {
        Commands::Validate { file } => validate(&file),
        Commands::Baseline {
            file,
            heuristic,
            time_limit,
            json,
        } => run_scenario(&file, ScenarioMode::Baseline, heuristic, time_limit, json.as_deref()),
        Commands::Optimize {
            file,
            time_limit,
            json,
        } => run_scenario(&file, ScenarioMode::JointOptimize, false, time_limit, json.as_deref()),
        Commands::WhatIf {
            file,
            product,
            heuristic,
            time_limit,
            json,
        } => run_scenario(
            &file,
            ScenarioMode::WhatIf { product },
            heuristic,
            time_limit,
            json.as_deref(),
        ),
    }
}

fn validate(file: &std::path::Path) -> Result<()> {
    let catalog = load_catalog(file).with_context(|| format!("loading {}", file.display()))?;
    let graph = taktplan_solver::build_dependencies(&catalog);
    validate_dag(&graph).context("dependency graph validation")?;
    validate_schedulability(&catalog).context("schedulability validation")?;

    println!(
        "OK: {} task instances, {} products, {} dynamic constraints",
        catalog.instances.len(),
        catalog.products.len(),
        graph.edges.len()
    );
    Ok(())
}

fn run_scenario(
    file: &std::path::Path,
    mode: ScenarioMode,
    heuristic: bool,
    time_limit: Option<u64>,
    json: Option<&std::path::Path>,
) -> Result<()> {
    let catalog = load_catalog(file).with_context(|| format!("loading {}", file.display()))?;
    let mut scheduler = Scheduler::new(catalog);

    let mut config = RunConfig::new(mode);
    if heuristic {
        config = config.with_solver(SolverMode::Heuristic);
    }
    if let Some(secs) = time_limit {
        config = config.with_time_limit(secs);
    }

    let result = scheduler.run(&config).context("scenario run")?;
    print_delivery_analysis(&result);

    if let Some(path) = json {
        let payload = serde_json::to_string_pretty(&result)?;
        std::fs::write(path, payload).with_context(|| format!("writing {}", path.display()))?;
        println!("\nScenario result written to {}", path.display());
    }

    if result.status == ScenarioStatus::Failed {
        anyhow::bail!("solver produced no schedule");
    }
    Ok(())
}

fn print_delivery_analysis(result: &ScenarioResult) {
    println!("\nDELIVERY ANALYSIS");
    println!("{:-<78}", "");
    println!(
        "{:<16} {:<20} {:<20} {:>9} {:>8}",
        "Product", "Delivery", "Projected", "Late (d)", "Status"
    );
    for (product, lateness) in &result.lateness {
        let projected = lateness
            .completion
            .map(|c| c.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "unscheduled".to_string());
        let status = if lateness.on_time { "ON TIME" } else { "LATE" };
        println!(
            "{:<16} {:<20} {:<20} {:>9} {:>8}",
            product,
            lateness.delivery.format("%Y-%m-%d"),
            projected,
            lateness.lateness_days,
            status
        );
    }
    println!("{:-<78}", "");

    if result.makespan_days >= taktplan_core::MAKESPAN_SENTINEL {
        println!("Makespan: incomplete schedule ({} failed)", result.failed.len());
    } else {
        println!("Makespan: {} working days", result.makespan_days);
    }
    println!("On-time rate: {:.1}%", result.on_time_rate);
    println!("Total workforce: {}", result.total_workforce);

    if let Some(capacities) = &result.optimized_capacities {
        println!("\nOptimized capacities:");
        for (team, capacity) in capacities {
            println!("  {team}: {capacity}");
        }
    }

    if let Some(objective) = result.objective {
        println!("Objective value: {objective}");
    }

    println!("\nTop of the priority list:");
    for row in result.priority_list.iter().take(10) {
        println!(
            "  {:>3}. [{}] {} ({} - {})",
            row.ordinal,
            row.criticality,
            row.display_name,
            row.start.format("%Y-%m-%d %H:%M"),
            row.end.format("%H:%M")
        );
    }
}
