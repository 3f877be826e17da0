use std::fs;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use rewind_kernel::config::NamingConfig;
use rewind_kernel::simulate::{run_scenario, Scenario};

/// Rewind DDL transaction simulator
#[derive(Parser, Debug)]
#[command(name = "rewind")]
#[command(about = "Run a scripted DDL transaction against an in-memory table store", long_about = None)]
struct Cli {
    /// Path to scenario JSON
    #[arg(long)]
    scenario: String,

    /// Path to naming config JSON
    #[arg(long)]
    naming: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // ----------------------------
    // Load scenario
    // ----------------------------
    let scenario_data = fs::read_to_string(&cli.scenario)?;
    let scenario: Scenario = serde_json::from_str(&scenario_data)?;
    tracing::debug!(
        path = %cli.scenario,
        steps = scenario.steps.len(),
        outcome = ?scenario.outcome,
        "scenario loaded"
    );

    // ----------------------------
    // Load naming
    // ----------------------------
    let naming = if let Some(path) = cli.naming {
        let data = fs::read_to_string(path)?;
        serde_json::from_str::<NamingConfig>(&data)?
    } else {
        NamingConfig::default_config()
    };

    // ----------------------------
    // Run simulation
    // ----------------------------
    let result = run_scenario(&scenario, &naming)?;

    // ----------------------------
    // Output
    // ----------------------------
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(())
}
