//! # Province Dispatch CLI
//!
//! Runs a dispatch plan to completion and prints the resulting report.
//!
//! ## Usage
//!
//! ```bash
//! # Write a sample plan to the config directory
//! pd init
//!
//! # Show which rank plays which role
//! pd topology --config plan.yaml
//!
//! # Run the plan, printing tables or JSON
//! pd run --config plan.yaml
//! pd run --json --log-level info
//! ```

use clap::Parser;
use dispatch::{
    Cli, Commands, DispatchError, Guardian, load_plan,
    config::init_plan,
    ui::display::{show_run_report, show_topology}
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), DispatchError> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    match cli.command {
        Commands::Run { config, json } => {
            let plan = load_plan(config.as_deref())?;
            let report = Guardian::run(&plan).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                show_run_report(&report);
            }
        }
        Commands::Topology { config } => {
            let plan = load_plan(config.as_deref())?;
            show_topology(&plan);
        }
        Commands::Init => {
            let path = init_plan()?;
            println!("Plan written to {}", path.display());
        }
    }

    Ok(())
}
