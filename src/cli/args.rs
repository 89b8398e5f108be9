//! CLI argument parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Log filter directive, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a dispatch plan until every province completes
    Run {
        /// Plan file (defaults to plan.yaml in the config directory)
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
        /// Print the run report as JSON
        #[arg(long)]
        json:   bool
    },
    /// Show the rank assignment a plan produces
    Topology {
        /// Plan file (defaults to plan.yaml in the config directory)
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>
    },
    /// Write a sample plan to the config directory
    Init
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_arguments() {
        let cli = Cli::try_parse_from(["pd", "run", "--config", "plan.yaml", "--json"]).unwrap();
        assert_eq!(cli.log_level, "warn");
        match cli.command {
            Commands::Run { config, json } => {
                assert_eq!(config, Some(PathBuf::from("plan.yaml")));
                assert!(json);
            }
            _ => panic!("expected run")
        }
    }

    #[test]
    fn test_global_log_level() {
        let cli = Cli::try_parse_from(["pd", "topology", "--log-level", "debug"]).unwrap();
        assert_eq!(cli.log_level, "debug");
        assert!(matches!(cli.command, Commands::Topology { config: None }));
    }
}
