//! Circuit Flow CLI
//!
//! Loads circuit descriptions (JSON) and runs them with the standard gadget
//! library, or prints them back in normalised form.
//!
//! ```text
//! flow run demos/dispatch.json
//! flow describe demos/repeat.json
//! flow gadgets
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use circuit_flow::gadgets::register_global;
use circuit_flow::{Circuit, CircuitDescription, Environment, FlowConfig, Registry};

#[derive(Parser)]
#[command(name = "flow")]
#[command(about = "Circuit Flow CLI - run and inspect flow-based circuits")]
#[command(version = circuit_flow::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML, JSON, YAML); defaults to ./flow.* if present
    #[arg(long, env = "FLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a circuit from a JSON description and run it to completion
    Run {
        /// Circuit description file
        file: PathBuf,

        /// Name of the top-level circuit
        #[arg(long, default_value = "main")]
        name: String,
    },

    /// Print the normalised description of a circuit file
    Describe {
        /// Circuit description file
        file: PathBuf,
    },

    /// List the registered gadget types
    Gadgets,
}

fn load_description(path: &Path) -> Result<CircuitDescription> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    CircuitDescription::from_json(&text)
        .with_context(|| format!("{} is not a circuit description", path.display()))
}

fn environment(config: FlowConfig) -> Environment {
    register_global();
    Environment::global().with_config(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    let _ = dotenv::dotenv();

    let cli = Cli::parse();
    let config = FlowConfig::load(cli.config.as_deref()).context("loading configuration")?;

    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.log_level.clone()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run { file, name } => {
            let description = load_description(&file)?;
            let circuit = Circuit::from_description(&name, &description, environment(config))?;
            info!(circuit = %name, gadgets = circuit.gadget_names().len(), "running {}", file.display());
            circuit.run().await?;
            eprintln!("{} {}", "✓".green(), format!("circuit {} finished", name).bold());
        }

        Commands::Describe { file } => {
            let description = load_description(&file)?;
            let circuit = Circuit::from_description("main", &description, environment(config))?;
            println!("{}", circuit.describe().to_json_pretty()?);
        }

        Commands::Gadgets => {
            register_global();
            let registry = Registry::global();
            println!("{}", "Registered gadget types:".bold());
            for type_name in registry.type_names() {
                println!("  {}", type_name.cyan());
            }
        }
    }

    Ok(())
}
