//! `scpi_cli`: command-line access to SCPI instruments.
//!
//! # Usage
//!
//! ```bash
//! scpi_cli --resource TCPIP::192.168.1.20::INSTR idn
//! scpi_cli --simulate devm --instance 2
//! scpi_cli compose 'FETCh:BLUetooth:MEASurement<Instance>:MEValuation:PVTime:CURRent' --bind Instance=1
//! ```
//!
//! Configuration comes from `config/scpi.toml` (or `--config`) and
//! `RUST_SCPI_*` environment variables; flags override both.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_scpi::catalog::{self, BluetoothMeas};
use rust_scpi::config::ScpiConfig;
use rust_scpi::io::{Core, IoSettings};
use rust_scpi::transport::{Resource, SimTransport, Termination};
use rust_scpi::{compose, tracing_init, Bindings, ScpiError};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::error;

#[derive(Parser)]
#[command(name = "scpi_cli")]
#[command(about = "Structured SCPI instrument control", long_about = None)]
struct Cli {
    /// Configuration file (defaults to config/scpi.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Instrument resource, e.g. TCPIP::10.0.0.5::INSTR
    #[arg(long, global = true)]
    resource: Option<String>,

    /// Talk to the built-in simulated instrument
    #[arg(long, global = true)]
    simulate: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Query *IDN? and print the identification
    Idn,

    /// Send a command without reading a response
    Write {
        /// SCPI command, e.g. "*RST"
        command: String,
    },

    /// Send a query and print the response
    Query {
        /// SCPI query; `?` is added to the header when missing
        query: String,
    },

    /// Substitute placeholders in a command template
    Compose {
        /// Template such as CONFigure:BLUetooth:MEASurement<Instance>:HDR:LIMit:P8H:DEVM
        template: String,

        /// Placeholder binding, repeatable
        #[arg(long = "bind", value_name = "NAME=VALUE", value_parser = parse_binding)]
        bindings: Vec<(String, String)>,
    },

    /// List the command catalogue
    Catalog,

    /// Read the HDR P8H DEVM limits
    Devm {
        #[arg(long, default_value_t = catalog::DEFAULT_INSTANCE)]
        instance: u32,
    },

    /// Fetch current power-vs-time results
    Pvt {
        #[arg(long, default_value_t = catalog::DEFAULT_INSTANCE)]
        instance: u32,
    },

    /// Print the effective configuration
    Config,
}

fn parse_binding(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got '{}'", s)),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ScpiConfig::load_from(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => ScpiConfig::load().context("Failed to load configuration")?,
    };
    if let Some(resource) = &cli.resource {
        config.connection.resource = resource.clone();
    }
    if cli.simulate {
        config.connection.resource = "SIM".to_string();
    }
    if let Some(level) = &cli.log_level {
        config.application.log_level = level.clone();
    }
    config.validate()?;
    tracing_init::init_from_config(&config)?;

    if let Err(e) = run(cli.command, &config) {
        match e.downcast_ref::<ScpiError>() {
            Some(scpi) => error!(
                kind = %scpi.kind(),
                command = scpi.command().unwrap_or("-"),
                "{}",
                scpi
            ),
            None => error!("{:#}", e),
        }
        return Err(e);
    }
    Ok(())
}

fn run(command: Commands, config: &ScpiConfig) -> Result<()> {
    match command {
        Commands::Compose { template, bindings } => {
            let bindings = bindings
                .into_iter()
                .fold(Bindings::new(), |b, (name, value)| b.with(name, value));
            println!("{}", compose(&template, &bindings)?);
        }
        Commands::Catalog => {
            for template in catalog::templates() {
                println!("{}", template);
            }
        }
        Commands::Config => print!("{}", config.to_toml_string()?),
        Commands::Idn => {
            let core = open_core(config)?;
            let idn = core.identify()?;
            println!("{}", serde_json::to_string_pretty(&idn)?);
        }
        Commands::Write { command } => {
            open_core(config)?.write(&command)?;
        }
        Commands::Query { query } => {
            println!("{}", open_core(config)?.query(&query)?);
        }
        Commands::Devm { instance } => {
            let bt = BluetoothMeas::new(Arc::new(open_core(config)?))?.with_instance(instance);
            println!("{}", serde_json::to_string_pretty(&bt.get_hdr_p8h_devm()?)?);
        }
        Commands::Pvt { instance } => {
            let bt = BluetoothMeas::new(Arc::new(open_core(config)?))?.with_instance(instance);
            println!("{}", serde_json::to_string_pretty(&bt.fetch_power_vs_time()?)?);
        }
    }
    Ok(())
}

fn open_core(config: &ScpiConfig) -> Result<Core> {
    let resource: Resource = config.connection.resource.parse()?;
    if resource == Resource::Simulated {
        let sim = demo_instrument()
            .with_termination(Termination::from_config(&config.connection)?)
            .with_timeout(config.connection.timeout);
        return Ok(Core::new(
            Box::new(sim),
            IoSettings::from(&config.connection),
        ));
    }
    Ok(Core::from_config(config)?)
}

/// Simulated instrument answering the catalogue queries with plausible data.
fn demo_instrument() -> SimTransport {
    SimTransport::new().with_handler(|command| {
        let header = command.to_ascii_uppercase();
        if header.ends_with(":HDR:LIMIT:P8H:DEVM?") {
            Some("0.2,0.35,0.3,1,1,1,1,1,1,1".to_string())
        } else if header.ends_with(":PVTIME:CURRENT?") {
            Some("0,-10.2,-8.7,NCAP,1.2E-6".to_string())
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_binding() {
        assert_eq!(
            parse_binding("Instance=2").unwrap(),
            ("Instance".to_string(), "2".to_string())
        );
        assert!(parse_binding("=2").is_err());
        assert!(parse_binding("Instance").is_err());
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from([
            "scpi_cli",
            "--simulate",
            "compose",
            "MEAS<Instance>",
            "--bind",
            "Instance=3",
        ])
        .unwrap();
        assert!(cli.simulate);
        match cli.command {
            Commands::Compose { template, bindings } => {
                assert_eq!(template, "MEAS<Instance>");
                assert_eq!(bindings, vec![("Instance".to_string(), "3".to_string())]);
            }
            _ => panic!("expected compose"),
        }
    }

    #[test]
    fn test_demo_instrument_answers_catalogue() {
        let mut config = ScpiConfig::default();
        config.connection.query_instrument_status = true;
        let core = open_core(&config).unwrap();
        let bt = BluetoothMeas::new(Arc::new(core)).unwrap().with_instance(4);
        assert_eq!(bt.get_hdr_p8h_devm().unwrap().peak, 0.35);
        assert!(bt.fetch_power_vs_time().unwrap().leakage_power.is_invalid());
    }
}
