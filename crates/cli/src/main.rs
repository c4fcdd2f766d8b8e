//! `wfc` CLI entry-point.
//!
//! Available sub-commands:
//! - `list`: list the built-in demo workflows.
//! - `simulate`: run a demo workflow locally, in dependency order.
//! - `compile`: print the serialized template of a demo workflow.

mod demos;

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use engine::{LocalExecutor, SerializationSettings, TemplateCompiler};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "wfc",
    about = "Declare, simulate and compile dependency-ordered workflows",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the built-in demo workflows.
    List,
    /// Run a demo workflow locally.
    Simulate {
        /// Demo name, see `wfc list`.
        demo: String,
        /// Workflow input as `name=value`; values are parsed as JSON and
        /// fall back to plain strings.
        #[arg(long = "input", short, value_parser = parse_input)]
        inputs: Vec<(String, Value)>,
    },
    /// Compile a demo workflow and print the template as JSON.
    Compile {
        demo: String,
        /// Serialization settings JSON file. Defaults apply when omitted.
        #[arg(long)]
        settings: Option<PathBuf>,
    },
}

fn parse_input(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_owned()));
    Ok((name.trim().to_owned(), value))
}

fn demo(name: &str) -> Result<&'static demos::Demo> {
    demos::find(name).ok_or_else(|| anyhow!("unknown demo '{name}', try `wfc list`"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::List => {
            for demo in demos::DEMOS {
                println!("{:<12} {}", demo.name, demo.about);
            }
        }
        Command::Simulate { demo: name, inputs } => {
            let workflow = (demo(&name)?.build)();
            let inputs: BTreeMap<String, Value> = inputs.into_iter().collect();
            info!(workflow = %workflow.name(), inputs = inputs.len(), "simulating");

            let result = LocalExecutor::new()
                .simulate(&workflow, inputs)
                .with_context(|| format!("simulation of '{name}' failed"))?;
            for (output, value) in &result.outputs {
                println!("{output} = {value}");
            }
        }
        Command::Compile { demo: name, settings } => {
            let settings = match settings {
                Some(path) => {
                    let raw = std::fs::read_to_string(&path)
                        .with_context(|| format!("cannot read {}", path.display()))?;
                    SerializationSettings::from_json(&raw)?
                }
                None => SerializationSettings::default(),
            };
            let workflow = (demo(&name)?.build)();
            let compiled = TemplateCompiler::new(settings)?
                .compile(&workflow)
                .with_context(|| format!("compilation of '{name}' failed"))?;
            println!("{}", serde_json::to_string_pretty(&compiled)?);
        }
    }
    Ok(())
}
