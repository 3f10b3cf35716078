// In src/main.rs

use std::path::PathBuf;

use anyhow::{bail, Context};
use log::{error, info, warn};

use shadeflow::{CompileConfig, Document, RootResult};

const USAGE: &str = "usage: shadeflow <graph.json> [--config <config.json>]";

struct Args {
    graph: PathBuf,
    config: Option<PathBuf>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut graph = None;
    let mut config = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => match args.next() {
                Some(path) => config = Some(PathBuf::from(path)),
                None => bail!("--config needs a path\n{}", USAGE),
            },
            "-h" | "--help" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            _ if graph.is_none() => graph = Some(PathBuf::from(arg)),
            _ => bail!("unexpected argument '{}'\n{}", arg, USAGE),
        }
    }
    let graph = graph.with_context(|| USAGE.to_string())?;
    Ok(Args { graph, config })
}

fn main() -> anyhow::Result<()> {
    // Default filter is "info" if RUST_LOG is not set.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    let args = parse_args()?;

    let config = match &args.config {
        Some(path) => CompileConfig::load(path)?,
        None => {
            info!("No config given, using defaults.");
            CompileConfig::default()
        }
    };

    let text = std::fs::read_to_string(&args.graph)
        .with_context(|| format!("Failed to read graph {}", args.graph.display()))?;
    let document = Document::from_json(&text)
        .with_context(|| format!("Failed to parse graph {}", args.graph.display()))?;
    info!(
        "Loaded {} nodes and {} roots from {}",
        document.nodes.len(),
        document.roots.len(),
        args.graph.display()
    );

    let compiled = document.compile(&config).context("Failed to compile graph")?;

    if !compiled.source.is_empty() {
        println!("{}", compiled.source);
    }
    for root in &compiled.roots {
        match &root.result {
            RootResult::Constant(value) => println!("{} = {} // constant", root.name, value),
            RootResult::Shader(value) => {
                println!("{} {} = {};", value.value_type.name(), root.name, value.code)
            }
            RootResult::Unresolved => warn!("{}: input types are not resolved", root.name),
            RootResult::Failed(message) => error!("{}: {}", root.name, message),
            RootResult::NoDerivative => warn!("{}: no analytic derivative", root.name),
        }
    }

    if !compiled.diagnostics.is_empty() {
        bail!("{} error(s) while compiling", compiled.diagnostics.len());
    }
    Ok(())
}
