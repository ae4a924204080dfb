use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use hwinventory::inventory::FactSpec;
use hwinventory::logging::{LogConfig, init_logging};
use hwinventory::sink::{FileSink, InventorySink, LogSink, OutputFormat, WriterSink};
use hwinventory::{BackendKind, CollectorConfig, InventoryPlan, InventoryRunner};

/// Collect a hardware inventory and print it
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON inventory plan (defaults to board serial, processor and memory facts)
    #[arg(long, value_name = "FILE")]
    plan: Option<PathBuf>,

    /// Management backend: auto, cim, sysfs or fixture (overrides HWINVENTORY_BACKEND)
    #[arg(long, value_name = "KIND")]
    backend: Option<BackendKind>,

    /// Filesystem root read by the sysfs backend
    #[arg(long, value_name = "DIR")]
    sysfs_root: Option<PathBuf>,

    /// JSON snapshot served by the fixture backend (implies --backend fixture)
    #[arg(long, value_name = "FILE")]
    fixture: Option<PathBuf>,

    /// Directory searched for provider manifests (repeatable)
    #[arg(long = "provider-dir", value_name = "DIR")]
    provider_dirs: Vec<PathBuf>,

    /// Extra provider-sourced fact (repeatable)
    #[arg(long = "provider-fact", value_name = "NAME=MODULE:SYMBOL", value_parser = parse_provider_fact)]
    provider_facts: Vec<FactSpec>,

    /// Disable provider modules entirely
    #[arg(long)]
    no_providers: bool,

    /// Pass timeout in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Output format: text or json
    #[arg(long, value_name = "FORMAT", default_value = "text")]
    format: OutputFormat,

    /// Write the inventory to a file instead of stdout
    #[arg(long, value_name = "FILE", conflicts_with = "log_facts")]
    output: Option<PathBuf>,

    /// Emit each fact as a structured log event instead of printing it
    #[arg(long)]
    log_facts: bool,

    /// List discoverable provider modules and exit
    #[arg(long)]
    list_providers: bool,

    /// Log level (overrides RUST_LOG env var)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log file path (overrides HWINVENTORY_LOG_FILE env var)
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,
}

/// Parse `NAME=MODULE:SYMBOL`
///
/// The module may itself contain ':' (a Windows path), so the symbol is
/// taken after the last one.
fn parse_provider_fact(value: &str) -> Result<FactSpec, String> {
    let (name, target) = value
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=MODULE:SYMBOL, got '{value}'"))?;
    let (module, symbol) = target
        .rsplit_once(':')
        .ok_or_else(|| format!("expected MODULE:SYMBOL after '=', got '{target}'"))?;
    if name.is_empty() || module.is_empty() || symbol.is_empty() {
        return Err(format!("empty component in '{value}'"));
    }
    Ok(FactSpec::provider(name, module, symbol))
}

fn build_config(args: &Args) -> Result<CollectorConfig, Box<dyn std::error::Error>> {
    let mut builder = CollectorConfig::builder()
        .provider_dirs(args.provider_dirs.iter().cloned())
        .providers_enabled(!args.no_providers);

    if let Some(kind) = args.backend {
        builder = builder.backend(kind);
    } else if args.fixture.is_some() {
        builder = builder.backend(BackendKind::Fixture);
    }
    if let Some(root) = &args.sysfs_root {
        builder = builder.sysfs_root(root);
    }
    if let Some(fixture) = &args.fixture {
        builder = builder.fixture_path(fixture);
    }
    if let Some(secs) = args.timeout {
        builder = builder.pass_timeout(Duration::from_secs(secs));
    }

    Ok(builder.from_env()?.build()?)
}

fn build_plan(
    args: &Args,
    config: &CollectorConfig,
) -> Result<InventoryPlan, Box<dyn std::error::Error>> {
    let mut plan = match &args.plan {
        Some(path) => InventoryPlan::from_file(path)?,
        None => InventoryPlan::default().with_namespace(config.namespace.clone()),
    };
    plan.facts.extend(args.provider_facts.iter().cloned());
    plan.validate()?;
    Ok(plan)
}

fn build_sink(args: &Args) -> Box<dyn InventorySink> {
    if args.log_facts {
        return Box::new(LogSink);
    }
    match &args.output {
        Some(path) => Box::new(FileSink::new(path, args.format)),
        None => Box::new(WriterSink::stdout(args.format)),
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = build_config(&args)?;

    if args.list_providers {
        for name in config.create_loader().list_available() {
            println!("{name}");
        }
        return Ok(());
    }

    let plan = build_plan(&args, &config)?;
    info!(
        "Collecting {} fact(s) from {} with the {} backend",
        plan.facts.len(),
        plan.namespace,
        config.backend.resolve()
    );

    let backend = config.create_backend()?;
    let runner = InventoryRunner::from_config(&config, plan);

    let mut sink = build_sink(&args);
    runner.run_to_sink(backend, sink.as_mut()).await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let log_config =
        LogConfig::from_env().with_overrides(args.log_level.clone(), args.log_file.clone());
    if let Err(e) = init_logging(log_config) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    if let Err(e) = run(args).await {
        error!("Inventory failed: {}", e);
        eprintln!("hwinventory: {e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwinventory::inventory::FactSource;

    #[test]
    fn test_parse_provider_fact() {
        let spec = parse_provider_fact("board=vendor:GetBoardSerial").unwrap();
        assert_eq!(spec.name, "board");
        assert_eq!(
            spec.source,
            FactSource::Provider {
                module: "vendor".to_string(),
                entry_point: "GetBoardSerial".to_string(),
            }
        );

        let windows = parse_provider_fact(r"x=C:\providers\vendor.provider.json:GetX").unwrap();
        assert!(matches!(
            windows.source,
            FactSource::Provider { ref module, .. } if module == r"C:\providers\vendor.provider.json"
        ));

        assert!(parse_provider_fact("no-equals").is_err());
        assert!(parse_provider_fact("x=module").is_err());
        assert!(parse_provider_fact("x=:GetX").is_err());
    }

    #[test]
    fn test_log_facts_conflicts_with_output() {
        assert!(Args::try_parse_from(["hwinventory", "--log-facts"]).is_ok());
        assert!(
            Args::try_parse_from(["hwinventory", "--log-facts", "--output", "inv.txt"]).is_err()
        );
    }

    #[test]
    fn test_fixture_flag_selects_fixture_backend() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = dir.path().join("snapshot.json");
        std::fs::write(&fixture, "{}").unwrap();
        let args = Args::parse_from(["hwinventory", "--fixture", fixture.to_str().unwrap()]);
        let config = build_config(&args).unwrap();
        assert_eq!(config.backend, BackendKind::Fixture);
    }
}
