mod cli;

use std::path::Path;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands, StartArgs};
use dr_core::config::Config;
use dr_core::job::{AttemptOutcome, EngineAttempt};
use dr_engine::{build_engines, EngineChain, ToolRegistry};
use tokio_util::sync::CancellationToken;

/// Fold command-line and environment overrides into the loaded config.
fn apply_overrides(config: &mut Config, args: StartArgs) {
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(workers) = args.workers {
        config.conversion.max_workers = workers;
    }
    if let Some(timeout) = args.timeout {
        config.conversion.timeout_secs = timeout;
    }
    if let Some(max) = args.max_upload_bytes {
        config.conversion.max_upload_bytes = max;
    }
    if let Some(dir) = args.artifact_dir {
        config.conversion.artifact_dir = dir;
    }
    if let Some(path) = args.libreoffice_path {
        config.engines.libreoffice_path = Some(path);
    }
    if let Some(interval) = args.cleanup_interval {
        config.cleanup.interval_secs = interval;
    }
    if let Some(max_age) = args.max_age {
        config.cleanup.max_age_secs = max_age;
    }
}

async fn start_server(args: StartArgs, config_path: Option<&Path>) -> Result<()> {
    let mut config = Config::load_or_default(config_path)?;
    apply_overrides(&mut config, args);
    config.validate()?;

    tracing::info!("Starting docrelay");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );

    dr_server::start(config, CancellationToken::new()).await?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG if set, otherwise pick defaults based on --verbose.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "docrelay=trace,dr_server=trace,dr_engine=trace,dr_core=debug,tower_http=debug"
                .to_string()
        } else {
            "docrelay=debug,dr_server=debug,dr_engine=debug,dr_core=info,tower_http=info"
                .to_string()
        }
    });

    tracing_subscriber::fmt().with_env_filter(&env_filter).init();

    match cli.command {
        Commands::Start(args) => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(args, cli.config.as_deref()))
        }
        Commands::Convert { input, output } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(convert_file(&input, output.as_deref(), cli.config.as_deref()))
        }
        Commands::CheckEngines => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(check_engines(cli.config.as_deref()))
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("docrelay {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn convert_file(input: &Path, output: Option<&Path>, config_path: Option<&Path>) -> Result<()> {
    let config = Config::load_or_default(config_path)?;

    if !input.is_file() {
        anyhow::bail!("Input file does not exist: {}", input.display());
    }
    let name = input
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    if !config.conversion.accepts(name) {
        anyhow::bail!(
            "Unsupported file type: {} (expected {})",
            name,
            config.conversion.expected_extensions()
        );
    }
    let output = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| input.with_extension("pdf"));

    let registry = ToolRegistry::discover(&config.engines);
    let chain = EngineChain::probe(build_engines(&config.engines, &registry)).await;

    println!("Converting {}", input.display());
    let report = |attempt: &EngineAttempt| {
        let mark = if attempt.outcome == AttemptOutcome::Success {
            "✓"
        } else {
            "✗"
        };
        print!("  {} {} ({} ms)", mark, attempt.engine, attempt.elapsed_ms);
        if let Some(ref detail) = attempt.detail {
            print!(" - {}", detail.lines().next().unwrap_or(""));
        }
        println!();
    };

    let converted = chain
        .run(input, &output, config.conversion.engine_timeout(), &report)
        .await?;

    println!("\nConverted with {}", converted.engine);
    println!("Output: {}", output.display());
    Ok(())
}

async fn check_engines(config_path: Option<&Path>) -> Result<()> {
    let config = Config::load_or_default(config_path)?;
    println!("Checking conversion engines...\n");

    let registry = ToolRegistry::discover(&config.engines);
    for tool in registry.check_all(&config.engines.order) {
        let status = if tool.available { "✓" } else { "✗" };
        print!("{} {}", status, tool.name);
        if let Some(ref version) = tool.version {
            print!(" ({})", version);
        }
        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }
        println!();
    }

    let chain = EngineChain::probe(build_engines(&config.engines, &registry)).await;
    let usable = chain.available_engines();

    println!();
    if usable.is_empty() {
        println!("No usable conversion engine. Install LibreOffice to enable conversions.");
    } else {
        println!("Usable engines, in priority order: {}", usable.join(", "));
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            let config = Config::load(p)?;
            println!("✓ Configuration is valid");
            print_summary(&config);
            for warning in config.warnings() {
                println!("  ! {warning}");
            }
        }
        None => {
            println!("No config file specified, using defaults");
            print_summary(&Config::default());
        }
    }

    Ok(())
}

fn print_summary(config: &Config) {
    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!(
        "  Workers: {} (timeout {}s per engine)",
        config.conversion.max_workers, config.conversion.timeout_secs
    );
    println!(
        "  Engines: {}",
        config
            .engines
            .order
            .iter()
            .map(|k| k.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!(
        "  Artifacts: {}",
        config.conversion.artifact_dir.display()
    );
    println!(
        "  Cleanup: every {}s, max age {}s",
        config.cleanup.interval_secs, config.cleanup.max_age_secs
    );
    println!(
        "  Delivery: {} retries, endpoints: {}",
        config.delivery.max_retries,
        config
            .delivery
            .endpoints
            .keys()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    );
}
