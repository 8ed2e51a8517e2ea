mod cli;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

use ff_convert::ToolRegistry;
use ff_core::config::Config;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    match cli.command {
        Commands::Start { host, port } => {
            let mut config = Config::load_or_default(cli.config.as_deref());
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }

            tracing::info!(
                "Starting fileforge on {}:{}",
                config.server.host,
                config.server.port
            );

            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(ff_server::start(config))?;
            Ok(())
        }
        Commands::CheckTools => {
            let config = Config::load_or_default(cli.config.as_deref());
            check_tools(&config)
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("fileforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_logging(verbose: bool, json: bool) {
    // RUST_LOG wins; otherwise defaults based on the verbose flag.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("fileforge=trace,ff_admission=trace,ff_server=trace,ff_convert=debug,tower_http=debug")
        } else {
            EnvFilter::new("fileforge=debug,ff_admission=debug,ff_server=debug,ff_convert=info,tower_http=info")
        }
    });

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn check_tools(config: &Config) -> Result<()> {
    println!("Checking converter tools...\n");

    let registry = ToolRegistry::discover(&config.tools);
    let mut all_ok = true;

    for tool in registry.check_all() {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);
        if let Some(ref version) = tool.version {
            print!(" ({version})");
        }
        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }
        println!();
    }

    println!();
    if all_ok {
        println!("All converter tools are available!");
    } else {
        println!("Some tools are missing. Conversions that need them will fail with 502.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            let contents = std::fs::read_to_string(p)
                .with_context(|| format!("failed to read {}", p.display()))?;
            let mut config = Config::from_json(&contents)?;
            config.apply_env_overrides();
            println!("✓ Configuration parses");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            Config::load_or_default(None)
        }
    };

    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!(
        "  Concurrency: pdf={} image={} video={} audio={} archive={} text={}",
        config.concurrency.pdf,
        config.concurrency.image,
        config.concurrency.video,
        config.concurrency.audio,
        config.concurrency.archive,
        config.concurrency.text
    );
    for (name, preset) in [
        ("conversion", config.rate_limits.conversion),
        ("burst", config.rate_limits.burst),
        ("api", config.rate_limits.api),
    ] {
        println!(
            "  Rate limit {name}: {} per {}s",
            preset.max_requests, preset.interval_secs
        );
    }
    println!(
        "  Queue: max {} jobs, timeout {}s, retention {}s",
        config.queue.max_queue_size, config.queue.job_timeout_secs, config.queue.retention_secs
    );

    let warnings = config.validate();
    if warnings.is_empty() {
        println!("✓ No warnings");
    } else {
        for warning in warnings {
            println!("⚠ {warning}");
        }
    }

    Ok(())
}
