use clap::{Parser, Subcommand};
use eda_common::db::core::Design;
use eda_common::util::config::Config;
use eda_common::util::persist::{load_binary, save_binary};
use eda_common::util::{check, generator, logger};
use eda_router::error::RouteError;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a seeded random benchmark design.
    Generate {
        #[arg(long, default_value_t = 200)]
        nets: usize,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Detailed-route the configured input design.
    Route {
        /// Overrides `detailed_routing.end_iteration`.
        #[arg(long)]
        iterations: Option<usize>,
        #[arg(long)]
        dump_dir: Option<PathBuf>,
    },
    /// Generate a benchmark, then route it.
    Flow {
        #[arg(long, default_value_t = 200)]
        nets: usize,
        #[arg(long)]
        iterations: Option<usize>,
    },
}

fn main() -> anyhow::Result<()> {
    logger::init();
    let args = Args::parse();

    let mut config = if args.config.exists() {
        log::info!("Loading configuration from {:?}", args.config);
        let config_str = std::fs::read_to_string(&args.config)
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;
        toml::from_str(&config_str).map_err(|e| anyhow::anyhow!("Failed to parse config TOML: {}", e))?
    } else {
        log::warn!("Configuration file {:?} not found. Using internal defaults.", args.config);
        Config::default()
    };

    let command = args.command.unwrap_or(Commands::Flow {
        nets: 200,
        iterations: None,
    });

    match command {
        Commands::Generate { nets, output } => {
            let output = output.unwrap_or_else(|| PathBuf::from(&config.input.design));
            run_generate(&config, nets, &output)?;
        }
        Commands::Route { iterations, dump_dir } => {
            if let Some(n) = iterations {
                config.detailed_routing.end_iteration = n;
            }
            if dump_dir.is_some() {
                config.detailed_routing.debug_dump_dir = dump_dir;
            }
            let input = Path::new(&config.input.design);
            if !input.exists() {
                return Err(anyhow::anyhow!(
                    "Input design missing: '{}'. Did you run 'generate'?",
                    config.input.design
                ));
            }
            run_routing(&config)?;
        }
        Commands::Flow { nets, iterations } => {
            if let Some(n) = iterations {
                config.detailed_routing.end_iteration = n;
            }
            run_generate(&config, nets, Path::new(&config.input.design))?;
            run_routing(&config)?;
        }
    }

    Ok(())
}

fn run_generate(config: &Config, nets: usize, output: &Path) -> anyhow::Result<()> {
    log::info!(
        "Generating random benchmark (Nets: {}, Gcells: {}, Seed: {})...",
        nets,
        config.generator.gcells,
        config.generator.seed
    );
    let design = generator::generate_design(&config.generator, nets);
    save_binary(&design, output)?;
    log::info!("Generated: {:?}", output);
    Ok(())
}

fn run_routing(config: &Config) -> anyhow::Result<()> {
    log::info!("Loading design: {}", config.input.design);
    let mut design: Design = load_binary(Path::new(&config.input.design))
        .map_err(|e| anyhow::anyhow!("Invalid design file '{}': {}", config.input.design, e))?;

    log::info!("Starting Routing...");
    let summary = match eda_router::route(&mut design, &config.detailed_routing) {
        Ok(s) => s,
        Err(RouteError::Connectivity { nets }) => {
            log::error!("Connectivity check failed for {} net(s); not writing results", nets.len());
            return Err(anyhow::anyhow!("disconnected nets: {}", nets.join(", ")));
        }
        Err(e) => return Err(anyhow::anyhow!(e)),
    };
    log::info!(
        "Routing finished after {} iterations with {} violations",
        summary.iterations,
        summary.violations
    );

    check::run(&design).map_err(|e| anyhow::anyhow!("Verification Failed: {}", e))?;

    log::info!("Writing routed design to {}", config.input.output);
    save_binary(&design, Path::new(&config.input.output))?;
    Ok(())
}
