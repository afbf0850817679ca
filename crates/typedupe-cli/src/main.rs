//! typedupe CLI - plan the typing and deduping of a configured catalog.

mod plan;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use typedupe::{ConfiguredCatalog, SqlGenerator, TypeDedupeConfig, TypeDedupeError};

use plan::{build_plan, parse_catalog, PlanSqlGenerator};

#[derive(Parser)]
#[command(name = "typedupe")]
#[command(about = "Typing and deduping planner for ELT destinations")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "typedupe.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the SQL a sync would run against an empty destination
    Plan {
        /// Path to the configured catalog (JSON)
        #[arg(long)]
        catalog: PathBuf,

        /// Override the destination's maximum identifier length
        #[arg(long)]
        max_identifier_length: Option<usize>,

        /// Override the number of concurrent per-stream tasks
        #[arg(long)]
        td_threads: Option<usize>,
    },

    /// Resolve catalog names and report collisions without planning
    Validate {
        /// Path to the configured catalog (JSON)
        #[arg(long)]
        catalog: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), TypeDedupeError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format).map_err(TypeDedupeError::Config)?;

    let mut config = TypeDedupeConfig::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Plan {
            catalog,
            max_identifier_length,
            td_threads,
        } => {
            if let Some(n) = max_identifier_length {
                config.destination.max_identifier_length = n;
            }
            if let Some(n) = td_threads {
                config.typing_deduping.td_threads = Some(n);
            }
            config.validate()?;

            let catalog = ConfiguredCatalog::load(&catalog)?;
            let plan = build_plan(&config, &catalog).await?;

            if cli.output_json {
                println!("{}", plan.to_json()?);
            } else {
                print!("{}", plan.render());
            }
        }

        Commands::Validate { catalog } => {
            let catalog = ConfiguredCatalog::load(&catalog)?;
            let generator: std::sync::Arc<dyn SqlGenerator> = std::sync::Arc::new(
                PlanSqlGenerator::new(config.destination.max_identifier_length),
            );
            let parsed = parse_catalog(&config, &catalog, generator)?;

            if cli.output_json {
                let names: Vec<_> = parsed
                    .streams
                    .iter()
                    .map(|s| {
                        serde_json::json!({
                            "namespace": s.id.original_namespace,
                            "name": s.id.original_name,
                            "final_table": s.id.final_table_id("", ""),
                            "raw_table": s.id.raw_table_id(""),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&names)?);
            } else {
                println!("Catalog is valid: {} stream(s)", parsed.streams.len());
                for stream in &parsed.streams {
                    println!(
                        "  {}.{} -> {}",
                        stream.id.original_namespace,
                        stream.id.original_name,
                        stream.id.final_table_id("", "")
                    );
                }
            }
        }
    }

    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so plans on stdout stay machine-readable.
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        "json" => subscriber.json().init(),
        "text" => subscriber.init(),
        other => return Err(format!("Unknown log format: {}", other)),
    }

    Ok(())
}
