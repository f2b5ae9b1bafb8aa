//! tenant-extract CLI - copy one tenant out of a shared CQL database.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tenant_extract::{AssetManifest, Config, ExtractError, Orchestrator, Plan};
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "tenant-extract")]
#[command(about = "Extract a single tenant from a shared multi-tenant CQL database")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
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
    /// Copy the tenant into the target keyspace
    Run {
        /// Read and discover keys without writing to the target
        #[arg(long)]
        dry_run: bool,

        /// Skip row count verification after the copy
        #[arg(long)]
        skip_verify: bool,

        /// Write the tenant's content and revision ids to this JSON file
        #[arg(long)]
        asset_manifest: Option<PathBuf>,
    },

    /// Validate and print the copy plan without connecting
    Plan,

    /// Create the target keyspace and tables
    Bootstrap,

    /// Compare tenant row counts between source and target
    Verify,

    /// Test database connections
    HealthCheck,
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

async fn run() -> Result<(), ExtractError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format).map_err(ExtractError::Config)?;

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Plan => {
            let plan = Plan::default();
            plan.validate()?;

            if cli.output_json {
                let stages: Vec<_> = plan
                    .stages()
                    .iter()
                    .map(|stage| {
                        serde_json::json!({
                            "stage": stage.number,
                            "units": stage.units.iter().map(|u| serde_json::json!({
                                "name": u.name,
                                "table": u.table,
                                "scan": u.is_scan(),
                                "consumes": u.consumes(),
                                "produces": u.produces.iter().map(|p| p.key).collect::<Vec<_>>(),
                            })).collect::<Vec<_>>(),
                        })
                    })
                    .collect();
                let output = serde_json::json!({
                    "tenant_alias": config.tenant_alias(),
                    "stages": stages,
                    "edges": plan.edges(),
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("Copy plan for tenant {}:", config.tenant_alias());
                for stage in plan.stages() {
                    println!("\n  Stage {}:", stage.number);
                    for unit in &stage.units {
                        let access = if unit.is_scan() { "scan" } else { "keyed" };
                        println!("    {:<34} {:<36} {}", unit.name, unit.table, access);
                    }
                }
                println!("\n  Dependencies:");
                for edge in plan.edges() {
                    println!("    {} -> {} ({})", edge.producer, edge.consumer, edge.key);
                }
            }
        }

        Commands::Run {
            dry_run,
            skip_verify,
            asset_manifest,
        } => {
            let mut orchestrator = Orchestrator::connect(config)
                .await?
                .with_dry_run(dry_run)
                .with_skip_verify(skip_verify);

            let result = match orchestrator.run().await {
                Ok(result) => result,
                Err(e) => {
                    if let (true, Some(report)) = (cli.output_json, orchestrator.last_report()) {
                        println!("{}", report.to_json()?);
                    }
                    return Err(e);
                }
            };

            if let Some(path) = asset_manifest {
                AssetManifest::from_registry(
                    &result.tenant_alias,
                    &result.run_id,
                    orchestrator.registry(),
                )
                .write(path)?;
            }

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                let status_msg = if dry_run {
                    "Dry run completed!"
                } else {
                    "Extraction completed!"
                };
                println!("\n{}", status_msg);
                println!("  Run ID: {}", result.run_id);
                println!("  Tenant: {}", result.tenant_alias);
                println!("  Duration: {:.2}s", result.duration_seconds);
                println!("  Units: {}", result.units.len());
                println!("  Rows read: {}", result.rows_read);
                println!("  Rows written: {}", result.rows_written);
                let mismatched: Vec<_> = result
                    .verification
                    .iter()
                    .filter(|v| !v.matched)
                    .map(|v| v.unit.as_str())
                    .collect();
                if !mismatched.is_empty() {
                    println!("  Verification mismatches: {:?}", mismatched);
                }
            }
        }

        Commands::Bootstrap => {
            let orchestrator = Orchestrator::connect(config).await?;
            orchestrator.bootstrap().await?;
            println!("Target schema is in place.");
        }

        Commands::Verify => {
            let mut orchestrator = Orchestrator::connect(config).await?;
            let results = orchestrator.verify().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                println!("Verification Results:");
                for result in &results {
                    let status = match (&result.error, result.matched) {
                        (Some(_), _) => "ERROR",
                        (None, true) => "OK",
                        (None, false) => "MISMATCH",
                    };
                    println!(
                        "  {:<34} source={:<8} target={:<8} {}",
                        result.unit, result.source_rows, result.target_rows, status
                    );
                }
            }
        }

        Commands::HealthCheck => {
            let endpoint = config.target.endpoint();
            let orchestrator = Orchestrator::connect(config).await?;
            let result = orchestrator.health_check().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source: {} ({}ms)",
                    if result.source_connected { "OK" } else { "FAILED" },
                    result.source_latency_ms
                );
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Target: {} ({}ms)",
                    if result.target_connected { "OK" } else { "FAILED" },
                    result.target_latency_ms
                );
                if let Some(ref err) = result.target_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(ExtractError::connection(endpoint, "Health check failed"));
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
        other => return Err(format!("unknown verbosity: {}", other)),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        "json" => subscriber.json().init(),
        "text" => subscriber.init(),
        other => return Err(format!("unknown log format: {}", other)),
    }

    Ok(())
}
