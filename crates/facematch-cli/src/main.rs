use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facematch_core::auth::{self, AuthError};
use facematch_core::{Metric, RecordStore, Resolution, Resolver};
use facematch_store::AnyStore;
use serde_json::json;
use tracing_subscriber::EnvFilter;

mod config;
mod input;

use config::Config;

#[derive(Parser)]
#[command(name = "facematch", about = "Face identity matching over enrolled embeddings")]
struct Cli {
    /// TOML config file (default: $FACEMATCH_CONFIG, then ~/.config/facematch/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a new identity
    Enroll {
        /// Unique identity (username)
        identity: String,
        /// Embedding: JSON file or comma-separated values
        #[arg(short, long)]
        embedding: String,
        /// Reference to the enrollment image, stored as metadata
        #[arg(long)]
        image_path: Option<String>,
    },
    /// Find the enrolled identity matching an embedding
    Verify {
        /// Embedding: JSON file or comma-separated values
        #[arg(short, long)]
        embedding: String,
        /// Override the configured login threshold
        #[arg(short, long)]
        threshold: Option<f32>,
    },
    /// List enrolled identities
    List,
    /// Remove an enrolled identity
    Remove {
        identity: String,
    },
    /// Distance between two embeddings
    Distance {
        a: String,
        b: String,
        /// Metric (default: configured metric)
        #[arg(short, long)]
        metric: Option<Metric>,
    },
    /// Show effective configuration and store status
    Status,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(
        backend = %config.backend,
        metric = %config.policy.metric,
        store = %config.store,
        db = %config.db_path.display(),
        "configuration loaded"
    );
    let resolver = Resolver::new(config.policy)?;

    match cli.command {
        Commands::Enroll {
            identity,
            embedding,
            image_path,
        } => {
            let embedding = input::load_embedding(&embedding)?;
            let metadata = match image_path {
                Some(p) => json!({ "image_path": p }),
                None => serde_json::Value::Null,
            };
            let mut store = open_store(&config)?;

            match auth::enroll_embedding(&mut store, &resolver, config.backend, &identity, embedding, metadata) {
                Ok(record) => {
                    if cli.json {
                        print_json(&json!({
                            "enrolled": true,
                            "identity": record.identity,
                            "dimensions": record.embedding.dim(),
                            "created_at": record.created_at,
                        }))?;
                    } else {
                        println!(
                            "Enrolled '{}' ({} dimensions)",
                            record.identity,
                            record.embedding.dim()
                        );
                    }
                    Ok(ExitCode::SUCCESS)
                }
                Err(err @ (AuthError::IdentityTaken(_) | AuthError::DuplicateFace(_))) => {
                    if cli.json {
                        print_json(&json!({ "enrolled": false, "reason": err.to_string() }))?;
                    } else {
                        println!("Enrollment refused: {err}");
                    }
                    Ok(ExitCode::FAILURE)
                }
                Err(err) => Err(err.into()),
            }
        }
        Commands::Verify {
            embedding,
            threshold,
        } => {
            let embedding = input::load_embedding(&embedding)?;
            let store = open_store(&config)?;
            let resolution = auth::verify_embedding(&store, &resolver, config.backend, &embedding, threshold)?;

            report_resolution(&resolution, cli.json)?;
            Ok(if resolution.result.matched {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::List => {
            let store = open_store(&config)?;
            let set = store.list_records()?;
            if cli.json {
                let users: Vec<_> = set
                    .records
                    .iter()
                    .map(|r| {
                        json!({
                            "identity": r.identity,
                            "dimensions": r.embedding.dim(),
                            "created_at": r.created_at,
                            "metadata": r.metadata,
                        })
                    })
                    .collect();
                print_json(&json!({ "users": users, "unreadable": set.unreadable }))?;
            } else if set.is_empty() && set.unreadable.is_empty() {
                println!("No identities enrolled");
            } else {
                for r in &set.records {
                    println!(
                        "{:<24} {:>4}d  {}",
                        r.identity,
                        r.embedding.dim(),
                        r.created_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
                for a in &set.unreadable {
                    println!("! {a}");
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Remove { identity } => {
            let mut store = open_store(&config)?;
            let removed = store.remove(&identity)?;
            if cli.json {
                print_json(&json!({ "identity": identity, "removed": removed }))?;
            } else if removed {
                println!("Removed '{identity}'");
            } else {
                println!("No identity '{identity}'");
            }
            Ok(if removed { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Commands::Distance { a, b, metric } => {
            let a = input::load_embedding(&a)?;
            let b = input::load_embedding(&b)?;
            let metric = metric.unwrap_or(config.policy.metric);
            let d = facematch_core::distance(a.as_slice(), b.as_slice(), metric)?;
            let matched = d <= config.policy.login_threshold;

            if cli.json {
                print_json(&json!({
                    "metric": metric,
                    "distance": d,
                    "threshold": config.policy.login_threshold,
                    "matched": matched,
                }))?;
            } else {
                println!(
                    "{metric} distance: {d:.6} ({} threshold {})",
                    if matched { "within" } else { "outside" },
                    config.policy.login_threshold
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Status => {
            let store = open_store(&config)?;
            let set = store.list_records()?;
            if cli.json {
                print_json(&json!({
                    "version": env!("CARGO_PKG_VERSION"),
                    "config": config,
                    "enrolled": set.len(),
                    "unreadable": set.unreadable.len(),
                }))?;
            } else {
                println!("facematch {}", env!("CARGO_PKG_VERSION"));
                match &config.config_file {
                    Some(p) => println!("config:           {}", p.display()),
                    None => println!("config:           (defaults)"),
                }
                println!("backend:          {}", config.backend);
                println!("metric:           {}", config.policy.metric);
                println!("login threshold:  {}", config.policy.login_threshold);
                println!("enroll threshold: {}", config.policy.enroll_threshold);
                println!("store:            {} ({})", config.store, config.db_path.display());
                println!("enrolled:         {} ({} unreadable)", set.len(), set.unreadable.len());
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn open_store(config: &Config) -> Result<AnyStore> {
    AnyStore::open(config.store, &config.db_path)
        .with_context(|| format!("cannot open {} store at {}", config.store, config.db_path.display()))
}

fn report_resolution(resolution: &Resolution, as_json: bool) -> Result<()> {
    let result = &resolution.result;
    if as_json {
        // JSON has no infinity; an empty scan reports null.
        let distance = result.distance.is_finite().then_some(result.distance);
        return print_json(&json!({
            "found": result.matched,
            "identity": result.identity,
            "distance": distance,
            "threshold": result.threshold,
            "confidence": result.confidence,
            "security_tier": result.security_tier(),
            "closest": resolution.closest,
            "anomalies": resolution.anomalies,
            "message": resolution.to_string(),
        }));
    }

    println!("{resolution}");
    if let Some(tier) = result.security_tier() {
        println!("security tier: {tier}");
    }
    if !resolution.anomalies.is_empty() {
        println!("{} record(s) skipped:", resolution.anomalies.len());
        for a in &resolution.anomalies {
            println!("  {a}");
        }
    }
    Ok(())
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
