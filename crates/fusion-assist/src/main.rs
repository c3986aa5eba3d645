//! # Fusion Assist CLI (`fusion`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `fusion init` | Create the SQLite database and run schema migrations |
//! | `fusion serve` | Start the HTTP + WebSocket server |
//! | `fusion ingest <file> --user <id>` | Upload and ingest one file, waiting for the result |
//! | `fusion summaries backfill` | Regenerate order summaries for every user with orders |
//! | `fusion summaries report` | Show which users with orders lack a summary |
//! | `fusion token --user <id>` | Sign a development access token |
//!
//! ## Logging
//!
//! Logs go to stderr, filtered by `RUST_LOG` (default `info`). Pass
//! `--log-json` for one JSON object per line.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fusion_assist::app::App;
use fusion_assist::auth::TokenVerifier;
use fusion_assist::{config, migrate, server};

/// Fusion Assist: order-aware chat and document Q&A for the Fusion store.
#[derive(Parser)]
#[command(name = "fusion", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/fusion.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Start the HTTP and WebSocket server on `[server].bind`.
    Serve,

    /// Store a file as a new document and run ingestion to completion.
    Ingest {
        /// File to ingest (.txt, .pdf, .docx).
        file: PathBuf,

        /// Uploading user id.
        #[arg(long)]
        user: i64,
    },

    /// Order summary maintenance.
    Summaries {
        #[command(subcommand)]
        action: SummariesAction,
    },

    /// Sign an access token for local testing.
    Token {
        #[arg(long)]
        user: i64,

        /// Lifetime in seconds.
        #[arg(long, default_value_t = 3600)]
        ttl: u64,
    },
}

#[derive(Subcommand)]
enum SummariesAction {
    /// Regenerate every user's summary from their full order history.
    Backfill {
        /// Summaries generated in parallel.
        #[arg(long, default_value_t = 4)]
        concurrency: usize,
    },
    /// List users with orders but no summary.
    Report,
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(cfg).await?;
        }
        Commands::Ingest { file, user } => {
            let bytes = tokio::fs::read(&file).await?;
            let filename = file
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("upload")
                .to_string();

            let app = App::from_config(cfg).await?;
            let doc = app.upload_document(user, &filename, &bytes).await?;
            app.jobs.wait_idle().await;

            let chunks = app.store.chunks_for_document(&doc.id).await?.len();
            let status = app
                .store
                .get_document(&doc.id)
                .await?
                .map(|d| d.status.to_string())
                .unwrap_or_else(|| "MISSING".to_string());
            println!("document {}", doc.id);
            println!("  file:   {}", filename);
            println!("  status: {}", status);
            println!("  chunks: {}", chunks);
        }
        Commands::Summaries { action } => {
            let app = App::from_config(cfg).await?;
            match action {
                SummariesAction::Backfill { concurrency } => {
                    let report = app.summarizer.backfill(concurrency).await?;
                    println!(
                        "Summaries: {} generated, {} skipped, {} failed",
                        report.generated, report.skipped, report.failed
                    );
                }
                SummariesAction::Report => {
                    let report = app.summarizer.coverage().await?;
                    println!(
                        "{} users with orders, {} summaries",
                        report.users_with_orders.len(),
                        report.summaries.len()
                    );
                    for summary in &report.summaries {
                        let preview: String = summary.summary.chars().take(80).collect();
                        println!(
                            "  user {} ({}): {}",
                            summary.user_id,
                            summary.last_updated.format("%Y-%m-%d %H:%M"),
                            preview
                        );
                    }
                    if report.missing.is_empty() {
                        println!("Every user with orders has a summary.");
                    } else {
                        println!("Missing summaries:");
                        for user_id in &report.missing {
                            println!("  user {}", user_id);
                        }
                    }
                }
            }
        }
        Commands::Token { user, ttl } => {
            let verifier = TokenVerifier::new(cfg.auth.secret()?);
            println!("{}", verifier.sign(user, Duration::from_secs(ttl))?);
        }
    }

    Ok(())
}
