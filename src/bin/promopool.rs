//! promopool admin CLI
//!
//! Command-line front end over the allocation engine, for bootstrapping and
//! inspecting a code database stored in a local file backend.
//!
//! # Examples
//!
//! ```bash
//! # Seed the built-in code list (first boot only)
//! promopool seed
//!
//! # Bootstrap from an explicit list or a file
//! promopool init SAVE10 SAVE20
//! promopool init --file codes.txt
//!
//! # Allocate and inspect
//! promopool assign --user u1 --offer spring-sale
//! promopool show --user u1
//! promopool stats
//! ```

use anyhow::{bail, Context};
use chrono::{Duration, Utc};
use clap::{Args, Parser, Subcommand};
use promopool::storage::FileBackend;
use promopool::{PromoCodeManager, Storage};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// promopool - promo code allocation engine
#[derive(Parser, Debug)]
#[command(name = "promopool")]
#[command(version = promopool::VERSION)]
#[command(about = "Promo code allocation engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path of the code database file
    #[arg(
        long,
        global = true,
        default_value = "data/promopool.json",
        env = "PROMOPOOL_DATA"
    )]
    data_file: PathBuf,

    /// Log directory path (file logging is enabled when set)
    #[arg(long, global = true, env = "PROMOPOOL_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info", env = "RUST_LOG")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Seed the built-in code list if the database is still empty
    Seed,

    /// Replace the pool with the given codes (unconditional)
    Init(InitArgs),

    /// Append codes not already in the pool
    Add {
        /// Code values to append
        #[arg(required = true)]
        codes: Vec<String>,
    },

    /// List available (unassigned) codes
    Pool,

    /// List the assignment ledger
    Ledger,

    /// Show pool/assigned/used counts
    Stats,

    /// Assign a code to a (user, offer) pair
    Assign(AssignArgs),

    /// Mark an assigned code as used
    MarkUsed {
        /// User identifier
        #[arg(short, long)]
        user: String,

        /// Offer identifier
        #[arg(short, long)]
        offer: String,
    },

    /// Show a user's assignments (all offers, or one)
    Show {
        /// User identifier
        #[arg(short, long)]
        user: String,

        /// Restrict to a single offer
        #[arg(short, long)]
        offer: Option<String>,
    },

    /// Delete the pool, the ledger and every assignment
    Clear {
        /// Confirm the irreversible wipe
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Args, Debug)]
struct InitArgs {
    /// Code values
    codes: Vec<String>,

    /// Read codes from a file instead, one per line
    #[arg(short, long, conflicts_with = "codes")]
    file: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct AssignArgs {
    /// User identifier
    #[arg(short, long)]
    user: String,

    /// Offer identifier
    #[arg(short, long)]
    offer: String,

    /// Override the default 30-day validity window
    #[arg(long)]
    expires_in_days: Option<i64>,
}

fn init_logging(cli: &Cli) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_new(&cli.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match &cli.log_dir {
        Some(dir) => {
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, "promopool.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(&cli);

    let backend = FileBackend::open(&cli.data_file)
        .await
        .with_context(|| format!("opening data file {}", cli.data_file.display()))?;
    let manager = PromoCodeManager::new(Arc::new(Storage::new(Box::new(backend))));

    match cli.command {
        Commands::Seed => {
            if manager.auto_initialize().await {
                println!("{} codes available", manager.get_available_codes_count().await);
            } else {
                bail!("seeding failed, see logs");
            }
        }

        Commands::Init(args) => {
            let codes = match args.file {
                Some(path) => {
                    let contents = tokio::fs::read_to_string(&path)
                        .await
                        .with_context(|| format!("reading code list {}", path.display()))?;
                    contents.lines().map(|l| l.to_string()).collect()
                }
                None => args.codes,
            };
            if codes.is_empty() {
                bail!("no codes given; pass values or --file");
            }
            if !manager.initialize_code_database(&codes).await {
                bail!("initialization failed, see logs");
            }
            println!("{} codes in pool", manager.get_available_codes_count().await);
        }

        Commands::Add { codes } => {
            let before = manager.get_available_codes_count().await;
            if !manager.add_codes_to_database(&codes).await {
                bail!("adding codes failed, see logs");
            }
            let after = manager.get_available_codes_count().await;
            println!("added {} of {} codes ({} in pool)", after - before, codes.len(), after);
        }

        Commands::Pool => {
            let pool = manager.get_available_codes().await;
            if pool.is_empty() {
                println!("pool is empty");
            }
            for entry in pool {
                println!("{}\t{}\t{}", entry.code, entry.id, entry.created_at);
            }
        }

        Commands::Ledger => {
            for entry in manager.get_assigned_codes().await {
                println!(
                    "{}\tuser={}\toffer={}\tused={}\texpires={}",
                    entry.code, entry.user_id, entry.offer_id, entry.is_used, entry.expires_at
                );
            }
        }

        Commands::Stats => {
            let stats = manager.get_code_database_stats().await;
            println!("available: {}", stats.available);
            println!("assigned:  {}", stats.assigned);
            println!("used:      {}", stats.used);
        }

        Commands::Assign(args) => {
            let expires_at = args
                .expires_in_days
                .map(|days| Utc::now() + Duration::days(days));
            match manager
                .assign_promo_code_to_user(&args.user, &args.offer, expires_at)
                .await
            {
                Some(assignment) => {
                    println!("{} (expires {})", assignment.code, assignment.expires_at)
                }
                None => bail!("no code assigned: pool exhausted or storage failed"),
            }
        }

        Commands::MarkUsed { user, offer } => {
            if manager.mark_promo_code_as_used(&user, &offer).await {
                println!("marked used");
            } else {
                bail!("no assignment for user={user} offer={offer}");
            }
        }

        Commands::Show { user, offer } => match offer {
            Some(offer) => match manager.get_user_promo_code_for_offer(&user, &offer).await {
                Some(a) => println!("{}\tused={}\texpires={}", a.code, a.is_used, a.expires_at),
                None => println!("no assignment"),
            },
            None => {
                let all = manager.get_all_user_promo_codes(&user).await;
                if all.is_empty() {
                    println!("no assignments");
                }
                for a in all {
                    println!(
                        "{}\toffer={}\tused={}\texpires={}",
                        a.code, a.offer_id, a.is_used, a.expires_at
                    );
                }
            }
        },

        Commands::Clear { yes } => {
            if !yes {
                bail!("refusing to wipe without --yes");
            }
            warn!("wiping all promo code data");
            if !manager.clear_all_code_data().await {
                bail!("clear failed, see logs");
            }
            println!("cleared");
        }
    }

    Ok(())
}
