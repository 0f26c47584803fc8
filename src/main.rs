mod cache;
mod config;
mod models;
mod notify;
mod pipeline;
mod scheduler;
mod scraper;
mod storage;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::AppConfig;
use crate::pipeline::Tracker;
use crate::storage::Repository;

#[derive(Parser)]
#[command(name = "pricewatch", about = "Product price and stock tracker", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler (assign, drain, report, clear) until Ctrl-C
    Run,

    /// Queue every tracked product and scrape it once
    Scrape,

    /// Build today's digest and send it
    Report,

    /// Scrape a single product and print its styles
    Lookup { code: String },

    /// Track a style of a product at a target price
    Track {
        code: String,
        #[arg(long)]
        colour: String,
        #[arg(long)]
        size: String,
        /// Target price in yen
        #[arg(long)]
        price: i64,
    },

    /// Stop tracking a target by id
    Untrack { id: i64 },

    /// List targets with their latest price and stock
    Targets,

    /// Delete a product with its styles, history and targets
    DeleteProduct { code: String },

    /// Apply schema migrations
    Migrate,

    /// Show database statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "pricewatch=info,warn",
        1 => "pricewatch=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Migrate => {
            Repository::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }

        Command::Stats => {
            let repo = Repository::open(&config.storage.db_path)?;
            println!("─────────────────────────────────");
            println!("  pricewatch: Database Stats");
            println!("─────────────────────────────────");
            println!("  Products     : {}", utils::fmt_number(repo.product_count()?));
            println!("  Styles       : {}", utils::fmt_number(repo.style_count()?));
            println!("  Observations : {}", utils::fmt_number(repo.observation_count()?));
            println!("  Tracked      : {}", utils::fmt_number(repo.tracked_codes()?.len() as i64));
            println!("  Scrape runs  : {}", utils::fmt_number(repo.scrape_run_count()?));
            println!("─────────────────────────────────");
        }

        command => {
            let schedule = config.schedule.clone();
            let tracker = Arc::new(Tracker::from_config(config)?);
            run_command(command, tracker, &schedule).await?;
        }
    }

    Ok(())
}

async fn run_command(
    command: Command,
    tracker: Arc<Tracker>,
    schedule: &config::ScheduleConfig,
) -> Result<()> {
    match command {
        Command::Run => {
            let mut sched = scheduler::start(Arc::clone(&tracker), schedule).await?;
            tokio::signal::ctrl_c().await?;
            info!("Shutting down…");
            sched.shutdown().await?;
        }

        Command::Scrape => {
            let stats = tracker.scrape_now().await?;
            if stats.retried > 0 {
                println!("{} codes left queued for retry.", stats.retried);
            }
        }

        Command::Report => {
            if !tracker.send_daily_report().await? {
                println!("Nothing to report.");
            }
        }

        Command::Lookup { code } => {
            let outcome = tracker.lookup(&code).await?;
            match outcome.result {
                Ok(product) => {
                    println!("{} ({})", product.name, code);
                    for s in &product.styles {
                        println!(
                            "  {:<12} {:<12} ¥{:>9}  stock {:>3}  {}",
                            s.colour,
                            s.size,
                            utils::fmt_number(s.price),
                            s.stock,
                            s.image_url
                        );
                    }
                }
                Err(e) => println!("{code}: {e}"),
            }
        }

        Command::Track {
            code,
            colour,
            size,
            price,
        } => match tracker.add_target(&code, &colour, &size, price).await {
            Ok(target) => println!("Tracking target #{} for {code}.", target.id),
            Err(e) if e.is_already_tracked() => {
                println!("{code} {colour} / {size} is already tracked.");
            }
            Err(e) => return Err(e.into()),
        },

        Command::Untrack { id } => {
            tracker.remove_target(id)?;
            println!("Target #{id} removed.");
        }

        Command::Targets => {
            let statuses = tracker.target_statuses()?;
            if statuses.is_empty() {
                println!("No targets. Add one with `pricewatch track`.");
            }
            for t in &statuses {
                let current = t
                    .price
                    .map(|p| format!("¥{}", utils::fmt_number(p)))
                    .unwrap_or_else(|| "—".into());
                let stock = t.stock.map(|s| s.to_string()).unwrap_or_else(|| "—".into());
                println!(
                    "#{:<4} {} {} ({} / {}): target ¥{}, now {}, stock {}",
                    t.target_id,
                    t.product_code,
                    t.name,
                    t.colour,
                    t.size,
                    utils::fmt_number(t.target_price),
                    current,
                    stock
                );
            }
        }

        Command::DeleteProduct { code } => {
            if tracker.delete_product(&code)? {
                println!("Deleted {code}.");
            } else {
                println!("No product {code}.");
            }
        }

        // no tracker needed, handled in main
        Command::Migrate | Command::Stats => {}
    }
    Ok(())
}
