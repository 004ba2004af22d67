use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use car_discounts::{
    init_logging, reconcile, requests::parse_registration_date, CarService, Config, SqliteStore,
};

#[derive(Parser)]
#[command(name = "car-discounts", version, about = "Car inventory discount reconciliation")]
struct Cli {
    /// SQLite database file (overrides CARS_DATABASE_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database schema
    Init,
    /// List every car
    List,
    /// Show one car as JSON
    Show { id: String },
    /// Run one reconciliation tick
    Reconcile {
        /// Reference instant (RFC 3339 or YYYY-MM-DD), defaults to now
        #[arg(long)]
        at: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let db_path = cli.db.unwrap_or(config.database_path);

    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("Failed to open database {:?}", db_path))?;
    let service = CarService::new(Arc::new(store));

    match cli.command {
        Command::Init => {
            println!("✓ Database initialized: {:?}", db_path);
        }
        Command::List => run_list(&service).await?,
        Command::Show { id } => {
            let car = service.get(&id).await?;
            println!("{}", serde_json::to_string_pretty(&car)?);
        }
        Command::Reconcile { at } => {
            let now: DateTime<Utc> = match at {
                Some(at) => parse_registration_date(&at)?,
                None => Utc::now(),
            };
            run_reconcile(&service, now).await?;
        }
    }

    Ok(())
}

async fn run_list(service: &CarService<SqliteStore>) -> Result<()> {
    let cars = service.get_all().await?;

    println!("{:<16} {:<20} {:>12} {:<12} {:>6}", "ID", "MANUFACTURER", "PRICE", "REGISTERED", "OWNERS");
    for car in &cars {
        println!(
            "{:<16} {:<20} {:>12.2} {:<12} {:>6}{}",
            car.id,
            car.manufacturer.name,
            car.price,
            car.first_registration_date.format("%Y-%m-%d"),
            car.owners.len(),
            if car.discounted { "  (discounted)" } else { "" }
        );
    }
    println!("\n✓ {} cars", cars.len());

    Ok(())
}

async fn run_reconcile(service: &CarService<SqliteStore>, now: DateTime<Utc>) -> Result<()> {
    let report = reconcile(service, now).await;

    println!("{}", report.summary());
    for id in &report.undiscounted {
        println!("  ↑ {} back to full price", id);
    }
    for id in &report.discounted {
        println!("  ↓ {} discounted", id);
    }
    for failure in &report.failures {
        eprintln!(
            "  ❌ {:?} {}: {}",
            failure.job,
            failure.car_id.as_deref().unwrap_or("-"),
            failure.message
        );
    }

    if !report.is_clean() {
        anyhow::bail!("{} reconciliation failures", report.failures.len());
    }

    Ok(())
}
