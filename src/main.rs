//! GeoLife loader CLI
//!
//! # Usage
//!
//! ```bash
//! # Load the dataset with the default worker count
//! geolife-loader --dataset ./dataset --database geolife.db load
//!
//! # Run the report battery, as tables or JSON
//! geolife-loader --database geolife.db report
//! geolife-loader --database geolife.db report --json
//!
//! # Remove every table
//! geolife-loader --database geolife.db drop
//! ```
//!
//! Logging is controlled with `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::{error, info, LevelFilter};

use geolife_loader::reports::{self, FullReport};
use geolife_loader::{pipeline, LoaderConfig, Result, SqliteStore};

#[derive(Parser)]
#[command(name = "geolife-loader")]
#[command(about = "Load the GeoLife trajectory dataset into SQLite and report on it")]
#[command(version)]
struct Cli {
    /// JSON configuration file; flags below override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Dataset root (contains Data/ and labeled_ids.txt)
    #[arg(long, global = true)]
    dataset: Option<PathBuf>,

    /// SQLite database file
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Number of ingestion workers
    #[arg(long, global = true)]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load every user's labels and trajectories
    Load,

    /// Run the analytical report battery
    Report {
        /// Print the reports as JSON
        #[arg(long)]
        json: bool,
    },

    /// Drop all tables
    Drop,
}

impl Cli {
    fn loader_config(&self) -> Result<LoaderConfig> {
        let mut config = match &self.config {
            Some(path) => LoaderConfig::from_json_file(path)?,
            None => LoaderConfig::default(),
        };
        if let Some(dataset) = &self.dataset {
            config = config.with_dataset_root(dataset);
        }
        if let Some(database) = &self.database {
            config = config.with_database_path(database);
        }
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("[{}] {}", e.kind(), e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = cli.loader_config()?;
    let store = SqliteStore::open(&config.database_path, &config)?;
    store.ping()?;

    match &cli.command {
        Commands::Load => {
            let summary = pipeline::run(&config, &store, None)?;
            info!(
                "Loaded {} users, {} activities, {} samples in {:.2}s",
                summary.users,
                summary.activities,
                summary.samples,
                summary.elapsed().as_secs_f64()
            );
        }
        Commands::Report { json } => {
            let report = reports::run_all(&store)?;
            if *json {
                println!("{}", report.to_json()?);
            } else {
                print_report(&report);
            }
        }
        Commands::Drop => store.drop_all()?,
    }
    Ok(())
}

fn print_report(report: &FullReport) {
    print_table(
        "1. Row counts",
        &["Table", "Count"],
        vec![
            vec!["users".into(), report.counts.users.to_string()],
            vec!["activities".into(), report.counts.activities.to_string()],
            vec!["samples".into(), report.counts.samples.to_string()],
        ],
    );

    println!(
        "2. Average activities per user: {:.2}\n",
        report.average_activities_per_user
    );

    print_table(
        "3. Top users by activity count",
        &["User", "Activities"],
        report
            .top_users_by_activities
            .iter()
            .map(|r| vec![r.user_id.clone(), r.count.to_string()])
            .collect(),
    );

    print_table(
        "4. Users who took a taxi",
        &["User"],
        report.taxi_users.iter().map(|u| vec![u.clone()]).collect(),
    );

    print_table(
        "5. Activities per transportation mode",
        &["Mode", "Activities"],
        report
            .mode_counts
            .iter()
            .map(|r| vec![r.transportation_mode.clone(), r.count.to_string()])
            .collect(),
    );

    let year = &report.busiest_year;
    match (&year.by_activities, &year.by_hours) {
        (Some(a), Some(h)) => println!(
            "6. Most activities: {} ({}), most hours: {} ({}h); same year: {}\n",
            a.year, a.value, h.year, h.value, year.same_year
        ),
        _ => println!("6. No activities recorded\n"),
    }

    println!(
        "7. User 112 walked {:.3} km in 2008\n",
        report.walked_km_user_112_2008
    );

    print_table(
        "8. Top users by altitude gained walking",
        &["User", "Gained (ft)"],
        report
            .top_altitude_gain
            .iter()
            .map(|r| vec![r.user_id.clone(), r.gained_feet.to_string()])
            .collect(),
    );

    print_table(
        "9. Users with invalid activities",
        &["User", "Invalid activities"],
        report
            .invalid_activities
            .iter()
            .map(|r| vec![r.user_id.clone(), r.count.to_string()])
            .collect(),
    );

    print_table(
        "10. Users near the Forbidden City",
        &["User"],
        report
            .forbidden_city_visitors
            .iter()
            .map(|u| vec![u.clone()])
            .collect(),
    );

    print_table(
        "11. Most used transportation mode per user",
        &["User", "Mode", "Activities"],
        report
            .top_mode_per_user
            .iter()
            .map(|r| {
                vec![
                    r.user_id.clone(),
                    r.transportation_mode.clone(),
                    r.count.to_string(),
                ]
            })
            .collect(),
    );
}

fn print_table(title: &str, headers: &[&str], rows: Vec<Vec<String>>) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let line = |cells: Vec<&str>| {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
            .collect::<Vec<_>>()
            .join(" | ")
    };

    println!("{}", title);
    println!("{}", line(headers.to_vec()));
    println!(
        "{}",
        widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("-+-")
    );
    for row in &rows {
        println!("{}", line(row.iter().map(String::as_str).collect()));
    }
    println!();
}
