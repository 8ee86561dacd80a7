//! polmon daemon entry point.
//!
//! Modes:
//!   polmon --config polmon.toml                 poll every location on the interval
//!   polmon --config polmon.toml --once          one cycle per location, views as JSON
//!   polmon --config polmon.toml --verify        probe every location, print a report
//!   polmon ... --replay recorded.json           use a recorded payload instead of the API

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::Parser;

use polmon_service::config::ServiceConfig;
use polmon_service::ingest::SnapshotSource;
use polmon_service::ingest::pollen_api::PollenApiClient;
use polmon_service::ingest::replay::ReplaySource;
use polmon_service::logging::init_logger;
use polmon_service::scheduler::Scheduler;
use polmon_service::tables::{BundledTables, TableProvider};
use polmon_service::tracker::{LocationTracker, views_to_json};
use polmon_service::verify::{print_report_summary, verify_all};

#[derive(Parser)]
#[command(name = "polmon")]
#[command(about = "Pollen forecast polling and reconciliation service", long_about = None)]
struct Cli {
    /// Service configuration file
    #[arg(long, default_value = "polmon.toml")]
    config: PathBuf,

    /// Run one cycle per location, print the views as JSON, and exit
    #[arg(long, default_value_t = false)]
    once: bool,

    /// Replay a recorded forecast response instead of calling the API
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Probe each location and print a verification report
    #[arg(long, default_value_t = false, conflicts_with = "once")]
    verify: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let config = ServiceConfig::load(&cli.config)?;
    init_logger(config.log_level(), config.service.log_file.as_deref())?;

    let profiles = config.profiles()?;
    if profiles.is_empty() {
        return Err("no [[locations]] configured".into());
    }

    let source: Arc<dyn SnapshotSource> = match &cli.replay {
        Some(path) => Arc::new(ReplaySource::new(path.clone())),
        None => Arc::new(PollenApiClient::new(
            &config.service.api_base_url,
            config.request_timeout(),
        )?),
    };

    if cli.verify {
        let report = verify_all(source.as_ref(), &profiles);
        print_report_summary(&report);
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let tables: Arc<dyn TableProvider> = match &config.service.tables_path {
        Some(path) => Arc::new(BundledTables::from_path(path)?),
        None => Arc::new(BundledTables::bundled()?),
    };

    let trackers: Vec<LocationTracker> = profiles
        .into_iter()
        .map(|profile| {
            LocationTracker::new(profile, Arc::clone(&source), Arc::clone(&tables), config.risk_scale())
                .with_reference_language(&config.service.reference_language)
        })
        .collect();

    if cli.once {
        let mut views = Vec::with_capacity(trackers.len());
        for mut tracker in trackers {
            views.push(tracker.run_cycle(Utc::now()));
        }
        println!("{}", views_to_json(&views)?);
        return Ok(());
    }

    tracing::info!(
        locations = trackers.len(),
        source = source.name(),
        "starting polmon daemon"
    );
    let _scheduler = Scheduler::start(trackers, config.poll_interval())?;

    // Workers run until the process is terminated.
    loop {
        std::thread::park();
    }
}
