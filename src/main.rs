// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Console traffic radar.
//!
//! Polls an ADS-B aggregator around own-ship, classifies nearby traffic into
//! TCAS-style threat tiers and prints changes as they happen. Commands are
//! read from stdin; `h` lists them.

mod config;
mod console;
mod radar;
mod status;
mod threat;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use adsb_client::{FeedDataSource, FeedEvent, FetchOutcome, HttpFetcher, ProtocolType};
use clap::{ArgAction, Parser, ValueEnum};
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::console::{format_targets, parse_command, Command, HELP};
use crate::radar::{spawn_ticker, RadarController, RadarEvent, TrafficSource};
use crate::status::{ConnectionStatus, SystemStatus};
use crate::threat::{ThreatClassifier, ThreatTier};

/// Feed protocol selectable on the command line
#[derive(ValueEnum, Clone, Copy, Debug)]
enum FeedProtocol {
    AirplanesLive,
    Opensky,
}

impl From<FeedProtocol> for ProtocolType {
    fn from(protocol: FeedProtocol) -> Self {
        match protocol {
            FeedProtocol::AirplanesLive => Self::AirplanesLive,
            FeedProtocol::Opensky => Self::OpenSky,
        }
    }
}

#[derive(Parser, Debug)]
#[command(version, about = "Console proximity radar for live ADS-B traffic")]
struct Args {
    /// Own-ship latitude in degrees
    #[arg(long, allow_negative_numbers = true)]
    lat: Option<f64>,

    /// Own-ship longitude in degrees
    #[arg(long, allow_negative_numbers = true)]
    lon: Option<f64>,

    /// Initial range in nautical miles
    #[arg(short, long)]
    range: Option<f64>,

    /// Feed protocol
    #[arg(short, long, value_enum)]
    protocol: Option<FeedProtocol>,

    /// Do not read or write the snapshot cache
    #[arg(long)]
    no_cache: bool,

    /// Config file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn load_config(args: &Args) -> AppConfig {
    let loaded = match &args.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };
    let mut config = match loaded {
        Ok(config) => config,
        Err(e) => {
            warn!("Failed to load config, using defaults: {}", e);
            AppConfig::default()
        }
    };

    if let Some(lat) = args.lat {
        config.override_latitude = Some(lat);
    }
    if let Some(lon) = args.lon {
        config.override_longitude = Some(lon);
    }
    if let Some(range) = args.range {
        config.radar.initial_range_nm = range;
    }
    if let Some(protocol) = args.protocol {
        let protocol = ProtocolType::from(protocol);
        if protocol != config.feed.protocol {
            // A base URL for one protocol is meaningless for another
            config.feed.base_url = None;
        }
        config.feed.protocol = protocol;
    }
    if args.no_cache {
        config.feed.cache_enabled = false;
    }
    config
}

fn lock(controller: &Mutex<RadarController>) -> std::sync::MutexGuard<'_, RadarController> {
    controller.lock().unwrap_or_else(PoisonError::into_inner)
}

fn report_radar_event(event: &RadarEvent) {
    match event {
        RadarEvent::HighestThreatChanged {
            current: Some(ThreatTier::ResolutionAdvisory),
            ..
        } => warn!("RESOLUTION ADVISORY: traffic within RA limits"),
        RadarEvent::HighestThreatChanged {
            current: Some(ThreatTier::TrafficAdvisory),
            ..
        } => warn!("TRAFFIC ADVISORY: traffic within TA limits"),
        RadarEvent::HighestThreatChanged { previous, current } => {
            info!(
                "Highest threat {} -> {}",
                previous.map_or("-", ThreatTier::label),
                current.map_or("-", ThreatTier::label)
            );
        }
        RadarEvent::TargetCountChanged { previous, current } => {
            info!("Targets {} -> {}", previous, current);
        }
        RadarEvent::RangeChanged { .. } => {}
    }
}

/// Run one console command. Returns false when the user asked to quit.
async fn handle_command(
    command: Command,
    controller: &Mutex<RadarController>,
    feed: &FeedDataSource,
    status: &mut SystemStatus,
) -> bool {
    match command {
        Command::CycleRange => {
            lock(controller).cycle_range();
        }
        Command::RangeUp => {
            lock(controller).step_up();
        }
        Command::RangeDown => {
            lock(controller).step_down();
        }
        Command::SetRange(range) => {
            lock(controller).set_range(range);
        }
        Command::FitVisible => {
            if lock(controller).fit_visible_targets().is_none() {
                println!("No targets to fit");
            }
        }
        Command::RangeToNearest => {
            if lock(controller).auto_range_to_nearest().is_none() {
                println!("No aircraft with a position in the feed");
            }
        }
        Command::ToggleAutoRange => {
            let mut radar = lock(controller);
            let enabled = !radar.auto_range();
            radar.set_auto_range(enabled);
        }
        Command::Position(own) => {
            lock(controller).update_own_position(own);
            println!(
                "Own-ship at {:.4}, {:.4}, {:.0} ft, heading {:.0}, {:.0} kt",
                own.latitude,
                own.longitude,
                own.altitude_ft(),
                own.heading_deg,
                own.ground_speed_kt()
            );
        }
        Command::Targets => {
            let radar = lock(controller);
            println!(
                "{} targets within {} NM, highest {}",
                radar.target_count(),
                radar.range_nm(),
                radar.highest_threat().map_or("-", ThreatTier::label)
            );
            println!("{}", format_targets(radar.targets()));
        }
        Command::Json => match serde_json::to_string_pretty(lock(controller).targets()) {
            Ok(json) => println!("{json}"),
            Err(e) => error!("Failed to serialize targets: {}", e),
        },
        Command::Status => {
            println!("{}", status.summary());
            let radar = lock(controller);
            let own = radar.own_position();
            println!(
                "Own-ship {:.4}, {:.4}, {:.0} ft | auto-range {} | presets {:?}",
                own.latitude,
                own.longitude,
                own.altitude_ft(),
                if radar.auto_range() { "on" } else { "off" },
                radar.presets()
            );
        }
        Command::Diagnostics => {
            for d in &status.diagnostics {
                println!("{} {:?} {}", d.timestamp.format("%H:%M:%S"), d.level, d.message);
            }
        }
        Command::FetchNow => match feed.fetch_now().await {
            FetchOutcome::Updated { aircraft_count } => println!("Fetched {aircraft_count} aircraft"),
            FetchOutcome::Failed { consecutive_failures } => {
                println!("Fetch failed ({consecutive_failures} in a row)");
            }
            FetchOutcome::InFlight => println!("A fetch is already in progress"),
            FetchOutcome::Halted => println!("Feed is halted; use restart"),
        },
        Command::Restart => {
            feed.start();
            status.set_connection_status(ConnectionStatus::Connecting);
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => return false,
    }
    true
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default_filter = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let config = load_config(&args);
    config.validate();
    if let Ok(path) = AppConfig::get_config_path() {
        info!("Config: {}", path.display());
    }

    let feed_config = config.feed_config();
    let fetcher = HttpFetcher::new(feed_config.request_timeout)?;
    let feed = Arc::new(FeedDataSource::new(feed_config, Arc::new(fetcher)));

    let source: Arc<dyn TrafficSource> = feed.clone();
    let controller = RadarController::new(
        &config.controller_config(),
        ThreatClassifier::new(config.thresholds),
        source,
        config.own_ship(),
    );
    let mut status = SystemStatus::new(feed.protocol().to_string(), controller.range_nm());
    let mut radar_events = controller.subscribe();
    let mut feed_events = feed.subscribe();
    let controller = Arc::new(Mutex::new(controller));

    feed.start();
    status.set_connection_status(ConnectionStatus::Connecting);
    let cancel_token = CancellationToken::new();
    let ticker = spawn_ticker(Arc::clone(&controller), cancel_token.clone());

    let own = config.own_ship();
    info!(
        "Own-ship at {:.4}, {:.4}; range {} NM; h for help",
        own.latitude,
        own.longitude,
        lock(&controller).range_nm()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = feed_events.recv() => match event {
                Ok(event) => {
                    if let FeedEvent::Halted { .. } = event {
                        println!("Feed halted; use restart to resume");
                    }
                    status.apply_feed_event(&event);
                }
                Err(RecvError::Lagged(n)) => warn!("Dropped {} feed events", n),
                Err(RecvError::Closed) => break,
            },
            event = radar_events.recv() => match event {
                Ok(event) => {
                    report_radar_event(&event);
                    status.apply_radar_event(&event);
                }
                Err(RecvError::Lagged(n)) => warn!("Dropped {} radar events", n),
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match parse_command(&line) {
                    Ok(command) => {
                        if !handle_command(command, &controller, &feed, &mut status).await {
                            break;
                        }
                    }
                    Err(e) => println!("{e}"),
                },
                Ok(None) => {
                    info!("stdin closed; running until interrupted");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    stdin_open = false;
                }
            },
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!("Failed to listen for ctrl-c: {}", e);
                }
                break;
            }
        }
    }

    info!("Shutting down");
    cancel_token.cancel();
    feed.stop();
    if let Err(e) = ticker.await {
        warn!("Radar ticker ended abnormally: {}", e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let args = Args::parse_from([
            "traffic-radar",
            "--config",
            path.to_str().unwrap(),
            "--lat",
            "-33.94",
            "--lon",
            "151.18",
            "--range",
            "20",
            "--protocol",
            "opensky",
            "--no-cache",
        ]);

        let config = load_config(&args);
        assert_eq!(config.override_latitude, Some(-33.94));
        assert_eq!(config.override_longitude, Some(151.18));
        assert!((config.radar.initial_range_nm - 20.0).abs() < f64::EPSILON);
        assert_eq!(config.feed.protocol, ProtocolType::OpenSky);
        assert!(!config.feed.cache_enabled);
    }

    #[test]
    fn test_verbose_counts() {
        let args = Args::parse_from(["traffic-radar", "-vv"]);
        assert_eq!(args.verbose, 2);
        assert!(args.protocol.is_none());
    }

    #[tokio::test]
    async fn test_handle_command_quit_and_range() {
        use std::time::Duration;

        use adsb_client::{FeedConfig, FeedError, FeedFetcher};

        struct Unreachable;

        #[async_trait::async_trait]
        impl FeedFetcher for Unreachable {
            async fn fetch(&self, _url: &str) -> Result<Vec<u8>, FeedError> {
                Err(FeedError::Timeout(Duration::from_secs(1)))
            }
        }

        let feed = Arc::new(FeedDataSource::new(FeedConfig::default(), Arc::new(Unreachable)));
        let source: Arc<dyn TrafficSource> = feed.clone();
        let controller = Mutex::new(RadarController::new(
            &radar::ControllerConfig::default(),
            ThreatClassifier::default(),
            source,
            radar::OwnShipPosition::default(),
        ));
        let mut status = SystemStatus::new("test", 40.0);

        assert!(handle_command(Command::RangeUp, &controller, &feed, &mut status).await);
        assert!((lock(&controller).range_nm() - 80.0).abs() < f64::EPSILON);

        assert!(handle_command(Command::FetchNow, &controller, &feed, &mut status).await);
        assert_eq!(feed.consecutive_failures(), 1);

        assert!(!handle_command(Command::Quit, &controller, &feed, &mut status).await);
    }
}
