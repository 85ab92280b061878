use anyhow::Result;
use bandwatch::config::AppConfig;
use bandwatch::ledger::SignalLedger;
use bandwatch::market_data::AlphaVantageProvider;
use bandwatch::monitor::{self, CycleOutcome};
use bandwatch::notify::Dispatcher;
use chrono::Utc;
use log::info;
use std::env;
use std::fs::File;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger with default info level if RUST_LOG not set
    if env::var("RUST_LOG").is_err() {
        unsafe {
            env::set_var("RUST_LOG", "info");
        }
    }
    env_logger::init();
    info!("Starting Bollinger band monitor");

    let args: Vec<String> = env::args().collect();
    let once = args.iter().any(|arg| arg == "--once");
    let config_file = args
        .iter()
        .skip(1)
        .find(|arg| !arg.starts_with("--"))
        .map(String::as_str)
        .unwrap_or("config.json");

    info!("Loading configuration from: {}", config_file);
    let config = AppConfig::load_from_file(config_file);
    config.monitor.validate()?;

    let provider = Arc::new(AlphaVantageProvider::new(config.monitor.api_key.clone())?);
    let dispatcher = Arc::new(Dispatcher::from_config(&config.notifications));
    info!("{} notification channels enabled", dispatcher.channel_count());

    if once {
        let ledger = SignalLedger::new();
        let outcome =
            monitor::single_check(provider.as_ref(), &dispatcher, &ledger, &config.monitor).await?;
        report_outcome(&config.monitor.symbol, &outcome);
        return Ok(());
    }

    let handle = monitor::spawn(provider, dispatcher);
    let state = handle.start(config.monitor.clone()).await?;
    info!("Monitor state: {}", state);

    tokio::signal::ctrl_c().await?;
    info!("Shutting down monitor...");
    handle.stop().await?;

    let signals = handle.history().await;
    if !signals.is_empty() {
        let filename =
            SignalLedger::default_export_name(&config.monitor.symbol, Utc::now().date_naive());
        let file = File::create(&filename)?;
        let exported = handle.ledger().export_csv(file).await?;
        info!("Exported {} signals to {}", exported, filename);
    }

    info!("Monitor stopped");
    Ok(())
}

fn report_outcome(symbol: &str, outcome: &CycleOutcome) {
    match &outcome.market {
        Some(market) => {
            info!(
                "{}: close ${:.2} at {}",
                symbol,
                market.close,
                market.timestamp.format("%Y-%m-%d")
            );
            if let (Some(upper), Some(middle), Some(lower)) =
                (market.upper_band, market.middle_band, market.lower_band)
            {
                info!(
                    "Bands: upper ${:.2}, middle ${:.2}, lower ${:.2}",
                    upper, middle, lower
                );
            }
            if let Some(percent_b) = market.percent_b {
                info!("%B: {:.3}", percent_b);
            }
            if let Some(position) = market.position {
                info!("Price is {}", position);
            }
        }
        None => info!("{}: no bars available", symbol),
    }

    match &outcome.signal {
        Some(signal) => info!("Signal: {}", signal.message),
        None => info!("No signal this check"),
    }
}
