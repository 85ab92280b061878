use crate::bars::{Bar, BarSeries};
use crate::bollinger::{BollingerCalculator, PricePosition};
use crate::config::MonitorConfig;
use crate::detector::{Signal, SignalDetector};
use crate::errors::{FetchError, MonitorError};
use crate::ledger::SignalLedger;
use crate::market_data::MarketDataProvider;
use crate::notify::Dispatcher;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior, interval_at};

/// Lifecycle of one monitor run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Stopping => "stopping",
            RunState::Stopped => "stopped",
        };
        write!(f, "{}", text)
    }
}

/// Latest view of the monitored market, refreshed once per successful cycle.
/// Band fields are None until the series covers a full indicator window.
#[derive(Debug, Clone)]
pub struct MarketView {
    pub timestamp: DateTime<Utc>,
    pub close: f64,
    pub upper_band: Option<f64>,
    pub middle_band: Option<f64>,
    pub lower_band: Option<f64>,
    pub percent_b: Option<f64>,
    pub position: Option<PricePosition>,
}

/// Owned snapshot returned by `status()`. Observers never see a live
/// reference into the loop's state.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub state: RunState,
    pub last_update: Option<DateTime<Utc>>,
    pub latest_signal: Option<Signal>,
    pub last_error: Option<String>,
    pub market: Option<MarketView>,
}

impl StatusSnapshot {
    fn idle() -> Self {
        Self {
            state: RunState::Idle,
            last_update: None,
            latest_signal: None,
            last_error: None,
            market: None,
        }
    }
}

/// What one cycle produced.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub appended: usize,
    pub signal: Option<Signal>,
    pub market: Option<MarketView>,
}

/// Per-run computation state: bar series, calculator, and detector.
///
/// Created fresh for every Idle→Running transition; no indicator or window
/// state carries across a stop/start boundary. Owned exclusively by the
/// monitor task (or the single-check path) for the duration of one run.
pub struct MonitorEngine {
    config: MonitorConfig,
    series: BarSeries,
    calculator: BollingerCalculator,
    detector: SignalDetector,
}

impl MonitorEngine {
    pub fn new(config: MonitorConfig) -> Self {
        let calculator = BollingerCalculator::new(config.period, config.std_dev_multiplier);
        let detector = SignalDetector::new(config.symbol.clone());
        Self {
            config,
            series: BarSeries::new(),
            calculator,
            detector,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn series_len(&self) -> usize {
        self.series.len()
    }

    /// Fold freshly fetched bars into the series and score the newest
    /// adjacent pair. Overlapping windows are deduplicated by the series;
    /// already-scored pairs are skipped by the detector.
    pub fn ingest(&mut self, bars: Vec<Bar>) -> CycleOutcome {
        let appended = self.series.append_newer(bars);
        debug!(
            "{}: {} new bars, {} total",
            self.config.symbol,
            appended,
            self.series.len()
        );

        CycleOutcome {
            appended,
            signal: self.detect(),
            market: self.market_view(),
        }
    }

    fn detect(&mut self) -> Option<Signal> {
        let len = self.series.len();
        if len < 2 {
            return None;
        }
        let previous_row = self.calculator.row_at(&self.series, len - 2);
        let current_row = self.calculator.row_at(&self.series, len - 1);
        let previous_bar = self.series.get(len - 2)?;
        let current_bar = self.series.get(len - 1)?;
        self.detector.evaluate(
            previous_bar,
            previous_row.as_ref(),
            current_bar,
            current_row.as_ref(),
        )
    }

    fn market_view(&self) -> Option<MarketView> {
        let index = self.series.len().checked_sub(1)?;
        let bar = self.series.get(index)?;
        let row = self.calculator.row_at(&self.series, index);
        let percent_b = row.as_ref().and_then(|r| r.percent_b);
        Some(MarketView {
            timestamp: bar.timestamp,
            close: bar.close,
            upper_band: row.as_ref().map(|r| r.upper_band),
            middle_band: row.as_ref().map(|r| r.sma),
            lower_band: row.as_ref().map(|r| r.lower_band),
            percent_b,
            position: percent_b.map(PricePosition::from_percent_b),
        })
    }
}

enum Command {
    Start {
        config: MonitorConfig,
        reply: oneshot::Sender<Result<RunState, MonitorError>>,
    },
    Stop {
        reply: oneshot::Sender<RunState>,
    },
    Status {
        reply: oneshot::Sender<StatusSnapshot>,
    },
}

/// Controller surface for the monitor task.
///
/// Clonable; every call travels through the task's command channel and is
/// answered from inside the task's own execution context. There is no shared
/// run-state flag to race on.
#[derive(Clone)]
pub struct MonitorHandle {
    commands: mpsc::Sender<Command>,
    ledger: SignalLedger,
}

impl MonitorHandle {
    /// Begin a run. Invalid configuration is rejected here and the loop
    /// stays idle; starting an already-running monitor is a no-op that
    /// reports the current state.
    pub async fn start(&self, config: MonitorConfig) -> Result<RunState, MonitorError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Start { config, reply })
            .await
            .map_err(|_| MonitorError::TaskGone)?;
        response.await.map_err(|_| MonitorError::TaskGone)?
    }

    /// Request a stop; takes effect within one poll interval. Stopping an
    /// idle or stopped monitor is a no-op.
    pub async fn stop(&self) -> Result<RunState, MonitorError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Stop { reply })
            .await
            .map_err(|_| MonitorError::TaskGone)?;
        response.await.map_err(|_| MonitorError::TaskGone)
    }

    pub async fn status(&self) -> Result<StatusSnapshot, MonitorError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Status { reply })
            .await
            .map_err(|_| MonitorError::TaskGone)?;
        response.await.map_err(|_| MonitorError::TaskGone)
    }

    /// Ordered history of every signal emitted since the task was spawned.
    pub async fn history(&self) -> Vec<Signal> {
        self.ledger.snapshot().await
    }

    pub fn ledger(&self) -> &SignalLedger {
        &self.ledger
    }
}

/// Spawn the monitor task and return its controller handle.
pub fn spawn(provider: Arc<dyn MarketDataProvider>, dispatcher: Arc<Dispatcher>) -> MonitorHandle {
    let ledger = SignalLedger::new();
    let (commands, receiver) = mpsc::channel(16);
    let task = MonitorTask {
        provider,
        dispatcher,
        ledger: ledger.clone(),
        snapshot: StatusSnapshot::idle(),
    };
    tokio::spawn(task.run(receiver));
    MonitorHandle { commands, ledger }
}

// A fetch may not outlive the poll cadence by much; long stalls are cut off
// so the next tick is never starved.
const FETCH_DEADLINE_CAP: Duration = Duration::from_secs(30);

struct MonitorTask {
    provider: Arc<dyn MarketDataProvider>,
    dispatcher: Arc<Dispatcher>,
    ledger: SignalLedger,
    snapshot: StatusSnapshot,
}

impl MonitorTask {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Status { reply } => {
                    let _ = reply.send(self.snapshot.clone());
                }
                Command::Stop { reply } => {
                    // Idle or stopped already; nothing to wind down.
                    let _ = reply.send(self.snapshot.state);
                }
                Command::Start { config, reply } => {
                    if let Err(e) = config.validate() {
                        let _ = reply.send(Err(e.into()));
                        continue;
                    }
                    self.snapshot = StatusSnapshot::idle();
                    self.snapshot.state = RunState::Running;
                    let _ = reply.send(Ok(RunState::Running));
                    self.monitor(config, &mut commands).await;
                }
            }
        }
    }

    /// One Running→Stopped span: fresh engine, absolute tick schedule, and
    /// command service while the loop sleeps between ticks.
    async fn monitor(&mut self, config: MonitorConfig, commands: &mut mpsc::Receiver<Command>) {
        info!(
            "monitoring {}: {}-bar bands at {}x std dev, polling every {}s",
            config.symbol, config.period, config.std_dev_multiplier, config.poll_interval_secs
        );

        let mut engine = MonitorEngine::new(config.clone());
        let fetch_deadline = config.poll_interval().min(FETCH_DEADLINE_CAP);

        // Absolute schedule: tick n fires at start + n * interval, so per-
        // cycle latency never accumulates as drift. Missed ticks are skipped
        // rather than replayed as a burst of fetches.
        let mut ticks = interval_at(Instant::now(), config.poll_interval());
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticks.tick() => {
                    self.cycle(&mut engine, fetch_deadline).await;
                }
                command = commands.recv() => match command {
                    Some(Command::Status { reply }) => {
                        let _ = reply.send(self.snapshot.clone());
                    }
                    Some(Command::Start { reply, .. }) => {
                        // Already running; report the current state unchanged.
                        let _ = reply.send(Ok(self.snapshot.state));
                    }
                    Some(Command::Stop { reply }) => {
                        self.snapshot.state = RunState::Stopping;
                        let _ = reply.send(self.snapshot.state);
                        break;
                    }
                    // Every handle dropped; wind the run down.
                    None => break,
                },
            }
        }

        self.snapshot.state = RunState::Stopped;
        info!("monitor stopped for {}", config.symbol);
    }

    async fn cycle(&mut self, engine: &mut MonitorEngine, fetch_deadline: Duration) {
        let symbol = engine.config().symbol.clone();
        let fetched = tokio::time::timeout(
            fetch_deadline,
            self.provider
                .fetch_daily_bars(&symbol, engine.config().lookback_days),
        )
        .await;

        let bars = match fetched {
            Ok(Ok(bars)) => bars,
            Ok(Err(e)) => {
                warn!("fetch failed for {}: {}; retrying next cycle", symbol, e);
                self.snapshot.last_error = Some(e.to_string());
                return;
            }
            Err(_) => {
                let e = FetchError::Deadline {
                    seconds: fetch_deadline.as_secs(),
                };
                warn!("fetch failed for {}: {}; retrying next cycle", symbol, e);
                self.snapshot.last_error = Some(e.to_string());
                return;
            }
        };

        let outcome = engine.ingest(bars);
        self.snapshot.last_error = None;
        self.snapshot.last_update = Some(Utc::now());
        self.snapshot.market = outcome.market;

        if let Some(signal) = outcome.signal {
            let outcomes = self.dispatcher.dispatch(&signal).await;
            let delivered = outcomes.iter().filter(|o| o.succeeded()).count();
            info!(
                "signal dispatched on {}/{} channels",
                delivered,
                outcomes.len()
            );
            self.ledger.append(signal.clone()).await;
            self.snapshot.latest_signal = Some(signal);
        }
    }
}

/// One fetch → evaluate → notify pass outside a running loop; used by the
/// CLI's single-check mode. Unlike the loop, a fetch failure is reported to
/// the caller here because there is no next cycle to retry on.
pub async fn single_check(
    provider: &dyn MarketDataProvider,
    dispatcher: &Dispatcher,
    ledger: &SignalLedger,
    config: &MonitorConfig,
) -> Result<CycleOutcome, MonitorError> {
    config.validate()?;
    let bars = provider
        .fetch_daily_bars(&config.symbol, config.lookback_days)
        .await?;

    let mut engine = MonitorEngine::new(config.clone());
    let outcome = engine.ingest(bars);

    if let Some(signal) = &outcome.signal {
        dispatcher.dispatch(signal).await;
        ledger.append(signal.clone()).await;
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                    + chrono::Duration::days(i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume: 1_000,
            })
            .collect()
    }

    fn crossing_config() -> MonitorConfig {
        // Narrow bands over a short window so the final bar of the fixture
        // closes below its lower band while the bar before sat on it.
        MonitorConfig {
            symbol: "USO".to_string(),
            period: 3,
            std_dev_multiplier: 0.5,
            poll_interval_secs: 1,
            lookback_days: 10,
            api_key: "test".to_string(),
        }
    }

    #[test]
    fn test_engine_emits_the_crossing_signal_once() {
        let mut engine = MonitorEngine::new(crossing_config());

        let first = engine.ingest(bars_from_closes(&[10.0, 10.0, 10.0, 9.0]));
        assert_eq!(first.appended, 4);
        let signal = first.signal.expect("crossing should emit");
        assert_eq!(signal.signal_type, "BUY");
        assert_eq!(signal.price, 9.0);

        // The provider returns the identical window next cycle: no new
        // bars, no second signal.
        let second = engine.ingest(bars_from_closes(&[10.0, 10.0, 10.0, 9.0]));
        assert_eq!(second.appended, 0);
        assert!(second.signal.is_none());
    }

    #[test]
    fn test_engine_is_quiet_below_a_full_window() {
        let mut engine = MonitorEngine::new(crossing_config());
        let outcome = engine.ingest(bars_from_closes(&[10.0, 9.0]));

        assert!(outcome.signal.is_none());
        let market = outcome.market.expect("series is non-empty");
        assert!(market.lower_band.is_none());
        assert!(market.position.is_none());
    }

    #[test]
    fn test_market_view_reflects_the_latest_bar() {
        let mut engine = MonitorEngine::new(crossing_config());
        let outcome = engine.ingest(bars_from_closes(&[10.0, 10.2, 10.1, 10.3]));

        let market = outcome.market.expect("series is non-empty");
        assert_eq!(market.close, 10.3);
        assert!(market.upper_band.is_some());
        assert!(market.percent_b.is_some());
        assert!(market.position.is_some());
    }

    #[test]
    fn test_overlapping_ingest_keeps_timestamps_unique() {
        let mut engine = MonitorEngine::new(crossing_config());
        engine.ingest(bars_from_closes(&[10.0, 10.1, 10.2]));
        engine.ingest(bars_from_closes(&[10.0, 10.1, 10.2, 10.3, 10.4]));

        assert_eq!(engine.series_len(), 5);
    }

    #[tokio::test]
    async fn test_single_check_runs_one_full_pass() {
        use crate::market_data::MockMarketDataProvider;

        let bars = bars_from_closes(&[10.0, 10.0, 10.0, 9.0]);
        let mut provider = MockMarketDataProvider::new();
        provider
            .expect_fetch_daily_bars()
            .times(1)
            .returning(move |_, _| Ok(bars.clone()));

        let dispatcher = Dispatcher::new(Vec::new());
        let ledger = SignalLedger::new();

        let outcome = single_check(&provider, &dispatcher, &ledger, &crossing_config())
            .await
            .expect("single check");

        assert_eq!(outcome.appended, 4);
        assert!(outcome.signal.is_some());
        assert_eq!(ledger.len().await, 1);
    }
}
