use thiserror::Error;

/// Failure while fetching bars from the market data provider. Always
/// non-fatal to the monitor loop: the cycle is skipped and the fetch is
/// retried on the next tick.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed payload: {0}")]
    Payload(String),

    #[error("provider returned no bars for {symbol}")]
    Empty { symbol: String },

    #[error("fetch deadline of {seconds}s exceeded")]
    Deadline { seconds: u64 },
}

/// Failure of a single notification channel. Recorded in the dispatch
/// outcome and logged; never escapes the dispatcher.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("delivery timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("smtp: {0}")]
    Smtp(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Rejected monitor configuration, reported synchronously at `start` before
/// the loop leaves `Idle`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("period must be at least 2, got {0}")]
    PeriodTooShort(usize),

    #[error("std_dev_multiplier must be positive, got {0}")]
    NonPositiveMultiplier(f64),

    #[error("poll_interval_secs must be positive")]
    NonPositiveInterval,

    #[error("lookback_days ({lookback_days}) must cover the {period}-bar indicator window")]
    LookbackTooShort { lookback_days: u32, period: usize },
}

/// Error surface of the controller handle.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("monitor task is no longer running")]
    TaskGone,
}
