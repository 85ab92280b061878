use crate::bars::Bar;
use crate::errors::FetchError;
use async_trait::async_trait;
use chrono::NaiveDate;
use log::debug;
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Remote source of daily OHLCV history for one symbol.
///
/// Implementations return bars ordered oldest-first. Every failure mode
/// (network, HTTP status, malformed payload, empty result) maps to a
/// `FetchError` the monitor loop treats as "no new data this cycle".
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn fetch_daily_bars(&self, symbol: &str, lookback_days: u32)
    -> Result<Vec<Bar>, FetchError>;
}

const BASE_URL: &str = "https://www.alphavantage.co/query";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Alpha Vantage TIME_SERIES_DAILY client.
pub struct AlphaVantageProvider {
    client: Client,
    api_key: String,
}

impl AlphaVantageProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl MarketDataProvider for AlphaVantageProvider {
    async fn fetch_daily_bars(
        &self,
        symbol: &str,
        lookback_days: u32,
    ) -> Result<Vec<Bar>, FetchError> {
        let response = self
            .client
            .get(BASE_URL)
            .query(&[
                ("function", "TIME_SERIES_DAILY"),
                ("symbol", symbol),
                ("apikey", &self.api_key),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unreadable body".to_string());
            return Err(FetchError::Status { status, body });
        }

        let body = response.text().await?;
        let bars = parse_daily_payload(&body, symbol, lookback_days)?;
        debug!("fetched {} daily bars for {}", bars.len(), symbol);
        Ok(bars)
    }
}

// Alpha Vantage reports all numeric fields as strings, keyed by ISO date.
// A BTreeMap sorts those keys, which for ISO dates is chronological order.
#[derive(Debug, Deserialize)]
struct DailySeriesResponse {
    #[serde(rename = "Time Series (Daily)")]
    series: Option<BTreeMap<String, DailyRow>>,
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DailyRow {
    #[serde(rename = "1. open")]
    open: String,
    #[serde(rename = "2. high")]
    high: String,
    #[serde(rename = "3. low")]
    low: String,
    #[serde(rename = "4. close")]
    close: String,
    #[serde(rename = "5. volume")]
    volume: String,
}

/// Parse a TIME_SERIES_DAILY response body into bars, oldest first,
/// truncated to the trailing `lookback_days` entries.
pub fn parse_daily_payload(
    body: &str,
    symbol: &str,
    lookback_days: u32,
) -> Result<Vec<Bar>, FetchError> {
    let payload: DailySeriesResponse =
        serde_json::from_str(body).map_err(|e| FetchError::Payload(e.to_string()))?;

    let series = payload.series.ok_or_else(|| {
        let reason = payload
            .error_message
            .or(payload.note)
            .or(payload.information)
            .unwrap_or_else(|| "response carries no daily series".to_string());
        FetchError::Payload(reason)
    })?;

    let mut bars = Vec::with_capacity(series.len());
    for (date, row) in &series {
        let naive = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|e| FetchError::Payload(format!("bad date {date}: {e}")))?;
        let timestamp = naive
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| FetchError::Payload(format!("bad date {date}")))?
            .and_utc();

        bars.push(Bar {
            timestamp,
            open: parse_price(&row.open, "open", date)?,
            high: parse_price(&row.high, "high", date)?,
            low: parse_price(&row.low, "low", date)?,
            close: parse_price(&row.close, "close", date)?,
            volume: row
                .volume
                .parse()
                .map_err(|_| FetchError::Payload(format!("bad volume on {date}: {}", row.volume)))?,
        });
    }

    if bars.is_empty() {
        return Err(FetchError::Empty {
            symbol: symbol.to_string(),
        });
    }

    let lookback = lookback_days as usize;
    if bars.len() > lookback {
        bars.drain(..bars.len() - lookback);
    }
    Ok(bars)
}

fn parse_price(value: &str, field: &str, date: &str) -> Result<f64, FetchError> {
    value
        .parse()
        .map_err(|_| FetchError::Payload(format!("bad {field} on {date}: {value}")))
}
