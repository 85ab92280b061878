use crate::bars::Bar;
use crate::bollinger::IndicatorRow;
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

/// Alert emitted when the close crosses down through the lower band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub signal_type: String,
    pub price: f64,
    pub upper_band: f64,
    pub middle_band: f64,
    pub lower_band: f64,
    pub message: String,
}

/// Stateful crossing detector over adjacent bar pairs.
///
/// Holds the timestamp of the last bar it scored so that a re-fetched window
/// presented again by the monitor loop is never evaluated twice. A fresh
/// detector is created for every monitor run.
#[derive(Debug)]
pub struct SignalDetector {
    symbol: String,
    last_evaluated: Option<DateTime<Utc>>,
}

impl SignalDetector {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            last_evaluated: None,
        }
    }

    /// Score one adjacent bar pair. Emits at most one BUY signal, when the
    /// previous close sat at or above its lower band and the current close
    /// fell strictly below its own. Pairs whose band values are undefined
    /// (insufficient history) produce nothing; that is not a failure.
    pub fn evaluate(
        &mut self,
        previous_bar: &Bar,
        previous_row: Option<&IndicatorRow>,
        current_bar: &Bar,
        current_row: Option<&IndicatorRow>,
    ) -> Option<Signal> {
        if self
            .last_evaluated
            .is_some_and(|seen| current_bar.timestamp <= seen)
        {
            return None;
        }

        let (previous_row, current_row) = (previous_row?, current_row?);
        self.last_evaluated = Some(current_bar.timestamp);

        let crossed_down = previous_bar.close >= previous_row.lower_band
            && current_bar.close < current_row.lower_band;
        if !crossed_down {
            return None;
        }

        let message = format!(
            "{} BUY signal: close ${:.2} crossed below the lower band ${:.2}",
            self.symbol, current_bar.close, current_row.lower_band
        );
        info!("{}", message);

        Some(Signal {
            timestamp: current_bar.timestamp,
            symbol: self.symbol.clone(),
            signal_type: "BUY".to_string(),
            price: current_bar.close,
            upper_band: current_row.upper_band,
            middle_band: current_row.sma,
            lower_band: current_row.lower_band,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar(day: u32, close: f64) -> Bar {
        Bar {
            timestamp: Utc.with_ymd_and_hms(2024, 3, day, 0, 0, 0).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 500,
        }
    }

    fn row(lower_band: f64) -> IndicatorRow {
        IndicatorRow {
            sma: lower_band + 1.0,
            std_dev: 0.5,
            upper_band: lower_band + 2.0,
            lower_band,
            band_width: 2.0,
            percent_b: Some(0.5),
        }
    }

    #[test]
    fn test_downward_cross_emits_one_buy_signal() {
        let mut detector = SignalDetector::new("USO");
        let (prev, cur) = (bar(1, 10.0), bar(2, 9.0));
        let (prev_row, cur_row) = (row(9.5), row(9.4));

        let signal = detector
            .evaluate(&prev, Some(&prev_row), &cur, Some(&cur_row))
            .expect("crossing should emit");

        assert_eq!(signal.signal_type, "BUY");
        assert_eq!(signal.price, 9.0);
        assert_eq!(signal.symbol, "USO");
        assert_eq!(signal.timestamp, cur.timestamp);
        assert_eq!(signal.lower_band, 9.4);
        assert_eq!(signal.middle_band, 10.4);
        assert!(signal.message.contains("$9.00"));
        assert!(signal.message.contains("$9.40"));
    }

    #[test]
    fn test_already_below_on_both_bars_emits_nothing() {
        let mut detector = SignalDetector::new("USO");
        let (prev, cur) = (bar(1, 8.5), bar(2, 8.0));

        let signal = detector.evaluate(&prev, Some(&row(9.5)), &cur, Some(&row(9.4)));

        assert!(signal.is_none());
    }

    #[test]
    fn test_same_pair_evaluated_twice_emits_once() {
        let mut detector = SignalDetector::new("USO");
        let (prev, cur) = (bar(1, 10.0), bar(2, 9.0));
        let (prev_row, cur_row) = (row(9.5), row(9.4));

        let first = detector.evaluate(&prev, Some(&prev_row), &cur, Some(&cur_row));
        let second = detector.evaluate(&prev, Some(&prev_row), &cur, Some(&cur_row));

        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[test]
    fn test_undefined_bands_emit_nothing() {
        let mut detector = SignalDetector::new("USO");
        let (prev, cur) = (bar(1, 10.0), bar(2, 9.0));

        assert!(detector.evaluate(&prev, None, &cur, Some(&row(9.4))).is_none());
        assert!(detector.evaluate(&prev, Some(&row(9.5)), &cur, None).is_none());

        // The pair was never scored, so a later evaluation with defined
        // bands still fires.
        let signal = detector.evaluate(&prev, Some(&row(9.5)), &cur, Some(&row(9.4)));
        assert!(signal.is_some());
    }

    #[test]
    fn test_newer_pair_after_a_signal_still_fires() {
        let mut detector = SignalDetector::new("USO");

        let first = detector.evaluate(&bar(1, 10.0), Some(&row(9.5)), &bar(2, 9.0), Some(&row(9.4)));
        assert!(first.is_some());

        // Price recovers above the band, then crosses down again.
        let quiet = detector.evaluate(&bar(2, 9.0), Some(&row(9.4)), &bar(3, 9.8), Some(&row(9.3)));
        assert!(quiet.is_none());

        let second = detector.evaluate(&bar(3, 9.8), Some(&row(9.3)), &bar(4, 9.1), Some(&row(9.2)));
        assert!(second.is_some());
    }
}
