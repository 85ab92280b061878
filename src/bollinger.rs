use crate::bars::BarSeries;
use statrs::statistics::Statistics;
use std::fmt;

/// Bollinger band values for a single bar.
///
/// Only defined once `period` bars of history end at the bar in question;
/// callers receive `None` from the calculator until then. The standard
/// deviation is the sample convention (divisor `period - 1`), matching what
/// a conventional statistical package produces for the same window.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorRow {
    pub sma: f64,
    pub std_dev: f64,
    pub upper_band: f64,
    pub lower_band: f64,
    pub band_width: f64,
    /// (close - lower) / width; None when the bands collapse to zero width.
    pub percent_b: Option<f64>,
}

/// Close location relative to the bands, classified from %B.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PricePosition {
    AboveUpper,
    NearUpper,
    MidRange,
    NearLower,
    BelowLower,
}

impl PricePosition {
    pub fn from_percent_b(percent_b: f64) -> Self {
        if percent_b > 1.0 {
            PricePosition::AboveUpper
        } else if percent_b > 0.8 {
            PricePosition::NearUpper
        } else if percent_b > 0.2 {
            PricePosition::MidRange
        } else if percent_b > 0.0 {
            PricePosition::NearLower
        } else {
            PricePosition::BelowLower
        }
    }
}

impl fmt::Display for PricePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PricePosition::AboveUpper => "above the upper band (possibly overbought)",
            PricePosition::NearUpper => "near the upper band",
            PricePosition::MidRange => "around the middle band",
            PricePosition::NearLower => "near the lower band",
            PricePosition::BelowLower => "below the lower band (possibly oversold)",
        };
        write!(f, "{}", text)
    }
}

/// Rolling Bollinger band calculator over a bar series.
#[derive(Debug, Clone)]
pub struct BollingerCalculator {
    pub period: usize,
    pub std_dev_multiplier: f64,
}

impl BollingerCalculator {
    pub fn new(period: usize, std_dev_multiplier: f64) -> Self {
        Self {
            period,
            std_dev_multiplier,
        }
    }

    /// Band values for the bar at `index`, or None when fewer than `period`
    /// bars end there. Pure full-window recomputation: calling this for the
    /// same series and index always yields bit-identical output.
    pub fn row_at(&self, series: &BarSeries, index: usize) -> Option<IndicatorRow> {
        if index >= series.len() || index + 1 < self.period {
            return None;
        }

        let window: Vec<f64> = series.bars()[index + 1 - self.period..=index]
            .iter()
            .map(|bar| bar.close)
            .collect();

        let sma = window.as_slice().mean();
        let std_dev = window.as_slice().std_dev();

        let upper_band = sma + (std_dev * self.std_dev_multiplier);
        let lower_band = sma - (std_dev * self.std_dev_multiplier);
        let band_width = upper_band - lower_band;

        let close = series.get(index)?.close;
        let percent_b = if band_width != 0.0 {
            Some((close - lower_band) / band_width)
        } else {
            None
        };

        Some(IndicatorRow {
            sma,
            std_dev,
            upper_band,
            lower_band,
            band_width,
            percent_b,
        })
    }

    /// One entry per bar in the series, None below `period - 1`.
    pub fn compute(&self, series: &BarSeries) -> Vec<Option<IndicatorRow>> {
        (0..series.len()).map(|i| self.row_at(series, i)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bars::Bar;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn series_from_closes(closes: &[f64]) -> BarSeries {
        let mut series = BarSeries::new();
        series.append_newer(closes.iter().enumerate().map(|(i, &close)| Bar {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                + chrono::Duration::days(i as i64),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1_000,
        }));
        series
    }

    #[test]
    fn test_rows_undefined_below_period() {
        let calc = BollingerCalculator::new(5, 2.0);
        let series = series_from_closes(&[18.0, 19.0, 20.0, 21.0, 22.0, 23.0]);
        let rows = calc.compute(&series);

        assert_eq!(rows.len(), 6);
        for row in rows.iter().take(4) {
            assert!(row.is_none());
        }
        assert!(rows[4].is_some());
        assert!(rows[5].is_some());
    }

    #[test]
    fn test_known_window_with_sample_std_dev() {
        let calc = BollingerCalculator::new(5, 2.0);
        let series = series_from_closes(&[18.0, 19.0, 20.0, 21.0, 22.0]);
        let row = calc.row_at(&series, 4).expect("full window");

        // Sample std dev of 18..22 is sqrt(2.5).
        let expected_std = 2.5f64.sqrt();
        assert!((row.sma - 20.0).abs() < 1e-9);
        assert!((row.std_dev - expected_std).abs() < 1e-9);
        assert!((row.upper_band - (20.0 + 2.0 * expected_std)).abs() < 1e-9);
        assert!((row.lower_band - (20.0 - 2.0 * expected_std)).abs() < 1e-9);
        assert!((row.band_width - 4.0 * expected_std).abs() < 1e-9);

        // Close 22 sits above the mean but inside the upper band.
        let percent_b = row.percent_b.expect("non-zero width");
        assert!(percent_b > 0.5 && percent_b < 1.0);
    }

    #[test]
    fn test_constant_prices_collapse_the_bands() {
        let calc = BollingerCalculator::new(5, 2.0);
        let series = series_from_closes(&[100.0; 8]);
        let row = calc.row_at(&series, 7).expect("full window");

        assert!((row.sma - 100.0).abs() < 1e-9);
        assert!(row.std_dev < 1e-12);
        assert!(row.band_width < 1e-12);
        assert!(row.percent_b.is_none());
    }

    #[test]
    fn test_insufficient_history_returns_none() {
        let calc = BollingerCalculator::new(20, 2.0);
        let series = series_from_closes(&[100.0, 101.0, 102.0]);

        assert!(calc.row_at(&series, 2).is_none());
        assert!(calc.row_at(&series, 99).is_none());
    }

    #[test]
    fn test_price_position_thresholds() {
        assert_eq!(PricePosition::from_percent_b(1.2), PricePosition::AboveUpper);
        assert_eq!(PricePosition::from_percent_b(0.9), PricePosition::NearUpper);
        assert_eq!(PricePosition::from_percent_b(0.5), PricePosition::MidRange);
        assert_eq!(PricePosition::from_percent_b(0.1), PricePosition::NearLower);
        assert_eq!(PricePosition::from_percent_b(-0.3), PricePosition::BelowLower);
    }

    proptest! {
        // Band width must equal 2 * multiplier * std for every defined row.
        #[test]
        fn prop_band_width_matches_std(
            closes in proptest::collection::vec(1.0f64..500.0, 6..40),
            multiplier in 0.5f64..4.0,
        ) {
            let calc = BollingerCalculator::new(5, multiplier);
            let series = series_from_closes(&closes);
            for (i, row) in calc.compute(&series).into_iter().enumerate() {
                if i + 1 < calc.period {
                    prop_assert!(row.is_none());
                    continue;
                }
                let row = row.expect("defined at and above period - 1");
                prop_assert!((row.band_width - 2.0 * multiplier * row.std_dev).abs() < 1e-9);
                prop_assert!((row.upper_band - row.sma - multiplier * row.std_dev).abs() < 1e-9);
                prop_assert!((row.sma - row.lower_band - multiplier * row.std_dev).abs() < 1e-9);
            }
        }
    }
}
