use crate::detector::Signal;
use chrono::NaiveDate;
use std::io::{Read, Write};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Append-only record of emitted signals.
///
/// Cloning the ledger clones a handle to the same underlying log, so the
/// monitor loop can append while an observer reads. Reads return owned
/// snapshots, never a live reference into the log. Deduplication is the
/// signal detector's job; the ledger records whatever it is given.
#[derive(Debug, Clone, Default)]
pub struct SignalLedger {
    signals: Arc<RwLock<Vec<Signal>>>,
}

impl SignalLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn append(&self, signal: Signal) {
        self.signals.write().await.push(signal);
    }

    pub async fn len(&self) -> usize {
        self.signals.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.signals.read().await.is_empty()
    }

    pub async fn latest(&self) -> Option<Signal> {
        self.signals.read().await.last().cloned()
    }

    /// Owned copy of the full history in insertion order.
    pub async fn snapshot(&self) -> Vec<Signal> {
        self.signals.read().await.clone()
    }

    /// Write the history as CSV rows in insertion order. Returns the number
    /// of signals exported.
    pub async fn export_csv<W: Write>(&self, writer: W) -> Result<usize, csv::Error> {
        let signals = self.snapshot().await;
        let mut csv_writer = csv::Writer::from_writer(writer);
        for signal in &signals {
            csv_writer.serialize(signal)?;
        }
        csv_writer.flush()?;
        Ok(signals.len())
    }

    /// Parse a previously exported ledger back into signals.
    pub fn read_csv<R: Read>(reader: R) -> Result<Vec<Signal>, csv::Error> {
        csv::Reader::from_reader(reader).deserialize().collect()
    }

    pub fn default_export_name(symbol: &str, date: NaiveDate) -> String {
        format!("{}_signals_{}.csv", symbol, date.format("%Y%m%d"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn signal(day: u32, price: f64) -> Signal {
        Signal {
            timestamp: Utc.with_ymd_and_hms(2024, 5, day, 0, 0, 0).unwrap(),
            symbol: "USO".to_string(),
            signal_type: "BUY".to_string(),
            price,
            upper_band: price + 2.0,
            middle_band: price + 1.0,
            lower_band: price + 0.5,
            message: format!("USO BUY signal: close ${:.2} crossed below the lower band", price),
        }
    }

    #[tokio::test]
    async fn test_append_preserves_insertion_order() {
        let ledger = SignalLedger::new();
        ledger.append(signal(1, 9.0)).await;
        ledger.append(signal(3, 8.5)).await;
        ledger.append(signal(7, 8.8)).await;

        let history = ledger.snapshot().await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].price, 9.0);
        assert_eq!(history[1].price, 8.5);
        assert_eq!(history[2].price, 8.8);
        assert_eq!(ledger.latest().await.unwrap().price, 8.8);
    }

    #[tokio::test]
    async fn test_csv_round_trip_preserves_the_sequence() {
        let ledger = SignalLedger::new();
        ledger.append(signal(1, 9.0)).await;
        ledger.append(signal(2, 8.75)).await;

        let mut buffer = Vec::new();
        let exported = ledger.export_csv(&mut buffer).await.expect("export");
        assert_eq!(exported, 2);

        let parsed = SignalLedger::read_csv(buffer.as_slice()).expect("parse");
        assert_eq!(parsed, ledger.snapshot().await);
    }

    #[tokio::test]
    async fn test_clones_share_the_same_log() {
        let ledger = SignalLedger::new();
        let observer = ledger.clone();

        ledger.append(signal(1, 9.0)).await;
        assert_eq!(observer.len().await, 1);

        // The observer's snapshot is a copy; appending afterwards does not
        // mutate it.
        let snapshot = observer.snapshot().await;
        ledger.append(signal(2, 8.5)).await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(observer.len().await, 2);
    }

    #[test]
    fn test_default_export_name() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 7).unwrap();
        assert_eq!(
            SignalLedger::default_export_name("USO", date),
            "USO_signals_20240507.csv"
        );
    }
}
