//! Loss analysis for a single bidder.
//!
//! Finds the auctions a bidder took part in but did not win, and how far its
//! bid was from the recorded winning bid.

use std::path::Path;

use chrono::NaiveDateTime;
use ordered_float::OrderedFloat;
use replay_core::{AuctionRecord, AuctionTime, BidderId, Result};
use replay_ingestion::{parse_summary, Cell, ColumnType, SummaryParse, TableWriter};
use tracing::{debug, info};

/// One auction the target bidder lost.
#[derive(Debug, Clone, PartialEq)]
pub struct LostAuction {
    pub source_index: usize,
    pub lead_id: Option<String>,
    pub timestamp: AuctionTime,
    pub winning_bidder_id: BidderId,
    /// Recorded winning bid, `None` when the cell is not numeric.
    pub winning_bid: Option<f64>,
    /// Highest numeric bid the target placed in the auction.
    pub target_bid: Option<f64>,
    /// `winning_bid - target_bid`, `None` unless both are known.
    pub loss_amount: Option<f64>,
}

/// Losses of one bidder over a set of records.
#[derive(Debug, Clone, Default)]
pub struct LossReport {
    /// Lost auctions, ascending by timestamp.
    pub losses: Vec<LostAuction>,
    /// Auctions where the target placed at least one bid.
    pub auctions_bid: usize,
    /// Auctions the target won historically.
    pub auctions_won: usize,
}

impl LossReport {
    pub fn len(&self) -> usize {
        self.losses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.losses.is_empty()
    }

    /// Sum of the known loss amounts.
    pub fn total_loss(&self) -> f64 {
        self.losses.iter().filter_map(|l| l.loss_amount).sum()
    }

    /// Mean of the known loss amounts, 0 when there are none.
    pub fn mean_loss(&self) -> f64 {
        let known = self.losses.iter().filter(|l| l.loss_amount.is_some()).count();
        if known == 0 {
            0.0
        } else {
            self.total_loss() / known as f64
        }
    }

    /// Write the report as CSV. Returns the number of rows written.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<usize> {
        let writer = TableWriter::new(vec![
            ("LEAD_ID".to_string(), ColumnType::Text),
            ("TIMESTAMP".to_string(), ColumnType::Text),
            ("WINNING_BROKER_ID".to_string(), ColumnType::BigInt),
            ("WINNING_BID".to_string(), ColumnType::Double),
            ("TARGET_BID".to_string(), ColumnType::Double),
            ("LOSS_AMOUNT".to_string(), ColumnType::Double),
        ]);
        writer.write_csv(
            path,
            self.losses.iter().map(|l| {
                vec![
                    Cell::Text(l.lead_id.clone()),
                    Cell::Text(Some(l.timestamp.to_string())),
                    Cell::BigInt(Some(l.winning_bidder_id.0)),
                    Cell::Double(l.winning_bid),
                    Cell::Double(l.target_bid),
                    Cell::Double(l.loss_amount),
                ]
            }),
        )
    }
}

/// Loss analyzer for one target bidder.
#[derive(Debug, Clone, Copy)]
pub struct LossAnalyzer {
    target: BidderId,
    since: Option<NaiveDateTime>,
}

impl LossAnalyzer {
    pub fn new(target: BidderId) -> Self {
        Self { target, since: None }
    }

    /// Only consider auctions at or after `since`. Unparsed timestamps are excluded.
    pub fn since(mut self, since: NaiveDateTime) -> Self {
        self.since = Some(since);
        self
    }

    /// Analyze records against the recorded outcomes.
    pub fn analyze(&self, records: &[AuctionRecord]) -> LossReport {
        let mut report = LossReport::default();

        for record in records {
            if !self.in_window(&record.timestamp) {
                continue;
            }
            let Some(text) = record.raw_summary.as_deref() else {
                continue;
            };
            let entries = match parse_summary(text) {
                SummaryParse::Parsed(entries) => entries,
                SummaryParse::Malformed(reason) => {
                    debug!(source_index = record.source_index, %reason, "Skipping unreadable summary");
                    continue;
                }
            };

            if !entries.iter().any(|e| e.bidder_id == self.target) {
                continue;
            }
            report.auctions_bid += 1;

            let Some(winner) = record.original_winner_id else {
                continue;
            };
            if winner == self.target {
                report.auctions_won += 1;
                continue;
            }
            let winning_bid = record.original_winning_bid.value();
            let target_bid = entries
                .iter()
                .filter(|e| e.bidder_id == self.target)
                .filter_map(|e| e.bid.value())
                .map(OrderedFloat)
                .max()
                .map(|b| b.0);
            let loss_amount = match (winning_bid, target_bid) {
                (Some(w), Some(t)) => Some(w - t),
                _ => None,
            };

            report.losses.push(LostAuction {
                source_index: record.source_index,
                lead_id: record.lead_id.clone(),
                timestamp: record.timestamp.clone(),
                winning_bidder_id: winner,
                winning_bid,
                target_bid,
                loss_amount,
            });
        }

        report.losses.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        info!(
            target = %self.target,
            auctions_bid = report.auctions_bid,
            auctions_won = report.auctions_won,
            auctions_lost = report.losses.len(),
            total_loss = report.total_loss(),
            "Loss analysis complete"
        );
        report
    }

    fn in_window(&self, timestamp: &AuctionTime) -> bool {
        match (self.since, timestamp) {
            (None, _) => true,
            (Some(since), AuctionTime::Parsed(ts)) => *ts >= since,
            (Some(_), AuctionTime::Unparsed(_)) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use replay_core::{Config, NumericField};
    use replay_ingestion::RecordSource;

    fn make_record(index: usize, ts: &str, summary: Option<&str>, winner: Option<i64>, bid: NumericField) -> AuctionRecord {
        AuctionRecord {
            source_index: index,
            timestamp: AuctionTime::parse(ts),
            lead_id: Some(format!("lead-{index}")),
            original_winner_id: winner.map(BidderId),
            original_winning_bid: bid,
            raw_summary: summary.map(str::to_string),
            model_payload: None,
        }
    }

    #[test]
    fn test_losses_sorted_by_timestamp() {
        let records = vec![
            make_record(0, "2025-03-02 00:00:00", Some(r#"[{"BID": 10, "BROKER_ID": 7}, {"BID": 25, "BROKER_ID": 9}]"#), Some(9), NumericField::Value(25.0)),
            make_record(1, "2025-03-01 00:00:00", Some("[{'BID': 4.5, 'BROKER_ID': 7}, {'BID': 6, 'BROKER_ID': 7}]"), Some(3), NumericField::Value(8.0)),
            make_record(2, "2025-03-03 00:00:00", Some(r#"[{"BID": 30, "BROKER_ID": 7}]"#), Some(7), NumericField::Value(30.0)),
            make_record(3, "2025-03-04 00:00:00", Some(r#"[{"BID": 30, "BROKER_ID": 1}]"#), Some(1), NumericField::Value(30.0)),
        ];

        let report = LossAnalyzer::new(BidderId(7)).analyze(&records);

        assert_eq!(report.auctions_bid, 3);
        assert_eq!(report.auctions_won, 1);
        assert_eq!(report.len(), 2);
        assert_eq!(report.losses[0].source_index, 1);
        assert_relative_eq!(report.losses[0].target_bid.unwrap(), 6.0);
        assert_relative_eq!(report.losses[0].loss_amount.unwrap(), 2.0);
        assert_eq!(report.losses[1].winning_bidder_id, BidderId(9));
        assert_relative_eq!(report.losses[1].loss_amount.unwrap(), 15.0);
        assert_relative_eq!(report.total_loss(), 17.0);
        assert_relative_eq!(report.mean_loss(), 8.5);
    }

    #[test]
    fn test_since_filter() {
        let summary = Some(r#"[{"BID": 1, "BROKER_ID": 7}]"#);
        let records = vec![
            make_record(0, "2025-03-01 00:00:00", summary, Some(2), NumericField::Value(5.0)),
            make_record(1, "2025-03-05 00:00:00", summary, Some(2), NumericField::Value(5.0)),
            make_record(2, "not a date", summary, Some(2), NumericField::Value(5.0)),
        ];
        let AuctionTime::Parsed(since) = AuctionTime::parse("2025-03-02 00:00:00") else {
            panic!("expected parsed timestamp");
        };

        let report = LossAnalyzer::new(BidderId(7)).since(since).analyze(&records);
        assert_eq!(report.len(), 1);
        assert_eq!(report.losses[0].source_index, 1);
    }

    #[test]
    fn test_unknown_amounts_kept_with_no_loss_amount() {
        let records = vec![
            make_record(0, "2025-03-01 00:00:00", Some(r#"[{"BID": 4, "BROKER_ID": 7}]"#), Some(2), NumericField::Missing),
            make_record(1, "2025-03-02 00:00:00", Some(r#"[{"BID": "n/a", "BROKER_ID": 7}]"#), Some(2), NumericField::Value(5.0)),
            make_record(2, "2025-03-03 00:00:00", Some(r#"[{"BID": 3, "BROKER_ID": 7}]"#), Some(2), NumericField::Value(5.0)),
        ];
        let report = LossAnalyzer::new(BidderId(7)).analyze(&records);

        assert_eq!(report.len(), 3);
        assert_eq!(report.losses[0].winning_bid, None);
        assert_eq!(report.losses[0].target_bid, Some(4.0));
        assert_eq!(report.losses[0].loss_amount, None);
        assert_eq!(report.losses[1].target_bid, None);
        assert_eq!(report.losses[1].loss_amount, None);
        assert_relative_eq!(report.total_loss(), 2.0);
        assert_relative_eq!(report.mean_loss(), 2.0);
    }

    #[test]
    fn test_no_loss_without_winner_or_summary() {
        let records = vec![
            make_record(0, "2025-03-01 00:00:00", Some(r#"[{"BID": 1, "BROKER_ID": 7}]"#), None, NumericField::Value(5.0)),
            make_record(1, "2025-03-01 00:00:00", Some("{{broken"), Some(2), NumericField::Value(5.0)),
            make_record(2, "2025-03-01 00:00:00", None, Some(2), NumericField::Value(5.0)),
        ];
        let report = LossAnalyzer::new(BidderId(7)).analyze(&records);
        assert_eq!(report.auctions_bid, 1);
        assert!(report.is_empty());
        assert_eq!(report.mean_loss(), 0.0);
    }

    #[test]
    fn test_rows_without_model_output_are_analyzed() {
        let path = std::env::temp_dir().join(format!("loss_input_{}.csv", std::process::id()));
        std::fs::write(
            &path,
            "LEAD_ID,RECORD_DATE_TIME_UTC,BROKER_ID,BID_VALUE,AUCTION_SUMMARY\n\
             L1,2025-03-01 00:00:00,9,25,\"[{'BID': 10, 'BROKER_ID': 7}, {'BID': 25, 'BROKER_ID': 9}]\"\n",
        )
        .unwrap();

        let loaded = RecordSource::load_all(&path, &Config::default()).unwrap();
        let report = LossAnalyzer::new(BidderId(7)).analyze(&loaded.records);
        assert_eq!(report.len(), 1);
        assert_eq!(report.losses[0].lead_id.as_deref(), Some("L1"));
        assert_eq!(report.losses[0].loss_amount, Some(15.0));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_write_csv() {
        let records = vec![
            make_record(0, "2025-03-01 00:00:00", Some(r#"[{"BID": 1, "BROKER_ID": 7}]"#), Some(2), NumericField::Value(5.0)),
            make_record(1, "2025-03-02 00:00:00", Some(r#"[{"BID": 1, "BROKER_ID": 7}]"#), Some(2), NumericField::Missing),
        ];
        let report = LossAnalyzer::new(BidderId(7)).analyze(&records);
        let path = std::env::temp_dir().join(format!("loss_report_{}.csv", std::process::id()));
        let written = report.write_csv(&path).unwrap();
        assert_eq!(written, 2);

        let table = replay_ingestion::RawTable::read_csv(&path).unwrap();
        let loss_col = table.column_index("LOSS_AMOUNT").unwrap();
        assert_eq!(table.cell(0, 0), Some("lead-0"));
        assert_eq!(table.cell(0, loss_col).and_then(|v| v.parse::<f64>().ok()), Some(4.0));
        assert_eq!(table.cell(1, loss_col), None);
        std::fs::remove_file(&path).ok();
    }
}
