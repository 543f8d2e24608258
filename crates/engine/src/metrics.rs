//! Replay run metrics.
//!
//! Summarizes a finished replay: counts per outcome type and statistics of
//! the winning bids.

use std::collections::HashSet;

use replay_core::{AuctionOutcome, OutcomeStatus};
use statrs::statistics::{Data, Median, Statistics};

/// Replay summary metrics.
#[derive(Debug, Clone, Default)]
pub struct ReplayMetrics {
    /// Records dropped before replay for lacking a model payload.
    pub records_dropped_no_payload: usize,
    /// Auctions resolved against the ledger.
    pub auctions_processed: usize,
    /// Auctions skipped with original data kept.
    pub auctions_skipped: usize,
    /// Auctions with a new winner.
    pub auctions_sold: usize,
    /// Auctions where no candidate could pay.
    pub auctions_unsold: usize,
    /// Sold auctions won by the historical winner.
    pub winner_retained: usize,
    /// Sold auctions won by someone else.
    pub winner_changed: usize,
    /// Auctions replayed with an unparseable summary.
    pub malformed_summaries: usize,
    /// Auctions replayed with an unparseable model payload.
    pub malformed_payloads: usize,
    /// Distinct bidders that won at least once.
    pub distinct_winners: usize,
    /// Sum of all winning bids.
    pub total_spend: f64,
    /// Mean winning bid.
    pub mean_winning_bid: f64,
    /// Median winning bid.
    pub median_winning_bid: f64,
    /// Largest winning bid.
    pub max_winning_bid: f64,
    /// Mean of (new winning bid - recorded winning bid) over sold auctions.
    pub mean_bid_shift: f64,
}

impl ReplayMetrics {
    /// Fraction of processed auctions that sold.
    pub fn sell_through(&self) -> f64 {
        if self.auctions_processed > 0 {
            self.auctions_sold as f64 / self.auctions_processed as f64
        } else {
            0.0
        }
    }
}

/// Metrics calculator.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCalculator;

impl MetricsCalculator {
    pub fn new() -> Self {
        Self
    }

    /// Calculate metrics from replay outcomes.
    pub fn calculate(&self, outcomes: &[AuctionOutcome], dropped_no_payload: usize) -> ReplayMetrics {
        let mut metrics = ReplayMetrics {
            records_dropped_no_payload: dropped_no_payload,
            ..Default::default()
        };

        let mut winning_bids = Vec::new();
        let mut shifts = Vec::new();
        let mut winners = HashSet::new();

        for outcome in outcomes {
            if outcome.status == OutcomeStatus::Skipped {
                metrics.auctions_skipped += 1;
                continue;
            }
            metrics.auctions_processed += 1;
            if outcome.summary_malformed {
                metrics.malformed_summaries += 1;
            }
            if outcome.payload_malformed {
                metrics.malformed_payloads += 1;
            }

            match outcome.winner {
                Some(winner) => {
                    metrics.auctions_sold += 1;
                    if outcome.winner_changed() {
                        metrics.winner_changed += 1;
                    } else {
                        metrics.winner_retained += 1;
                    }
                    winners.insert(winner.bidder_id);
                    winning_bids.push(winner.amount);
                    if let Some(recorded) = outcome.original_winning_bid.value() {
                        shifts.push(winner.amount - recorded);
                    }
                }
                None => metrics.auctions_unsold += 1,
            }
        }

        metrics.distinct_winners = winners.len();
        if !winning_bids.is_empty() {
            metrics.total_spend = winning_bids.iter().sum();
            metrics.mean_winning_bid = winning_bids.iter().mean();
            metrics.max_winning_bid = Statistics::max(winning_bids.iter());
            metrics.median_winning_bid = Data::new(winning_bids).median();
        }
        if !shifts.is_empty() {
            metrics.mean_bid_shift = shifts.iter().mean();
        }

        metrics
    }
}
