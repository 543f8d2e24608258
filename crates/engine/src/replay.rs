//! Replay driver.
//!
//! Replays auctions in timestamp order against one budget ledger. Every
//! auction sees the debits of all auctions before it, so the settle loop is
//! strictly sequential.

use replay_core::{AuctionOutcome, AuctionRecord, PartnerTable};
use tracing::info;

use crate::ledger::BudgetLedger;
use crate::metrics::{MetricsCalculator, ReplayMetrics};
use crate::resolver::{AuctionResolver, PreparedAuction};

/// Result of a full replay.
#[derive(Debug, Clone)]
pub struct ReplayOutput {
    /// One outcome per record, in processing order.
    pub outcomes: Vec<AuctionOutcome>,
    /// Ledger after the last auction.
    pub ledger: BudgetLedger,
}

/// Records in processing order: ascending timestamp, ties in input order.
pub fn processing_order(records: &[AuctionRecord]) -> Vec<&AuctionRecord> {
    let mut ordered: Vec<&AuctionRecord> = records.iter().collect();
    ordered.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    ordered
}

/// Replay simulator state.
pub struct ReplaySimulator {
    partners: PartnerTable,
    ledger: BudgetLedger,
}

impl ReplaySimulator {
    /// Create a simulator with a ledger seeded from partner budgets.
    pub fn new(partners: PartnerTable) -> Self {
        let ledger = BudgetLedger::from_partners(&partners);
        Self { partners, ledger }
    }

    /// Create a simulator with an explicit starting ledger.
    pub fn with_ledger(partners: PartnerTable, ledger: BudgetLedger) -> Self {
        Self { partners, ledger }
    }

    /// Partner reference table.
    pub fn partners(&self) -> &PartnerTable {
        &self.partners
    }

    /// Current ledger.
    pub fn ledger(&self) -> &BudgetLedger {
        &self.ledger
    }

    /// Replay all records, sorting them first.
    pub fn run(&mut self, records: &[AuctionRecord]) -> Vec<AuctionOutcome> {
        info!(auctions = records.len(), "Sorting auctions by timestamp");
        let ordered = processing_order(records);

        let resolver = AuctionResolver::new(&self.partners);

        info!("Pre-calculating all potential new bids");
        let prepared: Vec<PreparedAuction> = ordered.iter().map(|r| resolver.prepare(r)).collect();

        info!(auctions = prepared.len(), "Rerunning auctions chronologically");
        let mut outcomes = Vec::with_capacity(prepared.len());
        for auction in prepared {
            outcomes.push(resolver.settle(auction, &mut self.ledger));
        }
        outcomes
    }

    /// Consume the simulator, returning its ledger.
    pub fn into_ledger(self) -> BudgetLedger {
        self.ledger
    }

    /// Reset the ledger to the partners' starting budgets.
    pub fn reset(&mut self) {
        self.ledger = BudgetLedger::from_partners(&self.partners);
    }
}

/// Replay `records` against `ledger`, returning outcomes and the final ledger.
pub fn replay(records: &[AuctionRecord], partners: &PartnerTable, ledger: BudgetLedger) -> ReplayOutput {
    let mut simulator = ReplaySimulator::with_ledger(partners.clone(), ledger);
    let outcomes = simulator.run(records);
    ReplayOutput {
        outcomes,
        ledger: simulator.into_ledger(),
    }
}

/// Log the end-of-run summary.
pub fn log_summary(output: &ReplayOutput, dropped_no_payload: usize) -> ReplayMetrics {
    let metrics = MetricsCalculator::new().calculate(&output.outcomes, dropped_no_payload);
    info!(
        loaded = output.outcomes.len() + dropped_no_payload,
        processed = metrics.auctions_processed,
        skipped = metrics.auctions_skipped,
        dropped_no_payload = metrics.records_dropped_no_payload,
        sold = metrics.auctions_sold,
        no_winner = metrics.auctions_unsold,
        winner_changed = metrics.winner_changed,
        malformed_summaries = metrics.malformed_summaries,
        malformed_payloads = metrics.malformed_payloads,
        total_spend = metrics.total_spend,
        "Replay complete"
    );
    metrics
}
