//! PyO3 bindings for the auction replay engine.
//!
//! Exposes the Rust implementations to Python:
//! - Bid recalculation
//! - Partner and auction record types
//! - Chronological replay with a budget ledger

use std::collections::HashMap;

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use replay_core::{
    AuctionRecord as RustAuctionRecord, AuctionTime, BidderId, NumericField,
    PartnerInfo as RustPartnerInfo, PartnerTable,
};
use replay_engine::{
    recalculate_bid as rust_recalculate_bid, BudgetLedger, MetricsCalculator, ReplaySimulator,
};
use replay_ingestion::has_payload;

fn numeric(value: Option<f64>) -> NumericField {
    match value {
        Some(v) => NumericField::Value(v),
        None => NumericField::Missing,
    }
}

// ============================================================================
// Python-exposed Types
// ============================================================================

/// Partner reference data.
#[pyclass]
#[derive(Clone)]
pub struct PartnerInfo {
    #[pyo3(get, set)]
    pub bidder_id: i64,
    #[pyo3(get, set)]
    pub target_cpa: Option<f64>,
    #[pyo3(get, set)]
    pub initial_budget: Option<f64>,
}

#[pymethods]
impl PartnerInfo {
    #[new]
    #[pyo3(signature = (bidder_id, target_cpa=None, initial_budget=None))]
    fn new(bidder_id: i64, target_cpa: Option<f64>, initial_budget: Option<f64>) -> Self {
        PartnerInfo {
            bidder_id,
            target_cpa,
            initial_budget,
        }
    }

    fn __repr__(&self) -> String {
        format!(
            "PartnerInfo(bidder_id={}, target_cpa={:?}, initial_budget={:?})",
            self.bidder_id, self.target_cpa, self.initial_budget
        )
    }
}

impl From<&PartnerInfo> for RustPartnerInfo {
    fn from(p: &PartnerInfo) -> Self {
        RustPartnerInfo {
            bidder_id: BidderId(p.bidder_id),
            target_cpa: p.target_cpa,
            initial_budget: p.initial_budget,
        }
    }
}

/// One historical auction.
#[pyclass]
#[derive(Clone)]
pub struct AuctionRecord {
    #[pyo3(get, set)]
    pub timestamp: String,
    #[pyo3(get, set)]
    pub original_winner_id: Option<i64>,
    #[pyo3(get, set)]
    pub original_winning_bid: Option<f64>,
    #[pyo3(get, set)]
    pub auction_summary: Option<String>,
    #[pyo3(get, set)]
    pub model_output: Option<String>,
    #[pyo3(get, set)]
    pub lead_id: Option<String>,
}

#[pymethods]
impl AuctionRecord {
    #[new]
    #[pyo3(signature = (timestamp, original_winner_id, original_winning_bid, auction_summary, model_output, lead_id=None))]
    fn new(
        timestamp: String,
        original_winner_id: Option<i64>,
        original_winning_bid: Option<f64>,
        auction_summary: Option<String>,
        model_output: Option<String>,
        lead_id: Option<String>,
    ) -> Self {
        AuctionRecord {
            timestamp,
            original_winner_id,
            original_winning_bid,
            auction_summary,
            model_output,
            lead_id,
        }
    }

    fn __repr__(&self) -> String {
        format!(
            "AuctionRecord(timestamp={:?}, original_winner_id={:?}, original_winning_bid={:?})",
            self.timestamp, self.original_winner_id, self.original_winning_bid
        )
    }
}

impl AuctionRecord {
    fn to_rust(&self, source_index: usize) -> RustAuctionRecord {
        RustAuctionRecord {
            source_index,
            timestamp: AuctionTime::parse(&self.timestamp),
            lead_id: self.lead_id.clone(),
            original_winner_id: self.original_winner_id.map(BidderId),
            original_winning_bid: numeric(self.original_winning_bid),
            raw_summary: self.auction_summary.clone().filter(|s| !s.trim().is_empty()),
            model_payload: self.model_output.clone(),
        }
    }
}

/// Outcome of a replay run.
#[pyclass]
pub struct ReplayResult {
    /// Input list positions, in processing order.
    #[pyo3(get)]
    pub source_indices: Vec<usize>,
    /// Result column text per processed record, aligned with `source_indices`.
    #[pyo3(get)]
    pub results: Vec<String>,
    /// New winner per processed record, `None` when unsold or skipped.
    #[pyo3(get)]
    pub winners: Vec<Option<i64>>,
    /// Remaining budget per partner after the last auction.
    #[pyo3(get)]
    pub remaining_budgets: HashMap<i64, f64>,
    #[pyo3(get)]
    pub auctions_sold: usize,
    #[pyo3(get)]
    pub auctions_unsold: usize,
    #[pyo3(get)]
    pub auctions_skipped: usize,
    #[pyo3(get)]
    pub total_spend: f64,
}

#[pymethods]
impl ReplayResult {
    /// Partners with the most remaining budget, highest first.
    fn top_budgets(&self, n: usize) -> Vec<(i64, f64)> {
        let mut entries: Vec<(i64, f64)> = self.remaining_budgets.iter().map(|(&k, &v)| (k, v)).collect();
        entries.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        entries.truncate(n);
        entries
    }

    fn __len__(&self) -> usize {
        self.results.len()
    }

    fn __repr__(&self) -> String {
        format!(
            "ReplayResult(auctions={}, sold={}, unsold={}, skipped={})",
            self.results.len(),
            self.auctions_sold,
            self.auctions_unsold,
            self.auctions_skipped
        )
    }
}

// ============================================================================
// Functions
// ============================================================================

/// Rescale a model bid to a new target CPA. `None` when any input is missing
/// or `cpa_target` is zero.
#[pyfunction]
#[pyo3(signature = (bid_value, cpa_target, target_cpa))]
fn recalculate_bid(bid_value: Option<f64>, cpa_target: Option<f64>, target_cpa: Option<f64>) -> Option<f64> {
    rust_recalculate_bid(numeric(bid_value), numeric(cpa_target), target_cpa)
}

/// Replay auctions chronologically against the partners' budgets.
///
/// Records without a model output are dropped before replay, as in the
/// command-line tool.
#[pyfunction]
fn replay(py: Python<'_>, records: Vec<AuctionRecord>, partners: Vec<PartnerInfo>) -> PyResult<ReplayResult> {
    let table = PartnerTable::new(partners.iter().map(RustPartnerInfo::from));
    let mut dropped = 0;
    let rust_records: Vec<RustAuctionRecord> = records
        .iter()
        .enumerate()
        .filter_map(|(i, r)| {
            if !has_payload(r.model_output.as_deref()) {
                dropped += 1;
                return None;
            }
            Some(r.to_rust(i))
        })
        .collect();

    let (outcomes, ledger) = py.allow_threads(move || {
        let ledger = BudgetLedger::from_partners(&table);
        let mut simulator = ReplaySimulator::with_ledger(table, ledger);
        let outcomes = simulator.run(&rust_records);
        (outcomes, simulator.into_ledger())
    });

    let metrics = MetricsCalculator::new().calculate(&outcomes, dropped);
    let results = outcomes
        .iter()
        .map(|o| o.result_cell())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| PyValueError::new_err(e.to_string()))?;

    Ok(ReplayResult {
        source_indices: outcomes.iter().map(|o| o.source_index).collect(),
        results,
        winners: outcomes.iter().map(|o| o.winner.map(|w| w.bidder_id.0)).collect(),
        remaining_budgets: ledger
            .snapshot()
            .into_iter()
            .map(|e| (e.partner_id.0, e.remaining_budget))
            .collect(),
        auctions_sold: metrics.auctions_sold,
        auctions_unsold: metrics.auctions_unsold,
        auctions_skipped: metrics.auctions_skipped,
        total_spend: metrics.total_spend,
    })
}

// ============================================================================
// Module Definition
// ============================================================================

/// Auction replay - chronological bid recalculation and budget replay.
#[pymodule]
fn auction_replay(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PartnerInfo>()?;
    m.add_class::<AuctionRecord>()?;
    m.add_class::<ReplayResult>()?;

    m.add_function(wrap_pyfunction!(recalculate_bid, m)?)?;
    m.add_function(wrap_pyfunction!(replay, m)?)?;

    Ok(())
}
