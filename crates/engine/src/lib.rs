//! Replay engine for the auction replay system.
//!
//! This crate provides:
//! - Bid recalculation against partner target CPAs
//! - The budget ledger shared across a replay
//! - Per-auction winner resolution and classification
//! - Chronological replay, run metrics and loss analysis

pub mod ledger;
pub mod loss;
pub mod metrics;
pub mod recalculator;
pub mod replay;
pub mod resolver;

pub use ledger::{BidderSpend, BudgetLedger};
pub use loss::{LossAnalyzer, LossReport, LostAuction};
pub use metrics::{MetricsCalculator, ReplayMetrics};
pub use recalculator::{recalculate_bid, BidRecalculator};
pub use replay::{log_summary, processing_order, replay, ReplayOutput, ReplaySimulator};
pub use resolver::{classify, rank, AuctionResolver, PreparedAuction};
