//! Data ingestion and normalization for the auction replay system.
//!
//! This crate handles:
//! - Auction summary normalization (JSON and Python-literal forms)
//! - Model payload parsing
//! - Record and partner table loading
//! - Enriched record and ledger sinks

pub mod literal;
pub mod payload;
pub mod records;
pub mod summary;
pub mod table;

pub use payload::{has_payload, parse_model_payload, PayloadParse};
pub use records::{
    write_enriched, write_ledger, write_replay_outputs, LoadedRecords, PartnerSource, RecordSource,
    WrittenOutputs,
};
pub use summary::{parse_summary, AuctionNormalizer, NormalizedSummary, SummaryParse};
pub use table::{Cell, ColumnType, RawTable, TableWriter};
