//! Auction summary normalization.
//!
//! Turns the heterogeneous summary cell of an auction record into a uniform
//! candidate list. The record's own winner is always appended as a synthetic
//! entry, even when the summary already lists that bidder.

use replay_core::{AuctionRecord, BidderId, NumericField, SummaryEntry};
use serde_json::Value;
use tracing::debug;

use crate::literal::python_literal_to_json;

const BID_KEY: &str = "BID";
const BIDDER_KEY: &str = "BROKER_ID";

/// Outcome of parsing a summary cell.
#[derive(Debug, Clone, PartialEq)]
pub enum SummaryParse {
    /// Entries in summary order. A parsed value that is not a list yields no entries.
    Parsed(Vec<SummaryEntry>),
    /// No parsing strategy understood the text.
    Malformed(String),
}

/// Candidate list of one auction, ready for the resolver.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedSummary {
    /// Summary entries followed by the synthetic winner entry.
    Parsed(Vec<SummaryEntry>),
    /// Summary unreadable; only the synthetic winner entry remains.
    Malformed {
        entries: Vec<SummaryEntry>,
        reason: String,
    },
    /// The record has no summary at all.
    Absent,
}

impl NormalizedSummary {
    /// Entries to rank. Empty for an absent summary.
    pub fn entries(&self) -> &[SummaryEntry] {
        match self {
            NormalizedSummary::Parsed(entries) => entries,
            NormalizedSummary::Malformed { entries, .. } => entries,
            NormalizedSummary::Absent => &[],
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, NormalizedSummary::Malformed { .. })
    }
}

/// Parse a summary cell: JSON first, then the Python literal form.
pub fn parse_summary(text: &str) -> SummaryParse {
    let value = match serde_json::from_str::<Value>(text) {
        Ok(v) => v,
        Err(json_err) => match python_literal_to_json(text) {
            Ok(json) => match serde_json::from_str::<Value>(&json) {
                Ok(v) => v,
                Err(e) => return SummaryParse::Malformed(e.to_string()),
            },
            Err(lit_err) => {
                return SummaryParse::Malformed(format!("json: {json_err}; literal: {lit_err}"))
            }
        },
    };

    let items = match value {
        Value::Array(items) => items,
        _ => return SummaryParse::Parsed(Vec::new()),
    };

    let entries = items
        .iter()
        .enumerate()
        .filter_map(|(pos, item)| {
            let entry = entry_from_value(item);
            if entry.is_none() {
                debug!(position = pos, item = %item, "Dropping summary entry without usable BROKER_ID/BID");
            }
            entry
        })
        .collect();
    SummaryParse::Parsed(entries)
}

fn entry_from_value(item: &Value) -> Option<SummaryEntry> {
    let obj = item.as_object()?;
    let bid = obj.get(BID_KEY)?;
    let bidder_id = BidderId::from_json(obj.get(BIDDER_KEY)?)?;
    Some(SummaryEntry {
        bidder_id,
        bid: NumericField::from_json(Some(bid)),
        synthetic: false,
    })
}

/// Auction normalizer.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuctionNormalizer;

impl AuctionNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Normalize one record into its candidate list.
    pub fn normalize(&self, record: &AuctionRecord) -> NormalizedSummary {
        let text = match record.raw_summary.as_deref() {
            Some(text) if !text.trim().is_empty() => text,
            _ => return NormalizedSummary::Absent,
        };

        match parse_summary(text) {
            SummaryParse::Parsed(mut entries) => {
                entries.extend(Self::synthetic_entry(record));
                NormalizedSummary::Parsed(entries)
            }
            SummaryParse::Malformed(reason) => NormalizedSummary::Malformed {
                entries: Self::synthetic_entry(record).into_iter().collect(),
                reason,
            },
        }
    }

    /// Entry standing for the historical winner.
    fn synthetic_entry(record: &AuctionRecord) -> Option<SummaryEntry> {
        match record.original_winner_id {
            Some(bidder_id) => Some(SummaryEntry {
                bidder_id,
                bid: record.original_winning_bid,
                synthetic: true,
            }),
            None => {
                debug!(
                    source_index = record.source_index,
                    "Record has no usable winner id; no synthetic entry"
                );
                None
            }
        }
    }
}
