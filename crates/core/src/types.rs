//! Core data types for the auction replay system.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Bidder (partner / broker) identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BidderId(pub i64);

impl BidderId {
    /// Read an id from a JSON value: integers, integral floats and numeric text.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(BidderId)
                .or_else(|| n.as_f64().and_then(integral)),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

fn integral(v: f64) -> Option<BidderId> {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
        Some(BidderId(v as i64))
    } else {
        None
    }
}

impl FromStr for BidderId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.parse::<i64>() {
            Ok(id) => Ok(BidderId(id)),
            // CSV exports sometimes carry integer ids as "359.0".
            Err(err) => trimmed
                .parse::<f64>()
                .ok()
                .and_then(integral)
                .ok_or(err),
        }
    }
}

impl fmt::Display for BidderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A numeric input that may be absent or present with the wrong type.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum NumericField {
    /// Field absent or null.
    #[default]
    Missing,
    /// Field present but not a finite number.
    Invalid,
    /// Finite numeric value.
    Value(f64),
}

impl NumericField {
    /// Classify an optional JSON value.
    pub fn from_json(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => NumericField::Missing,
            Some(Value::Number(n)) => match n.as_f64() {
                Some(v) if v.is_finite() => NumericField::Value(v),
                _ => NumericField::Invalid,
            },
            Some(_) => NumericField::Invalid,
        }
    }

    /// Classify a text cell. Empty text counts as missing.
    pub fn from_text(text: Option<&str>) -> Self {
        match text.map(str::trim) {
            None | Some("") => NumericField::Missing,
            Some(s) => match s.parse::<f64>() {
                Ok(v) if v.is_finite() => NumericField::Value(v),
                _ => NumericField::Invalid,
            },
        }
    }

    /// The numeric value, if there is one.
    #[inline]
    pub fn value(self) -> Option<f64> {
        match self {
            NumericField::Value(v) => Some(v),
            _ => None,
        }
    }
}

/// Processing-order key for an auction.
///
/// Parsed datetimes order chronologically and come before any value that
/// could not be parsed; unparsed values order by their raw text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum AuctionTime {
    Parsed(NaiveDateTime),
    Unparsed(String),
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S%.f",
    "%m/%d/%Y %H:%M",
];

const OFFSET_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f %z", "%Y-%m-%d %H:%M:%S%.f%:z"];

impl AuctionTime {
    /// Parse a timestamp cell. Offsets are normalized to UTC.
    pub fn parse(raw: &str) -> Self {
        let s = raw.trim();

        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return AuctionTime::Parsed(dt.naive_utc());
        }
        for fmt in OFFSET_FORMATS {
            if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
                return AuctionTime::Parsed(dt.naive_utc());
            }
        }
        for fmt in DATETIME_FORMATS {
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
                return AuctionTime::Parsed(dt);
            }
        }
        if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            if let Some(dt) = date.and_hms_opt(0, 0, 0) {
                return AuctionTime::Parsed(dt);
            }
        }
        // Epoch values: seconds below 1e11, milliseconds above.
        if let Ok(epoch) = s.parse::<i64>() {
            let dt = if epoch.abs() < 100_000_000_000 {
                DateTime::from_timestamp(epoch, 0)
            } else {
                DateTime::from_timestamp_millis(epoch)
            };
            if let Some(dt) = dt {
                return AuctionTime::Parsed(dt.naive_utc());
            }
        }

        AuctionTime::Unparsed(raw.to_string())
    }

    /// Whether the value was understood as a datetime.
    pub fn is_parsed(&self) -> bool {
        matches!(self, AuctionTime::Parsed(_))
    }
}

impl fmt::Display for AuctionTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuctionTime::Parsed(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.f")),
            AuctionTime::Unparsed(raw) => f.write_str(raw),
        }
    }
}

/// One historical auction.
#[derive(Debug, Clone)]
pub struct AuctionRecord {
    /// Row position in the source table.
    pub source_index: usize,
    /// Processing-order key.
    pub timestamp: AuctionTime,
    /// Lead identifier, when the source carries one.
    pub lead_id: Option<String>,
    /// Bidder that historically won.
    pub original_winner_id: Option<BidderId>,
    /// Amount historically bid by the winner.
    pub original_winning_bid: NumericField,
    /// Candidate list text, JSON or Python literal. `None` when the cell is empty.
    pub raw_summary: Option<String>,
    /// Model payload JSON. `None` when the cell is empty.
    pub model_payload: Option<String>,
}

/// One candidate entry from an auction summary.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryEntry {
    pub bidder_id: BidderId,
    pub bid: NumericField,
    /// Appended from the record's own winner columns.
    pub synthetic: bool,
}

/// Alternative bid parameters for one bidder from the model payload.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ModelBid {
    pub bid_value: NumericField,
    pub cpa_target: NumericField,
}

/// Per-bidder model bids of one auction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelPayload {
    bids: HashMap<BidderId, ModelBid>,
}

impl ModelPayload {
    pub fn new(bids: HashMap<BidderId, ModelBid>) -> Self {
        Self { bids }
    }

    pub fn get(&self, bidder_id: BidderId) -> Option<&ModelBid> {
        self.bids.get(&bidder_id)
    }

    pub fn len(&self) -> usize {
        self.bids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty()
    }
}

/// Partner reference data, immutable after load.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartnerInfo {
    pub bidder_id: BidderId,
    /// Target cost used in bid recalculation.
    pub target_cpa: Option<f64>,
    /// Starting budget. Partners without one never enter the ledger.
    pub initial_budget: Option<f64>,
}

/// Partner reference table keyed by bidder.
#[derive(Debug, Clone, Default)]
pub struct PartnerTable {
    partners: HashMap<BidderId, PartnerInfo>,
}

impl PartnerTable {
    /// Build from partner rows. A later row for the same id replaces an earlier one.
    pub fn new(partners: impl IntoIterator<Item = PartnerInfo>) -> Self {
        Self {
            partners: partners.into_iter().map(|p| (p.bidder_id, p)).collect(),
        }
    }

    pub fn get(&self, bidder_id: BidderId) -> Option<&PartnerInfo> {
        self.partners.get(&bidder_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PartnerInfo> {
        self.partners.values()
    }

    pub fn len(&self) -> usize {
        self.partners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partners.is_empty()
    }
}

/// Classification of a candidate against the original and new winners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WinType {
    #[serde(rename = "OG_and_NEW_WINNER")]
    OgAndNewWinner,
    #[serde(rename = "OG_WINNER")]
    OgWinner,
    #[serde(rename = "NEW_WINNER")]
    NewWinner,
    #[serde(rename = "UNSOLD_NO_BUDGET")]
    UnsoldNoBudget,
}

impl WinType {
    pub fn as_str(self) -> &'static str {
        match self {
            WinType::OgAndNewWinner => "OG_and_NEW_WINNER",
            WinType::OgWinner => "OG_WINNER",
            WinType::NewWinner => "NEW_WINNER",
            WinType::UnsoldNoBudget => "UNSOLD_NO_BUDGET",
        }
    }
}

/// A bidder competing in one replayed auction.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub bidder_id: BidderId,
    /// Bid as recorded in the summary.
    pub original_bid: NumericField,
    /// Bid recalculated from the model payload; `None` when inputs are unusable.
    pub recalculated_bid: Option<f64>,
    pub synthetic: bool,
    pub win_type: Option<WinType>,
}

impl Candidate {
    /// Recalculated bid, falling back to the original amount.
    #[inline]
    pub fn effective_bid(&self) -> Option<f64> {
        self.recalculated_bid.or(self.original_bid.value())
    }
}

/// Selected winner of a replayed auction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Winner {
    /// Position in the candidate list.
    pub candidate: usize,
    pub bidder_id: BidderId,
    /// Amount debited from the ledger.
    pub amount: f64,
    /// Remaining budget before the debit.
    pub budget_before: f64,
}

/// How an auction went through the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    /// Candidates were ranked against the ledger.
    Resolved,
    /// No usable summary; the ledger was not consulted.
    Skipped,
}

/// Result of replaying one auction.
#[derive(Debug, Clone)]
pub struct AuctionOutcome {
    pub source_index: usize,
    pub timestamp: AuctionTime,
    pub status: OutcomeStatus,
    pub original_winner_id: Option<BidderId>,
    pub original_winning_bid: NumericField,
    /// Candidates in summary order, synthetic winner entry last.
    pub candidates: Vec<Candidate>,
    /// Candidate positions by effective bid, highest first. Non-numeric bids are absent.
    pub ranking: Vec<usize>,
    pub winner: Option<Winner>,
    pub summary_malformed: bool,
    pub payload_malformed: bool,
    /// Summary text kept for records that could not be replayed.
    pub original_summary: Option<String>,
}

impl AuctionOutcome {
    /// Whether the auction went unsold.
    pub fn is_unsold(&self) -> bool {
        self.status == OutcomeStatus::Resolved && self.winner.is_none()
    }

    /// Whether a different bidder won than historically.
    pub fn winner_changed(&self) -> bool {
        match self.winner {
            Some(w) => Some(w.bidder_id) != self.original_winner_id,
            None => false,
        }
    }

    /// Build the serialized rerun summary. `None` for skipped auctions.
    pub fn rerun_summary(&self) -> Option<RerunSummary> {
        if self.status == OutcomeStatus::Skipped {
            return None;
        }

        let mut by_original: Vec<&Candidate> = self.candidates.iter().collect();
        by_original.sort_by(|a, b| desc_with_missing_last(a.original_bid.value(), b.original_bid.value()));
        let original_bids = by_original
            .into_iter()
            .map(|c| BidView {
                partner_id: c.bidder_id,
                amount: c.original_bid.value(),
                win_type: None,
            })
            .collect();

        let ranked = self.ranking.iter().copied();
        let unranked = (0..self.candidates.len()).filter(|i| !self.ranking.contains(i));
        let new_bids = ranked
            .chain(unranked)
            .map(|i| {
                let c = &self.candidates[i];
                BidView {
                    partner_id: c.bidder_id,
                    amount: c.effective_bid(),
                    win_type: c.win_type,
                }
            })
            .collect();

        let winner = self.winner.map(|w| BidView {
            partner_id: w.bidder_id,
            amount: Some(w.amount),
            win_type: self.candidates.get(w.candidate).and_then(|c| c.win_type),
        });

        Some(RerunSummary {
            original_bids,
            new_bids,
            winner,
        })
    }

    /// Text for the appended result column.
    pub fn result_cell(&self) -> Result<String> {
        match self.rerun_summary() {
            Some(summary) => Ok(serde_json::to_string(&summary)?),
            None => Ok(self.original_summary.clone().unwrap_or_default()),
        }
    }
}

/// Highest first; missing values after all numeric ones, stable otherwise.
fn desc_with_missing_last(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => OrderedFloat(y).cmp(&OrderedFloat(x)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// One bid in the serialized rerun summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidView {
    pub partner_id: BidderId,
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub win_type: Option<WinType>,
}

/// Per-auction result written to the enriched record sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerunSummary {
    /// All candidates by recorded bid, highest first.
    pub original_bids: Vec<BidView>,
    /// Ranked candidates by replayed bid, unrankable ones last.
    pub new_bids: Vec<BidView>,
    pub winner: Option<BidView>,
}

/// Remaining budget of one bidder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub partner_id: BidderId,
    pub remaining_budget: f64,
}
