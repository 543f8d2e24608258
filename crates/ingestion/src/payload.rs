//! Model payload parsing.
//!
//! The payload cell is JSON carrying a `bids` object keyed by bidder id text,
//! each value holding the model's `bid_value` and `cpa_target`.

use std::collections::HashMap;

use replay_core::{BidderId, ModelBid, ModelPayload, NumericField};
use serde_json::Value;
use tracing::debug;

/// Outcome of parsing a payload cell.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadParse {
    Parsed(ModelPayload),
    /// Cell empty or null.
    Absent,
    /// Text present but not a JSON object.
    Malformed(String),
}

impl PayloadParse {
    /// Bids usable for recalculation; empty unless parsed.
    pub fn payload(&self) -> Option<&ModelPayload> {
        match self {
            PayloadParse::Parsed(payload) => Some(payload),
            _ => None,
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, PayloadParse::Malformed(_))
    }
}

/// Whether a payload cell counts as present. Records without one are dropped before replay.
pub fn has_payload(text: Option<&str>) -> bool {
    text.map(|t| !t.trim().is_empty()).unwrap_or(false)
}

/// Parse a model payload cell.
pub fn parse_model_payload(text: Option<&str>) -> PayloadParse {
    let text = match text {
        Some(t) if has_payload(Some(t)) => t,
        _ => return PayloadParse::Absent,
    };

    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => return PayloadParse::Malformed(e.to_string()),
    };
    let root = match value {
        Value::Object(root) => root,
        Value::Null => return PayloadParse::Absent,
        other => return PayloadParse::Malformed(format!("expected an object, found {other}")),
    };

    let bids = match root.get("bids") {
        Some(Value::Object(bids)) => bids,
        _ => return PayloadParse::Parsed(ModelPayload::default()),
    };

    let mut parsed = HashMap::with_capacity(bids.len());
    for (key, entry) in bids {
        let Ok(bidder_id) = key.parse::<BidderId>() else {
            debug!(key = %key, "Skipping payload entry with non-integer bidder key");
            continue;
        };
        let Some(fields) = entry.as_object() else {
            debug!(key = %key, "Skipping payload entry that is not an object");
            continue;
        };
        parsed.insert(
            bidder_id,
            ModelBid {
                bid_value: NumericField::from_json(fields.get("bid_value")),
                cpa_target: NumericField::from_json(fields.get("cpa_target")),
            },
        );
    }

    PayloadParse::Parsed(ModelPayload::new(parsed))
}
