//! Bid recalculation.
//!
//! Rescales a model bid from the cost target it was priced at to the
//! bidder's new target CPA: `bid_value / cpa_target * target_cpa`.

use replay_core::{BidderId, ModelBid, ModelPayload, NumericField, PartnerTable};

/// Recalculate one bid. `None` whenever an input is missing, non-numeric, or
/// `cpa_target` is zero.
#[inline]
pub fn recalculate_bid(
    bid_value: NumericField,
    cpa_target: NumericField,
    target_cpa: Option<f64>,
) -> Option<f64> {
    let bid_value = bid_value.value()?;
    let cpa_target = cpa_target.value()?;
    let target_cpa = target_cpa?;
    if cpa_target == 0.0 {
        return None;
    }
    let bid = bid_value / cpa_target * target_cpa;
    bid.is_finite().then_some(bid)
}

/// Bid recalculator bound to the partner reference table.
#[derive(Debug, Clone, Copy)]
pub struct BidRecalculator<'a> {
    partners: &'a PartnerTable,
}

impl<'a> BidRecalculator<'a> {
    pub fn new(partners: &'a PartnerTable) -> Self {
        Self { partners }
    }

    /// Recalculated bid for a bidder, if the payload and partner table allow one.
    ///
    /// Bidders without partner info are never recalculated.
    pub fn recalculate(&self, bidder_id: BidderId, payload: Option<&ModelPayload>) -> Option<f64> {
        let partner = self.partners.get(bidder_id)?;
        let model: &ModelBid = payload?.get(bidder_id)?;
        recalculate_bid(model.bid_value, model.cpa_target, partner.target_cpa)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use replay_core::PartnerInfo;
    use std::collections::HashMap;

    fn make_partners() -> PartnerTable {
        PartnerTable::new(vec![
            PartnerInfo {
                bidder_id: BidderId(1),
                target_cpa: Some(25.0),
                initial_budget: Some(80.0),
            },
            PartnerInfo {
                bidder_id: BidderId(2),
                target_cpa: None,
                initial_budget: Some(80.0),
            },
        ])
    }

    fn make_payload(entries: &[(i64, NumericField, NumericField)]) -> ModelPayload {
        let bids: HashMap<BidderId, ModelBid> = entries
            .iter()
            .map(|&(id, bid_value, cpa_target)| (BidderId(id), ModelBid { bid_value, cpa_target }))
            .collect();
        ModelPayload::new(bids)
    }

    #[test]
    fn test_recalculation_formula() {
        let bid = recalculate_bid(NumericField::Value(100.0), NumericField::Value(50.0), Some(25.0));
        assert_relative_eq!(bid.unwrap(), 50.0);
    }

    #[test]
    fn test_zero_cpa_target_is_unset() {
        let bid = recalculate_bid(NumericField::Value(100.0), NumericField::Value(0.0), Some(25.0));
        assert_eq!(bid, None);
    }

    #[test]
    fn test_missing_or_invalid_inputs_are_unset() {
        assert_eq!(recalculate_bid(NumericField::Missing, NumericField::Value(50.0), Some(25.0)), None);
        assert_eq!(recalculate_bid(NumericField::Value(100.0), NumericField::Invalid, Some(25.0)), None);
        assert_eq!(recalculate_bid(NumericField::Value(100.0), NumericField::Value(50.0), None), None);
    }

    #[test]
    fn test_recalculator_lookups() {
        let partners = make_partners();
        let recalculator = BidRecalculator::new(&partners);
        let payload = make_payload(&[
            (1, NumericField::Value(100.0), NumericField::Value(50.0)),
            (2, NumericField::Value(100.0), NumericField::Value(50.0)),
            (3, NumericField::Value(100.0), NumericField::Value(50.0)),
        ]);

        assert_relative_eq!(recalculator.recalculate(BidderId(1), Some(&payload)).unwrap(), 50.0);
        // Partner without a target CPA
        assert_eq!(recalculator.recalculate(BidderId(2), Some(&payload)), None);
        // No partner info at all
        assert_eq!(recalculator.recalculate(BidderId(3), Some(&payload)), None);
        // No payload entry
        assert_eq!(recalculator.recalculate(BidderId(1), None), None);
        assert_eq!(recalculator.recalculate(BidderId(1), Some(&ModelPayload::default())), None);
    }
}
