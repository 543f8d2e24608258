//! Auction resolution.
//!
//! Resolving an auction happens in two steps. [`AuctionResolver::prepare`]
//! is pure: it normalizes the summary, recalculates bids and ranks the
//! candidates. [`AuctionResolver::settle`] walks the ranking against the
//! ledger, debits the winner and labels every candidate.

use ordered_float::OrderedFloat;
use replay_core::{
    AuctionOutcome, AuctionRecord, AuctionTime, BidderId, Candidate, NumericField, OutcomeStatus,
    PartnerTable, WinType, Winner,
};
use replay_ingestion::{parse_model_payload, AuctionNormalizer, NormalizedSummary, PayloadParse};
use tracing::{debug, warn};

use crate::ledger::BudgetLedger;
use crate::recalculator::BidRecalculator;

/// An auction with bids recalculated and ranked, not yet settled.
#[derive(Debug, Clone)]
pub struct PreparedAuction {
    pub source_index: usize,
    pub timestamp: AuctionTime,
    pub original_winner_id: Option<BidderId>,
    pub original_winning_bid: NumericField,
    /// `false` when the record has no summary and must be skipped.
    pub replayable: bool,
    pub summary_malformed: bool,
    pub payload_malformed: bool,
    pub candidates: Vec<Candidate>,
    /// Candidate positions by effective bid, highest first.
    pub ranking: Vec<usize>,
    pub original_summary: Option<String>,
}

/// Resolves single auctions against a budget ledger.
#[derive(Debug, Clone, Copy)]
pub struct AuctionResolver<'a> {
    recalculator: BidRecalculator<'a>,
    normalizer: AuctionNormalizer,
}

impl<'a> AuctionResolver<'a> {
    pub fn new(partners: &'a PartnerTable) -> Self {
        Self {
            recalculator: BidRecalculator::new(partners),
            normalizer: AuctionNormalizer::new(),
        }
    }

    /// Resolve one auction, debiting the winner from `ledger`.
    pub fn resolve(&self, record: &AuctionRecord, ledger: &mut BudgetLedger) -> AuctionOutcome {
        let prepared = self.prepare(record);
        self.settle(prepared, ledger)
    }

    /// Normalize, recalculate and rank. Does not touch any ledger.
    pub fn prepare(&self, record: &AuctionRecord) -> PreparedAuction {
        let normalized = self.normalizer.normalize(record);
        let (replayable, summary_malformed) = match &normalized {
            NormalizedSummary::Parsed(_) => (true, false),
            NormalizedSummary::Malformed { reason, .. } => {
                warn!(
                    source_index = record.source_index,
                    timestamp = %record.timestamp,
                    reason = %reason,
                    "Could not parse auction summary; replaying with the recorded winner only"
                );
                (true, true)
            }
            NormalizedSummary::Absent => {
                warn!(
                    source_index = record.source_index,
                    timestamp = %record.timestamp,
                    "Auction has no summary; keeping original data"
                );
                (false, false)
            }
        };

        let payload = parse_model_payload(record.model_payload.as_deref());
        if let PayloadParse::Malformed(reason) = &payload {
            warn!(
                source_index = record.source_index,
                timestamp = %record.timestamp,
                reason = %reason,
                "Could not parse model payload; using original bids"
            );
        }

        let candidates: Vec<Candidate> = normalized
            .entries()
            .iter()
            .map(|entry| Candidate {
                bidder_id: entry.bidder_id,
                original_bid: entry.bid,
                recalculated_bid: self.recalculator.recalculate(entry.bidder_id, payload.payload()),
                synthetic: entry.synthetic,
                win_type: None,
            })
            .collect();

        PreparedAuction {
            source_index: record.source_index,
            timestamp: record.timestamp.clone(),
            original_winner_id: record.original_winner_id,
            original_winning_bid: record.original_winning_bid,
            replayable,
            summary_malformed,
            payload_malformed: payload.is_malformed(),
            ranking: rank(&candidates),
            candidates,
            original_summary: record.raw_summary.clone(),
        }
    }

    /// Pick the highest ranked affordable bidder, debit it, and label candidates.
    pub fn settle(&self, prepared: PreparedAuction, ledger: &mut BudgetLedger) -> AuctionOutcome {
        let PreparedAuction {
            source_index,
            timestamp,
            original_winner_id,
            original_winning_bid,
            replayable,
            summary_malformed,
            payload_malformed,
            mut candidates,
            ranking,
            original_summary,
        } = prepared;

        if !replayable {
            return AuctionOutcome {
                source_index,
                timestamp,
                status: OutcomeStatus::Skipped,
                original_winner_id,
                original_winning_bid,
                candidates,
                ranking,
                winner: None,
                summary_malformed,
                payload_malformed,
                original_summary,
            };
        }

        let mut winner = None;
        for &pos in &ranking {
            let candidate = &candidates[pos];
            let Some(amount) = candidate.effective_bid() else {
                continue;
            };
            if let Some(budget_before) = ledger.try_debit(candidate.bidder_id, amount) {
                winner = Some(Winner {
                    candidate: pos,
                    bidder_id: candidate.bidder_id,
                    amount,
                    budget_before,
                });
                break;
            }
        }

        match winner {
            Some(w) => debug!(source_index, bidder = %w.bidder_id, amount = w.amount, "Auction sold"),
            None => debug!(source_index, candidates = candidates.len(), "Auction unsold"),
        }

        classify(&mut candidates, original_winner_id, winner.map(|w| w.bidder_id));

        AuctionOutcome {
            source_index,
            timestamp,
            status: OutcomeStatus::Resolved,
            original_winner_id,
            original_winning_bid,
            candidates,
            ranking,
            winner,
            summary_malformed,
            payload_malformed,
            original_summary: None,
        }
    }
}

/// Positions of candidates with a numeric bid, highest bid first.
/// Equal bids keep candidate order.
pub fn rank(candidates: &[Candidate]) -> Vec<usize> {
    let mut ranked: Vec<(usize, f64)> = candidates
        .iter()
        .enumerate()
        .filter_map(|(pos, c)| c.effective_bid().map(|bid| (pos, bid)))
        .collect();
    ranked.sort_by(|a, b| OrderedFloat(b.1).cmp(&OrderedFloat(a.1)));
    ranked.into_iter().map(|(pos, _)| pos).collect()
}

/// Label each candidate against the original and new winners.
pub fn classify(candidates: &mut [Candidate], original: Option<BidderId>, new: Option<BidderId>) {
    for candidate in candidates.iter_mut() {
        candidate.win_type = match new {
            None => Some(WinType::UnsoldNoBudget),
            Some(new_id) => {
                let is_og = original == Some(candidate.bidder_id);
                let is_new = new_id == candidate.bidder_id;
                match (is_og, is_new) {
                    (true, true) => Some(WinType::OgAndNewWinner),
                    (true, false) => Some(WinType::OgWinner),
                    (false, true) => Some(WinType::NewWinner),
                    (false, false) => None,
                }
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use replay_core::PartnerInfo;

    fn make_partners(entries: &[(i64, f64, f64)]) -> PartnerTable {
        PartnerTable::new(entries.iter().map(|&(id, target_cpa, budget)| PartnerInfo {
            bidder_id: BidderId(id),
            target_cpa: Some(target_cpa),
            initial_budget: Some(budget),
        }))
    }

    fn make_record(summary: Option<&str>, winner: i64, bid: f64, payload: &str) -> AuctionRecord {
        AuctionRecord {
            source_index: 0,
            timestamp: AuctionTime::parse("2025-01-01 00:00:00"),
            lead_id: None,
            original_winner_id: Some(BidderId(winner)),
            original_winning_bid: NumericField::Value(bid),
            raw_summary: summary.map(str::to_string),
            model_payload: Some(payload.to_string()),
        }
    }

    fn labels(outcome: &AuctionOutcome) -> Vec<(i64, Option<WinType>)> {
        outcome
            .candidates
            .iter()
            .map(|c| (c.bidder_id.0, c.win_type))
            .collect()
    }

    #[test]
    fn test_highest_affordable_bid_wins() {
        let partners = make_partners(&[(1, 10.0, 100.0), (2, 10.0, 100.0)]);
        let mut ledger = BudgetLedger::from_partners(&partners);
        let resolver = AuctionResolver::new(&partners);

        let record = make_record(
            Some("[{'BID': 20, 'BROKER_ID': 1}, {'BID': 30, 'BROKER_ID': 2}]"),
            2,
            30.0,
            "{}",
        );
        let outcome = resolver.resolve(&record, &mut ledger);

        let winner = outcome.winner.unwrap();
        assert_eq!(winner.bidder_id, BidderId(2));
        assert_relative_eq!(winner.amount, 30.0);
        assert_relative_eq!(winner.budget_before, 100.0);
        assert_relative_eq!(ledger.remaining(BidderId(2)).unwrap(), 70.0);
        assert_relative_eq!(ledger.remaining(BidderId(1)).unwrap(), 100.0);
        assert_eq!(
            labels(&outcome),
            vec![
                (1, None),
                (2, Some(WinType::OgAndNewWinner)),
                (2, Some(WinType::OgAndNewWinner)),
            ]
        );
    }

    #[test]
    fn test_recalculated_bids_change_the_winner() {
        // Bidder 1 doubles its bid via the model: 20 / 10 * 20 = 40.
        let partners = make_partners(&[(1, 20.0, 100.0), (2, 10.0, 100.0)]);
        let mut ledger = BudgetLedger::from_partners(&partners);
        let resolver = AuctionResolver::new(&partners);

        let record = make_record(
            Some(r#"[{"BID": 20, "BROKER_ID": 1}]"#),
            2,
            30.0,
            r#"{"bids": {"1": {"bid_value": 20, "cpa_target": 10}}}"#,
        );
        let outcome = resolver.resolve(&record, &mut ledger);

        assert_eq!(outcome.winner.unwrap().bidder_id, BidderId(1));
        assert_relative_eq!(outcome.candidates[0].recalculated_bid.unwrap(), 40.0);
        assert_relative_eq!(ledger.remaining(BidderId(1)).unwrap(), 60.0);
        assert_eq!(
            labels(&outcome),
            vec![(1, Some(WinType::NewWinner)), (2, Some(WinType::OgWinner))]
        );
        assert!(outcome.winner_changed());
    }

    #[test]
    fn test_zero_cpa_target_ranks_on_original_bid() {
        // cpa_target 0 cannot be rescaled, so bidder 1 competes with its recorded 25.
        let partners = make_partners(&[(1, 20.0, 100.0), (2, 10.0, 100.0)]);
        let mut ledger = BudgetLedger::from_partners(&partners);
        let resolver = AuctionResolver::new(&partners);

        let record = make_record(
            Some(r#"[{"BID": 25, "BROKER_ID": 1}]"#),
            2,
            15.0,
            r#"{"bids": {"1": {"bid_value": 20, "cpa_target": 0}}}"#,
        );
        let outcome = resolver.resolve(&record, &mut ledger);

        assert_eq!(outcome.candidates[0].recalculated_bid, None);
        let winner = outcome.winner.unwrap();
        assert_eq!(winner.bidder_id, BidderId(1));
        assert_relative_eq!(winner.amount, 25.0);
        assert_relative_eq!(ledger.remaining(BidderId(1)).unwrap(), 75.0);
        assert_eq!(
            labels(&outcome),
            vec![(1, Some(WinType::NewWinner)), (2, Some(WinType::OgWinner))]
        );
    }

    #[test]
    fn test_skips_unaffordable_and_unknown_bidders() {
        // 9 has no partner info, 1 cannot afford its bid, 2 wins with the lowest bid.
        let partners = make_partners(&[(1, 10.0, 5.0), (2, 10.0, 100.0)]);
        let mut ledger = BudgetLedger::from_partners(&partners);
        let resolver = AuctionResolver::new(&partners);

        let record = make_record(
            Some(r#"[{"BID": 99, "BROKER_ID": 9}, {"BID": 50, "BROKER_ID": 1}, {"BID": 10, "BROKER_ID": 2}]"#),
            9,
            99.0,
            "{}",
        );
        let outcome = resolver.resolve(&record, &mut ledger);

        assert_eq!(outcome.ranking, vec![0, 3, 1, 2]);
        assert_eq!(outcome.winner.unwrap().bidder_id, BidderId(2));
        assert_eq!(ledger.remaining(BidderId(1)), Some(5.0));
        assert!(!ledger.contains(BidderId(9)));
    }

    #[test]
    fn test_no_winner_labels_everyone_unsold() {
        let partners = make_partners(&[(1, 10.0, 5.0)]);
        let mut ledger = BudgetLedger::from_partners(&partners);
        let resolver = AuctionResolver::new(&partners);

        let record = make_record(
            Some(r#"[{"BID": 50, "BROKER_ID": 1}, {"BID": "bad", "BROKER_ID": 2}]"#),
            1,
            50.0,
            "{}",
        );
        let outcome = resolver.resolve(&record, &mut ledger);

        assert!(outcome.winner.is_none());
        assert!(outcome.is_unsold());
        assert!(outcome
            .candidates
            .iter()
            .all(|c| c.win_type == Some(WinType::UnsoldNoBudget)));
        // Non-numeric bid is not ranked at all.
        assert_eq!(outcome.ranking, vec![0, 2]);
        assert_eq!(ledger.remaining(BidderId(1)), Some(5.0));
    }

    #[test]
    fn test_malformed_summary_uses_recorded_winner() {
        let partners = make_partners(&[(1, 10.0, 100.0)]);
        let mut ledger = BudgetLedger::from_partners(&partners);
        let resolver = AuctionResolver::new(&partners);

        let record = make_record(Some("[{'BID': "), 1, 12.0, "not json");
        let outcome = resolver.resolve(&record, &mut ledger);

        assert_eq!(outcome.status, OutcomeStatus::Resolved);
        assert!(outcome.summary_malformed);
        assert!(outcome.payload_malformed);
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.winner.unwrap().bidder_id, BidderId(1));
        assert_relative_eq!(ledger.remaining(BidderId(1)).unwrap(), 88.0);
    }

    #[test]
    fn test_absent_summary_is_skipped() {
        let partners = make_partners(&[(1, 10.0, 100.0)]);
        let mut ledger = BudgetLedger::from_partners(&partners);
        let resolver = AuctionResolver::new(&partners);

        let record = make_record(None, 1, 12.0, "{}");
        let outcome = resolver.resolve(&record, &mut ledger);

        assert_eq!(outcome.status, OutcomeStatus::Skipped);
        assert!(outcome.winner.is_none());
        assert!(!outcome.is_unsold());
        assert_eq!(ledger.remaining(BidderId(1)), Some(100.0));
        assert_eq!(ledger.debits, 0);
    }

    #[test]
    fn test_rank_is_stable_for_ties() {
        let make = |id: i64, bid: f64| Candidate {
            bidder_id: BidderId(id),
            original_bid: NumericField::Value(bid),
            recalculated_bid: None,
            synthetic: false,
            win_type: None,
        };
        let candidates = vec![make(1, 5.0), make(2, 7.0), make(3, 5.0), make(4, 7.0)];
        assert_eq!(rank(&candidates), vec![1, 3, 0, 2]);
    }

    #[test]
    fn test_classify_three_candidates() {
        let make = |id: i64| Candidate {
            bidder_id: BidderId(id),
            original_bid: NumericField::Value(1.0),
            recalculated_bid: None,
            synthetic: false,
            win_type: None,
        };
        let mut candidates = vec![make(1), make(2), make(3)];

        classify(&mut candidates, Some(BidderId(1)), Some(BidderId(1)));
        assert_eq!(candidates[0].win_type, Some(WinType::OgAndNewWinner));
        assert_eq!(candidates[1].win_type, None);
        assert_eq!(candidates[2].win_type, None);

        classify(&mut candidates, Some(BidderId(1)), None);
        assert!(candidates.iter().all(|c| c.win_type == Some(WinType::UnsoldNoBudget)));
    }
}
