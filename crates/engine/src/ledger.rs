//! Budget ledger for replay.
//!
//! Tracks each bidder's remaining budget across the whole replay. Balances
//! only move through [`BudgetLedger::try_debit`], by the amount of a bid that
//! just won.

use std::collections::HashMap;

use ordered_float::OrderedFloat;
use replay_core::{BidderId, LedgerEntry, PartnerTable};

/// Per-bidder debit history.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BidderSpend {
    /// Auctions won.
    pub wins: u32,
    /// Total amount debited.
    pub spent: f64,
}

/// Remaining budget per bidder.
#[derive(Debug, Clone, Default)]
pub struct BudgetLedger {
    remaining: HashMap<BidderId, f64>,
    initial: HashMap<BidderId, f64>,
    spend: HashMap<BidderId, BidderSpend>,
    /// Total debited across all bidders.
    pub total_debited: f64,
    /// Number of debits applied.
    pub debits: u64,
}

impl BudgetLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the ledger from partner budgets. Partners without a budget are left out.
    pub fn from_partners(partners: &PartnerTable) -> Self {
        let mut ledger = Self::new();
        for partner in partners.iter() {
            if let Some(budget) = partner.initial_budget {
                ledger.open_account(partner.bidder_id, budget);
            }
        }
        ledger
    }

    /// Open an account with a starting budget, replacing any previous one.
    pub fn open_account(&mut self, bidder_id: BidderId, budget: f64) {
        self.remaining.insert(bidder_id, budget);
        self.initial.insert(bidder_id, budget);
        self.spend.remove(&bidder_id);
    }

    /// Whether the bidder has an account.
    pub fn contains(&self, bidder_id: BidderId) -> bool {
        self.remaining.contains_key(&bidder_id)
    }

    /// Remaining budget, `None` if the bidder has no account.
    pub fn remaining(&self, bidder_id: BidderId) -> Option<f64> {
        self.remaining.get(&bidder_id).copied()
    }

    /// Starting budget, `None` if the bidder has no account.
    pub fn initial(&self, bidder_id: BidderId) -> Option<f64> {
        self.initial.get(&bidder_id).copied()
    }

    /// Debit history of a bidder.
    pub fn spend(&self, bidder_id: BidderId) -> BidderSpend {
        self.spend.get(&bidder_id).copied().unwrap_or_default()
    }

    /// Whether the bidder could pay `amount` right now.
    pub fn can_afford(&self, bidder_id: BidderId, amount: f64) -> bool {
        match self.remaining.get(&bidder_id) {
            Some(&remaining) => amount.is_finite() && amount >= 0.0 && amount <= remaining,
            None => false,
        }
    }

    /// Debit a winning bid if the bidder can afford it.
    ///
    /// Returns the remaining budget before the debit, or `None` (ledger
    /// untouched) when the bidder has no account or too little budget.
    pub fn try_debit(&mut self, bidder_id: BidderId, amount: f64) -> Option<f64> {
        if !self.can_afford(bidder_id, amount) {
            return None;
        }
        let remaining = self.remaining.get_mut(&bidder_id)?;
        let before = *remaining;
        *remaining -= amount;

        let spend = self.spend.entry(bidder_id).or_default();
        spend.wins += 1;
        spend.spent += amount;
        self.total_debited += amount;
        self.debits += 1;
        Some(before)
    }

    /// Number of accounts.
    pub fn len(&self) -> usize {
        self.remaining.len()
    }

    pub fn is_empty(&self) -> bool {
        self.remaining.is_empty()
    }

    /// All accounts, most remaining budget first; ties by bidder id.
    pub fn snapshot(&self) -> Vec<LedgerEntry> {
        let mut entries: Vec<LedgerEntry> = self
            .remaining
            .iter()
            .map(|(&partner_id, &remaining_budget)| LedgerEntry {
                partner_id,
                remaining_budget,
            })
            .collect();
        entries.sort_by(|a, b| {
            OrderedFloat(b.remaining_budget)
                .cmp(&OrderedFloat(a.remaining_budget))
                .then(a.partner_id.cmp(&b.partner_id))
        });
        entries
    }

    /// The `n` accounts with the most remaining budget.
    pub fn top(&self, n: usize) -> Vec<LedgerEntry> {
        let mut entries = self.snapshot();
        entries.truncate(n);
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use replay_core::PartnerInfo;

    fn make_ledger() -> BudgetLedger {
        let mut ledger = BudgetLedger::new();
        ledger.open_account(BidderId(1), 80.0);
        ledger.open_account(BidderId(2), 10.0);
        ledger
    }

    #[test]
    fn test_from_partners_skips_missing_budget() {
        let partners = PartnerTable::new(vec![
            PartnerInfo { bidder_id: BidderId(1), target_cpa: Some(1.0), initial_budget: Some(5.0) },
            PartnerInfo { bidder_id: BidderId(2), target_cpa: Some(1.0), initial_budget: None },
        ]);
        let ledger = BudgetLedger::from_partners(&partners);
        assert_eq!(ledger.len(), 1);
        assert!(ledger.contains(BidderId(1)));
        assert!(!ledger.contains(BidderId(2)));
    }

    #[test]
    fn test_debit_within_budget() {
        let mut ledger = make_ledger();
        let before = ledger.try_debit(BidderId(1), 50.0);
        assert_eq!(before, Some(80.0));
        assert_relative_eq!(ledger.remaining(BidderId(1)).unwrap(), 30.0);
        assert_eq!(ledger.spend(BidderId(1)), BidderSpend { wins: 1, spent: 50.0 });
        assert_eq!(ledger.debits, 1);
    }

    #[test]
    fn test_debit_exact_budget() {
        let mut ledger = make_ledger();
        assert_eq!(ledger.try_debit(BidderId(2), 10.0), Some(10.0));
        assert_eq!(ledger.remaining(BidderId(2)), Some(0.0));
        assert!(!ledger.can_afford(BidderId(2), 0.01));
        assert!(ledger.can_afford(BidderId(2), 0.0));
    }

    #[test]
    fn test_refused_debits_leave_ledger_untouched() {
        let mut ledger = make_ledger();
        assert_eq!(ledger.try_debit(BidderId(2), 10.5), None);
        assert_eq!(ledger.try_debit(BidderId(3), 1.0), None);
        assert_eq!(ledger.try_debit(BidderId(1), -5.0), None);
        assert_eq!(ledger.try_debit(BidderId(1), f64::NAN), None);
        assert_eq!(ledger.remaining(BidderId(1)), Some(80.0));
        assert_eq!(ledger.remaining(BidderId(2)), Some(10.0));
        assert_eq!(ledger.debits, 0);
    }

    #[test]
    fn test_snapshot_order() {
        let mut ledger = make_ledger();
        ledger.open_account(BidderId(0), 10.0);
        let ids: Vec<i64> = ledger.snapshot().iter().map(|e| e.partner_id.0).collect();
        assert_eq!(ids, vec![1, 0, 2]);
        assert_eq!(ledger.top(1).len(), 1);
        assert_eq!(ledger.top(1)[0].partner_id, BidderId(1));
    }
}
