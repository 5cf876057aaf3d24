//! Virtual-currency ledger.
//!
//! Append-only transaction log plus a cached per-participant balance. The
//! log is the source of truth for audits; the cached field is the fast path
//! for spend checks and is only ever written in the same transaction as a
//! log row, so the two can always be reconciled.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{BalanceSummary, LedgerTransaction, TransactionType};
use crate::storage::ContestStorage;

#[derive(Clone)]
pub struct Ledger {
    store: Arc<ContestStorage>,
}

impl Ledger {
    pub fn new(store: Arc<ContestStorage>) -> Self {
        Self { store }
    }

    /// Credit a participant. Fails with InvalidAmount unless amount > 0.
    pub fn grant(
        &self,
        participant_id: Uuid,
        amount: i64,
        tx_type: TransactionType,
        description: &str,
        wager_id: Option<Uuid>,
    ) -> Result<Uuid> {
        let id = self
            .store
            .grant(participant_id, amount, tx_type, description, wager_id)?;
        info!(
            "Granted {} bucks to {} ({})",
            amount,
            participant_id,
            tx_type.as_str()
        );
        Ok(id)
    }

    /// Debit a participant. The balance check and decrement are atomic, so
    /// concurrent debits cannot overdraw; fails with InsufficientFunds and
    /// writes nothing when the balance does not cover the amount.
    pub fn debit(
        &self,
        participant_id: Uuid,
        amount: i64,
        tx_type: TransactionType,
        description: &str,
        wager_id: Option<Uuid>,
    ) -> Result<Uuid> {
        let id = self
            .store
            .debit(participant_id, amount, tx_type, description, wager_id)?;
        info!(
            "Debited {} bucks from {} ({})",
            amount,
            participant_id,
            tx_type.as_str()
        );
        Ok(id)
    }

    /// One debit plus one grant in a single transaction; both or neither.
    pub fn transfer(&self, from: Uuid, to: Uuid, amount: i64, note: &str) -> Result<(Uuid, Uuid)> {
        let ids = self.store.transfer(from, to, amount, note)?;
        info!("Transferred {} bucks from {} to {}", amount, from, to);
        Ok(ids)
    }

    pub fn balance(&self, participant_id: Uuid) -> Result<BalanceSummary> {
        self.store.balance_summary(participant_id)
    }

    pub fn history(
        &self,
        participant_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<LedgerTransaction>> {
        self.store.history(participant_id, limit, offset)
    }

    /// Audit check: the cached balance must equal the signed sum of the log.
    pub fn is_reconciled(&self, participant_id: Uuid) -> Result<bool> {
        let summary = self.store.balance_summary(participant_id)?;
        Ok(summary.balance == summary.total_earned - summary.total_spent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::models::Role;

    fn ledger_with_participant(balance: i64) -> (Ledger, Uuid) {
        let store = Arc::new(ContestStorage::in_memory().unwrap());
        let group = store.create_group("g").unwrap();
        let participant = store
            .create_participant(group.id, "p", Role::Standard, balance)
            .unwrap();
        (Ledger::new(store), participant.id)
    }

    #[test]
    fn grant_rejects_non_positive_amounts() {
        let (ledger, participant) = ledger_with_participant(0);
        for amount in [0, -5] {
            let err = ledger
                .grant(
                    participant,
                    amount,
                    TransactionType::AdminGrant,
                    "nope",
                    None,
                )
                .unwrap_err();
            assert!(matches!(err, EngineError::InvalidAmount(_)));
        }
    }

    #[test]
    fn ledger_stays_reconciled() {
        let (ledger, participant) = ledger_with_participant(200);
        ledger
            .grant(participant, 40, TransactionType::AdminGrant, "bonus", None)
            .unwrap();
        ledger
            .debit(participant, 100, TransactionType::BetPlaced, "stake", None)
            .unwrap();
        assert!(ledger.is_reconciled(participant).unwrap());
        assert_eq!(ledger.balance(participant).unwrap().balance, 140);
    }

    #[test]
    fn history_pages_newest_first() {
        let (ledger, participant) = ledger_with_participant(0);
        for i in 1..=5 {
            ledger
                .grant(
                    participant,
                    i,
                    TransactionType::AdminGrant,
                    &format!("grant {i}"),
                    None,
                )
                .unwrap();
        }

        let page = ledger.history(participant, 2, 0).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].amount, 5);
        assert_eq!(page[1].amount, 4);

        let next = ledger.history(participant, 2, 2).unwrap();
        assert_eq!(next[0].amount, 3);
        assert_eq!(next[1].amount, 2);
    }
}
