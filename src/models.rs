//! Domain types shared across the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// PARTICIPANTS & GROUPS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Standard,
    Organizer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Standard => "standard",
            Role::Organizer => "organizer",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "standard" => Some(Role::Standard),
            "organizer" => Some(Role::Organizer),
            _ => None,
        }
    }
}

/// The membership scope that owns balances and contests (one per trip,
/// league, club, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContestGroup {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// One member of a group. A participant row models the user-within-group
/// membership, so the cached balance is already scoped to the group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: Uuid,
    pub group_id: Uuid,
    pub display_name: String,
    pub role: Role,
    pub balance: i64,
    pub created_at: DateTime<Utc>,
}

impl Participant {
    pub fn is_organizer(&self) -> bool {
        self.role == Role::Organizer
    }
}

// ============================================================================
// CONTESTS
// ============================================================================

/// Strict forward-only phase sequence. Transitions are validated in the
/// engine; this enum only knows the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContestPhase {
    Setup,
    Open,
    Scoring,
    Reveal,
    Complete,
}

impl ContestPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContestPhase::Setup => "setup",
            ContestPhase::Open => "open",
            ContestPhase::Scoring => "scoring",
            ContestPhase::Reveal => "reveal",
            ContestPhase::Complete => "complete",
        }
    }

    pub fn parse(s: &str) -> Option<ContestPhase> {
        match s {
            "setup" => Some(ContestPhase::Setup),
            "open" => Some(ContestPhase::Open),
            "scoring" => Some(ContestPhase::Scoring),
            "reveal" => Some(ContestPhase::Reveal),
            "complete" => Some(ContestPhase::Complete),
            _ => None,
        }
    }

    /// The only legal transition target from this phase.
    pub fn next(&self) -> Option<ContestPhase> {
        match self {
            ContestPhase::Setup => Some(ContestPhase::Open),
            ContestPhase::Open => Some(ContestPhase::Scoring),
            ContestPhase::Scoring => Some(ContestPhase::Reveal),
            ContestPhase::Reveal => Some(ContestPhase::Complete),
            ContestPhase::Complete => None,
        }
    }

    /// Entries are disclosed at full detail from reveal onward.
    pub fn is_revealed(&self) -> bool {
        *self >= ContestPhase::Reveal
    }
}

/// Caller-supplied settings for a new contest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContestSettings {
    pub title: String,
    pub price_min_cents: Option<i64>,
    pub price_max_cents: Option<i64>,
    pub entries_per_participant: u32,
    pub pot_size: i64,
    pub allow_cash_bets: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contest {
    pub id: Uuid,
    pub group_id: Uuid,
    pub title: String,
    pub phase: ContestPhase,
    pub price_min_cents: Option<i64>,
    pub price_max_cents: Option<i64>,
    pub entries_per_participant: u32,
    pub pot_size: i64,
    pub allow_cash_bets: bool,
    pub revealed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// ENTRIES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub id: Uuid,
    pub contest_id: Uuid,
    pub participant_id: Uuid,
    pub label: String,
    pub description: Option<String>,
    pub price_cents: Option<i64>,
    pub bag_number: Option<u32>,
    pub is_revealed: bool,
    pub final_placement: Option<u32>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// SCORES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryRating {
    pub entry_id: Uuid,
    /// 1-5.
    pub rating: u8,
    pub notes: Option<String>,
}

/// One judge's blind assessment: a ranked top 3 plus per-entry ratings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Score {
    pub id: Uuid,
    pub contest_id: Uuid,
    pub participant_id: Uuid,
    pub first_entry_id: Uuid,
    pub second_entry_id: Uuid,
    pub third_entry_id: Uuid,
    pub ratings: Vec<EntryRating>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// WAGERS
// ============================================================================

/// A prediction of the final top-3 order, staked with bucks and/or cash.
/// Resolution fields stay None until the contest reveals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wager {
    pub id: Uuid,
    pub contest_id: Uuid,
    pub participant_id: Uuid,
    pub first_pick: Uuid,
    pub second_pick: Uuid,
    pub third_pick: Uuid,
    pub stake_bucks: i64,
    pub stake_cash_cents: i64,
    pub is_correct: Option<bool>,
    pub bucks_won: Option<i64>,
    pub cash_won_cents: Option<i64>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// LEDGER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    InitialGrant,
    BetPlaced,
    BetWon,
    BetLost,
    AdminGrant,
    ContestAward,
    Transfer,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::InitialGrant => "INITIAL_GRANT",
            TransactionType::BetPlaced => "BET_PLACED",
            TransactionType::BetWon => "BET_WON",
            TransactionType::BetLost => "BET_LOST",
            TransactionType::AdminGrant => "ADMIN_GRANT",
            TransactionType::ContestAward => "CONTEST_AWARD",
            TransactionType::Transfer => "TRANSFER",
        }
    }

    pub fn parse(s: &str) -> Option<TransactionType> {
        match s {
            "INITIAL_GRANT" => Some(TransactionType::InitialGrant),
            "BET_PLACED" => Some(TransactionType::BetPlaced),
            "BET_WON" => Some(TransactionType::BetWon),
            "BET_LOST" => Some(TransactionType::BetLost),
            "ADMIN_GRANT" => Some(TransactionType::AdminGrant),
            "CONTEST_AWARD" => Some(TransactionType::ContestAward),
            "TRANSFER" => Some(TransactionType::Transfer),
            _ => None,
        }
    }
}

/// Immutable record of one balance change. Never edited or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: Uuid,
    pub participant_id: Uuid,
    pub group_id: Uuid,
    pub amount: i64,
    pub tx_type: TransactionType,
    pub description: String,
    pub wager_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceSummary {
    pub balance: i64,
    pub total_earned: i64,
    pub total_spent: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardRow {
    pub rank: u32,
    pub participant_id: Uuid,
    pub display_name: String,
    pub balance: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_order_is_strictly_forward() {
        let mut phase = ContestPhase::Setup;
        let mut seen = vec![phase];
        while let Some(next) = phase.next() {
            assert!(next > phase);
            phase = next;
            seen.push(phase);
        }
        assert_eq!(seen.len(), 5);
        assert_eq!(phase, ContestPhase::Complete);
    }

    #[test]
    fn phase_round_trips_through_strings() {
        for phase in [
            ContestPhase::Setup,
            ContestPhase::Open,
            ContestPhase::Scoring,
            ContestPhase::Reveal,
            ContestPhase::Complete,
        ] {
            assert_eq!(ContestPhase::parse(phase.as_str()), Some(phase));
        }
        assert_eq!(ContestPhase::parse("judging"), None);
    }

    #[test]
    fn tx_type_round_trips_through_strings() {
        for tx in [
            TransactionType::InitialGrant,
            TransactionType::BetPlaced,
            TransactionType::BetWon,
            TransactionType::BetLost,
            TransactionType::AdminGrant,
            TransactionType::ContestAward,
            TransactionType::Transfer,
        ] {
            assert_eq!(TransactionType::parse(tx.as_str()), Some(tx));
        }
    }
}
