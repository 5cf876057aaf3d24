//! Wager resolution rules.
//!
//! A wager wins when at least two of its three predicted placements match
//! the actual podium at the exact position. Winners are paid a fixed
//! multiple of each stake kind; losers forfeit the stake debited at
//! placement time.

use serde::Serialize;
use uuid::Uuid;

use crate::models::Wager;
use crate::scoring::Podium;

/// Exact-position matches required to win.
pub const WIN_THRESHOLD: u32 = 2;

/// Payout multiplier applied to both stake kinds on a win.
pub const PAYOUT_MULTIPLIER: i64 = 3;

#[derive(Debug, Clone, Serialize)]
pub struct WagerOutcome {
    pub wager_id: Uuid,
    pub participant_id: Uuid,
    pub correct_picks: u32,
    pub is_correct: bool,
    pub bucks_won: i64,
    pub cash_won_cents: i64,
}

/// Match one wager against the actual podium. Position-exact: a predicted
/// entry sitting elsewhere in the top 3 does not count.
pub fn resolve(wager: &Wager, podium: &Podium) -> WagerOutcome {
    let picks = [wager.first_pick, wager.second_pick, wager.third_pick];
    let actual = [podium.first, podium.second, podium.third];

    let correct_picks = picks
        .iter()
        .zip(actual.iter())
        .filter(|(pick, slot)| **slot == Some(**pick))
        .count() as u32;

    let is_correct = correct_picks >= WIN_THRESHOLD;
    let (bucks_won, cash_won_cents) = if is_correct {
        (
            wager.stake_bucks * PAYOUT_MULTIPLIER,
            wager.stake_cash_cents * PAYOUT_MULTIPLIER,
        )
    } else {
        (0, 0)
    };

    WagerOutcome {
        wager_id: wager.id,
        participant_id: wager.participant_id,
        correct_picks,
        is_correct,
        bucks_won,
        cash_won_cents,
    }
}
