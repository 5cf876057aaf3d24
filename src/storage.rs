//! SQLite-backed persistent store.
//!
//! All engine state lives here. The connection sits behind a mutex and every
//! multi-row invariant (ledger debits, bag assignment, score upserts, the
//! reveal) runs inside a single SQL transaction, so the phase flip, balance
//! compare-and-set, and payout writes are atomic under concurrent callers.

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::migrations::Migrator;
use crate::models::{
    BalanceSummary, Contest, ContestGroup, ContestPhase, ContestSettings, Entry, EntryRating,
    LedgerTransaction, Participant, Role, Score, TransactionType, Wager,
};
use crate::scoring::{self, Podium, Standing};
use crate::wagers::{self, WagerOutcome};

/// Everything the reveal transaction computed and persisted, returned to the
/// caller for reporting and event emission.
#[derive(Debug, Clone, Serialize)]
pub struct RevealOutcome {
    pub contest: Contest,
    pub standings: Vec<Standing>,
    pub podium: Podium,
    pub wager_outcomes: Vec<WagerOutcome>,
    pub pot_awarded_to: Option<Uuid>,
}

const CONTEST_COLS: &str = "id, group_id, title, phase, price_min_cents, price_max_cents, \
     entries_per_participant, pot_size, allow_cash_bets, revealed_at, created_at";
const ENTRY_COLS: &str = "id, contest_id, participant_id, label, description, price_cents, \
     bag_number, is_revealed, final_placement, created_at";
const WAGER_COLS: &str = "id, contest_id, participant_id, first_pick, second_pick, third_pick, \
     stake_bucks, stake_cash_cents, is_correct, bucks_won, cash_won_cents, created_at";
const LEDGER_COLS: &str =
    "id, participant_id, group_id, amount, tx_type, description, wager_id, created_at";

pub struct ContestStorage {
    conn: Mutex<Connection>,
}

impl ContestStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.run_migrations()?;
        Ok(storage)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock();
        Migrator::new().run(&conn)
    }

    // ========================================================================
    // GROUPS & PARTICIPANTS
    // ========================================================================

    pub fn create_group(&self, name: &str) -> Result<ContestGroup> {
        let conn = self.conn.lock();
        let group = ContestGroup {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        conn.execute(
            "INSERT INTO contest_groups (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![
                group.id.to_string(),
                group.name,
                group.created_at.to_rfc3339()
            ],
        )?;
        Ok(group)
    }

    pub fn get_group(&self, id: Uuid) -> Result<ContestGroup> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, name, created_at FROM contest_groups WHERE id = ?1",
            [id.to_string()],
            map_group,
        )
        .optional()?
        .ok_or_else(|| EngineError::not_found("contest group"))
    }

    /// Create a participant, seeding their balance with an INITIAL_GRANT
    /// row when `starting_balance > 0`. Both writes share one transaction so
    /// the cached balance always equals the transaction sum.
    pub fn create_participant(
        &self,
        group_id: Uuid,
        display_name: &str,
        role: Role,
        starting_balance: i64,
    ) -> Result<Participant> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let group_exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM contest_groups WHERE id = ?1)",
            [group_id.to_string()],
            |row| row.get(0),
        )?;
        if !group_exists {
            return Err(EngineError::not_found("contest group"));
        }

        let participant = Participant {
            id: Uuid::new_v4(),
            group_id,
            display_name: display_name.to_string(),
            role,
            balance: 0,
            created_at: Utc::now(),
        };
        tx.execute(
            "INSERT INTO participants (id, group_id, display_name, role, balance, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)",
            params![
                participant.id.to_string(),
                group_id.to_string(),
                participant.display_name,
                role.as_str(),
                participant.created_at.to_rfc3339()
            ],
        )?;

        let mut balance = 0;
        if starting_balance > 0 {
            grant_in_tx(
                &tx,
                participant.id,
                group_id,
                starting_balance,
                TransactionType::InitialGrant,
                "Welcome grant",
                None,
            )?;
            balance = starting_balance;
        }

        tx.commit()?;
        info!(
            "Added participant {} ({}) to group {}",
            participant.display_name,
            role.as_str(),
            group_id
        );
        Ok(Participant {
            balance,
            ..participant
        })
    }

    pub fn get_participant(&self, id: Uuid) -> Result<Participant> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, group_id, display_name, role, balance, created_at
             FROM participants WHERE id = ?1",
            [id.to_string()],
            map_participant,
        )
        .optional()?
        .ok_or_else(|| EngineError::not_found("participant"))
    }

    /// All participants of a group, ranked for the leaderboard: balance
    /// descending, participant id ascending on ties.
    pub fn list_participants(&self, group_id: Uuid) -> Result<Vec<Participant>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, group_id, display_name, role, balance, created_at
             FROM participants WHERE group_id = ?1
             ORDER BY balance DESC, id ASC",
        )?;
        let participants = stmt
            .query_map([group_id.to_string()], map_participant)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(participants)
    }

    // ========================================================================
    // CONTESTS
    // ========================================================================

    pub fn create_contest(&self, group_id: Uuid, settings: &ContestSettings) -> Result<Contest> {
        let conn = self.conn.lock();

        let group_exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM contest_groups WHERE id = ?1)",
            [group_id.to_string()],
            |row| row.get(0),
        )?;
        if !group_exists {
            return Err(EngineError::not_found("contest group"));
        }

        let contest = Contest {
            id: Uuid::new_v4(),
            group_id,
            title: settings.title.clone(),
            phase: ContestPhase::Setup,
            price_min_cents: settings.price_min_cents,
            price_max_cents: settings.price_max_cents,
            entries_per_participant: settings.entries_per_participant,
            pot_size: settings.pot_size,
            allow_cash_bets: settings.allow_cash_bets,
            revealed_at: None,
            created_at: Utc::now(),
        };
        conn.execute(
            &format!("INSERT INTO contests ({CONTEST_COLS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"),
            params![
                contest.id.to_string(),
                group_id.to_string(),
                contest.title,
                contest.phase.as_str(),
                contest.price_min_cents,
                contest.price_max_cents,
                contest.entries_per_participant,
                contest.pot_size,
                contest.allow_cash_bets,
                Option::<String>::None,
                contest.created_at.to_rfc3339()
            ],
        )?;
        info!("Created contest '{}' in group {}", contest.title, group_id);
        Ok(contest)
    }

    pub fn get_contest(&self, id: Uuid) -> Result<Contest> {
        let conn = self.conn.lock();
        get_contest_conn(&conn, id)
    }

    pub fn list_contests(&self, group_id: Uuid) -> Result<Vec<Contest>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CONTEST_COLS} FROM contests WHERE group_id = ?1 ORDER BY created_at DESC"
        ))?;
        let contests = stmt
            .query_map([group_id.to_string()], map_contest)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(contests)
    }

    /// Compare-and-set phase flip. Exactly one concurrent caller can move a
    /// contest from `from` to `to`; losers see IllegalTransition.
    pub fn set_phase(&self, contest_id: Uuid, from: ContestPhase, to: ContestPhase) -> Result<Contest> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE contests SET phase = ?1 WHERE id = ?2 AND phase = ?3",
            params![to.as_str(), contest_id.to_string(), from.as_str()],
        )?;
        if changed == 0 {
            let contest = get_contest_conn(&conn, contest_id)?;
            return Err(EngineError::IllegalTransition(format!(
                "contest is in phase {}, expected {}",
                contest.phase.as_str(),
                from.as_str()
            )));
        }
        get_contest_conn(&conn, contest_id)
    }

    /// OPEN -> SCORING: requires at least 2 entries and leaves every entry
    /// bag-assigned. Phase flip, precondition check, and bag assignment
    /// commit together or not at all.
    pub fn advance_to_scoring(&self, contest_id: Uuid) -> Result<(Contest, Vec<Entry>)> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let changed = tx.execute(
            "UPDATE contests SET phase = ?1 WHERE id = ?2 AND phase = ?3",
            params![
                ContestPhase::Scoring.as_str(),
                contest_id.to_string(),
                ContestPhase::Open.as_str()
            ],
        )?;
        if changed == 0 {
            let contest = get_contest_conn(&tx, contest_id)?;
            return Err(EngineError::IllegalTransition(format!(
                "contest is in phase {}, expected open",
                contest.phase.as_str()
            )));
        }

        let entries = list_entries_conn(&tx, contest_id)?;
        if entries.len() < 2 {
            return Err(EngineError::InsufficientEntries {
                required: 2,
                found: entries.len(),
            });
        }

        assign_missing_bags_in_tx(&tx, &entries)?;
        let contest = get_contest_conn(&tx, contest_id)?;
        let entries = list_entries_conn(&tx, contest_id)?;
        tx.commit()?;

        info!(
            "Contest '{}' entered scoring with {} bagged entries",
            contest.title,
            entries.len()
        );
        Ok((contest, entries))
    }

    // ========================================================================
    // ENTRIES
    // ========================================================================

    /// Insert an entry. The phase gate and the per-participant cap are
    /// checked inside the transaction so concurrent submissions cannot
    /// overshoot the cap.
    pub fn insert_entry(
        &self,
        contest_id: Uuid,
        participant_id: Uuid,
        label: &str,
        description: Option<&str>,
        price_cents: Option<i64>,
    ) -> Result<Entry> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let contest = get_contest_conn(&tx, contest_id)?;
        if contest.phase != ContestPhase::Open {
            return Err(EngineError::IllegalTransition(format!(
                "entries are only accepted while the contest is open, not {}",
                contest.phase.as_str()
            )));
        }

        let existing: u32 = tx.query_row(
            "SELECT COUNT(*) FROM entries WHERE contest_id = ?1 AND participant_id = ?2",
            params![contest_id.to_string(), participant_id.to_string()],
            |row| row.get(0),
        )?;
        if existing >= contest.entries_per_participant {
            return Err(EngineError::conflict(format!(
                "entry limit of {} reached",
                contest.entries_per_participant
            )));
        }

        let entry = Entry {
            id: Uuid::new_v4(),
            contest_id,
            participant_id,
            label: label.to_string(),
            description: description.map(str::to_string),
            price_cents,
            bag_number: None,
            is_revealed: false,
            final_placement: None,
            created_at: Utc::now(),
        };
        tx.execute(
            &format!("INSERT INTO entries ({ENTRY_COLS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?9)"),
            params![
                entry.id.to_string(),
                contest_id.to_string(),
                participant_id.to_string(),
                entry.label,
                entry.description,
                entry.price_cents,
                Option::<u32>::None,
                Option::<u32>::None,
                entry.created_at.to_rfc3339()
            ],
        )?;
        tx.commit()?;
        debug!("Entry '{}' submitted to contest {}", entry.label, contest_id);
        Ok(entry)
    }

    pub fn get_entry(&self, id: Uuid) -> Result<Entry> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {ENTRY_COLS} FROM entries WHERE id = ?1"),
            [id.to_string()],
            map_entry,
        )
        .optional()?
        .ok_or_else(|| EngineError::not_found("entry"))
    }

    pub fn list_entries(&self, contest_id: Uuid) -> Result<Vec<Entry>> {
        let conn = self.conn.lock();
        list_entries_conn(&conn, contest_id)
    }

    /// Edit an entry's descriptive fields. Only legal before bags exist;
    /// afterwards the label is part of the blind-scoring record.
    pub fn update_entry(
        &self,
        entry_id: Uuid,
        label: &str,
        description: Option<&str>,
        price_cents: Option<i64>,
    ) -> Result<Entry> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let entry = get_entry_conn(&tx, entry_id)?;
        let contest = get_contest_conn(&tx, entry.contest_id)?;
        if contest.phase > ContestPhase::Open {
            return Err(EngineError::IllegalTransition(
                "entries cannot change after scoring begins".to_string(),
            ));
        }
        if entry.bag_number.is_some() {
            return Err(EngineError::conflict("entry already has a bag number"));
        }

        tx.execute(
            "UPDATE entries SET label = ?1, description = ?2, price_cents = ?3 WHERE id = ?4",
            params![
                label,
                description,
                price_cents,
                entry_id.to_string()
            ],
        )?;
        let updated = get_entry_conn(&tx, entry_id)?;
        tx.commit()?;
        Ok(updated)
    }

    pub fn delete_entry(&self, entry_id: Uuid) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let entry = get_entry_conn(&tx, entry_id)?;
        let contest = get_contest_conn(&tx, entry.contest_id)?;
        if contest.phase > ContestPhase::Open {
            return Err(EngineError::IllegalTransition(
                "entries cannot be withdrawn after scoring begins".to_string(),
            ));
        }

        tx.execute("DELETE FROM entries WHERE id = ?1", [entry_id.to_string()])?;
        tx.commit()?;
        Ok(())
    }

    /// Apply a caller-supplied bag numbering. The numbering must be a
    /// permutation of 1..=N over exactly the given entries, and none of the
    /// targets may already carry a bag number.
    pub fn assign_bag_numbers(
        &self,
        contest_id: Uuid,
        assignments: &[(Uuid, u32)],
    ) -> Result<Vec<Entry>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let contest = get_contest_conn(&tx, contest_id)?;
        if contest.phase != ContestPhase::Open {
            return Err(EngineError::IllegalTransition(format!(
                "bags are assigned while the contest is open, not {}",
                contest.phase.as_str()
            )));
        }

        apply_bag_assignments_in_tx(&tx, contest_id, assignments)?;
        let entries = list_entries_conn(&tx, contest_id)?;
        tx.commit()?;
        info!(
            "Assigned {} bag numbers in contest {}",
            assignments.len(),
            contest_id
        );
        Ok(entries)
    }

    /// Assign a random permutation over all of the contest's entries.
    /// Fails with Conflict if any entry already carries a bag number, so
    /// two organizers racing the assignment produce exactly one numbering.
    pub fn assign_random_bags(&self, contest_id: Uuid) -> Result<Vec<Entry>> {
        use rand::seq::SliceRandom;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let contest = get_contest_conn(&tx, contest_id)?;
        if contest.phase != ContestPhase::Open {
            return Err(EngineError::IllegalTransition(format!(
                "bags are assigned while the contest is open, not {}",
                contest.phase.as_str()
            )));
        }

        let entries = list_entries_conn(&tx, contest_id)?;
        if entries.is_empty() {
            return Err(EngineError::validation("contest has no entries"));
        }

        let mut numbers: Vec<u32> = (1..=entries.len() as u32).collect();
        numbers.shuffle(&mut rand::thread_rng());
        let assignments: Vec<(Uuid, u32)> = entries
            .iter()
            .zip(numbers)
            .map(|(entry, bag)| (entry.id, bag))
            .collect();

        apply_bag_assignments_in_tx(&tx, contest_id, &assignments)?;
        let entries = list_entries_conn(&tx, contest_id)?;
        tx.commit()?;
        info!(
            "Assigned {} random bag numbers in contest {}",
            assignments.len(),
            contest_id
        );
        Ok(entries)
    }

    // ========================================================================
    // SCORES
    // ========================================================================

    /// Upsert a judge's score: one row per (contest, participant), last
    /// write wins for the whole rankings + ratings payload.
    pub fn upsert_score(
        &self,
        contest_id: Uuid,
        participant_id: Uuid,
        rankings: (Uuid, Uuid, Uuid),
        ratings: &[EntryRating],
    ) -> Result<Score> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let contest = get_contest_conn(&tx, contest_id)?;
        if contest.phase != ContestPhase::Scoring {
            return Err(EngineError::IllegalTransition(format!(
                "scores are only accepted during scoring, not {}",
                contest.phase.as_str()
            )));
        }

        let (first, second, third) = rankings;
        if first == second || first == third || second == third {
            return Err(EngineError::validation(
                "rankings must reference three distinct entries",
            ));
        }
        for entry_id in [first, second, third] {
            require_bagged_entry(&tx, contest_id, entry_id)?;
        }
        for rating in ratings {
            if !(1..=5).contains(&rating.rating) {
                return Err(EngineError::validation(format!(
                    "rating {} is outside 1-5",
                    rating.rating
                )));
            }
            require_bagged_entry(&tx, contest_id, rating.entry_id)?;
        }

        let now = Utc::now();
        tx.execute(
            "INSERT INTO scores (id, contest_id, participant_id, first_entry_id,
                                 second_entry_id, third_entry_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             ON CONFLICT (contest_id, participant_id) DO UPDATE SET
                first_entry_id = excluded.first_entry_id,
                second_entry_id = excluded.second_entry_id,
                third_entry_id = excluded.third_entry_id,
                updated_at = excluded.updated_at",
            params![
                Uuid::new_v4().to_string(),
                contest_id.to_string(),
                participant_id.to_string(),
                first.to_string(),
                second.to_string(),
                third.to_string(),
                now.to_rfc3339()
            ],
        )?;

        let (score_id, created_at): (Uuid, DateTime<Utc>) = tx.query_row(
            "SELECT id, created_at FROM scores WHERE contest_id = ?1 AND participant_id = ?2",
            params![contest_id.to_string(), participant_id.to_string()],
            |row| Ok((uuid_col(row, 0)?, ts_col(row, 1)?)),
        )?;

        // Replace the ratings payload wholesale: last write wins.
        tx.execute(
            "DELETE FROM score_ratings WHERE score_id = ?1",
            [score_id.to_string()],
        )?;
        for rating in ratings {
            tx.execute(
                "INSERT INTO score_ratings (score_id, entry_id, rating, notes)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    score_id.to_string(),
                    rating.entry_id.to_string(),
                    rating.rating,
                    rating.notes
                ],
            )?;
        }

        tx.commit()?;
        debug!("Score recorded for contest {contest_id} by {participant_id}");
        Ok(Score {
            id: score_id,
            contest_id,
            participant_id,
            first_entry_id: first,
            second_entry_id: second,
            third_entry_id: third,
            ratings: ratings.to_vec(),
            created_at,
            updated_at: now,
        })
    }

    pub fn list_scores(&self, contest_id: Uuid) -> Result<Vec<Score>> {
        let conn = self.conn.lock();
        list_scores_conn(&conn, contest_id)
    }

    pub fn get_score(&self, contest_id: Uuid, participant_id: Uuid) -> Result<Option<Score>> {
        let scores = self.list_scores(contest_id)?;
        Ok(scores
            .into_iter()
            .find(|s| s.participant_id == participant_id))
    }

    // ========================================================================
    // WAGERS
    // ========================================================================

    /// Insert a wager and escrow its bucks stake (BET_PLACED) in one
    /// transaction. An insufficient balance rolls the wager back entirely.
    #[allow(clippy::too_many_arguments)]
    pub fn place_wager(
        &self,
        contest_id: Uuid,
        participant_id: Uuid,
        picks: (Uuid, Uuid, Uuid),
        stake_bucks: i64,
        stake_cash_cents: i64,
    ) -> Result<Wager> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let contest = get_contest_conn(&tx, contest_id)?;
        if contest.phase != ContestPhase::Scoring {
            return Err(EngineError::IllegalTransition(format!(
                "wagers are only accepted during scoring, not {}",
                contest.phase.as_str()
            )));
        }

        if stake_bucks < 0 || stake_cash_cents < 0 {
            return Err(EngineError::validation("stakes cannot be negative"));
        }
        if stake_bucks == 0 && stake_cash_cents == 0 {
            return Err(EngineError::validation("at least one stake must be positive"));
        }
        if stake_cash_cents > 0 && !contest.allow_cash_bets {
            return Err(EngineError::validation(
                "this contest does not allow cash side-bets",
            ));
        }

        let (first, second, third) = picks;
        if first == second || first == third || second == third {
            return Err(EngineError::validation(
                "predictions must reference three distinct entries",
            ));
        }
        for entry_id in [first, second, third] {
            require_bagged_entry(&tx, contest_id, entry_id)?;
        }

        let wager = Wager {
            id: Uuid::new_v4(),
            contest_id,
            participant_id,
            first_pick: first,
            second_pick: second,
            third_pick: third,
            stake_bucks,
            stake_cash_cents,
            is_correct: None,
            bucks_won: None,
            cash_won_cents: None,
            created_at: Utc::now(),
        };
        tx.execute(
            &format!("INSERT INTO wagers ({WAGER_COLS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"),
            params![
                wager.id.to_string(),
                contest_id.to_string(),
                participant_id.to_string(),
                first.to_string(),
                second.to_string(),
                third.to_string(),
                stake_bucks,
                stake_cash_cents,
                Option::<bool>::None,
                Option::<i64>::None,
                Option::<i64>::None,
                wager.created_at.to_rfc3339()
            ],
        )?;

        if stake_bucks > 0 {
            debit_in_tx(
                &tx,
                participant_id,
                stake_bucks,
                TransactionType::BetPlaced,
                &format!("Stake on '{}'", contest.title),
                Some(wager.id),
            )?;
        }

        tx.commit()?;
        info!(
            "Wager of {} bucks / {} cents placed on contest {}",
            stake_bucks, stake_cash_cents, contest_id
        );
        Ok(wager)
    }

    pub fn list_wagers(&self, contest_id: Uuid) -> Result<Vec<Wager>> {
        let conn = self.conn.lock();
        list_wagers_conn(&conn, contest_id)
    }

    // ========================================================================
    // REVEAL
    // ========================================================================

    /// The one-time SCORING -> REVEAL computation. The phase flip is a
    /// compare-and-set executed first inside the transaction: the caller
    /// that wins it tallies scores, assigns placements, awards the pot, and
    /// settles every wager; losers fail with IllegalTransition and nothing
    /// is written. Any error rolls the whole transaction back.
    pub fn reveal(&self, contest_id: Uuid) -> Result<RevealOutcome> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let revealed_at = Utc::now();
        let changed = tx.execute(
            "UPDATE contests SET phase = ?1, revealed_at = ?2 WHERE id = ?3 AND phase = ?4",
            params![
                ContestPhase::Reveal.as_str(),
                revealed_at.to_rfc3339(),
                contest_id.to_string(),
                ContestPhase::Scoring.as_str()
            ],
        )?;
        if changed == 0 {
            let contest = get_contest_conn(&tx, contest_id)?;
            return Err(EngineError::IllegalTransition(format!(
                "contest is in phase {}, expected scoring",
                contest.phase.as_str()
            )));
        }

        let entries = list_entries_conn(&tx, contest_id)?;
        let bagged = entries.iter().filter(|e| e.bag_number.is_some()).count();
        if bagged < 2 {
            return Err(EngineError::InsufficientEntries {
                required: 2,
                found: bagged,
            });
        }

        let scores = list_scores_conn(&tx, contest_id)?;
        let standings = scoring::rank_entries(&entries, &scores);
        let podium = Podium::from_standings(&standings);

        // Persist placements and lift the blind on every entry, including
        // ones that never received a bag number.
        for entry in &entries {
            let placement = standings
                .iter()
                .find(|s| s.entry_id == entry.id)
                .and_then(|s| s.placement);
            tx.execute(
                "UPDATE entries SET is_revealed = 1, final_placement = ?1 WHERE id = ?2",
                params![placement, entry.id.to_string()],
            )?;
        }

        let contest = get_contest_conn(&tx, contest_id)?;

        let mut pot_awarded_to = None;
        if contest.pot_size > 0 {
            if let Some(winner_entry) = podium.first {
                let winner = entries
                    .iter()
                    .find(|e| e.id == winner_entry)
                    .map(|e| e.participant_id)
                    .ok_or_else(|| EngineError::not_found("winning entry"))?;
                grant_in_tx(
                    &tx,
                    winner,
                    contest.group_id,
                    contest.pot_size,
                    TransactionType::ContestAward,
                    &format!("Pot for winning '{}'", contest.title),
                    None,
                )?;
                pot_awarded_to = Some(winner);
            }
        }

        let contest_wagers = list_wagers_conn(&tx, contest_id)?;
        let mut wager_outcomes = Vec::with_capacity(contest_wagers.len());
        for wager in &contest_wagers {
            let outcome = wagers::resolve(wager, &podium);
            tx.execute(
                "UPDATE wagers SET is_correct = ?1, bucks_won = ?2, cash_won_cents = ?3
                 WHERE id = ?4",
                params![
                    outcome.is_correct,
                    outcome.bucks_won,
                    outcome.cash_won_cents,
                    wager.id.to_string()
                ],
            )?;
            if outcome.bucks_won > 0 {
                grant_in_tx(
                    &tx,
                    wager.participant_id,
                    contest.group_id,
                    outcome.bucks_won,
                    TransactionType::BetWon,
                    &format!("Winning wager on '{}'", contest.title),
                    Some(wager.id),
                )?;
            }
            wager_outcomes.push(outcome);
        }

        tx.commit()?;
        info!(
            "Contest '{}' revealed: {} entries ranked, {} wagers settled",
            contest.title,
            standings.len(),
            wager_outcomes.len()
        );
        Ok(RevealOutcome {
            contest,
            standings,
            podium,
            wager_outcomes,
            pot_awarded_to,
        })
    }

    // ========================================================================
    // LEDGER
    // ========================================================================

    pub fn grant(
        &self,
        participant_id: Uuid,
        amount: i64,
        tx_type: TransactionType,
        description: &str,
        wager_id: Option<Uuid>,
    ) -> Result<Uuid> {
        if amount <= 0 {
            return Err(EngineError::InvalidAmount(amount));
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let group_id = participant_group_in_tx(&tx, participant_id)?;
        let id = grant_in_tx(&tx, participant_id, group_id, amount, tx_type, description, wager_id)?;
        tx.commit()?;
        Ok(id)
    }

    pub fn debit(
        &self,
        participant_id: Uuid,
        amount: i64,
        tx_type: TransactionType,
        description: &str,
        wager_id: Option<Uuid>,
    ) -> Result<Uuid> {
        if amount <= 0 {
            return Err(EngineError::InvalidAmount(amount));
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let id = debit_in_tx(&tx, participant_id, amount, tx_type, description, wager_id)?;
        tx.commit()?;
        Ok(id)
    }

    /// Move bucks between two participants: one debit, one grant, one
    /// transaction. Either both TRANSFER rows land or neither does.
    pub fn transfer(
        &self,
        from: Uuid,
        to: Uuid,
        amount: i64,
        note: &str,
    ) -> Result<(Uuid, Uuid)> {
        if amount <= 0 {
            return Err(EngineError::InvalidAmount(amount));
        }
        if from == to {
            return Err(EngineError::validation("cannot transfer to yourself"));
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let to_group = participant_group_in_tx(&tx, to)?;
        let debit_id = debit_in_tx(&tx, from, amount, TransactionType::Transfer, note, None)?;
        let grant_id = grant_in_tx(
            &tx,
            to,
            to_group,
            amount,
            TransactionType::Transfer,
            note,
            None,
        )?;
        tx.commit()?;
        Ok((debit_id, grant_id))
    }

    /// The cached balance plus totals derived from the log. The cached
    /// field is authoritative for spend checks; the derived sums exist to
    /// reconcile against it.
    pub fn balance_summary(&self, participant_id: Uuid) -> Result<BalanceSummary> {
        let conn = self.conn.lock();
        let balance: i64 = conn
            .query_row(
                "SELECT balance FROM participants WHERE id = ?1",
                [participant_id.to_string()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| EngineError::not_found("participant"))?;

        let (total_earned, total_spent): (i64, i64) = conn.query_row(
            "SELECT COALESCE(SUM(CASE WHEN amount > 0 THEN amount END), 0),
                    COALESCE(SUM(CASE WHEN amount < 0 THEN -amount END), 0)
             FROM ledger_transactions WHERE participant_id = ?1",
            [participant_id.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(BalanceSummary {
            balance,
            total_earned,
            total_spent,
        })
    }

    /// Transaction history, newest first, restartable via offset.
    pub fn history(
        &self,
        participant_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<LedgerTransaction>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {LEDGER_COLS} FROM ledger_transactions
             WHERE participant_id = ?1
             ORDER BY rowid DESC LIMIT ?2 OFFSET ?3"
        ))?;
        let txs = stmt
            .query_map(
                params![participant_id.to_string(), limit, offset],
                map_transaction,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(txs)
    }
}

// ============================================================================
// TRANSACTION-SCOPED HELPERS
// ============================================================================

fn participant_group_in_tx(conn: &Connection, participant_id: Uuid) -> Result<Uuid> {
    conn.query_row(
        "SELECT group_id FROM participants WHERE id = ?1",
        [participant_id.to_string()],
        |row| uuid_col(row, 0),
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found("participant"))
}

/// Append a positive ledger row and bump the cached balance.
fn grant_in_tx(
    conn: &Connection,
    participant_id: Uuid,
    group_id: Uuid,
    amount: i64,
    tx_type: TransactionType,
    description: &str,
    wager_id: Option<Uuid>,
) -> Result<Uuid> {
    let changed = conn.execute(
        "UPDATE participants SET balance = balance + ?1 WHERE id = ?2",
        params![amount, participant_id.to_string()],
    )?;
    if changed == 0 {
        return Err(EngineError::not_found("participant"));
    }
    insert_transaction(conn, participant_id, group_id, amount, tx_type, description, wager_id)
}

/// Append a negative ledger row iff the balance covers it. The balance
/// check and decrement are a single UPDATE, so two concurrent debits can
/// never both succeed against funds that only cover one.
fn debit_in_tx(
    conn: &Connection,
    participant_id: Uuid,
    amount: i64,
    tx_type: TransactionType,
    description: &str,
    wager_id: Option<Uuid>,
) -> Result<Uuid> {
    let changed = conn.execute(
        "UPDATE participants SET balance = balance - ?1 WHERE id = ?2 AND balance >= ?1",
        params![amount, participant_id.to_string()],
    )?;
    if changed == 0 {
        let balance: i64 = conn
            .query_row(
                "SELECT balance FROM participants WHERE id = ?1",
                [participant_id.to_string()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| EngineError::not_found("participant"))?;
        return Err(EngineError::InsufficientFunds {
            balance,
            requested: amount,
        });
    }
    let group_id = participant_group_in_tx(conn, participant_id)?;
    insert_transaction(
        conn,
        participant_id,
        group_id,
        -amount,
        tx_type,
        description,
        wager_id,
    )
}

fn insert_transaction(
    conn: &Connection,
    participant_id: Uuid,
    group_id: Uuid,
    amount: i64,
    tx_type: TransactionType,
    description: &str,
    wager_id: Option<Uuid>,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    conn.execute(
        &format!("INSERT INTO ledger_transactions ({LEDGER_COLS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
        params![
            id.to_string(),
            participant_id.to_string(),
            group_id.to_string(),
            amount,
            tx_type.as_str(),
            description,
            wager_id.map(|w| w.to_string()),
            Utc::now().to_rfc3339()
        ],
    )?;
    Ok(id)
}

fn get_contest_conn(conn: &Connection, id: Uuid) -> Result<Contest> {
    conn.query_row(
        &format!("SELECT {CONTEST_COLS} FROM contests WHERE id = ?1"),
        [id.to_string()],
        map_contest,
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found("contest"))
}

fn get_entry_conn(conn: &Connection, id: Uuid) -> Result<Entry> {
    conn.query_row(
        &format!("SELECT {ENTRY_COLS} FROM entries WHERE id = ?1"),
        [id.to_string()],
        map_entry,
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found("entry"))
}

fn list_entries_conn(conn: &Connection, contest_id: Uuid) -> Result<Vec<Entry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENTRY_COLS} FROM entries WHERE contest_id = ?1 ORDER BY created_at ASC, id ASC"
    ))?;
    let entries = stmt
        .query_map([contest_id.to_string()], map_entry)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

fn list_wagers_conn(conn: &Connection, contest_id: Uuid) -> Result<Vec<Wager>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {WAGER_COLS} FROM wagers WHERE contest_id = ?1 ORDER BY created_at ASC, id ASC"
    ))?;
    let wagers = stmt
        .query_map([contest_id.to_string()], map_wager)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(wagers)
}

fn list_scores_conn(conn: &Connection, contest_id: Uuid) -> Result<Vec<Score>> {
    let mut stmt = conn.prepare(
        "SELECT id, contest_id, participant_id, first_entry_id, second_entry_id,
                third_entry_id, created_at, updated_at
         FROM scores WHERE contest_id = ?1 ORDER BY created_at ASC",
    )?;
    let mut scores = stmt
        .query_map([contest_id.to_string()], |row| {
            Ok(Score {
                id: uuid_col(row, 0)?,
                contest_id: uuid_col(row, 1)?,
                participant_id: uuid_col(row, 2)?,
                first_entry_id: uuid_col(row, 3)?,
                second_entry_id: uuid_col(row, 4)?,
                third_entry_id: uuid_col(row, 5)?,
                ratings: Vec::new(),
                created_at: ts_col(row, 6)?,
                updated_at: ts_col(row, 7)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut rating_stmt = conn.prepare(
        "SELECT r.score_id, r.entry_id, r.rating, r.notes
         FROM score_ratings r JOIN scores s ON s.id = r.score_id
         WHERE s.contest_id = ?1",
    )?;
    let ratings = rating_stmt
        .query_map([contest_id.to_string()], |row| {
            Ok((
                uuid_col(row, 0)?,
                EntryRating {
                    entry_id: uuid_col(row, 1)?,
                    rating: row.get(2)?,
                    notes: row.get(3)?,
                },
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    for (score_id, rating) in ratings {
        if let Some(score) = scores.iter_mut().find(|s| s.id == score_id) {
            score.ratings.push(rating);
        }
    }
    Ok(scores)
}

fn require_bagged_entry(conn: &Connection, contest_id: Uuid, entry_id: Uuid) -> Result<()> {
    let bag: Option<Option<u32>> = conn
        .query_row(
            "SELECT bag_number FROM entries WHERE id = ?1 AND contest_id = ?2",
            params![entry_id.to_string(), contest_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    match bag {
        None => Err(EngineError::not_found("entry")),
        Some(None) => Err(EngineError::validation(format!(
            "entry {entry_id} has no bag number"
        ))),
        Some(Some(_)) => Ok(()),
    }
}

/// Validate and apply an explicit numbering: unique targets belonging to
/// the contest, none already bagged, numbers forming 1..=N exactly.
fn apply_bag_assignments_in_tx(
    conn: &Connection,
    contest_id: Uuid,
    assignments: &[(Uuid, u32)],
) -> Result<()> {
    if assignments.is_empty() {
        return Err(EngineError::validation("no entries to assign"));
    }

    let mut entry_ids: Vec<Uuid> = assignments.iter().map(|(id, _)| *id).collect();
    entry_ids.sort();
    entry_ids.dedup();
    if entry_ids.len() != assignments.len() {
        return Err(EngineError::conflict(
            "duplicate assignment: an entry appears more than once",
        ));
    }

    let mut numbers: Vec<u32> = assignments.iter().map(|(_, n)| *n).collect();
    numbers.sort_unstable();
    let expected: Vec<u32> = (1..=assignments.len() as u32).collect();
    if numbers != expected {
        return Err(EngineError::conflict(
            "duplicate assignment: bag numbers must form a permutation of 1..=N",
        ));
    }

    for (entry_id, _) in assignments {
        let entry = get_entry_conn(conn, *entry_id)?;
        if entry.contest_id != contest_id {
            return Err(EngineError::not_found("entry"));
        }
        if entry.bag_number.is_some() {
            return Err(EngineError::conflict(format!(
                "entry {entry_id} already has a bag number"
            )));
        }
    }

    for (entry_id, bag) in assignments {
        conn.execute(
            "UPDATE entries SET bag_number = ?1 WHERE id = ?2",
            params![bag, entry_id.to_string()],
        )?;
    }
    Ok(())
}

/// Fill bag numbers for entries that still lack one, drawing randomly from
/// the unused portion of 1..=N. Used by the OPEN -> SCORING transition.
fn assign_missing_bags_in_tx(conn: &Connection, entries: &[Entry]) -> Result<()> {
    use rand::seq::SliceRandom;

    let used: Vec<u32> = entries.iter().filter_map(|e| e.bag_number).collect();
    let mut available: Vec<u32> = (1..=entries.len() as u32)
        .filter(|n| !used.contains(n))
        .collect();
    available.shuffle(&mut rand::thread_rng());

    let unbagged = entries.iter().filter(|e| e.bag_number.is_none());
    for (entry, bag) in unbagged.zip(available) {
        conn.execute(
            "UPDATE entries SET bag_number = ?1 WHERE id = ?2",
            params![bag, entry.id.to_string()],
        )?;
    }
    Ok(())
}

// ============================================================================
// ROW MAPPING
// ============================================================================

fn conversion_err(idx: usize, source: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(source))
}

fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s).map_err(|e| conversion_err(idx, e))
}

fn opt_uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| Uuid::parse_str(&s).map_err(|e| conversion_err(idx, e)))
        .transpose()
}

fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

fn opt_ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_err(idx, e))
    })
    .transpose()
}

fn map_group(row: &Row<'_>) -> rusqlite::Result<ContestGroup> {
    Ok(ContestGroup {
        id: uuid_col(row, 0)?,
        name: row.get(1)?,
        created_at: ts_col(row, 2)?,
    })
}

fn map_participant(row: &Row<'_>) -> rusqlite::Result<Participant> {
    let role_str: String = row.get(3)?;
    let role = Role::parse(&role_str).ok_or_else(|| {
        conversion_err(
            3,
            std::io::Error::new(std::io::ErrorKind::InvalidData, "unknown role"),
        )
    })?;
    Ok(Participant {
        id: uuid_col(row, 0)?,
        group_id: uuid_col(row, 1)?,
        display_name: row.get(2)?,
        role,
        balance: row.get(4)?,
        created_at: ts_col(row, 5)?,
    })
}

fn map_contest(row: &Row<'_>) -> rusqlite::Result<Contest> {
    let phase_str: String = row.get(3)?;
    let phase = ContestPhase::parse(&phase_str).ok_or_else(|| {
        conversion_err(
            3,
            std::io::Error::new(std::io::ErrorKind::InvalidData, "unknown phase"),
        )
    })?;
    Ok(Contest {
        id: uuid_col(row, 0)?,
        group_id: uuid_col(row, 1)?,
        title: row.get(2)?,
        phase,
        price_min_cents: row.get(4)?,
        price_max_cents: row.get(5)?,
        entries_per_participant: row.get(6)?,
        pot_size: row.get(7)?,
        allow_cash_bets: row.get(8)?,
        revealed_at: opt_ts_col(row, 9)?,
        created_at: ts_col(row, 10)?,
    })
}

fn map_entry(row: &Row<'_>) -> rusqlite::Result<Entry> {
    Ok(Entry {
        id: uuid_col(row, 0)?,
        contest_id: uuid_col(row, 1)?,
        participant_id: uuid_col(row, 2)?,
        label: row.get(3)?,
        description: row.get(4)?,
        price_cents: row.get(5)?,
        bag_number: row.get(6)?,
        is_revealed: row.get(7)?,
        final_placement: row.get(8)?,
        created_at: ts_col(row, 9)?,
    })
}

fn map_wager(row: &Row<'_>) -> rusqlite::Result<Wager> {
    Ok(Wager {
        id: uuid_col(row, 0)?,
        contest_id: uuid_col(row, 1)?,
        participant_id: uuid_col(row, 2)?,
        first_pick: uuid_col(row, 3)?,
        second_pick: uuid_col(row, 4)?,
        third_pick: uuid_col(row, 5)?,
        stake_bucks: row.get(6)?,
        stake_cash_cents: row.get(7)?,
        is_correct: row.get(8)?,
        bucks_won: row.get(9)?,
        cash_won_cents: row.get(10)?,
        created_at: ts_col(row, 11)?,
    })
}

fn map_transaction(row: &Row<'_>) -> rusqlite::Result<LedgerTransaction> {
    let type_str: String = row.get(4)?;
    let tx_type = TransactionType::parse(&type_str).ok_or_else(|| {
        conversion_err(
            4,
            std::io::Error::new(std::io::ErrorKind::InvalidData, "unknown transaction type"),
        )
    })?;
    Ok(LedgerTransaction {
        id: uuid_col(row, 0)?,
        participant_id: uuid_col(row, 1)?,
        group_id: uuid_col(row, 2)?,
        amount: row.get(3)?,
        tx_type,
        description: row.get(5)?,
        wager_id: opt_uuid_col(row, 6)?,
        created_at: ts_col(row, 7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> (ContestStorage, ContestGroup, Participant, Participant) {
        let storage = ContestStorage::in_memory().unwrap();
        let group = storage.create_group("Cabin Trip").unwrap();
        let organizer = storage
            .create_participant(group.id, "Sam", Role::Organizer, 500)
            .unwrap();
        let guest = storage
            .create_participant(group.id, "Riley", Role::Standard, 500)
            .unwrap();
        (storage, group, organizer, guest)
    }

    fn open_contest(storage: &ContestStorage, group_id: Uuid) -> Contest {
        let contest = storage
            .create_contest(
                group_id,
                &ContestSettings {
                    title: "Friday Night".to_string(),
                    price_min_cents: None,
                    price_max_cents: None,
                    entries_per_participant: 2,
                    pot_size: 0,
                    allow_cash_bets: false,
                },
            )
            .unwrap();
        storage
            .set_phase(contest.id, ContestPhase::Setup, ContestPhase::Open)
            .unwrap()
    }

    #[test]
    fn initial_grant_matches_cached_balance() {
        let (storage, _, organizer, _) = seeded();
        let summary = storage.balance_summary(organizer.id).unwrap();
        assert_eq!(summary.balance, 500);
        assert_eq!(summary.total_earned, 500);
        assert_eq!(summary.total_spent, 0);

        let history = storage.history(organizer.id, 10, 0).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].tx_type, TransactionType::InitialGrant);
        assert_eq!(history[0].amount, 500);
    }

    #[test]
    fn debit_beyond_balance_fails_and_writes_nothing() {
        let (storage, _, _, guest) = seeded();
        let err = storage
            .debit(guest.id, 501, TransactionType::BetPlaced, "too much", None)
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::InsufficientFunds {
                balance: 500,
                requested: 501
            }
        ));
        let summary = storage.balance_summary(guest.id).unwrap();
        assert_eq!(summary.balance, 500);
        assert_eq!(storage.history(guest.id, 10, 0).unwrap().len(), 1);
    }

    #[test]
    fn ledger_reconciles_after_mixed_activity() {
        let (storage, _, organizer, guest) = seeded();
        storage
            .grant(guest.id, 100, TransactionType::AdminGrant, "bonus", None)
            .unwrap();
        storage
            .debit(guest.id, 250, TransactionType::BetPlaced, "stake", None)
            .unwrap();
        storage.transfer(organizer.id, guest.id, 50, "iou").unwrap();

        let summary = storage.balance_summary(guest.id).unwrap();
        assert_eq!(summary.balance, 500 + 100 - 250 + 50);
        assert_eq!(summary.balance, summary.total_earned - summary.total_spent);
    }

    #[test]
    fn transfer_rolls_back_when_sender_cannot_cover() {
        let (storage, _, organizer, guest) = seeded();
        let err = storage
            .transfer(organizer.id, guest.id, 10_000, "too rich")
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientFunds { .. }));
        assert_eq!(storage.balance_summary(organizer.id).unwrap().balance, 500);
        assert_eq!(storage.balance_summary(guest.id).unwrap().balance, 500);
    }

    #[test]
    fn concurrent_debits_never_go_negative() {
        use std::sync::Arc;

        let (storage, _, _, guest) = seeded();
        let storage = Arc::new(storage);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let storage = storage.clone();
                let guest_id = guest.id;
                std::thread::spawn(move || {
                    storage.debit(guest_id, 150, TransactionType::BetPlaced, "race", None)
                })
            })
            .collect();
        let successes = handles
            .into_iter()
            .map(|h| h.join())
            .filter(|r| matches!(r, Ok(Ok(_))))
            .count();

        // 500 bucks cover exactly three 150-buck debits.
        assert_eq!(successes, 3);
        let summary = storage.balance_summary(guest.id).unwrap();
        assert_eq!(summary.balance, 50);
        assert_eq!(summary.balance, summary.total_earned - summary.total_spent);
    }

    #[test]
    fn entry_cap_is_enforced() {
        let (storage, group, _, guest) = seeded();
        let contest = open_contest(&storage, group.id);

        storage
            .insert_entry(contest.id, guest.id, "Bottle A", None, None)
            .unwrap();
        storage
            .insert_entry(contest.id, guest.id, "Bottle B", None, None)
            .unwrap();
        let err = storage
            .insert_entry(contest.id, guest.id, "Bottle C", None, None)
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[test]
    fn bag_assignment_rejects_non_permutations_and_reassignment() {
        let (storage, group, organizer, guest) = seeded();
        let contest = open_contest(&storage, group.id);
        let e1 = storage
            .insert_entry(contest.id, organizer.id, "A", None, None)
            .unwrap();
        let e2 = storage
            .insert_entry(contest.id, guest.id, "B", None, None)
            .unwrap();

        let err = storage
            .assign_bag_numbers(contest.id, &[(e1.id, 1), (e2.id, 3)])
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));

        storage
            .assign_bag_numbers(contest.id, &[(e1.id, 2), (e2.id, 1)])
            .unwrap();
        let err = storage.assign_random_bags(contest.id).unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));

        let entries = storage.list_entries(contest.id).unwrap();
        let mut bags: Vec<u32> = entries.iter().filter_map(|e| e.bag_number).collect();
        bags.sort_unstable();
        assert_eq!(bags, vec![1, 2]);
    }

    #[test]
    fn racing_bag_assignments_produce_one_valid_numbering() {
        use std::sync::Arc;

        let (storage, group, organizer, guest) = seeded();
        let contest = open_contest(&storage, group.id);
        for label in ["A", "B"] {
            storage
                .insert_entry(contest.id, organizer.id, label, None, None)
                .unwrap();
        }
        storage
            .insert_entry(contest.id, guest.id, "C", None, None)
            .unwrap();

        let storage = Arc::new(storage);
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let storage = storage.clone();
                let contest_id = contest.id;
                std::thread::spawn(move || storage.assign_random_bags(contest_id))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(EngineError::Conflict(_)))));

        let mut bags: Vec<u32> = storage
            .list_entries(contest.id)
            .unwrap()
            .iter()
            .filter_map(|e| e.bag_number)
            .collect();
        bags.sort_unstable();
        assert_eq!(bags, vec![1, 2, 3]);
    }

    #[test]
    fn score_upsert_replaces_whole_payload() {
        let (storage, group, organizer, guest) = seeded();
        let contest = open_contest(&storage, group.id);
        let e1 = storage
            .insert_entry(contest.id, organizer.id, "A", None, None)
            .unwrap();
        let e2 = storage
            .insert_entry(contest.id, organizer.id, "B", None, None)
            .unwrap();
        let e3 = storage
            .insert_entry(contest.id, guest.id, "C", None, None)
            .unwrap();
        storage.advance_to_scoring(contest.id).unwrap();

        storage
            .upsert_score(
                contest.id,
                guest.id,
                (e1.id, e2.id, e3.id),
                &[EntryRating {
                    entry_id: e1.id,
                    rating: 5,
                    notes: Some("great".to_string()),
                }],
            )
            .unwrap();
        storage
            .upsert_score(
                contest.id,
                guest.id,
                (e3.id, e2.id, e1.id),
                &[EntryRating {
                    entry_id: e3.id,
                    rating: 4,
                    notes: None,
                }],
            )
            .unwrap();

        let scores = storage.list_scores(contest.id).unwrap();
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].first_entry_id, e3.id);
        assert_eq!(scores[0].ratings.len(), 1);
        assert_eq!(scores[0].ratings[0].entry_id, e3.id);
    }
}
