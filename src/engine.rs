//! Contest engine: the operation surface callers talk to.
//!
//! Every method resolves the acting participant, enforces role and group
//! scope, validates the request shape, and delegates the raceable part to a
//! single storage transaction. Reads that return entries always pass through
//! the visibility filter.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::events::{DomainEvent, EventSink, LogSink};
use crate::ledger::Ledger;
use crate::models::{
    BalanceSummary, Contest, ContestGroup, ContestPhase, ContestSettings, Entry, EntryRating,
    LeaderboardRow, LedgerTransaction, Participant, Role, Score, TransactionType, Wager,
};
use crate::scoring::{self, Standing};
use crate::storage::{ContestStorage, RevealOutcome};
use crate::visibility::{self, EntryView};

// ============================================================================
// REQUEST / RESPONSE SHAPES
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct NewContest {
    pub title: String,
    pub price_min_cents: Option<i64>,
    pub price_max_cents: Option<i64>,
    /// Defaults from config when omitted.
    pub entry_limit: Option<u32>,
    /// Defaults from config when omitted.
    pub pot_size: Option<i64>,
    pub allow_cash_bets: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewEntry {
    pub label: String,
    pub description: Option<String>,
    pub price_cents: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScoreSubmission {
    pub first: Uuid,
    pub second: Uuid,
    pub third: Uuid,
    pub ratings: Vec<EntryRating>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WagerSubmission {
    pub first: Uuid,
    pub second: Uuid,
    pub third: Uuid,
    pub stake_bucks: i64,
    pub stake_cash_cents: i64,
}

/// Contest state as one caller is allowed to see it.
#[derive(Debug, Clone, Serialize)]
pub struct ContestDetail {
    pub contest: Contest,
    pub entries: Vec<EntryView>,
    pub your_score: Option<Score>,
    /// Present from reveal onward.
    pub standings: Option<Vec<Standing>>,
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct ContestEngine {
    store: Arc<ContestStorage>,
    ledger: Ledger,
    events: Arc<dyn EventSink>,
    config: Config,
}

impl ContestEngine {
    pub fn new(store: Arc<ContestStorage>, config: Config) -> Self {
        Self::with_event_sink(store, config, Arc::new(LogSink))
    }

    pub fn with_event_sink(
        store: Arc<ContestStorage>,
        config: Config,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let ledger = Ledger::new(store.clone());
        Self {
            store,
            ledger,
            events,
            config,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    // ------------------------------------------------------------------
    // Access checks
    // ------------------------------------------------------------------

    fn actor(&self, actor_id: Uuid) -> Result<Participant> {
        self.store.get_participant(actor_id)
    }

    fn organizer(&self, actor_id: Uuid) -> Result<Participant> {
        let actor = self.actor(actor_id)?;
        if !actor.is_organizer() {
            return Err(EngineError::forbidden(
                "only an organizer may perform this action",
            ));
        }
        Ok(actor)
    }

    /// Group-scope check: callers outside the owning group get NotFound
    /// rather than Forbidden, so the resource's existence is not disclosed.
    fn in_group(actor: &Participant, group_id: Uuid, what: &str) -> Result<()> {
        if actor.group_id != group_id {
            return Err(EngineError::not_found(what));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Groups & membership
    // ------------------------------------------------------------------

    pub async fn create_group(&self, name: &str) -> Result<ContestGroup> {
        if name.trim().is_empty() {
            return Err(EngineError::validation("group name cannot be empty"));
        }
        self.store.create_group(name)
    }

    /// Add a member to a group, seeding their ledger with the configured
    /// starting balance.
    pub async fn add_participant(
        &self,
        group_id: Uuid,
        display_name: &str,
        role: Role,
    ) -> Result<Participant> {
        if display_name.trim().is_empty() {
            return Err(EngineError::validation("display name cannot be empty"));
        }
        self.store.create_participant(
            group_id,
            display_name,
            role,
            self.config.ledger.starting_balance,
        )
    }

    // ------------------------------------------------------------------
    // Contest lifecycle
    // ------------------------------------------------------------------

    pub async fn create_contest(
        &self,
        actor_id: Uuid,
        group_id: Uuid,
        request: NewContest,
    ) -> Result<Contest> {
        let actor = self.organizer(actor_id)?;
        Self::in_group(&actor, group_id, "contest group")?;

        if request.title.trim().is_empty() {
            return Err(EngineError::validation("contest title cannot be empty"));
        }
        if let (Some(min), Some(max)) = (request.price_min_cents, request.price_max_cents) {
            if min > max {
                return Err(EngineError::validation(
                    "price range lower bound exceeds upper bound",
                ));
            }
        }
        let entry_limit = request
            .entry_limit
            .unwrap_or(self.config.contest.default_entry_limit);
        if entry_limit == 0 {
            return Err(EngineError::validation("entry limit must be at least 1"));
        }
        let pot_size = request
            .pot_size
            .unwrap_or(self.config.contest.default_pot_size);
        if pot_size < 0 {
            return Err(EngineError::validation("pot size cannot be negative"));
        }

        self.store.create_contest(
            group_id,
            &ContestSettings {
                title: request.title,
                price_min_cents: request.price_min_cents,
                price_max_cents: request.price_max_cents,
                entries_per_participant: entry_limit,
                pot_size,
                allow_cash_bets: request.allow_cash_bets,
            },
        )
    }

    /// Advance a contest to the next phase. `target` must be exactly the
    /// phase after the current one; the flip itself is a compare-and-set,
    /// so of two racing organizers only one succeeds.
    pub async fn advance_phase(
        &self,
        actor_id: Uuid,
        contest_id: Uuid,
        target: ContestPhase,
    ) -> Result<Contest> {
        let actor = self.organizer(actor_id)?;
        let contest = self.store.get_contest(contest_id)?;
        Self::in_group(&actor, contest.group_id, "contest")?;

        let from = match target {
            ContestPhase::Setup => {
                return Err(EngineError::IllegalTransition(
                    "setup is the initial phase and cannot be entered".to_string(),
                ))
            }
            ContestPhase::Open => ContestPhase::Setup,
            ContestPhase::Scoring => ContestPhase::Open,
            ContestPhase::Reveal => ContestPhase::Scoring,
            ContestPhase::Complete => ContestPhase::Reveal,
        };

        let advanced = match target {
            ContestPhase::Scoring => {
                let (contest, _entries) = self.store.advance_to_scoring(contest_id)?;
                contest
            }
            ContestPhase::Reveal => {
                let outcome = self.store.reveal(contest_id)?;
                self.publish_reveal(&outcome).await;
                outcome.contest
            }
            _ => self.store.set_phase(contest_id, from, target)?,
        };

        self.events
            .publish(DomainEvent::PhaseAdvanced {
                contest_id,
                from,
                to: target,
            })
            .await;
        info!(
            "Contest '{}' advanced {} -> {}",
            advanced.title,
            from.as_str(),
            target.as_str()
        );
        Ok(advanced)
    }

    async fn publish_reveal(&self, outcome: &RevealOutcome) {
        self.events
            .publish(DomainEvent::RevealCompleted {
                contest_id: outcome.contest.id,
                first: outcome.podium.first,
                second: outcome.podium.second,
                third: outcome.podium.third,
            })
            .await;
        for wager in &outcome.wager_outcomes {
            self.events
                .publish(DomainEvent::WagerResolved {
                    contest_id: outcome.contest.id,
                    wager_id: wager.wager_id,
                    participant_id: wager.participant_id,
                    is_correct: wager.is_correct,
                    bucks_won: wager.bucks_won,
                })
                .await;
        }
    }

    // ------------------------------------------------------------------
    // Entries
    // ------------------------------------------------------------------

    pub async fn submit_entry(
        &self,
        actor_id: Uuid,
        contest_id: Uuid,
        entry: NewEntry,
    ) -> Result<Entry> {
        let actor = self.actor(actor_id)?;
        let contest = self.store.get_contest(contest_id)?;
        Self::in_group(&actor, contest.group_id, "contest")?;

        if entry.label.trim().is_empty() {
            return Err(EngineError::validation("entry label cannot be empty"));
        }
        if contest.price_min_cents.is_some() || contest.price_max_cents.is_some() {
            let price = entry.price_cents.ok_or_else(|| {
                EngineError::validation("this contest requires a declared price")
            })?;
            if let Some(min) = contest.price_min_cents {
                if price < min {
                    return Err(EngineError::validation(format!(
                        "price {price} is below the contest minimum {min}"
                    )));
                }
            }
            if let Some(max) = contest.price_max_cents {
                if price > max {
                    return Err(EngineError::validation(format!(
                        "price {price} is above the contest maximum {max}"
                    )));
                }
            }
        }

        let created = self.store.insert_entry(
            contest_id,
            actor.id,
            &entry.label,
            entry.description.as_deref(),
            entry.price_cents,
        )?;
        self.events
            .publish(DomainEvent::EntrySubmitted {
                contest_id,
                entry_id: created.id,
                participant_id: actor.id,
            })
            .await;
        Ok(created)
    }

    /// Edit an entry's descriptive fields while the contest is collecting.
    /// Owners may edit their own entries; organizers may edit any.
    pub async fn update_entry(
        &self,
        actor_id: Uuid,
        entry_id: Uuid,
        changes: NewEntry,
    ) -> Result<Entry> {
        let actor = self.actor(actor_id)?;
        let entry = self.store.get_entry(entry_id)?;
        let contest = self.store.get_contest(entry.contest_id)?;
        Self::in_group(&actor, contest.group_id, "entry")?;
        if entry.participant_id != actor.id && !actor.is_organizer() {
            return Err(EngineError::forbidden("you may only edit your own entry"));
        }
        if changes.label.trim().is_empty() {
            return Err(EngineError::validation("entry label cannot be empty"));
        }
        self.store.update_entry(
            entry_id,
            &changes.label,
            changes.description.as_deref(),
            changes.price_cents,
        )
    }

    pub async fn withdraw_entry(&self, actor_id: Uuid, entry_id: Uuid) -> Result<()> {
        let actor = self.actor(actor_id)?;
        let entry = self.store.get_entry(entry_id)?;
        let contest = self.store.get_contest(entry.contest_id)?;
        Self::in_group(&actor, contest.group_id, "entry")?;
        if entry.participant_id != actor.id && !actor.is_organizer() {
            return Err(EngineError::forbidden(
                "you may only withdraw your own entry",
            ));
        }
        self.store.delete_entry(entry_id)
    }

    /// Assign bag numbers: an explicit numbering, or a random permutation
    /// over all entries when none is given.
    pub async fn assign_bag_numbers(
        &self,
        actor_id: Uuid,
        contest_id: Uuid,
        explicit: Option<Vec<(Uuid, u32)>>,
    ) -> Result<Vec<Entry>> {
        let actor = self.organizer(actor_id)?;
        let contest = self.store.get_contest(contest_id)?;
        Self::in_group(&actor, contest.group_id, "contest")?;

        match explicit {
            Some(assignments) => self.store.assign_bag_numbers(contest_id, &assignments),
            None => self.store.assign_random_bags(contest_id),
        }
    }

    // ------------------------------------------------------------------
    // Scoring & wagering
    // ------------------------------------------------------------------

    pub async fn submit_score(
        &self,
        actor_id: Uuid,
        contest_id: Uuid,
        submission: ScoreSubmission,
    ) -> Result<Score> {
        let actor = self.actor(actor_id)?;
        let contest = self.store.get_contest(contest_id)?;
        Self::in_group(&actor, contest.group_id, "contest")?;

        self.store.upsert_score(
            contest_id,
            actor.id,
            (submission.first, submission.second, submission.third),
            &submission.ratings,
        )
    }

    pub async fn place_wager(
        &self,
        actor_id: Uuid,
        contest_id: Uuid,
        submission: WagerSubmission,
    ) -> Result<Wager> {
        let actor = self.actor(actor_id)?;
        let contest = self.store.get_contest(contest_id)?;
        Self::in_group(&actor, contest.group_id, "contest")?;

        let wager = self.store.place_wager(
            contest_id,
            actor.id,
            (submission.first, submission.second, submission.third),
            submission.stake_bucks,
            submission.stake_cash_cents,
        )?;
        Ok(wager)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Fetch a contest as the caller may see it. Entries pass through the
    /// visibility filter; standings appear once the contest has revealed.
    pub async fn contest_detail(&self, actor_id: Uuid, contest_id: Uuid) -> Result<ContestDetail> {
        let actor = self.actor(actor_id)?;
        let contest = self.store.get_contest(contest_id)?;
        Self::in_group(&actor, contest.group_id, "contest")?;

        let entries = self.store.list_entries(contest_id)?;
        let views = visibility::filter_entries(contest.phase, &actor, &entries);

        let standings = if contest.phase.is_revealed() {
            let scores = self.store.list_scores(contest_id)?;
            Some(scoring::rank_entries(&entries, &scores))
        } else {
            None
        };
        let your_score = self.store.get_score(contest_id, actor.id)?;

        Ok(ContestDetail {
            contest,
            entries: views,
            your_score,
            standings,
        })
    }

    pub async fn list_contests(&self, actor_id: Uuid, group_id: Uuid) -> Result<Vec<Contest>> {
        let actor = self.actor(actor_id)?;
        Self::in_group(&actor, group_id, "contest group")?;
        self.store.list_contests(group_id)
    }

    /// All group members ranked by balance, ties broken by participant id.
    pub async fn leaderboard(&self, actor_id: Uuid, group_id: Uuid) -> Result<Vec<LeaderboardRow>> {
        let actor = self.actor(actor_id)?;
        Self::in_group(&actor, group_id, "contest group")?;

        let participants = self.store.list_participants(group_id)?;
        Ok(participants
            .into_iter()
            .enumerate()
            .map(|(i, p)| LeaderboardRow {
                rank: (i + 1) as u32,
                participant_id: p.id,
                display_name: p.display_name,
                balance: p.balance,
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Ledger surface
    // ------------------------------------------------------------------

    /// Organizer-only bonus grant to a member of their group.
    pub async fn grant_bonus(
        &self,
        actor_id: Uuid,
        participant_id: Uuid,
        amount: i64,
        description: &str,
    ) -> Result<Uuid> {
        let actor = self.organizer(actor_id)?;
        let recipient = self.store.get_participant(participant_id)?;
        Self::in_group(&actor, recipient.group_id, "participant")?;

        self.ledger.grant(
            participant_id,
            amount,
            TransactionType::AdminGrant,
            description,
            None,
        )
    }

    /// Self-service transfer from the caller to another group member.
    pub async fn transfer(
        &self,
        actor_id: Uuid,
        to_participant_id: Uuid,
        amount: i64,
        note: &str,
    ) -> Result<(Uuid, Uuid)> {
        let actor = self.actor(actor_id)?;
        let recipient = self.store.get_participant(to_participant_id)?;
        Self::in_group(&actor, recipient.group_id, "participant")?;

        self.ledger.transfer(actor.id, to_participant_id, amount, note)
    }

    pub async fn balance(&self, actor_id: Uuid) -> Result<BalanceSummary> {
        self.ledger.balance(actor_id)
    }

    pub async fn history(
        &self,
        actor_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<LedgerTransaction>> {
        self.ledger.history(actor_id, limit, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn engine_with_group() -> (ContestEngine, ContestGroup, Participant, Participant) {
        let store = Arc::new(ContestStorage::in_memory().unwrap());
        let engine = ContestEngine::new(store, Config::default());
        let group = engine.create_group("Trip").await.unwrap();
        let organizer = engine
            .add_participant(group.id, "Sam", Role::Organizer)
            .await
            .unwrap();
        let guest = engine
            .add_participant(group.id, "Riley", Role::Standard)
            .await
            .unwrap();
        (engine, group, organizer, guest)
    }

    fn contest_request() -> NewContest {
        NewContest {
            title: "Blind Night".to_string(),
            price_min_cents: None,
            price_max_cents: None,
            entry_limit: Some(2),
            pot_size: Some(0),
            allow_cash_bets: false,
        }
    }

    #[tokio::test]
    async fn standard_members_cannot_create_contests() {
        let (engine, group, _, guest) = engine_with_group().await;
        let err = engine
            .create_contest(guest.id, group.id, contest_request())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
    }

    #[tokio::test]
    async fn outsiders_get_not_found_on_group_resources() {
        let (engine, group, organizer, _) = engine_with_group().await;
        let contest = engine
            .create_contest(organizer.id, group.id, contest_request())
            .await
            .unwrap();

        let other_group = engine.create_group("Other").await.unwrap();
        let outsider = engine
            .add_participant(other_group.id, "Jo", Role::Standard)
            .await
            .unwrap();

        let err = engine
            .contest_detail(outsider.id, contest.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn entry_price_must_fall_inside_contest_bounds() {
        let (engine, group, organizer, guest) = engine_with_group().await;
        let mut request = contest_request();
        request.price_min_cents = Some(1_000);
        request.price_max_cents = Some(3_000);
        let contest = engine
            .create_contest(organizer.id, group.id, request)
            .await
            .unwrap();
        engine
            .advance_phase(organizer.id, contest.id, ContestPhase::Open)
            .await
            .unwrap();

        let err = engine
            .submit_entry(
                guest.id,
                contest.id,
                NewEntry {
                    label: "Too cheap".to_string(),
                    description: None,
                    price_cents: Some(500),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        engine
            .submit_entry(
                guest.id,
                contest.id,
                NewEntry {
                    label: "Just right".to_string(),
                    description: None,
                    price_cents: Some(2_000),
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn phase_cannot_skip_ahead() {
        let (engine, group, organizer, _) = engine_with_group().await;
        let contest = engine
            .create_contest(organizer.id, group.id, contest_request())
            .await
            .unwrap();

        let err = engine
            .advance_phase(organizer.id, contest.id, ContestPhase::Scoring)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::IllegalTransition(_)));

        let detail = engine
            .contest_detail(organizer.id, contest.id)
            .await
            .unwrap();
        assert_eq!(detail.contest.phase, ContestPhase::Setup);
    }
}
