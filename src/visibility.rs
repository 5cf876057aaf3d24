//! Phase-dependent entry disclosure.
//!
//! This is the fairness boundary of the whole contest: during blind scoring
//! nobody, organizer included, may see who submitted what. Every read path
//! that returns entries to a caller goes through [`filter_entries`]; the
//! masking is a projection and never mutates stored rows.

use serde::Serialize;
use uuid::Uuid;

use crate::models::{ContestPhase, Entry, Participant};

/// What a caller is allowed to see of an entry in the current phase.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryView {
    pub id: Uuid,
    pub contest_id: Uuid,
    pub label: String,
    pub description: Option<String>,
    pub price_cents: Option<i64>,
    pub bag_number: Option<u32>,
    pub submitted_by: Option<Uuid>,
    pub is_revealed: bool,
    pub final_placement: Option<u32>,
}

impl EntryView {
    fn full(entry: &Entry) -> Self {
        Self {
            id: entry.id,
            contest_id: entry.contest_id,
            label: entry.label.clone(),
            description: entry.description.clone(),
            price_cents: entry.price_cents,
            bag_number: entry.bag_number,
            submitted_by: Some(entry.participant_id),
            is_revealed: entry.is_revealed,
            final_placement: entry.final_placement,
        }
    }

    /// Blind projection: identity and descriptive fields collapse to the
    /// bag label, price and notes are nulled, the submitter is stripped.
    fn masked(entry: &Entry, bag_number: u32) -> Self {
        Self {
            id: entry.id,
            contest_id: entry.contest_id,
            label: format!("Bag #{bag_number}"),
            description: None,
            price_cents: None,
            bag_number: Some(bag_number),
            submitted_by: None,
            is_revealed: false,
            final_placement: None,
        }
    }
}

/// Project the entries a viewer may see in the given phase.
///
/// - Collecting (setup/open): own entries at full detail; organizers see all.
/// - Scoring: bag-masked views only, for organizers too.
/// - Reveal/complete: everything, identity restored.
pub fn filter_entries(
    phase: ContestPhase,
    viewer: &Participant,
    entries: &[Entry],
) -> Vec<EntryView> {
    match phase {
        ContestPhase::Setup | ContestPhase::Open => entries
            .iter()
            .filter(|e| viewer.is_organizer() || e.participant_id == viewer.id)
            .map(EntryView::full)
            .collect(),
        ContestPhase::Scoring => entries
            .iter()
            .filter_map(|e| e.bag_number.map(|bag| EntryView::masked(e, bag)))
            .collect(),
        ContestPhase::Reveal | ContestPhase::Complete => {
            entries.iter().map(EntryView::full).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use chrono::Utc;

    fn participant(role: Role) -> Participant {
        Participant {
            id: Uuid::new_v4(),
            group_id: Uuid::new_v4(),
            display_name: "p".to_string(),
            role,
            balance: 0,
            created_at: Utc::now(),
        }
    }

    fn entry(owner: Uuid, bag: Option<u32>) -> Entry {
        Entry {
            id: Uuid::new_v4(),
            contest_id: Uuid::new_v4(),
            participant_id: owner,
            label: "Chateau Margaux 2015".to_string(),
            description: Some("Bordeaux blend".to_string()),
            price_cents: Some(4500),
            bag_number: bag,
            is_revealed: false,
            final_placement: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn collecting_shows_only_own_entries_to_non_organizers() {
        let viewer = participant(Role::Standard);
        let mine = entry(viewer.id, None);
        let theirs = entry(Uuid::new_v4(), None);

        let views = filter_entries(ContestPhase::Open, &viewer, &[mine.clone(), theirs]);
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].id, mine.id);
        assert_eq!(views[0].label, mine.label);
        assert_eq!(views[0].submitted_by, Some(viewer.id));
    }

    #[test]
    fn collecting_shows_all_entries_to_organizers() {
        let viewer = participant(Role::Organizer);
        let entries = vec![entry(Uuid::new_v4(), None), entry(Uuid::new_v4(), None)];
        let views = filter_entries(ContestPhase::Open, &viewer, &entries);
        assert_eq!(views.len(), 2);
        assert!(views.iter().all(|v| v.submitted_by.is_some()));
    }

    #[test]
    fn scoring_masks_everything_for_everyone() {
        for role in [Role::Standard, Role::Organizer] {
            let viewer = participant(role);
            let bagged = entry(viewer.id, Some(4));
            let unbagged = entry(viewer.id, None);

            let views = filter_entries(ContestPhase::Scoring, &viewer, &[bagged, unbagged]);
            assert_eq!(views.len(), 1, "entries without bags stay hidden");
            let view = &views[0];
            assert_eq!(view.label, "Bag #4");
            assert_eq!(view.description, None);
            assert_eq!(view.price_cents, None);
            assert_eq!(view.submitted_by, None);
        }
    }

    #[test]
    fn reveal_restores_full_detail() {
        let viewer = participant(Role::Standard);
        let owner = Uuid::new_v4();
        let mut e = entry(owner, Some(1));
        e.is_revealed = true;
        e.final_placement = Some(1);

        let views = filter_entries(ContestPhase::Reveal, &viewer, &[e.clone()]);
        assert_eq!(views.len(), 1);
        let view = &views[0];
        assert_eq!(view.label, e.label);
        assert_eq!(view.description, e.description);
        assert_eq!(view.price_cents, e.price_cents);
        assert_eq!(view.submitted_by, Some(owner));
        assert_eq!(view.final_placement, Some(1));
    }

    #[test]
    fn masking_round_trip_preserves_stored_fields() {
        let viewer = participant(Role::Standard);
        let e = entry(viewer.id, Some(2));

        // Mask, then view again post-reveal: the underlying entry is
        // untouched, so the revealed view equals the pre-mask detail.
        let _ = filter_entries(ContestPhase::Scoring, &viewer, std::slice::from_ref(&e));
        let after = filter_entries(ContestPhase::Complete, &viewer, std::slice::from_ref(&e));
        assert_eq!(after[0].label, e.label);
        assert_eq!(after[0].description, e.description);
        assert_eq!(after[0].price_cents, e.price_cents);
        assert_eq!(after[0].submitted_by, Some(e.participant_id));
    }
}
