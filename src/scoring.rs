//! Score tallying and final ranking.
//!
//! Pure functions: given the submitted scores and the bag-assigned entries,
//! produce the final standings. Re-running on the same input always yields
//! the same order, so the reveal transaction can treat this as a black box.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Serialize;
use uuid::Uuid;

use crate::models::{Entry, Score};

pub const FIRST_PLACE_POINTS: u32 = 3;
pub const SECOND_PLACE_POINTS: u32 = 2;
pub const THIRD_PLACE_POINTS: u32 = 1;

/// How many entries receive a final placement.
pub const PODIUM_SIZE: usize = 3;

/// One bag-assigned entry's accumulated result.
#[derive(Debug, Clone, Serialize)]
pub struct Standing {
    pub entry_id: Uuid,
    pub bag_number: u32,
    pub points: u32,
    pub mean_rating: f64,
    pub placement: Option<u32>,
}

/// The actual top-3 entry ids. Slots are None when fewer than three
/// bag-assigned entries exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Podium {
    pub first: Option<Uuid>,
    pub second: Option<Uuid>,
    pub third: Option<Uuid>,
}

impl Podium {
    pub fn from_standings(standings: &[Standing]) -> Self {
        let at = |i: usize| standings.get(i).map(|s| s.entry_id);
        Self {
            first: at(0),
            second: at(1),
            third: at(2),
        }
    }
}

/// Rank the bag-assigned entries: ranking points first (3/2/1 per judge),
/// mean rating as tie-break, ascending bag number as the deterministic
/// fallback. Entries without a bag number are not ranked.
pub fn rank_entries(entries: &[Entry], scores: &[Score]) -> Vec<Standing> {
    let mut points: HashMap<Uuid, u32> = HashMap::new();
    let mut ratings: HashMap<Uuid, Vec<u8>> = HashMap::new();

    for score in scores {
        *points.entry(score.first_entry_id).or_default() += FIRST_PLACE_POINTS;
        *points.entry(score.second_entry_id).or_default() += SECOND_PLACE_POINTS;
        *points.entry(score.third_entry_id).or_default() += THIRD_PLACE_POINTS;

        for rating in &score.ratings {
            ratings
                .entry(rating.entry_id)
                .or_default()
                .push(rating.rating);
        }
    }

    let mut standings: Vec<Standing> = entries
        .iter()
        .filter_map(|entry| {
            let bag_number = entry.bag_number?;
            let entry_ratings = ratings.get(&entry.id);
            let mean_rating = match entry_ratings {
                Some(rs) if !rs.is_empty() => {
                    rs.iter().map(|r| *r as f64).sum::<f64>() / rs.len() as f64
                }
                _ => 0.0,
            };
            Some(Standing {
                entry_id: entry.id,
                bag_number,
                points: points.get(&entry.id).copied().unwrap_or(0),
                mean_rating,
                placement: None,
            })
        })
        .collect();

    standings.sort_by(|a, b| {
        b.points
            .cmp(&a.points)
            .then_with(|| {
                b.mean_rating
                    .partial_cmp(&a.mean_rating)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.bag_number.cmp(&b.bag_number))
    });

    for (i, standing) in standings.iter_mut().enumerate() {
        if i < PODIUM_SIZE {
            standing.placement = Some((i + 1) as u32);
        }
    }

    standings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntryRating;
    use chrono::Utc;

    fn entry(bag: Option<u32>) -> Entry {
        Entry {
            id: Uuid::new_v4(),
            contest_id: Uuid::new_v4(),
            participant_id: Uuid::new_v4(),
            label: format!("entry-{bag:?}"),
            description: None,
            price_cents: None,
            bag_number: bag,
            is_revealed: false,
            final_placement: None,
            created_at: Utc::now(),
        }
    }

    fn score(first: Uuid, second: Uuid, third: Uuid, ratings: &[(Uuid, u8)]) -> Score {
        Score {
            id: Uuid::new_v4(),
            contest_id: Uuid::new_v4(),
            participant_id: Uuid::new_v4(),
            first_entry_id: first,
            second_entry_id: second,
            third_entry_id: third,
            ratings: ratings
                .iter()
                .map(|(entry_id, rating)| EntryRating {
                    entry_id: *entry_id,
                    rating: *rating,
                    notes: None,
                })
                .collect(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn two_judges_agreeing_rank_in_bag_order() {
        let (e1, e2, e3) = (entry(Some(1)), entry(Some(2)), entry(Some(3)));
        let entries = vec![e1.clone(), e2.clone(), e3.clone()];
        let scores = vec![
            score(
                e1.id,
                e2.id,
                e3.id,
                &[(e1.id, 5), (e2.id, 3), (e3.id, 1)],
            ),
            score(
                e1.id,
                e2.id,
                e3.id,
                &[(e1.id, 4), (e2.id, 4), (e3.id, 2)],
            ),
        ];

        let standings = rank_entries(&entries, &scores);

        assert_eq!(standings[0].entry_id, e1.id);
        assert_eq!(standings[0].points, 6);
        assert_eq!(standings[0].mean_rating, 4.5);
        assert_eq!(standings[0].placement, Some(1));

        assert_eq!(standings[1].entry_id, e2.id);
        assert_eq!(standings[1].points, 4);
        assert_eq!(standings[1].mean_rating, 3.5);
        assert_eq!(standings[1].placement, Some(2));

        assert_eq!(standings[2].entry_id, e3.id);
        assert_eq!(standings[2].points, 2);
        assert_eq!(standings[2].mean_rating, 1.5);
        assert_eq!(standings[2].placement, Some(3));
    }

    #[test]
    fn mean_rating_breaks_point_ties() {
        let (e1, e2) = (entry(Some(1)), entry(Some(2)));
        let filler = entry(Some(3));
        let entries = vec![e1.clone(), e2.clone(), filler.clone()];
        // Judges disagree on first/second, so e1 and e2 tie on 5 points each;
        // e2's better ratings must put it ahead despite its higher bag number.
        let scores = vec![
            score(e1.id, e2.id, filler.id, &[(e1.id, 3), (e2.id, 5)]),
            score(e2.id, e1.id, filler.id, &[(e1.id, 3), (e2.id, 5)]),
        ];

        let standings = rank_entries(&entries, &scores);
        assert_eq!(standings[0].entry_id, e2.id);
        assert_eq!(standings[0].points, 5);
        assert_eq!(standings[1].entry_id, e1.id);
        assert_eq!(standings[1].points, 5);
    }

    #[test]
    fn zero_scores_fall_back_to_bag_order() {
        let entries = vec![entry(Some(3)), entry(Some(1)), entry(Some(2))];
        let standings = rank_entries(&entries, &[]);

        let bags: Vec<u32> = standings.iter().map(|s| s.bag_number).collect();
        assert_eq!(bags, vec![1, 2, 3]);
        assert!(standings.iter().all(|s| s.points == 0));
        assert!(standings.iter().all(|s| s.mean_rating == 0.0));
        assert_eq!(standings[0].placement, Some(1));
    }

    #[test]
    fn unbagged_entries_are_not_ranked() {
        let entries = vec![entry(Some(1)), entry(None)];
        let standings = rank_entries(&entries, &[]);
        assert_eq!(standings.len(), 1);
    }

    #[test]
    fn ranking_is_deterministic() {
        let entries: Vec<Entry> = (1..=5).map(|bag| entry(Some(bag))).collect();
        let scores = vec![
            score(entries[0].id, entries[2].id, entries[4].id, &[]),
            score(entries[2].id, entries[0].id, entries[1].id, &[]),
        ];

        let first = rank_entries(&entries, &scores);
        for _ in 0..10 {
            let again = rank_entries(&entries, &scores);
            let ids: Vec<Uuid> = again.iter().map(|s| s.entry_id).collect();
            let expected: Vec<Uuid> = first.iter().map(|s| s.entry_id).collect();
            assert_eq!(ids, expected);
        }
    }

    #[test]
    fn podium_handles_fewer_than_three_entries() {
        let entries = vec![entry(Some(1)), entry(Some(2))];
        let standings = rank_entries(&entries, &[]);
        let podium = Podium::from_standings(&standings);
        assert!(podium.first.is_some());
        assert!(podium.second.is_some());
        assert!(podium.third.is_none());
    }
}
