//! Contest demo
//!
//! Runs one full blind-tasting night: four friends, three bottles, two
//! judges, one wager. Useful for eyeballing the engine's behavior with
//! structured logs turned on. Set CONTEST_DB_PATH=":memory:" to keep the
//! run ephemeral.

use std::sync::Arc;

use blind_contest::models::{ContestPhase, Role};
use blind_contest::{Config, ContestEngine, ContestStorage, NewContest, NewEntry};
use blind_contest::{ScoreSubmission, WagerSubmission};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::load()?;
    let db_path = config.database_path();
    let store = if db_path == ":memory:" {
        Arc::new(ContestStorage::in_memory()?)
    } else {
        Arc::new(ContestStorage::open(&db_path)?)
    };
    let engine = ContestEngine::new(store, config);

    let group = engine.create_group("Cabin Weekend").await?;
    let sam = engine
        .add_participant(group.id, "Sam", Role::Organizer)
        .await?;
    let riley = engine
        .add_participant(group.id, "Riley", Role::Standard)
        .await?;
    let jo = engine.add_participant(group.id, "Jo", Role::Standard).await?;
    let max = engine
        .add_participant(group.id, "Max", Role::Standard)
        .await?;

    let contest = engine
        .create_contest(
            sam.id,
            group.id,
            NewContest {
                title: "Saturday Blind Tasting".to_string(),
                price_min_cents: Some(1_000),
                price_max_cents: Some(4_000),
                entry_limit: Some(1),
                pot_size: Some(100),
                allow_cash_bets: false,
            },
        )
        .await?;
    engine
        .advance_phase(sam.id, contest.id, ContestPhase::Open)
        .await?;

    let bottles = [
        (riley.id, "Syrah, Walla Walla", 2_500),
        (jo.id, "Garnacha, Calatayud", 1_500),
        (max.id, "Pinot Noir, Willamette", 3_900),
    ];
    let mut entry_ids = Vec::new();
    for (owner, label, price) in bottles {
        let entry = engine
            .submit_entry(
                owner,
                contest.id,
                NewEntry {
                    label: label.to_string(),
                    description: None,
                    price_cents: Some(price),
                },
            )
            .await?;
        entry_ids.push(entry.id);
    }

    engine
        .advance_phase(sam.id, contest.id, ContestPhase::Scoring)
        .await?;

    // Judges only ever see "Bag #N" at this point.
    let detail = engine.contest_detail(riley.id, contest.id).await?;
    for view in &detail.entries {
        info!("{} (submitter hidden: {})", view.label, view.submitted_by.is_none());
    }

    for judge in [sam.id, riley.id] {
        engine
            .submit_score(
                judge,
                contest.id,
                ScoreSubmission {
                    first: entry_ids[0],
                    second: entry_ids[1],
                    third: entry_ids[2],
                    ratings: Vec::new(),
                },
            )
            .await?;
    }

    engine
        .place_wager(
            jo.id,
            contest.id,
            WagerSubmission {
                first: entry_ids[0],
                second: entry_ids[1],
                third: entry_ids[2],
                stake_bucks: 50,
                stake_cash_cents: 0,
            },
        )
        .await?;

    engine
        .advance_phase(sam.id, contest.id, ContestPhase::Reveal)
        .await?;
    engine
        .advance_phase(sam.id, contest.id, ContestPhase::Complete)
        .await?;

    let detail = engine.contest_detail(max.id, contest.id).await?;
    if let Some(standings) = &detail.standings {
        for standing in standings {
            info!(
                "Bag #{}: {} points, {:.1} mean rating, placement {:?}",
                standing.bag_number, standing.points, standing.mean_rating, standing.placement
            );
        }
    }

    info!("Final leaderboard:");
    for row in engine.leaderboard(sam.id, group.id).await? {
        info!("  {}. {} - {} bucks", row.rank, row.display_name, row.balance);
    }

    Ok(())
}
