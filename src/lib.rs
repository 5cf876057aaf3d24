//! Blind contest engine
//!
//! Runs an anonymous-submission, blind-scoring, reveal-and-wagering
//! competition (wine tastings, cook-offs, any blind-judged contest) plus the
//! virtual-currency ledger that funds and settles the wagers.
//!
//! # How a contest runs
//!
//! 1. An organizer creates a contest inside a group and opens it
//! 2. Members submit entries while the contest is open
//! 3. Advancing to scoring assigns anonymizing bag numbers; judges rank and
//!    rate entries blind (the organizer is blind too)
//! 4. Members may wager on the final top-3 order, staking bucks from their
//!    ledger balance
//! 5. The reveal tallies scores, fixes placements, awards the pot, and
//!    settles every wager - all in one transaction, exactly once
//!
//! # Invariants the engine defends
//!
//! - Balances never go negative and always equal the transaction-log sum
//! - Phases move strictly forward, one step at a time
//! - Submitter identity is never disclosed during blind scoring
//! - The reveal computes and pays out exactly once per contest

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod ledger;
pub mod migrations;
pub mod models;
pub mod scoring;
pub mod storage;
pub mod visibility;
pub mod wagers;

pub use config::Config;
pub use engine::{ContestDetail, ContestEngine, NewContest, NewEntry, ScoreSubmission, WagerSubmission};
pub use error::{EngineError, Result};
pub use events::{DomainEvent, EventSink, LogSink};
pub use ledger::Ledger;
pub use models::{Contest, ContestPhase, Entry, Participant, Role, Wager};
pub use storage::{ContestStorage, RevealOutcome};
