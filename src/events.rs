//! Domain events.
//!
//! The engine publishes these for an external notifier (push, email, chat
//! bot) to fan out. Delivery is fire-and-forget: a sink observes outcomes,
//! it never gates or fails an operation.

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::models::ContestPhase;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    EntrySubmitted {
        contest_id: Uuid,
        entry_id: Uuid,
        participant_id: Uuid,
    },
    PhaseAdvanced {
        contest_id: Uuid,
        from: ContestPhase,
        to: ContestPhase,
    },
    RevealCompleted {
        contest_id: Uuid,
        first: Option<Uuid>,
        second: Option<Uuid>,
        third: Option<Uuid>,
    },
    WagerResolved {
        contest_id: Uuid,
        wager_id: Uuid,
        participant_id: Uuid,
        is_correct: bool,
        bucks_won: i64,
    },
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: DomainEvent);
}

/// Default sink: one JSON log line per event.
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn publish(&self, event: DomainEvent) {
        let payload = serde_json::to_string(&event).unwrap_or_else(|_| format!("{event:?}"));
        info!(event = %payload, "domain event");
    }
}
