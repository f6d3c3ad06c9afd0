//! Analytics events emitted for the external event log.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::decision::BanditArmId;
use crate::ladder::{EscalationEvidence, EscalationTrigger};
use crate::profiles::ProfileId;
use crate::types::Rung;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum GuidanceEvent {
    #[serde(rename = "guidance_request")]
    GuidanceRequested(GuidanceRequestPayload),

    #[serde(rename = "guidance_view")]
    GuidanceViewed(GuidanceViewPayload),

    #[serde(rename = "guidance_escalate")]
    GuidanceEscalated(GuidanceEscalatePayload),

    #[serde(rename = "bandit_updated")]
    BanditUpdated(BanditUpdatedPayload),
}

impl GuidanceEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            GuidanceEvent::GuidanceRequested(_) => "guidance_request",
            GuidanceEvent::GuidanceViewed(_) => "guidance_view",
            GuidanceEvent::GuidanceEscalated(_) => "guidance_escalate",
            GuidanceEvent::BanditUpdated(_) => "bandit_updated",
        }
    }

    pub fn learner_id(&self) -> &str {
        match self {
            GuidanceEvent::GuidanceRequested(p) => &p.learner_id,
            GuidanceEvent::GuidanceViewed(p) => &p.learner_id,
            GuidanceEvent::GuidanceEscalated(p) => &p.learner_id,
            GuidanceEvent::BanditUpdated(p) => &p.learner_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuidanceRequestPayload {
    pub learner_id: String,
    pub problem_id: String,
    pub rung: Rung,
    pub rung_attempts: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuidanceViewPayload {
    pub learner_id: String,
    pub problem_id: String,
    pub rung: Rung,
    pub grounded: bool,
    pub fallback_used: bool,
    pub concept_ids: Vec<String>,
    pub source_ref_ids: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuidanceEscalatePayload {
    pub learner_id: String,
    pub problem_id: String,
    pub from_rung: Rung,
    pub to_rung: Rung,
    pub trigger: EscalationTrigger,
    pub profile_id: ProfileId,
    pub evidence: EscalationEvidence,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BanditUpdatedPayload {
    pub learner_id: String,
    pub arm_id: BanditArmId,
    pub reward: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub id: String,
    pub event: GuidanceEvent,
    pub created_at: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new(event: GuidanceEvent) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event,
            created_at: Utc::now(),
        }
    }
}

/// Fan-out of analytics events. Events published while nobody subscribes
/// are dropped.
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
    event_count: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            event_count: AtomicU64::new(0),
        }
    }

    pub fn publish(&self, event: GuidanceEvent) {
        let envelope = EventEnvelope::new(event);
        self.event_count.fetch_add(1, Ordering::Relaxed);

        let event_type = envelope.event.event_type();
        let learner_id = envelope.event.learner_id().to_string();
        match self.sender.send(envelope) {
            Ok(sent_to) => debug!(event_type, learner_id = %learner_id, sent_to, "Event published"),
            Err(_) => debug!(event_type, learner_id = %learner_id, "No subscribers for event"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn event_count(&self) -> u64 {
        self.event_count.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
