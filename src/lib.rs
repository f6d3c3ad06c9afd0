pub mod config;
pub mod decision;
pub mod engine;
pub mod error;
pub mod events;
pub mod generation;
pub mod ladder;
pub mod logging;
pub mod modeling;
pub mod profiles;
pub mod types;

pub use config::PolicyConfig;
pub use decision::{BanditArmId, LearnerBanditManager, ThompsonBandit};
pub use engine::{EscalationAttempt, GuidanceEngine, GuidanceResponse, LadderSession, StruggleAssessment};
pub use error::{LadderError, PolicyError};
pub use events::{EventBus, GuidanceEvent};
pub use generation::{generate_guidance, LlmGuidanceOutput, RetrievalBundle};
pub use ladder::{can_escalate, EscalationTrigger, GuidanceLadderState};
pub use profiles::{assign_profile, get_profile, AssignmentStrategy, EscalationProfile, ProfileId};
pub use types::{EventType, InteractionEvent, LearningOutcome, Rung};
