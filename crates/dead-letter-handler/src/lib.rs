//! Dead-letter handling (§4.9): poison detection, priority scoring,
//! pattern tracking, recovery-plan generation, and archived replay for
//! messages that exhausted retry in the event bus or a queue.

pub mod handler;
pub mod poison;
pub mod priority;
pub mod recovery;
pub mod types;

pub use handler::{DeadLetterError, DeadLetterHandler, Result};
pub use poison::{is_poison, RecurrenceRegistry};
pub use priority::{priority_score, PatternTracker};
pub use recovery::{analyze, apply_action, build_recovery_plan, repair_payload, RecoveryOutcome};
pub use types::{
    AnalysisResult, DeadLetterConfig, DeadLetterFilter, DeadLetterMessage, DeadLetterStats,
    FailureContext, FailureReason, RecoveryAction, RecoveryPlanStep,
};
