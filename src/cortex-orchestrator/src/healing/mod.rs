//! Self-healing of failing tests.
//!
//! When a test fails, the driver hands a [`TestFailure`] to the session's
//! [`SelfHealingEngine`]. The engine runs three short-lived agents:
//!
//! 1. **Analyze**: classify the root cause ([`ErrorAnalysis`])
//! 2. **Plan**: produce ordered fix steps ([`FixPlan`])
//! 3. **Apply**: carry out the plan and report touched files
//!
//! and returns a [`FixResult`]. Re-running the test is left to the caller.
//! Each failure key (`suite:scenario`) gets a bounded number of attempts;
//! once exhausted the engine answers immediately and, if configured, flags
//! the result for escalation.
//!
//! Engines are per session and live in a [`SelfHealingRegistry`].
//! Progress is reported through a [`NotificationSink`].

pub mod engine;
pub mod heuristics;
pub mod notify;
pub mod prompts;
pub mod registry;
pub mod types;

pub use engine::{HealingError, SelfHealingEngine};
pub use heuristics::HEURISTIC_CONFIDENCE;
pub use notify::{
    BroadcastNotificationSink, HealingEvent, NoopNotificationSink, NotificationSink,
    SessionNotification, StatusEnvelope,
};
pub use registry::SelfHealingRegistry;
pub use types::{
    ErrorAnalysis, FixPlan, FixResult, FixStep, FixStepType, HealingState, HealingStats,
    RootCause, SelfHealingConfig, TestFailure,
};
