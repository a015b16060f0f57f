//! Core enumerations for envelope state.

use serde::{Deserialize, Serialize};

/// Why processing terminated.
///
/// `MaxLoopExceeded` covers both edge-limit and generic bounds exhaustion
/// distinguished by `TerminationReason`'s free-form message; `BoundsExceeded`
/// is kept as a distinct variant for callers that want to branch on "ran out
/// of budget" without string matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalReason {
    Completed,
    MaxLoopExceeded,
    BoundsExceeded,
    ToolFailedFatally,
    UserDenied,
}

/// Interrupt type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptKind {
    Clarification,
    Confirmation,
    AgentReview,
    Checkpoint,
    ResourceExhausted,
    Timeout,
    SystemError,
}
