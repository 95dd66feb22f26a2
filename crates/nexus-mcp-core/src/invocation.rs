// crates/nexus-mcp-core/src/invocation.rs
// ============================================================================
// Module: Operation Invocation
// Description: Local state machine tracking one tool call's operation token.
// Purpose: Enforce monotonic transitions and exactly one terminal delivery.
// Dependencies: serde_json
// ============================================================================

//! ## Overview
//! An [`OperationInvocation`] caches what the bridge has observed about one
//! started operation. Transitions follow `Started -> Polling* -> terminal`.
//! The first terminal observation wins; later observations (including a late
//! `Completed` after a local cancel) are reported as
//! [`Observation::Discarded`] and never change the record.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;
use std::time::Instant;

use serde_json::Value;

use crate::registry::ToolName;
use crate::runtime::ErrorDetail;
use crate::runtime::OperationStatus;
use crate::runtime::OperationToken;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Local invocation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    /// Start acknowledged by the runtime; not yet polled.
    Started,
    /// At least one pending poll observed.
    Polling,
    /// Completed with an output.
    Completed,
    /// Failed with an error detail.
    Failed,
    /// Canceled.
    Canceled,
}

impl InvocationState {
    /// Returns true for terminal states.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }
}

/// Terminal outcome recorded for an invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationOutcome {
    /// Operation output.
    Output(Value),
    /// Runtime failure detail.
    Error(ErrorDetail),
    /// Canceled.
    Canceled,
}

/// Effect of applying one status observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Still pending; state is now `Polling`.
    Progressed,
    /// First terminal observation; the caller must deliver it.
    Terminal,
    /// Observation arrived after a terminal state and was ignored.
    Discarded,
}

/// Tracked tool invocation.
///
/// # Invariants
/// - Once terminal, `state` and `outcome` never change.
/// - Cancellation is requested at most once.
#[derive(Debug, Clone)]
pub struct OperationInvocation {
    /// Runtime token (source of truth).
    token: OperationToken,
    /// Invoked tool.
    tool_name: ToolName,
    /// Input the operation was started with.
    input: Value,
    /// Current local state.
    state: InvocationState,
    /// Start time.
    started_at: Instant,
    /// Terminal outcome once known.
    outcome: Option<InvocationOutcome>,
    /// Whether a cancel has been issued.
    cancel_requested: bool,
}

impl OperationInvocation {
    /// Creates a record for a freshly started operation.
    #[must_use]
    pub fn new(token: OperationToken, tool_name: ToolName, input: Value) -> Self {
        Self {
            token,
            tool_name,
            input,
            state: InvocationState::Started,
            started_at: Instant::now(),
            outcome: None,
            cancel_requested: false,
        }
    }

    /// Returns the runtime token.
    #[must_use]
    pub const fn token(&self) -> &OperationToken {
        &self.token
    }

    /// Returns the tool name.
    #[must_use]
    pub const fn tool_name(&self) -> &ToolName {
        &self.tool_name
    }

    /// Returns the start input.
    #[must_use]
    pub const fn input(&self) -> &Value {
        &self.input
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> InvocationState {
        self.state
    }

    /// Returns the terminal outcome, if any.
    #[must_use]
    pub const fn outcome(&self) -> Option<&InvocationOutcome> {
        self.outcome.as_ref()
    }

    /// Returns the time elapsed since start.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Returns true once a terminal state is recorded.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Applies a runtime status observation.
    pub fn observe(&mut self, status: &OperationStatus) -> Observation {
        if self.state.is_terminal() {
            return Observation::Discarded;
        }
        let (state, outcome) = match status {
            OperationStatus::Pending => {
                self.state = InvocationState::Polling;
                return Observation::Progressed;
            }
            OperationStatus::Completed(output) => {
                (InvocationState::Completed, InvocationOutcome::Output(output.clone()))
            }
            OperationStatus::Failed(detail) => {
                (InvocationState::Failed, InvocationOutcome::Error(detail.clone()))
            }
            OperationStatus::Canceled => (InvocationState::Canceled, InvocationOutcome::Canceled),
        };
        self.state = state;
        self.outcome = Some(outcome);
        Observation::Terminal
    }

    /// Claims the right to issue a cancel.
    ///
    /// Returns true only on the first call while the invocation is not
    /// terminal.
    pub const fn request_cancel(&mut self) -> bool {
        if self.cancel_requested || self.state.is_terminal() {
            return false;
        }
        self.cancel_requested = true;
        true
    }

    /// Returns true once a cancel has been claimed.
    #[must_use]
    pub const fn cancel_requested(&self) -> bool {
        self.cancel_requested
    }
}
