//! Core domain types for Latch.
//!
//! This crate contains pure domain types with no IO, no async, and minimal
//! dependencies. Everything here can be used from any layer of the engine.

mod ids;
pub use ids::{ContentRef, DefinitionId, InstanceId};

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Render states
// ============================================================================

/// Render state of a defer block instance.
///
/// `Initial` is the internal pre-render sentinel; it precedes every public
/// state and is never handed to a renderer. Ordering between states is
/// expressed by [`DeferState::rank`] rather than the enum's discriminant so
/// the encoding stays an implementation detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeferState {
    /// Internal sentinel: the instance exists but nothing is rendered yet.
    Initial,
    Placeholder,
    Loading,
    /// Primary content is mounted. Terminal.
    Complete,
    /// The dependency load failed. Terminal.
    Error,
}

impl DeferState {
    /// Position of this state in the forward-only transition order.
    ///
    /// `Complete` and `Error` share a rank: they are alternative terminal
    /// states, neither of which may follow the other.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            DeferState::Initial => 0,
            DeferState::Placeholder => 1,
            DeferState::Loading => 2,
            DeferState::Complete | DeferState::Error => 3,
        }
    }

    /// Whether this state ends the instance's lifecycle.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, DeferState::Complete | DeferState::Error)
    }
}

impl fmt::Display for DeferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeferState::Initial => "initial",
            DeferState::Placeholder => "placeholder",
            DeferState::Loading => "loading",
            DeferState::Complete => "complete",
            DeferState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Global behavior mode for an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeferBehavior {
    /// No automatic transitions; an external caller forces target states.
    /// Used for deterministic test scenarios.
    Manual,
    /// Transitions run automatically from triggers, timers and load progress.
    #[default]
    Playthrough,
}

// ============================================================================
// Timing configuration
// ============================================================================

/// Timing thresholds for a loading block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LoadingConfig {
    /// Once shown, the loading block stays visible at least this long, even
    /// if the dependency load settles earlier.
    pub minimum_duration: Option<Duration>,
    /// The loading block must not appear until this much time has passed
    /// since the trigger. A load settling first skips the block entirely.
    pub after_delay: Option<Duration>,
}

/// Timing threshold for a placeholder block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlaceholderConfig {
    /// The placeholder must not appear until this much time has passed since
    /// the trigger. Avoids flicker for fast-resolving loads.
    pub after_delay: Option<Duration>,
}

// ============================================================================
// Load outcomes
// ============================================================================

/// Aggregate failure of a shared dependency load.
///
/// Stored as rendered text so the outcome stays `Clone` for the shared cache
/// that late joiners read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{failed} of {total} dependencies failed to resolve: {first_failure}")]
pub struct ResolutionError {
    pub failed: usize,
    pub total: usize,
    /// Rendered error chain of the first dependency that failed.
    pub first_failure: String,
}

/// Terminal outcome of a shared dependency load.
///
/// Cached for the lifetime of the definition; every waiter and every late
/// joiner observes the same value. Failure is permanent - a new load requires
/// tearing down and recreating the definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Complete,
    Failed(ResolutionError),
}

impl LoadOutcome {
    /// The instance state this outcome drives toward.
    #[must_use]
    pub fn target_state(&self) -> DeferState {
        match self {
            LoadOutcome::Complete => DeferState::Complete,
            LoadOutcome::Failed(_) => DeferState::Error,
        }
    }
}
