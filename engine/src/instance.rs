//! Per-occurrence state machine records.

use futures_util::future::AbortHandle;
use tokio::time::Instant;

use latch_types::{DeferState, DefinitionId, LoadOutcome};

/// Pending scheduled callbacks for one instance. Each slot holds the abort
/// handle of a spawned sleep; cancelling a slot prevents its event from
/// being sent (stale events that already left the timer are rejected by the
/// state rank guard instead).
#[derive(Debug, Default)]
pub(crate) struct InstanceTimers {
    pub(crate) placeholder: Option<AbortHandle>,
    pub(crate) loading: Option<AbortHandle>,
    pub(crate) minimum: Option<AbortHandle>,
}

impl InstanceTimers {
    pub(crate) fn cancel_placeholder(&mut self) {
        Self::cancel(&mut self.placeholder);
    }

    pub(crate) fn cancel_loading(&mut self) {
        Self::cancel(&mut self.loading);
    }

    pub(crate) fn cancel_all(&mut self) {
        Self::cancel(&mut self.placeholder);
        Self::cancel(&mut self.loading);
        Self::cancel(&mut self.minimum);
    }

    fn cancel(slot: &mut Option<AbortHandle>) {
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }
}

/// One rendered occurrence of a defer block.
///
/// Holds only the relation to its definition (and thereby the shared load
/// task), never ownership of it. Destroyed with its timers when the
/// containing view goes away; the shared task outlives it.
#[derive(Debug)]
pub(crate) struct BlockInstance {
    pub(crate) definition: DefinitionId,
    pub(crate) state: DeferState,
    /// Whether `start_load` has been observed for this instance.
    pub(crate) triggered: bool,
    /// When the loading block became visible; gates the terminal transition.
    pub(crate) entered_loading: Option<Instant>,
    /// Terminal outcome held back by the loading block's minimum duration.
    pub(crate) held_outcome: Option<LoadOutcome>,
    /// What the renderer currently has mounted for this instance.
    pub(crate) rendered: Option<DeferState>,
    pub(crate) timers: InstanceTimers,
}

impl BlockInstance {
    pub(crate) fn new(definition: DefinitionId) -> Self {
        Self {
            definition,
            state: DeferState::Initial,
            triggered: false,
            entered_loading: None,
            held_outcome: None,
            rendered: None,
            timers: InstanceTimers::default(),
        }
    }
}
