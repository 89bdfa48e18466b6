//! Renderer boundary.
//!
//! The engine never mounts visual content itself; it drives an external
//! renderer with state transitions. Calls for a given instance are strictly
//! serialized: the previously rendered state is torn down before the next
//! state is rendered, and no state is rendered twice in a row.

use latch_types::{DeferState, InstanceId};

/// External rendering surface consumed by the engine.
pub trait Renderer {
    /// Mount the content block for `state` on `instance`.
    ///
    /// Called with one of the public states, never `Initial`. Should be
    /// idempotent if called twice with the same state, though the engine
    /// avoids redundant calls.
    fn render(&mut self, instance: InstanceId, state: DeferState);

    /// Unmount whatever `render` previously put up for `instance`.
    fn teardown(&mut self, instance: InstanceId, state: DeferState);
}
