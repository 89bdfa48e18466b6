//! Defer block engine - state machine and shared load orchestration.
//!
//! A defer block starts invisible, optionally shows placeholder and loading
//! content under timing thresholds, and settles on complete or error content
//! once its dependencies resolve. Many instances of one block definition
//! share a single in-flight dependency load; each instance runs its own
//! forward-only state machine against an external [`Renderer`].
//!
//! All state lives in a [`DeferEngine`] and mutates on one logical control
//! thread: triggers and teardown are direct `&mut self` calls, while timers
//! and background resolution report back through an event channel the caller
//! drains into [`DeferEngine::handle_event`]:
//!
//! ```ignore
//! let (mut engine, mut events) = DeferEngine::new(DeferBehavior::Playthrough, renderer);
//! let definition = engine.register_definition(block);
//! let instance = engine.create_instance(definition)?;
//! let handle = engine.start_load(instance)?;
//! while let Some(event) = events.recv().await {
//!     engine.handle_event(event);
//! }
//! ```

use std::collections::HashMap;
use std::time::Duration;

use futures_util::future::{AbortHandle, Abortable};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;

pub use latch_types::{
    ContentRef, DeferBehavior, DeferState, DefinitionId, InstanceId, LoadOutcome, LoadingConfig,
    PlaceholderConfig, ResolutionError,
};

mod definition;
mod instance;
mod registry;
mod renderer;
mod task;
pub mod timing;

pub use definition::{BlockDefinition, DependencyFuture, DependencyResolver};
pub use renderer::Renderer;
pub use task::{LoadHandle, LoadTaskState};

use instance::BlockInstance;
use registry::DeferRegistry;
use timing::{CompletionGate, DisplayTiming};

/// Errors surfaced by the engine's direct calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("unknown definition {0}")]
    UnknownDefinition(DefinitionId),
    #[error("unknown instance {0}")]
    UnknownInstance(InstanceId),
    #[error("force_state requires manual behavior mode")]
    NotManual,
    #[error("cannot force the internal initial state")]
    ForcedInitial,
}

/// Which per-instance deadline fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    ShowPlaceholder,
    ShowLoading,
    /// The loading block's minimum display duration elapsed.
    MinimumElapsed,
}

/// Events delivered back to the control thread. Background work never
/// mutates state directly; settlement and deadlines arrive here.
#[derive(Debug)]
pub enum EngineEvent {
    LoadSettled {
        definition: DefinitionId,
        outcome: LoadOutcome,
    },
    TimerFired {
        instance: InstanceId,
        timer: TimerKind,
    },
}

/// Receiving half of the engine's event channel.
pub struct EngineEvents {
    rx: mpsc::UnboundedReceiver<EngineEvent>,
}

impl EngineEvents {
    /// Wait for the next event. Returns `None` only if the engine was
    /// dropped.
    pub async fn recv(&mut self) -> Option<EngineEvent> {
        self.rx.recv().await
    }

    /// Take an already-queued event without waiting.
    pub fn try_recv(&mut self) -> Option<EngineEvent> {
        self.rx.try_recv().ok()
    }
}

/// The defer block engine: definitions, shared load tasks, instances, and
/// the renderer they drive.
pub struct DeferEngine<R: Renderer> {
    behavior: DeferBehavior,
    renderer: R,
    registry: DeferRegistry,
    instances: HashMap<InstanceId, BlockInstance>,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    next_definition: u64,
    next_instance: u64,
}

impl<R: Renderer> DeferEngine<R> {
    #[must_use]
    pub fn new(behavior: DeferBehavior, renderer: R) -> (Self, EngineEvents) {
        let (events_tx, rx) = mpsc::unbounded_channel();
        let engine = Self {
            behavior,
            renderer,
            registry: DeferRegistry::default(),
            instances: HashMap::new(),
            events_tx,
            next_definition: 0,
            next_instance: 0,
        };
        (engine, EngineEvents { rx })
    }

    /// Register a block definition and take ownership of it.
    pub fn register_definition(&mut self, definition: BlockDefinition) -> DefinitionId {
        let id = DefinitionId::new(self.next_definition);
        self.next_definition += 1;
        self.registry.insert(id, definition);
        id
    }

    /// Tear down a definition: abort an in-flight resolution, cancel every
    /// attached instance's timers, and unmount their rendered content.
    /// Outstanding [`LoadHandle`]s observe closure.
    pub fn drop_definition(&mut self, definition: DefinitionId) -> Result<(), EngineError> {
        let Some(mut entry) = self.registry.remove(definition) else {
            return Err(EngineError::UnknownDefinition(definition));
        };
        if let Some(task) = entry.task_mut() {
            task.abort_resolution();
        }
        for instance in entry.instances().to_vec() {
            if let Some(mut inst) = self.instances.remove(&instance) {
                inst.timers.cancel_all();
                if let Some(previous) = inst.rendered.take() {
                    self.renderer.teardown(instance, previous);
                }
            }
        }
        Ok(())
    }

    /// Create an instance of a registered definition.
    ///
    /// A late joiner - an instance created after the shared load already
    /// settled - immediately observes the cached outcome.
    pub fn create_instance(&mut self, definition: DefinitionId) -> Result<InstanceId, EngineError> {
        let Some(entry) = self.registry.entry_mut(definition) else {
            return Err(EngineError::UnknownDefinition(definition));
        };
        let id = InstanceId::new(self.next_instance);
        self.next_instance += 1;
        entry.register(id);
        let cached = entry.cached_outcome();
        self.instances.insert(id, BlockInstance::new(definition));
        if let Some(outcome) = cached {
            self.deliver_outcome(id, outcome);
        }
        Ok(id)
    }

    /// Destroy an instance: cancel its pending timers and unmount whatever
    /// it had rendered. The shared task is never cancelled here - late
    /// joiners still read its cached result.
    pub fn drop_instance(&mut self, instance: InstanceId) -> Result<(), EngineError> {
        let Some(mut inst) = self.instances.remove(&instance) else {
            return Err(EngineError::UnknownInstance(instance));
        };
        inst.timers.cancel_all();
        if let Some(previous) = inst.rendered.take() {
            self.renderer.teardown(instance, previous);
        }
        self.registry.unregister(inst.definition, instance);
        Ok(())
    }

    /// Trigger entry point: begin (or join) the shared dependency load and
    /// schedule this instance's placeholder/loading display.
    ///
    /// Idempotent per instance; the resolver runs at most once per
    /// definition no matter how many instances trigger. In Manual mode the
    /// call is inert apart from handing back a shared result handle.
    pub fn start_load(&mut self, instance: InstanceId) -> Result<LoadHandle, EngineError> {
        let Some(inst) = self.instances.get(&instance) else {
            return Err(EngineError::UnknownInstance(instance));
        };
        let definition = inst.definition;
        let terminal = inst.state.is_terminal();
        let already_triggered = inst.triggered;

        let Some(entry) = self.registry.entry_mut(definition) else {
            return Err(EngineError::UnknownDefinition(definition));
        };

        if self.behavior == DeferBehavior::Manual {
            tracing::debug!(%instance, "manual behavior: trigger ignored");
            return Ok(entry.task_or_create().handle());
        }

        let handle = entry.start_load(definition, &self.events_tx);
        if terminal || already_triggered {
            return Ok(handle);
        }
        if let Some(inst) = self.instances.get_mut(&instance) {
            inst.triggered = true;
        }

        // The shared load may already have settled (a sibling's trigger or a
        // prefetch): observe the cached outcome without timers.
        let cached = self
            .registry
            .entry(definition)
            .and_then(|entry| entry.cached_outcome());
        if let Some(outcome) = cached {
            self.deliver_outcome(instance, outcome);
            return Ok(handle);
        }

        let (has_placeholder, placeholder_config, has_loading, loading_config) = {
            let Some(entry) = self.registry.entry(definition) else {
                return Ok(handle);
            };
            (
                entry.definition.placeholder.is_some(),
                entry.definition.placeholder_config,
                entry.definition.loading.is_some(),
                entry.definition.loading_config,
            )
        };

        if has_placeholder {
            match timing::placeholder_display(placeholder_config) {
                DisplayTiming::ShowNow => self.apply_state(instance, DeferState::Placeholder),
                DisplayTiming::ShowAfter(delay) => {
                    self.schedule_timer(instance, TimerKind::ShowPlaceholder, delay);
                }
            }
        }
        if has_loading {
            match timing::loading_display(loading_config) {
                DisplayTiming::ShowNow => self.apply_state(instance, DeferState::Loading),
                DisplayTiming::ShowAfter(delay) => {
                    self.schedule_timer(instance, TimerKind::ShowLoading, delay);
                }
            }
        }
        Ok(handle)
    }

    /// Begin the shared dependency load without touching any instance state.
    /// The eventual settlement still fans out to registered instances.
    pub fn prefetch(&mut self, definition: DefinitionId) -> Result<LoadHandle, EngineError> {
        let Some(entry) = self.registry.entry_mut(definition) else {
            return Err(EngineError::UnknownDefinition(definition));
        };
        Ok(entry.start_load(definition, &self.events_tx))
    }

    /// Manual-mode control surface: force an instance into a target state,
    /// bypassing timers and task progress. Ordering still holds - forced
    /// regressions and post-terminal transitions are ignored.
    pub fn force_state(&mut self, instance: InstanceId, state: DeferState) -> Result<(), EngineError> {
        if self.behavior != DeferBehavior::Manual {
            return Err(EngineError::NotManual);
        }
        if state == DeferState::Initial {
            return Err(EngineError::ForcedInitial);
        }
        if !self.instances.contains_key(&instance) {
            return Err(EngineError::UnknownInstance(instance));
        }
        self.apply_state(instance, state);
        Ok(())
    }

    /// Apply one event from the channel. The caller guarantees events are
    /// fed from a single logical thread.
    pub fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::LoadSettled {
                definition,
                outcome,
            } => self.on_load_settled(definition, outcome),
            EngineEvent::TimerFired { instance, timer } => self.on_timer(instance, timer),
        }
    }

    /// Drain every already-queued event. Returns how many were handled.
    pub fn pump(&mut self, events: &mut EngineEvents) -> usize {
        let mut handled = 0;
        while let Some(event) = events.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Current render state of an instance, if it exists.
    #[must_use]
    pub fn visible_state(&self, instance: InstanceId) -> Option<DeferState> {
        self.instances.get(&instance).map(|inst| inst.state)
    }

    /// Progress of the shared load for a definition, if it exists.
    #[must_use]
    pub fn load_state(&self, definition: DefinitionId) -> Option<LoadTaskState> {
        self.registry
            .entry(definition)
            .map(|entry| entry.task().map_or(LoadTaskState::NotStarted, |task| task.state()))
    }

    fn on_load_settled(&mut self, definition: DefinitionId, outcome: LoadOutcome) {
        let recipients = {
            let Some(entry) = self.registry.entry_mut(definition) else {
                tracing::debug!(%definition, "load settled after definition teardown");
                return;
            };
            let Some(task) = entry.task_mut() else {
                tracing::error!(%definition, "load settled without a task");
                return;
            };
            task.settle(outcome.clone());
            entry.instances().to_vec()
        };
        tracing::debug!(%definition, ?outcome, recipients = recipients.len(), "shared load settled");
        for instance in recipients {
            self.deliver_outcome(instance, outcome.clone());
        }
    }

    fn on_timer(&mut self, instance: InstanceId, timer: TimerKind) {
        let held = {
            let Some(inst) = self.instances.get_mut(&instance) else {
                return;
            };
            match timer {
                TimerKind::ShowPlaceholder => {
                    inst.timers.placeholder = None;
                    None
                }
                TimerKind::ShowLoading => {
                    inst.timers.loading = None;
                    None
                }
                TimerKind::MinimumElapsed => {
                    inst.timers.minimum = None;
                    inst.held_outcome.take()
                }
            }
        };
        match timer {
            TimerKind::ShowPlaceholder => self.apply_state(instance, DeferState::Placeholder),
            TimerKind::ShowLoading => self.apply_state(instance, DeferState::Loading),
            TimerKind::MinimumElapsed => {
                if let Some(outcome) = held {
                    self.apply_state(instance, outcome.target_state());
                }
            }
        }
    }

    /// Route a terminal outcome to one instance, honoring the loading
    /// block's minimum display duration.
    fn deliver_outcome(&mut self, instance: InstanceId, outcome: LoadOutcome) {
        if self.behavior == DeferBehavior::Manual {
            return;
        }
        enum Action {
            Ignore,
            Terminal,
            Hold(Duration),
        }
        let action = {
            let Some(inst) = self.instances.get_mut(&instance) else {
                return;
            };
            if inst.state.is_terminal() {
                Action::Ignore
            } else {
                inst.timers.cancel_placeholder();
                inst.timers.cancel_loading();
                if inst.state == DeferState::Loading {
                    let config = self
                        .registry
                        .entry(inst.definition)
                        .map(|entry| entry.definition.loading_config)
                        .unwrap_or_default();
                    let entered = inst.entered_loading.unwrap_or_else(Instant::now);
                    match timing::completion_gate(config, entered, Instant::now()) {
                        CompletionGate::ReadyNow => Action::Terminal,
                        CompletionGate::HoldFor(remaining) => {
                            inst.held_outcome = Some(outcome.clone());
                            Action::Hold(remaining)
                        }
                    }
                } else {
                    Action::Terminal
                }
            }
        };
        match action {
            Action::Ignore => {}
            Action::Terminal => self.apply_state(instance, outcome.target_state()),
            Action::Hold(remaining) => {
                self.schedule_timer(instance, TimerKind::MinimumElapsed, remaining);
            }
        }
    }

    /// The one place instance state changes. Enforces the forward-only
    /// order, serializes renderer calls, and falls back to rendering
    /// nothing when the target state has no content block.
    fn apply_state(&mut self, instance: InstanceId, target: DeferState) {
        let Some(inst) = self.instances.get_mut(&instance) else {
            return;
        };
        if inst.state.is_terminal() {
            tracing::debug!(%instance, %target, "instance is terminal; ignoring transition");
            return;
        }
        if target.rank() <= inst.state.rank() {
            tracing::debug!(%instance, from = %inst.state, to = %target, "ignoring non-forward transition");
            return;
        }
        let Some(entry) = self.registry.entry(inst.definition) else {
            tracing::warn!(%instance, "instance attached to unknown definition");
            return;
        };
        let content = entry.definition.content_for(target);

        tracing::debug!(%instance, from = %inst.state, to = %target, "defer block transition");
        inst.state = target;
        match target {
            DeferState::Loading => {
                inst.entered_loading = Some(Instant::now());
                inst.timers.cancel_placeholder();
                inst.timers.cancel_loading();
            }
            DeferState::Complete | DeferState::Error => inst.timers.cancel_all(),
            DeferState::Initial | DeferState::Placeholder => inst.timers.cancel_placeholder(),
        }

        if let Some(previous) = inst.rendered.take() {
            self.renderer.teardown(instance, previous);
        }
        if content.is_some() {
            self.renderer.render(instance, target);
            inst.rendered = Some(target);
        } else {
            tracing::warn!(%instance, state = %target, "no content block configured; rendering nothing");
        }
    }

    /// Spawn a cancellable sleep that reports back through the event
    /// channel, and park its abort handle in the instance's timer slot.
    fn schedule_timer(&mut self, instance: InstanceId, timer: TimerKind, delay: Duration) {
        let (abort_handle, abort_registration) = AbortHandle::new_pair();
        let events = self.events_tx.clone();
        let deadline = async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(EngineEvent::TimerFired { instance, timer });
        };
        let abortable = Abortable::new(deadline, abort_registration);
        tokio::spawn(async move {
            let _ = abortable.await;
        });
        if let Some(inst) = self.instances.get_mut(&instance) {
            let slot = match timer {
                TimerKind::ShowPlaceholder => &mut inst.timers.placeholder,
                TimerKind::ShowLoading => &mut inst.timers.loading,
                TimerKind::MinimumElapsed => &mut inst.timers.minimum,
            };
            if let Some(stale) = slot.replace(abort_handle) {
                stale.abort();
            }
        } else {
            abort_handle.abort();
        }
    }
}
