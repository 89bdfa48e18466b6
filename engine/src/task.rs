//! The shared dependency load.
//!
//! One [`DependencyLoadTask`] exists per block definition at a time. Every
//! instance's trigger funnels into the same task; the resolver runs at most
//! once, guarded by the monotonic task state rather than a lock (all task
//! mutation happens on the single control thread). The aggregate await of
//! the dependency futures runs on a spawned task and reports back through
//! the engine's event channel, so settlement is applied on the control
//! thread before any instance state changes.

use futures_util::future::{AbortHandle, Abortable, join_all};
use tokio::sync::{mpsc, watch};

use latch_types::{DefinitionId, LoadOutcome, ResolutionError};

use crate::EngineEvent;
use crate::definition::DependencyResolver;

/// Progress of the shared dependency load for one block definition.
///
/// Transitions are monotonic forward only:
/// `NotStarted -> Scheduled -> InProgress -> {Complete | Failed}`.
/// Once terminal, the state is immutable for the lifetime of the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadTaskState {
    NotStarted,
    Scheduled,
    InProgress,
    Complete,
    Failed,
}

/// Handle to the shared load result.
///
/// Cloneable; all handles observe the same cached outcome. Obtained from
/// `start_load`/`prefetch` on the engine.
#[derive(Debug, Clone)]
pub struct LoadHandle {
    rx: watch::Receiver<Option<LoadOutcome>>,
}

impl LoadHandle {
    /// Suspend until the shared load settles.
    ///
    /// Returns the cached outcome immediately if the load already settled,
    /// or `None` if the owning definition was torn down before settlement.
    pub async fn settled(mut self) -> Option<LoadOutcome> {
        loop {
            if let Some(outcome) = self.rx.borrow_and_update().clone() {
                return Some(outcome);
            }
            if self.rx.changed().await.is_err() {
                return self.rx.borrow().clone();
            }
        }
    }

    /// Non-blocking view of the cached outcome.
    #[must_use]
    pub fn outcome(&self) -> Option<LoadOutcome> {
        self.rx.borrow().clone()
    }
}

/// The deduplicated asynchronous resolution of a definition's dependencies.
pub(crate) struct DependencyLoadTask {
    state: LoadTaskState,
    outcome: Option<LoadOutcome>,
    result_tx: watch::Sender<Option<LoadOutcome>>,
    abort: Option<AbortHandle>,
}

impl DependencyLoadTask {
    pub(crate) fn new() -> Self {
        let (result_tx, _) = watch::channel(None);
        Self {
            state: LoadTaskState::NotStarted,
            outcome: None,
            result_tx,
            abort: None,
        }
    }

    pub(crate) fn state(&self) -> LoadTaskState {
        self.state
    }

    pub(crate) fn is_settled(&self) -> bool {
        matches!(self.state, LoadTaskState::Complete | LoadTaskState::Failed)
    }

    pub(crate) fn outcome(&self) -> Option<&LoadOutcome> {
        self.outcome.as_ref()
    }

    pub(crate) fn handle(&self) -> LoadHandle {
        LoadHandle {
            rx: self.result_tx.subscribe(),
        }
    }

    /// Begin the shared load if it has not run yet. Idempotent: any call
    /// past `NotStarted` returns without touching the resolver.
    pub(crate) fn start(
        &mut self,
        definition: DefinitionId,
        resolver: Option<&dyn DependencyResolver>,
        events: &mpsc::UnboundedSender<EngineEvent>,
    ) {
        if self.state != LoadTaskState::NotStarted {
            return;
        }
        self.state = LoadTaskState::Scheduled;
        let pending = resolver.map(|r| r.resolve()).unwrap_or_default();
        self.state = LoadTaskState::InProgress;

        let total = pending.len();
        let events = events.clone();
        let (abort_handle, abort_registration) = AbortHandle::new_pair();
        let resolution = async move {
            let results = join_all(pending).await;
            let mut failures: Vec<String> = results
                .into_iter()
                .filter_map(Result::err)
                .map(|err| format!("{err:#}"))
                .collect();
            let outcome = if failures.is_empty() {
                LoadOutcome::Complete
            } else {
                let failed = failures.len();
                LoadOutcome::Failed(ResolutionError {
                    failed,
                    total,
                    first_failure: failures.swap_remove(0),
                })
            };
            let _ = events.send(EngineEvent::LoadSettled {
                definition,
                outcome,
            });
        };
        let abortable = Abortable::new(resolution, abort_registration);
        tokio::spawn(async move {
            let _ = abortable.await;
        });
        self.abort = Some(abort_handle);
    }

    /// Record the terminal outcome. Called on the control thread only.
    pub(crate) fn settle(&mut self, outcome: LoadOutcome) {
        if self.is_settled() {
            debug_assert!(false, "load task settled twice");
            tracing::error!("load task settled twice; keeping the first outcome");
            return;
        }
        self.state = match outcome {
            LoadOutcome::Complete => LoadTaskState::Complete,
            LoadOutcome::Failed(_) => LoadTaskState::Failed,
        };
        self.outcome = Some(outcome.clone());
        let _ = self.result_tx.send(Some(outcome));
        self.abort = None;
    }

    /// Abort an in-flight resolution. Only definition teardown does this;
    /// removing instances never touches the shared task.
    pub(crate) fn abort_resolution(&mut self) {
        if let Some(handle) = self.abort.take() {
            handle.abort();
        }
    }
}
