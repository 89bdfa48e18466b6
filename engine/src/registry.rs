//! Definition bookkeeping.
//!
//! The registry ties each block definition to its shared load task and the
//! live instances attached to it, so one settlement fans out to every
//! instance. All access goes through the engine on the single control
//! thread; idempotence of task creation follows from the `&mut` discipline,
//! not from locking.

use std::collections::HashMap;

use tokio::sync::mpsc;

use latch_types::{DefinitionId, InstanceId, LoadOutcome};

use crate::EngineEvent;
use crate::definition::BlockDefinition;
use crate::task::{DependencyLoadTask, LoadHandle};

/// One definition plus the shared state hanging off it.
pub(crate) struct DefinitionEntry {
    pub(crate) definition: BlockDefinition,
    /// Created lazily on the first load request for the definition.
    task: Option<DependencyLoadTask>,
    /// Registration order; settlement fans out in this order.
    instances: Vec<InstanceId>,
}

impl DefinitionEntry {
    fn new(definition: BlockDefinition) -> Self {
        Self {
            definition,
            task: None,
            instances: Vec::new(),
        }
    }

    pub(crate) fn task(&self) -> Option<&DependencyLoadTask> {
        self.task.as_ref()
    }

    pub(crate) fn task_mut(&mut self) -> Option<&mut DependencyLoadTask> {
        self.task.as_mut()
    }

    pub(crate) fn task_or_create(&mut self) -> &mut DependencyLoadTask {
        self.task.get_or_insert_with(DependencyLoadTask::new)
    }

    /// Begin the shared load (idempotent) and hand back the shared result.
    pub(crate) fn start_load(
        &mut self,
        definition: DefinitionId,
        events: &mpsc::UnboundedSender<EngineEvent>,
    ) -> LoadHandle {
        let task = self.task.get_or_insert_with(DependencyLoadTask::new);
        task.start(definition, self.definition.resolver.as_deref(), events);
        task.handle()
    }

    pub(crate) fn cached_outcome(&self) -> Option<LoadOutcome> {
        self.task.as_ref().and_then(|task| task.outcome().cloned())
    }

    pub(crate) fn instances(&self) -> &[InstanceId] {
        &self.instances
    }

    pub(crate) fn register(&mut self, instance: InstanceId) {
        if !self.instances.contains(&instance) {
            self.instances.push(instance);
        }
    }

    pub(crate) fn unregister(&mut self, instance: InstanceId) {
        self.instances.retain(|registered| *registered != instance);
    }
}

#[derive(Default)]
pub(crate) struct DeferRegistry {
    entries: HashMap<DefinitionId, DefinitionEntry>,
}

impl DeferRegistry {
    pub(crate) fn insert(&mut self, id: DefinitionId, definition: BlockDefinition) {
        self.entries.insert(id, DefinitionEntry::new(definition));
    }

    pub(crate) fn entry(&self, id: DefinitionId) -> Option<&DefinitionEntry> {
        self.entries.get(&id)
    }

    pub(crate) fn entry_mut(&mut self, id: DefinitionId) -> Option<&mut DefinitionEntry> {
        self.entries.get_mut(&id)
    }

    pub(crate) fn remove(&mut self, id: DefinitionId) -> Option<DefinitionEntry> {
        self.entries.remove(&id)
    }

    pub(crate) fn unregister(&mut self, definition: DefinitionId, instance: InstanceId) {
        if let Some(entry) = self.entries.get_mut(&definition) {
            entry.unregister(instance);
        }
    }
}
