use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use typegraph_common::{TypeId, TypeIdAllocator};
use typegraph_schema::{InstanceReader, NoInstances, SchemaGraph, initialise};
use typegraph_storage::{MemoryStore, MemoryTransaction, SchemaStore};

pub const TIMEOUT: Duration = Duration::from_secs(1);

/// A freshly initialised store plus the process-wide id allocator.
pub struct Fixture {
    pub store: MemoryStore,
    pub allocator: Arc<TypeIdAllocator>,
}

impl Fixture {
    pub fn new() -> Self {
        let store = MemoryStore::new();
        initialise(&store, TIMEOUT).unwrap();
        Self {
            store,
            allocator: Arc::new(TypeIdAllocator::new()),
        }
    }

    pub fn graph(&self) -> SchemaGraph<MemoryTransaction> {
        self.graph_with(Arc::new(NoInstances))
    }

    pub fn graph_with(&self, instances: Arc<dyn InstanceReader>) -> SchemaGraph<MemoryTransaction> {
        SchemaGraph::new(self.store.begin(), self.allocator.clone(), instances)
    }
}

/// Instance-graph stub reporting instances for a fixed set of type ids.
#[derive(Debug, Default)]
pub struct FixedInstances(pub HashSet<TypeId>);

impl InstanceReader for FixedInstances {
    fn has_instances(&self, type_id: TypeId) -> bool {
        self.0.contains(&type_id)
    }
}

/// Resolve an id sequence to label names through the graph's vertex cache.
pub fn names(graph: &SchemaGraph<MemoryTransaction>, ids: impl Iterator<Item = TypeId>) -> Vec<String> {
    ids.map(|id| {
        graph
            .label_of(id)
            .unwrap()
            .map(|label| label.name().to_string())
            .unwrap_or_else(|| format!("#{id}"))
    })
    .collect()
}
