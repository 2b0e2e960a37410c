use std::fmt::Debug;

use typegraph_common::TypeId;

/// Read-only view of the instance ("thing") graph, consumed by the
/// abstractness and deletion validators.
pub trait InstanceReader: Debug + Send + Sync {
    fn has_instances(&self, type_id: TypeId) -> bool;
}

/// Null collaborator: no type has instances.
#[derive(Debug, Default)]
pub struct NoInstances;

impl InstanceReader for NoInstances {
    fn has_instances(&self, _type_id: TypeId) -> bool {
        false
    }
}
