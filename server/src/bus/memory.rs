//! Single-process bus: publishing delivers straight through the local registry.

use super::{BusEvent, ConnectionRegistry, GroupBus, GroupName};

#[derive(Default)]
pub struct MemoryBus {
    registry: ConnectionRegistry,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GroupBus for MemoryBus {
    fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    fn publish(&self, group: &GroupName, event: BusEvent) {
        let delivered = self.registry.deliver(group, &event);
        tracing::debug!(group = %group, delivered = delivered, "Published group event");
    }
}
