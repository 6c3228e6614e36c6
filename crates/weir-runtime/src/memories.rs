use std::fmt::{Debug, Display};
use std::sync::Arc;

use crate::runtime::{MemoryBackend, MemoryId};

/// Memory space owned by a runtime client. Instances are de-duplicated by the owning [`Client`](crate::Client)
/// registrar, so handles obtained repeatedly for the same underlying memory space compare equal.
#[derive(Clone)]
pub struct Memory {
    pub(crate) state: Arc<MemoryState>,
}

pub(crate) struct MemoryState {
    /// Unique identifier of the owning client, used for structural equality across clients.
    pub(crate) client_uid: u64,

    /// Underlying runtime memory space.
    pub(crate) backend: Arc<dyn MemoryBackend>,
}

impl Memory {
    /// ID of this [`Memory`] that is unique among all memory spaces of the owning client.
    pub fn id(&self) -> MemoryId {
        self.state.backend.id()
    }

    /// Platform-dependent string that uniquely identifies the kind of this [`Memory`].
    pub fn kind(&self) -> String {
        self.state.backend.kind()
    }
}

impl Display for Memory {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}_{}", self.kind().to_uppercase(), self.id())
    }
}

impl Debug for Memory {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "Memory[kind={}, id={}]", self.kind(), self.id())
    }
}

impl PartialEq for Memory {
    fn eq(&self, other: &Self) -> bool {
        self.state.client_uid == other.state.client_uid && self.id() == other.id()
    }
}

impl Eq for Memory {}

#[cfg(test)]
mod tests {
    use crate::tests::test_client;

    #[test]
    fn test_memory() {
        let client = test_client(4);
        let device = client.addressable_devices()[0].clone();
        let memory = device.default_memory().unwrap();
        assert_eq!(memory.kind(), "device");
        assert_eq!(format!("{memory}"), format!("DEVICE_{}", memory.id()));
        assert_eq!(format!("{memory:?}"), format!("Memory[kind=device, id={}]", memory.id()));

        let memories = device.addressable_memories().unwrap();
        assert_eq!(memories.len(), 2);
        assert_eq!(memories[0].kind(), "device");
        assert_eq!(memories[1].kind(), "pinned_host");

        // Handles are de-duplicated by the client registrar.
        assert_eq!(memory, memories[0]);
        assert_ne!(memory, memories[1]);
    }
}
