use std::any::Any;
use std::fmt::{Debug, Display};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::clients::{Client, ClientState};
use crate::runtime::{DeviceBackend, DeviceId, LocalHardwareId, ProcessIndex};
use crate::{Error, Memory};

/// Allocator for process-unique identity namespaces. The [`Client`] registrar draws its UID from this counter, and
/// foreign device collections must reserve their own namespace through [`DeviceIdentity::reserve_namespace`] so that
/// their identities never collide with runtime-owned devices.
static NEXT_NAMESPACE: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_namespace() -> u64 {
    NEXT_NAMESPACE.fetch_add(1, Ordering::Relaxed)
}

/// Stable identity of a device-like object, used for the structural equality and hashing of
/// [`DeviceList`](crate::DeviceList)s. Identities are pairs of a process-unique owner namespace (the owning client
/// UID for runtime devices) and the device ID within that namespace.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceIdentity {
    pub client_uid: u64,
    pub device_id: DeviceId,
}

impl DeviceIdentity {
    /// Reserves a fresh process-unique namespace for a foreign device collection. Implementations of [`DeviceLike`]
    /// that do not wrap runtime devices should reserve one namespace per logical client and use it for all of that
    /// client's devices.
    pub fn reserve_namespace() -> u64 {
        next_namespace()
    }
}

/// Represents device objects that can be collected into a [`DeviceList`](crate::DeviceList). This is the
/// compatibility seam for backends whose devices are not structurally compatible with the runtime device model: such
/// backends implement this trait directly and their devices are carried opaquely, while [`Device`] handles owned by a
/// runtime [`Client`] also implement it so that mixed construction paths can classify elements via [`as_any`].
///
/// [`identity`] must be cheap and total; every other operation is accessed dynamically and may fail at first use.
///
/// [`as_any`]: DeviceLike::as_any
/// [`identity`]: DeviceLike::identity
pub trait DeviceLike: Any + Debug + Display + Send + Sync {
    /// Stable identity of this device, used for structural equality and hashing.
    fn identity(&self) -> DeviceIdentity;

    /// Index of the host process that this device belongs to.
    fn process_index(&self) -> Result<ProcessIndex, Error>;

    /// Index of the host process that this device's own client belongs to (i.e., the process from which this device
    /// would be considered locally addressable).
    fn client_process_index(&self) -> Result<ProcessIndex, Error>;

    /// Kind of the default memory space of this device.
    fn default_memory_kind(&self) -> Result<String, Error>;

    /// Kinds of all memory spaces addressable from this device, with the default memory kind first.
    fn memory_kinds(&self) -> Result<Vec<String>, Error>;

    /// Returns `self` as a [`&dyn Any`](Any) so that callers can classify concrete device types.
    fn as_any(&self) -> &dyn Any;
}

/// Device owned by a runtime [`Client`] (e.g., a specific CPU, GPU, or TPU). Handles are de-duplicated by the owning
/// client registrar, so repeatedly resolving the same underlying runtime device yields handles sharing one identity.
#[derive(Clone)]
pub struct Device {
    pub(crate) state: Arc<DeviceState>,
}

pub(crate) struct DeviceState {
    /// Owning client registrar. Held weakly; the registrar owns its device handles strongly.
    pub(crate) client: Weak<ClientState>,

    /// UID of the owning client, stable even after the client is dropped.
    pub(crate) client_uid: u64,

    /// Underlying runtime device.
    pub(crate) backend: Arc<dyn DeviceBackend>,
}

impl Device {
    /// ID of this [`Device`]. IDs are unique among devices of the same type and, in multi-host environments, they are
    /// also unique across all devices and all hosts.
    pub fn id(&self) -> DeviceId {
        self.state.backend.id()
    }

    /// Vendor-dependent string that uniquely identifies the kind of this [`Device`].
    pub fn kind(&self) -> Result<String, Error> {
        self.state.backend.kind()
    }

    /// Index of the process that this [`Device`] belongs to (i.e., is _addressable_ from). Note that this is not
    /// always identical to the process index of the owning [`Client`] in a multi-process setting, where each client
    /// can see devices from all processes, but only a subset of them are addressable and have the same process index
    /// as the client.
    pub fn process_index(&self) -> Result<ProcessIndex, Error> {
        self.state.backend.process_index()
    }

    /// Opaque local hardware ID of this [`Device`] (e.g., its CUDA device number), if one is defined.
    pub fn local_hardware_id(&self) -> Option<LocalHardwareId> {
        self.state.backend.local_hardware_id()
    }

    /// [`Client`] that owns this [`Device`].
    pub fn client(&self) -> Result<Client, Error> {
        self.state
            .client
            .upgrade()
            .map(|state| Client { state })
            .ok_or_else(|| Error::failed_precondition("the client owning this device has been dropped"))
    }

    /// Default [`Memory`] of this [`Device`] (i.e., the memory in which data processed by this device is stored in by
    /// default).
    pub fn default_memory(&self) -> Result<Memory, Error> {
        let client = self.client()?;
        let memory = self.state.backend.default_memory()?;
        Ok(client.memory_handle(&memory))
    }

    /// [`Memory`]s that this [`Device`] can address.
    pub fn addressable_memories(&self) -> Result<Vec<Memory>, Error> {
        let client = self.client()?;
        let memories = self.state.backend.memories()?;
        Ok(memories.iter().map(|memory| client.memory_handle(memory)).collect())
    }

    pub(crate) fn backend(&self) -> &Arc<dyn DeviceBackend> {
        &self.state.backend
    }
}

impl Display for Device {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind() {
            Ok(kind) => write!(formatter, "{}(id={})", kind, self.id()),
            Err(error) => write!(formatter, "<failed to render device as string; {error}>"),
        }
    }
}

impl Debug for Device {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "Device[{:?}]", self.state.backend)
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        DeviceLike::identity(self) == DeviceLike::identity(other)
    }
}

impl Eq for Device {}

impl Hash for Device {
    fn hash<H: Hasher>(&self, hasher: &mut H) {
        DeviceLike::identity(self).hash(hasher);
    }
}

impl DeviceLike for Device {
    fn identity(&self) -> DeviceIdentity {
        DeviceIdentity { client_uid: self.state.client_uid, device_id: self.id() }
    }

    fn process_index(&self) -> Result<ProcessIndex, Error> {
        Device::process_index(self)
    }

    fn client_process_index(&self) -> Result<ProcessIndex, Error> {
        Ok(self.client()?.process_index())
    }

    fn default_memory_kind(&self) -> Result<String, Error> {
        Ok(self.state.backend.default_memory()?.kind())
    }

    fn memory_kinds(&self) -> Result<Vec<String>, Error> {
        Ok(self.state.backend.memories()?.iter().map(|memory| memory.kind()).collect())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use crate::devices::{DeviceIdentity, DeviceLike};
    use crate::tests::{test_client, test_foreign_device};

    #[test]
    fn test_device() {
        let client = test_client(4);
        let devices = client.devices();
        assert_eq!(devices.len(), 4);
        for (index, device) in devices.iter().enumerate() {
            assert_eq!(device.id(), index);
            assert_eq!(device.kind().unwrap(), "host");
            assert_eq!(device.process_index().unwrap(), 0);
            assert_eq!(device.local_hardware_id(), Some(index));
            assert_eq!(device.client().unwrap().uid(), client.uid());
            assert_eq!(format!("{device}"), format!("host(id={index})"));
        }
        assert_eq!(devices[0], devices[0]);
        assert_ne!(devices[0], devices[1]);

        // Resolving the same runtime device twice yields handles sharing one identity.
        let resolved = client.lookup_device(2).unwrap();
        assert_eq!(resolved, devices[2]);
        assert!(std::sync::Arc::ptr_eq(&resolved.state, &devices[2].state));
    }

    #[test]
    fn test_device_like_for_runtime_devices() {
        let client = test_client(2);
        let device = client.devices()[1].clone();
        assert_eq!(DeviceLike::identity(&device), DeviceIdentity { client_uid: client.uid(), device_id: 1 });
        assert_eq!(device.client_process_index().unwrap(), 0);
        assert_eq!(device.default_memory_kind().unwrap(), "device");
        assert_eq!(device.memory_kinds().unwrap(), vec!["device".to_string(), "pinned_host".to_string()]);
        assert!(device.as_any().downcast_ref::<crate::Device>().is_some());
    }

    #[test]
    fn test_foreign_device_identity_namespaces() {
        let namespace = DeviceIdentity::reserve_namespace();
        let device = test_foreign_device(namespace, 0, 0, 0);
        assert_eq!(device.identity(), DeviceIdentity { client_uid: namespace, device_id: 0 });
        assert!(device.as_any().downcast_ref::<crate::Device>().is_none());

        let client = test_client(1);
        assert_ne!(device.identity().client_uid, client.uid());
    }
}
