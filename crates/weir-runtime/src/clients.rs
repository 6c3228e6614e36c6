use std::borrow::Cow;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use prost::Message;

use crate::arrays::{Array, ArrayState};
use crate::device_lists::DeviceList;
use crate::devices::{Device, DeviceState, next_namespace};
use crate::executables::{Executable, ExecutableState};
use crate::memories::{Memory, MemoryState};
use crate::runtime::{ClientBackend, DeviceBackend, DeviceId, LocalHardwareId, MemoryBackend, MemoryId, ProcessIndex};
use crate::{Error, protos};

/// Number of independently locked shards that the live-array registry is partitioned into. Arrays are assigned to
/// shards by a stable hash of their UID, bounding contention when many threads create and drop arrays on different
/// devices concurrently.
pub(crate) const ARRAY_REGISTRY_SHARD_COUNT: usize = 16;

/// Client of an accelerator runtime. This type wraps a [`ClientBackend`] and adds the bookkeeping that the runtime
/// itself does not provide: de-duplicated [`Device`] and [`Memory`] handles, and registries of the live [`Array`]s
/// and [`Executable`]s that were created through this client (used for diagnostics such as heap profiling).
///
/// [`Client`] is a cheaply clonable handle; all clones share one registrar.
#[derive(Clone)]
pub struct Client {
    pub(crate) state: Arc<ClientState>,
}

#[derive(Default)]
struct ArrayRegistryShard {
    entries: Mutex<HashMap<u64, Weak<ArrayState>>>,
}

pub(crate) struct ClientState {
    /// Process-unique identifier of this client, used as the identity namespace of its devices.
    uid: u64,

    /// Underlying runtime client.
    backend: Arc<dyn ClientBackend>,

    /// De-duplicated [`Device`] handles, keyed by [`DeviceId`].
    devices: Mutex<HashMap<DeviceId, Device>>,

    /// De-duplicated [`Memory`] handles, keyed by [`MemoryId`].
    memories: Mutex<HashMap<MemoryId, Memory>>,

    /// Live [`Array`] registry, sharded to bound lock contention. Walks hold at most one shard lock at a time.
    arrays: [ArrayRegistryShard; ARRAY_REGISTRY_SHARD_COUNT],

    /// Live [`Executable`] registry.
    executables: Mutex<HashMap<u64, Weak<ExecutableState>>>,
}

fn array_shard_index(uid: u64) -> usize {
    let mut hasher = DefaultHasher::new();
    uid.hash(&mut hasher);
    hasher.finish() as usize % ARRAY_REGISTRY_SHARD_COUNT
}

impl Client {
    /// Constructs a new [`Client`] wrapping the provided runtime client.
    pub fn new(backend: Arc<dyn ClientBackend>) -> Self {
        Self {
            state: Arc::new(ClientState {
                uid: next_namespace(),
                backend,
                devices: Mutex::new(HashMap::new()),
                memories: Mutex::new(HashMap::new()),
                arrays: std::array::from_fn(|_| ArrayRegistryShard::default()),
                executables: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Process-unique identifier of this [`Client`]. Serves as the identity namespace for the devices owned by this
    /// client (see [`DeviceIdentity`](crate::DeviceIdentity)).
    pub fn uid(&self) -> u64 {
        self.state.uid
    }

    /// Name of the platform that this [`Client`] runs on. GPU platforms are reported as "gpu" regardless of vendor;
    /// use [`Client::raw_platform_name`] for the unnormalized name.
    pub fn platform_name(&self) -> Cow<'_, str> {
        match self.state.backend.platform_name() {
            name if name == "cuda" || name == "rocm" => Cow::Borrowed("gpu"),
            name => name,
        }
    }

    /// Unnormalized name of the platform that this [`Client`] runs on (e.g., "cuda" rather than "gpu").
    pub fn raw_platform_name(&self) -> Cow<'_, str> {
        self.state.backend.platform_name()
    }

    /// Version string of the platform that this [`Client`] runs on.
    pub fn platform_version(&self) -> Cow<'_, str> {
        self.state.backend.platform_version()
    }

    /// Index of the host process that this [`Client`] belongs to. Always `0` in single-process settings.
    pub fn process_index(&self) -> ProcessIndex {
        self.state.backend.process_index()
    }

    /// Number of devices that are visible to this [`Client`], including devices owned by other processes.
    pub fn device_count(&self) -> usize {
        self.state.backend.devices().len()
    }

    /// Number of devices that this [`Client`] can issue commands to.
    pub fn addressable_device_count(&self) -> usize {
        self.state.backend.addressable_devices().len()
    }

    /// All devices that are visible to this [`Client`], including devices owned by other processes.
    pub fn devices(&self) -> Vec<Device> {
        self.state.backend.devices().iter().map(|backend| self.device_handle(backend)).collect()
    }

    /// Devices that this [`Client`] can issue commands to (i.e., devices owned by the local process).
    pub fn addressable_devices(&self) -> Vec<Device> {
        self.state.backend.addressable_devices().iter().map(|backend| self.device_handle(backend)).collect()
    }

    /// [`Device`] visible to this [`Client`] with the provided [`DeviceId`], or [`Error::NotFound`] if this client
    /// does not know of such a device.
    pub fn lookup_device(&self, id: DeviceId) -> Result<Device, Error> {
        self.state
            .backend
            .devices()
            .iter()
            .find(|backend| backend.id() == id)
            .map(|backend| self.device_handle(backend))
            .ok_or_else(|| Error::not_found(format!("no device with ID {id} is known to this client")))
    }

    /// Addressable [`Device`] of this [`Client`] with the provided [`LocalHardwareId`], or [`Error::NotFound`] if no
    /// addressable device reports that local hardware ID.
    pub fn lookup_addressable_device(&self, local_hardware_id: LocalHardwareId) -> Result<Device, Error> {
        self.state
            .backend
            .addressable_devices()
            .iter()
            .find(|backend| backend.local_hardware_id() == Some(local_hardware_id))
            .map(|backend| self.device_handle(backend))
            .ok_or_else(|| {
                Error::not_found(format!("no addressable device with local hardware ID {local_hardware_id}"))
            })
    }

    /// Constructs a [`DeviceList`] in native representation from the provided devices. All devices must be owned by
    /// this [`Client`]; constructing a list that mixes clients is only possible through
    /// [`DeviceList::from_devices`], which falls back to the dynamic representation.
    pub fn device_list(&self, devices: &[Device]) -> Result<DeviceList, Error> {
        let mut backends = Vec::with_capacity(devices.len());
        for device in devices {
            if device.state.client_uid != self.state.uid {
                return Err(Error::invalid_argument(format!(
                    "device {device} belongs to a different client than the one constructing the device list"
                )));
            }
            backends.push(device.backend().clone());
        }
        let list = self.state.backend.make_device_list(&backends)?;
        Ok(DeviceList::from_runtime(self.clone(), list))
    }

    /// Reconstructs a [`DeviceList`] from the provided Protobuf message by resolving the serialized device IDs
    /// against this [`Client`]'s devices.
    pub fn device_list_from_proto(&self, proto: &protos::DeviceList) -> Result<DeviceList, Error> {
        let devices = proto
            .device_ids
            .iter()
            .map(|id| self.lookup_device(*id as DeviceId))
            .collect::<Result<Vec<_>, _>>()?;
        self.device_list(&devices)
    }

    /// Reconstructs a [`DeviceList`] from data produced by [`DeviceList::serialize`](DeviceList::serialize).
    pub fn deserialize_device_list(&self, data: &[u8]) -> Result<DeviceList, Error> {
        let proto =
            protos::DeviceList::decode(data).map_err(|error| Error::invalid_argument(error.to_string()))?;
        self.device_list_from_proto(&proto)
    }

    /// Live [`Array`]s that were created through this [`Client`] and have not been dropped yet. The walk acquires one
    /// registry shard lock at a time.
    pub fn live_arrays(&self) -> Vec<Array> {
        let mut arrays = Vec::new();
        for shard in &self.state.arrays {
            let entries = shard.entries.lock();
            arrays.extend(entries.values().filter_map(|state| state.upgrade().map(|state| Array { state })));
        }
        arrays
    }

    /// Live [`Executable`]s that were loaded through this [`Client`] and have not been dropped yet.
    pub fn live_executables(&self) -> Vec<Executable> {
        let executables = self.state.executables.lock();
        executables.values().filter_map(|state| state.upgrade().map(|state| Executable { state })).collect()
    }

    /// Returns the de-duplicated [`Device`] handle for the provided runtime device, creating and registering it on
    /// first use so that repeated resolutions share one identity.
    pub(crate) fn device_handle(&self, backend: &Arc<dyn DeviceBackend>) -> Device {
        let mut devices = self.state.devices.lock();
        devices
            .entry(backend.id())
            .or_insert_with(|| Device {
                state: Arc::new(DeviceState {
                    client: Arc::downgrade(&self.state),
                    client_uid: self.state.uid,
                    backend: backend.clone(),
                }),
            })
            .clone()
    }

    /// Returns the de-duplicated [`Memory`] handle for the provided runtime memory space.
    pub(crate) fn memory_handle(&self, backend: &Arc<dyn MemoryBackend>) -> Memory {
        let mut memories = self.state.memories.lock();
        memories
            .entry(backend.id())
            .or_insert_with(|| {
                Memory { state: Arc::new(MemoryState { client_uid: self.state.uid, backend: backend.clone() }) }
            })
            .clone()
    }

    pub(crate) fn backend(&self) -> &Arc<dyn ClientBackend> {
        &self.state.backend
    }

    pub(crate) fn register_array(&self, state: &Arc<ArrayState>) {
        let shard = &self.state.arrays[array_shard_index(state.uid)];
        shard.entries.lock().insert(state.uid, Arc::downgrade(state));
    }

    pub(crate) fn unregister_array(&self, uid: u64) {
        let shard = &self.state.arrays[array_shard_index(uid)];
        shard.entries.lock().remove(&uid);
    }

    pub(crate) fn register_executable(&self, state: &Arc<ExecutableState>) {
        self.state.executables.lock().insert(state.uid, Arc::downgrade(state));
    }

    pub(crate) fn unregister_executable(&self, uid: u64) {
        self.state.executables.lock().remove(&uid);
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;
    use std::sync::Arc;

    use crate::tests::{TestClientBackend, test_client, test_multi_process_client};
    use crate::{Client, Error};

    #[test]
    fn test_client_accessors() {
        let client = test_client(4);
        assert_eq!(client.platform_name(), "host");
        assert_eq!(client.raw_platform_name(), "host");
        assert_eq!(client.platform_version(), "host 1.0");
        assert_eq!(client.process_index(), 0);
        assert_eq!(client.device_count(), 4);
        assert_eq!(client.addressable_device_count(), 4);
        assert!(client.lookup_device(7).is_err());
        assert_eq!(client.lookup_device(3).unwrap().id(), 3);
        assert_eq!(client.lookup_addressable_device(2).unwrap().id(), 2);
    }

    #[test]
    fn test_client_platform_name_normalization() {
        let client = Client::new(Arc::new(TestClientBackend::with_platform("cuda", 1)));
        assert_eq!(client.platform_name(), Cow::<str>::Borrowed("gpu"));
        assert_eq!(client.raw_platform_name(), "cuda");

        let client = Client::new(Arc::new(TestClientBackend::with_platform("rocm", 1)));
        assert_eq!(client.platform_name(), "gpu");

        let client = Client::new(Arc::new(TestClientBackend::with_platform("tpu", 1)));
        assert_eq!(client.platform_name(), "tpu");
    }

    #[test]
    fn test_client_uids_are_unique() {
        let first = test_client(1);
        let second = test_client(1);
        assert_ne!(first.uid(), second.uid());
    }

    #[test]
    fn test_multi_process_client_addressability() {
        // Four devices, two processes, local process index 0.
        let client = test_multi_process_client();
        assert_eq!(client.device_count(), 4);
        assert_eq!(client.addressable_device_count(), 2);
        assert_eq!(client.process_index(), 0);
        let addressable = client.addressable_devices();
        assert!(addressable.iter().all(|device| device.process_index().unwrap() == 0));
    }

    #[test]
    fn test_device_list_construction_rejects_foreign_devices() {
        let client = test_client(2);
        let other = test_client(2);
        let mut devices = client.devices();
        devices.push(other.devices()[0].clone());
        assert!(matches!(client.device_list(&devices), Err(Error::InvalidArgument { .. })));
    }
}
