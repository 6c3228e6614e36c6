use std::collections::BTreeSet;
use std::fmt::{Debug, Display};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::ops::Range;
use std::sync::{Arc, OnceLock};

use prost::Message;

use crate::clients::Client;
use crate::devices::{Device, DeviceIdentity, DeviceLike};
use crate::garbage::{self, Garbage};
use crate::runtime::{DeviceListBackend, ProcessIndex};
use crate::{Error, protos};

/// Ordered, immutable collection of devices together with memoized derived facts (addressability, process placement,
/// memory kinds). This is the value that shardings resolve to and that arrays and executables are attached to.
///
/// A [`DeviceList`] holds one of two representations: a native runtime device list scoped to one [`Client`] (the
/// preferred form, cheaper to compare and required for operations like [`DeviceList::device_kind`]), or an ordered
/// sequence of opaque [`DeviceLike`] objects for backends whose devices are not structurally compatible with the
/// runtime device model. Construction from a device sequence upgrades to the native representation opportunistically;
/// see [`DeviceList::from_devices`].
///
/// Equality and hashing are structural over the ordered device identities and therefore representation-transparent:
/// a native list and a dynamic list holding the same devices in the same order compare equal and hash identically,
/// which allows mixing both forms as map keys. Equality is order-sensitive.
///
/// [`DeviceList`] is a cheaply clonable handle; all clones share one set of memoized fields. Every derived fact is
/// computed at most once for the life of the list, including derived facts whose computation failed.
#[derive(Clone)]
pub struct DeviceList {
    state: Arc<DeviceListState>,
}

pub(crate) enum Representation {
    /// Native runtime device list, scoped to the owning client.
    Runtime { list: Arc<dyn DeviceListBackend>, client: Client },

    /// Ordered sequence of opaque device-like objects from an external backend.
    Dynamic { devices: Vec<Arc<dyn DeviceLike>> },
}

/// Jointly memoized default memory kind and memory kind sequence; see [`DeviceList::default_memory_kind`].
struct MemoryKindInfo {
    default_memory_kind: Option<String>,
    memory_kinds: Vec<String>,
}

struct DeviceListState {
    representation: Representation,
    hash: OnceLock<u64>,
    process_indices: OnceLock<Result<BTreeSet<ProcessIndex>, Error>>,
    is_fully_addressable: OnceLock<Result<bool, Error>>,
    addressable: OnceLock<Result<DeviceList, Error>>,
    device_kind: OnceLock<Result<String, Error>>,
    memory_kind_info: OnceLock<Result<MemoryKindInfo, Error>>,
}

impl DeviceListState {
    fn new(representation: Representation) -> Self {
        Self {
            representation,
            hash: OnceLock::new(),
            process_indices: OnceLock::new(),
            is_fully_addressable: OnceLock::new(),
            addressable: OnceLock::new(),
            device_kind: OnceLock::new(),
            memory_kind_info: OnceLock::new(),
        }
    }
}

impl Drop for DeviceListState {
    fn drop(&mut self) {
        // The runtime list resource is handed to the deferred garbage sink rather than released inline, because
        // releasing it may need locks that the thread dropping the last handle is already holding.
        let representation = std::mem::replace(&mut self.representation, Representation::Dynamic { devices: Vec::new() });
        if let Representation::Runtime { list, .. } = representation {
            garbage::defer(Garbage::RuntimeDeviceList(list));
        }
    }
}

impl DeviceList {
    pub(crate) fn from_runtime(client: Client, list: Arc<dyn DeviceListBackend>) -> Self {
        Self { state: Arc::new(DeviceListState::new(Representation::Runtime { list, client })) }
    }

    /// Constructs a [`DeviceList`] from an ordered sequence of device-like objects. If every element is a runtime
    /// [`Device`] and all elements are owned by one client, the list is upgraded to the native representation;
    /// otherwise the sequence is kept as-is in the dynamic representation. The upgrade decision is made once, at
    /// construction time.
    ///
    /// A sequence spanning multiple clients is not an error: it deliberately falls back to the dynamic
    /// representation.
    pub fn from_devices(devices: Vec<Arc<dyn DeviceLike>>) -> Result<Self, Error> {
        if !devices.is_empty() {
            if let Some((client, backends)) = Self::classify_runtime(&devices) {
                let list = client.backend().make_device_list(&backends)?;
                return Ok(Self::from_runtime(client, list));
            }
        }
        Ok(Self { state: Arc::new(DeviceListState::new(Representation::Dynamic { devices })) })
    }

    /// Classifies the elements of a device sequence for the native-representation upgrade. Returns `None` at the
    /// first element that is not a runtime [`Device`] or that is owned by a different client than a previous element.
    fn classify_runtime(
        devices: &[Arc<dyn DeviceLike>],
    ) -> Option<(Client, Vec<Arc<dyn crate::runtime::DeviceBackend>>)> {
        let mut client: Option<Client> = None;
        let mut backends = Vec::with_capacity(devices.len());
        for device in devices {
            let device = device.as_any().downcast_ref::<Device>()?;
            let owner = device.client().ok()?;
            match &client {
                None => client = Some(owner),
                Some(existing) if existing.uid() == owner.uid() => {}
                Some(_) => {
                    tracing::debug!("device sequence spans multiple clients; keeping the dynamic representation");
                    return None;
                }
            }
            backends.push(device.backend().clone());
        }
        client.map(|client| (client, backends))
    }

    /// Number of devices in this [`DeviceList`].
    pub fn len(&self) -> usize {
        match &self.state.representation {
            Representation::Runtime { list, .. } => list.devices().len(),
            Representation::Dynamic { devices } => devices.len(),
        }
    }

    /// Returns `true` if this [`DeviceList`] contains no devices.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Device at the provided position. Negative indices count from the end of the list. For the native
    /// representation the device is resolved through the owning client registrar, so repeated queries return handles
    /// sharing one identity.
    pub fn get(&self, index: isize) -> Result<Arc<dyn DeviceLike>, Error> {
        let len = self.len() as isize;
        if index < -len || index >= len {
            return Err(Error::out_of_range(format!(
                "index {index} is out of range for a device list with {len} device(s)"
            )));
        }
        let index = if index < 0 { (index + len) as usize } else { index as usize };
        match &self.state.representation {
            Representation::Runtime { list, client } => Ok(Arc::new(client.device_handle(&list.devices()[index]))),
            Representation::Dynamic { devices } => Ok(devices[index].clone()),
        }
    }

    /// Devices at the provided positions, or [`Error::OutOfRange`] if the range does not lie within the list.
    pub fn get_slice(&self, range: Range<usize>) -> Result<Vec<Arc<dyn DeviceLike>>, Error> {
        if range.start > range.end || range.end > self.len() {
            return Err(Error::out_of_range(format!(
                "range {range:?} is out of range for a device list with {} device(s)",
                self.len()
            )));
        }
        Ok(range.map(|index| self.get(index as isize)).collect::<Result<Vec<_>, _>>()?)
    }

    /// Lazy, restartable iterator over the devices of this [`DeviceList`], in list order. The borrow ties each
    /// iteration to the lifetime of the list; iterating does not itself keep the list alive.
    pub fn iter(&self) -> Devices<'_> {
        Devices { list: self, index: 0 }
    }

    /// Materializes this [`DeviceList`] as an ordered device sequence. This is also the serialization surface of the
    /// list: feeding the result back through [`DeviceList::from_devices`] reconstructs an equal list (upgrading back
    /// to the native representation where possible).
    pub fn as_sequence(&self) -> Vec<Arc<dyn DeviceLike>> {
        self.iter().collect()
    }

    /// Underlying native runtime device list, or [`Error::InvalidArgument`] if this [`DeviceList`] holds devices that
    /// are not runtime devices.
    pub fn runtime_device_list(&self) -> Result<&Arc<dyn DeviceListBackend>, Error> {
        match &self.state.representation {
            Representation::Runtime { list, .. } => Ok(list),
            Representation::Dynamic { .. } => {
                Err(Error::invalid_argument("device list contains non-runtime devices"))
            }
        }
    }

    /// [`Client`] owning the native representation of this [`DeviceList`], if it has one.
    pub fn client(&self) -> Option<&Client> {
        match &self.state.representation {
            Representation::Runtime { client, .. } => Some(client),
            Representation::Dynamic { .. } => None,
        }
    }

    /// Ordered device identities of this [`DeviceList`]. Both representations produce identities in the same form,
    /// which is what makes equality and hashing representation-transparent.
    fn identities(&self) -> Vec<DeviceIdentity> {
        match &self.state.representation {
            Representation::Runtime { list, client } => {
                let client_uid = client.uid();
                list.devices().iter().map(|device| DeviceIdentity { client_uid, device_id: device.id() }).collect()
            }
            Representation::Dynamic { devices } => devices.iter().map(|device| device.identity()).collect(),
        }
    }

    /// Structural hash of this [`DeviceList`] over its ordered device identities. Computed once and memoized.
    pub fn hash(&self) -> u64 {
        *self.state.hash.get_or_init(|| {
            let identities = self.identities();
            let mut hasher = DefaultHasher::new();
            identities.len().hash(&mut hasher);
            for identity in &identities {
                identity.hash(&mut hasher);
            }
            hasher.finish()
        })
    }

    /// Distinct process indices across all devices of this [`DeviceList`]. Memoized, including memoized failure.
    pub fn process_indices(&self) -> Result<&BTreeSet<ProcessIndex>, Error> {
        self.state
            .process_indices
            .get_or_init(|| match &self.state.representation {
                Representation::Runtime { list, .. } => {
                    list.devices().iter().map(|device| device.process_index()).collect()
                }
                Representation::Dynamic { devices } => devices.iter().map(|device| device.process_index()).collect(),
            })
            .as_ref()
            .map_err(|error| error.clone())
    }

    /// Returns `true` if every device in this [`DeviceList`] is addressable from the local process (i.e., if every
    /// device's process index equals the local process index of its owning client). An empty list is vacuously fully
    /// addressable. Memoized.
    pub fn is_fully_addressable(&self) -> Result<bool, Error> {
        self.state
            .is_fully_addressable
            .get_or_init(|| {
                let process_indices = self.process_indices()?;
                if process_indices.is_empty() {
                    return Ok(true);
                }
                if process_indices.len() > 1 {
                    return Ok(false);
                }
                let local_process_index = match &self.state.representation {
                    Representation::Runtime { client, .. } => client.process_index(),
                    Representation::Dynamic { devices } => devices[0].client_process_index()?,
                };
                Ok(process_indices.iter().next() == Some(&local_process_index))
            })
            .clone()
    }

    /// Sub-list of the devices in this [`DeviceList`] that are addressable from the local process. If this list is
    /// fully addressable the same instance is returned; otherwise the filtered sub-list is constructed once and
    /// memoized. The sub-list is itself always fully addressable and may be empty (e.g., in a multi-process job with
    /// no local replicas).
    pub fn addressable_device_list(&self) -> Result<DeviceList, Error> {
        if self.is_fully_addressable()? {
            // Returned directly instead of going through the cache: a memoized self-reference would keep the list
            // alive forever.
            return Ok(self.clone());
        }
        self.state
            .addressable
            .get_or_init(|| match &self.state.representation {
                Representation::Runtime { list, client } => {
                    let local_process_index = client.process_index();
                    let mut addressable = Vec::new();
                    for device in list.devices() {
                        if device.process_index()? == local_process_index {
                            addressable.push(device.clone());
                        }
                    }
                    let list = client.backend().make_device_list(&addressable)?;
                    Ok(DeviceList::from_runtime(client.clone(), list))
                }
                Representation::Dynamic { devices } => {
                    let mut addressable: Vec<Arc<dyn DeviceLike>> = Vec::new();
                    for device in devices {
                        if device.process_index()? == device.client_process_index()? {
                            addressable.push(device.clone());
                        }
                    }
                    DeviceList::from_devices(addressable)
                }
            })
            .clone()
    }

    /// Device kind of the devices in this [`DeviceList`]. Requires the native representation and a non-empty list.
    /// The kind of device 0 is used; kind uniformity across the list is assumed and not verified. Memoized, including
    /// memoized failure.
    pub fn device_kind(&self) -> Result<&str, Error> {
        self.state
            .device_kind
            .get_or_init(|| {
                let list = self.runtime_device_list()?;
                let Some(device) = list.devices().first() else {
                    return Err(Error::failed_precondition("device list is empty"));
                };
                device.kind()
            })
            .as_ref()
            .map(|kind| kind.as_str())
            .map_err(|error| error.clone())
    }

    fn memory_kind_info(&self) -> Result<&MemoryKindInfo, Error> {
        self.state
            .memory_kind_info
            .get_or_init(|| match &self.state.representation {
                Representation::Runtime { list, .. } => {
                    let Some(device) = list.devices().first() else {
                        return Ok(MemoryKindInfo { default_memory_kind: None, memory_kinds: Vec::new() });
                    };
                    let default_memory = device.default_memory()?;
                    let memory_kinds = device.memories()?.iter().map(|memory| memory.kind()).collect();
                    Ok(MemoryKindInfo { default_memory_kind: Some(default_memory.kind()), memory_kinds })
                }
                Representation::Dynamic { devices } => {
                    let Some(device) = devices.first() else {
                        return Ok(MemoryKindInfo { default_memory_kind: None, memory_kinds: Vec::new() });
                    };
                    Ok(MemoryKindInfo {
                        default_memory_kind: Some(device.default_memory_kind()?),
                        memory_kinds: device.memory_kinds()?,
                    })
                }
            })
            .as_ref()
            .map_err(|error| error.clone())
    }

    /// Kind of the default memory of the devices in this [`DeviceList`], using device 0 as the representative, or
    /// `None` for an empty list. Jointly memoized with [`DeviceList::memory_kinds`]; a failed memory query is cached
    /// and re-surfaced on every subsequent call, never retried.
    pub fn default_memory_kind(&self) -> Result<Option<&str>, Error> {
        self.memory_kind_info().map(|info| info.default_memory_kind.as_deref())
    }

    /// Kinds of all memory spaces addressable from the devices in this [`DeviceList`], using device 0 as the
    /// representative. Empty for an empty list. Jointly memoized with [`DeviceList::default_memory_kind`].
    pub fn memory_kinds(&self) -> Result<&[String], Error> {
        self.memory_kind_info().map(|info| info.memory_kinds.as_slice())
    }

    /// Serializes this [`DeviceList`] to a Protobuf message of ordered device IDs. Requires the native
    /// representation.
    pub fn to_proto(&self) -> Result<protos::DeviceList, Error> {
        let list = self.runtime_device_list()?;
        Ok(protos::DeviceList { device_ids: list.devices().iter().map(|device| device.id() as u64).collect() })
    }

    /// Serializes this [`DeviceList`] into a byte array suitable for persistence or cross-process transmission of
    /// sharding metadata. Reconstructed with [`Client::deserialize_device_list`].
    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        Ok(self.to_proto()?.encode_to_vec())
    }
}

/// Iterator over the devices of a [`DeviceList`]; see [`DeviceList::iter`].
#[derive(Clone)]
pub struct Devices<'a> {
    list: &'a DeviceList,
    index: usize,
}

impl Iterator for Devices<'_> {
    type Item = Arc<dyn DeviceLike>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.list.len() {
            return None;
        }
        let device = self.list.get(self.index as isize).ok();
        self.index += 1;
        device
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.list.len().saturating_sub(self.index);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Devices<'_> {}

impl PartialEq for DeviceList {
    fn eq(&self, other: &Self) -> bool {
        // Pointer fast path, then memoized-hash reject. Each hash resolves under its own object's cell; the
        // structural comparison below runs without holding any lock, and never acquires two objects' locks at once.
        if Arc::ptr_eq(&self.state, &other.state) {
            return true;
        }
        if self.hash() != other.hash() {
            return false;
        }
        match (&self.state.representation, &other.state.representation) {
            (
                Representation::Runtime { list: lhs, client: lhs_client },
                Representation::Runtime { list: rhs, client: rhs_client },
            ) => {
                lhs_client.uid() == rhs_client.uid()
                    && lhs.devices().len() == rhs.devices().len()
                    && lhs.devices().iter().zip(rhs.devices().iter()).all(|(lhs, rhs)| lhs.id() == rhs.id())
            }
            _ => self.identities() == other.identities(),
        }
    }
}

impl Eq for DeviceList {}

impl Hash for DeviceList {
    fn hash<H: Hasher>(&self, hasher: &mut H) {
        hasher.write_u64(self.hash());
    }
}

impl Display for DeviceList {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "[")?;
        for (index, device) in self.iter().enumerate() {
            if index > 0 {
                write!(formatter, ", ")?;
            }
            write!(formatter, "{device}")?;
        }
        write!(formatter, "]")
    }
}

impl Debug for DeviceList {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "DeviceList{self}")
    }
}
