use std::borrow::Cow;
use std::fmt::Debug;
use std::sync::Arc;

use crate::{ArrayType, Error};

/// Type alias used to represent device IDs, which are unique among devices of the same type (e.g., CPUs, GPUs)
/// and, on multi-host environments, are also unique across all devices and all hosts.
pub type DeviceId = usize;

/// Type alias used to represent the opaque local hardware IDs of devices (e.g., a CUDA device number).
pub type LocalHardwareId = usize;

/// Type alias used to represent memory space IDs, which are unique among all memories of the same type.
pub type MemoryId = usize;

/// Type alias used to represent the index of the host process that owns a client or a device.
pub type ProcessIndex = usize;

/// Runtime client collaborator interface. This is the narrow boundary through which the object model in this crate
/// talks to an actual accelerator runtime. Implementations own the physical devices and memory spaces for one
/// platform; everything above this trait (the [`Client`](crate::Client) registrar, [`Device`](crate::Device) handles,
/// [`DeviceList`](crate::DeviceList)s) is runtime-agnostic.
pub trait ClientBackend: Send + Sync {
    /// Name of the platform that this client runs on (e.g., "cpu", "cuda", "tpu").
    fn platform_name(&self) -> Cow<'_, str>;

    /// Version string of the platform that this client runs on.
    fn platform_version(&self) -> Cow<'_, str>;

    /// Index of the host process that this client belongs to. Always `0` in single-process settings.
    fn process_index(&self) -> ProcessIndex;

    /// All devices that are visible to this client, including devices owned by other processes.
    fn devices(&self) -> Vec<Arc<dyn DeviceBackend>>;

    /// Devices that this client can issue commands to (i.e., devices owned by the local process).
    fn addressable_devices(&self) -> Vec<Arc<dyn DeviceBackend>>;

    /// Constructs an ordered, immutable runtime device list from the provided devices. Fails with
    /// [`Error::InvalidArgument`] if any of the provided devices is foreign to this client.
    fn make_device_list(&self, devices: &[Arc<dyn DeviceBackend>]) -> Result<Arc<dyn DeviceListBackend>, Error>;

    /// Creates a buffer that aliases existing device memory without copying it. Used by the tensor-exchange bridge
    /// when importing capsules produced by other runtimes.
    fn create_view_of_device_buffer(
        &self,
        device: DeviceId,
        element_type: ArrayType,
        dimensions: Vec<u64>,
        data_pointer: usize,
    ) -> Result<Arc<dyn BufferBackend>, Error>;
}

/// Runtime device collaborator interface. Each fallible operation may fail independently and failures are never
/// retried by this layer (derived facts computed from them are cached, including cached failures).
pub trait DeviceBackend: Debug + Send + Sync {
    /// ID of this device. IDs are unique among devices of the same type and, in multi-host environments, they are
    /// also unique across all devices and all hosts.
    fn id(&self) -> DeviceId;

    /// Vendor-dependent string that uniquely identifies the kind of this device (e.g., "Tesla V100-SXM2-16GB").
    fn kind(&self) -> Result<String, Error>;

    /// Index of the host process that this device belongs to (i.e., is _addressable_ from). Note that this is not
    /// always identical to the process index of the owning client in multi-process settings, where each client can
    /// see devices from all processes but only a subset of them are addressable.
    fn process_index(&self) -> Result<ProcessIndex, Error>;

    /// Opaque local hardware ID of this device (e.g., its CUDA device number), if one is defined.
    fn local_hardware_id(&self) -> Option<LocalHardwareId>;

    /// Default memory space of this device (i.e., the memory in which data processed by this device is stored in by
    /// default).
    fn default_memory(&self) -> Result<Arc<dyn MemoryBackend>, Error>;

    /// Memory spaces that this device can address, with the default memory space first.
    fn memories(&self) -> Result<Vec<Arc<dyn MemoryBackend>>, Error>;
}

/// Runtime memory space collaborator interface.
pub trait MemoryBackend: Debug + Send + Sync {
    /// ID of this memory space that is unique among all memory spaces of the owning client.
    fn id(&self) -> MemoryId;

    /// Platform-dependent string that uniquely identifies the kind of this memory space (e.g., "device",
    /// "pinned_host").
    fn kind(&self) -> String;
}

/// Ordered, immutable runtime device list resource. Instances are scoped to the client that created them via
/// [`ClientBackend::make_device_list`] and released when the last reference is dropped, potentially through the
/// deferred [`garbage`](crate::garbage) sink.
pub trait DeviceListBackend: Send + Sync {
    /// Devices of this list, in construction order.
    fn devices(&self) -> &[Arc<dyn DeviceBackend>];
}

/// Runtime buffer collaborator interface. Only the boundary that the tensor-exchange bridge needs is represented
/// here; transfer and lifetime management of buffer contents belong to the runtime.
pub trait BufferBackend: Send + Sync {
    /// ID of the device that holds this buffer.
    fn device_id(&self) -> DeviceId;

    /// Element type of the values stored in this buffer.
    fn element_type(&self) -> ArrayType;

    /// Dimensions of this buffer.
    fn dimensions(&self) -> Vec<u64>;

    /// Address of the device memory backing this buffer, for handoff to external runtimes.
    fn data_pointer(&self) -> Result<usize, Error>;

    /// Strides of this buffer in bytes, or `None` if the buffer uses the dense, row-major default layout.
    fn byte_strides(&self) -> Result<Option<Vec<i64>>, Error>;
}
