use std::fmt::{Debug, Display};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::clients::Client;
use crate::device_lists::DeviceList;
use crate::runtime::BufferBackend;
use crate::Error;

static NEXT_ARRAY_UID: AtomicU64 = AtomicU64::new(1);

/// Type of the individual values stored in an [`Array`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArrayType {
    /// Predicate [`ArrayType`] that represents the `true` and `false` values.
    Predicate,

    /// [`ArrayType`] that represents signed 8-bit integer values.
    I8,

    /// [`ArrayType`] that represents signed 16-bit integer values.
    I16,

    /// [`ArrayType`] that represents signed 32-bit integer values.
    I32,

    /// [`ArrayType`] that represents signed 64-bit integer values.
    I64,

    /// [`ArrayType`] that represents unsigned 8-bit integer values.
    U8,

    /// [`ArrayType`] that represents unsigned 16-bit integer values.
    U16,

    /// [`ArrayType`] that represents unsigned 32-bit integer values.
    U32,

    /// [`ArrayType`] that represents unsigned 64-bit integer values.
    U64,

    /// [`ArrayType`] that represents 16-bit floating-point values with 8 exponent bits and 7 mantissa bits. This type
    /// offers a larger dynamic range than [`ArrayType::F16`] at the cost of lower precision.
    BF16,

    /// [`ArrayType`] that represents 16-bit floating-point values using the standard IEEE representation.
    F16,

    /// [`ArrayType`] that represents 32-bit floating-point values using the standard IEEE representation.
    F32,

    /// [`ArrayType`] that represents 64-bit floating-point values using the standard IEEE representation.
    F64,

    /// [`ArrayType`] that represents 64-bit complex values as pairs of 32-bit floating-point values.
    C64,

    /// [`ArrayType`] that represents 128-bit complex values as pairs of 64-bit floating-point values.
    C128,
}

impl ArrayType {
    /// Size of one value of this [`ArrayType`] in bytes.
    pub fn byte_size(&self) -> usize {
        match self {
            Self::Predicate | Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 | Self::BF16 | Self::F16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 | Self::C64 => 8,
            Self::C128 => 16,
        }
    }
}

impl Display for ArrayType {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Predicate => "pred",
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::BF16 => "bf16",
            Self::F16 => "f16",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::C64 => "c64",
            Self::C128 => "c128",
        };
        write!(formatter, "{name}")
    }
}

/// Array of values distributed over the devices of a [`DeviceList`], represented here only at the bookkeeping level:
/// element type, shape, device placement, and the runtime buffers backing the addressable shards. Buffer contents and
/// transfers belong to the runtime collaborator.
///
/// Live arrays register themselves with the owning [`Client`] so that diagnostics can enumerate them; registration is
/// removed when the last handle is dropped.
#[derive(Clone)]
pub struct Array {
    pub(crate) state: Arc<ArrayState>,
}

pub(crate) struct ArrayState {
    pub(crate) uid: u64,
    pub(crate) client: Client,
    pub(crate) element_type: ArrayType,
    pub(crate) shape: Vec<u64>,
    pub(crate) device_list: DeviceList,
    pub(crate) buffers: Vec<Arc<dyn BufferBackend>>,
}

impl Array {
    /// Constructs a new [`Array`] and registers it with the owning [`Client`]. When the provided [`DeviceList`] is in
    /// native representation, every buffer must live on one of the list's devices.
    pub fn new(
        client: &Client,
        element_type: ArrayType,
        shape: Vec<u64>,
        device_list: DeviceList,
        buffers: Vec<Arc<dyn BufferBackend>>,
    ) -> Result<Self, Error> {
        if let Ok(list) = device_list.runtime_device_list() {
            for buffer in &buffers {
                if !list.devices().iter().any(|device| device.id() == buffer.device_id()) {
                    return Err(Error::invalid_argument(format!(
                        "buffer on device {} does not belong to the array's device list",
                        buffer.device_id()
                    )));
                }
            }
        }
        let state = Arc::new(ArrayState {
            uid: NEXT_ARRAY_UID.fetch_add(1, Ordering::Relaxed),
            client: client.clone(),
            element_type,
            shape,
            device_list,
            buffers,
        });
        client.register_array(&state);
        Ok(Self { state })
    }

    /// [`Client`] that this [`Array`] was created through.
    pub fn client(&self) -> &Client {
        &self.state.client
    }

    /// Type of the individual values of this [`Array`].
    pub fn element_type(&self) -> ArrayType {
        self.state.element_type
    }

    /// Global shape of this [`Array`].
    pub fn shape(&self) -> &[u64] {
        &self.state.shape
    }

    /// Devices that this [`Array`] is distributed over.
    pub fn device_list(&self) -> &DeviceList {
        &self.state.device_list
    }

    /// Runtime buffers backing the addressable shards of this [`Array`].
    pub fn buffers(&self) -> &[Arc<dyn BufferBackend>] {
        &self.state.buffers
    }
}

impl Debug for Array {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "Array[type={}, shape={:?}, devices={}]",
            self.state.element_type, self.state.shape, self.state.device_list
        )
    }
}

impl Drop for ArrayState {
    fn drop(&mut self) {
        self.client.unregister_array(self.uid);
    }
}

#[cfg(test)]
mod tests {
    use crate::tests::{test_buffer, test_client};
    use crate::{Array, ArrayType};

    #[test]
    fn test_array_type_byte_sizes() {
        assert_eq!(ArrayType::Predicate.byte_size(), 1);
        assert_eq!(ArrayType::BF16.byte_size(), 2);
        assert_eq!(ArrayType::F32.byte_size(), 4);
        assert_eq!(ArrayType::C64.byte_size(), 8);
        assert_eq!(ArrayType::C128.byte_size(), 16);
        assert_eq!(format!("{}", ArrayType::F32), "f32");
        assert_eq!(format!("{}", ArrayType::Predicate), "pred");
    }

    #[test]
    fn test_array_registration() {
        let client = test_client(2);
        assert!(client.live_arrays().is_empty());

        let device_list = client.device_list(&client.devices()[..1]).unwrap();
        let buffer = test_buffer(0, ArrayType::F32, vec![2, 2]);
        let array = Array::new(&client, ArrayType::F32, vec![2, 2], device_list, vec![buffer]).unwrap();
        assert_eq!(array.element_type(), ArrayType::F32);
        assert_eq!(array.shape(), &[2, 2]);
        assert_eq!(array.device_list().len(), 1);
        assert_eq!(client.live_arrays().len(), 1);

        let clone = array.clone();
        drop(array);
        assert_eq!(client.live_arrays().len(), 1);
        drop(clone);
        assert!(client.live_arrays().is_empty());
    }

    #[test]
    fn test_array_buffers_must_match_device_list() {
        let client = test_client(2);
        let device_list = client.device_list(&client.devices()[..1]).unwrap();
        let buffer = test_buffer(1, ArrayType::F32, vec![2]);
        assert!(Array::new(&client, ArrayType::F32, vec![2], device_list, vec![buffer]).is_err());
    }

    #[test]
    fn test_array_registration_from_multiple_threads() {
        let client = test_client(4);
        std::thread::scope(|scope| {
            for index in 0..4 {
                let client = client.clone();
                scope.spawn(move || {
                    for _ in 0..16 {
                        let device_list = client.device_list(&client.devices()[index..index + 1]).unwrap();
                        let buffer = test_buffer(index, ArrayType::I32, vec![1]);
                        let array =
                            Array::new(&client, ArrayType::I32, vec![1], device_list, vec![buffer]).unwrap();
                        drop(array);
                    }
                });
            }
        });
        assert!(client.live_arrays().is_empty());
    }
}
