use std::sync::Arc;

use crate::arrays::{Array, ArrayType};
use crate::clients::Client;
use crate::device_lists::DeviceList;
use crate::devices::Device;
use crate::Error;

/// Major version of the cross-runtime tensor-exchange format produced by [`to_exchange_capsule`]. Capsules with a
/// newer major version than this are rejected on import.
pub const EXCHANGE_MAJOR_VERSION: u32 = 1;

/// Minor version of the cross-runtime tensor-exchange format produced by [`to_exchange_capsule`].
pub const EXCHANGE_MINOR_VERSION: u32 = 1;

/// Device type of an [`ExchangeDevice`], using the device type codes of the standardized exchange format.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ExchangeDeviceType {
    Cpu,
    Cuda,
    CudaHost,
    Metal,
    Rocm,
    RocmHost,
    OneApi,
}

impl ExchangeDeviceType {
    /// Standardized numeric code of this device type.
    pub fn code(&self) -> u32 {
        match self {
            Self::Cpu => 1,
            Self::Cuda => 2,
            Self::CudaHost => 3,
            Self::Metal => 8,
            Self::Rocm => 10,
            Self::RocmHost => 11,
            Self::OneApi => 14,
        }
    }

    /// Device type for the provided standardized numeric code.
    pub fn from_code(code: u32) -> Result<Self, Error> {
        match code {
            1 => Ok(Self::Cpu),
            2 => Ok(Self::Cuda),
            3 => Ok(Self::CudaHost),
            8 => Ok(Self::Metal),
            10 => Ok(Self::Rocm),
            11 => Ok(Self::RocmHost),
            14 => Ok(Self::OneApi),
            code => Err(Error::unimplemented(format!("unsupported exchange device type code {code}"))),
        }
    }
}

/// Value type codes of the standardized exchange format.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ExchangeTypeCode {
    Int,
    UInt,
    Float,
    BFloat,
    Complex,
    Bool,
}

/// Value type of an exchanged tensor: a type code plus the number of bits per value and the number of lanes
/// (always `1` for the types produced by this crate).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ExchangeDataType {
    pub code: ExchangeTypeCode,
    pub bits: u8,
    pub lanes: u16,
}

/// Device placement of an exchanged tensor.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ExchangeDevice {
    pub device_type: ExchangeDeviceType,
    pub device_id: i32,
}

/// One tensor in the standardized cross-runtime exchange format: versioned metadata plus the address of the device
/// memory holding the values. The capsule does not own the memory it points at; the exporting runtime keeps the
/// underlying buffer alive for as long as the capsule is in use.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ExchangeCapsule {
    pub major_version: u32,
    pub minor_version: u32,
    pub device: ExchangeDevice,
    pub data_type: ExchangeDataType,
    pub shape: Vec<i64>,
    /// Strides in numbers of values (not bytes), or `None` for the dense, row-major default layout.
    pub strides: Option<Vec<i64>>,
    pub byte_offset: u64,
    pub data_pointer: usize,
}

/// Returns the exchange value type that corresponds to the provided [`ArrayType`].
pub fn exchange_data_type(element_type: ArrayType) -> ExchangeDataType {
    let (code, bits) = match element_type {
        ArrayType::Predicate => (ExchangeTypeCode::Bool, 8),
        ArrayType::I8 => (ExchangeTypeCode::Int, 8),
        ArrayType::I16 => (ExchangeTypeCode::Int, 16),
        ArrayType::I32 => (ExchangeTypeCode::Int, 32),
        ArrayType::I64 => (ExchangeTypeCode::Int, 64),
        ArrayType::U8 => (ExchangeTypeCode::UInt, 8),
        ArrayType::U16 => (ExchangeTypeCode::UInt, 16),
        ArrayType::U32 => (ExchangeTypeCode::UInt, 32),
        ArrayType::U64 => (ExchangeTypeCode::UInt, 64),
        ArrayType::BF16 => (ExchangeTypeCode::BFloat, 16),
        ArrayType::F16 => (ExchangeTypeCode::Float, 16),
        ArrayType::F32 => (ExchangeTypeCode::Float, 32),
        ArrayType::F64 => (ExchangeTypeCode::Float, 64),
        ArrayType::C64 => (ExchangeTypeCode::Complex, 64),
        ArrayType::C128 => (ExchangeTypeCode::Complex, 128),
    };
    ExchangeDataType { code, bits, lanes: 1 }
}

/// Returns the [`ArrayType`] that corresponds to the provided exchange value type, or [`Error::Unimplemented`] for
/// types outside the portable subset handled by this crate.
pub fn array_type_from_exchange(data_type: &ExchangeDataType) -> Result<ArrayType, Error> {
    match (data_type.code, data_type.bits, data_type.lanes) {
        (ExchangeTypeCode::Bool, 8, 1) => Ok(ArrayType::Predicate),
        (ExchangeTypeCode::Int, 8, 1) => Ok(ArrayType::I8),
        (ExchangeTypeCode::Int, 16, 1) => Ok(ArrayType::I16),
        (ExchangeTypeCode::Int, 32, 1) => Ok(ArrayType::I32),
        (ExchangeTypeCode::Int, 64, 1) => Ok(ArrayType::I64),
        (ExchangeTypeCode::UInt, 8, 1) => Ok(ArrayType::U8),
        (ExchangeTypeCode::UInt, 16, 1) => Ok(ArrayType::U16),
        (ExchangeTypeCode::UInt, 32, 1) => Ok(ArrayType::U32),
        (ExchangeTypeCode::UInt, 64, 1) => Ok(ArrayType::U64),
        (ExchangeTypeCode::BFloat, 16, 1) => Ok(ArrayType::BF16),
        (ExchangeTypeCode::Float, 16, 1) => Ok(ArrayType::F16),
        (ExchangeTypeCode::Float, 32, 1) => Ok(ArrayType::F32),
        (ExchangeTypeCode::Float, 64, 1) => Ok(ArrayType::F64),
        (ExchangeTypeCode::Complex, 64, 1) => Ok(ArrayType::C64),
        (ExchangeTypeCode::Complex, 128, 1) => Ok(ArrayType::C128),
        (code, bits, lanes) => Err(Error::unimplemented(format!(
            "unsupported exchange data type: code={code:?}, bits={bits}, lanes={lanes}"
        ))),
    }
}

/// Negotiates the exchange device placement for the provided [`Device`]: the owning client's platform determines the
/// device type and the device's local hardware ID (falling back to its global ID) determines the device ID.
pub fn exchange_device(device: &Device) -> Result<ExchangeDevice, Error> {
    let client = device.client()?;
    let device_type = match client.raw_platform_name().as_ref() {
        "cpu" | "host" => ExchangeDeviceType::Cpu,
        "cuda" => ExchangeDeviceType::Cuda,
        "rocm" => ExchangeDeviceType::Rocm,
        "metal" => ExchangeDeviceType::Metal,
        platform => {
            return Err(Error::unimplemented(format!(
                "devices on platform '{platform}' cannot be exchanged with other runtimes"
            )));
        }
    };
    let device_id = device.local_hardware_id().unwrap_or_else(|| device.id()) as i32;
    Ok(ExchangeDevice { device_type, device_id })
}

/// Validates the stream that a capsule consumer asked the produced tensor to be synchronized to. Host-resident
/// device types accept no stream; accelerator streams follow the standardized exchange semantics, where `0` is
/// reserved as ambiguous and `-1` means "no synchronization requested".
fn validate_stream(device_type: ExchangeDeviceType, stream: Option<i64>) -> Result<(), Error> {
    match device_type {
        ExchangeDeviceType::Cpu | ExchangeDeviceType::CudaHost | ExchangeDeviceType::RocmHost
        | ExchangeDeviceType::Metal | ExchangeDeviceType::OneApi => match stream {
            None => Ok(()),
            Some(stream) => Err(Error::invalid_argument(format!(
                "stream {stream} was provided for a device type that does not accept streams"
            ))),
        },
        ExchangeDeviceType::Cuda | ExchangeDeviceType::Rocm => match stream {
            Some(0) => Err(Error::invalid_argument("stream 0 is reserved and may not be used for synchronization")),
            Some(stream) if stream < -1 => {
                Err(Error::invalid_argument(format!("stream {stream} is not a valid stream handle")))
            }
            _ => Ok(()),
        },
    }
}

/// Strides, in numbers of values, of the dense row-major layout of `shape`.
fn dense_strides(shape: &[i64]) -> Vec<i64> {
    let mut strides = vec![1i64; shape.len()];
    for dimension in (0..shape.len().saturating_sub(1)).rev() {
        strides[dimension] = strides[dimension + 1] * shape[dimension + 1];
    }
    strides
}

/// Exports an [`Array`] as an [`ExchangeCapsule`]. The array must be backed by exactly one buffer on a fully
/// addressable single-device list. The exporting client retains ownership of the buffer; the capsule aliases it.
pub fn to_exchange_capsule(array: &Array, stream: Option<i64>) -> Result<ExchangeCapsule, Error> {
    if array.buffers().len() != 1 {
        return Err(Error::invalid_argument(format!(
            "only single-buffer arrays can be exchanged, but this array has {} buffer(s)",
            array.buffers().len()
        )));
    }
    if !array.device_list().is_fully_addressable()? {
        return Err(Error::failed_precondition("only fully addressable arrays can be exchanged"));
    }
    let buffer = &array.buffers()[0];
    let device = array.client().lookup_device(buffer.device_id())?;
    let exchange_device = exchange_device(&device)?;
    validate_stream(exchange_device.device_type, stream)?;

    let element_type = buffer.element_type();
    let shape = buffer.dimensions().iter().map(|dimension| *dimension as i64).collect::<Vec<_>>();
    let strides = match buffer.byte_strides()? {
        None => None,
        Some(byte_strides) => {
            let byte_size = element_type.byte_size() as i64;
            let strides = byte_strides
                .iter()
                .map(|stride| {
                    if stride % byte_size == 0 {
                        Ok(stride / byte_size)
                    } else {
                        Err(Error::unimplemented(format!(
                            "buffer stride of {stride} byte(s) is not a whole number of {element_type} values"
                        )))
                    }
                })
                .collect::<Result<Vec<_>, _>>()?;
            Some(strides)
        }
    };
    Ok(ExchangeCapsule {
        major_version: EXCHANGE_MAJOR_VERSION,
        minor_version: EXCHANGE_MINOR_VERSION,
        device: exchange_device,
        data_type: exchange_data_type(element_type),
        shape,
        strides,
        byte_offset: 0,
        data_pointer: buffer.data_pointer()?,
    })
}

/// Imports an [`ExchangeCapsule`] produced by another runtime as an [`Array`] of the provided [`Client`]. The target
/// device is negotiated from the capsule's device placement, and the capsule memory is aliased rather than copied.
pub fn from_exchange_capsule(capsule: &ExchangeCapsule, client: &Client) -> Result<Array, Error> {
    if capsule.major_version > EXCHANGE_MAJOR_VERSION {
        return Err(Error::unimplemented(format!(
            "exchange capsule version {}.{} is newer than the supported version {}.{}",
            capsule.major_version, capsule.minor_version, EXCHANGE_MAJOR_VERSION, EXCHANGE_MINOR_VERSION
        )));
    }
    let element_type = array_type_from_exchange(&capsule.data_type)?;
    if capsule.shape.iter().any(|dimension| *dimension < 0) {
        return Err(Error::invalid_argument("exchange capsule has a negative dimension"));
    }
    if let Some(strides) = &capsule.strides {
        if *strides != dense_strides(&capsule.shape) {
            return Err(Error::unimplemented("only dense, row-major exchange capsules can be imported"));
        }
    }

    let device = client.lookup_addressable_device(capsule.device.device_id as usize)?;
    let negotiated = exchange_device(&device)?;
    if negotiated.device_type != capsule.device.device_type {
        return Err(Error::invalid_argument(format!(
            "exchange capsule is placed on a {:?} device, but this client provides {:?} devices",
            capsule.device.device_type, negotiated.device_type
        )));
    }

    let dimensions = capsule.shape.iter().map(|dimension| *dimension as u64).collect::<Vec<_>>();
    let buffer = client.backend().create_view_of_device_buffer(
        device.id(),
        element_type,
        dimensions.clone(),
        capsule.data_pointer + capsule.byte_offset as usize,
    )?;
    let device_list = DeviceList::from_devices(vec![Arc::new(device)])?;
    Array::new(client, element_type, dimensions, device_list, vec![buffer])
}

#[cfg(test)]
mod tests {
    use crate::exchange::{
        EXCHANGE_MAJOR_VERSION, ExchangeDataType, ExchangeDevice, ExchangeDeviceType, ExchangeTypeCode,
        array_type_from_exchange, exchange_data_type, from_exchange_capsule, to_exchange_capsule,
    };
    use crate::runtime::BufferBackend;
    use crate::tests::{test_array, test_client};
    use crate::{ArrayType, DeviceLike, Error};

    #[test]
    fn test_data_type_mapping() {
        for element_type in [
            ArrayType::Predicate,
            ArrayType::I8,
            ArrayType::I32,
            ArrayType::U64,
            ArrayType::BF16,
            ArrayType::F16,
            ArrayType::F32,
            ArrayType::C128,
        ] {
            let data_type = exchange_data_type(element_type);
            assert_eq!(array_type_from_exchange(&data_type).unwrap(), element_type);
        }
        assert_eq!(
            exchange_data_type(ArrayType::BF16),
            ExchangeDataType { code: ExchangeTypeCode::BFloat, bits: 16, lanes: 1 },
        );
        assert!(matches!(
            array_type_from_exchange(&ExchangeDataType { code: ExchangeTypeCode::Float, bits: 3, lanes: 1 }),
            Err(Error::Unimplemented { .. }),
        ));
    }

    #[test]
    fn test_device_type_codes() {
        for device_type in [
            ExchangeDeviceType::Cpu,
            ExchangeDeviceType::Cuda,
            ExchangeDeviceType::CudaHost,
            ExchangeDeviceType::Metal,
            ExchangeDeviceType::Rocm,
            ExchangeDeviceType::RocmHost,
            ExchangeDeviceType::OneApi,
        ] {
            assert_eq!(ExchangeDeviceType::from_code(device_type.code()).unwrap(), device_type);
        }
        assert!(ExchangeDeviceType::from_code(99).is_err());
    }

    #[test]
    fn test_capsule_round_trip() {
        let client = test_client(2);
        let array = test_array(&client, 1, ArrayType::F32, vec![4, 8]);
        let capsule = to_exchange_capsule(&array, None).unwrap();
        assert_eq!(capsule.major_version, EXCHANGE_MAJOR_VERSION);
        assert_eq!(capsule.device, ExchangeDevice { device_type: ExchangeDeviceType::Cpu, device_id: 1 });
        assert_eq!(capsule.data_type, exchange_data_type(ArrayType::F32));
        assert_eq!(capsule.shape, vec![4, 8]);
        assert_eq!(capsule.strides, None);

        let imported = from_exchange_capsule(&capsule, &client).unwrap();
        assert_eq!(imported.element_type(), ArrayType::F32);
        assert_eq!(imported.shape(), &[4, 8]);
        assert_eq!(imported.device_list().len(), 1);
        assert_eq!(imported.device_list().get(0).unwrap().identity().device_id, 1);
        assert_eq!(imported.buffers()[0].data_pointer().unwrap(), capsule.data_pointer);
    }

    #[test]
    fn test_export_rejects_streams_on_host_devices() {
        let client = test_client(1);
        let array = test_array(&client, 0, ArrayType::I32, vec![2]);
        assert!(matches!(to_exchange_capsule(&array, Some(1)), Err(Error::InvalidArgument { .. })));
        assert!(to_exchange_capsule(&array, None).is_ok());
    }

    #[test]
    fn test_import_rejects_newer_versions() {
        let client = test_client(1);
        let array = test_array(&client, 0, ArrayType::I32, vec![2]);
        let mut capsule = to_exchange_capsule(&array, None).unwrap();
        capsule.major_version = EXCHANGE_MAJOR_VERSION + 1;
        assert!(matches!(from_exchange_capsule(&capsule, &client), Err(Error::Unimplemented { .. })));
    }

    #[test]
    fn test_import_rejects_mismatched_device_types() {
        let client = test_client(1);
        let array = test_array(&client, 0, ArrayType::I32, vec![2]);
        let mut capsule = to_exchange_capsule(&array, None).unwrap();
        capsule.device.device_type = ExchangeDeviceType::Cuda;
        assert!(matches!(from_exchange_capsule(&capsule, &client), Err(Error::InvalidArgument { .. })));
    }

    #[test]
    fn test_import_rejects_non_dense_strides() {
        let client = test_client(1);
        let array = test_array(&client, 0, ArrayType::F32, vec![4, 8]);
        let mut capsule = to_exchange_capsule(&array, None).unwrap();
        capsule.strides = Some(vec![1, 4]);
        assert!(matches!(from_exchange_capsule(&capsule, &client), Err(Error::Unimplemented { .. })));

        let mut capsule = to_exchange_capsule(&array, None).unwrap();
        capsule.strides = Some(vec![8, 1]);
        assert!(from_exchange_capsule(&capsule, &client).is_ok());
    }
}
