//! Protobuf messages used for the persistent serialization surfaces of this crate. The messages are hand-rolled
//! rather than generated because the wire contract is tiny and owned by this crate.

/// Serialized form of a [`DeviceList`](crate::DeviceList) in native representation: the ordered device IDs of the
/// list, resolved against the deserializing client's devices on reconstruction.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeviceList {
    #[prost(uint64, repeated, tag = "1")]
    pub device_ids: Vec<u64>,
}
