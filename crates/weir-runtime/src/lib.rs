//! Client-side object model of the Weir accelerator-runtime binding layer.
//!
//! This crate does not talk to hardware itself. It wraps a runtime client collaborator (the traits in [`runtime`])
//! and layers on the bookkeeping that user-level code works with: de-duplicated [`Device`] and [`Memory`] handles
//! owned by a [`Client`] registrar, live-[`Array`]/[`Executable`] diagnostics, and most importantly the
//! [`DeviceList`] abstraction that shardings resolve to.
//!
//! [`DeviceList`] is the heart of the crate: an ordered, immutable collection of devices that may be backed either
//! by a native runtime device list or by an ordered sequence of duck-typed [`DeviceLike`] objects from an
//! incompatible backend, with structural equality and hashing across both representations and write-once memoized
//! derived facts (addressability, process placement, memory kinds) that are safe under concurrent access.
//!
//! The [`shardings`] module holds the closed set of sharding shapes ([`SingleDeviceSharding`], [`NamedSharding`],
//! [`ExplicitSharding`]) and the bridge that resolves an opaque sharding value into a concrete [`DeviceList`] plus
//! partitioning information. The [`exchange`] module converts arrays to and from the standardized cross-runtime
//! tensor capsule format, including device and stream negotiation.

pub mod arrays;
pub mod clients;
pub mod device_lists;
pub mod devices;
pub mod errors;
pub mod exchange;
pub mod executables;
pub mod garbage;
pub mod memories;
pub mod protos;
pub mod runtime;
pub mod shardings;

pub use arrays::*;
pub use clients::*;
pub use device_lists::*;
pub use devices::*;
pub use errors::*;
pub use exchange::*;
pub use executables::*;
pub use memories::*;
pub use runtime::*;
pub use shardings::*;
