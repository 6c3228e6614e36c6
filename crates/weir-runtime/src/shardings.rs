use std::any::Any;
use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::Arc;

use thiserror::Error as ThisError;

use crate::device_lists::DeviceList;
use crate::devices::DeviceLike;
use crate::Error;

/// Error type for mesh/partition-specification definitions and for sharding resolution.
#[derive(ThisError, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ShardingError {
    /// Error returned when a mesh axis name is empty.
    #[error("mesh axis names must be non-empty")]
    EmptyMeshAxisName,

    /// Error returned when a mesh axis has size `0`.
    #[error("mesh axis '{axis_name}' must have size > 0")]
    InvalidMeshAxisSize { axis_name: String },

    /// Error returned when mesh axis names are not unique.
    #[error("mesh axis '{axis_name}' appears more than once")]
    DuplicateMeshAxisName { axis_name: String },

    /// Error returned when the number of mesh devices does not match the product of axis sizes.
    #[error("mesh has {actual_device_count} device(s), but axis sizes imply {expected_device_count} device(s)")]
    MeshDeviceCountMismatch { expected_device_count: usize, actual_device_count: usize },

    /// Error returned when a partitioned dimension references a mesh axis that does not exist.
    #[error("partitioning references unknown mesh axis '{axis_name}'")]
    UnknownMeshAxis { axis_name: String },

    /// Error returned when a partitioned dimension references no mesh axes.
    #[error("partition specification dimension #{dimension} has an empty mesh-axis list")]
    EmptyPartitionAxisList { dimension: usize },

    /// Error returned when a mesh axis appears more than once in a partition specification.
    #[error("mesh axis '{axis_name}' is used multiple times in the partition specification")]
    DuplicatePartitionAxis { axis_name: String },

    /// Error returned when a partition specification has more dimensions than the array being partitioned.
    #[error("partition specification rank {partition_rank} exceeds array rank {array_rank}")]
    RankMismatch { partition_rank: usize, array_rank: usize },

    /// Error returned when an array dimension is not divisible by the number of partitions assigned to it.
    #[error("array dimension #{dimension} of size {dimension_size} is not divisible by {partition_count} partition(s)")]
    UnevenDimensionPartition { dimension: usize, dimension_size: u64, partition_count: usize },

    /// Error returned when the shards of a partitioning do not cover the device mesh with a whole number of replicas.
    #[error("{shard_count} shard(s) cannot cover a mesh of {device_count} device(s) with a whole number of replicas")]
    IncompletePartition { shard_count: usize, device_count: usize },

    /// Error returned when the number of explicit shard assignments does not match the declared shard count.
    #[error("sharding declares {expected} shard(s), but {actual} shard assignment(s) were provided")]
    ShardCountMismatch { expected: usize, actual: usize },

    /// Error returned when an explicit shard assignment names a device that is absent from the declared device list.
    #[error("shard device {device} is absent from the sharding's declared device list")]
    ShardDeviceNotInList { device: String },

    /// Error returned when a sharding value is not one of the recognized sharding shapes.
    #[error("unsupported sharding kind: {sharding}")]
    UnsupportedShardingKind { sharding: String },
}

/// A named axis in a logical device mesh, with a human-readable name and a size (the number of devices along that
/// dimension of the grid).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MeshAxis {
    name: String,
    size: usize,
}

impl MeshAxis {
    /// Creates a mesh axis.
    pub fn new<N: Into<String>>(name: N, size: usize) -> Result<Self, ShardingError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ShardingError::EmptyMeshAxisName);
        }
        if size == 0 {
            return Err(ShardingError::InvalidMeshAxisSize { axis_name: name });
        }
        Ok(Self { name, size })
    }

    /// Name of this axis.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size of this axis.
    pub fn size(&self) -> usize {
        self.size
    }
}

/// Logical device mesh: named axes plus a concrete [`DeviceList`] in row-major order with respect to the axes. The
/// device ordering of the mesh is the device ordering of every sharding derived from it.
#[derive(Clone, Debug)]
pub struct Mesh {
    axes: Vec<MeshAxis>,
    devices: DeviceList,
}

impl Mesh {
    /// Creates a mesh from the provided axes and devices. The number of devices must equal the product of the axis
    /// sizes, and axis names must be unique.
    pub fn new(axes: Vec<MeshAxis>, devices: DeviceList) -> Result<Self, ShardingError> {
        let mut names = HashSet::new();
        for axis in &axes {
            if !names.insert(axis.name.as_str()) {
                return Err(ShardingError::DuplicateMeshAxisName { axis_name: axis.name.clone() });
            }
        }
        let expected_device_count = axes.iter().map(|axis| axis.size).product::<usize>();
        if expected_device_count != devices.len() {
            return Err(ShardingError::MeshDeviceCountMismatch {
                expected_device_count,
                actual_device_count: devices.len(),
            });
        }
        Ok(Self { axes, devices })
    }

    /// Axes of this mesh.
    pub fn axes(&self) -> &[MeshAxis] {
        &self.axes
    }

    /// Devices of this mesh, in row-major order with respect to the axes.
    pub fn devices(&self) -> &DeviceList {
        &self.devices
    }

    /// Axis of this mesh with the provided name, if it exists.
    pub fn axis(&self, name: &str) -> Option<&MeshAxis> {
        self.axes.iter().find(|axis| axis.name == name)
    }
}

/// Partitioning of a single array dimension across mesh axes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PartitionDimension {
    /// The dimension is replicated across all devices.
    Unsharded,

    /// The dimension is sharded across the named mesh axes, in major-to-minor order.
    Sharded(Vec<String>),
}

impl PartitionDimension {
    /// Creates a [`PartitionDimension`] sharded across a single mesh axis.
    pub fn sharded<N: Into<String>>(axis_name: N) -> Self {
        Self::Sharded(vec![axis_name.into()])
    }
}

/// Specification of how each dimension of an array maps to the axes of a [`Mesh`]. Dimensions beyond the rank of the
/// specification are treated as unsharded.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PartitionSpec {
    dimensions: Vec<PartitionDimension>,
}

impl PartitionSpec {
    /// Creates a partition specification from per-dimension partitionings.
    pub fn new(dimensions: Vec<PartitionDimension>) -> Self {
        Self { dimensions }
    }

    /// Creates a partition specification that replicates all `rank` dimensions.
    pub fn replicated(rank: usize) -> Self {
        Self { dimensions: vec![PartitionDimension::Unsharded; rank] }
    }

    /// Number of dimensions covered by this specification.
    pub fn rank(&self) -> usize {
        self.dimensions.len()
    }

    /// Per-dimension partitionings of this specification.
    pub fn dimensions(&self) -> &[PartitionDimension] {
        &self.dimensions
    }
}

/// Opaque sharding value consumed by the resolution bridge. The recognized shapes form a closed set
/// ([`SingleDeviceSharding`], [`NamedSharding`], [`ExplicitSharding`]); resolution classifies a value by identity
/// (concrete-type downcast), never by probing its behavior, and reports any other implementation as
/// [`ShardingError::UnsupportedShardingKind`].
pub trait Sharding: Debug + Send + Sync + 'static {
    /// Returns `self` as a [`&dyn Any`](Any) so that the resolution bridge can classify the concrete shape.
    fn as_any(&self) -> &dyn Any;
}

/// Sharding that places the whole array on a single device.
#[derive(Clone, Debug)]
pub struct SingleDeviceSharding {
    device: Arc<dyn DeviceLike>,
    memory_kind: Option<String>,
}

impl SingleDeviceSharding {
    /// Creates a sharding that places the whole array on the provided device.
    pub fn new(device: Arc<dyn DeviceLike>, memory_kind: Option<String>) -> Self {
        Self { device, memory_kind }
    }

    /// Device that the array is placed on.
    pub fn device(&self) -> &Arc<dyn DeviceLike> {
        &self.device
    }

    /// Memory kind that the array is placed in, if one was declared.
    pub fn memory_kind(&self) -> Option<&str> {
        self.memory_kind.as_deref()
    }
}

impl Sharding for SingleDeviceSharding {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Sharding described structurally by a [`Mesh`] and a [`PartitionSpec`].
#[derive(Clone, Debug)]
pub struct NamedSharding {
    mesh: Mesh,
    partition_spec: PartitionSpec,
    memory_kind: Option<String>,
}

impl NamedSharding {
    /// Creates a sharding that partitions arrays across the provided mesh according to the provided specification.
    pub fn new(mesh: Mesh, partition_spec: PartitionSpec, memory_kind: Option<String>) -> Self {
        Self { mesh, partition_spec, memory_kind }
    }

    /// Mesh that arrays are partitioned across.
    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    /// Specification of how array dimensions map to mesh axes.
    pub fn partition_spec(&self) -> &PartitionSpec {
        &self.partition_spec
    }

    /// Memory kind that the array is placed in, if one was declared.
    pub fn memory_kind(&self) -> Option<&str> {
        self.memory_kind.as_deref()
    }
}

impl Sharding for NamedSharding {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Assignment of one shard to a device, used by [`ExplicitSharding`].
#[derive(Clone, Debug)]
pub struct ShardAssignment {
    /// Device that holds the shard.
    pub device: Arc<dyn DeviceLike>,

    /// Shape of the shard on that device.
    pub shard_shape: Vec<u64>,
}

/// Sharding described by a fully explicit device-to-shard-shape mapping. The declared shard count is the length of
/// the declared device list; resolution validates that the assignments match it.
#[derive(Clone, Debug)]
pub struct ExplicitSharding {
    devices: DeviceList,
    shard_assignments: Vec<ShardAssignment>,
    memory_kind: Option<String>,
}

impl ExplicitSharding {
    /// Creates a sharding from an explicit device-to-shard-shape mapping.
    pub fn new(devices: DeviceList, shard_assignments: Vec<ShardAssignment>, memory_kind: Option<String>) -> Self {
        Self { devices, shard_assignments, memory_kind }
    }

    /// Declared devices of this sharding.
    pub fn devices(&self) -> &DeviceList {
        &self.devices
    }

    /// Explicit shard assignments of this sharding.
    pub fn shard_assignments(&self) -> &[ShardAssignment] {
        &self.shard_assignments
    }

    /// Memory kind that the array is placed in, if one was declared.
    pub fn memory_kind(&self) -> Option<&str> {
        self.memory_kind.as_deref()
    }
}

impl Sharding for ExplicitSharding {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Structural partitioning derived from a [`NamedSharding`]: the number of partitions per array dimension plus the
/// replication factor needed for the shards to cover the full mesh. Shard `s` of replica `r` is held by mesh device
/// `s * replication_factor + r` in mesh device order.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PartitionDescriptor {
    /// Number of partitions of each array dimension.
    pub dimension_partitions: Vec<usize>,

    /// Number of devices that hold each shard.
    pub replication_factor: usize,
}

impl PartitionDescriptor {
    /// Number of distinct shards described by this descriptor.
    pub fn shard_count(&self) -> usize {
        self.dimension_partitions.iter().product()
    }
}

/// Concrete result of resolving an opaque [`Sharding`] value: the device list that the computation runs on, the
/// declared memory kind, and the per-shape partitioning information of the recognized shape.
#[derive(Clone, Debug)]
pub enum ResolvedSharding {
    /// The whole array lives on one device.
    SingleDevice { device_list: DeviceList, memory_kind: Option<String> },

    /// The array is partitioned structurally across a device mesh.
    Partitioned { device_list: DeviceList, memory_kind: Option<String>, descriptor: PartitionDescriptor },

    /// The array's shards are assigned to devices explicitly.
    Explicit { device_list: DeviceList, memory_kind: Option<String>, shard_shapes: Vec<Vec<u64>> },
}

impl ResolvedSharding {
    /// Device list that the resolved sharding runs on.
    pub fn device_list(&self) -> &DeviceList {
        match self {
            Self::SingleDevice { device_list, .. }
            | Self::Partitioned { device_list, .. }
            | Self::Explicit { device_list, .. } => device_list,
        }
    }

    /// Declared memory kind of the resolved sharding.
    pub fn memory_kind(&self) -> Option<&str> {
        match self {
            Self::SingleDevice { memory_kind, .. }
            | Self::Partitioned { memory_kind, .. }
            | Self::Explicit { memory_kind, .. } => memory_kind.as_deref(),
        }
    }
}

/// Returns the concrete [`DeviceList`] of an opaque sharding value, or
/// [`ShardingError::UnsupportedShardingKind`] if the value is not one of the recognized shapes.
pub fn sharding_device_list(sharding: &dyn Sharding) -> Result<DeviceList, Error> {
    let any = sharding.as_any();
    if let Some(sharding) = any.downcast_ref::<SingleDeviceSharding>() {
        DeviceList::from_devices(vec![sharding.device.clone()])
    } else if let Some(sharding) = any.downcast_ref::<NamedSharding>() {
        Ok(sharding.mesh.devices.clone())
    } else if let Some(sharding) = any.downcast_ref::<ExplicitSharding>() {
        Ok(sharding.devices.clone())
    } else {
        Err(unsupported(sharding))
    }
}

/// Returns the declared memory kind of an opaque sharding value, or
/// [`ShardingError::UnsupportedShardingKind`] if the value is not one of the recognized shapes.
pub fn sharding_memory_kind(sharding: &dyn Sharding) -> Result<Option<String>, Error> {
    let any = sharding.as_any();
    if let Some(sharding) = any.downcast_ref::<SingleDeviceSharding>() {
        Ok(sharding.memory_kind.clone())
    } else if let Some(sharding) = any.downcast_ref::<NamedSharding>() {
        Ok(sharding.memory_kind.clone())
    } else if let Some(sharding) = any.downcast_ref::<ExplicitSharding>() {
        Ok(sharding.memory_kind.clone())
    } else {
        Err(unsupported(sharding))
    }
}

/// Resolves an opaque sharding value against the shape of the array being sharded, producing the concrete device
/// list and partitioning information that the runtime needs. Values outside the recognized closed set of shapes fail
/// with [`ShardingError::UnsupportedShardingKind`]; they are never coerced.
pub fn resolve_sharding(sharding: &dyn Sharding, shape: &[u64]) -> Result<ResolvedSharding, Error> {
    let any = sharding.as_any();
    if let Some(sharding) = any.downcast_ref::<SingleDeviceSharding>() {
        Ok(ResolvedSharding::SingleDevice {
            device_list: DeviceList::from_devices(vec![sharding.device.clone()])?,
            memory_kind: sharding.memory_kind.clone(),
        })
    } else if let Some(sharding) = any.downcast_ref::<NamedSharding>() {
        let descriptor = partition_descriptor(&sharding.mesh, &sharding.partition_spec, shape)?;
        Ok(ResolvedSharding::Partitioned {
            device_list: sharding.mesh.devices.clone(),
            memory_kind: sharding.memory_kind.clone(),
            descriptor,
        })
    } else if let Some(sharding) = any.downcast_ref::<ExplicitSharding>() {
        let shard_shapes = explicit_shard_shapes(sharding)?;
        Ok(ResolvedSharding::Explicit {
            device_list: sharding.devices.clone(),
            memory_kind: sharding.memory_kind.clone(),
            shard_shapes,
        })
    } else {
        Err(unsupported(sharding))
    }
}

fn unsupported(sharding: &dyn Sharding) -> Error {
    ShardingError::UnsupportedShardingKind { sharding: format!("{sharding:?}") }.into()
}

/// Derives the structural partitioning of a [`NamedSharding`] for the provided array shape. Exactly one device is
/// assigned per shard replica and the shards cover the full mesh; anything else fails.
fn partition_descriptor(
    mesh: &Mesh,
    partition_spec: &PartitionSpec,
    shape: &[u64],
) -> Result<PartitionDescriptor, ShardingError> {
    if partition_spec.rank() > shape.len() {
        return Err(ShardingError::RankMismatch { partition_rank: partition_spec.rank(), array_rank: shape.len() });
    }
    let mut used_axes = HashSet::new();
    let mut dimension_partitions = Vec::with_capacity(shape.len());
    for (dimension, dimension_size) in shape.iter().enumerate() {
        let mut partition_count = 1usize;
        if let Some(PartitionDimension::Sharded(axis_names)) = partition_spec.dimensions().get(dimension) {
            if axis_names.is_empty() {
                return Err(ShardingError::EmptyPartitionAxisList { dimension });
            }
            for axis_name in axis_names {
                let axis = mesh
                    .axis(axis_name)
                    .ok_or_else(|| ShardingError::UnknownMeshAxis { axis_name: axis_name.clone() })?;
                if !used_axes.insert(axis_name.clone()) {
                    return Err(ShardingError::DuplicatePartitionAxis { axis_name: axis_name.clone() });
                }
                partition_count *= axis.size();
            }
        }
        if partition_count > 1 && dimension_size % partition_count as u64 != 0 {
            return Err(ShardingError::UnevenDimensionPartition {
                dimension,
                dimension_size: *dimension_size,
                partition_count,
            });
        }
        dimension_partitions.push(partition_count);
    }
    let shard_count = dimension_partitions.iter().product::<usize>();
    let device_count = mesh.devices.len();
    if shard_count == 0 || device_count % shard_count != 0 {
        return Err(ShardingError::IncompletePartition { shard_count, device_count });
    }
    Ok(PartitionDescriptor { dimension_partitions, replication_factor: device_count / shard_count })
}

/// Validates an [`ExplicitSharding`] and extracts its per-shard shapes in declaration order.
fn explicit_shard_shapes(sharding: &ExplicitSharding) -> Result<Vec<Vec<u64>>, ShardingError> {
    let expected = sharding.devices.len();
    if sharding.shard_assignments.len() != expected {
        return Err(ShardingError::ShardCountMismatch { expected, actual: sharding.shard_assignments.len() });
    }
    let declared = sharding.devices.iter().map(|device| device.identity()).collect::<HashSet<_>>();
    for assignment in &sharding.shard_assignments {
        if !declared.contains(&assignment.device.identity()) {
            return Err(ShardingError::ShardDeviceNotInList { device: format!("{}", assignment.device) });
        }
    }
    Ok(sharding.shard_assignments.iter().map(|assignment| assignment.shard_shape.clone()).collect())
}

#[cfg(test)]
mod tests {
    use std::any::Any;
    use std::sync::Arc;

    use crate::shardings::{
        ExplicitSharding, Mesh, MeshAxis, NamedSharding, PartitionDimension, PartitionSpec, ResolvedSharding,
        ShardAssignment, Sharding, ShardingError, SingleDeviceSharding, resolve_sharding, sharding_device_list,
        sharding_memory_kind,
    };
    use crate::tests::test_client;
    use crate::{DeviceLike, Error};

    fn test_mesh(client: &crate::Client) -> Mesh {
        let devices = client.device_list(&client.devices()).unwrap();
        Mesh::new(vec![MeshAxis::new("data", 2).unwrap(), MeshAxis::new("model", 2).unwrap()], devices).unwrap()
    }

    #[test]
    fn test_mesh_axis_validation() {
        assert_eq!(MeshAxis::new("", 2), Err(ShardingError::EmptyMeshAxisName));
        assert_eq!(
            MeshAxis::new("data", 0),
            Err(ShardingError::InvalidMeshAxisSize { axis_name: "data".to_string() }),
        );
    }

    #[test]
    fn test_mesh_validation() {
        let client = test_client(4);
        let devices = client.device_list(&client.devices()).unwrap();
        assert!(matches!(
            Mesh::new(vec![MeshAxis::new("data", 2).unwrap(), MeshAxis::new("data", 2).unwrap()], devices.clone()),
            Err(ShardingError::DuplicateMeshAxisName { axis_name }) if axis_name == "data",
        ));

        assert!(matches!(
            Mesh::new(vec![MeshAxis::new("data", 3).unwrap()], devices),
            Err(ShardingError::MeshDeviceCountMismatch { expected_device_count: 3, actual_device_count: 4 }),
        ));
    }

    #[test]
    fn test_single_device_resolution() {
        let client = test_client(2);
        let device: Arc<dyn DeviceLike> = Arc::new(client.devices()[1].clone());
        let sharding = SingleDeviceSharding::new(device, Some("pinned_host".to_string()));
        assert_eq!(sharding_device_list(&sharding).unwrap().len(), 1);
        assert_eq!(sharding_memory_kind(&sharding).unwrap().as_deref(), Some("pinned_host"));

        let resolved = resolve_sharding(&sharding, &[8]).unwrap();
        assert_eq!(resolved.device_list().len(), 1);
        assert_eq!(resolved.device_list().get(0).unwrap().identity().device_id, 1);
        assert_eq!(resolved.memory_kind(), Some("pinned_host"));
        assert!(matches!(resolved, ResolvedSharding::SingleDevice { .. }));
    }

    #[test]
    fn test_named_resolution() {
        let client = test_client(4);
        let mesh = test_mesh(&client);
        let spec = PartitionSpec::new(vec![PartitionDimension::sharded("data"), PartitionDimension::Unsharded]);
        let sharding = NamedSharding::new(mesh, spec, None);

        let resolved = resolve_sharding(&sharding, &[8, 4]).unwrap();
        let ResolvedSharding::Partitioned { device_list, memory_kind, descriptor } = resolved else {
            panic!("expected a partitioned resolution");
        };
        // The device list follows the mesh's own device ordering.
        assert_eq!(device_list, sharding.mesh().devices().clone());
        assert_eq!(memory_kind, None);
        assert_eq!(descriptor.dimension_partitions, vec![2, 1]);
        assert_eq!(descriptor.replication_factor, 2);
        assert_eq!(descriptor.shard_count(), 2);
    }

    #[test]
    fn test_named_resolution_covers_the_full_mesh() {
        let client = test_client(4);
        let mesh = test_mesh(&client);
        let spec = PartitionSpec::new(vec![
            PartitionDimension::sharded("data"),
            PartitionDimension::sharded("model"),
        ]);
        let sharding = NamedSharding::new(mesh, spec, Some("device".to_string()));
        let resolved = resolve_sharding(&sharding, &[4, 2]).unwrap();
        let ResolvedSharding::Partitioned { descriptor, .. } = resolved else {
            panic!("expected a partitioned resolution");
        };
        // One device per shard, covering all four mesh devices.
        assert_eq!(descriptor.dimension_partitions, vec![2, 2]);
        assert_eq!(descriptor.shard_count(), 4);
        assert_eq!(descriptor.replication_factor, 1);
    }

    #[test]
    fn test_named_resolution_multi_axis_dimension() {
        let client = test_client(4);
        let mesh = test_mesh(&client);
        let spec = PartitionSpec::new(vec![PartitionDimension::Sharded(vec![
            "data".to_string(),
            "model".to_string(),
        ])]);
        let sharding = NamedSharding::new(mesh, spec, None);
        let resolved = resolve_sharding(&sharding, &[8]).unwrap();
        let ResolvedSharding::Partitioned { descriptor, .. } = resolved else {
            panic!("expected a partitioned resolution");
        };
        assert_eq!(descriptor.dimension_partitions, vec![4]);
        assert_eq!(descriptor.replication_factor, 1);
    }

    #[test]
    fn test_named_resolution_failures() {
        let client = test_client(4);

        let spec = PartitionSpec::new(vec![PartitionDimension::sharded("batch")]);
        let sharding = NamedSharding::new(test_mesh(&client), spec, None);
        assert!(matches!(
            resolve_sharding(&sharding, &[8]),
            Err(Error::Sharding(ShardingError::UnknownMeshAxis { .. })),
        ));

        let spec = PartitionSpec::new(vec![
            PartitionDimension::sharded("data"),
            PartitionDimension::sharded("data"),
        ]);
        let sharding = NamedSharding::new(test_mesh(&client), spec, None);
        assert!(matches!(
            resolve_sharding(&sharding, &[8, 8]),
            Err(Error::Sharding(ShardingError::DuplicatePartitionAxis { .. })),
        ));

        let spec = PartitionSpec::new(vec![PartitionDimension::Sharded(Vec::new())]);
        let sharding = NamedSharding::new(test_mesh(&client), spec, None);
        assert!(matches!(
            resolve_sharding(&sharding, &[8]),
            Err(Error::Sharding(ShardingError::EmptyPartitionAxisList { dimension: 0 })),
        ));

        let spec = PartitionSpec::replicated(3);
        let sharding = NamedSharding::new(test_mesh(&client), spec, None);
        assert!(matches!(
            resolve_sharding(&sharding, &[8, 8]),
            Err(Error::Sharding(ShardingError::RankMismatch { partition_rank: 3, array_rank: 2 })),
        ));

        let spec = PartitionSpec::new(vec![PartitionDimension::sharded("data")]);
        let sharding = NamedSharding::new(test_mesh(&client), spec, None);
        assert!(matches!(
            resolve_sharding(&sharding, &[7]),
            Err(Error::Sharding(ShardingError::UnevenDimensionPartition {
                dimension: 0,
                dimension_size: 7,
                partition_count: 2,
            })),
        ));
    }

    #[test]
    fn test_explicit_resolution() {
        let client = test_client(2);
        let devices = client.device_list(&client.devices()).unwrap();
        let assignments = devices
            .iter()
            .map(|device| ShardAssignment { device, shard_shape: vec![4, 2] })
            .collect::<Vec<_>>();
        let sharding = ExplicitSharding::new(devices.clone(), assignments, None);
        let resolved = resolve_sharding(&sharding, &[8, 2]).unwrap();
        let ResolvedSharding::Explicit { device_list, shard_shapes, .. } = resolved else {
            panic!("expected an explicit resolution");
        };
        assert_eq!(device_list, devices);
        assert_eq!(shard_shapes, vec![vec![4, 2], vec![4, 2]]);
    }

    #[test]
    fn test_explicit_resolution_failures() {
        let client = test_client(2);
        let devices = client.device_list(&client.devices()).unwrap();

        // Declared shard count does not match the number of assignments.
        let assignments = vec![ShardAssignment { device: devices.get(0).unwrap(), shard_shape: vec![4] }];
        let sharding = ExplicitSharding::new(devices.clone(), assignments, None);
        assert!(matches!(
            resolve_sharding(&sharding, &[8]),
            Err(Error::Sharding(ShardingError::ShardCountMismatch { expected: 2, actual: 1 })),
        ));

        // A shard's device is absent from the declared device list.
        let foreign = test_client(1);
        let assignments = vec![
            ShardAssignment { device: devices.get(0).unwrap(), shard_shape: vec![4] },
            ShardAssignment { device: Arc::new(foreign.devices()[0].clone()), shard_shape: vec![4] },
        ];
        let sharding = ExplicitSharding::new(devices, assignments, None);
        assert!(matches!(
            resolve_sharding(&sharding, &[8]),
            Err(Error::Sharding(ShardingError::ShardDeviceNotInList { .. })),
        ));
    }

    #[test]
    fn test_unsupported_sharding_kind() {
        #[derive(Debug)]
        struct PositionalSharding;

        impl Sharding for PositionalSharding {
            fn as_any(&self) -> &dyn Any {
                self
            }
        }

        let error = resolve_sharding(&PositionalSharding, &[8]).unwrap_err();
        assert!(matches!(&error, Error::Sharding(ShardingError::UnsupportedShardingKind { sharding })
            if sharding == "PositionalSharding"));
        assert!(sharding_device_list(&PositionalSharding).is_err());
        assert!(sharding_memory_kind(&PositionalSharding).is_err());
    }
}
