use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::clients::Client;
use crate::device_lists::DeviceList;

static NEXT_EXECUTABLE_UID: AtomicU64 = AtomicU64::new(1);

/// Executable loaded onto the devices of a [`DeviceList`], represented here only at the bookkeeping level (name and
/// device placement). Compilation and execution belong to the runtime collaborator.
///
/// Live executables register themselves with the owning [`Client`] so that diagnostics can enumerate them.
#[derive(Clone)]
pub struct Executable {
    pub(crate) state: Arc<ExecutableState>,
}

pub(crate) struct ExecutableState {
    pub(crate) uid: u64,
    pub(crate) client: Client,
    pub(crate) name: String,
    pub(crate) device_list: DeviceList,
}

impl Executable {
    /// Constructs a new [`Executable`] and registers it with the owning [`Client`].
    pub fn new<N: Into<String>>(client: &Client, name: N, device_list: DeviceList) -> Self {
        let state = Arc::new(ExecutableState {
            uid: NEXT_EXECUTABLE_UID.fetch_add(1, Ordering::Relaxed),
            client: client.clone(),
            name: name.into(),
            device_list,
        });
        client.register_executable(&state);
        Self { state }
    }

    /// Name of this [`Executable`].
    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// Devices that this [`Executable`] is loaded onto.
    pub fn device_list(&self) -> &DeviceList {
        &self.state.device_list
    }

    /// [`Client`] that this [`Executable`] was loaded through.
    pub fn client(&self) -> &Client {
        &self.state.client
    }
}

impl Debug for Executable {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "Executable[name={}, devices={}]", self.state.name, self.state.device_list)
    }
}

impl Drop for ExecutableState {
    fn drop(&mut self) {
        self.client.unregister_executable(self.uid);
    }
}

#[cfg(test)]
mod tests {
    use crate::Executable;
    use crate::tests::test_client;

    #[test]
    fn test_executable_registration() {
        let client = test_client(2);
        assert!(client.live_executables().is_empty());

        let device_list = client.device_list(&client.devices()).unwrap();
        let executable = Executable::new(&client, "matmul", device_list);
        assert_eq!(executable.name(), "matmul");
        assert_eq!(executable.device_list().len(), 2);
        assert_eq!(client.live_executables().len(), 1);
        assert_eq!(client.live_executables()[0].name(), "matmul");

        drop(executable);
        assert!(client.live_executables().is_empty());
    }
}
