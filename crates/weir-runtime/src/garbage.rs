use std::sync::Arc;

use parking_lot::Mutex;

use crate::runtime::DeviceListBackend;

/// Runtime resources whose release has been handed off to the process-wide garbage sink because they could not be
/// released inline (e.g., because releasing them from a destructor could reenter a lock already held by the caller).
pub enum Garbage {
    /// Runtime device list resource held by a dropped [`DeviceList`](crate::DeviceList) in native representation.
    RuntimeDeviceList(Arc<dyn DeviceListBackend>),
}

/// Process-wide single-consumer garbage sink. [`defer`] only enqueues and never blocks on anything other than the
/// sink lock itself, which is held just long enough to push one entry.
static SINK: Mutex<Vec<Garbage>> = Mutex::new(Vec::new());

/// Hands the provided [`Garbage`] to the process-wide sink, to be released by a later [`collect`] call.
pub(crate) fn defer(garbage: Garbage) {
    SINK.lock().push(garbage);
}

/// Releases all deferred runtime resources and returns the number of entries that were released. The sink lock is
/// released before the entries are dropped so that resource teardown never runs under the sink lock.
pub fn collect() -> usize {
    let garbage = std::mem::take(&mut *SINK.lock());
    let count = garbage.len();
    if count > 0 {
        tracing::trace!(count, "releasing deferred runtime resources");
    }
    drop(garbage);
    count
}

/// Number of entries currently waiting in the sink.
pub fn pending() -> usize {
    SINK.lock().len()
}
