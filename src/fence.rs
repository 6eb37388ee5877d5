//! Exported fences and the descriptor table.
//!
//! An [`ExportedFence`] wraps one wait point behind an `Arc` so the
//! export pipeline, the descriptor table, and any descriptor holder can
//! share it; the wait point is released when the last reference drops.
//! The [`DescriptorTable`] hands out process-local integer handles for
//! installed fences.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{SyncError, SyncResult};
use crate::timeline::WaitPoint;

/// A reference-counted fence wrapping exactly one wait point.
///
/// Wrapping consumes the wait point, so ownership transfers here once
/// and the creator can no longer release it separately.
pub struct ExportedFence {
    label: String,
    wait_point: WaitPoint,
}

impl ExportedFence {
    /// Wraps `wait_point` into a shareable fence.
    pub fn wrap(label: impl Into<String>, wait_point: WaitPoint) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            wait_point,
        })
    }

    /// Diagnostic name of this fence.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The timestamp this fence completes at.
    pub fn target(&self) -> u32 {
        self.wait_point.target()
    }

    /// Whether the fence's timestamp has retired.
    pub fn is_signaled(&self) -> bool {
        self.wait_point.has_signaled()
    }

    /// Blocks until the fence signals or `timeout` elapses. Returns
    /// whether it signaled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.wait_point.wait_timeout(timeout)
    }
}

impl std::fmt::Debug for ExportedFence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportedFence")
            .field("label", &self.label)
            .field("target", &self.target())
            .field("signaled", &self.is_signaled())
            .finish()
    }
}

/// Process-local handle to an installed fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorId(pub(crate) u32);

impl DescriptorId {
    /// The raw handle value.
    pub fn as_raw(&self) -> u32 {
        self.0
    }
}

/// The seam the fence export pipeline drives.
///
/// [`DescriptorTable`] is the in-crate implementation; tests substitute
/// failure-injecting doubles to exercise the pipeline's unwinding.
pub trait FenceFramework {
    /// Wraps a wait point into an exported fence.
    ///
    /// Consumes the wait point: on `None` the implementation has already
    /// released it, so the caller never releases it on this path.
    fn wrap_as_fence(&self, label: &str, wait_point: WaitPoint) -> Option<Arc<ExportedFence>>;

    /// Reserves an unused descriptor slot.
    fn reserve_descriptor(&self) -> SyncResult<DescriptorId>;

    /// Installs a fence at a previously reserved slot, making it visible
    /// to descriptor holders.
    fn install(&self, id: DescriptorId, fence: Arc<ExportedFence>);

    /// Releases a slot, dropping the table's fence reference.
    fn release_descriptor(&self, id: DescriptorId);
}

enum Slot {
    Reserved,
    Installed(Arc<ExportedFence>),
}

/// Capacity-bounded two-phase descriptor table.
///
/// `reserve` claims a slot id, `install` fills it atomically with the
/// fence it refers to. Releasing an installed slot drops the table's
/// reference; releasing a still-reserved slot just frees the id.
pub struct DescriptorTable {
    state: Mutex<TableState>,
    capacity: usize,
}

struct TableState {
    slots: HashMap<u32, Slot>,
    next_id: u32,
}

impl DescriptorTable {
    /// Creates a table with room for `capacity` descriptors.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(TableState {
                slots: HashMap::new(),
                next_id: 0,
            }),
            capacity,
        }
    }

    /// Number of reserved or installed slots.
    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    /// Whether the table holds no slots.
    pub fn is_empty(&self) -> bool {
        self.state.lock().slots.is_empty()
    }

    /// Looks up the fence installed at `id`.
    pub fn get(&self, id: DescriptorId) -> Option<Arc<ExportedFence>> {
        match self.state.lock().slots.get(&id.0) {
            Some(Slot::Installed(fence)) => Some(Arc::clone(fence)),
            _ => None,
        }
    }
}

impl FenceFramework for DescriptorTable {
    fn wrap_as_fence(&self, label: &str, wait_point: WaitPoint) -> Option<Arc<ExportedFence>> {
        Some(ExportedFence::wrap(label, wait_point))
    }

    fn reserve_descriptor(&self) -> SyncResult<DescriptorId> {
        let mut state = self.state.lock();
        if state.slots.len() >= self.capacity {
            log::error!("descriptor table full ({} slots)", self.capacity);
            return Err(SyncError::ResourceExhausted);
        }
        // Ids recycle on wraparound; skip ones still in use.
        let mut id = state.next_id;
        while state.slots.contains_key(&id) {
            id = id.wrapping_add(1);
        }
        state.next_id = id.wrapping_add(1);
        state.slots.insert(id, Slot::Reserved);
        Ok(DescriptorId(id))
    }

    fn install(&self, id: DescriptorId, fence: Arc<ExportedFence>) {
        let mut state = self.state.lock();
        match state.slots.get_mut(&id.0) {
            Some(slot) => {
                if matches!(slot, Slot::Installed(_)) {
                    log::warn!("descriptor {} installed twice", id.0);
                } else {
                    *slot = Slot::Installed(fence);
                }
            }
            None => {
                log::warn!("install on unreserved descriptor {}", id.0);
            }
        }
    }

    fn release_descriptor(&self, id: DescriptorId) {
        if self.state.lock().slots.remove(&id.0).is_none() {
            log::warn!("release of unknown descriptor {}", id.0);
        }
    }
}

impl std::fmt::Debug for DescriptorTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorTable")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
