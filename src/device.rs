//! Device, contexts, and the fence export pipeline.
//!
//! A [`Device`] owns the context registry, a descriptor table, and a
//! retirement event queue. [`Device::create_fence_event`] is the
//! externally invoked operation: it turns `(context, timestamp)` into a
//! descriptor whose fence signals automatically once the timestamp
//! retires.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{SyncError, SyncResult};
use crate::event::{EventQueue, RetiredEventQueue};
use crate::fence::{DescriptorId, DescriptorTable, ExportedFence, FenceFramework};
use crate::timeline::Timeline;

const DEFAULT_DESCRIPTOR_CAPACITY: usize = 1024;

/// One logical execution context, owning its retirement timeline.
pub struct Context {
    id: u32,
    timeline: Arc<Timeline>,
}

impl Context {
    /// The device-assigned context id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The context's retirement timeline.
    pub fn timeline(&self) -> &Arc<Timeline> {
        &self.timeline
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("timeline", &self.timeline)
            .finish()
    }
}

/// Owner of contexts, descriptors, and retirement events for one
/// command processor.
pub struct Device {
    label: String,
    contexts: Mutex<ContextRegistry>,
    descriptors: DescriptorTable,
    events: RetiredEventQueue,
}

struct ContextRegistry {
    contexts: HashMap<u32, Arc<Context>>,
    next_id: u32,
}

impl Device {
    /// Creates a device with the default descriptor capacity.
    pub fn new(label: impl Into<String>) -> Self {
        Self::with_descriptor_capacity(label, DEFAULT_DESCRIPTOR_CAPACITY)
    }

    /// Creates a device with room for `capacity` fence descriptors.
    pub fn with_descriptor_capacity(label: impl Into<String>, capacity: usize) -> Self {
        Self {
            label: label.into(),
            contexts: Mutex::new(ContextRegistry {
                contexts: HashMap::new(),
                next_id: 0,
            }),
            descriptors: DescriptorTable::new(capacity),
            events: RetiredEventQueue::new(),
        }
    }

    /// Diagnostic name of this device.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The device's descriptor table.
    pub fn descriptors(&self) -> &DescriptorTable {
        &self.descriptors
    }

    /// The device's retirement event queue.
    pub fn events(&self) -> &RetiredEventQueue {
        &self.events
    }

    /// Creates a context with a fresh timeline starting at 0.
    pub fn create_context(&self) -> SyncResult<Arc<Context>> {
        let mut registry = self.contexts.lock();
        if registry.contexts.len() >= u32::MAX as usize {
            return Err(SyncError::InvalidArgument(
                "context id space exhausted".to_string(),
            ));
        }
        let mut id = registry.next_id;
        while registry.contexts.contains_key(&id) {
            id = id.wrapping_add(1);
        }
        registry.next_id = id.wrapping_add(1);

        let timeline = Timeline::new(format!("{}-timeline-{}", self.label, id));
        let context = Arc::new(Context { id, timeline });
        registry.contexts.insert(id, Arc::clone(&context));
        Ok(context)
    }

    /// Removes a context from the registry.
    ///
    /// Its timeline stays alive while fences derived from it are still
    /// held, so in-flight completion callbacks remain harmless.
    pub fn destroy_context(&self, id: u32) -> SyncResult<()> {
        match self.contexts.lock().contexts.remove(&id) {
            Some(_) => Ok(()),
            None => Err(SyncError::InvalidArgument(format!(
                "context {id} not found"
            ))),
        }
    }

    /// Looks up a context by id.
    pub fn find_context(&self, id: u32) -> Option<Arc<Context>> {
        self.contexts.lock().contexts.get(&id).cloned()
    }

    /// Creates a fence for `(context_id, timestamp)` and returns its
    /// descriptor.
    ///
    /// The fence signals automatically when the timestamp retires via
    /// [`Device::retire`]. On any failure nothing is left allocated and
    /// no descriptor is visible; closing the returned descriptor with
    /// [`Device::release_fence`] drops the process's reference to the
    /// fence.
    pub fn create_fence_event(&self, context_id: u32, timestamp: u32) -> SyncResult<DescriptorId> {
        self.export_fence(context_id, timestamp, &self.descriptors, &self.events, |_| {
            Ok(())
        })
    }

    /// The fence export pipeline with its collaborators explicit.
    ///
    /// `framework` wraps and installs the fence, `events` receives the
    /// completion callback registration, and `deliver` transfers the
    /// descriptor value back to the caller. Each failure releases
    /// exactly what was acquired up to that point: the wait point's
    /// ownership moves into the fence at wrap and from then on is only
    /// ever released through fence reference drops.
    pub fn export_fence(
        &self,
        context_id: u32,
        timestamp: u32,
        framework: &dyn FenceFramework,
        events: &dyn EventQueue,
        deliver: impl FnOnce(DescriptorId) -> SyncResult<()>,
    ) -> SyncResult<DescriptorId> {
        let context = self.find_context(context_id).ok_or_else(|| {
            log::error!("{}: fence event for unknown context {}", self.label, context_id);
            SyncError::InvalidArgument(format!("context {context_id} not found"))
        })?;

        let wait_point = context.timeline.wait_point(timestamp).map_err(|err| {
            log::error!("{}: wait point creation failed: {}", self.label, err);
            err
        })?;

        let label = format!("{}-fence-ctx{}", self.label, context.id);
        let fence = framework.wrap_as_fence(&label, wait_point).ok_or_else(|| {
            // The wait point was consumed and released by the wrap call.
            log::error!("{}: fence wrap failed", self.label);
            SyncError::OutOfMemory
        })?;

        let id = framework.reserve_descriptor().map_err(|err| {
            // `fence` drops here, releasing the wait point.
            log::error!("{}: descriptor reservation failed: {}", self.label, err);
            err
        })?;
        framework.install(id, fence);

        if let Err(err) = deliver(id) {
            log::error!("{}: descriptor delivery failed: {}", self.label, err);
            framework.release_descriptor(id);
            return Err(err);
        }

        let callback_context = Arc::clone(&context);
        let registered = events.register_event(
            timestamp,
            Box::new(move |retired| {
                callback_context.timeline.advance(retired);
            }),
        );
        if let Err(err) = registered {
            log::error!("{}: event registration failed: {}", self.label, err);
            framework.release_descriptor(id);
            return Err(err);
        }

        Ok(id)
    }

    /// Looks up the fence behind a descriptor.
    pub fn fence(&self, id: DescriptorId) -> Option<Arc<ExportedFence>> {
        self.descriptors.get(id)
    }

    /// Closes a fence descriptor, dropping the table's reference.
    pub fn release_fence(&self, id: DescriptorId) {
        self.descriptors.release_descriptor(id);
    }

    /// Reports that `timestamp` has retired on the command processor,
    /// firing pending completion callbacks.
    pub fn retire(&self, timestamp: u32) {
        self.events.retire(timestamp);
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        // Registered callbacks must never fire after the device is gone.
        self.events.shutdown();
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("label", &self.label)
            .field("contexts", &self.contexts.lock().contexts.len())
            .field("descriptors", &self.descriptors)
            .finish()
    }
}
