//! Timeline synchronization and fence export for GPU command tracking.
//!
//! A command processor publishes an ever-increasing retirement counter
//! per execution context; consumers create wait points tied to a target
//! timestamp, which signal exactly when the counter reaches or passes
//! that value under a wraparound-tolerant ordering. The fence export
//! pipeline turns a wait point into a reference-counted fence behind a
//! process-local descriptor, completed automatically by a callback when
//! the device reports the timestamp retired.
//!
//! # Example
//!
//! ```
//! use timeline_sync::Device;
//!
//! let device = Device::new("gpu0");
//! let context = device.create_context().unwrap();
//!
//! let descriptor = device.create_fence_event(context.id(), 5).unwrap();
//! let fence = device.fence(descriptor).unwrap();
//! assert!(!fence.is_signaled());
//!
//! // The command processor reports timestamp 5 retired.
//! device.retire(5);
//! assert!(fence.is_signaled());
//!
//! device.release_fence(descriptor);
//! ```

pub mod device;
pub mod error;
pub mod event;
pub mod fence;
pub mod timeline;
pub mod timestamp;

pub use device::{Context, Device};
pub use error::{SyncError, SyncResult};
pub use event::{EventQueue, FenceEventCallback, RetiredEventQueue};
pub use fence::{DescriptorId, DescriptorTable, ExportedFence, FenceFramework};
pub use timeline::{Timeline, WaitPoint};
pub use timestamp::timestamp_cmp;
