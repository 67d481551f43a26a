//! A typed intermediate representation, compiler, synchronization recorder, and transient
//! resource allocator hierarchy for building Vulkan render graphs.
//!
//! The entry point is [`Runtime`]: it owns the device, the allocator hierarchy, and a
//! [`executor::QueueExecutor`] per queue. Callers build an [`ir::Module`] describing the work to do,
//! compile it to a [`compiler::Schedule`] against a chosen root, and record it through the
//! [`recorder::Recorder`] onto a [`stream::Stream`].
pub use ash::{self, vk};
pub use gpu_allocator::MemoryLocation;

pub use crate::{
    device::{get_mip_level_count, Device, RuntimeCreateInfo},
    error::{Error, PresentStatus},
    ir::Module,
    runtime::Runtime,
};

pub(crate) use crate::{
    device::MAX_QUEUES,
    instance::{VULKAN_ENTRY, VULKAN_INSTANCE},
};

pub mod compiler;
pub mod debug;
pub mod device;
pub mod error;
pub mod executor;
pub(crate) mod instance;
pub mod ir;
pub mod platform;
mod platform_impl;
pub mod recorder;
pub mod resource;
pub mod runtime;
pub mod serial;
pub mod signal;
pub mod stream;
pub mod surface;
pub mod types;
