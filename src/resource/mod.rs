//! The device resource hierarchy (C3-C8): a chain of allocators, each wrapping the one below
//! it, that progressively narrow the lifetime and allocation strategy of the resources they
//! hand out, from a whole application (`DirectResource`) down to a single linear scope
//! (`LinearScopeResource`).
//!
//! Each level holds an `upstream: Arc<dyn DeviceResource>` rather than inheriting from the
//! level below: the hierarchy is composition, matching how `Device`'s own construction holds
//! owned handles rather than subclassing Vulkan objects.
use crate::device::Device;
use crate::error::Error;
use ash::vk;
use std::ops::Range;
use std::sync::Arc;

pub mod cache;
pub mod direct;
pub mod frame;
pub mod linear;
pub mod scope;
pub mod super_frame;

pub use cache::ResourceCache;
pub use direct::DirectResource;
pub use frame::FrameResource;
pub use linear::{LinearAllocator, LinearResource};
pub use scope::LinearScopeResource;
pub use super_frame::SuperFrameResource;

/// Uniquely identifies a resource across its whole lifetime, independent of which level of the
/// hierarchy allocated it. Used as the key into the recorder's last-use tracking table, so a
/// resource handed down through several wrapper levels is still recognized as the same object.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct ResourceIdentity(pub u64);

/// A freshly allocated (or recycled) buffer or image, together with the identity the recorder
/// should track it under.
pub struct AllocatedBuffer {
    pub identity: ResourceIdentity,
    pub buffer: vk::Buffer,
    /// Byte offset of this allocation's contents within `buffer`. Zero for a dedicated
    /// allocation (`buffer` is exactly this size); nonzero when `buffer` is a shared block and
    /// this is one of several sub-ranges carved out of it (see [`FrameResource`]).
    pub offset: u64,
    pub size: u64,
    pub allocation: Option<gpu_allocator::vulkan::Allocation>,
}

pub struct AllocatedImage {
    pub identity: ResourceIdentity,
    pub image: vk::Image,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub allocation: Option<gpu_allocator::vulkan::Allocation>,
}

/// Describes the buffer a caller wants allocated.
#[derive(Copy, Clone, Debug)]
pub struct BufferDesc {
    pub size: u64,
    pub usage: vk::BufferUsageFlags,
    pub location: gpu_allocator::MemoryLocation,
}

/// Describes the image a caller wants allocated.
#[derive(Copy, Clone, Debug)]
pub struct ImageDesc {
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub usage: vk::ImageUsageFlags,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: vk::SampleCountFlags,
    pub location: gpu_allocator::MemoryLocation,
}

/// The sub-range of a resource's contents that a single access may cover.
///
/// A buffer only has one axis (a byte interval); an image has two orthogonal axes (mip level
/// and array layer) that must be tracked independently, so a mip-sliced view of an array image
/// does not collapse into the same linear range a buffer would use.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Subrange {
    Buffer(Range<u64>),
    Image { mip_levels: Range<u32>, array_layers: Range<u32> },
}

impl Subrange {
    pub fn whole_buffer(size: u64) -> Subrange {
        Subrange::Buffer(0..size)
    }

    pub fn whole_image(mip_levels: u32, array_layers: u32) -> Subrange {
        Subrange::Image {
            mip_levels: 0..mip_levels,
            array_layers: 0..array_layers,
        }
    }

    pub fn overlaps(&self, other: &Subrange) -> bool {
        match (self, other) {
            (Subrange::Buffer(a), Subrange::Buffer(b)) => a.start < b.end && b.start < a.end,
            (Subrange::Image { mip_levels: am, array_layers: al }, Subrange::Image { mip_levels: bm, array_layers: bl }) => {
                am.start < bm.end && bm.start < am.end && al.start < bl.end && bl.start < al.end
            }
            _ => false,
        }
    }

    /// The overlap between `self` and `other`, if any.
    pub fn intersection(&self, other: &Subrange) -> Option<Subrange> {
        if !self.overlaps(other) {
            return None;
        }
        match (self, other) {
            (Subrange::Buffer(a), Subrange::Buffer(b)) => Some(Subrange::Buffer(a.start.max(b.start)..a.end.min(b.end))),
            (Subrange::Image { mip_levels: am, array_layers: al }, Subrange::Image { mip_levels: bm, array_layers: bl }) => Some(Subrange::Image {
                mip_levels: am.start.max(bm.start)..am.end.min(bm.end),
                array_layers: al.start.max(bl.start)..al.end.min(bl.end),
            }),
            _ => None,
        }
    }

    /// `self` minus its overlap with `other`: the remainder piece(s) of `self` not covered by
    /// `other`. A buffer ever splits into at most two pieces (before/after); an image splits
    /// into at most four, since the mip and array axes are handled independently.
    pub fn subtract(&self, other: &Subrange) -> Vec<Subrange> {
        match (self, other) {
            (Subrange::Buffer(a), Subrange::Buffer(b)) => {
                let mut out = Vec::new();
                if a.start < b.start {
                    out.push(Subrange::Buffer(a.start..b.start.min(a.end)));
                }
                if a.end > b.end {
                    out.push(Subrange::Buffer(b.end.max(a.start)..a.end));
                }
                out
            }
            (Subrange::Image { mip_levels: am, array_layers: al }, Subrange::Image { mip_levels: bm, array_layers: bl }) => {
                let mut out = Vec::new();
                if am.start < bm.start {
                    out.push(Subrange::Image {
                        mip_levels: am.start..bm.start,
                        array_layers: al.clone(),
                    });
                }
                if am.end > bm.end {
                    out.push(Subrange::Image {
                        mip_levels: bm.end..am.end,
                        array_layers: al.clone(),
                    });
                }
                let overlap_mips = am.start.max(bm.start)..am.end.min(bm.end);
                if !overlap_mips.is_empty() {
                    if al.start < bl.start {
                        out.push(Subrange::Image {
                            mip_levels: overlap_mips.clone(),
                            array_layers: al.start..bl.start,
                        });
                    }
                    if al.end > bl.end {
                        out.push(Subrange::Image {
                            mip_levels: overlap_mips,
                            array_layers: bl.end..al.end,
                        });
                    }
                }
                out
            }
            _ => vec![self.clone()],
        }
    }
}

/// Describes a transient command pool.
#[derive(Copy, Clone, Debug)]
pub struct CommandPoolDesc {
    pub queue_family: u32,
    pub transient: bool,
}

/// Describes a descriptor set to allocate out of an internally managed pool.
#[derive(Clone, Debug)]
pub struct DescriptorSetDesc {
    pub layout: vk::DescriptorSetLayout,
    pub pool_sizes: Vec<vk::DescriptorPoolSize>,
    /// `Some(n)` requests the last binding's variable-count descriptor array be sized to `n`
    /// (`VK_EXT_descriptor_indexing`'s `VARIABLE_DESCRIPTOR_COUNT`); `None` for a fixed layout.
    pub variable_count: Option<u32>,
}

#[derive(Copy, Clone, Debug)]
pub struct ImageViewDesc {
    pub image: vk::Image,
    pub view_type: vk::ImageViewType,
    pub format: vk::Format,
    pub aspect_mask: vk::ImageAspectFlags,
    pub base_mip_level: u32,
    pub level_count: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

#[derive(Copy, Clone, Debug)]
pub struct QueryPoolDesc {
    pub query_type: vk::QueryType,
    pub count: u32,
}

#[derive(Copy, Clone, Debug)]
pub struct RenderPassDesc<'a> {
    pub color_formats: &'a [vk::Format],
    pub depth_format: Option<vk::Format>,
    pub samples: vk::SampleCountFlags,
}

/// A compiled graphics pipeline, keyed by the shader stages and render pass it was built
/// against.
#[derive(Clone, Debug)]
pub struct PipelineDesc {
    pub render_pass: vk::RenderPass,
    pub layout: vk::PipelineLayout,
    pub stages: Vec<(vk::ShaderStageFlags, vk::ShaderModule, String)>,
}

/// A descriptor set together with the pool it was allocated from. Each allocation gets its own
/// pool sized exactly to the request, so releasing a set is just destroying its pool rather
/// than tracking per-set free lists in a shared one.
#[derive(Copy, Clone, Debug)]
pub struct AllocatedDescriptorSet {
    pub set: vk::DescriptorSet,
    pub pool: vk::DescriptorPool,
}

/// A level of the device resource hierarchy.
///
/// Every level can create buffers and images; what differs between levels is *how* the
/// backing memory is obtained (a fresh device allocation, a sub-allocation from a shared
/// block, or simply "ask upstream and forget about it when the scope ends"). The remaining
/// verbs (command pools, descriptor sets, image views, query pools, semaphores, fences, render
/// passes, pipelines) are plain Vulkan objects with no sub-allocation story of their own; most
/// levels simply forward them to `upstream` and only [`FrameResource`]/[`SuperFrameResource`]
/// add lifetime management (deferred release, caching) on top.
pub trait DeviceResource: Send + Sync {
    fn device(&self) -> &Arc<Device>;

    fn allocate_buffer(&self, desc: &BufferDesc) -> Result<AllocatedBuffer, Error>;

    fn allocate_image(&self, desc: &ImageDesc) -> Result<AllocatedImage, Error>;

    /// Releases a resource this level owns back to whatever pool or allocator it came from.
    /// Levels that never recycle (e.g. [`DirectResource`]) destroy it immediately.
    fn deallocate_buffer(&self, buffer: AllocatedBuffer);

    fn deallocate_image(&self, image: AllocatedImage);

    fn create_command_pool(&self, desc: &CommandPoolDesc) -> Result<vk::CommandPool, Error>;

    fn destroy_command_pool(&self, pool: vk::CommandPool);

    fn allocate_descriptor_set(&self, desc: &DescriptorSetDesc) -> Result<AllocatedDescriptorSet, Error>;

    fn destroy_descriptor_set(&self, set: AllocatedDescriptorSet);

    fn create_image_view(&self, desc: &ImageViewDesc) -> Result<vk::ImageView, Error>;

    fn destroy_image_view(&self, view: vk::ImageView);

    fn create_query_pool(&self, desc: &QueryPoolDesc) -> Result<vk::QueryPool, Error>;

    fn destroy_query_pool(&self, pool: vk::QueryPool);

    fn create_semaphore(&self) -> Result<vk::Semaphore, Error>;

    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    fn create_fence(&self, signalled: bool) -> Result<vk::Fence, Error>;

    fn destroy_fence(&self, fence: vk::Fence);

    fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<vk::RenderPass, Error>;

    fn destroy_render_pass(&self, render_pass: vk::RenderPass);

    fn create_pipeline(&self, desc: &PipelineDesc) -> Result<vk::Pipeline, Error>;

    fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    fn create_framebuffer(&self, render_pass: vk::RenderPass, attachments: &[vk::ImageView], extent: (u32, u32)) -> Result<vk::Framebuffer, Error>;

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);
}

fn next_identity() -> ResourceIdentity {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    ResourceIdentity(COUNTER.fetch_add(1, Ordering::Relaxed))
}

#[cfg(test)]
mod subrange_tests {
    use super::*;

    #[test]
    fn disjoint_image_mips_do_not_overlap() {
        let a = Subrange::Image { mip_levels: 0..1, array_layers: 0..1 };
        let b = Subrange::Image { mip_levels: 1..4, array_layers: 0..1 };
        assert!(!a.overlaps(&b));
    }

    #[test]
    fn overlapping_mips_with_disjoint_layers_do_not_overlap() {
        let a = Subrange::Image { mip_levels: 0..4, array_layers: 0..1 };
        let b = Subrange::Image { mip_levels: 0..4, array_layers: 1..2 };
        assert!(!a.overlaps(&b));
    }

    #[test]
    fn subtracting_a_mip_band_leaves_the_remainder() {
        let whole = Subrange::whole_image(4, 2);
        let middle = Subrange::Image { mip_levels: 1..2, array_layers: 0..2 };
        let remainder = whole.subtract(&middle);
        assert_eq!(remainder.len(), 2);
        assert!(remainder.contains(&Subrange::Image { mip_levels: 0..1, array_layers: 0..2 }));
        assert!(remainder.contains(&Subrange::Image { mip_levels: 2..4, array_layers: 0..2 }));
    }

    #[test]
    fn buffer_and_image_subranges_never_overlap() {
        let a = Subrange::whole_buffer(16);
        let b = Subrange::whole_image(1, 1);
        assert!(!a.overlaps(&b));
    }
}
