//! C8: `LinearScopeResource`, the shortest-lived level of the hierarchy — a bump allocator
//! scoped to a single recorded section (one `Stream` segment, or one `call` node's scratch
//! storage). Grounded on the original's `DeviceLinearResource`: allocations are never freed
//! individually, only reset (or dropped) all at once when the scope ends.
use crate::device::Device;
use crate::error::Error;
use crate::resource::linear::LinearAllocator;
use crate::resource::{
    AllocatedBuffer, AllocatedDescriptorSet, AllocatedImage, BufferDesc, CommandPoolDesc, DescriptorSetDesc, DeviceResource, ImageDesc, ImageViewDesc,
    PipelineDesc, QueryPoolDesc, RenderPassDesc,
};
use ash::vk;
use std::sync::{Arc, Mutex};

struct ScopeState {
    backing: Option<AllocatedBuffer>,
    bump: LinearAllocator,
}

/// A bump allocator for scratch buffers, backed by one fixed-size buffer from `upstream`.
///
/// Unlike [`crate::resource::LinearResource`], which grows a pool of blocks and recycles
/// individual sub-ranges, a scope never frees anything until it is torn down: the intended use
/// is one scope per recorded section, sized generously enough that it never needs to grow.
pub struct LinearScopeResource {
    upstream: Arc<dyn DeviceResource>,
    usage: ash::vk::BufferUsageFlags,
    location: gpu_allocator::MemoryLocation,
    state: Mutex<ScopeState>,
}

impl LinearScopeResource {
    pub fn new(upstream: Arc<dyn DeviceResource>, capacity: u64, usage: ash::vk::BufferUsageFlags, location: gpu_allocator::MemoryLocation) -> LinearScopeResource {
        LinearScopeResource {
            upstream,
            usage,
            location,
            state: Mutex::new(ScopeState {
                backing: None,
                bump: LinearAllocator::new(capacity),
            }),
        }
    }

    /// Bump-allocates `size` bytes from the scope's backing buffer, returning the buffer
    /// handle and byte offset. Panics if the scope's fixed capacity is exceeded: scopes are
    /// meant to be sized up front rather than grown mid-recording.
    pub fn scratch(&self, size: u64, align: u64) -> Result<(ash::vk::Buffer, u64), Error> {
        let mut state = self.state.lock().unwrap();
        if state.backing.is_none() {
            let capacity = state.bump.capacity();
            let backing = self.upstream.allocate_buffer(&BufferDesc {
                size: capacity,
                usage: self.usage,
                location: self.location,
            })?;
            state.backing = Some(backing);
        }
        let offset = state
            .bump
            .allocate(size, align)
            .expect("linear scope exceeded its fixed capacity");
        let handle = state.backing.as_ref().unwrap().buffer;
        Ok((handle, offset))
    }

    /// Ends the scope, returning its backing buffer to `upstream`.
    pub fn end(self) {
        if let Some(backing) = self.state.into_inner().unwrap().backing {
            self.upstream.deallocate_buffer(backing);
        }
    }
}

impl DeviceResource for LinearScopeResource {
    fn device(&self) -> &Arc<Device> {
        self.upstream.device()
    }

    fn allocate_buffer(&self, desc: &BufferDesc) -> Result<AllocatedBuffer, Error> {
        self.upstream.allocate_buffer(desc)
    }

    fn allocate_image(&self, desc: &ImageDesc) -> Result<AllocatedImage, Error> {
        self.upstream.allocate_image(desc)
    }

    fn deallocate_buffer(&self, buffer: AllocatedBuffer) {
        self.upstream.deallocate_buffer(buffer)
    }

    fn deallocate_image(&self, image: AllocatedImage) {
        self.upstream.deallocate_image(image)
    }

    fn create_command_pool(&self, desc: &CommandPoolDesc) -> Result<vk::CommandPool, Error> {
        self.upstream.create_command_pool(desc)
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.upstream.destroy_command_pool(pool)
    }

    fn allocate_descriptor_set(&self, desc: &DescriptorSetDesc) -> Result<AllocatedDescriptorSet, Error> {
        self.upstream.allocate_descriptor_set(desc)
    }

    fn destroy_descriptor_set(&self, set: AllocatedDescriptorSet) {
        self.upstream.destroy_descriptor_set(set)
    }

    fn create_image_view(&self, desc: &ImageViewDesc) -> Result<vk::ImageView, Error> {
        self.upstream.create_image_view(desc)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.upstream.destroy_image_view(view)
    }

    fn create_query_pool(&self, desc: &QueryPoolDesc) -> Result<vk::QueryPool, Error> {
        self.upstream.create_query_pool(desc)
    }

    fn destroy_query_pool(&self, pool: vk::QueryPool) {
        self.upstream.destroy_query_pool(pool)
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore, Error> {
        self.upstream.create_semaphore()
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.upstream.destroy_semaphore(semaphore)
    }

    fn create_fence(&self, signalled: bool) -> Result<vk::Fence, Error> {
        self.upstream.create_fence(signalled)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.upstream.destroy_fence(fence)
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<vk::RenderPass, Error> {
        self.upstream.create_render_pass(desc)
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.upstream.destroy_render_pass(render_pass)
    }

    fn create_pipeline(&self, desc: &PipelineDesc) -> Result<vk::Pipeline, Error> {
        self.upstream.create_pipeline(desc)
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.upstream.destroy_pipeline(pipeline)
    }

    fn create_framebuffer(&self, render_pass: vk::RenderPass, attachments: &[vk::ImageView], extent: (u32, u32)) -> Result<vk::Framebuffer, Error> {
        self.upstream.create_framebuffer(render_pass, attachments, extent)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.upstream.destroy_framebuffer(framebuffer)
    }
}
