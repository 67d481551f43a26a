//! C6: `FrameResource`, a `DeviceResource` scoped to exactly one frame. Every allocation made
//! through it is handed back to `upstream` in one batch when the frame is recycled, mirroring
//! the teacher's `FrameInFlight` bookkeeping (`context::mod::FrameInFlight`) which defers
//! command pool and transient-memory reuse until the frame's fence/timeline value is reached.
//!
//! Buffer allocations are sub-allocated out of four linear pools, one per `gpu_allocator`
//! memory-usage class (`Unknown`, `CpuToGpu`, `GpuOnly`, `GpuToCpu`), so a frame that allocates
//! many small transient buffers of the same class does not round-trip to the device allocator
//! for each one. Every other resource kind a frame creates (image views, descriptor sets,
//! command pools, semaphores, query pools, pipelines, render passes, framebuffers) is tracked in
//! its own per-kind vector and released in bulk at recycle time, since none of them benefit from
//! sub-allocation the way buffer memory does.
use crate::error::Error;
use crate::resource::linear::{LinearResource, SubBuffer};
use crate::resource::{
    AllocatedBuffer, AllocatedDescriptorSet, AllocatedImage, BufferDesc, CommandPoolDesc, DescriptorSetDesc, DeviceResource, ImageDesc, ImageViewDesc,
    PipelineDesc, QueryPoolDesc, RenderPassDesc,
};
use crate::serial::FrameNumber;
use ash::vk;
use gpu_allocator::MemoryLocation;
use std::sync::{Arc, Mutex};

/// A buffer usage mask broad enough to back any transient allocation a frame makes out of one
/// of its linear pools; the concrete request's narrower `usage` is not separately honored since
/// all sub-allocations of a pool share the pool's backing buffer.
fn pool_usage() -> vk::BufferUsageFlags {
    vk::BufferUsageFlags::TRANSFER_SRC
        | vk::BufferUsageFlags::TRANSFER_DST
        | vk::BufferUsageFlags::UNIFORM_BUFFER
        | vk::BufferUsageFlags::STORAGE_BUFFER
        | vk::BufferUsageFlags::INDEX_BUFFER
        | vk::BufferUsageFlags::VERTEX_BUFFER
        | vk::BufferUsageFlags::INDIRECT_BUFFER
}

const POOL_BLOCK_SIZE: u64 = 4 * 1024 * 1024;

#[derive(Copy, Clone, Eq, PartialEq)]
enum MemoryClass {
    CpuOnly,
    CpuToGpu,
    GpuOnly,
    GpuToCpu,
}

fn class_of(location: MemoryLocation) -> MemoryClass {
    match location {
        MemoryLocation::Unknown => MemoryClass::CpuOnly,
        MemoryLocation::CpuToGpu => MemoryClass::CpuToGpu,
        MemoryLocation::GpuOnly => MemoryClass::GpuOnly,
        MemoryLocation::GpuToCpu => MemoryClass::GpuToCpu,
    }
}

pub struct FrameResource {
    upstream: Arc<dyn DeviceResource>,
    frame_number: FrameNumber,
    cpu_only: LinearResource,
    cpu_to_gpu: LinearResource,
    gpu_only: LinearResource,
    gpu_to_cpu: LinearResource,
    sub_buffers: Mutex<Vec<(MemoryClass, SubBuffer)>>,
    images: Mutex<Vec<AllocatedImage>>,
    image_views: Mutex<Vec<vk::ImageView>>,
    descriptor_sets: Mutex<Vec<AllocatedDescriptorSet>>,
    command_pools: Mutex<Vec<vk::CommandPool>>,
    semaphores: Mutex<Vec<vk::Semaphore>>,
    query_pools: Mutex<Vec<vk::QueryPool>>,
    pipelines: Mutex<Vec<vk::Pipeline>>,
    render_passes: Mutex<Vec<vk::RenderPass>>,
    framebuffers: Mutex<Vec<vk::Framebuffer>>,
}

impl FrameResource {
    pub fn new(upstream: Arc<dyn DeviceResource>, frame_number: FrameNumber) -> FrameResource {
        let pool = |location| LinearResource::new(upstream.clone(), POOL_BLOCK_SIZE, pool_usage(), location);
        FrameResource {
            cpu_only: pool(MemoryLocation::Unknown),
            cpu_to_gpu: pool(MemoryLocation::CpuToGpu),
            gpu_only: pool(MemoryLocation::GpuOnly),
            gpu_to_cpu: pool(MemoryLocation::GpuToCpu),
            upstream,
            frame_number,
            sub_buffers: Mutex::new(Vec::new()),
            images: Mutex::new(Vec::new()),
            image_views: Mutex::new(Vec::new()),
            descriptor_sets: Mutex::new(Vec::new()),
            command_pools: Mutex::new(Vec::new()),
            semaphores: Mutex::new(Vec::new()),
            query_pools: Mutex::new(Vec::new()),
            pipelines: Mutex::new(Vec::new()),
            render_passes: Mutex::new(Vec::new()),
            framebuffers: Mutex::new(Vec::new()),
        }
    }

    pub fn frame_number(&self) -> FrameNumber {
        self.frame_number
    }

    fn pool(&self, class: MemoryClass) -> &LinearResource {
        match class {
            MemoryClass::CpuOnly => &self.cpu_only,
            MemoryClass::CpuToGpu => &self.cpu_to_gpu,
            MemoryClass::GpuOnly => &self.gpu_only,
            MemoryClass::GpuToCpu => &self.gpu_to_cpu,
        }
    }

    /// Returns every resource allocated by this frame to `upstream`. Called once the frame's
    /// submitted work is known to have completed (its timeline value has been reached), never
    /// while the frame might still be executing on the device.
    pub fn recycle(self) {
        for (class, sub) in self.sub_buffers.into_inner().unwrap() {
            self.pool(class).sub_free(sub);
        }
        for image in self.images.into_inner().unwrap() {
            self.upstream.deallocate_image(image);
        }
        for view in self.image_views.into_inner().unwrap() {
            self.upstream.destroy_image_view(view);
        }
        for set in self.descriptor_sets.into_inner().unwrap() {
            self.upstream.destroy_descriptor_set(set);
        }
        for pool in self.command_pools.into_inner().unwrap() {
            self.upstream.destroy_command_pool(pool);
        }
        for semaphore in self.semaphores.into_inner().unwrap() {
            self.upstream.destroy_semaphore(semaphore);
        }
        for pool in self.query_pools.into_inner().unwrap() {
            self.upstream.destroy_query_pool(pool);
        }
        for pipeline in self.pipelines.into_inner().unwrap() {
            self.upstream.destroy_pipeline(pipeline);
        }
        for render_pass in self.render_passes.into_inner().unwrap() {
            self.upstream.destroy_render_pass(render_pass);
        }
        for framebuffer in self.framebuffers.into_inner().unwrap() {
            self.upstream.destroy_framebuffer(framebuffer);
        }
    }
}

impl DeviceResource for FrameResource {
    fn device(&self) -> &Arc<crate::device::Device> {
        self.upstream.device()
    }

    fn allocate_buffer(&self, desc: &BufferDesc) -> Result<AllocatedBuffer, Error> {
        let class = class_of(desc.location);
        let sub = self.pool(class).sub_allocate(desc.size)?;
        let view = AllocatedBuffer {
            identity: sub.identity,
            buffer: sub.buffer,
            offset: sub.offset,
            size: sub.size,
            allocation: None,
        };
        self.sub_buffers.lock().unwrap().push((class, sub));
        Ok(view)
    }

    fn allocate_image(&self, desc: &ImageDesc) -> Result<AllocatedImage, Error> {
        let image = self.upstream.allocate_image(desc)?;
        let view = AllocatedImage {
            identity: image.identity,
            image: image.image,
            format: image.format,
            extent: image.extent,
            allocation: None,
        };
        self.images.lock().unwrap().push(image);
        Ok(view)
    }

    fn deallocate_buffer(&self, _buffer: AllocatedBuffer) {
        // No-op: frame-scoped buffers are only ever freed in bulk by `recycle`.
    }

    fn deallocate_image(&self, _image: AllocatedImage) {
        // No-op: frame-scoped images are only ever freed in bulk by `recycle`.
    }

    fn create_command_pool(&self, desc: &CommandPoolDesc) -> Result<vk::CommandPool, Error> {
        let pool = self.upstream.create_command_pool(desc)?;
        self.command_pools.lock().unwrap().push(pool);
        Ok(pool)
    }

    fn destroy_command_pool(&self, _pool: vk::CommandPool) {
        // No-op: released in bulk by `recycle`.
    }

    fn allocate_descriptor_set(&self, desc: &DescriptorSetDesc) -> Result<AllocatedDescriptorSet, Error> {
        let set = self.upstream.allocate_descriptor_set(desc)?;
        self.descriptor_sets.lock().unwrap().push(set);
        Ok(set)
    }

    fn destroy_descriptor_set(&self, _set: AllocatedDescriptorSet) {
        // No-op: released in bulk by `recycle`.
    }

    fn create_image_view(&self, desc: &ImageViewDesc) -> Result<vk::ImageView, Error> {
        let view = self.upstream.create_image_view(desc)?;
        self.image_views.lock().unwrap().push(view);
        Ok(view)
    }

    fn destroy_image_view(&self, _view: vk::ImageView) {
        // No-op: released in bulk by `recycle`.
    }

    fn create_query_pool(&self, desc: &QueryPoolDesc) -> Result<vk::QueryPool, Error> {
        let pool = self.upstream.create_query_pool(desc)?;
        self.query_pools.lock().unwrap().push(pool);
        Ok(pool)
    }

    fn destroy_query_pool(&self, _pool: vk::QueryPool) {
        // No-op: released in bulk by `recycle`.
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore, Error> {
        let semaphore = self.upstream.create_semaphore()?;
        self.semaphores.lock().unwrap().push(semaphore);
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, _semaphore: vk::Semaphore) {
        // No-op: released in bulk by `recycle`.
    }

    fn create_fence(&self, signalled: bool) -> Result<vk::Fence, Error> {
        // Fences are not frame-pooled: a frame never needs to enumerate its own fences in bulk,
        // unlike the other handle kinds, so creation/destruction simply forwards.
        self.upstream.create_fence(signalled)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.upstream.destroy_fence(fence)
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<vk::RenderPass, Error> {
        let render_pass = self.upstream.create_render_pass(desc)?;
        self.render_passes.lock().unwrap().push(render_pass);
        Ok(render_pass)
    }

    fn destroy_render_pass(&self, _render_pass: vk::RenderPass) {
        // No-op: released in bulk by `recycle`.
    }

    fn create_pipeline(&self, desc: &PipelineDesc) -> Result<vk::Pipeline, Error> {
        let pipeline = self.upstream.create_pipeline(desc)?;
        self.pipelines.lock().unwrap().push(pipeline);
        Ok(pipeline)
    }

    fn destroy_pipeline(&self, _pipeline: vk::Pipeline) {
        // No-op: released in bulk by `recycle`.
    }

    fn create_framebuffer(&self, render_pass: vk::RenderPass, attachments: &[vk::ImageView], extent: (u32, u32)) -> Result<vk::Framebuffer, Error> {
        let framebuffer = self.upstream.create_framebuffer(render_pass, attachments, extent)?;
        self.framebuffers.lock().unwrap().push(framebuffer);
        Ok(framebuffer)
    }

    fn destroy_framebuffer(&self, _framebuffer: vk::Framebuffer) {
        // No-op: released in bulk by `recycle`.
    }
}
