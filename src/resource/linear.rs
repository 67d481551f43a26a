//! C5: linear sub-allocators, and the `LinearResource` wrapper that hands out sub-ranges of a
//! small number of large backing allocations instead of a fresh `vkAllocateMemory`-class
//! allocation per resource.
//!
//! The backing free-list algorithm (first-fit over a sorted list of free byte ranges) plays
//! the role the teacher's VMA "virtual block" played for buffer sub-allocation: `gpu_allocator`
//! does not expose an equivalent virtual-allocation API, so the free-list here is a direct,
//! from-scratch substitute rather than a wrapped external allocator.
use crate::error::Error;
use crate::resource::{
    next_identity, AllocatedBuffer, AllocatedDescriptorSet, AllocatedImage, BufferDesc, CommandPoolDesc, DescriptorSetDesc, DeviceResource, ImageDesc,
    ImageViewDesc, PipelineDesc, QueryPoolDesc, RenderPassDesc, ResourceIdentity,
};
use ash::vk;
use std::ops::Range;
use std::sync::{Arc, Mutex};

/// A first-fit free-list sub-allocator over a single fixed-size block.
pub struct LinearAllocator {
    capacity: u64,
    free_ranges: Vec<Range<u64>>,
}

impl LinearAllocator {
    pub fn new(capacity: u64) -> LinearAllocator {
        LinearAllocator {
            capacity,
            free_ranges: vec![0..capacity],
        }
    }

    /// Finds the first free range at least `size` bytes long with the given alignment, and
    /// carves `size` bytes off its front.
    pub fn allocate(&mut self, size: u64, align: u64) -> Option<u64> {
        for i in 0..self.free_ranges.len() {
            let range = &self.free_ranges[i];
            let aligned_start = align_up(range.start, align);
            if aligned_start + size <= range.end {
                let end = range.end;
                if aligned_start > range.start {
                    self.free_ranges[i] = range.start..aligned_start;
                    self.free_ranges.insert(i + 1, aligned_start + size..end);
                } else if aligned_start + size < end {
                    self.free_ranges[i] = aligned_start + size..end;
                } else {
                    self.free_ranges.remove(i);
                }
                return Some(aligned_start);
            }
        }
        None
    }

    /// Returns a previously allocated range to the free list, coalescing it with adjacent
    /// free ranges so fragmentation does not accumulate across a long-lived block.
    pub fn free(&mut self, range: Range<u64>) {
        let pos = self.free_ranges.partition_point(|r| r.start < range.start);
        self.free_ranges.insert(pos, range);
        self.coalesce();
    }

    fn coalesce(&mut self) {
        self.free_ranges.sort_by_key(|r| r.start);
        let mut merged: Vec<Range<u64>> = Vec::with_capacity(self.free_ranges.len());
        for r in self.free_ranges.drain(..) {
            if let Some(last) = merged.last_mut() {
                if last.end == r.start {
                    last.end = r.end;
                    continue;
                }
            }
            merged.push(r);
        }
        self.free_ranges = merged;
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }
}

fn align_up(v: u64, align: u64) -> u64 {
    if align == 0 {
        v
    } else {
        (v + align - 1) / align * align
    }
}

struct Block {
    buffer: AllocatedBuffer,
    allocator: LinearAllocator,
}

/// A sub-allocating `DeviceResource` backed by a small pool of large buffers.
///
/// Images are never sub-allocated (Vulkan image memory requirements are too varied to share a
/// block profitably) and fall straight through to `upstream`.
pub struct LinearResource {
    upstream: Arc<dyn DeviceResource>,
    block_size: u64,
    usage: vk::BufferUsageFlags,
    location: gpu_allocator::MemoryLocation,
    blocks: Mutex<Vec<Block>>,
}

/// A buffer sub-range handed out by [`LinearResource`].
pub struct SubBuffer {
    pub identity: ResourceIdentity,
    pub buffer: vk::Buffer,
    pub offset: u64,
    pub size: u64,
    block_index: usize,
}

impl LinearResource {
    pub fn new(upstream: Arc<dyn DeviceResource>, block_size: u64, usage: vk::BufferUsageFlags, location: gpu_allocator::MemoryLocation) -> LinearResource {
        LinearResource {
            upstream,
            block_size,
            usage,
            location,
            blocks: Mutex::new(Vec::new()),
        }
    }

    const MIN_ALIGN: u64 = 256;

    /// Sub-allocates `size` bytes, creating a new backing block if none of the existing ones
    /// have enough contiguous free space.
    pub fn sub_allocate(&self, size: u64) -> Result<SubBuffer, Error> {
        let mut blocks = self.blocks.lock().unwrap();
        for (index, block) in blocks.iter_mut().enumerate() {
            if let Some(offset) = block.allocator.allocate(size, Self::MIN_ALIGN) {
                return Ok(SubBuffer {
                    identity: block.buffer.identity,
                    buffer: block.buffer.buffer,
                    offset,
                    size,
                    block_index: index,
                });
            }
        }

        let capacity = self.block_size.max(size);
        let buffer = self.upstream.allocate_buffer(&BufferDesc {
            size: capacity,
            usage: self.usage,
            location: self.location,
        })?;
        let mut allocator = LinearAllocator::new(capacity);
        let offset = allocator.allocate(size, Self::MIN_ALIGN).expect("fresh block must fit its first allocation");
        let identity = buffer.identity;
        let handle = buffer.buffer;
        blocks.push(Block { buffer, allocator });
        Ok(SubBuffer {
            identity,
            buffer: handle,
            offset,
            size,
            block_index: blocks.len() - 1,
        })
    }

    pub fn sub_free(&self, sub: SubBuffer) {
        let mut blocks = self.blocks.lock().unwrap();
        if let Some(block) = blocks.get_mut(sub.block_index) {
            block.allocator.free(sub.offset..sub.offset + sub.size);
        }
    }
}

impl DeviceResource for LinearResource {
    fn device(&self) -> &Arc<crate::device::Device> {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_fit_reuses_freed_space() {
        let mut alloc = LinearAllocator::new(1024);
        let a = alloc.allocate(256, 16).unwrap();
        let b = alloc.allocate(256, 16).unwrap();
        assert_ne!(a, b);
        alloc.free(a..a + 256);
        let c = alloc.allocate(256, 16).unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn allocate_fails_when_block_is_full() {
        let mut alloc = LinearAllocator::new(256);
        assert!(alloc.allocate(200, 16).is_some());
        assert!(alloc.allocate(200, 16).is_none());
    }

    #[test]
    fn coalesces_adjacent_free_ranges() {
        let mut alloc = LinearAllocator::new(512);
        let a = alloc.allocate(128, 1).unwrap();
        let b = alloc.allocate(128, 1).unwrap();
        alloc.free(a..a + 128);
        alloc.free(b..b + 128);
        // the whole front of the block should now be allocatable as one piece
        assert!(alloc.allocate(256, 1).is_some());
    }
}
