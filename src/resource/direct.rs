//! C3/C4: the bottom of the device resource hierarchy. `DirectResource` talks to Vulkan and
//! the allocator directly, with no pooling or aliasing of its own — every allocation is a real
//! `vkCreateBuffer`/`vkCreateImage` plus a fresh `gpu_allocator` allocation, freed immediately
//! on release. Every other level in the hierarchy eventually bottoms out here.
use crate::device::Device;
use crate::error::Error;
use crate::resource::{
    next_identity, AllocatedBuffer, AllocatedDescriptorSet, AllocatedImage, BufferDesc, CommandPoolDesc, DescriptorSetDesc, DeviceResource, ImageDesc,
    ImageViewDesc, PipelineDesc, QueryPoolDesc, RenderPassDesc,
};

use ash::{version::DeviceV1_0, vk};
use std::sync::Arc;

pub struct DirectResource {
    device: Arc<Device>,
}

impl DirectResource {
    pub fn new(device: Arc<Device>) -> DirectResource {
        DirectResource { device }
    }
}

impl DeviceResource for DirectResource {
    fn device(&self) -> &Arc<Device> {
        &self.device
    }

    fn allocate_buffer(&self, desc: &BufferDesc) -> Result<AllocatedBuffer, Error> {
        let create_info = vk::BufferCreateInfo {
            size: desc.size,
            usage: desc.usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let buffer = unsafe { self.device.device.create_buffer(&create_info, None).map_err(Error::Vulkan)? };
        let requirements = unsafe { self.device.device.get_buffer_memory_requirements(buffer) };

        let allocation = self
            .device
            .allocator
            .lock()
            .unwrap()
            .allocate(&gpu_allocator::vulkan::AllocationCreateDesc {
                name: "direct-buffer",
                requirements,
                location: desc.location,
                linear: true,
            })
            .map_err(|_| Error::Allocate(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))?;

        unsafe {
            self.device
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
                .map_err(Error::Vulkan)?;
        }

        Ok(AllocatedBuffer {
            identity: next_identity(),
            buffer,
            offset: 0,
            size: desc.size,
            allocation: Some(allocation),
        })
    }

    fn allocate_image(&self, desc: &ImageDesc) -> Result<AllocatedImage, Error> {
        let create_info = vk::ImageCreateInfo {
            image_type: if desc.extent.depth > 1 {
                vk::ImageType::TYPE_3D
            } else {
                vk::ImageType::TYPE_2D
            },
            format: desc.format,
            extent: desc.extent,
            mip_levels: desc.mip_levels,
            array_layers: desc.array_layers,
            samples: desc.samples,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: desc.usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let image = unsafe { self.device.device.create_image(&create_info, None).map_err(Error::Vulkan)? };
        let requirements = unsafe { self.device.device.get_image_memory_requirements(image) };

        let allocation = self
            .device
            .allocator
            .lock()
            .unwrap()
            .allocate(&gpu_allocator::vulkan::AllocationCreateDesc {
                name: "direct-image",
                requirements,
                location: desc.location,
                linear: false,
            })
            .map_err(|_| Error::Allocate(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))?;

        unsafe {
            self.device
                .device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
                .map_err(Error::Vulkan)?;
        }

        Ok(AllocatedImage {
            identity: next_identity(),
            image,
            format: desc.format,
            extent: desc.extent,
            allocation: Some(allocation),
        })
    }

    fn deallocate_buffer(&self, buffer: AllocatedBuffer) {
        unsafe { self.device.device.destroy_buffer(buffer.buffer, None) }
        if let Some(allocation) = buffer.allocation {
            let _ = self.device.allocator.lock().unwrap().free(allocation);
        }
    }

    fn deallocate_image(&self, image: AllocatedImage) {
        unsafe { self.device.device.destroy_image(image.image, None) }
        if let Some(allocation) = image.allocation {
            let _ = self.device.allocator.lock().unwrap().free(allocation);
        }
    }

    fn create_command_pool(&self, desc: &CommandPoolDesc) -> Result<vk::CommandPool, Error> {
        let create_info = vk::CommandPoolCreateInfo {
            flags: if desc.transient { vk::CommandPoolCreateFlags::TRANSIENT } else { vk::CommandPoolCreateFlags::empty() },
            queue_family_index: desc.queue_family,
            ..Default::default()
        };
        unsafe { self.device.device.create_command_pool(&create_info, None).map_err(Error::Vulkan) }
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.device.destroy_command_pool(pool, None) }
    }

    fn allocate_descriptor_set(&self, desc: &DescriptorSetDesc) -> Result<AllocatedDescriptorSet, Error> {
        let pool_create_info = vk::DescriptorPoolCreateInfo {
            max_sets: 1,
            pool_size_count: desc.pool_sizes.len() as u32,
            p_pool_sizes: desc.pool_sizes.as_ptr(),
            ..Default::default()
        };
        let pool = unsafe { self.device.device.create_descriptor_pool(&pool_create_info, None).map_err(Error::Vulkan)? };

        let layouts = [desc.layout];
        let variable_counts = [desc.variable_count.unwrap_or(0)];
        let mut variable_count_info = vk::DescriptorSetVariableDescriptorCountAllocateInfo {
            descriptor_set_count: 1,
            p_descriptor_counts: variable_counts.as_ptr(),
            ..Default::default()
        };
        let mut allocate_info = vk::DescriptorSetAllocateInfo {
            descriptor_pool: pool,
            descriptor_set_count: 1,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        if desc.variable_count.is_some() {
            allocate_info.p_next = &mut variable_count_info as *mut _ as *mut std::ffi::c_void;
        }

        let set = unsafe {
            self.device.device.allocate_descriptor_sets(&allocate_info).map_err(|e| {
                self.device.device.destroy_descriptor_pool(pool, None);
                Error::Vulkan(e)
            })?[0]
        };
        Ok(AllocatedDescriptorSet { set, pool })
    }

    fn destroy_descriptor_set(&self, set: AllocatedDescriptorSet) {
        unsafe { self.device.device.destroy_descriptor_pool(set.pool, None) }
    }

    fn create_image_view(&self, desc: &ImageViewDesc) -> Result<vk::ImageView, Error> {
        let create_info = vk::ImageViewCreateInfo {
            image: desc.image,
            view_type: desc.view_type,
            format: desc.format,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: desc.aspect_mask,
                base_mip_level: desc.base_mip_level,
                level_count: desc.level_count,
                base_array_layer: desc.base_array_layer,
                layer_count: desc.layer_count,
            },
            ..Default::default()
        };
        unsafe { self.device.device.create_image_view(&create_info, None).map_err(Error::Vulkan) }
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.device.destroy_image_view(view, None) }
    }

    fn create_query_pool(&self, desc: &QueryPoolDesc) -> Result<vk::QueryPool, Error> {
        let create_info = vk::QueryPoolCreateInfo {
            query_type: desc.query_type,
            query_count: desc.count,
            ..Default::default()
        };
        unsafe { self.device.device.create_query_pool(&create_info, None).map_err(Error::Vulkan) }
    }

    fn destroy_query_pool(&self, pool: vk::QueryPool) {
        unsafe { self.device.device.destroy_query_pool(pool, None) }
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore, Error> {
        unsafe { self.device.device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None).map_err(Error::Vulkan) }
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.device.destroy_semaphore(semaphore, None) }
    }

    fn create_fence(&self, signalled: bool) -> Result<vk::Fence, Error> {
        let create_info = vk::FenceCreateInfo {
            flags: if signalled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() },
            ..Default::default()
        };
        unsafe { self.device.device.create_fence(&create_info, None).map_err(Error::Vulkan) }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.device.destroy_fence(fence, None) }
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<vk::RenderPass, Error> {
        let mut attachments = Vec::new();
        let mut color_refs = Vec::new();
        for &format in desc.color_formats {
            color_refs.push(vk::AttachmentReference {
                attachment: attachments.len() as u32,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            });
            attachments.push(vk::AttachmentDescription {
                format,
                samples: desc.samples,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::STORE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                ..Default::default()
            });
        }
        let depth_ref = desc.depth_format.map(|format| {
            let reference = vk::AttachmentReference {
                attachment: attachments.len() as u32,
                layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            };
            attachments.push(vk::AttachmentDescription {
                format,
                samples: desc.samples,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                ..Default::default()
            });
            reference
        });

        let subpass = vk::SubpassDescription {
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            color_attachment_count: color_refs.len() as u32,
            p_color_attachments: color_refs.as_ptr(),
            p_depth_stencil_attachment: depth_ref.as_ref().map(|r| r as *const _).unwrap_or(std::ptr::null()),
            ..Default::default()
        };
        let create_info = vk::RenderPassCreateInfo {
            attachment_count: attachments.len() as u32,
            p_attachments: attachments.as_ptr(),
            subpass_count: 1,
            p_subpasses: &subpass,
            ..Default::default()
        };
        unsafe { self.device.device.create_render_pass(&create_info, None).map_err(Error::Vulkan) }
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.device.destroy_render_pass(render_pass, None) }
    }

    fn create_pipeline(&self, desc: &PipelineDesc) -> Result<vk::Pipeline, Error> {
        let entry_point = std::ffi::CString::new("main").unwrap();
        let stage_infos: Vec<_> = desc
            .stages
            .iter()
            .map(|(stage, module, _name)| vk::PipelineShaderStageCreateInfo {
                stage: *stage,
                module: *module,
                p_name: entry_point.as_ptr(),
                ..Default::default()
            })
            .collect();

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            ..Default::default()
        };
        let viewport_state = vk::PipelineViewportStateCreateInfo {
            viewport_count: 1,
            scissor_count: 1,
            ..Default::default()
        };
        let rasterization = vk::PipelineRasterizationStateCreateInfo {
            line_width: 1.0,
            cull_mode: vk::CullModeFlags::NONE,
            polygon_mode: vk::PolygonMode::FILL,
            ..Default::default()
        };
        let multisample = vk::PipelineMultisampleStateCreateInfo {
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            ..Default::default()
        };
        let color_blend_attachment = vk::PipelineColorBlendAttachmentState {
            color_write_mask: vk::ColorComponentFlags::all(),
            ..Default::default()
        };
        let color_blend = vk::PipelineColorBlendStateCreateInfo {
            attachment_count: 1,
            p_attachments: &color_blend_attachment,
            ..Default::default()
        };
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo {
            dynamic_state_count: dynamic_states.len() as u32,
            p_dynamic_states: dynamic_states.as_ptr(),
            ..Default::default()
        };

        let create_info = vk::GraphicsPipelineCreateInfo {
            stage_count: stage_infos.len() as u32,
            p_stages: stage_infos.as_ptr(),
            p_vertex_input_state: &vertex_input,
            p_input_assembly_state: &input_assembly,
            p_viewport_state: &viewport_state,
            p_rasterization_state: &rasterization,
            p_multisample_state: &multisample,
            p_color_blend_state: &color_blend,
            p_dynamic_state: &dynamic_state,
            layout: desc.layout,
            render_pass: desc.render_pass,
            subpass: 0,
            ..Default::default()
        };

        let pipelines = unsafe {
            self.device
                .device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, e)| Error::Vulkan(e))?
        };
        Ok(pipelines[0])
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.device.destroy_pipeline(pipeline, None) }
    }

    fn create_framebuffer(&self, render_pass: vk::RenderPass, attachments: &[vk::ImageView], extent: (u32, u32)) -> Result<vk::Framebuffer, Error> {
        let create_info = vk::FramebufferCreateInfo {
            render_pass,
            attachment_count: attachments.len() as u32,
            p_attachments: attachments.as_ptr(),
            width: extent.0,
            height: extent.1,
            layers: 1,
            ..Default::default()
        };
        unsafe { self.device.device.create_framebuffer(&create_info, None).map_err(Error::Vulkan) }
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.device.destroy_framebuffer(framebuffer, None) }
    }
}
