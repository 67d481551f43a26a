//! Physical device selection, logical device creation, and queue/allocator ownership.
use crate::{
    error::Error,
    instance::{VULKAN_ENTRY, VULKAN_INSTANCE},
    platform_impl,
    serial::FrameNumber,
};
use ash::{
    version::{DeviceV1_0, EntryV1_0, InstanceV1_0},
    vk,
};
use std::{
    ffi::{CStr, CString},
    fmt,
    os::raw::c_void,
    ptr,
    sync::{
        atomic::{AtomicBool, AtomicU64},
        Mutex,
    },
};

pub(crate) const MAX_QUEUES: usize = 4;

/// Chooses a swapchain surface format among a list of supported formats.
fn get_preferred_swapchain_surface_format(surface_formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    surface_formats
        .iter()
        .find(|fmt| fmt.format == vk::Format::B8G8R8A8_SRGB && fmt.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .copied()
        .unwrap_or(surface_formats[0])
}

/// Chooses a present mode among a list of supported modes.
fn get_preferred_present_mode(available_present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if available_present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Computes the preferred swap extent.
fn get_preferred_swap_extent(framebuffer_size: (u32, u32), capabilities: &vk::SurfaceCapabilitiesKHR) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: framebuffer_size
                .0
                .clamp(capabilities.min_image_extent.width, capabilities.max_image_extent.width),
            height: framebuffer_size.1.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

#[derive(Debug)]
pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub surface: vk::SurfaceKHR,
    pub images: Vec<vk::Image>,
    pub format: vk::Format,
}

/// Defines the queue indices for each usage (graphics, compute, transfer, present).
#[derive(Copy, Clone, Default)]
pub(crate) struct QueueIndices {
    /// The queue that should be used for graphics operations. It is also guaranteed to support compute and transfer operations.
    pub graphics: u8,
    /// The queue that should be used for asynchronous compute operations.
    pub compute: u8,
    /// The queue that should be used for asynchronous transfer operations.
    pub transfer: u8,
    /// The queue that should be used for presentation.
    pub present: u8,
}

/// Information about the queues of a device.
#[derive(Copy, Clone, Default)]
pub(crate) struct QueuesInfo {
    /// Number of created queues.
    pub queue_count: usize,
    /// Queue indices by usage.
    pub indices: QueueIndices,
    /// The queue family index of each queue. The first `queue_count` entries are valid, the rest is unspecified.
    pub families: [u32; MAX_QUEUES],
    /// The queue handle of each queue. The first `queue_count` entries are valid, the rest is unspecified.
    pub queues: [vk::Queue; MAX_QUEUES],
}

/// Tracks whether a frame is currently being recorded, so misuse (starting two frames at once,
/// or ending one that was never started) is caught early rather than surfacing as a Vulkan
/// validation error several calls downstream.
pub(crate) struct RuntimeState {
    is_building_frame: AtomicBool,
    last_started_frame: AtomicU64,
}

impl RuntimeState {
    pub(crate) fn last_started_frame(&self) -> FrameNumber {
        FrameNumber(self.last_started_frame.load(std::sync::atomic::Ordering::Relaxed))
    }

    pub(crate) fn start_frame(&self, frame_number: FrameNumber) {
        use std::sync::atomic::Ordering::Relaxed;
        let prev = self.is_building_frame.swap(true, Relaxed);
        assert!(!prev, "a frame is already being recorded");
        self.last_started_frame.store(frame_number.0, Relaxed);
    }

    pub(crate) fn end_frame(&self) {
        use std::sync::atomic::Ordering::Relaxed;
        let prev = self.is_building_frame.swap(false, Relaxed);
        assert!(prev, "no frame is currently being recorded");
    }

    pub(crate) fn is_building_frame(&self) -> bool {
        self.is_building_frame.load(std::sync::atomic::Ordering::Relaxed)
    }
}

/// Configuration passed to [`Device::new`]; the only place the runtime reads tunables from,
/// per the design rule against hard-coded constants for anything a client might reasonably want
/// to override.
#[derive(Copy, Clone, Debug)]
pub struct RuntimeCreateInfo {
    /// Surface that the graphics queue must be able to present to, if any.
    pub present_surface: Option<vk::SurfaceKHR>,
    /// Number of frames that may be in flight at once (the depth of the super-frame ring, C7).
    pub frames_in_flight: usize,
    /// Number of frames a cache entry (pipeline, image view, render pass, cached image) may go
    /// unused before it is collected.
    pub cache_collection_threshold: u32,
    pub enable_ray_tracing: bool,
    pub enable_mesh_shader: bool,
}

impl Default for RuntimeCreateInfo {
    fn default() -> Self {
        RuntimeCreateInfo {
            present_surface: None,
            frames_in_flight: 2,
            cache_collection_threshold: 16,
            enable_ray_tracing: false,
            enable_mesh_shader: false,
        }
    }
}

/// Wrapper around a vulkan device, its selected queues, and its memory allocator.
pub struct Device {
    /// Underlying vulkan device
    pub device: ash::Device,
    /// Platform-specific extension functions
    pub(crate) platform_extensions: platform_impl::PlatformExtensions,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) physical_device_memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub(crate) physical_device_properties: vk::PhysicalDeviceProperties,
    pub(crate) queues_info: QueuesInfo,
    pub(crate) allocator: Mutex<gpu_allocator::vulkan::Allocator>,
    pub(crate) vk_khr_swapchain: ash::extensions::khr::Swapchain,
    pub(crate) vk_khr_surface: ash::extensions::khr::Surface,
    pub(crate) vk_ext_debug_utils: ash::extensions::ext::DebugUtils,
    pub(crate) debug_messenger: vk::DebugUtilsMessengerEXT,
    pub(crate) cache_collection_threshold: u32,
    pub(crate) state: RuntimeState,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Device").finish()
    }
}

struct PhysicalDeviceAndProperties {
    phy: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
}

unsafe fn select_physical_device(instance: &ash::Instance) -> PhysicalDeviceAndProperties {
    let physical_devices = instance
        .enumerate_physical_devices()
        .expect("failed to enumerate physical devices");
    if physical_devices.is_empty() {
        panic!("no device with vulkan support");
    }

    let mut selected_phy = None;
    let mut selected_phy_properties = Default::default();
    for phy in physical_devices {
        let props = instance.get_physical_device_properties(phy);
        if props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            selected_phy = Some(phy);
            selected_phy_properties = props;
        }
    }
    // fall back to whatever the first device is if no discrete GPU was found
    let phy = selected_phy.unwrap_or(physical_devices[0]);
    let properties = if selected_phy.is_some() {
        selected_phy_properties
    } else {
        instance.get_physical_device_properties(phy)
    };

    PhysicalDeviceAndProperties { phy, properties }
}

unsafe fn find_queue_family(
    phy: vk::PhysicalDevice,
    vk_khr_surface: &ash::extensions::khr::Surface,
    queue_families: &[vk::QueueFamilyProperties],
    flags: vk::QueueFlags,
    present_surface: Option<vk::SurfaceKHR>,
) -> u32 {
    let mut best_queue_family: Option<u32> = None;
    let mut best_flags = 0u32;
    for (index, queue_family) in queue_families.iter().enumerate() {
        let index = index as u32;
        if queue_family.queue_flags.contains(flags) {
            // matches the intended usage; if a presentation surface was requested, the family
            // must also support presenting to it.
            if let Some(surface) = present_surface {
                if !vk_khr_surface
                    .get_physical_device_surface_support(phy, index, surface)
                    .unwrap()
                {
                    continue;
                }
            }

            if let Some(ref mut i) = best_queue_family {
                // prefer the more specialized family (fewer unrelated capability bits set)
                if queue_family.queue_flags.as_raw().count_ones() < best_flags.count_ones() {
                    *i = index;
                    best_flags = queue_family.queue_flags.as_raw();
                }
            } else {
                best_queue_family = Some(index);
                best_flags = queue_family.queue_flags.as_raw();
            }
        }
    }

    best_queue_family.expect("could not find a compatible queue family")
}

unsafe extern "system" fn debug_utils_message_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_types: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message).to_str().unwrap_or("<non-utf8 message>");

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => tracing::trace!("{}", message),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => tracing::info!("{}", message),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => tracing::warn!("{}", message),
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => tracing::error!("{}", message),
        _ => tracing::debug!("{}", message),
    };

    vk::FALSE
}

const DEVICE_EXTENSIONS: &[&str] = &[
    "VK_KHR_swapchain",
    "VK_KHR_timeline_semaphore",
    "VK_KHR_synchronization2",
    "VK_KHR_buffer_device_address",
];

impl Device {
    fn find_compatible_memory_type_internal(
        &self,
        memory_type_bits: u32,
        memory_properties: vk::MemoryPropertyFlags,
    ) -> Option<u32> {
        for i in 0..self.physical_device_memory_properties.memory_type_count {
            if memory_type_bits & (1 << i) != 0
                && self.physical_device_memory_properties.memory_types[i as usize]
                    .property_flags
                    .contains(memory_properties)
            {
                return Some(i);
            }
        }
        None
    }

    /// Returns the index of the first memory type compatible with the specified memory type bitmask and additional memory property flags.
    pub(crate) fn find_compatible_memory_type(
        &self,
        memory_type_bits: u32,
        required_memory_properties: vk::MemoryPropertyFlags,
        preferred_memory_properties: vk::MemoryPropertyFlags,
    ) -> Option<u32> {
        self.find_compatible_memory_type_internal(memory_type_bits, required_memory_properties | preferred_memory_properties)
            .or_else(|| self.find_compatible_memory_type_internal(memory_type_bits, required_memory_properties))
    }

    /// Returns whether this device is compatible for presentation on the specified surface.
    pub unsafe fn is_compatible_for_presentation(&self, surface: vk::SurfaceKHR) -> bool {
        self.vk_khr_surface
            .get_physical_device_surface_support(self.physical_device, self.graphics_queue().1, surface)
            .unwrap()
    }

    /// Creates a new `Device` according to `info`.
    pub unsafe fn new(info: &RuntimeCreateInfo) -> Result<Device, Error> {
        let instance: &ash::Instance = &*VULKAN_INSTANCE;
        let vk_khr_surface = ash::extensions::khr::Surface::new(&*VULKAN_ENTRY, instance);

        let phy = select_physical_device(instance);
        let queue_family_properties = instance.get_physical_device_queue_family_properties(phy.phy);

        let graphics_queue_family = find_queue_family(
            phy.phy,
            &vk_khr_surface,
            &queue_family_properties,
            vk::QueueFlags::GRAPHICS,
            info.present_surface,
        );
        let compute_queue_family = find_queue_family(
            phy.phy,
            &vk_khr_surface,
            &queue_family_properties,
            vk::QueueFlags::COMPUTE,
            None,
        );
        let transfer_queue_family = find_queue_family(
            phy.phy,
            &vk_khr_surface,
            &queue_family_properties,
            vk::QueueFlags::TRANSFER,
            None,
        );

        tracing::info!(
            device_name = ?CStr::from_ptr(phy.properties.device_name.as_ptr()),
            graphics_queue_family,
            compute_queue_family,
            transfer_queue_family,
            "selected physical device"
        );

        let mut device_queue_create_infos = Vec::<vk::DeviceQueueCreateInfo>::new();
        let queue_priorities = [1.0f32];
        for &f in &[graphics_queue_family, compute_queue_family, transfer_queue_family] {
            if device_queue_create_infos.iter().any(|ci| ci.queue_family_index == f) {
                continue;
            }
            device_queue_create_infos.push(vk::DeviceQueueCreateInfo {
                flags: Default::default(),
                queue_family_index: f,
                queue_count: 1,
                p_queue_priorities: queue_priorities.as_ptr(),
                ..Default::default()
            });
        }

        let mut timeline_features = vk::PhysicalDeviceTimelineSemaphoreFeatures {
            timeline_semaphore: vk::TRUE,
            ..Default::default()
        };

        let mut features2 = vk::PhysicalDeviceFeatures2 {
            p_next: &mut timeline_features as *mut _ as *mut c_void,
            features: vk::PhysicalDeviceFeatures {
                tessellation_shader: vk::TRUE,
                fill_mode_non_solid: vk::TRUE,
                sampler_anisotropy: vk::TRUE,
                shader_storage_image_extended_formats: vk::TRUE,
                ..Default::default()
            },
            ..Default::default()
        };

        let c_device_extensions: Vec<_> = DEVICE_EXTENSIONS
            .iter()
            .chain(platform_impl::PlatformExtensions::names().iter())
            .map(|&s| CString::new(s).unwrap())
            .collect();
        let device_extensions: Vec<_> = c_device_extensions.iter().map(|s| s.as_ptr()).collect();

        let device_create_info = vk::DeviceCreateInfo {
            p_next: &mut features2 as *mut _ as *mut c_void,
            flags: Default::default(),
            queue_create_info_count: device_queue_create_infos.len() as u32,
            p_queue_create_infos: device_queue_create_infos.as_ptr(),
            enabled_layer_count: 0,
            pp_enabled_layer_names: ptr::null(),
            enabled_extension_count: device_extensions.len() as u32,
            pp_enabled_extension_names: device_extensions.as_ptr(),
            p_enabled_features: ptr::null(),
            ..Default::default()
        };

        let device: ash::Device = instance
            .create_device(phy.phy, &device_create_info, None)
            .map_err(Error::Vulkan)?;
        let graphics_queue = device.get_device_queue(graphics_queue_family, 0);
        let compute_queue = device.get_device_queue(compute_queue_family, 0);
        let transfer_queue = device.get_device_queue(transfer_queue_family, 0);

        // Queues are accessed by index; some of graphics/compute/transfer may coincide.
        let graphics_queue_index: u8 = 0;
        let compute_queue_index: u8 = if compute_queue == graphics_queue { 0 } else { 1 };
        let transfer_queue_index: u8 = if transfer_queue == graphics_queue {
            0
        } else if transfer_queue == compute_queue {
            1
        } else {
            2
        };

        let mut queues_info = QueuesInfo::default();
        queues_info.queues[graphics_queue_index as usize] = graphics_queue;
        queues_info.queues[compute_queue_index as usize] = compute_queue;
        queues_info.queues[transfer_queue_index as usize] = transfer_queue;
        queues_info.families[graphics_queue_index as usize] = graphics_queue_family;
        queues_info.families[compute_queue_index as usize] = compute_queue_family;
        queues_info.families[transfer_queue_index as usize] = transfer_queue_family;
        queues_info.indices = QueueIndices {
            graphics: graphics_queue_index,
            compute: compute_queue_index,
            present: graphics_queue_index,
            transfer: transfer_queue_index,
        };
        queues_info.queue_count = *[graphics_queue_index, compute_queue_index, transfer_queue_index]
            .iter()
            .max()
            .unwrap() as usize
            + 1;

        let allocator_create_desc = gpu_allocator::vulkan::AllocatorCreateDesc {
            physical_device: phy.phy,
            debug_settings: Default::default(),
            device: device.clone(),
            instance: instance.clone(),
            buffer_device_address: true,
        };
        let allocator = gpu_allocator::vulkan::Allocator::new(&allocator_create_desc)
            .map_err(|_| Error::Allocate(vk::Result::ERROR_INITIALIZATION_FAILED))?;

        let vk_khr_swapchain = ash::extensions::khr::Swapchain::new(&*VULKAN_INSTANCE, &device);

        let vk_ext_debug_utils = ash::extensions::ext::DebugUtils::new(&*VULKAN_ENTRY, &*VULKAN_INSTANCE);
        let debug_utils_messenger_create_info = vk::DebugUtilsMessengerCreateInfoEXT {
            flags: vk::DebugUtilsMessengerCreateFlagsEXT::empty(),
            message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
            pfn_user_callback: Some(debug_utils_message_callback),
            p_user_data: ptr::null_mut(),
            ..Default::default()
        };
        let debug_messenger = vk_ext_debug_utils
            .create_debug_utils_messenger(&debug_utils_messenger_create_info, None)
            .unwrap();

        let physical_device_memory_properties = instance.get_physical_device_memory_properties(phy.phy);
        let platform_extensions = platform_impl::PlatformExtensions::load(&*VULKAN_ENTRY, instance, &device);

        Ok(Device {
            device,
            platform_extensions,
            physical_device: phy.phy,
            physical_device_properties: phy.properties,
            physical_device_memory_properties,
            queues_info,
            allocator: Mutex::new(allocator),
            vk_khr_swapchain,
            vk_khr_surface,
            vk_ext_debug_utils,
            debug_messenger,
            cache_collection_threshold: info.cache_collection_threshold,
            state: RuntimeState {
                is_building_frame: AtomicBool::new(false),
                last_started_frame: AtomicU64::new(0),
            },
        })
    }

    /// Returns the physical device that this device was created on.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Returns the physical device properties.
    pub fn physical_device_properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.physical_device_properties
    }

    /// Returns the graphics queue handle and family index.
    pub fn graphics_queue(&self) -> (vk::Queue, u32) {
        let q = self.queues_info.indices.graphics as usize;
        (self.queues_info.queues[q], self.queues_info.families[q])
    }

    /// Returns the compute queue handle and family index.
    pub fn compute_queue(&self) -> (vk::Queue, u32) {
        let q = self.queues_info.indices.compute as usize;
        (self.queues_info.queues[q], self.queues_info.families[q])
    }

    /// Returns the transfer queue handle and family index.
    pub fn transfer_queue(&self) -> (vk::Queue, u32) {
        let q = self.queues_info.indices.transfer as usize;
        (self.queues_info.queues[q], self.queues_info.families[q])
    }

    /// Creates a swapchain object.
    pub unsafe fn create_swapchain(&self, surface: vk::SurfaceKHR, size: (u32, u32)) -> Result<Swapchain, Error> {
        let mut swapchain = Swapchain {
            handle: Default::default(),
            surface,
            images: vec![],
            format: Default::default(),
        };
        self.resize_swapchain(&mut swapchain, size)?;
        Ok(swapchain)
    }

    /// Resizes (or initially creates) the images backing a swapchain.
    pub unsafe fn resize_swapchain(&self, swapchain: &mut Swapchain, size: (u32, u32)) -> Result<(), Error> {
        let phy = self.physical_device;
        let capabilities = self
            .vk_khr_surface
            .get_physical_device_surface_capabilities(phy, swapchain.surface)
            .map_err(Error::Vulkan)?;
        let formats = self
            .vk_khr_surface
            .get_physical_device_surface_formats(phy, swapchain.surface)
            .map_err(Error::Vulkan)?;
        let present_modes = self
            .vk_khr_surface
            .get_physical_device_surface_present_modes(phy, swapchain.surface)
            .map_err(Error::Vulkan)?;

        let image_format = get_preferred_swapchain_surface_format(&formats);
        let present_mode = get_preferred_present_mode(&present_modes);
        let image_extent = get_preferred_swap_extent(size, &capabilities);
        let image_count = if capabilities.max_image_count > 0 && capabilities.min_image_count + 1 > capabilities.max_image_count {
            capabilities.max_image_count
        } else {
            capabilities.min_image_count + 1
        };

        let create_info = vk::SwapchainCreateInfoKHR {
            flags: Default::default(),
            surface: swapchain.surface,
            min_image_count: image_count,
            image_format: image_format.format,
            image_color_space: image_format.color_space,
            image_extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
            image_sharing_mode: vk::SharingMode::EXCLUSIVE,
            queue_family_index_count: 0,
            p_queue_family_indices: ptr::null(),
            pre_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode,
            clipped: vk::TRUE,
            old_swapchain: swapchain.handle,
            ..Default::default()
        };

        let new_handle = self
            .vk_khr_swapchain
            .create_swapchain(&create_info, None)
            .map_err(Error::Vulkan)?;
        if swapchain.handle != vk::SwapchainKHR::null() {
            self.vk_khr_swapchain.destroy_swapchain(swapchain.handle, None);
        }

        swapchain.handle = new_handle;
        swapchain.images = self.vk_khr_swapchain.get_swapchain_images(swapchain.handle).map_err(Error::Vulkan)?;
        swapchain.format = image_format.format;
        Ok(())
    }

    /// Acquires the next presentable image of `swapchain`. Returns the image index and
    /// whether the swapchain is suboptimal and should be recreated soon.
    pub unsafe fn acquire_next_image(&self, swapchain: &Swapchain, signal: vk::Semaphore) -> Result<(u32, crate::error::PresentStatus), Error> {
        let (index, suboptimal) = self
            .vk_khr_swapchain
            .acquire_next_image(swapchain.handle, u64::MAX, signal, vk::Fence::null())
            .map_err(Error::Vulkan)?;
        let status = if suboptimal {
            crate::error::PresentStatus::Suboptimal
        } else {
            crate::error::PresentStatus::Optimal
        };
        Ok((index, status))
    }

    /// Presents `image_index` of `swapchain` on `queue`, waiting on `wait` beforehand.
    pub unsafe fn present(&self, queue: vk::Queue, swapchain: &Swapchain, image_index: u32, wait: vk::Semaphore) -> Result<crate::error::PresentStatus, Error> {
        let present_info = vk::PresentInfoKHR {
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &swapchain.handle,
            p_image_indices: &image_index,
            ..Default::default()
        };
        match self.vk_khr_swapchain.queue_present(queue, &present_info) {
            Ok(true) => Ok(crate::error::PresentStatus::Suboptimal),
            Ok(false) => Ok(crate::error::PresentStatus::Optimal),
            Err(e) => Err(Error::Present(e)),
        }
    }

    pub(crate) fn start_frame(&self, frame_number: FrameNumber) {
        self.state.start_frame(frame_number);
    }

    pub(crate) fn end_frame(&self) {
        self.state.end_frame();
    }

    pub(crate) fn is_building_frame(&self) -> bool {
        self.state.is_building_frame()
    }
}

/// Computes the number of mip levels for a 2D image of the given size.
///
/// # Examples
///
/// ```
/// use vkcore::get_mip_level_count;
/// assert_eq!(get_mip_level_count(512, 512), 10);
/// assert_eq!(get_mip_level_count(511, 256), 9);
/// ```
pub fn get_mip_level_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_level_count_matches_log2_ceil() {
        assert_eq!(get_mip_level_count(1, 1), 1);
        assert_eq!(get_mip_level_count(512, 512), 10);
        assert_eq!(get_mip_level_count(511, 256), 9);
    }
}
