//! C10: `Stream`, the recording target a compiled node's commands are emitted into.
//!
//! A closed sum type rather than a trait object: the set of stream kinds is fixed (host
//! callback, a Vulkan queue, or a queue operating in "presentation engine" mode) and every
//! caller needs to match on which kind it has to decide what synchronization is even possible,
//! so a `match` over three known variants is clearer than a trait with three near-empty impls.
use crate::error::{Error, PresentStatus};
use crate::executor::QueueExecutor;
use crate::recorder::RequiredBarrier;
use crate::serial::{QueueSerialNumbers, SubmissionNumber};
use ash::vk;
use std::sync::{Arc, Mutex};

/// Pending synchronization work recorded against a device stream but not yet flushed into a
/// command buffer: a batch of barriers (mirroring the recorder's per-range granularity collapsed
/// back down to the handful of `vkCmdPipelineBarrier` calls the device actually needs) plus the
/// cross-queue waits gathered since the last flush.
#[derive(Default)]
struct StreamState {
    pending_wait: QueueSerialNumbers,
    pending_wait_stage: vk::PipelineStageFlags,
    im_bars: Vec<vk::ImageMemoryBarrier>,
    mem_bars: Vec<vk::BufferMemoryBarrier>,
    src_stage: vk::PipelineStageFlags,
    dst_stage: vk::PipelineStageFlags,
    in_render_pass: bool,
}

/// A stream that runs host (CPU) code, with no device synchronization of its own: readiness is
/// established purely by the order host code happens to run in.
pub struct HostStream {
    pub name: String,
}

/// A stream of commands recorded into command buffers and submitted to a Vulkan queue.
pub struct VkQueueStream {
    pub executor: Arc<QueueExecutor>,
    state: Mutex<StreamState>,
}

impl VkQueueStream {
    pub fn new(executor: Arc<QueueExecutor>) -> VkQueueStream {
        VkQueueStream { executor, state: Mutex::new(StreamState::default()) }
    }
}

/// Like [`VkQueueStream`], but the queue is understood to be driving a presentation engine
/// (its last operation is a `vkQueuePresentKHR`), which changes how the compiler schedules the
/// final synchronization: the last write before present must be visible to the presentation
/// engine, not to another pipeline stage.
pub struct VkPeStream {
    pub executor: Arc<QueueExecutor>,
    pub swapchain: vk::SwapchainKHR,
    state: Mutex<StreamState>,
}

impl VkPeStream {
    pub fn new(executor: Arc<QueueExecutor>, swapchain: vk::SwapchainKHR) -> VkPeStream {
        VkPeStream { executor, swapchain, state: Mutex::new(StreamState::default()) }
    }

    /// Presents `image_index` on this stream's queue, waiting on `render_complete` beforehand.
    pub fn present(&self, render_complete: vk::Semaphore, image_index: u32) -> Result<PresentStatus, Error> {
        let device = self.executor.device();
        let present_info = vk::PresentInfoKHR {
            wait_semaphore_count: 1,
            p_wait_semaphores: &render_complete,
            swapchain_count: 1,
            p_swapchains: &self.swapchain,
            p_image_indices: &image_index,
            ..Default::default()
        };
        match unsafe { device.vk_khr_swapchain.queue_present(self.executor.queue(), &present_info) } {
            Ok(true) => Ok(PresentStatus::Suboptimal),
            Ok(false) => Ok(PresentStatus::Optimal),
            Err(e) => Err(Error::Present(e)),
        }
    }
}

/// The recording target for a scheduled node.
pub enum Stream {
    Host(HostStream),
    VkQueue(VkQueueStream),
    VkPe(VkPeStream),
}

impl Stream {
    pub fn name(&self) -> &str {
        match self {
            Stream::Host(h) => &h.name,
            Stream::VkQueue(_) => "vk-queue",
            Stream::VkPe(_) => "vk-present",
        }
    }

    /// Whether commands recorded into this stream run on the device and therefore need
    /// synchronization tracking at all.
    pub fn is_device_stream(&self) -> bool {
        !matches!(self, Stream::Host(_))
    }

    /// The queue executor backing this stream, if it has one.
    pub fn executor(&self) -> Option<&Arc<QueueExecutor>> {
        match self {
            Stream::Host(_) => None,
            Stream::VkQueue(s) => Some(&s.executor),
            Stream::VkPe(s) => Some(&s.executor),
        }
    }

    fn state(&self) -> Option<&Mutex<StreamState>> {
        match self {
            Stream::Host(_) => None,
            Stream::VkQueue(s) => Some(&s.state),
            Stream::VkPe(s) => Some(&s.state),
        }
    }

    /// Queues a cross-queue wait to be established the next time [`Stream::sync_deps`] is
    /// called. A no-op on host streams.
    pub fn add_dependency(&self, wait: QueueSerialNumbers, dst_stage: vk::PipelineStageFlags) {
        if let Some(state) = self.state() {
            let mut state = state.lock().unwrap();
            state.pending_wait.join_assign(wait);
            state.pending_wait_stage |= dst_stage;
        }
    }

    /// Flushes every wait accumulated by [`Stream::add_dependency`] onto this stream's executor,
    /// forcing the current batch to end (a pipeline barrier cannot express a cross-queue wait).
    pub fn sync_deps(&self) {
        let (wait, stage, executor) = match (self.state(), self.executor()) {
            (Some(state), Some(executor)) => {
                let mut state = state.lock().unwrap();
                let wait = std::mem::replace(&mut state.pending_wait, QueueSerialNumbers::new());
                let stage = std::mem::replace(&mut state.pending_wait_stage, vk::PipelineStageFlags::empty());
                (wait, stage, executor)
            }
            _ => return,
        };
        if wait.iter().any(|&s| s != 0) {
            executor.wait_queue_serials(wait, stage);
        }
    }

    /// Queues an image memory barrier covering `range` of `image`, derived from the recorder's
    /// [`RequiredBarrier`]. Collected into a batch and only actually recorded on the next
    /// [`Stream::flush_barriers`] call.
    pub fn synch_image(&self, image: vk::Image, range: vk::ImageSubresourceRange, barrier: &RequiredBarrier) {
        if let Some(state) = self.state() {
            let (src_family, dst_family) = barrier
                .queue_family_transfer
                .map(|t| (t.src_queue_family, t.dst_queue_family))
                .unwrap_or((vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED));
            let mut state = state.lock().unwrap();
            state.src_stage |= barrier.src_stage_mask;
            state.dst_stage |= barrier.dst_stage_mask;
            state.im_bars.push(vk::ImageMemoryBarrier {
                src_access_mask: barrier.src_access_mask,
                dst_access_mask: barrier.dst_access_mask,
                old_layout: barrier.old_layout,
                new_layout: barrier.new_layout,
                src_queue_family_index: src_family,
                dst_queue_family_index: dst_family,
                image,
                subresource_range: range,
                ..Default::default()
            });
        }
    }

    /// Queues a buffer memory barrier covering `[offset, offset + size)` of `buffer`.
    pub fn synch_memory(&self, buffer: vk::Buffer, offset: u64, size: u64, barrier: &RequiredBarrier) {
        if let Some(state) = self.state() {
            let (src_family, dst_family) = barrier
                .queue_family_transfer
                .map(|t| (t.src_queue_family, t.dst_queue_family))
                .unwrap_or((vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED));
            let mut state = state.lock().unwrap();
            state.src_stage |= barrier.src_stage_mask;
            state.dst_stage |= barrier.dst_stage_mask;
            state.mem_bars.push(vk::BufferMemoryBarrier {
                src_access_mask: barrier.src_access_mask,
                dst_access_mask: barrier.dst_access_mask,
                src_queue_family_index: src_family,
                dst_queue_family_index: dst_family,
                buffer,
                offset,
                size,
                ..Default::default()
            });
        }
    }

    /// Records every pending barrier queued by [`Stream::synch_image`]/[`Stream::synch_memory`]
    /// as a single `vkCmdPipelineBarrier` call, and clears the batch. A no-op on host streams or
    /// when nothing is pending.
    pub fn flush_barriers(&self) {
        let executor = match self.executor() {
            Some(e) => e,
            None => return,
        };
        let state = match self.state() {
            Some(s) => s,
            None => return,
        };
        let mut state = state.lock().unwrap();
        if state.im_bars.is_empty() && state.mem_bars.is_empty() {
            return;
        }
        let src_stage = if state.src_stage.is_empty() { vk::PipelineStageFlags::TOP_OF_PIPE } else { state.src_stage };
        let dst_stage = if state.dst_stage.is_empty() { vk::PipelineStageFlags::BOTTOM_OF_PIPE } else { state.dst_stage };
        let cb = executor.current_command_buffer();
        unsafe {
            use ash::version::DeviceV1_0;
            executor.device().device.cmd_pipeline_barrier(
                cb,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &state.mem_bars,
                &state.im_bars,
            );
        }
        state.im_bars.clear();
        state.mem_bars.clear();
        state.src_stage = vk::PipelineStageFlags::empty();
        state.dst_stage = vk::PipelineStageFlags::empty();
    }

    /// Queues the barrier that transitions a render pass attachment into the layout it must be
    /// in before `vkCmdBeginRenderPass`, to be flushed by the following [`Stream::prepare_render_pass`].
    pub fn prepare_render_pass_attachment(&self, image: vk::Image, range: vk::ImageSubresourceRange, barrier: &RequiredBarrier) {
        self.synch_image(image, range, barrier);
    }

    /// Flushes any barriers queued by [`Stream::prepare_render_pass_attachment`] and marks the
    /// stream as inside a render pass; no further barriers can be recorded until
    /// [`Stream::end_render_pass`] (a render pass instance cannot contain a pipeline barrier).
    pub fn prepare_render_pass(&self) {
        self.flush_barriers();
        if let Some(state) = self.state() {
            let mut state = state.lock().unwrap();
            assert!(!state.in_render_pass, "stream is already inside a render pass");
            state.in_render_pass = true;
        }
    }

    pub fn end_render_pass(&self) {
        if let Some(state) = self.state() {
            let mut state = state.lock().unwrap();
            assert!(state.in_render_pass, "stream is not inside a render pass");
            state.in_render_pass = false;
        }
    }

    /// Signals that the current batch on this stream's queue should mark `snn` as completed on
    /// its timeline once submitted.
    pub fn signal(&self, snn: SubmissionNumber) {
        if let Some(executor) = self.executor() {
            executor.set_signal_serial(snn);
        }
    }

    /// Flushes any pending barriers, stamps the batch with `snn`'s signal, and submits it to the
    /// device. A no-op on host streams.
    pub fn submit(&self, snn: SubmissionNumber) {
        self.flush_barriers();
        self.signal(snn);
        if let Some(executor) = self.executor() {
            executor.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_stream_is_not_a_device_stream() {
        let stream = Stream::Host(HostStream { name: "upload".to_string() });
        assert!(!stream.is_device_stream());
        assert_eq!(stream.name(), "upload");
        assert!(stream.executor().is_none());
        // host streams tolerate every recording call as a no-op
        stream.sync_deps();
        stream.flush_barriers();
        stream.submit(SubmissionNumber::new(0, 1));
    }
}
