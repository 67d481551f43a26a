//! C9: `QueueExecutor`, the per-queue command batching and submission machinery.
//!
//! Generalizes `context::submission::CommandBatch`/`Context::submit_command_batch` away from
//! the single monolithic `Context`: each queue gets its own executor instance guarded by a
//! `Mutex`, so independent queues can be drained concurrently instead of serializing all
//! submission through one struct.
use crate::device::{Device, MAX_QUEUES};
use crate::serial::{QueueSerialNumbers, SubmissionNumber};
use ash::version::DeviceV1_0;
use ash::vk;
use std::ffi::c_void;
use std::sync::{Arc, Mutex};

/// An external (non-timeline) semaphore to wait on or signal as part of a batch, e.g. the
/// binary semaphore a presentation engine signals when an image becomes available.
#[derive(Copy, Clone, Debug)]
pub struct ExternalSemaphore {
    pub semaphore: vk::Semaphore,
    pub value: Option<u64>,
}

/// A queue submission in the process of being assembled. Mirrors `CommandBatch`, minus the
/// fields that were specific to `Context`'s inline frame representation.
#[derive(Default)]
struct Batch {
    wait_serials: QueueSerialNumbers,
    /// One entry per queue, same indexing as `wait_serials`, so a wait on queue `i`'s timeline
    /// is always paired with the stage that actually needs to wait for it.
    wait_dst_stages: [vk::PipelineStageFlags; MAX_QUEUES],
    signal_snn: SubmissionNumber,
    external_waits: Vec<ExternalSemaphore>,
    external_waits_stages: Vec<vk::PipelineStageFlags>,
    external_signals: Vec<ExternalSemaphore>,
    command_buffers: Vec<vk::CommandBuffer>,
}

impl Batch {
    fn is_empty(&self) -> bool {
        self.command_buffers.is_empty() && !self.signal_snn.is_valid() && self.external_signals.is_empty()
    }
}

/// Allocates and recycles command buffers for a single queue family.
struct CommandAllocator {
    command_pool: vk::CommandPool,
    free: Vec<vk::CommandBuffer>,
    used: Vec<vk::CommandBuffer>,
}

impl CommandAllocator {
    fn new(device: &ash::Device, queue_family: u32) -> CommandAllocator {
        let create_info = vk::CommandPoolCreateInfo {
            flags: vk::CommandPoolCreateFlags::TRANSIENT,
            queue_family_index: queue_family,
            ..Default::default()
        };
        let command_pool = unsafe { device.create_command_pool(&create_info, None).expect("failed to create command pool") };
        CommandAllocator {
            command_pool,
            free: Vec::new(),
            used: Vec::new(),
        }
    }

    fn allocate(&mut self, device: &ash::Device) -> vk::CommandBuffer {
        let cb = self.free.pop().unwrap_or_else(|| unsafe {
            let allocate_info = vk::CommandBufferAllocateInfo {
                command_pool: self.command_pool,
                level: vk::CommandBufferLevel::PRIMARY,
                command_buffer_count: 1,
                ..Default::default()
            };
            device.allocate_command_buffers(&allocate_info).expect("failed to allocate command buffer")[0]
        });
        self.used.push(cb);
        cb
    }

    fn reset(&mut self, device: &ash::Device) {
        unsafe {
            device
                .reset_command_pool(self.command_pool, vk::CommandPoolResetFlags::empty())
                .expect("failed to reset command pool");
        }
        self.free.append(&mut self.used);
    }
}

/// Submits command buffers to a single Vulkan queue, batching consecutive passes that need no
/// intervening semaphore wait/signal into one `vkQueueSubmit`.
pub struct QueueExecutor {
    device: Arc<Device>,
    queue: vk::Queue,
    queue_index: usize,
    queue_family: u32,
    timeline: vk::Semaphore,
    /// The timeline semaphore of every queue, indexed by queue index, so a cross-queue wait
    /// can be expressed without reaching back into a shared `Runtime`.
    all_timelines: [vk::Semaphore; MAX_QUEUES],
    state: Mutex<ExecutorState>,
}

struct ExecutorState {
    batch: Batch,
    pools: Vec<CommandAllocator>,
    spare_pools: Vec<CommandAllocator>,
    last_signalled_serial: u64,
}

impl QueueExecutor {
    pub fn new(
        device: Arc<Device>,
        queue: vk::Queue,
        queue_index: usize,
        queue_family: u32,
        timeline: vk::Semaphore,
        all_timelines: [vk::Semaphore; MAX_QUEUES],
    ) -> QueueExecutor {
        QueueExecutor {
            device,
            queue,
            queue_index,
            queue_family,
            timeline,
            all_timelines,
            state: Mutex::new(ExecutorState {
                batch: Batch::default(),
                pools: Vec::new(),
                spare_pools: Vec::new(),
                last_signalled_serial: 0,
            }),
        }
    }

    pub fn queue_index(&self) -> usize {
        self.queue_index
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// This queue's own timeline semaphore, whose counter value is read to determine which of
    /// its submissions have completed on the device.
    pub fn timeline(&self) -> vk::Semaphore {
        self.timeline
    }

    /// The serial most recently handed to the device as this queue's signal value, regardless
    /// of whether that submission has completed yet.
    pub fn last_signalled_serial(&self) -> u64 {
        self.state.lock().unwrap().last_signalled_serial
    }

    /// Begins recording a fresh primary command buffer in the current batch, returning it.
    /// If the current batch already has a command buffer open, that one is returned instead.
    pub fn current_command_buffer(&self) -> vk::CommandBuffer {
        let mut state = self.state.lock().unwrap();
        if let Some(&cb) = state.batch.command_buffers.last() {
            return cb;
        }
        let pool = self.ensure_pool(&mut state);
        let cb = pool.allocate(&self.device.device);
        unsafe {
            self.device
                .device
                .begin_command_buffer(cb, &vk::CommandBufferBeginInfo::default())
                .expect("failed to begin command buffer");
        }
        state.batch.command_buffers.push(cb);
        cb
    }

    fn ensure_pool<'a>(&self, state: &'a mut ExecutorState) -> &'a mut CommandAllocator {
        if state.pools.is_empty() {
            let pool = state
                .spare_pools
                .pop()
                .unwrap_or_else(|| CommandAllocator::new(&self.device.device, self.queue_family));
            state.pools.push(pool);
        }
        state.pools.last_mut().unwrap()
    }

    /// Sets the serial that this batch will signal on the queue's timeline semaphore once
    /// submitted, establishing the happens-before relationship other queues wait on.
    pub fn set_signal_serial(&self, snn: SubmissionNumber) {
        self.state.lock().unwrap().batch.signal_snn = snn;
    }

    /// Adds a wait on another queue's timeline, forcing the current batch to flush before the
    /// next command buffer is recorded (a pipeline barrier cannot express a cross-queue wait).
    pub fn wait_queue_serials(&self, serials: QueueSerialNumbers, dst_stage: vk::PipelineStageFlags) {
        let mut state = self.state.lock().unwrap();
        self.flush_locked(&mut state);
        for (i, &serial) in serials.iter().enumerate() {
            if serial != 0 {
                state.batch.wait_dst_stages[i] |= dst_stage;
            }
        }
        state.batch.wait_serials.join_assign(serials);
    }

    pub fn wait_external_semaphore(&self, semaphore: ExternalSemaphore, dst_stage: vk::PipelineStageFlags) {
        let mut state = self.state.lock().unwrap();
        self.flush_locked(&mut state);
        state.batch.external_waits.push(semaphore);
        state.batch.external_waits_stages.push(dst_stage);
    }

    pub fn signal_external_semaphore(&self, semaphore: ExternalSemaphore) {
        self.state.lock().unwrap().batch.external_signals.push(semaphore);
    }

    /// Submits the current batch to the queue if it is non-empty, and starts a fresh one.
    pub fn flush(&self) {
        let mut state = self.state.lock().unwrap();
        self.flush_locked(&mut state);
    }

    fn flush_locked(&self, state: &mut ExecutorState) {
        if state.batch.is_empty() {
            return;
        }

        for &cb in &state.batch.command_buffers {
            unsafe {
                self.device.device.end_command_buffer(cb).expect("failed to end command buffer");
            }
        }

        let mut signal_semaphores = Vec::new();
        let mut signal_values = Vec::new();
        let mut wait_semaphores = Vec::new();
        let mut wait_values = Vec::new();
        let mut wait_stages = Vec::new();

        if state.batch.signal_snn.serial() > 0 {
            signal_semaphores.push(self.timeline);
            signal_values.push(state.batch.signal_snn.serial());
            state.last_signalled_serial = state.batch.signal_snn.serial();
        }
        for sem in &state.batch.external_signals {
            signal_semaphores.push(sem.semaphore);
            signal_values.push(sem.value.unwrap_or(0));
        }
        for (i, &serial) in state.batch.wait_serials.iter().enumerate() {
            if serial != 0 {
                wait_semaphores.push(self.all_timelines[i]);
                wait_values.push(serial);
                let stage = state.batch.wait_dst_stages[i];
                wait_stages.push(if stage.is_empty() { vk::PipelineStageFlags::TOP_OF_PIPE } else { stage });
            }
        }
        for (sem, &stage) in state.batch.external_waits.iter().zip(state.batch.external_waits_stages.iter()) {
            wait_semaphores.push(sem.semaphore);
            wait_values.push(sem.value.unwrap_or(0));
            wait_stages.push(stage);
        }

        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo {
            wait_semaphore_value_count: wait_values.len() as u32,
            p_wait_semaphore_values: wait_values.as_ptr(),
            signal_semaphore_value_count: signal_values.len() as u32,
            p_signal_semaphore_values: signal_values.as_ptr(),
            ..Default::default()
        };
        let submit_info = vk::SubmitInfo {
            p_next: &mut timeline_info as *mut _ as *mut c_void,
            wait_semaphore_count: wait_semaphores.len() as u32,
            p_wait_semaphores: wait_semaphores.as_ptr(),
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: state.batch.command_buffers.len() as u32,
            p_command_buffers: state.batch.command_buffers.as_ptr(),
            signal_semaphore_count: signal_semaphores.len() as u32,
            p_signal_semaphores: signal_semaphores.as_ptr(),
            ..Default::default()
        };

        unsafe {
            self.device
                .device
                .queue_submit(self.queue, &[submit_info], vk::Fence::null())
                .expect("queue submission failed");
        }

        let finished_pools: Vec<_> = state.pools.drain(..).collect();
        state.spare_pools.extend(finished_pools);
        state.batch = Batch::default();
    }

    /// Recycles command pools that belonged to batches whose device work is now known to have
    /// completed, so their command buffers can be reused without a fresh `vkCreateCommandPool`.
    pub fn recycle_pools(&self) {
        let mut state = self.state.lock().unwrap();
        let device = self.device.device.clone();
        for pool in &mut state.spare_pools {
            pool.reset(&device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_batch_is_empty() {
        assert!(Batch::default().is_empty());
    }

    #[test]
    fn batch_with_a_signal_serial_is_not_empty() {
        let mut batch = Batch::default();
        batch.signal_snn = SubmissionNumber::new(0, 1);
        assert!(!batch.is_empty());
    }

    #[test]
    fn batch_with_an_external_signal_is_not_empty() {
        let mut batch = Batch::default();
        batch.external_signals.push(ExternalSemaphore {
            semaphore: vk::Semaphore::null(),
            value: None,
        });
        assert!(!batch.is_empty());
    }
}
