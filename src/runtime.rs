//! The ambient entry point: [`Runtime`] owns the device, the type interner, the resource
//! hierarchy, and one [`QueueExecutor`] per queue, and ties the compiler and recorder together
//! for a single `compile_and_submit` call. Grounded on `device::Device::new` for construction
//! and on `context::mod::Context`'s role as the thing every other piece borrows from, minus the
//! inline per-frame pass API that `Context` exposed directly.
use crate::compiler::{self, Schedule, StreamAssignment};
use crate::device::{Device, RuntimeCreateInfo};
use crate::error::Error;
use crate::executor::QueueExecutor;
use crate::ir::{Module, NodeId};
use crate::recorder::{Recorder, RequiredBarrier};
use crate::resource::{DirectResource, FrameResource, ResourceIdentity, SuperFrameResource, Subrange};
use crate::serial::{FrameNumber, QueueSerialNumbers, SubmissionNumber};
use crate::stream::{HostStream, Stream, VkQueueStream};
use crate::types::TypeInterner;
use ash::vk;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Which concrete device resource a scheduled node's access binds to, so the recorder's
/// [`crate::recorder::RequiredBarrier`] can be turned into an actual `vkCmdPipelineBarrier` call.
pub enum ResourceBinding {
    Image { image: vk::Image, range: vk::ImageSubresourceRange },
    Buffer { buffer: vk::Buffer, offset: u64, size: u64 },
}

/// A caller-supplied description of one resource access a scheduled node performs: the compiler
/// only reasons about the graph shape, so [`Runtime::compile_and_submit`] needs this alongside
/// the schedule to know which actual resource (and which sub-range of it) each node touches.
pub struct ResourceAccess {
    pub identity: ResourceIdentity,
    pub range: Subrange,
    pub queue_family: u32,
    pub access_mask: vk::AccessFlags,
    pub stage_mask: vk::PipelineStageFlags,
    pub layout: vk::ImageLayout,
    pub is_write: bool,
    pub binding: ResourceBinding,
}

fn record_barrier(stream: &Stream, binding: &ResourceBinding, barrier: &RequiredBarrier) {
    match binding {
        ResourceBinding::Image { image, range } => stream.synch_image(*image, *range, barrier),
        ResourceBinding::Buffer { buffer, offset, size } => stream.synch_memory(*buffer, *offset, *size, barrier),
    }
}

/// Owns a device, its queues, and the allocator hierarchy, and is the entry point for
/// compiling and submitting render graphs.
pub struct Runtime {
    device: Arc<Device>,
    types: TypeInterner,
    executors: Vec<Arc<QueueExecutor>>,
    frames: Arc<SuperFrameResource>,
    recorder: Recorder,
    /// One recording target per stream role, shared for the runtime's whole lifetime: a
    /// `call` node's commands always land in the same stream as every other node assigned the
    /// same [`StreamAssignment`], so there is exactly one of these per role rather than one per
    /// frame.
    streams: HashMap<StreamAssignment, Stream>,
    next_serial: AtomicU64,
    frame_number: FrameNumber,
    /// The frame handed out by the most recent `start_frame`, consumed by `end_frame` once its
    /// signalled serials are known.
    current_frame: Option<Arc<FrameResource>>,
}

impl Runtime {
    /// Creates a new runtime: selects a physical device, creates the logical device and its
    /// queues, and wires up one executor per queue plus a frame-in-flight ring sized by
    /// `info.frames_in_flight`.
    pub unsafe fn new(info: &RuntimeCreateInfo) -> Result<Runtime, Error> {
        let device = Arc::new(Device::new(info)?);

        let timelines = create_timeline_semaphores(&device)?;
        let mut executors = Vec::new();
        for (index, &timeline) in timelines.iter().enumerate() {
            let (queue, family) = queue_by_index(&device, index);
            executors.push(Arc::new(QueueExecutor::new(device.clone(), queue, index, family, timeline, timelines)));
        }

        let direct = Arc::new(DirectResource::new(device.clone()));
        let frames = Arc::new(SuperFrameResource::new(direct, info.frames_in_flight, timelines, info.cache_collection_threshold));

        let mut streams = HashMap::new();
        streams.insert(StreamAssignment::Host, Stream::Host(HostStream { name: "host".to_string() }));
        for (index, executor) in executors.iter().enumerate() {
            let assignment = stream_assignment_for_queue_index(index);
            streams.insert(assignment, Stream::VkQueue(VkQueueStream::new(executor.clone())));
        }

        Ok(Runtime {
            device,
            types: TypeInterner::new(),
            executors,
            frames,
            recorder: Recorder::new(crate::device::MAX_QUEUES, 0),
            streams,
            next_serial: AtomicU64::new(1),
            frame_number: FrameNumber(0),
            current_frame: None,
        })
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn types(&mut self) -> &mut TypeInterner {
        &mut self.types
    }

    pub fn frame_resources(&self) -> &Arc<SuperFrameResource> {
        &self.frames
    }

    /// Allocates the next globally increasing serial number, used to stamp nodes scheduled
    /// onto a device queue.
    pub fn next_serial(&self) -> u64 {
        self.next_serial.fetch_add(1, Ordering::Relaxed)
    }

    /// Compiles `module` down to `root` and returns the schedule; does not yet touch the
    /// device. Kept separate from submission so a caller can inspect or cache the schedule.
    pub fn compile(&self, module: &Module, root: NodeId) -> Result<Schedule, Error> {
        compiler::check_acquired_images_are_presented(module)?;
        compiler::compile(module, root, &self.types)
    }

    /// Compiles `module` and drives the compiled schedule to completion: walks `schedule.order`
    /// in order, and for every node the caller described an access for in `accesses`, records
    /// that access with the recorder and dispatches whatever synchronization it requires onto
    /// the node's stream (a timeline wait via [`Stream::add_dependency`], and any barrier -
    /// including the release half of a queue-family-ownership transfer, which is recorded on the
    /// *source* stream rather than the accessing one). Every stream touched is flushed and
    /// submitted once the whole schedule has been walked.
    ///
    /// Nodes absent from `accesses` (pure bookkeeping nodes the compiler already elides from
    /// synchronization, per [`crate::ir::node::NodeKind::touches_resources`]) are skipped.
    pub fn compile_and_submit(&mut self, module: &Module, root: NodeId, accesses: &HashMap<NodeId, Vec<ResourceAccess>>) -> Result<Schedule, Error> {
        let schedule = self.compile(module, root)?;
        let mut last_snn: HashMap<StreamAssignment, SubmissionNumber> = HashMap::new();

        for scheduled in &schedule.order {
            let node_accesses = match accesses.get(&scheduled.node) {
                Some(a) if !a.is_empty() => a,
                _ => continue,
            };

            let queue_index = stream_queue_index(scheduled.stream).unwrap_or(0);
            let snn = SubmissionNumber::new(queue_index, self.next_serial());
            last_snn.insert(scheduled.stream, snn);

            for access in node_accesses {
                let sync = self.recorder.access(
                    access.identity,
                    access.range.clone(),
                    snn,
                    access.queue_family,
                    access.access_mask,
                    access.stage_mask,
                    access.layout,
                    access.is_write,
                );

                if sync.wait_serials.iter().any(|&s| s != 0) {
                    if let Some(stream) = self.streams.get(&scheduled.stream) {
                        stream.add_dependency(sync.wait_serials, access.stage_mask);
                    }
                }
                if let Some(release) = &sync.release_barrier {
                    if let Some(src_stream) = self.streams.get(&stream_assignment_for_queue_index(release.src_queue)) {
                        record_barrier(src_stream, &access.binding, &release.barrier);
                    }
                }
                if let Some(barrier) = &sync.barrier {
                    if let Some(stream) = self.streams.get(&scheduled.stream) {
                        record_barrier(stream, &access.binding, barrier);
                    }
                }
            }

            if let Some(stream) = self.streams.get(&scheduled.stream) {
                stream.sync_deps();
            }
        }

        for (assignment, snn) in last_snn {
            if let Some(stream) = self.streams.get(&assignment) {
                stream.submit(snn);
            }
        }

        Ok(schedule)
    }

    /// Begins a new frame: advances the frame-in-flight ring and the recorder's synchronization
    /// base serial. Must be paired with [`Runtime::end_frame`].
    pub fn start_frame(&mut self) {
        let completed = self.completed_serials();
        self.device.start_frame(self.frame_number);
        let frame_resource = self.frames.begin_frame(self.frame_number, &completed);
        self.current_frame = Some(frame_resource);
        self.recorder.advance_frame(self.next_serial.load(Ordering::Relaxed));
    }

    /// Ends the current frame, flushing every executor's pending batch, handing the frame's
    /// resources back to the super-frame ring stamped with the serials that must be reached
    /// before it is safe to recycle, and advancing the frame counter for the next
    /// [`Runtime::start_frame`].
    pub fn end_frame(&mut self) {
        for executor in &self.executors {
            executor.flush();
        }
        self.device.end_frame();

        if let Some(frame) = self.current_frame.take() {
            let signalled = self.signalled_serials();
            self.frames.end_frame(self.frame_number, signalled, frame);
        }

        self.frame_number = FrameNumber(self.frame_number.0 + 1);
    }

    /// Reads each queue's timeline semaphore counter value, i.e. the highest serial known to
    /// have completed execution on the device so far.
    fn completed_serials(&self) -> QueueSerialNumbers {
        use ash::version::DeviceV1_2;

        let mut serials = QueueSerialNumbers::new();
        for executor in &self.executors {
            let value = unsafe {
                self.device
                    .device
                    .get_semaphore_counter_value(executor.timeline())
                    .unwrap_or(0)
            };
            serials.0[executor.queue_index()] = value;
        }
        serials
    }

    /// The serial each queue signalled (or was asked to signal) during the frame just ended,
    /// i.e. the value a future `begin_frame` on the same ring slot must wait for.
    fn signalled_serials(&self) -> QueueSerialNumbers {
        let mut serials = QueueSerialNumbers::new();
        for executor in &self.executors {
            serials.0[executor.queue_index()] = executor.last_signalled_serial();
        }
        serials
    }
}

fn queue_by_index(device: &Device, index: usize) -> (ash::vk::Queue, u32) {
    match index {
        0 => device.graphics_queue(),
        1 => device.compute_queue(),
        _ => device.transfer_queue(),
    }
}

/// The queue index backing a given stream role, mirroring [`queue_by_index`]'s assignment
/// (0 = graphics, 1 = compute, 2 = transfer). `Host` has no backing queue.
fn stream_queue_index(assignment: StreamAssignment) -> Option<usize> {
    match assignment {
        StreamAssignment::Host => None,
        StreamAssignment::Graphics => Some(0),
        StreamAssignment::Compute => Some(1),
        StreamAssignment::Transfer => Some(2),
    }
}

fn stream_assignment_for_queue_index(index: usize) -> StreamAssignment {
    match index {
        0 => StreamAssignment::Graphics,
        1 => StreamAssignment::Compute,
        _ => StreamAssignment::Transfer,
    }
}

fn create_timeline_semaphores(device: &Device) -> Result<[ash::vk::Semaphore; crate::device::MAX_QUEUES], Error> {
    use ash::version::DeviceV1_0;
    use ash::vk;
    use std::os::raw::c_void;

    let mut timelines = [vk::Semaphore::null(); crate::device::MAX_QUEUES];
    for slot in timelines.iter_mut() {
        let mut type_create_info = vk::SemaphoreTypeCreateInfo {
            semaphore_type: vk::SemaphoreType::TIMELINE,
            initial_value: 0,
            ..Default::default()
        };
        let create_info = vk::SemaphoreCreateInfo {
            p_next: &mut type_create_info as *mut _ as *mut c_void,
            ..Default::default()
        };
        *slot = unsafe { device.device.create_semaphore(&create_info, None).map_err(Error::Vulkan)? };
    }
    Ok(timelines)
}
