//! C11: the synchronization recorder — the single largest generalization in this crate
//! relative to the teacher.
//!
//! `context::frame`'s `add_memory_dependency` tracks one `ResourceTrackingInfo` (one writer,
//! one set of readers) per *whole* resource. That is not enough here: two `slice` nodes that
//! carve disjoint byte ranges out of the same buffer must be schedulable without any
//! dependency between them, while two nodes that touch overlapping ranges still need exactly
//! the barrier the teacher would have inserted for the whole resource. The recorder instead
//! keeps a sorted list of [`PartialUse`] entries per resource and only synchronizes against the
//! entries whose ranges actually overlap the new access.
use crate::resource::{ResourceIdentity, Subrange};
use crate::serial::{QueueSerialNumbers, SubmissionNumber};
use ash::vk;
use std::collections::HashMap;

/// One prior access to a sub-range of a resource: who touched it last, and how.
#[derive(Clone, Debug)]
pub struct PartialUse {
    pub range: Subrange,
    pub snn: SubmissionNumber,
    pub access_mask: vk::AccessFlags,
    pub stage_mask: vk::PipelineStageFlags,
    /// The image layout the range was left in, or `UNDEFINED` for buffers.
    pub layout: vk::ImageLayout,
    /// Whether this access wrote to the range (readers of the same range never need a
    /// dependency on each other, only on the last writer).
    pub is_write: bool,
    /// The queue family that currently owns this range, per queue-family-ownership-transfer
    /// rules (§5): the first writer or reader of a range assigns ownership, and ownership moves
    /// to whichever queue family next touches the range, emitting a transfer pair each time it
    /// changes.
    pub owner_queue_family: u32,
}

/// A queue-family-ownership transfer: the `srcQueueFamilyIndex`/`dstQueueFamilyIndex` pair a
/// barrier must carry when a resource moves from one queue family's exclusive ownership to
/// another's.
#[derive(Copy, Clone, Debug)]
pub struct QueueFamilyTransfer {
    pub src_queue_family: u32,
    pub dst_queue_family: u32,
}

/// A pipeline barrier the recorder has decided is necessary before a new access can proceed.
#[derive(Debug)]
pub struct RequiredBarrier {
    pub src_stage_mask: vk::PipelineStageFlags,
    pub dst_stage_mask: vk::PipelineStageFlags,
    pub src_access_mask: vk::AccessFlags,
    pub dst_access_mask: vk::AccessFlags,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    /// `Some` when this barrier is one half of a queue-family-ownership transfer pair.
    pub queue_family_transfer: Option<QueueFamilyTransfer>,
}

/// The release half of a queue-family-ownership transfer pair: recorded on `src_queue`'s
/// stream, ahead of the (same-returned) acquire half recorded on the accessing stream.
#[derive(Debug)]
pub struct ReleaseBarrier {
    pub src_queue: usize,
    pub barrier: RequiredBarrier,
}

/// The result of recording a new access: any queue-timeline waits that must be established,
/// the pipeline barrier to insert if the dependency can be satisfied within one queue (or the
/// acquire half of a transfer pair), and the release half of a transfer pair if ownership moved
/// between queue families.
#[derive(Debug, Default)]
pub struct SyncRequirement {
    pub wait_serials: QueueSerialNumbers,
    pub barrier: Option<RequiredBarrier>,
    pub release_barrier: Option<ReleaseBarrier>,
}

/// Tracks the last access to every sub-range of every resource live in the current recording
/// session, and the cross-queue synchronization already established between queues.
pub struct Recorder {
    last_modify: HashMap<ResourceIdentity, Vec<PartialUse>>,
    /// `xq_sync_table[dst][src]`: the highest serial on queue `src` that a pass on queue `dst`
    /// is already known to wait for, so redundant semaphore waits are not re-added. Same
    /// structure and purpose as `context::frame`'s `xq_sync_table`.
    xq_sync_table: Vec<QueueSerialNumbers>,
    base_serial: u64,
}

impl Recorder {
    pub fn new(queue_count: usize, base_serial: u64) -> Recorder {
        Recorder {
            last_modify: HashMap::new(),
            xq_sync_table: vec![QueueSerialNumbers::new(); queue_count],
            base_serial,
        }
    }

    /// Records a new access to `range` of `resource` on `queue_family`, returning the
    /// synchronization this access needs against everything that touched an overlapping range
    /// before it.
    #[allow(clippy::too_many_arguments)]
    pub fn access(
        &mut self,
        resource: ResourceIdentity,
        range: Subrange,
        snn: SubmissionNumber,
        queue_family: u32,
        access_mask: vk::AccessFlags,
        stage_mask: vk::PipelineStageFlags,
        layout: vk::ImageLayout,
        is_write: bool,
    ) -> SyncRequirement {
        let q = snn.queue();
        let entries = self.last_modify.entry(resource).or_default();

        let mut wait_serials = QueueSerialNumbers::new();
        let mut merged_barrier: Option<RequiredBarrier> = None;
        let mut release_barrier: Option<ReleaseBarrier> = None;

        for prior in entries.iter() {
            if !prior.range.overlaps(&range) {
                continue;
            }
            let needs_transfer = prior.owner_queue_family != queue_family;

            // A read after a read of the same range needs no dependency unless a layout
            // transition or a queue-family transfer is required.
            if !prior.is_write && !is_write && prior.layout == layout && !needs_transfer {
                continue;
            }

            let prior_q = prior.snn.queue();
            if prior_q != q || prior.snn.serial() <= self.base_serial {
                // cross-queue, or from an earlier frame: needs a timeline wait.
                if self.xq_sync_table[q].serial(prior_q) < prior.snn.serial() {
                    self.xq_sync_table[q][prior_q] = prior.snn.serial();
                    wait_serials[prior_q] = wait_serials[prior_q].max(prior.snn.serial());
                }
            } else if !needs_transfer {
                // same queue, same frame: a pipeline barrier suffices.
                let barrier = merged_barrier.get_or_insert(RequiredBarrier {
                    src_stage_mask: vk::PipelineStageFlags::empty(),
                    dst_stage_mask: vk::PipelineStageFlags::empty(),
                    src_access_mask: vk::AccessFlags::empty(),
                    dst_access_mask: vk::AccessFlags::empty(),
                    old_layout: prior.layout,
                    new_layout: layout,
                    queue_family_transfer: None,
                });
                barrier.src_stage_mask |= prior.stage_mask;
                barrier.dst_stage_mask |= stage_mask;
                barrier.src_access_mask |= prior.access_mask;
                barrier.dst_access_mask |= access_mask;
                barrier.new_layout = layout;
            }

            if needs_transfer {
                let transfer = QueueFamilyTransfer {
                    src_queue_family: prior.owner_queue_family,
                    dst_queue_family: queue_family,
                };
                release_barrier = Some(ReleaseBarrier {
                    src_queue: prior_q,
                    barrier: RequiredBarrier {
                        src_stage_mask: prior.stage_mask,
                        dst_stage_mask: prior.stage_mask,
                        src_access_mask: prior.access_mask,
                        dst_access_mask: vk::AccessFlags::empty(),
                        old_layout: prior.layout,
                        new_layout: layout,
                        queue_family_transfer: Some(transfer),
                    },
                });
                let acquire = merged_barrier.get_or_insert(RequiredBarrier {
                    src_stage_mask: vk::PipelineStageFlags::TOP_OF_PIPE,
                    dst_stage_mask: vk::PipelineStageFlags::empty(),
                    src_access_mask: vk::AccessFlags::empty(),
                    dst_access_mask: vk::AccessFlags::empty(),
                    old_layout: layout,
                    new_layout: layout,
                    queue_family_transfer: Some(transfer),
                });
                acquire.dst_stage_mask |= stage_mask;
                acquire.dst_access_mask |= access_mask;
                acquire.queue_family_transfer = Some(transfer);
            }
        }

        // Replace every overlapping entry with the new access: ranges that only partially
        // overlap are split so the unaffected remainder keeps its own earlier tracking info.
        let mut next = Vec::with_capacity(entries.len() + 1);
        for prior in entries.drain(..) {
            if !prior.range.overlaps(&range) {
                next.push(prior);
                continue;
            }
            for piece in prior.range.subtract(&range) {
                next.push(PartialUse { range: piece, ..prior.clone() });
            }
        }
        next.push(PartialUse {
            range,
            snn,
            access_mask,
            stage_mask,
            layout,
            is_write,
            owner_queue_family: queue_family,
        });
        *entries = next;

        SyncRequirement {
            wait_serials,
            barrier: merged_barrier,
            release_barrier,
        }
    }

    /// Drops all tracking for a resource, e.g. once it has been released back to its allocator.
    pub fn forget(&mut self, resource: ResourceIdentity) {
        self.last_modify.remove(&resource);
    }

    /// Starts a new frame: shifts the synchronization base serial forward so that accesses from
    /// the previous frame are treated as "from an earlier frame" by [`Recorder::access`].
    pub fn advance_frame(&mut self, new_base_serial: u64) {
        self.base_serial = new_base_serial;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snn(q: usize, s: u64) -> SubmissionNumber {
        SubmissionNumber::new(q, s)
    }

    #[test]
    fn disjoint_ranges_need_no_synchronization() {
        let mut rec = Recorder::new(2, 0);
        let res = ResourceIdentity(1);
        rec.access(
            res,
            Subrange::Buffer(0..64),
            snn(0, 1),
            0,
            vk::AccessFlags::SHADER_WRITE,
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::ImageLayout::UNDEFINED,
            true,
        );
        let sync = rec.access(
            res,
            Subrange::Buffer(64..128),
            snn(0, 2),
            0,
            vk::AccessFlags::SHADER_WRITE,
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::ImageLayout::UNDEFINED,
            true,
        );
        assert!(sync.barrier.is_none());
        assert_eq!(sync.wait_serials, QueueSerialNumbers::new());
    }

    #[test]
    fn overlapping_same_queue_access_needs_a_barrier() {
        let mut rec = Recorder::new(2, 0);
        let res = ResourceIdentity(1);
        rec.access(
            res,
            Subrange::Buffer(0..64),
            snn(0, 1),
            0,
            vk::AccessFlags::SHADER_WRITE,
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::ImageLayout::UNDEFINED,
            true,
        );
        let sync = rec.access(
            res,
            Subrange::Buffer(32..96),
            snn(0, 2),
            0,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::ImageLayout::UNDEFINED,
            false,
        );
        assert!(sync.barrier.is_some());
        assert!(sync.release_barrier.is_none());
    }

    #[test]
    fn overlapping_cross_queue_access_needs_a_timeline_wait() {
        let mut rec = Recorder::new(2, 0);
        let res = ResourceIdentity(1);
        rec.access(
            res,
            Subrange::Buffer(0..64),
            snn(0, 5),
            0,
            vk::AccessFlags::SHADER_WRITE,
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::ImageLayout::UNDEFINED,
            true,
        );
        let sync = rec.access(
            res,
            Subrange::Buffer(0..64),
            snn(1, 1),
            0,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::ImageLayout::UNDEFINED,
            false,
        );
        assert_eq!(sync.wait_serials.serial(0), 5);
    }

    #[test]
    fn cross_queue_family_access_emits_an_ownership_transfer_pair() {
        let mut rec = Recorder::new(2, 0);
        let res = ResourceIdentity(1);
        // Written on queue 0 / queue family 0, first use: ownership starts at family 0.
        rec.access(
            res,
            Subrange::whole_image(1, 1),
            snn(0, 1),
            0,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TRANSFER,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            true,
        );
        // Read on queue 1 / queue family 1: ownership must transfer from family 0 to family 1.
        let sync = rec.access(
            res,
            Subrange::whole_image(1, 1),
            snn(1, 1),
            1,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            false,
        );
        let release = sync.release_barrier.expect("expected a release barrier");
        assert_eq!(release.src_queue, 0);
        let transfer = release.barrier.queue_family_transfer.expect("expected a transfer descriptor");
        assert_eq!(transfer.src_queue_family, 0);
        assert_eq!(transfer.dst_queue_family, 1);
        let acquire = sync.barrier.expect("expected an acquire barrier");
        assert_eq!(acquire.queue_family_transfer.unwrap().dst_queue_family, 1);
    }
}
