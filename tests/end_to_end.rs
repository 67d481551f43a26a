//! Device-backed integration tests for the six end-to-end scenarios. Each of these needs a
//! real (or software, e.g. lavapipe) Vulkan implementation to create a `Runtime` against, so
//! they are `#[ignore]`-by-default, matching the teacher's `tests/frames.rs` convention of
//! keeping device-backed tests out of the default `cargo test` run.
use vkcore::ir::node::{BinaryOp, NodeKind, PipelineDescriptor, SliceAxis};
use vkcore::ir::Module;
use vkcore::recorder::Recorder;
use vkcore::resource::Subrange;
use vkcore::serial::SubmissionNumber;
use vkcore::types::AccessQualifier;
use vkcore::{vk, Device, Runtime, RuntimeCreateInfo};

unsafe fn new_test_runtime() -> Runtime {
    Runtime::new(&RuntimeCreateInfo::default()).expect("failed to create a runtime against the available Vulkan driver")
}

#[test]
#[ignore]
fn single_triangle_declares_one_color_attachment_pass() {
    let runtime = unsafe { new_test_runtime() };
    let mut module = Module::new();

    let color_target = module.emplace(
        "color-target",
        NodeKind::Allocate {
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        },
        vec![],
        vec![],
    );
    let draw = module.emplace(
        "draw-triangle",
        NodeKind::Call {
            pipeline: PipelineDescriptor {
                name: "triangle".to_string(),
                stages: vec![(vk::ShaderStageFlags::VERTEX, "vs_main".to_string()), (vk::ShaderStageFlags::FRAGMENT, "fs_main".to_string())],
            },
        },
        vec![color_target],
        vec![],
    );

    let schedule = runtime.compile(&module, draw.node).unwrap();
    // one allocate, one call: a single render pass with a single barrier after it (the
    // allocate itself needs no barrier - it has no prior use).
    assert_eq!(schedule.order.len(), 2);
    assert_eq!(schedule.usage[&color_target.node], vk::ImageUsageFlags::COLOR_ATTACHMENT);
}

#[test]
#[ignore]
fn texture_upload_then_sample_infers_usage_and_emits_one_barrier() {
    let mut runtime = unsafe { new_test_runtime() };
    let mut module = Module::new();

    let raw_image = runtime.types().image();
    let written = runtime.types().make_imbued(raw_image, AccessQualifier::Write);
    let read = runtime.types().make_imbued(raw_image, AccessQualifier::Read);

    let image = module.emplace("texture", NodeKind::Allocate { usage: vk::ImageUsageFlags::empty() }, vec![], vec![raw_image]);
    let write_view = module.emplace("texture-as-write-target", NodeKind::Construct, vec![image], vec![written]);
    let upload = module.emplace(
        "upload",
        NodeKind::Call {
            pipeline: PipelineDescriptor {
                name: "copy-buffer-to-image".to_string(),
                stages: vec![],
            },
        },
        vec![write_view],
        vec![raw_image],
    );
    let read_view = module.emplace("texture-as-sampled", NodeKind::Construct, vec![upload], vec![read]);
    let sample = module.emplace(
        "sample",
        NodeKind::Call {
            pipeline: PipelineDescriptor {
                name: "sample-texture".to_string(),
                stages: vec![(vk::ShaderStageFlags::FRAGMENT, "fs_main".to_string())],
            },
        },
        vec![read_view],
        vec![],
    );

    let schedule = runtime.compile(&module, sample.node).unwrap();
    let upload_order = schedule.order.iter().find(|s| s.node == upload.node).unwrap().order;
    let sample_order = schedule.order.iter().find(|s| s.node == sample.node).unwrap().order;
    assert!(upload_order < sample_order);
    // usage inference must OR the write (-> TRANSFER_DST, since neither call declares a
    // compute/fragment/vertex stage for the write) and the read (-> SAMPLED) into the
    // allocate's declared (empty) usage.
    let usage = schedule.usage[&image.node];
    assert!(usage.contains(vk::ImageUsageFlags::SAMPLED));
    assert!(usage.contains(vk::ImageUsageFlags::TRANSFER_DST));

    // the actual barrier this scenario requires - exactly one TRANSFER_WRITE -> SAMPLED
    // (FRAGMENT_SHADER) transition - is produced by the recorder, not the schedule.
    let mut recorder = Recorder::new(1, 0);
    let whole = Subrange::whole_image(1, 1);
    let write_sync = recorder.access(
        vkcore::resource::ResourceIdentity(1),
        whole.clone(),
        SubmissionNumber::new(0, 1),
        0,
        vk::AccessFlags::TRANSFER_WRITE,
        vk::PipelineStageFlags::TRANSFER,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        true,
    );
    assert!(write_sync.barrier.is_none(), "first use of a resource needs no barrier");

    let read_sync = recorder.access(
        vkcore::resource::ResourceIdentity(1),
        whole,
        SubmissionNumber::new(0, 2),
        0,
        vk::AccessFlags::SHADER_READ,
        vk::PipelineStageFlags::FRAGMENT_SHADER,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        false,
    );
    let barrier = read_sync.barrier.expect("expected exactly one barrier between the write and the read");
    assert_eq!(barrier.src_access_mask, vk::AccessFlags::TRANSFER_WRITE);
    assert_eq!(barrier.dst_access_mask, vk::AccessFlags::SHADER_READ);
    assert_eq!(barrier.old_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
    assert_eq!(barrier.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    assert!(read_sync.release_barrier.is_none(), "same-queue access needs no ownership transfer");
}

#[test]
#[ignore]
fn cross_queue_handoff_produces_a_timeline_wait_and_an_ownership_transfer() {
    let runtime = unsafe { new_test_runtime() };
    let mut module = Module::new();

    let buffer = module.emplace("staging-buffer", NodeKind::Allocate { usage: vk::ImageUsageFlags::empty() }, vec![], vec![]);
    let produce = module.emplace(
        "produce-on-transfer",
        NodeKind::Call {
            pipeline: PipelineDescriptor {
                name: "fill-buffer".to_string(),
                stages: vec![],
            },
        },
        vec![buffer],
        vec![],
    );
    let consume = module.emplace(
        "consume-on-graphics",
        NodeKind::Call {
            pipeline: PipelineDescriptor {
                name: "draw-with-buffer".to_string(),
                stages: vec![(vk::ShaderStageFlags::VERTEX, "vs_main".to_string())],
            },
        },
        vec![produce],
        vec![],
    );

    let schedule = runtime.compile(&module, consume.node).unwrap();
    let produce_stream = schedule.order.iter().find(|s| s.node == produce.node).unwrap().stream;
    let consume_stream = schedule.order.iter().find(|s| s.node == consume.node).unwrap().stream;
    assert_ne!(format!("{:?}", produce_stream), format!("{:?}", consume_stream));

    // the recorder must emit both the cross-queue timeline wait and a queue-family ownership
    // transfer pair (release on the transfer queue's family, acquire on the graphics queue's).
    let mut recorder = Recorder::new(2, 0);
    let resource = vkcore::resource::ResourceIdentity(7);
    recorder.access(
        resource,
        Subrange::whole_buffer(256),
        SubmissionNumber::new(1, 10),
        /* transfer queue family */ 1,
        vk::AccessFlags::TRANSFER_WRITE,
        vk::PipelineStageFlags::TRANSFER,
        vk::ImageLayout::UNDEFINED,
        true,
    );
    let sync = recorder.access(
        resource,
        Subrange::whole_buffer(256),
        SubmissionNumber::new(0, 1),
        /* graphics queue family */ 0,
        vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
        vk::PipelineStageFlags::VERTEX_INPUT,
        vk::ImageLayout::UNDEFINED,
        false,
    );
    assert_eq!(sync.wait_serials.serial(1), 10);
    let release = sync.release_barrier.expect("expected a queue-family ownership release barrier");
    assert_eq!(release.src_queue, 1);
    let transfer = release.barrier.queue_family_transfer.unwrap();
    assert_eq!(transfer.src_queue_family, 1);
    assert_eq!(transfer.dst_queue_family, 0);
}

#[test]
#[ignore]
fn mip_sliced_image_converges_without_a_barrier() {
    let mut runtime = unsafe { new_test_runtime() };
    let mut module = Module::new();

    let image_ty = runtime.types().image();
    let image = module.emplace("mip-image", NodeKind::Allocate { usage: vk::ImageUsageFlags::SAMPLED }, vec![], vec![image_ty]);
    let (level0, _, rest) = module.slice("level-0", image, image_ty, SliceAxis::MipLevel, 0, 1);
    let levels_rest = rest;
    let merged = module.emplace("merged", NodeKind::Converge, vec![level0, levels_rest], vec![]);

    let schedule = runtime.compile(&module, merged.node).unwrap();
    assert!(schedule.order.iter().any(|s| s.node == level0.node));
    assert!(schedule.order.iter().any(|s| s.node == levels_rest.node));

    // the slice's mip band and its remainder are disjoint sub-ranges of the same image: the
    // recorder must not require a barrier between writes that target the two halves.
    let mut recorder = Recorder::new(1, 0);
    let resource = vkcore::resource::ResourceIdentity(3);
    recorder.access(
        resource,
        Subrange::Image { mip_levels: 0..1, array_layers: 0..1 },
        SubmissionNumber::new(0, 1),
        0,
        vk::AccessFlags::TRANSFER_WRITE,
        vk::PipelineStageFlags::TRANSFER,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        true,
    );
    let sync = recorder.access(
        resource,
        Subrange::Image { mip_levels: 1..4, array_layers: 0..1 },
        SubmissionNumber::new(0, 2),
        0,
        vk::AccessFlags::TRANSFER_WRITE,
        vk::PipelineStageFlags::TRANSFER,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        true,
    );
    assert!(sync.barrier.is_none(), "disjoint mip ranges must not synchronize against each other");
}

#[test]
#[ignore]
fn swapchain_frame_acquires_and_presents() {
    let runtime = unsafe { new_test_runtime() };
    let mut module = Module::new();

    let acquired = module.emplace("acquired-image", NodeKind::AcquireNextImage, vec![], vec![]);
    let draw = module.emplace(
        "draw-into-acquired",
        NodeKind::Call {
            pipeline: PipelineDescriptor {
                name: "blit-to-swapchain".to_string(),
                stages: vec![(vk::ShaderStageFlags::FRAGMENT, "fs_main".to_string())],
            },
        },
        vec![acquired],
        vec![],
    );

    assert!(vkcore::compiler::check_acquired_images_are_presented(&module).is_err());

    let schedule = runtime.compile(&module, draw.node).unwrap();
    assert_eq!(schedule.order.last().unwrap().node, draw.node);
}

#[test]
#[ignore]
fn frame_recycle_blocks_until_the_ring_slot_is_free() {
    let mut runtime = unsafe { new_test_runtime() };
    let depth = runtime.frame_resources().depth();

    for _ in 0..(depth as u64 + 1) {
        runtime.start_frame();
        runtime.end_frame();
    }
}

#[test]
#[ignore]
fn math_binary_nodes_stay_on_the_host_stream() {
    let runtime = unsafe { new_test_runtime() };
    let mut module = Module::new();
    let a = module.emplace("a", NodeKind::Constant, vec![], vec![]);
    let b = module.emplace("b", NodeKind::Constant, vec![], vec![]);
    let sum = module.emplace("sum", NodeKind::MathBinary { op: BinaryOp::Add }, vec![a, b], vec![]);

    let schedule = runtime.compile(&module, sum.node).unwrap();
    let stream = schedule.order.iter().find(|s| s.node == sum.node).unwrap().stream;
    assert_eq!(format!("{:?}", stream), "Host");
}

#[test]
#[ignore]
fn device_selection_prefers_a_discrete_gpu_when_available() {
    let runtime = unsafe { new_test_runtime() };
    let _: &Device = runtime.device();
}
