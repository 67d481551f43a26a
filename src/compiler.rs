//! C12: the compiler — walks a [`crate::ir::Module`], computes liveness and usage for every
//! node, and produces a schedule: an ordered list of nodes per stream, plus the resource
//! synchronization each one needs.
//!
//! Grounded on `context::transient`'s reachability-bitset approach (generalized from one
//! DAG-of-passes to one DAG-of-nodes) and on `context::frame`'s pass-building loop
//! (`Context::add_graphics_pass` et al.), which this module replaces with a graph walk instead
//! of an imperative recording API.
use crate::error::Error;
use crate::ir::{Module, Node, NodeId, NodeKind};
use crate::types::{AccessQualifier, TypeDescriptor, TypeInterner};
use ash::vk;
use fixedbitset::FixedBitSet;
use std::collections::{HashMap, HashSet};
use tracing::trace_span;

/// Which stream a scheduled node's commands should be recorded into, named by queue role rather
/// than by index: `graal`'s `PassType` infers a pass's queue the same way, from what kind of
/// work the pass actually does rather than from an explicit annotation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum StreamAssignment {
    /// Runs as ordinary host code; never touches a queue.
    Host,
    Graphics,
    Compute,
    Transfer,
}

/// Infers the stream a node's commands belong on from its kind, mirroring
/// `context::frame`'s pass-to-queue assignment: nodes that don't touch device resources stay on
/// the host, and a `call` is routed by the shader stages its pipeline declares.
fn assign_stream(node: &Node) -> StreamAssignment {
    match &node.kind {
        NodeKind::Constant | NodeKind::Construct | NodeKind::MathBinary { .. } | NodeKind::CompilePipeline { .. } => StreamAssignment::Host,
        NodeKind::Call { pipeline } => {
            let graphics_stages = vk::ShaderStageFlags::VERTEX
                | vk::ShaderStageFlags::FRAGMENT
                | vk::ShaderStageFlags::GEOMETRY
                | vk::ShaderStageFlags::TESSELLATION_CONTROL
                | vk::ShaderStageFlags::TESSELLATION_EVALUATION;
            let stages = pipeline.stages.iter().fold(vk::ShaderStageFlags::empty(), |acc, (s, _)| acc | *s);
            if stages.intersects(graphics_stages) {
                StreamAssignment::Graphics
            } else if stages.intersects(vk::ShaderStageFlags::COMPUTE) {
                StreamAssignment::Compute
            } else {
                StreamAssignment::Transfer
            }
        }
        NodeKind::Allocate { .. } | NodeKind::Release | NodeKind::Acquire | NodeKind::Slice { .. } | NodeKind::Converge | NodeKind::AcquireNextImage => {
            StreamAssignment::Graphics
        }
    }
}

/// A node together with the order it should be recorded in and the stream it runs on.
#[derive(Debug)]
pub struct ScheduledNode {
    pub node: NodeId,
    pub order: u32,
    pub stream: StreamAssignment,
}

/// The result of compiling a module: a linear schedule plus the liveness ranges the allocator
/// passes (C5-C8) use to decide when a transient resource's memory may be aliased.
pub struct Schedule {
    pub order: Vec<ScheduledNode>,
    /// For each node, the order index of the last node that consumes one of its outputs.
    /// A resource produced by a node whose `last_use` equals its own `order` is dead
    /// immediately and may be aliased right away.
    pub last_use: HashMap<NodeId, u32>,
    /// For each `allocate` node, the image usage flags inferred by OR-ing every access any
    /// `call` reachable from it performs, on top of whatever usage the caller declared.
    pub usage: HashMap<NodeId, vk::ImageUsageFlags>,
    /// Every node's position in full program order (unlike `ScheduledNode::order`, this is
    /// assigned before dead-code elimination, so it is defined for every node in the module).
    program_order: HashMap<NodeId, u32>,
    /// `happens_after[a]` is the set of nodes that must have already executed by the time `a`
    /// runs, i.e. everything reachable by following `inputs` backwards from `a`.
    happens_after: HashMap<NodeId, HashSet<NodeId>>,
}

impl Schedule {
    /// Whether `a` is guaranteed to execute before `b` by program order alone, so a dependency
    /// between them needs no additional wait or barrier - the recorder still establishes the
    /// happens-before relationship for any *other* pair of accesses, but a pass reusing this
    /// fact can skip re-synchronizing a dependency already implied by the graph shape.
    pub fn happens_before(&self, a: NodeId, b: NodeId) -> bool {
        self.happens_after.get(&b).map_or(false, |set| set.contains(&a))
    }

    pub fn program_order_of(&self, node: NodeId) -> Option<u32> {
        self.program_order.get(&node).copied()
    }
}

struct Dag {
    nodes: Vec<NodeId>,
    index_of: HashMap<NodeId, usize>,
    preds: Vec<Vec<usize>>,
    /// `successors[i]` = nodes that have `i` as a predecessor; the mirror image of `preds`,
    /// computed once and shared by every walk that needs to go forwards instead of backwards.
    successors: Vec<Vec<usize>>,
}

fn build_dag(module: &Module) -> Result<Dag, Error> {
    let nodes: Vec<NodeId> = module.iter().map(|(id, _)| id).collect();
    let index_of: HashMap<NodeId, usize> = nodes.iter().enumerate().map(|(i, &id)| (id, i)).collect();

    let mut preds = vec![Vec::new(); nodes.len()];
    for (i, &id) in nodes.iter().enumerate() {
        let node = module.node(id).expect("node id came from this module's own iterator");
        for input in &node.inputs {
            let &pred_index = index_of
                .get(&input.node)
                .ok_or_else(|| Error::RenderGraph(format!("node {:?} references a node not present in the module", id)))?;
            preds[i].push(pred_index);
        }
    }

    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (i, p) in preds.iter().enumerate() {
        for &pred in p {
            successors[pred].push(i);
        }
    }

    Ok(Dag { nodes, index_of, preds, successors })
}

/// Topologically sorts the DAG with an iterative worklist (Kahn's algorithm), so the depth of
/// the render graph never risks overflowing the call stack.
fn topological_order(dag: &Dag) -> Result<Vec<usize>, Error> {
    let _span = trace_span!("topological_order").entered();
    let n = dag.nodes.len();
    let mut in_degree = dag.preds.iter().map(|p| p.len() as u32).collect::<Vec<_>>();
    let mut ready: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);

    while let Some(i) = ready.pop() {
        order.push(i);
        for &s in &dag.successors[i] {
            in_degree[s] -= 1;
            if in_degree[s] == 0 {
                ready.push(s);
            }
        }
    }

    if order.len() != n {
        return Err(Error::RenderGraph("render graph contains a cycle".to_string()));
    }
    Ok(order)
}

/// Computes, for every node, the set of nodes reachable by following `inputs` backwards - used
/// to answer "does A happen-before B" without re-walking the graph for every pair queried.
fn compute_reachability(dag: &Dag, order: &[usize]) -> Vec<FixedBitSet> {
    let n = dag.nodes.len();
    let mut reach = vec![FixedBitSet::with_capacity(n); n];
    for &i in order {
        for &p in &dag.preds[i] {
            reach[i].insert(p);
            let (a, b) = disjoint_index_mut(&mut reach, i, p);
            *a |= &*b;
        }
    }
    reach
}

fn disjoint_index_mut<T>(v: &mut [T], a: usize, b: usize) -> (&mut T, &mut T) {
    assert!(a != b);
    if a < b {
        let (left, right) = v.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = v.split_at_mut(a);
        (&mut right[0], &mut left[b])
    }
}

/// The image usage bits a `call` parameter's access qualifier contributes to whatever
/// `allocate` node produced the image it is bound to.
fn infer_usage_contribution(access: AccessQualifier, stages: vk::ShaderStageFlags) -> vk::ImageUsageFlags {
    match access {
        AccessQualifier::Read => vk::ImageUsageFlags::SAMPLED,
        AccessQualifier::Write | AccessQualifier::ReadWrite => {
            if stages.intersects(vk::ShaderStageFlags::COMPUTE | vk::ShaderStageFlags::FRAGMENT | vk::ShaderStageFlags::VERTEX) {
                vk::ImageUsageFlags::STORAGE
            } else {
                vk::ImageUsageFlags::TRANSFER_DST
            }
        }
        AccessQualifier::FramebufferAttachment => vk::ImageUsageFlags::COLOR_ATTACHMENT,
    }
}

/// Walks backwards from `index` through the pass-through node kinds (`construct`, `slice`,
/// `converge`) to find every `allocate` node that could have produced the value flowing into
/// it, so usage inferred at a `call` site reaches the actual allocation even through a chain of
/// views.
fn producer_allocate_nodes(dag: &Dag, module: &Module, index: usize, seen: &mut HashSet<usize>) -> Vec<usize> {
    if !seen.insert(index) {
        return Vec::new();
    }
    let node = module.node(dag.nodes[index]).expect("node id came from this module's own dag");
    match &node.kind {
        NodeKind::Allocate { .. } => vec![index],
        NodeKind::Construct | NodeKind::Slice { .. } | NodeKind::Converge => dag.preds[index]
            .iter()
            .flat_map(|&p| producer_allocate_nodes(dag, module, p, seen))
            .collect(),
        // A single-input, single-output `call` is treated as an in-place access: its output
        // stands for the same resource in its post-access state (the pattern an upload pass
        // feeds into the node that samples the result), so usage inference keeps tracing
        // through it rather than stopping at the call.
        NodeKind::Call { .. } if node.inputs.len() == 1 && node.output_types.len() <= 1 => {
            producer_allocate_nodes(dag, module, dag.preds[index][0], seen)
        }
        _ => Vec::new(),
    }
}

/// Compiles `module` into a [`Schedule`].
///
/// `root` selects the node whose value the caller actually wants; everything not reachable
/// backwards from it is dead code and is excluded from the schedule, mirroring
/// [`crate::ir::Module::collect`] but scoped to a single compile rather than mutating the
/// module in place.
pub fn compile(module: &Module, root: NodeId, types: &TypeInterner) -> Result<Schedule, Error> {
    let _span = trace_span!("compile").entered();
    let dag = build_dag(module)?;
    let full_order = topological_order(&dag)?;

    // liveness: walk backwards from `root` to find the reachable set (another iterative
    // worklist, matching `Module::collect`'s traversal style).
    let root_index = *dag
        .index_of
        .get(&root)
        .ok_or_else(|| Error::RenderGraph("compile root is not a node in this module".to_string()))?;

    let mut live = HashSet::new();
    let mut worklist = vec![root_index];
    while let Some(i) = worklist.pop() {
        if !live.insert(i) {
            continue;
        }
        for &p in &dag.preds[i] {
            worklist.push(p);
        }
    }

    let order: Vec<ScheduledNode> = full_order
        .iter()
        .filter(|&&i| live.contains(&i))
        .enumerate()
        .map(|(order_index, &i)| {
            let node = dag.nodes[i];
            ScheduledNode {
                node,
                order: order_index as u32,
                stream: assign_stream(module.node(node).expect("node id came from this module's own iterator")),
            }
        })
        .collect();

    let program_order: HashMap<NodeId, u32> = full_order.iter().enumerate().map(|(i, &idx)| (dag.nodes[idx], i as u32)).collect();
    let reachability = compute_reachability(&dag, &full_order);
    let happens_after: HashMap<NodeId, HashSet<NodeId>> = full_order
        .iter()
        .map(|&i| {
            let set = reachability[i].ones().map(|p| dag.nodes[p]).collect();
            (dag.nodes[i], set)
        })
        .collect();

    let mut last_use: HashMap<NodeId, u32> = HashMap::new();
    for scheduled in &order {
        let node = module.node(scheduled.node).unwrap();
        if !node.kind.touches_resources() {
            continue;
        }
        for input in &node.inputs {
            let entry = last_use.entry(input.node).or_insert(scheduled.order);
            if scheduled.order > *entry {
                *entry = scheduled.order;
            }
        }
    }

    // Nodes with no consumer at all are live for exactly their own position.
    for scheduled in &order {
        last_use.entry(scheduled.node).or_insert(scheduled.order);
    }

    // Usage inference: every `call` OR-in the access its pipeline performs on an `Imbued`
    // input into whichever `allocate` node(s) actually produced the image behind that input,
    // tracing back through `construct`/`slice`/`converge` passthroughs.
    let mut usage: HashMap<NodeId, vk::ImageUsageFlags> = HashMap::new();
    for scheduled in &order {
        let node = module.node(scheduled.node).unwrap();
        let pipeline = match &node.kind {
            NodeKind::Call { pipeline } => pipeline,
            _ => continue,
        };
        let stages = pipeline.stages.iter().fold(vk::ShaderStageFlags::empty(), |acc, (s, _)| acc | *s);
        for input in &node.inputs {
            let producer = module.node(input.node).unwrap();
            let ty = match producer.output_types.get(input.output as usize) {
                Some(&ty) => ty,
                None => continue,
            };
            let access = match types.get(ty) {
                TypeDescriptor::Imbued { access, .. } => *access,
                _ => continue,
            };
            let contribution = infer_usage_contribution(access, stages);
            let pred_index = dag.index_of[&input.node];
            let mut seen = HashSet::new();
            for alloc_index in producer_allocate_nodes(&dag, module, pred_index, &mut seen) {
                *usage.entry(dag.nodes[alloc_index]).or_insert_with(vk::ImageUsageFlags::empty) |= contribution;
            }
        }
    }

    // "Unset placeholder": an `allocate` node whose usage is empty after both the caller's
    // declaration and inference have had their say can never be legally created.
    for scheduled in &order {
        let node = module.node(scheduled.node).unwrap();
        if let NodeKind::Allocate { usage: declared } = &node.kind {
            let inferred = usage.get(&scheduled.node).copied().unwrap_or_else(vk::ImageUsageFlags::empty);
            let combined = *declared | inferred;
            if combined.is_empty() {
                return Err(Error::RenderGraph(format!(
                    "allocate node {:?} has no usage: not declared by the caller and none could be inferred from its uses",
                    scheduled.node
                )));
            }
            usage.insert(scheduled.node, combined);
        }
    }

    Ok(Schedule {
        order,
        last_use,
        usage,
        program_order,
        happens_after,
    })
}

/// Scans a module for `acquire_next_image` nodes that have no corresponding `present`
/// consumer reachable forward from them - a common render-graph authoring mistake, caught at
/// compile time rather than surfacing as a validation-layer warning at submit time.
pub fn check_acquired_images_are_presented(module: &Module) -> Result<(), Error> {
    for (id, node) in module.iter() {
        if matches!(node.kind, NodeKind::AcquireNextImage) {
            let consumed = module.iter().any(|(_, other)| other.inputs.iter().any(|r| r.node == id));
            if !consumed {
                return Err(Error::RenderGraph(format!(
                    "acquired swapchain image from node {:?} is never consumed (missing present?)",
                    id
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{PipelineDescriptor, Ref};
    use crate::types::TypeInterner;

    #[test]
    fn compile_orders_producers_before_consumers() {
        let mut interner = TypeInterner::new();
        let image_ty = interner.image();
        let mut module = Module::new();
        let a = module.emplace("a", NodeKind::Constant, vec![], vec![image_ty]);
        let b = module.emplace("b", NodeKind::Construct, vec![a], vec![image_ty]);
        let c = module.emplace("c", NodeKind::Construct, vec![b], vec![image_ty]);

        let schedule = compile(&module, c.node, &interner).unwrap();
        let pos = |r: Ref| schedule.order.iter().position(|s| s.node == r.node).unwrap();
        assert!(pos(a) < pos(b));
        assert!(pos(b) < pos(c));
    }

    #[test]
    fn compile_excludes_nodes_unreachable_from_root() {
        let mut interner = TypeInterner::new();
        let image_ty = interner.image();
        let mut module = Module::new();
        let unused = module.emplace("unused", NodeKind::Constant, vec![], vec![image_ty]);
        let root = module.emplace("root", NodeKind::Constant, vec![], vec![image_ty]);

        let schedule = compile(&module, root.node, &interner).unwrap();
        assert!(schedule.order.iter().all(|s| s.node != unused.node));
    }

    #[test]
    fn compile_rejects_dangling_references() {
        let mut interner = TypeInterner::new();
        let image_ty = interner.image();
        let mut module = Module::new();
        let a = module.emplace("a", NodeKind::Constant, vec![], vec![image_ty]);
        let b = module.emplace("b", NodeKind::Construct, vec![a], vec![image_ty]);
        module.destroy_node(a.node);
        assert!(compile(&module, b.node, &interner).is_err());
    }

    #[test]
    fn usage_is_inferred_from_a_call_reading_an_imbued_view() {
        use crate::types::AccessQualifier;

        let mut interner = TypeInterner::new();
        let image_ty = interner.image();
        let imbued = interner.make_imbued(image_ty, AccessQualifier::Read);
        let mut module = Module::new();
        let alloc = module.emplace("alloc", NodeKind::Allocate { usage: vk::ImageUsageFlags::empty() }, vec![], vec![image_ty]);
        let view = module.emplace("view", NodeKind::Construct, vec![Ref::new(alloc.node, 0)], vec![imbued]);
        let pipeline = PipelineDescriptor {
            name: "sample".to_string(),
            stages: vec![(vk::ShaderStageFlags::FRAGMENT, "main".to_string())],
        };
        let call = module.emplace("call", NodeKind::Call { pipeline }, vec![Ref::new(view.node, 0)], vec![]);

        let schedule = compile(&module, call.node, &interner).unwrap();
        assert!(schedule.usage[&alloc.node].contains(vk::ImageUsageFlags::SAMPLED));
    }

    #[test]
    fn allocate_with_no_declared_or_inferred_usage_is_an_error() {
        let mut interner = TypeInterner::new();
        let image_ty = interner.image();
        let mut module = Module::new();
        let alloc = module.emplace("alloc", NodeKind::Allocate { usage: vk::ImageUsageFlags::empty() }, vec![], vec![image_ty]);
        assert!(compile(&module, alloc.node, &interner).is_err());
    }
}
