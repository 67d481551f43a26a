//! The typed intermediate representation: a [`Module`] of [`Node`]s addressed by [`slotmap`]
//! keys, in the same spirit as `context`'s pass arena, but persistent across frames instead of
//! being rebuilt and torn down every frame.
use crate::types::Type;
use slotmap::{new_key_type, SlotMap};
use std::collections::HashMap;

pub mod node;
pub use node::{NodeKind, PipelineDescriptor, SliceAxis};

new_key_type! {
    /// A node in a [`Module`]'s arena.
    pub struct NodeId;
}

/// A reference to the `output`-th result value produced by `node`.
///
/// Nodes may produce more than one output (e.g. `slice` splits a resource into sub-ranges);
/// `Ref` disambiguates which one a consumer depends on.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct Ref {
    pub node: NodeId,
    pub output: u16,
}

impl Ref {
    pub fn new(node: NodeId, output: u16) -> Ref {
        Ref { node, output }
    }

    pub fn single(node: NodeId) -> Ref {
        Ref { node, output: 0 }
    }
}

/// A single operation in the render graph.
#[derive(Debug)]
pub struct Node {
    pub kind: NodeKind,
    /// Values this node consumes.
    pub inputs: Vec<Ref>,
    /// Types of the values this node produces, one per output index.
    pub output_types: Vec<Type>,
    pub name: String,
}

impl Node {
    pub fn output_count(&self) -> u16 {
        self.output_types.len() as u16
    }
}

/// A persistent collection of nodes plus the bookkeeping needed to splice modules together.
///
/// Analogous to `Context`'s per-frame `Frame`/`Pass` arena, except a `Module` is meant to be
/// built once (or incrementally) and compiled repeatedly, rather than discarded every frame.
#[derive(Default)]
pub struct Module {
    nodes: SlotMap<NodeId, Node>,
    /// Nodes that have no consumer within this module and are therefore always live;
    /// `Module::collect` treats these as GC roots.
    roots: Vec<NodeId>,
}

impl Module {
    pub fn new() -> Module {
        Module::default()
    }

    /// Inserts a new node and returns a `Ref` to its first output.
    pub fn emplace(&mut self, name: impl Into<String>, kind: NodeKind, inputs: Vec<Ref>, output_types: Vec<Type>) -> Ref {
        let id = self.nodes.insert(Node {
            kind,
            inputs,
            output_types,
            name: name.into(),
        });
        Ref::single(id)
    }

    /// Inserts a `slice` node and returns `(slice, remainder_before, remainder_after)`: the
    /// sub-range itself plus the two disjoint remainders on either side, so a caller that
    /// immediately recombines them via `converge` never has to reconstruct the whole-resource
    /// view by hand.
    pub fn slice(&mut self, name: impl Into<String>, src: Ref, ty: Type, axis: SliceAxis, start: u32, count: u32) -> (Ref, Ref, Ref) {
        let id = self.nodes.insert(Node {
            kind: NodeKind::Slice { axis, start, count },
            inputs: vec![src],
            output_types: vec![ty, ty, ty],
            name: name.into(),
        });
        (Ref::new(id, 0), Ref::new(id, 1), Ref::new(id, 2))
    }

    /// Marks `node` as a root: it is kept alive by [`Module::collect`] even with no local
    /// consumers (typically because an external system, such as a swapchain present, consumes
    /// it outside of the module).
    pub fn add_root(&mut self, node: NodeId) {
        self.roots.push(node);
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter()
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Removes a node outright. Dangling `Ref`s into a destroyed node are a render-graph
    /// error surfaced at compile time, not at destroy time: destruction never rewrites other
    /// nodes' inputs.
    pub fn destroy_node(&mut self, id: NodeId) {
        self.nodes.remove(id);
        self.roots.retain(|&r| r != id);
    }

    /// Splices `producer`'s whole subgraph (everything reachable backwards from `producer`)
    /// into `self`, and returns the `Ref` in `self`'s arena equivalent to `producer` in the
    /// source module.
    ///
    /// The subgraph is copied, not shared: `self` and `other` remain independently mutable and
    /// destroying nodes in one module never invalidates `Ref`s handed out from the other. This
    /// is the simplest semantics that keeps `NodeId` a single-module key; sharing would require
    /// either a global arena or reference counting across modules, neither of which pulls its
    /// weight for the module-linking use case (building a library of reusable subgraphs once
    /// and instantiating them into many per-frame graphs).
    pub fn link(&mut self, other: &Module, producer: NodeId) -> Ref {
        let mut remap: HashMap<NodeId, NodeId> = HashMap::new();
        self.link_recursive(other, producer, &mut remap);
        Ref::single(remap[&producer])
    }

    fn link_recursive(&mut self, other: &Module, id: NodeId, remap: &mut HashMap<NodeId, NodeId>) {
        if remap.contains_key(&id) {
            return;
        }
        let node = other.node(id).expect("dangling NodeId passed to Module::link");
        let mut new_inputs = Vec::with_capacity(node.inputs.len());
        for input in &node.inputs {
            self.link_recursive(other, input.node, remap);
            new_inputs.push(Ref::new(remap[&input.node], input.output));
        }
        let new_id = self.nodes.insert(Node {
            kind: node.kind.clone(),
            inputs: new_inputs,
            output_types: node.output_types.clone(),
            name: node.name.clone(),
        });
        remap.insert(id, new_id);
    }

    /// Drops every node that is not reachable backwards from a root, using an iterative
    /// worklist rather than recursion so the traversal depth is not bound by the call stack
    /// (render graphs can have thousands of chained nodes in a single frame).
    pub fn collect(&mut self) {
        let mut live = std::collections::HashSet::new();
        let mut worklist: Vec<NodeId> = self.roots.clone();
        while let Some(id) = worklist.pop() {
            if !live.insert(id) {
                continue;
            }
            if let Some(node) = self.nodes.get(id) {
                for input in &node.inputs {
                    worklist.push(input.node);
                }
            }
        }
        let dead: Vec<NodeId> = self.nodes.keys().filter(|id| !live.contains(id)).collect();
        for id in dead {
            self.nodes.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeInterner;

    #[test]
    fn collect_drops_unreferenced_nodes_but_keeps_roots() {
        let mut interner = TypeInterner::new();
        let image_ty = interner.image();
        let mut module = Module::new();
        let orphan = module.emplace("orphan", NodeKind::Constant, vec![], vec![image_ty]).node;
        let kept = module.emplace("kept", NodeKind::Constant, vec![], vec![image_ty]).node;
        module.add_root(kept);
        let _ = orphan;
        module.collect();
        assert!(module.node(kept).is_some());
        assert!(module.node(orphan).is_none());
    }

    #[test]
    fn link_copies_the_producer_subgraph_independently() {
        let mut interner = TypeInterner::new();
        let image_ty = interner.image();
        let mut lib = Module::new();
        let base = lib.emplace("base", NodeKind::Constant, vec![], vec![image_ty]).node;
        let derived = lib.emplace("derived", NodeKind::Constant, vec![Ref::single(base)], vec![image_ty]);

        let mut frame = Module::new();
        let linked = frame.link(&lib, derived.node);
        assert!(frame.node(linked.node).is_some());

        // mutating the library afterwards must not affect the already-linked copy
        lib.destroy_node(base);
        assert!(frame.node(linked.node).is_some());
    }
}
