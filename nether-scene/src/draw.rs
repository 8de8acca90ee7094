//! Draw-command recording.

use std::sync::Arc;

use crate::device::DeviceBuffer;
use crate::graph::SceneGraph;
use crate::mesh::SubMesh;
use crate::node::{Node, NodeId};

/// A uniform buffer plus the dynamic offset of the slot being drawn.
#[derive(Debug, Clone)]
pub struct UniformBinding {
    pub buffer: Arc<dyn DeviceBuffer>,
    pub offset: u64,
}

/// One recorded draw call.
#[derive(Debug, Clone)]
pub struct DrawCommand {
    pub node: NodeId,
    pub submesh: Arc<SubMesh>,
    pub transform: Option<UniformBinding>,
    /// Joints block of the skinning armature; only set for skinned submeshes.
    pub joints: Option<UniformBinding>,
}

/// Sink for draw commands.
pub trait CommandRecorder {
    fn record(&mut self, command: DrawCommand);
}

impl CommandRecorder for Vec<DrawCommand> {
    fn record(&mut self, command: DrawCommand) {
        self.push(command);
    }
}

/// Hook run before a node is drawn. Returning false skips the node and its
/// subtree.
pub trait DrawInterceptor {
    fn visit(&self, id: NodeId, node: &Node, slot: usize) -> bool;
}

impl<F> DrawInterceptor for F
where
    F: Fn(NodeId, &Node, usize) -> bool,
{
    fn visit(&self, id: NodeId, node: &Node, slot: usize) -> bool {
        self(id, node, slot)
    }
}

impl SceneGraph {
    /// Record a draw command for every submesh below `root` on any of
    /// `layers`. Returns the number of commands recorded.
    pub fn draw(
        &self,
        root: NodeId,
        slot: usize,
        layers: u32,
        recorder: &mut dyn CommandRecorder,
        interceptors: &[&dyn DrawInterceptor],
    ) -> usize {
        let mut recorded = 0;
        let start = self
            .get(root)
            .and_then(|n| n.parent)
            .and_then(|p| self.armature_of(p));
        let mut stack = vec![(root, start)];

        while let Some((id, armature)) = stack.pop() {
            let Some(node) = self.get(id) else {
                continue;
            };
            if interceptors.iter().any(|i| !i.visit(id, node, slot)) {
                continue;
            }
            let armature = if node.role().is_armature() {
                Some(id)
            } else {
                armature
            };

            if node.is_on_any_layer(layers) {
                let transform = node.transform_buffer().map(|b| UniformBinding {
                    buffer: Arc::clone(b.buffer()),
                    offset: b.dynamic_offset(slot),
                });
                let joints = node
                    .skin_armature()
                    .or(armature)
                    .and_then(|a| self.get(a))
                    .and_then(|a| a.joints_buffer())
                    .map(|b| UniformBinding {
                        buffer: Arc::clone(b.buffer()),
                        offset: b.dynamic_offset(slot),
                    });

                for submesh in node.meshes().iter().flat_map(|m| m.submeshes()) {
                    recorder.record(DrawCommand {
                        node: id,
                        submesh: Arc::clone(submesh),
                        transform: transform.clone(),
                        joints: joints.clone().filter(|_| submesh.is_skinned()),
                    });
                    recorded += 1;
                }
            }

            stack.extend(node.children().iter().rev().map(|&c| (c, armature)));
        }
        recorded
    }
}
