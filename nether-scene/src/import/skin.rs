//! Skin resolution: joint roles, inverse bind matrices and armatures.

use glam::Mat4;
use hashbrown::{HashMap, HashSet};

use crate::accessor::{AccessorView, BufferSet};
use crate::device::MAX_JOINTS;
use crate::error::ImportError;
use crate::node::NodeRole;

/// Roles of every skinned glTF node plus the armature of each skin.
#[derive(Debug, Default)]
pub(crate) struct SkinTable {
    roles: HashMap<usize, NodeRole>,
    /// Indexed by skin.
    armatures: Vec<usize>,
}

impl SkinTable {
    pub(crate) fn build(document: &gltf::Document, buffers: &BufferSet) -> Result<Self, ImportError> {
        let mut parents: HashMap<usize, usize> = HashMap::new();
        for node in document.nodes() {
            for child in node.children() {
                parents.insert(child.index(), node.index());
            }
        }

        let mut table = Self::default();
        for skin in document.skins() {
            let skin_name = skin
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("skin_{}", skin.index()));
            let skin_error = |reason: String| ImportError::Skin {
                skin: skin_name.clone(),
                reason,
            };

            let joints: Vec<usize> = skin.joints().map(|j| j.index()).collect();
            if joints.is_empty() {
                return Err(skin_error("skin has no joints".to_string()));
            }
            if joints.len() > MAX_JOINTS {
                tracing::warn!(
                    "{}: {} joints, only the first {} will animate",
                    skin_name,
                    joints.len(),
                    MAX_JOINTS
                );
            }

            let inverse_bind_matrices = match skin.inverse_bind_matrices() {
                Some(accessor) => {
                    let view = AccessorView::new(&accessor, buffers)
                        .ok_or_else(|| ImportError::accessor(format!("{skin_name} inverse bind matrices")))?;
                    if view.count() < joints.len() {
                        return Err(skin_error(format!(
                            "{} inverse bind matrices for {} joints",
                            view.count(),
                            joints.len()
                        )));
                    }
                    (0..joints.len())
                        .map(|i| view.floats::<16>(i).map(|m| Mat4::from_cols_array(&m)))
                        .collect::<Option<Vec<_>>>()
                        .ok_or_else(|| ImportError::accessor(format!("{skin_name} inverse bind matrices")))?
                }
                None => vec![Mat4::IDENTITY; joints.len()],
            };

            let joint_set: HashSet<usize> = joints.iter().copied().collect();
            let armature = match skin.skeleton() {
                Some(skeleton) if !joint_set.contains(&skeleton.index()) => skeleton.index(),
                _ => joints
                    .iter()
                    .find(|j| parents.get(*j).is_none_or(|p| !joint_set.contains(p)))
                    .and_then(|topmost| parents.get(topmost))
                    .copied()
                    .ok_or_else(|| skin_error("no node above the joint hierarchy to act as armature".to_string()))?,
            };

            table.assign(
                armature,
                NodeRole::Armature {
                    joint_count: joints.len(),
                },
                &skin_name,
            );
            for (joint_index, (&node, &inverse_bind_matrix)) in
                joints.iter().zip(&inverse_bind_matrices).enumerate()
            {
                table.assign(
                    node,
                    NodeRole::Joint {
                        joint_index,
                        inverse_bind_matrix,
                    },
                    &skin_name,
                );
            }
            table.armatures.push(armature);
        }
        Ok(table)
    }

    /// Record `role` for `node` unless it already has one. Two skins sharing
    /// an armature widen its joint count.
    fn assign(&mut self, node: usize, role: NodeRole, skin_name: &str) {
        let Some(existing) = self.roles.get_mut(&node) else {
            self.roles.insert(node, role);
            return;
        };
        match (existing, role) {
            (
                NodeRole::Armature { joint_count },
                NodeRole::Armature {
                    joint_count: other,
                },
            ) => *joint_count = (*joint_count).max(other),
            (existing, _) => tracing::warn!(
                "{}: node {} already acts as {:?}, keeping its first role",
                skin_name,
                node,
                existing
            ),
        }
    }

    pub(crate) fn role(&self, node: usize) -> NodeRole {
        self.roles.get(&node).cloned().unwrap_or(NodeRole::Plain)
    }

    pub(crate) fn armature(&self, skin: usize) -> Option<usize> {
        self.armatures.get(skin).copied()
    }
}
