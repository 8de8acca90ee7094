//! Loaded scenes and their top-level objects.

use glam::{Mat4, Quat, Vec3};
use smallvec::SmallVec;

use crate::device::{DeviceError, RenderFactory};
use crate::draw::{CommandRecorder, DrawInterceptor};
use crate::graph::SceneGraph;
use crate::node::{Camera, Light, NodeId};
use crate::update::UpdateInterceptor;

/// A root node of the scene with its own placement.
#[derive(Debug, Clone)]
pub struct Object {
    pub name: String,
    root: NodeId,
    translate: Vec3,
    rotate: Quat,
    scale: Vec3,
    dirty: SmallVec<[bool; 4]>,
}

impl Object {
    pub fn new(name: impl Into<String>, root: NodeId, buffer_count: u32) -> Self {
        Self {
            name: name.into(),
            root,
            translate: Vec3::ZERO,
            rotate: Quat::IDENTITY,
            scale: Vec3::ONE,
            dirty: SmallVec::from_elem(true, buffer_count.max(1) as usize),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn translate(&self) -> Vec3 {
        self.translate
    }

    pub fn rotate(&self) -> Quat {
        self.rotate
    }

    pub fn scale(&self) -> Vec3 {
        self.scale
    }

    pub fn set_translate(&mut self, translate: Vec3) {
        self.translate = translate;
        self.set_dirty();
    }

    pub fn set_rotate(&mut self, rotate: Quat) {
        self.rotate = rotate.normalize();
        self.set_dirty();
    }

    pub fn set_scale(&mut self, scale: Vec3) {
        self.scale = scale;
        self.set_dirty();
    }

    pub fn set_dirty(&mut self) {
        self.dirty.iter_mut().for_each(|d| *d = true);
    }

    pub fn is_dirty(&self, slot: usize) -> bool {
        self.dirty.get(slot).copied().unwrap_or(true)
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotate, self.translate)
    }

    /// Consume the dirty flag for `slot`.
    fn take_dirty(&mut self, slot: usize) -> bool {
        if slot >= self.dirty.len() {
            self.dirty.resize(slot + 1, true);
        }
        std::mem::replace(&mut self.dirty[slot], false)
    }
}

#[derive(Debug)]
pub struct Scene {
    pub name: String,
    pub graph: SceneGraph,
    objects: Vec<Object>,
    buffer_count: u32,
}

impl Scene {
    pub fn new(name: impl Into<String>, buffer_count: u32) -> Self {
        Self {
            name: name.into(),
            graph: SceneGraph::new(),
            objects: Vec::new(),
            buffer_count: buffer_count.max(1),
        }
    }

    pub fn buffer_count(&self) -> u32 {
        self.buffer_count
    }

    pub fn objects(&self) -> &[Object] {
        &self.objects
    }

    pub fn objects_mut(&mut self) -> &mut [Object] {
        &mut self.objects
    }

    /// Wrap the subtree at `root` in a new object.
    pub fn add_object(&mut self, name: impl Into<String>, root: NodeId) -> &mut Object {
        let index = self.objects.len();
        self.objects.push(Object::new(name, root, self.buffer_count));
        &mut self.objects[index]
    }

    pub fn find_object(&self, name: &str) -> Option<&Object> {
        self.objects.iter().find(|o| o.name == name)
    }

    pub fn find_object_mut(&mut self, name: &str) -> Option<&mut Object> {
        self.objects.iter_mut().find(|o| o.name == name)
    }

    /// Deep-copy object `name` as `new_name`. Returns `Ok(None)` when no such
    /// object exists.
    pub fn instantiate_object(
        &mut self,
        name: &str,
        new_name: &str,
        factory: &dyn RenderFactory,
    ) -> Result<Option<&mut Object>, DeviceError> {
        let Some(source) = self.find_object(name).cloned() else {
            return Ok(None);
        };
        let root = self.graph.clone_subtree(source.root, factory)?;
        tracing::debug!("Instantiated {} as {}", name, new_name);

        let mut object = Object::new(new_name, root, self.buffer_count);
        object.translate = source.translate;
        object.rotate = source.rotate;
        object.scale = source.scale;
        let index = self.objects.len();
        self.objects.push(object);
        Ok(Some(&mut self.objects[index]))
    }

    /// Remove object `name` and its nodes.
    pub fn remove_object(&mut self, name: &str) -> bool {
        let Some(index) = self.objects.iter().position(|o| o.name == name) else {
            return false;
        };
        let object = self.objects.remove(index);
        self.graph.remove_subtree(object.root);
        true
    }

    /// Advance animations and propagate transforms for frame-buffer `slot`.
    pub fn update(&mut self, delta_time: f32, slot: usize, interceptors: &[&dyn UpdateInterceptor]) {
        for object in &mut self.objects {
            let dirty = object.take_dirty(slot);
            self.graph.update_transforms(
                object.root,
                delta_time,
                slot,
                object.matrix(),
                dirty,
                interceptors,
            );
        }
    }

    /// Record draw commands for every object. Returns the number recorded.
    pub fn draw(
        &self,
        slot: usize,
        layers: u32,
        recorder: &mut dyn CommandRecorder,
        interceptors: &[&dyn DrawInterceptor],
    ) -> usize {
        self.objects
            .iter()
            .map(|o| self.graph.draw(o.root, slot, layers, recorder, interceptors))
            .sum()
    }

    /// Every camera in the scene with the node carrying it.
    pub fn cameras(&self) -> Vec<(NodeId, &Camera)> {
        self.objects
            .iter()
            .flat_map(|o| self.graph.descendants(o.root))
            .filter_map(|id| self.graph.get(id).map(|n| (id, n)))
            .flat_map(|(id, n)| n.cameras().iter().map(move |c| (id, c)))
            .collect()
    }

    /// Every light in the scene with the node carrying it.
    pub fn lights(&self) -> Vec<(NodeId, &Light)> {
        self.objects
            .iter()
            .flat_map(|o| self.graph.descendants(o.root))
            .filter_map(|id| self.graph.get(id).map(|n| (id, n)))
            .flat_map(|(id, n)| n.lights().iter().map(move |l| (id, l)))
            .collect()
    }
}

impl Drop for Scene {
    fn drop(&mut self) {
        tracing::debug!(
            "Releasing scene {} ({} objects, {} nodes)",
            self.name,
            self.objects.len(),
            self.graph.len()
        );
    }
}
