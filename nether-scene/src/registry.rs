//! Name-keyed asset registry.
//!
//! The importer deduplicates every shared resource by its computed name and
//! relies on get-or-insert semantics: inserting under a taken name keeps the
//! resident entry and returns it. Every successful insertion is journaled so
//! a failed import can roll the registry back to its prior state.

use std::sync::Arc;

use hashbrown::HashMap;

use crate::animation::Animation;
use crate::channel::Channel;
use crate::material::{BsdfMaterial, ShaderModule};
use crate::mesh::{Mesh, SubMesh};
use crate::texture::{ImageData, ImageObject, TextureObject};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    ImageData,
    ImageObject,
    Texture,
    ShaderModule,
    Material,
    Mesh,
    SubMesh,
    Animation,
    Channel,
}

/// Journal position returned by [`AssetRegistry::checkpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint(usize);

/// Entry counts per asset kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistryStats {
    pub images: usize,
    pub image_objects: usize,
    pub textures: usize,
    pub shader_modules: usize,
    pub materials: usize,
    pub meshes: usize,
    pub submeshes: usize,
    pub animations: usize,
    pub channels: usize,
}

#[derive(Debug, Default)]
pub struct AssetRegistry {
    image_data: HashMap<String, ImageData>,
    image_objects: HashMap<String, Arc<ImageObject>>,
    textures: HashMap<String, Arc<TextureObject>>,
    shader_modules: HashMap<String, Arc<ShaderModule>>,
    materials: HashMap<String, Arc<BsdfMaterial>>,
    meshes: HashMap<String, Arc<Mesh>>,
    submeshes: HashMap<String, Arc<SubMesh>>,
    animations: HashMap<String, Animation>,
    channels: HashMap<String, Arc<Channel>>,
    journal: Vec<(AssetKind, String)>,
}

/// Insert `value` unless `name` is taken; return the resident entry.
fn get_or_insert<T>(
    map: &mut HashMap<String, Arc<T>>,
    journal: &mut Vec<(AssetKind, String)>,
    kind: AssetKind,
    name: &str,
    value: Arc<T>,
) -> Arc<T> {
    if let Some(existing) = map.get(name) {
        return Arc::clone(existing);
    }
    journal.push((kind, name.to_string()));
    map.insert(name.to_string(), Arc::clone(&value));
    value
}

impl AssetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Images
    // =========================================================================

    pub fn image_data(&self, name: &str) -> Option<&ImageData> {
        self.image_data.get(name)
    }

    /// Returns false when an image with the same name already exists.
    pub fn insert_image_data(&mut self, data: ImageData) -> bool {
        if self.image_data.contains_key(data.name()) {
            return false;
        }
        self.journal
            .push((AssetKind::ImageData, data.name().to_string()));
        self.image_data.insert(data.name().to_string(), data);
        true
    }

    pub fn image_object(&self, name: &str) -> Option<Arc<ImageObject>> {
        self.image_objects.get(name).cloned()
    }

    pub fn insert_image_object(&mut self, image: Arc<ImageObject>) -> Arc<ImageObject> {
        let name = image.name.clone();
        get_or_insert(
            &mut self.image_objects,
            &mut self.journal,
            AssetKind::ImageObject,
            &name,
            image,
        )
    }

    pub fn texture(&self, name: &str) -> Option<Arc<TextureObject>> {
        self.textures.get(name).cloned()
    }

    pub fn insert_texture(&mut self, texture: Arc<TextureObject>) -> Arc<TextureObject> {
        let name = texture.name.clone();
        get_or_insert(
            &mut self.textures,
            &mut self.journal,
            AssetKind::Texture,
            &name,
            texture,
        )
    }

    // =========================================================================
    // Shading
    // =========================================================================

    pub fn shader_module(&self, name: &str) -> Option<Arc<ShaderModule>> {
        self.shader_modules.get(name).cloned()
    }

    pub fn insert_shader_module(&mut self, shader: Arc<ShaderModule>) -> Arc<ShaderModule> {
        let name = shader.name.clone();
        get_or_insert(
            &mut self.shader_modules,
            &mut self.journal,
            AssetKind::ShaderModule,
            &name,
            shader,
        )
    }

    pub fn material(&self, name: &str) -> Option<Arc<BsdfMaterial>> {
        self.materials.get(name).cloned()
    }

    pub fn insert_material(&mut self, material: Arc<BsdfMaterial>) -> Arc<BsdfMaterial> {
        let name = material.name.clone();
        get_or_insert(
            &mut self.materials,
            &mut self.journal,
            AssetKind::Material,
            &name,
            material,
        )
    }

    // =========================================================================
    // Geometry
    // =========================================================================

    pub fn mesh(&self, name: &str) -> Option<Arc<Mesh>> {
        self.meshes.get(name).cloned()
    }

    pub fn insert_mesh(&mut self, mesh: Arc<Mesh>) -> Arc<Mesh> {
        let name = mesh.name.clone();
        get_or_insert(&mut self.meshes, &mut self.journal, AssetKind::Mesh, &name, mesh)
    }

    pub fn submesh(&self, name: &str) -> Option<Arc<SubMesh>> {
        self.submeshes.get(name).cloned()
    }

    pub fn insert_submesh(&mut self, submesh: Arc<SubMesh>) -> Arc<SubMesh> {
        let name = submesh.name.clone();
        get_or_insert(
            &mut self.submeshes,
            &mut self.journal,
            AssetKind::SubMesh,
            &name,
            submesh,
        )
    }

    // =========================================================================
    // Animation
    // =========================================================================

    /// Animation template; nodes own clones of it.
    pub fn animation(&self, name: &str) -> Option<&Animation> {
        self.animations.get(name)
    }

    pub fn insert_animation(&mut self, animation: Animation) -> bool {
        if self.animations.contains_key(&animation.name) {
            return false;
        }
        self.journal
            .push((AssetKind::Animation, animation.name.clone()));
        self.animations.insert(animation.name.clone(), animation);
        true
    }

    pub fn channel(&self, name: &str) -> Option<Arc<Channel>> {
        self.channels.get(name).cloned()
    }

    pub fn insert_channel(&mut self, channel: Arc<Channel>) -> Arc<Channel> {
        let name = channel.name.clone();
        get_or_insert(
            &mut self.channels,
            &mut self.journal,
            AssetKind::Channel,
            &name,
            channel,
        )
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.journal.len())
    }

    /// Remove every entry inserted after `checkpoint`, newest first.
    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        while self.journal.len() > checkpoint.0 {
            let Some((kind, name)) = self.journal.pop() else {
                break;
            };
            match kind {
                AssetKind::ImageData => drop(self.image_data.remove(&name)),
                AssetKind::ImageObject => drop(self.image_objects.remove(&name)),
                AssetKind::Texture => drop(self.textures.remove(&name)),
                AssetKind::ShaderModule => drop(self.shader_modules.remove(&name)),
                AssetKind::Material => drop(self.materials.remove(&name)),
                AssetKind::Mesh => drop(self.meshes.remove(&name)),
                AssetKind::SubMesh => drop(self.submeshes.remove(&name)),
                AssetKind::Animation => drop(self.animations.remove(&name)),
                AssetKind::Channel => drop(self.channels.remove(&name)),
            }
        }
    }

    /// Release host pixel copies of every image.
    pub fn free_host_memory(&mut self) {
        for data in self.image_data.values_mut() {
            data.free_host_memory();
        }
    }

    /// Release host pixel copies of the images registered since
    /// `checkpoint`. Images from earlier imports keep theirs.
    pub fn free_host_memory_since(&mut self, checkpoint: Checkpoint) {
        let start = checkpoint.0.min(self.journal.len());
        for (kind, name) in &self.journal[start..] {
            if *kind != AssetKind::ImageData {
                continue;
            }
            if let Some(data) = self.image_data.get_mut(name) {
                data.free_host_memory();
            }
        }
    }

    /// Replace a released image with a freshly decoded copy. Returns false
    /// when no released image of that name exists.
    pub fn restore_image_data(&mut self, data: ImageData) -> bool {
        match self.image_data.get_mut(data.name()) {
            Some(existing) if existing.pixels().is_none() => {
                *existing = data;
                true
            }
            _ => false,
        }
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            images: self.image_data.len(),
            image_objects: self.image_objects.len(),
            textures: self.textures.len(),
            shader_modules: self.shader_modules.len(),
            materials: self.materials.len(),
            meshes: self.meshes.len(),
            submeshes: self.submeshes.len(),
            animations: self.animations.len(),
            channels: self.channels.len(),
        }
    }

    pub fn meshes(&self) -> impl Iterator<Item = &Arc<Mesh>> {
        self.meshes.values()
    }

    pub fn materials(&self) -> impl Iterator<Item = &Arc<BsdfMaterial>> {
        self.materials.values()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelTarget, Interpolator};
    use glam::Vec4;

    fn channel(name: &str) -> Arc<Channel> {
        Arc::new(
            Channel::from_samples(name, ChannelTarget::Translate, 0, Interpolator::Linear, &[0.0], &[1.0])
                .unwrap(),
        )
    }

    #[test]
    fn test_get_or_insert_keeps_first() {
        let mut registry = AssetRegistry::new();
        let first = registry.insert_channel(channel("c"));
        let second = registry.insert_channel(channel("c"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.stats().channels, 1);
        assert!(registry.channel("missing").is_none());
    }

    #[test]
    fn test_rollback_removes_later_entries() {
        let mut registry = AssetRegistry::new();
        registry.insert_channel(channel("kept"));
        registry.insert_image_data(ImageData::solid("kept_image", Vec4::ONE));

        let checkpoint = registry.checkpoint();
        registry.insert_channel(channel("dropped"));
        registry.insert_image_data(ImageData::solid("dropped_image", Vec4::ONE));
        registry.insert_animation(Animation::new("dropped_anim"));
        // Re-inserting an existing name is not journaled
        registry.insert_channel(channel("kept"));

        registry.rollback(checkpoint);
        assert!(registry.channel("kept").is_some());
        assert!(registry.image_data("kept_image").is_some());
        assert!(registry.channel("dropped").is_none());
        assert!(registry.image_data("dropped_image").is_none());
        assert!(registry.animation("dropped_anim").is_none());
        assert_eq!(registry.checkpoint(), checkpoint);
    }

    #[test]
    fn test_free_host_memory() {
        let mut registry = AssetRegistry::new();
        registry.insert_image_data(ImageData::solid("img", Vec4::ONE));
        registry.free_host_memory();
        let image = registry.image_data("img").unwrap();
        assert!(image.pixels().is_none());
        assert_eq!(image.width(), 1);
    }

    #[test]
    fn test_free_host_memory_since_checkpoint() {
        let mut registry = AssetRegistry::new();
        registry.insert_image_data(ImageData::solid("earlier", Vec4::ONE));
        let checkpoint = registry.checkpoint();
        registry.insert_image_data(ImageData::solid("current", Vec4::ONE));

        registry.free_host_memory_since(checkpoint);
        assert!(registry.image_data("earlier").unwrap().pixels().is_some());
        assert!(registry.image_data("current").unwrap().pixels().is_none());

        // Only released images can be restored
        assert!(!registry.restore_image_data(ImageData::solid("earlier", Vec4::ZERO)));
        assert!(registry.restore_image_data(ImageData::solid("current", Vec4::ZERO)));
        assert_eq!(
            registry.image_data("current").and_then(|d| d.pixels()),
            Some(&[0, 0, 0, 0][..])
        );
    }

    #[test]
    fn test_duplicate_image_data_rejected() {
        let mut registry = AssetRegistry::new();
        assert!(registry.insert_image_data(ImageData::solid("img", Vec4::ONE)));
        assert!(!registry.insert_image_data(ImageData::solid("img", Vec4::ZERO)));
        assert_eq!(
            registry.image_data("img").and_then(|d| d.pixels()),
            Some(&[255, 255, 255, 255][..])
        );
    }
}
