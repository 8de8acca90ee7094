//! BSDF materials, fragment shader variants and material bindings.

use std::path::Path;
use std::sync::Arc;

use crate::device::{DeviceResource, RenderDevice};
use crate::error::ImportError;
use crate::registry::AssetRegistry;
use crate::texture::TextureObject;
use crate::vertex::VertexBufferType;

/// Name of the material used by primitives without one.
pub const DEFAULT_MATERIAL: &str = "DEFAULT_MATERIAL";

/// Directory, relative to a search root, holding compiled shaders.
pub const SHADER_DIRECTORY: &str = "shader/SPIR/V";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialWorkflow {
    MetallicRoughness,
    SpecularGlossiness,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlphaMode {
    Opaque,
    Mask { cutoff: f32 },
    Blend,
}

/// The five texture channels of a material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureSlot {
    /// Base color (metallic-roughness) or diffuse (specular-glossiness).
    BaseColor = 0,
    /// Metallic-roughness or specular-glossiness.
    Surface = 1,
    Normal = 2,
    Occlusion = 3,
    Emissive = 4,
}

impl TextureSlot {
    pub const ALL: [TextureSlot; 5] = [
        TextureSlot::BaseColor,
        TextureSlot::Surface,
        TextureSlot::Normal,
        TextureSlot::Occlusion,
        TextureSlot::Emissive,
    ];
}

/// A loaded fragment shader.
#[derive(Debug)]
pub struct ShaderModule {
    pub name: String,
    pub module: Arc<dyn DeviceResource>,
}

#[derive(Debug)]
pub struct BsdfMaterial {
    pub name: String,
    pub workflow: MaterialWorkflow,
    pub alpha_mode: AlphaMode,
    pub double_sided: bool,
    pub occlusion_strength: f32,
    /// Indexed by [`TextureSlot`].
    pub textures: [Arc<TextureObject>; 5],
    /// Texcoord set sampled by each texture slot.
    pub tex_coords: [u32; 5],
    /// Vertex attributes the fragment shader expects.
    pub attributes: VertexBufferType,
    pub fragment_shader: Arc<ShaderModule>,
}

impl BsdfMaterial {
    pub fn texture(&self, slot: TextureSlot) -> &Arc<TextureObject> {
        &self.textures[slot as usize]
    }

    pub fn is_transparent(&self) -> bool {
        matches!(self.alpha_mode, AlphaMode::Blend)
    }

    pub fn alpha_cutoff(&self) -> Option<f32> {
        match self.alpha_mode {
            AlphaMode::Mask { cutoff } => Some(cutoff),
            _ => None,
        }
    }
}

/// Fragment shader file for a workflow and vertex attribute set.
///
/// Six variants exist: {metallic-roughness, specular-glossiness} x
/// {no texcoord, one texcoord, two texcoords}.
pub fn fragment_shader_name(workflow: MaterialWorkflow, attributes: VertexBufferType) -> String {
    let prefix = match workflow {
        MaterialWorkflow::MetallicRoughness => "glTF_mr_forward",
        MaterialWorkflow::SpecularGlossiness => "glTF_sg_forward",
    };
    let suffix = if !attributes.contains(VertexBufferType::TEXCOORD0) {
        "_no_texcoord"
    } else if attributes.contains(VertexBufferType::TEXCOORD1) {
        "_two_texcoord"
    } else {
        ""
    };
    format!("{prefix}{suffix}.frag.spv")
}

/// Load a shader module by file name, trying each search root in order.
/// Modules are cached by file name.
pub fn load_shader_module(
    registry: &mut AssetRegistry,
    device: &dyn RenderDevice,
    name: &str,
    search_roots: &[&Path],
) -> Result<Arc<ShaderModule>, ImportError> {
    if let Some(shader) = registry.shader_module(name) {
        return Ok(shader);
    }

    for root in search_roots {
        let path = root.join(SHADER_DIRECTORY).join(name);
        let Ok(code) = std::fs::read(&path) else {
            continue;
        };
        let module = device.create_shader_module(name, &code)?;
        tracing::debug!("Loaded shader {:?}", path);
        return Ok(registry.insert_shader_module(Arc::new(ShaderModule {
            name: name.to_string(),
            module,
        })));
    }

    Err(ImportError::ShaderNotFound(name.to_string()))
}

// =============================================================================
// Bindings
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// Per-node transform block, bound with a per-slot dynamic offset.
    TransformUniform,
    /// Armature joints block, bound with a per-slot dynamic offset.
    JointsUniform,
    Texture { slot: TextureSlot, texture: String },
}

/// Resources a submesh binds when drawn, in binding order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MaterialBinding {
    pub bindings: Vec<Binding>,
}

impl MaterialBinding {
    pub fn for_material(material: &BsdfMaterial, skinned: bool) -> Self {
        let mut bindings = vec![Binding::TransformUniform];
        if skinned {
            bindings.push(Binding::JointsUniform);
        }
        bindings.extend(TextureSlot::ALL.iter().map(|&slot| Binding::Texture {
            slot,
            texture: material.texture(slot).name.clone(),
        }));
        Self { bindings }
    }

    pub fn texture_count(&self) -> usize {
        self.bindings
            .iter()
            .filter(|b| matches!(b, Binding::Texture { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HostDevice;

    #[test]
    fn test_fragment_shader_variants() {
        let base = VertexBufferType::VERTEX | VertexBufferType::NORMAL;
        let one = base | VertexBufferType::TEXCOORD0;
        let two = one | VertexBufferType::TEXCOORD1;

        let mr = MaterialWorkflow::MetallicRoughness;
        let sg = MaterialWorkflow::SpecularGlossiness;
        assert_eq!(fragment_shader_name(mr, base), "glTF_mr_forward_no_texcoord.frag.spv");
        assert_eq!(fragment_shader_name(mr, one), "glTF_mr_forward.frag.spv");
        assert_eq!(fragment_shader_name(mr, two), "glTF_mr_forward_two_texcoord.frag.spv");
        assert_eq!(fragment_shader_name(sg, base), "glTF_sg_forward_no_texcoord.frag.spv");
        assert_eq!(fragment_shader_name(sg, one), "glTF_sg_forward.frag.spv");
        assert_eq!(fragment_shader_name(sg, two), "glTF_sg_forward_two_texcoord.frag.spv");
    }

    #[test]
    fn test_shader_search_order_and_cache() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let dir = second.path().join(SHADER_DIRECTORY);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a.frag.spv"), [3, 2, 0x23, 7]).unwrap();

        let mut registry = AssetRegistry::new();
        let device = HostDevice::new();
        let roots = [first.path(), second.path()];

        let shader = load_shader_module(&mut registry, &device, "a.frag.spv", &roots).unwrap();
        assert_eq!(shader.module.size(), 4);

        // Cached even after the file disappears
        std::fs::remove_file(dir.join("a.frag.spv")).unwrap();
        let again = load_shader_module(&mut registry, &device, "a.frag.spv", &roots).unwrap();
        assert!(Arc::ptr_eq(&shader, &again));

        assert!(matches!(
            load_shader_module(&mut registry, &device, "missing.frag.spv", &roots),
            Err(ImportError::ShaderNotFound(_))
        ));
    }
}
