//! Material resolution.
//!
//! Maps a glTF material onto a [`BsdfMaterial`]: five texture slots resolved
//! through the texture cache, alpha state and the fragment shader variant
//! matching the first submesh that uses the material.

use std::path::Path;
use std::sync::Arc;

use gltf::image::Source;

use crate::accessor::read_external;
use crate::error::ImportError;
use crate::material::{
    AlphaMode, BsdfMaterial, DEFAULT_MATERIAL, MaterialWorkflow, fragment_shader_name,
    load_shader_module,
};
use crate::texture::{
    ImageData, ImageDataKind, SourceTexture, TextureObject, resolve_texture_object,
};
use crate::vertex::VertexBufferType;

use super::Importer;

/// Texture reference, factor and defaults of one material channel.
struct ChannelInput<'a> {
    info: Option<(gltf::Texture<'a>, u32)>,
    factor: Vec<f32>,
    default_white: bool,
    kind: ImageDataKind,
}

impl ChannelInput<'_> {
    fn tex_coord(&self) -> u32 {
        self.info.as_ref().map_or(0, |(_, set)| *set)
    }
}

fn texture_info(info: Option<gltf::texture::Info<'_>>) -> Option<(gltf::Texture<'_>, u32)> {
    info.map(|i| (i.texture(), i.tex_coord()))
}

impl Importer<'_> {
    /// Resolve `material`, reusing a registered material of the same name.
    pub(crate) fn resolve_material(
        &mut self,
        material: &gltf::Material<'_>,
        attributes: VertexBufferType,
    ) -> Result<Arc<BsdfMaterial>, ImportError> {
        let name = match material.index() {
            Some(index) => material
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("material_{}", index)),
            None => DEFAULT_MATERIAL.to_string(),
        };
        if let Some(existing) = self.registry.material(&name) {
            tracing::debug!("Material cache hit: {}", name);
            return Ok(existing);
        }

        let pbr = material.pbr_metallic_roughness();
        let (workflow, base, surface) = match material.pbr_specular_glossiness() {
            Some(sg) => {
                let [r, g, b] = sg.specular_factor();
                (
                    MaterialWorkflow::SpecularGlossiness,
                    ChannelInput {
                        info: texture_info(sg.diffuse_texture()),
                        factor: sg.diffuse_factor().to_vec(),
                        default_white: true,
                        kind: ImageDataKind::Color,
                    },
                    ChannelInput {
                        info: texture_info(sg.specular_glossiness_texture()),
                        factor: vec![r, g, b, sg.glossiness_factor()],
                        default_white: true,
                        kind: ImageDataKind::NonColor,
                    },
                )
            }
            None => (
                MaterialWorkflow::MetallicRoughness,
                ChannelInput {
                    info: texture_info(pbr.base_color_texture()),
                    factor: pbr.base_color_factor().to_vec(),
                    default_white: true,
                    kind: ImageDataKind::Color,
                },
                ChannelInput {
                    info: texture_info(pbr.metallic_roughness_texture()),
                    factor: vec![1.0, pbr.roughness_factor(), pbr.metallic_factor(), 1.0],
                    default_white: true,
                    kind: ImageDataKind::NonColor,
                },
            ),
        };

        let normal_texture = material.normal_texture();
        let normal = ChannelInput {
            factor: vec![normal_texture.as_ref().map_or(1.0, |n| n.scale())],
            info: normal_texture.map(|n| (n.texture(), n.tex_coord())),
            default_white: true,
            kind: ImageDataKind::Normal,
        };

        let occlusion_texture = material.occlusion_texture();
        let occlusion_strength = occlusion_texture.as_ref().map_or(1.0, |o| o.strength());
        let occlusion = ChannelInput {
            info: occlusion_texture.map(|o| (o.texture(), o.tex_coord())),
            factor: vec![1.0],
            default_white: true,
            kind: ImageDataKind::NonColor,
        };

        let [er, eg, eb] = material.emissive_factor();
        let emissive = ChannelInput {
            info: texture_info(material.emissive_texture()),
            factor: vec![er, eg, eb, 1.0],
            default_white: true,
            kind: ImageDataKind::Color,
        };

        let channels = [base, surface, normal, occlusion, emissive];
        let tex_coords = channels.each_ref().map(ChannelInput::tex_coord);
        let [base, surface, normal, occlusion, emissive] = channels;
        let textures = [
            self.resolve_channel(base)?,
            self.resolve_channel(surface)?,
            self.resolve_channel(normal)?,
            self.resolve_channel(occlusion)?,
            self.resolve_channel(emissive)?,
        ];

        let alpha_mode = match material.alpha_mode() {
            gltf::material::AlphaMode::Opaque => AlphaMode::Opaque,
            gltf::material::AlphaMode::Mask => AlphaMode::Mask {
                cutoff: material.alpha_cutoff().unwrap_or(0.5),
            },
            gltf::material::AlphaMode::Blend => AlphaMode::Blend,
        };

        let shader_name = fragment_shader_name(workflow, attributes);
        let device = self.factory.device();
        let mut roots: Vec<&Path> = Vec::with_capacity(2);
        if let Some(dir) = self.base_dir {
            roots.push(dir);
        }
        roots.push(&self.config.shader_root);
        let fragment_shader = load_shader_module(self.registry, device, &shader_name, &roots)?;

        tracing::debug!("Built material {} ({:?}, {})", name, workflow, shader_name);
        Ok(self.registry.insert_material(Arc::new(BsdfMaterial {
            name,
            workflow,
            alpha_mode,
            double_sided: material.double_sided(),
            occlusion_strength,
            textures,
            tex_coords,
            attributes,
            fragment_shader,
        })))
    }

    fn resolve_channel(
        &mut self,
        input: ChannelInput<'_>,
    ) -> Result<Arc<TextureObject>, ImportError> {
        let device = self.factory.device();
        let Some((texture, _)) = input.info else {
            return resolve_texture_object(
                self.registry,
                device,
                None,
                &input.factor,
                input.default_white,
                input.kind,
            );
        };

        let image = texture.source();
        let texture_name = texture
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("texture_{}", texture.index()));
        let image_name = image
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("image_{}", image.index()));

        let buffers = &self.buffers;
        let base_dir = self.base_dir;
        let fetch = || -> Result<ImageData, ImportError> {
            let bytes = match image.source() {
                Source::View { view, .. } => {
                    let buffer = buffers
                        .get(view.buffer().index())
                        .ok_or_else(|| ImportError::accessor(format!("image {}", image_name)))?;
                    let end = view.offset() + view.length();
                    buffer
                        .get(view.offset()..end)
                        .ok_or_else(|| ImportError::accessor(format!("image {}", image_name)))?
                        .to_vec()
                }
                Source::Uri { uri, .. } => read_external(uri, base_dir)?,
            };
            tracing::debug!("Decoding image {}", image_name);
            ImageData::decode(image_name.clone(), &bytes)
        };

        let source = SourceTexture {
            texture_name,
            image_name: image_name.clone(),
            fetch: &fetch,
        };
        resolve_texture_object(
            self.registry,
            device,
            Some(&source),
            &input.factor,
            input.default_white,
            input.kind,
        )
    }
}
