//! Host image data, device images and texture objects.
//!
//! Textures are resolved through [`resolve_texture_object`], which builds each
//! distinct (source, factor) combination at most once and synthesizes 1x1
//! constant textures for material channels without a source image.

use std::sync::Arc;

use glam::{Vec3, Vec4};

use crate::device::{DeviceResource, RenderDevice};
use crate::error::ImportError;
use crate::registry::AssetRegistry;

/// Name of the synthesized white texture family.
pub const INTERNAL_WHITE: &str = "INTERNAL_WHITE";
/// Name of the synthesized black texture family.
pub const INTERNAL_BLACK: &str = "INTERNAL_BLACK";
/// Name of the synthesized flat-normal texture family.
pub const INTERNAL_NORMAL: &str = "INTERNAL_NORMAL";

/// How texel values are interpreted when a factor is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageDataKind {
    /// Color data, factor multiplies every channel.
    Color,
    /// Non-color data (metallic/roughness, occlusion), multiplied like color.
    NonColor,
    /// Tangent-space normal, factor scales the decoded x/y components.
    Normal,
}

// =============================================================================
// Host image data
// =============================================================================

/// RGBA8 pixels held in system memory.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    name: String,
    width: u32,
    height: u32,
    pixels: Option<Vec<u8>>,
}

impl ImageData {
    pub fn new(name: impl Into<String>, width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            pixels: Some(pixels),
        }
    }

    /// Decode a PNG or JPEG image into RGBA8.
    pub fn decode(name: impl Into<String>, bytes: &[u8]) -> Result<Self, ImportError> {
        let name = name.into();
        let rgba = image::load_from_memory(bytes)
            .map_err(|source| ImportError::Image {
                name: name.clone(),
                source,
            })?
            .to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(Self::new(name, width, height, rgba.into_raw()))
    }

    /// A 1x1 image of one color.
    pub fn solid(name: impl Into<String>, color: Vec4) -> Self {
        Self::new(name, 1, 1, encode(color).to_vec())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Pixels, or `None` once host memory was released.
    pub fn pixels(&self) -> Option<&[u8]> {
        self.pixels.as_deref()
    }

    pub fn free_host_memory(&mut self) {
        self.pixels = None;
    }

    /// Copy of this image with `factor` applied according to `kind`.
    pub fn convert(&self, name: impl Into<String>, kind: ImageDataKind, factor: Vec4) -> Option<Self> {
        let pixels = self.pixels.as_ref()?;
        let converted = pixels
            .chunks_exact(4)
            .flat_map(|texel| {
                let value = decode([texel[0], texel[1], texel[2], texel[3]]);
                encode(apply_factor(value, kind, factor))
            })
            .collect();
        Some(Self::new(name, self.width, self.height, converted))
    }
}

fn decode(texel: [u8; 4]) -> Vec4 {
    Vec4::from_array(texel.map(|c| f32::from(c) / 255.0))
}

fn encode(value: Vec4) -> [u8; 4] {
    value
        .clamp(Vec4::ZERO, Vec4::ONE)
        .to_array()
        .map(|c| (c * 255.0).round() as u8)
}

fn apply_factor(value: Vec4, kind: ImageDataKind, factor: Vec4) -> Vec4 {
    match kind {
        ImageDataKind::Color | ImageDataKind::NonColor => value * factor,
        ImageDataKind::Normal => {
            let n = value.truncate() * 2.0 - Vec3::ONE;
            let scaled = Vec3::new(n.x * factor.x, n.y * factor.y, n.z).normalize_or_zero();
            (scaled * 0.5 + Vec3::splat(0.5)).extend(value.w)
        }
    }
}

/// Color of a synthesized texture for a channel without source image.
pub fn default_color(kind: ImageDataKind, default_white: bool, factor: Vec4) -> Vec4 {
    match kind {
        ImageDataKind::Normal => Vec4::new(0.5, 0.5, 1.0, 1.0),
        _ if default_white => factor,
        _ => factor * Vec4::new(0.0, 0.0, 0.0, 1.0),
    }
}

// =============================================================================
// Device objects
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    Repeat,
    ClampToEdge,
}

/// Device-resident image created from one [`ImageData`].
#[derive(Debug)]
pub struct ImageObject {
    pub name: String,
    pub image_data_name: String,
    pub width: u32,
    pub height: u32,
    pub image: Arc<dyn DeviceResource>,
}

/// Sampled view of an [`ImageObject`].
#[derive(Debug)]
pub struct TextureObject {
    pub name: String,
    pub image: Arc<ImageObject>,
    pub mipmap: bool,
    pub filter: Filter,
    pub address_mode: AddressMode,
}

// =============================================================================
// Resolver
// =============================================================================

/// Cache key: base name plus one `_<f>` suffix per factor component.
pub fn texture_key(base: &str, factor: &[f32]) -> String {
    let mut key = base.to_string();
    for f in factor {
        key.push_str(&format!("_{:.6}", f));
    }
    key
}

/// A material texture reference with a lazily decoded source image.
pub struct SourceTexture<'a> {
    /// Identity of the glTF texture.
    pub texture_name: String,
    /// Identity of the image it samples.
    pub image_name: String,
    /// Decodes the image when it is not cached yet.
    pub fetch: &'a dyn Fn() -> Result<ImageData, ImportError>,
}

/// Resolve the texture for one material channel.
///
/// `factor` holds one or four components; a scalar factor applies to every
/// channel. When `source` is `None` a 1x1 texture is synthesized from the
/// factor and the white/black/normal default.
pub fn resolve_texture_object(
    registry: &mut AssetRegistry,
    device: &dyn RenderDevice,
    source: Option<&SourceTexture<'_>>,
    factor: &[f32],
    default_white: bool,
    kind: ImageDataKind,
) -> Result<Arc<TextureObject>, ImportError> {
    let factor4 = match *factor {
        [f] => Vec4::splat(f),
        [x, y, z, w] => Vec4::new(x, y, z, w),
        _ => Vec4::ONE,
    };

    let (base, mipmap) = match source {
        Some(source) => (source.texture_name.as_str(), true),
        None if kind == ImageDataKind::Normal => (INTERNAL_NORMAL, false),
        None if default_white => (INTERNAL_WHITE, false),
        None => (INTERNAL_BLACK, false),
    };
    let key = texture_key(base, factor);

    if let Some(texture) = registry.texture(&key) {
        tracing::debug!("Texture cache hit: {}", key);
        return Ok(texture);
    }

    let image_key = match source {
        Some(source) => texture_key(&source.image_name, factor),
        None => key.clone(),
    };

    let image = match registry.image_object(&image_key) {
        Some(image) => image,
        None => {
            let data = match source {
                Some(source) => {
                    // None: not cached, Some(false): host copy released
                    match registry.image_data(&source.image_name).map(|d| d.pixels().is_some()) {
                        None => {
                            registry.insert_image_data((source.fetch)()?);
                        }
                        Some(false) => {
                            tracing::debug!("Decoding {} again, host copy was released", source.image_name);
                            registry.restore_image_data((source.fetch)()?);
                        }
                        Some(true) => {}
                    }
                    registry
                        .image_data(&source.image_name)
                        .and_then(|data| data.convert(image_key.clone(), kind, factor4))
                        .ok_or_else(|| ImportError::HostMemoryReleased(source.image_name.clone()))?
                }
                None => ImageData::solid(image_key.clone(), default_color(kind, default_white, factor4)),
            };

            let pixels = data.pixels().unwrap_or_default();
            let device_image =
                device.create_image(&image_key, data.width(), data.height(), pixels, mipmap)?;
            let image = Arc::new(ImageObject {
                name: image_key.clone(),
                image_data_name: data.name().to_string(),
                width: data.width(),
                height: data.height(),
                image: device_image,
            });
            registry.insert_image_data(data);
            registry.insert_image_object(image)
        }
    };

    let texture = Arc::new(TextureObject {
        name: key,
        image,
        mipmap,
        filter: Filter::Linear,
        address_mode: AddressMode::Repeat,
    });
    Ok(registry.insert_texture(texture))
}
