//! Programmatic glTF/GLB generation for integration tests.
//!
//! Binary data is appended to a single buffer, one buffer view per
//! accessor. The caller supplies the rest of the document as JSON.

#![allow(dead_code)]

use std::path::Path;

use serde_json::{Value, json};

pub const UNSIGNED_BYTE: u32 = 5121;
pub const UNSIGNED_SHORT: u32 = 5123;
pub const UNSIGNED_INT: u32 = 5125;
pub const FLOAT: u32 = 5126;

/// Every fragment shader variant the importer may ask for.
pub const SHADERS: [&str; 6] = [
    "glTF_mr_forward.frag.spv",
    "glTF_mr_forward_no_texcoord.frag.spv",
    "glTF_mr_forward_two_texcoord.frag.spv",
    "glTF_sg_forward.frag.spv",
    "glTF_sg_forward_no_texcoord.frag.spv",
    "glTF_sg_forward_two_texcoord.frag.spv",
];

/// Write dummy SPIR-V files for every shader variant below `root`.
pub fn write_shaders(root: &Path) {
    let dir = root.join("shader/SPIR/V");
    std::fs::create_dir_all(&dir).expect("Failed to create shader directory");
    for name in SHADERS {
        std::fs::write(dir.join(name), [0x03, 0x02, 0x23, 0x07]).expect("Failed to write shader");
    }
}

#[derive(Debug, Default)]
pub struct GltfBuilder {
    bin: Vec<u8>,
    views: Vec<Value>,
    accessors: Vec<Value>,
}

impl GltfBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` as a new 4-byte aligned buffer view. Returns the
    /// view index.
    pub fn view(&mut self, bytes: &[u8]) -> usize {
        self.bin.resize(self.bin.len().next_multiple_of(4), 0);
        self.views.push(json!({
            "buffer": 0,
            "byteOffset": self.bin.len(),
            "byteLength": bytes.len(),
        }));
        self.bin.extend_from_slice(bytes);
        self.views.len() - 1
    }

    /// Append `bytes` as a new buffer view and accessor. Returns the
    /// accessor index.
    pub fn accessor(&mut self, bytes: &[u8], component_type: u32, count: usize, kind: &str) -> usize {
        let view = self.view(bytes);
        self.accessors.push(json!({
            "bufferView": view,
            "componentType": component_type,
            "count": count,
            "type": kind,
        }));
        self.accessors.len() - 1
    }

    /// Set an extra property on an accessor, e.g. `normalized`.
    pub fn set(&mut self, accessor: usize, key: &str, value: Value) {
        self.accessors[accessor][key] = value;
    }

    pub fn scalars(&mut self, data: &[f32]) -> usize {
        self.accessor(&f32_bytes(data), FLOAT, data.len(), "SCALAR")
    }

    pub fn vec2s(&mut self, data: &[[f32; 2]]) -> usize {
        self.accessor(&f32_bytes(data.as_flattened()), FLOAT, data.len(), "VEC2")
    }

    pub fn vec3s(&mut self, data: &[[f32; 3]]) -> usize {
        self.accessor(&f32_bytes(data.as_flattened()), FLOAT, data.len(), "VEC3")
    }

    pub fn vec4s(&mut self, data: &[[f32; 4]]) -> usize {
        self.accessor(&f32_bytes(data.as_flattened()), FLOAT, data.len(), "VEC4")
    }

    pub fn mat4s(&mut self, data: &[[f32; 16]]) -> usize {
        self.accessor(&f32_bytes(data.as_flattened()), FLOAT, data.len(), "MAT4")
    }

    /// Positions, with the min/max bounds glTF requires.
    pub fn positions(&mut self, data: &[[f32; 3]]) -> usize {
        let index = self.vec3s(data);
        let mut min = [f32::MAX; 3];
        let mut max = [f32::MIN; 3];
        for p in data {
            for i in 0..3 {
                min[i] = min[i].min(p[i]);
                max[i] = max[i].max(p[i]);
            }
        }
        self.set(index, "min", json!(min));
        self.set(index, "max", json!(max));
        index
    }

    pub fn joints_u8(&mut self, data: &[[u8; 4]]) -> usize {
        self.accessor(data.as_flattened(), UNSIGNED_BYTE, data.len(), "VEC4")
    }

    /// Indices stored with `component_type` (byte, short, int or float).
    pub fn indices(&mut self, data: &[u32], component_type: u32) -> usize {
        let bytes: Vec<u8> = match component_type {
            UNSIGNED_BYTE => data.iter().map(|&i| i as u8).collect(),
            UNSIGNED_SHORT => data.iter().flat_map(|&i| (i as u16).to_le_bytes()).collect(),
            FLOAT => data.iter().flat_map(|&i| (i as f32).to_le_bytes()).collect(),
            _ => data.iter().flat_map(|&i| i.to_le_bytes()).collect(),
        };
        self.accessor(&bytes, component_type, data.len(), "SCALAR")
    }

    /// Merge the binary layout into `document`. Returns the JSON root and
    /// the binary buffer.
    pub fn build(self, mut document: Value) -> (Value, Vec<u8>) {
        document["asset"] = json!({ "version": "2.0" });
        document["buffers"] = json!([{ "byteLength": self.bin.len() }]);
        document["bufferViews"] = Value::Array(self.views);
        document["accessors"] = Value::Array(self.accessors);
        (document, self.bin)
    }

    /// Build and assemble a GLB.
    pub fn finish(self, document: Value) -> Vec<u8> {
        let (root, bin) = self.build(document);
        assemble_glb(&root, &bin)
    }
}

fn f32_bytes(data: &[f32]) -> Vec<u8> {
    data.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Assemble a GLB: header, then the JSON chunk space-padded and the BIN
/// chunk zero-padded to 4 bytes.
pub fn assemble_glb(root: &Value, bin: &[u8]) -> Vec<u8> {
    let json = serde_json::to_vec(root).expect("Failed to serialize JSON");
    let chunks = [(*b"JSON", json, b' '), (*b"BIN\0", bin.to_vec(), 0)];

    let mut body = Vec::new();
    for (kind, mut data, pad) in chunks {
        data.resize(data.len().next_multiple_of(4), pad);
        body.extend_from_slice(&(data.len() as u32).to_le_bytes());
        body.extend_from_slice(&kind);
        body.extend_from_slice(&data);
    }

    let mut glb = b"glTF".to_vec();
    glb.extend_from_slice(&2u32.to_le_bytes());
    glb.extend_from_slice(&(12 + body.len() as u32).to_le_bytes());
    glb.extend(body);
    glb
}

// =============================================================================
// Fixtures
// =============================================================================

pub const TRIANGLE_POSITIONS: [[f32; 3]; 3] = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];

/// One node `tri` at (1, 2, 3) carrying mesh `triangle`, with indices in
/// `index_type`.
pub fn triangle_glb(index_type: u32) -> Vec<u8> {
    let (root, bin) = triangle_document(index_type);
    assemble_glb(&root, &bin)
}

pub fn triangle_document(index_type: u32) -> (Value, Vec<u8>) {
    let mut builder = GltfBuilder::new();
    let positions = builder.positions(&TRIANGLE_POSITIONS);
    let normals = builder.vec3s(&[[0.0, 0.0, 1.0]; 3]);
    let indices = builder.indices(&[0, 1, 2], index_type);

    builder.build(json!({
        "scene": 0,
        "scenes": [{ "nodes": [0] }],
        "nodes": [{ "name": "tri", "mesh": 0, "translation": [1.0, 2.0, 3.0] }],
        "meshes": [{
            "name": "triangle",
            "primitives": [{
                "attributes": { "POSITION": positions, "NORMAL": normals },
                "indices": indices,
            }],
        }],
    }))
}

/// Two-joint skin under an `armature` node, a skinned triangle beside the
/// joints, and a linear `wave` animation moving `tip_joint` from y=1 to y=3
/// over one second.
pub fn skinned_glb() -> Vec<u8> {
    let mut builder = GltfBuilder::new();
    let positions = builder.positions(&TRIANGLE_POSITIONS);
    let normals = builder.vec3s(&[[0.0, 0.0, 1.0]; 3]);
    let joints = builder.joints_u8(&[[0, 0, 0, 0], [1, 0, 0, 0], [1, 0, 0, 0]]);
    let weights = builder.vec4s(&[[1.0, 0.0, 0.0, 0.0]; 3]);
    let indices = builder.indices(&[0, 1, 2], UNSIGNED_SHORT);

    let identity = [
        1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0,
    ];
    let mut tip_bind = identity;
    tip_bind[13] = -1.0;
    let inverse_bind = builder.mat4s(&[identity, tip_bind]);

    let times = builder.scalars(&[0.0, 1.0]);
    builder.set(times, "min", json!([0.0]));
    builder.set(times, "max", json!([1.0]));
    let translations = builder.vec3s(&[[0.0, 1.0, 0.0], [0.0, 3.0, 0.0]]);

    builder.finish(json!({
        "scene": 0,
        "scenes": [{ "nodes": [0] }],
        "nodes": [
            { "name": "armature", "children": [2, 1] },
            { "name": "root_joint", "children": [3] },
            { "name": "skinned_mesh", "mesh": 0, "skin": 0 },
            { "name": "tip_joint", "translation": [0.0, 1.0, 0.0] },
        ],
        "skins": [{ "joints": [1, 3], "inverseBindMatrices": inverse_bind }],
        "meshes": [{
            "name": "ribbon",
            "primitives": [{
                "attributes": {
                    "POSITION": positions,
                    "NORMAL": normals,
                    "JOINTS_0": joints,
                    "WEIGHTS_0": weights,
                },
                "indices": indices,
            }],
        }],
        "animations": [{
            "name": "wave",
            "channels": [{ "sampler": 0, "target": { "node": 3, "path": "translation" } }],
            "samplers": [{ "input": times, "output": translations, "interpolation": "LINEAR" }],
        }],
    }))
}

/// Triangle whose POSITION accessor is VEC4 with w = 1.
pub fn vec4_position_glb() -> Vec<u8> {
    let mut builder = GltfBuilder::new();
    let positions: Vec<[f32; 4]> = TRIANGLE_POSITIONS.iter().map(|&[x, y, z]| [x, y, z, 1.0]).collect();
    let positions_accessor = builder.vec4s(&positions);
    builder.set(positions_accessor, "min", json!([0.0, 0.0, 0.0, 1.0]));
    builder.set(positions_accessor, "max", json!([1.0, 1.0, 0.0, 1.0]));

    builder.finish(json!({
        "scene": 0,
        "scenes": [{ "nodes": [0] }],
        "nodes": [{ "name": "wide", "mesh": 0 }],
        "meshes": [{
            "name": "wide_triangle",
            "primitives": [{ "attributes": { "POSITION": positions_accessor } }],
        }],
    }))
}

/// 1x1 PNG image in one color.
pub fn png_bytes(rgba: [u8; 4]) -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(1, 1, image::Rgba(rgba));
    let mut bytes = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, image::ImageFormat::Png)
        .expect("Failed to encode PNG");
    bytes.into_inner()
}

/// Textured triangle. Mesh and material are named after `name`; the
/// embedded image is always `image_0`, so assets built from this share it.
pub fn textured_glb(name: &str, base_color_factor: [f32; 4]) -> Vec<u8> {
    let mut builder = GltfBuilder::new();
    let positions = builder.positions(&TRIANGLE_POSITIONS);
    let normals = builder.vec3s(&[[0.0, 0.0, 1.0]; 3]);
    let uvs = builder.vec2s(&[[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]]);
    let indices = builder.indices(&[0, 1, 2], UNSIGNED_SHORT);
    let png = builder.view(&png_bytes([200, 100, 50, 255]));

    builder.finish(json!({
        "scene": 0,
        "scenes": [{ "nodes": [0] }],
        "nodes": [{ "name": name, "mesh": 0 }],
        "images": [{ "bufferView": png, "mimeType": "image/png" }],
        "textures": [{ "source": 0 }],
        "materials": [{
            "name": format!("{}_material", name),
            "pbrMetallicRoughness": {
                "baseColorTexture": { "index": 0 },
                "baseColorFactor": base_color_factor,
            },
        }],
        "meshes": [{
            "name": name,
            "primitives": [{
                "attributes": { "POSITION": positions, "NORMAL": normals, "TEXCOORD_0": uvs },
                "indices": indices,
                "material": 0,
            }],
        }],
    }))
}

/// A spot light on node `lamp` at (0, 4, 0), turned to point down. Plain
/// glTF JSON without buffers.
pub fn light_gltf() -> Vec<u8> {
    let half = std::f32::consts::FRAC_1_SQRT_2;
    let document = json!({
        "asset": { "version": "2.0" },
        "scene": 0,
        "scenes": [{ "nodes": [0] }],
        "extensionsUsed": ["KHR_lights_punctual"],
        "extensions": {
            "KHR_lights_punctual": {
                "lights": [{
                    "name": "key",
                    "type": "spot",
                    "color": [1.0, 0.5, 0.25],
                    "intensity": 5.0,
                    "spot": { "outerConeAngle": 0.5 },
                }],
            },
        },
        "nodes": [{
            "name": "lamp",
            "translation": [0.0, 4.0, 0.0],
            "rotation": [-half, 0.0, 0.0, half],
            "extensions": { "KHR_lights_punctual": { "light": 0 } },
        }],
    });
    serde_json::to_vec(&document).expect("Failed to serialize JSON")
}
