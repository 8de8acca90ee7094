//! nether-scene - glTF scenegraph runtime
//!
//! Imports glTF 2.0 assets (`.gltf` and `.glb`) into a node tree that keeps
//! per-frame world transforms, skinning matrices and animation state up to
//! date in device uniform buffers.
//!
//! # Modules
//!
//! - [`glb`] - GLB container parsing
//! - [`accessor`] - typed reads of glTF accessors over binary buffers
//! - [`texture`] / [`material`] - texture cache and BSDF material resolution
//! - [`mesh`] / [`vertex`] - submesh streams and interleaved vertex layouts
//! - [`channel`] / [`animation`] - keyframe channels and playback clocks
//! - [`node`] / [`graph`] / [`scene`] - the node runtime
//! - [`update`] / [`draw`] - transform propagation and draw traversal
//! - [`import`] - the glTF importer
//! - [`device`] - the GPU seam plus a host-memory implementation

pub mod accessor;
pub mod animation;
pub mod bounds;
pub mod channel;
pub mod config;
pub mod device;
pub mod draw;
pub mod error;
pub mod glb;
pub mod graph;
pub mod import;
pub mod material;
pub mod mesh;
pub mod node;
pub mod registry;
pub mod scene;
pub mod tangent;
pub mod texture;
pub mod update;
pub mod vertex;

// Re-export the import entry points
pub use import::{load, load_slice};

// Re-export commonly used runtime items
pub use animation::{Animation, PlaybackMode};
pub use bounds::{Aabb, BoundingSphere};
pub use channel::{Channel, ChannelTarget, Interpolator, Keyframe};
pub use config::SceneConfig;
pub use device::{
    DeviceError, HostDevice, HostRenderFactory, MAX_JOINTS, RenderDevice, RenderFactory,
    UniformBuffer,
};
pub use draw::{CommandRecorder, DrawCommand, DrawInterceptor, UniformBinding};
pub use error::ImportError;
pub use graph::SceneGraph;
pub use mesh::{Mesh, PrimitiveTopology, SubMesh};
pub use node::{
    Camera, DEFAULT_LAYERS, Light, LightKind, MAX_LAYERS, Node, NodeId, NodeRole, Projection,
};
pub use registry::AssetRegistry;
pub use scene::{Object, Scene};
pub use update::{UpdateContext, UpdateInterceptor};
pub use vertex::{VertexBufferType, VertexLayout};
