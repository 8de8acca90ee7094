//! Import error taxonomy.
//!
//! Malformed assets and resource-creation failures share one error type: any
//! failure at any depth of the import aborts the whole load.

use std::path::PathBuf;

use thiserror::Error;

use crate::channel::ChannelError;
use crate::device::DeviceError;
use crate::glb::GlbError;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported asset extension {0:?} (expected .gltf or .glb)")]
    UnsupportedExtension(PathBuf),

    #[error("invalid GLB container: {0}")]
    Glb(#[from] GlbError),

    #[error("invalid glTF document: {0}")]
    Document(#[from] gltf::Error),

    #[error("unsupported resource URI {0:?}")]
    UnsupportedUri(String),

    #[error("buffer references the GLB binary chunk but none is present")]
    MissingBinChunk,

    #[error("buffer {index} declares {declared} bytes but only {actual} are available")]
    BufferTooShort {
        index: usize,
        declared: usize,
        actual: usize,
    },

    #[error("asset contains no scene")]
    NoScene,

    #[error("malformed accessor for {what}")]
    MalformedAccessor { what: String },

    #[error("{attribute} of {submesh} has {found} elements, expected {expected}")]
    AccessorCountMismatch {
        submesh: String,
        attribute: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("{attribute} of {submesh} has unsupported layout: {reason}")]
    UnsupportedAccessor {
        submesh: String,
        attribute: &'static str,
        reason: String,
    },

    #[error("{0} has no POSITION attribute")]
    MissingPosition(String),

    #[error("{submesh} uses unsupported primitive topology {mode}")]
    UnsupportedTopology { submesh: String, mode: String },

    #[error("failed to decode image {name}: {source}")]
    Image {
        name: String,
        #[source]
        source: image::ImageError,
    },

    #[error("host copy of image {0} was already released")]
    HostMemoryReleased(String),

    #[error("shader {0} not found")]
    ShaderNotFound(String),

    #[error("skin {skin}: {reason}")]
    Skin { skin: String, reason: String },

    #[error("animation channel {name}: {source}")]
    Channel {
        name: String,
        #[source]
        source: ChannelError,
    },

    #[error("animation channel {name}: {reason}")]
    Animation { name: String, reason: String },

    #[error("device resource creation failed: {0}")]
    Device(#[from] DeviceError),
}

impl ImportError {
    pub(crate) fn accessor(what: impl Into<String>) -> Self {
        Self::MalformedAccessor { what: what.into() }
    }
}
