//! Scene configuration (`scene.toml`).
//!
//! Runtime and importer settings in TOML. Every field has a default, so a
//! missing file or a partial file is valid.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::node::{DEFAULT_LAYERS, MAX_LAYERS};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SceneConfig {
    /// Per-frame runtime settings
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Asset import settings
    #[serde(default)]
    pub import: ImportConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// In-flight frame buffers per uniform buffer (default: 3)
    #[serde(default = "default_buffer_count")]
    pub buffer_count: u32,
    /// Layer mask drawn when none is given (default: layer 0)
    #[serde(default = "default_layers")]
    pub default_layers: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Drop host copies of pixels and vertices once uploaded (default: false).
    /// Only images registered by the current import are released; a later
    /// import that needs a released image decodes it again.
    #[serde(default)]
    pub free_host_memory: bool,
    /// Fallback root searched for `shader/SPIR/V/*` (default: ".")
    #[serde(default = "default_shader_root")]
    pub shader_root: PathBuf,
}

fn default_buffer_count() -> u32 {
    3
}
fn default_layers() -> u32 {
    DEFAULT_LAYERS
}
fn default_shader_root() -> PathBuf {
    PathBuf::from(".")
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            buffer_count: default_buffer_count(),
            default_layers: default_layers(),
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            free_host_memory: false,
            shader_root: default_shader_root(),
        }
    }
}

/// Load configuration from `path`.
///
/// A missing file yields defaults; an unreadable or malformed one is an
/// error.
pub fn load(path: &Path) -> anyhow::Result<SceneConfig> {
    if !path.exists() {
        tracing::debug!("No config at {}, using defaults", path.display());
        return Ok(SceneConfig::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse config: {}", path.display()))
}

/// Like [`load`], but any failure falls back to defaults.
pub fn load_or_default(path: &Path) -> SceneConfig {
    load(path).unwrap_or_else(|e| {
        tracing::warn!("{:#}", e);
        SceneConfig::default()
    })
}

/// Check values the type system cannot. Returns one message per problem.
pub fn validate(config: &SceneConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    if config.runtime.buffer_count == 0 {
        warnings.push("runtime.buffer_count must be at least 1".to_string());
    }
    if config.runtime.default_layers >> MAX_LAYERS != 0 {
        warnings.push(format!(
            "runtime.default_layers {:#x} has bits above layer {}",
            config.runtime.default_layers,
            MAX_LAYERS - 1
        ));
    }
    warnings
}
