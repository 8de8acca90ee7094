//! Render device capability.
//!
//! The scene runtime never talks to a graphics API directly. It allocates
//! buffers, images and shader modules through [`RenderDevice`], and asks a
//! [`RenderFactory`] to prepare the per-node uniform buffers and per-submesh
//! material bindings. [`HostDevice`] implements the capability in system
//! memory, which is what the CLI and the tests run against.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::material::{BsdfMaterial, MaterialBinding};

// =============================================================================
// Uniform block layouts
// =============================================================================

/// Maximum joints addressable by one armature.
pub const MAX_JOINTS: usize = 64;

/// Size of a column-major `mat4`.
pub const MAT4_SIZE: u64 = 64;
/// Size of a std140 `mat3` (three padded vec4 columns).
pub const MAT3_SIZE: u64 = 48;

/// Per-slot transform block: world matrix followed by the normal matrix.
pub const TRANSFORM_BLOCK_SIZE: u64 = MAT4_SIZE + MAT3_SIZE;

/// Offset of the first joint matrix in a joints block. The armature's own
/// inverse world and normal matrices occupy the header.
pub const JOINT_MATRICES_OFFSET: u64 = TRANSFORM_BLOCK_SIZE;
/// Offset of the first joint normal matrix in a joints block.
pub const JOINT_NORMAL_MATRICES_OFFSET: u64 =
    JOINT_MATRICES_OFFSET + MAX_JOINTS as u64 * MAT4_SIZE;
/// Per-slot joints block size.
pub const JOINTS_BLOCK_SIZE: u64 = JOINT_NORMAL_MATRICES_OFFSET + MAX_JOINTS as u64 * MAT3_SIZE;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("out of device memory allocating {label}: requested {requested} bytes, {available} available")]
    OutOfMemory {
        label: String,
        requested: u64,
        available: u64,
    },

    #[error("access of {len} bytes at offset {offset} exceeds {label} ({size} bytes)")]
    OutOfBounds {
        label: String,
        offset: u64,
        len: u64,
        size: u64,
    },

    #[error("buffer slot {slot} out of range for {label} ({count} slots)")]
    SlotOutOfRange {
        label: String,
        slot: usize,
        count: u32,
    },

    #[error("invalid resource {label}: {reason}")]
    InvalidResource { label: String, reason: String },
}

// =============================================================================
// Capability traits
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    Vertex,
    Index,
    Uniform,
}

/// A device-resident buffer. Uploads are fire-and-forget writes into
/// persistently mapped memory.
pub trait DeviceBuffer: fmt::Debug + Send + Sync {
    fn label(&self) -> &str;
    fn usage(&self) -> BufferUsage;
    fn size(&self) -> u64;
    fn upload(&self, offset: u64, bytes: &[u8]) -> Result<(), DeviceError>;
    fn read(&self, offset: u64, len: u64) -> Result<Vec<u8>, DeviceError>;
}

/// An opaque device resource (image or shader module).
pub trait DeviceResource: fmt::Debug + Send + Sync {
    fn label(&self) -> &str;
    fn size(&self) -> u64;
}

pub trait RenderDevice: fmt::Debug + Send + Sync {
    fn create_buffer(
        &self,
        label: &str,
        usage: BufferUsage,
        size: u64,
    ) -> Result<Arc<dyn DeviceBuffer>, DeviceError>;

    /// Create an RGBA8 image from tightly packed pixels.
    fn create_image(
        &self,
        label: &str,
        width: u32,
        height: u32,
        pixels: &[u8],
        mipmap: bool,
    ) -> Result<Arc<dyn DeviceResource>, DeviceError>;

    fn create_shader_module(
        &self,
        label: &str,
        code: &[u8],
    ) -> Result<Arc<dyn DeviceResource>, DeviceError>;

    /// Create a buffer and fill it with `bytes`.
    fn create_buffer_init(
        &self,
        label: &str,
        usage: BufferUsage,
        bytes: &[u8],
    ) -> Result<Arc<dyn DeviceBuffer>, DeviceError> {
        let buffer = self.create_buffer(label, usage, bytes.len() as u64)?;
        buffer.upload(0, bytes)?;
        Ok(buffer)
    }
}

/// A uniform buffer split into `buffer_count` equally sized slots, one per
/// in-flight frame.
#[derive(Debug, Clone)]
pub struct UniformBuffer {
    buffer: Arc<dyn DeviceBuffer>,
    buffer_count: u32,
}

impl UniformBuffer {
    pub fn new(buffer: Arc<dyn DeviceBuffer>, buffer_count: u32) -> Self {
        Self {
            buffer,
            buffer_count: buffer_count.max(1),
        }
    }

    pub fn buffer(&self) -> &Arc<dyn DeviceBuffer> {
        &self.buffer
    }

    pub fn buffer_count(&self) -> u32 {
        self.buffer_count
    }

    pub fn size(&self) -> u64 {
        self.buffer.size()
    }

    pub fn slot_size(&self) -> u64 {
        self.buffer.size() / u64::from(self.buffer_count)
    }

    /// Byte offset of `slot` within the buffer.
    pub fn dynamic_offset(&self, slot: usize) -> u64 {
        slot as u64 * self.slot_size()
    }

    /// Write `bytes` at `offset` inside `slot`.
    pub fn upload(&self, slot: usize, offset: u64, bytes: &[u8]) -> Result<(), DeviceError> {
        if slot >= self.buffer_count as usize {
            return Err(DeviceError::SlotOutOfRange {
                label: self.buffer.label().to_string(),
                slot,
                count: self.buffer_count,
            });
        }
        let len = bytes.len() as u64;
        if offset.checked_add(len).is_none_or(|end| end > self.slot_size()) {
            return Err(DeviceError::OutOfBounds {
                label: self.buffer.label().to_string(),
                offset,
                len,
                size: self.slot_size(),
            });
        }
        self.buffer.upload(self.dynamic_offset(slot) + offset, bytes)
    }
}

/// GPU-buffer preparation calls made by the importer and by node cloning.
pub trait RenderFactory {
    fn device(&self) -> &dyn RenderDevice;

    /// Number of in-flight frame buffers each uniform buffer is split into.
    fn buffer_count(&self) -> u32;

    fn prepare_transform_uniform_buffer(&self, label: &str) -> Result<UniformBuffer, DeviceError> {
        let count = self.buffer_count();
        let buffer = self.device().create_buffer(
            label,
            BufferUsage::Uniform,
            TRANSFORM_BLOCK_SIZE * u64::from(count),
        )?;
        Ok(UniformBuffer::new(buffer, count))
    }

    fn prepare_joints_uniform_buffer(
        &self,
        label: &str,
        joint_count: usize,
    ) -> Result<UniformBuffer, DeviceError> {
        if joint_count > MAX_JOINTS {
            tracing::warn!(
                "{}: {} joints exceed the {} joint slots, extra joints will not animate",
                label,
                joint_count,
                MAX_JOINTS
            );
        }
        let count = self.buffer_count();
        let buffer = self.device().create_buffer(
            label,
            BufferUsage::Uniform,
            JOINTS_BLOCK_SIZE * u64::from(count),
        )?;
        Ok(UniformBuffer::new(buffer, count))
    }

    /// Describe the resources a submesh binds when drawn with `material`.
    fn prepare_bsdf_material(
        &self,
        material: &BsdfMaterial,
        skinned: bool,
    ) -> Result<MaterialBinding, DeviceError> {
        Ok(MaterialBinding::for_material(material, skinned))
    }
}

// =============================================================================
// Host memory implementation
// =============================================================================

#[derive(Debug, Default)]
struct Budget {
    limit: Option<u64>,
    allocated: AtomicU64,
}

impl Budget {
    fn reserve(&self, label: &str, size: u64) -> Result<(), DeviceError> {
        let previous = self.allocated.fetch_add(size, Ordering::SeqCst);
        if let Some(limit) = self.limit
            && previous.checked_add(size).is_none_or(|end| end > limit)
        {
            self.allocated.fetch_sub(size, Ordering::SeqCst);
            return Err(DeviceError::OutOfMemory {
                label: label.to_string(),
                requested: size,
                available: limit.saturating_sub(previous),
            });
        }
        Ok(())
    }

    fn release(&self, size: u64) {
        self.allocated.fetch_sub(size, Ordering::SeqCst);
    }
}

/// Render device backed by system memory, with an optional allocation budget.
#[derive(Debug, Clone, Default)]
pub struct HostDevice {
    budget: Arc<Budget>,
}

impl HostDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// A device that fails allocations once `bytes` are in use.
    pub fn with_budget(bytes: u64) -> Self {
        Self {
            budget: Arc::new(Budget {
                limit: Some(bytes),
                allocated: AtomicU64::new(0),
            }),
        }
    }

    /// Bytes currently held by live resources.
    pub fn allocated(&self) -> u64 {
        self.budget.allocated.load(Ordering::SeqCst)
    }
}

impl RenderDevice for HostDevice {
    fn create_buffer(
        &self,
        label: &str,
        usage: BufferUsage,
        size: u64,
    ) -> Result<Arc<dyn DeviceBuffer>, DeviceError> {
        self.budget.reserve(label, size)?;
        tracing::debug!("Created {:?} buffer {} ({} bytes)", usage, label, size);
        Ok(Arc::new(HostBuffer {
            label: label.to_string(),
            usage,
            data: Mutex::new(vec![0; size as usize]),
            budget: Arc::clone(&self.budget),
        }))
    }

    fn create_image(
        &self,
        label: &str,
        width: u32,
        height: u32,
        pixels: &[u8],
        mipmap: bool,
    ) -> Result<Arc<dyn DeviceResource>, DeviceError> {
        let expected = u64::from(width) * u64::from(height) * 4;
        if pixels.len() as u64 != expected {
            return Err(DeviceError::InvalidResource {
                label: label.to_string(),
                reason: format!("{} pixel bytes for {}x{} RGBA8", pixels.len(), width, height),
            });
        }
        // A full mip chain adds a third of the base level
        let size = if mipmap { expected + expected / 3 } else { expected };
        self.budget.reserve(label, size)?;
        Ok(Arc::new(HostResource {
            label: label.to_string(),
            size,
            budget: Arc::clone(&self.budget),
        }))
    }

    fn create_shader_module(
        &self,
        label: &str,
        code: &[u8],
    ) -> Result<Arc<dyn DeviceResource>, DeviceError> {
        if code.is_empty() {
            return Err(DeviceError::InvalidResource {
                label: label.to_string(),
                reason: "empty shader code".to_string(),
            });
        }
        let size = code.len() as u64;
        self.budget.reserve(label, size)?;
        Ok(Arc::new(HostResource {
            label: label.to_string(),
            size,
            budget: Arc::clone(&self.budget),
        }))
    }
}

#[derive(Debug)]
struct HostBuffer {
    label: String,
    usage: BufferUsage,
    data: Mutex<Vec<u8>>,
    budget: Arc<Budget>,
}

impl HostBuffer {
    fn check(&self, offset: u64, len: u64, size: u64) -> Result<(), DeviceError> {
        if offset.checked_add(len).is_none_or(|end| end > size) {
            return Err(DeviceError::OutOfBounds {
                label: self.label.clone(),
                offset,
                len,
                size,
            });
        }
        Ok(())
    }
}

impl DeviceBuffer for HostBuffer {
    fn label(&self) -> &str {
        &self.label
    }

    fn usage(&self) -> BufferUsage {
        self.usage
    }

    fn size(&self) -> u64 {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        data.len() as u64
    }

    fn upload(&self, offset: u64, bytes: &[u8]) -> Result<(), DeviceError> {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        self.check(offset, bytes.len() as u64, data.len() as u64)?;
        let start = offset as usize;
        data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn read(&self, offset: u64, len: u64) -> Result<Vec<u8>, DeviceError> {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        self.check(offset, len, data.len() as u64)?;
        let start = offset as usize;
        Ok(data[start..start + len as usize].to_vec())
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        let size = self.data.get_mut().map(|d| d.len()).unwrap_or_default();
        self.budget.release(size as u64);
    }
}

#[derive(Debug)]
struct HostResource {
    label: String,
    size: u64,
    budget: Arc<Budget>,
}

impl DeviceResource for HostResource {
    fn label(&self) -> &str {
        &self.label
    }

    fn size(&self) -> u64 {
        self.size
    }
}

impl Drop for HostResource {
    fn drop(&mut self) {
        self.budget.release(self.size);
    }
}

/// [`RenderFactory`] over a [`HostDevice`].
#[derive(Debug, Clone)]
pub struct HostRenderFactory {
    device: HostDevice,
    buffer_count: u32,
}

impl HostRenderFactory {
    pub fn new(device: HostDevice, buffer_count: u32) -> Self {
        Self {
            device,
            buffer_count: buffer_count.max(1),
        }
    }

    pub fn host_device(&self) -> &HostDevice {
        &self.device
    }
}

impl RenderFactory for HostRenderFactory {
    fn device(&self) -> &dyn RenderDevice {
        &self.device
    }

    fn buffer_count(&self) -> u32 {
        self.buffer_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_joints_block_layout() {
        assert_eq!(TRANSFORM_BLOCK_SIZE, 112);
        assert_eq!(JOINT_MATRICES_OFFSET, 112);
        assert_eq!(JOINT_NORMAL_MATRICES_OFFSET, 112 + 64 * 64);
        assert_eq!(JOINTS_BLOCK_SIZE, 112 + 64 * 64 + 64 * 48);
    }

    #[test]
    fn test_buffer_upload_and_read() {
        let device = HostDevice::new();
        let buffer = device.create_buffer("test", BufferUsage::Vertex, 8).unwrap();
        buffer.upload(4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(buffer.read(0, 8).unwrap(), vec![0, 0, 0, 0, 1, 2, 3, 4]);
        assert!(buffer.upload(6, &[0; 4]).is_err());
        assert!(buffer.read(u64::MAX, 2).is_err());
    }

    #[test]
    fn test_budget_exhaustion_and_release() {
        let device = HostDevice::with_budget(100);
        let a = device.create_buffer("a", BufferUsage::Uniform, 60).unwrap();
        let err = device.create_buffer("b", BufferUsage::Uniform, 60).unwrap_err();
        assert!(matches!(err, DeviceError::OutOfMemory { available: 40, .. }));
        assert_eq!(device.allocated(), 60);

        drop(a);
        assert_eq!(device.allocated(), 0);
        assert!(device.create_buffer("b", BufferUsage::Uniform, 60).is_ok());
    }

    #[test]
    fn test_image_pixel_count_validated() {
        let device = HostDevice::new();
        assert!(device.create_image("img", 2, 2, &[0; 16], false).is_ok());
        assert!(device.create_image("img", 2, 2, &[0; 12], false).is_err());
    }

    #[test]
    fn test_uniform_buffer_slots() {
        let factory = HostRenderFactory::new(HostDevice::new(), 3);
        let uniform = factory.prepare_transform_uniform_buffer("node").unwrap();
        assert_eq!(uniform.size(), 3 * TRANSFORM_BLOCK_SIZE);
        assert_eq!(uniform.slot_size(), TRANSFORM_BLOCK_SIZE);
        assert_eq!(uniform.dynamic_offset(2), 2 * TRANSFORM_BLOCK_SIZE);

        uniform.upload(2, 0, &[7; 4]).unwrap();
        let bytes = uniform.buffer().read(2 * TRANSFORM_BLOCK_SIZE, 4).unwrap();
        assert_eq!(bytes, vec![7; 4]);

        assert!(matches!(
            uniform.upload(3, 0, &[0; 4]),
            Err(DeviceError::SlotOutOfRange { slot: 3, .. })
        ));
        assert!(matches!(
            uniform.upload(0, TRANSFORM_BLOCK_SIZE - 2, &[0; 4]),
            Err(DeviceError::OutOfBounds { .. })
        ));
        // An offset near u64::MAX must not wrap past the bounds check
        assert!(matches!(
            uniform.upload(0, u64::MAX - 1, &[0; 4]),
            Err(DeviceError::OutOfBounds { offset, .. }) if offset == u64::MAX - 1
        ));
    }
}
