//! Typed, bounds-checked views over glTF buffer data.
//!
//! The importer never indexes raw buffer bytes directly. Every attribute read
//! goes through an [`AccessorView`], which validates component type, element
//! index and stride, and returns `None` instead of reading out of range. The
//! caller turns `None` into an import failure.

use std::path::Path;

use bytemuck::Pod;
use gltf::accessor::{DataType, Dimensions};

use crate::error::ImportError;

// =============================================================================
// Component type tables
// =============================================================================

/// Numeric component types, keyed by their glTF/GL enum values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ComponentType {
    Byte = 5120,
    UnsignedByte = 5121,
    Short = 5122,
    UnsignedShort = 5123,
    UnsignedInt = 5125,
    Float = 5126,
}

impl ComponentType {
    /// Look up a component type from its numeric code.
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            5120 => Some(Self::Byte),
            5121 => Some(Self::UnsignedByte),
            5122 => Some(Self::Short),
            5123 => Some(Self::UnsignedShort),
            5125 => Some(Self::UnsignedInt),
            5126 => Some(Self::Float),
            _ => None,
        }
    }

    /// Size of one component in bytes.
    pub const fn size(self) -> usize {
        match self {
            Self::Byte | Self::UnsignedByte => 1,
            Self::Short | Self::UnsignedShort => 2,
            Self::UnsignedInt | Self::Float => 4,
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(self, Self::Float)
    }

    pub const fn is_unsigned_byte(self) -> bool {
        matches!(self, Self::UnsignedByte)
    }

    pub const fn is_unsigned_short(self) -> bool {
        matches!(self, Self::UnsignedShort)
    }

    pub const fn is_unsigned_int(self) -> bool {
        matches!(self, Self::UnsignedInt)
    }
}

impl From<DataType> for ComponentType {
    fn from(data_type: DataType) -> Self {
        match data_type {
            DataType::I8 => Self::Byte,
            DataType::U8 => Self::UnsignedByte,
            DataType::I16 => Self::Short,
            DataType::U16 => Self::UnsignedShort,
            DataType::U32 => Self::UnsignedInt,
            DataType::F32 => Self::Float,
        }
    }
}

/// Number of components for an accessor element type.
pub const fn components_per_type(dimensions: Dimensions) -> usize {
    match dimensions {
        Dimensions::Scalar => 1,
        Dimensions::Vec2 => 2,
        Dimensions::Vec3 => 3,
        Dimensions::Vec4 | Dimensions::Mat2 => 4,
        Dimensions::Mat3 => 9,
        Dimensions::Mat4 => 16,
    }
}

// =============================================================================
// Buffers
// =============================================================================

/// Resolved binary buffers of one asset, indexed like `document.buffers()`.
#[derive(Debug, Default)]
pub struct BufferSet {
    buffers: Vec<Vec<u8>>,
}

impl BufferSet {
    /// Resolve every buffer of `document`.
    ///
    /// The GLB-stored buffer comes from `bin`; external buffers are read
    /// relative to `base_dir`. Embedded `data:` URIs are not supported.
    pub fn load(
        document: &gltf::Document,
        bin: Option<&[u8]>,
        base_dir: Option<&Path>,
    ) -> Result<Self, ImportError> {
        let mut buffers = Vec::with_capacity(document.buffers().len());

        for buffer in document.buffers() {
            let data = match buffer.source() {
                gltf::buffer::Source::Bin => bin
                    .ok_or(ImportError::MissingBinChunk)?
                    .to_vec(),
                gltf::buffer::Source::Uri(uri) => read_external(uri, base_dir)?,
            };

            if data.len() < buffer.length() {
                return Err(ImportError::BufferTooShort {
                    index: buffer.index(),
                    declared: buffer.length(),
                    actual: data.len(),
                });
            }
            buffers.push(data);
        }

        Ok(Self { buffers })
    }

    /// Wrap already-resolved buffers.
    pub fn from_buffers(buffers: Vec<Vec<u8>>) -> Self {
        Self { buffers }
    }

    pub fn get(&self, index: usize) -> Option<&[u8]> {
        self.buffers.get(index).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

/// Read an external resource referenced by URI.
pub(crate) fn read_external(uri: &str, base_dir: Option<&Path>) -> Result<Vec<u8>, ImportError> {
    if uri.starts_with("data:") {
        return Err(ImportError::UnsupportedUri(truncate_uri(uri)));
    }
    let base_dir = base_dir.ok_or_else(|| ImportError::UnsupportedUri(uri.to_string()))?;
    let path = base_dir.join(uri);
    std::fs::read(&path).map_err(|source| ImportError::Io { path, source })
}

fn truncate_uri(uri: &str) -> String {
    uri.chars().take(32).collect()
}

// =============================================================================
// Accessor view
// =============================================================================

/// Bounds-checked strided view over one accessor's elements.
#[derive(Debug, Clone, Copy)]
pub struct AccessorView<'a> {
    data: &'a [u8],
    component_type: ComponentType,
    components: usize,
    count: usize,
    stride: usize,
    normalized: bool,
}

impl<'a> AccessorView<'a> {
    /// Build a view for `accessor`, or `None` when its data is absent or out
    /// of range (sparse accessors are not supported).
    pub fn new(accessor: &gltf::Accessor, buffers: &'a BufferSet) -> Option<Self> {
        if accessor.sparse().is_some() {
            return None;
        }
        let view = accessor.view()?;
        let buffer = buffers.get(view.buffer().index())?;

        let view_end = view.offset().checked_add(view.length())?;
        if view_end > buffer.len() {
            return None;
        }
        let start = view.offset().checked_add(accessor.offset())?;
        if start > view_end {
            return None;
        }

        let component_type = ComponentType::from(accessor.data_type());
        let components = components_per_type(accessor.dimensions());
        let stride = view
            .stride()
            .unwrap_or(component_type.size() * components);

        Self::from_bytes(
            &buffer[start..view_end],
            component_type,
            components,
            accessor.count(),
            stride,
            accessor.normalized(),
        )
    }

    /// Build a view over raw bytes, validating that `count` elements fit.
    pub fn from_bytes(
        data: &'a [u8],
        component_type: ComponentType,
        components: usize,
        count: usize,
        stride: usize,
        normalized: bool,
    ) -> Option<Self> {
        let element_size = component_type.size() * components;
        if components == 0 || stride < element_size {
            return None;
        }
        if count > 0 {
            let last = (count - 1).checked_mul(stride)?.checked_add(element_size)?;
            if last > data.len() {
                return None;
            }
        }

        Some(Self {
            data,
            component_type,
            components,
            count,
            stride,
            normalized,
        })
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn component_type(&self) -> ComponentType {
        self.component_type
    }

    pub fn components(&self) -> usize {
        self.components
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn is_normalized(&self) -> bool {
        self.normalized
    }

    fn element_size(&self) -> usize {
        self.component_type.size() * self.components
    }

    /// Raw bytes of element `index`.
    pub fn element_bytes(&self, index: usize) -> Option<&'a [u8]> {
        if index >= self.count {
            return None;
        }
        let offset = index * self.stride;
        self.data.get(offset..offset + self.element_size())
    }

    /// Read the first `N` components of element `index` as `T`.
    ///
    /// `T` must match the component width; `N` may be smaller than the
    /// element's component count.
    fn read<T: Pod, const N: usize>(&self, index: usize) -> Option<[T; N]> {
        let size = std::mem::size_of::<T>();
        if N > self.components || size != self.component_type.size() {
            return None;
        }
        let bytes = self.element_bytes(index)?;
        let mut out = [<T as bytemuck::Zeroable>::zeroed(); N];
        for (i, value) in out.iter_mut().enumerate() {
            *value = bytemuck::pod_read_unaligned(&bytes[i * size..(i + 1) * size]);
        }
        Some(out)
    }

    /// Float components of element `index`; `None` unless float-typed.
    pub fn floats<const N: usize>(&self, index: usize) -> Option<[f32; N]> {
        if !self.component_type.is_float() {
            return None;
        }
        self.read::<f32, N>(index)
    }

    /// Unsigned byte components of element `index`.
    pub fn unsigned_bytes<const N: usize>(&self, index: usize) -> Option<[u8; N]> {
        if !self.component_type.is_unsigned_byte() {
            return None;
        }
        self.read::<u8, N>(index)
    }

    /// Unsigned short components of element `index`.
    pub fn unsigned_shorts<const N: usize>(&self, index: usize) -> Option<[u16; N]> {
        if !self.component_type.is_unsigned_short() {
            return None;
        }
        self.read::<u16, N>(index)
    }

    /// Joint indices stored as u8 or u16, widened to u16.
    pub fn joints<const N: usize>(&self, index: usize) -> Option<[u16; N]> {
        match self.component_type {
            ComponentType::UnsignedByte => self.unsigned_bytes::<N>(index).map(|v| v.map(u16::from)),
            ComponentType::UnsignedShort => self.unsigned_shorts::<N>(index),
            _ => None,
        }
    }

    /// Components as floats, decoding normalized integer encodings.
    pub fn normalized_floats<const N: usize>(&self, index: usize) -> Option<[f32; N]> {
        match self.component_type {
            ComponentType::Float => self.floats::<N>(index),
            ComponentType::UnsignedByte => self
                .read::<u8, N>(index)
                .map(|v| v.map(|c| c as f32 / 255.0)),
            ComponentType::UnsignedShort => self
                .read::<u16, N>(index)
                .map(|v| v.map(|c| c as f32 / 65535.0)),
            ComponentType::Byte => self
                .read::<i8, N>(index)
                .map(|v| v.map(|c| (c as f32 / 127.0).max(-1.0))),
            ComponentType::Short => self
                .read::<i16, N>(index)
                .map(|v| v.map(|c| (c as f32 / 32767.0).max(-1.0))),
            ComponentType::UnsignedInt => None,
        }
    }

    /// Scalar index widened to `i32`, whatever the source encoding.
    pub fn index(&self, index: usize) -> Option<i32> {
        if self.components != 1 {
            return None;
        }
        match self.component_type {
            ComponentType::Byte => self.read::<i8, 1>(index).map(|[v]| i32::from(v)),
            ComponentType::UnsignedByte => self.read::<u8, 1>(index).map(|[v]| i32::from(v)),
            ComponentType::Short => self.read::<i16, 1>(index).map(|[v]| i32::from(v)),
            ComponentType::UnsignedShort => self.read::<u16, 1>(index).map(|[v]| i32::from(v)),
            ComponentType::UnsignedInt => self
                .read::<u32, 1>(index)
                .and_then(|[v]| i32::try_from(v).ok()),
            ComponentType::Float => self.read::<f32, 1>(index).map(|[v]| v as i32),
        }
    }
}
