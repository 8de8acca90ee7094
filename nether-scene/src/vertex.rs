//! Interleaved vertex layout.
//!
//! Attribute presence is data-driven but ordering is fixed, so the stride
//! and every offset follow from the attribute bitmask alone.

use bitflags::bitflags;

bitflags! {
    /// Attributes present in an interleaved vertex buffer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct VertexBufferType: u32 {
        const VERTEX = 0x0001;
        const NORMAL = 0x0002;
        const BITANGENT = 0x0004;
        const TANGENT = 0x0008;
        const TEXCOORD0 = 0x0010;
        const TEXCOORD1 = 0x0020;
        const BONE_INDICES0 = 0x0040;
        const BONE_INDICES1 = 0x0080;
        const BONE_WEIGHTS0 = 0x0100;
        const BONE_WEIGHTS1 = 0x0200;
        const BONE_NUMBERS = 0x0400;

        const TANGENTS = Self::BITANGENT.bits() | Self::TANGENT.bits();
        const BONES = Self::BONE_INDICES0.bits()
            | Self::BONE_INDICES1.bits()
            | Self::BONE_WEIGHTS0.bits()
            | Self::BONE_WEIGHTS1.bits()
            | Self::BONE_NUMBERS.bits();
    }
}

/// Canonical attribute order with byte widths.
pub const ATTRIBUTE_ORDER: [(VertexBufferType, u32); 11] = [
    (VertexBufferType::VERTEX, 16),
    (VertexBufferType::NORMAL, 12),
    (VertexBufferType::BITANGENT, 12),
    (VertexBufferType::TANGENT, 12),
    (VertexBufferType::TEXCOORD0, 8),
    (VertexBufferType::TEXCOORD1, 8),
    (VertexBufferType::BONE_INDICES0, 16),
    (VertexBufferType::BONE_INDICES1, 16),
    (VertexBufferType::BONE_WEIGHTS0, 16),
    (VertexBufferType::BONE_WEIGHTS1, 16),
    (VertexBufferType::BONE_NUMBERS, 4),
];

/// Byte width of a single attribute flag, 0 for composite or empty sets.
pub const fn attribute_size(attribute: VertexBufferType) -> u32 {
    let mut i = 0;
    while i < ATTRIBUTE_ORDER.len() {
        if ATTRIBUTE_ORDER[i].0.bits() == attribute.bits() {
            return ATTRIBUTE_ORDER[i].1;
        }
        i += 1;
    }
    0
}

/// Stride for an attribute set.
pub const fn vertex_stride(attributes: VertexBufferType) -> u32 {
    let mut stride = 0;
    let mut i = 0;
    while i < ATTRIBUTE_ORDER.len() {
        if attributes.contains(ATTRIBUTE_ORDER[i].0) {
            stride += ATTRIBUTE_ORDER[i].1;
        }
        i += 1;
    }
    stride
}

/// Stride and per-attribute offsets of one interleaved layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexLayout {
    attributes: VertexBufferType,
    stride: u32,
    offsets: [Option<u32>; 11],
}

impl VertexLayout {
    pub fn new(attributes: VertexBufferType) -> Self {
        let mut offsets = [None; 11];
        let mut offset = 0;
        for (slot, (flag, size)) in ATTRIBUTE_ORDER.iter().enumerate() {
            if attributes.contains(*flag) {
                offsets[slot] = Some(offset);
                offset += size;
            }
        }
        Self {
            attributes,
            stride: offset,
            offsets,
        }
    }

    pub fn attributes(&self) -> VertexBufferType {
        self.attributes
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Byte offset of a single attribute, `None` when absent.
    pub fn offset(&self, attribute: VertexBufferType) -> Option<u32> {
        ATTRIBUTE_ORDER
            .iter()
            .position(|(flag, _)| *flag == attribute)
            .and_then(|slot| self.offsets[slot])
    }

    /// Present attributes with their offsets and widths, in layout order.
    pub fn iter(&self) -> impl Iterator<Item = (VertexBufferType, u32, u32)> + '_ {
        ATTRIBUTE_ORDER
            .iter()
            .zip(self.offsets.iter())
            .filter_map(|((flag, size), offset)| offset.map(|o| (*flag, o, *size)))
    }
}

/// Human-readable attribute list, e.g. `VERTEX|NORMAL|TEXCOORD0`.
pub fn describe(attributes: VertexBufferType) -> String {
    let names: Vec<&str> = attributes.iter_names().map(|(name, _)| name).collect();
    if names.is_empty() {
        "NONE".to_string()
    } else {
        names.join("|")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_only() {
        let layout = VertexLayout::new(VertexBufferType::VERTEX);
        assert_eq!(layout.stride(), 16);
        assert_eq!(layout.offset(VertexBufferType::VERTEX), Some(0));
        assert_eq!(layout.offset(VertexBufferType::NORMAL), None);
    }

    #[test]
    fn test_canonical_order_offsets() {
        let attributes = VertexBufferType::VERTEX
            | VertexBufferType::NORMAL
            | VertexBufferType::TANGENTS
            | VertexBufferType::TEXCOORD0;
        let layout = VertexLayout::new(attributes);
        assert_eq!(layout.offset(VertexBufferType::VERTEX), Some(0));
        assert_eq!(layout.offset(VertexBufferType::NORMAL), Some(16));
        assert_eq!(layout.offset(VertexBufferType::BITANGENT), Some(28));
        assert_eq!(layout.offset(VertexBufferType::TANGENT), Some(40));
        assert_eq!(layout.offset(VertexBufferType::TEXCOORD0), Some(52));
        assert_eq!(layout.stride(), 60);
    }

    #[test]
    fn test_skinned_layout() {
        let attributes = VertexBufferType::VERTEX | VertexBufferType::BONES;
        let layout = VertexLayout::new(attributes);
        assert_eq!(layout.offset(VertexBufferType::BONE_INDICES0), Some(16));
        assert_eq!(layout.offset(VertexBufferType::BONE_INDICES1), Some(32));
        assert_eq!(layout.offset(VertexBufferType::BONE_WEIGHTS0), Some(48));
        assert_eq!(layout.offset(VertexBufferType::BONE_WEIGHTS1), Some(64));
        assert_eq!(layout.offset(VertexBufferType::BONE_NUMBERS), Some(80));
        assert_eq!(layout.stride(), 84);
    }

    #[test]
    fn test_stride_matches_sum_for_every_mask() {
        for bits in 0..(1u32 << 11) {
            let attributes = VertexBufferType::from_bits_truncate(bits);
            let layout = VertexLayout::new(attributes);

            let expected: u32 = ATTRIBUTE_ORDER
                .iter()
                .filter(|(flag, _)| attributes.contains(*flag))
                .map(|(_, size)| size)
                .sum();
            assert_eq!(layout.stride(), expected);
            assert_eq!(vertex_stride(attributes), expected);

            // Offsets are strictly increasing, in range and non-overlapping
            let mut end = 0;
            for (_, offset, size) in layout.iter() {
                assert!(offset < layout.stride());
                assert_eq!(offset, end);
                end = offset + size;
            }
            assert_eq!(end, layout.stride());
        }
    }

    #[test]
    fn test_attribute_size() {
        assert_eq!(attribute_size(VertexBufferType::VERTEX), 16);
        assert_eq!(attribute_size(VertexBufferType::BONE_NUMBERS), 4);
        assert_eq!(attribute_size(VertexBufferType::TANGENTS), 0);
    }

    #[test]
    fn test_describe() {
        assert_eq!(
            describe(VertexBufferType::VERTEX | VertexBufferType::TEXCOORD0),
            "VERTEX|TEXCOORD0"
        );
        assert_eq!(describe(VertexBufferType::empty()), "NONE");
    }
}
