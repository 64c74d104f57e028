use bytemuck::{Pod, Zeroable};
use std::fmt::Debug;
use std::mem::size_of;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InteropError {
    #[error("Size contract violated for '{record}': expected {expected} bytes, got {actual}")]
    SizeContract {
        record: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("Blob length mismatch: header announces {expected} bytes, found {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("Corrupt blob header: {0}")]
    CorruptHeader(String),
    #[error("Unknown blob type tag: {0}")]
    UnknownTypeTag(u32),
    #[error("Blob of kind '{kind}' does not hold elements of {element_size} bytes")]
    ElementMismatch {
        kind: &'static str,
        element_size: usize,
    },
}

/// A fixed-layout record shared with the native simulation engine.
///
/// Records are plain `#[repr(C)]` values whose byte image is the wire format. The size is
/// checked on every encode and decode.
pub trait InteropRecord: Pod + Debug {
    const NAME: &'static str;
    const SIZE: usize;

    fn encode(&self) -> Result<Vec<u8>, InteropError> {
        let bytes = bytemuck::bytes_of(self);
        if bytes.len() != Self::SIZE {
            return Err(InteropError::SizeContract {
                record: Self::NAME,
                expected: Self::SIZE,
                actual: bytes.len(),
            });
        }
        Ok(bytes.to_vec())
    }

    fn decode(bytes: &[u8]) -> Result<Self, InteropError> {
        if bytes.len() != Self::SIZE || size_of::<Self>() != Self::SIZE {
            return Err(InteropError::SizeContract {
                record: Self::NAME,
                expected: Self::SIZE,
                actual: bytes.len(),
            });
        }
        Ok(bytemuck::pod_read_unaligned(bytes))
    }
}

macro_rules! interop_record {
    ($ty:ty, $name:literal, $size:literal) => {
        const _: () = assert!(size_of::<$ty>() == $size);

        impl InteropRecord for $ty {
            const NAME: &'static str = $name;
            const SIZE: usize = $size;
        }
    };
}

/// Jump rule: packed start, transition and final state codes followed by the rule physics
/// and the tracker reorder buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct JumpRuleRecord {
    pub start_state: i64,
    pub transition_state: i64,
    pub final_state: i64,
    pub frequency_factor: f64,
    pub field_factor: f64,
    pub static_correction: f64,
    pub tracker_order: [u8; 8],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct JumpLinkRecord {
    pub path_id: i32,
    pub link_id: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MoveVectorRecord {
    pub vector: [f64; 3],
    pub tracker_id: i32,
    pub padding: [u8; 4],
}

/// Shape of a multi-dimensional table: rank and up to four dimension lengths.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct ArrayDescriptor {
    pub rank: i32,
    pub dimensions: [i32; 4],
}

impl ArrayDescriptor {
    pub fn new(dimensions: &[i32]) -> Self {
        let mut dims = [0; 4];
        for (slot, value) in dims.iter_mut().zip(dimensions) {
            *slot = *value;
        }
        Self {
            rank: dimensions.len().min(4) as i32,
            dimensions: dims,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct LatticeInfoRecord {
    /// Supercell size `(a, b, c)` and the number of positions per unit cell.
    pub size_vector: [i32; 4],
    pub mobiles_count: i32,
    pub selectables_count: i32,
    /// Shape of the lattice buffer `(a, b, c, positions)`.
    pub lattice: ArrayDescriptor,
    /// Shape of the background table `(positions, particles)`.
    pub background: ArrayDescriptor,
    pub padding: [u8; 8],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct PairDefinitionRecord {
    pub relative: [i32; 4],
    pub table_id: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct ClusterDefinitionRecord {
    pub pair_ids: [i32; 8],
    pub table_id: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct JumpDirectionRecord {
    pub object_id: i32,
    pub position_id: i32,
    pub collection_id: i32,
    pub jump_length: i32,
    pub field_projection: f64,
    /// Relative 4D path, unused slots zero.
    pub sequence: [[i32; 4]; 8],
}

/// Particle index to compact table row; `0xFF` marks particles without a row.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct ParticleBufferRecord {
    pub entries: [u8; 64],
}

impl ParticleBufferRecord {
    pub const UNUSED: u8 = 0xFF;

    pub fn unused() -> Self {
        Self {
            entries: [Self::UNUSED; 64],
        }
    }
}

interop_record!(JumpRuleRecord, "jump rule", 56);
interop_record!(JumpLinkRecord, "jump link", 8);
interop_record!(MoveVectorRecord, "move vector", 32);
interop_record!(LatticeInfoRecord, "lattice info", 72);
interop_record!(PairDefinitionRecord, "pair definition", 20);
interop_record!(ClusterDefinitionRecord, "cluster definition", 36);
interop_record!(JumpDirectionRecord, "jump direction", 152);
interop_record!(ParticleBufferRecord, "particle buffer", 64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jump_rule_encodes_to_56_bytes_and_back() {
        let record = JumpRuleRecord {
            start_state: 10,
            transition_state: 20,
            final_state: 10,
            frequency_factor: 0.5,
            field_factor: 1.0,
            static_correction: 0.0,
            tracker_order: [0; 8],
        };
        let bytes = record.encode().unwrap();
        assert_eq!(bytes.len(), 56);
        let decoded = JumpRuleRecord::decode(&bytes).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.encode().unwrap(), bytes);
    }

    #[test]
    fn decode_rejects_wrong_length() {
        let result = JumpLinkRecord::decode(&[0u8; 7]);
        assert_eq!(
            result,
            Err(InteropError::SizeContract {
                record: "jump link",
                expected: 8,
                actual: 7
            })
        );
    }

    #[test]
    fn lattice_info_keeps_field_order() {
        let record = LatticeInfoRecord {
            size_vector: [4, 4, 4, 1],
            mobiles_count: 64,
            selectables_count: 48,
            lattice: ArrayDescriptor::new(&[4, 4, 4, 1]),
            background: ArrayDescriptor::new(&[1, 3]),
            padding: [0; 8],
        };
        let bytes = record.encode().unwrap();
        assert_eq!(bytes.len(), 72);
        assert_eq!(i32::from_ne_bytes(bytes[16..20].try_into().unwrap()), 64);
        assert_eq!(i32::from_ne_bytes(bytes[24..28].try_into().unwrap()), 4);
        assert_eq!(i32::from_ne_bytes(bytes[44..48].try_into().unwrap()), 2);
        assert_eq!(LatticeInfoRecord::decode(&bytes).unwrap(), record);
    }

    #[test]
    fn jump_direction_and_move_vector_sizes() {
        let direction = JumpDirectionRecord {
            object_id: 3,
            position_id: 1,
            collection_id: 0,
            jump_length: 2,
            field_projection: -0.25,
            sequence: [[0; 4]; 8],
        };
        assert_eq!(direction.encode().unwrap().len(), 152);
        let vector = MoveVectorRecord {
            vector: [1.0, 0.0, -1.0],
            tracker_id: 7,
            padding: [0; 4],
        };
        let bytes = vector.encode().unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(MoveVectorRecord::decode(&bytes).unwrap(), vector);
    }

    #[test]
    fn particle_buffer_defaults_to_unused() {
        let buffer = ParticleBufferRecord::unused();
        assert!(buffer.entries.iter().all(|b| *b == ParticleBufferRecord::UNUSED));
        assert_eq!(buffer.encode().unwrap().len(), 64);
    }
}
