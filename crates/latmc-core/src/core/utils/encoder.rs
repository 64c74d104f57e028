use super::comparer::NumericComparer;
use super::geometry::{CellParameters, cell_offset, to_fractional_offset, trim_to_unit_cell};
use nalgebra::Vector3;
use std::ops::{Add, Sub};

/// Integer crystal coordinate: unit cell offset `(a, b, c)` plus the index `p` of the
/// position inside the unit cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct CrystalVector4 {
    pub a: i32,
    pub b: i32,
    pub c: i32,
    pub p: i32,
}

impl CrystalVector4 {
    pub const fn new(a: i32, b: i32, c: i32, p: i32) -> Self {
        Self { a, b, c, p }
    }

    pub fn cell(&self) -> Vector3<i32> {
        Vector3::new(self.a, self.b, self.c)
    }

    /// Same position index, moved by a cell offset.
    pub fn shifted(&self, offset: &Vector3<i32>) -> Self {
        Self::new(self.a + offset.x, self.b + offset.y, self.c + offset.z, self.p)
    }

    pub fn to_array(&self) -> [i32; 4] {
        [self.a, self.b, self.c, self.p]
    }
}

impl Add for CrystalVector4 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.a + rhs.a, self.b + rhs.b, self.c + rhs.c, self.p + rhs.p)
    }
}

impl Sub for CrystalVector4 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.a - rhs.a, self.b - rhs.b, self.c - rhs.c, self.p - rhs.p)
    }
}

/// Translates between fractional vectors and 4D crystal coordinates using the extended
/// (symmetry-expanded) list of unit cell positions.
#[derive(Debug, Clone)]
pub struct VectorEncoder {
    positions: Vec<Vector3<f64>>,
    cell: CellParameters,
    comparer: NumericComparer,
}

impl VectorEncoder {
    pub fn new(positions: Vec<Vector3<f64>>, cell: CellParameters, comparer: NumericComparer) -> Self {
        Self {
            positions,
            cell,
            comparer,
        }
    }

    pub fn positions(&self) -> &[Vector3<f64>] {
        &self.positions
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn cell(&self) -> &CellParameters {
        &self.cell
    }

    pub fn comparer(&self) -> &NumericComparer {
        &self.comparer
    }

    pub fn encode(&self, vector: &Vector3<f64>) -> Option<CrystalVector4> {
        let offset = cell_offset(vector, &self.comparer);
        let inner = trim_to_unit_cell(&(vector - to_fractional_offset(&offset)), &self.comparer);
        let p = self.comparer.position_of(&self.positions, &inner)?;
        Some(CrystalVector4::new(offset.x, offset.y, offset.z, p as i32))
    }

    pub fn encode_sequence(&self, vectors: &[Vector3<f64>]) -> Option<Vec<CrystalVector4>> {
        vectors.iter().map(|v| self.encode(v)).collect()
    }

    pub fn decode(&self, vector: &CrystalVector4) -> Option<Vector3<f64>> {
        let base = self.positions.get(usize::try_from(vector.p).ok()?)?;
        Some(base + to_fractional_offset(&vector.cell()))
    }

    pub fn decode_sequence(&self, vectors: &[CrystalVector4]) -> Option<Vec<Vector3<f64>>> {
        vectors.iter().map(|v| self.decode(v)).collect()
    }

    pub fn to_cartesian(&self, fractional: &Vector3<f64>) -> Vector3<f64> {
        self.cell.to_cartesian(fractional)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoder() -> VectorEncoder {
        VectorEncoder::new(
            vec![Vector3::new(0.0, 0.0, 0.0), Vector3::new(0.5, 0.5, 0.5)],
            CellParameters::cubic(4.0),
            NumericComparer::default(),
        )
    }

    #[test]
    fn encode_splits_cell_offset_and_position_index() {
        let encoded = encoder().encode(&Vector3::new(-0.5, 1.5, 0.5)).unwrap();
        assert_eq!(encoded, CrystalVector4::new(-1, 1, 0, 1));
    }

    #[test]
    fn encode_fails_for_vectors_off_the_lattice() {
        assert!(encoder().encode(&Vector3::new(0.25, 0.0, 0.0)).is_none());
    }

    #[test]
    fn decode_inverts_encode() {
        let enc = encoder();
        let source = Vector3::new(2.0, -1.0, 0.0);
        let decoded = enc.decode(&enc.encode(&source).unwrap()).unwrap();
        assert!(enc.comparer().vectors_eq(&decoded, &source));
    }

    #[test]
    fn decode_rejects_unknown_position_index() {
        assert!(encoder().decode(&CrystalVector4::new(0, 0, 0, 7)).is_none());
        assert!(encoder().decode(&CrystalVector4::new(0, 0, 0, -1)).is_none());
    }
}
