use super::comparer::NumericComparer;
use nalgebra::{Matrix3, Vector3};
use serde::Deserialize;

pub fn trim_coordinate(value: f64, comparer: &NumericComparer) -> f64 {
    let trimmed = value - value.floor();
    if comparer.eq(trimmed, 1.0) || comparer.is_zero(trimmed) {
        0.0
    } else {
        trimmed
    }
}

/// Maps a fractional vector into the origin unit cell `[0, 1)`.
///
/// Coordinates within tolerance of a cell boundary snap to `0.0`, so `0.9999999` and
/// `1.0000001` both trim to the same origin-cell coordinate.
pub fn trim_to_unit_cell(vector: &Vector3<f64>, comparer: &NumericComparer) -> Vector3<f64> {
    vector.map(|value| trim_coordinate(value, comparer))
}

pub fn cell_offset_coordinate(value: f64, comparer: &NumericComparer) -> i32 {
    let floor = value.floor();
    if comparer.eq(value, floor + 1.0) {
        floor as i32 + 1
    } else {
        floor as i32
    }
}

/// Returns the integer cell a fractional vector lies in, honoring the boundary tolerance.
pub fn cell_offset(vector: &Vector3<f64>, comparer: &NumericComparer) -> Vector3<i32> {
    vector.map(|value| cell_offset_coordinate(value, comparer))
}

pub fn midpoint(lhs: &Vector3<f64>, rhs: &Vector3<f64>) -> Vector3<f64> {
    (lhs + rhs) * 0.5
}

pub fn to_fractional_offset(offset: &Vector3<i32>) -> Vector3<f64> {
    offset.map(f64::from)
}

/// Rounds a near-integer translation to exact integers.
pub fn round_translation(shift: &Vector3<f64>) -> Vector3<f64> {
    shift.map(f64::round)
}

/// Lattice constants (lengths in Angstrom, angles in degrees) of the crystal unit cell.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CellParameters {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    #[serde(default = "right_angle")]
    pub alpha: f64,
    #[serde(default = "right_angle")]
    pub beta: f64,
    #[serde(default = "right_angle")]
    pub gamma: f64,
}

fn right_angle() -> f64 {
    90.0
}

impl Default for CellParameters {
    fn default() -> Self {
        Self::cubic(1.0)
    }
}

impl CellParameters {
    pub fn cubic(a: f64) -> Self {
        Self {
            a,
            b: a,
            c: a,
            alpha: 90.0,
            beta: 90.0,
            gamma: 90.0,
        }
    }

    pub fn is_valid(&self) -> bool {
        let lengths_ok = [self.a, self.b, self.c]
            .iter()
            .all(|v| v.is_finite() && *v > 0.0);
        let angles_ok = [self.alpha, self.beta, self.gamma]
            .iter()
            .all(|v| v.is_finite() && *v > 0.0 && *v < 180.0);
        lengths_ok && angles_ok && self.volume_factor() > 0.0
    }

    fn volume_factor(&self) -> f64 {
        let (ca, cb, cg) = (
            self.alpha.to_radians().cos(),
            self.beta.to_radians().cos(),
            self.gamma.to_radians().cos(),
        );
        1.0 - ca * ca - cb * cb - cg * cg + 2.0 * ca * cb * cg
    }

    /// Column matrix of the cell base vectors in cartesian space, with `a` along x and
    /// `b` in the xy-plane.
    pub fn to_cartesian_matrix(&self) -> Matrix3<f64> {
        let (ca, cb, cg) = (
            self.alpha.to_radians().cos(),
            self.beta.to_radians().cos(),
            self.gamma.to_radians().cos(),
        );
        let sg = self.gamma.to_radians().sin();
        let cy = (ca - cb * cg) / sg;
        let cz = (1.0 - cb * cb - cy * cy).max(0.0).sqrt();

        let va = Vector3::new(self.a, 0.0, 0.0);
        let vb = Vector3::new(self.b * cg, self.b * sg, 0.0);
        let vc = Vector3::new(self.c * cb, self.c * cy, self.c * cz);
        Matrix3::from_columns(&[va, vb, vc])
    }

    pub fn to_cartesian(&self, fractional: &Vector3<f64>) -> Vector3<f64> {
        self.to_cartesian_matrix() * fractional
    }

    pub fn distance(&self, from: &Vector3<f64>, to: &Vector3<f64>) -> f64 {
        self.to_cartesian(&(to - from)).norm()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comparer() -> NumericComparer {
        NumericComparer::new(1.0e-6)
    }

    #[test]
    fn trimming_maps_into_origin_cell_and_snaps_boundaries() {
        let trimmed = trim_to_unit_cell(&Vector3::new(1.25, -0.25, 0.9999999), &comparer());
        assert!((trimmed.x - 0.25).abs() < 1e-12);
        assert!((trimmed.y - 0.75).abs() < 1e-12);
        assert_eq!(trimmed.z, 0.0);
    }

    #[test]
    fn cell_offset_respects_tolerance_below_integer() {
        let offset = cell_offset(&Vector3::new(0.9999999, -0.5, 2.0), &comparer());
        assert_eq!(offset, Vector3::new(1, -1, 2));
    }

    #[test]
    fn cubic_cell_distance_is_scaled_fractional_norm() {
        let cell = CellParameters::cubic(3.0);
        let d = cell.distance(&Vector3::zeros(), &Vector3::new(1.0, 0.0, 0.0));
        assert!((d - 3.0).abs() < 1e-12);
    }

    #[test]
    fn hexagonal_cell_places_b_at_120_degrees() {
        let cell = CellParameters {
            a: 2.0,
            b: 2.0,
            c: 5.0,
            alpha: 90.0,
            beta: 90.0,
            gamma: 120.0,
        };
        let b = cell.to_cartesian(&Vector3::new(0.0, 1.0, 0.0));
        assert!((b.x + 1.0).abs() < 1e-12);
        assert!((b.norm() - 2.0).abs() < 1e-12);
        assert!(cell.is_valid());
    }

    #[test]
    fn degenerate_angles_are_invalid() {
        let cell = CellParameters {
            alpha: 180.0,
            ..CellParameters::cubic(1.0)
        };
        assert!(!cell.is_valid());
    }
}
