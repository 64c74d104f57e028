use crate::core::symmetry::SymmetryEngine;
use crate::core::utils::comparer::NumericComparer;
use crate::core::utils::encoder::CrystalVector4;
use crate::core::utils::geometry::midpoint;
use nalgebra::Vector3;

/// Returns `true` if the running displacement sum of the path returns to the zero vector
/// before the path ends, starting from any of its positions.
pub fn is_ring_fractional(path: &[Vector3<f64>], comparer: &NumericComparer) -> bool {
    for start in 0..path.len() {
        let mut sum = Vector3::zeros();
        for window in path[start..].windows(2) {
            sum += window[1] - window[0];
            if comparer.is_zero_vector(&sum) {
                return true;
            }
        }
    }
    false
}

/// Integer variant of [`is_ring_fractional`] on 4D crystal coordinates.
pub fn is_ring_encoded(path: &[CrystalVector4]) -> bool {
    let zero = CrystalVector4::default();
    for start in 0..path.len() {
        let mut sum = zero;
        for window in path[start..].windows(2) {
            sum = sum + (window[1] - window[0]);
            if sum == zero {
                return true;
            }
        }
    }
    false
}

/// Midpoint of every consecutive position pair together with its full set of symmetry
/// equivalent positions (trimmed to the unit cell).
pub fn intermediate_positions(
    engine: &SymmetryEngine,
    sequence: &[Vector3<f64>],
) -> Vec<Vec<Vector3<f64>>> {
    sequence
        .windows(2)
        .map(|pair| engine.equivalent_positions(&midpoint(&pair[0], &pair[1])))
        .collect()
}

/// Checks that two sequences produce the same intermediate position sets, step by step.
pub fn intermediate_positions_consistent(
    engine: &SymmetryEngine,
    reference: &[Vector3<f64>],
    candidate: &[Vector3<f64>],
) -> bool {
    if reference.len() != candidate.len() {
        return false;
    }
    let lhs = intermediate_positions(engine, reference);
    let rhs = intermediate_positions(engine, candidate);
    lhs.iter()
        .zip(&rhs)
        .all(|(a, b)| engine.comparer().point_sets_eq(a, b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::symmetry::space_group::tests::cubic_point_group;

    fn v(x: f64, y: f64, z: f64) -> Vector3<f64> {
        Vector3::new(x, y, z)
    }

    #[test]
    fn straight_path_is_not_a_ring() {
        let comparer = NumericComparer::default();
        let path = [v(0.0, 0.0, 0.0), v(0.5, 0.0, 0.0), v(1.0, 0.0, 0.0)];
        assert!(!is_ring_fractional(&path, &comparer));
    }

    #[test]
    fn path_returning_to_start_is_a_ring() {
        let comparer = NumericComparer::default();
        let path = [
            v(0.0, 0.0, 0.0),
            v(1.0, 0.0, 0.0),
            v(1.0, 1.0, 0.0),
            v(0.0, 0.0, 0.0),
        ];
        assert!(is_ring_fractional(&path, &comparer));
    }

    #[test]
    fn ring_in_the_middle_of_a_path_is_detected() {
        let comparer = NumericComparer::default();
        let path = [
            v(0.0, 0.0, 0.0),
            v(1.0, 0.0, 0.0),
            v(1.0, 1.0, 0.0),
            v(1.0, 0.0, 0.0),
            v(2.0, 0.0, 0.0),
        ];
        assert!(is_ring_fractional(&path, &comparer));
    }

    #[test]
    fn encoded_ring_detection_matches_fractional() {
        let open = [
            CrystalVector4::new(0, 0, 0, 0),
            CrystalVector4::new(0, 0, 0, 1),
            CrystalVector4::new(1, 0, 0, 0),
        ];
        let closed = [
            CrystalVector4::new(0, 0, 0, 0),
            CrystalVector4::new(0, 0, 0, 1),
            CrystalVector4::new(0, 0, 0, 0),
        ];
        assert!(!is_ring_encoded(&open));
        assert!(is_ring_encoded(&closed));
    }

    #[test]
    fn intermediate_positions_of_cubic_edge_are_the_edge_centers() {
        let engine = SymmetryEngine::new(cubic_point_group(), NumericComparer::default());
        let sets = intermediate_positions(&engine, &[v(0.0, 0.0, 0.0), v(1.0, 0.0, 0.0)]);
        assert_eq!(sets.len(), 1);
        // 0.5 and -0.5 trim to the same coordinate, leaving the three edge centers.
        assert_eq!(sets[0].len(), 3);
    }

    #[test]
    fn symmetry_images_have_consistent_intermediates() {
        let engine = SymmetryEngine::new(cubic_point_group(), NumericComparer::default());
        let reference = [v(0.0, 0.0, 0.0), v(1.0, 0.0, 0.0)];
        let image = [v(0.0, 0.0, 0.0), v(0.0, -1.0, 0.0)];
        let other = [v(0.0, 0.0, 0.0), v(0.5, 0.5, 0.0)];
        assert!(intermediate_positions_consistent(&engine, &reference, &image));
        assert!(!intermediate_positions_consistent(&engine, &reference, &other));
    }
}
