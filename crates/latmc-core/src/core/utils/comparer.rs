use nalgebra::Vector3;
use std::cmp::Ordering;

pub const DEFAULT_GEOMETRY_TOLERANCE: f64 = 1.0e-6;

/// Tolerance-aware comparison for floating point values and fractional vectors.
///
/// Two values whose absolute difference does not exceed the tolerance compare as equal.
/// Vectors are ordered lexicographically over their components, which gives the
/// deterministic ordering the context builders rely on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumericComparer {
    tolerance: f64,
}

impl Default for NumericComparer {
    fn default() -> Self {
        Self::new(DEFAULT_GEOMETRY_TOLERANCE)
    }
}

impl NumericComparer {
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance: tolerance.abs(),
        }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn compare(&self, lhs: f64, rhs: f64) -> Ordering {
        let diff = lhs - rhs;
        if diff.abs() <= self.tolerance {
            Ordering::Equal
        } else if diff < 0.0 {
            Ordering::Less
        } else {
            Ordering::Greater
        }
    }

    #[inline]
    pub fn eq(&self, lhs: f64, rhs: f64) -> bool {
        self.compare(lhs, rhs) == Ordering::Equal
    }

    #[inline]
    pub fn is_zero(&self, value: f64) -> bool {
        value.abs() <= self.tolerance
    }

    pub fn compare_vectors(&self, lhs: &Vector3<f64>, rhs: &Vector3<f64>) -> Ordering {
        self.compare(lhs.x, rhs.x)
            .then_with(|| self.compare(lhs.y, rhs.y))
            .then_with(|| self.compare(lhs.z, rhs.z))
    }

    #[inline]
    pub fn vectors_eq(&self, lhs: &Vector3<f64>, rhs: &Vector3<f64>) -> bool {
        self.compare_vectors(lhs, rhs) == Ordering::Equal
    }

    pub fn is_zero_vector(&self, vector: &Vector3<f64>) -> bool {
        self.is_zero(vector.x) && self.is_zero(vector.y) && self.is_zero(vector.z)
    }

    pub fn position_of(&self, set: &[Vector3<f64>], vector: &Vector3<f64>) -> Option<usize> {
        set.iter().position(|item| self.vectors_eq(item, vector))
    }

    pub fn contains(&self, set: &[Vector3<f64>], vector: &Vector3<f64>) -> bool {
        self.position_of(set, vector).is_some()
    }

    /// Ordered sequence equality.
    pub fn sequences_eq(&self, lhs: &[Vector3<f64>], rhs: &[Vector3<f64>]) -> bool {
        lhs.len() == rhs.len()
            && lhs
                .iter()
                .zip(rhs.iter())
                .all(|(a, b)| self.vectors_eq(a, b))
    }

    /// Unordered equality of two point sets of the same length.
    pub fn point_sets_eq(&self, lhs: &[Vector3<f64>], rhs: &[Vector3<f64>]) -> bool {
        lhs.len() == rhs.len()
            && lhs.iter().all(|a| self.contains(rhs, a))
            && rhs.iter().all(|b| self.contains(lhs, b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_within_tolerance_compare_equal() {
        let comparer = NumericComparer::new(1.0e-6);
        assert_eq!(comparer.compare(0.5, 0.5 + 5.0e-7), Ordering::Equal);
        assert_eq!(comparer.compare(0.5, 0.6), Ordering::Less);
        assert_eq!(comparer.compare(0.6, 0.5), Ordering::Greater);
    }

    #[test]
    fn negative_tolerance_is_treated_as_absolute() {
        let comparer = NumericComparer::new(-1.0e-3);
        assert_eq!(comparer.tolerance(), 1.0e-3);
        assert!(comparer.eq(1.0, 1.0005));
    }

    #[test]
    fn vectors_order_lexicographically() {
        let comparer = NumericComparer::default();
        let a = Vector3::new(0.0, 0.5, 0.0);
        let b = Vector3::new(0.0, 0.5, 0.25);
        let c = Vector3::new(0.25, 0.0, 0.0);
        assert_eq!(comparer.compare_vectors(&a, &b), Ordering::Less);
        assert_eq!(comparer.compare_vectors(&c, &b), Ordering::Greater);
        assert!(comparer.vectors_eq(&a, &Vector3::new(1.0e-9, 0.5, -1.0e-9)));
    }

    #[test]
    fn point_sets_ignore_order_but_sequences_do_not() {
        let comparer = NumericComparer::default();
        let lhs = [Vector3::new(1.0, 0.0, 0.0), Vector3::new(0.0, 1.0, 0.0)];
        let rhs = [Vector3::new(0.0, 1.0, 0.0), Vector3::new(1.0, 0.0, 0.0)];
        assert!(comparer.point_sets_eq(&lhs, &rhs));
        assert!(!comparer.sequences_eq(&lhs, &rhs));
        assert!(comparer.sequences_eq(&lhs, &lhs));
    }
}
