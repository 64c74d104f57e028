use super::operation::{SymmetryError, SymmetryOperation};
use crate::core::utils::comparer::NumericComparer;
use crate::core::utils::geometry::{cell_offset, round_translation, to_fractional_offset, trim_to_unit_cell};
use nalgebra::Vector3;
use tracing::trace;

/// A validated set of symmetry operations.
#[derive(Debug, Clone, PartialEq)]
pub struct SpaceGroup {
    index: u32,
    name: String,
    operations: Vec<SymmetryOperation>,
}

impl SpaceGroup {
    pub fn new(
        index: u32,
        name: impl Into<String>,
        operations: Vec<SymmetryOperation>,
        comparer: &NumericComparer,
    ) -> Result<Self, SymmetryError> {
        let name = name.into();
        if operations.is_empty() {
            return Err(SymmetryError::EmptyGroup { group: name });
        }
        if !operations.iter().any(|op| op.is_identity(comparer)) {
            return Err(SymmetryError::MissingIdentity { group: name });
        }
        for op in &operations {
            let determinant = op.determinant();
            if !comparer.eq(determinant.abs(), 1.0) {
                return Err(SymmetryError::InvalidRotation {
                    literal: op.literal().to_string(),
                    determinant,
                });
            }
        }
        Ok(Self {
            index,
            name,
            operations,
        })
    }

    pub fn from_literals<S: AsRef<str>>(
        index: u32,
        name: impl Into<String>,
        literals: &[S],
        comparer: &NumericComparer,
    ) -> Result<Self, SymmetryError> {
        let operations = literals
            .iter()
            .map(|literal| SymmetryOperation::parse(literal.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(index, name, operations, comparer)
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn operations(&self) -> &[SymmetryOperation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// One image position of a Wyckoff dictionary and the operations (by group index) that
/// produce it from the source position.
#[derive(Debug, Clone, PartialEq)]
pub struct WyckoffEntry {
    pub position: Vector3<f64>,
    pub operations: Vec<usize>,
}

/// Maps every symmetry image of a source position to the operations producing it.
#[derive(Debug, Clone, PartialEq)]
pub struct WyckoffDictionary {
    pub source: Vector3<f64>,
    pub entries: Vec<WyckoffEntry>,
}

impl WyckoffDictionary {
    pub fn positions(&self) -> impl Iterator<Item = &Vector3<f64>> {
        self.entries.iter().map(|entry| &entry.position)
    }

    /// Site symmetry order: number of operations mapping the source onto itself.
    pub fn site_symmetry_order(&self) -> usize {
        self.entries.first().map_or(0, |entry| entry.operations.len())
    }
}

/// Applies a space group to fractional positions and point sequences.
///
/// Every result is ordered by first discovery while iterating the operations in their
/// definition order, so identical input always yields identical output.
#[derive(Debug, Clone)]
pub struct SymmetryEngine {
    group: SpaceGroup,
    comparer: NumericComparer,
}

impl SymmetryEngine {
    pub fn new(group: SpaceGroup, comparer: NumericComparer) -> Self {
        Self { group, comparer }
    }

    pub fn group(&self) -> &SpaceGroup {
        &self.group
    }

    pub fn comparer(&self) -> &NumericComparer {
        &self.comparer
    }

    pub fn equivalent_positions(&self, position: &Vector3<f64>) -> Vec<Vector3<f64>> {
        self.operation_dictionary(position)
            .entries
            .into_iter()
            .map(|entry| entry.position)
            .collect()
    }

    pub fn operation_dictionary(&self, position: &Vector3<f64>) -> WyckoffDictionary {
        let source = trim_to_unit_cell(position, &self.comparer);
        let mut entries: Vec<WyckoffEntry> = Vec::new();
        for (index, op) in self.group.operations().iter().enumerate() {
            let image = op.apply_trimmed(&source, &self.comparer);
            match entries
                .iter_mut()
                .find(|entry| self.comparer.vectors_eq(&entry.position, &image))
            {
                Some(entry) => entry.operations.push(index),
                None => entries.push(WyckoffEntry {
                    position: image,
                    operations: vec![index],
                }),
            }
        }
        // The identity keeps the source first regardless of where it sits in the group.
        if let Some(pos) = entries
            .iter()
            .position(|entry| self.comparer.vectors_eq(&entry.position, &source))
        {
            let entry = entries.remove(pos);
            entries.insert(0, entry);
        }
        trace!(images = entries.len(), "Built Wyckoff dictionary.");
        WyckoffDictionary { source, entries }
    }

    /// All operations that map `position` onto itself, each corrected by the lattice
    /// translation that keeps the image in the cell of the source.
    pub fn self_projection_operations(&self, position: &Vector3<f64>) -> Vec<SymmetryOperation> {
        self.group
            .operations()
            .iter()
            .filter_map(|op| {
                let image = op.apply(position);
                let shift = round_translation(&(position - image));
                self.comparer
                    .is_zero_vector(&(position - image - shift))
                    .then(|| op.shifted(&shift))
            })
            .collect()
    }

    /// Finds the first operation that maps `source` onto `target` exactly, including the
    /// lattice translation between their cells.
    pub fn operation_to_target(
        &self,
        source: &Vector3<f64>,
        target: &Vector3<f64>,
    ) -> Option<SymmetryOperation> {
        self.group.operations().iter().find_map(|op| {
            let image = op.apply(source);
            let shift = round_translation(&(target - image));
            self.comparer
                .is_zero_vector(&(target - image - shift))
                .then(|| op.shifted(&shift))
        })
    }

    /// Images of a point sequence under the site symmetry of `origin`, keeping one sequence
    /// per distinct point set.
    pub fn unique_point_sequences(
        &self,
        origin: &Vector3<f64>,
        points: &[Vector3<f64>],
    ) -> Vec<Vec<Vector3<f64>>> {
        let mut result: Vec<Vec<Vector3<f64>>> = Vec::new();
        for op in self.self_projection_operations(origin) {
            let image = op.apply_sequence(points);
            if !result
                .iter()
                .any(|known| self.comparer.point_sets_eq(known, &image))
            {
                result.push(image);
            }
        }
        result
    }

    /// Index permutations under which the site symmetry of `origin` maps `points` onto
    /// itself. Entry `order[i] = j` means point `i` is carried onto point `j`.
    pub fn projection_orders(&self, origin: &Vector3<f64>, points: &[Vector3<f64>]) -> Vec<Vec<usize>> {
        let mut orders: Vec<Vec<usize>> = Vec::new();
        for op in self.self_projection_operations(origin) {
            let order: Option<Vec<usize>> = points
                .iter()
                .map(|point| self.comparer.position_of(points, &op.apply(point)))
                .collect();
            if let Some(order) = order {
                if !orders.contains(&order) {
                    orders.push(order);
                }
            }
        }
        orders
    }

    /// All symmetry images of an ordered path, each shifted so its first point lies in the
    /// origin cell. Sequences are compared in order, so a path and its reverse are distinct.
    pub fn path_realizations(&self, path: &[Vector3<f64>]) -> Vec<Vec<Vector3<f64>>> {
        let mut result: Vec<Vec<Vector3<f64>>> = Vec::new();
        let Some(first) = path.first() else {
            return result;
        };
        for op in self.group.operations() {
            let start = op.apply(first);
            let shift = -to_fractional_offset(&cell_offset(&start, &self.comparer));
            let image: Vec<Vector3<f64>> = path.iter().map(|p| op.apply(p) + shift).collect();
            if !result
                .iter()
                .any(|known| self.comparer.sequences_eq(known, &image))
            {
                result.push(image);
            }
        }
        result
    }
}
