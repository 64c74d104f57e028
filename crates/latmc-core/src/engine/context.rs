use super::config::BuildConfig;
use super::error::EngineError;
use super::ids::{
    EnvironmentId, GroupEnergyId, GroupModelId, MappingId, PairEnergyId, PairModelId, RuleId,
    TransitionId,
};
use super::progress::ProgressReporter;
use crate::core::analysis::rules::{MovementFlags, TransitionRule};
use crate::core::models::energy::PairKind;
use crate::core::models::ports::ReferencePort;
use crate::core::models::simulation::SimulationKind;
use crate::core::symmetry::{SymmetryEngine, SymmetryOperation, WyckoffDictionary};
use crate::core::utils::encoder::{CrystalVector4, VectorEncoder};
use nalgebra::{DMatrix, Vector3};
use slotmap::{SecondaryMap, SlotMap};
use std::collections::BTreeMap;

/// Borrowed inputs shared by every builder of one pass.
#[derive(Clone, Copy)]
pub struct BuildScope<'a, P>
where
    P: ReferencePort + ?Sized,
{
    pub reference: &'a P,
    pub config: &'a BuildConfig,
    pub reporter: &'a ProgressReporter<'a>,
}

impl<'a, P> BuildScope<'a, P>
where
    P: ReferencePort + ?Sized,
{
    pub fn new(reference: &'a P, config: &'a BuildConfig, reporter: &'a ProgressReporter<'a>) -> Self {
        Self {
            reference,
            config,
            reporter,
        }
    }
}

// ----------------------------------------------------------------------------------------
// Structure
// ----------------------------------------------------------------------------------------

/// The symmetry-transformed neighbourhood of one reference site.
#[derive(Debug, Clone)]
pub struct EnvironmentModel {
    pub site: usize,
    pub dictionary: WyckoffDictionary,
    pub pair_models: Vec<PairModelId>,
    pub group_models: Vec<GroupModelId>,
}

#[derive(Debug, Clone)]
pub struct PairInteractionModel {
    /// Canonical index shared by the whole equivalence class.
    pub model_id: usize,
    pub environment: EnvironmentId,
    pub interaction: usize,
    /// The environment site is the second site of the reference interaction.
    pub inverted: bool,
    pub center: Vector3<f64>,
    pub target: Vector3<f64>,
    pub target_site: usize,
    pub distance: f64,
    pub equivalent_models: Vec<PairModelId>,
}

#[derive(Debug, Clone)]
pub struct GroupInteractionModel {
    pub model_id: usize,
    pub environment: EnvironmentId,
    pub interaction: usize,
    pub center: Vector3<f64>,
    pub partners: Vec<Vector3<f64>>,
    /// Index of each partner's pair model in the environment, `-1` for unused slots.
    pub pair_index_coding: [i32; 8],
    pub equivalent_models: Vec<GroupModelId>,
}

/// A pair target seen from one concrete unit cell position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetInfo {
    pub pair_model: PairModelId,
    pub model_id: usize,
    /// Target cell offset relative to the center cell, and the target position index.
    pub relative: CrystalVector4,
}

#[derive(Debug, Clone)]
pub struct PositionModel {
    pub p: usize,
    pub site: usize,
    pub environment: EnvironmentId,
    /// Maps the site's reference position onto this position.
    pub operation: SymmetryOperation,
    pub targets: Vec<TargetInfo>,
}

#[derive(Debug, Clone)]
pub struct StructureContext {
    pub symmetry: SymmetryEngine,
    pub encoder: VectorEncoder,
    /// Site index of every unit cell position `P`.
    pub position_sites: Vec<usize>,
    pub environments: SlotMap<EnvironmentId, EnvironmentModel>,
    pub environment_by_site: BTreeMap<usize, EnvironmentId>,
    pub pair_models: SlotMap<PairModelId, PairInteractionModel>,
    pub group_models: SlotMap<GroupModelId, GroupInteractionModel>,
    pub position_models: Vec<PositionModel>,
    /// Representative of every pair class, indexed by `model_id`.
    pub pair_classes: Vec<PairModelId>,
    pub group_classes: Vec<GroupModelId>,
}

impl StructureContext {
    pub fn position_count(&self) -> usize {
        self.position_sites.len()
    }

    pub fn positions_of_site(&self, site: usize) -> Vec<usize> {
        self.position_sites
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == site)
            .map(|(p, _)| p)
            .collect()
    }
}

// ----------------------------------------------------------------------------------------
// Energy
// ----------------------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PairEnergyModel {
    pub model_id: usize,
    pub interaction: usize,
    pub kind: PairKind,
    pub inverted: bool,
    /// `table[(center, partner)]` over all particle indices.
    pub table: DMatrix<f64>,
}

#[derive(Debug, Clone)]
pub struct GroupEnergyModel {
    pub model_id: usize,
    pub interaction: usize,
    /// Center particle to table row.
    pub redirection: BTreeMap<usize, usize>,
    /// Sorted occupation codes of the partner positions, one table column each.
    pub occupation_codes: Vec<i64>,
    pub table: DMatrix<f64>,
}

impl GroupEnergyModel {
    pub fn energy(&self, center: usize, code: i64) -> Option<f64> {
        let row = *self.redirection.get(&center)?;
        let col = self.occupation_codes.binary_search(&code).ok()?;
        Some(self.table[(row, col)])
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnergyContext {
    pub pair_energies: SlotMap<PairEnergyId, PairEnergyModel>,
    pub group_energies: SlotMap<GroupEnergyId, GroupEnergyModel>,
    pub pair_links: SecondaryMap<PairModelId, PairEnergyId>,
    pub group_links: SecondaryMap<GroupModelId, GroupEnergyId>,
    /// Energy models in `model_id` order.
    pub pair_order: Vec<PairEnergyId>,
    pub group_order: Vec<GroupEnergyId>,
}

// ----------------------------------------------------------------------------------------
// Transition
// ----------------------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TransitionModel {
    /// Per-kind index: reference transitions first, appended inverse models after.
    pub model_id: usize,
    pub kind: SimulationKind,
    pub reference: usize,
    pub abstract_transition: usize,
    pub is_inverse_model: bool,
    pub inverse: TransitionId,
    pub mappings: Vec<MappingId>,
    pub rules: Vec<RuleId>,
    pub attempt_frequency: f64,
    /// Bit `i` set if particle `i` can start the transition on the first path position.
    pub mobile_mask: u64,
}

#[derive(Debug, Clone)]
pub struct MappingModel {
    pub model_id: usize,
    pub transition: TransitionId,
    pub start_position: usize,
    /// Absolute 4D path with the start in the origin cell.
    pub path: Vec<CrystalVector4>,
    pub fractional: Vec<Vector3<f64>>,
    /// Cartesian displacement of the particle leaving each path position.
    pub movement: Vec<Vector3<f64>>,
    pub global_movement: Vector3<f64>,
    pub inverse: Option<MappingId>,
}

impl MappingModel {
    pub fn path_length(&self) -> usize {
        self.path.len()
    }

    /// Path reversed and shifted so the new start lies in the origin cell.
    pub fn reversed_path(&self) -> Vec<CrystalVector4> {
        let Some(last) = self.path.last() else {
            return Vec::new();
        };
        let shift = -last.cell();
        self.path.iter().rev().map(|v| v.shifted(&shift)).collect()
    }
}

#[derive(Debug, Clone)]
pub struct RuleModel {
    pub transition: TransitionId,
    pub rule: TransitionRule,
    pub start_code: i64,
    pub transition_code: i64,
    pub final_code: i64,
    pub attempt_frequency: f64,
    /// Charge transported along the path, in elementary charges per path length.
    pub field_factor: f64,
    pub tracker_order: [u8; 8],
    pub flags: MovementFlags,
    pub inverse: Option<RuleId>,
}

#[derive(Debug, Clone, Default)]
pub struct TransitionContext {
    pub transitions: SlotMap<TransitionId, TransitionModel>,
    pub mappings: SlotMap<MappingId, MappingModel>,
    pub rules: SlotMap<RuleId, RuleModel>,
    pub kinetic_order: Vec<TransitionId>,
    pub metropolis_order: Vec<TransitionId>,
}

impl TransitionContext {
    pub fn order(&self, kind: SimulationKind) -> &[TransitionId] {
        match kind {
            SimulationKind::Kinetic => &self.kinetic_order,
            SimulationKind::Metropolis => &self.metropolis_order,
        }
    }

    /// All models (including appended inverse models) built from one reference transition.
    pub fn models_for(&self, kind: SimulationKind, reference: usize) -> Vec<TransitionId> {
        self.order(kind)
            .iter()
            .copied()
            .filter(|id| self.transitions[*id].reference == reference)
            .collect()
    }
}

// ----------------------------------------------------------------------------------------
// Simulation
// ----------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Mobility {
    #[default]
    Immobile,
    /// The particle can start a jump but is never selected itself.
    Mobile,
    Selectable,
}

#[derive(Debug, Clone)]
pub struct JumpCollectionModel {
    pub id: usize,
    pub transition: TransitionId,
    pub particle_mask: u64,
    pub rules: Vec<RuleId>,
}

#[derive(Debug, Clone)]
pub struct JumpDirectionModel {
    pub id: usize,
    pub collection: usize,
    pub mapping: MappingId,
    pub position: usize,
    pub field_projection: f64,
    /// `(path position, pair target index)` of every pair target landing on the path.
    pub jump_links: Vec<(i32, i32)>,
}

#[derive(Debug, Clone)]
pub struct IndexingModel {
    /// `jump_count[(p, particle)]`.
    pub jump_count: DMatrix<i32>,
    /// Row-major `[positions, particles, max_directions]`, padded with `-1`.
    pub jump_assign: Vec<i32>,
    pub max_directions: usize,
    pub mobility: Vec<Vec<Mobility>>,
    pub selection_masks: Vec<u64>,
}

impl IndexingModel {
    pub fn particle_count(&self) -> usize {
        self.jump_count.ncols()
    }

    pub fn assigned(&self, p: usize, particle: usize) -> &[i32] {
        let start = (p * self.particle_count() + particle) * self.max_directions;
        &self.jump_assign[start..start + self.max_directions]
    }
}

#[derive(Debug, Clone)]
pub struct SimulationContext {
    pub simulation: usize,
    pub name: String,
    pub kind: SimulationKind,
    pub seed: u64,
    pub temperature: f64,
    pub lattice_size: [i32; 3],
    pub target_mcsp: u64,
    /// Normalized cartesian field direction, zero when no field is set.
    pub field: Vector3<f64>,
    pub field_magnitude: f64,
    pub transitions: Vec<TransitionId>,
    pub collections: Vec<JumpCollectionModel>,
    pub directions: Vec<JumpDirectionModel>,
    pub indexing: IndexingModel,
    /// Largest attempt frequency among the selected transitions.
    pub max_frequency: f64,
}

// ----------------------------------------------------------------------------------------
// Whole pass
// ----------------------------------------------------------------------------------------

/// The arena of one build pass. Stages are filled in dependency order and every stage
/// accessor fails with [`EngineError::MissingContext`] until its stage exists.
#[derive(Debug, Clone, Default)]
pub struct ModelContext {
    pub structure: Option<StructureContext>,
    pub energy: Option<EnergyContext>,
    pub transition: Option<TransitionContext>,
    pub simulations: Vec<SimulationContext>,
}

impl ModelContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn structure(&self) -> Result<&StructureContext, EngineError> {
        self.structure.as_ref().ok_or(EngineError::MissingContext {
            required: "structure",
            requested: "structure",
        })
    }

    pub fn energy(&self) -> Result<&EnergyContext, EngineError> {
        self.energy.as_ref().ok_or(EngineError::MissingContext {
            required: "energy",
            requested: "energy",
        })
    }

    pub fn transition(&self) -> Result<&TransitionContext, EngineError> {
        self.transition.as_ref().ok_or(EngineError::MissingContext {
            required: "transition",
            requested: "transition",
        })
    }

    /// Ensures every stage `requested` depends on is present.
    pub fn require(&self, requested: &'static str, stages: &[&'static str]) -> Result<(), EngineError> {
        for &stage in stages {
            let present = match stage {
                "structure" => self.structure.is_some(),
                "energy" => self.energy.is_some(),
                "transition" => self.transition.is_some(),
                _ => false,
            };
            if !present {
                return Err(EngineError::MissingContext {
                    required: stage,
                    requested,
                });
            }
        }
        Ok(())
    }

    pub fn simulation(&self, index: usize) -> Option<&SimulationContext> {
        self.simulations.iter().find(|s| s.simulation == index)
    }
}
