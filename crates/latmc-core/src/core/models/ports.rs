use super::energy::{GroupInteraction, PairInteraction};
use super::particle::{Particle, ParticleSet};
use super::reference::ReferenceData;
use super::simulation::Simulation;
use super::structure::{CellSite, SpaceGroupEntry};
use super::transition::{
    AbstractTransition, KineticTransition, MetropolisTransition, StateExchangeGroup,
    StateExchangePair,
};
use crate::core::utils::geometry::CellParameters;

pub trait ParticleQueries {
    fn particles(&self) -> &[Particle];
    fn particle_sets(&self) -> &[ParticleSet];

    fn particle(&self, index: usize) -> Option<&Particle> {
        self.particles().get(index)
    }

    fn particle_set(&self, index: usize) -> Option<&ParticleSet> {
        self.particle_sets().get(index)
    }
}

pub trait StructureQueries {
    fn cell_parameters(&self) -> &CellParameters;
    fn space_group(&self) -> &SpaceGroupEntry;
    fn sites(&self) -> &[CellSite];

    fn site(&self, index: usize) -> Option<&CellSite> {
        self.sites().get(index)
    }
}

pub trait EnergyQueries {
    fn pair_interactions(&self) -> &[PairInteraction];
    fn group_interactions(&self) -> &[GroupInteraction];
}

pub trait TransitionQueries {
    fn exchange_pairs(&self) -> &[StateExchangePair];
    fn exchange_groups(&self) -> &[StateExchangeGroup];
    fn abstract_transitions(&self) -> &[AbstractTransition];
    fn kinetic_transitions(&self) -> &[KineticTransition];
    fn metropolis_transitions(&self) -> &[MetropolisTransition];
}

pub trait SimulationQueries {
    fn simulations(&self) -> &[Simulation];
}

/// Read-only access to a complete reference snapshot.
///
/// The builders only ever talk to reference data through this port, so any storage that
/// can hand out immutable slices can drive a build.
pub trait ReferencePort:
    ParticleQueries + StructureQueries + EnergyQueries + TransitionQueries + SimulationQueries + Sync
{
}

impl<T> ReferencePort for T where
    T: ParticleQueries
        + StructureQueries
        + EnergyQueries
        + TransitionQueries
        + SimulationQueries
        + Sync
{
}

impl ParticleQueries for ReferenceData {
    fn particles(&self) -> &[Particle] {
        &self.particles
    }

    fn particle_sets(&self) -> &[ParticleSet] {
        &self.particle_sets
    }
}

impl StructureQueries for ReferenceData {
    fn cell_parameters(&self) -> &CellParameters {
        &self.cell
    }

    fn space_group(&self) -> &SpaceGroupEntry {
        &self.space_group
    }

    fn sites(&self) -> &[CellSite] {
        &self.sites
    }
}

impl EnergyQueries for ReferenceData {
    fn pair_interactions(&self) -> &[PairInteraction] {
        &self.pair_interactions
    }

    fn group_interactions(&self) -> &[GroupInteraction] {
        &self.group_interactions
    }
}

impl TransitionQueries for ReferenceData {
    fn exchange_pairs(&self) -> &[StateExchangePair] {
        &self.exchange_pairs
    }

    fn exchange_groups(&self) -> &[StateExchangeGroup] {
        &self.exchange_groups
    }

    fn abstract_transitions(&self) -> &[AbstractTransition] {
        &self.abstract_transitions
    }

    fn kinetic_transitions(&self) -> &[KineticTransition] {
        &self.kinetic_transitions
    }

    fn metropolis_transitions(&self) -> &[MetropolisTransition] {
        &self.metropolis_transitions
    }
}

impl SimulationQueries for ReferenceData {
    fn simulations(&self) -> &[Simulation] {
        &self.simulations
    }
}
