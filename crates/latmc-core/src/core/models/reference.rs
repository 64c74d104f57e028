use super::energy::{GroupInteraction, PairInteraction};
use super::particle::{MAX_PARTICLE_COUNT, Particle, ParticleSet, VOID_PARTICLE_INDEX};
use super::simulation::Simulation;
use super::structure::{CellSite, SpaceGroupEntry};
use super::transition::{
    AbstractTransition, KineticTransition, MetropolisTransition, StateExchangeGroup,
    StateExchangePair,
};
use crate::core::utils::geometry::CellParameters;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// The complete user-authored reference model.
///
/// Every list is indexed by position: the object stored at position `i` carries index `i`.
/// Deprecated objects stay in place so indices never shift.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ReferenceData {
    #[serde(default)]
    pub cell: CellParameters,
    #[serde(default)]
    pub space_group: SpaceGroupEntry,
    #[serde(default)]
    pub particles: Vec<Particle>,
    #[serde(default)]
    pub particle_sets: Vec<ParticleSet>,
    #[serde(default)]
    pub sites: Vec<CellSite>,
    #[serde(default)]
    pub pair_interactions: Vec<PairInteraction>,
    #[serde(default)]
    pub group_interactions: Vec<GroupInteraction>,
    #[serde(default)]
    pub exchange_pairs: Vec<StateExchangePair>,
    #[serde(default)]
    pub exchange_groups: Vec<StateExchangeGroup>,
    #[serde(default)]
    pub abstract_transitions: Vec<AbstractTransition>,
    #[serde(default)]
    pub kinetic_transitions: Vec<KineticTransition>,
    #[serde(default)]
    pub metropolis_transitions: Vec<MetropolisTransition>,
    #[serde(default)]
    pub simulations: Vec<Simulation>,
}

#[derive(Debug, Error)]
pub enum ReferenceLoadError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
    #[error("Invalid {domain} index: expected {expected}, found {found}")]
    Index {
        domain: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("Too many particles: {count} exceeds the limit of {MAX_PARTICLE_COUNT}")]
    TooManyParticles { count: usize },
}

impl ReferenceData {
    pub fn load(path: &Path) -> Result<Self, ReferenceLoadError> {
        let content = std::fs::read_to_string(path).map_err(|e| ReferenceLoadError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        Self::parse(&content, &path.to_string_lossy())
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ReferenceLoadError> {
        Self::parse(content, "<inline>")
    }

    fn parse(content: &str, origin: &str) -> Result<Self, ReferenceLoadError> {
        let mut data: Self = toml::from_str(content).map_err(|e| ReferenceLoadError::Toml {
            path: origin.to_string(),
            source: e,
        })?;
        data.normalize()?;
        debug!(
            origin,
            particles = data.particles.len(),
            sites = data.sites.len(),
            simulations = data.simulations.len(),
            "Loaded reference data."
        );
        Ok(data)
    }

    /// Inserts the void particle when it is missing and checks the positional index rule.
    pub fn normalize(&mut self) -> Result<(), ReferenceLoadError> {
        if self
            .particles
            .first()
            .is_none_or(|p| p.index != VOID_PARTICLE_INDEX)
        {
            self.particles.insert(0, Particle::void());
        }
        if self.particles.len() > MAX_PARTICLE_COUNT {
            return Err(ReferenceLoadError::TooManyParticles {
                count: self.particles.len(),
            });
        }

        check_indices("particle", self.particles.iter().map(|x| x.index))?;
        check_indices("particle set", self.particle_sets.iter().map(|x| x.index))?;
        check_indices("site", self.sites.iter().map(|x| x.index))?;
        check_indices("pair interaction", self.pair_interactions.iter().map(|x| x.index))?;
        check_indices("group interaction", self.group_interactions.iter().map(|x| x.index))?;
        check_indices("exchange pair", self.exchange_pairs.iter().map(|x| x.index))?;
        check_indices("exchange group", self.exchange_groups.iter().map(|x| x.index))?;
        check_indices(
            "abstract transition",
            self.abstract_transitions.iter().map(|x| x.index),
        )?;
        check_indices(
            "kinetic transition",
            self.kinetic_transitions.iter().map(|x| x.index),
        )?;
        check_indices(
            "metropolis transition",
            self.metropolis_transitions.iter().map(|x| x.index),
        )?;
        check_indices("simulation", self.simulations.iter().map(|x| x.index))?;
        Ok(())
    }
}

fn check_indices(
    domain: &'static str,
    indices: impl Iterator<Item = usize>,
) -> Result<(), ReferenceLoadError> {
    for (expected, found) in indices.enumerate() {
        if expected != found {
            return Err(ReferenceLoadError::Index {
                domain,
                expected,
                found,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// A single cubic site holding particle `A` or a vacancy, one symmetric pair interaction
    /// at distance 3.0 and a nearest-neighbour vacancy jump. Without space group operations
    /// the group defaults to P1; tests that need the cubic holohedry replace it.
    pub(crate) const CUBIC_REFERENCE: &str = r#"
        [cell]
        a = 1.0
        b = 1.0
        c = 1.0

        [[particles]]
        index = 1
        name = "Alpha"
        symbol = "A"
        charge = 1.0

        [[particles]]
        index = 2
        name = "Vacancy"
        symbol = "Vc"
        is-vacancy = true

        [[particle-sets]]
        index = 0
        name = "A-Vc"
        particles = [1, 2]

        [[sites]]
        index = 0
        name = "A1"
        vector = [0.0, 0.0, 0.0]
        occupation = 0

        [[pair-interactions]]
        index = 0
        site0 = 0
        site1 = 0
        position0 = [0.0, 0.0, 0.0]
        position1 = [3.0, 0.0, 0.0]
        energies = [
            { center = 1, partner = 1, energy = -0.5 },
            { center = 1, partner = 2, energy = 0.25 },
        ]

        [[exchange-pairs]]
        index = 0
        donor = 1
        acceptor = 2

        [[exchange-groups]]
        index = 0
        pairs = [0]

        [[abstract-transitions]]
        index = 0
        name = "A-Vc hop"
        groups = [0, 0]
        connectors = ["dynamic"]

        [[kinetic-transitions]]
        index = 0
        name = "A hop"
        abstract-transition = 0
        geometry = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]]
        attempt-frequency = 1.0e13

        [[simulations]]
        index = 0
        name = "kmc"
        kind = "kinetic"
        transitions = [0]
        electric-field = [1.0, 0.0, 0.0]
        field-magnitude = 1.0e8
        temperature = 1000.0
        lattice-size = [4, 4, 4]
        seed = 42
        target-mcsp = 100
    "#;

    #[test]
    fn parses_inline_reference_and_inserts_void_particle() {
        let data = ReferenceData::from_toml_str(CUBIC_REFERENCE).unwrap();
        assert_eq!(data.particles.len(), 3);
        assert!(data.particles[0].is_void());
        assert!(data.particles[2].is_vacancy);
        assert_eq!(data.space_group.name, "P1");
        assert_eq!(data.kinetic_transitions[0].attempt_frequency, 1.0e13);
        assert_eq!(data.simulations[0].seed, Some(42));
    }

    #[test]
    fn load_reads_reference_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", CUBIC_REFERENCE).unwrap();
        let data = ReferenceData::load(file.path()).unwrap();
        assert_eq!(data.sites.len(), 1);
        assert_eq!(data.pair_interactions[0].energies.len(), 2);
    }

    #[test]
    fn load_reports_missing_file() {
        let result = ReferenceData::load(Path::new("/definitely/missing/reference.toml"));
        assert!(matches!(result, Err(ReferenceLoadError::Io { .. })));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result = ReferenceData::from_toml_str("unexpected = 1");
        assert!(matches!(result, Err(ReferenceLoadError::Toml { .. })));
    }

    #[test]
    fn out_of_order_indices_are_rejected() {
        let content = r#"
            [[sites]]
            index = 1
            vector = [0.0, 0.0, 0.0]
            occupation = 0
        "#;
        let result = ReferenceData::from_toml_str(content);
        assert!(matches!(
            result,
            Err(ReferenceLoadError::Index {
                domain: "site",
                expected: 0,
                found: 1
            })
        ));
    }
}
