use super::particle::ModelState;
use nalgebra::Vector3;
use serde::Deserialize;

/// A particle exchange `donor <-> acceptor` allowed at one path position.
///
/// Unstable pairs describe transition-state positions: the donor only exists there while
/// the jump is in flight and the acceptor is always the void particle.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct StateExchangePair {
    pub index: usize,
    pub donor: usize,
    pub acceptor: usize,
    #[serde(default)]
    pub unstable: bool,
    #[serde(default)]
    pub state: ModelState,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct StateExchangeGroup {
    pub index: usize,
    pub pairs: Vec<usize>,
    #[serde(default)]
    pub state: ModelState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectorKind {
    /// Particles on both ends swap states.
    Dynamic,
    /// Both ends keep their states.
    Static,
}

/// Geometry-free description of a transition: one exchange group per path position and a
/// connector between each consecutive pair of positions.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct AbstractTransition {
    pub index: usize,
    #[serde(default)]
    pub name: String,
    pub groups: Vec<usize>,
    pub connectors: Vec<ConnectorKind>,
    #[serde(default)]
    pub state: ModelState,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct KineticTransition {
    pub index: usize,
    #[serde(default)]
    pub name: String,
    pub abstract_transition: usize,
    /// Absolute fractional path, one vector per abstract path position.
    pub geometry: Vec<[f64; 3]>,
    #[serde(default = "unit_frequency")]
    pub attempt_frequency: f64,
    #[serde(default)]
    pub state: ModelState,
}

fn unit_frequency() -> f64 {
    1.0
}

impl KineticTransition {
    pub fn path(&self) -> Vec<Vector3<f64>> {
        self.geometry.iter().copied().map(Vector3::from).collect()
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }
}

/// Exchange between any position of `site0` and any position of `site1`, independent of
/// distance.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct MetropolisTransition {
    pub index: usize,
    #[serde(default)]
    pub name: String,
    pub abstract_transition: usize,
    pub site0: usize,
    pub site1: usize,
    #[serde(default)]
    pub state: ModelState,
}

impl MetropolisTransition {
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }
}
