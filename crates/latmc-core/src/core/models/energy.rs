use super::particle::ModelState;
use nalgebra::Vector3;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PairKind {
    /// `E(a, b) == E(b, a)`, the usual case between stable sites.
    #[default]
    Symmetric,
    /// Direction dependent, used for pairs around transition-state positions.
    Asymmetric,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PairEnergyEntry {
    pub center: usize,
    pub partner: usize,
    pub energy: f64,
}

/// A pair interaction between a position of `site0` and a position of `site1`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PairInteraction {
    pub index: usize,
    pub site0: usize,
    pub site1: usize,
    pub position0: [f64; 3],
    pub position1: [f64; 3],
    #[serde(default)]
    pub kind: PairKind,
    #[serde(default)]
    pub energies: Vec<PairEnergyEntry>,
    #[serde(default)]
    pub state: ModelState,
}

impl PairInteraction {
    pub fn first(&self) -> Vector3<f64> {
        Vector3::from(self.position0)
    }

    pub fn second(&self) -> Vector3<f64> {
        Vector3::from(self.position1)
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct GroupEnergyEntry {
    pub center: usize,
    /// Partner occupation in the order of the group geometry.
    pub occupation: Vec<usize>,
    pub energy: f64,
}

/// A cluster interaction: a center site and up to eight partner positions, given as
/// absolute fractional vectors around the center site's representative position.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct GroupInteraction {
    pub index: usize,
    pub center_site: usize,
    pub geometry: Vec<[f64; 3]>,
    #[serde(default)]
    pub energies: Vec<GroupEnergyEntry>,
    #[serde(default)]
    pub state: ModelState,
}

impl GroupInteraction {
    pub fn partners(&self) -> Vec<Vector3<f64>> {
        self.geometry.iter().copied().map(Vector3::from).collect()
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }
}
