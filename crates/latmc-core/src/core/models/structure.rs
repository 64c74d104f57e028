use super::particle::ModelState;
use nalgebra::Vector3;
use serde::Deserialize;

/// Whether a site is a regular lattice site or a transition-state position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SiteStability {
    #[default]
    Stable,
    /// Only occupied while a jump passes through it.
    Unstable,
}

/// A crystallographic position of the asymmetric unit.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CellSite {
    pub index: usize,
    #[serde(default)]
    pub name: String,
    /// Fractional coordinates of the representative position.
    pub vector: [f64; 3],
    /// Index of the particle set allowed on this site.
    pub occupation: usize,
    #[serde(default)]
    pub stability: SiteStability,
    #[serde(default)]
    pub state: ModelState,
}

impl CellSite {
    pub fn position(&self) -> Vector3<f64> {
        Vector3::from(self.vector)
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn is_stable(&self) -> bool {
        self.stability == SiteStability::Stable
    }
}

/// The space group as authored: a number, a name and its operation literals.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SpaceGroupEntry {
    pub index: u32,
    pub name: String,
    pub operations: Vec<String>,
}

impl Default for SpaceGroupEntry {
    fn default() -> Self {
        Self {
            index: 1,
            name: "P1".to_string(),
            operations: vec!["x,y,z".to_string()],
        }
    }
}
