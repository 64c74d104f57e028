use super::particle::ModelState;
use nalgebra::Vector3;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SimulationKind {
    Kinetic,
    Metropolis,
}

/// A concrete simulation: which transitions run, on which supercell, under which field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Simulation {
    pub index: usize,
    #[serde(default)]
    pub name: String,
    pub kind: SimulationKind,
    /// Indices into the kinetic or Metropolis transition list, depending on `kind`.
    pub transitions: Vec<usize>,
    /// Field direction in fractional coordinates; normalized in cartesian space.
    #[serde(default)]
    pub electric_field: [f64; 3],
    /// Field magnitude in V/m.
    #[serde(default)]
    pub field_magnitude: f64,
    pub temperature: f64,
    /// Supercell size in unit cells along a, b and c.
    pub lattice_size: [i32; 3],
    /// Random seed. Left unset, a seed is generated during validation.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Target Monte Carlo steps per particle.
    #[serde(default)]
    pub target_mcsp: u64,
    #[serde(default)]
    pub state: ModelState,
}

impl Simulation {
    pub fn field_direction(&self) -> Vector3<f64> {
        Vector3::from(self.electric_field)
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }
}
