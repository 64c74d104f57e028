use serde::Deserialize;

/// Upper bound on particle indices, fixed by the 64-bit particle masks and 64-byte
/// particle buffers of the native engine.
pub const MAX_PARTICLE_COUNT: usize = 64;

/// Index of the void particle that marks an empty position.
pub const VOID_PARTICLE_INDEX: usize = 0;

/// Lifecycle state of a reference object.
///
/// Deprecated objects keep their index (indices are stable identifiers) but are skipped
/// by every context builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelState {
    /// The object takes part in context construction.
    #[default]
    Active,
    /// The object was removed or superseded and is ignored.
    Deprecated,
}

impl ModelState {
    pub fn is_active(self) -> bool {
        self == ModelState::Active
    }
}

/// A particle species that can occupy a lattice position.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Particle {
    /// Stable index of the species; doubles as the byte value in occupation codes.
    pub index: usize,
    /// Human readable name, for example `"Oxygen"`.
    pub name: String,
    /// Chemical symbol, for example `"O"`.
    pub symbol: String,
    /// Formal charge in elementary charges.
    #[serde(default)]
    pub charge: f64,
    /// Whether the species represents a vacancy.
    #[serde(default)]
    pub is_vacancy: bool,
    #[serde(default)]
    pub state: ModelState,
}

impl Particle {
    /// The void particle, always present at index `0`.
    pub fn void() -> Self {
        Self {
            index: VOID_PARTICLE_INDEX,
            name: "Void".to_string(),
            symbol: "Void".to_string(),
            charge: 0.0,
            is_vacancy: false,
            state: ModelState::Active,
        }
    }

    pub fn is_void(&self) -> bool {
        self.index == VOID_PARTICLE_INDEX
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }
}

/// A named collection of particles, used as the allowed occupation of a site.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ParticleSet {
    pub index: usize,
    #[serde(default)]
    pub name: String,
    /// Member particle indices.
    pub particles: Vec<usize>,
    #[serde(default)]
    pub state: ModelState,
}

impl ParticleSet {
    pub fn contains(&self, particle: usize) -> bool {
        self.particles.contains(&particle)
    }
}
