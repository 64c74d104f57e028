use super::config::BuildConfig;
use super::error::EngineError;
use crate::core::models::particle::{MAX_PARTICLE_COUNT, VOID_PARTICLE_INDEX};
use crate::core::models::ports::ReferencePort;
use crate::core::models::simulation::{Simulation, SimulationKind};
use std::fmt;
use tracing::{instrument, warn};

/// An advisory finding about a single reference object. Issues never stop a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub domain: &'static str,
    pub index: usize,
    pub detail: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.domain, self.index, self.detail)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an issue and mirrors it to the log.
    pub fn push(&mut self, domain: &'static str, index: usize, detail: impl Into<String>) {
        let issue = ValidationIssue {
            domain,
            index,
            detail: detail.into(),
        };
        warn!(domain, index, detail = %issue.detail, "Validation issue.");
        self.issues.push(issue);
    }

    pub fn extend(&mut self, issues: impl IntoIterator<Item = ValidationIssue>) {
        self.issues.extend(issues);
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn into_issues(self) -> Vec<ValidationIssue> {
        self.issues
    }
}

fn positional<I: Iterator<Item = usize>>(domain: &'static str, indices: I) -> Result<(), EngineError> {
    for (expected, found) in indices.enumerate() {
        if expected != found {
            return Err(EngineError::InvalidReference {
                domain,
                index: found,
                reason: format!("stored at position {expected}"),
            });
        }
    }
    Ok(())
}

/// Rejects a port whose objects do not carry their list position as index, or whose
/// particle list does not start with the void particle within the particle limit.
pub fn check_indices<P: ReferencePort + ?Sized>(port: &P) -> Result<(), EngineError> {
    let particles = port.particles();
    if particles.first().is_none_or(|p| !p.is_void()) {
        return Err(EngineError::InvalidReference {
            domain: "particle",
            index: VOID_PARTICLE_INDEX,
            reason: "the particle list must start with the void particle".to_string(),
        });
    }
    if particles.len() > MAX_PARTICLE_COUNT {
        return Err(EngineError::InvalidReference {
            domain: "particle",
            index: particles.len() - 1,
            reason: format!("at most {MAX_PARTICLE_COUNT} particles are supported"),
        });
    }
    positional("particle", particles.iter().map(|x| x.index))?;
    positional("particle set", port.particle_sets().iter().map(|x| x.index))?;
    positional("site", port.sites().iter().map(|x| x.index))?;
    positional("pair interaction", port.pair_interactions().iter().map(|x| x.index))?;
    positional("group interaction", port.group_interactions().iter().map(|x| x.index))?;
    positional("exchange pair", port.exchange_pairs().iter().map(|x| x.index))?;
    positional("exchange group", port.exchange_groups().iter().map(|x| x.index))?;
    positional("abstract transition", port.abstract_transitions().iter().map(|x| x.index))?;
    positional("kinetic transition", port.kinetic_transitions().iter().map(|x| x.index))?;
    positional("metropolis transition", port.metropolis_transitions().iter().map(|x| x.index))?;
    positional("simulation", port.simulations().iter().map(|x| x.index))?;
    Ok(())
}

/// Checks every reference object that can be used with a warning.
#[instrument(skip_all, name = "validation_pass")]
pub fn validate<P: ReferencePort + ?Sized>(port: &P) -> ValidationReport {
    let mut report = ValidationReport::new();

    for set in port.particle_sets().iter().filter(|s| s.state.is_active()) {
        for &particle in &set.particles {
            if port.particle(particle).is_some_and(|p| !p.is_active()) {
                report.push(
                    "particle set",
                    set.index,
                    format!("deprecated particle {particle} is ignored"),
                );
            }
        }
    }

    for simulation in port.simulations().iter().filter(|s| s.is_active()) {
        validate_simulation(port, simulation, &mut report);
    }
    report
}

fn validate_simulation<P: ReferencePort + ?Sized>(
    port: &P,
    simulation: &Simulation,
    report: &mut ValidationReport,
) {
    if simulation.transitions.is_empty() {
        report.push("simulation", simulation.index, "no transitions selected");
    }
    if simulation.kind == SimulationKind::Kinetic && simulation.field_magnitude == 0.0 {
        report.push(
            "simulation",
            simulation.index,
            "kinetic simulation without electric field",
        );
    }
    for &transition in &simulation.transitions {
        let active = match simulation.kind {
            SimulationKind::Kinetic => port
                .kinetic_transitions()
                .get(transition)
                .map(|t| t.is_active()),
            SimulationKind::Metropolis => port
                .metropolis_transitions()
                .get(transition)
                .map(|t| t.is_active()),
        };
        if active == Some(false) {
            report.push(
                "simulation",
                simulation.index,
                format!("deprecated transition {transition} is skipped"),
            );
        }
    }
}

/// Resolves the seed of a simulation. A missing seed becomes the configured fallback
/// offset by the simulation index, or a random seed, and is reported.
pub fn resolve_seed(simulation: &Simulation, config: &BuildConfig, report: &mut ValidationReport) -> u64 {
    if let Some(seed) = simulation.seed {
        return seed;
    }
    let seed = match config.fallback_seed {
        Some(base) => base.wrapping_add(simulation.index as u64),
        None => rand::random::<u64>(),
    };
    report.push(
        "simulation",
        simulation.index,
        format!("unset seed replaced with generated seed {seed}"),
    );
    seed
}
