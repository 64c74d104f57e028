use crate::core::models::particle::VOID_PARTICLE_INDEX;
use crate::core::models::ports::ReferencePort;
use crate::core::models::simulation::SimulationKind;
use crate::engine::context::{
    BuildScope, IndexingModel, JumpCollectionModel, JumpDirectionModel, MappingModel, Mobility,
    ModelContext, SimulationContext, StructureContext,
};
use crate::engine::error::EngineError;
use crate::engine::ids::TransitionId;
use crate::engine::progress::Progress;
use crate::engine::validation::{ValidationIssue, ValidationReport, resolve_seed};
use nalgebra::{DMatrix, Vector3};
use tracing::{debug, info, instrument};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

const STAGE: &str = "simulation";

/// Builds the contexts of every active simulation, in simulation order.
#[instrument(skip_all, name = "simulation_contexts_task")]
pub fn run_all<P: ReferencePort + ?Sized>(
    scope: &BuildScope<'_, P>,
    context: &ModelContext,
) -> Result<(Vec<SimulationContext>, Vec<ValidationIssue>), EngineError> {
    let indices: Vec<usize> = scope
        .reference
        .simulations()
        .iter()
        .filter(|s| s.is_active())
        .map(|s| s.index)
        .collect();

    #[cfg(not(feature = "parallel"))]
    let iterator = indices.iter();
    #[cfg(feature = "parallel")]
    let iterator = indices.par_iter();

    let built: Vec<(SimulationContext, Vec<ValidationIssue>)> = iterator
        .map(|index| run(scope, context, *index))
        .collect::<Result<_, _>>()?;

    let mut simulations = Vec::with_capacity(built.len());
    let mut issues = Vec::new();
    for (simulation, warnings) in built {
        simulations.push(simulation);
        issues.extend(warnings);
    }
    Ok((simulations, issues))
}

/// Resolves one simulation against the structure and transition contexts.
#[instrument(skip_all, name = "simulation_context_task", fields(simulation = index))]
pub fn run<P: ReferencePort + ?Sized>(
    scope: &BuildScope<'_, P>,
    context: &ModelContext,
    index: usize,
) -> Result<(SimulationContext, Vec<ValidationIssue>), EngineError> {
    context.require(STAGE, &["structure", "energy", "transition"])?;
    let structure = context.structure()?;
    let transitions = context.transition()?;
    let reference = scope.reference;
    scope.reporter.report(Progress::SimulationStart { index });

    let invalid = |reason: String| EngineError::InvalidReference {
        domain: "simulation",
        index,
        reason,
    };
    let simulation = reference
        .simulations()
        .get(index)
        .filter(|s| s.is_active())
        .ok_or_else(|| invalid("unknown or deprecated simulation".to_string()))?;
    if simulation.lattice_size.iter().any(|n| *n < 1) {
        return Err(invalid(format!("lattice size {:?} is not positive", simulation.lattice_size)));
    }
    if !(simulation.temperature.is_finite() && simulation.temperature > 0.0) {
        return Err(invalid(format!("temperature {} is not positive", simulation.temperature)));
    }

    let mut report = ValidationReport::new();
    let seed = resolve_seed(simulation, scope.config, &mut report);

    // === Phase 1: Transition selection ===
    let available = match simulation.kind {
        SimulationKind::Kinetic => reference.kinetic_transitions().len(),
        SimulationKind::Metropolis => reference.metropolis_transitions().len(),
    };
    let mut selected: Vec<TransitionId> = Vec::new();
    for &transition in &simulation.transitions {
        if transition >= available {
            return Err(invalid(format!("unknown transition {transition}")));
        }
        for id in transitions.models_for(simulation.kind, transition) {
            if !selected.contains(&id) {
                selected.push(id);
            }
        }
    }
    selected.sort_by_key(|id| transitions.transitions[*id].model_id);

    let max_frequency = selected
        .iter()
        .map(|id| transitions.transitions[*id].attempt_frequency)
        .fold(0.0_f64, f64::max);

    let field = match simulation.kind {
        SimulationKind::Kinetic => structure
            .encoder
            .to_cartesian(&simulation.field_direction())
            .try_normalize(structure.encoder.comparer().tolerance())
            .unwrap_or_else(Vector3::zeros),
        SimulationKind::Metropolis => Vector3::zeros(),
    };

    // === Phase 2: Collections and directions ===
    let mut collections = Vec::with_capacity(selected.len());
    let mut directions = Vec::new();
    for (collection, id) in selected.iter().enumerate() {
        let model = &transitions.transitions[*id];
        collections.push(JumpCollectionModel {
            id: collection,
            transition: *id,
            particle_mask: model.mobile_mask,
            rules: model.rules.clone(),
        });
        for mapping_id in &model.mappings {
            let mapping = &transitions.mappings[*mapping_id];
            directions.push(JumpDirectionModel {
                id: directions.len(),
                collection,
                mapping: *mapping_id,
                position: mapping.start_position,
                field_projection: field_projection(structure, mapping, &field),
                jump_links: jump_links(structure, mapping),
            });
        }
    }

    // === Phase 3: Indexing ===
    let indexing = build_indexing(scope, structure, &collections, &directions);
    verify_indexing(&indexing)?;
    debug!(
        collections = collections.len(),
        directions = directions.len(),
        max_directions = indexing.max_directions,
        "Jump indexing built."
    );

    info!(
        simulation = index,
        seed,
        transitions = selected.len(),
        directions = directions.len(),
        "Simulation context built."
    );
    Ok((
        SimulationContext {
            simulation: index,
            name: simulation.name.clone(),
            kind: simulation.kind,
            seed,
            temperature: simulation.temperature,
            lattice_size: simulation.lattice_size,
            target_mcsp: simulation.target_mcsp,
            field,
            field_magnitude: simulation.field_magnitude,
            transitions: selected,
            collections,
            directions,
            indexing,
            max_frequency,
        },
        report.into_issues(),
    ))
}

fn field_projection(structure: &StructureContext, mapping: &MappingModel, field: &Vector3<f64>) -> f64 {
    match (mapping.fractional.first(), mapping.fractional.last()) {
        (Some(start), Some(end)) => field.dot(&structure.encoder.to_cartesian(&(end - start))),
        _ => 0.0,
    }
}

/// Pair targets of every path position that land on another position of the same path.
fn jump_links(structure: &StructureContext, mapping: &MappingModel) -> Vec<(i32, i32)> {
    let mut links = Vec::new();
    for (i, from) in mapping.path.iter().enumerate() {
        let Some(position) = structure.position_models.get(from.p as usize) else {
            continue;
        };
        for (j, target) in position.targets.iter().enumerate() {
            let landing = target.relative.shifted(&from.cell());
            let hits_path = mapping
                .path
                .iter()
                .enumerate()
                .any(|(k, other)| k != i && *other == landing);
            if hits_path {
                links.push((i as i32, j as i32));
            }
        }
    }
    links
}

fn build_indexing<P: ReferencePort + ?Sized>(
    scope: &BuildScope<'_, P>,
    structure: &StructureContext,
    collections: &[JumpCollectionModel],
    directions: &[JumpDirectionModel],
) -> IndexingModel {
    let positions = structure.position_count();
    let particles = scope.reference.particles();
    let particle_count = particles.len();

    let mut assigned: Vec<Vec<Vec<i32>>> = vec![vec![Vec::new(); particle_count]; positions];
    for direction in directions {
        let mask = collections[direction.collection].particle_mask;
        for particle in 0..particle_count {
            if particle != VOID_PARTICLE_INDEX && mask & (1 << particle) != 0 {
                assigned[direction.position][particle].push(direction.id as i32);
            }
        }
    }
    let max_directions = assigned
        .iter()
        .flatten()
        .map(Vec::len)
        .max()
        .unwrap_or(0)
        .max(1);
    let mut jump_count = DMatrix::zeros(positions, particle_count);
    let mut jump_assign = vec![-1; positions * particle_count * max_directions];
    let mut mobility = vec![vec![Mobility::Immobile; particle_count]; positions];
    let mut selection_masks = vec![0u64; positions];

    for (p, row) in assigned.iter().enumerate() {
        for (particle, list) in row.iter().enumerate() {
            jump_count[(p, particle)] = list.len() as i32;
            let start = (p * particle_count + particle) * max_directions;
            jump_assign[start..start + list.len()].copy_from_slice(list);
            if list.is_empty() {
                continue;
            }
            if particles[particle].is_vacancy {
                mobility[p][particle] = Mobility::Mobile;
            } else {
                mobility[p][particle] = Mobility::Selectable;
                selection_masks[p] |= 1 << particle;
            }
        }
    }

    IndexingModel {
        jump_count,
        jump_assign,
        max_directions,
        mobility,
        selection_masks,
    }
}

/// Every count must match the number of assigned directions in its row.
fn verify_indexing(indexing: &IndexingModel) -> Result<(), EngineError> {
    let (positions, particles) = indexing.jump_count.shape();
    for p in 0..positions {
        for particle in 0..particles {
            let filled = indexing
                .assigned(p, particle)
                .iter()
                .filter(|d| **d >= 0)
                .count();
            if filled != indexing.jump_count[(p, particle)] as usize {
                return Err(EngineError::StructuralDefect {
                    stage: STAGE,
                    reason: format!("jump count of ({p}, {particle}) does not match its assignments"),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::reference::ReferenceData;
    use crate::engine::config::{BuildConfig, BuildConfigBuilder};
    use crate::engine::progress::ProgressReporter;
    use crate::engine::tasks::structure::tests::cubic_reference;
    use crate::engine::tasks::transition::tests::{build_through_transitions, with_same_site_metropolis};

    fn build(data: &ReferenceData, config: &BuildConfig) -> Result<(SimulationContext, Vec<ValidationIssue>), EngineError> {
        let context = build_through_transitions(data)?;
        let reporter = ProgressReporter::new();
        let scope = BuildScope::new(data, config, &reporter);
        run(&scope, &context, 0)
    }

    #[test]
    fn cubic_simulation_assigns_six_directions_per_mobile_particle() {
        let (simulation, issues) = build(&cubic_reference(), &BuildConfig::default()).unwrap();
        assert!(issues.is_empty());
        assert_eq!(simulation.seed, 42);
        assert_eq!(simulation.directions.len(), 6);
        let indexing = &simulation.indexing;
        assert_eq!(indexing.max_directions, 6);
        assert_eq!(indexing.jump_count[(0, 0)], 0);
        assert_eq!(indexing.jump_count[(0, 1)], 6);
        assert_eq!(indexing.jump_count[(0, 2)], 6);
        assert_eq!(indexing.assigned(0, 1), &[0, 1, 2, 3, 4, 5]);
        assert_eq!(indexing.mobility[0][1], Mobility::Selectable);
        assert_eq!(indexing.mobility[0][2], Mobility::Mobile);
        assert_eq!(indexing.selection_masks[0], 0b10);
    }

    #[test]
    fn same_site_metropolis_simulation_gets_a_direction() {
        let mut data = with_same_site_metropolis(cubic_reference());
        data.simulations[0].kind = SimulationKind::Metropolis;
        data.simulations[0].transitions = vec![0];
        let (simulation, _) = build(&data, &BuildConfig::default()).unwrap();
        assert_eq!(simulation.collections.len(), 1);
        assert_eq!(simulation.directions.len(), 1);
        assert_eq!(simulation.directions[0].field_projection, 0.0);
        let indexing = &simulation.indexing;
        assert_eq!(indexing.jump_count[(0, 0)], 0);
        assert!((1..indexing.particle_count()).any(|s| indexing.jump_count[(0, s)] == 1));
    }

    #[test]
    fn jump_count_matches_assignments() {
        let (simulation, _) = build(&cubic_reference(), &BuildConfig::default()).unwrap();
        let indexing = &simulation.indexing;
        for p in 0..indexing.jump_count.nrows() {
            for s in 0..indexing.particle_count() {
                let listed = indexing.assigned(p, s).iter().filter(|d| **d >= 0).count();
                assert_eq!(listed as i32, indexing.jump_count[(p, s)]);
            }
        }
    }

    #[test]
    fn field_projects_onto_jump_direction() {
        let (simulation, _) = build(&cubic_reference(), &BuildConfig::default()).unwrap();
        let projections: Vec<f64> = simulation.directions.iter().map(|d| d.field_projection).collect();
        assert_eq!(projections.iter().filter(|p| (**p - 1.0).abs() < 1e-9).count(), 1);
        assert_eq!(projections.iter().filter(|p| (**p + 1.0).abs() < 1e-9).count(), 1);
        assert_eq!(projections.iter().filter(|p| p.abs() < 1e-9).count(), 4);
        assert_eq!(simulation.max_frequency, 1e13);
    }

    #[test]
    fn missing_seed_is_generated_with_warning() {
        let mut data = cubic_reference();
        data.simulations[0].seed = None;
        let config = BuildConfigBuilder::new()
            .geometry_tolerance(1e-6)
            .fallback_seed(1000)
            .build()
            .unwrap();
        let (simulation, issues) = build(&data, &config).unwrap();
        assert_eq!(simulation.seed, 1000);
        assert_eq!(issues.len(), 1);
    }

    #[test]
    fn unknown_transition_is_rejected() {
        let mut data = cubic_reference();
        data.simulations[0].transitions.push(5);
        assert!(matches!(
            build(&data, &BuildConfig::default()),
            Err(EngineError::InvalidReference { domain: "simulation", .. })
        ));
    }

    #[test]
    fn deprecated_transition_selects_nothing() {
        let mut data = cubic_reference();
        data.kinetic_transitions[0].state = crate::core::models::particle::ModelState::Deprecated;
        let (simulation, _) = build(&data, &BuildConfig::default()).unwrap();
        assert!(simulation.directions.is_empty());
        assert_eq!(simulation.indexing.max_directions, 1);
        assert!(simulation.indexing.jump_assign.iter().all(|d| *d == -1));
    }
}
