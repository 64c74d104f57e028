use crate::core::analysis::rules::occupation_code;
use crate::core::models::energy::{GroupInteraction, PairInteraction, PairKind};
use crate::core::models::ports::ReferencePort;
use crate::engine::context::{
    BuildScope, EnergyContext, GroupEnergyModel, PairEnergyModel, StructureContext,
};
use crate::engine::error::EngineError;
use crate::engine::validation::check_indices;
use itertools::Itertools;
use nalgebra::DMatrix;
use std::collections::BTreeMap;
use tracing::{info, instrument};

#[instrument(skip_all, name = "energy_context_task")]
pub fn run<P: ReferencePort + ?Sized>(
    scope: &BuildScope<'_, P>,
    structure: &StructureContext,
) -> Result<EnergyContext, EngineError> {
    check_indices(scope.reference)?;
    let (pairs, groups) = if scope.config.parallel {
        join(
            || build_pair_tables(scope, structure),
            || build_group_tables(scope, structure),
        )
    } else {
        (
            build_pair_tables(scope, structure),
            build_group_tables(scope, structure),
        )
    };
    let (pairs, groups) = (pairs?, groups?);

    let mut context = EnergyContext::default();
    for model in pairs {
        let model_id = model.model_id;
        let id = context.pair_energies.insert(model);
        let representative = structure.pair_classes[model_id];
        for member in &structure.pair_models[representative].equivalent_models {
            context.pair_links.insert(*member, id);
        }
        context.pair_order.push(id);
    }
    for model in groups {
        let model_id = model.model_id;
        let id = context.group_energies.insert(model);
        let representative = structure.group_classes[model_id];
        for member in &structure.group_models[representative].equivalent_models {
            context.group_links.insert(*member, id);
        }
        context.group_order.push(id);
    }

    info!(
        pair_tables = context.pair_order.len(),
        group_tables = context.group_order.len(),
        "Energy context built."
    );
    Ok(context)
}

#[cfg(feature = "parallel")]
fn join<A, B, RA, RB>(a: A, b: B) -> (RA, RB)
where
    A: FnOnce() -> RA + Send,
    B: FnOnce() -> RB + Send,
    RA: Send,
    RB: Send,
{
    rayon::join(a, b)
}

#[cfg(not(feature = "parallel"))]
fn join<A, B, RA, RB>(a: A, b: B) -> (RA, RB)
where
    A: FnOnce() -> RA,
    B: FnOnce() -> RB,
{
    (a(), b())
}

/// Writes `value` into a table cell, rejecting a different value already stored there.
fn assign(
    table: &mut DMatrix<f64>,
    filled: &mut DMatrix<bool>,
    cell: (usize, usize),
    value: f64,
    tolerance: f64,
) -> Result<(), String> {
    if filled[cell] && (table[cell] - value).abs() > tolerance {
        return Err(format!(
            "conflicting energies {} and {value} for entry {cell:?}",
            table[cell]
        ));
    }
    table[cell] = value;
    filled[cell] = true;
    Ok(())
}

fn build_pair_tables<P: ReferencePort + ?Sized>(
    scope: &BuildScope<'_, P>,
    structure: &StructureContext,
) -> Result<Vec<PairEnergyModel>, EngineError> {
    let reference = scope.reference;
    let particle_count = reference.particles().len();
    structure
        .pair_classes
        .iter()
        .map(|representative| -> Result<PairEnergyModel, EngineError> {
            let model = &structure.pair_models[*representative];
            let interaction = reference
                .pair_interactions()
                .get(model.interaction)
                .ok_or_else(|| EngineError::InvalidReference {
                    domain: "pair interaction",
                    index: model.interaction,
                    reason: "no such interaction".to_string(),
                })?;
            let table = pair_table(interaction, model.inverted, particle_count, scope.config.energy_tolerance)
                .map_err(|reason| EngineError::InvalidReference {
                    domain: "pair interaction",
                    index: interaction.index,
                    reason,
                })?;
            Ok(PairEnergyModel {
                model_id: model.model_id,
                interaction: interaction.index,
                kind: interaction.kind,
                inverted: model.inverted,
                table,
            })
        })
        .collect()
}

fn pair_table(
    interaction: &PairInteraction,
    inverted: bool,
    particle_count: usize,
    tolerance: f64,
) -> Result<DMatrix<f64>, String> {
    let mut table = DMatrix::zeros(particle_count, particle_count);
    let mut filled = DMatrix::from_element(particle_count, particle_count, false);
    for entry in &interaction.energies {
        if entry.center >= particle_count || entry.partner >= particle_count {
            return Err(format!(
                "entry ({}, {}) references an unknown particle",
                entry.center, entry.partner
            ));
        }
        let (center, partner) = if inverted {
            (entry.partner, entry.center)
        } else {
            (entry.center, entry.partner)
        };
        assign(&mut table, &mut filled, (center, partner), entry.energy, tolerance)?;
        if interaction.kind == PairKind::Symmetric {
            assign(&mut table, &mut filled, (partner, center), entry.energy, tolerance)?;
        }
    }
    Ok(table)
}

fn build_group_tables<P: ReferencePort + ?Sized>(
    scope: &BuildScope<'_, P>,
    structure: &StructureContext,
) -> Result<Vec<GroupEnergyModel>, EngineError> {
    structure
        .group_classes
        .iter()
        .map(|representative| -> Result<GroupEnergyModel, EngineError> {
            let model = &structure.group_models[*representative];
            let interaction = scope
                .reference
                .group_interactions()
                .get(model.interaction)
                .ok_or_else(|| EngineError::InvalidReference {
                    domain: "group interaction",
                    index: model.interaction,
                    reason: "no such interaction".to_string(),
                })?;
            group_table(scope, structure, interaction, model.model_id).map_err(|reason| {
                EngineError::InvalidReference {
                    domain: "group interaction",
                    index: interaction.index,
                    reason,
                }
            })
        })
        .collect()
}

/// Active particles a site may hold, sorted.
fn site_particles<P: ReferencePort + ?Sized>(reference: &P, site: usize) -> Vec<usize> {
    let Some(site) = reference.site(site) else {
        return Vec::new();
    };
    let Some(set) = reference.particle_set(site.occupation) else {
        return Vec::new();
    };
    set.particles
        .iter()
        .copied()
        .filter(|p| reference.particle(*p).is_some_and(|p| p.is_active()))
        .sorted()
        .dedup()
        .collect()
}

fn group_table<P: ReferencePort + ?Sized>(
    scope: &BuildScope<'_, P>,
    structure: &StructureContext,
    interaction: &GroupInteraction,
    model_id: usize,
) -> Result<GroupEnergyModel, String> {
    let reference = scope.reference;
    let origin = reference
        .site(interaction.center_site)
        .map(|s| s.position())
        .ok_or_else(|| format!("unknown center site {}", interaction.center_site))?;
    let partners = interaction.partners();

    let redirection: BTreeMap<usize, usize> = site_particles(reference, interaction.center_site)
        .into_iter()
        .enumerate()
        .map(|(row, particle)| (particle, row))
        .collect();

    let mut partner_particles = Vec::with_capacity(partners.len());
    for partner in &partners {
        let encoded = structure
            .encoder
            .encode(partner)
            .ok_or_else(|| format!("partner {partner:?} is not a lattice position"))?;
        let site = structure.position_sites[encoded.p as usize];
        partner_particles.push(site_particles(reference, site));
    }
    let occupation_codes: Vec<i64> = partner_particles
        .iter()
        .map(|list| list.iter().map(|p| *p as u8))
        .multi_cartesian_product()
        .map(|occupation| occupation_code(&occupation))
        .sorted()
        .dedup()
        .collect();

    let rows = redirection.len();
    let cols = occupation_codes.len();
    let mut table = DMatrix::zeros(rows, cols);
    let mut filled = DMatrix::from_element(rows, cols, false);
    let orders = structure.symmetry.projection_orders(&origin, &partners);

    for entry in &interaction.energies {
        if entry.occupation.len() != partners.len() {
            return Err(format!(
                "occupation of length {} for {} partners",
                entry.occupation.len(),
                partners.len()
            ));
        }
        let row = *redirection
            .get(&entry.center)
            .ok_or_else(|| format!("particle {} cannot occupy the center", entry.center))?;
        for order in &orders {
            let mut permuted = vec![0u8; partners.len()];
            for (i, &j) in order.iter().enumerate() {
                permuted[j] = entry.occupation[i] as u8;
            }
            let code = occupation_code(&permuted);
            let col = occupation_codes
                .binary_search(&code)
                .map_err(|_| format!("occupation {:?} is not allowed", entry.occupation))?;
            assign(&mut table, &mut filled, (row, col), entry.energy, scope.config.energy_tolerance)?;
        }
    }

    Ok(GroupEnergyModel {
        model_id,
        interaction: interaction.index,
        redirection,
        occupation_codes,
        table,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::energy::{GroupEnergyEntry, GroupInteraction, PairEnergyEntry};
    use crate::core::models::reference::ReferenceData;
    use crate::engine::config::BuildConfig;
    use crate::engine::progress::ProgressReporter;
    use crate::engine::tasks::structure;
    use crate::engine::tasks::structure::tests::cubic_reference;

    fn build(data: &ReferenceData, parallel: bool) -> Result<(StructureContext, EnergyContext), EngineError> {
        let config = BuildConfig {
            parallel,
            ..BuildConfig::default()
        };
        let reporter = ProgressReporter::new();
        let scope = BuildScope::new(data, &config, &reporter);
        let structure = structure::run(&scope)?;
        let energy = run(&scope, &structure)?;
        Ok((structure, energy))
    }

    fn with_linear_group(mut data: ReferenceData) -> ReferenceData {
        data.group_interactions.push(GroupInteraction {
            index: 0,
            center_site: 0,
            geometry: vec![[3.0, 0.0, 0.0], [-3.0, 0.0, 0.0]],
            energies: vec![GroupEnergyEntry {
                center: 1,
                occupation: vec![1, 2],
                energy: 0.75,
            }],
            state: Default::default(),
        });
        data
    }

    #[test]
    fn symmetric_pair_table_is_mirrored() {
        let (structure, energy) = build(&cubic_reference(), false).unwrap();
        let model = &energy.pair_energies[energy.pair_order[0]];
        assert_eq!(model.table[(1, 1)], -0.5);
        assert_eq!(model.table[(1, 2)], 0.25);
        assert_eq!(model.table[(2, 1)], 0.25);
        assert_eq!(model.table[(0, 0)], 0.0);
        // Every pair model of the class points at the shared table.
        assert_eq!(energy.pair_links.len(), structure.pair_models.len());
    }

    #[test]
    fn conflicting_symmetric_entries_are_rejected() {
        let mut data = cubic_reference();
        data.pair_interactions[0].energies.push(PairEnergyEntry {
            center: 2,
            partner: 1,
            energy: 9.0,
        });
        assert!(matches!(
            build(&data, false),
            Err(EngineError::InvalidReference { domain: "pair interaction", .. })
        ));
    }

    #[test]
    fn group_entries_fill_their_symmetry_images() {
        let data = with_linear_group(cubic_reference());
        let (_, energy) = build(&data, false).unwrap();
        let model = &energy.group_energies[energy.group_order[0]];
        assert_eq!(model.occupation_codes.len(), 4);
        assert_eq!(model.energy(1, occupation_code(&[1, 2])), Some(0.75));
        // The mirror maps the first partner onto the second.
        assert_eq!(model.energy(1, occupation_code(&[2, 1])), Some(0.75));
        assert_eq!(model.energy(1, occupation_code(&[1, 1])), Some(0.0));
        assert_eq!(model.energy(0, occupation_code(&[1, 1])), None);
    }

    #[test]
    fn group_entry_with_forbidden_particle_is_rejected() {
        let mut data = with_linear_group(cubic_reference());
        data.group_interactions[0].energies[0].occupation = vec![1, 0];
        assert!(build(&data, false).is_err());
    }

    #[test]
    fn port_with_misplaced_interaction_is_rejected() {
        let data = cubic_reference();
        let (structure, _) = build(&data, false).unwrap();
        let mut shifted = data.clone();
        shifted.pair_interactions[0].index = 5;
        let config = BuildConfig::default();
        let reporter = ProgressReporter::new();
        assert!(matches!(
            run(&BuildScope::new(&shifted, &config, &reporter), &structure),
            Err(EngineError::InvalidReference { domain: "pair interaction", .. })
        ));
    }

    #[test]
    fn parallel_and_sequential_builds_agree() {
        let data = with_linear_group(cubic_reference());
        let (_, sequential) = build(&data, false).unwrap();
        let (_, parallel) = build(&data, true).unwrap();
        let table = |e: &EnergyContext| e.pair_energies[e.pair_order[0]].table.clone();
        assert_eq!(table(&sequential), table(&parallel));
        let group = |e: &EnergyContext| e.group_energies[e.group_order[0]].table.clone();
        assert_eq!(group(&sequential), group(&parallel));
    }
}
