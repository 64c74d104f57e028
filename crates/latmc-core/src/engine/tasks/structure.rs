use crate::core::analysis::transition::intermediate_positions_consistent;
use crate::core::models::ports::ReferencePort;
use crate::core::models::structure::CellSite;
use crate::core::symmetry::{SpaceGroup, SymmetryEngine};
use crate::core::utils::comparer::NumericComparer;
use crate::core::utils::encoder::VectorEncoder;
use crate::engine::context::{
    BuildScope, EnvironmentModel, GroupInteractionModel, PairInteractionModel, PositionModel,
    StructureContext, TargetInfo,
};
use crate::engine::error::EngineError;
use crate::engine::validation::check_indices;
use crate::engine::ids::{EnvironmentId, GroupModelId, PairModelId};
use nalgebra::Vector3;
use slotmap::{Key, SlotMap};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

const STAGE: &str = "structure";

#[instrument(skip_all, name = "structure_context_task")]
pub fn run<P: ReferencePort + ?Sized>(
    scope: &BuildScope<'_, P>,
) -> Result<StructureContext, EngineError> {
    let reference = scope.reference;
    check_indices(reference)?;
    let comparer = NumericComparer::new(scope.config.geometry_tolerance);

    // === Phase 1: Space group and cell ===
    let entry = reference.space_group();
    let group = SpaceGroup::from_literals(entry.index, entry.name.clone(), &entry.operations, &comparer)?;
    let symmetry = SymmetryEngine::new(group, comparer);
    let cell = *reference.cell_parameters();
    if !cell.is_valid() {
        return Err(EngineError::InvalidReference {
            domain: "cell",
            index: 0,
            reason: format!("{cell:?} does not describe a valid unit cell"),
        });
    }
    info!(
        group = symmetry.group().name(),
        operations = symmetry.group().len(),
        "Space group resolved."
    );

    // === Phase 2: Extended position list ===
    let sites: Vec<&CellSite> = reference.sites().iter().filter(|s| s.is_active()).collect();
    let mut positions: Vec<Vector3<f64>> = Vec::new();
    let mut position_sites: Vec<usize> = Vec::new();
    for site in &sites {
        if reference
            .particle_set(site.occupation)
            .is_none_or(|set| !set.state.is_active())
        {
            return Err(EngineError::InvalidReference {
                domain: "site",
                index: site.index,
                reason: format!("unknown or deprecated particle set {}", site.occupation),
            });
        }
        for image in symmetry.equivalent_positions(&site.position()) {
            if let Some(p) = comparer.position_of(&positions, &image) {
                return Err(EngineError::StructuralDefect {
                    stage: STAGE,
                    reason: format!(
                        "site {} overlaps site {} at position {p}",
                        site.index, position_sites[p]
                    ),
                });
            }
            positions.push(image);
            position_sites.push(site.index);
        }
    }
    let encoder = VectorEncoder::new(positions, cell, comparer);
    debug!(positions = encoder.position_count(), "Extended position list built.");

    // === Phase 3: Environments and pair models ===
    let mut environments: SlotMap<EnvironmentId, EnvironmentModel> = SlotMap::with_key();
    let mut environment_by_site = BTreeMap::new();
    let mut pair_models: SlotMap<PairModelId, PairInteractionModel> = SlotMap::with_key();
    let mut pair_classes: Vec<PairModelId> = Vec::new();

    for site in &sites {
        let env_id = environments.insert(EnvironmentModel {
            site: site.index,
            dictionary: symmetry.operation_dictionary(&site.position()),
            pair_models: Vec::new(),
            group_models: Vec::new(),
        });
        environment_by_site.insert(site.index, env_id);
    }

    for interaction in reference.pair_interactions().iter().filter(|i| i.is_active()) {
        for id in [interaction.site0, interaction.site1] {
            if reference.site(id).is_none_or(|s| !s.is_active()) {
                return Err(EngineError::InvalidReference {
                    domain: "pair interaction",
                    index: interaction.index,
                    reason: format!("unknown or deprecated site {id}"),
                });
            }
        }
        let mut orientations = vec![(false, interaction.site0, interaction.first(), interaction.second(), interaction.site1)];
        if interaction.site0 != interaction.site1 {
            orientations.push((true, interaction.site1, interaction.second(), interaction.first(), interaction.site0));
        }

        for (inverted, center_site, center, partner, partner_site) in orientations {
            let env_id = *environment_by_site.get(&center_site).ok_or_else(|| EngineError::InvalidReference {
                domain: "pair interaction",
                index: interaction.index,
                reason: format!("site {center_site} has no environment"),
            })?;
            let origin = environments[env_id].dictionary.source;
            let op = symmetry.operation_to_target(&center, &origin).ok_or_else(|| {
                EngineError::InvalidReference {
                    domain: "pair interaction",
                    index: interaction.index,
                    reason: format!("position {center:?} does not belong to site {center_site}"),
                }
            })?;
            let target = op.apply(&partner);

            let mut images: Vec<Vector3<f64>> = Vec::new();
            for projection in symmetry.self_projection_operations(&origin) {
                let image = projection.apply(&target);
                if !comparer.contains(&images, &image) {
                    images.push(image);
                }
            }

            let model_id = pair_classes.len();
            let mut members = Vec::with_capacity(images.len());
            for image in images {
                let landing = encoder.encode(&image).map(|v| position_sites[v.p as usize]);
                if landing != Some(partner_site) {
                    return Err(EngineError::InvalidReference {
                        domain: "pair interaction",
                        index: interaction.index,
                        reason: format!("partner {image:?} does not lie on site {partner_site}"),
                    });
                }
                let distance = cell.distance(&origin, &image);
                if comparer.is_zero(distance) {
                    return Err(EngineError::InvalidReference {
                        domain: "pair interaction",
                        index: interaction.index,
                        reason: "center and partner coincide".to_string(),
                    });
                }
                members.push(pair_models.insert(PairInteractionModel {
                    model_id,
                    environment: env_id,
                    interaction: interaction.index,
                    inverted,
                    center: origin,
                    target: image,
                    target_site: partner_site,
                    distance,
                    equivalent_models: Vec::new(),
                }));
            }
            for id in &members {
                pair_models[*id].equivalent_models = members.clone();
            }
            environments[env_id].pair_models.extend(&members);
            pair_classes.push(members[0]);
        }
    }
    info!(
        environments = environments.len(),
        pair_models = pair_models.len(),
        pair_classes = pair_classes.len(),
        "Pair interaction models built."
    );

    // === Phase 4: Group models ===
    let mut group_models: SlotMap<GroupModelId, GroupInteractionModel> = SlotMap::with_key();
    let mut group_classes: Vec<GroupModelId> = Vec::new();

    for interaction in reference.group_interactions().iter().filter(|i| i.is_active()) {
        let Some(&env_id) = environment_by_site.get(&interaction.center_site) else {
            return Err(EngineError::InvalidReference {
                domain: "group interaction",
                index: interaction.index,
                reason: format!("unknown or deprecated site {}", interaction.center_site),
            });
        };
        let partners = interaction.partners();
        if partners.is_empty() || partners.len() > 8 {
            return Err(EngineError::InvalidReference {
                domain: "group interaction",
                index: interaction.index,
                reason: format!("{} partners, expected 1 to 8", partners.len()),
            });
        }
        let origin = environments[env_id].dictionary.source;
        let reference_path: Vec<Vector3<f64>> = std::iter::once(origin).chain(partners.iter().copied()).collect();

        let model_id = group_classes.len();
        let mut members = Vec::new();
        for sequence in symmetry.unique_point_sequences(&origin, &partners) {
            let image_path: Vec<Vector3<f64>> = std::iter::once(origin).chain(sequence.iter().copied()).collect();
            if !intermediate_positions_consistent(&symmetry, &reference_path, &image_path) {
                return Err(EngineError::StructuralDefect {
                    stage: STAGE,
                    reason: format!(
                        "group interaction {} has inconsistent intermediate positions",
                        interaction.index
                    ),
                });
            }
            let env_pairs = &environments[env_id].pair_models;
            let mut coding = [-1i32; 8];
            for (slot, partner) in coding.iter_mut().zip(&sequence) {
                let index = env_pairs
                    .iter()
                    .position(|id| comparer.vectors_eq(&pair_models[*id].target, partner))
                    .ok_or_else(|| EngineError::StructuralDefect {
                        stage: STAGE,
                        reason: format!(
                            "partner {partner:?} of group interaction {} has no pair interaction",
                            interaction.index
                        ),
                    })?;
                *slot = index as i32;
            }
            members.push(group_models.insert(GroupInteractionModel {
                model_id,
                environment: env_id,
                interaction: interaction.index,
                center: origin,
                partners: sequence,
                pair_index_coding: coding,
                equivalent_models: Vec::new(),
            }));
        }
        for id in &members {
            group_models[*id].equivalent_models = members.clone();
        }
        environments[env_id].group_models.extend(&members);
        group_classes.push(members[0]);
    }
    info!(
        group_models = group_models.len(),
        group_classes = group_classes.len(),
        "Group interaction models built."
    );

    // === Phase 5: Position models ===
    let mut position_models = Vec::with_capacity(encoder.position_count());
    for (p, position) in encoder.positions().iter().enumerate() {
        let site = position_sites[p];
        let env_id = environment_by_site[&site];
        let env = &environments[env_id];
        let operation = symmetry
            .operation_to_target(&env.dictionary.source, position)
            .ok_or_else(|| EngineError::StructuralDefect {
                stage: STAGE,
                reason: format!("no operation maps site {site} onto position {p}"),
            })?;
        let mut targets = Vec::with_capacity(env.pair_models.len());
        for id in &env.pair_models {
            let model = &pair_models[*id];
            let target = operation.apply(&model.target);
            let relative = encoder.encode(&target).ok_or_else(|| EngineError::StructuralDefect {
                stage: STAGE,
                reason: format!("pair target {target:?} of position {p} is not a lattice position"),
            })?;
            targets.push(TargetInfo {
                pair_model: *id,
                model_id: model.model_id,
                relative,
            });
        }
        position_models.push(PositionModel {
            p,
            site,
            environment: env_id,
            operation,
            targets,
        });
    }

    // === Phase 6: Equivalence closure ===
    check_closure(&pair_classes, |id| {
        pair_models.get(id).map(|m| (m.model_id, m.equivalent_models.as_slice()))
    })?;
    check_closure(&group_classes, |id| {
        group_models.get(id).map(|m| (m.model_id, m.equivalent_models.as_slice()))
    })?;

    Ok(StructureContext {
        symmetry,
        encoder,
        position_sites,
        environments,
        environment_by_site,
        pair_models,
        group_models,
        position_models,
        pair_classes,
        group_classes,
    })
}

/// Every class member must carry the class index and list exactly the class members.
fn check_closure<'m, K: Key + 'm>(
    classes: &[K],
    lookup: impl Fn(K) -> Option<(usize, &'m [K])>,
) -> Result<(), EngineError> {
    let defect = |reason: String| EngineError::StructuralDefect {
        stage: STAGE,
        reason,
    };
    for (model_id, representative) in classes.iter().enumerate() {
        let (_, members) = lookup(*representative)
            .ok_or_else(|| defect(format!("class {model_id} has no representative")))?;
        if !members.contains(representative) {
            return Err(defect(format!("class {model_id} does not contain its representative")));
        }
        for member in members {
            let (member_id, member_set) = lookup(*member)
                .ok_or_else(|| defect(format!("class {model_id} references a missing model")))?;
            if member_id != model_id {
                return Err(defect(format!(
                    "member of class {model_id} carries index {member_id}"
                )));
            }
            if member_set.len() != members.len() || !members.iter().all(|m| member_set.contains(m)) {
                return Err(defect(format!("class {model_id} is not closed")));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::models::reference::ReferenceData;
    use crate::core::models::reference::tests::CUBIC_REFERENCE;
    use crate::core::symmetry::space_group::tests::cubic_point_group;
    use crate::engine::config::BuildConfig;
    use crate::engine::progress::ProgressReporter;

    pub(crate) fn cubic_reference() -> ReferenceData {
        let mut data = ReferenceData::from_toml_str(CUBIC_REFERENCE).unwrap();
        let group = cubic_point_group();
        data.space_group.index = group.index();
        data.space_group.name = group.name().to_string();
        data.space_group.operations = group
            .operations()
            .iter()
            .map(|op| op.literal().to_string())
            .collect();
        data
    }

    fn build(data: &ReferenceData) -> Result<StructureContext, EngineError> {
        let config = BuildConfig::default();
        let reporter = ProgressReporter::new();
        run(&BuildScope::new(data, &config, &reporter))
    }

    #[test]
    fn cubic_pair_forms_a_single_class_with_index_zero() {
        let context = build(&cubic_reference()).unwrap();
        assert_eq!(context.position_count(), 1);
        assert_eq!(context.pair_classes.len(), 1);
        assert_eq!(context.pair_models.len(), 6);
        assert!(context.pair_models.values().all(|m| m.model_id == 0));
        assert!(context.pair_models.values().all(|m| (m.distance - 3.0).abs() < 1e-9));
        let first = context.pair_classes[0];
        assert_eq!(context.pair_models[first].equivalent_models.len(), 6);
    }

    #[test]
    fn position_targets_are_encoded_relative_to_the_origin_cell() {
        let context = build(&cubic_reference()).unwrap();
        let targets = &context.position_models[0].targets;
        assert_eq!(targets.len(), 6);
        assert!(targets.iter().all(|t| t.relative.p == 0));
        assert!(targets.iter().any(|t| (t.relative.a, t.relative.b, t.relative.c) == (3, 0, 0)));
        assert!(targets.iter().any(|t| (t.relative.a, t.relative.b, t.relative.c) == (0, 0, -3)));
    }

    #[test]
    fn group_partners_are_coded_against_pair_models() {
        let mut data = cubic_reference();
        data.group_interactions.push(crate::core::models::energy::GroupInteraction {
            index: 0,
            center_site: 0,
            geometry: vec![[3.0, 0.0, 0.0], [-3.0, 0.0, 0.0]],
            energies: Vec::new(),
            state: Default::default(),
        });
        let context = build(&data).unwrap();
        assert_eq!(context.group_classes.len(), 1);
        // The linear cluster has one image per axis.
        assert_eq!(context.group_models.len(), 3);
        for model in context.group_models.values() {
            assert!(model.pair_index_coding[..2].iter().all(|c| *c >= 0));
            assert!(model.pair_index_coding[2..].iter().all(|c| *c == -1));
        }
    }

    #[test]
    fn group_partner_without_pair_is_a_defect() {
        let mut data = cubic_reference();
        data.group_interactions.push(crate::core::models::energy::GroupInteraction {
            index: 0,
            center_site: 0,
            geometry: vec![[1.0, 0.0, 0.0]],
            energies: Vec::new(),
            state: Default::default(),
        });
        assert!(matches!(
            build(&data),
            Err(EngineError::StructuralDefect { .. })
        ));
    }

    #[test]
    fn overlapping_sites_are_a_defect() {
        let mut data = cubic_reference();
        let mut twin = data.sites[0].clone();
        twin.index = 1;
        twin.vector = [1.0, 0.0, 0.0];
        data.sites.push(twin);
        assert!(matches!(
            build(&data),
            Err(EngineError::StructuralDefect { .. })
        ));
    }

    #[test]
    fn misplaced_reference_index_is_rejected() {
        let mut data = cubic_reference();
        data.pair_interactions[0].index = 5;
        assert!(matches!(
            build(&data),
            Err(EngineError::InvalidReference {
                domain: "pair interaction",
                index: 5,
                ..
            })
        ));
    }

    #[test]
    fn bad_space_group_is_fatal() {
        let mut data = cubic_reference();
        data.space_group.operations = vec!["-x,-y,-z".to_string()];
        assert!(matches!(build(&data), Err(EngineError::Symmetry(_))));
    }
}
