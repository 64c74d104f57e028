use crate::core::interop::records::{ClusterDefinitionRecord, PairDefinitionRecord};
use crate::engine::context::StructureContext;

/// Pair definitions of every unit cell position, in environment pair model order.
pub fn pair_definitions(structure: &StructureContext) -> Vec<Vec<PairDefinitionRecord>> {
    structure
        .position_models
        .iter()
        .map(|position| {
            position
                .targets
                .iter()
                .map(|target| PairDefinitionRecord {
                    relative: target.relative.to_array(),
                    table_id: target.model_id as i32,
                })
                .collect()
        })
        .collect()
}

/// Cluster definitions of every unit cell position. Pair ids index the pair definitions
/// of the same position.
pub fn cluster_definitions(structure: &StructureContext) -> Vec<Vec<ClusterDefinitionRecord>> {
    structure
        .position_models
        .iter()
        .map(|position| {
            structure.environments[position.environment]
                .group_models
                .iter()
                .map(|id| {
                    let model = &structure.group_models[*id];
                    ClusterDefinitionRecord {
                        pair_ids: model.pair_index_coding,
                        table_id: model.model_id as i32,
                    }
                })
                .collect()
        })
        .collect()
}
