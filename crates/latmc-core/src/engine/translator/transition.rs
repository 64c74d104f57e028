use crate::core::interop::blob::{Blob, BlobKind};
use crate::core::interop::records::{InteropError, JumpDirectionRecord, JumpLinkRecord, JumpRuleRecord, MoveVectorRecord};
use crate::core::models::simulation::SimulationKind;
use crate::engine::context::{JumpDirectionModel, MappingModel, RuleModel, SimulationContext, TransitionContext};
use nalgebra::Vector3;

fn move_vector(vector: &Vector3<f64>, tracker_id: usize) -> MoveVectorRecord {
    MoveVectorRecord {
        vector: [vector.x, vector.y, vector.z],
        tracker_id: tracker_id as i32,
        padding: [0; 4],
    }
}

fn direction_record(direction: &JumpDirectionModel, mapping: &MappingModel) -> JumpDirectionRecord {
    let mut sequence = [[0; 4]; 8];
    for (slot, vector) in sequence.iter_mut().zip(&mapping.path) {
        *slot = vector.to_array();
    }
    JumpDirectionRecord {
        object_id: direction.id as i32,
        position_id: direction.position as i32,
        collection_id: direction.collection as i32,
        jump_length: mapping.path_length() as i32,
        field_projection: direction.field_projection,
        sequence,
    }
}

fn rule_record(rule: &RuleModel, kind: SimulationKind, max_frequency: f64) -> JumpRuleRecord {
    let frequency_factor = match kind {
        SimulationKind::Metropolis => 1.0,
        SimulationKind::Kinetic if max_frequency > 0.0 => rule.attempt_frequency / max_frequency,
        SimulationKind::Kinetic => 0.0,
    };
    JumpRuleRecord {
        start_state: rule.start_code,
        transition_state: rule.transition_code,
        final_state: rule.final_code,
        frequency_factor,
        field_factor: rule.field_factor,
        static_correction: 0.0,
        tracker_order: rule.tracker_order,
    }
}

/// Jump directions with their links and move vectors, the rules of every collection and
/// the indexing tables. Blobs without an id are simulation-wide.
pub fn jump_blobs(
    transitions: &TransitionContext,
    simulation: &SimulationContext,
) -> Result<Vec<(BlobKind, Option<usize>, Blob)>, InteropError> {
    let mut blobs = Vec::new();

    let directions: Vec<JumpDirectionRecord> = simulation
        .directions
        .iter()
        .map(|d| direction_record(d, &transitions.mappings[d.mapping]))
        .collect();
    blobs.push((
        BlobKind::JumpDirections,
        None,
        Blob::from_records(BlobKind::JumpDirections, &directions)?,
    ));

    let mut global_moves = Vec::with_capacity(simulation.directions.len());
    for direction in &simulation.directions {
        let mapping = &transitions.mappings[direction.mapping];
        let links: Vec<JumpLinkRecord> = direction
            .jump_links
            .iter()
            .map(|&(path_id, link_id)| JumpLinkRecord { path_id, link_id })
            .collect();
        let moves: Vec<MoveVectorRecord> = mapping
            .movement
            .iter()
            .enumerate()
            .map(|(i, v)| move_vector(v, i))
            .collect();
        blobs.push((
            BlobKind::JumpLinks,
            Some(direction.id),
            Blob::from_records(BlobKind::JumpLinks, &links)?,
        ));
        blobs.push((
            BlobKind::MoveVectors,
            Some(direction.id),
            Blob::from_records(BlobKind::MoveVectors, &moves)?,
        ));
        global_moves.push(move_vector(&mapping.global_movement, direction.id));
    }
    blobs.push((
        BlobKind::GlobalMoves,
        None,
        Blob::from_records(BlobKind::GlobalMoves, &global_moves)?,
    ));

    for collection in &simulation.collections {
        let rules: Vec<JumpRuleRecord> = collection
            .rules
            .iter()
            .map(|id| rule_record(&transitions.rules[*id], simulation.kind, simulation.max_frequency))
            .collect();
        blobs.push((
            BlobKind::JumpRules,
            Some(collection.id),
            Blob::from_records(BlobKind::JumpRules, &rules)?,
        ));
    }

    let indexing = &simulation.indexing;
    let (positions, particles) = indexing.jump_count.shape();
    let counts: Vec<i32> = (0..positions)
        .flat_map(|p| (0..particles).map(move |s| indexing.jump_count[(p, s)]))
        .collect();
    blobs.push((
        BlobKind::JumpCounts,
        None,
        Blob::from_table(BlobKind::JumpCounts, &[positions, particles], &counts)?,
    ));
    blobs.push((
        BlobKind::JumpAssign,
        None,
        Blob::from_table(
            BlobKind::JumpAssign,
            &[positions, particles, indexing.max_directions],
            &indexing.jump_assign,
        )?,
    ));

    Ok(blobs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tasks::structure::tests::cubic_reference;
    use crate::engine::translator::tests::translated;

    fn blobs_of(kind: BlobKind, blobs: &[(BlobKind, Option<usize>, Blob)]) -> Vec<&Blob> {
        blobs.iter().filter(|(k, _, _)| *k == kind).map(|(_, _, b)| b).collect()
    }

    #[test]
    fn directions_carry_padded_paths() {
        let (context, _) = translated(&cubic_reference());
        let simulation = &context.simulations[0];
        let blobs = jump_blobs(context.transition().unwrap(), simulation).unwrap();
        let records = blobs_of(BlobKind::JumpDirections, &blobs)[0]
            .records::<JumpDirectionRecord>()
            .unwrap();
        assert_eq!(records.len(), 6);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.object_id, i as i32);
            assert_eq!(record.jump_length, 2);
            assert_eq!(record.sequence[0], [0, 0, 0, 0]);
            assert!(record.sequence[2..].iter().all(|v| *v == [0; 4]));
        }
        let projections: f64 = records.iter().map(|r| r.field_projection).sum();
        assert!(projections.abs() < 1e-9);
    }

    #[test]
    fn every_direction_gets_links_and_moves() {
        let (context, _) = translated(&cubic_reference());
        let blobs = jump_blobs(context.transition().unwrap(), &context.simulations[0]).unwrap();
        assert_eq!(blobs_of(BlobKind::JumpLinks, &blobs).len(), 6);
        let moves = blobs_of(BlobKind::MoveVectors, &blobs);
        assert_eq!(moves.len(), 6);
        let first = moves[0].records::<MoveVectorRecord>().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[1].tracker_id, 1);
        let global = blobs_of(BlobKind::GlobalMoves, &blobs)[0]
            .records::<MoveVectorRecord>()
            .unwrap();
        assert_eq!(global.len(), 6);
        assert!(global.iter().all(|m| m.vector.iter().all(|c| c.abs() < 1e-9)));
    }

    #[test]
    fn single_kinetic_transition_has_unit_frequency_factor() {
        let (context, _) = translated(&cubic_reference());
        let blobs = jump_blobs(context.transition().unwrap(), &context.simulations[0]).unwrap();
        let rules = blobs_of(BlobKind::JumpRules, &blobs)[0]
            .records::<JumpRuleRecord>()
            .unwrap();
        assert_eq!(rules.len(), 2);
        assert!(rules.iter().all(|r| r.frequency_factor == 1.0 && r.static_correction == 0.0));
        assert!((rules[0].field_factor + rules[1].field_factor).abs() < 1e-12);
    }

    #[test]
    fn indexing_tables_keep_their_shape() {
        let (context, _) = translated(&cubic_reference());
        let blobs = jump_blobs(context.transition().unwrap(), &context.simulations[0]).unwrap();
        let counts = blobs_of(BlobKind::JumpCounts, &blobs)[0];
        assert_eq!(counts.dimensions(), vec![1, 3]);
        assert_eq!(counts.values::<i32>().unwrap(), vec![0, 6, 6]);
        let assign = blobs_of(BlobKind::JumpAssign, &blobs)[0];
        assert_eq!(assign.dimensions(), vec![1, 3, 6]);
        let values = assign.values::<i32>().unwrap();
        assert!(values[..6].iter().all(|v| *v == -1));
        assert_eq!(&values[6..12], &[0, 1, 2, 3, 4, 5]);
    }
}
