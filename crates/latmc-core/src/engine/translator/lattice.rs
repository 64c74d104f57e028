use crate::core::interop::records::{ArrayDescriptor, LatticeInfoRecord};
use crate::engine::context::{Mobility, SimulationContext, StructureContext};
use crate::engine::error::EngineError;

/// Lattice info of one simulation. Mobile and selectable counts are taken over the whole
/// supercell: every unit cell position that holds at least one such particle counts once
/// per unit cell. Fails when a count does not fit the 32-bit record fields.
pub fn lattice_info(
    structure: &StructureContext,
    simulation: &SimulationContext,
) -> Result<LatticeInfoRecord, EngineError> {
    let too_large = |what: &str| EngineError::InvalidReference {
        domain: "simulation",
        index: simulation.simulation,
        reason: format!("{what} of lattice {:?} exceeds the 32-bit range", simulation.lattice_size),
    };
    let [a, b, c] = simulation.lattice_size;
    let positions = i32::try_from(structure.position_count()).map_err(|_| too_large("position count"))?;
    let cells = a
        .checked_mul(b)
        .and_then(|ab| ab.checked_mul(c))
        .ok_or_else(|| too_large("cell count"))?;
    let indexing = &simulation.indexing;

    let mobile_positions = indexing
        .mobility
        .iter()
        .filter(|row| row.iter().any(|m| *m != Mobility::Immobile))
        .count() as i32;
    let selectable_positions = indexing.selection_masks.iter().filter(|m| **m != 0).count() as i32;

    let mobiles_count = cells
        .checked_mul(mobile_positions)
        .ok_or_else(|| too_large("mobile count"))?;
    let selectables_count = cells
        .checked_mul(selectable_positions)
        .ok_or_else(|| too_large("selectable count"))?;

    Ok(LatticeInfoRecord {
        size_vector: [a, b, c, positions],
        mobiles_count,
        selectables_count,
        lattice: ArrayDescriptor::new(&[a, b, c, positions]),
        background: ArrayDescriptor::new(&[positions, indexing.particle_count() as i32]),
        padding: [0; 8],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::interop::records::InteropRecord;
    use crate::engine::tasks::structure::tests::cubic_reference;
    use crate::engine::translator::tests::translated;

    #[test]
    fn cubic_supercell_counts_every_cell() {
        let (context, _) = translated(&cubic_reference());
        let record = lattice_info(context.structure().unwrap(), &context.simulations[0]).unwrap();
        assert_eq!(record.size_vector, [4, 4, 4, 1]);
        assert_eq!(record.mobiles_count, 64);
        assert_eq!(record.selectables_count, 64);
        assert_eq!(record.lattice.rank, 4);
        assert_eq!(record.background.dimensions, [1, 3, 0, 0]);
        assert_eq!(record.encode().unwrap().len(), 72);
    }

    #[test]
    fn oversized_supercell_is_rejected() {
        let (context, _) = translated(&cubic_reference());
        let mut simulation = context.simulations[0].clone();
        simulation.lattice_size = [i32::MAX, 2, 1];
        let error = lattice_info(context.structure().unwrap(), &simulation).unwrap_err();
        assert!(matches!(error, EngineError::InvalidReference { domain: "simulation", index: 0, .. }));
    }
}
