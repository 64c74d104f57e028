use crate::core::interop::blob::{Blob, BlobKind};
use crate::core::interop::records::{InteropError, ParticleBufferRecord};
use crate::engine::context::{EnergyContext, GroupEnergyModel};
use nalgebra::DMatrix;

/// Row-major copy of a table.
fn row_major<T: nalgebra::Scalar + Copy>(table: &DMatrix<T>) -> Vec<T> {
    let (rows, cols) = table.shape();
    (0..rows)
        .flat_map(|r| (0..cols).map(move |c| table[(r, c)]))
        .collect()
}

fn particle_buffer(model: &GroupEnergyModel) -> ParticleBufferRecord {
    let mut buffer = ParticleBufferRecord::unused();
    for (&particle, &row) in &model.redirection {
        if let Some(slot) = buffer.entries.get_mut(particle) {
            *slot = row as u8;
        }
    }
    buffer
}

/// Pair tables, then cluster tables with their occupation codes and particle buffers.
/// Ids are the canonical model indices.
pub fn energy_blobs(energy: &EnergyContext) -> Result<Vec<(BlobKind, usize, Blob)>, InteropError> {
    let mut blobs = Vec::new();
    for id in &energy.pair_order {
        let model = &energy.pair_energies[*id];
        let (rows, cols) = model.table.shape();
        blobs.push((
            BlobKind::PairTable,
            model.model_id,
            Blob::from_table(BlobKind::PairTable, &[rows, cols], &row_major(&model.table))?,
        ));
    }
    for id in &energy.group_order {
        let model = &energy.group_energies[*id];
        let (rows, cols) = model.table.shape();
        blobs.push((
            BlobKind::ClusterTable,
            model.model_id,
            Blob::from_table(BlobKind::ClusterTable, &[rows, cols], &row_major(&model.table))?,
        ));
        blobs.push((
            BlobKind::OccupationCodes,
            model.model_id,
            Blob::from_table(BlobKind::OccupationCodes, &[model.occupation_codes.len()], &model.occupation_codes)?,
        ));
        blobs.push((
            BlobKind::ParticleTableBuffer,
            model.model_id,
            Blob::from_records(BlobKind::ParticleTableBuffer, &[particle_buffer(model)])?,
        ));
    }
    Ok(blobs)
}
