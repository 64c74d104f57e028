//! # Binary Interop Translator
//!
//! Encodes one finished simulation context into the fixed-layout blobs read by the native
//! simulation engine.
//!
//! ## Overview
//!
//! Every blob is stored under a key of the form `sim{index}/{kind}` or
//! `sim{index}/{kind}/{id}`, where `kind` is the [`BlobKind`] name and `id` the owning
//! position, table, direction or collection. Record blobs carry one fixed-size
//! [`InteropRecord`](crate::core::interop::records::InteropRecord) per element; table blobs
//! carry row-major plain values.
//!
//! ## Architecture
//!
//! - [`lattice`]: the lattice info record
//! - [`structure`]: pair and cluster definitions per unit cell position
//! - [`energy`]: pair tables, cluster tables, occupation codes and particle buffers
//! - [`transition`]: jump directions, links, move vectors, rules and the indexing tables
//!
//! [`verify`] re-reads every blob of a set and checks the round trip is byte-identical.

pub mod energy;
pub mod lattice;
pub mod structure;
pub mod transition;

use crate::core::analysis::transition::is_ring_encoded;
use crate::core::interop::blob::{Blob, BlobKind, BlobSet};
use crate::core::interop::records::{
    ClusterDefinitionRecord, InteropError, InteropRecord, JumpDirectionRecord, JumpLinkRecord,
    JumpRuleRecord, LatticeInfoRecord, MoveVectorRecord, PairDefinitionRecord, ParticleBufferRecord,
};
use crate::engine::context::{ModelContext, SimulationContext};
use crate::engine::error::EngineError;
use tracing::{info, instrument};

pub fn blob_key(simulation: usize, kind: BlobKind, id: Option<usize>) -> String {
    match id {
        Some(id) => format!("sim{simulation}/{}/{id}", kind.name()),
        None => format!("sim{simulation}/{}", kind.name()),
    }
}

/// Encodes every blob of one simulation.
#[instrument(skip_all, name = "translation_task", fields(simulation = simulation.simulation))]
pub fn translate(context: &ModelContext, simulation: &SimulationContext) -> Result<BlobSet, EngineError> {
    context.require("translation", &["structure", "energy", "transition"])?;
    let structure = context.structure()?;
    let energy = context.energy()?;
    let transitions = context.transition()?;

    for direction in &simulation.directions {
        let mapping = &transitions.mappings[direction.mapping];
        if is_ring_encoded(&mapping.path) {
            return Err(EngineError::RingTransition {
                transition: transitions.transitions[mapping.transition].reference,
            });
        }
    }

    let mut blobs = BlobSet::new();
    let index = simulation.simulation;
    let mut put = |kind: BlobKind, id: Option<usize>, blob: Blob| blobs.insert(blob_key(index, kind, id), blob);

    put(
        BlobKind::LatticeInfo,
        None,
        Blob::from_records(BlobKind::LatticeInfo, &[lattice::lattice_info(structure, simulation)?])?,
    );
    for (p, records) in structure::pair_definitions(structure).into_iter().enumerate() {
        put(BlobKind::PairDefinitions, Some(p), Blob::from_records(BlobKind::PairDefinitions, &records)?);
    }
    for (p, records) in structure::cluster_definitions(structure).into_iter().enumerate() {
        put(BlobKind::ClusterDefinitions, Some(p), Blob::from_records(BlobKind::ClusterDefinitions, &records)?);
    }
    for (kind, id, blob) in energy::energy_blobs(energy)? {
        put(kind, Some(id), blob);
    }
    for (kind, id, blob) in transition::jump_blobs(transitions, simulation)? {
        put(kind, id, blob);
    }

    info!(blobs = blobs.len(), bytes = blobs.total_bytes(), "Simulation translated.");
    Ok(blobs)
}

fn verify_records<R: InteropRecord>(blob: &Blob) -> Result<(), InteropError> {
    let mut payload = Vec::with_capacity(blob.payload().len());
    for record in blob.records::<R>()? {
        payload.extend_from_slice(&record.encode()?);
    }
    if payload != blob.payload() {
        return Err(InteropError::CorruptHeader(format!(
            "{} records do not re-encode identically",
            R::NAME
        )));
    }
    Ok(())
}

/// Re-reads every blob and checks header and payload round-trip byte for byte.
#[instrument(skip_all, name = "translation_verify")]
pub fn verify(blobs: &BlobSet) -> Result<(), EngineError> {
    for (_, blob) in blobs.iter() {
        let bytes = blob.to_bytes();
        let reread = Blob::from_bytes(&bytes)?;
        if reread != *blob || reread.to_bytes() != bytes {
            return Err(InteropError::CorruptHeader(format!("{} blob changed on re-read", blob.kind().name())).into());
        }
        match blob.kind() {
            BlobKind::LatticeInfo => verify_records::<LatticeInfoRecord>(blob)?,
            BlobKind::PairDefinitions => verify_records::<PairDefinitionRecord>(blob)?,
            BlobKind::ClusterDefinitions => verify_records::<ClusterDefinitionRecord>(blob)?,
            BlobKind::ParticleTableBuffer => verify_records::<ParticleBufferRecord>(blob)?,
            BlobKind::JumpDirections => verify_records::<JumpDirectionRecord>(blob)?,
            BlobKind::JumpLinks => verify_records::<JumpLinkRecord>(blob)?,
            BlobKind::MoveVectors | BlobKind::GlobalMoves => verify_records::<MoveVectorRecord>(blob)?,
            BlobKind::JumpRules => verify_records::<JumpRuleRecord>(blob)?,
            BlobKind::PairTable
            | BlobKind::ClusterTable
            | BlobKind::OccupationCodes
            | BlobKind::JumpCounts
            | BlobKind::JumpAssign => {}
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::models::reference::ReferenceData;
    use crate::engine::config::BuildConfig;
    use crate::engine::context::BuildScope;
    use crate::engine::progress::ProgressReporter;
    use crate::engine::tasks::simulation;
    use crate::engine::tasks::structure::tests::cubic_reference;
    use crate::engine::tasks::transition::tests::build_through_transitions;

    pub(crate) fn translated(data: &ReferenceData) -> (ModelContext, BlobSet) {
        let mut context = build_through_transitions(data).unwrap();
        let config = BuildConfig::default();
        let reporter = ProgressReporter::new();
        let scope = BuildScope::new(data, &config, &reporter);
        let (sim, _) = simulation::run(&scope, &context, 0).unwrap();
        context.simulations.push(sim);
        let blobs = translate(&context, &context.simulations[0]).unwrap();
        (context, blobs)
    }

    #[test]
    fn keys_follow_simulation_kind_and_id() {
        assert_eq!(blob_key(0, BlobKind::LatticeInfo, None), "sim0/lattice-info");
        assert_eq!(blob_key(3, BlobKind::JumpRules, Some(1)), "sim3/jump-rules/1");
    }

    #[test]
    fn cubic_simulation_emits_every_blob_kind() {
        let (_, blobs) = translated(&cubic_reference());
        for kind in [
            BlobKind::LatticeInfo,
            BlobKind::JumpDirections,
            BlobKind::GlobalMoves,
            BlobKind::JumpCounts,
            BlobKind::JumpAssign,
        ] {
            assert!(blobs.get(&blob_key(0, kind, None)).is_some(), "missing {kind:?}");
        }
        for kind in [
            BlobKind::PairDefinitions,
            BlobKind::ClusterDefinitions,
            BlobKind::PairTable,
            BlobKind::JumpLinks,
            BlobKind::MoveVectors,
            BlobKind::JumpRules,
        ] {
            assert!(blobs.get(&blob_key(0, kind, Some(0))).is_some(), "missing {kind:?}");
        }
    }

    #[test]
    fn emitted_blobs_verify() {
        let (_, blobs) = translated(&cubic_reference());
        verify(&blobs).unwrap();
    }

    #[test]
    fn translation_is_deterministic() {
        let (_, first) = translated(&cubic_reference());
        let (_, second) = translated(&cubic_reference());
        let bytes = |set: &BlobSet| set.iter().map(|(k, b)| (k.clone(), b.to_bytes())).collect::<Vec<_>>();
        assert_eq!(bytes(&first), bytes(&second));
    }

    #[test]
    fn translation_requires_built_contexts() {
        let (context, _) = translated(&cubic_reference());
        let empty = ModelContext::new();
        assert!(matches!(
            translate(&empty, &context.simulations[0]),
            Err(EngineError::MissingContext { .. })
        ));
    }
}
