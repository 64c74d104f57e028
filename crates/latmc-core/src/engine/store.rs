use super::config::BuildConfig;
use super::conflict::{ConflictPipeline, ConflictReport, ReferenceChange, detect};
use super::error::{BuildReport, EngineError};
use crate::core::models::particle::{MAX_PARTICLE_COUNT, ModelState};
use crate::core::models::reference::ReferenceData;
use crate::core::utils::comparer::NumericComparer;
use std::sync::{RwLock, RwLockReadGuard};
use tracing::{info, instrument};

/// Shared owner of the reference model. Build passes hold the read lock for their whole
/// duration; changes take the write lock and are applied all-or-nothing.
#[derive(Debug)]
pub struct ReferenceStore {
    data: RwLock<ReferenceData>,
    pipeline: ConflictPipeline,
    comparer: NumericComparer,
}

impl ReferenceStore {
    pub fn new(data: ReferenceData) -> Self {
        Self::with_pipeline(data, ConflictPipeline::with_default_handlers(), &BuildConfig::default())
    }

    pub fn with_pipeline(data: ReferenceData, pipeline: ConflictPipeline, config: &BuildConfig) -> Self {
        Self {
            data: RwLock::new(data),
            pipeline,
            comparer: NumericComparer::new(config.geometry_tolerance),
        }
    }

    pub fn read(&self) -> Result<RwLockReadGuard<'_, ReferenceData>, EngineError> {
        self.data
            .read()
            .map_err(|_| EngineError::Internal("reference store lock is poisoned".to_string()))
    }

    pub fn snapshot(&self) -> Result<ReferenceData, EngineError> {
        Ok(self.read()?.clone())
    }

    /// Applies `change`, routing every conflict it introduces through the pipeline. When
    /// any conflict stays unresolved the stored data is left untouched.
    #[instrument(skip_all, name = "reference_change")]
    pub fn apply(&self, change: ReferenceChange) -> Result<ConflictReport, BuildReport> {
        let mut guard = self
            .data
            .write()
            .map_err(|_| EngineError::Internal("reference store lock is poisoned".to_string()))?;

        let mut working = guard.clone();
        apply_change(&mut working, &change)?;
        let conflicts = detect(&working, &change, &self.comparer)?;
        let report = self.pipeline.resolve(conflicts, &mut working);

        if !report.unresolved.is_empty() {
            let summary = report
                .unresolved
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(EngineError::UnresolvedConflict(summary).into());
        }
        info!(resolved = report.resolved.len(), "Reference change applied.");
        *guard = working;
        Ok(report)
    }
}

fn expect_next(domain: &'static str, index: usize, len: usize) -> Result<(), EngineError> {
    if index == len {
        Ok(())
    } else {
        Err(EngineError::InvalidReference {
            domain,
            index,
            reason: format!("new objects must take the next free index {len}"),
        })
    }
}

fn apply_change(data: &mut ReferenceData, change: &ReferenceChange) -> Result<(), EngineError> {
    let missing = |domain: &'static str, index: usize| EngineError::InvalidReference {
        domain,
        index,
        reason: "no such object".to_string(),
    };
    match change {
        ReferenceChange::AddParticle(particle) => {
            expect_next("particle", particle.index, data.particles.len())?;
            if data.particles.len() >= MAX_PARTICLE_COUNT {
                return Err(EngineError::InvalidReference {
                    domain: "particle",
                    index: particle.index,
                    reason: format!("at most {MAX_PARTICLE_COUNT} particles are supported"),
                });
            }
            data.particles.push(particle.clone());
        }
        ReferenceChange::RemoveParticle(index) => {
            let particle = data
                .particles
                .get_mut(*index)
                .filter(|p| !p.is_void())
                .ok_or_else(|| missing("particle", *index))?;
            particle.state = ModelState::Deprecated;
        }
        ReferenceChange::AddSite(site) => {
            expect_next("site", site.index, data.sites.len())?;
            data.sites.push(site.clone());
        }
        ReferenceChange::RemoveSite(index) => {
            let site = data.sites.get_mut(*index).ok_or_else(|| missing("site", *index))?;
            site.state = ModelState::Deprecated;
        }
        ReferenceChange::SetSpaceGroup(entry) => data.space_group = entry.clone(),
        ReferenceChange::AddPairInteraction(interaction) => {
            expect_next("pair interaction", interaction.index, data.pair_interactions.len())?;
            data.pair_interactions.push(interaction.clone());
        }
        ReferenceChange::AddGroupInteraction(interaction) => {
            expect_next("group interaction", interaction.index, data.group_interactions.len())?;
            data.group_interactions.push(interaction.clone());
        }
        ReferenceChange::AddKineticTransition(transition) => {
            expect_next("kinetic transition", transition.index, data.kinetic_transitions.len())?;
            data.kinetic_transitions.push(transition.clone());
        }
        ReferenceChange::AddSimulation(simulation) => {
            expect_next("simulation", simulation.index, data.simulations.len())?;
            data.simulations.push(simulation.clone());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::error::FailureTier;
    use crate::engine::tasks::structure::tests::cubic_reference;

    #[test]
    fn resolved_change_is_committed() {
        let store = ReferenceStore::new(cubic_reference());
        let mut pair = store.snapshot().unwrap().pair_interactions[0].clone();
        pair.index = 1;
        pair.position1 = [0.0, 0.0, 3.0];
        let report = store.apply(ReferenceChange::AddPairInteraction(pair)).unwrap();
        assert_eq!(report.resolved.len(), 1);
        let data = store.read().unwrap();
        assert_eq!(data.pair_interactions.len(), 2);
        assert_eq!(data.pair_interactions[1].state, ModelState::Deprecated);
    }

    #[test]
    fn unresolved_conflict_rolls_back() {
        let store = ReferenceStore::new(cubic_reference());
        let mut transition = store.snapshot().unwrap().kinetic_transitions[0].clone();
        transition.index = 1;
        transition.geometry = vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 0.0]];
        let report = store
            .apply(ReferenceChange::AddKineticTransition(transition))
            .unwrap_err();
        assert_eq!(report.tier, FailureTier::Conflict);
        assert_eq!(store.read().unwrap().kinetic_transitions.len(), 1);
    }

    #[test]
    fn out_of_order_index_is_rejected() {
        let store = ReferenceStore::new(cubic_reference());
        let mut site = store.snapshot().unwrap().sites[0].clone();
        site.index = 7;
        let report = store.apply(ReferenceChange::AddSite(site)).unwrap_err();
        assert_eq!(report.tier, FailureTier::Validation);
    }

    #[test]
    fn removing_a_referenced_site_deprecates_its_dependents() {
        let store = ReferenceStore::new(cubic_reference());
        let report = store.apply(ReferenceChange::RemoveSite(0)).unwrap();
        assert!(!report.is_clean());
        let data = store.read().unwrap();
        assert!(!data.sites[0].is_active());
        assert!(!data.pair_interactions[0].is_active());
    }

    #[test]
    fn void_particle_cannot_be_removed() {
        let store = ReferenceStore::new(cubic_reference());
        assert!(store.apply(ReferenceChange::RemoveParticle(0)).is_err());
    }
}
