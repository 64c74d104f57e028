//! Tier-two conflict handling for reference changes.
//!
//! A [`ConflictPipeline`] maps every [`ConflictKind`] to an ordered list of handler
//! functions. The first handler that returns [`HandlerOutcome::Resolved`] wins; a conflict
//! that every handler defers (or that has no handler at all) stays unresolved and is
//! reported to the caller.

use crate::core::analysis::transition::is_ring_fractional;
use crate::core::models::energy::{GroupInteraction, PairInteraction};
use crate::core::models::particle::{ModelState, Particle};
use crate::core::models::reference::ReferenceData;
use crate::core::models::simulation::Simulation;
use crate::core::models::structure::{CellSite, SpaceGroupEntry};
use crate::core::models::transition::KineticTransition;
use crate::core::symmetry::{SpaceGroup, SymmetryEngine};
use crate::core::utils::comparer::NumericComparer;
use crate::core::utils::geometry::{cell_offset, to_fractional_offset, trim_to_unit_cell};
use crate::engine::error::EngineError;
use nalgebra::Vector3;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

/// A single edit of the reference model.
#[derive(Debug, Clone, PartialEq)]
pub enum ReferenceChange {
    AddParticle(Particle),
    RemoveParticle(usize),
    AddSite(CellSite),
    RemoveSite(usize),
    SetSpaceGroup(SpaceGroupEntry),
    AddPairInteraction(PairInteraction),
    AddGroupInteraction(GroupInteraction),
    AddKineticTransition(KineticTransition),
    AddSimulation(Simulation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConflictKind {
    EquivalentSites,
    RemovedParticle,
    RemovedSite,
    DuplicatePairInteraction,
    DuplicateGroupInteraction,
    RingGeometry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    /// Two active sites are symmetry images of each other.
    EquivalentSites { kept: usize, duplicate: usize },
    RemovedParticle { particle: usize },
    RemovedSite { site: usize },
    DuplicatePairInteraction { existing: usize, newcomer: usize },
    DuplicateGroupInteraction { existing: usize, newcomer: usize },
    RingGeometry { transition: usize },
}

impl Conflict {
    pub fn kind(&self) -> ConflictKind {
        match self {
            Conflict::EquivalentSites { .. } => ConflictKind::EquivalentSites,
            Conflict::RemovedParticle { .. } => ConflictKind::RemovedParticle,
            Conflict::RemovedSite { .. } => ConflictKind::RemovedSite,
            Conflict::DuplicatePairInteraction { .. } => ConflictKind::DuplicatePairInteraction,
            Conflict::DuplicateGroupInteraction { .. } => ConflictKind::DuplicateGroupInteraction,
            Conflict::RingGeometry { .. } => ConflictKind::RingGeometry,
        }
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conflict::EquivalentSites { kept, duplicate } => {
                write!(f, "site {duplicate} is equivalent to site {kept}")
            }
            Conflict::RemovedParticle { particle } => {
                write!(f, "removed particle {particle} is still referenced")
            }
            Conflict::RemovedSite { site } => write!(f, "removed site {site} is still referenced"),
            Conflict::DuplicatePairInteraction { existing, newcomer } => {
                write!(f, "pair interaction {newcomer} duplicates {existing}")
            }
            Conflict::DuplicateGroupInteraction { existing, newcomer } => {
                write!(f, "group interaction {newcomer} duplicates {existing}")
            }
            Conflict::RingGeometry { transition } => {
                write!(f, "kinetic transition {transition} describes a ring path")
            }
        }
    }
}

/// One modification a handler made to resolve a conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionRecord {
    pub domain: &'static str,
    pub index: usize,
    pub action: String,
}

impl ResolutionRecord {
    fn new(domain: &'static str, index: usize, action: impl Into<String>) -> Self {
        Self {
            domain,
            index,
            action: action.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    Resolved(Vec<ResolutionRecord>),
    Deferred,
}

pub type ConflictHandler = fn(&Conflict, &mut ReferenceData) -> HandlerOutcome;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictReport {
    pub resolved: Vec<(Conflict, Vec<ResolutionRecord>)>,
    pub unresolved: Vec<Conflict>,
}

impl ConflictReport {
    pub fn is_clean(&self) -> bool {
        self.resolved.is_empty() && self.unresolved.is_empty()
    }
}

#[derive(Clone, Default)]
pub struct ConflictPipeline {
    handlers: HashMap<ConflictKind, Vec<ConflictHandler>>,
}

impl ConflictPipeline {
    /// An empty pipeline: every conflict stays unresolved.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_handlers() -> Self {
        let mut pipeline = Self::new();
        pipeline.register(ConflictKind::EquivalentSites, deprecate_duplicate_site);
        pipeline.register(ConflictKind::RemovedParticle, strip_removed_particle);
        pipeline.register(ConflictKind::RemovedSite, deprecate_site_dependents);
        pipeline.register(ConflictKind::DuplicatePairInteraction, deprecate_pair_newcomer);
        pipeline.register(ConflictKind::DuplicateGroupInteraction, deprecate_group_newcomer);
        pipeline
    }

    /// Appends a handler; handlers of one kind run in registration order.
    pub fn register(&mut self, kind: ConflictKind, handler: ConflictHandler) {
        self.handlers.entry(kind).or_default().push(handler);
    }

    pub fn handler_count(&self, kind: ConflictKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }

    pub fn resolve(&self, conflicts: Vec<Conflict>, data: &mut ReferenceData) -> ConflictReport {
        let mut report = ConflictReport::default();
        'conflicts: for conflict in conflicts {
            for handler in self.handlers.get(&conflict.kind()).into_iter().flatten() {
                if let HandlerOutcome::Resolved(records) = handler(&conflict, data) {
                    debug!(%conflict, records = records.len(), "Conflict resolved.");
                    report.resolved.push((conflict, records));
                    continue 'conflicts;
                }
            }
            warn!(%conflict, "Conflict left unresolved.");
            report.unresolved.push(conflict);
        }
        report
    }
}

impl fmt::Debug for ConflictPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.handlers.iter().map(|(k, v)| (*k, v.len())).collect();
        kinds.sort();
        f.debug_struct("ConflictPipeline").field("handlers", &kinds).finish()
    }
}

// ----------------------------------------------------------------------------------------
// Detection
// ----------------------------------------------------------------------------------------

/// Finds the conflicts `change` introduced into `data`, which already contains it.
pub fn detect(
    data: &ReferenceData,
    change: &ReferenceChange,
    comparer: &NumericComparer,
) -> Result<Vec<Conflict>, EngineError> {
    let engine = || -> Result<SymmetryEngine, EngineError> {
        let entry = &data.space_group;
        let group = SpaceGroup::from_literals(entry.index, entry.name.clone(), &entry.operations, comparer)?;
        Ok(SymmetryEngine::new(group, *comparer))
    };

    let conflicts = match change {
        ReferenceChange::SetSpaceGroup(_) => {
            let engine = engine()?;
            let active: Vec<_> = data.sites.iter().filter(|s| s.is_active()).collect();
            let mut conflicts = Vec::new();
            let mut duplicates = Vec::new();
            for (i, kept) in active.iter().enumerate() {
                if duplicates.contains(&kept.index) {
                    continue;
                }
                let images = engine.equivalent_positions(&kept.position());
                for other in &active[i + 1..] {
                    let image = trim_to_unit_cell(&other.position(), comparer);
                    if !duplicates.contains(&other.index) && comparer.contains(&images, &image) {
                        duplicates.push(other.index);
                        conflicts.push(Conflict::EquivalentSites {
                            kept: kept.index,
                            duplicate: other.index,
                        });
                    }
                }
            }
            conflicts
        }
        ReferenceChange::AddSite(site) => {
            let engine = engine()?;
            let image = trim_to_unit_cell(&site.position(), comparer);
            data.sites
                .iter()
                .filter(|s| s.is_active() && s.index != site.index)
                .find(|s| comparer.contains(&engine.equivalent_positions(&s.position()), &image))
                .map(|s| Conflict::EquivalentSites {
                    kept: s.index,
                    duplicate: site.index,
                })
                .into_iter()
                .collect()
        }
        ReferenceChange::RemoveParticle(particle) => {
            let particle = *particle;
            let in_sets = data
                .particle_sets
                .iter()
                .any(|s| s.particles.contains(&particle));
            let in_pairs = data.pair_interactions.iter().any(|i| {
                i.energies
                    .iter()
                    .any(|e| e.center == particle || e.partner == particle)
            });
            let in_groups = data.group_interactions.iter().any(|i| {
                i.energies
                    .iter()
                    .any(|e| e.center == particle || e.occupation.contains(&particle))
            });
            if in_sets || in_pairs || in_groups {
                vec![Conflict::RemovedParticle { particle }]
            } else {
                Vec::new()
            }
        }
        ReferenceChange::RemoveSite(site) => {
            let site = *site;
            let referenced = data
                .pair_interactions
                .iter()
                .any(|i| i.is_active() && (i.site0 == site || i.site1 == site))
                || data
                    .group_interactions
                    .iter()
                    .any(|i| i.is_active() && i.center_site == site)
                || data
                    .metropolis_transitions
                    .iter()
                    .any(|t| t.is_active() && (t.site0 == site || t.site1 == site));
            if referenced {
                vec![Conflict::RemovedSite { site }]
            } else {
                Vec::new()
            }
        }
        ReferenceChange::AddPairInteraction(newcomer) => {
            let engine = engine()?;
            let realizations = engine.path_realizations(&[newcomer.first(), newcomer.second()]);
            data.pair_interactions
                .iter()
                .filter(|i| i.is_active() && i.index != newcomer.index)
                .find(|existing| {
                    let forward = origin_shifted(&[existing.first(), existing.second()], comparer);
                    let backward = origin_shifted(&[existing.second(), existing.first()], comparer);
                    realizations.iter().any(|r| {
                        comparer.sequences_eq(r, &forward) || comparer.sequences_eq(r, &backward)
                    })
                })
                .map(|existing| Conflict::DuplicatePairInteraction {
                    existing: existing.index,
                    newcomer: newcomer.index,
                })
                .into_iter()
                .collect()
        }
        ReferenceChange::AddGroupInteraction(newcomer) => {
            let engine = engine()?;
            let Some(center) = data.sites.get(newcomer.center_site).map(|s| s.position()) else {
                return Ok(Vec::new());
            };
            let images = engine.unique_point_sequences(&center, &newcomer.partners());
            data.group_interactions
                .iter()
                .filter(|i| {
                    i.is_active() && i.index != newcomer.index && i.center_site == newcomer.center_site
                })
                .find(|existing| {
                    let partners = existing.partners();
                    images.iter().any(|image| comparer.point_sets_eq(image, &partners))
                })
                .map(|existing| Conflict::DuplicateGroupInteraction {
                    existing: existing.index,
                    newcomer: newcomer.index,
                })
                .into_iter()
                .collect()
        }
        ReferenceChange::AddKineticTransition(transition) => {
            if is_ring_fractional(&transition.path(), comparer) {
                vec![Conflict::RingGeometry {
                    transition: transition.index,
                }]
            } else {
                Vec::new()
            }
        }
        ReferenceChange::AddParticle(_) | ReferenceChange::AddSimulation(_) => Vec::new(),
    };
    Ok(conflicts)
}

/// Shifts a sequence so its first point lies in the origin cell.
fn origin_shifted(path: &[Vector3<f64>], comparer: &NumericComparer) -> Vec<Vector3<f64>> {
    let Some(first) = path.first() else {
        return Vec::new();
    };
    let shift = to_fractional_offset(&cell_offset(first, comparer));
    path.iter().map(|p| p - shift).collect()
}

// ----------------------------------------------------------------------------------------
// Default handlers
// ----------------------------------------------------------------------------------------

fn deprecate_duplicate_site(conflict: &Conflict, data: &mut ReferenceData) -> HandlerOutcome {
    let Conflict::EquivalentSites { duplicate, .. } = conflict else {
        return HandlerOutcome::Deferred;
    };
    let Some(site) = data.sites.get_mut(*duplicate) else {
        return HandlerOutcome::Deferred;
    };
    site.state = ModelState::Deprecated;
    HandlerOutcome::Resolved(vec![ResolutionRecord::new("site", *duplicate, "deprecated")])
}

fn strip_removed_particle(conflict: &Conflict, data: &mut ReferenceData) -> HandlerOutcome {
    let Conflict::RemovedParticle { particle } = conflict else {
        return HandlerOutcome::Deferred;
    };
    let particle = *particle;
    let mut records = Vec::new();
    for set in &mut data.particle_sets {
        if set.particles.contains(&particle) {
            set.particles.retain(|p| *p != particle);
            records.push(ResolutionRecord::new("particle set", set.index, format!("removed particle {particle}")));
        }
    }
    for interaction in &mut data.pair_interactions {
        let before = interaction.energies.len();
        interaction
            .energies
            .retain(|e| e.center != particle && e.partner != particle);
        if interaction.energies.len() != before {
            records.push(ResolutionRecord::new(
                "pair interaction",
                interaction.index,
                format!("dropped {} energy entries", before - interaction.energies.len()),
            ));
        }
    }
    for interaction in &mut data.group_interactions {
        let before = interaction.energies.len();
        interaction
            .energies
            .retain(|e| e.center != particle && !e.occupation.contains(&particle));
        if interaction.energies.len() != before {
            records.push(ResolutionRecord::new(
                "group interaction",
                interaction.index,
                format!("dropped {} energy entries", before - interaction.energies.len()),
            ));
        }
    }
    HandlerOutcome::Resolved(records)
}

fn deprecate_site_dependents(conflict: &Conflict, data: &mut ReferenceData) -> HandlerOutcome {
    let Conflict::RemovedSite { site } = conflict else {
        return HandlerOutcome::Deferred;
    };
    let site = *site;
    let mut records = Vec::new();
    for interaction in &mut data.pair_interactions {
        if interaction.is_active() && (interaction.site0 == site || interaction.site1 == site) {
            interaction.state = ModelState::Deprecated;
            records.push(ResolutionRecord::new("pair interaction", interaction.index, "deprecated"));
        }
    }
    for interaction in &mut data.group_interactions {
        if interaction.is_active() && interaction.center_site == site {
            interaction.state = ModelState::Deprecated;
            records.push(ResolutionRecord::new("group interaction", interaction.index, "deprecated"));
        }
    }
    for transition in &mut data.metropolis_transitions {
        if transition.is_active() && (transition.site0 == site || transition.site1 == site) {
            transition.state = ModelState::Deprecated;
            records.push(ResolutionRecord::new("metropolis transition", transition.index, "deprecated"));
        }
    }
    HandlerOutcome::Resolved(records)
}

fn deprecate_pair_newcomer(conflict: &Conflict, data: &mut ReferenceData) -> HandlerOutcome {
    let Conflict::DuplicatePairInteraction { newcomer, .. } = conflict else {
        return HandlerOutcome::Deferred;
    };
    match data.pair_interactions.get_mut(*newcomer) {
        Some(interaction) => {
            interaction.state = ModelState::Deprecated;
            HandlerOutcome::Resolved(vec![ResolutionRecord::new("pair interaction", *newcomer, "deprecated")])
        }
        None => HandlerOutcome::Deferred,
    }
}

fn deprecate_group_newcomer(conflict: &Conflict, data: &mut ReferenceData) -> HandlerOutcome {
    let Conflict::DuplicateGroupInteraction { newcomer, .. } = conflict else {
        return HandlerOutcome::Deferred;
    };
    match data.group_interactions.get_mut(*newcomer) {
        Some(interaction) => {
            interaction.state = ModelState::Deprecated;
            HandlerOutcome::Resolved(vec![ResolutionRecord::new("group interaction", *newcomer, "deprecated")])
        }
        None => HandlerOutcome::Deferred,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tasks::structure::tests::cubic_reference;

    fn mirrored_pair(data: &ReferenceData) -> PairInteraction {
        let mut pair = data.pair_interactions[0].clone();
        pair.index = 1;
        pair.position1 = [0.0, -3.0, 0.0];
        pair
    }

    #[test]
    fn symmetry_equivalent_pair_is_detected() {
        let mut data = cubic_reference();
        let pair = mirrored_pair(&data);
        data.pair_interactions.push(pair.clone());
        let conflicts = detect(&data, &ReferenceChange::AddPairInteraction(pair), &NumericComparer::default()).unwrap();
        assert_eq!(
            conflicts,
            vec![Conflict::DuplicatePairInteraction {
                existing: 0,
                newcomer: 1
            }]
        );
    }

    #[test]
    fn longer_pair_is_not_a_duplicate() {
        let mut data = cubic_reference();
        let mut pair = mirrored_pair(&data);
        pair.position1 = [2.0, 0.0, 0.0];
        data.pair_interactions.push(pair.clone());
        let conflicts = detect(&data, &ReferenceChange::AddPairInteraction(pair), &NumericComparer::default()).unwrap();
        assert!(conflicts.is_empty());
    }

    #[test]
    fn default_pipeline_deprecates_the_newcomer() {
        let mut data = cubic_reference();
        data.pair_interactions.push(mirrored_pair(&data));
        let report = ConflictPipeline::with_default_handlers().resolve(
            vec![Conflict::DuplicatePairInteraction {
                existing: 0,
                newcomer: 1,
            }],
            &mut data,
        );
        assert!(report.unresolved.is_empty());
        assert_eq!(report.resolved.len(), 1);
        assert_eq!(data.pair_interactions[1].state, ModelState::Deprecated);
        assert!(data.pair_interactions[0].is_active());
    }

    #[test]
    fn ring_geometry_has_no_handler() {
        let pipeline = ConflictPipeline::with_default_handlers();
        assert_eq!(pipeline.handler_count(ConflictKind::RingGeometry), 0);
        let mut data = cubic_reference();
        let report = pipeline.resolve(vec![Conflict::RingGeometry { transition: 0 }], &mut data);
        assert_eq!(report.unresolved, vec![Conflict::RingGeometry { transition: 0 }]);
    }

    #[test]
    fn deferring_handler_falls_through_to_the_next() {
        fn defer(_: &Conflict, _: &mut ReferenceData) -> HandlerOutcome {
            HandlerOutcome::Deferred
        }
        let mut pipeline = ConflictPipeline::new();
        pipeline.register(ConflictKind::RemovedParticle, defer);
        pipeline.register(ConflictKind::RemovedParticle, strip_removed_particle);
        let mut data = cubic_reference();
        let report = pipeline.resolve(vec![Conflict::RemovedParticle { particle: 2 }], &mut data);
        assert!(report.unresolved.is_empty());
        assert_eq!(data.particle_sets[0].particles, vec![1]);
        assert_eq!(data.pair_interactions[0].energies.len(), 1);
    }

    #[test]
    fn equivalent_sites_after_group_change() {
        let mut data = cubic_reference();
        let mut twin = data.sites[0].clone();
        twin.index = 1;
        twin.vector = [0.5, 0.0, 0.0];
        data.sites.push(twin);
        let mut entry = data.space_group.clone();
        entry.operations.push("x+1/2,y,z".to_string());
        data.space_group = entry.clone();
        let conflicts = detect(&data, &ReferenceChange::SetSpaceGroup(entry), &NumericComparer::default()).unwrap();
        assert_eq!(conflicts, vec![Conflict::EquivalentSites { kept: 0, duplicate: 1 }]);
    }
}
