use crate::core::analysis::rules::{
    PositionStates, RuleGenerator, TransitionRule, abstract_movement, occupation_code,
};
use crate::core::analysis::transition::{is_ring_encoded, is_ring_fractional};
use crate::core::models::particle::{Particle, VOID_PARTICLE_INDEX};
use crate::core::models::ports::ReferencePort;
use crate::core::models::simulation::SimulationKind;
use crate::core::models::transition::{AbstractTransition, ConnectorKind};
use crate::core::utils::encoder::{CrystalVector4, VectorEncoder};
use crate::core::utils::geometry::to_fractional_offset;
use crate::engine::context::{
    BuildScope, MappingModel, ModelContext, RuleModel, StructureContext, TransitionContext,
    TransitionModel,
};
use crate::engine::error::EngineError;
use crate::engine::ids::{MappingId, RuleId, TransitionId};
use crate::engine::validation::check_indices;
use nalgebra::Vector3;
use tracing::{debug, info, instrument};

const STAGE: &str = "transition";

/// One geometric realization before it enters the arena.
#[derive(Debug, Clone)]
struct MappingDraft {
    path: Vec<CrystalVector4>,
    fractional: Vec<Vector3<f64>>,
    movement: Vec<Vector3<f64>>,
}

#[derive(Debug, Clone)]
struct TransitionDraft {
    kind: SimulationKind,
    reference: usize,
    abstract_transition: usize,
    attempt_frequency: f64,
    connectors: Vec<ConnectorKind>,
    unstable: Vec<bool>,
    mappings: Vec<MappingDraft>,
    rules: Vec<TransitionRule>,
}

impl TransitionDraft {
    /// The draft seen from the end of every path.
    fn inverted(&self, encoder: &VectorEncoder) -> Option<Self> {
        let connectors: Vec<_> = self.connectors.iter().rev().copied().collect();
        let unstable: Vec<_> = self.unstable.iter().rev().copied().collect();
        let offsets = movement_offsets(self.kind, &connectors, &unstable);
        let mappings = self
            .mappings
            .iter()
            .map(|mapping| {
                let last = mapping.path.last()?;
                let shift = to_fractional_offset(&-last.cell());
                let fractional = mapping.fractional.iter().rev().map(|v| v + shift).collect();
                mapping_draft(encoder, fractional, &offsets)
            })
            .collect::<Option<Vec<_>>>()?;
        Some(Self {
            connectors,
            unstable,
            mappings,
            rules: self.rules.iter().map(TransitionRule::inverted).collect(),
            ..self.clone()
        })
    }
}

/// Builds the kinetic and Metropolis transition models. Requires the structure and energy
/// contexts of `context`.
#[instrument(skip_all, name = "transition_context_task")]
pub fn run<P: ReferencePort + ?Sized>(
    scope: &BuildScope<'_, P>,
    context: &ModelContext,
) -> Result<TransitionContext, EngineError> {
    context.require(STAGE, &["structure", "energy"])?;
    check_indices(scope.reference)?;
    let structure = context.structure()?;
    let reference = scope.reference;
    let particles = reference.particles();

    let mut result = TransitionContext::default();

    // === Phase 1: Kinetic transitions ===
    let mut drafts = Vec::new();
    for transition in reference.kinetic_transitions().iter().filter(|t| t.is_active()) {
        drafts.push(kinetic_draft(scope, structure, transition.index)?);
    }
    insert_kind(&mut result, structure, particles, drafts)?;

    // === Phase 2: Metropolis transitions ===
    let mut drafts = Vec::new();
    for transition in reference.metropolis_transitions().iter().filter(|t| t.is_active()) {
        drafts.push(metropolis_draft(scope, structure, transition.index)?);
    }
    insert_kind(&mut result, structure, particles, drafts)?;

    info!(
        kinetic = result.kinetic_order.len(),
        metropolis = result.metropolis_order.len(),
        mappings = result.mappings.len(),
        rules = result.rules.len(),
        "Transition context built."
    );
    Ok(result)
}

fn movement_offsets(kind: SimulationKind, connectors: &[ConnectorKind], unstable: &[bool]) -> Vec<i32> {
    match kind {
        SimulationKind::Kinetic => abstract_movement(connectors, unstable),
        SimulationKind::Metropolis => vec![0; connectors.len() + 1],
    }
}

fn mapping_draft(encoder: &VectorEncoder, fractional: Vec<Vector3<f64>>, offsets: &[i32]) -> Option<MappingDraft> {
    let path = encoder.encode_sequence(&fractional)?;
    let movement = fractional
        .iter()
        .enumerate()
        .map(|(i, from)| {
            let target = usize::try_from(i as i32 + offsets.get(i).copied().unwrap_or(0)).ok()?;
            Some(encoder.to_cartesian(&(fractional.get(target)? - from)))
        })
        .collect::<Option<Vec<_>>>()?;
    Some(MappingDraft {
        path,
        fractional,
        movement,
    })
}

/// Exchange states of every path position, restricted to the particles its site may hold.
fn position_states<P: ReferencePort + ?Sized>(
    reference: &P,
    abstract_transition: &AbstractTransition,
    sites: &[usize],
    domain: &'static str,
    index: usize,
) -> Result<(Vec<PositionStates>, Vec<bool>), EngineError> {
    let invalid = |reason: String| EngineError::InvalidReference {
        domain,
        index,
        reason,
    };
    if abstract_transition.connectors.len() + 1 != abstract_transition.groups.len() {
        return Err(invalid(format!(
            "abstract transition {} has {} groups and {} connectors",
            abstract_transition.index,
            abstract_transition.groups.len(),
            abstract_transition.connectors.len()
        )));
    }

    let mut states = Vec::with_capacity(sites.len());
    for (&group_index, &site_index) in abstract_transition.groups.iter().zip(sites) {
        let group = reference
            .exchange_groups()
            .get(group_index)
            .filter(|g| g.state.is_active())
            .ok_or_else(|| invalid(format!("unknown or deprecated exchange group {group_index}")))?;
        let occupation = reference
            .site(site_index)
            .and_then(|s| reference.particle_set(s.occupation))
            .ok_or_else(|| invalid(format!("site {site_index} has no particle set")))?;
        let allowed = |p: usize| p == VOID_PARTICLE_INDEX || occupation.contains(p);

        let mut pairs = Vec::new();
        let mut unstable = false;
        for &pair_index in &group.pairs {
            let pair = reference
                .exchange_pairs()
                .get(pair_index)
                .filter(|p| p.state.is_active())
                .ok_or_else(|| invalid(format!("unknown or deprecated exchange pair {pair_index}")))?;
            unstable |= pair.unstable;
            if allowed(pair.donor) && (pair.unstable || allowed(pair.acceptor)) {
                pairs.push((pair.donor as u8, pair.acceptor as u8));
            }
        }
        if pairs.is_empty() {
            return Err(invalid(format!(
                "exchange group {group_index} has no pair that fits site {site_index}"
            )));
        }
        states.push(PositionStates::new(pairs, unstable));
    }
    let unstable = states.iter().map(|s| s.unstable).collect();
    Ok((states, unstable))
}

fn generate_rules(
    particles: &[Particle],
    states: &[PositionStates],
    connectors: &[ConnectorKind],
    is_metropolis: bool,
) -> Vec<TransitionRule> {
    let mut rules = Vec::new();
    for rule in RuleGenerator::new(particles).generate(states, connectors, is_metropolis) {
        let swapped = rule.swapped();
        let distinct = swapped != rule;
        rules.push(rule);
        if distinct {
            rules.push(swapped);
        }
    }
    rules
}

fn kinetic_draft<P: ReferencePort + ?Sized>(
    scope: &BuildScope<'_, P>,
    structure: &StructureContext,
    index: usize,
) -> Result<TransitionDraft, EngineError> {
    let reference = scope.reference;
    let transition = reference
        .kinetic_transitions()
        .get(index)
        .ok_or_else(|| EngineError::InvalidReference {
            domain: "kinetic transition",
            index,
            reason: "no such transition".to_string(),
        })?;
    let abstract_transition = reference
        .abstract_transitions()
        .get(transition.abstract_transition)
        .filter(|a| a.state.is_active())
        .ok_or_else(|| EngineError::InvalidReference {
            domain: "kinetic transition",
            index,
            reason: format!("unknown abstract transition {}", transition.abstract_transition),
        })?;
    let geometry_error = |reason: String| EngineError::InvalidGeometry {
        transition: index,
        reason,
    };

    // === Geometry checks ===
    let geometry = transition.path();
    if geometry.len() != abstract_transition.groups.len() {
        return Err(geometry_error(format!(
            "{} points for {} exchange groups",
            geometry.len(),
            abstract_transition.groups.len()
        )));
    }
    if geometry.len() < 2 || geometry.len() > scope.config.max_path_length {
        return Err(geometry_error(format!(
            "path length {} is outside 2..={}",
            geometry.len(),
            scope.config.max_path_length
        )));
    }
    let encoded = structure
        .encoder
        .encode_sequence(&geometry)
        .ok_or_else(|| geometry_error("a path point is not a lattice position".to_string()))?;
    if is_ring_fractional(&geometry, structure.encoder.comparer()) {
        return Err(EngineError::RingTransition { transition: index });
    }

    // === Rules ===
    let sites: Vec<usize> = encoded
        .iter()
        .map(|v| structure.position_sites[v.p as usize])
        .collect();
    let (states, unstable) =
        position_states(reference, abstract_transition, &sites, "kinetic transition", index)?;
    let connectors = abstract_transition.connectors.clone();
    let rules = generate_rules(reference.particles(), &states, &connectors, false);
    if rules.is_empty() {
        return Err(EngineError::InvalidReference {
            domain: "kinetic transition",
            index,
            reason: "no particle exchange is possible along the path".to_string(),
        });
    }

    // === Mappings ===
    let offsets = movement_offsets(SimulationKind::Kinetic, &connectors, &unstable);
    let mut mappings = Vec::new();
    for realization in structure.symmetry.path_realizations(&geometry) {
        let mapping = mapping_draft(&structure.encoder, realization, &offsets).ok_or_else(|| {
            EngineError::StructuralDefect {
                stage: STAGE,
                reason: format!("a realization of kinetic transition {index} leaves the lattice"),
            }
        })?;
        if is_ring_encoded(&mapping.path) {
            return Err(EngineError::RingTransition { transition: index });
        }
        mappings.push(mapping);
    }
    mappings.sort_by(|lhs, rhs| lhs.path.cmp(&rhs.path));
    debug!(transition = index, mappings = mappings.len(), rules = rules.len(), "Kinetic transition expanded.");

    Ok(TransitionDraft {
        kind: SimulationKind::Kinetic,
        reference: index,
        abstract_transition: abstract_transition.index,
        attempt_frequency: transition.attempt_frequency,
        connectors,
        unstable,
        mappings,
        rules,
    })
}

fn metropolis_draft<P: ReferencePort + ?Sized>(
    scope: &BuildScope<'_, P>,
    structure: &StructureContext,
    index: usize,
) -> Result<TransitionDraft, EngineError> {
    let reference = scope.reference;
    let invalid = |reason: String| EngineError::InvalidReference {
        domain: "metropolis transition",
        index,
        reason,
    };
    let transition = reference
        .metropolis_transitions()
        .get(index)
        .ok_or_else(|| invalid("no such transition".to_string()))?;
    let abstract_transition = reference
        .abstract_transitions()
        .get(transition.abstract_transition)
        .filter(|a| a.state.is_active())
        .ok_or_else(|| invalid(format!("unknown abstract transition {}", transition.abstract_transition)))?;
    if abstract_transition.groups.len() != 2 {
        return Err(invalid(format!(
            "abstract transition {} is not a two-position exchange",
            abstract_transition.index
        )));
    }
    let sites = [transition.site0, transition.site1];
    for site in sites {
        if !structure.environment_by_site.contains_key(&site) {
            return Err(invalid(format!("unknown or deprecated site {site}")));
        }
    }

    let (states, unstable) = position_states(reference, abstract_transition, &sites, "metropolis transition", index)?;
    let connectors = abstract_transition.connectors.clone();
    let rules = generate_rules(reference.particles(), &states, &connectors, true);
    if rules.is_empty() {
        return Err(invalid("no particle exchange is possible between the sites".to_string()));
    }

    let offsets = movement_offsets(SimulationKind::Metropolis, &connectors, &unstable);
    let positions = structure.encoder.positions();
    let mut mappings = Vec::new();
    for p0 in structure.positions_of_site(transition.site0) {
        for p1 in structure.positions_of_site(transition.site1) {
            let fractional = vec![positions[p0], positions[p1]];
            let mapping = mapping_draft(&structure.encoder, fractional, &offsets).ok_or_else(|| {
                EngineError::Internal(format!("position {p0} or {p1} failed to encode"))
            })?;
            mappings.push(mapping);
        }
    }
    if mappings.is_empty() {
        return Err(EngineError::StructuralDefect {
            stage: STAGE,
            reason: format!("metropolis transition {index} has no position pairing"),
        });
    }

    Ok(TransitionDraft {
        kind: SimulationKind::Metropolis,
        reference: index,
        abstract_transition: abstract_transition.index,
        attempt_frequency: 1.0,
        connectors,
        unstable,
        mappings,
        rules,
    })
}

/// Inserts the drafts of one kind, then appends an inverse model for every transition
/// whose reversed mappings are not among its own.
fn insert_kind(
    context: &mut TransitionContext,
    structure: &StructureContext,
    particles: &[Particle],
    drafts: Vec<TransitionDraft>,
) -> Result<(), EngineError> {
    let Some(kind) = drafts.first().map(|d| d.kind) else {
        return Ok(());
    };
    let mut next_mapping = 0;
    let mut pending = Vec::new();

    for draft in &drafts {
        let model_id = context.order(kind).len();
        let id = insert_model(context, particles, draft, model_id, false, &mut next_mapping);
        if !link_own_mappings(context, id)? {
            pending.push((id, draft));
        }
    }

    for (original, draft) in pending {
        let inverse = draft.inverted(&structure.encoder).ok_or_else(|| EngineError::StructuralDefect {
            stage: STAGE,
            reason: format!("reversed paths of transition {} leave the lattice", draft.reference),
        })?;
        let model_id = context.order(kind).len();
        let id = insert_model(context, particles, &inverse, model_id, true, &mut next_mapping);
        context.transitions[original].inverse = id;
        context.transitions[id].inverse = original;
        let forward = context.transitions[original].mappings.clone();
        let backward = context.transitions[id].mappings.clone();
        for (lhs, rhs) in forward.into_iter().zip(backward) {
            context.mappings[lhs].inverse = Some(rhs);
            context.mappings[rhs].inverse = Some(lhs);
        }
    }
    Ok(())
}

fn insert_model(
    context: &mut TransitionContext,
    particles: &[Particle],
    draft: &TransitionDraft,
    model_id: usize,
    is_inverse_model: bool,
    next_mapping: &mut usize,
) -> TransitionId {
    let id = context.transitions.insert_with_key(|id| TransitionModel {
        model_id,
        kind: draft.kind,
        reference: draft.reference,
        abstract_transition: draft.abstract_transition,
        is_inverse_model,
        inverse: id,
        mappings: Vec::new(),
        rules: Vec::new(),
        attempt_frequency: draft.attempt_frequency,
        mobile_mask: 0,
    });

    let mut mappings = Vec::with_capacity(draft.mappings.len());
    for mapping in &draft.mappings {
        let global_movement: Vector3<f64> = mapping.movement.iter().sum();
        mappings.push(context.mappings.insert(MappingModel {
            model_id: *next_mapping,
            transition: id,
            start_position: mapping.path[0].p as usize,
            path: mapping.path.clone(),
            fractional: mapping.fractional.clone(),
            movement: mapping.movement.clone(),
            global_movement,
            inverse: None,
        }));
        *next_mapping += 1;
    }

    let mut rules: Vec<RuleId> = Vec::with_capacity(draft.rules.len());
    let mut mobile_mask = 0u64;
    for rule in &draft.rules {
        if let Some(&first) = rule.start.first() {
            if first as usize != VOID_PARTICLE_INDEX {
                mobile_mask |= 1 << first;
            }
        }
        let field_factor = match draft.kind {
            SimulationKind::Kinetic => transported_charge(particles, rule),
            SimulationKind::Metropolis => 0.0,
        };
        rules.push(context.rules.insert(RuleModel {
            transition: id,
            rule: rule.clone(),
            start_code: occupation_code(&rule.start),
            transition_code: occupation_code(&rule.transition),
            final_code: occupation_code(&rule.final_state),
            attempt_frequency: draft.attempt_frequency,
            field_factor,
            tracker_order: rule.tracker_order(),
            flags: rule.flags,
            inverse: None,
        }));
    }
    link_rules(context, &rules);

    let model = &mut context.transitions[id];
    model.mappings = mappings;
    model.rules = rules;
    model.mobile_mask = mobile_mask;
    match draft.kind {
        SimulationKind::Kinetic => context.kinetic_order.push(id),
        SimulationKind::Metropolis => context.metropolis_order.push(id),
    }
    id
}

/// Charge moved along the path, weighted by the position of each change.
fn transported_charge(particles: &[Particle], rule: &TransitionRule) -> f64 {
    let length = rule.path_length();
    if length < 2 {
        return 0.0;
    }
    let charge = |p: u8| particles.get(p as usize).map_or(0.0, |p| p.charge);
    rule.start
        .iter()
        .zip(&rule.final_state)
        .enumerate()
        .map(|(i, (&start, &end))| (charge(end) - charge(start)) * i as f64 / (length - 1) as f64)
        .sum()
}

/// Pairs every rule with the rule whose start and final states are swapped.
fn link_rules(context: &mut TransitionContext, rules: &[RuleId]) {
    for (i, &lhs) in rules.iter().enumerate() {
        if context.rules[lhs].inverse.is_some() {
            continue;
        }
        let partner = rules[i + 1..]
            .iter()
            .copied()
            .find(|rhs| {
                context.rules[*rhs].inverse.is_none()
                    && context.rules[*rhs].rule.is_plain_inverse_of(&context.rules[lhs].rule)
            })
            .or_else(|| {
                let rule = &context.rules[lhs].rule;
                rule.is_plain_inverse_of(rule).then_some(lhs)
            });
        if let Some(rhs) = partner {
            context.rules[lhs].inverse = Some(rhs);
            context.rules[rhs].inverse = Some(lhs);
        }
    }
}

/// Links mappings to their reversed counterparts inside one model. Returns `false` when
/// no mapping has one, and fails when only some do.
fn link_own_mappings(context: &mut TransitionContext, id: TransitionId) -> Result<bool, EngineError> {
    let mappings = context.transitions[id].mappings.clone();
    let links: Vec<Option<MappingId>> = mappings
        .iter()
        .map(|m| {
            let reversed = context.mappings[*m].reversed_path();
            mappings
                .iter()
                .copied()
                .find(|other| context.mappings[*other].path == reversed)
        })
        .collect();

    let linked = links.iter().filter(|l| l.is_some()).count();
    if linked == 0 {
        return Ok(false);
    }
    if linked != mappings.len() {
        return Err(EngineError::StructuralDefect {
            stage: STAGE,
            reason: format!(
                "transition {} links {linked} of {} mappings to an inverse",
                context.transitions[id].reference,
                mappings.len()
            ),
        });
    }
    for (mapping, inverse) in mappings.iter().zip(links) {
        context.mappings[*mapping].inverse = inverse;
    }
    context.transitions[id].inverse = id;
    Ok(true)
}
