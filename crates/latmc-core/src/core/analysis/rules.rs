use crate::core::models::particle::{Particle, VOID_PARTICLE_INDEX};
use crate::core::models::transition::ConnectorKind;
use itertools::Itertools;
use std::ops::BitOr;
use tracing::trace;

/// Maximum number of positions on a transition path; path states are packed into one
/// byte per position of a 64-bit code.
pub const MAX_PATH_LENGTH: usize = 8;

/// Movement classification of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MovementFlags(u32);

impl MovementFlags {
    pub const NONE: Self = Self(0);
    /// Two-position exchange.
    pub const EXCHANGE: Self = Self(1);
    /// Path longer than two positions.
    pub const MIGRATION: Self = Self(1 << 1);
    /// At least one static connector moves a group of particles as one unit.
    pub const VEHICLE: Self = Self(1 << 2);
    /// More than two dynamic connectors.
    pub const CHAINED: Self = Self(1 << 3);
    /// A vacancy takes part.
    pub const VACANCY: Self = Self(1 << 4);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for MovementFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Packs a path state into a 64-bit code, byte `i` holding the particle on position `i`.
pub fn occupation_code(state: &[u8]) -> i64 {
    let mut bytes = [0u8; 8];
    for (slot, value) in bytes.iter_mut().zip(state) {
        *slot = *value;
    }
    i64::from_le_bytes(bytes)
}

/// Per position displacement index of a connector pattern: position `i` moves onto
/// position `i + movement[i]`. Unstable positions bridged by a dynamic connector are
/// skipped, so the stable position before them moves past them.
pub fn abstract_movement(connectors: &[ConnectorKind], unstable: &[bool]) -> Vec<i32> {
    let path_length = connectors.len() + 1;
    let mut result = Vec::with_capacity(path_length);
    let mut i = 0;
    while i < connectors.len() {
        let mut run = 0;
        loop {
            i += 1;
            if i <= connectors.len() && connectors[i - 1] == ConnectorKind::Dynamic {
                run += 1;
                result.push(1);
            } else {
                break;
            }
        }
        result.push(-run);
    }
    result.resize(path_length, 0);

    for i in 1..path_length {
        if unstable.get(i).copied().unwrap_or(false) && connectors[i - 1] == ConnectorKind::Dynamic {
            result[i - 1] += 1;
            result[i] = 0;
        }
    }
    result
}

/// Exchange pairs `(donor, acceptor)` allowed on one path position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionStates {
    pub pairs: Vec<(u8, u8)>,
    pub unstable: bool,
}

impl PositionStates {
    /// Unstable positions only ever hold their donor in flight and are empty otherwise.
    pub fn new(pairs: Vec<(u8, u8)>, unstable: bool) -> Self {
        let pairs = if unstable {
            pairs
                .into_iter()
                .map(|(donor, _)| (donor, VOID_PARTICLE_INDEX as u8))
                .collect()
        } else {
            pairs
        };
        Self { pairs, unstable }
    }
}

/// One valid occupation change along a transition path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransitionRule {
    pub start: Vec<u8>,
    pub transition: Vec<u8>,
    pub final_state: Vec<u8>,
    /// Exchange index pairs, flattened: `[from0, to0, from1, to1, ...]`.
    pub movement: Vec<usize>,
    pub flags: MovementFlags,
}

impl TransitionRule {
    pub fn path_length(&self) -> usize {
        self.start.len()
    }

    /// The same rule running backwards: start and final swap without reordering.
    pub fn swapped(&self) -> Self {
        Self {
            start: self.final_state.clone(),
            transition: self.transition.clone(),
            final_state: self.start.clone(),
            movement: self.movement.clone(),
            flags: self.flags,
        }
    }

    /// The rule seen from the reversed path: states are reversed and start and final swap.
    pub fn inverted(&self) -> Self {
        let last = self.path_length().saturating_sub(1);
        let reversed = |state: &[u8]| state.iter().rev().copied().collect::<Vec<_>>();
        Self {
            start: reversed(&self.final_state),
            transition: reversed(&self.transition),
            final_state: reversed(&self.start),
            movement: self.movement.iter().rev().map(|i| last - i).collect(),
            flags: self.flags,
        }
    }

    pub fn is_plain_inverse_of(&self, other: &Self) -> bool {
        self.start == other.final_state && self.final_state == other.start
    }

    /// Final index minus start index of the particle ending on each position.
    pub fn end_indexing_deltas(&self) -> Vec<i32> {
        let mut order: Vec<usize> = (0..self.path_length()).collect();
        for (from, to) in self.movement.iter().copied().tuples() {
            if from < order.len() && to < order.len() {
                order.swap(from, to);
            }
        }
        order
            .iter()
            .enumerate()
            .map(|(i, &target)| target as i32 - i as i32)
            .collect()
    }

    /// Tracker reorder instruction: byte `i` is the path index whose tracker ends on `i`.
    pub fn tracker_order(&self) -> [u8; 8] {
        let mut bytes = [0u8; 8];
        for (i, delta) in self.end_indexing_deltas().into_iter().enumerate().take(8) {
            bytes[i] = (i as i32 + delta) as u8;
        }
        bytes
    }
}

/// Enumerates the physically meaningful rules of an abstract transition.
#[derive(Debug, Clone, Copy)]
pub struct RuleGenerator<'a> {
    particles: &'a [Particle],
}

impl<'a> RuleGenerator<'a> {
    pub fn new(particles: &'a [Particle]) -> Self {
        Self { particles }
    }

    /// Generates the unique rules for one path description. A rule and its swapped
    /// counterpart count once; the first discovered survives.
    pub fn generate(
        &self,
        positions: &[PositionStates],
        connectors: &[ConnectorKind],
        is_metropolis: bool,
    ) -> Vec<TransitionRule> {
        if positions.len() != connectors.len() + 1 || positions.len() > MAX_PATH_LENGTH {
            return Vec::new();
        }
        let movement = movement_code(positions, connectors);
        let flags = self.base_flags(connectors);
        let mut rules: Vec<TransitionRule> = Vec::new();

        let pair_choices = positions.iter().map(|p| p.pairs.iter().copied());
        for pair_set in pair_choices.multi_cartesian_product() {
            let state_choices = pair_set.iter().map(|&(donor, acceptor)| [donor, acceptor]);
            for start in state_choices.multi_cartesian_product() {
                if !can_reach_valid_end(&start, &pair_set, positions) {
                    continue;
                }
                let Some(final_state) = final_state(&start, &pair_set, positions, connectors) else {
                    continue;
                };
                let transition = positions
                    .iter()
                    .zip(&pair_set)
                    .map(|(position, &(donor, _))| {
                        if position.unstable {
                            donor
                        } else {
                            VOID_PARTICLE_INDEX as u8
                        }
                    })
                    .collect();
                let mut rule = TransitionRule {
                    start,
                    transition,
                    final_state,
                    movement: movement.clone(),
                    flags,
                };
                if !self.conserves_matter(&rule, is_metropolis) {
                    continue;
                }
                if self.has_vacancy(&rule.start) {
                    rule.flags = rule.flags | MovementFlags::VACANCY;
                }
                if !rules
                    .iter()
                    .any(|known| *known == rule || known.is_plain_inverse_of(&rule))
                {
                    rules.push(rule);
                }
            }
        }
        trace!(rules = rules.len(), "Generated transition rules.");
        rules
    }

    fn base_flags(&self, connectors: &[ConnectorKind]) -> MovementFlags {
        let mut flags = if connectors.len() == 1 {
            MovementFlags::EXCHANGE
        } else {
            MovementFlags::MIGRATION
        };
        if connectors.contains(&ConnectorKind::Static) {
            flags = flags | MovementFlags::VEHICLE;
        }
        let dynamic = connectors
            .iter()
            .filter(|c| **c == ConnectorKind::Dynamic)
            .count();
        if dynamic > 2 {
            flags = flags | MovementFlags::CHAINED;
        }
        flags
    }

    fn particle(&self, index: u8) -> Option<&Particle> {
        self.particles.get(index as usize)
    }

    fn is_vacancy_like(&self, index: u8) -> bool {
        index as usize == VOID_PARTICLE_INDEX || self.particle(index).is_some_and(|p| p.is_vacancy)
    }

    fn has_vacancy(&self, state: &[u8]) -> bool {
        state
            .iter()
            .any(|&i| self.particle(i).is_some_and(|p| p.is_vacancy))
    }

    /// Each exchanging position pair must either be a vacancy-type swap or an exclusive
    /// property/physical exchange.
    fn conserves_matter(&self, rule: &TransitionRule, is_metropolis: bool) -> bool {
        rule.movement.iter().copied().tuples().all(|(lhs, rhs)| {
            let l = (rule.start[lhs], rule.final_state[lhs]);
            let r = (rule.start[rhs], rule.final_state[rhs]);
            self.is_vacancy_exchange(l, r) || self.is_exclusive_exchange(l, r, is_metropolis)
        })
    }

    fn is_vacancy_exchange(&self, lhs: (u8, u8), rhs: (u8, u8)) -> bool {
        let changes_kind = |(start, end): (u8, u8)| self.is_vacancy_like(start) != self.is_vacancy_like(end);
        changes_kind(lhs) && changes_kind(rhs) && lhs.0 == rhs.1 && lhs.1 == rhs.0
    }

    fn is_exclusive_exchange(&self, lhs: (u8, u8), rhs: (u8, u8), is_metropolis: bool) -> bool {
        let symbol = |i: u8| self.particle(i).map(|p| p.symbol.as_str());
        let property = symbol(lhs.0) == symbol(lhs.1) && symbol(rhs.0) == symbol(rhs.1);
        let physical = lhs.0 == rhs.1 && lhs.1 == rhs.0;
        if is_metropolis {
            property ^ physical
        } else {
            property
        }
    }
}

/// Exchange pairs over dynamic connectors, with unstable positions bridged.
fn movement_code(positions: &[PositionStates], connectors: &[ConnectorKind]) -> Vec<usize> {
    let mut code = Vec::new();
    let mut i = 0;
    while i < connectors.len() {
        let current = i;
        if connectors[current] == ConnectorKind::Dynamic {
            while i + 2 < positions.len() && positions[i + 1].unstable {
                i += 1;
            }
            code.push(current);
            code.push(i + 1);
        }
        i += 1;
    }
    code
}

/// Unstable positions must start empty, and at least half of the stable positions must
/// start in their donor state.
fn can_reach_valid_end(start: &[u8], pairs: &[(u8, u8)], positions: &[PositionStates]) -> bool {
    let mut donors = 0;
    let mut stables = start.len() as i32;
    for ((state, &(donor, _)), position) in start.iter().zip(pairs).zip(positions) {
        if position.unstable {
            if *state as usize != VOID_PARTICLE_INDEX {
                return false;
            }
            stables -= 1;
        } else if *state == donor {
            donors += 1;
        }
    }
    donors >= stables - donors
}

fn final_state(
    start: &[u8],
    pairs: &[(u8, u8)],
    positions: &[PositionStates],
    connectors: &[ConnectorKind],
) -> Option<Vec<u8>> {
    let mut state = start.to_vec();
    let mut i = 0;
    while i < connectors.len() {
        let last = i;
        while i + 2 < positions.len() && positions[i + 1].unstable {
            i += 1;
        }
        if connectors[last] == ConnectorKind::Dynamic {
            let (value0, dir0) = change(state[last], pairs[last])?;
            let (value1, dir1) = change(state[i + 1], pairs[i + 1])?;
            if dir0 + dir1 != 0 {
                return None;
            }
            state[last] = value0;
            state[i + 1] = value1;
        }
        i += 1;
    }
    Some(state)
}

/// Acceptor turns into donor (`+1`), donor turns into acceptor (`-1`).
fn change(current: u8, (donor, acceptor): (u8, u8)) -> Option<(u8, i32)> {
    if current == acceptor {
        Some((donor, 1))
    } else if current == donor {
        Some((acceptor, -1))
    } else {
        None
    }
}
