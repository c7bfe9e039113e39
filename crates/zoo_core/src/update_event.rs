//! UpdateEvent - one proposed transformation, applied in two phases.
//!
//! An event is built from a sampled outcome, then:
//! 1. `bind` resolves the rule's bond expressions against the grid and
//!    plans the resulting bond maps of every cell the change touches,
//! 2. `energy_delta` compares bond energies before and after the plan,
//! 3. `commit` writes the new states and bond maps.
//!
//! Nothing is written before `commit`, so an event that fails to bind or is
//! rejected by the acceptance test can simply be dropped.
//!
//! # Bond labels
//!
//! Labels name positions: `s` is the source cell, `t` the target cell, and
//! the swapped aliases `sT`/`tS` name where the source's and target's
//! particles end up after a swap (the target and source cells). Any other
//! label is bound by walking from an already-bound position along a named
//! bond.

use super::cell::{CellBonds, Grid};
use super::particle::{Outcome, ParticleId, ParticleRegistry};
use super::template::{
    BondExpression, TransformRuleTemplate, LABEL_SOURCE, LABEL_SOURCE_SWAPPED, LABEL_TARGET,
    LABEL_TARGET_SWAPPED,
};
use super::topology::{Direction, Point};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Result of looking up a left-hand-side bond expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lookup {
    /// The bond exists between these positions.
    Matched { from: Point, to: Point },
    /// A label is bound but the bond does not exist.
    Missing,
    /// Neither label is bound yet.
    Unresolved,
}

/// A proposed (source, target) transformation.
#[derive(Debug, Clone)]
pub struct UpdateEvent {
    pub source: Point,
    pub target: Point,
    pub dir: Direction,
    pub old_source: ParticleId,
    pub old_target: ParticleId,
    pub new_source: ParticleId,
    pub new_target: ParticleId,
    pub verb: String,
    pub rule: Option<Arc<TransformRuleTemplate>>,
    /// The source cell belongs to another board; only the target is read
    /// and written here.
    remote_source: bool,
    bound: bool,
    labels: HashMap<String, Point>,
    /// Left-hand-side bonds that matched, keyed by origin cell and name.
    matched: BTreeSet<(Point, String)>,
    /// Post-commit bond maps of every cell whose bonds change.
    edits: BTreeMap<Point, CellBonds>,
}

impl UpdateEvent {
    /// Event for a source and target on this board.
    pub fn new(
        source: Point,
        target: Point,
        dir: Direction,
        old_source: ParticleId,
        old_target: ParticleId,
        outcome: Outcome,
    ) -> Self {
        Self {
            source,
            target,
            dir,
            old_source,
            old_target,
            new_source: outcome.new_source,
            new_target: outcome.new_target,
            verb: outcome.verb,
            rule: outcome.rule,
            remote_source: false,
            bound: false,
            labels: HashMap::new(),
            matched: BTreeSet::new(),
            edits: BTreeMap::new(),
        }
    }

    /// Event whose source cell lives on a remote board. `source` is the
    /// source's position in this board's coordinates (off-grid).
    pub fn with_remote_source(
        source: Point,
        target: Point,
        dir: Direction,
        old_source: ParticleId,
        old_target: ParticleId,
        outcome: Outcome,
    ) -> Self {
        Self {
            remote_source: true,
            ..Self::new(source, target, dir, old_source, old_target, outcome)
        }
    }

    pub fn source_changes(&self) -> bool {
        self.new_source != self.old_source
    }

    pub fn target_changes(&self) -> bool {
        self.new_target != self.old_target
    }

    /// Position bound to a label, once bound.
    pub fn label(&self, label: &str) -> Option<Point> {
        self.labels.get(label).copied()
    }

    fn endpoints(&self) -> Vec<Point> {
        if self.remote_source {
            vec![self.target]
        } else {
            vec![self.source, self.target]
        }
    }

    fn changes_at(&self, p: Point) -> bool {
        (p == self.source && !self.remote_source && self.source_changes())
            || (p == self.target && self.target_changes())
    }

    /// Resolve the rule's bond expressions and plan the new bond maps.
    /// Returns false if the proposal cannot apply.
    ///
    /// # Panics
    /// Panics if the event has already been bound.
    pub fn bind(&mut self, grid: &Grid) -> bool {
        assert!(!self.bound, "update event bound twice");
        self.bound = true;

        self.labels.insert(LABEL_SOURCE.to_string(), self.source);
        self.labels.insert(LABEL_TARGET.to_string(), self.target);
        self.labels.insert(LABEL_SOURCE_SWAPPED.to_string(), self.target);
        self.labels.insert(LABEL_TARGET_SWAPPED.to_string(), self.source);

        let Some(rule) = self.rule.clone() else {
            return true;
        };
        if self.remote_source && rule.has_bonds() {
            return false;
        }

        if !self.resolve(grid, &rule.required, true) {
            return false;
        }
        self.resolve(grid, &rule.optional, false);
        for expr in &rule.excluded {
            if self.lookup(grid, expr) != Lookup::Missing {
                return false;
            }
        }
        self.plan(grid, &rule.created)
    }

    fn lookup(&self, grid: &Grid, expr: &BondExpression) -> Lookup {
        let from = self.labels.get(&expr.from).copied();
        let to = self.labels.get(&expr.to).copied();
        let outgoing = |p: Point| grid.get(p).and_then(|c| c.bonds.outgoing.get(&expr.name)).copied();
        let incoming = |p: Point| grid.get(p).and_then(|c| c.bonds.incoming.get(&expr.name)).copied();

        match (from, to) {
            (Some(a), Some(b)) => {
                if outgoing(a) == Some(b - a) || (!grid.contains(a) && incoming(b) == Some(a - b)) {
                    Lookup::Matched { from: a, to: b }
                } else {
                    Lookup::Missing
                }
            }
            (Some(a), None) => match outgoing(a) {
                Some(offset) => Lookup::Matched { from: a, to: a + offset },
                None => Lookup::Missing,
            },
            (None, Some(b)) => match incoming(b) {
                Some(offset) => Lookup::Matched { from: b + offset, to: b },
                None => Lookup::Missing,
            },
            (None, None) => Lookup::Unresolved,
        }
    }

    /// Match a list of expressions, binding labels as they resolve. Each
    /// pass may bind labels that let a deferred expression resolve.
    fn resolve(&mut self, grid: &Grid, exprs: &[BondExpression], required: bool) -> bool {
        let mut pending: Vec<&BondExpression> = exprs.iter().collect();
        loop {
            let before = pending.len();
            let mut deferred = Vec::new();
            for expr in pending {
                match self.lookup(grid, expr) {
                    Lookup::Matched { from, to } => {
                        self.labels.entry(expr.from.clone()).or_insert(from);
                        self.labels.entry(expr.to.clone()).or_insert(to);
                        self.matched.insert((from, expr.name.clone()));
                    }
                    Lookup::Missing if required => return false,
                    Lookup::Missing => {}
                    Lookup::Unresolved => deferred.push(expr),
                }
            }
            if deferred.is_empty() {
                return true;
            }
            if deferred.len() == before {
                return !required;
            }
            pending = deferred;
        }
    }

    fn edit<'a>(edits: &'a mut BTreeMap<Point, CellBonds>, grid: &Grid, p: Point) -> Option<&'a mut CellBonds> {
        if !edits.contains_key(&p) {
            let bonds = grid.get(p)?.bonds.clone();
            edits.insert(p, bonds);
        }
        edits.get_mut(&p)
    }

    fn drop_bond(&mut self, grid: &Grid, from: Point, to: Point, name: &str) {
        if let Some(bonds) = Self::edit(&mut self.edits, grid, from) {
            if bonds.outgoing.get(name) == Some(&(to - from)) {
                bonds.outgoing.remove(name);
            }
        }
        if let Some(bonds) = Self::edit(&mut self.edits, grid, to) {
            if bonds.incoming.get(name) == Some(&(from - to)) {
                bonds.incoming.remove(name);
            }
        }
    }

    fn add_bond(&mut self, grid: &Grid, from: Point, to: Point, name: &str) {
        // A cell holds one bond per name and direction; displace the old one.
        let displaced_to = Self::edit(&mut self.edits, grid, from)
            .and_then(|b| b.outgoing.get(name).copied())
            .map(|offset| from + offset)
            .filter(|&p| p != to);
        if let Some(old) = displaced_to {
            self.drop_bond(grid, from, old, name);
        }
        let displaced_from = Self::edit(&mut self.edits, grid, to)
            .and_then(|b| b.incoming.get(name).copied())
            .map(|offset| to + offset)
            .filter(|&p| p != from);
        if let Some(old) = displaced_from {
            self.drop_bond(grid, old, to, name);
        }

        if let Some(bonds) = Self::edit(&mut self.edits, grid, from) {
            bonds.outgoing.insert(name.to_string(), to - from);
        }
        if let Some(bonds) = Self::edit(&mut self.edits, grid, to) {
            bonds.incoming.insert(name.to_string(), from - to);
        }
    }

    /// Plan bond maps: drop bonds at changed endpoints and matched bonds at
    /// unchanged ones, then install the created bonds.
    fn plan(&mut self, grid: &Grid, created: &[BondExpression]) -> bool {
        let mut new_bonds = Vec::with_capacity(created.len());
        for expr in created {
            let (Some(from), Some(to)) = (self.label(&expr.from), self.label(&expr.to)) else {
                return false;
            };
            if from == to {
                return false;
            }
            new_bonds.push((from, to, expr.name.clone()));
        }

        let mut dropped = Vec::new();
        for p in self.endpoints() {
            let Some(cell) = grid.get(p) else {
                continue;
            };
            let changes = self.changes_at(p);
            for (name, &offset) in &cell.bonds.outgoing {
                if changes || self.matched.contains(&(p, name.clone())) {
                    dropped.push((p, p + offset, name.clone()));
                }
            }
            for (name, &offset) in &cell.bonds.incoming {
                if changes || self.matched.contains(&(p + offset, name.clone())) {
                    dropped.push((p + offset, p, name.clone()));
                }
            }
        }

        for (from, to, name) in dropped {
            self.drop_bond(grid, from, to, &name);
        }
        for (from, to, name) in new_bonds {
            self.add_bond(grid, from, to, &name);
        }
        true
    }

    fn bonds_at<'a>(&'a self, grid: &'a Grid, p: Point, after: bool) -> Option<&'a CellBonds> {
        if after {
            if let Some(bonds) = self.edits.get(&p) {
                return Some(bonds);
            }
        }
        grid.get(p).map(|c| &c.bonds)
    }

    fn particle_at(&self, grid: &Grid, p: Point, after: bool) -> Option<ParticleId> {
        if p == self.target {
            return Some(if after { self.new_target } else { self.old_target });
        }
        if p == self.source && !self.remote_source {
            return Some(if after { self.new_source } else { self.old_source });
        }
        grid.get(p).map(|c| c.particle)
    }

    /// Total energy of the on-grid bonds touching an endpoint or an edited
    /// cell. A bond's angle term reads its origin's incoming bond, so a cell
    /// whose incoming map changes has its outgoing bonds re-scored too.
    fn local_energy(&self, grid: &Grid, registry: &mut ParticleRegistry, after: bool) -> f64 {
        let mut cells: BTreeSet<Point> = self.endpoints().into_iter().collect();
        cells.extend(self.edits.keys().copied());

        let mut bonds: BTreeSet<(Point, Point, String)> = BTreeSet::new();
        for p in cells {
            let Some(cell) = self.bonds_at(grid, p, after) else {
                continue;
            };
            for (name, &offset) in &cell.outgoing {
                bonds.insert((p, p + offset, name.clone()));
            }
            for (name, &offset) in &cell.incoming {
                bonds.insert((p + offset, p, name.clone()));
            }
        }

        let mut total = 0.0;
        for (from, to, name) in bonds {
            let (Some(a), Some(b)) = (self.particle_at(grid, from, after), self.particle_at(grid, to, after)) else {
                continue;
            };
            if !grid.contains(from) || !grid.contains(to) {
                continue;
            }
            let previous = self
                .bonds_at(grid, from, after)
                .and_then(|c| c.incoming.get(&name))
                .map(|&offset| -offset);
            total += registry.bond_energy(a, &name, b, to - from, previous);
        }
        total
    }

    /// Energy gained by applying the event, plus `barrier` when the source
    /// changes. Positive values are favorable.
    pub fn energy_delta(&self, grid: &Grid, registry: &mut ParticleRegistry, barrier: f64) -> f64 {
        let source_changes = self.source_changes();
        if !source_changes && !self.target_changes() && self.edits.is_empty() {
            return 0.0;
        }
        let old = self.local_energy(grid, registry, false);
        let new = self.local_energy(grid, registry, true);
        let barrier = if source_changes { barrier } else { 0.0 };
        barrier + new - old
    }

    /// Write the event into the grid. Returns every cell whose state or
    /// bonds changed, endpoints first.
    pub fn commit(self, grid: &mut Grid, registry: &mut ParticleRegistry) -> Vec<Point> {
        let mut touched = Vec::new();
        let mut writes = vec![(self.target, self.old_target, self.new_target)];
        if !self.remote_source {
            writes.insert(0, (self.source, self.old_source, self.new_source));
        }
        for (p, old, new) in writes {
            let Some(cell) = grid.get_mut(p) else {
                continue;
            };
            if old != new {
                registry.dec_count(old);
                registry.inc_count(new);
            }
            cell.particle = new;
            cell.write_count += 1;
            touched.push(p);
        }
        for (p, bonds) in self.edits {
            if let Some(cell) = grid.get_mut(p) {
                cell.bonds = bonds;
            }
            if !touched.contains(&p) {
                touched.push(p);
            }
        }
        touched
    }
}
