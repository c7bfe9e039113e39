//! Board - the cell grid and its update loop.
//!
//! One update attempt:
//! 1. draw a cell from the spatial activity sampler,
//! 2. draw a direction weighted by the cell particle's outgoing rates,
//! 3. off-grid neighbors go to their remote board (or nowhere),
//! 4. sample an outcome for the (source, target) pair,
//! 5. bind bonds, compute the energy delta and run the Metropolis test,
//! 6. commit, refreshing activity rates and notifying the observer.
//!
//! # Example
//!
//! ```ignore
//! use zoo_core::{Board, BoardConfig, PatternSet, Topology};
//!
//! let patterns = PatternSet::from_json_str(rules_json, Topology::Square4)?;
//! let mut board = Board::new(BoardConfig::with_size(64, 64), patterns)?;
//! board.set_particle(Point::new(3, 4), "sand");
//! let stats = board.tick();
//! ```

use super::board_io::{BoardSnapshot, SnapshotError, SnapshotResult};
use super::cell::{Cell, CellBonds, Grid};
use super::config::{BoardConfig, ConfigError, ConfigResult};
use super::observer::{BoardObserver, NullObserver, VerbNotice};
use super::particle::{ParticleId, ParticleRegistry};
use super::pattern_set::PatternSet;
use super::quad_tree::SpatialActivitySampler;
use super::remote::{RemoteCellCoord, RemoteMessage, RemoteTransport};
use super::rng::{StdRandom, ZooRng};
use super::topology::{Direction, Point, Topology};
use super::update_event::UpdateEvent;
use image::RgbaImage;
use std::collections::HashMap;
use tracing::{debug, info, trace, warn};

/// What one update attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// No cell has any activity.
    Idle,
    /// The neighbor is off-grid with no remote mapping.
    OffGrid,
    /// No interaction is defined for the pair.
    NoInteraction,
    /// The implicit no-op outcome was drawn.
    NoChange,
    /// Bond expressions could not be satisfied.
    BindFailed,
    /// The Metropolis test rejected the proposal.
    Rejected,
    Accepted,
    /// An evolve request went to a remote board.
    RemoteRequested,
}

/// Outcome counts over a run of update attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateStats {
    pub attempts: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub bind_failures: usize,
    pub no_ops: usize,
    pub off_grid: usize,
    pub remote_requests: usize,
    pub idle: usize,
}

impl UpdateStats {
    pub fn record(&mut self, outcome: StepOutcome) {
        self.attempts += 1;
        match outcome {
            StepOutcome::Idle => self.idle += 1,
            StepOutcome::OffGrid => self.off_grid += 1,
            StepOutcome::NoInteraction | StepOutcome::NoChange => self.no_ops += 1,
            StepOutcome::BindFailed => self.bind_failures += 1,
            StepOutcome::Rejected => self.rejected += 1,
            StepOutcome::Accepted => self.accepted += 1,
            StepOutcome::RemoteRequested => self.remote_requests += 1,
        }
    }

    pub fn merge(&mut self, other: &UpdateStats) {
        self.attempts += other.attempts;
        self.accepted += other.accepted;
        self.rejected += other.rejected;
        self.bind_failures += other.bind_failures;
        self.no_ops += other.no_ops;
        self.off_grid += other.off_grid;
        self.remote_requests += other.remote_requests;
        self.idle += other.idle;
    }
}

/// A grid of cells evolving under a pattern set.
pub struct Board {
    config: BoardConfig,
    topology: Topology,
    grid: Grid,
    registry: ParticleRegistry,
    activity: SpatialActivitySampler,
    remotes: HashMap<Point, RemoteCellCoord>,
    transport: Option<Box<dyn RemoteTransport>>,
    observer: Box<dyn BoardObserver>,
    rng: Box<dyn ZooRng>,
}

impl Board {
    /// Create a board with every cell holding the configured empty particle.
    pub fn new(config: BoardConfig, patterns: PatternSet) -> ConfigResult<Self> {
        config.validate()?;
        if patterns.topology() != config.topology {
            return Err(ConfigError::TopologyMismatch {
                board: config.topology,
                rules: patterns.topology(),
            });
        }

        let mut registry = ParticleRegistry::new(patterns, config.max_name_len);
        let empty = registry.get_or_create(&config.empty_particle);
        let grid = Grid::new(config.width, config.height, empty);
        for _ in 0..config.width * config.height {
            registry.inc_count(empty);
        }

        let mut board = Self {
            topology: config.topology,
            activity: SpatialActivitySampler::covering(config.width, config.height),
            rng: Box::new(StdRandom::from_optional_seed(config.seed)),
            config,
            grid,
            registry,
            remotes: HashMap::new(),
            transport: None,
            observer: Box::new(NullObserver),
        };
        board.refresh_all_rates();
        info!(
            "created {}x{} {:?} board '{}'",
            board.width(),
            board.height(),
            board.topology,
            board.config.address
        );
        Ok(board)
    }

    pub fn config(&self) -> &BoardConfig {
        &self.config
    }

    pub fn width(&self) -> usize {
        self.grid.width()
    }

    pub fn height(&self) -> usize {
        self.grid.height()
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn address(&self) -> &str {
        &self.config.address
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn registry(&self) -> &ParticleRegistry {
        &self.registry
    }

    pub fn cell(&self, p: Point) -> Option<&Cell> {
        self.grid.get(p)
    }

    /// Name of the particle at `p`.
    pub fn particle_name(&self, p: Point) -> Option<&str> {
        self.grid.get(p).map(|c| self.registry.name(c.particle))
    }

    pub fn write_count(&self, p: Point) -> Option<u64> {
        self.grid.get(p).map(|c| c.write_count)
    }

    /// Summed activity over the board.
    pub fn top_rate(&self) -> f64 {
        self.activity.top_rate()
    }

    /// Activity rate currently stored for `p`.
    pub fn activity_rate(&self, p: Point) -> f64 {
        self.activity.rate(p)
    }

    pub fn set_observer(&mut self, observer: Box<dyn BoardObserver>) {
        self.observer = observer;
    }

    pub fn set_transport(&mut self, transport: Box<dyn RemoteTransport>) {
        self.transport = Some(transport);
    }

    pub fn set_rng(&mut self, rng: Box<dyn ZooRng>) {
        self.rng = rng;
    }

    /// Map an off-grid coordinate to a cell on another board. Returns false
    /// if `p` is on this board.
    pub fn connect_remote(&mut self, p: Point, remote: RemoteCellCoord) -> bool {
        if self.grid.contains(p) {
            return false;
        }
        self.remotes.insert(p, remote);
        true
    }

    // ========================================================================
    // Direct writes
    // ========================================================================

    fn refresh_rate(&mut self, p: Point) {
        let Some(particle) = self.grid.get(p).map(|c| c.particle) else {
            return;
        };
        let rate = self.registry.activity_rate(particle);
        self.activity.update(p, rate);
    }

    fn refresh_all_rates(&mut self) {
        let points: Vec<Point> = self.grid.points().collect();
        for p in points {
            self.refresh_rate(p);
        }
    }

    fn write_particle(&mut self, p: Point, particle: ParticleId) -> Vec<Point> {
        let mut touched = vec![p];
        let Some(old) = self.grid.get(p).map(|c| c.particle) else {
            return Vec::new();
        };
        touched.extend(self.grid.remove_bonds(p));
        if let Some(cell) = self.grid.get_mut(p) {
            cell.particle = particle;
            cell.write_count += 1;
        }
        if old != particle {
            self.registry.dec_count(old);
            self.registry.inc_count(particle);
        }
        self.refresh_rate(p);
        touched
    }

    /// Overwrite one cell, dropping its bonds. Returns false off-grid.
    pub fn set_particle(&mut self, p: Point, name: &str) -> bool {
        if !self.grid.contains(p) {
            return false;
        }
        let particle = self.registry.get_or_create(name);
        for q in self.write_particle(p, particle) {
            self.observer.draw_cell(q);
        }
        true
    }

    /// Overwrite every cell with one particle.
    pub fn fill(&mut self, name: &str) {
        let points: Vec<Point> = self.grid.points().collect();
        for p in points {
            self.set_particle(p, name);
        }
        info!("filled board with '{}'", name);
    }

    /// Record a bond `name` from `from` to `to`, displacing any bond of the
    /// same name at either end. At least one end must be on-grid.
    pub fn add_bond(&mut self, from: Point, to: Point, name: &str) -> bool {
        if from == to || (!self.grid.contains(from) && !self.grid.contains(to)) {
            return false;
        }
        if let Some(old) = self.grid.get(from).and_then(|c| c.bonds.outgoing.get(name).copied()) {
            self.remove_bond(from, from + old, name);
        }
        if let Some(old) = self.grid.get(to).and_then(|c| c.bonds.incoming.get(name).copied()) {
            self.remove_bond(to + old, to, name);
        }
        if let Some(cell) = self.grid.get_mut(from) {
            cell.bonds.outgoing.insert(name.to_string(), to - from);
        }
        if let Some(cell) = self.grid.get_mut(to) {
            cell.bonds.incoming.insert(name.to_string(), from - to);
        }
        true
    }

    fn remove_bond(&mut self, from: Point, to: Point, name: &str) {
        if let Some(cell) = self.grid.get_mut(from) {
            if cell.bonds.outgoing.get(name) == Some(&(to - from)) {
                cell.bonds.outgoing.remove(name);
            }
        }
        if let Some(cell) = self.grid.get_mut(to) {
            if cell.bonds.incoming.get(name) == Some(&(from - to)) {
                cell.bonds.incoming.remove(name);
            }
        }
    }

    /// Drop every bond at `p` and the mirrors at its partners.
    pub fn remove_bonds(&mut self, p: Point) {
        for q in self.grid.remove_bonds(p) {
            self.observer.draw_cell(q);
        }
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    /// Number of cells holding the named particle.
    pub fn count(&self, name: &str) -> usize {
        self.registry.count(name)
    }

    /// (name, count) for every particle on the board, sorted by name.
    pub fn particle_counts(&self) -> Vec<(String, usize)> {
        self.registry.counts()
    }

    pub fn check_bond_consistency(&self) -> Result<(), String> {
        self.grid.check_bond_consistency()
    }

    /// Clear all compiled caches and evict particles no cell holds.
    /// Returns the number evicted.
    pub fn flush_caches(&mut self) -> usize {
        self.registry.flush()
    }

    /// Number of particles in the registry.
    pub fn registry_size(&self) -> usize {
        self.registry.len()
    }

    // ========================================================================
    // Update loop
    // ========================================================================

    /// Metropolis test: favorable changes always pass, others pass with
    /// probability `10^delta`.
    fn accept(&mut self, delta: f64) -> bool {
        delta > 0.0 || self.rng.next_double() < 10f64.powf(delta)
    }

    /// One update attempt.
    pub fn step(&mut self) -> StepOutcome {
        let outcome = self.attempt();
        trace!("step: {:?}", outcome);
        outcome
    }

    fn attempt(&mut self) -> StepOutcome {
        let Some(p) = self.activity.sample(&mut *self.rng) else {
            return StepOutcome::Idle;
        };
        let Some(source) = self.grid.get(p).map(|c| c.particle) else {
            return StepOutcome::Idle;
        };
        let Some(dir) = self.registry.sample_dir(source, &mut *self.rng) else {
            return StepOutcome::NoInteraction;
        };

        let n = p + self.topology.offset(dir);
        let Some(target) = self.grid.get(n).map(|c| c.particle) else {
            return match self.remotes.get(&n).cloned() {
                Some(remote) => {
                    self.request_remote(p, dir, remote);
                    StepOutcome::RemoteRequested
                }
                None => StepOutcome::OffGrid,
            };
        };

        let Some(outcome) = self.registry.sample_pair(source, dir, target, &mut *self.rng) else {
            return StepOutcome::NoInteraction;
        };
        if outcome.is_no_op() {
            return StepOutcome::NoChange;
        }

        let mut event = UpdateEvent::new(p, n, dir, source, target, outcome);
        if !event.bind(&self.grid) {
            return StepOutcome::BindFailed;
        }
        let delta = event.energy_delta(&self.grid, &mut self.registry, 0.0);
        if !self.accept(delta) {
            return StepOutcome::Rejected;
        }
        self.commit(event);
        StepOutcome::Accepted
    }

    fn commit(&mut self, event: UpdateEvent) {
        let notice = (!event.verb.is_empty()).then(|| VerbNotice {
            source: event.source,
            target: event.target,
            old_source: self.registry.name(event.old_source).to_string(),
            old_target: self.registry.name(event.old_target).to_string(),
            new_source: self.registry.name(event.new_source).to_string(),
            new_target: self.registry.name(event.new_target).to_string(),
            verb: event.verb.clone(),
        });

        let touched = event.commit(&mut self.grid, &mut self.registry);
        for &p in &touched {
            self.refresh_rate(p);
            self.observer.draw_cell(p);
        }
        if let Some(notice) = notice {
            self.observer.show_verb(&notice);
        }
    }

    /// Run an explicit number of update attempts.
    pub fn update(&mut self, attempts: usize) -> UpdateStats {
        let mut stats = UpdateStats::default();
        for _ in 0..attempts {
            stats.record(self.step());
        }
        debug!(
            "update: {} attempts, {} accepted, {} rejected, {} bind failures",
            stats.attempts, stats.accepted, stats.rejected, stats.bind_failures
        );
        stats
    }

    /// One unit of time: as many attempts as the summed activity, with the
    /// fractional part resolved by a coin flip.
    pub fn tick(&mut self) -> UpdateStats {
        let top = self.activity.top_rate();
        let whole = top.floor();
        let extra = usize::from(self.rng.next_double() < top - whole);
        self.update(whole as usize + extra)
    }

    // ========================================================================
    // Remote cells
    // ========================================================================

    /// Energy of the on-grid bonds at `p`.
    fn bond_energy_at(&mut self, p: Point) -> f64 {
        let Some(cell) = self.grid.get(p) else {
            return 0.0;
        };
        let mut bonds: Vec<(Point, Point, String)> = Vec::new();
        for (name, &offset) in &cell.bonds.outgoing {
            bonds.push((p, p + offset, name.clone()));
        }
        for (name, &offset) in &cell.bonds.incoming {
            bonds.push((p + offset, p, name.clone()));
        }

        let mut total = 0.0;
        for (from, to, name) in bonds {
            let (Some(a), Some(b)) = (self.grid.get(from), self.grid.get(to)) else {
                continue;
            };
            let previous = a.bonds.incoming.get(&name).map(|&o| -o);
            let (a, b) = (a.particle, b.particle);
            total += self.registry.bond_energy(a, &name, b, to - from, previous);
        }
        total
    }

    fn send(&self, address: &str, message: RemoteMessage) {
        match &self.transport {
            Some(transport) => {
                if let Err(e) = transport.send(address, message) {
                    warn!("remote send to '{}' failed: {}", address, e);
                }
            }
            None => warn!("no transport for remote message to '{}'", address),
        }
    }

    fn request_remote(&mut self, p: Point, dir: Direction, remote: RemoteCellCoord) {
        let Some((particle, write_count)) = self.grid.get(p).map(|c| (c.particle, c.write_count)) else {
            return;
        };
        let message = RemoteMessage::Evolve {
            target: remote.point,
            source_state: self.registry.name(particle).to_string(),
            dir,
            energy_barrier: -self.bond_energy_at(p),
            source: p,
            return_addr: self.config.address.clone(),
            write_count,
        };
        self.send(&remote.address, message);
    }

    /// Apply an inbound remote message.
    pub fn handle_message(&mut self, message: RemoteMessage) {
        match message {
            RemoteMessage::Evolve {
                target,
                source_state,
                dir,
                energy_barrier,
                source,
                return_addr,
                write_count,
            } => {
                let (new_state, energy) = self.evolve_target(target, &source_state, dir, energy_barrier);
                self.send(
                    &return_addr,
                    RemoteMessage::Return {
                        source,
                        new_state,
                        write_count,
                        energy,
                    },
                );
            }
            RemoteMessage::Return {
                source,
                new_state,
                write_count,
                energy,
            } => self.apply_return(source, &new_state, write_count, energy),
        }
    }

    /// Decode and apply a JSON remote message; garbled input is dropped.
    pub fn handle_raw_message(&mut self, text: &str) {
        match RemoteMessage::from_json(text) {
            Ok(message) => self.handle_message(message),
            Err(e) => warn!("dropping remote message: {}", e),
        }
    }

    /// Transform a local target on behalf of a remote source. Returns the
    /// source's resulting state and the accepted energy delta.
    fn evolve_target(&mut self, target: Point, source_state: &str, dir: Direction, barrier: f64) -> (String, f64) {
        let unchanged = (source_state.to_string(), 0.0);
        let Some(old_target) = self.grid.get(target).map(|c| c.particle) else {
            warn!("evolve request for off-grid cell {}", target);
            return unchanged;
        };
        if dir >= self.topology.neighbor_count() {
            warn!("evolve request with unknown direction {}", dir);
            return unchanged;
        }

        let old_source = self.registry.get_or_create(source_state);
        let Some(outcome) = self.registry.sample_pair(old_source, dir, old_target, &mut *self.rng) else {
            return unchanged;
        };
        if outcome.is_no_op() {
            return unchanged;
        }

        let source = target - self.topology.offset(dir);
        let mut event = UpdateEvent::with_remote_source(source, target, dir, old_source, old_target, outcome);
        if !event.bind(&self.grid) {
            return unchanged;
        }
        let delta = event.energy_delta(&self.grid, &mut self.registry, barrier);
        if !self.accept(delta) {
            return unchanged;
        }
        let new_state = self.registry.name(event.new_source).to_string();
        self.commit(event);
        (new_state, delta)
    }

    fn apply_return(&mut self, source: Point, new_state: &str, write_count: u64, energy: f64) {
        let Some(cell) = self.grid.get(source) else {
            warn!("return for off-grid cell {}", source);
            return;
        };
        if cell.write_count != write_count {
            debug!(
                "dropping stale return for {} (sent at write {}, now {})",
                source, write_count, cell.write_count
            );
            return;
        }
        let particle = self.registry.get_or_create(new_state);
        if particle == cell.particle {
            return;
        }
        trace!("remote update of {} to '{}' (energy {})", source, new_state, energy);
        for q in self.write_particle(source, particle) {
            self.observer.draw_cell(q);
        }
    }

    // ========================================================================
    // Initial state
    // ========================================================================

    /// Assign each cell the known particle whose color is nearest to the
    /// pixel at the same position. Returns the number of cells assigned.
    pub fn assign_from_image(&mut self, image: &RgbaImage) -> usize {
        let mut palette: Vec<(String, [u8; 3])> = self
            .registry
            .patterns()
            .literal_appearances()
            .map(|(name, color)| (name.to_string(), color))
            .collect();
        for (_, particle) in self.registry.iter() {
            if !palette.iter().any(|(name, _)| name == particle.name()) {
                palette.push((particle.name().to_string(), particle.color()));
            }
        }
        if palette.is_empty() {
            return 0;
        }

        let width = self.width().min(image.width() as usize);
        let height = self.height().min(image.height() as usize);
        let mut assigned = 0;
        for y in 0..height {
            for x in 0..width {
                let [r, g, b, _] = image.get_pixel(x as u32, y as u32).0;
                let nearest = palette
                    .iter()
                    .min_by_key(|(_, c)| color_distance([r, g, b], *c))
                    .map(|(name, _)| name.clone());
                if let Some(name) = nearest {
                    self.set_particle(Point::new(x as i32, y as i32), &name);
                    assigned += 1;
                }
            }
        }
        info!("assigned {} cells from {}x{} image", assigned, image.width(), image.height());
        assigned
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Capture every cell's particle name, write counter and bonds.
    pub fn snapshot(&self) -> BoardSnapshot {
        BoardSnapshot {
            width: self.width(),
            height: self.height(),
            topology: self.topology,
            cells: self
                .grid
                .iter()
                .map(|(_, cell)| super::board_io::CellSnapshot {
                    particle: self.registry.name(cell.particle).to_string(),
                    write_count: cell.write_count,
                    outgoing: cell.bonds.outgoing.clone(),
                    incoming: cell.bonds.incoming.clone(),
                })
                .collect(),
        }
    }

    /// Replace every cell with the snapshot's contents. Nothing is written
    /// if the snapshot's bonds are not mirrored at both ends.
    pub fn restore(&mut self, snapshot: &BoardSnapshot) -> SnapshotResult<()> {
        if snapshot.width != self.width()
            || snapshot.height != self.height()
            || snapshot.cells.len() != self.width() * self.height()
        {
            return Err(SnapshotError::DimensionMismatch {
                expected: (self.width(), self.height()),
                found: (snapshot.width, snapshot.height),
            });
        }
        if snapshot.topology != self.topology {
            return Err(SnapshotError::InvalidFormat(format!(
                "snapshot topology {:?} does not match board topology {:?}",
                snapshot.topology, self.topology
            )));
        }

        let points: Vec<Point> = self.grid.points().collect();
        let mut staged = self.grid.clone();
        for (&p, saved) in points.iter().zip(&snapshot.cells) {
            let particle = self.registry.get_or_create(&saved.particle);
            if let Some(cell) = staged.get_mut(p) {
                // Counters never go backwards; a changed particle is a new write.
                let floor = if cell.particle != particle {
                    cell.write_count + 1
                } else {
                    cell.write_count
                };
                cell.particle = particle;
                cell.write_count = saved.write_count.max(floor);
                cell.bonds = CellBonds {
                    outgoing: saved.outgoing.clone(),
                    incoming: saved.incoming.clone(),
                };
            }
        }
        staged
            .check_bond_consistency()
            .map_err(|e| SnapshotError::InvalidFormat(format!("snapshot bonds are inconsistent: {}", e)))?;

        for &p in &points {
            let (Some(old), Some(new)) = (self.grid.get(p), staged.get(p)) else {
                continue;
            };
            if old.particle != new.particle {
                self.registry.dec_count(old.particle);
                self.registry.inc_count(new.particle);
            }
        }
        self.grid = staged;
        for p in points {
            self.refresh_rate(p);
            self.observer.draw_cell(p);
        }
        Ok(())
    }
}

fn color_distance(a: [u8; 3], b: [u8; 3]) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = x as i32 - y as i32;
            (d * d) as u32
        })
        .sum()
}
