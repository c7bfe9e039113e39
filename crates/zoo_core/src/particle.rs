//! Particles and the particle registry.
//!
//! A particle is a named state. Particles live in a slot-map arena keyed by
//! `ParticleId`; grid cells and caches refer to them by id, and the registry
//! keeps a name index so two references to the same name are the same
//! particle.
//!
//! Each particle carries lazily built caches:
//! - its source-bound rule matches per direction, from which the outgoing
//!   rate per direction is derived,
//! - the compiled outcome distribution per (direction, neighbor particle),
//! - the matching energy templates per (bond name, partner particle).
//!
//! Caches are pure memoization and may be flushed between updates. A flush
//! also evicts particles no cell holds any more.

use super::pattern_set::{sum_energy, Appearance, PatternSet};
use super::rng::ZooRng;
use super::rule_match::RuleMatch;
use super::sampler::WeightedSampler;
use super::template::{EnergyRuleTemplate, TransformRuleTemplate};
use super::topology::{Direction, Point};
use slotmap::{new_key_type, SlotMap};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::debug;

new_key_type! {
    /// Stable identity of a particle within one registry.
    pub struct ParticleId;
}

/// One possible result of sampling a (source, target, direction) triple.
///
/// Outcomes are keyed by the resulting particle pair; a later rule producing
/// the same pair replaces an earlier one. The implicit no-op outcome has no
/// rule and is keyed apart from explicit outcomes.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub new_source: ParticleId,
    pub new_target: ParticleId,
    pub verb: String,
    pub rule: Option<Arc<TransformRuleTemplate>>,
}

impl Outcome {
    /// The implicit "nothing happens" outcome.
    pub fn no_op(source: ParticleId, target: ParticleId) -> Self {
        Self {
            new_source: source,
            new_target: target,
            verb: String::new(),
            rule: None,
        }
    }

    pub fn is_no_op(&self) -> bool {
        self.rule.is_none()
    }
}

impl PartialEq for Outcome {
    fn eq(&self, other: &Self) -> bool {
        self.new_source == other.new_source
            && self.new_target == other.new_target
            && self.is_no_op() == other.is_no_op()
    }
}

impl Eq for Outcome {}

impl Hash for Outcome {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.new_source.hash(state);
        self.new_target.hash(state);
        self.is_no_op().hash(state);
    }
}

/// A named state with its appearance, occupancy count and caches.
#[derive(Debug)]
pub struct Particle {
    name: String,
    appearance: Appearance,
    count: usize,
    /// Source-bound matches per direction.
    source_rules: Option<Vec<Vec<RuleMatch>>>,
    /// Outgoing rate per direction, each at most 1.
    dir_rates: Option<WeightedSampler<Direction>>,
    transforms: Vec<HashMap<ParticleId, WeightedSampler<Outcome>>>,
    energies: HashMap<String, HashMap<ParticleId, Vec<Arc<EnergyRuleTemplate>>>>,
}

impl Particle {
    fn new(name: String, appearance: Appearance, neighbor_count: usize) -> Self {
        Self {
            name,
            appearance,
            count: 0,
            source_rules: None,
            dir_rates: None,
            transforms: vec![HashMap::new(); neighbor_count],
            energies: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn color(&self) -> [u8; 3] {
        self.appearance.color
    }

    pub fn appearance(&self) -> &Appearance {
        &self.appearance
    }

    /// Number of grid cells holding this particle.
    pub fn count(&self) -> usize {
        self.count
    }

    fn flush(&mut self) {
        self.source_rules = None;
        self.dir_rates = None;
        for cache in &mut self.transforms {
            cache.clear();
        }
        self.energies.clear();
    }
}

/// Truncate a name to at most `max_len` bytes on a char boundary.
fn truncate_name(name: &str, max_len: usize) -> &str {
    if name.len() <= max_len {
        return name;
    }
    let mut end = max_len;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Name-indexed arena of particles, compiled on demand from a `PatternSet`.
#[derive(Debug)]
pub struct ParticleRegistry {
    patterns: PatternSet,
    particles: SlotMap<ParticleId, Particle>,
    by_name: HashMap<String, ParticleId>,
    max_name_len: usize,
}

impl ParticleRegistry {
    pub fn new(patterns: PatternSet, max_name_len: usize) -> Self {
        Self {
            patterns,
            particles: SlotMap::with_key(),
            by_name: HashMap::new(),
            max_name_len: max_name_len.max(1),
        }
    }

    pub fn patterns(&self) -> &PatternSet {
        &self.patterns
    }

    /// Number of live particles.
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    /// Resolve a name to its particle, creating it from the first matching
    /// appearance template if unseen. Overlong names are truncated.
    pub fn get_or_create(&mut self, name: &str) -> ParticleId {
        let name = truncate_name(name, self.max_name_len);
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let appearance = self.patterns.appearance_for(name);
        let neighbor_count = self.patterns.topology().neighbor_count();
        let id = self
            .particles
            .insert(Particle::new(name.to_string(), appearance, neighbor_count));
        self.by_name.insert(name.to_string(), id);
        debug!("created particle '{}'", name);
        id
    }

    pub fn find(&self, name: &str) -> Option<ParticleId> {
        self.by_name
            .get(truncate_name(name, self.max_name_len))
            .copied()
    }

    pub fn get(&self, id: ParticleId) -> Option<&Particle> {
        self.particles.get(id)
    }

    /// Name of a live particle, or "" for a stale id.
    pub fn name(&self, id: ParticleId) -> &str {
        self.particles.get(id).map(Particle::name).unwrap_or("")
    }

    pub fn iter(&self) -> impl Iterator<Item = (ParticleId, &Particle)> + '_ {
        self.particles.iter()
    }

    pub fn inc_count(&mut self, id: ParticleId) {
        if let Some(p) = self.particles.get_mut(id) {
            p.count += 1;
        }
    }

    pub fn dec_count(&mut self, id: ParticleId) {
        if let Some(p) = self.particles.get_mut(id) {
            debug_assert!(p.count > 0, "count underflow for '{}'", p.name);
            p.count = p.count.saturating_sub(1);
        }
    }

    /// Occupancy of a name, 0 if no such particle.
    pub fn count(&self, name: &str) -> usize {
        self.find(name)
            .and_then(|id| self.particles.get(id))
            .map_or(0, Particle::count)
    }

    /// (name, count) for every particle some cell holds.
    pub fn counts(&self) -> Vec<(String, usize)> {
        let mut counts: Vec<(String, usize)> = self
            .particles
            .values()
            .filter(|p| p.count > 0)
            .map(|p| (p.name.clone(), p.count))
            .collect();
        counts.sort();
        counts
    }

    fn ensure_source_rules(&mut self, id: ParticleId) {
        let Some(particle) = self.particles.get(id) else {
            return;
        };
        if particle.source_rules.is_some() {
            return;
        }
        let topology = self.patterns.topology();
        let rules: Vec<Vec<RuleMatch>> = (0..topology.neighbor_count())
            .map(|dir| self.patterns.source_transform_rules(&particle.name, dir))
            .collect();

        let mut rates = WeightedSampler::new();
        for (dir, matches) in rules.iter().enumerate() {
            let rate: f64 = matches.iter().map(|m| m.template().prob).sum();
            rates.add(dir, rate.min(1.0));
        }

        if let Some(particle) = self.particles.get_mut(id) {
            particle.source_rules = Some(rules);
            particle.dir_rates = Some(rates);
        }
    }

    /// Outgoing rate of a particle in one direction.
    pub fn dir_rate(&mut self, id: ParticleId, dir: Direction) -> f64 {
        self.ensure_source_rules(id);
        self.particles
            .get(id)
            .and_then(|p| p.dir_rates.as_ref())
            .map_or(0.0, |rates| rates.weight(&dir))
    }

    /// Activity rate of a cell holding this particle: the summed outgoing
    /// rate over all directions, normalized to at most 1.
    pub fn activity_rate(&mut self, id: ParticleId) -> f64 {
        self.ensure_source_rules(id);
        let neighbor_count = self.patterns.topology().neighbor_count() as f64;
        self.particles
            .get(id)
            .and_then(|p| p.dir_rates.as_ref())
            .map_or(0.0, |rates| (rates.total() / neighbor_count).min(1.0))
    }

    /// Pick a direction weighted by outgoing rate.
    pub fn sample_dir(&mut self, id: ParticleId, rng: &mut dyn ZooRng) -> Option<Direction> {
        self.ensure_source_rules(id);
        self.particles
            .get(id)
            .and_then(|p| p.dir_rates.as_ref())
            .and_then(|rates| rates.sample(rng).copied())
    }

    /// Build the outcome distribution for `source` meeting `target` in `dir`
    /// and cache it.
    pub fn compile_transform(&mut self, source: ParticleId, dir: Direction, target: ParticleId) {
        self.ensure_source_rules(source);
        let Some(target_name) = self.particles.get(target).map(|p| p.name.clone()) else {
            return;
        };
        let (mut matches, default_verb) = match self.particles.get_mut(source) {
            Some(p) => {
                let matches = p
                    .source_rules
                    .as_mut()
                    .and_then(|rules| rules.get_mut(dir))
                    .map(std::mem::take)
                    .unwrap_or_default();
                (matches, p.appearance.verb.clone().unwrap_or_default())
            }
            None => return,
        };

        let mut sampler = WeightedSampler::new();
        for m in matches.iter_mut() {
            if !m.bind_target(&target_name) {
                continue;
            }
            let new_source_name = m.new_source_name();
            let new_target_name = m.new_target_name();
            let mut verb = m.verb();
            let rule = Arc::clone(m.template());
            m.unbind_target();

            if verb.is_empty() {
                verb = default_verb.clone();
            }
            let new_source = self.get_or_create(&new_source_name);
            let new_target = self.get_or_create(&new_target_name);
            let prob = rule.prob;
            sampler.add(
                Outcome {
                    new_source,
                    new_target,
                    verb,
                    rule: Some(rule),
                },
                prob,
            );
        }

        let total = sampler.total();
        if total < 1.0 {
            sampler.add(Outcome::no_op(source, target), 1.0 - total);
        }
        sampler.close();

        if let Some(p) = self.particles.get_mut(source) {
            if let Some(slot) = p.source_rules.as_mut().and_then(|rules| rules.get_mut(dir)) {
                *slot = matches;
            }
            if let Some(cache) = p.transforms.get_mut(dir) {
                cache.insert(target, sampler);
            }
        }
        debug!(
            "compiled '{}' -> '{}' dir {}",
            self.name(source),
            target_name,
            dir
        );
    }

    /// The cached outcome distribution, if compiled.
    pub fn transform(&self, source: ParticleId, dir: Direction, target: ParticleId) -> Option<&WeightedSampler<Outcome>> {
        self.particles
            .get(source)
            .and_then(|p| p.transforms.get(dir))
            .and_then(|cache| cache.get(&target))
    }

    /// Sample an outcome, compiling on a cache miss. `None` means no
    /// interaction is defined for the pair.
    pub fn sample_pair(
        &mut self,
        source: ParticleId,
        dir: Direction,
        target: ParticleId,
        rng: &mut dyn ZooRng,
    ) -> Option<Outcome> {
        if self.transform(source, dir, target).is_none() {
            self.compile_transform(source, dir, target);
        }
        self.transform(source, dir, target)
            .and_then(|sampler| sampler.sample(rng).cloned())
    }

    fn energy_rules(&mut self, source: ParticleId, bond: &str, target: ParticleId) -> Vec<Arc<EnergyRuleTemplate>> {
        if let Some(rules) = self
            .particles
            .get(source)
            .and_then(|p| p.energies.get(bond))
            .and_then(|by_target| by_target.get(&target))
        {
            return rules.clone();
        }
        let rules = self
            .patterns
            .energy_rules_for(self.name(source), self.name(target), bond);
        if let Some(p) = self.particles.get_mut(source) {
            p.energies
                .entry(bond.to_string())
                .or_default()
                .insert(target, rules.clone());
        }
        rules
    }

    /// Energy of a `bond` from `source` to `target` with the given offset and
    /// the offset of the preceding bond in a chain.
    pub fn bond_energy(
        &mut self,
        source: ParticleId,
        bond: &str,
        target: ParticleId,
        offset: Point,
        previous: Option<Point>,
    ) -> f64 {
        let rules = self.energy_rules(source, bond, target);
        if rules.is_empty() {
            return 0.0;
        }
        sum_energy(&rules, self.patterns.topology(), offset, previous)
    }

    /// Clear every cache, then evict particles no cell holds.
    /// Returns the number evicted.
    pub fn flush(&mut self) -> usize {
        for particle in self.particles.values_mut() {
            particle.flush();
        }
        let before = self.particles.len();
        let by_name = &mut self.by_name;
        self.particles.retain(|_, p| {
            let keep = p.count > 0;
            if !keep {
                by_name.remove(&p.name);
            }
            keep
        });
        let evicted = before - self.particles.len();
        debug!(
            "flushed particle caches, evicted {} of {} particles",
            evicted, before
        );
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::StdRandom;
    use crate::template::TransformRuleTemplate;
    use crate::topology::Topology;

    fn registry(rules: Vec<TransformRuleTemplate>) -> ParticleRegistry {
        let mut patterns = PatternSet::new(Topology::Square4);
        for rule in rules {
            patterns.add_transform_rule(rule);
        }
        ParticleRegistry::new(patterns, 256)
    }

    #[test]
    fn test_same_name_same_particle() {
        let mut reg = registry(vec![]);
        let a = reg.get_or_create("a");
        assert_eq!(reg.get_or_create("a"), a);
        assert_ne!(reg.get_or_create("b"), a);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_long_names_are_truncated() {
        let mut patterns = PatternSet::new(Topology::Square4);
        patterns.add_transform_rule(TransformRuleTemplate::simple("x", "y", "$S", "$T", 1.0));
        let mut reg = ParticleRegistry::new(patterns, 4);
        let id = reg.get_or_create("abcdefgh");
        assert_eq!(reg.name(id), "abcd");
        assert_eq!(reg.get_or_create("abcdzzzz"), id);

        let id = reg.get_or_create("ééé");
        assert_eq!(reg.name(id), "éé");
    }

    #[test]
    fn test_unmatched_name_gets_default_appearance() {
        let mut reg = registry(vec![]);
        let id = reg.get_or_create("mystery");
        assert_eq!(reg.get(id).unwrap().appearance(), &Appearance::default());
    }

    #[test]
    fn test_rates_per_direction() {
        let mut down = TransformRuleTemplate::simple("sand", "_", "_", "sand", 1.0);
        down.dir = Some(2);
        let spread = TransformRuleTemplate::simple("sand", "_", "_", "sand", 0.25);
        let mut reg = registry(vec![down, spread]);
        let sand = reg.get_or_create("sand");

        assert_eq!(reg.dir_rate(sand, 2), 1.0);
        assert_eq!(reg.dir_rate(sand, 0), 0.25);
        let activity = reg.activity_rate(sand);
        assert!((activity - 1.75 / 4.0).abs() < 1e-12, "activity {}", activity);

        let empty = reg.get_or_create("_");
        assert_eq!(reg.activity_rate(empty), 0.0);
        let mut rng = StdRandom::from_u64_seed(1);
        assert_eq!(reg.sample_dir(empty, &mut rng), None);
    }

    #[test]
    fn test_compile_adds_no_op_residual() {
        let mut reg = registry(vec![TransformRuleTemplate::simple("a", "b", "c", "d", 0.3)]);
        let a = reg.get_or_create("a");
        let b = reg.get_or_create("b");
        reg.compile_transform(a, 0, b);

        let sampler = reg.transform(a, 0, b).unwrap();
        assert_eq!(sampler.len(), 2);
        assert!((sampler.total() - 1.0).abs() < 1e-12);
        assert!(sampler.is_closed());
        assert!(reg.find("c").is_some(), "outcome particles are created");
    }

    #[test]
    fn test_later_rule_overrides_same_outcome() {
        let first = TransformRuleTemplate::simple(".*", "x", "_", "$T", 1.0);
        let mut except = TransformRuleTemplate::simple("basalt", "x", "_", "$T", 0.0);
        except.verb = crate::expand::MacroTemplate::parse("resists");
        let mut reg = registry(vec![first, except]);
        let basalt = reg.get_or_create("basalt");
        let sand = reg.get_or_create("sand");
        let x = reg.get_or_create("x");
        let mut rng = StdRandom::from_u64_seed(3);

        for _ in 0..50 {
            let outcome = reg.sample_pair(basalt, 1, x, &mut rng).unwrap();
            assert!(outcome.is_no_op(), "basalt is exempt");
            let outcome = reg.sample_pair(sand, 1, x, &mut rng).unwrap();
            assert!(!outcome.is_no_op());
        }
    }

    #[test]
    fn test_unmatched_pair_is_pure_no_op() {
        let mut reg = registry(vec![TransformRuleTemplate::simple("a", "b", "$T", "$S", 1.0)]);
        let a = reg.get_or_create("a");
        let c = reg.get_or_create("c");
        let mut rng = StdRandom::from_u64_seed(9);
        let outcome = reg.sample_pair(a, 0, c, &mut rng).unwrap();
        assert!(outcome.is_no_op());
        assert_eq!(outcome.new_source, a);
        assert_eq!(outcome.new_target, c);
    }

    #[test]
    fn test_empty_verb_falls_back_to_default() {
        let mut patterns = PatternSet::new(Topology::Square4);
        patterns.add_appearance(
            crate::template::AppearanceTemplate::from_record(&crate::template::ParticleRecord {
                pattern: Some("fire".into()),
                verb: Some("burns".into()),
                ..Default::default()
            })
            .unwrap(),
        );
        patterns.add_transform_rule(TransformRuleTemplate::simple("fire", "wood", "fire", "fire", 1.0));
        let mut reg = ParticleRegistry::new(patterns, 256);
        let fire = reg.get_or_create("fire");
        let wood = reg.get_or_create("wood");
        let mut rng = StdRandom::from_u64_seed(4);
        let outcome = reg.sample_pair(fire, 0, wood, &mut rng).unwrap();
        assert_eq!(outcome.verb, "burns");
    }

    #[test]
    fn test_flush_evicts_unreferenced_particles() {
        let mut reg = registry(vec![TransformRuleTemplate::simple("a", "b", "c", "d", 1.0)]);
        let a = reg.get_or_create("a");
        let b = reg.get_or_create("b");
        reg.inc_count(a);
        reg.inc_count(b);
        let mut rng = StdRandom::from_u64_seed(2);
        reg.sample_pair(a, 0, b, &mut rng);
        assert_eq!(reg.len(), 4);

        let evicted = reg.flush();
        assert_eq!(evicted, 2);
        assert!(reg.find("c").is_none());
        assert_eq!(reg.find("a"), Some(a));
        assert!(reg.transform(a, 0, b).is_none(), "caches are cleared");

        // Recompiling after a flush gives the same distribution.
        let outcome = reg.sample_pair(a, 0, b, &mut rng).unwrap();
        assert_eq!(reg.name(outcome.new_source), "c");
    }

    #[test]
    fn test_counts() {
        let mut reg = registry(vec![]);
        let a = reg.get_or_create("a");
        reg.get_or_create("b");
        reg.inc_count(a);
        reg.inc_count(a);
        assert_eq!(reg.count("a"), 2);
        assert_eq!(reg.count("b"), 0);
        assert_eq!(reg.count("zzz"), 0);
        assert_eq!(reg.counts(), vec![("a".to_string(), 2)]);
        reg.dec_count(a);
        assert_eq!(reg.count("a"), 1);
    }
}
