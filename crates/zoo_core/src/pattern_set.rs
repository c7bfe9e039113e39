//! PatternSet - the registry of appearance, transformation and energy templates.
//!
//! Transformation templates are compiled into one `RulePattern` per
//! direction they apply to and bucketed by direction, in declaration order.
//! Energy templates are bucketed by bond name.

use super::rule_match::{RuleMatch, RulePattern};
use super::template::{
    AppearanceTemplate, EnergyRuleTemplate, Icon, RuleSet, TemplateResult, TransformRuleTemplate,
};
use super::topology::{Direction, Point, Topology};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Color given to particles no appearance template matches.
pub const DEFAULT_COLOR: [u8; 3] = [128, 128, 128];

/// Resolved look of one particle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appearance {
    pub color: [u8; 3],
    pub verb: Option<String>,
    pub icon: Option<Icon>,
}

impl Default for Appearance {
    fn default() -> Self {
        Self {
            color: DEFAULT_COLOR,
            verb: None,
            icon: None,
        }
    }
}

/// All templates a board compiles its particles from.
#[derive(Debug)]
pub struct PatternSet {
    topology: Topology,
    appearances: Vec<AppearanceTemplate>,
    /// Rule patterns per direction, in declaration order.
    by_dir: Vec<Vec<Arc<RulePattern>>>,
    rule_count: usize,
    /// Energy templates per bond name, in declaration order.
    energies: HashMap<String, Vec<Arc<EnergyRuleTemplate>>>,
}

impl PatternSet {
    /// Create an empty pattern set for a topology.
    pub fn new(topology: Topology) -> Self {
        Self {
            topology,
            appearances: Vec::new(),
            by_dir: vec![Vec::new(); topology.neighbor_count()],
            rule_count: 0,
            energies: HashMap::new(),
        }
    }

    /// Build from tokenized records. The first invalid record rejects the set.
    pub fn from_rule_set(set: &RuleSet, topology: Topology) -> TemplateResult<Self> {
        let mut patterns = Self::new(topology);
        for record in &set.particles {
            patterns.add_appearance(AppearanceTemplate::from_record(record)?);
        }
        for record in &set.rules {
            patterns.add_transform_rule(TransformRuleTemplate::from_record(record, topology)?);
        }
        for record in &set.energies {
            patterns.add_energy_rule(EnergyRuleTemplate::from_record(record)?);
        }
        info!(
            "loaded rule set: {} appearances, {} rules, {} energy rules",
            patterns.appearances.len(),
            patterns.rule_count,
            patterns.energies.values().map(Vec::len).sum::<usize>()
        );
        Ok(patterns)
    }

    /// Build from a JSON rule set.
    pub fn from_json_str(text: &str, topology: Topology) -> TemplateResult<Self> {
        Self::from_rule_set(&RuleSet::from_json_str(text)?, topology)
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn add_appearance(&mut self, template: AppearanceTemplate) {
        self.appearances.push(template);
    }

    pub fn add_transform_rule(&mut self, template: TransformRuleTemplate) {
        let template = Arc::new(template);
        for dir in 0..self.topology.neighbor_count() {
            if template.applies_to(dir) {
                self.by_dir[dir].push(Arc::new(RulePattern::new(
                    Arc::clone(&template),
                    self.topology,
                    dir,
                )));
            }
        }
        self.rule_count += 1;
    }

    pub fn add_energy_rule(&mut self, template: EnergyRuleTemplate) {
        self.energies
            .entry(template.bond.clone())
            .or_default()
            .push(Arc::new(template));
    }

    /// Number of transformation templates.
    pub fn rule_count(&self) -> usize {
        self.rule_count
    }

    /// Look of a particle: the first appearance template matching the name,
    /// or the neutral default.
    pub fn appearance_for(&self, name: &str) -> Appearance {
        self.appearances
            .iter()
            .find(|a| a.regex.is_match(name))
            .map(|a| Appearance {
                color: a.color,
                verb: a.verb.clone(),
                icon: a.icon,
            })
            .unwrap_or_default()
    }

    /// Appearance templates that name exactly one particle.
    pub fn literal_appearances(&self) -> impl Iterator<Item = (&str, [u8; 3])> + '_ {
        self.appearances
            .iter()
            .filter_map(|a| a.literal_name().map(|n| (n, a.color)))
    }

    /// Rule patterns for a direction, in declaration order.
    pub fn rule_patterns(&self, dir: Direction) -> &[Arc<RulePattern>] {
        self.by_dir.get(dir).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Fresh matches, source-bound to `name`, for every rule that could
    /// apply to it in direction `dir`.
    pub fn source_transform_rules(&self, name: &str, dir: Direction) -> Vec<RuleMatch> {
        self.rule_patterns(dir)
            .iter()
            .filter(|p| p.pre_check(name))
            .filter_map(|p| {
                let mut m = RuleMatch::new(Arc::clone(p));
                m.bind_source(name).then_some(m)
            })
            .collect()
    }

    /// Energy templates for `bond` whose names match the pair.
    pub fn energy_rules_for(&self, source: &str, target: &str, bond: &str) -> Vec<Arc<EnergyRuleTemplate>> {
        self.energies
            .get(bond)
            .map(|rules| {
                rules
                    .iter()
                    .filter(|r| r.matches(source, target))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Total interaction energy of a `bond` from `source` to `target` with
    /// the given offset and, for chains, the offset of the bond before it.
    pub fn energy(
        &self,
        source: &str,
        target: &str,
        bond: &str,
        offset: Point,
        previous: Option<Point>,
    ) -> f64 {
        sum_energy(
            &self.energy_rules_for(source, target, bond),
            self.topology,
            offset,
            previous,
        )
    }
}

/// Sum a list of matching energy templates, each scaled by its geometry.
pub fn sum_energy(
    rules: &[Arc<EnergyRuleTemplate>],
    topology: Topology,
    offset: Point,
    previous: Option<Point>,
) -> f64 {
    rules
        .iter()
        .filter_map(|r| {
            r.geometry
                .factor(topology, offset, previous)
                .map(|f| f * r.energy)
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{EnergyRuleRecord, ParticleRecord};

    fn appearance(pattern: &str, color: [u8; 3]) -> AppearanceTemplate {
        AppearanceTemplate::from_record(&ParticleRecord {
            pattern: Some(pattern.to_string()),
            color,
            ..Default::default()
        })
        .unwrap()
    }

    fn energy(source: &str, target: &str, bond: &str, e: f64) -> EnergyRuleRecord {
        EnergyRuleRecord {
            source: Some(source.into()),
            target: Some(target.into()),
            bond: Some(bond.into()),
            energy: Some(e),
            ..Default::default()
        }
    }

    #[test]
    fn test_first_appearance_wins() {
        let mut set = PatternSet::new(Topology::Square4);
        set.add_appearance(appearance("sand", [1, 2, 3]));
        set.add_appearance(appearance("s.*", [4, 5, 6]));

        assert_eq!(set.appearance_for("sand").color, [1, 2, 3]);
        assert_eq!(set.appearance_for("stone").color, [4, 5, 6]);
        assert_eq!(set.appearance_for("water"), Appearance::default());
    }

    #[test]
    fn test_literal_appearances() {
        let mut set = PatternSet::new(Topology::Square4);
        set.add_appearance(appearance("sand", [1, 2, 3]));
        set.add_appearance(appearance("s.*", [4, 5, 6]));
        let literal: Vec<_> = set.literal_appearances().collect();
        assert_eq!(literal, vec![("sand", [1, 2, 3])]);
    }

    #[test]
    fn test_rules_bucketed_by_direction() {
        let mut set = PatternSet::new(Topology::Square4);
        let mut down = TransformRuleTemplate::simple("sand", "_", "_", "sand", 1.0);
        down.dir = Some(2);
        set.add_transform_rule(down);
        set.add_transform_rule(TransformRuleTemplate::simple("sand", "water", "water", "sand", 0.5));

        assert_eq!(set.rule_count(), 2);
        assert_eq!(set.rule_patterns(0).len(), 1);
        assert_eq!(set.rule_patterns(2).len(), 2);
        assert_eq!(set.source_transform_rules("sand", 2).len(), 2);
        assert_eq!(set.source_transform_rules("sand", 1).len(), 1);
        assert!(set.source_transform_rules("water", 2).is_empty());
        assert!(set.source_transform_rules("sand", 2).iter().all(|m| m.source_bound()));
    }

    #[test]
    fn test_energy_sums_matching_templates() {
        let set = PatternSet::from_rule_set(
            &RuleSet {
                energies: vec![
                    energy("a", "b", "x", 1.5),
                    energy("a", ".*", "x", 0.5),
                    energy("a", "b", "y", 10.0),
                ],
                ..Default::default()
            },
            Topology::Square4,
        )
        .unwrap();

        let e = set.energy("a", "b", "x", Point::new(1, 0), None);
        assert!((e - 2.0).abs() < 1e-12);
        let e = set.energy("a", "c", "x", Point::new(1, 0), None);
        assert!((e - 0.5).abs() < 1e-12);
        assert_eq!(set.energy("b", "a", "x", Point::new(1, 0), None), 0.0);
        assert_eq!(set.energy("a", "b", "z", Point::new(1, 0), None), 0.0);
    }

    #[test]
    fn test_energy_tapers_with_geometry() {
        let mut record = energy("a", "b", "x", 4.0);
        record.max_len = Some(1.0);
        record.len_tolerance = 2.0;
        let set = PatternSet::from_rule_set(
            &RuleSet {
                energies: vec![record],
                ..Default::default()
            },
            Topology::Square4,
        )
        .unwrap();

        assert_eq!(set.energy("a", "b", "x", Point::new(1, 0), None), 4.0);
        assert!((set.energy("a", "b", "x", Point::new(2, 0), None) - 2.0).abs() < 1e-12);
        assert_eq!(set.energy("a", "b", "x", Point::new(4, 0), None), 0.0);
        assert_eq!(set.energy("a", "b", "x", Point::default(), None), 0.0);
    }

    #[test]
    fn test_invalid_record_rejects_set() {
        let text = r#"{"rules": [{"source": "a"}]}"#;
        assert!(PatternSet::from_json_str(text, Topology::Square4).is_err());
    }
}
