//! RulePattern and RuleMatch - binding rule templates to particle names.
//!
//! A `RulePattern` is one transformation template compiled for one
//! direction: its source pattern has the direction macros expanded and is
//! compiled to an anchored regex, and a literal prefix is extracted for a
//! cheap pre-check. Patterns are shared.
//!
//! A `RuleMatch` is the transient binding state on top of a pattern. The
//! source slot is bound first; that fixes the source capture groups and
//! compiles the target pattern (which may refer to them). The target slot
//! is then bound and unbound repeatedly, once per neighbor tried, so one
//! match object serves every target a subject meets in that direction.

use super::expand::{ExpansionContext, MacroTemplate};
use super::template::{anchored_regex, TransformRuleTemplate};
use super::topology::{Direction, Topology};
use regex::Regex;
use std::sync::Arc;
use tracing::warn;

const REGEX_META: &[char] = &[
    '\\', '.', '+', '*', '?', '(', ')', '|', '[', ']', '{', '}', '^', '$',
];

/// Longest literal text every match of `pattern` must start with.
pub fn literal_prefix(pattern: &str) -> String {
    if pattern.contains('|') {
        return String::new();
    }
    let mut prefix = String::new();
    for ch in pattern.chars() {
        if REGEX_META.contains(&ch) {
            // A quantifier makes the preceding character optional or repeated.
            if matches!(ch, '*' | '?' | '{') {
                prefix.pop();
            }
            break;
        }
        prefix.push(ch);
    }
    prefix
}

/// A transformation template compiled for one direction.
#[derive(Debug)]
pub struct RulePattern {
    template: Arc<TransformRuleTemplate>,
    topology: Topology,
    dir: Direction,
    source_regex: Option<Regex>,
    prefix: String,
}

impl RulePattern {
    pub fn new(template: Arc<TransformRuleTemplate>, topology: Topology, dir: Direction) -> Self {
        let ctx = ExpansionContext::for_direction(topology, dir);
        let expanded = template.source.expand_regex(&ctx);
        let source_regex = match anchored_regex(&expanded) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!("rule source pattern disabled: {}", e);
                None
            }
        };
        let prefix = template
            .prefix
            .clone()
            .unwrap_or_else(|| literal_prefix(&expanded));
        Self {
            template,
            topology,
            dir,
            source_regex,
            prefix,
        }
    }

    pub fn template(&self) -> &Arc<TransformRuleTemplate> {
        &self.template
    }

    pub fn dir(&self) -> Direction {
        self.dir
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Cheap filter run before any regex matching.
    pub fn pre_check(&self, name: &str) -> bool {
        self.source_regex.is_some() && name.starts_with(&self.prefix)
    }
}

/// Binding state of one pattern against a (source, target) pair.
#[derive(Debug, Clone)]
pub struct RuleMatch {
    pattern: Arc<RulePattern>,
    source: Option<String>,
    source_groups: usize,
    target_regex: Option<Regex>,
    target: Option<String>,
    /// Source groups, followed by target groups once the target is bound.
    groups: Vec<String>,
}

impl RuleMatch {
    pub fn new(pattern: Arc<RulePattern>) -> Self {
        Self {
            pattern,
            source: None,
            source_groups: 0,
            target_regex: None,
            target: None,
            groups: Vec::new(),
        }
    }

    pub fn pattern(&self) -> &RulePattern {
        &self.pattern
    }

    pub fn template(&self) -> &Arc<TransformRuleTemplate> {
        &self.pattern.template
    }

    pub fn dir(&self) -> Direction {
        self.pattern.dir
    }

    pub fn source_bound(&self) -> bool {
        self.source.is_some()
    }

    pub fn target_bound(&self) -> bool {
        self.target.is_some()
    }

    /// Try to bind the source slot. Returns false (leaving the match
    /// unbound) if the name does not match.
    ///
    /// # Panics
    /// Panics if the source slot is already bound.
    pub fn bind_source(&mut self, name: &str) -> bool {
        assert!(
            self.source.is_none(),
            "source slot already bound to {:?}",
            self.source
        );
        if !self.pattern.pre_check(name) {
            return false;
        }
        let Some(re) = &self.pattern.source_regex else {
            return false;
        };
        let Some(caps) = re.captures(name) else {
            return false;
        };

        let groups: Vec<String> = caps
            .iter()
            .skip(1)
            .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
            .collect();

        let ctx = ExpansionContext {
            topology: self.pattern.topology,
            dir: self.pattern.dir,
            source: Some(name),
            target: None,
            groups: &groups,
        };
        let target_pattern = self.pattern.template.target.expand_regex(&ctx);
        self.target_regex = match anchored_regex(&target_pattern) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!("rule target pattern disabled for '{}': {}", name, e);
                None
            }
        };

        self.source_groups = groups.len();
        self.groups = groups;
        self.source = Some(name.to_string());
        true
    }

    /// Try to bind the target slot. Returns false (leaving the target
    /// unbound) if the name does not match.
    ///
    /// # Panics
    /// Panics if the source is unbound or the target is already bound.
    pub fn bind_target(&mut self, name: &str) -> bool {
        assert!(self.source.is_some(), "target bound before source");
        assert!(
            self.target.is_none(),
            "target slot already bound to {:?}",
            self.target
        );
        let Some(re) = &self.target_regex else {
            return false;
        };
        let Some(caps) = re.captures(name) else {
            return false;
        };
        self.groups.extend(
            caps.iter()
                .skip(1)
                .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default()),
        );
        self.target = Some(name.to_string());
        true
    }

    /// Release the target slot, keeping the source binding.
    pub fn unbind_target(&mut self) {
        self.groups.truncate(self.source_groups);
        self.target = None;
    }

    /// Release both slots.
    pub fn unbind(&mut self) {
        self.groups.clear();
        self.source_groups = 0;
        self.target_regex = None;
        self.target = None;
        self.source = None;
    }

    /// Expand a right-hand-side template against the bound pair.
    ///
    /// # Panics
    /// Panics unless both slots are bound.
    pub fn expand(&self, template: &MacroTemplate) -> String {
        assert!(
            self.source.is_some() && self.target.is_some(),
            "expanding a rule template before both slots are bound"
        );
        let ctx = ExpansionContext {
            topology: self.pattern.topology,
            dir: self.pattern.dir,
            source: self.source.as_deref(),
            target: self.target.as_deref(),
            groups: &self.groups,
        };
        template.expand(&ctx)
    }

    pub fn new_source_name(&self) -> String {
        self.expand(&self.pattern.template.new_source)
    }

    pub fn new_target_name(&self) -> String {
        self.expand(&self.pattern.template.new_target)
    }

    pub fn verb(&self) -> String {
        self.expand(&self.pattern.template.verb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(template: TransformRuleTemplate, dir: Direction) -> Arc<RulePattern> {
        Arc::new(RulePattern::new(Arc::new(template), Topology::Square4, dir))
    }

    #[test]
    fn test_literal_prefix() {
        assert_eq!(literal_prefix("a(\\d+)"), "a");
        assert_eq!(literal_prefix("ab*c"), "a");
        assert_eq!(literal_prefix("ab?"), "a");
        assert_eq!(literal_prefix("ab+"), "ab");
        assert_eq!(literal_prefix("worm/n"), "worm/n");
        assert_eq!(literal_prefix("sand.*"), "sand");
        assert_eq!(literal_prefix("x|y"), "");
        assert_eq!(literal_prefix(".*"), "");
    }

    #[test]
    fn test_increment_round_trip() {
        let t = TransformRuleTemplate::simple("a(\\d+)", "b(\\d+)", "a$+1.1", "b$2", 1.0);
        let mut m = RuleMatch::new(pattern(t, 0));
        assert!(m.bind_source("a5"));
        assert!(m.bind_target("b9"));
        assert_eq!(m.new_source_name(), "a6");
        assert_eq!(m.new_target_name(), "b9");
    }

    #[test]
    fn test_decrement_below_zero_drops_substitution() {
        let t = TransformRuleTemplate::simple("a(\\d+)", "b(\\d+)", "a$-1.1", "$T", 1.0);
        let mut m = RuleMatch::new(pattern(t, 0));
        assert!(m.bind_source("a0"));
        assert!(m.bind_target("b9"));
        assert_eq!(m.new_source_name(), "a");
    }

    #[test]
    fn test_matching_is_whole_string() {
        let t = TransformRuleTemplate::simple("a", "b", "$S", "$T", 1.0);
        let mut m = RuleMatch::new(pattern(t, 0));
        assert!(!m.bind_source("ab"));
        assert!(!m.source_bound());
        assert!(m.bind_source("a"));
        assert!(!m.bind_target("bb"));
        assert!(!m.target_bound());
        assert!(m.bind_target("b"));
    }

    #[test]
    fn test_target_pattern_sees_source_groups() {
        let t = TransformRuleTemplate::simple("key(\\w)", "lock$1", "$S", "open", 1.0);
        let mut m = RuleMatch::new(pattern(t, 0));
        assert!(m.bind_source("keyx"));
        assert!(!m.bind_target("locky"));
        assert!(m.bind_target("lockx"));
        assert_eq!(m.new_target_name(), "open");
    }

    #[test]
    fn test_direction_macros_in_patterns() {
        let t = TransformRuleTemplate::simple("worm/$F", "_", "_", "worm/$F", 1.0);
        let east = Topology::Square4.dir_by_name("e").unwrap();
        let mut m = RuleMatch::new(pattern(t, east));
        assert_eq!(m.pattern().prefix(), "worm/e");
        assert!(!m.bind_source("worm/n"));
        assert!(m.bind_source("worm/e"));
        assert!(m.bind_target("_"));
        assert_eq!(m.new_target_name(), "worm/e");
    }

    #[test]
    fn test_unbind_target_allows_reuse() {
        let t = TransformRuleTemplate::simple("a", "b(\\d)", "a$1", "$T", 1.0);
        let mut m = RuleMatch::new(pattern(t, 0));
        assert!(m.bind_source("a"));
        assert!(m.bind_target("b1"));
        assert_eq!(m.new_source_name(), "a1");
        m.unbind_target();
        assert!(m.bind_target("b2"));
        assert_eq!(m.new_source_name(), "a2");

        m.unbind();
        assert!(!m.source_bound());
        assert!(m.bind_source("a"));
    }

    #[test]
    fn test_explicit_prefix_filters() {
        let mut t = TransformRuleTemplate::simple(".*", ".*", "$S", "$T", 1.0);
        t.prefix = Some("fire".to_string());
        let mut m = RuleMatch::new(pattern(t, 0));
        assert!(!m.bind_source("water"));
        assert!(m.bind_source("fireball"));
    }

    #[test]
    #[should_panic(expected = "already bound")]
    fn test_double_bind_source_panics() {
        let t = TransformRuleTemplate::simple("a", "b", "$S", "$T", 1.0);
        let mut m = RuleMatch::new(pattern(t, 0));
        assert!(m.bind_source("a"));
        m.bind_source("a");
    }

    #[test]
    #[should_panic(expected = "before source")]
    fn test_target_before_source_panics() {
        let t = TransformRuleTemplate::simple("a", "b", "$S", "$T", 1.0);
        let mut m = RuleMatch::new(pattern(t, 0));
        m.bind_target("b");
    }

    #[test]
    #[should_panic(expected = "both slots")]
    fn test_expand_before_binding_panics() {
        let t = TransformRuleTemplate::simple("a", "b", "$S", "$T", 1.0);
        let m = RuleMatch::new(pattern(t, 0));
        m.new_source_name();
    }
}
