//! Rule records and validated templates.
//!
//! Records are the tokenized form handed over by a rule-definition provider
//! (deserializable from JSON). Converting a record into a template validates
//! it: a missing mandatory field, a pattern that is not a valid regex, a
//! negative probability or a malformed bond expression rejects the record.

use super::expand::{ExpansionContext, MacroTemplate};
use super::topology::{Direction, Point, Topology};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Side length of a particle icon bitmap.
pub const ICON_SIZE: usize = 8;

/// Error type for rule template validation.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateError {
    /// A mandatory field was absent from the record
    MissingField { record: &'static str, field: &'static str },
    /// A pattern did not compile
    InvalidRegex { pattern: String, message: String },
    /// Probability was negative or not a number
    InvalidProbability(f64),
    /// Direction constraint names no direction of the topology
    UnknownDirection(String),
    /// Bond expression with an empty label or name
    InvalidBond { from: String, to: String, name: String },
    /// Icon rows were not ICON_SIZE x ICON_SIZE of '#' and '.'
    InvalidIcon(String),
    /// Rule set text could not be decoded
    Json(String),
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateError::MissingField { record, field } => {
                write!(f, "missing field '{}' in {} record", field, record)
            }
            TemplateError::InvalidRegex { pattern, message } => {
                write!(f, "invalid pattern '{}': {}", pattern, message)
            }
            TemplateError::InvalidProbability(p) => write!(f, "invalid probability {}", p),
            TemplateError::UnknownDirection(name) => write!(f, "unknown direction '{}'", name),
            TemplateError::InvalidBond { from, to, name } => {
                write!(f, "invalid bond expression {} -> {} '{}'", from, to, name)
            }
            TemplateError::InvalidIcon(msg) => write!(f, "invalid icon: {}", msg),
            TemplateError::Json(msg) => write!(f, "rule set JSON error: {}", msg),
        }
    }
}

impl std::error::Error for TemplateError {}

impl From<serde_json::Error> for TemplateError {
    fn from(e: serde_json::Error) -> Self {
        TemplateError::Json(e.to_string())
    }
}

pub type TemplateResult<T> = Result<T, TemplateError>;

/// Compile a pattern so that it must match the whole name.
pub fn anchored_regex(pattern: &str) -> TemplateResult<Regex> {
    Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| TemplateError::InvalidRegex {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

// ============================================================================
// Records
// ============================================================================

/// A bond expression as written in a rule record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BondRecord {
    pub from: String,
    pub to: String,
    pub name: String,
}

/// Particle appearance record ("NOUN").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParticleRecord {
    pub pattern: Option<String>,
    #[serde(default)]
    pub color: [u8; 3],
    #[serde(default)]
    pub verb: Option<String>,
    #[serde(default)]
    pub icon: Option<Vec<String>>,
}

/// Transformation rule record ("VERB").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformRuleRecord {
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub dir: Option<String>,
    pub source: Option<String>,
    pub target: Option<String>,
    #[serde(default)]
    pub new_source: Option<String>,
    #[serde(default)]
    pub new_target: Option<String>,
    #[serde(default)]
    pub prob: Option<f64>,
    #[serde(default)]
    pub verb: Option<String>,
    #[serde(default)]
    pub required: Vec<BondRecord>,
    #[serde(default)]
    pub optional: Vec<BondRecord>,
    #[serde(default)]
    pub excluded: Vec<BondRecord>,
    #[serde(default)]
    pub created: Vec<BondRecord>,
}

/// Energy rule record ("BOND").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnergyRuleRecord {
    pub source: Option<String>,
    pub target: Option<String>,
    pub bond: Option<String>,
    pub energy: Option<f64>,
    #[serde(default)]
    pub min_len: Option<f64>,
    #[serde(default)]
    pub max_len: Option<f64>,
    #[serde(default)]
    pub len_tolerance: f64,
    #[serde(default)]
    pub min_angle: Option<f64>,
    #[serde(default)]
    pub max_angle: Option<f64>,
    #[serde(default)]
    pub angle_tolerance: f64,
}

/// A complete set of records, in declaration order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub particles: Vec<ParticleRecord>,
    #[serde(default)]
    pub rules: Vec<TransformRuleRecord>,
    #[serde(default)]
    pub energies: Vec<EnergyRuleRecord>,
}

impl RuleSet {
    pub fn from_json_str(text: &str) -> TemplateResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

// ============================================================================
// Templates
// ============================================================================

/// Fixed-size monochrome icon, one byte per row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Icon {
    pub rows: [u8; ICON_SIZE],
}

impl Icon {
    /// Parse rows of '#' (set) and '.' (clear).
    pub fn parse(rows: &[String]) -> TemplateResult<Self> {
        if rows.len() != ICON_SIZE {
            return Err(TemplateError::InvalidIcon(format!(
                "expected {} rows, got {}",
                ICON_SIZE,
                rows.len()
            )));
        }
        let mut bits = [0u8; ICON_SIZE];
        for (y, row) in rows.iter().enumerate() {
            if row.chars().count() != ICON_SIZE {
                return Err(TemplateError::InvalidIcon(format!("row {} has wrong width", y)));
            }
            for (x, ch) in row.chars().enumerate() {
                match ch {
                    '#' => bits[y] |= 1 << (ICON_SIZE - 1 - x),
                    '.' => {}
                    other => {
                        return Err(TemplateError::InvalidIcon(format!(
                            "unexpected '{}' in row {}",
                            other, y
                        )))
                    }
                }
            }
        }
        Ok(Self { rows: bits })
    }

    pub fn is_set(&self, x: usize, y: usize) -> bool {
        x < ICON_SIZE && y < ICON_SIZE && self.rows[y] & (1 << (ICON_SIZE - 1 - x)) != 0
    }
}

/// Appearance template: particles whose name matches get this look.
#[derive(Debug, Clone)]
pub struct AppearanceTemplate {
    pub pattern: String,
    pub regex: Regex,
    pub color: [u8; 3],
    pub verb: Option<String>,
    pub icon: Option<Icon>,
}

impl AppearanceTemplate {
    pub fn from_record(record: &ParticleRecord) -> TemplateResult<Self> {
        let pattern = record.pattern.clone().ok_or(TemplateError::MissingField {
            record: "particle",
            field: "pattern",
        })?;
        let icon = match &record.icon {
            Some(rows) => Some(Icon::parse(rows)?),
            None => None,
        };
        Ok(Self {
            regex: anchored_regex(&pattern)?,
            pattern,
            color: record.color,
            verb: record.verb.clone(),
            icon,
        })
    }

    /// The pattern's single name, if it has no regex metacharacters.
    pub fn literal_name(&self) -> Option<&str> {
        if regex::escape(&self.pattern) == self.pattern {
            Some(&self.pattern)
        } else {
            None
        }
    }
}

/// Symbolic endpoint labels resolved at bind time.
pub const LABEL_SOURCE: &str = "s";
pub const LABEL_TARGET: &str = "t";
/// Swapped aliases: the target's cell seen from the source and vice versa.
pub const LABEL_SOURCE_SWAPPED: &str = "sT";
pub const LABEL_TARGET_SWAPPED: &str = "tS";

/// A directed, named bond between two labelled positions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BondExpression {
    pub from: String,
    pub to: String,
    pub name: String,
}

impl BondExpression {
    pub fn new(from: &str, to: &str, name: &str) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            name: name.to_string(),
        }
    }

    fn from_record(record: &BondRecord) -> TemplateResult<Self> {
        if record.from.is_empty() || record.to.is_empty() || record.name.is_empty() {
            return Err(TemplateError::InvalidBond {
                from: record.from.clone(),
                to: record.to.clone(),
                name: record.name.clone(),
            });
        }
        Ok(Self::new(&record.from, &record.to, &record.name))
    }
}

fn bonds_from_records(records: &[BondRecord]) -> TemplateResult<Vec<BondExpression>> {
    records.iter().map(BondExpression::from_record).collect()
}

/// Transformation rule template.
#[derive(Debug, Clone)]
pub struct TransformRuleTemplate {
    /// Names must start with this to be considered (indexing hint).
    pub prefix: Option<String>,
    /// Restrict the rule to one direction.
    pub dir: Option<Direction>,
    pub source: MacroTemplate,
    pub target: MacroTemplate,
    pub new_source: MacroTemplate,
    pub new_target: MacroTemplate,
    pub prob: f64,
    pub verb: MacroTemplate,
    pub required: Vec<BondExpression>,
    pub optional: Vec<BondExpression>,
    pub excluded: Vec<BondExpression>,
    pub created: Vec<BondExpression>,
}

impl TransformRuleTemplate {
    pub fn from_record(record: &TransformRuleRecord, topology: Topology) -> TemplateResult<Self> {
        let source = record.source.as_deref().ok_or(TemplateError::MissingField {
            record: "rule",
            field: "source",
        })?;
        let target = record.target.as_deref().ok_or(TemplateError::MissingField {
            record: "rule",
            field: "target",
        })?;

        let prob = record.prob.unwrap_or(1.0);
        if !(prob >= 0.0) {
            return Err(TemplateError::InvalidProbability(prob));
        }

        let dir = match &record.dir {
            Some(name) => Some(
                topology
                    .dir_by_name(name)
                    .ok_or_else(|| TemplateError::UnknownDirection(name.clone()))?,
            ),
            None => None,
        };

        let template = Self {
            prefix: record.prefix.clone(),
            dir,
            source: MacroTemplate::parse(source),
            target: MacroTemplate::parse(target),
            new_source: MacroTemplate::parse(record.new_source.as_deref().unwrap_or("$S")),
            new_target: MacroTemplate::parse(record.new_target.as_deref().unwrap_or("$T")),
            prob,
            verb: MacroTemplate::parse(record.verb.as_deref().unwrap_or("")),
            required: bonds_from_records(&record.required)?,
            optional: bonds_from_records(&record.optional)?,
            excluded: bonds_from_records(&record.excluded)?,
            created: bonds_from_records(&record.created)?,
        };

        // Both sides must compile once direction macros are expanded.
        let ctx = ExpansionContext::for_direction(topology, dir.unwrap_or(0));
        anchored_regex(&template.source.expand_regex(&ctx))?;
        anchored_regex(&template.target.expand_regex(&ctx))?;

        Ok(template)
    }

    /// Convenience constructor for a rule with no bonds.
    pub fn simple(source: &str, target: &str, new_source: &str, new_target: &str, prob: f64) -> Self {
        Self {
            prefix: None,
            dir: None,
            source: MacroTemplate::parse(source),
            target: MacroTemplate::parse(target),
            new_source: MacroTemplate::parse(new_source),
            new_target: MacroTemplate::parse(new_target),
            prob,
            verb: MacroTemplate::parse(""),
            required: Vec::new(),
            optional: Vec::new(),
            excluded: Vec::new(),
            created: Vec::new(),
        }
    }

    /// Whether the rule is compiled for `dir`.
    pub fn applies_to(&self, dir: Direction) -> bool {
        self.dir.map_or(true, |d| d == dir)
    }

    pub fn has_bonds(&self) -> bool {
        !(self.required.is_empty()
            && self.optional.is_empty()
            && self.excluded.is_empty()
            && self.created.is_empty())
    }
}

/// Geometric window for an energy rule, tapered linearly over a tolerance.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BondGeometry {
    pub min_len: Option<f64>,
    pub max_len: Option<f64>,
    pub len_tolerance: f64,
    pub min_angle: Option<f64>,
    pub max_angle: Option<f64>,
    pub angle_tolerance: f64,
}

impl BondGeometry {
    pub fn constrains_angle(&self) -> bool {
        self.min_angle.is_some() || self.max_angle.is_some()
    }

    /// Scale factor in [0, 1] for a bond with the given offsets, or `None`
    /// if the geometry falls outside the window (or is degenerate).
    pub fn factor(&self, topology: Topology, offset: Point, previous: Option<Point>) -> Option<f64> {
        if offset.is_zero() {
            return None;
        }
        let len = topology.length(offset);
        let mut factor = taper(len, self.min_len, self.max_len, self.len_tolerance)?;

        if self.constrains_angle() {
            let angle = topology.turn_angle(previous?, offset)?;
            factor *= taper(angle, self.min_angle, self.max_angle, self.angle_tolerance)?;
        }
        Some(factor)
    }
}

/// 1 inside [min, max], falling linearly to 0 over `tolerance` outside it,
/// `None` beyond that.
fn taper(value: f64, min: Option<f64>, max: Option<f64>, tolerance: f64) -> Option<f64> {
    let mut factor = 1.0f64;
    if let Some(min) = min {
        if value < min {
            if tolerance <= 0.0 || value < min - tolerance {
                return None;
            }
            factor = factor.min((value - (min - tolerance)) / tolerance);
        }
    }
    if let Some(max) = max {
        if value > max {
            if tolerance <= 0.0 || value > max + tolerance {
                return None;
            }
            factor = factor.min((max + tolerance - value) / tolerance);
        }
    }
    Some(factor)
}

/// Energy rule template.
#[derive(Debug, Clone)]
pub struct EnergyRuleTemplate {
    pub source: Regex,
    pub target: Regex,
    pub bond: String,
    pub energy: f64,
    pub geometry: BondGeometry,
}

impl EnergyRuleTemplate {
    pub fn from_record(record: &EnergyRuleRecord) -> TemplateResult<Self> {
        let missing = |field| TemplateError::MissingField {
            record: "energy",
            field,
        };
        let source = record.source.as_deref().ok_or_else(|| missing("source"))?;
        let target = record.target.as_deref().ok_or_else(|| missing("target"))?;
        let bond = record.bond.clone().ok_or_else(|| missing("bond"))?;
        let energy = record.energy.ok_or_else(|| missing("energy"))?;

        Ok(Self {
            source: anchored_regex(source)?,
            target: anchored_regex(target)?,
            bond,
            energy,
            geometry: BondGeometry {
                min_len: record.min_len,
                max_len: record.max_len,
                len_tolerance: record.len_tolerance,
                min_angle: record.min_angle,
                max_angle: record.max_angle,
                angle_tolerance: record.angle_tolerance,
            },
        })
    }

    /// Whether the (source, target) name pair matches this rule.
    pub fn matches(&self, source: &str, target: &str) -> bool {
        self.source.is_match(source) && self.target.is_match(target)
    }
}
