//! Macro templates - the substitution language used by rule templates.
//!
//! A template string is parsed once into a list of segments and expanded
//! against a match context many times. Directives start with `$`:
//!
//! | Directive    | Expands to                                                  |
//! |--------------|-------------------------------------------------------------|
//! | `$F`         | name of the matched direction                               |
//! | `$B`         | name of the opposite direction                              |
//! | `$L` `$LL` `$LLL` | direction rotated counter-clockwise by 1, 2 or 3 steps |
//! | `$R` `$RR` `$RRR` | direction rotated clockwise by 1, 2 or 3 steps         |
//! | `$S` `$T`    | the full matched source / target name                       |
//! | `$n`         | capture group `n` (source groups first, then target groups) |
//! | `$+d.n`      | group `n` as an integer plus `d` (`$+n` adds 1)             |
//! | `$-d.n`      | group `n` minus `d`; dropped entirely if negative           |
//! | `$%M+d.n`    | `(group n + d) mod M`                                       |
//! | `$$`         | a literal `$`                                               |
//!
//! Anything else after `$` is kept literally. At a `$`, direction macros are
//! tried first, then `$S`/`$T`, then group references, then arithmetic.

use super::topology::{Direction, Topology};

/// Direction macro kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirMacro {
    Forward,
    Back,
    Left(usize),
    Right(usize),
}

/// One parsed piece of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Dir(DirMacro),
    Source,
    Target,
    Group(usize),
    Add { delta: i64, group: usize },
    Sub { delta: i64, group: usize },
    AddMod { modulus: i64, delta: i64, group: usize },
}

/// Everything a template may refer to while expanding.
#[derive(Debug, Clone, Copy)]
pub struct ExpansionContext<'a> {
    pub topology: Topology,
    pub dir: Direction,
    pub source: Option<&'a str>,
    pub target: Option<&'a str>,
    /// Source capture groups followed by target capture groups.
    pub groups: &'a [String],
}

impl<'a> ExpansionContext<'a> {
    /// Context with only a direction bound (used for left-hand-side patterns).
    pub fn for_direction(topology: Topology, dir: Direction) -> Self {
        Self {
            topology,
            dir,
            source: None,
            target: None,
            groups: &[],
        }
    }
}

/// A parsed template string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroTemplate {
    text: String,
    segments: Vec<Segment>,
}

impl MacroTemplate {
    /// Parse a template. Never fails: malformed directives stay literal.
    pub fn parse(text: &str) -> Self {
        Self {
            text: text.to_string(),
            segments: parse_segments(text),
        }
    }

    /// The original template text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Expand into a plain string.
    pub fn expand(&self, ctx: &ExpansionContext) -> String {
        self.expand_with(ctx, false)
    }

    /// Expand into a regex fragment: substituted text is regex-escaped,
    /// literal text is left as written.
    pub fn expand_regex(&self, ctx: &ExpansionContext) -> String {
        self.expand_with(ctx, true)
    }

    fn expand_with(&self, ctx: &ExpansionContext, escape: bool) -> String {
        let mut out = String::with_capacity(self.text.len());
        for segment in &self.segments {
            if let Segment::Literal(s) = segment {
                out.push_str(s);
                continue;
            }
            if let Some(value) = substitute(segment, ctx) {
                if escape {
                    out.push_str(&regex::escape(&value));
                } else {
                    out.push_str(&value);
                }
            }
        }
        out
    }
}

/// Value of one directive, or `None` if it contributes nothing.
fn substitute(segment: &Segment, ctx: &ExpansionContext) -> Option<String> {
    let t = ctx.topology;
    match *segment {
        Segment::Literal(ref s) => Some(s.clone()),
        Segment::Dir(m) => {
            let dir = match m {
                DirMacro::Forward => ctx.dir,
                DirMacro::Back => t.back(ctx.dir),
                DirMacro::Left(k) => t.left(ctx.dir, k),
                DirMacro::Right(k) => t.right(ctx.dir, k),
            };
            Some(t.dir_name(dir).to_string())
        }
        Segment::Source => ctx.source.map(str::to_string),
        Segment::Target => ctx.target.map(str::to_string),
        Segment::Group(n) => group(ctx, n).map(str::to_string),
        Segment::Add { delta, group: n } => {
            let v = group_int(ctx, n)?;
            Some(v.checked_add(delta)?.to_string())
        }
        Segment::Sub { delta, group: n } => {
            let v = group_int(ctx, n)?.checked_sub(delta)?;
            if v < 0 {
                None
            } else {
                Some(v.to_string())
            }
        }
        Segment::AddMod {
            modulus,
            delta,
            group: n,
        } => {
            let v = group_int(ctx, n)?.checked_add(delta)?;
            Some(v.rem_euclid(modulus).to_string())
        }
    }
}

fn group<'a>(ctx: &ExpansionContext<'a>, n: usize) -> Option<&'a str> {
    if n == 0 {
        return None;
    }
    ctx.groups.get(n - 1).map(String::as_str)
}

fn group_int(ctx: &ExpansionContext, n: usize) -> Option<i64> {
    group(ctx, n)?.parse::<i64>().ok()
}

fn parse_segments(text: &str) -> Vec<Segment> {
    let chars: Vec<char> = text.chars().collect();
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != '$' {
            literal.push(chars[i]);
            i += 1;
            continue;
        }
        match parse_directive(&chars, i + 1) {
            Some((Segment::Literal(s), next)) => {
                literal.push_str(&s);
                i = next;
            }
            Some((segment, next)) => {
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(segment);
                i = next;
            }
            None => {
                literal.push('$');
                i += 1;
            }
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    segments
}

/// Parse the directive starting right after a `$` at `start`.
/// Returns the segment and the index just past it.
fn parse_directive(chars: &[char], start: usize) -> Option<(Segment, usize)> {
    let c = *chars.get(start)?;
    match c {
        '$' => Some((Segment::Literal("$".to_string()), start + 1)),
        'F' => Some((Segment::Dir(DirMacro::Forward), start + 1)),
        'B' => Some((Segment::Dir(DirMacro::Back), start + 1)),
        'L' | 'R' => {
            let run = chars[start..]
                .iter()
                .take(3)
                .take_while(|&&x| x == c)
                .count();
            let m = if c == 'L' {
                DirMacro::Left(run)
            } else {
                DirMacro::Right(run)
            };
            Some((Segment::Dir(m), start + run))
        }
        'S' => Some((Segment::Source, start + 1)),
        'T' => Some((Segment::Target, start + 1)),
        '0'..='9' => {
            let (n, next) = read_number(chars, start)?;
            Some((Segment::Group(n as usize), next))
        }
        '+' | '-' => {
            let (delta, group, next) = parse_arith(chars, start + 1)?;
            let segment = if c == '+' {
                Segment::Add { delta, group }
            } else {
                Segment::Sub { delta, group }
            };
            Some((segment, next))
        }
        '%' => {
            let (modulus, next) = read_number(chars, start + 1)?;
            if modulus <= 0 || chars.get(next) != Some(&'+') {
                return None;
            }
            let (delta, group, next) = parse_arith(chars, next + 1)?;
            Some((
                Segment::AddMod {
                    modulus,
                    delta,
                    group,
                },
                next,
            ))
        }
        _ => None,
    }
}

/// Parse `d.n` or `n` (delta defaults to 1).
fn parse_arith(chars: &[char], start: usize) -> Option<(i64, usize, usize)> {
    let first = read_number(chars, start);
    let after_first = first.map(|(_, next)| next).unwrap_or(start);

    if chars.get(after_first) == Some(&'.') {
        let delta = first.map(|(d, _)| d).unwrap_or(1);
        let (group, next) = read_number(chars, after_first + 1)?;
        return Some((delta, group as usize, next));
    }

    let (group, next) = first?;
    Some((1, group as usize, next))
}

fn read_number(chars: &[char], start: usize) -> Option<(i64, usize)> {
    let digits: String = chars[start.min(chars.len())..]
        .iter()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        return None;
    }
    let value = digits.parse::<i64>().ok()?;
    Some((value, start + digits.len()))
}
