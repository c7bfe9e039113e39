//! Sink for committed changes.

use super::topology::Point;

/// What an accepted transformation did, by particle name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerbNotice {
    pub source: Point,
    pub target: Point,
    pub old_source: String,
    pub old_target: String,
    pub new_source: String,
    pub new_target: String,
    pub verb: String,
}

/// Receives notifications after every committed change.
///
/// Called with the board locked, so implementations must return quickly.
pub trait BoardObserver: Send {
    /// A cell's state or bonds changed.
    fn draw_cell(&mut self, _p: Point) {}

    /// An accepted transformation with a non-empty verb.
    fn show_verb(&mut self, _notice: &VerbNotice) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default)]
pub struct NullObserver;

impl BoardObserver for NullObserver {}
