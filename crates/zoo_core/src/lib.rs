//! Stochastic particle cellular automaton.
//!
//! Cells on a 2D grid each hold one particle type. Pairwise transformation
//! rules, written as regular expressions with a small substitution language,
//! are compiled on demand into per-particle outcome distributions. Updates
//! are driven in continuous time by a hierarchical activity sampler, and
//! named bonds between cells feed an energy model with Metropolis acceptance.
//!
//! This crate provides:
//! - `WeightedSampler`: discrete distribution with an implicit residual region
//! - `SpatialActivitySampler`: quad tree over per-cell activity rates
//! - `MacroTemplate`: `$`-macro expansion of rule text
//! - `PatternSet`: appearance, transformation and energy rules
//! - `ParticleRegistry`: interned particles with lazily compiled caches
//! - `UpdateEvent`: bond binding, energy delta and commit for one proposal
//! - `Board`: the grid and its update loop
//! - `SharedBoard`: a board behind one mutex with background workers
//! - `board_io`: snapshot save/load in binary or JSON
//!
//! ## Example
//!
//! ```ignore
//! use zoo_core::{Board, BoardConfig, PatternSet, Point, Topology};
//!
//! let rules = r#"{"rules": [{"source": "sand", "target": "_", "dir": "s",
//!                            "new_source": "_", "new_target": "sand"}]}"#;
//! let patterns = PatternSet::from_json_str(rules, Topology::Square4)?;
//! let mut board = Board::new(BoardConfig::with_size(32, 32), patterns)?;
//! board.set_particle(Point::new(16, 0), "sand");
//! for _ in 0..100 {
//!     board.tick();
//! }
//! ```

pub mod board;
pub mod board_io;
pub mod cell;
pub mod config;
pub mod expand;
pub mod observer;
pub mod particle;
pub mod pattern_set;
pub mod quad_tree;
pub mod remote;
pub mod rng;
pub mod rule_match;
pub mod sampler;
#[cfg(test)]
mod scenario_tests;
pub mod shared;
pub mod template;
pub mod topology;
pub mod update_event;

pub use board::{Board, StepOutcome, UpdateStats};
pub use board_io::{load_board, save_board, BoardSnapshot, CellSnapshot, SnapshotError, SnapshotResult};
pub use cell::{Cell, CellBonds, Grid};
pub use config::{BoardConfig, ConfigError, ConfigResult};
pub use expand::{ExpansionContext, MacroTemplate};
pub use observer::{BoardObserver, NullObserver, VerbNotice};
pub use particle::{Outcome, Particle, ParticleId, ParticleRegistry};
pub use pattern_set::{Appearance, PatternSet};
pub use quad_tree::SpatialActivitySampler;
pub use remote::{ChannelTransport, RemoteCellCoord, RemoteError, RemoteMessage, RemoteResult, RemoteTransport};
pub use rng::{StdRandom, ZooRng};
pub use sampler::WeightedSampler;
pub use shared::{SharedBoard, WorkerHandle};
pub use template::{
    AppearanceTemplate, EnergyRuleTemplate, RuleSet, TemplateError, TemplateResult, TransformRuleTemplate,
};
pub use topology::{Direction, Point, Topology};
pub use update_event::UpdateEvent;
