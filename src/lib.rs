//! # gridmind
//!
//! An online, self-supervised prediction engine for discrete 2-D grid worlds.
//!
//! The engine watches a sequence of grid states and learns, cell by cell, to
//! predict each cell's next value. It maintains a growing *pool* of model
//! units (one full grid of per-cell learners plus a convergence detector
//! each) and decides on its own when the active model has converged, when
//! the world has drifted away from it, and whether to reuse a previously
//! learned model or grow a new one.
//!
//! ## Quick Start
//!
//! ```
//! use gridmind::prelude::*;
//!
//! let cfg = BrainConfig::with_size(40, 30).with_seed(42);
//! let mut brain = Brain::new(cfg).unwrap();
//!
//! let reality: Grid<CellValue> = Grid::new(40, 30);
//! let mut predictions: Grid<CellValue> = Grid::new(40, 30);
//!
//! // One tick: feed the observed grid, get the predicted grid back.
//! let report = brain.observe(&reality, &mut predictions).unwrap();
//! assert_eq!(report.tick, 1);
//! ```
//!
//! ## Feature Flags
//!
//! - `serde` (default): serialization support and the brain image format
//! - `parallel`: multi-threaded per-cell evaluation via rayon
//!
//! ## Modules
//!
//! - [`grid`]: toroidal grid buffer and local-context keys
//! - [`predictor`]: the per-cell action-value learner
//! - [`perceptron`]: feed-forward function approximator
//! - [`habituation`]: convergence/novelty detector
//! - [`brain`]: model units and the Learning/Searching orchestrator
//! - [`storage`]: the lz4-compressed brain image format (`serde` builds)
//! - [`observer`]: read-only observation adapters

#[path = "core/grid.rs"]
pub mod grid;

#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/perceptron.rs"]
pub mod perceptron;

#[path = "core/predictor.rs"]
pub mod predictor;

#[path = "core/habituation.rs"]
pub mod habituation;

#[path = "core/brain.rs"]
pub mod brain;

#[cfg(feature = "serde")]
#[path = "core/storage.rs"]
pub mod storage;

pub mod observer;

/// Prelude module for convenient imports.
///
/// ```
/// use gridmind::prelude::*;
/// ```
pub mod prelude {
    pub use crate::brain::{
        Brain, BrainConfig, EngineError, LearnerParams, Phase, ReprKind, TickReport, UnitId,
    };
    pub use crate::grid::{CellValue, Grid};
    pub use crate::habituation::{Habituation, Verdict};
    pub use crate::perceptron::Perceptron;
    pub use crate::predictor::Predictor;
}
