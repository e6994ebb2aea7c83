use tracing::{debug, info};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::grid::{CellValue, Grid, HIST_BINS};
use crate::habituation::Habituation;
use crate::predictor::Predictor;
use crate::prng::Prng;

pub use crate::predictor::LearnerParams;

/// Default candidate threshold during a search: a unit whose convergence
/// confidence reaches this is treated as recognizing the current world.
const RECOGNITION_CONFIDENCE: f64 = 0.9;

/// Stability grid step per tick. Cells saturate instead of wrapping.
const STABILITY_STEP: u8 = 60;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("grid is {found_w}x{found_h} but the engine was built for {want_w}x{want_h}")]
    DimensionMismatch {
        want_w: usize,
        want_h: usize,
        found_w: usize,
        found_h: usize,
    },
    #[error("grid dimensions must be nonzero")]
    EmptyGrid,
    #[error("hidden layer widths must be nonzero")]
    EmptyHiddenLayer,
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("bad brain image: {0}")]
    BadImage(String),
}

/// Stable handle of a model unit within the pool. Units are never removed,
/// so an id stays valid for the life of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct UnitId(pub usize);

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unit-{}", self.0)
    }
}

/// Which value representation the per-cell learners use.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ReprKind {
    /// Direct `(action, context) -> value` tables.
    Table,
    /// One feed-forward net per action with the given hidden layer widths.
    Nets { hidden: Vec<usize> },
}

/// Engine configuration. Start from [`BrainConfig::with_size`] and chain
/// the builders.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BrainConfig {
    pub width: usize,
    pub height: usize,
    pub seed: u64,
    pub repr: ReprKind,
    pub params: LearnerParams,
    /// Qualifying ticks in a row before a unit counts as converged.
    pub convergence_limit: u32,
    /// Disconfirming ticks tolerated before the convergence run resets.
    pub error_limit: u32,
    /// Confidence at which a searching unit counts as recognizing the
    /// world.
    pub recognition_confidence: f64,
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self::with_size(40, 30)
    }
}

impl BrainConfig {
    pub fn with_size(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            seed: 0,
            repr: ReprKind::Table,
            params: LearnerParams::default(),
            convergence_limit: crate::habituation::CONVERGENCE_LIMIT,
            error_limit: crate::habituation::ERROR_LIMIT,
            recognition_confidence: RECOGNITION_CONFIDENCE,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_repr(mut self, repr: ReprKind) -> Self {
        self.repr = repr;
        self
    }

    pub fn with_params(mut self, params: LearnerParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_limits(mut self, convergence_limit: u32, error_limit: u32) -> Self {
        self.convergence_limit = convergence_limit;
        self.error_limit = error_limit;
        self
    }
}

/// Which half of the perceive/act cycle the engine is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Phase {
    /// One active unit predicts and (until converged) updates itself.
    Learning,
    /// Every unit predicts with frozen learners while the pool is scanned
    /// for one that recognizes the current world.
    Searching,
}

/// Per-tick summary returned by [`Brain::observe`]. The phase is the one
/// the engine is in *after* the tick, so a caller sees transitions as soon
/// as they happen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    pub tick: u64,
    pub phase: Phase,
    pub active: UnitId,
    pub units: usize,
    /// Live observed cells this tick.
    pub vsum: i64,
    /// Live observed cells whose value was predicted one tick ahead. In a
    /// Searching tick these statistics come from the last unit scanned.
    pub sum: i64,
    /// True while the active unit counts as converged on the input.
    pub habituated: bool,
    /// Convergence confidence of the active unit, in `[0, 1]`.
    pub confidence: f64,
}

/// Per-tick match statistics of one unit: `vsum` live observed cells,
/// `sum` of those correctly predicted one tick ahead.
#[derive(Debug, Clone, Copy, Default)]
struct MatchStats {
    sum: i64,
    vsum: i64,
}

/// One model of a world: a full grid of per-cell learners, the previous
/// predictions to grade them against, a convergence detector, and the
/// per-cell diagnostic planes.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ModelUnit {
    cells: Vec<Predictor>,
    habituation: Habituation,
    /// Predictions made one tick ago, graded against the current frame.
    prev: Grid<CellValue>,
    stability: Grid<u8>,
    rules: Grid<u32>,
}

impl ModelUnit {
    fn new(config: &BrainConfig, rng: &mut Prng) -> Self {
        let n = config.width * config.height;
        let cells = (0..n)
            .map(|_| match &config.repr {
                ReprKind::Table => Predictor::new_table(config.params),
                ReprKind::Nets { hidden } => Predictor::new_nets(
                    config.params,
                    HIST_BINS + 1,
                    hidden.clone(),
                    rng.next_u64(),
                ),
            })
            .collect();
        Self {
            cells,
            habituation: Habituation::with_limits(config.convergence_limit, config.error_limit),
            prev: Grid::new(config.width, config.height),
            stability: Grid::new(config.width, config.height),
            rules: Grid::new(config.width, config.height),
        }
    }

    /// True when every grid and the learner vector match the given size.
    #[cfg(feature = "serde")]
    fn fits(&self, width: usize, height: usize) -> bool {
        self.cells.len() == width * height
            && self.prev.width() == width
            && self.prev.height() == height
            && self.stability.width() == width
            && self.stability.height() == height
            && self.rules.width() == width
            && self.rules.height() == height
    }

    /// Per-cell frame state back to zero. Learner state survives; this is
    /// what lets a unit be re-recognized later.
    fn clear_frames(&mut self) {
        self.prev.clear();
        self.stability.clear();
        self.rules.clear();
    }

    pub fn stability(&self) -> &Grid<u8> {
        &self.stability
    }

    pub fn rule_counts(&self) -> &Grid<u32> {
        &self.rules
    }

    pub fn confidence(&self) -> f64 {
        self.habituation.confidence()
    }

    /// Run every cell learner over the frame, writing the next-tick
    /// prediction into `predictions` and refreshing the diagnostic planes.
    fn forecast(
        &mut self,
        reality: &Grid<CellValue>,
        predictions: &mut Grid<CellValue>,
        learning: bool,
    ) -> MatchStats {
        let width = reality.width();
        let Self {
            cells,
            prev,
            stability,
            rules,
            ..
        } = self;
        let prev = prev.as_mut_slice();
        let stability = stability.as_mut_slice();
        let rules = rules.as_mut_slice();
        let out = predictions.as_mut_slice();

        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            let (sum, vsum) = cells
                .par_iter_mut()
                .zip_eq(prev.par_iter_mut())
                .zip_eq(stability.par_iter_mut())
                .zip_eq(rules.par_iter_mut())
                .zip_eq(out.par_iter_mut())
                .enumerate()
                .map(|(idx, ((((learner, prev), st), rule), out))| {
                    step_cell(learner, prev, st, rule, out, reality, idx, width, learning)
                })
                .reduce(|| (0, 0), |a, b| (a.0 + b.0, a.1 + b.1));
            MatchStats { sum, vsum }
        }

        #[cfg(not(feature = "parallel"))]
        {
            let mut stats = MatchStats::default();
            for (idx, learner) in cells.iter_mut().enumerate() {
                let (s, v) = step_cell(
                    learner,
                    &mut prev[idx],
                    &mut stability[idx],
                    &mut rules[idx],
                    &mut out[idx],
                    reality,
                    idx,
                    width,
                    learning,
                );
                stats.sum += s;
                stats.vsum += v;
            }
            stats
        }
    }
}

/// One cell of a forecast pass. Returns this cell's `(sum, vsum)`
/// contribution.
#[allow(clippy::too_many_arguments)]
fn step_cell(
    learner: &mut Predictor,
    prev: &mut CellValue,
    stability: &mut u8,
    rule: &mut u32,
    out: &mut CellValue,
    reality: &Grid<CellValue>,
    idx: usize,
    width: usize,
    learning: bool,
) -> (i64, i64) {
    let (row, col) = (idx / width, idx % width);
    let observed = *reality.get(row, col);
    let context = reality.context_key(row, col);
    let features = reality.feature_vector(row, col);

    let response = learner.step(observed, context, &features, learning);

    let mut sum = 0;
    let mut vsum = 0;
    if observed != 0 {
        vsum = 1;
        if observed == *prev {
            sum = 1;
        }
    }

    if observed == *prev {
        if *stability < u8::MAX - STABILITY_STEP {
            *stability += STABILITY_STEP;
        }
    } else if *stability > STABILITY_STEP {
        *stability -= STABILITY_STEP;
    }
    *rule = learner.rule_count() as u32;

    *prev = response;
    *out = response;

    (sum, vsum)
}

/// The model pool and its Learning/Searching state machine.
///
/// Feed one frame per tick through [`Brain::observe`]. While Learning, a
/// single active unit predicts and trains until it habituates to the
/// stream; once habituated, training freezes and the engine only watches
/// for novelty. Novelty flips it into Searching, where every unit forecasts
/// with frozen learners until one recognizes the world or the search times
/// out and the pool grows by a fresh unit.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Brain {
    config: BrainConfig,
    units: Vec<ModelUnit>,
    active: usize,
    searching: bool,
    already_learnt: bool,
    habituated: bool,
    clock: u64,
    /// Tick the active unit last started learning.
    learnt_at: u64,
    searching_since: u64,
    /// Longest observed convergence run; doubles as the search timeout.
    max_learning_time: u64,
    spawn_rng: Prng,
}

impl Brain {
    pub fn new(config: BrainConfig) -> Result<Self, EngineError> {
        if config.width == 0 || config.height == 0 {
            return Err(EngineError::EmptyGrid);
        }
        if let ReprKind::Nets { hidden } = &config.repr {
            if hidden.iter().any(|&w| w == 0) {
                return Err(EngineError::EmptyHiddenLayer);
            }
        }
        let mut spawn_rng = Prng::new(config.seed);
        let first = ModelUnit::new(&config, &mut spawn_rng);
        Ok(Self {
            config,
            units: vec![first],
            active: 0,
            searching: false,
            already_learnt: false,
            habituated: false,
            clock: 0,
            learnt_at: 0,
            searching_since: 0,
            max_learning_time: 0,
            spawn_rng,
        })
    }

    pub fn config(&self) -> &BrainConfig {
        &self.config
    }

    pub fn tick(&self) -> u64 {
        self.clock
    }

    pub fn phase(&self) -> Phase {
        if self.searching {
            Phase::Searching
        } else {
            Phase::Learning
        }
    }

    pub fn is_searching(&self) -> bool {
        self.searching
    }

    pub fn is_habituated(&self) -> bool {
        self.habituated
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    pub fn active_unit(&self) -> UnitId {
        UnitId(self.active)
    }

    /// Convergence confidence of one pool member, or `None` for an unknown
    /// id.
    pub fn unit_confidence(&self, id: UnitId) -> Option<f64> {
        self.units.get(id.0).map(ModelUnit::confidence)
    }

    /// Per-cell prediction stability of the active unit. `None` while the
    /// pool is being searched; there is no single model to report on then.
    pub fn stability(&self) -> Option<&Grid<u8>> {
        (!self.searching).then(|| self.units[self.active].stability())
    }

    /// Per-cell confirmed-rule counts of the active unit; `None` while
    /// searching.
    pub fn rule_counts(&self) -> Option<&Grid<u32>> {
        (!self.searching).then(|| self.units[self.active].rule_counts())
    }

    /// Feed one observed frame and produce the prediction for the next.
    ///
    /// `reality` and `predictions` must both match the configured size.
    /// Every cell of `predictions` is overwritten.
    pub fn observe(
        &mut self,
        reality: &Grid<CellValue>,
        predictions: &mut Grid<CellValue>,
    ) -> Result<TickReport, EngineError> {
        self.check_size(reality)?;
        self.check_size(predictions)?;

        self.clock += 1;

        let stats = if self.searching {
            self.searching_tick(reality, predictions)
        } else {
            self.learning_tick(reality, predictions)
        };

        Ok(TickReport {
            tick: self.clock,
            phase: self.phase(),
            active: UnitId(self.active),
            units: self.units.len(),
            vsum: stats.vsum,
            sum: stats.sum,
            habituated: self.habituated,
            confidence: self.units[self.active].habituation.confidence(),
        })
    }

    fn check_size<T>(&self, grid: &Grid<T>) -> Result<(), EngineError> {
        if grid.width() != self.config.width || grid.height() != self.config.height {
            return Err(EngineError::DimensionMismatch {
                want_w: self.config.width,
                want_h: self.config.height,
                found_w: grid.width(),
                found_h: grid.height(),
            });
        }
        Ok(())
    }

    /// Internal consistency of a deserialized engine: the configured size
    /// must match every unit's grids, and the active index must be valid.
    #[cfg(feature = "serde")]
    pub(crate) fn check_integrity(&self) -> Result<(), EngineError> {
        if self.config.width == 0 || self.config.height == 0 {
            return Err(EngineError::EmptyGrid);
        }
        if let ReprKind::Nets { hidden } = &self.config.repr {
            if hidden.iter().any(|&w| w == 0) {
                return Err(EngineError::BadImage("zero-width hidden layer".into()));
            }
        }
        if self.units.is_empty() || self.active >= self.units.len() {
            return Err(EngineError::BadImage("active unit out of range".into()));
        }
        for unit in &self.units {
            if !unit.fits(self.config.width, self.config.height) {
                return Err(EngineError::BadImage(
                    "unit grids do not match the configured size".into(),
                ));
            }
        }
        Ok(())
    }

    fn learning_tick(
        &mut self,
        reality: &Grid<CellValue>,
        predictions: &mut Grid<CellValue>,
    ) -> MatchStats {
        let learning = !self.already_learnt;
        let unit = &mut self.units[self.active];

        let stats = unit.forecast(reality, predictions, learning);
        let verdict = unit.habituation.is_habituation(stats.vsum, stats.sum);
        self.habituated = verdict.habituated;

        debug!(
            tick = self.clock,
            unit = %UnitId(self.active),
            sum = stats.sum,
            vsum = stats.vsum,
            confidence = unit.habituation.confidence(),
            "habituation monitor"
        );

        if !self.already_learnt {
            if verdict.habituated {
                self.already_learnt = true;
                let took = self.clock - self.learnt_at;
                if took > self.max_learning_time {
                    self.max_learning_time = took;
                }
                info!(
                    tick = self.clock,
                    unit = %UnitId(self.active),
                    learning_time = took,
                    "model converged"
                );
            }
        } else if !verdict.habituated
            && verdict.confidence.is_some()
            && unit.habituation.is_newinput(stats.vsum, stats.sum)
        {
            info!(tick = self.clock, "new input detected, searching the pool");
            self.searching = true;
            self.searching_since = self.clock;
            for unit in &mut self.units {
                unit.habituation.clear();
                unit.clear_frames();
            }
        }

        stats
    }

    fn searching_tick(
        &mut self,
        reality: &Grid<CellValue>,
        predictions: &mut Grid<CellValue>,
    ) -> MatchStats {
        let threshold = self.config.recognition_confidence;
        let mut candidate = None;
        let mut last_stats = MatchStats::default();

        for (i, unit) in self.units.iter_mut().enumerate() {
            let stats = unit.forecast(reality, predictions, false);
            let verdict = unit.habituation.is_habituation(stats.vsum, stats.sum);
            last_stats = stats;

            debug!(
                tick = self.clock,
                unit = %UnitId(i),
                confidence = unit.habituation.confidence(),
                "searching the pool"
            );

            if verdict.habituated || verdict.confidence.is_some_and(|c| c >= threshold) {
                candidate = Some(i);
            }
        }

        let elapsed = self.clock - self.searching_since;
        if candidate.is_none() && elapsed <= self.max_learning_time {
            return last_stats;
        }

        match candidate {
            Some(i) => {
                self.active = i;
                info!(
                    tick = self.clock,
                    unit = %UnitId(i),
                    searching_time = elapsed,
                    "recognized an existing model"
                );
            }
            None => {
                let unit = ModelUnit::new(&self.config, &mut self.spawn_rng);
                self.units.push(unit);
                self.active = self.units.len() - 1;
                info!(
                    tick = self.clock,
                    unit = %UnitId(self.active),
                    searching_time = elapsed,
                    "search timed out, grew the pool"
                );
            }
        }

        for (i, unit) in self.units.iter_mut().enumerate() {
            if i != self.active {
                unit.habituation.clear();
            }
            unit.clear_frames();
        }

        self.searching = false;
        self.already_learnt = false;
        self.habituated = false;
        self.learnt_at = self.clock;

        last_stats
    }

    /// Serialize the full engine state into a brain image.
    #[cfg(feature = "serde")]
    pub fn save_image_to<W: std::io::Write>(&self, writer: W) -> Result<(), EngineError> {
        crate::storage::write_image(writer, self)
    }

    /// Load an engine back from a brain image written by
    /// [`Brain::save_image_to`].
    #[cfg(feature = "serde")]
    pub fn load_image_from<R: std::io::Read>(reader: R) -> Result<Self, EngineError> {
        crate::storage::read_image(reader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant_frame(w: usize, h: usize, value: CellValue) -> Grid<CellValue> {
        let mut g = Grid::new(w, h);
        for cell in g.as_mut_slice() {
            *cell = value;
        }
        g
    }

    fn small_brain() -> Brain {
        Brain::new(BrainConfig::with_size(4, 4).with_seed(7)).unwrap()
    }

    /// Run `n` ticks of `frame`, returning the last report.
    fn run(brain: &mut Brain, frame: &Grid<CellValue>, n: usize) -> TickReport {
        let mut predictions = Grid::new(frame.width(), frame.height());
        let mut last = None;
        for _ in 0..n {
            last = Some(brain.observe(frame, &mut predictions).unwrap());
        }
        last.unwrap()
    }

    #[test]
    fn rejects_zero_dimensions() {
        let err = Brain::new(BrainConfig::with_size(0, 4)).unwrap_err();
        assert!(matches!(err, EngineError::EmptyGrid));
    }

    #[test]
    fn rejects_zero_width_hidden_layers() {
        let cfg = BrainConfig::with_size(4, 4).with_repr(ReprKind::Nets { hidden: vec![4, 0] });
        let err = Brain::new(cfg).unwrap_err();
        assert!(matches!(err, EngineError::EmptyHiddenLayer));
    }

    #[test]
    fn rejects_mismatched_grids() {
        let mut brain = small_brain();
        let reality = Grid::new(5, 4);
        let mut predictions = Grid::new(4, 4);
        let err = brain.observe(&reality, &mut predictions).unwrap_err();
        assert!(matches!(err, EngineError::DimensionMismatch { .. }));
    }

    #[test]
    fn starts_learning_with_one_unit() {
        let mut brain = small_brain();
        let frame = constant_frame(4, 4, 1);
        let mut predictions = Grid::new(4, 4);
        let report = brain.observe(&frame, &mut predictions).unwrap();

        assert_eq!(report.tick, 1);
        assert_eq!(report.phase, Phase::Learning);
        assert_eq!(report.units, 1);
        assert_eq!(report.active, UnitId(0));
        assert!(!report.habituated);
    }

    #[test]
    fn single_cell_bootstrap_is_deterministic() {
        let mut brain = Brain::new(BrainConfig::with_size(1, 1)).unwrap();
        let frame = constant_frame(1, 1, 3);
        let mut predictions = Grid::new(1, 1);

        brain.observe(&frame, &mut predictions).unwrap();
        assert_eq!(*predictions.get(0, 0), 3);
        brain.observe(&frame, &mut predictions).unwrap();
        assert_eq!(*predictions.get(0, 0), 3);
    }

    #[test]
    fn converges_on_a_constant_world() {
        let mut brain = small_brain();
        let frame = constant_frame(4, 4, 1);

        let report = run(&mut brain, &frame, 310);
        assert!(report.habituated);
        assert_eq!(report.phase, Phase::Learning);
        assert_eq!(report.units, 1);

        // Once converged, the forecast reproduces the world exactly.
        let mut predictions = Grid::new(4, 4);
        brain.observe(&frame, &mut predictions).unwrap();
        assert_eq!(predictions, frame);
    }

    #[test]
    fn blank_frames_after_convergence_trigger_a_search() {
        let mut brain = small_brain();
        let frame = constant_frame(4, 4, 1);
        run(&mut brain, &frame, 310);

        let blank = Grid::new(4, 4);
        let report = run(&mut brain, &blank, 1);
        assert_eq!(report.phase, Phase::Searching);
    }

    #[test]
    fn an_unseen_pattern_disconfirms_into_a_search() {
        let mut brain = small_brain();
        let frame = constant_frame(4, 4, 1);
        run(&mut brain, &frame, 310);
        assert!(brain.is_habituated());

        // Switch abruptly to an unseen symbol with an irregular live-cell
        // count. The frozen model keeps predicting the old world, so every
        // tick misses; the error budget absorbs the first `error_limit` of
        // them, and only the reset tick can flag the novelty.
        let live = [16usize, 16, 14, 16, 12, 16, 16, 6];
        let mut predictions = Grid::new(4, 4);
        for (i, &n) in live.iter().enumerate() {
            let mut novel = Grid::new(4, 4);
            for cell in novel.as_mut_slice().iter_mut().take(n) {
                *cell = 2;
            }
            let report = brain.observe(&novel, &mut predictions).unwrap();
            if i < crate::habituation::ERROR_LIMIT as usize {
                assert_eq!(report.phase, Phase::Learning, "left early at miss {}", i + 1);
            } else {
                assert_eq!(report.phase, Phase::Searching);
            }
        }
    }

    #[test]
    fn a_failed_search_grows_the_pool() {
        let mut brain = small_brain();
        let frame = constant_frame(4, 4, 1);
        run(&mut brain, &frame, 310);

        // Drive the search to its timeout with frames no unit can model.
        let blank = Grid::new(4, 4);
        let mut report = run(&mut brain, &blank, 1);
        assert_eq!(report.phase, Phase::Searching);
        while report.phase == Phase::Searching {
            report = run(&mut brain, &blank, 1);
        }

        assert_eq!(report.units, 2);
        assert_eq!(report.active, UnitId(1));
        assert_eq!(report.phase, Phase::Learning);
        assert!(!report.habituated);
    }

    #[test]
    fn a_known_world_is_recognized_instead_of_grown() {
        let mut brain = small_brain();
        let frame = constant_frame(4, 4, 1);
        run(&mut brain, &frame, 310);

        // Novelty kicks off the search...
        let blank = Grid::new(4, 4);
        let report = run(&mut brain, &blank, 1);
        assert_eq!(report.phase, Phase::Searching);

        // ...but the old world comes back, and the original unit's frozen
        // learners still predict it. No new unit is grown.
        let mut report = run(&mut brain, &frame, 1);
        while report.phase == Phase::Searching {
            report = run(&mut brain, &frame, 1);
        }
        assert_eq!(report.units, 1);
        assert_eq!(report.active, UnitId(0));
    }

    #[test]
    fn match_statistics_stay_ordered() {
        let mut brain = small_brain();
        let mut frame = constant_frame(4, 4, 1);
        let mut predictions = Grid::new(4, 4);

        for tick in 0u8..40 {
            // Flicker one cell so the statistics actually move.
            frame.set(0, 0, u8::from(tick % 5 != 0));
            let r = brain.observe(&frame, &mut predictions).unwrap();
            assert!(r.sum >= 0);
            assert!(r.sum <= r.vsum);
            assert!(r.vsum <= 16);
        }
    }

    #[test]
    fn shorter_limits_accelerate_convergence() {
        let cfg = BrainConfig::with_size(4, 4).with_limits(10, 2);
        let mut brain = Brain::new(cfg).unwrap();
        let frame = constant_frame(4, 4, 1);

        let report = run(&mut brain, &frame, 12);
        assert!(report.habituated);
    }

    #[test]
    fn tie_between_recognizing_units_goes_to_the_last() {
        let mut brain = small_brain();
        let frame = constant_frame(4, 4, 1);
        let blank = Grid::new(4, 4);

        // Teach unit 0 the world, then force a failed search so unit 1 is
        // grown, and teach it the same world.
        run(&mut brain, &frame, 310);
        let mut report = run(&mut brain, &blank, 1);
        while report.phase == Phase::Searching {
            report = run(&mut brain, &blank, 1);
        }
        assert_eq!(report.units, 2);
        run(&mut brain, &frame, 310);

        // Now both units model the same world. When the next search runs
        // on it, both recognize it on the same tick and the last one
        // scanned wins.
        run(&mut brain, &blank, 1);
        assert!(brain.is_searching());
        let mut report = run(&mut brain, &frame, 1);
        while report.phase == Phase::Searching {
            report = run(&mut brain, &frame, 1);
        }
        assert_eq!(report.units, 2);
        assert_eq!(report.active, UnitId(1));
    }

    #[test]
    fn diagnostics_are_withheld_while_searching() {
        let mut brain = small_brain();
        let frame = constant_frame(4, 4, 1);
        run(&mut brain, &frame, 310);
        assert!(brain.stability().is_some());
        assert!(brain.rule_counts().is_some());

        let blank = Grid::new(4, 4);
        run(&mut brain, &blank, 1);
        assert!(brain.is_searching());
        assert!(brain.stability().is_none());
        assert!(brain.rule_counts().is_none());
    }

    #[test]
    fn stability_saturates_under_a_steady_stream() {
        let mut brain = small_brain();
        let frame = constant_frame(4, 4, 1);
        run(&mut brain, &frame, 20);

        let stability = brain.stability().unwrap();
        for &s in stability.as_slice() {
            assert_eq!(s, 240);
        }
    }

    #[test]
    fn rule_counts_reflect_confirmed_associations() {
        let mut brain = small_brain();
        let frame = constant_frame(4, 4, 1);
        run(&mut brain, &frame, 20);

        // One constant context per cell, confirmed over and over: exactly
        // one rule each.
        let rules = brain.rule_counts().unwrap();
        for &n in rules.as_slice() {
            assert_eq!(n, 1);
        }
    }

    #[test]
    fn net_backed_engine_runs_the_same_state_machine() {
        let cfg = BrainConfig::with_size(3, 3)
            .with_seed(11)
            .with_repr(ReprKind::Nets { hidden: vec![4] });
        let mut brain = Brain::new(cfg).unwrap();
        let frame = constant_frame(3, 3, 1);

        let report = run(&mut brain, &frame, 310);
        assert!(report.habituated);

        let mut predictions = Grid::new(3, 3);
        brain.observe(&frame, &mut predictions).unwrap();
        assert_eq!(predictions, frame);
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let frame = constant_frame(4, 4, 2);
        let run_once = || {
            let mut brain =
                Brain::new(BrainConfig::with_size(4, 4).with_seed(99)).unwrap();
            let mut predictions = Grid::new(4, 4);
            let mut reports = Vec::new();
            for _ in 0..50 {
                reports.push(brain.observe(&frame, &mut predictions).unwrap());
            }
            (reports, predictions)
        };
        assert_eq!(run_once(), run_once());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn image_roundtrip_preserves_behavior() {
        let mut brain = small_brain();
        let frame = constant_frame(4, 4, 1);
        run(&mut brain, &frame, 120);

        let mut image = Vec::new();
        brain.save_image_to(&mut image).unwrap();
        let mut restored = Brain::load_image_from(image.as_slice()).unwrap();

        assert_eq!(restored.tick(), brain.tick());
        assert_eq!(restored.unit_count(), brain.unit_count());

        let mut a = Grid::new(4, 4);
        let mut b = Grid::new(4, 4);
        let ra = brain.observe(&frame, &mut a).unwrap();
        let rb = restored.observe(&frame, &mut b).unwrap();
        assert_eq!(ra, rb);
        assert_eq!(a, b);
    }
}
