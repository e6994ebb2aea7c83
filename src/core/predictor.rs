use std::collections::BTreeMap;

use hashbrown::{HashMap, HashSet};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::grid::CellValue;
use crate::perceptron::Perceptron;
use crate::prng::Prng;

/// Cap on gradient steps per value update when a learner is backed by
/// perceptrons.
const MAX_TRAIN_STEPS: usize = 10;
/// Early-exit threshold for the bounded gradient loop. A numerical
/// short-circuit, not a correctness requirement.
const TRAIN_EPSILON: f64 = 1e-10;

/// Tunables of the per-cell learner. Shared by every predictor of a model
/// unit.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LearnerParams {
    /// Discount factor of the self-consistency Q update.
    pub gamma: f64,
    /// Reward when the previous guess matched the current observation.
    pub max_reward: f64,
    /// Reward when it did not.
    pub min_reward: f64,
    /// Visit-count floor for optimistic exploration: an action looks
    /// maximal until it has been tried this many times in a context.
    pub n_e: u32,
}

impl Default for LearnerParams {
    fn default() -> Self {
        Self {
            gamma: 0.2,
            max_reward: 10.2,
            min_reward: -10.7,
            n_e: 50,
        }
    }
}

/// The remembered previous transition of a predictor. `None` on the very
/// first observation, which disables the update/selection step once.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
struct Transition {
    context: String,
    action: CellValue,
    reward: f64,
}

/// Action-value storage: either a direct `(action, context) -> scalar`
/// table, or one function approximator per action over a numeric feature
/// vector. Selected once at predictor construction; the rest of the engine
/// is agnostic to the choice.
///
/// Actions are keyed by `BTreeMap` so argmax scans them in ascending order
/// and tie-breaks are deterministic.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
enum ValueRepr {
    Table {
        q: BTreeMap<CellValue, HashMap<String, f64>>,
    },
    Nets {
        nets: BTreeMap<CellValue, Perceptron>,
        /// Hidden layer widths used when a new per-action net is grown.
        hidden: Vec<usize>,
        /// Feature width, fixed at construction.
        inputs: usize,
        rng: Prng,
        /// Features seen one tick ago; the update trains on these.
        prev_features: Vec<f64>,
    },
}

/// One per-cell learner.
///
/// Graded retroactively: the reward for the *last* guess is whether it
/// matches the *current* observation, so no external reward signal exists.
/// See `step` for the full contract.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Predictor {
    params: LearnerParams,
    repr: ValueRepr,
    /// Exploration bookkeeping: times `action` was taken in `context`.
    visits: BTreeMap<CellValue, HashMap<String, u32>>,
    /// Confirmed `(context, action)` associations; its size is the cell's
    /// "rule count" diagnostic.
    rules: HashSet<(String, CellValue)>,
    prev: Option<Transition>,
}

impl Predictor {
    /// Table-backed learner.
    pub fn new_table(params: LearnerParams) -> Self {
        Self {
            params,
            repr: ValueRepr::Table { q: BTreeMap::new() },
            visits: BTreeMap::new(),
            rules: HashSet::new(),
            prev: None,
        }
    }

    /// Approximator-backed learner: one net per action, lazily grown,
    /// `inputs` features wide with the given hidden layer widths.
    pub fn new_nets(params: LearnerParams, inputs: usize, hidden: Vec<usize>, seed: u64) -> Self {
        Self {
            params,
            repr: ValueRepr::Nets {
                nets: BTreeMap::new(),
                hidden,
                inputs,
                rng: Prng::new(seed),
                prev_features: Vec::new(),
            },
            visits: BTreeMap::new(),
            rules: HashSet::new(),
            prev: None,
        }
    }

    /// Number of distinct confirmed action/context associations.
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// The action chosen on the previous step, if any.
    pub fn last_action(&self) -> Option<CellValue> {
        self.prev.as_ref().map(|t| t.action)
    }

    /// Feed one observation and get the prediction for the next tick.
    ///
    /// `context` is the serialized neighborhood summary, `features` the
    /// numeric equivalent (ignored by table-backed learners). With
    /// `learning == false` the value estimate, visit counts, and rules are
    /// frozen; the learner still selects an action and rolls its
    /// previous-transition memory.
    pub fn step(
        &mut self,
        observed: CellValue,
        context: String,
        features: &[f64],
        learning: bool,
    ) -> CellValue {
        let mut action = observed;
        let mut reward = self.params.min_reward;

        if let Some(prev) = self.prev.take() {
            reward = if observed == prev.action {
                self.params.max_reward
            } else {
                self.params.min_reward
            };

            if learning {
                if observed == prev.action {
                    self.rules.insert((prev.context.clone(), prev.action));
                }

                let n = {
                    let count = self
                        .visits
                        .entry(prev.action)
                        .or_default()
                        .entry(prev.context.clone())
                        .or_insert(0);
                    *count += 1;
                    *count
                };

                self.ensure_action(observed);
                let max_next = self.max_value(&context, features);
                self.update_value(&prev, reward, max_next, n);
            }

            action = self.argmax(&context, features).unwrap_or(observed);
        }

        if let ValueRepr::Nets { prev_features, .. } = &mut self.repr {
            prev_features.clear();
            prev_features.extend_from_slice(features);
        }

        self.prev = Some(Transition {
            context,
            action,
            reward,
        });

        action
    }

    /// Lazily create a value estimator for a never-seen action.
    fn ensure_action(&mut self, action: CellValue) {
        match &mut self.repr {
            ValueRepr::Table { q } => {
                q.entry(action).or_default();
            }
            ValueRepr::Nets {
                nets,
                hidden,
                inputs,
                rng,
                ..
            } => {
                nets.entry(action).or_insert_with(|| {
                    let mut sizes = Vec::with_capacity(hidden.len() + 2);
                    sizes.push(*inputs);
                    sizes.extend_from_slice(hidden);
                    sizes.push(1);
                    Perceptron::new(&sizes, rng)
                });
            }
        }
    }

    /// `max_a value(a, context)` over every action seen so far.
    fn max_value(&self, context: &str, features: &[f64]) -> f64 {
        match &self.repr {
            ValueRepr::Table { q } => q
                .values()
                .map(|per_ctx| per_ctx.get(context).copied().unwrap_or(0.0))
                .fold(f64::NEG_INFINITY, f64::max),
            ValueRepr::Nets { nets, .. } => nets
                .values()
                .map(|net| net.evaluate(features))
                .fold(f64::NEG_INFINITY, f64::max),
        }
    }

    fn update_value(&mut self, prev: &Transition, reward: f64, max_next: f64, n: u32) {
        let alpha = 1.0 / (f64::from(n) + 1.0);
        let target_for = |current: f64| current + alpha * (reward + self.params.gamma * max_next - current);

        match &mut self.repr {
            ValueRepr::Table { q } => {
                let slot = q
                    .entry(prev.action)
                    .or_default()
                    .entry(prev.context.clone())
                    .or_insert(0.0);
                *slot = target_for(*slot);
            }
            ValueRepr::Nets {
                nets, prev_features, ..
            } => {
                let Some(net) = nets.get_mut(&prev.action) else {
                    return;
                };
                // Bounded gradient pursuit of a moving target; stop early
                // once the residual stops changing.
                let mut last_delta: Option<f64> = None;
                for _ in 0..MAX_TRAIN_STEPS {
                    let current = net.evaluate(prev_features);
                    let target = current + alpha * (reward + self.params.gamma * max_next - current);
                    net.train(prev_features, target);

                    let delta = target - current;
                    if let Some(prior) = last_delta {
                        if (prior - delta).abs() <= TRAIN_EPSILON {
                            break;
                        }
                    }
                    last_delta = Some(delta);
                }
            }
        }
    }

    /// Argmax over the optimistic exploration score: under-visited actions
    /// are forced to look maximal until their visit count reaches `n_e`.
    /// Actions scan in ascending order and the first maximum wins.
    fn argmax(&self, context: &str, features: &[f64]) -> Option<CellValue> {
        let mut best: Option<(CellValue, f64)> = None;

        let mut consider = |action: CellValue, value: f64, visits: u32| {
            let score = if visits < self.params.n_e {
                self.params.max_reward
            } else {
                value
            };
            if best.as_ref().map(|(_, s)| score > *s).unwrap_or(true) {
                best = Some((action, score));
            }
        };

        match &self.repr {
            ValueRepr::Table { q } => {
                for (&action, per_ctx) in q {
                    let value = per_ctx.get(context).copied().unwrap_or(0.0);
                    consider(action, value, self.visit_count(action, context));
                }
            }
            ValueRepr::Nets { nets, .. } => {
                for (&action, net) in nets {
                    consider(action, net.evaluate(features), self.visit_count(action, context));
                }
            }
        }

        best.map(|(action, _)| action)
    }

    fn visit_count(&self, action: CellValue, context: &str) -> u32 {
        self.visits
            .get(&action)
            .and_then(|per_ctx| per_ctx.get(context))
            .copied()
            .unwrap_or(0)
    }
}
