#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default qualifying ticks in a row before a model unit counts as
/// converged.
pub const CONVERGENCE_LIMIT: u32 = 300;
/// Default disconfirming ticks tolerated before the convergence counter
/// resets.
pub const ERROR_LIMIT: u32 = 7;
/// Moving-average window length over the match statistics.
const WINDOW: usize = 3;

/// Outcome of one habituation update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    /// True once the unit has qualified for its convergence limit of
    /// ticks.
    pub habituated: bool,
    /// Fraction of the convergence run completed, when this update touched
    /// it. `None` means the estimate was left as it was.
    pub confidence: Option<f64>,
}

/// Convergence and novelty detector over per-tick match statistics.
///
/// Each tick it is fed `vsum` (live observed cells) and `sum` (live observed
/// cells whose value was predicted correctly), with `0 <= sum <= vsum`. A
/// tick where every live cell was predicted (`vsum != 0 && sum == vsum`)
/// counts toward convergence; a short moving average of both series is kept
/// so novelty can be judged against the recent past rather than a single
/// frame.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Habituation {
    convergence_limit: u32,
    error_limit: u32,
    mem: u32,
    err: u32,
    sum_window: [i64; WINDOW],
    vsum_window: [i64; WINDOW],
    /// Truncated moving average of `sum`.
    masum: i64,
    /// Truncated moving average of `vsum`.
    mavsum: i64,
}

impl Default for Habituation {
    fn default() -> Self {
        Self::with_limits(CONVERGENCE_LIMIT, ERROR_LIMIT)
    }
}

impl Habituation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Detector with explicit convergence and error budgets.
    pub fn with_limits(convergence_limit: u32, error_limit: u32) -> Self {
        Self {
            convergence_limit: convergence_limit.max(1),
            error_limit,
            mem: 0,
            err: 0,
            sum_window: [0; WINDOW],
            vsum_window: [0; WINDOW],
            masum: 0,
            mavsum: 0,
        }
    }

    /// Reset counters and window; moving averages restart from zero.
    pub fn clear(&mut self) {
        *self = Self::with_limits(self.convergence_limit, self.error_limit);
    }

    /// Current convergence streak as a fraction of the required run.
    pub fn confidence(&self) -> f64 {
        f64::from(self.mem) / f64::from(self.convergence_limit)
    }

    /// True when the current statistics fall below the recent moving
    /// averages, i.e. the input no longer looks like what this unit has
    /// been watching.
    pub fn is_newinput(&self, vsum: i64, sum: i64) -> bool {
        sum < self.masum || vsum < self.mavsum
    }

    /// Feed one tick of match statistics and update the convergence state.
    pub fn is_habituation(&mut self, vsum: i64, sum: i64) -> Verdict {
        // Slide the window and refresh the truncated averages.
        let mut ssum = 0;
        let mut svsum = 0;
        for i in 0..WINDOW - 1 {
            self.sum_window[i] = self.sum_window[i + 1];
            self.vsum_window[i] = self.vsum_window[i + 1];
            ssum += self.sum_window[i];
            svsum += self.vsum_window[i];
        }
        self.sum_window[WINDOW - 1] = sum;
        self.vsum_window[WINDOW - 1] = vsum;
        ssum += sum;
        svsum += vsum;

        self.masum = ssum / WINDOW as i64;
        self.mavsum = svsum / WINDOW as i64;

        let drop_sum = self.masum - sum;
        let drop_vsum = self.mavsum - vsum;

        if vsum != 0 && vsum == sum {
            // Every live cell predicted: one more step of the streak.
            self.err = 0;
            self.mem = (self.mem + 1).min(self.convergence_limit);
            return Verdict {
                habituated: self.mem >= self.convergence_limit,
                confidence: Some(self.confidence()),
            };
        }

        if vsum == 0 && sum == 0 && self.mavsum != 0 && self.mavsum == self.masum && drop_sum == drop_vsum {
            // A blank frame inside an otherwise steady stream: count it as
            // an error (up to the tolerance) but keep the streak.
            self.err = (self.err + 1).min(self.error_limit);
            return Verdict {
                habituated: false,
                confidence: Some(self.confidence()),
            };
        }

        if self.err < self.error_limit {
            self.err += 1;
            Verdict {
                habituated: false,
                confidence: None,
            }
        } else {
            self.mem = 0;
            self.err = 0;
            Verdict {
                habituated: false,
                confidence: Some(0.0),
            }
        }
    }
}
