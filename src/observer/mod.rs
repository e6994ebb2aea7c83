use crate::brain::{Brain, Phase, UnitId};
use crate::grid::Grid;

/// A read-only snapshot of what the engine is doing.
///
/// Observers cannot mutate or steer the engine, and snapshotting is
/// on-demand and may allocate; the tick loop stays unchanged. Diagnostic
/// planes are cloned out so a snapshot stays valid across later ticks.
#[derive(Debug, Clone)]
pub struct BrainSnapshot {
    pub tick: u64,
    pub phase: Phase,
    pub active: UnitId,
    pub habituated: bool,
    /// Per-cell prediction stability of the active unit; absent while the
    /// pool is being searched.
    pub stability: Option<Grid<u8>>,
    /// Per-cell confirmed-rule counts of the active unit; absent while
    /// searching.
    pub rule_counts: Option<Grid<u32>>,
    pub units: Vec<UnitSnapshot>,
}

/// One pool member as seen from outside.
#[derive(Debug, Clone)]
pub struct UnitSnapshot {
    pub id: UnitId,
    pub confidence: f64,
    pub is_active: bool,
}

pub struct BrainAdapter<'a> {
    brain: &'a Brain,
}

impl<'a> BrainAdapter<'a> {
    pub fn new(brain: &'a Brain) -> Self {
        Self { brain }
    }

    pub fn snapshot(&self) -> BrainSnapshot {
        let active = self.brain.active_unit();
        let units = (0..self.brain.unit_count())
            .map(|i| UnitSnapshot {
                id: UnitId(i),
                confidence: self.brain.unit_confidence(UnitId(i)).unwrap_or(0.0),
                is_active: UnitId(i) == active,
            })
            .collect();

        BrainSnapshot {
            tick: self.brain.tick(),
            phase: self.brain.phase(),
            active,
            habituated: self.brain.is_habituated(),
            stability: self.brain.stability().cloned(),
            rule_counts: self.brain.rule_counts().cloned(),
            units,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::BrainConfig;
    use crate::grid::CellValue;

    #[test]
    fn snapshot_tracks_the_engine() {
        let mut brain = Brain::new(BrainConfig::with_size(3, 3).with_seed(1)).unwrap();
        let mut frame: Grid<CellValue> = Grid::new(3, 3);
        for cell in frame.as_mut_slice() {
            *cell = 1;
        }
        let mut predictions = Grid::new(3, 3);
        for _ in 0..5 {
            brain.observe(&frame, &mut predictions).unwrap();
        }

        let snap = BrainAdapter::new(&brain).snapshot();
        assert_eq!(snap.tick, 5);
        assert_eq!(snap.phase, Phase::Learning);
        assert_eq!(snap.units.len(), 1);
        assert!(snap.units[0].is_active);
        assert!(snap.stability.is_some());

        // A snapshot is a copy: later ticks do not bleed into it.
        brain.observe(&frame, &mut predictions).unwrap();
        assert_eq!(snap.tick, 5);
    }
}
