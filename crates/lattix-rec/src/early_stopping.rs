//! Early stopping with best-model checkpointing.
//!
//! Every validation score goes through [`EarlyStopping::step`]. A strict
//! improvement over the best score so far resets the stall counter and
//! snapshots the model; anything else counts as a stall. The run stops once
//! `patience` consecutive stalls have accumulated (`patience = 0` stops on
//! the first one).
//!
//! ```text
//!             improve                 stall (count < patience)
//!   ┌──────────────────┐           ┌─────────┐
//!   ▼                  │           ▼         │
//! Improving ──stall──> Stalled(n) ───────────┘
//!                          │
//!                          └── count >= patience ──> Stopped
//! ```
//!
//! The first score always becomes the initial checkpoint. A NaN score never
//! counts as an improvement. With [`EarlyStopping::with_ties_improve`] a
//! score equal to the best also re-checkpoints and resets the counter.

use candle_nn::VarMap;
use tracing::{debug, info};

use crate::error::Result;
use crate::model::ModelSnapshot;

/// Whether larger or smaller scores are better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Maximize,
    Minimize,
}

impl Direction {
    /// Whether `candidate` strictly beats `best`.
    pub fn improves(self, candidate: f64, best: f64) -> bool {
        if candidate.is_nan() {
            return false;
        }
        if best.is_nan() {
            return true;
        }
        match self {
            Direction::Maximize => candidate > best,
            Direction::Minimize => candidate < best,
        }
    }

    /// Whether `candidate` beats or equals `best`. NaN still never qualifies.
    pub fn matches_or_improves(self, candidate: f64, best: f64) -> bool {
        candidate == best || self.improves(candidate, best)
    }
}

/// Where the stopper stands after the latest score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopState {
    /// The latest score was a new best.
    Improving,
    /// This many consecutive scores failed to improve.
    Stalled(usize),
    /// Patience exhausted.
    Stopped,
}

/// Tracks the best validation score and the model state that produced it.
#[derive(Debug)]
pub struct EarlyStopping {
    patience: usize,
    direction: Direction,
    ties_improve: bool,
    state: StopState,
    best_score: Option<f64>,
    best_epoch: Option<usize>,
    checkpoint: Option<ModelSnapshot>,
}

impl EarlyStopping {
    pub fn new(patience: usize, direction: Direction) -> Self {
        Self {
            patience,
            direction,
            ties_improve: false,
            state: StopState::Improving,
            best_score: None,
            best_epoch: None,
            checkpoint: None,
        }
    }

    /// Treat a score equal to the best as an improvement.
    pub fn with_ties_improve(mut self, ties_improve: bool) -> Self {
        self.ties_improve = ties_improve;
        self
    }

    /// Record the score of `epoch`, checkpointing `varmap` on improvement.
    ///
    /// Once stopped, further scores are ignored.
    pub fn step(&mut self, epoch: usize, score: f64, varmap: &VarMap) -> Result<StopState> {
        if self.state == StopState::Stopped {
            return Ok(self.state);
        }

        let improved = match self.best_score {
            None => true,
            Some(best) if self.ties_improve => self.direction.matches_or_improves(score, best),
            Some(best) => self.direction.improves(score, best),
        };

        if improved {
            self.checkpoint = Some(ModelSnapshot::capture(varmap)?);
            if let Some(previous) = self.best_score {
                info!(epoch, score, previous, "validation improved, checkpoint saved");
            } else {
                debug!(epoch, score, "initial checkpoint saved");
            }
            self.best_score = Some(score);
            self.best_epoch = Some(epoch);
            self.state = StopState::Improving;
            return Ok(self.state);
        }

        let stalls = match self.state {
            StopState::Stalled(n) => n + 1,
            _ => 1,
        };
        self.state = if stalls >= self.patience {
            StopState::Stopped
        } else {
            StopState::Stalled(stalls)
        };
        debug!(epoch, score, stalls, patience = self.patience, "no improvement");
        Ok(self.state)
    }

    pub fn state(&self) -> StopState {
        self.state
    }

    pub fn should_stop(&self) -> bool {
        self.state == StopState::Stopped
    }

    pub fn best_score(&self) -> Option<f64> {
        self.best_score
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    pub fn checkpoint(&self) -> Option<&ModelSnapshot> {
        self.checkpoint.as_ref()
    }

    /// Load the best checkpoint into `varmap`.
    ///
    /// Returns `false` when nothing was ever checkpointed.
    pub fn restore_best(&self, varmap: &VarMap) -> Result<bool> {
        match &self.checkpoint {
            Some(snapshot) => {
                snapshot.restore(varmap)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, Tensor};
    use candle_nn::Init;

    fn varmap() -> VarMap {
        let vm = VarMap::new();
        vm.get((2, 2), "w", Init::Const(1.0), DType::F32, &Device::Cpu)
            .unwrap();
        vm
    }

    fn set_all(vm: &VarMap, value: f32) {
        let data = vm.data().lock().unwrap();
        for var in data.values() {
            var.set(&Tensor::full(value, (2, 2), &Device::Cpu).unwrap())
                .unwrap();
        }
    }

    fn read(vm: &VarMap) -> Vec<f32> {
        let data = vm.data().lock().unwrap();
        data["w"].as_tensor().flatten_all().unwrap().to_vec1().unwrap()
    }

    #[test]
    fn test_direction() {
        assert!(Direction::Maximize.improves(0.5, 0.4));
        assert!(!Direction::Maximize.improves(0.4, 0.4));
        assert!(Direction::Minimize.improves(0.3, 0.4));
        assert!(!Direction::Maximize.improves(f64::NAN, 0.1));
        assert!(Direction::Maximize.improves(0.0, f64::NAN));
    }

    #[test]
    fn test_stops_after_patience_stalls() {
        let vm = varmap();
        let mut es = EarlyStopping::new(2, Direction::Maximize);

        assert_eq!(es.step(0, 0.1, &vm).unwrap(), StopState::Improving);
        assert_eq!(es.step(1, 0.2, &vm).unwrap(), StopState::Improving);
        assert_eq!(es.step(2, 0.2, &vm).unwrap(), StopState::Stalled(1));
        assert_eq!(es.step(3, 0.1, &vm).unwrap(), StopState::Stopped);
        assert!(es.should_stop());
        assert_eq!(es.best_epoch(), Some(1));
        assert_eq!(es.best_score(), Some(0.2));
    }

    #[test]
    fn test_improvement_resets_stalls() {
        let vm = varmap();
        let mut es = EarlyStopping::new(2, Direction::Maximize);
        es.step(0, 0.5, &vm).unwrap();
        assert_eq!(es.step(1, 0.4, &vm).unwrap(), StopState::Stalled(1));
        assert_eq!(es.step(2, 0.6, &vm).unwrap(), StopState::Improving);
        assert_eq!(es.step(3, 0.6, &vm).unwrap(), StopState::Stalled(1));
    }

    #[test]
    fn test_tie_resets_stalls_when_enabled() {
        let vm = varmap();
        let mut es = EarlyStopping::new(1, Direction::Maximize).with_ties_improve(true);
        es.step(0, 0.5, &vm).unwrap();
        set_all(&vm, 3.0);
        assert_eq!(es.step(1, 0.5, &vm).unwrap(), StopState::Improving);
        assert_eq!(es.best_epoch(), Some(1));
        assert_eq!(es.step(2, 0.4, &vm).unwrap(), StopState::Stopped);

        // the tied epoch's weights are the ones restored
        set_all(&vm, 9.0);
        es.restore_best(&vm).unwrap();
        assert_eq!(read(&vm), vec![3.0; 4]);
    }

    #[test]
    fn test_tie_is_stall_by_default() {
        let vm = varmap();
        let mut es = EarlyStopping::new(1, Direction::Maximize);
        es.step(0, 0.5, &vm).unwrap();
        assert_eq!(es.step(1, 0.5, &vm).unwrap(), StopState::Stopped);
        assert_eq!(es.best_epoch(), Some(0));
        assert!(!Direction::Maximize.matches_or_improves(f64::NAN, f64::NAN));
    }

    #[test]
    fn test_zero_patience_stops_on_first_stall() {
        let vm = varmap();
        let mut es = EarlyStopping::new(0, Direction::Maximize);
        es.step(0, 0.5, &vm).unwrap();
        assert_eq!(es.step(1, 0.5, &vm).unwrap(), StopState::Stopped);
    }

    #[test]
    fn test_nan_first_score_still_checkpoints() {
        let vm = varmap();
        let mut es = EarlyStopping::new(3, Direction::Maximize);
        es.step(0, f64::NAN, &vm).unwrap();
        assert!(es.checkpoint().is_some());
        assert_eq!(es.step(1, f64::NAN, &vm).unwrap(), StopState::Stalled(1));
        assert_eq!(es.step(2, 0.1, &vm).unwrap(), StopState::Improving);
    }

    #[test]
    fn test_restore_best_weights() {
        let vm = varmap();
        let mut es = EarlyStopping::new(5, Direction::Maximize);
        assert!(!es.restore_best(&vm).unwrap());

        es.step(0, 0.9, &vm).unwrap();
        set_all(&vm, 7.0);
        es.step(1, 0.1, &vm).unwrap();

        assert!(es.restore_best(&vm).unwrap());
        assert_eq!(read(&vm), vec![1.0; 4]);
    }
}
