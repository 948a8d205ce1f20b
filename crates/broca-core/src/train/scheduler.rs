//! Plateau-triggered learning-rate reduction.
//!
//! Observes the validation loss once per epoch and multiplies the
//! optimizer's learning rate by `factor` when the loss has stopped
//! improving for `patience` consecutive epochs.

use candle_nn::Optimizer;

/// Configuration for [`ReduceOnPlateau`].
#[derive(Debug, Clone)]
pub struct PlateauConfig {
    /// Multiplier applied to the learning rate on a plateau.
    pub factor: f64,
    /// Epochs without improvement tolerated before reducing.
    pub patience: usize,
    /// Relative improvement required to count as progress.
    pub threshold: f64,
    /// Lower bound on the learning rate.
    pub min_lr: f64,
}

impl Default for PlateauConfig {
    fn default() -> Self {
        Self {
            factor: 0.1,
            patience: 10,
            threshold: 1e-4,
            min_lr: 0.0,
        }
    }
}

/// Learning-rate scheduler reacting to validation-loss plateaus.
#[derive(Debug)]
pub struct ReduceOnPlateau {
    /// Configuration.
    config: PlateauConfig,
    /// Best loss seen so far.
    best: f64,
    /// Consecutive epochs without improvement.
    bad_epochs: usize,
}

impl ReduceOnPlateau {
    /// Create a new scheduler.
    pub fn new(config: PlateauConfig) -> Self {
        Self {
            config,
            best: f64::INFINITY,
            bad_epochs: 0,
        }
    }

    /// Record one epoch's validation loss, reducing the optimizer's
    /// learning rate if the loss has plateaued. Returns whether a
    /// reduction happened.
    pub fn step<O: Optimizer>(&mut self, valid_loss: f32, optimizer: &mut O) -> bool {
        let loss = valid_loss as f64;
        if loss < self.best * (1.0 - self.config.threshold) {
            self.best = loss;
            self.bad_epochs = 0;
            return false;
        }
        self.bad_epochs += 1;
        if self.bad_epochs <= self.config.patience {
            return false;
        }
        let lr = (optimizer.learning_rate() * self.config.factor).max(self.config.min_lr);
        optimizer.set_learning_rate(lr);
        self.bad_epochs = 0;
        true
    }

    /// Best validation loss observed so far.
    pub fn best(&self) -> f64 {
        self.best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, Var};
    use candle_nn::{AdamW, ParamsAdamW};

    fn create_test_optimizer(lr: f64) -> AdamW {
        let var = Var::zeros((2, 2), DType::F32, &Device::Cpu).unwrap();
        AdamW::new(
            vec![var],
            ParamsAdamW {
                lr,
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn quick_config() -> PlateauConfig {
        PlateauConfig {
            patience: 2,
            ..Default::default()
        }
    }

    #[test]
    fn improving_loss_keeps_the_rate() {
        let mut opt = create_test_optimizer(1e-3);
        let mut scheduler = ReduceOnPlateau::new(quick_config());
        for loss in [1.0, 0.9, 0.8, 0.7, 0.6] {
            assert!(!scheduler.step(loss, &mut opt));
        }
        assert!((opt.learning_rate() - 1e-3).abs() < 1e-12);
    }

    #[test]
    fn plateau_reduces_after_patience() {
        let mut opt = create_test_optimizer(1e-3);
        let mut scheduler = ReduceOnPlateau::new(quick_config());
        assert!(!scheduler.step(1.0, &mut opt));
        // Two stalled epochs are tolerated; the third reduces.
        assert!(!scheduler.step(1.0, &mut opt));
        assert!(!scheduler.step(1.0, &mut opt));
        assert!(scheduler.step(1.0, &mut opt));
        assert!((opt.learning_rate() - 1e-4).abs() < 1e-12);
    }

    #[test]
    fn improvement_resets_the_counter() {
        let mut opt = create_test_optimizer(1e-3);
        let mut scheduler = ReduceOnPlateau::new(quick_config());
        scheduler.step(1.0, &mut opt);
        scheduler.step(1.0, &mut opt);
        scheduler.step(1.0, &mut opt);
        // Improvement just before the reduction would fire.
        assert!(!scheduler.step(0.5, &mut opt));
        assert!(!scheduler.step(0.5, &mut opt));
        assert!(!scheduler.step(0.5, &mut opt));
        assert!((opt.learning_rate() - 1e-3).abs() < 1e-12);
    }

    #[test]
    fn rate_never_drops_below_the_floor() {
        let mut opt = create_test_optimizer(1e-3);
        let mut scheduler = ReduceOnPlateau::new(PlateauConfig {
            patience: 0,
            min_lr: 5e-4,
            ..Default::default()
        });
        scheduler.step(1.0, &mut opt);
        scheduler.step(1.0, &mut opt);
        scheduler.step(1.0, &mut opt);
        assert!((opt.learning_rate() - 5e-4).abs() < 1e-12);
    }

    #[test]
    fn tiny_improvements_do_not_count() {
        let mut opt = create_test_optimizer(1e-3);
        let mut scheduler = ReduceOnPlateau::new(PlateauConfig {
            patience: 1,
            ..Default::default()
        });
        scheduler.step(1.0, &mut opt);
        // Within the relative threshold: still a stall.
        scheduler.step(0.99999, &mut opt);
        assert!(scheduler.step(0.99998, &mut opt));
    }
}
