use std::sync::atomic::{AtomicU64, Ordering};

use ndarray::Array1;
use rand::distributions::{Distribution, Uniform};
use rand::Rng;

use crate::config::ExplorationConfig;
use crate::utils::argmax;

/// Epsilon-greedy selection with one process-wide, multiplicatively decaying epsilon.
///
/// Epsilon is stored as the bit pattern of an `f64` in an atomic, so a decay is a
/// single read-modify-write and a concurrent selection sees either the old or the new
/// rate, never a torn one.
#[derive(Debug)]
pub struct EpsilonGreedy {
    exploration_decider: Uniform<f64>,
    rand_action_selecter: Uniform<usize>,
    epsilon: AtomicU64,
    min_epsilon: f64,
    decay_rate: f64,
}

impl EpsilonGreedy {
    /// # Panics
    /// If `action_count` is zero.
    pub fn new(action_count: usize, config: &ExplorationConfig) -> Self {
        Self {
            exploration_decider: Uniform::from(0.0..1.0),
            rand_action_selecter: Uniform::from(0..action_count),
            epsilon: AtomicU64::new(config.initial_epsilon.to_bits()),
            min_epsilon: config.min_epsilon,
            decay_rate: config.decay_rate,
        }
    }

    pub fn epsilon(&self) -> f64 {
        f64::from_bits(self.epsilon.load(Ordering::Acquire))
    }

    /// Restores a checkpointed rate.
    pub fn set_epsilon(&self, epsilon: f64) {
        self.epsilon.store(epsilon.to_bits(), Ordering::Release);
    }

    pub fn min_epsilon(&self) -> f64 {
        self.min_epsilon
    }

    fn should_explore<R: Rng + ?Sized>(&self, epsilon: f64, rng: &mut R) -> bool {
        epsilon != 0.0 && self.exploration_decider.sample(rng) < epsilon
    }

    /// A uniformly random action with probability epsilon, otherwise the greedy one.
    ///
    /// `values` is only evaluated when acting greedily. Greedy ties go to the lowest
    /// action id.
    pub fn get_action<R, F>(&self, rng: &mut R, values: F) -> usize
    where
        R: Rng + ?Sized,
        F: FnOnce() -> Array1<f64>,
    {
        if self.should_explore(self.epsilon(), rng) {
            self.rand_action_selecter.sample(rng)
        } else {
            argmax(values().iter())
        }
    }

    /// `epsilon <- max(min_epsilon, epsilon * decay_rate)`; returns the new rate.
    pub fn decay(&self) -> f64 {
        let (min, rate) = (self.min_epsilon, self.decay_rate);
        let step = |bits: u64| {
            let epsilon = f64::from_bits(bits);
            Some((epsilon * rate).max(min).min(epsilon).to_bits())
        };
        match self
            .epsilon
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, step)
        {
            Ok(previous) | Err(previous) => {
                let previous = f64::from_bits(previous);
                (previous * rate).max(min).min(previous)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;
    use std::thread;

    fn selector(initial_epsilon: f64) -> EpsilonGreedy {
        EpsilonGreedy::new(
            4,
            &ExplorationConfig {
                initial_epsilon,
                ..ExplorationConfig::default()
            },
        )
    }

    #[test]
    fn hundred_decays_from_one() {
        let selector = selector(1.0);
        for _ in 0..100 {
            selector.decay();
        }
        assert!((selector.epsilon() - 0.995f64.powi(100)).abs() < 1e-9);
        assert!((selector.epsilon() - 0.606).abs() < 1e-3);
    }

    #[test]
    fn epsilon_is_non_increasing_and_floored() {
        let selector = selector(1.0);
        let mut previous = selector.epsilon();
        for _ in 0..2000 {
            let next = selector.decay();
            assert!(next <= previous);
            assert!(next >= selector.min_epsilon());
            previous = next;
        }
        assert_eq!(selector.epsilon(), 0.01);
    }

    #[test]
    fn concurrent_decays_are_all_applied() {
        let selector = Arc::new(selector(1.0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let selector = Arc::clone(&selector);
                thread::spawn(move || {
                    for _ in 0..25 {
                        selector.decay();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!((selector.epsilon() - 0.995f64.powi(100)).abs() < 1e-9);
    }

    #[test]
    fn greedy_picks_lowest_maximum() {
        let selector = selector(0.0);
        let mut rng = StdRng::seed_from_u64(0);
        let action = selector.get_action(&mut rng, || arr1(&[0.5, 2.0, 2.0, -1.0]));
        assert_eq!(action, 1);
    }

    #[test]
    fn full_exploration_never_evaluates_and_covers_all_actions() {
        let selector = selector(1.0);
        let mut rng = StdRng::seed_from_u64(0);
        let mut seen = [false; 4];
        for _ in 0..200 {
            let action = selector.get_action(&mut rng, || panic!("greedy branch taken"));
            seen[action] = true;
        }
        assert_eq!(seen, [true; 4]);
    }

    #[test]
    fn same_seed_same_choices() {
        let selector = selector(0.5);
        let values = || arr1(&[0.0, 0.0, 1.0, 0.0]);
        let run = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..32)
                .map(|_| selector.get_action(&mut rng, values))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(9), run(9));
    }
}
