use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::InsufficientDataError;
use crate::observation::Transition;

/// Fixed-capacity replay memory.
///
/// Once full, every push overwrites the oldest transition (ring buffer). Batches are
/// drawn independently and uniformly with replacement from a seeded generator, so a
/// given seed and push sequence always yields the same batches.
#[derive(Debug, Clone)]
pub struct TransitionBuffer {
    transitions: Vec<Transition>,
    capacity: usize,
    next_idx: usize,
    total_pushed: u64,
    rng: StdRng,
}

impl TransitionBuffer {
    /// # Panics
    /// If `capacity` is zero; configuration validation rejects that earlier.
    pub fn new(capacity: usize, seed: u64) -> Self {
        assert!(capacity > 0, "transition buffer capacity must be positive");
        Self {
            transitions: Vec::with_capacity(capacity),
            capacity,
            next_idx: 0,
            total_pushed: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn push(&mut self, transition: Transition) {
        if self.transitions.len() < self.capacity {
            self.transitions.push(transition);
        } else {
            self.transitions[self.next_idx] = transition;
        }
        self.next_idx = (self.next_idx + 1) % self.capacity;
        self.total_pushed += 1;
    }

    pub fn sample(&mut self, batch_size: usize) -> Result<Vec<Transition>, InsufficientDataError> {
        let available = self.transitions.len();
        if available < batch_size {
            return Err(InsufficientDataError {
                requested: batch_size,
                available,
            });
        }
        Ok((0..batch_size)
            .map(|_| self.transitions[self.rng.gen_range(0..available)].clone())
            .collect())
    }

    pub fn ready(&self, batch_size: usize) -> bool {
        self.transitions.len() >= batch_size
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Transitions pushed over the buffer's lifetime, evicted ones included.
    pub fn total_pushed(&self) -> u64 {
        self.total_pushed
    }

    /// Stored transitions from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Transition> {
        let split = if self.transitions.len() < self.capacity {
            0
        } else {
            self.next_idx
        };
        let (newer, older) = self.transitions.split_at(split);
        older.iter().chain(newer.iter())
    }
}
