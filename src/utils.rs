use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks `mutex`, carrying on with the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Index of the largest value; ties go to the lowest index and NaNs never win.
///
/// Returns 0 for an empty iterator.
#[inline(always)]
pub fn argmax<'a>(values: impl IntoIterator<Item = &'a f64>) -> usize {
    let mut best: Option<(usize, f64)> = None;
    for (i, v) in values.into_iter().enumerate() {
        match best {
            Some((_, max)) if !(*v > max) => {}
            _ if v.is_nan() => {}
            _ => best = Some((i, *v)),
        }
    }
    best.map_or(0, |(i, _)| i)
}

#[inline(always)]
pub fn max(values: impl IntoIterator<Item = f64>) -> f64 {
    values.into_iter().fold(f64::NEG_INFINITY, f64::max)
}

/// Mean of the last `window` entries, 0 when empty.
pub fn tail_mean(window: usize, values: &[f64]) -> f64 {
    let start = values.len().saturating_sub(window);
    let slice = &values[start..];
    if slice.is_empty() {
        return 0.0;
    }
    slice.iter().sum::<f64>() / slice.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argmax_breaks_ties_towards_lowest_index() {
        assert_eq!(argmax(&[1.0, 3.0, 3.0, 2.0]), 1);
        assert_eq!(argmax(&[0.0, 0.0, 0.0]), 0);
    }

    #[test]
    fn argmax_skips_nan() {
        assert_eq!(argmax(&[f64::NAN, -1.0, -2.0]), 1);
        assert_eq!(argmax(&[]), 0);
    }

    #[test]
    fn max_of_row() {
        assert_eq!(max([-3.0, 7.5, 2.0]), 7.5);
    }

    #[test]
    fn tail_mean_uses_only_the_window() {
        let values = [100.0, 1.0, 2.0, 3.0];
        assert_eq!(tail_mean(3, &values), 2.0);
        assert_eq!(tail_mean(10, &values), 26.5);
        assert_eq!(tail_mean(5, &[]), 0.0);
    }
}
