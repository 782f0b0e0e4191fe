//! Parallel processing strategies

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Processing mode for per-pixel work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProcessingMode {
    /// Single-threaded processing
    Sequential,
    /// Parallel processing using all available cores
    #[default]
    Parallel,
    /// Parallel with specified number of threads
    ParallelWith(usize),
}

/// Strategy for parallel execution.
///
/// Results always come back in input order, whatever the mode, so a
/// sequential fold over them is deterministic.
pub trait ParallelStrategy {
    /// Map a function over items and collect results in order
    fn par_map<I, T, F>(&self, items: Vec<I>, f: F) -> Result<Vec<T>, rayon::ThreadPoolBuildError>
    where
        I: Send,
        T: Send,
        F: Fn(I) -> T + Sync + Send;
}

impl ParallelStrategy for ProcessingMode {
    fn par_map<I, T, F>(&self, items: Vec<I>, f: F) -> Result<Vec<T>, rayon::ThreadPoolBuildError>
    where
        I: Send,
        T: Send,
        F: Fn(I) -> T + Sync + Send,
    {
        match self {
            ProcessingMode::Sequential => Ok(items.into_iter().map(f).collect()),
            ProcessingMode::Parallel => Ok(items.into_par_iter().map(f).collect()),
            ProcessingMode::ParallelWith(threads) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(*threads)
                    .build()?;
                Ok(pool.install(|| items.into_par_iter().map(f).collect()))
            }
        }
    }
}

/// Get the number of available CPU cores
pub fn num_cpus() -> usize {
    rayon::current_num_threads()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modes_preserve_order() {
        let items: Vec<usize> = (0..1000).collect();
        for mode in [
            ProcessingMode::Sequential,
            ProcessingMode::Parallel,
            ProcessingMode::ParallelWith(3),
        ] {
            let out = mode.par_map(items.clone(), |i| i * 2).unwrap();
            assert_eq!(out.len(), 1000);
            assert!(out.iter().enumerate().all(|(i, &v)| v == i * 2), "{:?}", mode);
        }
    }

    #[test]
    fn test_default_is_parallel() {
        assert_eq!(ProcessingMode::default(), ProcessingMode::Parallel);
        assert!(num_cpus() >= 1);
    }
}
