#[cfg(not(target_arch = "wasm32"))]
use rayon::prelude::*;

#[cfg(not(target_arch = "wasm32"))]
const PARALLEL_THRESHOLD: usize = 256;

/// `f(0..len)` collected in index order, in parallel for long ranges.
pub fn map_indexed<T, F>(len: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    #[cfg(not(target_arch = "wasm32"))]
    {
        if len >= PARALLEL_THRESHOLD {
            return (0..len).into_par_iter().map(&f).collect();
        }
    }

    (0..len).map(f).collect()
}

/// Fallible map over a slice, results in input order. Parallel regardless
/// of length since each item is expensive (one disc or one searchlight).
/// Which error is reported when several items fail is unspecified.
pub fn try_map_heavy<T, U, E, F>(items: &[T], f: F) -> Result<Vec<U>, E>
where
    T: Sync,
    U: Send,
    E: Send,
    F: Fn(&T) -> Result<U, E> + Sync + Send,
{
    #[cfg(not(target_arch = "wasm32"))]
    {
        if items.len() > 1 {
            return items.par_iter().map(&f).collect();
        }
    }

    items.iter().map(f).collect()
}
