//! Task scheduling boundary for per-tile work.
//!
//! Tile operations are pure functions of their inputs, so they can run
//! on any scheduler honoring the "submit tasks, await results"
//! contract. Only in-process schedulers ship here; a distributed
//! runner can implement [`TileScheduler`] externally.

use crate::types::{FillError, FillResult, TilePair};

/// One deferred tile computation.
pub type TileJob = Box<dyn FnOnce() -> FillResult<TilePair> + Send>;

/// Scheduler contract: execute the submitted jobs and return their
/// results in submission order. A failed job propagates its error in
/// its result slot; it must not leave partial output state.
pub trait TileScheduler: Sync {
    fn name(&self) -> &'static str;
    fn run_tiles(&self, jobs: Vec<TileJob>) -> Vec<FillResult<TilePair>>;
}

/// Runs every tile job in order on the calling thread. The default
/// when no scheduler is supplied.
#[derive(Debug, Default)]
pub struct SequentialScheduler;

impl TileScheduler for SequentialScheduler {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn run_tiles(&self, jobs: Vec<TileJob>) -> Vec<FillResult<TilePair>> {
        log::debug!("Running {} tile job(s) sequentially", jobs.len());
        jobs.into_iter().map(|job| job()).collect()
    }
}

/// Fans tile jobs out over the rayon thread pool. Tile independence
/// (each job reads only its own cloned inputs) makes this safe without
/// locking.
#[derive(Debug, Default)]
pub struct RayonScheduler;

#[cfg(feature = "parallel")]
impl TileScheduler for RayonScheduler {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn run_tiles(&self, jobs: Vec<TileJob>) -> Vec<FillResult<TilePair>> {
        use rayon::prelude::*;

        log::debug!("Running {} tile job(s) on the rayon pool", jobs.len());
        jobs.into_par_iter().map(|job| job()).collect()
    }
}

#[cfg(not(feature = "parallel"))]
impl TileScheduler for RayonScheduler {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn run_tiles(&self, jobs: Vec<TileJob>) -> Vec<FillResult<TilePair>> {
        SequentialScheduler.run_tiles(jobs)
    }
}

/// Look up a scheduler by its registered mode name.
pub fn scheduler_from_mode(mode: &str) -> FillResult<Box<dyn TileScheduler>> {
    match mode {
        "sequential" => Ok(Box::new(SequentialScheduler)),
        "parallel" => Ok(Box::new(RayonScheduler)),
        other => {
            log::error!("No scheduler mode named {} registered", other);
            Err(FillError::UnknownSchedulerMode(other.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_jobs(count: usize) -> Vec<TileJob> {
        (0..count)
            .map(|_| Box::new(|| Ok((None, None))) as TileJob)
            .collect()
    }

    #[test]
    fn test_sequential_runs_all_jobs() {
        let results = SequentialScheduler.run_tiles(dummy_jobs(4));
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.is_ok()));
    }

    #[test]
    fn test_parallel_preserves_submission_order() {
        let jobs: Vec<TileJob> = (0..16)
            .map(|i| {
                Box::new(move || {
                    let mut tile = crate::types::DispTile::new(
                        ndarray::Array2::from_elem((1, 1), i as f32),
                        ndarray::Array2::from_elem((1, 1), crate::types::MASK_VALID),
                    );
                    tile.attributes = None;
                    Ok((Some(tile), None))
                }) as TileJob
            })
            .collect();
        let results = RayonScheduler.run_tiles(jobs);
        for (i, result) in results.iter().enumerate() {
            let (left, right) = result.as_ref().unwrap();
            assert!(right.is_none());
            assert_eq!(left.as_ref().unwrap().disp[[0, 0]], i as f32);
        }
    }

    #[test]
    fn test_scheduler_registry() {
        assert_eq!(scheduler_from_mode("sequential").unwrap().name(), "sequential");
        assert_eq!(scheduler_from_mode("parallel").unwrap().name(), "parallel");
        assert!(matches!(
            scheduler_from_mode("local_dask"),
            Err(FillError::UnknownSchedulerMode(_))
        ));
    }

    #[test]
    fn test_errors_propagate_per_slot() {
        let jobs: Vec<TileJob> = vec![
            Box::new(|| Ok((None, None))),
            Box::new(|| Err(FillError::Processing("boom".to_string()))),
        ];
        let results = SequentialScheduler.run_tiles(jobs);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }
}
