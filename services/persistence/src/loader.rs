//! Concurrent batch loader
//!
//! A fixed pool of scoped worker threads pulls file indices from a shared
//! channel, decodes each file, and records the result in a map guarded by a
//! mutex. The caller blocks until every file is processed, then results are
//! reassembled in input order, so the output never depends on which worker
//! finished first.
//!
//! The results map lives only for the duration of one call.

use crate::error::StoreError;
use crate::store::read_batch;
use crossbeam::channel;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::thread;
use tick_types::Batch;

/// Result of loading a list of files.
#[derive(Debug, Default)]
pub struct LoadOutcome {
    /// Successfully decoded files, in input order.
    pub batches: Vec<(PathBuf, Batch)>,
    /// Files that failed to read or decode, in input order.
    pub failures: Vec<(PathBuf, StoreError)>,
}

impl LoadOutcome {
    /// Concatenate all decoded records in input order.
    pub fn into_records(self) -> Batch {
        let total = self.batches.iter().map(|(_, batch)| batch.len()).sum();
        let mut records = Vec::with_capacity(total);
        for (_, batch) in self.batches {
            records.extend(batch);
        }
        records
    }
}

/// Decode `paths` using at most `workers` threads.
pub fn load_files(paths: &[PathBuf], workers: usize) -> LoadOutcome {
    if paths.is_empty() {
        return LoadOutcome::default();
    }
    let workers = workers.clamp(1, paths.len());

    let results: Mutex<HashMap<usize, Result<Batch, StoreError>>> =
        Mutex::new(HashMap::with_capacity(paths.len()));
    let (jobs_tx, jobs_rx) = channel::bounded::<usize>(workers);

    thread::scope(|scope| {
        for _ in 0..workers {
            let jobs = jobs_rx.clone();
            let results = &results;
            scope.spawn(move || {
                for index in jobs.iter() {
                    let loaded = read_batch(&paths[index]);
                    results.lock().insert(index, loaded);
                }
            });
        }
        drop(jobs_rx);

        for index in 0..paths.len() {
            if jobs_tx.send(index).is_err() {
                break;
            }
        }
        drop(jobs_tx);
    });

    // Every worker has joined; no further locking needed.
    let mut results = results.into_inner();
    let mut outcome = LoadOutcome::default();
    for (index, path) in paths.iter().enumerate() {
        match results.remove(&index) {
            Some(Ok(batch)) => outcome.batches.push((path.clone(), batch)),
            Some(Err(error)) => outcome.failures.push((path.clone(), error)),
            // A panicking worker propagates out of the scope above.
            None => {}
        }
    }
    outcome
}
