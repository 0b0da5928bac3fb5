use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::engine::{CancelToken, Engine};
use crate::job::{JobOptions, NormalizationJob};
use crate::models::{BatchResult, FileRecord, JobState};

/// Input/output pairing for one job, fixed before the batch starts.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub input: PathBuf,
    pub output: PathBuf,
}

/// Return the default number of parallel workers (number of CPU cores).
pub fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Run every job across a bounded pool of `workers` threads.
///
/// Workers pull the next pending index from a shared atomic counter, so
/// concurrency never exceeds the pool size and no job is claimed twice.
/// Each worker owns its jobs outright and appends results to its own
/// vector; the vectors are merged and sorted by input index afterwards,
/// so the report order matches the input order no matter which job
/// finishes first. One job failing never disturbs its siblings.
pub fn run_batch(
    engine: &Engine,
    specs: Vec<JobSpec>,
    opts: &JobOptions,
    workers: usize,
    cancel: &CancelToken,
) -> BatchResult {
    let total = specs.len();
    if total == 0 {
        return BatchResult::from_records(Vec::new());
    }

    let specs = Arc::new(specs);
    let next_index = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..workers.max(1).min(total) {
        let specs = Arc::clone(&specs);
        let next_index = Arc::clone(&next_index);
        let engine = engine.clone();
        let opts = opts.clone();
        let cancel = cancel.clone();
        handles.push(std::thread::spawn(move || {
            let mut records = Vec::new();
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                let idx = next_index.fetch_add(1, Ordering::SeqCst);
                if idx >= specs.len() {
                    break;
                }
                let spec = &specs[idx];
                let name = spec
                    .input
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| spec.input.display().to_string());
                eprintln!("> File {}/{}: {}", idx + 1, specs.len(), name);

                let mut job = NormalizationJob::new(spec.input.clone(), spec.output.clone());
                job.run(&engine, &opts, &cancel);
                match job.state() {
                    JobState::Done => {
                        if let Some(plan) = job.plan() {
                            eprintln!("    Gain: {:+.1} dB", plan.gain_db);
                        }
                    }
                    _ => {
                        if let Some(err) = job.error() {
                            eprintln!("    Failed: {err}");
                        }
                    }
                }
                records.push((idx, job.into_record()));
            }
            records
        }));
    }

    let mut indexed: Vec<(usize, FileRecord)> = Vec::with_capacity(total);
    for handle in handles {
        indexed.extend(handle.join().unwrap());
    }
    indexed.sort_by_key(|(idx, _)| *idx);

    // Under cancellation some indices were never claimed; they still get a
    // record so the report enumerates every input, in input order.
    let mut indexed = indexed.into_iter().peekable();
    let mut records = Vec::with_capacity(total);
    for (idx, spec) in specs.iter().enumerate() {
        let claimed = indexed.peek().map_or(false, |(i, _)| *i == idx);
        if claimed {
            let (_, record) = indexed.next().unwrap();
            records.push(record);
        } else {
            records.push(FileRecord {
                input: spec.input.clone(),
                output: spec.output.clone(),
                state: JobState::Failed,
                measurement: None,
                plan: None,
                error: Some("batch cancelled".to_string()),
            });
        }
    }

    BatchResult::from_records(records)
}
