use rayon::ThreadPoolBuilder;
use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Once};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::context::RunContext;
use crate::domain::{extract_host, has_valid_tld, normalize_domain};
use crate::error::BatchError;
use crate::patterns::Rule;
use crate::stats::DomainStats;

pub const DEFAULT_BATCH_SIZE: usize = 25_000;

/// Upper bound on the auto-detected worker count.
pub const MAX_AUTO_WORKERS: usize = 8;

/// Runs with this many batches or fewer skip the worker pool.
pub const SEQUENTIAL_BATCH_THRESHOLD: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub workers: Option<usize>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            workers: None,
        }
    }
}

impl BatchConfig {
    pub fn with_workers(workers: Option<usize>) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    /// Explicit worker count (at least 1), or `min(cpus, MAX_AUTO_WORKERS)`.
    pub fn resolved_workers(&self) -> usize {
        match self.workers {
            Some(workers) => workers.max(1),
            None => num_cpus::get().clamp(1, MAX_AUTO_WORKERS),
        }
    }
}

/// Extracts, validates and normalizes one batch of URLs.
pub fn process_batch<S: AsRef<str>>(urls: &[S], rules: &[Rule], ctx: &RunContext) -> DomainStats {
    let mut stats = DomainStats::new();

    for url in urls {
        let url = url.as_ref();
        let host = match extract_host(url) {
            Ok(Some(host)) => host,
            Ok(None) => continue,
            Err(e) => {
                debug!(parent: ctx.span(), url = url, error = %e, "Could not parse URL");
                continue;
            }
        };

        // Quick TLD check first (most common rejection)
        if !has_valid_tld(&host) {
            stats.reject();
            continue;
        }

        let normalized = normalize_domain(&host, rules);
        if !has_valid_tld(&normalized) {
            stats.reject();
            continue;
        }

        stats.record(normalized);
    }

    stats
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

thread_local! {
    static IN_BATCH: Cell<bool> = const { Cell::new(false) };
}

static BATCH_PANIC_HOOK: Once = Once::new();

/// Wraps the current panic hook so that panics inside a batch are not printed.
/// They are reported through the run's logging instead.
fn install_batch_panic_hook() {
    BATCH_PANIC_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if !IN_BATCH.with(Cell::get) {
                previous(info);
            }
        }));
    });
}

/// Runs `work` for batch `batch`, turning a panic into a [`BatchError`].
fn execute_batch<F>(batch: usize, work: F) -> Result<DomainStats, BatchError>
where
    F: FnOnce() -> DomainStats,
{
    install_batch_panic_hook();

    IN_BATCH.with(|flag| flag.set(true));
    let result = panic::catch_unwind(AssertUnwindSafe(work));
    IN_BATCH.with(|flag| flag.set(false));

    result.map_err(|payload| BatchError::Panicked {
        batch,
        message: panic_message(payload),
    })
}

fn should_log_batch(batch: usize, total_batches: usize) -> bool {
    total_batches <= 10 || batch % 10 == 0 || batch + 1 == total_batches
}

/// Partitions `urls` into batches and folds the per-batch results.
pub fn run<S>(urls: &[S], rules: &[Rule], config: &BatchConfig, ctx: &RunContext) -> DomainStats
where
    S: AsRef<str> + Sync,
{
    run_with(urls, rules, config, ctx, process_batch::<S>)
}

/// [`run`] with a custom per-batch function.
pub fn run_with<S, F>(
    urls: &[S],
    rules: &[Rule],
    config: &BatchConfig,
    ctx: &RunContext,
    process: F,
) -> DomainStats
where
    S: AsRef<str> + Sync,
    F: Fn(&[S], &[Rule], &RunContext) -> DomainStats + Sync,
{
    let start_time = Instant::now();
    let batch_size = config.batch_size.max(1);
    let workers = config.resolved_workers();
    let batches: Vec<&[S]> = urls.chunks(batch_size).collect();
    let total_batches = batches.len();

    info!(
        parent: ctx.span(),
        action = "configure",
        component = "batch_processing",
        url_count = urls.len(),
        batch_size,
        total_batches,
        worker_count = workers,
        "Using workers to process batches"
    );

    let stats = if workers == 1 || total_batches <= SEQUENTIAL_BATCH_THRESHOLD {
        run_sequential(&batches, rules, ctx, &process)
    } else {
        match ThreadPoolBuilder::new().num_threads(workers).build() {
            Ok(pool) => {
                info!(parent: ctx.span(), action = "mode", component = "batch_processing", "Using parallel processing");
                let (tx, rx) = mpsc::channel();

                pool.in_place_scope(|scope| {
                    for (batch, &chunk) in batches.iter().enumerate() {
                        let tx = tx.clone();
                        let process = &process;
                        scope.spawn(move |_| {
                            let result = execute_batch(batch, || process(chunk, rules, ctx));
                            // The receiver outlives every worker.
                            let _ = tx.send((batch, result));
                        });
                    }
                    drop(tx);
                    collect_completed(rx, total_batches, ctx)
                })
            }
            Err(e) => {
                warn!(parent: ctx.span(), action = "mode", component = "batch_processing", error = %e, "Could not start worker pool, processing sequentially");
                run_sequential(&batches, rules, ctx, &process)
            }
        }
    };

    info!(
        parent: ctx.span(),
        action = "complete",
        component = "batch_processing",
        unique_domains = stats.unique_count(),
        domains_removed = stats.domains_removed,
        duration_ms = start_time.elapsed().as_millis(),
        "Batch processing completed"
    );
    stats
}

fn run_sequential<S, F>(batches: &[&[S]], rules: &[Rule], ctx: &RunContext, process: &F) -> DomainStats
where
    F: Fn(&[S], &[Rule], &RunContext) -> DomainStats,
{
    info!(parent: ctx.span(), action = "mode", component = "batch_processing", "Using sequential processing");
    let total_batches = batches.len();
    let mut processed_urls = 0;
    let mut stats = DomainStats::new();

    for (batch, &chunk) in batches.iter().enumerate() {
        let batch_start = Instant::now();
        processed_urls += chunk.len();

        match execute_batch(batch, || process(chunk, rules, ctx)) {
            Ok(partial) => stats.merge(partial),
            Err(e) => {
                warn!(parent: ctx.span(), action = "batch", component = "batch_processing", batch = batch + 1, error = %e, "Dropping failed batch");
                continue;
            }
        }

        if should_log_batch(batch, total_batches) {
            info!(
                parent: ctx.span(),
                action = "batch",
                component = "batch_processing",
                batch = batch + 1,
                total_batches,
                processed_urls,
                duration_ms = batch_start.elapsed().as_millis(),
                "Processed batch"
            );
        }
    }

    stats
}

/// Drains batch results in completion order until every sender is gone.
fn collect_completed(
    rx: mpsc::Receiver<(usize, Result<DomainStats, BatchError>)>,
    total_batches: usize,
    ctx: &RunContext,
) -> DomainStats {
    let mut stats = DomainStats::new();
    let mut completed = 0;

    for (batch, result) in rx {
        match result {
            Ok(partial) => {
                stats.merge(partial);
                completed += 1;
                if should_log_batch(batch, total_batches) {
                    info!(
                        parent: ctx.span(),
                        action = "batch",
                        component = "batch_processing",
                        batch = batch + 1,
                        total_batches,
                        completed,
                        "Processed batch"
                    );
                }
            }
            Err(e) => {
                warn!(parent: ctx.span(), action = "batch", component = "batch_processing", batch = batch + 1, error = %e, "Dropping failed batch");
            }
        }
    }

    stats
}
