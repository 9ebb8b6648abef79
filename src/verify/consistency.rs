use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::scan::{ScanResult, StopReason};
use crate::types::EdgeId;
use crate::ScanError;

/// Default pause between sequential verification runs.
pub const DEFAULT_INTER_RUN_DELAY: Duration = Duration::from_millis(1_000);

/// Overall judgement over a set of runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Every run completed and returned the same id set.
    Consistent,
    /// Complete runs disagree: the node itself is not deterministic.
    NonDeterministic,
    /// Complete runs agree, but at least one run was truncated.
    Incomplete,
}

/// Per-run figures kept in the report.
#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    /// 0-based run index.
    pub run: usize,
    /// Distinct edges collected.
    pub unique_edges: u64,
    /// Pages fetched.
    pub batches: u32,
    /// Replayed rows dropped.
    pub duplicates_removed: u64,
    /// Whether the run ended early.
    pub truncated: bool,
    /// How the run ended.
    pub stop_reason: StopReason,
    /// Error that ended the run, if any.
    pub error: Option<ScanError>,
}

/// Comparison of independent full scans.
#[derive(Clone, Debug, Serialize)]
pub struct ConsistencyReport {
    /// Distinct edge count of every run, in run order.
    pub per_run_count: Vec<u64>,
    /// Smallest count.
    pub min: u64,
    /// Largest count.
    pub max: u64,
    /// `max - min`.
    pub variance: u64,
    /// Ids present in some but not all complete runs.
    pub divergent_ids: u64,
    /// Per-run details.
    pub runs: Vec<RunSummary>,
    /// Overall judgement.
    pub verdict: Verdict,
}

impl ConsistencyReport {
    /// Builds the report from finished runs, in run order.
    pub fn from_results(results: &[ScanResult]) -> Self {
        let per_run_count: Vec<u64> = results.iter().map(|r| r.unique_edges() as u64).collect();
        let min = per_run_count.iter().copied().min().unwrap_or(0);
        let max = per_run_count.iter().copied().max().unwrap_or(0);

        let complete: Vec<&ScanResult> = results.iter().filter(|r| r.is_complete()).collect();
        let divergent_ids = divergent_ids(&complete);
        let complete_counts_differ = complete
            .windows(2)
            .any(|pair| pair[0].unique_edges() != pair[1].unique_edges());

        let verdict = if complete_counts_differ || divergent_ids > 0 {
            Verdict::NonDeterministic
        } else if results.is_empty() || complete.len() < results.len() {
            Verdict::Incomplete
        } else {
            Verdict::Consistent
        };

        let runs = results
            .iter()
            .enumerate()
            .map(|(run, result)| RunSummary {
                run,
                unique_edges: result.unique_edges() as u64,
                batches: result.batches_fetched,
                duplicates_removed: result.duplicates_removed,
                truncated: result.truncated,
                stop_reason: result.stop_reason,
                error: result.error.clone(),
            })
            .collect();

        Self {
            per_run_count,
            min,
            max,
            variance: max - min,
            divergent_ids,
            runs,
            verdict,
        }
    }

    /// Whether the scan can be treated as trustworthy.
    pub fn is_trustworthy(&self) -> bool {
        self.verdict == Verdict::Consistent
    }
}

fn divergent_ids(complete: &[&ScanResult]) -> u64 {
    if complete.len() < 2 {
        return 0;
    }
    let mut seen: BTreeMap<&EdgeId, usize> = BTreeMap::new();
    for result in complete {
        for id in result.edges.keys() {
            *seen.entry(id).or_default() += 1;
        }
    }
    seen.values().filter(|&&n| n != complete.len()).count() as u64
}

/// Report plus the raw results it was built from.
#[derive(Clone, Debug)]
pub struct Verification {
    /// Comparison of the runs.
    pub report: ConsistencyReport,
    /// Every run's result, in run order.
    pub results: Vec<ScanResult>,
}

/// Repeats a full scan and checks the node answers the same way each time.
#[derive(Clone, Debug)]
pub struct ConsistencyVerifier {
    runs: usize,
    inter_run_delay: Duration,
}

impl ConsistencyVerifier {
    /// Verifier performing `runs` scans (at least one).
    pub fn new(runs: usize) -> Self {
        Self {
            runs: runs.max(1),
            inter_run_delay: DEFAULT_INTER_RUN_DELAY,
        }
    }

    /// Pause between sequential runs.
    pub fn inter_run_delay(mut self, delay: Duration) -> Self {
        self.inter_run_delay = delay;
        self
    }

    /// Number of runs performed.
    pub fn runs(&self) -> usize {
        self.runs
    }

    /// Runs the scans one after another. `factory(i)` must start a fresh
    /// session for run `i`.
    pub async fn verify<F, Fut>(&self, mut factory: F) -> Verification
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = ScanResult>,
    {
        let mut results = Vec::with_capacity(self.runs);
        for run in 0..self.runs {
            if run > 0 && !self.inter_run_delay.is_zero() {
                tokio::time::sleep(self.inter_run_delay).await;
            }
            let result = factory(run).await;
            log_run(run, &result);
            results.push(result);
        }
        conclude(results)
    }

    /// Runs the scans as concurrent tasks. Each session keeps its own
    /// accumulator; the results are only brought together for the report.
    pub async fn verify_concurrent<F, Fut>(&self, mut factory: F) -> Verification
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = ScanResult> + Send + 'static,
    {
        let mut tasks = JoinSet::new();
        for run in 0..self.runs {
            let session = factory(run);
            tasks.spawn(async move { (run, session.await) });
        }

        let mut slots: Vec<Option<ScanResult>> = (0..self.runs).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((run, result)) => {
                    log_run(run, &result);
                    slots[run] = Some(result);
                }
                Err(err) => warn!(error = %err, "verify.run.join_failed"),
            }
        }
        let results = slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    ScanResult::failed(ScanError::Interrupted("scan task did not finish".into()))
                })
            })
            .collect();
        conclude(results)
    }
}

fn log_run(run: usize, result: &ScanResult) {
    info!(
        run,
        unique_edges = result.unique_edges(),
        batches = result.batches_fetched,
        truncated = result.truncated,
        "verify.run.completed"
    );
}

fn conclude(results: Vec<ScanResult>) -> Verification {
    let report = ConsistencyReport::from_results(&results);
    match report.verdict {
        Verdict::Consistent => info!(
            runs = results.len(),
            count = report.max,
            "verify.consistent"
        ),
        Verdict::NonDeterministic => warn!(
            runs = results.len(),
            min = report.min,
            max = report.max,
            variance = report.variance,
            divergent_ids = report.divergent_ids,
            "verify.non_deterministic"
        ),
        Verdict::Incomplete => warn!(runs = results.len(), "verify.incomplete"),
    }
    Verification { report, results }
}
