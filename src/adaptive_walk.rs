//! Feedback controller wrapping `BulkWalk` (§4.7): tunes `max_repetitions`
//! from measured round-trip latency, plus the benchmarking sub-mode.

use std::time::Instant;

use log::trace;

use crate::config::Options;
use crate::error::SnmpError;
use crate::oid::OidSource;
use crate::ops::Ops;
use crate::target::Target;
use crate::varbind::VarBind;

const MIN_REPETITIONS: u32 = 1;
const MAX_REPETITIONS: u32 = 50;
const STEP: u32 = 5;

/// `{current_repetitions, consec_success, consec_error, avg_rtt}` from §3's
/// `WalkState`; only `AdaptiveWalk` mutates `current_repetitions`.
#[derive(Debug, Clone)]
pub struct ControllerState {
    pub current_repetitions: u32,
    pub consec_success: u32,
    /// Reset on success, incremented on a slow step, per §4.7 — kept for
    /// observability only. Its intended use as a second tuning signal is
    /// left unclear by design; control decisions gate on latency alone.
    pub consec_error: u32,
    pub avg_rtt_ms: f64,
    /// `opts.performance_threshold_ms` at construction time (§6): the latency
    /// boundary `on_step` contracts/expands around.
    threshold_ms: u64,
}

impl ControllerState {
    fn new(initial: u32, threshold_ms: u64) -> Self {
        ControllerState {
            current_repetitions: initial.clamp(MIN_REPETITIONS, MAX_REPETITIONS),
            consec_success: 0,
            consec_error: 0,
            avg_rtt_ms: 0.0,
            threshold_ms,
        }
    }

    /// Applies one step's outcome per §4.7's exact rule set.
    fn on_step(&mut self, rtt_ms: u64, n_returned: u32) {
        if rtt_ms > self.threshold_ms && self.current_repetitions > MIN_REPETITIONS {
            self.current_repetitions = self.current_repetitions.saturating_sub(STEP).max(MIN_REPETITIONS);
            self.consec_success = 0;
            self.consec_error += 1;
        } else if rtt_ms < self.threshold_ms / 2
            && n_returned == self.current_repetitions
            && self.current_repetitions < MAX_REPETITIONS
        {
            self.current_repetitions = (self.current_repetitions + STEP).min(MAX_REPETITIONS);
            self.consec_success += 1;
            self.consec_error = 0;
        } else {
            self.consec_success += 1;
            self.consec_error = 0;
        }
        self.avg_rtt_ms = if self.avg_rtt_ms == 0.0 {
            rtt_ms as f64
        } else {
            (self.avg_rtt_ms + rtt_ms as f64) / 2.0
        };
    }

    /// On a step error: halve `current`, floor at `min` (§4.7).
    fn on_error(&mut self) {
        self.current_repetitions = (self.current_repetitions / 2).max(MIN_REPETITIONS);
    }
}

/// Runs a GETBULK walk with the repetition count retuned after every step
/// from measured latency, rather than `bulk_walk`'s fixed `max_repetitions`.
pub async fn adaptive_walk(
    ops: &Ops,
    target: &Target,
    root: OidSource<'_>,
    opts: &Options,
) -> Result<Vec<VarBind>, (Vec<VarBind>, SnmpError)> {
    let root_oid = crate::oid::normalize(root, ops.mib.as_ref()).map_err(|e| (Vec::new(), e))?;
    let mut cursor = root_oid.clone();
    let mut acc = Vec::new();
    let mut remaining_budget = opts.max_entries;
    let mut state = ControllerState::new(opts.initial_bulk_size, opts.performance_threshold_ms);

    loop {
        if remaining_budget == 0 {
            return Ok(acc);
        }

        let max_repetitions = state.current_repetitions.min(remaining_budget as u32);
        let mut step_opts = opts.clone();
        step_opts.max_repetitions = max_repetitions;

        let started = Instant::now();
        let response = match ops.get_bulk(target, OidSource::Resolved(cursor.clone()), &step_opts).await {
            Ok(r) => r,
            Err(e) => {
                state.on_error();
                if state.current_repetitions == MIN_REPETITIONS {
                    return Err((acc, e));
                }
                continue;
            }
        };
        let rtt_ms = started.elapsed().as_millis() as u64;

        if response.is_empty() {
            return Ok(acc);
        }

        let in_scope: Vec<VarBind> = response
            .iter()
            .take_while(|vb| root_oid.is_prefix_of(&vb.oid) && !vb.value.is_exception())
            .cloned()
            .collect();

        if in_scope.is_empty() {
            return Ok(acc);
        }

        let last_oid = in_scope.last().unwrap().oid.clone();
        let made_progress = last_oid.compare(&cursor) == std::cmp::Ordering::Greater;
        let n_returned = in_scope.len() as u32;

        remaining_budget = remaining_budget.saturating_sub(in_scope.len());
        acc.extend(in_scope);
        state.on_step(rtt_ms, n_returned);
        trace!(
            "adaptive_walk: rtt={}ms n={} current_repetitions={}",
            rtt_ms,
            n_returned,
            state.current_repetitions
        );

        if !made_progress {
            return Ok(acc);
        }
        cursor = last_oid;

        let last_of_whole_response = &response[response.len() - 1];
        if !root_oid.is_prefix_of(&last_of_whole_response.oid) || last_of_whole_response.value.is_exception() {
            return Ok(acc);
        }
    }
}

/// `{optimal, mean_latency, all_samples, recommended_timeout}` (§4.7
/// benchmarking sub-mode / §6 `benchmark_device`).
#[derive(Debug, Clone)]
pub struct BenchmarkResult {
    pub optimal_size: u32,
    pub mean_latency_ms: f64,
    pub all_samples: Vec<(u32, f64)>,
    pub recommended_timeout_ms: u64,
}

/// Runs each candidate bulk size `iterations` times against `test_oid`,
/// drops errored attempts, and returns the size minimising mean latency.
pub async fn benchmark_device(
    ops: &Ops,
    target: &Target,
    test_oid: OidSource<'_>,
    sizes: &[u32],
    iterations: usize,
    opts: &Options,
) -> Result<BenchmarkResult, SnmpError> {
    let oid = crate::oid::normalize(test_oid, ops.mib.as_ref())?;
    let mut all_samples = Vec::new();

    for &size in sizes {
        let mut step_opts = opts.clone();
        step_opts.max_repetitions = size;
        let mut latencies = Vec::new();

        for _ in 0..iterations {
            let started = Instant::now();
            if ops
                .get_bulk(target, OidSource::Resolved(oid.clone()), &step_opts)
                .await
                .is_ok()
            {
                latencies.push(started.elapsed().as_millis() as f64);
            }
        }

        if !latencies.is_empty() {
            let mean = latencies.iter().sum::<f64>() / latencies.len() as f64;
            all_samples.push((size, mean));
        }
    }

    let (optimal_size, mean_latency_ms) = all_samples
        .iter()
        .cloned()
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
        .ok_or_else(|| SnmpError::TaskFailed("every benchmark sample errored".into()))?;

    Ok(BenchmarkResult {
        optimal_size,
        mean_latency_ms,
        all_samples,
        recommended_timeout_ms: (3000.0f64).max(3.0 * mean_latency_ms) as u64,
    })
}
