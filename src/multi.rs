//! Concurrent fan-out executor (§4.9): bounded parallelism, per-request or
//! global timeout, three result shapes, order preserved regardless of
//! completion order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::config::Options;
use crate::error::SnmpError;
use crate::oid::Oid;
use crate::ops::Ops;
use crate::target::Target;
use crate::varbind::VarBind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnFormat {
    List,
    WithTargets,
    Map,
}

/// Multi's own scheduling mode (`concurrent|simple`, §6's recognised
/// options) — `Simple` runs requests one at a time, useful for agents that
/// can't handle concurrent queries well; `Concurrent` is the default fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    Concurrent,
    Simple,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiOp {
    Get,
    GetNext,
    GetBulk,
    Walk,
    WalkTable,
}

/// One request in a `Multi` batch: `(target, op, oid, opts)` (§4.9).
#[derive(Debug, Clone)]
pub struct MultiRequest {
    pub target: Target,
    pub op: MultiOp,
    pub oid: Oid,
    /// Per-request timeout override, in milliseconds; `None` falls back to
    /// the global `timeout` (§4.9: "non-positive or non-integer per-request
    /// timeouts fall back to the global value" — represented here simply as
    /// absence, since the type system already rules out non-integer/negative).
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub enum MultiOutcome {
    Single(VarBind),
    Many(Vec<VarBind>),
}

/// Per-task error surface (§4.9): `timeout`, `{network_error, r}`,
/// `{task_failed, r}` for supervisor crashes; everything else (device
/// errors, protocol errors, breaker-open, ...) passes through as `Other`
/// rather than being forced into one of those three buckets.
#[derive(thiserror::Error, Debug)]
pub enum MultiError {
    #[error("{0}")]
    Timeout(#[source] SnmpError),
    #[error("{0}")]
    NetworkError(#[source] SnmpError),
    #[error("task_failed: {0}")]
    TaskFailed(String),
    #[error("{0}")]
    Other(#[source] SnmpError),
}

fn classify(e: SnmpError) -> MultiError {
    match e {
        SnmpError::Timeout { .. } => MultiError::Timeout(e),
        SnmpError::TaskFailed(msg) => MultiError::TaskFailed(msg),
        _ if crate::ops::is_network_error(&e) => MultiError::NetworkError(e),
        _ => MultiError::Other(e),
    }
}

pub type MultiResult = Result<MultiOutcome, MultiError>;

#[derive(Debug)]
pub enum MultiResults {
    List(Vec<MultiResult>),
    WithTargets(Vec<(Target, Oid, MultiResult)>),
    Map(HashMap<(Target, Oid), MultiResult>),
}

/// Runs `requests` through `ops`, honoring `opts.max_concurrent`,
/// `opts.return_format`, and the walk-vs-non-walk safety-timer distinction
/// (§4.9: a prior implementation that used the per-PDU timeout as the walk
/// safety timer produced false failures on long but healthy walks — this
/// uses `walk_timeout` for walk ops and `timeout + margin` otherwise).
pub async fn execute(ops: Arc<Ops>, requests: Vec<MultiRequest>, opts: &Options) -> MultiResults {
    const SAFETY_MARGIN: Duration = Duration::from_millis(250);

    // `strategy: simple` (§6) runs one request at a time regardless of
    // `max_concurrent` — useful against agents that misbehave under
    // concurrent queries. Modeled as a concurrency-1 semaphore rather than a
    // separate code path so both strategies share the same timeout/ordering
    // logic below.
    let effective_concurrency = match opts.strategy {
        Strategy::Concurrent => opts.max_concurrent.max(1),
        Strategy::Simple => 1,
    };
    let semaphore = Arc::new(Semaphore::new(effective_concurrency));
    let mut handles = Vec::with_capacity(requests.len());

    for req in requests {
        let ops = ops.clone();
        let semaphore = semaphore.clone();
        let opts = opts.clone();

        let is_walk = matches!(req.op, MultiOp::Walk | MultiOp::WalkTable);
        let per_request_timeout_ms = req.timeout_ms.filter(|&ms| ms > 0).unwrap_or(opts.timeout_ms);
        let safety_timeout = if is_walk {
            Duration::from_millis(opts.walk_timeout_ms)
        } else {
            Duration::from_millis(per_request_timeout_ms) + SAFETY_MARGIN
        };

        let task_opts = {
            let mut o = opts.clone();
            o.timeout_ms = per_request_timeout_ms;
            o
        };

        let handle = tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("multi semaphore is never closed");
            let target = req.target.clone();
            let oid = req.oid.clone();

            let fut = run_one(&ops, &req, &task_opts);
            let outcome = match tokio::time::timeout(safety_timeout, fut).await {
                Ok(r) => r,
                Err(_) => Err(MultiError::Timeout(SnmpError::Timeout { target: target.clone(), request_id: 0 })),
            };
            (target, oid, outcome)
        });
        handles.push(handle);
    }

    let mut ordered = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(triple) => ordered.push(triple),
            Err(_join_err) => {
                // Task panicked/was cancelled: surface as task_failed (§4.9
                // "error surface for a task: ... {task_failed, r} for
                // supervisor crashes"). Target/oid are unrecoverable here, so
                // this variant is synthesized with empty placeholders; callers
                // using `list` format are unaffected, `with_targets`/`map`
                // degrade gracefully rather than panicking.
                ordered.push((
                    Target { host: crate::target::TargetHost::Name(String::new()), port: 0 },
                    Oid::new(vec![0]).unwrap(),
                    Err(MultiError::TaskFailed("task panicked".into())),
                ));
            }
        }
    }

    match opts.return_format {
        ReturnFormat::List => MultiResults::List(ordered.into_iter().map(|(_, _, r)| r).collect()),
        ReturnFormat::WithTargets => MultiResults::WithTargets(ordered),
        ReturnFormat::Map => {
            let mut map = HashMap::with_capacity(ordered.len());
            for (target, oid, result) in ordered {
                map.insert((target, oid), result);
            }
            MultiResults::Map(map)
        }
    }
}

async fn run_one(ops: &Ops, req: &MultiRequest, opts: &Options) -> MultiResult {
    use crate::oid::OidSource;

    let result: Result<MultiOutcome, SnmpError> = match req.op {
        MultiOp::Get => ops.get(&req.target, OidSource::Resolved(req.oid.clone()), opts).await.map(MultiOutcome::Single),
        MultiOp::GetNext => {
            ops.get_next(&req.target, OidSource::Resolved(req.oid.clone()), opts).await.map(MultiOutcome::Single)
        }
        MultiOp::GetBulk => {
            ops.get_bulk(&req.target, OidSource::Resolved(req.oid.clone()), opts).await.map(MultiOutcome::Many)
        }
        MultiOp::Walk => crate::walk::walk(ops, &req.target, OidSource::Resolved(req.oid.clone()), opts)
            .await
            .map(MultiOutcome::Many)
            .map_err(|(_partial, e)| e),
        MultiOp::WalkTable => {
            crate::walk::walk_table(ops, &req.target, OidSource::Resolved(req.oid.clone()), opts)
                .await
                .map(MultiOutcome::Many)
                .map_err(|(_partial, e)| e)
        }
    };

    result.map_err(classify)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::mib::{BuiltinMibResolver, MibResolver};
    use crate::target::TargetHost;
    use std::str::FromStr;

    #[tokio::test]
    async fn multi_preserves_order_and_cardinality_against_unreachable_targets() {
        let engine = Engine::spawn("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let mib: Arc<dyn MibResolver> = Arc::new(BuiltinMibResolver::new());
        let ops = Arc::new(Ops::new(engine, mib));

        let oid = Oid::from_str("1.3.6.1.2.1.1.1.0").unwrap();
        let targets = ["127.0.0.1:1", "127.0.0.1:2", "127.0.0.1:3"];
        let requests: Vec<MultiRequest> = targets
            .iter()
            .enumerate()
            .map(|(i, t)| MultiRequest {
                target: Target { host: TargetHost::Ip(t.split(':').next().unwrap().parse().unwrap()), port: (1 + i) as u16 },
                op: MultiOp::Get,
                oid: oid.clone(),
                timeout_ms: Some(50),
            })
            .collect();

        let opts = Options { timeout_ms: 1000, max_concurrent: 10, return_format: ReturnFormat::List, ..Options::default() };
        let results = execute(ops, requests, &opts).await;

        match results {
            MultiResults::List(list) => {
                assert_eq!(list.len(), 3);
                for r in list {
                    assert!(r.is_err());
                }
            }
            _ => panic!("expected list format"),
        }
    }

    #[test]
    fn classify_buckets_match_the_spec_surface() {
        let target: Target = "127.0.0.1:161".parse().unwrap();

        let timeout = classify(SnmpError::Timeout { target: target.clone(), request_id: 1 });
        assert!(matches!(timeout, MultiError::Timeout(_)));

        let unreachable = classify(SnmpError::Unreachable { target: target.clone() });
        assert!(matches!(unreachable, MultiError::NetworkError(_)));

        let refused = classify(SnmpError::ConnectionRefused { target: target.clone() });
        assert!(matches!(refused, MultiError::NetworkError(_)));

        let task_failed = classify(SnmpError::TaskFailed("boom".into()));
        assert!(matches!(task_failed, MultiError::TaskFailed(ref s) if s == "boom"));

        let device = classify(SnmpError::Device {
            target,
            oid: "1.3.6.1.2.1.1.1.0".parse().unwrap(),
            atom: crate::error::DeviceErrorAtom::GenErr,
        });
        assert!(matches!(device, MultiError::Other(_)));
    }

    #[tokio::test]
    async fn simple_strategy_caps_concurrency_at_one() {
        let engine = Engine::spawn("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let mib: Arc<dyn MibResolver> = Arc::new(BuiltinMibResolver::new());
        let ops = Arc::new(Ops::new(engine, mib));

        let oid = Oid::from_str("1.3.6.1.2.1.1.1.0").unwrap();
        let requests: Vec<MultiRequest> = (0..3)
            .map(|i| MultiRequest {
                target: Target { host: TargetHost::Ip("127.0.0.1".parse().unwrap()), port: 1 + i },
                op: MultiOp::Get,
                oid: oid.clone(),
                timeout_ms: Some(30),
            })
            .collect();

        let opts = Options { timeout_ms: 30, retries: 0, strategy: Strategy::Simple, ..Options::default() };
        let start = std::time::Instant::now();
        let results = execute(ops, requests, &opts).await;
        let elapsed = start.elapsed();

        match results {
            MultiResults::List(list) => assert_eq!(list.len(), 3),
            _ => panic!("expected list format"),
        }
        // Sequential against three unreachable targets takes roughly 3x the
        // per-request timeout; concurrent would finish in roughly 1x.
        assert!(elapsed >= Duration::from_millis(80), "expected serialized execution, took {:?}", elapsed);
    }
}
