//! Engine selection and load-balancing (§4.11). Engine state is
//! canonicalised to a single concurrent map keyed by name (Design Notes §9:
//! "the Router stores `engines` as both a list and a map at different call
//! sites ... canonicalise to a single concurrent map").
//!
//! The periodic health-check sweep keeps a thread+channel actor shape
//! (a background thread communicating over `crossbeam_channel`) rather than
//! a tokio task: it is a genuinely independent, rarely-communicating
//! background loop, exactly the shape that idiom fits, and a single-writer
//! design is an explicitly acceptable choice for this component (§9).

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use log::{info, warn};
use rand::Rng;

use crate::error::SnmpError;
use crate::target::Target;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    RoundRobin,
    LeastConnections,
    Weighted,
    Affinity,
}

/// §3's `EngineDescriptor`.
#[derive(Debug, Clone)]
pub struct EngineDescriptor {
    pub name: String,
    pub weight: u32,
    pub max_load: u32,
    pub current_load: u32,
    pub health: Health,
    pub last_check: Instant,
    pub rtt_samples: Vec<u64>,
    pub error_count: u32,
    pub total_requests: u64,
}

impl EngineDescriptor {
    pub fn new(name: impl Into<String>, weight: u32, max_load: u32) -> Self {
        EngineDescriptor {
            name: name.into(),
            weight,
            max_load,
            current_load: 0,
            health: Health::Healthy,
            last_check: Instant::now(),
            rtt_samples: Vec::new(),
            error_count: 0,
            total_requests: 0,
        }
    }

    fn remaining_capacity(&self) -> u32 {
        self.max_load.saturating_sub(self.current_load)
    }
}

pub struct RouterParams {
    pub strategy: Strategy,
    pub max_retries: u32,
    pub unhealthy_error_threshold: u32,
    pub health_check_interval: Duration,
}

impl Default for RouterParams {
    fn default() -> Self {
        RouterParams {
            strategy: Strategy::RoundRobin,
            max_retries: 2,
            unhealthy_error_threshold: 10,
            health_check_interval: Duration::from_secs(30),
        }
    }
}

pub struct Router {
    params: RouterParams,
    engines: DashMap<String, Mutex<EngineDescriptor>>,
    affinity: DashMap<Target, String>,
    rr_counter: AtomicUsize,
    shutdown_tx: crossbeam_channel::Sender<()>,
    sweep_thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl Router {
    pub fn new(params: RouterParams) -> Arc<Router> {
        let (tx, rx) = crossbeam_channel::bounded::<()>(0);
        let router = Arc::new(Router {
            params,
            engines: DashMap::new(),
            affinity: DashMap::new(),
            rr_counter: AtomicUsize::new(0),
            shutdown_tx: tx,
            sweep_thread: Mutex::new(None),
        });
        router.spawn_health_sweep(rx);
        router
    }

    /// Background sweep thread: a dedicated thread blocking on
    /// `recv_timeout` that either ticks (timeout) or shuts down (channel
    /// message/disconnect).
    fn spawn_health_sweep(self: &Arc<Self>, rx: crossbeam_channel::Receiver<()>) {
        let weak = Arc::downgrade(self);
        let interval = self.params.health_check_interval;
        let threshold = self.params.unhealthy_error_threshold;

        let handle = std::thread::spawn(move || loop {
            match rx.recv_timeout(interval) {
                Ok(()) | Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            }
            let Some(router) = weak.upgrade() else { break };
            router.sweep_once(threshold);
        });

        *self.sweep_thread.lock().unwrap() = Some(handle);
    }

    fn sweep_once(&self, threshold: u32) {
        for entry in self.engines.iter() {
            let mut desc = entry.value().lock().unwrap();
            desc.last_check = Instant::now();
            if desc.error_count >= threshold && desc.health == Health::Healthy {
                desc.health = Health::Unhealthy;
                warn!("router: engine {} marked unhealthy (error_count={})", desc.name, desc.error_count);
            }
        }
    }

    pub fn add_engine(&self, desc: EngineDescriptor) {
        self.engines.insert(desc.name.clone(), Mutex::new(desc));
    }

    pub fn remove_engine(&self, name: &str) {
        self.engines.remove(name);
        self.affinity.retain(|_, bound| bound != name);
    }

    pub fn mark_healthy(&self, name: &str) {
        if let Some(entry) = self.engines.get(name) {
            let mut desc = entry.lock().unwrap();
            desc.health = Health::Healthy;
            desc.error_count = 0;
        }
    }

    /// Operator-driven recovery attempt: identical effect to `mark_healthy`,
    /// kept as a distinct name because §4.11 lists both verbs separately.
    pub fn attempt_recovery(&self, name: &str) {
        self.mark_healthy(name);
    }

    fn healthy_names(&self) -> Vec<String> {
        self.engines
            .iter()
            .filter(|e| e.value().lock().unwrap().health == Health::Healthy)
            .map(|e| e.key().clone())
            .collect()
    }

    /// Selects one engine name for `target` using the configured strategy.
    pub fn select(&self, target: &Target) -> Result<String, SnmpError> {
        let healthy = self.healthy_names();
        if healthy.is_empty() {
            return Err(SnmpError::NoAvailableConnections);
        }

        let name = match self.params.strategy {
            Strategy::RoundRobin => self.select_round_robin(&healthy),
            Strategy::LeastConnections => self.select_least_connections(&healthy)?,
            Strategy::Weighted => self.select_weighted(&healthy)?,
            Strategy::Affinity => self.select_affinity(target, &healthy)?,
        };

        if let Some(entry) = self.engines.get(&name) {
            let mut desc = entry.lock().unwrap();
            desc.current_load += 1;
            desc.total_requests += 1;
        }
        Ok(name)
    }

    fn select_round_robin(&self, healthy: &[String]) -> String {
        let i = self.rr_counter.fetch_add(1, Ordering::Relaxed) % healthy.len();
        healthy[i].clone()
    }

    fn select_least_connections(&self, healthy: &[String]) -> Result<String, SnmpError> {
        healthy
            .iter()
            .min_by_key(|name| self.engines.get(*name).map(|e| e.lock().unwrap().current_load).unwrap_or(u32::MAX))
            .cloned()
            .ok_or(SnmpError::NoAvailableConnections)
    }

    fn select_weighted(&self, healthy: &[String]) -> Result<String, SnmpError> {
        let weights: Vec<(String, u32)> = healthy
            .iter()
            .map(|name| (name.clone(), self.engines.get(name).map(|e| e.lock().unwrap().weight.max(1)).unwrap_or(1)))
            .collect();
        let total: u32 = weights.iter().map(|(_, w)| w).sum();
        if total == 0 {
            return self.select_least_connections(healthy);
        }
        let mut pick = rand::thread_rng().gen_range(0..total);
        for (name, w) in &weights {
            if pick < *w {
                return Ok(name.clone());
            }
            pick -= w;
        }
        Ok(weights.last().unwrap().0.clone())
    }

    /// First `target` → engine binding is sticky; falls back to
    /// `least_connections` when unbound or the bound engine is unhealthy.
    fn select_affinity(&self, target: &Target, healthy: &[String]) -> Result<String, SnmpError> {
        if let Some(bound) = self.affinity.get(target) {
            if healthy.contains(bound.value()) {
                return Ok(bound.value().clone());
            }
        }
        let chosen = self.select_least_connections(healthy)?;
        self.affinity.insert(target.clone(), chosen.clone());
        Ok(chosen)
    }

    /// Batch routing (§4.11): group by affinity when the strategy is
    /// `affinity`, otherwise distribute by remaining capacity; when every
    /// engine is at capacity, fall back to round robin.
    pub fn select_batch(&self, targets: &[Target]) -> Result<Vec<String>, SnmpError> {
        if self.params.strategy == Strategy::Affinity {
            return targets.iter().map(|t| self.select(t)).collect();
        }

        let healthy = self.healthy_names();
        if healthy.is_empty() {
            return Err(SnmpError::NoAvailableConnections);
        }

        let mut capacity: HashMap<String, u32> = healthy
            .iter()
            .map(|name| (name.clone(), self.engines.get(name).map(|e| e.value().lock().unwrap().remaining_capacity()).unwrap_or(0)))
            .collect();

        let mut assignments = Vec::with_capacity(targets.len());
        let mut rr = 0usize;
        for _ in targets {
            let best = capacity.iter().filter(|(_, &cap)| cap > 0).max_by_key(|(_, &cap)| cap).map(|(n, _)| n.clone());
            let chosen = match best {
                Some(name) => {
                    *capacity.get_mut(&name).unwrap() -= 1;
                    name
                }
                None => {
                    let name = healthy[rr % healthy.len()].clone();
                    rr += 1;
                    name
                }
            };
            assignments.push(chosen);
        }
        Ok(assignments)
    }

    pub fn record_success(&self, name: &str) {
        if let Some(entry) = self.engines.get(name) {
            let mut desc = entry.lock().unwrap();
            desc.current_load = desc.current_load.saturating_sub(1);
        }
    }

    pub fn record_failure(&self, name: &str) {
        if let Some(entry) = self.engines.get(name) {
            let mut desc = entry.lock().unwrap();
            desc.current_load = desc.current_load.saturating_sub(1);
            desc.error_count += 1;
        }
    }

    /// Retries a transient failure (`timeout`, `no_available_connections`)
    /// against the same engine up to `max_retries` times; permanent errors
    /// surface immediately (§4.11).
    pub fn is_retriable_for_router(e: &SnmpError) -> bool {
        matches!(e, SnmpError::Timeout { .. } | SnmpError::NoAvailableConnections)
    }

    pub fn max_retries(&self) -> u32 {
        self.params.max_retries
    }

    pub fn engine_count(&self) -> usize {
        self.engines.len()
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.sweep_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        info!("router: health-check sweep thread stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> Target {
        "127.0.0.1:1161".parse().unwrap()
    }

    #[test]
    fn round_robin_cycles_through_engines() {
        let router = Router::new(RouterParams { strategy: Strategy::RoundRobin, ..Default::default() });
        router.add_engine(EngineDescriptor::new("a", 1, 100));
        router.add_engine(EngineDescriptor::new("b", 1, 100));

        let first = router.select(&target()).unwrap();
        let second = router.select(&target()).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn unhealthy_engine_is_excluded_from_selection() {
        let router = Router::new(RouterParams { strategy: Strategy::RoundRobin, ..Default::default() });
        router.add_engine(EngineDescriptor::new("a", 1, 100));
        router.add_engine(EngineDescriptor::new("b", 1, 100));

        for _ in 0..11 {
            router.record_failure("a");
        }
        // error_count crosses the threshold only via the sweep; drive it directly
        // to avoid depending on the background thread's timing in a unit test.
        router.sweep_once(10);

        for _ in 0..5 {
            assert_eq!(router.select(&target()).unwrap(), "b");
        }
    }

    #[test]
    fn affinity_is_sticky_to_first_binding() {
        let router = Router::new(RouterParams { strategy: Strategy::Affinity, ..Default::default() });
        router.add_engine(EngineDescriptor::new("a", 1, 100));
        router.add_engine(EngineDescriptor::new("b", 1, 100));

        let t = target();
        let first = router.select(&t).unwrap();
        for _ in 0..5 {
            assert_eq!(router.select(&t).unwrap(), first);
        }
    }

    #[test]
    fn mark_healthy_resets_error_count() {
        let router = Router::new(RouterParams { strategy: Strategy::RoundRobin, ..Default::default() });
        router.add_engine(EngineDescriptor::new("a", 1, 100));
        for _ in 0..11 {
            router.record_failure("a");
        }
        router.sweep_once(10);
        router.mark_healthy("a");
        assert_eq!(router.select(&target()).unwrap(), "a");
    }
}
