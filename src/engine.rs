//! The core correlator (§4.3): matches in-flight requests to responses by
//! request-id, enforces per-request deadlines, and delivers exactly one
//! outcome per registered waiter.
//!
//! `PendingEntry` lives in a `DashMap` rather than behind a single mailbox
//! thread — registration, timeout expiry, and response matching all need to
//! proceed without serialising on one another (§5), the same tradeoff
//! `knhk-byzantine`'s network layer makes for its per-node state map.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use log::{debug, trace, warn};
use tokio::sync::oneshot;

use crate::codec::{self, Message};
use crate::error::SnmpError;
use crate::socket::{Socket, DEFAULT_RECV_BUFFER_BYTES};
use crate::target::Target;

type Waiter = oneshot::Sender<Result<Message, SnmpError>>;

struct PendingEntry {
    waiter: Waiter,
    #[allow(dead_code)]
    deadline: Instant,
    target: Target,
    #[allow(dead_code)]
    registered_at: Instant,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EngineStats {
    pub unknown_responses: u64,
    pub decode_failures: u64,
    pub timeouts: u64,
    pub responses_matched: u64,
}

pub struct Engine {
    pending: DashMap<u32, PendingEntry>,
    socket: Arc<Socket>,
    unknown_responses: AtomicU64,
    decode_failures: AtomicU64,
    timeouts: AtomicU64,
    responses_matched: AtomicU64,
}

impl Engine {
    /// Binds a socket and spawns the reader task. Returns the shared
    /// `Engine` handle callers register requests against.
    pub async fn spawn(bind_addr: SocketAddr) -> Result<Arc<Engine>, SnmpError> {
        let socket = Arc::new(Socket::bind(bind_addr, DEFAULT_RECV_BUFFER_BYTES).await?);
        let engine = Arc::new(Engine {
            pending: DashMap::new(),
            socket,
            unknown_responses: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            responses_matched: AtomicU64::new(0),
        });

        let reader_engine = engine.clone();
        tokio::spawn(async move {
            loop {
                match reader_engine.socket.recv().await {
                    Ok((bytes, src)) => reader_engine.on_datagram(&bytes, src),
                    Err(e) => {
                        warn!("engine: socket reader error: {}", e);
                    }
                }
            }
        });

        Ok(engine)
    }

    /// A socket-less engine for unit tests that only exercise id
    /// bookkeeping, not real network traffic.
    #[cfg(test)]
    pub fn new_for_test() -> Engine {
        let socket = Socket::bind_blocking("127.0.0.1:0".parse().unwrap(), DEFAULT_RECV_BUFFER_BYTES)
            .expect("bind ephemeral test socket");
        Engine {
            pending: DashMap::new(),
            socket: Arc::new(socket),
            unknown_responses: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            responses_matched: AtomicU64::new(0),
        }
    }

    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    pub fn is_pending(&self, id: u32) -> bool {
        self.pending.contains_key(&id)
    }

    /// `register(id, waiter, deadline, target) → ok | {err, duplicate_id}`.
    /// Arms a timer at `deadline` that calls `on_timeout` if the entry is
    /// still present when it fires.
    pub fn register(
        self: &Arc<Self>,
        id: u32,
        target: Target,
        deadline: Instant,
    ) -> Result<oneshot::Receiver<Result<Message, SnmpError>>, SnmpError> {
        let (tx, rx) = oneshot::channel();
        let entry = PendingEntry {
            waiter: tx,
            deadline,
            target,
            registered_at: Instant::now(),
        };

        // DashMap::insert always succeeds; detect the duplicate explicitly
        // so IdGen's invariant ("skip a still-pending id") has a hard error
        // to trip if it's ever violated.
        if self.pending.contains_key(&id) {
            return Err(SnmpError::DuplicateRequestId(id));
        }
        self.pending.insert(id, entry);

        let engine = self.clone();
        let now = Instant::now();
        let wait = deadline.saturating_duration_since(now);
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            engine.on_timeout(id);
        });

        Ok(rx)
    }

    /// Idempotent; used on caller cancellation. Any response that arrives
    /// afterward becomes an `unknown_response` (§5).
    pub fn unregister(&self, id: u32) {
        self.pending.remove(&id);
    }

    /// Decodes the request-id header without a full PDU parse, then (on a
    /// match) decodes the body. Never fails the engine: every branch is a
    /// counted, discardable event (§4.3).
    pub fn on_datagram(&self, bytes: &[u8], _src: SocketAddr) {
        let id = match codec::peek_request_id(bytes) {
            Some(id) => id as u32,
            None => {
                self.decode_failures.fetch_add(1, Ordering::Relaxed);
                trace!("engine: discarding datagram with no parseable request-id");
                return;
            }
        };

        let entry = match self.pending.remove(&id) {
            Some((_, entry)) => entry,
            None => {
                self.unknown_responses.fetch_add(1, Ordering::Relaxed);
                debug!("engine: response for unknown/expired request id {}", id);
                return;
            }
        };

        match codec::decode(bytes) {
            Ok(msg) => {
                self.responses_matched.fetch_add(1, Ordering::Relaxed);
                let _ = entry.waiter.send(Ok(msg));
            }
            Err(e) => {
                self.decode_failures.fetch_add(1, Ordering::Relaxed);
                let _ = entry.waiter.send(Err(e));
            }
        }
    }

    /// Removes the entry if still present and signals a timeout. A no-op if
    /// the entry already resolved via `on_datagram` or `unregister`.
    pub fn on_timeout(&self, id: u32) {
        if let Some((_, entry)) = self.pending.remove(&id) {
            self.timeouts.fetch_add(1, Ordering::Relaxed);
            let _ = entry.waiter.send(Err(SnmpError::Timeout {
                target: entry.target,
                request_id: id,
            }));
        }
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            unknown_responses: self.unknown_responses.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            responses_matched: self.responses_matched.load(Ordering::Relaxed),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Pdu, PduKind, Version};
    use crate::varbind::{VarBind, Value};
    use std::str::FromStr;

    fn sample_response(request_id: i32) -> Vec<u8> {
        let msg = Message {
            version: Version::V2c,
            community: "public".into(),
            pdu: Pdu {
                kind: PduKind::GetResponse,
                request_id,
                error_status_or_non_repeaters: 0,
                error_index_or_max_repetitions: 0,
                varbinds: vec![VarBind::new(
                    crate::oid::Oid::from_str("1.3.6.1.2.1.1.1.0").unwrap(),
                    Value::OctetString(b"Test Device".to_vec()),
                )],
            },
        };
        codec::encode(&msg)
    }

    #[tokio::test]
    async fn register_then_datagram_resolves_waiter() {
        let engine = Engine::spawn("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let target: Target = "127.0.0.1:1".parse().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let rx = engine.register(1, target, deadline).unwrap();

        let bytes = sample_response(1);
        engine.on_datagram(&bytes, "127.0.0.1:1".parse().unwrap());

        let result = rx.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(engine.stats().responses_matched, 1);
        assert_eq!(engine.pending_count(), 0);
    }

    #[tokio::test]
    async fn unknown_id_is_counted_not_fatal() {
        let engine = Engine::spawn("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let bytes = sample_response(999);
        engine.on_datagram(&bytes, "127.0.0.1:1".parse().unwrap());
        assert_eq!(engine.stats().unknown_responses, 1);
    }

    #[tokio::test]
    async fn malformed_datagram_is_counted_not_fatal() {
        let engine = Engine::spawn("127.0.0.1:0".parse().unwrap()).await.unwrap();
        engine.on_datagram(&[0xff, 0x00], "127.0.0.1:1".parse().unwrap());
        assert_eq!(engine.stats().decode_failures, 1);
    }

    #[tokio::test]
    async fn timeout_resolves_waiter_exactly_once() {
        let engine = Engine::spawn("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let target: Target = "127.0.0.1:1".parse().unwrap();
        let deadline = Instant::now() + Duration::from_millis(20);
        let rx = engine.register(2, target, deadline).unwrap();

        let result = rx.await.unwrap();
        assert!(matches!(result, Err(SnmpError::Timeout { .. })));
        assert_eq!(engine.stats().timeouts, 1);
        assert_eq!(engine.pending_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_registration_rejected() {
        let engine = Engine::spawn("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let target: Target = "127.0.0.1:1".parse().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let _rx = engine.register(3, target.clone(), deadline).unwrap();
        let second = engine.register(3, target, deadline);
        assert!(matches!(second, Err(SnmpError::DuplicateRequestId(3))));
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let engine = Engine::spawn("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let target: Target = "127.0.0.1:1".parse().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let _rx = engine.register(4, target, deadline).unwrap();
        engine.unregister(4);
        engine.unregister(4); // second call must not panic
        assert_eq!(engine.pending_count(), 0);
    }
}
